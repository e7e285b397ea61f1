//! Monotonic time plumbing.
//!
//! All latency measurement goes through [`now`]; wall time is never used for
//! latency. Values are nanoseconds on a process-wide monotonic clock whose
//! origin is unspecified, so only differences carry meaning.

use std::sync::OnceLock;

use quanta::Clock;

pub const US: u64 = 1_000;
pub const MS: u64 = 1_000_000;
pub const S: u64 = 1_000_000_000;

static CLOCK: OnceLock<Clock> = OnceLock::new();

/// Current reading of the monotonic clock, in nanoseconds.
pub fn now() -> u64 {
    let clock = CLOCK.get_or_init(Clock::new);
    clock.delta_as_nanos(0, clock.raw())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn monotonic() {
        let a = now();
        let b = now();
        assert!(b >= a);
        assert!(a > 0);
    }
}
