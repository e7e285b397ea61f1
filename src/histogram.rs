//! Two-level concurrent latency accounting.
//!
//! Every worker owns a [`Bucket`]: a 167-band count array plus scalar
//! aggregates, written on the hot path without any synchronization. The
//! shared [`Histogram`] registry keeps one aggregate bucket per workload
//! kind behind a single mutex. Workers fold their unmerged deltas into the
//! registry opportunistically, at most once per merge interval, and only
//! through `try_lock`, so a contended registry never stalls sample
//! recording. An atomic epoch counter (`merge_evo`) tracks which workers
//! have checked in for the current statistics window; once the last one
//! does, a rolling summary row is emitted and the epoch advances.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicI64, Ordering};

use parking_lot::Mutex;

use crate::clock::{self, MS, S, US};
use crate::config::BenchKind;

/// Number of latency bands.
pub const BANDS: usize = 167;

/// Minimum wall-clock interval between successive summary rows.
const STAT_INTERVAL: u64 = S;

/// Minimum per-worker interval before attempting a non-blocking merge.
const MERGE_INTERVAL: u64 = S / 100;

const SUB_BANDS: [u64; 16] = [12, 14, 16, 18, 20, 25, 30, 35, 40, 45, 50, 60, 70, 80, 90, 100];

const fn ladder() -> [u64; BANDS] {
    let scales = [1, 10, 100, US, US * 10, US * 100, MS, MS * 10, MS * 100, S];
    let mut bounds = [0u64; BANDS];
    bounds[0] = 9;
    let mut i = 1;
    let mut s = 0;
    while s < 10 {
        let mut j = 0;
        while j < 16 {
            bounds[i] = scales[s] * SUB_BANDS[j];
            i += 1;
            j += 1;
        }
        s += 1;
    }
    bounds[i] = S * 5 * 60;
    bounds[i + 1] = S * 30 * 60;
    bounds[i + 2] = S * 3600 * 4;
    bounds[i + 3] = S * 3600 * 8;
    bounds[i + 4] = S * 3600 * 24;
    bounds[i + 5] = u64::MAX;
    bounds
}

/// Latency band upper bounds in nanoseconds, shared by every workload kind.
/// A sample lands in the lowest band whose bound is ≥ the sample.
pub static BAND_BOUNDS: [u64; BANDS] = ladder();

/// Scalar aggregates of one sample stream.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Stats {
    pub n: u64,
    pub volume_sum: u64,
    pub latency_sum_ns: u64,
    /// Squared nanoseconds; `u128` so a long run cannot overflow it.
    pub latency_sum_square: u128,
}

/// Outcome of a summarize attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Summarized {
    /// The statistics window has not elapsed yet.
    NotYet,
    /// Counted this worker in; peers are still missing.
    Waiting,
    /// All workers checked in; a summary row was emitted and the epoch
    /// advanced.
    Rolled,
}

/// Per-worker sample accumulator for the workload kind it was last reset to.
///
/// The registry holds one of these per kind as the merge target; those are
/// created with `is_worker == false` and never counted in the cohort.
pub struct Bucket {
    enabled: bool,
    is_worker: bool,
    kind: Option<BenchKind>,

    /// Last registry epoch this bucket contributed to.
    merge_evo: i64,

    min: u64,
    max: u64,
    whole_min: u64,
    whole_max: u64,

    checkpoint_ns: u64,
    begin_ns: u64,
    end_ns: u64,

    last: Stats,
    acc: Stats,
    counts: [u64; BANDS],
}

impl Bucket {
    fn new(is_worker: bool, merge_evo: i64) -> Bucket {
        Bucket {
            enabled: false,
            is_worker,
            kind: None,
            merge_evo,
            min: u64::MAX,
            max: 0,
            whole_min: u64::MAX,
            whole_max: 0,
            checkpoint_ns: 0,
            begin_ns: 0,
            end_ns: 0,
            last: Stats::default(),
            acc: Stats::default(),
            counts: [0; BANDS],
        }
    }

    /// Arms the bucket for a workload kind; epoch and lifetime aggregates
    /// survive.
    pub fn reset(&mut self, kind: BenchKind) {
        self.reset_at(kind, clock::now());
    }

    fn reset_at(&mut self, kind: BenchKind, now: u64) {
        self.enabled = true;
        self.kind = Some(kind);
        self.min = u64::MAX;
        self.max = 0;
        self.whole_min = u64::MAX;
        self.checkpoint_ns = now;
        self.begin_ns = now;
        self.end_ns = now;
    }

    /// Records one sample measured from `t0` and, when this bucket is due,
    /// tries a non-blocking merge into the registry. On lock contention the
    /// deltas simply stay local until a later sample.
    pub fn add(&mut self, registry: &Histogram, t0: u64, volume: u64) {
        self.add_at(registry, clock::now(), t0, volume);
    }

    fn add_at(&mut self, registry: &Histogram, now: u64, t0: u64, volume: u64) {
        let latency = now.saturating_sub(t0);

        if self.begin_ns == 0 {
            self.begin_ns = t0;
        }
        self.end_ns = now;
        self.acc.latency_sum_ns += latency;
        self.acc.latency_sum_square += u128::from(latency) * u128::from(latency);
        self.acc.n += 1;
        self.acc.volume_sum += volume;

        self.min = self.min.min(latency);
        self.max = self.max.max(latency);

        let band = BAND_BOUNDS.partition_point(|&bound| bound < latency);
        self.counts[band] += 1;

        if self.merge_evo != registry.merge_evo.load(Ordering::Relaxed)
            || now - self.checkpoint_ns < MERGE_INTERVAL
        {
            return;
        }

        if let Some(mut inner) = registry.inner.try_lock() {
            registry.merge_locked(&mut inner, self, now);
            drop(inner);
            self.rearm(now);
        }
    }

    /// Discards the merged window: snapshot `last`, clear the band counts,
    /// restart min/max.
    fn rearm(&mut self, now: u64) {
        self.checkpoint_ns = now;
        self.min = u64::MAX;
        self.max = 0;
        self.last = self.acc;
        self.counts = [0; BANDS];
    }

    #[cfg(test)]
    fn unmerged_band_total(&self) -> u64 {
        self.counts.iter().sum()
    }
}

struct HistogramInner {
    checkpoint_ns: u64,
    per_bench: [Bucket; BenchKind::COUNT],
}

/// The shared registry: one aggregate bucket per workload kind, a single
/// mutex around them, and the atomic cohort/epoch counters.
pub struct Histogram {
    inner: Mutex<HistogramInner>,
    merge_evo: AtomicI64,
    workers_active: AtomicI64,
    workers_merged: AtomicI64,
    starting_point_ns: u64,
}

impl Histogram {
    pub fn new(benchmarks: &BTreeSet<BenchKind>) -> Histogram {
        Self::new_at(benchmarks, clock::now())
    }

    fn new_at(benchmarks: &BTreeSet<BenchKind>, now: u64) -> Histogram {
        let mut per_bench: [Bucket; BenchKind::COUNT] =
            std::array::from_fn(|_| Bucket::new(false, 0));
        for kind in BenchKind::ALL {
            per_bench[kind as usize].kind = Some(kind);
            if benchmarks.contains(&kind) {
                per_bench[kind as usize].reset_at(kind, now);
            }
        }
        Histogram {
            inner: Mutex::new(HistogramInner {
                checkpoint_ns: now,
                per_bench,
            }),
            merge_evo: AtomicI64::new(0),
            workers_active: AtomicI64::new(0),
            workers_merged: AtomicI64::new(0),
            starting_point_ns: now,
        }
    }

    /// Creates a worker-side bucket registered with this histogram. Must be
    /// paired with [`Histogram::detach_worker`].
    pub fn attach_worker(&self) -> Bucket {
        self.workers_active.fetch_add(1, Ordering::Relaxed);
        Bucket::new(true, self.merge_evo.load(Ordering::Relaxed))
    }

    /// Unregisters a worker bucket. A bucket that already checked in for
    /// the current window gives its vote back, so the window can still roll
    /// with one worker fewer.
    pub fn detach_worker(&self, bucket: &Bucket) {
        if !bucket.is_worker {
            return;
        }
        if bucket.merge_evo == self.merge_evo.load(Ordering::Relaxed) + 1 {
            self.workers_merged.fetch_sub(1, Ordering::Relaxed);
        }
        self.workers_active.fetch_sub(1, Ordering::Relaxed);
    }

    /// Folds a worker bucket into the aggregate, blocking on the registry
    /// lock, and clears the source deltas. Used when a workload kind
    /// finishes; the hot path goes through [`Bucket::add`] instead.
    pub fn merge(&self, src: &mut Bucket) {
        self.merge_at(src, clock::now());
    }

    fn merge_at(&self, src: &mut Bucket, now: u64) {
        let mut inner = self.inner.lock();
        self.merge_locked(&mut inner, src, now);
        drop(inner);
        src.rearm(now);
    }

    fn merge_locked(&self, inner: &mut HistogramInner, src: &mut Bucket, now: u64) {
        let Some(kind) = src.kind else {
            return;
        };

        {
            let dst = &mut inner.per_bench[kind as usize];
            if !dst.enabled || src.acc.n == src.last.n {
                return;
            }

            dst.acc.latency_sum_ns += src.acc.latency_sum_ns - src.last.latency_sum_ns;
            dst.acc.latency_sum_square +=
                src.acc.latency_sum_square - src.last.latency_sum_square;
            dst.acc.volume_sum += src.acc.volume_sum - src.last.volume_sum;
            dst.acc.n += src.acc.n - src.last.n;

            for (d, s) in dst.counts.iter_mut().zip(src.counts.iter()) {
                *d += *s;
            }

            if dst.begin_ns == 0 || dst.begin_ns > src.begin_ns {
                dst.begin_ns = src.begin_ns;
            }
            dst.end_ns = dst.end_ns.max(src.end_ns);
            dst.min = dst.min.min(src.min);
            dst.max = dst.max.max(src.max);
        }

        // First contribution of this bucket in the current epoch: let it
        // vote for a summary. Waiting and Rolled both consume the vote.
        if src.merge_evo == self.merge_evo.load(Ordering::Relaxed)
            && self.summarize_locked(inner, now) != Summarized::NotYet
        {
            src.merge_evo += 1;
        }
    }

    /// Attempts to close the current statistics window. Emits at most one
    /// row per window, and only after every active worker has checked in.
    pub fn summarize(&self) -> Summarized {
        let mut inner = self.inner.lock();
        self.summarize_locked(&mut inner, clock::now())
    }

    fn summarize_locked(&self, inner: &mut HistogramInner, now: u64) -> Summarized {
        if now - inner.checkpoint_ns < STAT_INTERVAL {
            return Summarized::NotYet;
        }

        let active = self.workers_active.load(Ordering::Relaxed);
        if active > 0 {
            let merged = self.workers_merged.fetch_add(1, Ordering::Relaxed) + 1;
            if merged < active {
                return Summarized::Waiting;
            }
        }

        if inner.checkpoint_ns == self.starting_point_ns {
            let mut line = format!("{:>9}", "time");
            for _ in inner.per_bench.iter().filter(|b| b.enabled) {
                line.push_str(&format!(
                    " | {:>5} {:>10} {:>10} {:>10} {:>10} {:>10} {:>12} {:>10}",
                    "bench", "rps", "min", "avg", "rms", "max", "vol", "#N"
                ));
            }
            println!("{line}");
        }

        let timepoint = (now - self.starting_point_ns) as f64 / S as f64;
        let wall = (now - inner.checkpoint_ns) as f64 / S as f64;
        inner.checkpoint_ns = now;

        let mut line = format!("{timepoint:9.3}");
        for h in inner.per_bench.iter_mut().filter(|b| b.enabled) {
            let n = h.acc.n - h.last.n;
            let vol = h.acc.volume_sum - h.last.volume_sum;

            let name = h.kind.map(BenchKind::as_str).unwrap_or("?");
            line.push_str(&format!(" | {name:>5}:"));
            if n != 0 {
                let rms = (((h.acc.latency_sum_square - h.last.latency_sum_square) as f64)
                    / n as f64)
                    .sqrt() as u64;
                let avg = (h.acc.latency_sum_ns - h.last.latency_sum_ns) / n;
                let rps = n as f64 / wall;
                let bps = vol as f64 / wall;
                line.push_str(&format!(
                    "{:>10} {:>10} {:>10} {:>10} {:>10} {:>12} {:>10}",
                    si_value(rps, ""),
                    si_latency(h.min),
                    si_latency(avg),
                    si_latency(rms),
                    si_latency(h.max),
                    si_value(bps, "bps"),
                    si_value(h.acc.n as f64, "")
                ));
            } else {
                line.push_str(&format!(
                    "{:>10} {:>10} {:>10} {:>10} {:>10} {:>12} {:>10}",
                    "-", "-", "-", "-", "-", "-", "-"
                ));
            }

            h.whole_min = h.whole_min.min(h.min);
            h.min = u64::MAX;
            h.whole_max = h.whole_max.max(h.max);
            h.max = 0;
            h.last = h.acc;
        }
        println!("{line}");

        self.workers_merged.store(0, Ordering::Relaxed);
        self.merge_evo.fetch_add(1, Ordering::Relaxed);
        Summarized::Rolled
    }

    /// Prints the final per-kind band tables and totals.
    pub fn print(&self) {
        let inner = self.inner.lock();
        for h in inner
            .per_bench
            .iter()
            .filter(|b| b.enabled && b.acc.n > 0)
        {
            let name = h.kind.map(BenchKind::as_str).unwrap_or("?");
            println!();
            println!(
                ">>>>>>>>>>>>>>>>>>>>>>>>>>>>>>>>>>>>>>>>>>>>>>>>>>>>>>>>>> {}({})",
                name, h.acc.n
            );
            println!(
                "[ {:>9}  {:>9} ] {:>13} {:>8} {:>10}",
                "ltn_from", "ltn_to", "ops_count", "%", "p%"
            );
            println!("----------------------------------------------------------");

            let factor = 100.0 / h.acc.n as f64;
            let mut total = 0u64;
            for (band, &count) in h.counts.iter().enumerate() {
                if count == 0 {
                    continue;
                }
                total += count;
                let from = si_latency(if band > 0 { BAND_BOUNDS[band - 1] } else { 0 });
                let to = si_latency(BAND_BOUNDS[band] - 1);
                println!(
                    "[ {:>9}, {:>9} ] {:>13} {:>7.2}% {:>9.4}%",
                    from,
                    to,
                    count,
                    factor * count as f64,
                    factor * total as f64
                );
            }
            println!("----------------------------------------------------------");

            println!(
                "total:       {:>9}  {:>13}",
                si_latency(h.acc.latency_sum_ns),
                total
            );
            // The window still open at shutdown has not been folded into
            // the whole-run extremes yet.
            println!(
                "min latency: {:>9}/op",
                si_latency(h.whole_min.min(h.min))
            );
            println!(
                "avg latency: {:>9}/op",
                si_latency(h.acc.latency_sum_ns / h.acc.n)
            );
            println!(
                "rms latency: {:>9}/op",
                si_latency((h.acc.latency_sum_square as f64 / h.acc.n as f64).sqrt() as u64)
            );
            println!(
                "max latency: {:>9}/op",
                si_latency(h.whole_max.max(h.max))
            );

            let wall = (h.end_ns - h.begin_ns) as f64 / S as f64;
            if wall > 0.0 {
                println!(
                    " throughput: {:>7}ops/s",
                    si_value(h.acc.n as f64 / wall, "")
                );
            }
        }
    }

    /// Aggregate counters of one workload kind. Test hook.
    #[cfg(test)]
    pub(crate) fn stats(&self, kind: BenchKind) -> Stats {
        self.inner.lock().per_bench[kind as usize].acc
    }

    #[cfg(test)]
    pub(crate) fn band_total(&self, kind: BenchKind) -> u64 {
        self.inner.lock().per_bench[kind as usize]
            .counts
            .iter()
            .sum()
    }
}

/// Formats a value with an SI magnitude suffix, three fractional digits.
fn si_value(mut val: f64, unit: &str) -> String {
    const DEC: [char; 10] = ['K', 'M', 'G', 'T', 'P', 'E', 'Z', 'Y', 'R', 'Q'];
    const INC: [char; 10] = ['m', 'u', 'n', 'p', 'f', 'a', 'z', 'y', 'r', 'q'];

    let mut suffix = ' ';
    let mut dec = DEC.iter();
    while val > 995.0 {
        match dec.next() {
            Some(&c) => {
                val *= 1e-3;
                suffix = c;
            }
            None => break,
        }
    }
    let mut inc = INC.iter();
    while val > 0.0 && val < 1.0 {
        match inc.next() {
            Some(&c) => {
                val *= 1e3;
                suffix = c;
            }
            None => break,
        }
    }

    if suffix == ' ' {
        format!("{val:.3}{unit}")
    } else {
        format!("{val:.3}{suffix}{unit}")
    }
}

fn si_latency(ns: u64) -> String {
    si_value(ns as f64 / S as f64, "s")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn only(kind: BenchKind) -> BTreeSet<BenchKind> {
        BTreeSet::from([kind])
    }

    #[test]
    fn ladder_shape() {
        assert_eq!(BAND_BOUNDS.len(), BANDS);
        assert_eq!(BAND_BOUNDS[0], 9);
        assert_eq!(BAND_BOUNDS[1], 12);
        assert_eq!(BAND_BOUNDS[16], 100);
        assert_eq!(BAND_BOUNDS[17], 120);
        assert_eq!(BAND_BOUNDS[161], S * 5 * 60);
        assert_eq!(BAND_BOUNDS[BANDS - 1], u64::MAX);
        for w in BAND_BOUNDS.windows(2) {
            assert!(w[0] < w[1]);
        }
    }

    #[test]
    fn band_selection_is_unique() {
        // Deterministic pseudo-random probe values.
        let mut x = 0x9e3779b97f4a7c15u64;
        let probe = |v: u64| {
            let band = BAND_BOUNDS.partition_point(|&bound| bound < v);
            assert!(BAND_BOUNDS[band] >= v);
            if band > 0 {
                assert!(BAND_BOUNDS[band - 1] < v);
            }
        };
        for &bound in BAND_BOUNDS.iter() {
            probe(bound);
            probe(bound.saturating_add(1));
            probe(bound.saturating_sub(1).max(1));
        }
        for _ in 0..10_000 {
            x = x.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
            probe(x % (30 * S));
        }
    }

    #[test]
    fn merge_without_samples_is_a_noop() {
        let hist = Histogram::new_at(&only(BenchKind::Set), 0);
        let mut bucket = hist.attach_worker();
        bucket.reset_at(BenchKind::Set, 0);

        hist.merge_at(&mut bucket, 2 * S);
        assert_eq!(hist.stats(BenchKind::Set), Stats::default());
        assert_eq!(hist.workers_merged.load(Ordering::Relaxed), 0);
        assert_eq!(hist.merge_evo.load(Ordering::Relaxed), 0);
        hist.detach_worker(&bucket);
    }

    #[test]
    fn counts_are_conserved_across_merges() {
        let hist = Histogram::new_at(&only(BenchKind::Get), 0);
        let mut bucket = hist.attach_worker();
        bucket.reset_at(BenchKind::Get, 0);

        for i in 0..100u64 {
            bucket.add_at(&hist, 10 + i, 10, 48);
        }
        assert_eq!(bucket.acc.n, 100);
        assert_eq!(bucket.unmerged_band_total(), bucket.acc.n - bucket.last.n);

        hist.merge_at(&mut bucket, S / 2);
        assert_eq!(bucket.unmerged_band_total(), 0);
        assert_eq!(bucket.last, bucket.acc);

        let agg = hist.stats(BenchKind::Get);
        assert_eq!(agg.n, 100);
        assert_eq!(agg.volume_sum, 100 * 48);
        assert_eq!(hist.band_total(BenchKind::Get), 100);

        // Nothing new to merge: the aggregate must not move.
        hist.merge_at(&mut bucket, S / 2 + 1);
        assert_eq!(hist.stats(BenchKind::Get).n, 100);
        assert_eq!(hist.band_total(BenchKind::Get), 100);
        hist.detach_worker(&bucket);
    }

    #[test]
    fn summarize_waits_for_the_whole_cohort() {
        let hist = Histogram::new_at(&only(BenchKind::Set), 0);
        let mut b1 = hist.attach_worker();
        let mut b2 = hist.attach_worker();
        b1.reset_at(BenchKind::Set, 0);
        b2.reset_at(BenchKind::Set, 0);

        b1.add_at(&hist, 100, 50, 8);
        b2.add_at(&hist, 100, 50, 8);

        // Window not elapsed: merge folds data but no vote is consumed.
        hist.merge_at(&mut b1, S / 2);
        assert_eq!(hist.workers_merged.load(Ordering::Relaxed), 0);
        assert_eq!(b1.merge_evo, 0);

        // Window elapsed, first voter: counted, still waiting for b2.
        b1.add_at(&hist, 2 * S - 10, 2 * S - 20, 8);
        hist.merge_at(&mut b1, 2 * S);
        assert_eq!(hist.workers_merged.load(Ordering::Relaxed), 1);
        assert_eq!(b1.merge_evo, 1);

        // The same worker cannot vote twice within one window.
        b1.add_at(&hist, 2 * S + 100, 2 * S + 50, 8);
        hist.merge_at(&mut b1, 2 * S + 200);
        assert_eq!(hist.workers_merged.load(Ordering::Relaxed), 1);
        assert_eq!(b1.merge_evo, 1);

        // Last voter rolls the window and advances the epoch.
        hist.merge_at(&mut b2, 2 * S + 300);
        assert_eq!(hist.merge_evo.load(Ordering::Relaxed), 1);
        assert_eq!(hist.workers_merged.load(Ordering::Relaxed), 0);
        assert_eq!(b2.merge_evo, 1);

        hist.detach_worker(&b2);
        hist.detach_worker(&b1);
        assert_eq!(hist.workers_active.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn detach_returns_a_consumed_vote() {
        let hist = Histogram::new_at(&only(BenchKind::Set), 0);
        let mut b1 = hist.attach_worker();
        let b2 = hist.attach_worker();
        b1.reset_at(BenchKind::Set, 0);

        b1.add_at(&hist, 100, 50, 8);
        hist.merge_at(&mut b1, 2 * S);
        assert_eq!(hist.workers_merged.load(Ordering::Relaxed), 1);

        // b1 leaves after voting: both counters drop together.
        hist.detach_worker(&b1);
        assert_eq!(hist.workers_merged.load(Ordering::Relaxed), 0);
        assert_eq!(hist.workers_active.load(Ordering::Relaxed), 1);
        hist.detach_worker(&b2);
    }

    #[test]
    fn si_units() {
        assert_eq!(si_value(1.0, ""), "1.000");
        assert_eq!(si_value(1500.0, ""), "1.500K");
        assert_eq!(si_value(2_000_000.0, "bps"), "2.000Mbps");
        assert_eq!(si_latency(1), "1.000ns");
        assert_eq!(si_latency(1500), "1.500us");
        assert_eq!(si_latency(S), "1.000s");
    }
}
