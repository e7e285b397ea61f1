//! Benchmark configuration: workload kinds, store modes, and the immutable
//! run parameters assembled by the command line.

use std::collections::BTreeSet;
use std::fmt;
use std::path::PathBuf;

/// A workload kind under measurement.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum BenchKind {
    Set = 0,
    Get,
    Delete,
    Iterate,
    Batch,
    Crud,
}

impl BenchKind {
    pub const COUNT: usize = 6;

    /// All kinds in enum order; workers walk their mask in this order.
    pub const ALL: [BenchKind; Self::COUNT] = [
        BenchKind::Set,
        BenchKind::Get,
        BenchKind::Delete,
        BenchKind::Iterate,
        BenchKind::Batch,
        BenchKind::Crud,
    ];

    /// Bit of this kind in a workload mask.
    pub const fn mask(self) -> u32 {
        1 << self as u32
    }

    pub fn as_str(self) -> &'static str {
        match self {
            BenchKind::Set => "set",
            BenchKind::Get => "get",
            BenchKind::Delete => "del",
            BenchKind::Iterate => "iter",
            BenchKind::Batch => "batch",
            BenchKind::Crud => "crud",
        }
    }

    pub fn parse(name: &str) -> Option<BenchKind> {
        match name {
            "set" => Some(BenchKind::Set),
            "get" => Some(BenchKind::Get),
            "del" | "delete" => Some(BenchKind::Delete),
            "iter" | "iterate" => Some(BenchKind::Iterate),
            "batch" => Some(BenchKind::Batch),
            "crud" | "transact" => Some(BenchKind::Crud),
            _ => None,
        }
    }
}

impl fmt::Display for BenchKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kinds that mutate the store; workers running any of these get their own
/// keyspace.
pub const WRITING_KINDS: u32 = BenchKind::Set.mask()
    | BenchKind::Delete.mask()
    | BenchKind::Batch.mask()
    | BenchKind::Crud.mask();

/// Kinds consuming records from two generators at once; workers running any
/// of these reserve a second, adjacent keyspace.
pub const TWO_KEYSPACE_KINDS: u32 = BenchKind::Batch.mask() | BenchKind::Crud.mask();

/// Comma-separated kind names of a workload mask, for banners and logs.
pub fn mask_names(mask: u32) -> String {
    let mut line = String::new();
    for kind in BenchKind::ALL {
        if mask & kind.mask() != 0 {
            if !line.is_empty() {
                line.push_str(", ");
            }
            line.push_str(kind.as_str());
        }
    }
    line
}

/// Durability mode forwarded verbatim to the driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncMode {
    Sync,
    Lazy,
    NoSync,
}

impl SyncMode {
    pub fn as_str(self) -> &'static str {
        match self {
            SyncMode::Sync => "sync",
            SyncMode::Lazy => "lazy",
            SyncMode::NoSync => "nosync",
        }
    }

    pub fn parse(name: &str) -> Option<SyncMode> {
        match name {
            "sync" => Some(SyncMode::Sync),
            "lazy" => Some(SyncMode::Lazy),
            "nosync" => Some(SyncMode::NoSync),
            _ => None,
        }
    }
}

impl fmt::Display for SyncMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Write-ahead-log mode forwarded verbatim to the driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WalMode {
    Default,
    Enabled,
    Disabled,
}

impl WalMode {
    pub fn as_str(self) -> &'static str {
        match self {
            WalMode::Default => "indef",
            WalMode::Enabled => "walon",
            WalMode::Disabled => "waloff",
        }
    }

    pub fn parse(name: &str) -> Option<WalMode> {
        match name {
            "indef" => Some(WalMode::Default),
            "walon" => Some(WalMode::Enabled),
            "waloff" => Some(WalMode::Disabled),
            _ => None,
        }
    }
}

impl fmt::Display for WalMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The full benchmark configuration, immutable once parsed.
#[derive(Debug, Clone)]
pub struct Config {
    /// Name of the driver under test.
    pub driver: String,
    /// Root directory for the driver's data files.
    pub dirname: PathBuf,
    /// Workload kinds to run.
    pub benchmarks: BTreeSet<BenchKind>,

    /// Operations per workload kind per worker.
    pub count: u64,
    pub key_size: usize,
    pub value_size: usize,

    pub wal_mode: WalMode,
    pub sync_mode: SyncMode,

    /// Reader/writer thread counts; zero for both means the coordinator
    /// thread runs the whole workload alone.
    pub read_threads: usize,
    pub write_threads: usize,

    /// Seed for the key scrambler; 0 takes the wall clock.
    pub seed: u64,
    /// How many times each worker repeats its workload set.
    pub repeat: usize,
    /// Records per pre-generated pool in the `batch` workload.
    pub batch_length: usize,

    /// Emit binary keys and values instead of printable ones.
    pub binary: bool,
    /// Give each pool worker a single workload kind, round-robin.
    pub separate: bool,
    /// Treat `NotFound` from point lookups and deletes as success.
    pub ignore_notfound: bool,
    /// Keep finished workers iterating until the whole cohort is done.
    pub continuous: bool,
}

impl Default for Config {
    fn default() -> Config {
        let nproc = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        Config {
            driver: String::new(),
            dirname: PathBuf::from("./_kvmark_tmp"),
            benchmarks: BTreeSet::from([BenchKind::Get, BenchKind::Set]),
            count: 1_000_000,
            key_size: 16,
            value_size: 32,
            wal_mode: WalMode::Default,
            sync_mode: SyncMode::Lazy,
            read_threads: nproc,
            write_threads: nproc,
            seed: 42,
            repeat: 1,
            batch_length: 500,
            binary: false,
            separate: false,
            ignore_notfound: false,
            continuous: false,
        }
    }
}

impl Config {
    /// Prints the effective configuration before the run starts.
    pub fn print(&self) {
        let benchmarks: Vec<&str> = self.benchmarks.iter().map(|b| b.as_str()).collect();
        println!("Configuration:");
        println!("\tdatabase   = {}", self.driver);
        println!("\tdirname    = {}", self.dirname.display());
        println!("\tbenchmarks = {}", benchmarks.join(", "));
        println!();
        println!("\toperations = {}", self.count);
        println!();
        println!("\tWAL mode   = {}", self.wal_mode);
        println!("\tsync mode  = {}", self.sync_mode);
        println!();
        println!("\tkey size   = {}", self.key_size);
        println!("\tvalue size = {}", self.value_size);
        println!();
        println!("\tr-threads    = {}", self.read_threads);
        println!("\tw-threads    = {}", self.write_threads);
        println!();
        println!("\tbinary                = {}", yes_no(self.binary));
        println!("\tseparate              = {}", yes_no(self.separate));
        println!("\tignore not found      = {}", yes_no(self.ignore_notfound));
        println!("\tcontinuous completing = {}", yes_no(self.continuous));
        println!();
    }
}

fn yes_no(flag: bool) -> &'static str {
    if flag {
        "yes"
    } else {
        "no"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_names_round_trip() {
        for kind in BenchKind::ALL {
            assert_eq!(BenchKind::parse(kind.as_str()), Some(kind));
        }
        assert_eq!(BenchKind::parse("delete"), Some(BenchKind::Delete));
        assert_eq!(BenchKind::parse("iterate"), Some(BenchKind::Iterate));
        assert_eq!(BenchKind::parse("transact"), Some(BenchKind::Crud));
        assert_eq!(BenchKind::parse("bogus"), None);
    }

    #[test]
    fn masks() {
        assert_eq!(WRITING_KINDS & BenchKind::Get.mask(), 0);
        assert_eq!(WRITING_KINDS & BenchKind::Iterate.mask(), 0);
        assert_eq!(TWO_KEYSPACE_KINDS & WRITING_KINDS, TWO_KEYSPACE_KINDS);
        assert_eq!(mask_names(BenchKind::Set.mask() | BenchKind::Crud.mask()), "set, crud");
    }

    #[test]
    fn mode_names_round_trip() {
        for mode in [SyncMode::Sync, SyncMode::Lazy, SyncMode::NoSync] {
            assert_eq!(SyncMode::parse(mode.as_str()), Some(mode));
        }
        for mode in [WalMode::Default, WalMode::Enabled, WalMode::Disabled] {
            assert_eq!(WalMode::parse(mode.as_str()), Some(mode));
        }
        assert_eq!(SyncMode::parse("fast"), None);
        assert_eq!(WalMode::parse("on"), None);
    }
}
