//! Command-line surface and process entry point.

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use clap::ValueHint::DirPath;
use log::{debug, error};

use crate::config::{BenchKind, Config, SyncMode, WalMode};
use crate::drivers;
use crate::runner;

#[derive(Parser, Debug)]
#[command(version, about = "Comparative micro-benchmark for embedded key/value stores")]
struct Cli {
    /// Target database driver.
    #[arg(short = 'D', long = "database")]
    database: String,

    /// Load types: set, get, delete, iterate, batch, crud.
    #[arg(short = 'B', long = "benchmark", value_delimiter = ',')]
    benchmark: Vec<String>,

    /// Database sync mode: sync, lazy, nosync.
    #[arg(short = 'M', long = "sync-mode", default_value = "lazy")]
    sync_mode: String,

    /// Database WAL mode: indef, walon, waloff.
    #[arg(short = 'W', long = "wal-mode", default_value = "indef")]
    wal_mode: String,

    /// Dirname for temporary files and reports.
    #[arg(short = 'P', long = "dirname", default_value = "./_kvmark_tmp")]
    #[arg(value_hint = DirPath)]
    dirname: PathBuf,

    /// Number of operations per workload kind.
    #[arg(short = 'n', default_value_t = 1_000_000)]
    count: u64,

    /// Key size in bytes.
    #[arg(short = 'k', default_value_t = 16)]
    key_size: usize,

    /// Value size in bytes.
    #[arg(short = 'v', default_value_t = 32)]
    value_size: usize,

    /// Number of read threads; zero to use a single thread.
    #[arg(short = 'r')]
    read_threads: Option<usize>,

    /// Number of write threads; zero to use a single thread.
    #[arg(short = 'w')]
    write_threads: Option<usize>,

    /// How many times each worker repeats its workload set.
    #[arg(long, default_value_t = 1)]
    repeat: usize,

    /// Records per pre-generated pool in the batch workload.
    #[arg(long = "batch-length", default_value_t = 500)]
    batch_length: usize,

    /// Key-generator seed; zero takes the wall clock.
    #[arg(long, default_value_t = 42)]
    seed: u64,

    /// Generate binary (non-ASCII) keys and values.
    #[arg(long)]
    binary: bool,

    /// Give each pool worker a single workload kind, round-robin.
    #[arg(long)]
    separate: bool,

    /// Continuous completing mode.
    #[arg(long = "continuous")]
    continuous: bool,

    /// Ignore key-not-found errors.
    #[arg(long = "ignore-not-found")]
    ignore_not_found: bool,
}

fn config_from_cli(cli: Cli) -> Result<Config, String> {
    let defaults = Config::default();

    let mut benchmarks = BTreeSet::new();
    if cli.benchmark.is_empty() {
        benchmarks = defaults.benchmarks.clone();
    } else {
        for name in &cli.benchmark {
            let kind = BenchKind::parse(name)
                .ok_or_else(|| format!("unknown benchmark name: {name}"))?;
            benchmarks.insert(kind);
        }
    }

    let sync_mode = SyncMode::parse(&cli.sync_mode)
        .ok_or_else(|| format!("unknown sync mode: {}", cli.sync_mode))?;
    let wal_mode = WalMode::parse(&cli.wal_mode)
        .ok_or_else(|| format!("unknown WAL mode: {}", cli.wal_mode))?;

    Ok(Config {
        driver: cli.database,
        dirname: cli.dirname,
        benchmarks,
        count: cli.count,
        key_size: cli.key_size,
        value_size: cli.value_size,
        wal_mode,
        sync_mode,
        read_threads: cli.read_threads.unwrap_or(defaults.read_threads),
        write_threads: cli.write_threads.unwrap_or(defaults.write_threads),
        seed: cli.seed,
        repeat: cli.repeat,
        batch_length: cli.batch_length,
        binary: cli.binary,
        separate: cli.separate,
        ignore_notfound: cli.ignore_not_found,
        continuous: cli.continuous,
    })
}

/// Parses the command line and runs the benchmark; reusable as the `main`
/// of crates that register their own drivers.
pub fn cmdline() -> ExitCode {
    env_logger::init();
    let cli = Cli::parse();
    debug!("starting with args: {cli:?}");

    let config = match config_from_cli(cli) {
        Ok(config) => config,
        Err(message) => {
            error!("error: {message}");
            return ExitCode::from(2);
        }
    };

    if drivers::create(&config.driver).is_none() {
        error!(
            "error: unknown database driver '{}', supported: {}",
            config.driver,
            drivers::supported()
        );
        return ExitCode::FAILURE;
    }

    config.print();

    match runner::run(config) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("error: {err}");
            ExitCode::FAILURE
        }
    }
}
