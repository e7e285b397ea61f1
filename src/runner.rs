//! Cohort coordination: mask split, keyspace assignment, synchronized
//! start/finish, and the final reports.
//!
//! The runner spawns one thread per reader and writer worker, plus runs on
//! the coordinator thread itself. Pool workers consume the kinds they are
//! assigned from the read/write masks (refilling a drained mask); whatever
//! remains un-assigned is run by the coordinator at keyspace 0; with both
//! thread counts at zero that is the entire workload, single-threaded.
//! Writer keyspaces advance so they are pairwise disjoint, reserving two
//! consecutive spaces wherever a mask contains a two-keyspace kind.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};

use log::debug;
use thiserror::Error;

use crate::config::{BenchKind, Config, TWO_KEYSPACE_KINDS, WRITING_KINDS};
use crate::drivers;
use crate::histogram::Histogram;
use crate::keyer::{KeyerOptions, SeedBox};
use crate::thread;
use crate::usage::{self, Usage};
use crate::worker::Worker;
use crate::{Driver, OpError};

/// Cohort failure modes surfaced to the process exit code.
#[derive(Debug, Error)]
pub enum RunError {
    #[error("unknown database driver `{0}`, supported: {1}")]
    UnknownDriver(String, String),
    #[error("there are no tasks for either reading or writing")]
    NoTasks,
    #[error("driver error: {0}")]
    Driver(#[from] OpError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("benchmark failed")]
    Failed,
}

/// Mutable state the whole cohort observes: the two rendezvous barriers and
/// the atomics workers poll on their loop guards.
pub struct SharedState {
    pub failed: AtomicBool,
    pub workers_count: AtomicUsize,
    pub doers_done: AtomicUsize,
    pub start_barrier: Barrier,
    pub finish_barrier: Barrier,
}

impl SharedState {
    pub fn new(cohort: usize) -> SharedState {
        SharedState {
            failed: AtomicBool::new(false),
            workers_count: AtomicUsize::new(0),
            doers_done: AtomicUsize::new(0),
            start_barrier: Barrier::new(cohort),
            finish_barrier: Barrier::new(cohort),
        }
    }
}

/// Resolves the configured driver by name and runs the benchmark against it.
pub fn run(config: Config) -> Result<(), RunError> {
    let driver = drivers::create(&config.driver).ok_or_else(|| {
        RunError::UnknownDriver(config.driver.clone(), drivers::supported())
    })?;
    run_with_driver(config, driver)
}

/// Runs the benchmark against an already-constructed driver.
pub fn run_with_driver(mut config: Config, driver: Arc<dyn Driver>) -> Result<(), RunError> {
    let datadir = config.dirname.join(driver.name());
    std::fs::create_dir_all(&datadir)?;

    let before_open = Usage::load(&datadir)?;
    driver.open(&config, &datadir)?;

    let mut read_mask = 0u32;
    let mut write_mask = 0u32;
    for &kind in &config.benchmarks {
        if kind == BenchKind::Get || kind == BenchKind::Iterate {
            read_mask |= kind.mask();
        } else {
            write_mask |= kind.mask();
        }
    }

    let outcome = (|| {
        if read_mask | write_mask == 0 {
            return Err(RunError::NoTasks);
        }
        if read_mask == 0 {
            config.read_threads = 0;
        }
        if write_mask == 0 {
            config.write_threads = 0;
        }

        let sectors = 1.max(config.read_threads).max(config.write_threads) as u64;
        let mut spaces = 1.max(config.write_threads) as u64;
        if write_mask & TWO_KEYSPACE_KINDS != 0 {
            spaces *= 2;
        }

        let keyer_options = KeyerOptions {
            binary: config.binary,
            count: config.count,
            key_size: config.key_size,
            value_size: config.value_size,
            spaces,
            sectors,
        };

        let runner = Runner {
            seed_box: Arc::new(SeedBox::new(config.seed)),
            histogram: Arc::new(Histogram::new(&config.benchmarks)),
            shared: Arc::new(SharedState::new(
                config.read_threads + config.write_threads + 1,
            )),
            config: Arc::new(config),
            driver: driver.clone(),
            keyer_options,
            read_mask,
            write_mask,
            datadir: datadir.clone(),
            before_open_ram: before_open.ram_kib,
        };
        runner.run()
    })();

    driver.close()?;
    outcome
}

struct Runner {
    config: Arc<Config>,
    driver: Arc<dyn Driver>,
    histogram: Arc<Histogram>,
    shared: Arc<SharedState>,
    seed_box: Arc<SeedBox>,
    keyer_options: KeyerOptions,
    read_mask: u32,
    write_mask: u32,
    datadir: std::path::PathBuf,
    before_open_ram: i64,
}

impl Runner {
    fn run(&self) -> Result<(), RunError> {
        let mut handles = Vec::new();
        let mut nth = 0;
        let mut key_space = 0;
        let mut read_rotator = self.read_mask;
        let mut write_rotator = self.write_mask;

        self.spawn_pool(
            self.config.read_threads,
            &mut nth,
            &mut read_rotator,
            self.read_mask,
            &mut key_space,
            &mut handles,
        );
        self.spawn_pool(
            self.config.write_threads,
            &mut nth,
            &mut write_rotator,
            self.write_mask,
            &mut key_space,
            &mut handles,
        );

        let start = Usage::load(&self.datadir)?;

        std::thread::yield_now();
        self.shared.start_barrier.wait();

        // Kinds no pool worker took are the coordinator's job.
        let leftover = read_rotator | write_rotator;
        if leftover != 0 {
            let mut worker = Worker::new(
                0,
                leftover,
                0,
                0,
                self.keyer_options,
                self.config.clone(),
                self.driver.clone(),
                self.histogram.clone(),
                self.shared.clone(),
                self.seed_box.clone(),
            );
            if let Err(err) = worker.fulfil() {
                debug!("coordinator worker failed: {err}");
                self.shared.failed.store(true, Ordering::Relaxed);
            }
        }

        self.shared.finish_barrier.wait();
        thread::join_all(handles);

        let finish = Usage::load(&self.datadir)?;

        if self.shared.failed.load(Ordering::Relaxed) {
            return Err(RunError::Failed);
        }

        self.histogram.summarize();
        println!("complete.");
        self.histogram.print();

        let mut start = start;
        start.ram_kib = self.before_open_ram;
        start.disk = 0;
        usage::print_delta(&start, &finish);

        Ok(())
    }

    /// Spawns `count` pool workers, rotating workload kinds out of `rotator`
    /// and advancing the keyspace for every writing mask.
    fn spawn_pool(
        &self,
        count: usize,
        nth: &mut usize,
        rotator: &mut u32,
        set: u32,
        key_space: &mut u64,
        handles: &mut Vec<std::thread::JoinHandle<()>>,
    ) {
        for _ in 0..count {
            debug_assert!(set != 0);
            if *rotator == 0 {
                *rotator = set;
            }

            let mut mask = *rotator;
            if self.config.separate {
                let mut order = 0;
                mask = 0;
                while mask == 0 {
                    mask = *rotator & BenchKind::ALL[order].mask();
                    order = (order + 1) % BenchKind::COUNT;
                }
            }

            if mask & WRITING_KINDS != 0 {
                *key_space += 1;
                if mask & TWO_KEYSPACE_KINDS != 0 {
                    *key_space += 1;
                }
            }

            *nth += 1;
            let worker = Worker::new(
                *nth,
                mask,
                *key_space,
                *nth as u64,
                self.keyer_options,
                self.config.clone(),
                self.driver.clone(),
                self.histogram.clone(),
                self.shared.clone(),
                self.seed_box.clone(),
            );

            handles.push(thread::spawn_worker(worker, self.shared.clone()));

            *rotator &= !mask;
        }
    }
}
