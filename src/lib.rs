//! A comparative micro-benchmark harness for embedded key/value stores.
//!
//! `kvmark` drives a storage driver with one or more workload kinds (point
//! insert, point lookup, point delete, full-scan iteration, batched
//! mutations, and a small transactional CRUD sequence) under a configured
//! number of reader and writer threads, collecting per-operation latency,
//! throughput, and resource-usage statistics.
//!
//! The engine side consists of a deterministic collision-free key/value
//! generator ([`keyer::Keyer`]), a per-worker execution loop
//! ([`worker::Worker`]), a cohort coordinator ([`runner`]), and a concurrent
//! latency-histogram registry ([`histogram::Histogram`]) that merges
//! per-thread samples into a global summary while workers are still running.
//!
//! Storage backends are adapters behind the [`Driver`]/[`DriverHandle`]
//! traits. Built-in drivers live in [`drivers`]; external crates can add
//! their own by implementing the traits and registering a
//! [`drivers::Registry`] entry with [`inventory::submit!`], then reusing the
//! exported [`cmdline()`] in their `main`.

use std::path::Path;

use thiserror::Error;

use crate::config::{BenchKind, Config};

/// Result codes crossing the driver boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum OpError {
    /// The requested key does not exist (or an iterator is exhausted).
    #[error("key not found")]
    NotFound,
    /// The underlying store reported a failure.
    #[error("system error")]
    System,
    /// The engine or driver reached a state it cannot account for.
    #[error("unexpected error")]
    Unexpected,
}

/// Outcome of a single driver call.
pub type OpResult = Result<(), OpError>;

/// A key and value pair crossing the driver boundary.
///
/// The engine owns the backing buffers and reuses them between operations;
/// a driver may only read or copy from them during a call. The exception is
/// `next(Iterate)`, where the driver overwrites the record with the entry it
/// produced.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Record {
    pub key: Vec<u8>,
    pub value: Vec<u8>,
}

impl Record {
    /// Total payload size of the record.
    pub fn len(&self) -> usize {
        self.key.len() + self.value.len()
    }

    pub fn is_empty(&self) -> bool {
        self.key.is_empty() && self.value.is_empty()
    }

    pub fn clear(&mut self) {
        self.key.clear();
        self.value.clear();
    }
}

/// A storage backend under measurement.
///
/// The benchmark engine is agnostic to the backend beyond this trait and
/// [`DriverHandle`]. `open` is called once before any worker exists and
/// `close` once at shutdown; every worker thread obtains its own handle.
pub trait Driver: Send + Sync + 'static {
    /// Lowercase identifier used on the command line and in logs.
    fn name(&self) -> &'static str;

    /// Opens the store, called only once for all threads.
    fn open(&self, config: &Config, datadir: &Path) -> OpResult;

    /// Closes the store, called only once at the very end.
    fn close(&self) -> OpResult;

    /// Creates the per-worker handle. Access to a handle is never
    /// synchronized by the engine; if the store needs synchronization it is
    /// the driver's responsibility. `None` aborts the worker.
    fn handle(&self) -> Option<Box<dyn DriverHandle>>;
}

/// Per-worker driver state, executing blocks of operations in the obvious
/// order: `begin` → `next` → .. → `next` → `done`.
///
/// `begin` and `done` exist so a driver can prepare transactions or grouped
/// scenarios when the store supports them: `Iterate` may open a cursor in
/// `begin` and close it in `done`, `Batch`/`Crud` may open a write
/// transaction in `begin` and commit it in `done`. The handle is dropped on
/// worker exit.
pub trait DriverHandle: Send {
    fn begin(&mut self, kind: BenchKind) -> OpResult;
    fn next(&mut self, kind: BenchKind, record: &mut Record) -> OpResult;
    fn done(&mut self, kind: BenchKind) -> OpResult;
}

pub mod clock;
mod cmdline;
pub mod config;
pub mod drivers;
pub mod histogram;
pub mod keyer;
pub mod runner;
pub mod thread;
pub mod usage;
pub mod worker;

pub use cmdline::cmdline;

pub extern crate inventory;
