//! The per-thread benchmark loop.
//!
//! A worker drives one workload mask against one driver handle from a fixed
//! starting keyspace, feeding every measured operation into its histogram
//! bucket. Evaluators follow the driver protocol strictly: one
//! `begin`/`done` pair around each measured unit, with `next` calls between.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use log::{error, info};

use crate::clock;
use crate::config::{mask_names, BenchKind, Config, TWO_KEYSPACE_KINDS};
use crate::histogram::{Bucket, Histogram};
use crate::keyer::{Keyer, KeyerOptions, SeedBox};
use crate::runner::SharedState;
use crate::{Driver, DriverHandle, OpError, OpResult, Record};

pub struct Worker {
    id: usize,
    mask: u32,
    key_space: u64,
    key_sequence: u64,

    config: Arc<Config>,
    driver: Arc<dyn Driver>,
    histogram: Arc<Histogram>,
    shared: Arc<SharedState>,

    bucket: Bucket,

    gen_a: Keyer,
    gen_b: Option<Keyer>,

    rec_a: Record,
    rec_b: Record,
}

impl Worker {
    /// Registers a worker with the cohort and builds its generators: one at
    /// `key_space`, and a second at `key_space + 1` when the mask contains a
    /// two-keyspace kind. Panics on an empty mask.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: usize,
        mask: u32,
        key_space: u64,
        key_sequence: u64,
        keyer_options: KeyerOptions,
        config: Arc<Config>,
        driver: Arc<dyn Driver>,
        histogram: Arc<Histogram>,
        shared: Arc<SharedState>,
        seed_box: Arc<SeedBox>,
    ) -> Worker {
        assert!(mask != 0, "there are no tasks for the worker");

        shared.workers_count.fetch_add(1, Ordering::SeqCst);
        let bucket = histogram.attach_worker();

        let gen_a = Keyer::new(key_space, key_sequence, keyer_options, seed_box.clone());
        let gen_b = if mask & TWO_KEYSPACE_KINDS != 0 {
            info!(
                "worker.{}: {}, key-space {} and {}, key-sequence {}",
                id,
                mask_names(mask),
                key_space,
                key_space + 1,
                key_sequence
            );
            Some(Keyer::new(
                key_space + 1,
                key_sequence,
                keyer_options,
                seed_box,
            ))
        } else {
            info!(
                "worker.{}: {}, key-space {}, key-sequence {}",
                id,
                mask_names(mask),
                key_space,
                key_sequence
            );
            None
        };

        Worker {
            id,
            mask,
            key_space,
            key_sequence,
            config,
            driver,
            histogram,
            shared,
            bucket,
            gen_a,
            gen_b,
            rec_a: Record::default(),
            rec_b: Record::default(),
        }
    }

    pub fn id(&self) -> usize {
        self.id
    }

    /// Runs the whole workload mask for the configured number of repeats.
    ///
    /// The cohort's failed flag is checked once per repeat; with continuous
    /// completing the worker keeps iterating past its own budget until every
    /// peer has finished theirs.
    pub fn fulfil(&mut self) -> OpResult {
        let mut handle = match self.driver.handle() {
            Some(handle) => handle,
            None => return Err(OpError::Unexpected),
        };

        let mut count = 0;
        while count < self.config.repeat
            || (self.config.continuous
                && self.shared.doers_done.load(Ordering::SeqCst)
                    < self.shared.workers_count.load(Ordering::SeqCst))
        {
            let mut rc: OpResult = Ok(());

            for kind in BenchKind::ALL {
                if rc.is_err() {
                    break;
                }
                if self.mask & kind.mask() == 0 {
                    continue;
                }

                self.bucket.reset(kind);

                let mut i = 0u64;
                while rc.is_ok() && i < self.config.count {
                    match kind {
                        BenchKind::Set | BenchKind::Get | BenchKind::Delete => {
                            rc = self.eval_gst(handle.as_mut(), kind);
                            i += 1;
                        }
                        BenchKind::Crud => {
                            rc = self.eval_crud(handle.as_mut());
                            i += 1;
                        }
                        BenchKind::Batch => {
                            rc = self.eval_batch(handle.as_mut(), &mut i);
                        }
                        BenchKind::Iterate => {
                            rc = self.eval_iterate(handle.as_mut(), &mut i);
                        }
                    }
                }

                self.histogram.merge(&mut self.bucket);
            }

            count += 1;
            if count == self.config.repeat {
                self.shared.doers_done.fetch_add(1, Ordering::SeqCst);
            }

            rc?;
            if self.shared.failed.load(Ordering::Relaxed) {
                break;
            }
        }

        Ok(())
    }

    /// One measured point operation: Set, Get, or Delete.
    fn eval_gst(&mut self, handle: &mut dyn DriverHandle, kind: BenchKind) -> OpResult {
        self.gen_a.get(&mut self.rec_a, kind == BenchKind::Delete);

        let t0 = clock::now();
        let mut rc = handle.begin(kind);
        if rc.is_ok() {
            rc = handle.next(kind, &mut self.rec_a);
        }
        let rc2 = handle.done(kind);

        let volume = if kind == BenchKind::Delete {
            self.rec_a.key.len()
        } else {
            self.rec_a.len()
        };
        self.bucket.add(&self.histogram, t0, volume as u64);

        if rc == Err(OpError::NotFound) {
            log_key_not_found(kind.as_str(), &self.rec_a, self.id, self.key_space, self.key_sequence);
            if self.config.ignore_notfound {
                rc = Ok(());
            }
        }
        if rc.is_ok() {
            rc = rc2;
        }
        rc
    }

    /// The four-step CRUD body over `rec_a`/`rec_b`, shared by the Crud and
    /// Batch evaluators. `NotFound` from the delete and the lookup is logged
    /// and, unless ignored, propagated.
    fn eval_crud_steps(&mut self, handle: &mut dyn DriverHandle) -> OpResult {
        handle.next(BenchKind::Set, &mut self.rec_b)?;
        handle.next(BenchKind::Set, &mut self.rec_a)?;

        match handle.next(BenchKind::Delete, &mut self.rec_b) {
            Err(OpError::NotFound) => {
                log_key_not_found("crud.del", &self.rec_b, self.id, self.key_space, self.key_sequence);
                if !self.config.ignore_notfound {
                    return Err(OpError::NotFound);
                }
            }
            Err(other) => return Err(other),
            Ok(()) => {}
        }

        match handle.next(BenchKind::Get, &mut self.rec_a) {
            Err(OpError::NotFound) => {
                log_key_not_found("crud.get", &self.rec_a, self.id, self.key_space, self.key_sequence);
                if !self.config.ignore_notfound {
                    return Err(OpError::NotFound);
                }
            }
            Err(other) => return Err(other),
            Ok(()) => {}
        }

        Ok(())
    }

    /// One measured CRUD transaction under a single `begin`/`done` pair.
    fn eval_crud(&mut self, handle: &mut dyn DriverHandle) -> OpResult {
        let Some(gen_b) = self.gen_b.as_mut() else {
            return Err(OpError::Unexpected);
        };
        self.gen_a.get(&mut self.rec_a, false);
        gen_b.get(&mut self.rec_b, false);

        let t0 = clock::now();
        let mut rc = handle.begin(BenchKind::Crud);
        if rc.is_ok() {
            rc = self.eval_crud_steps(handle);
        }
        if rc.is_ok() {
            rc = handle.done(BenchKind::Crud);
        }

        let volume = self.rec_a.len()
            + self.rec_b.len()
            + self.rec_a.key.len()
            + self.rec_b.key.len()
            + self.rec_b.value.len();
        self.bucket.add(&self.histogram, t0, volume as u64);

        rc
    }

    /// One measured pool of CRUD transactions inside a single
    /// `begin(Batch)`/`done(Batch)` pair.
    fn eval_batch(&mut self, handle: &mut dyn DriverHandle, i: &mut u64) -> OpResult {
        let batch_length = self.config.batch_length;
        let Some(gen_b) = self.gen_b.as_mut() else {
            return Err(OpError::Unexpected);
        };
        let mut pool_a = self.gen_a.batch(batch_length);
        let mut pool_b = gen_b.batch(batch_length);

        let t0 = clock::now();
        let mut rc = handle.begin(BenchKind::Batch);
        for _ in 0..batch_length {
            if rc.is_err() {
                break;
            }
            if pool_a.load(&mut self.rec_a).is_err() || pool_b.load(&mut self.rec_b).is_err() {
                return Err(OpError::Unexpected);
            }
            rc = self.eval_crud_steps(handle);
            if rc.is_err() {
                break;
            }
            *i += 1;
            if *i == self.config.count {
                break;
            }
        }
        if rc.is_ok() {
            rc = handle.done(BenchKind::Batch);
        }

        let record_size = self.rec_a.len() + self.rec_b.len();
        self.bucket
            .add(&self.histogram, t0, (record_size * batch_length) as u64);

        rc
    }

    /// A full scan: one record per `next(Iterate)` call until the budget is
    /// reached or the driver signals exhaustion, which resolves to success.
    fn eval_iterate(&mut self, handle: &mut dyn DriverHandle, i: &mut u64) -> OpResult {
        let mut t0 = clock::now();
        let mut rc = handle.begin(BenchKind::Iterate);
        while rc.is_ok() {
            self.rec_a.clear();
            rc = handle.next(BenchKind::Iterate, &mut self.rec_a);
            self.bucket
                .add(&self.histogram, t0, self.rec_a.len() as u64);
            *i += 1;
            if *i == self.config.count {
                break;
            }
            t0 = clock::now();
        }
        if rc == Err(OpError::NotFound) {
            rc = Ok(());
        }
        if rc.is_ok() {
            rc = handle.done(BenchKind::Iterate);
        }
        rc
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        self.histogram.detach_worker(&self.bucket);
        self.shared.workers_count.fetch_sub(1, Ordering::SeqCst);
    }
}

fn log_key_not_found(op: &str, rec: &Record, id: usize, key_space: u64, key_sequence: u64) {
    error!(
        "key {} not found ({}, {}, {}+{})",
        String::from_utf8_lossy(&rec.key),
        op,
        id,
        key_space,
        key_sequence
    );
}
