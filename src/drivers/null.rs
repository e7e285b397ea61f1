//! The `null` driver: every operation succeeds without touching anything.
//!
//! Reads behave as an empty store (scans end immediately), writes vanish.
//! Running against it measures the engine's own overhead.

use std::path::Path;
use std::sync::Arc;

use crate::config::{BenchKind, Config};
use crate::drivers::Registry;
use crate::{Driver, DriverHandle, OpError, OpResult, Record};

pub struct NullDriver;

impl Driver for NullDriver {
    fn name(&self) -> &'static str {
        "null"
    }

    fn open(&self, _config: &Config, _datadir: &Path) -> OpResult {
        Ok(())
    }

    fn close(&self) -> OpResult {
        Ok(())
    }

    fn handle(&self) -> Option<Box<dyn DriverHandle>> {
        Some(Box::new(NullHandle))
    }
}

struct NullHandle;

impl DriverHandle for NullHandle {
    fn begin(&mut self, _kind: BenchKind) -> OpResult {
        Ok(())
    }

    fn next(&mut self, kind: BenchKind, _record: &mut Record) -> OpResult {
        if kind == BenchKind::Iterate {
            return Err(OpError::NotFound);
        }
        Ok(())
    }

    fn done(&mut self, _kind: BenchKind) -> OpResult {
        Ok(())
    }
}

fn new_null() -> Arc<dyn Driver> {
    Arc::new(NullDriver)
}

inventory::submit! {
    Registry::new("null", new_null)
}
