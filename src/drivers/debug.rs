//! The `debug` driver: logs every call and reports success.
//!
//! Useful for validating the engine itself (workload sequencing, key
//! generation, and accounting) without a real store in the way.

use std::path::Path;
use std::sync::Arc;

use log::debug;

use crate::config::{BenchKind, Config};
use crate::drivers::Registry;
use crate::{Driver, DriverHandle, OpResult, Record};

pub struct DebugDriver;

impl Driver for DebugDriver {
    fn name(&self) -> &'static str {
        "debug"
    }

    fn open(&self, _config: &Config, datadir: &Path) -> OpResult {
        debug!("{}.open({})", self.name(), datadir.display());
        Ok(())
    }

    fn close(&self) -> OpResult {
        debug!("{}.close()", self.name());
        Ok(())
    }

    fn handle(&self) -> Option<Box<dyn DriverHandle>> {
        debug!("{}.handle()", self.name());
        Some(Box::new(DebugHandle))
    }
}

struct DebugHandle;

impl DriverHandle for DebugHandle {
    fn begin(&mut self, kind: BenchKind) -> OpResult {
        debug!("debug.begin({kind})");
        Ok(())
    }

    fn next(&mut self, kind: BenchKind, record: &mut Record) -> OpResult {
        match kind {
            BenchKind::Set => debug!(
                "debug.next({}, {} -> {})",
                kind,
                String::from_utf8_lossy(&record.key),
                String::from_utf8_lossy(&record.value)
            ),
            BenchKind::Get | BenchKind::Delete => debug!(
                "debug.next({}, {})",
                kind,
                String::from_utf8_lossy(&record.key)
            ),
            _ => debug!("debug.next({kind})"),
        }
        Ok(())
    }

    fn done(&mut self, kind: BenchKind) -> OpResult {
        debug!("debug.done({kind})");
        Ok(())
    }
}

fn new_debug() -> Arc<dyn Driver> {
    Arc::new(DebugDriver)
}

inventory::submit! {
    Registry::new("debug", new_debug)
}
