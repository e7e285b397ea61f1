//! The `btreemap` driver: an in-memory ordered map behind a read-write
//! lock. The default functional target for smoke runs, since it supports every
//! workload kind, including cursor-style full scans.
//!
//! `begin`/`done` are plain cursor bookkeeping; mutations apply directly,
//! so Batch and Crud groups are not atomic here.

use std::collections::BTreeMap;
use std::ops::Bound;
use std::path::Path;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::config::{BenchKind, Config};
use crate::drivers::Registry;
use crate::{Driver, DriverHandle, OpError, OpResult, Record};

type Map = BTreeMap<Box<[u8]>, Box<[u8]>>;

pub struct BTreeMapDriver {
    data: Arc<RwLock<Map>>,
}

impl Driver for BTreeMapDriver {
    fn name(&self) -> &'static str {
        "btreemap"
    }

    fn open(&self, _config: &Config, _datadir: &Path) -> OpResult {
        Ok(())
    }

    fn close(&self) -> OpResult {
        Ok(())
    }

    fn handle(&self) -> Option<Box<dyn DriverHandle>> {
        Some(Box::new(BTreeMapHandle {
            data: self.data.clone(),
            cursor: None,
        }))
    }
}

struct BTreeMapHandle {
    data: Arc<RwLock<Map>>,
    /// Last key produced by the running scan.
    cursor: Option<Box<[u8]>>,
}

impl DriverHandle for BTreeMapHandle {
    fn begin(&mut self, kind: BenchKind) -> OpResult {
        if kind == BenchKind::Iterate {
            self.cursor = None;
        }
        Ok(())
    }

    fn next(&mut self, kind: BenchKind, record: &mut Record) -> OpResult {
        match kind {
            BenchKind::Set => {
                self.data
                    .write()
                    .insert(record.key[..].into(), record.value[..].into());
                Ok(())
            }
            BenchKind::Get => {
                if self.data.read().contains_key(&record.key[..]) {
                    Ok(())
                } else {
                    Err(OpError::NotFound)
                }
            }
            BenchKind::Delete => {
                if self.data.write().remove(&record.key[..]).is_some() {
                    Ok(())
                } else {
                    Err(OpError::NotFound)
                }
            }
            BenchKind::Iterate => {
                let data = self.data.read();
                let next = match &self.cursor {
                    Some(cursor) => data
                        .range::<[u8], _>((Bound::Excluded(&cursor[..]), Bound::Unbounded))
                        .next(),
                    None => data.iter().next(),
                };
                let Some((key, value)) = next else {
                    return Err(OpError::NotFound);
                };
                record.clear();
                record.key.extend_from_slice(key);
                record.value.extend_from_slice(value);
                drop(data);
                self.cursor = Some(record.key[..].into());
                Ok(())
            }
            _ => Err(OpError::Unexpected),
        }
    }

    fn done(&mut self, kind: BenchKind) -> OpResult {
        if kind == BenchKind::Iterate {
            self.cursor = None;
        }
        Ok(())
    }
}

fn new_btreemap() -> Arc<dyn Driver> {
    Arc::new(BTreeMapDriver {
        data: Arc::new(RwLock::new(BTreeMap::new())),
    })
}

inventory::submit! {
    Registry::new("btreemap", new_btreemap)
}
