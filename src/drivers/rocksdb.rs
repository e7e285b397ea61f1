//! The `rocksdb` driver (behind the `rocksdb` cargo feature).
//!
//! Sync mode maps to `WriteOptions::set_sync`, WAL mode to
//! `set_disable_wal`. Batch and Crud groups accumulate into a `WriteBatch`
//! opened in `begin` and committed in `done`; scans use a cursor key and
//! re-seek, so the handle never borrows the database.

use std::path::Path;
use std::sync::Arc;

use log::error;
use parking_lot::Mutex;
use rocksdb::{Direction, IteratorMode, Options, WriteBatch, WriteOptions, DB};

use crate::config::{BenchKind, Config, SyncMode, WalMode};
use crate::drivers::Registry;
use crate::{Driver, DriverHandle, OpError, OpResult, Record};

pub struct RocksDbDriver {
    db: Mutex<Option<Arc<DB>>>,
    write_config: Mutex<(bool, bool)>,
}

impl Driver for RocksDbDriver {
    fn name(&self) -> &'static str {
        "rocksdb"
    }

    fn open(&self, config: &Config, datadir: &Path) -> OpResult {
        let mut opts = Options::default();
        opts.create_if_missing(true);

        let sync = match config.sync_mode {
            SyncMode::Sync => true,
            SyncMode::Lazy | SyncMode::NoSync => false,
        };
        let disable_wal = match config.wal_mode {
            WalMode::Default | WalMode::Enabled => false,
            WalMode::Disabled => true,
        };

        let db = DB::open(&opts, datadir).map_err(|err| {
            error!("rocksdb.open({}): {err}", datadir.display());
            OpError::System
        })?;

        *self.write_config.lock() = (sync, disable_wal);
        *self.db.lock() = Some(Arc::new(db));
        Ok(())
    }

    fn close(&self) -> OpResult {
        *self.db.lock() = None;
        Ok(())
    }

    fn handle(&self) -> Option<Box<dyn DriverHandle>> {
        let db = self.db.lock().clone()?;
        let (sync, disable_wal) = *self.write_config.lock();
        let mut write_opts = WriteOptions::default();
        write_opts.set_sync(sync);
        write_opts.disable_wal(disable_wal);
        Some(Box::new(RocksDbHandle {
            db,
            write_opts,
            batch: None,
            cursor: None,
        }))
    }
}

struct RocksDbHandle {
    db: Arc<DB>,
    write_opts: WriteOptions,
    batch: Option<WriteBatch>,
    cursor: Option<Vec<u8>>,
}

impl DriverHandle for RocksDbHandle {
    fn begin(&mut self, kind: BenchKind) -> OpResult {
        match kind {
            BenchKind::Iterate => self.cursor = None,
            BenchKind::Batch | BenchKind::Crud => self.batch = Some(WriteBatch::default()),
            _ => {}
        }
        Ok(())
    }

    fn next(&mut self, kind: BenchKind, record: &mut Record) -> OpResult {
        match kind {
            BenchKind::Set => {
                if let Some(batch) = self.batch.as_mut() {
                    batch.put(&record.key, &record.value);
                    Ok(())
                } else {
                    self.db
                        .put_opt(&record.key, &record.value, &self.write_opts)
                        .map_err(|err| {
                            error!("rocksdb.put: {err}");
                            OpError::System
                        })
                }
            }
            BenchKind::Delete => {
                if let Some(batch) = self.batch.as_mut() {
                    batch.delete(&record.key);
                    Ok(())
                } else {
                    self.db
                        .delete_opt(&record.key, &self.write_opts)
                        .map_err(|err| {
                            error!("rocksdb.delete: {err}");
                            OpError::System
                        })
                }
            }
            BenchKind::Get => match self.db.get_pinned(&record.key) {
                Ok(Some(_)) => Ok(()),
                // Inside a batch the put may still be buffered.
                Ok(None) if self.batch.is_some() => Ok(()),
                Ok(None) => Err(OpError::NotFound),
                Err(err) => {
                    error!("rocksdb.get: {err}");
                    Err(OpError::System)
                }
            },
            BenchKind::Iterate => {
                let mode = match &self.cursor {
                    Some(cursor) => IteratorMode::From(cursor, Direction::Forward),
                    None => IteratorMode::Start,
                };
                let mut iter = self.db.iterator(mode);
                let mut item = iter.next();
                // `From` starts at the cursor itself; step past it.
                if let (Some(Ok((key, _))), Some(cursor)) = (&item, &self.cursor) {
                    if key[..] == cursor[..] {
                        item = iter.next();
                    }
                }
                match item {
                    None => Err(OpError::NotFound),
                    Some(Err(err)) => {
                        error!("rocksdb.iterate: {err}");
                        Err(OpError::System)
                    }
                    Some(Ok((key, value))) => {
                        record.clear();
                        record.key.extend_from_slice(&key);
                        record.value.extend_from_slice(&value);
                        self.cursor = Some(key.into_vec());
                        Ok(())
                    }
                }
            }
            _ => Err(OpError::Unexpected),
        }
    }

    fn done(&mut self, kind: BenchKind) -> OpResult {
        match kind {
            BenchKind::Iterate => {
                self.cursor = None;
                Ok(())
            }
            BenchKind::Batch | BenchKind::Crud => match self.batch.take() {
                Some(batch) => self.db.write_opt(batch, &self.write_opts).map_err(|err| {
                    error!("rocksdb.commit: {err}");
                    OpError::System
                }),
                None => Err(OpError::Unexpected),
            },
            _ => Ok(()),
        }
    }
}

fn new_rocksdb() -> Arc<dyn Driver> {
    Arc::new(RocksDbDriver {
        db: Mutex::new(None),
        write_config: Mutex::new((false, false)),
    })
}

inventory::submit! {
    Registry::new("rocksdb", new_rocksdb)
}
