//! Built-in storage drivers and the name registry.
//!
//! Drivers register themselves with [`inventory::submit!`]:
//!
//! ```ignore
//! inventory::submit! {
//!     Registry::new("mystore", new_mystore)
//! }
//! ```
//!
//! where `new_mystore` is a `fn() -> Arc<dyn Driver>`. External crates can
//! do the same against this crate's [`Registry`] and their driver becomes
//! selectable with `-D mystore`.

use std::sync::Arc;

use hashbrown::HashMap;
use log::debug;

use crate::Driver;

/// One registered driver: its command-line name and constructor.
pub struct Registry {
    pub name: &'static str,
    constructor: fn() -> Arc<dyn Driver>,
}

impl Registry {
    pub const fn new(name: &'static str, constructor: fn() -> Arc<dyn Driver>) -> Registry {
        Registry { name, constructor }
    }
}

inventory::collect!(Registry);

/// Instantiates the driver registered under `name`, if any.
pub fn create(name: &str) -> Option<Arc<dyn Driver>> {
    let mut registered: HashMap<&'static str, fn() -> Arc<dyn Driver>> = HashMap::new();
    for entry in inventory::iter::<Registry> {
        debug!("supported driver: {}", entry.name);
        assert!(
            registered.insert(entry.name, entry.constructor).is_none(),
            "driver `{}` registered twice",
            entry.name
        );
    }
    registered.get(name).map(|constructor| constructor())
}

/// Comma-separated driver names for help and error text.
pub fn supported() -> String {
    let mut names: Vec<&'static str> = inventory::iter::<Registry>
        .into_iter()
        .map(|entry| entry.name)
        .collect();
    names.sort_unstable();
    names.join(", ")
}

pub mod btreemap;
pub mod debug;
pub mod null;
#[cfg(feature = "rocksdb")]
pub mod rocksdb;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{BenchKind, Config};
    use crate::{DriverHandle, OpError, Record};
    use std::path::Path;

    #[test]
    fn registry_resolves_builtins() {
        for name in ["debug", "null", "btreemap"] {
            let driver = create(name).unwrap_or_else(|| panic!("{name} missing"));
            assert_eq!(driver.name(), name);
            assert!(supported().contains(name));
        }
        assert!(create("bogus").is_none());
    }

    fn record(key: &[u8], value: &[u8]) -> Record {
        Record {
            key: key.to_vec(),
            value: value.to_vec(),
        }
    }

    fn driver_smoke(handle: &mut dyn DriverHandle) {
        // insert + lookup
        let mut foo = record(b"foo", b"bar");
        handle.begin(BenchKind::Set).unwrap();
        handle.next(BenchKind::Set, &mut foo).unwrap();
        handle.done(BenchKind::Set).unwrap();

        let mut probe = record(b"foo", b"");
        handle.begin(BenchKind::Get).unwrap();
        handle.next(BenchKind::Get, &mut probe).unwrap();
        handle.done(BenchKind::Get).unwrap();

        // delete, then the key is gone
        handle.begin(BenchKind::Delete).unwrap();
        handle.next(BenchKind::Delete, &mut probe).unwrap();
        handle.done(BenchKind::Delete).unwrap();

        let mut gone = record(b"foo", b"");
        handle.begin(BenchKind::Get).unwrap();
        assert_eq!(
            handle.next(BenchKind::Get, &mut gone),
            Err(OpError::NotFound)
        );
        handle.done(BenchKind::Get).unwrap();
    }

    #[test]
    fn btreemap_point_ops() {
        let driver = create("btreemap").unwrap();
        driver.open(&Config::default(), Path::new("")).unwrap();
        let mut handle = driver.handle().unwrap();
        driver_smoke(handle.as_mut());
        driver.close().unwrap();
    }

    #[test]
    fn btreemap_iteration_is_ordered_and_exhausts() {
        let driver = create("btreemap").unwrap();
        let mut handle = driver.handle().unwrap();

        for i in (0..20u32).rev() {
            let mut rec = record(&i.to_be_bytes(), b"v");
            handle.next(BenchKind::Set, &mut rec).unwrap();
        }

        let mut rec = Record::default();
        handle.begin(BenchKind::Iterate).unwrap();
        for i in 0..20u32 {
            rec.clear();
            handle.next(BenchKind::Iterate, &mut rec).unwrap();
            assert_eq!(rec.key, i.to_be_bytes());
            assert_eq!(rec.value, b"v");
        }
        rec.clear();
        assert_eq!(
            handle.next(BenchKind::Iterate, &mut rec),
            Err(OpError::NotFound)
        );
        handle.done(BenchKind::Iterate).unwrap();

        // A second scan starts over.
        handle.begin(BenchKind::Iterate).unwrap();
        rec.clear();
        handle.next(BenchKind::Iterate, &mut rec).unwrap();
        assert_eq!(rec.key, 0u32.to_be_bytes());
        handle.done(BenchKind::Iterate).unwrap();
    }

    #[test]
    fn null_iteration_is_empty() {
        let driver = create("null").unwrap();
        let mut handle = driver.handle().unwrap();
        let mut rec = Record::default();
        handle.begin(BenchKind::Iterate).unwrap();
        assert_eq!(
            handle.next(BenchKind::Iterate, &mut rec),
            Err(OpError::NotFound)
        );
        handle.done(BenchKind::Iterate).unwrap();
    }

    #[cfg(feature = "rocksdb")]
    #[test]
    fn rocksdb_point_ops() {
        let dir = tempfile::tempdir().unwrap();
        let driver = create("rocksdb").unwrap();
        driver.open(&Config::default(), dir.path()).unwrap();
        let mut handle = driver.handle().unwrap();
        driver_smoke(handle.as_mut());
        drop(handle);
        driver.close().unwrap();
    }
}
