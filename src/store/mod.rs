//! Named memory stores: the persistence primitives the shelf is built on
//!
//! A store maps string names to persistent byte regions. Each primitive
//! (create, erase, put, swap, region transaction) is individually
//! crash-safe; sequencing them into a crash-consistent update is the
//! job of [`crate::update`].

pub mod config;
pub mod file;
pub mod sim;

use std::sync::Arc;

use crate::error::Result;

pub use config::ShelfConfig;
pub use file::{FileRegion, FileStore};
pub use sim::{FaultInjector, FaultPoint, SimRegion, SimStats, SimStore};

/// Shared handle to a store, carried by every shelf and instance
pub type StoreRef = Arc<dyn NamedMemoryStore>;

/// A handle to one open named region.
///
/// The handle is bound to the region itself, not to its name: renaming
/// or swapping names does not redirect an open handle.
pub trait NamedMemory: Send {
    /// Name the region had when it was opened
    fn name(&self) -> &str;

    /// Length of the region in bytes
    fn len(&self) -> usize;

    /// Whether the region is empty
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Read view of the committed bytes
    fn as_slice(&self) -> &[u8];

    /// Begin a region-local transaction
    fn tx_begin(&mut self) -> Result<()>;

    /// Writable view; only valid between `tx_begin` and `tx_commit`
    fn as_mut_slice(&mut self) -> Result<&mut [u8]>;

    /// Make every write since `tx_begin` durable
    fn tx_commit(&mut self) -> Result<()>;

    /// Discard every write since `tx_begin`
    fn tx_abort(&mut self) -> Result<()>;

    /// Whether a transaction is open
    fn in_transaction(&self) -> bool;
}

/// A key-value store of persistent named regions
pub trait NamedMemoryStore: Send + Sync {
    /// Create a region; fails with `RegionExists` if the name is taken
    fn create_named_memory(
        &self,
        name: &str,
        size: usize,
        alignment: usize,
        zero_init: bool,
    ) -> Result<Box<dyn NamedMemory>>;

    /// Open a region, `None` when absent
    fn open_named_memory(&self, name: &str) -> Result<Option<Box<dyn NamedMemory>>>;

    /// Copy of a region's bytes, `None` when absent
    fn get_named_memory(&self, name: &str) -> Result<Option<Vec<u8>>>;

    /// Create or replace a small region with `bytes` in one durable step
    fn put_named_memory(&self, name: &str, bytes: &[u8]) -> Result<()>;

    /// Erase a region; fails with `RegionNotFound` if absent
    fn erase_named_memory(&self, name: &str) -> Result<()>;

    /// Exchange the regions reachable under `name_a` and `name_b` in one
    /// indivisible step
    fn atomic_swap_names(&self, name_a: &str, name_b: &str) -> Result<()>;

    /// Every region name currently in the store
    fn names(&self) -> Result<Vec<String>>;

    /// Whether `name` exists
    fn exists(&self, name: &str) -> Result<bool> {
        Ok(self.names()?.iter().any(|n| n == name))
    }
}

/// Run `write` inside a region-local transaction, aborting on failure
pub fn transact<T>(
    region: &mut dyn NamedMemory,
    write: impl FnOnce(&mut [u8]) -> Result<T>,
) -> Result<T> {
    region.tx_begin()?;
    let outcome = region.as_mut_slice().and_then(write);
    match outcome {
        Ok(value) => {
            region.tx_commit()?;
            Ok(value)
        }
        Err(err) => {
            if let Err(abort_err) = region.tx_abort() {
                log::warn!(
                    "abort of transaction on {} failed: {}",
                    region.name(),
                    abort_err
                );
            }
            Err(err)
        }
    }
}

/// Names must be usable as file names in any store
pub(crate) fn validate_region_name(name: &str) -> Result<()> {
    use crate::error::ShelfError;

    if name.is_empty() {
        return Err(ShelfError::invalid_parameter("name", "Region name cannot be empty"));
    }
    if name.starts_with('.') || name.contains('/') || name.contains('\0') {
        return Err(ShelfError::invalid_parameter(
            "name",
            format!("Region name {:?} contains reserved characters", name),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_region_name_validation() {
        assert!(validate_region_name("weights").is_ok());
        assert!(validate_region_name("weights-meta").is_ok());
        assert!(validate_region_name("").is_err());
        assert!(validate_region_name(".hidden").is_err());
        assert!(validate_region_name("a/b").is_err());
        assert!(validate_region_name("a\0b").is_err());
    }

    #[test]
    fn test_transact_aborts_on_error() {
        let store = SimStore::new();
        let mut region = store.create_named_memory("r", 4, 1, true).unwrap();

        let result: Result<()> = transact(region.as_mut(), |buf| {
            buf.copy_from_slice(&[9, 9, 9, 9]);
            Err(crate::error::ShelfError::arithmetic("boom"))
        });
        assert!(result.is_err());
        assert!(!region.in_transaction());
        assert_eq!(region.as_slice(), &[0, 0, 0, 0]);

        transact(region.as_mut(), |buf| {
            buf.copy_from_slice(&[1, 2, 3, 4]);
            Ok(())
        })
        .unwrap();
        assert_eq!(store.get_named_memory("r").unwrap().unwrap(), vec![1, 2, 3, 4]);
    }
}
