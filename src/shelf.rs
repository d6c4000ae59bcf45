//! The shelf: a named collection of persistent values over one store

use std::{
    collections::HashSet,
    fmt,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use crate::{
    config::{META_SUFFIX, TMP_SUFFIX},
    error::{Result, ShelfError},
    header::{Header, TypeTag},
    shadow::{is_uncommitted, ndarray::meta_name, Shadow, ShelvedValue, Transient},
    store::{validate_region_name, FileStore, ShelfConfig, StoreRef},
    update::is_tmp_name,
};

struct ShelfInner {
    name: String,
    store: StoreRef,
    /// Names bound by a live instance in this process
    leases: Mutex<HashSet<String>>,
}

impl ShelfInner {
    fn leases(&self) -> MutexGuard<'_, HashSet<String>> {
        self.leases.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Exclusive in-process claim on a name, released on drop
pub(crate) struct Lease {
    inner: Arc<ShelfInner>,
    name: String,
}

impl Drop for Lease {
    fn drop(&mut self) {
        self.inner.leases().remove(&self.name);
    }
}

/// A shelf of persistent values.
///
/// Cloning is cheap and every clone refers to the same store. Instances
/// carry a clone, so a shelf stays usable as long as any value bound to
/// it is alive.
#[derive(Clone)]
pub struct Shelf {
    inner: Arc<ShelfInner>,
}

impl Shelf {
    /// Open (or create) a file-backed shelf
    pub fn open(config: &ShelfConfig) -> Result<Self> {
        config.validate()?;
        let store = FileStore::open(config)?;
        log::info!(
            "opened shelf {} at {}",
            config.name,
            store.root().display()
        );
        Self::build(config.name.clone(), Arc::new(store), config.collect_orphans)
    }

    /// Wrap an existing store, collecting orphans
    pub fn with_store(store: StoreRef) -> Result<Self> {
        Self::build("shelf".to_string(), store, true)
    }

    /// Wrap an existing store with the name and orphan policy of `config`
    pub fn with_store_config(store: StoreRef, config: &ShelfConfig) -> Result<Self> {
        config.validate()?;
        Self::build(config.name.clone(), store, config.collect_orphans)
    }

    fn build(name: String, store: StoreRef, collect_orphans: bool) -> Result<Self> {
        let shelf = Self {
            inner: Arc::new(ShelfInner {
                name,
                store,
                leases: Mutex::new(HashSet::new()),
            }),
        };
        if collect_orphans {
            shelf.collect_orphans()?;
        }
        Ok(shelf)
    }

    /// Name of the shelf
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Underlying named memory store
    pub fn store(&self) -> &StoreRef {
        &self.inner.store
    }

    /// Create `name` from a shadow, or bind it if it already holds a
    /// value of the same type
    pub fn create<S: Shadow>(&self, name: &str, shadow: S) -> Result<S::Instance> {
        validate_item_name(name)?;
        shadow.make_instance(self, name)
    }

    /// Bind `name` as the shadow's type, `None` if it holds something else
    pub fn bind<S: Shadow>(&self, name: &str) -> Result<Option<S::Instance>> {
        validate_item_name(name)?;
        S::existing_instance(self, name)
    }

    /// Bind `name` as whatever type it holds
    pub fn get(&self, name: &str) -> Result<Option<ShelvedValue>> {
        validate_item_name(name)?;
        ShelvedValue::resolve(self, name)
    }

    /// Copy a transient value onto the shelf under a new name
    pub fn import<V: Transient + ?Sized>(&self, name: &str, value: &V) -> Result<ShelvedValue> {
        validate_item_name(name)?;
        value.build_from_copy(self, name)
    }

    /// Whether `name` is on the shelf
    pub fn contains(&self, name: &str) -> Result<bool> {
        validate_item_name(name)?;
        self.inner.store.exists(name)
    }

    /// Names of every item, without update side regions and metadata
    pub fn item_names(&self) -> Result<Vec<String>> {
        let mut names: Vec<String> = self
            .inner
            .store
            .names()?
            .into_iter()
            .filter(|n| !is_tmp_name(n) && !n.ends_with(META_SUFFIX))
            .collect();
        names.sort();
        Ok(names)
    }

    /// Whether a live instance in this process is bound to `name`
    pub fn is_bound(&self, name: &str) -> bool {
        self.inner.leases().contains(name)
    }

    /// Erase `name` and its metadata region.
    ///
    /// Fails with `Busy` while an instance is bound to the name; use the
    /// instance's own `erase` instead.
    pub fn erase(&self, name: &str) -> Result<()> {
        validate_item_name(name)?;
        if self.is_bound(name) {
            return Err(ShelfError::busy(name));
        }
        let store = &self.inner.store;
        let meta = meta_name(name);
        let had_meta = store.exists(&meta)?;
        if had_meta {
            // Metadata first: an array without it is no longer reachable.
            store.erase_named_memory(&meta)?;
        }
        match store.erase_named_memory(name) {
            Err(ShelfError::RegionNotFound { .. }) if had_meta => {}
            other => other?,
        }
        log::debug!("erased {} from shelf {}", name, self.inner.name);
        Ok(())
    }

    /// Erase regions left behind by interrupted operations.
    ///
    /// Collected: `-tmp` side regions of updates, regions whose creation
    /// never committed, array data without metadata and metadata without
    /// data. Names bound in this process are skipped. Returns the erased
    /// region names.
    pub fn collect_orphans(&self) -> Result<Vec<String>> {
        let store = &self.inner.store;
        let names = store.names()?;
        let present: HashSet<&str> = names.iter().map(String::as_str).collect();
        let mut collected = Vec::new();

        for name in &names {
            let owner = if let Some(base) = name.strip_suffix(TMP_SUFFIX) {
                base
            } else if let Some(base) = name.strip_suffix(META_SUFFIX) {
                if present.contains(base) {
                    continue;
                }
                base
            } else {
                name.as_str()
            };
            if self.is_bound(owner) {
                continue;
            }

            let orphaned = if is_tmp_name(name) || name.ends_with(META_SUFFIX) {
                true
            } else {
                match store.get_named_memory(name)? {
                    Some(bytes) if is_uncommitted(&bytes) => true,
                    Some(bytes) => matches!(
                        Header::probe(&bytes),
                        Some(TypeTag::NdArray | TypeTag::Tensor)
                    ) && !present.contains(meta_name(name).as_str()),
                    None => false,
                }
            };
            if !orphaned {
                continue;
            }

            match store.erase_named_memory(name) {
                Ok(()) => {
                    log::warn!("collected orphaned region {}", name);
                    collected.push(name.clone());
                }
                Err(err) => log::warn!("could not collect orphaned region {}: {}", name, err),
            }
        }

        if !collected.is_empty() {
            log::info!(
                "shelf {}: collected {} orphaned region(s)",
                self.inner.name,
                collected.len()
            );
        }
        Ok(collected)
    }

    /// Claim `name` for a live instance
    pub(crate) fn lease(&self, name: &str) -> Result<Lease> {
        if !self.inner.leases().insert(name.to_string()) {
            return Err(ShelfError::busy(name));
        }
        Ok(Lease {
            inner: Arc::clone(&self.inner),
            name: name.to_string(),
        })
    }
}

impl fmt::Debug for Shelf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Shelf")
            .field("name", &self.inner.name)
            .field("bound", &self.inner.leases().len())
            .finish()
    }
}

/// Item names must be valid region names without a reserved suffix
pub(crate) fn validate_item_name(name: &str) -> Result<()> {
    validate_region_name(name)?;
    if name.ends_with(TMP_SUFFIX) || name.ends_with(META_SUFFIX) {
        return Err(ShelfError::invalid_parameter(
            "name",
            format!(
                "Item name {:?} ends with a reserved suffix ({} or {})",
                name, TMP_SUFFIX, META_SUFFIX
            ),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shadow::{FloatNumber, IntegerNumber};
    use crate::store::{NamedMemoryStore, SimStore};

    fn sim_shelf() -> (SimStore, Shelf) {
        let store = SimStore::new();
        let shelf = Shelf::with_store(Arc::new(store.clone())).unwrap();
        (store, shelf)
    }

    #[test]
    fn test_reserved_suffixes_rejected() {
        let (_store, shelf) = sim_shelf();
        assert!(shelf.create("x-tmp", FloatNumber::new(1.0)).is_err());
        assert!(shelf.create("x-meta", FloatNumber::new(1.0)).is_err());
        assert!(shelf.create("", FloatNumber::new(1.0)).is_err());
    }

    #[test]
    fn test_lease_is_exclusive_and_released() {
        let (_store, shelf) = sim_shelf();
        let x = shelf.create("x", FloatNumber::new(1.0)).unwrap();
        assert!(shelf.is_bound("x"));

        let err = shelf.bind::<FloatNumber>("x").unwrap_err();
        assert!(matches!(err, ShelfError::Busy { .. }));
        assert!(matches!(shelf.erase("x"), Err(ShelfError::Busy { .. })));

        drop(x);
        assert!(!shelf.is_bound("x"));
        assert!(shelf.bind::<FloatNumber>("x").unwrap().is_some());
    }

    #[test]
    fn test_item_names_hide_internal_regions() {
        let (store, shelf) = sim_shelf();
        drop(shelf.create("b", IntegerNumber::new(1)).unwrap());
        drop(shelf.create("a", FloatNumber::new(1.0)).unwrap());
        store.put_named_memory("a-tmp", b"junk").unwrap();

        assert_eq!(shelf.item_names().unwrap(), vec!["a", "b"]);
    }

    #[test]
    fn test_erase() {
        let (store, shelf) = sim_shelf();
        drop(shelf.create("x", FloatNumber::new(1.0)).unwrap());
        shelf.erase("x").unwrap();
        assert!(!store.exists("x").unwrap());
        assert!(matches!(
            shelf.erase("x"),
            Err(ShelfError::RegionNotFound { .. })
        ));
    }

    #[test]
    fn test_collect_orphans() {
        let (store, shelf) = sim_shelf();
        drop(shelf.create("x", FloatNumber::new(1.0)).unwrap());
        store.put_named_memory("x-tmp", b"stale").unwrap();
        store.put_named_memory("gone-meta", b"meta").unwrap();
        store.put_named_memory("half", &[0u8; 8]).unwrap();
        store.put_named_memory("foreign", b"not a shelf value").unwrap();

        let mut collected = shelf.collect_orphans().unwrap();
        collected.sort();
        assert_eq!(collected, vec!["gone-meta", "half", "x-tmp"]);
        assert_eq!(store.names().unwrap(), vec!["foreign", "x"]);
    }

    #[test]
    fn test_collect_skips_bound_names() {
        let (store, shelf) = sim_shelf();
        let _x = shelf.create("x", FloatNumber::new(1.0)).unwrap();
        store.put_named_memory("x-tmp", b"in flight").unwrap();

        assert!(shelf.collect_orphans().unwrap().is_empty());
        assert!(store.exists("x-tmp").unwrap());
    }
}
