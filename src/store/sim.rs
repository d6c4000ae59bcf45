//! Deterministic in-memory store with fault injection
//!
//! Names map to region ids and handles hold ids, so swapping names never
//! redirects an open handle. Only committed bytes live in the shared
//! state; a crash is modelled by dropping every handle and opening a new
//! shelf over a clone of the store.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard},
};

use crate::error::{Result, ShelfError};

use super::{validate_region_name, NamedMemory, NamedMemoryStore};

/// Store primitive at which a fault can be injected
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FaultPoint {
    Create,
    Open,
    Get,
    Put,
    Erase,
    Swap,
    TxBegin,
    TxCommit,
}

/// Fails chosen primitives on their n-th occurrence
#[derive(Debug, Default)]
pub struct FaultInjector {
    armed: HashMap<FaultPoint, u64>,
    fired: Vec<FaultPoint>,
}

impl FaultInjector {
    /// Create an injector with nothing armed
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the `nth` next occurrence of `point` (1 = the very next)
    pub fn arm(&mut self, point: FaultPoint, nth: u64) {
        self.armed.insert(point, nth.max(1));
    }

    /// Disarm every fault point
    pub fn clear(&mut self) {
        self.armed.clear();
    }

    /// Faults that have fired so far, in order
    pub fn fired(&self) -> &[FaultPoint] {
        &self.fired
    }

    fn check(&mut self, point: FaultPoint) -> bool {
        let Some(remaining) = self.armed.get_mut(&point) else {
            return false;
        };
        *remaining -= 1;
        if *remaining == 0 {
            self.armed.remove(&point);
            self.fired.push(point);
            true
        } else {
            false
        }
    }
}

/// Operation counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SimStats {
    pub creates: u64,
    pub opens: u64,
    pub erases: u64,
    pub swaps: u64,
    pub puts: u64,
    pub commits: u64,
    pub aborts: u64,
}

#[derive(Debug, Default)]
struct SimState {
    names: HashMap<String, u64>,
    regions: HashMap<u64, Vec<u8>>,
    next_id: u64,
    capacity: Option<usize>,
    faults: FaultInjector,
    stats: SimStats,
}

impl SimState {
    fn inject(&mut self, point: FaultPoint, name: &str) -> Result<()> {
        if self.faults.check(point) {
            log::debug!("injecting {:?} fault on {}", point, name);
            return Err(ShelfError::platform(format!(
                "injected {:?} fault on {}",
                point, name
            )));
        }
        Ok(())
    }

    fn used(&self) -> usize {
        self.regions.values().map(Vec::len).sum()
    }

    fn insert(&mut self, name: &str, bytes: Vec<u8>) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        self.regions.insert(id, bytes);
        self.names.insert(name.to_string(), id);
        id
    }
}

/// In-memory named memory store; clones share the same state
#[derive(Debug, Clone, Default)]
pub struct SimStore {
    state: Arc<Mutex<SimState>>,
}

impl SimStore {
    /// Create an empty, unbounded store
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty store holding at most `capacity` bytes
    pub fn with_capacity(capacity: usize) -> Self {
        let store = Self::new();
        if let Ok(mut state) = store.state.lock() {
            state.capacity = Some(capacity);
        }
        store
    }

    /// Fail the `nth` next occurrence of `point`
    pub fn inject_fault(&self, point: FaultPoint, nth: u64) -> Result<()> {
        self.lock()?.faults.arm(point, nth);
        Ok(())
    }

    /// Disarm every pending fault
    pub fn clear_faults(&self) -> Result<()> {
        self.lock()?.faults.clear();
        Ok(())
    }

    /// Faults that have fired so far
    pub fn fired_faults(&self) -> Result<Vec<FaultPoint>> {
        Ok(self.lock()?.faults.fired().to_vec())
    }

    /// Snapshot of the operation counters
    pub fn stats(&self) -> Result<SimStats> {
        Ok(self.lock()?.stats)
    }

    fn lock(&self) -> Result<MutexGuard<'_, SimState>> {
        lock_state(&self.state)
    }
}

fn lock_state(state: &Mutex<SimState>) -> Result<MutexGuard<'_, SimState>> {
    state
        .lock()
        .map_err(|_| ShelfError::platform("simulated store lock poisoned"))
}

impl NamedMemoryStore for SimStore {
    fn create_named_memory(
        &self,
        name: &str,
        size: usize,
        alignment: usize,
        _zero_init: bool,
    ) -> Result<Box<dyn NamedMemory>> {
        validate_region_name(name)?;
        if size == 0 {
            return Err(ShelfError::invalid_parameter(
                "size",
                "Region size must be greater than 0",
            ));
        }
        if !alignment.is_power_of_two() {
            return Err(ShelfError::invalid_parameter(
                "alignment",
                "Alignment must be a power of two",
            ));
        }

        let mut state = self.lock()?;
        state.inject(FaultPoint::Create, name)?;
        if state.names.contains_key(name) {
            return Err(ShelfError::region_exists(name));
        }
        if let Some(capacity) = state.capacity {
            let available = capacity.saturating_sub(state.used());
            if size > available {
                return Err(ShelfError::insufficient_space(size, available));
            }
        }

        let id = state.insert(name, vec![0; size]);
        state.stats.creates += 1;
        drop(state);

        Ok(Box::new(SimRegion {
            name: name.to_string(),
            id,
            state: Arc::clone(&self.state),
            view: vec![0; size],
            staged: None,
        }))
    }

    fn open_named_memory(&self, name: &str) -> Result<Option<Box<dyn NamedMemory>>> {
        validate_region_name(name)?;
        let mut state = self.lock()?;
        state.inject(FaultPoint::Open, name)?;
        let Some(&id) = state.names.get(name) else {
            return Ok(None);
        };
        let view = state.regions.get(&id).cloned().unwrap_or_default();
        state.stats.opens += 1;
        drop(state);

        Ok(Some(Box::new(SimRegion {
            name: name.to_string(),
            id,
            state: Arc::clone(&self.state),
            view,
            staged: None,
        })))
    }

    fn get_named_memory(&self, name: &str) -> Result<Option<Vec<u8>>> {
        validate_region_name(name)?;
        let mut state = self.lock()?;
        state.inject(FaultPoint::Get, name)?;
        Ok(state
            .names
            .get(name)
            .and_then(|id| state.regions.get(id))
            .cloned())
    }

    fn put_named_memory(&self, name: &str, bytes: &[u8]) -> Result<()> {
        validate_region_name(name)?;
        let mut state = self.lock()?;
        state.inject(FaultPoint::Put, name)?;
        // A put installs a fresh region, like a rename over the old file.
        if let Some(old) = state.names.get(name).copied() {
            state.regions.remove(&old);
        }
        state.insert(name, bytes.to_vec());
        state.stats.puts += 1;
        Ok(())
    }

    fn erase_named_memory(&self, name: &str) -> Result<()> {
        validate_region_name(name)?;
        let mut state = self.lock()?;
        state.inject(FaultPoint::Erase, name)?;
        let id = state
            .names
            .remove(name)
            .ok_or_else(|| ShelfError::region_not_found(name))?;
        state.regions.remove(&id);
        state.stats.erases += 1;
        Ok(())
    }

    fn atomic_swap_names(&self, name_a: &str, name_b: &str) -> Result<()> {
        validate_region_name(name_a)?;
        validate_region_name(name_b)?;
        let mut state = self.lock()?;
        state.inject(FaultPoint::Swap, name_a)?;
        let id_a = *state
            .names
            .get(name_a)
            .ok_or_else(|| ShelfError::region_not_found(name_a))?;
        let id_b = *state
            .names
            .get(name_b)
            .ok_or_else(|| ShelfError::region_not_found(name_b))?;
        state.names.insert(name_a.to_string(), id_b);
        state.names.insert(name_b.to_string(), id_a);
        state.stats.swaps += 1;
        Ok(())
    }

    fn names(&self) -> Result<Vec<String>> {
        let state = self.lock()?;
        let mut names: Vec<String> = state.names.keys().cloned().collect();
        names.sort();
        Ok(names)
    }

    fn exists(&self, name: &str) -> Result<bool> {
        Ok(self.lock()?.names.contains_key(name))
    }
}

/// Handle to a region of a [`SimStore`]
#[derive(Debug)]
pub struct SimRegion {
    name: String,
    id: u64,
    state: Arc<Mutex<SimState>>,
    view: Vec<u8>,
    staged: Option<Vec<u8>>,
}

impl NamedMemory for SimRegion {
    fn name(&self) -> &str {
        &self.name
    }

    fn len(&self) -> usize {
        self.view.len()
    }

    fn as_slice(&self) -> &[u8] {
        &self.view
    }

    fn tx_begin(&mut self) -> Result<()> {
        if self.staged.is_some() {
            return Err(ShelfError::transaction(&self.name, "transaction already open"));
        }
        lock_state(&self.state)?.inject(FaultPoint::TxBegin, &self.name)?;
        self.staged = Some(self.view.clone());
        Ok(())
    }

    fn as_mut_slice(&mut self) -> Result<&mut [u8]> {
        match self.staged.as_mut() {
            Some(staged) => Ok(&mut staged[..]),
            None => Err(ShelfError::transaction(
                &self.name,
                "write outside of a transaction",
            )),
        }
    }

    fn tx_commit(&mut self) -> Result<()> {
        let staged = self
            .staged
            .take()
            .ok_or_else(|| ShelfError::transaction(&self.name, "no transaction to commit"))?;

        let mut state = lock_state(&self.state)?;
        if let Err(err) = state.inject(FaultPoint::TxCommit, &self.name) {
            state.stats.aborts += 1;
            return Err(ShelfError::transaction(&self.name, err.to_string()));
        }
        let slot = state
            .regions
            .get_mut(&self.id)
            .ok_or_else(|| ShelfError::region_not_found(&self.name))?;
        *slot = staged.clone();
        state.stats.commits += 1;
        drop(state);

        self.view = staged;
        Ok(())
    }

    fn tx_abort(&mut self) -> Result<()> {
        if self.staged.take().is_none() {
            return Err(ShelfError::transaction(&self.name, "no transaction to abort"));
        }
        lock_state(&self.state)?.stats.aborts += 1;
        Ok(())
    }

    fn in_transaction(&self) -> bool {
        self.staged.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_swap_does_not_redirect_open_handles() {
        let store = SimStore::new();
        store.put_named_memory("a", b"old").unwrap();
        store.put_named_memory("b", b"new").unwrap();

        let handle = store.open_named_memory("a").unwrap().unwrap();
        store.atomic_swap_names("a", "b").unwrap();

        assert_eq!(handle.as_slice(), b"old");
        assert_eq!(store.get_named_memory("a").unwrap().unwrap(), b"new");
    }

    #[test]
    fn test_uncommitted_writes_are_not_durable() {
        let store = SimStore::new();
        let mut region = store.create_named_memory("x", 3, 1, true).unwrap();
        region.tx_begin().unwrap();
        region.as_mut_slice().unwrap().copy_from_slice(b"abc");
        drop(region);

        assert_eq!(store.get_named_memory("x").unwrap().unwrap(), vec![0, 0, 0]);
    }

    #[test]
    fn test_fault_fires_on_nth_occurrence() {
        let store = SimStore::new();
        store.inject_fault(FaultPoint::Put, 2).unwrap();

        assert!(store.put_named_memory("a", b"1").is_ok());
        assert!(store.put_named_memory("b", b"2").is_err());
        assert!(store.put_named_memory("c", b"3").is_ok());
        assert_eq!(store.fired_faults().unwrap(), vec![FaultPoint::Put]);
        assert!(!store.exists("b").unwrap());
    }

    #[test]
    fn test_commit_fault_leaves_region_untouched() {
        let store = SimStore::new();
        let mut region = store.create_named_memory("x", 2, 1, true).unwrap();
        store.inject_fault(FaultPoint::TxCommit, 1).unwrap();

        region.tx_begin().unwrap();
        region.as_mut_slice().unwrap().copy_from_slice(b"zz");
        assert!(matches!(region.tx_commit(), Err(ShelfError::Transaction { .. })));
        assert!(!region.in_transaction());
        assert_eq!(region.as_slice(), &[0, 0]);
        assert_eq!(store.stats().unwrap().aborts, 1);
    }

    #[test]
    fn test_capacity() {
        let store = SimStore::with_capacity(8);
        assert!(store.create_named_memory("a", 6, 1, true).is_ok());
        assert!(matches!(
            store.create_named_memory("b", 6, 1, true),
            Err(ShelfError::InsufficientSpace { .. })
        ));
    }
}
