//! Crash-consistent whole-value replacement of a named region
//!
//! ```text
//! 1. serialize     image = header + payload
//! 2. side region   create  <name>-tmp
//! 3. commit        tx_begin / copy image / tx_commit on <name>-tmp
//! 4. release       drop the handle to the old <name> region
//! 5. swap          atomic_swap_names(<name>, <name>-tmp)
//! 6. cleanup       erase <name>-tmp (now the old bytes)
//! 7. refresh       re-open <name>
//! ```
//!
//! Before step 5 completes the canonical name still reaches the old
//! bytes; from step 5 on it reaches the new ones. A crash after step 5
//! only leaves a `-tmp` region behind, which `Shelf::collect_orphans`
//! erases.

use crate::{
    config::{DEFAULT_ALIGNMENT, TMP_SUFFIX},
    error::{Result, ShelfError},
    store::{transact, NamedMemory, NamedMemoryStore},
};

/// Step of the update protocol, reported to observers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateStep {
    CreateSide,
    CommitSide,
    ReleaseOld,
    Swap,
    EraseOld,
    Refresh,
}

/// Name of the side region used while updating `name`
pub fn tmp_name(name: &str) -> String {
    format!("{}{}", name, TMP_SUFFIX)
}

/// Whether `name` is a side region left by an update
pub fn is_tmp_name(name: &str) -> bool {
    name.ends_with(TMP_SUFFIX)
}

/// Replace the bytes reachable under `name` with `image`.
///
/// `handle` is the caller's open handle to `name`. It is released
/// before the swap and holds a handle to the new region on success. On
/// failure it holds a handle to whatever `name` reaches, which is the
/// old value for every failure before the swap.
pub fn atomic_replace(
    store: &dyn NamedMemoryStore,
    name: &str,
    handle: &mut Option<Box<dyn NamedMemory>>,
    image: &[u8],
) -> Result<()> {
    atomic_replace_observed(store, name, handle, image, &mut |_| {})
}

/// [`atomic_replace`] with a callback invoked as each step completes
pub fn atomic_replace_observed(
    store: &dyn NamedMemoryStore,
    name: &str,
    handle: &mut Option<Box<dyn NamedMemory>>,
    image: &[u8],
    observe: &mut dyn FnMut(UpdateStep),
) -> Result<()> {
    if image.is_empty() {
        return Err(ShelfError::invalid_parameter("image", "Replacement image is empty"));
    }
    let side = tmp_name(name);

    if store.exists(&side)? {
        // Left by a crash or by a competing writer; the latter then loses
        // its swap and keeps its old value.
        log::warn!("erasing stale side region {} before update", side);
        store.erase_named_memory(&side)?;
    }

    let mut side_region = store.create_named_memory(&side, image.len(), DEFAULT_ALIGNMENT, false)?;
    log::debug!("update {}: created {} ({} bytes)", name, side, image.len());
    observe(UpdateStep::CreateSide);

    let committed = transact(side_region.as_mut(), |buf| {
        buf.copy_from_slice(image);
        Ok(())
    });
    if let Err(err) = committed {
        drop(side_region);
        discard_side(store, &side);
        log::debug!("update {}: side commit failed, old value kept: {}", name, err);
        return Err(err);
    }
    log::debug!("update {}: committed {}", name, side);
    observe(UpdateStep::CommitSide);

    drop(side_region);
    drop(handle.take());
    observe(UpdateStep::ReleaseOld);

    if let Err(err) = store.atomic_swap_names(name, &side) {
        discard_side(store, &side);
        *handle = store.open_named_memory(name)?;
        log::debug!("update {}: swap failed, old value kept: {}", name, err);
        return Err(err);
    }
    log::debug!("update {}: swapped with {}", name, side);
    observe(UpdateStep::Swap);

    match store.erase_named_memory(&side) {
        Ok(()) => observe(UpdateStep::EraseOld),
        Err(err) => log::warn!(
            "update {}: could not erase {} ({}); left for orphan collection",
            name,
            side,
            err
        ),
    }

    let fresh = store
        .open_named_memory(name)?
        .ok_or_else(|| ShelfError::region_not_found(name))?;
    *handle = Some(fresh);
    observe(UpdateStep::Refresh);
    log::debug!("update {}: complete", name);
    Ok(())
}

fn discard_side(store: &dyn NamedMemoryStore, side: &str) {
    if let Err(err) = store.erase_named_memory(side) {
        log::warn!("could not erase side region {}: {}", side, err);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{FaultPoint, SimStore};

    fn seeded(store: &SimStore) -> Option<Box<dyn NamedMemory>> {
        store.put_named_memory("x", b"old-value").unwrap();
        store.open_named_memory("x").unwrap()
    }

    #[test]
    fn test_replace_runs_every_step_in_order() {
        let store = SimStore::new();
        let mut handle = seeded(&store);
        let mut steps = Vec::new();

        atomic_replace_observed(&store, "x", &mut handle, b"new", &mut |s| steps.push(s)).unwrap();

        assert_eq!(
            steps,
            vec![
                UpdateStep::CreateSide,
                UpdateStep::CommitSide,
                UpdateStep::ReleaseOld,
                UpdateStep::Swap,
                UpdateStep::EraseOld,
                UpdateStep::Refresh,
            ]
        );
        assert_eq!(handle.unwrap().as_slice(), b"new");
        assert_eq!(store.names().unwrap(), vec!["x".to_string()]);
    }

    #[test]
    fn test_commit_failure_keeps_old_value() {
        let store = SimStore::new();
        let mut handle = seeded(&store);
        store.inject_fault(FaultPoint::TxCommit, 1).unwrap();

        assert!(atomic_replace(&store, "x", &mut handle, b"new").is_err());
        assert_eq!(store.get_named_memory("x").unwrap().unwrap(), b"old-value");
        assert!(!store.exists("x-tmp").unwrap());
        assert_eq!(handle.unwrap().as_slice(), b"old-value");
    }

    #[test]
    fn test_swap_failure_keeps_old_value() {
        let store = SimStore::new();
        let mut handle = seeded(&store);
        store.inject_fault(FaultPoint::Swap, 1).unwrap();

        assert!(atomic_replace(&store, "x", &mut handle, b"new").is_err());
        assert_eq!(store.get_named_memory("x").unwrap().unwrap(), b"old-value");
        assert!(!store.exists("x-tmp").unwrap());
        assert_eq!(handle.unwrap().as_slice(), b"old-value");
    }

    #[test]
    fn test_cleanup_failure_is_tolerated() {
        let store = SimStore::new();
        let mut handle = seeded(&store);
        store.inject_fault(FaultPoint::Erase, 1).unwrap();

        atomic_replace(&store, "x", &mut handle, b"new").unwrap();
        assert_eq!(store.get_named_memory("x").unwrap().unwrap(), b"new");
        assert_eq!(store.get_named_memory("x-tmp").unwrap().unwrap(), b"old-value");
    }

    #[test]
    fn test_stale_side_region_is_replaced() {
        let store = SimStore::new();
        let mut handle = seeded(&store);
        store.put_named_memory("x-tmp", b"leftover").unwrap();

        atomic_replace(&store, "x", &mut handle, b"new").unwrap();
        assert_eq!(store.get_named_memory("x").unwrap().unwrap(), b"new");
        assert!(!store.exists("x-tmp").unwrap());
    }

    #[test]
    fn test_tmp_names() {
        assert_eq!(tmp_name("x"), "x-tmp");
        assert!(is_tmp_name("x-tmp"));
        assert!(!is_tmp_name("x"));
    }
}
