//! File-backed named memory store
//!
//! Every region is a file `<name>.region` in the shelf directory, mapped
//! with `memmap2`. Region-local transactions keep an undo image in
//! `.<name>.undo`; an undo image found when the store is opened belongs
//! to a transaction that never committed and is rolled back.

use std::{
    fs::{self, File, OpenOptions},
    io::{ErrorKind, Write},
    os::unix::fs::OpenOptionsExt,
    path::{Path, PathBuf},
};

use memmap2::{MmapMut, MmapOptions};

use crate::error::{Result, ShelfError};

use super::{config::ShelfConfig, validate_region_name, NamedMemory, NamedMemoryStore};

const REGION_EXT: &str = ".region";
const UNDO_EXT: &str = ".undo";
const STAGING_EXT: &str = ".staging";
const PAGE_SIZE: usize = 4096;

/// Store of named regions in one directory
#[derive(Debug)]
pub struct FileStore {
    root: PathBuf,
    capacity: usize,
    permissions: u32,
}

impl FileStore {
    /// Open (creating if needed) the store described by `config`
    pub fn open(config: &ShelfConfig) -> Result<Self> {
        config.validate()?;
        Self::open_dir(
            config.default_path(),
            config.capacity_bytes(),
            config.permissions,
        )
    }

    /// Open (creating if needed) a store rooted at `root`
    pub fn open_dir(root: impl Into<PathBuf>, capacity: usize, permissions: u32) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)
            .map_err(|e| ShelfError::from_io(e, "Failed to create shelf directory"))?;

        let store = Self {
            root,
            capacity,
            permissions,
        };
        let rolled_back = store.recover()?;
        if rolled_back > 0 {
            log::info!(
                "rolled back {} interrupted transaction(s) in {}",
                rolled_back,
                store.root.display()
            );
        }
        Ok(store)
    }

    /// Directory holding the regions
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Capacity in bytes
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Bytes used by all regions
    pub fn used_bytes(&self) -> Result<usize> {
        let mut used = 0usize;
        for name in self.names()? {
            let meta = fs::metadata(self.region_path(&name))
                .map_err(|e| ShelfError::from_io(e, "Failed to stat region"))?;
            used = used.saturating_add(meta.len() as usize);
        }
        Ok(used)
    }

    /// Roll back every interrupted transaction and drop staging files.
    ///
    /// Returns the number of regions restored from an undo image.
    pub fn recover(&self) -> Result<usize> {
        let mut restored = 0;
        let entries = fs::read_dir(&self.root)
            .map_err(|e| ShelfError::from_io(e, "Failed to read shelf directory"))?;

        for entry in entries {
            let entry = entry?;
            let file_name = entry.file_name().to_string_lossy().into_owned();
            let Some(hidden) = file_name.strip_prefix('.') else {
                continue;
            };

            if hidden.ends_with(STAGING_EXT) {
                fs::remove_file(entry.path())?;
                continue;
            }

            if let Some(name) = hidden.strip_suffix(UNDO_EXT) {
                let image = fs::read(entry.path())?;
                let region_path = self.region_path(name);
                if region_path.exists() {
                    write_durably(&region_path, &image, self.permissions)?;
                    restored += 1;
                }
                fs::remove_file(entry.path())?;
            }
        }

        sync_dir(&self.root)?;
        Ok(restored)
    }

    fn region_path(&self, name: &str) -> PathBuf {
        self.root.join(format!("{}{}", name, REGION_EXT))
    }

    fn check_capacity(&self, requested: usize, replacing: usize) -> Result<()> {
        let used = self.used_bytes()?.saturating_sub(replacing);
        let available = self.capacity.saturating_sub(used);
        if requested > available {
            return Err(ShelfError::insufficient_space(requested, available));
        }
        Ok(())
    }
}

impl NamedMemoryStore for FileStore {
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
        if !alignment.is_power_of_two() || alignment > PAGE_SIZE {
            return Err(ShelfError::invalid_parameter(
                "alignment",
                format!("Alignment {} must be a power of two up to {}", alignment, PAGE_SIZE),
            ));
        }
        self.check_capacity(size, 0)?;

        let path = self.region_path(name);
        // Extending with set_len always zero-fills, so zero_init needs no extra work.
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .mode(self.permissions)
            .open(&path)
            .map_err(|e| match e.kind() {
                ErrorKind::AlreadyExists => ShelfError::region_exists(name),
                _ => ShelfError::from_io(e, "Failed to create region file"),
            })?;
        file.set_len(size as u64)
            .map_err(|e| ShelfError::from_io(e, "Failed to set region size"))?;
        file.sync_all()?;
        sync_dir(&self.root)?;

        log::debug!("created region {} ({} bytes)", name, size);
        Ok(Box::new(FileRegion::map(name, &self.root, path, file)?))
    }

    fn open_named_memory(&self, name: &str) -> Result<Option<Box<dyn NamedMemory>>> {
        validate_region_name(name)?;
        let path = self.region_path(name);
        let file = match OpenOptions::new().read(true).write(true).open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(ShelfError::from_io(e, "Failed to open region file")),
        };
        Ok(Some(Box::new(FileRegion::map(name, &self.root, path, file)?)))
    }

    fn get_named_memory(&self, name: &str) -> Result<Option<Vec<u8>>> {
        validate_region_name(name)?;
        match fs::read(self.region_path(name)) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(ShelfError::from_io(e, "Failed to read region file")),
        }
    }

    fn put_named_memory(&self, name: &str, bytes: &[u8]) -> Result<()> {
        validate_region_name(name)?;
        let path = self.region_path(name);
        let replacing = fs::metadata(&path).map(|m| m.len() as usize).unwrap_or(0);
        self.check_capacity(bytes.len(), replacing)?;
        write_durably(&path, bytes, self.permissions)
    }

    fn erase_named_memory(&self, name: &str) -> Result<()> {
        validate_region_name(name)?;
        fs::remove_file(self.region_path(name)).map_err(|e| match e.kind() {
            ErrorKind::NotFound => ShelfError::region_not_found(name),
            _ => ShelfError::from_io(e, "Failed to erase region file"),
        })?;
        sync_dir(&self.root)?;
        log::debug!("erased region {}", name);
        Ok(())
    }

    fn atomic_swap_names(&self, name_a: &str, name_b: &str) -> Result<()> {
        validate_region_name(name_a)?;
        validate_region_name(name_b)?;
        let path_a = self.region_path(name_a);
        let path_b = self.region_path(name_b);
        for (name, path) in [(name_a, &path_a), (name_b, &path_b)] {
            if !path.exists() {
                return Err(ShelfError::region_not_found(name));
            }
        }

        exchange(&path_a, &path_b)?;
        sync_dir(&self.root)?;
        log::debug!("swapped names {} <-> {}", name_a, name_b);
        Ok(())
    }

    fn names(&self) -> Result<Vec<String>> {
        let entries = fs::read_dir(&self.root)
            .map_err(|e| ShelfError::from_io(e, "Failed to read shelf directory"))?;

        let mut names = Vec::new();
        for entry in entries {
            let file_name = entry?.file_name().to_string_lossy().into_owned();
            if file_name.starts_with('.') {
                continue;
            }
            if let Some(name) = file_name.strip_suffix(REGION_EXT) {
                names.push(name.to_string());
            }
        }
        names.sort();
        Ok(names)
    }

    fn exists(&self, name: &str) -> Result<bool> {
        validate_region_name(name)?;
        Ok(self.region_path(name).exists())
    }
}

#[cfg(all(target_os = "linux", target_env = "gnu"))]
fn exchange(path_a: &Path, path_b: &Path) -> Result<()> {
    use nix::fcntl::{renameat2, RenameFlags};

    renameat2(None, path_a, None, path_b, RenameFlags::RENAME_EXCHANGE)
        .map_err(|e| ShelfError::platform(format!("renameat2(RENAME_EXCHANGE) failed: {}", e)))
}

#[cfg(not(all(target_os = "linux", target_env = "gnu")))]
fn exchange(path_a: &Path, path_b: &Path) -> Result<()> {
    log::warn!(
        "no atomic rename-exchange on this platform; swapping {} through a side name",
        path_a.display()
    );
    let side = path_a.with_extension("swap");
    fs::rename(path_a, &side)?;
    fs::rename(path_b, path_a)?;
    fs::rename(&side, path_b)?;
    Ok(())
}

/// Write `bytes` to a staging file, fsync, then rename over `path`
fn write_durably(path: &Path, bytes: &[u8], permissions: u32) -> Result<()> {
    let dir = path
        .parent()
        .ok_or_else(|| ShelfError::invalid_parameter("path", "Region path has no parent"))?;
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let staging = dir.join(format!(".{}{}", file_name.trim_start_matches('.'), STAGING_EXT));

    {
        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(permissions)
            .open(&staging)
            .map_err(|e| ShelfError::from_io(e, "Failed to open staging file"))?;
        file.write_all(bytes)?;
        file.sync_all()?;
    }
    fs::rename(&staging, path)
        .map_err(|e| ShelfError::from_io(e, "Failed to install staging file"))?;
    sync_dir(dir)
}

fn sync_dir(dir: &Path) -> Result<()> {
    File::open(dir)
        .and_then(|d| d.sync_all())
        .map_err(|e| ShelfError::from_io(e, "Failed to sync shelf directory"))
}

/// An open, mapped region file
#[derive(Debug)]
pub struct FileRegion {
    name: String,
    undo_path: PathBuf,
    mmap: MmapMut,
    _file: File,
    in_tx: bool,
}

impl FileRegion {
    fn map(name: &str, root: &Path, path: PathBuf, file: File) -> Result<Self> {
        let len = file
            .metadata()
            .map_err(|e| ShelfError::from_io(e, "Failed to stat region file"))?
            .len() as usize;
        if len == 0 {
            return Err(ShelfError::corruption(name, "region file is empty"));
        }

        // Safety: the file stays open for the lifetime of the mapping and
        // every writer goes through the undo-logged transaction below.
        let mmap = unsafe {
            MmapOptions::new()
                .len(len)
                .map_mut(&file)
                .map_err(|e| ShelfError::from_io(e, "Failed to create memory mapping"))?
        };
        log::trace!("mapped {} ({} bytes)", path.display(), len);

        Ok(Self {
            name: name.to_string(),
            undo_path: root.join(format!(".{}{}", name, UNDO_EXT)),
            mmap,
            _file: file,
            in_tx: false,
        })
    }

    fn finish(&mut self) -> Result<()> {
        fs::remove_file(&self.undo_path)
            .map_err(|e| ShelfError::from_io(e, "Failed to drop undo image"))?;
        if let Some(dir) = self.undo_path.parent() {
            sync_dir(dir)?;
        }
        self.in_tx = false;
        Ok(())
    }
}

impl NamedMemory for FileRegion {
    fn name(&self) -> &str {
        &self.name
    }

    fn len(&self) -> usize {
        self.mmap.len()
    }

    fn as_slice(&self) -> &[u8] {
        &self.mmap[..]
    }

    fn tx_begin(&mut self) -> Result<()> {
        if self.in_tx {
            return Err(ShelfError::transaction(&self.name, "transaction already open"));
        }
        write_durably(&self.undo_path, &self.mmap[..], 0o600)?;
        self.in_tx = true;
        Ok(())
    }

    fn as_mut_slice(&mut self) -> Result<&mut [u8]> {
        if !self.in_tx {
            return Err(ShelfError::transaction(&self.name, "write outside of a transaction"));
        }
        Ok(&mut self.mmap[..])
    }

    fn tx_commit(&mut self) -> Result<()> {
        if !self.in_tx {
            return Err(ShelfError::transaction(&self.name, "no transaction to commit"));
        }
        self.mmap
            .flush()
            .map_err(|e| ShelfError::from_io(e, "Failed to flush memory mapping"))?;
        self.finish()
    }

    fn tx_abort(&mut self) -> Result<()> {
        if !self.in_tx {
            return Err(ShelfError::transaction(&self.name, "no transaction to abort"));
        }
        let image = fs::read(&self.undo_path)
            .map_err(|e| ShelfError::from_io(e, "Failed to read undo image"))?;
        if image.len() != self.mmap.len() {
            return Err(ShelfError::corruption(&self.name, "undo image length differs from region"));
        }
        self.mmap.copy_from_slice(&image);
        self.mmap
            .flush()
            .map_err(|e| ShelfError::from_io(e, "Failed to flush memory mapping"))?;
        self.finish()
    }

    fn in_transaction(&self) -> bool {
        self.in_tx
    }
}
