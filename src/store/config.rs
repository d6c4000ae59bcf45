//! Configuration for opening a shelf

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::{Result, ShelfError};

/// Configuration for opening a file-backed shelf
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShelfConfig {
    /// Name of the shelf
    pub name: String,
    /// Capacity of the shelf in megabytes
    pub size_mb: usize,
    /// Directory holding the shelf regions
    pub path: Option<PathBuf>,
    /// Permissions for region files (Unix permissions)
    pub permissions: u32,
    /// Erase orphaned `-tmp` regions when the shelf is opened
    pub collect_orphans: bool,
}

impl Default for ShelfConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            size_mb: crate::config::DEFAULT_SHELF_SIZE_MB,
            path: None,
            permissions: 0o644,
            collect_orphans: true,
        }
    }
}

impl ShelfConfig {
    /// Create a new shelf configuration
    pub fn new(name: impl Into<String>, size_mb: usize) -> Self {
        Self {
            name: name.into(),
            size_mb,
            ..Default::default()
        }
    }

    /// Set the directory holding the shelf
    pub fn with_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.path = Some(path.into());
        self
    }

    /// Set the permissions for region files
    pub fn with_permissions(mut self, permissions: u32) -> Self {
        self.permissions = permissions;
        self
    }

    /// Set whether orphaned update regions are collected on open
    pub fn with_collect_orphans(mut self, collect: bool) -> Self {
        self.collect_orphans = collect;
        self
    }

    /// Capacity in bytes
    pub fn capacity_bytes(&self) -> usize {
        self.size_mb.saturating_mul(1024 * 1024)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(ShelfError::invalid_parameter(
                "name",
                "Shelf name cannot be empty",
            ));
        }

        if self.name.contains('/') || self.name.contains('\0') {
            return Err(ShelfError::invalid_parameter(
                "name",
                format!("Shelf name {:?} contains reserved characters", self.name),
            ));
        }

        if self.size_mb == 0 {
            return Err(ShelfError::invalid_parameter(
                "size_mb",
                "Shelf size must be greater than 0",
            ));
        }

        Ok(())
    }

    /// Get the directory for this shelf
    pub fn default_path(&self) -> PathBuf {
        self.path
            .clone()
            .unwrap_or_else(|| PathBuf::from(format!("/tmp/pmshelf_{}", self.name)))
    }
}
