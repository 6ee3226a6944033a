//! Device cache: the directories to scan and the block devices under them

use std::collections::BTreeMap;
use std::os::unix::fs::{FileTypeExt, MetadataExt};
use std::path::{Path, PathBuf};
use tracing::{debug, trace, warn};
use volctl_core::Device;
use walkdir::WalkDir;

use crate::DeviceCacheError;

/// Ordered set of scan directories
#[derive(Debug, Default)]
pub struct DeviceCache {
    dirs: Vec<PathBuf>,
}

impl DeviceCache {
    pub fn new() -> Self {
        Self { dirs: Vec::new() }
    }

    /// Register a directory to scan
    ///
    /// Fails if the path does not exist or is not a directory.
    pub fn add_dir(&mut self, dir: impl AsRef<Path>) -> Result<(), DeviceCacheError> {
        let dir = dir.as_ref();
        let meta = std::fs::metadata(dir).map_err(|source| DeviceCacheError::IoError {
            path: dir.to_path_buf(),
            source,
        })?;
        if !meta.is_dir() {
            return Err(DeviceCacheError::NotADirectory(dir.to_path_buf()));
        }

        if !self.dirs.iter().any(|d| d == dir) {
            debug!(dir = %dir.display(), "Added scan directory");
            self.dirs.push(dir.to_path_buf());
        }
        Ok(())
    }

    pub fn dirs(&self) -> &[PathBuf] {
        &self.dirs
    }

    /// Enumerate block device nodes under every scan directory
    ///
    /// Directories are walked recursively, following symlinks. Entries
    /// that cannot be read, and symlink loops, are logged and skipped.
    /// Results are sorted by path and each path appears once.
    pub fn scan(&self) -> Vec<Device> {
        let mut found = BTreeMap::new();

        for dir in &self.dirs {
            for entry in WalkDir::new(dir).follow_links(true) {
                let entry = match entry {
                    Ok(entry) => entry,
                    Err(e) => {
                        trace!(error = %e, "Skipping unreadable entry");
                        continue;
                    }
                };
                if !entry.file_type().is_block_device() {
                    continue;
                }

                let rdev = match entry.metadata() {
                    Ok(meta) => meta.rdev(),
                    Err(e) => {
                        warn!(path = %entry.path().display(), error = %e, "Cannot stat device node");
                        continue;
                    }
                };
                found
                    .entry(entry.path().to_path_buf())
                    .or_insert_with(|| Device::new(entry.into_path()).with_devno(rdev));
            }
        }

        debug!(devices = found.len(), "Device scan complete");
        found.into_values().collect()
    }
}
