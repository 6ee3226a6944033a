//! Memoizing filter backed by an on-disk verdict cache
//!
//! The first time a device is seen its verdict comes from the wrapped
//! chain; afterwards the stored verdict is returned without probing.
//! Verdicts can be dumped to a JSON cache file at teardown and loaded
//! again by the next invocation, provided the cache is newer than the
//! config that produced it.
//!
//! A filter built with [`PersistentFilter::unbound`] memoizes in memory
//! only; loading and dumping do nothing.
//!
//! No locking is done on the cache file. Concurrent invocations may race
//! on it; the last dump wins.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use thiserror::Error;
use tracing::{debug, trace};

use super::DevFilter;
use crate::device::{Device, DeviceId};

const CACHE_VERSION: &str = "1.0";

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("IO error on {path}: {source}")]
    IoError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
    #[error("Unsupported cache version {0}")]
    UnsupportedVersion(String),
}

/// On-disk layout of the cache file
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
struct CacheFile {
    version: String,
    /// When the cache was written (RFC 3339)
    #[serde(default)]
    written_at: Option<String>,
    valid_devices: BTreeSet<String>,
    invalid_devices: BTreeSet<String>,
}

pub struct PersistentFilter {
    inner: Box<dyn DevFilter>,
    cache_path: Option<PathBuf>,
    verdicts: HashMap<DeviceId, bool>,
}

impl PersistentFilter {
    /// Wrap a filter chain, binding it to a cache file path
    pub fn new(inner: Box<dyn DevFilter>, cache_path: impl Into<PathBuf>) -> Self {
        Self {
            inner,
            cache_path: Some(cache_path.into()),
            verdicts: HashMap::new(),
        }
    }

    /// Wrap a filter chain without any cache file
    pub fn unbound(inner: Box<dyn DevFilter>) -> Self {
        Self {
            inner,
            cache_path: None,
            verdicts: HashMap::new(),
        }
    }

    /// The cache file, if the filter is bound to one
    pub fn cache_path(&self) -> Option<&Path> {
        self.cache_path.as_deref()
    }

    /// Cached verdict for a device, if any
    pub fn cached(&self, id: &DeviceId) -> Option<bool> {
        self.verdicts.get(id).copied()
    }

    pub fn len(&self) -> usize {
        self.verdicts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.verdicts.is_empty()
    }

    /// Forget every cached verdict
    pub fn wipe(&mut self) {
        debug!(entries = self.verdicts.len(), "Wiping persistent filter cache");
        self.verdicts.clear();
    }

    /// Merge the cache file into the in-memory map
    ///
    /// Returns the number of entries read; always 0 when unbound.
    pub fn load(&mut self) -> Result<usize, CacheError> {
        let Some(cache_path) = &self.cache_path else {
            return Ok(0);
        };
        let content = std::fs::read_to_string(cache_path).map_err(|source| CacheError::IoError {
            path: cache_path.clone(),
            source,
        })?;
        let file: CacheFile = serde_json::from_str(&content)?;
        if file.version != CACHE_VERSION {
            return Err(CacheError::UnsupportedVersion(file.version));
        }

        let count = file.valid_devices.len() + file.invalid_devices.len();
        for path in file.valid_devices {
            self.verdicts.insert(DeviceId(path), true);
        }
        for path in file.invalid_devices {
            self.verdicts.insert(DeviceId(path), false);
        }

        debug!(path = %cache_path.display(), entries = count, "Loaded device cache");
        Ok(count)
    }

    /// Load the cache file only if it is strictly newer than `config_timestamp`
    ///
    /// Returns `Ok(None)` when unbound or when the file is missing or stale.
    pub fn load_if_newer(&mut self, config_timestamp: SystemTime) -> Result<Option<usize>, CacheError> {
        let Some(cache_path) = &self.cache_path else {
            return Ok(None);
        };
        let Ok(mtime) = std::fs::metadata(cache_path).and_then(|m| m.modified()) else {
            trace!(path = %cache_path.display(), "No device cache file");
            return Ok(None);
        };

        if mtime <= config_timestamp {
            debug!(path = %cache_path.display(), "Device cache is older than config, ignoring");
            return Ok(None);
        }

        self.load().map(Some)
    }

    /// Write every cached verdict to the cache file, replacing its contents
    ///
    /// Returns whether anything was written; an unbound filter writes
    /// nothing.
    pub fn dump(&self) -> Result<bool, CacheError> {
        let Some(cache_path) = &self.cache_path else {
            trace!("Device cache not bound to a file, not dumping");
            return Ok(false);
        };
        let mut file = CacheFile {
            version: CACHE_VERSION.to_string(),
            written_at: Some(chrono::Utc::now().to_rfc3339()),
            ..Default::default()
        };
        for (id, &verdict) in &self.verdicts {
            if verdict {
                file.valid_devices.insert(id.0.clone());
            } else {
                file.invalid_devices.insert(id.0.clone());
            }
        }

        let content = serde_json::to_string_pretty(&file)?;
        let io_err = |source| CacheError::IoError {
            path: cache_path.clone(),
            source,
        };
        if let Some(parent) = cache_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(io_err)?;
        }
        std::fs::write(cache_path, content).map_err(io_err)?;

        debug!(path = %cache_path.display(), entries = self.verdicts.len(), "Dumped device cache");
        Ok(true)
    }
}

impl DevFilter for PersistentFilter {
    fn passes(&mut self, device: &Device) -> bool {
        let id = device.id();
        if let Some(&verdict) = self.verdicts.get(&id) {
            trace!(device = %id, verdict, "Cached filter verdict");
            return verdict;
        }

        let verdict = self.inner.passes(device);
        self.verdicts.insert(id, verdict);
        verdict
    }
}
