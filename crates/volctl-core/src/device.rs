//! Device types for block devices discovered under the scan directories

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Stable identity of a device, used as the persistent cache key
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DeviceId(pub String);

impl DeviceId {
    pub fn from_path(path: &Path) -> Self {
        Self(path.to_string_lossy().into_owned())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for DeviceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A raw device node found during a scan
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Device {
    /// Path of the device node (e.g. `/dev/sda1`)
    pub path: PathBuf,
    /// Device number (`st_rdev`) when known
    pub devno: Option<u64>,
}

impl Device {
    /// Create a device with only a path
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            devno: None,
        }
    }

    /// Attach a device number
    pub fn with_devno(mut self, devno: u64) -> Self {
        self.devno = Some(devno);
        self
    }

    pub fn id(&self) -> DeviceId {
        DeviceId::from_path(&self.path)
    }

    pub fn path_str(&self) -> std::borrow::Cow<'_, str> {
        self.path.to_string_lossy()
    }

    pub fn major(&self) -> Option<u32> {
        self.devno.map(major)
    }

    pub fn minor(&self) -> Option<u32> {
        self.devno.map(minor)
    }
}

/// Major number of a Linux `dev_t`
pub fn major(devno: u64) -> u32 {
    (((devno >> 8) & 0xfff) | ((devno >> 32) & !0xfff)) as u32
}

/// Minor number of a Linux `dev_t`
pub fn minor(devno: u64) -> u32 {
    ((devno & 0xff) | ((devno >> 12) & !0xff)) as u32
}
