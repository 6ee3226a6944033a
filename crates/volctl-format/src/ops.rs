//! The operation table every metadata format backend implements

use serde::{Deserialize, Serialize};
use std::path::Path;
use volctl_core::ConfigTree;

use crate::FormatError;

/// What a backend is able to do
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FormatFeatures {
    pub create: bool,
    pub read: bool,
    pub write: bool,
}

impl FormatFeatures {
    pub const ALL: Self = Self {
        create: true,
        read: true,
        write: true,
    };

    pub const NONE: Self = Self {
        create: false,
        read: false,
        write: false,
    };
}

/// The parts of the command context handed to backends at creation
#[derive(Debug, Clone, Copy)]
pub struct FormatContext<'a> {
    pub config: &'a ConfigTree,
    pub system_dir: &'a Path,
}

/// Volume group metadata exchanged with a backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VgSummary {
    pub name: String,
    /// Volume group UUID
    pub id: String,
    /// Metadata sequence number, bumped on every commit
    pub seqno: u32,
    /// Extent size in 512-byte sectors
    pub extent_size: u64,
    /// Device paths of the physical volumes
    #[serde(default)]
    pub physical_volumes: Vec<String>,
}

impl VgSummary {
    pub fn new(name: &str, extent_size: u64) -> Self {
        Self {
            name: name.to_string(),
            id: uuid::Uuid::new_v4().to_string(),
            seqno: 1,
            extent_size,
            physical_volumes: Vec::new(),
        }
    }
}

/// Metadata format backend
///
/// Unsupported operations report [`FormatError::Unsupported`]. `destroy`
/// is called exactly once, at registry teardown, before any library the
/// backend came from is closed.
pub trait FormatOps {
    fn name(&self) -> &str;

    fn alias(&self) -> Option<&str> {
        None
    }

    fn features(&self) -> FormatFeatures;

    fn vg_read(&self, _path: &Path) -> Result<VgSummary, FormatError> {
        Err(FormatError::Unsupported {
            format: self.name().to_string(),
            operation: "read",
        })
    }

    fn vg_write(&self, _path: &Path, _vg: &VgSummary) -> Result<(), FormatError> {
        Err(FormatError::Unsupported {
            format: self.name().to_string(),
            operation: "write",
        })
    }

    fn destroy(&mut self) -> Result<(), FormatError> {
        Ok(())
    }
}
