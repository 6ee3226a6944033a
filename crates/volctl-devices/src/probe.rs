//! Device kind probing from `/proc/devices`

use std::collections::HashMap;
use std::os::unix::fs::MetadataExt;
use std::path::Path;
use tracing::{debug, trace};
use volctl_core::{Device, KindProbe};

use crate::DeviceCacheError;

/// Maps block device major numbers to their driver names
#[derive(Debug, Clone, Default)]
pub struct ProcDevicesProbe {
    majors: HashMap<u32, String>,
}

impl ProcDevicesProbe {
    /// Read `<proc_dir>/devices`
    pub fn from_proc_dir(proc_dir: &Path) -> Result<Self, DeviceCacheError> {
        let path = proc_dir.join("devices");
        let content = std::fs::read_to_string(&path).map_err(|source| DeviceCacheError::IoError {
            path: path.clone(),
            source,
        })?;
        let probe = Self::parse(&content);
        debug!(path = %path.display(), drivers = probe.majors.len(), "Read block device drivers");
        Ok(probe)
    }

    /// Parse the contents of `/proc/devices`
    ///
    /// Only the `Block devices:` section is used; character devices share
    /// major numbers with unrelated drivers.
    pub fn parse(content: &str) -> Self {
        let mut majors = HashMap::new();
        let mut in_block = false;

        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            if line.ends_with(':') {
                in_block = line.eq_ignore_ascii_case("block devices:");
                continue;
            }
            if !in_block {
                continue;
            }
            if let Some((major, name)) = parse_devices_line(line) {
                majors.insert(major, name);
            }
        }

        Self { majors }
    }

    pub fn driver(&self, major: u32) -> Option<&str> {
        self.majors.get(&major).map(String::as_str)
    }
}

/// Parse a line like `  8 sd`
fn parse_devices_line(line: &str) -> Option<(u32, String)> {
    let (major, name) = line.split_once(char::is_whitespace)?;
    let major = major.parse().ok()?;
    let name = name.trim();
    if name.is_empty() {
        return None;
    }
    Some((major, name.to_string()))
}

/// Read `st_rdev` for a device node
pub fn device_number(path: &Path) -> Option<u64> {
    std::fs::metadata(path).ok().map(|m| m.rdev()).filter(|rdev| *rdev != 0)
}

impl KindProbe for ProcDevicesProbe {
    fn kind(&self, device: &Device) -> Option<String> {
        let devno = device.devno.or_else(|| device_number(&device.path))?;
        let major = volctl_core::device::major(devno);
        let kind = self.driver(major).map(str::to_string);
        trace!(device = %device.path.display(), major, kind = ?kind, "Probed device kind");
        kind
    }
}
