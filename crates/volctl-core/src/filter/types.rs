//! Filter on the probed kind of a device

use std::collections::HashMap;
use tracing::{debug, trace};

use super::{DevFilter, FilterError};
use crate::config::{ConfigNode, ConfigValue};
use crate::device::Device;

/// Block device drivers recognised without any configuration, with the
/// maximum number of partitions each supports
pub const BUILTIN_TYPES: &[(&str, u32)] = &[
    ("ide", 64),
    ("sd", 16),
    ("md", 1),
    ("loop", 1),
    ("dasd", 4),
    ("dac960", 8),
    ("nbd", 16),
    ("ida", 16),
    ("cciss", 16),
    ("ubd", 16),
    ("ataraid", 16),
    ("drbd", 16),
    ("emcpower", 16),
    ("power2", 16),
    ("i2o_block", 16),
    ("iseries/vd", 8),
    ("gnbd", 1),
    ("ramdisk", 1),
    ("aoe", 16),
    ("device-mapper", 1),
    ("xvd", 16),
    ("vd", 16),
    ("mmc", 16),
    ("blkext", 1),
    ("fio", 16),
    ("nvme", 64),
    ("rbd", 16),
];

/// Determines the driver kind of a device node
pub trait KindProbe {
    /// Driver name for the device, or `None` if it cannot be determined
    fn kind(&self, device: &Device) -> Option<String>;
}

/// Accepts a device iff its probed kind is in the allow-set
pub struct TypeFilter {
    probe: Box<dyn KindProbe>,
    /// Kind name -> max partitions
    allowed: HashMap<String, u32>,
}

impl TypeFilter {
    /// Create a filter from the built-in kinds plus `devices/types`
    ///
    /// `devices/types` is a flat list of `name, max_partitions` pairs.
    pub fn new(probe: Box<dyn KindProbe>, extra: Option<&ConfigNode>) -> Result<Self, FilterError> {
        let mut allowed: HashMap<String, u32> = BUILTIN_TYPES
            .iter()
            .map(|(name, parts)| (name.to_string(), *parts))
            .collect();

        if let Some(node) = extra {
            for (name, parts) in parse_type_pairs(node.values())? {
                debug!(kind = %name, partitions = parts, "Adding configured device type");
                allowed.insert(name, parts);
            }
        }

        Ok(Self { probe, allowed })
    }

    pub fn allows(&self, kind: &str) -> bool {
        self.allowed.contains_key(kind)
    }

    pub fn max_partitions(&self, kind: &str) -> Option<u32> {
        self.allowed.get(kind).copied()
    }
}

fn parse_type_pairs(values: &[ConfigValue]) -> Result<Vec<(String, u32)>, FilterError> {
    if values.len() % 2 != 0 {
        return Err(FilterError::InvalidTypes(
            "expected name, partitions pairs".to_string(),
        ));
    }

    values
        .chunks(2)
        .map(|pair| {
            let name = pair[0].as_str().ok_or_else(|| {
                FilterError::InvalidTypes(format!("expected a device name, got {:?}", pair[0]))
            })?;
            let parts = pair[1]
                .as_int()
                .filter(|p| *p >= 1)
                .and_then(|p| u32::try_from(p).ok())
                .ok_or_else(|| {
                    FilterError::InvalidTypes(format!(
                        "invalid partition count for {}: {:?}",
                        name, pair[1]
                    ))
                })?;
            Ok((name.to_string(), parts))
        })
        .collect()
}

impl DevFilter for TypeFilter {
    fn passes(&mut self, device: &Device) -> bool {
        match self.probe.kind(device) {
            Some(kind) if self.allows(&kind) => true,
            Some(kind) => {
                debug!(device = %device.path.display(), kind = %kind, "Skipping: unrecognised device type");
                false
            }
            None => {
                trace!(device = %device.path.display(), "Skipping: device type unknown");
                false
            }
        }
    }
}
