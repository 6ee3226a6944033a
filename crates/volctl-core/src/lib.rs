//! volctl Core - Config tree, device types, and device filtering
//!
//! This crate provides the pieces every volctl command shares:
//! - Config tree lookup over `lvm.conf`
//! - Device identity types for scanned block devices
//! - The device filter pipeline (type, regex, composite, persistent)

pub mod config;
pub mod device;
pub mod filter;

pub use config::{ConfigError, ConfigNode, ConfigTree, ConfigValue};
pub use device::{Device, DeviceId};
pub use filter::{
    build_chain, CacheError, CompositeFilter, DevFilter, FilterError, KindProbe,
    PersistentFilter, RegexFilter, Sign, TypeFilter,
};
