//! volctl - Command context for volume management tools
//!
//! A [`CommandContext`] owns everything one command invocation needs:
//! the config tree, resolved settings, the device cache, the root device
//! filter, a memory pool and the metadata format registry. It is built
//! in one go by [`ContextBuilder`] and released in a fixed order when
//! dropped.

pub mod context;
pub mod logging;
pub mod pool;
pub mod settings;

pub use context::{CommandContext, ContextBuilder, LogInit, DEFAULT_SYSTEM_DIR, SYSTEM_DIR_ENV};
pub use logging::LogOptions;
pub use pool::{MemPool, PoolError};
pub use settings::{units_to_bytes, Settings};

use std::path::PathBuf;
use thiserror::Error;
use volctl_core::{ConfigError, FilterError};
use volctl_devices::DeviceCacheError;
use volctl_format::FormatError;

#[derive(Error, Debug)]
pub enum ContextError {
    #[error("Failed to create system directory {path}: {source}")]
    SystemDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Invalid units specification: {0:?}")]
    InvalidUnits(String),
    #[error("Failed to add device directory {path}: {source}")]
    DeviceDir {
        path: PathBuf,
        #[source]
        source: DeviceCacheError,
    },
    #[error("Failed to probe device types: {0}")]
    Probe(#[source] DeviceCacheError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Filter(#[from] FilterError),
    #[error(transparent)]
    Pool(#[from] PoolError),
    #[error(transparent)]
    Format(#[from] FormatError),
}
