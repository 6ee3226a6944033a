//! volctl Devices - Block device enumeration
//!
//! This crate provides:
//! - The device cache: scan directories and the block device nodes under them
//! - Device kind probing via the block driver table in `/proc/devices`

pub mod cache;
pub mod probe;

pub use cache::DeviceCache;
pub use probe::{device_number, ProcDevicesProbe};

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DeviceCacheError {
    #[error("IO error on {path}: {source}")]
    IoError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Not a directory: {0}")]
    NotADirectory(PathBuf),
}
