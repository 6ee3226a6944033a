//! volctl Format - Volume group metadata format backends
//!
//! This crate keeps the set of on-disk metadata formats available to a
//! command and resolves which one is the default:
//! - The always-present text format (`text`, alias `lvm2`)
//! - An optional compiled-in lvm1 format (feature `legacy`)
//! - Formats loaded from shared libraries (feature `dynamic`)

#[cfg(feature = "legacy")]
pub mod legacy;
pub mod ops;
pub mod plugin;
pub mod registry;
pub mod text;

pub use ops::{FormatContext, FormatFeatures, FormatOps, VgSummary};
pub use plugin::{InitFormatFn, LibraryHandle, LoadedFormat, PluginLoader, ENTRY_SYMBOL};
#[cfg(feature = "dynamic")]
pub use plugin::DylibLoader;
pub use registry::{FormatRegistry, FormatType, RegistryBuilder, DEFAULT_FORMAT};
pub use text::TextFormat;

use std::path::PathBuf;
use thiserror::Error;
use volctl_core::ConfigError;

#[derive(Error, Debug)]
pub enum FormatError {
    #[error("Format {format} does not support {operation}")]
    Unsupported {
        format: String,
        operation: &'static str,
    },
    #[error("IO error on {path}: {source}")]
    IoError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to parse metadata in {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },
    #[error("Failed to load format library {path}: {reason}")]
    LibraryLoad { path: PathBuf, reason: String },
    #[error("Failed to close format library {path}: {reason}")]
    LibraryClose { path: PathBuf, reason: String },
    #[error("Shared library {path} does not contain format functions ({symbol})")]
    MissingEntryPoint { path: PathBuf, symbol: &'static str },
    #[error("Format library {0} failed to initialise")]
    EntryFailed(PathBuf),
    #[error("Default format ({0}) not found")]
    DefaultNotFound(String),
    #[error("Failed to destroy format {format}: {reason}")]
    Destroy { format: String, reason: String },
    #[error(transparent)]
    Config(#[from] ConfigError),
}
