//! Config tree lookup over the TOML config file
//!
//! Values are addressed by `/`-separated paths such as `devices/filter`.
//! Scalars are exposed as single-element nodes so that list-valued and
//! scalar keys can be walked the same way.

use std::path::{Path, PathBuf};
use std::time::SystemTime;
use thiserror::Error;
use tracing::debug;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    IoError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to parse config file {path}: {source}")]
    ParseError {
        path: String,
        #[source]
        source: toml::de::Error,
    },
    #[error("Invalid value in config file: {0}")]
    InvalidValue(String),
}

/// A single typed value from the config tree
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigValue {
    Str(String),
    Int(i64),
    Float(f64),
    /// Tables, datetimes and nested arrays; carries the TOML type name
    Other(&'static str),
}

impl ConfigValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(i) => Some(*i),
            _ => None,
        }
    }

    fn from_toml(value: &toml::Value) -> Self {
        match value {
            toml::Value::String(s) => Self::Str(s.clone()),
            toml::Value::Integer(i) => Self::Int(*i),
            toml::Value::Boolean(b) => Self::Int(i64::from(*b)),
            toml::Value::Float(f) => Self::Float(*f),
            other => Self::Other(other.type_str()),
        }
    }
}

/// The ordered values stored under one config path
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigNode {
    path: String,
    values: Vec<ConfigValue>,
}

impl ConfigNode {
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn values(&self) -> &[ConfigValue] {
        &self.values
    }

    /// Collect every value as a string, failing on the first non-string
    pub fn strings(&self) -> Result<Vec<&str>, ConfigError> {
        self.values
            .iter()
            .map(|v| {
                v.as_str()
                    .ok_or_else(|| ConfigError::InvalidValue(self.path.clone()))
            })
            .collect()
    }
}

/// Parsed configuration with the timestamp of the file it came from
#[derive(Debug, Clone)]
pub struct ConfigTree {
    root: toml::Table,
    path: Option<PathBuf>,
    timestamp: SystemTime,
}

impl Default for ConfigTree {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigTree {
    /// Create an empty tree; every lookup falls back to its default
    pub fn new() -> Self {
        Self {
            root: toml::Table::new(),
            path: None,
            timestamp: SystemTime::UNIX_EPOCH,
        }
    }

    /// Load a config file, recording its modification time
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let io_err = |source| ConfigError::IoError {
            path: path.to_path_buf(),
            source,
        };
        let timestamp = std::fs::metadata(path)
            .and_then(|m| m.modified())
            .map_err(io_err)?;
        let content = std::fs::read_to_string(path).map_err(io_err)?;
        let root = content
            .parse::<toml::Table>()
            .map_err(|source| ConfigError::ParseError {
                path: path.display().to_string(),
                source,
            })?;

        debug!(path = %path.display(), "Loaded config file");

        Ok(Self {
            root,
            path: Some(path.to_path_buf()),
            timestamp,
        })
    }

    /// Parse config from a TOML string (timestamp is the epoch)
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let root = content
            .parse::<toml::Table>()
            .map_err(|source| ConfigError::ParseError {
                path: "<string>".to_string(),
                source,
            })?;
        Ok(Self {
            root,
            path: None,
            timestamp: SystemTime::UNIX_EPOCH,
        })
    }

    /// Override the recorded load timestamp
    pub fn with_timestamp(mut self, timestamp: SystemTime) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Modification time of the config file when it was loaded
    pub fn timestamp(&self) -> SystemTime {
        self.timestamp
    }

    /// Path of the backing file, if any
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn lookup(&self, path: &str) -> Option<&toml::Value> {
        let mut parts = path.split('/').filter(|p| !p.is_empty());
        let first = parts.next()?;
        let mut current = self.root.get(first)?;
        for part in parts {
            current = current.as_table()?.get(part)?;
        }
        Some(current)
    }

    /// Find the node stored under `path`
    pub fn find_node(&self, path: &str) -> Option<ConfigNode> {
        let values = match self.lookup(path)? {
            toml::Value::Table(_) => return None,
            toml::Value::Array(items) => items.iter().map(ConfigValue::from_toml).collect(),
            scalar => vec![ConfigValue::from_toml(scalar)],
        };
        Some(ConfigNode {
            path: path.to_string(),
            values,
        })
    }

    pub fn find_str<'a>(&'a self, path: &str, default: &'a str) -> &'a str {
        match self.lookup(path) {
            Some(toml::Value::String(s)) => s,
            _ => default,
        }
    }

    pub fn find_int(&self, path: &str, default: i64) -> i64 {
        match self.lookup(path) {
            Some(toml::Value::Integer(i)) => *i,
            Some(toml::Value::Boolean(b)) => i64::from(*b),
            _ => default,
        }
    }

    pub fn find_bool(&self, path: &str, default: bool) -> bool {
        self.find_int(path, i64::from(default)) != 0
    }
}
