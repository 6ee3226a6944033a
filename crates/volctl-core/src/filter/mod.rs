//! Device filter pipeline
//!
//! A filter decides whether a raw device node is a candidate for
//! scanning. The pipeline is assembled from config as:
//!
//! - [`TypeFilter`] on the device's probed kind (always present)
//! - [`RegexFilter`] on the device path (only with `devices/filter`)
//! - [`CompositeFilter`] joining the two with short-circuit AND
//! - [`PersistentFilter`] memoizing the whole chain across invocations

pub mod composite;
pub mod persistent;
pub mod pattern;
pub mod types;

pub use composite::CompositeFilter;
pub use persistent::{CacheError, PersistentFilter};
pub use pattern::{RegexFilter, Sign};
pub use types::{KindProbe, TypeFilter, BUILTIN_TYPES};

use thiserror::Error;
use tracing::{debug, error};

use crate::config::{ConfigError, ConfigTree};
use crate::device::Device;

#[derive(Error, Debug)]
pub enum FilterError {
    #[error("Invalid device type list in devices/types: {0}")]
    InvalidTypes(String),
    #[error("Invalid filter pattern {pattern:?}: {reason}")]
    InvalidPattern { pattern: String, reason: String },
    #[error("Invalid devices/filter_default {0:?}: expected \"accept\" or \"reject\"")]
    InvalidDefault(String),
    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// A predicate over devices
pub trait DevFilter {
    /// Whether the device should be included in the scan
    fn passes(&mut self, device: &Device) -> bool;
}

impl<F: DevFilter + ?Sized> DevFilter for Box<F> {
    fn passes(&mut self, device: &Device) -> bool {
        (**self).passes(device)
    }
}

/// Build the type [+ regex] chain from config
///
/// The returned chain is not yet memoized; callers wrap it in a
/// [`PersistentFilter`].
pub fn build_chain(
    cf: &ConfigTree,
    probe: Box<dyn KindProbe>,
) -> Result<Box<dyn DevFilter>, FilterError> {
    let types = TypeFilter::new(probe, cf.find_node("devices/types").as_ref())?;

    let Some(patterns) = cf.find_node("devices/filter") else {
        debug!("devices/filter not found in config file: no regex filter installed");
        return Ok(Box::new(types));
    };

    let default = Sign::from_config(cf.find_str("devices/filter_default", "accept"))?;
    let regex = RegexFilter::from_config(&patterns, default).map_err(|e| {
        error!(error = %e, "Failed to create regex device filter");
        e
    })?;

    Ok(Box::new(CompositeFilter::new(vec![
        Box::new(regex),
        Box::new(types),
    ])))
}


#[cfg(test)]
mod tests {
    use super::testing::PathProbe;
    use super::*;

    fn probe() -> Box<dyn KindProbe> {
        Box::new(PathProbe(vec![("sd", "sd"), ("loop", "loop"), ("fd", "fd")]))
    }

    #[test]
    fn test_chain_without_regex() {
        let cf = ConfigTree::new();
        let mut chain = build_chain(&cf, probe()).unwrap();

        assert!(chain.passes(&Device::new("/dev/sda1")));
        assert!(chain.passes(&Device::new("/dev/loop0")));
        // fd is not a built-in type
        assert!(!chain.passes(&Device::new("/dev/fd0")));
    }

    #[test]
    fn test_chain_with_regex_and_types() {
        let cf = ConfigTree::from_toml(
            r#"
[devices]
types = ["fd", 1]
filter = ["r|^/dev/loop|", "a|.*|"]
"#,
        )
        .unwrap();
        let mut chain = build_chain(&cf, probe()).unwrap();

        assert!(chain.passes(&Device::new("/dev/sda1")));
        assert!(chain.passes(&Device::new("/dev/fd0")));
        assert!(!chain.passes(&Device::new("/dev/loop0")));
    }

    #[test]
    fn test_chain_rejects_malformed_filter() {
        let cf = ConfigTree::from_toml("[devices]\nfilter = [\"x|sda|\"]\n").unwrap();
        assert!(matches!(
            build_chain(&cf, probe()),
            Err(FilterError::InvalidPattern { .. })
        ));

        let cf = ConfigTree::from_toml("[devices]\nfilter = [1]\n").unwrap();
        assert!(build_chain(&cf, probe()).is_err());
    }

    #[test]
    fn test_chain_rejects_malformed_types() {
        let cf = ConfigTree::from_toml("[devices]\ntypes = [\"fd\"]\n").unwrap();
        assert!(matches!(
            build_chain(&cf, probe()),
            Err(FilterError::InvalidTypes(_))
        ));
    }

    #[test]
    fn test_chain_filter_default() {
        let cf = ConfigTree::from_toml(
            "[devices]\nfilter = [\"a|^/dev/sd|\"]\nfilter_default = \"reject\"\n",
        )
        .unwrap();
        let mut chain = build_chain(&cf, probe()).unwrap();
        assert!(chain.passes(&Device::new("/dev/sda")));
        assert!(!chain.passes(&Device::new("/dev/loop1")));

        let cf = ConfigTree::from_toml(
            "[devices]\nfilter = [\"a|^/dev/sd|\"]\nfilter_default = \"maybe\"\n",
        )
        .unwrap();
        assert!(matches!(
            build_chain(&cf, probe()),
            Err(FilterError::InvalidDefault(_))
        ));
    }
}
