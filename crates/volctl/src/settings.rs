//! Per-command settings resolved from the config tree

use serde::Serialize;
use std::path::PathBuf;
use volctl_core::ConfigTree;

use crate::ContextError;

const SECTOR_SIZE: u64 = 512;

/// Settings that commands may override for the duration of one run
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Settings {
    /// Device directory, always ending in `/`
    pub dev_dir: String,
    pub proc_dir: PathBuf,
    /// Whether device-mapper activation is enabled
    pub activation: bool,
    /// Print unit suffixes on sizes
    pub suffix: bool,
    /// Display unit character (`h` for human readable)
    pub unit_type: char,
    /// Bytes per display unit
    pub unit_factor: u64,
    /// Test mode: no metadata is committed
    pub test: bool,
    pub verbose: i64,
    pub debug: i64,
    pub umask: u32,
    pub msg_prefix: String,
    pub cmd_name: bool,
}

impl Settings {
    pub fn from_config(cf: &ConfigTree) -> Result<Self, ContextError> {
        let mut dev_dir = cf.find_str("devices/dir", "/dev").to_string();
        if !dev_dir.ends_with('/') {
            dev_dir.push('/');
        }

        let units = cf.find_str("global/units", "h");
        let (unit_type, unit_factor) =
            units_to_bytes(units).ok_or_else(|| ContextError::InvalidUnits(units.to_string()))?;

        Ok(Self {
            dev_dir,
            proc_dir: PathBuf::from(cf.find_str("global/proc", "/proc")),
            activation: cf.find_bool("global/activation", true),
            suffix: cf.find_bool("global/suffix", true),
            unit_type,
            unit_factor,
            test: cf.find_bool("global/test", false),
            verbose: cf.find_int("log/verbose", 0),
            debug: cf.find_int("log/level", 0),
            umask: u32::try_from(cf.find_int("global/umask", 0o077)).unwrap_or(0o077),
            msg_prefix: cf.find_str("log/prefix", "  ").to_string(),
            cmd_name: cf.find_bool("log/command_names", false),
        })
    }
}

/// Parse a units specification such as `h`, `k`, `4M` or `s`
///
/// Lower case units are powers of 1024, upper case powers of 1000.
/// `h`/`H` select human-readable output and take no multiplier.
pub fn units_to_bytes(units: &str) -> Option<(char, u64)> {
    let digits = units.bytes().take_while(u8::is_ascii_digit).count();
    let (number, rest) = units.split_at(digits);

    let mut chars = rest.chars();
    let unit = chars.next()?;
    if chars.next().is_some() {
        return None;
    }

    let multiplier: u64 = if number.is_empty() {
        1
    } else {
        match number.parse().ok()? {
            0 => return None,
            n => n,
        }
    };

    let factor = match unit {
        'h' | 'H' if number.is_empty() => 1,
        'h' | 'H' => return None,
        'b' | 'B' => 1,
        's' | 'S' => SECTOR_SIZE,
        'k' => 1 << 10,
        'm' => 1 << 20,
        'g' => 1 << 30,
        't' => 1 << 40,
        'p' => 1 << 50,
        'e' => 1 << 60,
        'K' => 1_000,
        'M' => 1_000_000,
        'G' => 1_000_000_000,
        'T' => 1_000_000_000_000,
        'P' => 1_000_000_000_000_000,
        'E' => 1_000_000_000_000_000_000,
        _ => return None,
    };

    Some((unit, multiplier.checked_mul(factor)?))
}
