//! Logging setup driven by the command line and the `log` config section

use std::fs::OpenOptions;
use std::sync::Mutex;
use tracing::subscriber::DefaultGuard;
use tracing::{error, info, Level};
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::FmtSubscriber;
use volctl_core::ConfigTree;

/// Logging options from the command line
#[derive(Debug, Clone, Default)]
pub struct LogOptions {
    /// Explicit level (trace, debug, info, warn, error)
    pub level: Option<String>,
    /// Number of `-v` flags
    pub verbosity: u8,
}

/// Pick the max level: explicit level, else the larger of `-v` count and
/// `log/verbose`
pub fn resolve_level(cf: &ConfigTree, opts: &LogOptions) -> Level {
    if let Some(level) = &opts.level {
        return match level.to_lowercase().as_str() {
            "trace" => Level::TRACE,
            "debug" => Level::DEBUG,
            "info" => Level::INFO,
            "warn" => Level::WARN,
            "error" => Level::ERROR,
            _ => Level::INFO,
        };
    }

    let verbose = i64::from(opts.verbosity).max(cf.find_int("log/verbose", 0));
    match verbose {
        i64::MIN..=0 => Level::WARN,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    }
}

/// Install the subscriber for the lifetime of the returned guard
///
/// Output goes to `log/file` when it is set and can be opened (truncated
/// first if `log/overwrite` is set), otherwise to stderr.
pub fn install(cf: &ConfigTree, opts: &LogOptions) -> DefaultGuard {
    let level = resolve_level(cf, opts);
    let log_file = cf.find_str("log/file", "");
    let overwrite = cf.find_bool("log/overwrite", false);

    let mut open_error = None;
    let mut to_file = false;
    let writer = if log_file.is_empty() {
        BoxMakeWriter::new(std::io::stderr)
    } else {
        match OpenOptions::new()
            .create(true)
            .append(!overwrite)
            .write(true)
            .truncate(overwrite)
            .open(log_file)
        {
            Ok(file) => {
                to_file = true;
                BoxMakeWriter::new(Mutex::new(file))
            }
            Err(e) => {
                open_error = Some(e);
                BoxMakeWriter::new(std::io::stderr)
            }
        }
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(true)
        .with_ansi(!to_file)
        .with_writer(writer)
        .finish();
    let guard = tracing::subscriber::set_default(subscriber);

    if let Some(e) = open_error {
        error!(path = %log_file, error = %e, "Couldn't open log file");
    }
    info!("Logging initialised at {}", chrono::Local::now().to_rfc2822());

    guard
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_resolve_level() {
        let cf = ConfigTree::new();
        assert_eq!(resolve_level(&cf, &LogOptions::default()), Level::WARN);

        let opts = LogOptions {
            level: Some("DEBUG".to_string()),
            verbosity: 0,
        };
        assert_eq!(resolve_level(&cf, &opts), Level::DEBUG);

        let opts = LogOptions {
            level: None,
            verbosity: 3,
        };
        assert_eq!(resolve_level(&cf, &opts), Level::TRACE);

        let cf = ConfigTree::from_toml("[log]\nverbose = 1\n").unwrap();
        assert_eq!(resolve_level(&cf, &LogOptions::default()), Level::INFO);
    }

    #[test]
    fn test_log_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("volctl.log");
        let cf = ConfigTree::from_toml(&format!(
            "[log]\nfile = {:?}\nverbose = 1\n",
            path.display().to_string()
        ))
        .unwrap();

        let guard = install(&cf, &LogOptions::default());
        info!("hello from the test");
        drop(guard);

        let written = std::fs::read_to_string(&path).unwrap();
        assert!(written.contains("Logging initialised"));
        assert!(written.contains("hello from the test"));
        // No terminal colour codes in the file
        assert!(!written.contains('\u{1b}'));
    }
}
