//! Command context construction and teardown
//!
//! [`ContextBuilder::build`] runs the setup steps in order: system
//! directory, config, logging, settings, device cache, filters, memory
//! pool, formats. A failing step returns early and everything built by
//! the earlier steps is dropped on the way out, so no half-built context
//! is ever visible and nothing is released twice.
//!
//! On drop a [`CommandContext`] first dumps the persistent filter cache
//! (when enabled), then releases the format registry, filter chain,
//! memory pool, device cache and config, in that order.

use std::path::{Path, PathBuf};
use tracing::subscriber::DefaultGuard;
use tracing::{debug, error, info, warn};
use volctl_core::{build_chain, CacheError, ConfigTree, DevFilter, Device, KindProbe, PersistentFilter};
use volctl_devices::{DeviceCache, ProcDevicesProbe};
use volctl_format::{FormatContext, FormatOps, FormatRegistry, FormatType, PluginLoader, RegistryBuilder};

use crate::pool::MemPool;
use crate::settings::Settings;
use crate::ContextError;

/// Environment variable overriding the system directory
pub const SYSTEM_DIR_ENV: &str = "LVM_SYSTEM_DIR";
pub const DEFAULT_SYSTEM_DIR: &str = "/etc/lvm";

const CONFIG_FILE: &str = "lvm.conf";
const CACHE_FILE: &str = ".cache";
const POOL_CHUNK_SIZE: usize = 4 * 1024;

/// Installs logging once the config is known
///
/// The returned guard is kept by the context, so logging stays set up
/// exactly as long as the context lives.
pub type LogInit = Box<dyn FnOnce(&ConfigTree) -> Option<DefaultGuard>>;

enum Loader {
    Platform,
    Custom(Box<dyn PluginLoader>),
    Disabled,
}

pub struct ContextBuilder {
    system_dir: PathBuf,
    probe: Option<Box<dyn KindProbe>>,
    statics: Vec<Box<dyn FormatOps>>,
    loader: Loader,
    log_init: Option<LogInit>,
}

impl Default for ContextBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ContextBuilder {
    /// Builder using `$LVM_SYSTEM_DIR`, falling back to `/etc/lvm`
    pub fn new() -> Self {
        let system_dir = std::env::var_os(SYSTEM_DIR_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_SYSTEM_DIR));

        Self {
            system_dir,
            probe: None,
            statics: Vec::new(),
            loader: Loader::Platform,
            log_init: None,
        }
    }

    /// Use this system directory; an empty path disables it
    pub fn system_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.system_dir = dir.into();
        self
    }

    /// Probe device kinds with this instead of `<proc>/devices`
    pub fn with_probe(mut self, probe: Box<dyn KindProbe>) -> Self {
        self.probe = Some(probe);
        self
    }

    /// Register an extra compiled-in format ahead of plugins
    pub fn with_format(mut self, ops: Box<dyn FormatOps>) -> Self {
        self.statics.push(ops);
        self
    }

    pub fn with_loader(mut self, loader: Box<dyn PluginLoader>) -> Self {
        self.loader = Loader::Custom(loader);
        self
    }

    /// Never load format libraries
    pub fn without_loader(mut self) -> Self {
        self.loader = Loader::Disabled;
        self
    }

    pub fn with_log_init(mut self, init: LogInit) -> Self {
        self.log_init = Some(init);
        self
    }

    pub fn build(self) -> Result<CommandContext, ContextError> {
        let Self {
            system_dir,
            probe,
            statics,
            loader,
            log_init,
        } = self;

        if !system_dir.as_os_str().is_empty() {
            std::fs::create_dir_all(&system_dir).map_err(|source| {
                error!(path = %system_dir.display(), error = %source, "Failed to create system directory");
                ContextError::SystemDir {
                    path: system_dir.clone(),
                    source,
                }
            })?;
        }

        let config = load_config(&system_dir)?;
        let log_guard = log_init.and_then(|init| init(&config));
        info!(
            system_dir = %system_dir.display(),
            config = ?config.path(),
            "Creating command context"
        );

        let settings = Settings::from_config(&config)?;
        let dev_cache = init_dev_cache(&config, &settings)?;

        let probe: Box<dyn KindProbe> = match probe {
            Some(probe) => probe,
            None => Box::new(
                ProcDevicesProbe::from_proc_dir(&settings.proc_dir).map_err(ContextError::Probe)?,
            ),
        };
        let filter = init_filters(&config, &system_dir, probe)?;
        let dump_filter =
            config.find_bool("devices/write_cache_state", true) && !system_dir.as_os_str().is_empty();

        let pool = MemPool::create(POOL_CHUNK_SIZE)?;

        let formats = init_formats(&config, &system_dir, statics, loader)?;

        Ok(CommandContext {
            formats,
            filter,
            pool,
            dev_cache,
            config,
            current_settings: settings.clone(),
            default_settings: settings,
            dump_filter,
            system_dir,
            _log_guard: log_guard,
        })
    }
}

fn load_config(system_dir: &Path) -> Result<ConfigTree, ContextError> {
    if system_dir.as_os_str().is_empty() {
        debug!("No system directory: using built-in defaults");
        return Ok(ConfigTree::new());
    }

    let path = system_dir.join(CONFIG_FILE);
    if !path.exists() {
        debug!(path = %path.display(), "No config file: using built-in defaults");
        return Ok(ConfigTree::new());
    }

    ConfigTree::from_file(&path).map_err(|e| {
        error!(path = %path.display(), error = %e, "Failed to load config file");
        ContextError::Config(e)
    })
}

/// Add the scan directories; only the first one is required to exist
fn init_dev_cache(cf: &ConfigTree, settings: &Settings) -> Result<DeviceCache, ContextError> {
    let mut cache = DeviceCache::new();

    let Some(node) = cf.find_node("devices/scan") else {
        add_required_dir(&mut cache, &settings.dev_dir)?;
        return Ok(cache);
    };

    let dirs = node.strings().map_err(|e| {
        error!("Invalid string in config file: devices/scan");
        ContextError::Config(e)
    })?;

    let mut dirs = dirs.into_iter();
    if let Some(first) = dirs.next() {
        add_required_dir(&mut cache, first)?;
    }
    for dir in dirs {
        if let Err(e) = cache.add_dir(dir) {
            warn!(path = %dir, error = %e, "Skipping device directory");
        }
    }

    Ok(cache)
}

fn add_required_dir(cache: &mut DeviceCache, dir: &str) -> Result<(), ContextError> {
    cache.add_dir(dir).map_err(|source| {
        error!(path = %dir, error = %source, "Failed to add device directory to internal device cache");
        ContextError::DeviceDir {
            path: PathBuf::from(dir),
            source,
        }
    })
}

fn init_filters(
    cf: &ConfigTree,
    system_dir: &Path,
    probe: Box<dyn KindProbe>,
) -> Result<PersistentFilter, ContextError> {
    let chain = build_chain(cf, probe)?;

    let configured = cf.find_str("devices/cache", "");
    if configured.is_empty() && system_dir.as_os_str().is_empty() {
        debug!("No system directory: device cache is in memory only");
        return Ok(PersistentFilter::unbound(chain));
    }

    let cache_path = if configured.is_empty() {
        system_dir.join(CACHE_FILE)
    } else {
        PathBuf::from(configured)
    };
    let mut filter = PersistentFilter::new(chain, &cache_path);

    // A bad cache only costs a cold start
    match filter.load_if_newer(cf.timestamp()) {
        Ok(Some(entries)) => debug!(entries, "Using cached device filter verdicts"),
        Ok(None) => {}
        Err(e) => info!(
            path = %cache_path.display(),
            error = %e,
            "Failed to load existing device cache"
        ),
    }

    Ok(filter)
}

fn init_formats(
    cf: &ConfigTree,
    system_dir: &Path,
    statics: Vec<Box<dyn FormatOps>>,
    loader: Loader,
) -> Result<FormatRegistry, ContextError> {
    let ctx = FormatContext {
        config: cf,
        system_dir,
    };

    let builder = statics
        .into_iter()
        .fold(RegistryBuilder::new(ctx), RegistryBuilder::with_static);
    let builder = match loader {
        Loader::Platform => builder,
        Loader::Custom(loader) => builder.with_loader(loader),
        Loader::Disabled => builder.without_loader(),
    };

    Ok(builder.build()?)
}

/// Everything one command invocation works with
///
/// Fields are declared in release order.
pub struct CommandContext {
    formats: FormatRegistry,
    filter: PersistentFilter,
    pool: MemPool,
    dev_cache: DeviceCache,
    config: ConfigTree,
    default_settings: Settings,
    current_settings: Settings,
    dump_filter: bool,
    system_dir: PathBuf,
    _log_guard: Option<DefaultGuard>,
}

impl CommandContext {
    pub fn builder() -> ContextBuilder {
        ContextBuilder::new()
    }

    pub fn config(&self) -> &ConfigTree {
        &self.config
    }

    /// The system directory; empty when disabled
    pub fn system_dir(&self) -> &Path {
        &self.system_dir
    }

    pub fn default_settings(&self) -> &Settings {
        &self.default_settings
    }

    pub fn current_settings(&self) -> &Settings {
        &self.current_settings
    }

    /// Settings overrides for this command only
    pub fn current_settings_mut(&mut self) -> &mut Settings {
        &mut self.current_settings
    }

    pub fn dev_cache(&self) -> &DeviceCache {
        &self.dev_cache
    }

    /// The root device filter
    pub fn filter(&self) -> &PersistentFilter {
        &self.filter
    }

    pub fn filter_mut(&mut self) -> &mut PersistentFilter {
        &mut self.filter
    }

    pub fn pool(&self) -> &MemPool {
        &self.pool
    }

    pub fn pool_mut(&mut self) -> &mut MemPool {
        &mut self.pool
    }

    pub fn formats(&self) -> &FormatRegistry {
        &self.formats
    }

    pub fn default_format(&self) -> &FormatType {
        self.formats.default_format()
    }

    pub fn backup_format(&self) -> &FormatType {
        self.formats.backup_format()
    }

    /// Whether filter verdicts are written back at teardown
    pub fn dump_filter(&self) -> bool {
        self.dump_filter
    }

    /// Devices under the scan directories that pass the root filter
    pub fn scan_devices(&mut self) -> Vec<Device> {
        let filter = &mut self.filter;
        self.dev_cache
            .scan()
            .into_iter()
            .filter(|dev| filter.passes(dev))
            .collect()
    }

    /// Forget every cached verdict and write the empty cache back
    ///
    /// Returns whether a cache file was written. Nothing is written when
    /// the filter has no cache file, i.e. no system directory and no
    /// `devices/cache`.
    pub fn wipe_cache(&mut self) -> Result<bool, CacheError> {
        self.filter.wipe();
        self.filter.dump()
    }

    /// Dump the filter cache if enabled; later calls do nothing
    fn persist_filter(&mut self) {
        if !std::mem::take(&mut self.dump_filter) {
            return;
        }
        if let Err(e) = self.filter.dump() {
            warn!(error = %e, "Failed to dump device cache");
        }
    }
}

impl Drop for CommandContext {
    fn drop(&mut self) {
        self.persist_filter();
        debug!("Destroying command context");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::fs::File;
    use std::rc::Rc;
    use std::time::{Duration, SystemTime};
    use tempfile::TempDir;
    use volctl_format::{FormatError, FormatFeatures, LoadedFormat};

    #[derive(Clone, Default)]
    struct Counters {
        probes: Rc<Cell<usize>>,
        probe_drops: Rc<Cell<usize>>,
        destroys: Rc<Cell<usize>>,
        loads: Rc<Cell<usize>>,
    }

    fn bump(counter: &Rc<Cell<usize>>) {
        counter.set(counter.get() + 1);
    }

    /// Reports every device as a SCSI disk
    struct DiskProbe(Counters);

    impl KindProbe for DiskProbe {
        fn kind(&self, _device: &Device) -> Option<String> {
            bump(&self.0.probes);
            Some("sd".to_string())
        }
    }

    impl Drop for DiskProbe {
        fn drop(&mut self) {
            bump(&self.0.probe_drops);
        }
    }

    struct CountingFormat(Counters);

    impl FormatOps for CountingFormat {
        fn name(&self) -> &str {
            "counting"
        }

        fn features(&self) -> FormatFeatures {
            FormatFeatures::NONE
        }

        fn destroy(&mut self) -> Result<(), FormatError> {
            bump(&self.0.destroys);
            Ok(())
        }
    }

    struct RefusingLoader(Counters);

    impl PluginLoader for RefusingLoader {
        fn load(&self, path: &str, _ctx: &FormatContext<'_>) -> Result<LoadedFormat, FormatError> {
            bump(&self.0.loads);
            Err(FormatError::EntryFailed(PathBuf::from(path)))
        }
    }

    struct Fixture {
        temp_dir: TempDir,
        counters: Counters,
    }

    impl Fixture {
        /// System dir with a config file whose scan dir exists
        fn new(extra: &str) -> Self {
            let temp_dir = TempDir::new().unwrap();
            let dev = temp_dir.path().join("dev");
            std::fs::create_dir(&dev).unwrap();

            let content = format!(
                "[devices]\ndir = {:?}\n{}",
                dev.display().to_string(),
                extra
            );
            std::fs::write(temp_dir.path().join(CONFIG_FILE), content).unwrap();

            Self {
                temp_dir,
                counters: Counters::default(),
            }
        }

        fn path(&self) -> &Path {
            self.temp_dir.path()
        }

        fn builder(&self) -> ContextBuilder {
            ContextBuilder::new()
                .system_dir(self.path())
                .with_probe(Box::new(DiskProbe(self.counters.clone())))
                .with_format(Box::new(CountingFormat(self.counters.clone())))
                .with_loader(Box::new(RefusingLoader(self.counters.clone())))
        }

        fn set_config_mtime(&self, mtime: SystemTime) {
            File::options()
                .write(true)
                .open(self.path().join(CONFIG_FILE))
                .unwrap()
                .set_modified(mtime)
                .unwrap();
        }
    }

    const PATHS: &[&str] = &["/dev/sda", "/dev/sdb", "/dev/sdc1"];

    #[test]
    fn test_build_defaults() {
        let fixture = Fixture::new("");
        let ctx = fixture.builder().build().unwrap();

        assert_eq!(ctx.default_format().name(), "text");
        assert_eq!(ctx.backup_format().name(), "text");
        // counting + text, plus lvm1 when compiled in
        let compiled_in = usize::from(cfg!(feature = "legacy"));
        assert_eq!(ctx.formats().len(), 2 + compiled_in);
        assert!(ctx.dump_filter());
        assert_eq!(
            ctx.filter().cache_path(),
            Some(fixture.path().join(CACHE_FILE).as_path())
        );
        assert_eq!(ctx.dev_cache().dirs().len(), 1);
        assert_eq!(ctx.default_settings(), ctx.current_settings());
    }

    #[test]
    fn test_format_failure_unwinds() {
        let fixture = Fixture::new("[global]\nformat = \"nonexistent\"\n");
        let result = fixture.builder().build();

        assert!(matches!(
            result,
            Err(ContextError::Format(FormatError::DefaultNotFound(_)))
        ));
        assert_eq!(fixture.counters.probe_drops.get(), 1);
        assert_eq!(fixture.counters.destroys.get(), 1);
        assert!(!fixture.path().join(CACHE_FILE).exists());
    }

    #[test]
    fn test_plugin_failure_unwinds() {
        let fixture = Fixture::new("[global]\nformat_libraries = [\"libpool.so\"]\n");
        let result = fixture.builder().build();

        assert!(matches!(
            result,
            Err(ContextError::Format(FormatError::EntryFailed(_)))
        ));
        assert_eq!(fixture.counters.loads.get(), 1);
        assert_eq!(fixture.counters.destroys.get(), 1);
        assert_eq!(fixture.counters.probe_drops.get(), 1);
    }

    #[test]
    fn test_filter_failure_stops_before_formats() {
        let fixture = Fixture::new(
            "filter = [\"x|sda|\"]\n[global]\nformat_libraries = [\"libpool.so\"]\n",
        );
        let result = fixture.builder().build();

        assert!(matches!(result, Err(ContextError::Filter(_))));
        assert_eq!(fixture.counters.loads.get(), 0);
        assert_eq!(fixture.counters.destroys.get(), 0);
        assert_eq!(fixture.counters.probe_drops.get(), 1);
    }

    #[test]
    fn test_teardown_dumps_and_releases() {
        let fixture = Fixture::new("");
        let mut ctx = fixture.builder().build().unwrap();
        for p in PATHS {
            assert!(ctx.filter_mut().passes(&Device::new(*p)));
        }
        drop(ctx);

        assert!(fixture.path().join(CACHE_FILE).exists());
        assert_eq!(fixture.counters.destroys.get(), 1);
        assert_eq!(fixture.counters.probe_drops.get(), 1);
    }

    #[test]
    fn test_cache_survives_between_contexts() {
        let fixture = Fixture::new("");
        fixture.set_config_mtime(SystemTime::now() - Duration::from_secs(3600));

        let mut first = fixture.builder().build().unwrap();
        for p in PATHS {
            first.filter_mut().passes(&Device::new(*p));
        }
        drop(first);
        let probes = fixture.counters.probes.get();
        assert_eq!(probes, PATHS.len());

        let mut second = fixture.builder().build().unwrap();
        assert_eq!(second.filter().len(), PATHS.len());
        for p in PATHS {
            assert!(second.filter_mut().passes(&Device::new(*p)));
        }
        assert_eq!(fixture.counters.probes.get(), probes);
    }

    #[test]
    fn test_config_newer_than_cache_starts_cold() {
        let fixture = Fixture::new("");

        let mut first = fixture.builder().build().unwrap();
        for p in PATHS {
            first.filter_mut().passes(&Device::new(*p));
        }
        drop(first);

        fixture.set_config_mtime(SystemTime::now() + Duration::from_secs(3600));
        let mut second = fixture.builder().build().unwrap();
        assert!(second.filter().is_empty());
        for p in PATHS {
            second.filter_mut().passes(&Device::new(*p));
        }
        assert_eq!(fixture.counters.probes.get(), 2 * PATHS.len());
    }

    #[test]
    fn test_corrupt_cache_is_not_fatal() {
        let fixture = Fixture::new("");
        fixture.set_config_mtime(SystemTime::now() - Duration::from_secs(3600));
        std::fs::write(fixture.path().join(CACHE_FILE), "not json").unwrap();

        let ctx = fixture.builder().build().unwrap();
        assert!(ctx.filter().is_empty());
    }

    #[test]
    fn test_write_cache_state_disabled() {
        let fixture = Fixture::new("write_cache_state = 0\n");
        let mut ctx = fixture.builder().build().unwrap();
        assert!(!ctx.dump_filter());

        ctx.filter_mut().passes(&Device::new("/dev/sda"));
        drop(ctx);
        assert!(!fixture.path().join(CACHE_FILE).exists());
    }

    #[test]
    fn test_empty_system_dir() {
        let counters = Counters::default();
        let mut ctx = ContextBuilder::new()
            .system_dir("")
            .with_probe(Box::new(DiskProbe(counters.clone())))
            .without_loader()
            .build()
            .unwrap();

        assert!(!ctx.dump_filter());
        assert_eq!(ctx.config().timestamp(), SystemTime::UNIX_EPOCH);
        assert_eq!(ctx.default_settings().dev_dir, "/dev/");

        // Verdicts stay in memory and wiping writes no file anywhere
        assert_eq!(ctx.filter().cache_path(), None);
        ctx.filter_mut().passes(&Device::new("/dev/sda"));
        assert!(!ctx.wipe_cache().unwrap());
        assert!(ctx.filter().is_empty());
    }

    #[test]
    fn test_wipe_cache_writes_empty_cache() {
        let fixture = Fixture::new("");
        fixture.set_config_mtime(SystemTime::now() - Duration::from_secs(3600));

        let mut first = fixture.builder().build().unwrap();
        for p in PATHS {
            first.filter_mut().passes(&Device::new(*p));
        }
        drop(first);

        let mut second = fixture.builder().build().unwrap();
        assert_eq!(second.filter().len(), PATHS.len());
        assert!(second.wipe_cache().unwrap());
        drop(second);

        let third = fixture.builder().build().unwrap();
        assert!(third.filter().is_empty());
    }

    #[test]
    fn test_first_scan_dir_is_required() {
        let fixture = Fixture::new("");
        let missing = fixture.path().join("missing").display().to_string();
        let dev = fixture.path().join("dev").display().to_string();

        std::fs::write(
            fixture.path().join(CONFIG_FILE),
            format!("[devices]\nscan = [{:?}, {:?}]\n", missing, dev),
        )
        .unwrap();
        assert!(matches!(
            fixture.builder().build(),
            Err(ContextError::DeviceDir { .. })
        ));

        std::fs::write(
            fixture.path().join(CONFIG_FILE),
            format!("[devices]\nscan = [{:?}, {:?}]\n", dev, missing),
        )
        .unwrap();
        let ctx = fixture.builder().build().unwrap();
        assert_eq!(ctx.dev_cache().dirs().len(), 1);
    }

    #[test]
    fn test_invalid_config_is_fatal() {
        let fixture = Fixture::new("");
        std::fs::write(fixture.path().join(CONFIG_FILE), "[devices\n").unwrap();

        assert!(matches!(
            fixture.builder().build(),
            Err(ContextError::Config(_))
        ));
    }

    #[test]
    fn test_current_settings_override() {
        let fixture = Fixture::new("[global]\nunits = \"k\"\n");
        let mut ctx = fixture.builder().build().unwrap();

        ctx.current_settings_mut().unit_factor = 512;
        assert_eq!(ctx.default_settings().unit_factor, 1024);
        assert_eq!(ctx.current_settings().unit_factor, 512);
    }
}
