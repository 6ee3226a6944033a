//! Ordered registry of metadata format backends
//!
//! Registration order is: statically compiled extras (lvm1 when built
//! with `legacy`), then every library in `global/format_libraries`, then
//! the text format. The default format is the first entry whose name or
//! alias matches `global/format`, ignoring case.

use tracing::{debug, error, info, warn};

use crate::ops::{FormatContext, FormatOps};
use crate::plugin::{LibraryHandle, PluginLoader};
use crate::text::TextFormat;
use crate::FormatError;

/// Used when `global/format` is not set
pub const DEFAULT_FORMAT: &str = "lvm2";

/// One registered backend
///
/// Fields drop in declaration order, so the backend is always released
/// before the library it was loaded from.
pub struct FormatType {
    ops: Box<dyn FormatOps>,
    library: Option<Box<dyn LibraryHandle>>,
}

impl FormatType {
    pub fn new(ops: Box<dyn FormatOps>) -> Self {
        Self { ops, library: None }
    }

    pub fn with_library(ops: Box<dyn FormatOps>, library: Box<dyn LibraryHandle>) -> Self {
        Self {
            ops,
            library: Some(library),
        }
    }

    pub fn name(&self) -> &str {
        self.ops.name()
    }

    pub fn alias(&self) -> Option<&str> {
        self.ops.alias()
    }

    pub fn ops(&self) -> &dyn FormatOps {
        self.ops.as_ref()
    }

    /// Whether this backend came from a shared library
    pub fn is_dynamic(&self) -> bool {
        self.library.is_some()
    }

    /// Case-insensitive match on name or alias
    pub fn matches(&self, name: &str) -> bool {
        self.name().eq_ignore_ascii_case(name)
            || self.alias().is_some_and(|a| a.eq_ignore_ascii_case(name))
    }

    /// Destroy the backend, then close its library
    fn release(self) {
        let Self { mut ops, library } = self;
        let name = ops.name().to_string();

        if let Err(e) = ops.destroy() {
            warn!(format = %name, error = %e, "Format destroy failed");
        }
        drop(ops);

        if let Some(library) = library {
            let path = library.path().display().to_string();
            match library.close() {
                Ok(()) => debug!(format = %name, library = %path, "Closed format library"),
                Err(e) => warn!(format = %name, error = %e, "Failed to close format library"),
            }
        }
    }
}

pub struct FormatRegistry {
    formats: Vec<FormatType>,
    default: usize,
    backup: usize,
}

impl FormatRegistry {
    pub fn builder<'a>(ctx: FormatContext<'a>) -> RegistryBuilder<'a> {
        RegistryBuilder::new(ctx)
    }

    /// Registered formats in registration order
    pub fn formats(&self) -> impl Iterator<Item = &FormatType> {
        self.formats.iter()
    }

    pub fn len(&self) -> usize {
        self.formats.len()
    }

    pub fn is_empty(&self) -> bool {
        self.formats.is_empty()
    }

    /// First format whose name or alias matches
    pub fn find(&self, name: &str) -> Option<&FormatType> {
        self.formats.iter().find(|f| f.matches(name))
    }

    pub fn default_format(&self) -> &FormatType {
        &self.formats[self.default]
    }

    /// The text format, used for writing metadata backups
    pub fn backup_format(&self) -> &FormatType {
        &self.formats[self.backup]
    }

    /// Tear down every backend now rather than at drop
    pub fn destroy(mut self) {
        self.teardown();
    }

    /// Release every entry, continuing past individual failures
    ///
    /// Entries are drained as they are processed, so a second call finds
    /// nothing to do.
    fn teardown(&mut self) {
        for fmt in self.formats.drain(..) {
            fmt.release();
        }
    }
}

impl Drop for FormatRegistry {
    fn drop(&mut self) {
        self.teardown();
    }
}

/// Assembles a [`FormatRegistry`] from config
pub struct RegistryBuilder<'a> {
    ctx: FormatContext<'a>,
    statics: Vec<Box<dyn FormatOps>>,
    loader: Option<Box<dyn PluginLoader>>,
}

impl<'a> RegistryBuilder<'a> {
    /// Builder with the compiled-in backends and, with the `dynamic`
    /// feature, the platform library loader
    pub fn new(ctx: FormatContext<'a>) -> Self {
        #[allow(unused_mut)]
        let mut statics: Vec<Box<dyn FormatOps>> = Vec::new();
        #[cfg(feature = "legacy")]
        statics.push(Box::new(crate::legacy::LegacyFormat::new(&ctx)));

        #[cfg(feature = "dynamic")]
        let loader: Option<Box<dyn PluginLoader>> = Some(Box::new(crate::plugin::DylibLoader));
        #[cfg(not(feature = "dynamic"))]
        let loader: Option<Box<dyn PluginLoader>> = None;

        Self {
            ctx,
            statics,
            loader,
        }
    }

    /// Register an additional compiled-in backend ahead of plugins
    pub fn with_static(mut self, ops: Box<dyn FormatOps>) -> Self {
        self.statics.push(ops);
        self
    }

    /// Replace the library loader
    pub fn with_loader(mut self, loader: Box<dyn PluginLoader>) -> Self {
        self.loader = Some(loader);
        self
    }

    /// Disable plugin loading
    pub fn without_loader(mut self) -> Self {
        self.loader = None;
        self
    }

    /// Build the registry and resolve the default format
    ///
    /// Any failure releases every backend registered so far.
    pub fn build(self) -> Result<FormatRegistry, FormatError> {
        let Self {
            ctx,
            statics,
            loader,
        } = self;

        let mut registry = FormatRegistry {
            formats: Vec::with_capacity(statics.len() + 1),
            default: 0,
            backup: 0,
        };

        registry
            .formats
            .extend(statics.into_iter().map(FormatType::new));

        if let Some(node) = ctx.config.find_node("global/format_libraries") {
            let libraries = node.strings().map_err(|e| {
                error!("Invalid string in config file: global/format_libraries");
                FormatError::Config(e)
            })?;

            match &loader {
                Some(loader) => {
                    for path in libraries {
                        let loaded = loader.load(path, &ctx)?;
                        registry
                            .formats
                            .push(FormatType::with_library(loaded.ops, loaded.library));
                    }
                }
                None if !libraries.is_empty() => {
                    warn!(
                        count = libraries.len(),
                        "Dynamic format loading unavailable: ignoring global/format_libraries"
                    );
                }
                None => {}
            }
        }

        registry.formats.push(FormatType::new(Box::new(TextFormat::new(&ctx))));
        registry.backup = registry.formats.len() - 1;

        let wanted = ctx.config.find_str("global/format", DEFAULT_FORMAT);
        let Some(default) = registry.formats.iter().position(|f| f.matches(wanted)) else {
            error!(format = %wanted, "Default format not found");
            return Err(FormatError::DefaultNotFound(wanted.to_string()));
        };
        registry.default = default;

        info!(
            default = %registry.default_format().name(),
            formats = registry.len(),
            "Format registry initialised"
        );
        Ok(registry)
    }
}
