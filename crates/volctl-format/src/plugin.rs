//! Loading format backends from shared libraries
//!
//! A plugin exports one entry point, `init_format`, with the signature
//! [`InitFormatFn`]. The host and plugin must be built with the same
//! compiler, since the backend crosses the boundary as a trait object.
//! Use [`declare_format!`](crate::declare_format) to export it.
//!
//! The library stays loaded until registry teardown, where it is closed
//! exactly once, after the backend's `destroy`.

use std::path::{Path, PathBuf};

use crate::ops::{FormatContext, FormatOps};
use crate::FormatError;

/// Name of the exported entry point
pub const ENTRY_SYMBOL: &str = "init_format";

/// Signature of the exported entry point; `None` reports failure
pub type InitFormatFn = fn(&FormatContext<'_>) -> Option<Box<dyn FormatOps>>;

/// Export a constructor as the plugin entry point
///
/// ```ignore
/// fn init(ctx: &volctl_format::FormatContext<'_>) -> Option<Box<dyn volctl_format::FormatOps>> {
///     Some(Box::new(MyFormat::new(ctx)))
/// }
/// volctl_format::declare_format!(init);
/// ```
#[macro_export]
macro_rules! declare_format {
    ($init:path) => {
        #[no_mangle]
        pub fn init_format(
            ctx: &$crate::FormatContext<'_>,
        ) -> ::std::option::Option<::std::boxed::Box<dyn $crate::FormatOps>> {
            $init(ctx)
        }
    };
}

/// An open library owned by exactly one format descriptor
pub trait LibraryHandle {
    fn path(&self) -> &Path;

    /// Unload the library
    fn close(self: Box<Self>) -> Result<(), FormatError>;
}

/// A backend together with the library it came from
pub struct LoadedFormat {
    pub ops: Box<dyn FormatOps>,
    pub library: Box<dyn LibraryHandle>,
}

/// Host capability for loading plugin backends
pub trait PluginLoader {
    fn load(&self, path: &str, ctx: &FormatContext<'_>) -> Result<LoadedFormat, FormatError>;
}

/// Resolve a configured library name against `global/library_dir`
pub fn resolve_library_path(path: &str, ctx: &FormatContext<'_>) -> PathBuf {
    let candidate = Path::new(path);
    if candidate.is_absolute() {
        return candidate.to_path_buf();
    }
    match ctx.config.find_str("global/library_dir", "") {
        "" => candidate.to_path_buf(),
        dir => Path::new(dir).join(candidate),
    }
}

#[cfg(feature = "dynamic")]
pub use dylib::{DylibHandle, DylibLoader};

#[cfg(feature = "dynamic")]
mod dylib {
    use libloading::{Library, Symbol};
    use std::path::{Path, PathBuf};
    use tracing::{debug, error};

    use super::{
        resolve_library_path, InitFormatFn, LibraryHandle, LoadedFormat, PluginLoader, ENTRY_SYMBOL,
    };
    use crate::ops::FormatContext;
    use crate::FormatError;

    pub struct DylibHandle {
        lib: Library,
        path: PathBuf,
    }

    impl LibraryHandle for DylibHandle {
        fn path(&self) -> &Path {
            &self.path
        }

        fn close(self: Box<Self>) -> Result<(), FormatError> {
            let DylibHandle { lib, path } = *self;
            lib.close().map_err(|e| FormatError::LibraryClose {
                path,
                reason: e.to_string(),
            })
        }
    }

    /// Loads plugins with the platform's dynamic loader
    #[derive(Debug, Default)]
    pub struct DylibLoader;

    impl PluginLoader for DylibLoader {
        fn load(&self, path: &str, ctx: &FormatContext<'_>) -> Result<LoadedFormat, FormatError> {
            let path = resolve_library_path(path, ctx);

            // SAFETY: loading runs the library's initialisers; format
            // libraries are trusted by being named in the config file.
            let lib = unsafe { Library::new(&path) }.map_err(|e| {
                error!(path = %path.display(), error = %e, "Unable to open format library");
                FormatError::LibraryLoad {
                    path: path.clone(),
                    reason: e.to_string(),
                }
            })?;

            // SAFETY: the entry point is declared through `declare_format!`,
            // which fixes its signature to `InitFormatFn`.
            let init: InitFormatFn = unsafe {
                let symbol: Symbol<'_, InitFormatFn> = lib
                    .get(format!("{}\0", ENTRY_SYMBOL).as_bytes())
                    .map_err(|_| {
                        error!(path = %path.display(), "Shared library does not contain format functions");
                        FormatError::MissingEntryPoint {
                            path: path.clone(),
                            symbol: ENTRY_SYMBOL,
                        }
                    })?;
                *symbol
            };

            let ops = init(ctx).ok_or_else(|| FormatError::EntryFailed(path.clone()))?;
            debug!(path = %path.display(), format = %ops.name(), "Loaded format library");

            Ok(LoadedFormat {
                ops,
                library: Box::new(DylibHandle { lib, path }),
            })
        }
    }

}
