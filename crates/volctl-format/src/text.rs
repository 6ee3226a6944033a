//! Text metadata format (`text`, alias `lvm2`)
//!
//! Always compiled in. Besides being a normal backend it is the format
//! used for metadata backups.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::debug;

use crate::ops::{FormatContext, FormatFeatures, FormatOps, VgSummary};
use crate::FormatError;

pub const TEXT_FORMAT_NAME: &str = "text";
pub const TEXT_FORMAT_ALIAS: &str = "lvm2";

const CONTENTS: &str = "Text Format Volume Group";
const VERSION: u32 = 1;

/// Document layout written by the text backend
#[derive(Debug, Serialize, Deserialize)]
struct TextDocument {
    contents: String,
    version: u32,
    #[serde(default)]
    description: Option<String>,
    /// Seconds since the epoch
    creation_time: u64,
    vg: VgSummary,
}

pub struct TextFormat {
    description: Option<String>,
}

impl TextFormat {
    pub fn new(ctx: &FormatContext<'_>) -> Self {
        let description = ctx
            .config
            .find_node("backup/description")
            .and_then(|n| n.values().first().and_then(|v| v.as_str().map(str::to_string)));
        Self { description }
    }
}

impl FormatOps for TextFormat {
    fn name(&self) -> &str {
        TEXT_FORMAT_NAME
    }

    fn alias(&self) -> Option<&str> {
        Some(TEXT_FORMAT_ALIAS)
    }

    fn features(&self) -> FormatFeatures {
        FormatFeatures::ALL
    }

    fn vg_read(&self, path: &Path) -> Result<VgSummary, FormatError> {
        let content = std::fs::read_to_string(path).map_err(|source| FormatError::IoError {
            path: path.to_path_buf(),
            source,
        })?;
        let doc: TextDocument = toml::from_str(&content).map_err(|e| FormatError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        if doc.contents != CONTENTS || doc.version != VERSION {
            return Err(FormatError::ParseError {
                path: path.to_path_buf(),
                reason: format!("unrecognised contents {:?} version {}", doc.contents, doc.version),
            });
        }

        Ok(doc.vg)
    }

    fn vg_write(&self, path: &Path, vg: &VgSummary) -> Result<(), FormatError> {
        let doc = TextDocument {
            contents: CONTENTS.to_string(),
            version: VERSION,
            description: self.description.clone(),
            creation_time: SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_secs())
                .unwrap_or_default(),
            vg: vg.clone(),
        };
        let content = toml::to_string_pretty(&doc).map_err(|e| FormatError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let io_err = |source| FormatError::IoError {
            path: path.to_path_buf(),
            source,
        };
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(io_err)?;
        }
        std::fs::write(path, content).map_err(io_err)?;

        debug!(vg = %vg.name, seqno = vg.seqno, path = %path.display(), "Wrote text metadata");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use volctl_core::ConfigTree;

    fn text_format(cf: &ConfigTree) -> TextFormat {
        TextFormat::new(&FormatContext {
            config: cf,
            system_dir: Path::new("/etc/lvm"),
        })
    }

    #[test]
    fn test_write_then_read() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("backup").join("vg00");
        let cf = ConfigTree::new();
        let fmt = text_format(&cf);

        let mut vg = VgSummary::new("vg00", 8192);
        vg.physical_volumes = vec!["/dev/sda1".to_string(), "/dev/sdb1".to_string()];
        fmt.vg_write(&path, &vg).unwrap();

        assert_eq!(fmt.vg_read(&path).unwrap(), vg);
    }

    #[test]
    fn test_rejects_foreign_document() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("vg00");
        std::fs::write(
            &path,
            r#"
contents = "Something Else"
version = 1
creation_time = 0

[vg]
name = "vg00"
id = "x"
seqno = 1
extent_size = 8192
"#,
        )
        .unwrap();

        let fmt = text_format(&ConfigTree::new());
        assert!(matches!(fmt.vg_read(&path), Err(FormatError::ParseError { .. })));
    }

    #[test]
    fn test_description_from_config() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("vg01");
        let cf = ConfigTree::from_toml("[backup]\ndescription = \"nightly\"\n").unwrap();

        text_format(&cf).vg_write(&path, &VgSummary::new("vg01", 128)).unwrap();
        let written = std::fs::read_to_string(&path).unwrap();
        assert!(written.contains("nightly"));
    }
}
