//! Statically compiled lvm1 format
//!
//! Registered ahead of any plugin so that `global/format = "lvm1"`
//! resolves. Metadata I/O on the lvm1 layout is not implemented here.

use crate::ops::{FormatContext, FormatFeatures, FormatOps};

pub const LEGACY_FORMAT_NAME: &str = "lvm1";

pub struct LegacyFormat;

impl LegacyFormat {
    pub fn new(_ctx: &FormatContext<'_>) -> Self {
        Self
    }
}

impl FormatOps for LegacyFormat {
    fn name(&self) -> &str {
        LEGACY_FORMAT_NAME
    }

    fn features(&self) -> FormatFeatures {
        FormatFeatures::NONE
    }
}
