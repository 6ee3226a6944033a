//! Logical AND over an ordered list of filters

use super::DevFilter;
use crate::device::Device;

/// Passes a device only if every sub-filter does, stopping at the
/// first rejection
pub struct CompositeFilter {
    filters: Vec<Box<dyn DevFilter>>,
}

impl CompositeFilter {
    pub fn new(filters: Vec<Box<dyn DevFilter>>) -> Self {
        Self { filters }
    }

    pub fn len(&self) -> usize {
        self.filters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }
}

impl DevFilter for CompositeFilter {
    fn passes(&mut self, device: &Device) -> bool {
        self.filters.iter_mut().all(|f| f.passes(device))
    }
}
