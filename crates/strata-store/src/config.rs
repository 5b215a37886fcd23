use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Tunables for a [`VersionedStore`](crate::VersionedStore).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Deadline applied to each store operation, in milliseconds.
    pub op_timeout_ms: u64,
    /// Require `register` before `set`, and refuse to re-register live keys.
    pub strict_registration: bool,
    /// Version ids fetched per page by lazy listings.
    pub list_page_size: usize,
}

impl StoreConfig {
    /// Per-operation deadline budget.
    pub fn op_timeout(&self) -> Duration {
        Duration::from_millis(self.op_timeout_ms)
    }

    /// Page size, never zero.
    pub fn page_size(&self) -> usize {
        self.list_page_size.max(1)
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            op_timeout_ms: 5_000,
            strict_registration: false,
            list_page_size: 256,
        }
    }
}
