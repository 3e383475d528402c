//! Database-wide settings.
//!
//! [`DatabaseConfig`] deserializes with serde, every field falling back to its default,
//! so it can be embedded in an application's own configuration file:
//!
//! ```ignore
//! let config: DatabaseConfig = serde_json::from_str(r#"{ "batch_size": 250 }"#)?;
//! ```

use serde::{Deserialize, Serialize};

pub const DEFAULT_BATCH_SIZE: usize = 1000;
pub const DEFAULT_SCAN_PAGE_SIZE: usize = 1000;

/// Whether public documents carry their revision token.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RevisionMode {
    /// Documents surface `rev`; projections request it too.
    #[default]
    Expose,
    /// `rev` is stripped from every returned document.
    Hide,
}

impl RevisionMode {
    pub fn exposes(&self) -> bool {
        matches!(self, RevisionMode::Expose)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Default page size for [`Collection::batch`](crate::collection::Collection::batch).
    pub batch_size: usize,
    /// Page size used by internal scans (list, count, update, remove).
    pub scan_page_size: usize,
    pub revisions: RevisionMode,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        DatabaseConfig {
            batch_size: DEFAULT_BATCH_SIZE,
            scan_page_size: DEFAULT_SCAN_PAGE_SIZE,
            revisions: RevisionMode::default(),
        }
    }
}

impl DatabaseConfig {
    pub fn new() -> Self {
        DatabaseConfig::default()
    }

    pub fn batch_size(mut self, size: usize) -> Self {
        self.batch_size = size;
        self
    }

    pub fn scan_page_size(mut self, size: usize) -> Self {
        self.scan_page_size = size;
        self
    }

    pub fn revisions(mut self, mode: RevisionMode) -> Self {
        self.revisions = mode;
        self
    }
}
