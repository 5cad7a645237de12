use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Configuration for [`crate::FileRequestQueue`]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileQueueConfig {
    /// Directory holding `requests.log` and `meta.json`
    pub base_dir: PathBuf,

    /// Call `fsync` on the log after every append (default: true).
    ///
    /// When `false` an append is durable against a process crash but not
    /// against a power loss.
    #[serde(default = "default_sync_on_append")]
    pub sync_on_append: bool,

    /// Maximum encoded size of a single request (bytes)
    #[serde(default = "default_max_request_size")]
    pub max_request_size: usize,

    /// Rewrite the log without acknowledged entries once it grows past this
    /// many bytes
    #[serde(default = "default_compact_threshold")]
    pub compact_threshold_bytes: u64,
}

fn default_sync_on_append() -> bool {
    true
}

fn default_max_request_size() -> usize {
    1024 * 1024 // 1MB
}

fn default_compact_threshold() -> u64 {
    64 * 1024 * 1024 // 64MB
}

impl Default for FileQueueConfig {
    fn default() -> Self {
        Self {
            base_dir: PathBuf::from("./data/requests"),
            sync_on_append: default_sync_on_append(),
            max_request_size: default_max_request_size(),
            compact_threshold_bytes: default_compact_threshold(),
        }
    }
}

impl FileQueueConfig {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
            ..Default::default()
        }
    }

    pub fn with_sync_on_append(mut self, sync: bool) -> Self {
        self.sync_on_append = sync;
        self
    }

    pub fn with_max_request_size(mut self, size: usize) -> Self {
        self.max_request_size = size;
        self
    }

    pub fn with_compact_threshold(mut self, bytes: u64) -> Self {
        self.compact_threshold_bytes = bytes;
        self
    }
}
