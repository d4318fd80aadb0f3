//! Persistent message cache: per-message records keyed by Message-ID, the
//! metadata that decides whether the cache is still valid, and the lock that
//! keeps two scans from writing it at once.

pub mod checksum;
pub mod format;
pub mod lock;
pub mod metadata;
pub mod store;

use std::path::{Path, PathBuf};

/// File locations inside the cache directory.
#[derive(Debug, Clone)]
pub struct CachePaths {
    pub dir: PathBuf,
    pub messages: PathBuf,
    pub metadata: PathBuf,
    pub lock: PathBuf,
}

impl CachePaths {
    pub fn new(dir: &Path) -> Self {
        Self {
            dir: dir.to_path_buf(),
            messages: dir.join("messages.cache"),
            metadata: dir.join("metadata.json"),
            lock: dir.join("lock"),
        }
    }
}
