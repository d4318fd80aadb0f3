//! Persistent per-message record store keyed by Message-ID.

use std::collections::{BTreeMap, HashSet};
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use super::format::{CacheHeader, HEADER_SIZE};
use crate::error::{LearnError, Rejection, Result};
use crate::model::message::MessageAttributes;

/// The cached record of one message.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct CacheEntry {
    /// Adler-32 of the raw record the attributes were learned from.
    pub checksum: u32,
    pub attrs: MessageAttributes,
    /// Set when the body step rejected the message; it is then never
    /// aggregated until its content changes.
    pub rejection: Option<Rejection>,
}

/// How the cache treats existing records during a scan.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheMode {
    /// Treat every record as changed.
    pub rebuild: bool,
    /// On commit, keep only the records touched by this scan.
    pub clean: bool,
}

/// Counts reported by [`MessageCache::commit`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CommitStats {
    pub stored: usize,
    pub removed: usize,
}

pub struct MessageCache {
    path: PathBuf,
    entries: BTreeMap<String, CacheEntry>,
    touched: HashSet<String>,
    mode: CacheMode,
    existed: bool,
}

impl MessageCache {
    /// Open the cache at `path`.
    ///
    /// A missing, foreign, or incompatible file results in an empty cache;
    /// only I/O errors are fatal. Cleaning is disabled when there was no
    /// usable cache to clean.
    pub fn open(path: impl Into<PathBuf>, mut mode: CacheMode) -> Result<Self> {
        let path = path.into();
        let entries = if path.exists() {
            match load_entries(&path) {
                Ok(entries) => Some(entries),
                Err(e @ LearnError::InvalidCache { .. }) => {
                    warn!(error = %e, "Ignoring message cache");
                    None
                }
                Err(e) => return Err(e),
            }
        } else {
            None
        };
        let existed = entries.is_some();
        if mode.clean && !existed {
            debug!(path = %path.display(), "No existing cache, clean pass disabled");
            mode.clean = false;
        }

        Ok(Self {
            path,
            entries: entries.unwrap_or_default(),
            touched: HashSet::new(),
            mode,
            existed,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether a usable cache file was loaded.
    pub fn existed(&self) -> bool {
        self.existed
    }

    pub fn mode(&self) -> CacheMode {
        self.mode
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Whether the message needs to be parsed again.
    ///
    /// Always true in rebuild mode or for unknown identifiers.
    pub fn has_changed(&self, msgid: &str, checksum: u32) -> bool {
        if self.mode.rebuild {
            return true;
        }
        self.entries
            .get(msgid)
            .is_none_or(|entry| entry.checksum != checksum)
    }

    pub fn lookup(&self, msgid: &str) -> Option<&CacheEntry> {
        self.entries.get(msgid)
    }

    /// Insert or replace the record for `msgid` and mark it touched.
    pub fn store(&mut self, msgid: &str, entry: CacheEntry) {
        self.touch(msgid);
        self.entries.insert(msgid.to_string(), entry);
    }

    /// Mark `msgid` as seen in this scan (only tracked in clean mode).
    pub fn touch(&mut self, msgid: &str) {
        if self.mode.clean {
            self.touched.insert(msgid.to_string());
        }
    }

    pub fn entries(&self) -> impl Iterator<Item = (&str, &CacheEntry)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Persist the cache, replacing the previous file atomically.
    ///
    /// In clean mode every record not touched during the scan is dropped.
    pub fn commit(mut self) -> Result<CommitStats> {
        let mut removed = 0;
        if self.mode.clean {
            let before = self.entries.len();
            let touched = std::mem::take(&mut self.touched);
            self.entries.retain(|k, _| touched.contains(k));
            removed = before - self.entries.len();
            if removed > 0 {
                info!(removed, "Removed stale cache records");
            }
        }

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| LearnError::io(parent, e))?;
        }

        let header_bytes = bincode::serialize(&CacheHeader::current())?;
        let entries_bytes = bincode::serialize(&self.entries)?;

        let tmp_path = tmp_path_for(&self.path);
        write_cache_file(&tmp_path, &header_bytes, &entries_bytes)?;
        std::fs::rename(&tmp_path, &self.path).map_err(|e| LearnError::io(&self.path, e))?;
        debug!(path = %self.path.display(), records = self.entries.len(), "Cache written");

        Ok(CommitStats {
            stored: self.entries.len(),
            removed,
        })
    }
}

/// Load and validate a cache file.
fn load_entries(path: &Path) -> Result<BTreeMap<String, CacheEntry>> {
    let data = std::fs::read(path).map_err(|e| LearnError::io(path, e))?;
    let invalid = |reason: String| LearnError::InvalidCache {
        path: path.to_path_buf(),
        reason,
    };

    if data.len() < HEADER_SIZE {
        return Err(invalid("file too small".to_string()));
    }
    let header: CacheHeader =
        bincode::deserialize(&data[..HEADER_SIZE]).map_err(|e| invalid(e.to_string()))?;
    header.validate().map_err(invalid)?;
    bincode::deserialize(&data[HEADER_SIZE..]).map_err(|e| invalid(e.to_string()))
}

fn tmp_path_for(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

/// Write header + entries to a file.
fn write_cache_file(path: &Path, header: &[u8], entries: &[u8]) -> Result<()> {
    let mut file = File::create(path).map_err(|e| LearnError::io(path, e))?;
    file.write_all(header).map_err(|e| LearnError::io(path, e))?;
    file.write_all(entries)
        .map_err(|e| LearnError::io(path, e))?;
    file.sync_all().map_err(|e| LearnError::io(path, e))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(checksum: u32) -> CacheEntry {
        CacheEntry {
            checksum,
            attrs: MessageAttributes {
                from_address: "me@x".to_string(),
                ..Default::default()
            },
            rejection: None,
        }
    }

    #[test]
    fn test_store_commit_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("messages.cache");

        let mut cache = MessageCache::open(&path, CacheMode::default()).unwrap();
        assert!(!cache.existed());
        assert!(cache.has_changed("<a@x>", 1));
        cache.store("<a@x>", entry(1));
        let stats = cache.commit().unwrap();
        assert_eq!(stats.stored, 1);
        assert!(!tmp_path_for(&path).exists());

        let cache = MessageCache::open(&path, CacheMode::default()).unwrap();
        assert!(cache.existed());
        assert!(!cache.has_changed("<a@x>", 1));
        assert!(cache.has_changed("<a@x>", 2));
        assert_eq!(cache.lookup("<a@x>").unwrap().attrs.from_address, "me@x");
    }

    #[test]
    fn test_rebuild_mode_reports_everything_changed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("messages.cache");
        let mut cache = MessageCache::open(&path, CacheMode::default()).unwrap();
        cache.store("<a@x>", entry(1));
        cache.commit().unwrap();

        let mode = CacheMode {
            rebuild: true,
            clean: false,
        };
        let cache = MessageCache::open(&path, mode).unwrap();
        assert!(cache.has_changed("<a@x>", 1));
    }

    #[test]
    fn test_clean_commit_drops_untouched_records() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("messages.cache");
        let mut cache = MessageCache::open(&path, CacheMode::default()).unwrap();
        cache.store("<keep@x>", entry(1));
        cache.store("<gone@x>", entry(2));
        cache.commit().unwrap();

        let mode = CacheMode {
            rebuild: false,
            clean: true,
        };
        let mut cache = MessageCache::open(&path, mode).unwrap();
        cache.touch("<keep@x>");
        let stats = cache.commit().unwrap();
        assert_eq!(stats, CommitStats { stored: 1, removed: 1 });

        let cache = MessageCache::open(&path, CacheMode::default()).unwrap();
        assert!(cache.lookup("<gone@x>").is_none());
        assert!(cache.lookup("<keep@x>").is_some());
    }

    #[test]
    fn test_clean_without_existing_cache_is_disabled() {
        let dir = tempfile::tempdir().unwrap();
        let mode = CacheMode {
            rebuild: false,
            clean: true,
        };
        let cache = MessageCache::open(dir.path().join("messages.cache"), mode).unwrap();
        assert!(!cache.mode().clean);
    }

    #[test]
    fn test_foreign_file_is_treated_as_absent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("messages.cache");
        std::fs::write(&path, b"this is not a cache file at all").unwrap();
        assert!(matches!(
            load_entries(&path),
            Err(LearnError::InvalidCache { ref reason, .. }) if reason == "Invalid magic bytes"
        ));
        let cache = MessageCache::open(&path, CacheMode::default()).unwrap();
        assert!(!cache.existed());
        assert!(cache.is_empty());
    }

    #[test]
    fn test_truncated_records_are_treated_as_absent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("messages.cache");
        let mut cache = MessageCache::open(&path, CacheMode::default()).unwrap();
        cache.store("<a@x>", entry(1));
        cache.commit().unwrap();

        let data = std::fs::read(&path).unwrap();
        std::fs::write(&path, &data[..data.len() - 3]).unwrap();
        assert!(matches!(load_entries(&path), Err(LearnError::InvalidCache { .. })));
        assert!(MessageCache::open(&path, CacheMode::default()).unwrap().is_empty());
    }
}
