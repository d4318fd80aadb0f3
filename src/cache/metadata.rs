//! Cache validity gate: the cache version and a snapshot of every setting
//! that changes what is learned from a message.

use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::Path;

use tracing::debug;

use super::format::VERSION;
use crate::config::ScanOptions;
use crate::error::{LearnError, Result};

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct CacheMetadata {
    pub version: u32,
    /// Scan-affecting settings by name.
    pub variables: BTreeMap<String, String>,
    /// Address pattern lists by name.
    pub address_lists: BTreeMap<String, Vec<String>>,
}

impl CacheMetadata {
    /// Metadata describing a scan with `options`.
    pub fn current(options: &ScanOptions) -> Self {
        Self {
            version: VERSION,
            variables: options.scan_variables().clone(),
            address_lists: options.address_lists().clone(),
        }
    }

    /// Load saved metadata. A missing file is `Ok(None)`.
    pub fn load(path: &Path) -> Result<Option<Self>> {
        let contents = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!(path = %path.display(), "No cache metadata");
                return Ok(None);
            }
            Err(e) => return Err(LearnError::io(path, e)),
        };
        serde_json::from_str(&contents)
            .map(Some)
            .map_err(|e| LearnError::InvalidCache {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json).map_err(|e| LearnError::io(path, e))
    }

    /// Why the cache must be rebuilt before scanning with `self`, if at all.
    pub fn rebuild_reason(&self, saved: Option<&CacheMetadata>) -> Option<String> {
        let Some(saved) = saved else {
            return Some("no cache metadata".to_string());
        };
        if saved.version != self.version {
            return Some(format!(
                "cache version changed from {} to {}",
                saved.version, self.version
            ));
        }
        for (name, value) in &self.variables {
            if saved.variables.get(name) != Some(value) {
                return Some(format!("{name} changed"));
            }
        }
        for (name, patterns) in &self.address_lists {
            let previous = saved.address_lists.get(name).map(Vec::as_slice).unwrap_or_default();
            if previous != patterns.as_slice() {
                return Some(format!("{name} changed"));
            }
        }
        None
    }
}
