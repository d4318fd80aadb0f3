//! Binary message cache file format.
//!
//! ```text
//! ┌──────────────────────────────────────┐
//! │ HEADER (16 bytes, fixed)             │
//! │  magic: [u8; 8] = b"MLCACHE\0"      │
//! │  version: u32                        │
//! │  flags: u32                          │
//! ├──────────────────────────────────────┤
//! │ ENTRIES (variable)                   │
//! │  bincode-serialized                  │
//! │  BTreeMap<String, CacheEntry>        │
//! └──────────────────────────────────────┘
//! ```

/// Magic bytes identifying a muttlearn message cache.
pub const MAGIC: &[u8; 8] = b"MLCACHE\0";

/// Version of the cache file and of the records in it. Bump it whenever
/// cached records would be learned differently; the cache metadata records
/// it as well, so a bump forces a rebuild.
pub const VERSION: u32 = 1;

/// Fixed header size in bytes.
pub const HEADER_SIZE: usize = 16;

/// Serializable cache file header.
#[derive(Debug, serde::Serialize, serde::Deserialize)]
pub struct CacheHeader {
    /// Magic bytes (must equal [`MAGIC`]).
    pub magic: [u8; 8],
    /// Format version (must equal [`VERSION`]).
    pub version: u32,
    /// Reserved flags (currently unused).
    pub flags: u32,
}

impl CacheHeader {
    pub fn current() -> Self {
        Self {
            magic: *MAGIC,
            version: VERSION,
            flags: 0,
        }
    }

    /// Validate that the header is well-formed and matches the current format.
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.magic != *MAGIC {
            return Err("Invalid magic bytes".into());
        }
        if self.version != VERSION {
            return Err(format!(
                "Incompatible version: expected {VERSION}, found {}",
                self.version
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_size() {
        let bytes = bincode::serialize(&CacheHeader::current()).unwrap();
        assert_eq!(bytes.len(), HEADER_SIZE);
        assert_eq!(&bytes[..8], MAGIC);
    }

    #[test]
    fn test_validate_rejects_other_versions() {
        let mut header = CacheHeader::current();
        assert!(header.validate().is_ok());
        header.version = VERSION + 1;
        assert!(header.validate().is_err());
        header.version = VERSION;
        header.magic = *b"MBOXTUI\0";
        assert!(header.validate().is_err());
    }
}
