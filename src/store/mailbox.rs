//! Uniform access to the messages of a mailbox, whatever its on-disk format.
//!
//! Single-file stores (mbox, MMDF, Babyl) are split up front; the file is
//! memory-mapped, or decompressed into memory for `.gz` and `.bz2` files.
//! Directory stores (Maildir, MH) list their message files and read each one
//! on demand.

use std::fmt;
use std::fs::File;
use std::io::{ErrorKind, Read};
use std::ops::Range;
use std::path::{Path, PathBuf};

use memmap2::Mmap;
use tracing::{debug, info, warn};

use crate::error::{LearnError, Rejection, Result};
use crate::parser::eml::split_header_body;
use crate::parser::header::HeaderFields;
use crate::parser::mbox::{split_babyl, split_mbox, split_mmdf, BABYL_MAGIC};

/// First line of every MMDF message.
const MMDF_MAGIC: &[u8] = b"\x01\x01\x01\x01\n";

/// Bytes inspected when sniffing the format of a file.
const SNIFF_LEN: usize = 16;

/// On-disk mailbox formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MailboxKind {
    Mbox,
    Maildir,
    Mh,
    Mmdf,
    Babyl,
}

impl fmt::Display for MailboxKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Mbox => "mbox",
            Self::Maildir => "Maildir",
            Self::Mh => "MH",
            Self::Mmdf => "MMDF",
            Self::Babyl => "Babyl",
        };
        f.write_str(name)
    }
}

/// One message as stored, with its position in the mailbox.
#[derive(Debug, Clone)]
pub struct RawMessage {
    /// Real path of the mailbox.
    pub mailbox_path: String,
    /// Store-specific key: record number or file name.
    pub key: String,
    /// The record without mailbox framing (no `From ` line).
    pub bytes: Vec<u8>,
}

impl RawMessage {
    /// `<mailbox>#<key>`, used where no Message-ID is available.
    pub fn position(&self) -> String {
        format!("{}#{}", self.mailbox_path, self.key)
    }
}

enum Backing {
    Mapped(Mmap),
    Owned(Vec<u8>),
}

impl Backing {
    fn as_bytes(&self) -> &[u8] {
        match self {
            Self::Mapped(m) => m,
            Self::Owned(v) => v,
        }
    }
}

enum Source {
    /// Messages are byte ranges of one buffer.
    Spans {
        data: Backing,
        spans: Vec<Range<usize>>,
    },
    /// Messages had to be reassembled (Babyl).
    Rebuilt(Vec<Vec<u8>>),
    /// One file per message: `(key, path)`.
    Files(Vec<(String, PathBuf)>),
}

/// An opened mailbox.
pub struct Mailbox {
    path: PathBuf,
    display_path: String,
    kind: MailboxKind,
    source: Source,
}

impl Mailbox {
    /// Open `path`, detecting its format.
    pub fn open(path: &Path) -> Result<Self> {
        let kind = Self::detect(path)?;
        Self::open_as(path, kind)
    }

    /// Determine the format of the store at `path`.
    ///
    /// A directory with a `cur/` subdirectory is a Maildir, any other
    /// directory an MH folder. Files are sniffed (after decompression):
    /// `BABYL` starts a Babyl file, `^A^A^A^A` an MMDF file, and anything
    /// else is read as mbox.
    pub fn detect(path: &Path) -> Result<MailboxKind> {
        let meta = match std::fs::metadata(path) {
            Ok(m) => m,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(LearnError::MailboxNotFound(path.to_path_buf()))
            }
            Err(e) => return Err(LearnError::io(path, e)),
        };

        if meta.is_dir() {
            return Ok(if path.join("cur").is_dir() {
                MailboxKind::Maildir
            } else {
                MailboxKind::Mh
            });
        }
        if !meta.is_file() {
            return Err(LearnError::UnknownMailboxFormat(path.to_path_buf()));
        }

        let mut head = Vec::with_capacity(SNIFF_LEN);
        open_decompressed(path)?
            .take(SNIFF_LEN as u64)
            .read_to_end(&mut head)
            .map_err(|e| decompression_error(path, e))?;

        Ok(if head.starts_with(&BABYL_MAGIC[..5]) {
            MailboxKind::Babyl
        } else if head.starts_with(MMDF_MAGIC) {
            MailboxKind::Mmdf
        } else {
            MailboxKind::Mbox
        })
    }

    /// Open `path` as a mailbox of the given kind.
    pub fn open_as(path: &Path, kind: MailboxKind) -> Result<Self> {
        let real = std::fs::canonicalize(path).map_err(|e| match e.kind() {
            ErrorKind::NotFound => LearnError::MailboxNotFound(path.to_path_buf()),
            _ => LearnError::io(path, e),
        })?;

        let source = match kind {
            MailboxKind::Mbox => {
                let data = load_file(&real)?;
                let spans = split_mbox(data.as_bytes());
                Source::Spans { data, spans }
            }
            MailboxKind::Mmdf => {
                let data = load_file(&real)?;
                let spans = split_mmdf(data.as_bytes());
                Source::Spans { data, spans }
            }
            MailboxKind::Babyl => {
                let data = load_file(&real)?;
                let messages =
                    split_babyl(data.as_bytes()).map_err(|reason| LearnError::InvalidMailbox {
                        path: real.clone(),
                        reason,
                    })?;
                Source::Rebuilt(messages)
            }
            MailboxKind::Maildir => Source::Files(list_maildir(&real)?),
            MailboxKind::Mh => Source::Files(list_mh(&real)?),
        };

        let mailbox = Self {
            display_path: real.to_string_lossy().into_owned(),
            path: real,
            kind,
            source,
        };
        info!(
            path = %mailbox.display_path,
            kind = %kind,
            messages = mailbox.len(),
            "Opened mailbox"
        );
        Ok(mailbox)
    }

    /// Canonical path of the mailbox.
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn kind(&self) -> MailboxKind {
        self.kind
    }

    pub fn len(&self) -> usize {
        match &self.source {
            Source::Spans { spans, .. } => spans.len(),
            Source::Rebuilt(messages) => messages.len(),
            Source::Files(files) => files.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Store-specific keys in mailbox order.
    pub fn keys(&self) -> Vec<String> {
        (0..self.len()).filter_map(|i| self.key(i)).collect()
    }

    /// The key of the message at `index`.
    pub fn key(&self, index: usize) -> Option<String> {
        match &self.source {
            Source::Files(files) => files.get(index).map(|(key, _)| key.clone()),
            _ => (index < self.len()).then(|| index.to_string()),
        }
    }

    /// Raw bytes of the message at `index`, without mailbox framing.
    pub fn get_raw_bytes(&self, index: usize) -> Result<Vec<u8>> {
        let out_of_range = || LearnError::InvalidMailbox {
            path: self.path.clone(),
            reason: format!("no message with index {index}"),
        };
        match &self.source {
            Source::Spans { data, spans } => {
                let span = spans.get(index).ok_or_else(out_of_range)?;
                Ok(data.as_bytes()[span.clone()].to_vec())
            }
            Source::Rebuilt(messages) => messages.get(index).cloned().ok_or_else(out_of_range),
            Source::Files(files) => {
                let (_, path) = files.get(index).ok_or_else(out_of_range)?;
                std::fs::read(path).map_err(|e| LearnError::io(path, e))
            }
        }
    }

    /// Header fields of the message at `index`, or the reason they are
    /// unusable.
    pub fn get_parsed(&self, index: usize) -> Result<std::result::Result<HeaderFields, Rejection>> {
        let bytes = self.get_raw_bytes(index)?;
        let (headers, _) = split_header_body(&bytes);
        Ok(HeaderFields::parse(headers))
    }

    /// Iterate over all messages in mailbox order.
    pub fn messages(&self) -> impl Iterator<Item = Result<RawMessage>> + '_ {
        (0..self.len()).map(move |index| {
            Ok(RawMessage {
                mailbox_path: self.display_path.clone(),
                key: self.key(index).unwrap_or_default(),
                bytes: self.get_raw_bytes(index)?,
            })
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Compression {
    None,
    Gzip,
    Bzip2,
}

fn compression_of(path: &Path) -> Compression {
    match path.extension().and_then(|e| e.to_str()) {
        Some("gz") => Compression::Gzip,
        Some("bz2") => Compression::Bzip2,
        _ => Compression::None,
    }
}

fn open_decompressed(path: &Path) -> Result<Box<dyn Read>> {
    let file = File::open(path).map_err(|e| LearnError::io(path, e))?;
    Ok(match compression_of(path) {
        Compression::None => Box::new(file),
        Compression::Gzip => Box::new(flate2::read::MultiGzDecoder::new(file)),
        Compression::Bzip2 => Box::new(bzip2::read::BzDecoder::new(file)),
    })
}

fn decompression_error(path: &Path, e: std::io::Error) -> LearnError {
    match compression_of(path) {
        Compression::None => LearnError::io(path, e),
        _ => LearnError::InvalidMailbox {
            path: path.to_path_buf(),
            reason: format!("decompression failed: {e}"),
        },
    }
}

/// Map a plain file, or read a compressed one fully into memory.
fn load_file(path: &Path) -> Result<Backing> {
    if compression_of(path) != Compression::None {
        let mut data = Vec::new();
        open_decompressed(path)?
            .read_to_end(&mut data)
            .map_err(|e| decompression_error(path, e))?;
        debug!(path = %path.display(), bytes = data.len(), "Decompressed mailbox");
        return Ok(Backing::Owned(data));
    }

    let file = File::open(path).map_err(|e| LearnError::io(path, e))?;
    let len = file.metadata().map_err(|e| LearnError::io(path, e))?.len();
    if len == 0 {
        return Ok(Backing::Owned(Vec::new()));
    }
    // SAFETY: the mapping is read-only; a mailbox rewritten by another
    // program during the scan yields garbage records, never UB in safe code
    // that only copies byte ranges out of it.
    match unsafe { Mmap::map(&file) } {
        Ok(mmap) => Ok(Backing::Mapped(mmap)),
        Err(e) => {
            debug!(path = %path.display(), error = %e, "mmap failed, reading file");
            std::fs::read(path)
                .map(Backing::Owned)
                .map_err(|e| LearnError::io(path, e))
        }
    }
}

/// Message files of a Maildir (`new/` then `cur/`), sorted by name.
fn list_maildir(path: &Path) -> Result<Vec<(String, PathBuf)>> {
    let mut files = Vec::new();
    for sub in ["new", "cur"] {
        let dir = path.join(sub);
        if !dir.is_dir() {
            continue;
        }
        let mut entries = list_files(&dir)?;
        entries.sort();
        files.extend(
            entries
                .into_iter()
                .map(|(name, file)| (format!("{sub}/{name}"), file)),
        );
    }
    Ok(files)
}

/// Numbered message files of an MH folder, in numeric order.
fn list_mh(path: &Path) -> Result<Vec<(String, PathBuf)>> {
    let mut numbered: Vec<(u64, String, PathBuf)> = list_files(path)?
        .into_iter()
        .filter_map(|(name, file)| name.parse::<u64>().ok().map(|n| (n, name, file)))
        .collect();
    numbered.sort_by_key(|(n, _, _)| *n);
    Ok(numbered
        .into_iter()
        .map(|(_, name, file)| (name, file))
        .collect())
}

/// Regular, non-hidden files of a directory.
fn list_files(dir: &Path) -> Result<Vec<(String, PathBuf)>> {
    let mut files = Vec::new();
    for entry in std::fs::read_dir(dir).map_err(|e| LearnError::io(dir, e))? {
        let entry = entry.map_err(|e| LearnError::io(dir, e))?;
        let name = entry.file_name().to_string_lossy().into_owned();
        if name.starts_with('.') {
            continue;
        }
        let file_type = entry.file_type().map_err(|e| LearnError::io(entry.path(), e))?;
        if file_type.is_file() {
            files.push((name, entry.path()));
        } else {
            warn!(path = %entry.path().display(), "Skipping non-file in mailbox directory");
        }
    }
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const MBOX: &[u8] = b"From a@x Thu Jan 01 00:00:00 2024\nFrom: a@x\nTo: b@x\n\nOne\n\n\
From a@x Thu Jan 01 00:00:00 2024\nFrom: a@x\nTo: c@x\n\nTwo\n";

    #[test]
    fn test_mbox_messages() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("inbox");
        std::fs::write(&path, MBOX).unwrap();

        let mbox = Mailbox::open(&path).unwrap();
        assert_eq!(mbox.kind(), MailboxKind::Mbox);
        assert_eq!(mbox.keys(), ["0", "1"]);
        let raw = mbox.get_raw_bytes(1).unwrap();
        assert!(raw.starts_with(b"From: a@x\nTo: c@x"));
        assert!(mbox.get_raw_bytes(2).is_err());

        let header = mbox.get_parsed(0).unwrap().unwrap();
        assert_eq!(header.to[0].address, "b@x");
    }

    #[test]
    fn test_missing_mailbox() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            Mailbox::open(&dir.path().join("nope")),
            Err(LearnError::MailboxNotFound(_))
        ));
    }

    #[test]
    fn test_empty_file_is_empty_mbox() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty");
        std::fs::write(&path, b"").unwrap();
        let mbox = Mailbox::open(&path).unwrap();
        assert!(mbox.is_empty());
    }

    #[test]
    fn test_gzip_mbox() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("inbox.gz");
        let mut encoder =
            flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
        encoder.write_all(MBOX).unwrap();
        std::fs::write(&path, encoder.finish().unwrap()).unwrap();

        let mbox = Mailbox::open(&path).unwrap();
        assert_eq!(mbox.kind(), MailboxKind::Mbox);
        assert_eq!(mbox.len(), 2);
    }

    #[test]
    fn test_bzip2_mmdf() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("box.bz2");
        let mut encoder =
            bzip2::write::BzEncoder::new(Vec::new(), bzip2::Compression::default());
        encoder
            .write_all(b"\x01\x01\x01\x01\nFrom: a@x\nTo: b@x\n\nHi\n\x01\x01\x01\x01\n")
            .unwrap();
        std::fs::write(&path, encoder.finish().unwrap()).unwrap();

        let mbox = Mailbox::open(&path).unwrap();
        assert_eq!(mbox.kind(), MailboxKind::Mmdf);
        assert_eq!(mbox.get_raw_bytes(0).unwrap(), b"From: a@x\nTo: b@x\n\nHi\n");
    }

    #[test]
    fn test_maildir_and_mh_detection() {
        let dir = tempfile::tempdir().unwrap();
        let maildir = dir.path().join("Maildir");
        std::fs::create_dir_all(maildir.join("cur")).unwrap();
        std::fs::create_dir_all(maildir.join("new")).unwrap();
        std::fs::write(maildir.join("cur/2.host:2,S"), b"From: a@x\n\nx\n").unwrap();
        std::fs::write(maildir.join("new/1.host"), b"From: a@x\n\ny\n").unwrap();
        std::fs::write(maildir.join("cur/.hidden"), b"").unwrap();

        let md = Mailbox::open(&maildir).unwrap();
        assert_eq!(md.kind(), MailboxKind::Maildir);
        assert_eq!(md.keys(), ["new/1.host", "cur/2.host:2,S"]);

        let mh = dir.path().join("mh");
        std::fs::create_dir_all(&mh).unwrap();
        for n in ["10", "2", ".mh_sequences"] {
            std::fs::write(mh.join(n), b"From: a@x\n\nz\n").unwrap();
        }
        let folder = Mailbox::open(&mh).unwrap();
        assert_eq!(folder.kind(), MailboxKind::Mh);
        assert_eq!(folder.keys(), ["2", "10"]);
    }

    #[test]
    fn test_babyl_detection() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("RMAIL");
        std::fs::write(
            &path,
            b"BABYL OPTIONS: -*- rmail -*-\n\x1f\x0c\n0, unseen,,\nFrom: a@x\nTo: b@x\n\nHi\n\x1f",
        )
        .unwrap();
        let mbox = Mailbox::open(&path).unwrap();
        assert_eq!(mbox.kind(), MailboxKind::Babyl);
        assert_eq!(mbox.len(), 1);
        let messages: Vec<RawMessage> = mbox.messages().collect::<Result<_>>().unwrap();
        assert!(messages[0].bytes.starts_with(b"From: a@x"));
        assert!(messages[0].position().ends_with("RMAIL#0"));
    }
}
