//! Cache-aware scan of one or more mailboxes.
//!
//! For every record the scanner first asks the cache whether the record is
//! unchanged. Unchanged records are rebuilt from their cached attributes;
//! everything else goes through the header and body steps and the outcome
//! is written back. Messages that survive the filters are folded into a
//! [`RecipientMap`].

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::aggregate::{aggregate_from_cache, RecipientMap};
use crate::cache::lock::CacheLock;
use crate::cache::metadata::CacheMetadata;
use crate::cache::store::{CacheEntry, CacheMode, MessageCache};
use crate::cache::CachePaths;
use crate::config::ScanOptions;
use crate::error::{LearnError, Rejection, Result};
use crate::model::message::{age_in_days, Message};
use crate::parser::language::LanguageGuesser;
use crate::parser::message::MessageParser;
use crate::store::mailbox::{Mailbox, RawMessage};

/// Where the recipient statistics come from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ScanMode {
    /// Read every mailbox, updating the cache.
    #[default]
    Full,
    /// Aggregate cached records only; no mailbox is opened.
    CacheOnly,
}

/// Counters of one scan.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct ScanStats {
    pub seen: usize,
    pub cache_hits: usize,
    pub parsed: usize,
    pub rejected: usize,
    pub filtered: usize,
    pub without_id: usize,
}

impl ScanStats {
    /// Number of messages folded into the recipient statistics.
    pub fn learned(&self) -> usize {
        self.seen - self.rejected - self.filtered
    }

    /// Counters gathered since `earlier` was taken.
    fn since(&self, earlier: &ScanStats) -> ScanStats {
        ScanStats {
            seen: self.seen - earlier.seen,
            cache_hits: self.cache_hits - earlier.cache_hits,
            parsed: self.parsed - earlier.parsed,
            rejected: self.rejected - earlier.rejected,
            filtered: self.filtered - earlier.filtered,
            without_id: self.without_id - earlier.without_id,
        }
    }
}

/// What happened to one record.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// Reused from the cache and folded.
    CacheHit,
    /// Parsed and folded.
    Parsed,
    Rejected(Rejection),
    Filtered(&'static str),
}

/// Why `message` must not be learned from, if it must not.
pub fn filter_reason(message: &Message, options: &ScanOptions) -> Option<&'static str> {
    let attrs = &message.attrs;
    if options.skip_multiple_recipients && attrs.to_addresses.len() > 1 {
        return Some("multiple recipients");
    }
    if options.exclude_mails_to_me && attrs.to_addresses.iter().any(|a| options.addresses.is_me(a))
    {
        return Some("sent to me");
    }
    if options.only_include_mails_from_me && !options.addresses.is_me(&attrs.from_address) {
        return Some("not sent by me");
    }
    if options.max_age >= 0 && message.age_days > options.max_age {
        return Some("too old");
    }
    None
}

pub struct Scanner<'a> {
    options: &'a ScanOptions,
    parser: MessageParser<'a>,
    cache: MessageCache,
    recipients: RecipientMap,
    stats: ScanStats,
    now: DateTime<Utc>,
}

impl<'a> Scanner<'a> {
    pub fn new(
        options: &'a ScanOptions,
        guesser: &'a dyn LanguageGuesser,
        cache: MessageCache,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            options,
            parser: MessageParser::new(options, guesser),
            cache,
            recipients: RecipientMap::new(options.weight_formula),
            stats: ScanStats::default(),
            now,
        }
    }

    /// Scan every message of `mailbox`.
    ///
    /// `progress` is called with `(done, total)` after each message.
    pub fn scan_mailbox(
        &mut self,
        mailbox: &Mailbox,
        progress: Option<&dyn Fn(usize, usize)>,
    ) -> Result<ScanStats> {
        let before = self.stats;
        let total = mailbox.len();
        for (done, raw) in mailbox.messages().enumerate() {
            self.scan_message(&raw?);
            if let Some(cb) = progress {
                cb(done + 1, total);
            }
        }

        let delta = self.stats.since(&before);
        info!(
            mailbox = %mailbox.path().display(),
            seen = delta.seen,
            cache_hits = delta.cache_hits,
            parsed = delta.parsed,
            rejected = delta.rejected,
            filtered = delta.filtered,
            "Scanned mailbox"
        );
        Ok(delta)
    }

    /// Process one record and fold it if it qualifies.
    pub fn scan_message(&mut self, raw: &RawMessage) -> Outcome {
        self.stats.seen += 1;
        let message = self.parser.identify(raw);
        let cached = message
            .msgid
            .as_deref()
            .filter(|id| !self.cache.has_changed(id, message.checksum))
            .and_then(|id| self.cache.lookup(id))
            .cloned();

        let outcome = match (message.msgid.clone(), cached) {
            (Some(msgid), Some(entry)) => self.reuse_cached(message, &msgid, entry),
            (Some(msgid), None) => self.parse(message, raw, Some(&msgid)),
            (None, _) => {
                self.stats.without_id += 1;
                self.parse(message, raw, None)
            }
        };

        match &outcome {
            Outcome::Rejected(_) => self.stats.rejected += 1,
            Outcome::Filtered(_) => self.stats.filtered += 1,
            Outcome::CacheHit => self.stats.cache_hits += 1,
            Outcome::Parsed => self.stats.parsed += 1,
        }
        outcome
    }

    fn reuse_cached(&mut self, mut message: Message, msgid: &str, mut entry: CacheEntry) -> Outcome {
        // Identical bytes may show up in another mailbox; keep the path current.
        if entry.attrs.mailbox_path != message.attrs.mailbox_path {
            entry.attrs.mailbox_path = message.attrs.mailbox_path.clone();
            self.cache.store(msgid, entry.clone());
        } else {
            self.cache.touch(msgid);
        }

        if let Some(rejection) = entry.rejection {
            debug!(msgid, reason = %rejection, "Skipping cached rejected message");
            return Outcome::Rejected(rejection);
        }
        message.attrs = entry.attrs;
        message.age_days = age_in_days(message.attrs.timestamp, self.now);

        if let Some(reason) = filter_reason(&message, self.options) {
            debug!(msgid, reason, "Filtered cached message");
            return Outcome::Filtered(reason);
        }
        self.recipients.fold(&message);
        Outcome::CacheHit
    }

    fn parse(&mut self, message: Message, raw: &RawMessage, msgid: Option<&str>) -> Outcome {
        let parsed = match self.parser.parse_header(message, raw, self.now) {
            Ok(parsed) => parsed,
            Err(rejection) => {
                debug!(position = %raw.position(), reason = %rejection, "Rejected message");
                return Outcome::Rejected(rejection);
            }
        };

        if let Some(reason) = filter_reason(&parsed.message, self.options) {
            debug!(id = parsed.message.log_id(), reason, "Filtered message");
            return Outcome::Filtered(reason);
        }

        let (message, rejection) = self.parser.parse_body(parsed, raw);
        if let Some(msgid) = msgid {
            self.cache.store(
                msgid,
                CacheEntry {
                    checksum: message.checksum,
                    attrs: message.attrs.clone(),
                    rejection: rejection.clone(),
                },
            );
        }
        if let Some(rejection) = rejection {
            debug!(id = message.log_id(), reason = %rejection, "Rejected message");
            return Outcome::Rejected(rejection);
        }

        self.recipients.fold(&message);
        Outcome::Parsed
    }

    pub fn stats(&self) -> ScanStats {
        self.stats
    }

    /// Hand back the cache for committing, plus the results.
    pub fn finish(self) -> (MessageCache, RecipientMap, ScanStats) {
        (self.cache, self.recipients, self.stats)
    }
}

/// Inputs of a complete learning run.
#[derive(Debug, Clone)]
pub struct LearnRequest {
    pub mailboxes: Vec<PathBuf>,
    pub cache_dir: PathBuf,
    pub cache_mode: CacheMode,
    pub scan_mode: ScanMode,
}

/// Results of a complete learning run.
#[derive(Debug)]
pub struct LearnReport {
    pub recipients: RecipientMap,
    pub stats: ScanStats,
    /// Why the cache was rebuilt, if it was.
    pub rebuild_reason: Option<String>,
}

/// Lock the cache, scan (or read the cache), and commit.
///
/// `progress` is called with `(mailbox, done, total)`.
pub fn learn(
    options: &ScanOptions,
    guesser: &dyn LanguageGuesser,
    request: &LearnRequest,
    now: DateTime<Utc>,
    progress: Option<&dyn Fn(&Path, usize, usize)>,
) -> Result<LearnReport> {
    let paths = CachePaths::new(&request.cache_dir);
    std::fs::create_dir_all(&paths.dir).map_err(|e| LearnError::io(&paths.dir, e))?;
    let _lock = CacheLock::acquire(&paths.lock)?;

    let metadata = CacheMetadata::current(options);
    let saved = match CacheMetadata::load(&paths.metadata) {
        Ok(saved) => saved,
        Err(e @ LearnError::InvalidCache { .. }) => {
            warn!(error = %e, "Ignoring cache metadata");
            None
        }
        Err(e) => return Err(e),
    };
    let rebuild_reason = metadata.rebuild_reason(saved.as_ref());

    if request.scan_mode == ScanMode::CacheOnly {
        if let Some(reason) = &rebuild_reason {
            warn!(reason = %reason, "Cache does not match the configuration, output may be stale");
        }
        let cache = MessageCache::open(&paths.messages, CacheMode::default())?;
        let (recipients, stats) = aggregate_from_cache(&cache, options, now);
        return Ok(LearnReport {
            recipients,
            stats,
            rebuild_reason,
        });
    }

    let mut mode = request.cache_mode;
    if let Some(reason) = &rebuild_reason {
        info!(reason = %reason, "Rebuilding message cache");
        mode.rebuild = true;
    }
    let cache = MessageCache::open(&paths.messages, mode)?;

    let mut scanner = Scanner::new(options, guesser, cache, now);
    for path in &request.mailboxes {
        let mailbox = Mailbox::open(path)?;
        let mailbox_path = mailbox.path().to_path_buf();
        let forward = |done: usize, total: usize| {
            if let Some(cb) = progress {
                cb(&mailbox_path, done, total);
            }
        };
        scanner.scan_mailbox(&mailbox, Some(&forward))?;
    }

    let (cache, recipients, stats) = scanner.finish();
    let committed = cache.commit()?;
    debug!(stored = committed.stored, removed = committed.removed, "Cache committed");
    if rebuild_reason.is_some() {
        metadata.save(&paths.metadata)?;
    }

    info!(
        seen = stats.seen,
        learned = stats.learned(),
        recipients = recipients.len(),
        "Scan finished"
    );
    Ok(LearnReport {
        recipients,
        stats,
        rebuild_reason,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::parser::language::NoGuesser;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 10, 12, 0, 0).unwrap()
    }

    fn options(edit: impl FnOnce(&mut Config)) -> ScanOptions {
        let mut config = Config::default();
        config.addresses.alternates = vec![r"me@x\.org".to_string()];
        edit(&mut config);
        config.resolve().unwrap()
    }

    fn message(from: &str, to: &[&str], age_days: i64) -> Message {
        let mut message = Message {
            msgid: None,
            position: "box#0".to_string(),
            checksum: 0,
            age_days,
            attrs: Default::default(),
        };
        message.attrs.from_address = from.to_string();
        message.attrs.set_recipients(to.iter().map(|s| s.to_string()));
        message
    }

    fn raw(id: &str, body: &str) -> RawMessage {
        RawMessage {
            mailbox_path: "/mail/sent".to_string(),
            key: "0".to_string(),
            bytes: format!(
                "Message-ID: <{id}>\nFrom: me@x.org\nTo: bob@y.org\n\
Date: Sun, 10 Mar 2024 12:00:00 +0000\n\n{body}"
            )
            .into_bytes(),
        }
    }

    #[test]
    fn test_filters() {
        let opts = options(|_| {});
        assert_eq!(filter_reason(&message("me@x.org", &["a@y"], 0), &opts), None);
        assert_eq!(
            filter_reason(&message("other@x.org", &["a@y"], 0), &opts),
            Some("not sent by me")
        );
        assert_eq!(
            filter_reason(&message("me@x.org", &["a@y", "me@x.org"], 0), &opts),
            Some("sent to me")
        );

        let opts = options(|c| {
            c.scan.skip_multiple_recipients = true;
            c.scan.max_age = 30;
        });
        assert_eq!(
            filter_reason(&message("me@x.org", &["a@y", "b@y"], 0), &opts),
            Some("multiple recipients")
        );
        assert_eq!(filter_reason(&message("me@x.org", &["a@y"], 30), &opts), None);
        assert_eq!(
            filter_reason(&message("me@x.org", &["a@y"], 31), &opts),
            Some("too old")
        );
    }

    #[test]
    fn test_scan_message_caches_and_reuses() {
        let dir = tempfile::tempdir().unwrap();
        let opts = options(|_| {});
        let cache = MessageCache::open(dir.path().join("c"), CacheMode::default()).unwrap();
        let mut scanner = Scanner::new(&opts, &NoGuesser, cache, now());

        let record = raw("a@x.org", "Hi Bob,\n\nText.\n");
        assert_eq!(scanner.scan_message(&record), Outcome::Parsed);
        assert_eq!(scanner.scan_message(&record), Outcome::CacheHit);

        let empty = raw("b@x.org", "\n\n");
        assert_eq!(
            scanner.scan_message(&empty),
            Outcome::Rejected(Rejection::EmptyBody)
        );
        assert_eq!(
            scanner.scan_message(&empty),
            Outcome::Rejected(Rejection::EmptyBody)
        );

        let stats = scanner.stats();
        assert_eq!(stats.seen, 4);
        assert_eq!(stats.cache_hits, 1);
        assert_eq!(stats.parsed, 1);
        assert_eq!(stats.rejected, 2);
        assert_eq!(stats.learned(), 2);

        let (cache, recipients, _) = scanner.finish();
        assert_eq!(cache.len(), 2);
        let bob = recipients.get("bob@y.org").unwrap();
        assert_eq!(
            bob.weights(crate::model::recipient::Attribute::Greeting).get("Hi Bob,"),
            Some(2.0)
        );
    }
}
