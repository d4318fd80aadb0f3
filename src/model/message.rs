//! One scanned mail and the attribute record persisted in the cache.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};

const SECONDS_PER_DAY: i64 = 86_400;

/// The attributes learned from a single message.
///
/// This is exactly what the message cache stores per message identifier, so
/// a cache hit can rebuild a [`Message`] without touching the body again.
/// String attributes that could not be extracted are empty.
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct MessageAttributes {
    /// Real path of the mailbox the message was found in.
    pub mailbox_path: String,
    /// Complete decoded `From:` header.
    pub from_header: String,
    /// Lower-cased sender address.
    pub from_address: String,
    /// Sender display name as written.
    pub from_display_name: String,
    /// Lower-cased recipient addresses.
    pub to_addresses: BTreeSet<String>,
    /// Recipient addresses sorted and joined by a single space.
    pub to_addresses_key: String,
    /// Send time as Unix timestamp (seconds).
    pub timestamp: i64,
    pub charset: String,
    pub signature: String,
    pub greeting: String,
    pub goodbye: String,
    pub language: String,
}

impl MessageAttributes {
    /// Set the recipient set and derive its canonical key.
    pub fn set_recipients(&mut self, addresses: impl IntoIterator<Item = String>) {
        self.to_addresses = addresses.into_iter().map(|a| a.to_lowercase()).collect();
        self.to_addresses_key = recipients_key(&self.to_addresses);
    }
}

/// Canonical aggregation key of a recipient set: sorted, space-joined.
pub fn recipients_key(addresses: &BTreeSet<String>) -> String {
    addresses
        .iter()
        .map(String::as_str)
        .collect::<Vec<_>>()
        .join(" ")
}

/// A message taken from a mailbox, together with its identity data.
#[derive(Debug, Clone)]
pub struct Message {
    /// Value of the `Message-ID` header; `None` disables caching.
    pub msgid: Option<String>,
    /// Store-specific position (`<mailbox>#<key>`), used in log output.
    pub position: String,
    /// Adler-32 checksum of the raw record.
    pub checksum: u32,
    /// Whole days between `attrs.timestamp` and the scan time.
    pub age_days: i64,
    pub attrs: MessageAttributes,
}

impl Message {
    /// Identifier used in log messages: the Message-ID or the position key.
    pub fn log_id(&self) -> &str {
        self.msgid.as_deref().unwrap_or(&self.position)
    }

    /// Set the send time and recompute the age relative to `now`.
    pub fn set_time(&mut self, timestamp: i64, now: DateTime<Utc>) {
        self.attrs.timestamp = timestamp;
        self.age_days = age_in_days(timestamp, now);
    }
}

/// `floor((now - timestamp) / 86400)`.
pub fn age_in_days(timestamp: i64, now: DateTime<Utc>) -> i64 {
    (now.timestamp() - timestamp).div_euclid(SECONDS_PER_DAY)
}
