//! RFC 5322 header parsing: folding, encoded-words (RFC 2047), and date parsing.

use std::collections::BTreeSet;
use std::sync::LazyLock;

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use regex::bytes::Regex;
use tracing::{debug, warn};

use crate::error::Rejection;
use crate::model::address::EmailAddress;

/// The header fields the scanner learns from.
#[derive(Debug, Clone)]
pub struct HeaderFields {
    /// Complete decoded `From:` header.
    pub from_header: String,
    pub from: EmailAddress,
    pub to: Vec<EmailAddress>,
    /// `None` if the `Date:` header is missing or unparseable.
    pub date: Option<DateTime<Utc>>,
    /// Lower-cased charsets named by encoded-words in `From:` and `To:`.
    pub encodings_used: BTreeSet<String>,
}

impl HeaderFields {
    /// Parse the header section of a record.
    ///
    /// `From:` and `To:` must decode strictly; a missing sender or an empty
    /// recipient list rejects the message.
    pub fn parse(raw_headers: &[u8]) -> Result<Self, Rejection> {
        let text = decode_header_bytes(raw_headers);
        let headers = unfold_headers(&text);
        let mut encodings_used = BTreeSet::new();

        let from_raw = get_header(&headers, "from").unwrap_or_default();
        let from_header = decode_encoded_words_strict(from_raw, &mut encodings_used)
            .ok_or_else(|| Rejection::UndecodableHeader("From".to_string()))?;

        let to_raw = get_header(&headers, "to").unwrap_or_default();
        let to_header = decode_encoded_words_strict(to_raw, &mut encodings_used)
            .ok_or_else(|| Rejection::UndecodableHeader("To".to_string()))?;

        let date = get_header(&headers, "date").and_then(|d| parse_date(&decode_encoded_words(d)));

        let from = EmailAddress::parse_list(&from_header)
            .into_iter()
            .next()
            .ok_or(Rejection::NoSender)?;

        let to = EmailAddress::parse_list(&to_header);
        if to.is_empty() {
            return Err(Rejection::NoRecipient);
        }

        Ok(Self {
            from_header,
            from,
            to,
            date,
            encodings_used,
        })
    }
}

/// Extracts the `Message-ID` field value from a header section.
pub struct MessageIdMatcher {
    re: Regex,
}

impl Default for MessageIdMatcher {
    fn default() -> Self {
        Self {
            re: Regex::new(r"(?msi)^Message-ID:[ \t]*(.*?)\n[^ \t]").expect("valid pattern"),
        }
    }
}

impl MessageIdMatcher {
    /// The trimmed Message-ID, or `None` if the header is absent or empty.
    ///
    /// `headers` must include the blank line that ends the header section.
    pub fn find(&self, headers: &[u8]) -> Option<String> {
        let caps = self.re.captures(headers)?;
        let id = String::from_utf8_lossy(caps.get(1)?.as_bytes())
            .trim()
            .to_string();
        (!id.is_empty()).then_some(id)
    }
}

/// An RFC 2047 encoded-word: charset, `B`/`Q` marker, and encoded text.
static ENCODED_WORD: LazyLock<regex::Regex> = LazyLock::new(|| {
    regex::Regex::new(r"=\?([^?\s]+)\?([bBqQ])\?([^?]*)\?=").expect("valid pattern")
});

/// Header bytes as text: UTF-8 when valid, Windows-1252 otherwise.
pub(crate) fn decode_header_bytes(bytes: &[u8]) -> String {
    let bytes = bytes.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(bytes);
    String::from_utf8(bytes.to_vec())
        .unwrap_or_else(|_| encoding_rs::WINDOWS_1252.decode(bytes).0.into_owned())
}

/// Split a header section into `(lower-cased name, unfolded value)` fields.
///
/// Continuation lines are joined with a single space. Parsing stops at the
/// first empty line.
pub(crate) fn unfold_headers(text: &str) -> Vec<(String, String)> {
    let mut fields: Vec<(String, String)> = Vec::new();
    for line in text.lines().take_while(|line| !line.is_empty()) {
        match (line.strip_prefix([' ', '\t']), fields.last_mut()) {
            (Some(folded), Some((_, value))) => {
                value.push(' ');
                value.push_str(folded.trim());
            }
            (Some(_), None) => {}
            (None, _) => {
                if let Some((name, value)) = line.split_once(':') {
                    fields.push((name.trim().to_ascii_lowercase(), value.trim().to_string()));
                }
            }
        }
    }
    fields
}

pub(crate) fn get_header<'a>(fields: &'a [(String, String)], name: &str) -> Option<&'a str> {
    fields
        .iter()
        .find_map(|(field, value)| (field == name).then_some(value.as_str()))
}

/// Decode the encoded-words of a header value, replacing anything
/// undecodable.
pub fn decode_encoded_words(input: &str) -> String {
    decode_words_with(input, |charset, bytes| {
        Some(decode_charset_lossy(charset, bytes))
    })
    .unwrap_or_else(|| input.to_string())
}

/// Decode the encoded-words of a header value.
///
/// Returns `None` when a word names an unknown charset or carries bytes
/// that are invalid in it. Every charset named by a word is added to `used`.
pub fn decode_encoded_words_strict(input: &str, used: &mut BTreeSet<String>) -> Option<String> {
    decode_words_with(input, |charset, bytes| {
        let charset = charset.to_lowercase();
        let decoded = decode_charset_strict(&charset, bytes);
        if decoded.is_none() {
            debug!(charset = %charset, "Invalid encoded-word");
        }
        used.insert(charset);
        decoded
    })
}

fn decode_words_with(
    input: &str,
    mut decode: impl FnMut(&str, &[u8]) -> Option<String>,
) -> Option<String> {
    let mut out = String::with_capacity(input.len());
    let mut copied = 0;
    for caps in ENCODED_WORD.captures_iter(input) {
        let word = caps.get(0)?;
        let gap = &input[copied..word.start()];
        // Whitespace between adjacent words is not part of the text.
        if copied == 0 || !gap.trim().is_empty() {
            out.push_str(gap);
        }

        // Drop an RFC 2231 language suffix such as `utf-8*en`.
        let charset = caps[1].split('*').next().unwrap_or_default();
        let text = caps[3].as_bytes();
        let bytes = if caps[2].eq_ignore_ascii_case("b") {
            decode_base64(text)
        } else {
            decode_q_encoding(text)
        };
        out.push_str(&decode(charset, &bytes)?);
        copied = word.end();
    }
    out.push_str(&input[copied..]);
    Some(out)
}

/// Decode base64, skipping whitespace and anything outside the alphabet.
/// Decoding stops at the first `=`.
pub(crate) fn decode_base64(input: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(input.len() / 4 * 3);
    let mut acc: u32 = 0;
    let mut bits = 0u32;
    for &c in input {
        let value = match c {
            b'A'..=b'Z' => c - b'A',
            b'a'..=b'z' => c - b'a' + 26,
            b'0'..=b'9' => c - b'0' + 52,
            b'+' => 62,
            b'/' => 63,
            b'=' => break,
            _ => continue,
        };
        acc = (acc << 6) | u32::from(value);
        bits += 6;
        if bits >= 8 {
            bits -= 8;
            out.push((acc >> bits) as u8);
            acc &= (1 << bits) - 1;
        }
    }
    out
}

/// The `Q` encoding: `_` is a space and `=XX` a hex byte. A malformed
/// escape is kept as is.
fn decode_q_encoding(text: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(text.len());
    let mut rest = text;
    while let Some((&c, tail)) = rest.split_first() {
        if c == b'=' {
            if let [hi, lo, after @ ..] = tail {
                if let Some(byte) = hex_byte(*hi, *lo) {
                    out.push(byte);
                    rest = after;
                    continue;
                }
            }
        }
        out.push(if c == b'_' { b' ' } else { c });
        rest = tail;
    }
    out
}

/// Value of two ASCII hex digits.
pub(crate) fn hex_byte(hi: u8, lo: u8) -> Option<u8> {
    let digit = |c: u8| (c as char).to_digit(16);
    Some((digit(hi)? * 16 + digit(lo)?) as u8)
}

/// Decode bytes strictly using a named charset.
///
/// `us-ascii` accepts only 7-bit bytes and `utf-8` only valid UTF-8.
/// Returns `None` for unknown charsets and invalid input.
pub(crate) fn decode_charset_strict(charset: &str, bytes: &[u8]) -> Option<String> {
    match charset.to_lowercase().as_str() {
        "us-ascii" | "ascii" => bytes
            .is_ascii()
            .then(|| String::from_utf8_lossy(bytes).into_owned()),
        "utf-8" | "utf8" => std::str::from_utf8(bytes).ok().map(str::to_string),
        label => encoding_rs::Encoding::for_label(label.as_bytes())?
            .decode_without_bom_handling_and_without_replacement(bytes)
            .map(|s| s.into_owned()),
    }
}

/// Decode bytes using a named charset, replacing anything undecodable.
fn decode_charset_lossy(charset: &str, bytes: &[u8]) -> String {
    match encoding_rs::Encoding::for_label(charset.as_bytes()) {
        Some(encoding) => {
            let (decoded, _, _) = encoding.decode(bytes);
            decoded.into_owned()
        }
        None => {
            warn!(
                charset = charset,
                "Unknown charset, falling back to UTF-8 lossy"
            );
            String::from_utf8_lossy(bytes).into_owned()
        }
    }
}

/// Formats tried after the weekday, comments, and zone names are removed.
const LOOSE_DATE_FORMATS: &[&str] = &[
    "%d %b %Y %H:%M:%S %z",
    "%d %b %Y %H:%M %z",
    "%b %d %H:%M:%S %Y %z",
    "%Y-%m-%d %H:%M:%S %z",
];

/// Same as [`LOOSE_DATE_FORMATS`], for dates without any zone (taken as UTC).
const NAIVE_DATE_FORMATS: &[&str] = &[
    "%d %b %Y %H:%M:%S",
    "%d %b %Y %H:%M",
    "%b %d %H:%M:%S %Y",
    "%Y-%m-%d %H:%M:%S",
    "%d/%m/%Y %H:%M:%S",
];

const ZONE_OFFSETS: &[(&str, &str)] = &[
    ("UT", "+0000"),
    ("UTC", "+0000"),
    ("GMT", "+0000"),
    ("Z", "+0000"),
    ("EST", "-0500"),
    ("EDT", "-0400"),
    ("CST", "-0600"),
    ("CDT", "-0500"),
    ("MST", "-0700"),
    ("MDT", "-0600"),
    ("PST", "-0800"),
    ("PDT", "-0700"),
    ("CET", "+0100"),
    ("CEST", "+0200"),
    ("JST", "+0900"),
];

/// Parse a `Date:` header value, including offset.
///
/// Strict RFC 2822 and RFC 3339 come first; then a cleaned-up form is tried
/// against a few common variants, and finally mail-parser's own parser.
pub fn parse_date(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }

    let parsed = DateTime::parse_from_rfc2822(value)
        .or_else(|_| DateTime::parse_from_rfc3339(value))
        .map(|dt| dt.with_timezone(&Utc))
        .ok()
        .or_else(|| parse_loose_date(value))
        .or_else(|| mail_parser_date(value));

    if parsed.is_none() {
        debug!(date = value, "Could not parse date");
    }
    parsed
}

/// Normalize `value` into `day mon year time [offset]` tokens and try the
/// loose formats on it.
fn parse_loose_date(value: &str) -> Option<DateTime<Utc>> {
    let without_comment = value.split('(').next().unwrap_or(value);
    let mut tokens: Vec<String> = Vec::new();
    for token in without_comment.split_whitespace() {
        let token = token.trim_end_matches(',');
        // "16-JUL-2025" (IMAP style)
        let parts: Vec<&str> = token.split('-').collect();
        if parts.len() == 3 && parts[1].chars().all(|c| c.is_ascii_alphabetic()) {
            tokens.extend(parts.iter().map(|p| p.to_string()));
        } else if !token.is_empty() {
            tokens.push(token.to_string());
        }
    }

    if tokens.first().is_some_and(|t| is_weekday(t)) {
        tokens.remove(0);
    }
    if let Some(last) = tokens.last_mut() {
        if let Some((_, offset)) = ZONE_OFFSETS
            .iter()
            .find(|(name, _)| last.eq_ignore_ascii_case(name))
        {
            *last = offset.to_string();
        }
    }

    let candidate = tokens.join(" ");
    LOOSE_DATE_FORMATS
        .iter()
        .find_map(|fmt| DateTime::parse_from_str(&candidate, fmt).ok())
        .map(|dt| dt.with_timezone(&Utc))
        .or_else(|| {
            NAIVE_DATE_FORMATS
                .iter()
                .find_map(|fmt| NaiveDateTime::parse_from_str(&candidate, fmt).ok())
                .map(|ndt| Utc.from_utc_datetime(&ndt))
        })
}

fn is_weekday(token: &str) -> bool {
    const DAYS: [&str; 7] = ["mon", "tue", "wed", "thu", "fri", "sat", "sun"];
    token.len() >= 3
        && token.chars().all(|c| c.is_ascii_alphabetic())
        && DAYS.contains(&token[..3].to_ascii_lowercase().as_str())
}

/// mail-parser's date parser, which copes with some remaining oddities.
fn mail_parser_date(value: &str) -> Option<DateTime<Utc>> {
    let wrapped = format!("Date: {value}\n\n");
    let message = mail_parser::MessageParser::default().parse(wrapped.as_bytes())?;
    let date = message.date()?;
    DateTime::from_timestamp(date.to_timestamp(), 0)
}
