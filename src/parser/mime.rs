//! MIME body extraction: locate the first `text/plain` part, undo its
//! transfer encoding, and decode it to text with a strict charset.

use std::collections::BTreeSet;

use mail_parser::{MessageParser, MessagePart, MimeHeaders};
use tracing::debug;

use super::eml::split_header_body;
use super::header::{decode_base64, decode_charset_strict, hex_byte};
use crate::error::Rejection;

/// A decoded plain-text body.
#[derive(Debug, Clone, PartialEq)]
pub struct TextBody {
    /// Normalized text: LF line endings, no leading or trailing newlines.
    pub text: String,
    /// Lower-cased charset the body was decoded with.
    pub charset: String,
}

/// Extract and decode the plain-text body of a record.
///
/// Without a declared charset each of `assumed_charsets` is tried in order.
/// A pure-ASCII result adopts one of `header_encodings` so replies keep the
/// richer charset the sender used in the headers.
pub fn extract_text_body(
    raw: &[u8],
    assumed_charsets: &[String],
    header_encodings: &BTreeSet<String>,
) -> Result<TextBody, Rejection> {
    let located = locate_text_part(raw)?;
    let payload = match located.transfer_encoding.as_deref() {
        Some("base64") => decode_base64(&located.payload),
        Some("quoted-printable") => decode_quoted_printable(&located.payload),
        _ => located.payload,
    };

    let (decoded, mut charset) = match located.charset {
        Some(charset) => {
            let text = decode_charset_strict(&charset, &payload)
                .ok_or_else(|| Rejection::UndecodableBody(charset.clone()))?;
            (text, charset)
        }
        None => assumed_charsets
            .iter()
            .find_map(|charset| {
                decode_charset_strict(charset, &payload).map(|text| (text, charset.to_lowercase()))
            })
            .ok_or_else(|| Rejection::UndecodableBody(assumed_charsets.join(",")))?,
    };

    if charset == "us-ascii" {
        if let Some(richer) = header_encodings.iter().find(|e| e.as_str() != "us-ascii") {
            charset = richer.clone();
        }
    }

    let text = decoded.replace("\r\n", "\n").trim_matches('\n').to_string();
    if text.is_empty() {
        return Err(Rejection::EmptyBody);
    }

    Ok(TextBody { text, charset })
}

struct LocatedPart {
    payload: Vec<u8>,
    charset: Option<String>,
    transfer_encoding: Option<String>,
}

fn locate_text_part(raw: &[u8]) -> Result<LocatedPart, Rejection> {
    let Some(message) = MessageParser::default().parse(raw) else {
        debug!("MIME structure unparseable, treating body as plain text");
        let (_, body) = split_header_body(raw);
        return Ok(LocatedPart {
            payload: body.to_vec(),
            charset: None,
            transfer_encoding: None,
        });
    };

    let root = message
        .parts
        .first()
        .ok_or_else(|| Rejection::UnsupportedContentType("empty message".to_string()))?;
    let root_type = mime_type(root);

    let part = if root_type.starts_with("multipart/") {
        message
            .parts
            .iter()
            .find(|p| mime_type(p) == "text/plain")
            .ok_or(Rejection::NoTextPart(root_type))?
    } else if root_type == "text/plain" {
        root
    } else {
        return Err(Rejection::UnsupportedContentType(root_type));
    };

    let raw_message = message.raw_message();
    let payload = raw_message
        .get(part.raw_body_offset()..part.raw_end_offset())
        .unwrap_or_default()
        .to_vec();

    Ok(LocatedPart {
        payload,
        charset: part
            .content_type()
            .and_then(|ct| ct.attribute("charset"))
            .map(|c| c.trim().to_lowercase())
            .filter(|c| !c.is_empty()),
        transfer_encoding: part
            .content_transfer_encoding()
            .map(|e| e.trim().to_lowercase()),
    })
}

/// Lower-cased `type/subtype`; parts without a Content-Type are `text/plain`.
fn mime_type(part: &MessagePart<'_>) -> String {
    match part.content_type() {
        Some(ct) => match ct.subtype() {
            Some(sub) => format!("{}/{}", ct.ctype(), sub).to_lowercase(),
            None => ct.ctype().to_lowercase(),
        },
        None => "text/plain".to_string(),
    }
}

/// Decode a quoted-printable payload (RFC 2045 §6.7).
fn decode_quoted_printable(input: &[u8]) -> Vec<u8> {
    let mut result = Vec::with_capacity(input.len());
    let mut i = 0;
    while i < input.len() {
        if input[i] != b'=' {
            result.push(input[i]);
            i += 1;
            continue;
        }
        let rest = &input[i + 1..];
        if rest.starts_with(b"\r\n") {
            i += 3;
        } else if rest.starts_with(b"\n") {
            i += 2;
        } else if let Some(byte) = rest
            .get(..2)
            .and_then(|hex| hex_byte(hex[0], hex[1]))
        {
            result.push(byte);
            i += 3;
        } else {
            result.push(b'=');
            i += 1;
        }
    }
    result
}
