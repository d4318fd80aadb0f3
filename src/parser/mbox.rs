//! Record splitting for single-file mailboxes (mbox, MMDF, Babyl).
//!
//! The splitters work on a complete in-memory view of the file (a memory map
//! or a decompressed buffer) and never copy message data for mbox and MMDF;
//! they only return byte ranges. Tolerant of malformed input:
//!
//! - Mixed `\n` and `\r\n` line endings
//! - `From ` lines not preceded by a blank line (logs a warning)
//! - Truncated messages at EOF
//! - UTF-8 BOM at the start of the file

use std::ops::Range;

use tracing::{debug, warn};

/// MMDF message delimiter line (without its line ending).
const MMDF_DELIMITER: &[u8] = b"\x01\x01\x01\x01";

/// Leading bytes of every Babyl file.
pub const BABYL_MAGIC: &[u8] = b"BABYL OPTIONS:";

/// Separator between the original and the visible headers of a Babyl message.
const BABYL_EOOH: &[u8] = b"*** EOOH ***";

/// Split an mbox into message ranges.
///
/// Each range starts right after the `From ` separator line and ends right
/// before the next separator (or at EOF).
pub fn split_mbox(data: &[u8]) -> Vec<Range<usize>> {
    let mut spans = Vec::new();
    let mut message_start: Option<usize> = None;
    let mut prev_line_was_empty = true;
    let mut first_line = true;

    for (pos, end) in lines(data) {
        let line = &data[pos..end];
        if is_mbox_separator(line) {
            if !first_line && !prev_line_was_empty {
                warn!(offset = pos, "'From ' line follows a non-blank line");
            }
            if let Some(start) = message_start {
                spans.push(start..pos);
            }
            message_start = Some(end);
        } else if first_line {
            debug!("mbox does not start with a 'From ' line, skipping leading garbage");
        }
        prev_line_was_empty = is_blank_line(line);
        first_line = false;
    }

    if let Some(start) = message_start {
        spans.push(start..data.len());
    }
    spans
}

/// Split an MMDF mailbox into message ranges.
///
/// Messages are enclosed between two `^A^A^A^A` lines. A stray `From `
/// line at the start of a message is not part of the range.
pub fn split_mmdf(data: &[u8]) -> Vec<Range<usize>> {
    let mut spans = Vec::new();
    let mut message_start: Option<usize> = None;

    for (pos, end) in lines(data) {
        let line = trim_line_ending(&data[pos..end]);
        if line != MMDF_DELIMITER {
            continue;
        }
        match message_start.take() {
            None => message_start = Some(end),
            Some(start) => spans.push(skip_from_line(data, start)..pos),
        }
    }

    if let Some(start) = message_start {
        warn!(offset = start, "Truncated MMDF message at end of file");
        spans.push(skip_from_line(data, start)..data.len());
    }
    spans
}

/// Split a Babyl mailbox into messages.
///
/// Babyl stores the original headers before the `*** EOOH ***` line and a
/// reformatted copy after it; the original headers are used together with
/// the body. Messages are rebuilt, so this returns owned buffers.
pub fn split_babyl(data: &[u8]) -> Result<Vec<Vec<u8>>, String> {
    let data = strip_bom(data);
    if !data.starts_with(BABYL_MAGIC) {
        return Err("missing BABYL OPTIONS header".to_string());
    }

    let mut messages = Vec::new();
    // The first chunk holds the file options.
    for chunk in data.split(|&b| b == 0x1f).skip(1) {
        let chunk = chunk.strip_prefix(b"\x0c").unwrap_or(chunk);
        let chunk = chunk
            .strip_prefix(b"\r\n")
            .or_else(|| chunk.strip_prefix(b"\n"))
            .unwrap_or(chunk);
        if chunk.iter().all(u8::is_ascii_whitespace) {
            continue;
        }

        // First line: attribute and label list.
        let rest = match find_newline(chunk) {
            Some(nl) => &chunk[nl + 1..],
            None => continue,
        };

        messages.push(rebuild_babyl_message(rest));
    }
    Ok(messages)
}

fn rebuild_babyl_message(rest: &[u8]) -> Vec<u8> {
    let mut eooh = None;
    for (pos, end) in lines(rest) {
        if trim_line_ending(&rest[pos..end]) == BABYL_EOOH {
            eooh = Some((pos, end));
            break;
        }
    }
    let Some((eooh_start, eooh_end)) = eooh else {
        return rest.to_vec();
    };

    let original_headers = &rest[..eooh_start];
    let visible = &rest[eooh_end..];
    let (visible_headers, body) = match super::eml::find_header_end(visible) {
        Some((end, sep_len)) => (&visible[..end + 1], &visible[end + sep_len..]),
        None => (visible, &b""[..]),
    };

    let headers = if original_headers.iter().all(u8::is_ascii_whitespace) {
        visible_headers
    } else {
        original_headers
    };

    let mut message = Vec::with_capacity(headers.len() + body.len() + 1);
    message.extend_from_slice(headers);
    if !headers.ends_with(b"\n") {
        message.push(b'\n');
    }
    message.push(b'\n');
    message.extend_from_slice(body);
    message
}

/// Iterate over `(start, end)` of every line, `end` including the newline.
fn lines(data: &[u8]) -> impl Iterator<Item = (usize, usize)> + '_ {
    let mut pos = 0;
    std::iter::from_fn(move || {
        if pos >= data.len() {
            return None;
        }
        let start = pos;
        pos = match find_newline(&data[pos..]) {
            Some(i) => pos + i + 1,
            None => data.len(),
        };
        Some((start, pos))
    })
}

/// Skip a `From ` line at `start`, returning the offset after it.
fn skip_from_line(data: &[u8], start: usize) -> usize {
    if data[start..].starts_with(b"From ") {
        if let Some(nl) = find_newline(&data[start..]) {
            return start + nl + 1;
        }
    }
    start
}

fn find_newline(buf: &[u8]) -> Option<usize> {
    buf.iter().position(|&b| b == b'\n')
}

fn strip_bom(line: &[u8]) -> &[u8] {
    line.strip_prefix(&[0xEF, 0xBB, 0xBF]).unwrap_or(line)
}

fn trim_line_ending(line: &[u8]) -> &[u8] {
    let line = line.strip_suffix(b"\n").unwrap_or(line);
    line.strip_suffix(b"\r").unwrap_or(line)
}

fn is_mbox_separator(line: &[u8]) -> bool {
    strip_bom(line).starts_with(b"From ")
}

fn is_blank_line(line: &[u8]) -> bool {
    line.trim_ascii().is_empty()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_separator_lines() {
        assert!(is_mbox_separator(b"From a@x Sat Mar  9 12:00:00 2024\n"));
        assert!(is_mbox_separator(b"\xEF\xBB\xBFFrom a@x Sat Mar  9 12:00:00 2024\n"));
        for line in [&b"from a@x\n"[..], b">From a@x\n", b"Subject: From Bob\n", b"From:a@x\n"] {
            assert!(!is_mbox_separator(line));
        }
    }

    #[test]
    fn test_split_mbox() {
        let data = b"From a@x Thu Jan 01 00:00:00 2024\nSubject: one\n\nBody 1\n\n\
From b@x Thu Jan 01 00:00:00 2024\r\nSubject: two\r\n\r\nBody 2\r\n";
        let spans = split_mbox(data);
        assert_eq!(spans.len(), 2);
        assert!(data[spans[0].clone()].starts_with(b"Subject: one"));
        assert!(data[spans[1].clone()].starts_with(b"Subject: two"));
        assert!(data[spans[1].clone()].ends_with(b"Body 2\r\n"));
    }

    #[test]
    fn test_split_mbox_empty_and_garbage() {
        assert!(split_mbox(b"").is_empty());
        assert!(split_mbox(b"no separator here\n").is_empty());
    }

    #[test]
    fn test_escaped_from_is_not_a_separator() {
        let data = b"From a@x Mon\nSubject: s\n\n>From the top\n";
        assert_eq!(split_mbox(data).len(), 1);
    }

    #[test]
    fn test_split_mmdf() {
        let data = b"\x01\x01\x01\x01\nSubject: one\n\nBody\n\x01\x01\x01\x01\n\
\x01\x01\x01\x01\nFrom x@y Mon\nSubject: two\n\nBody\n\x01\x01\x01\x01\n";
        let spans = split_mmdf(data);
        assert_eq!(spans.len(), 2);
        assert_eq!(&data[spans[0].clone()], b"Subject: one\n\nBody\n");
        assert_eq!(&data[spans[1].clone()], b"Subject: two\n\nBody\n");
    }

    #[test]
    fn test_split_babyl_uses_original_headers() {
        let data = b"BABYL OPTIONS: -*- rmail -*-\nVersion: 5\n\x1f\x0c\n\
1,, answered,\nFrom: a@x\nTo: b@x\n*** EOOH ***\nFrom: a@x\n\nHello\n\x1f";
        let messages = split_babyl(data).unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0], b"From: a@x\nTo: b@x\n\nHello\n".to_vec());
    }

    #[test]
    fn test_split_babyl_requires_magic() {
        assert!(split_babyl(b"From a@x\n").is_err());
    }
}
