//! Header/body split of a single RFC 5322 record (no mailbox framing).

/// Find where the headers end.
///
/// Returns the offset of the newline that ends the last header line and the
/// length of the separator (`\n\n` = 2, `\r\n\r\n` = 4) starting there.
pub fn find_header_end(data: &[u8]) -> Option<(usize, usize)> {
    for i in 0..data.len().saturating_sub(1) {
        if data[i] == b'\n' && data[i + 1] == b'\n' {
            return Some((i, 2));
        }
        if i + 3 < data.len()
            && data[i] == b'\r'
            && data[i + 1] == b'\n'
            && data[i + 2] == b'\r'
            && data[i + 3] == b'\n'
        {
            return Some((i, 4));
        }
    }
    None
}

/// Split a record into its header section (including the blank line) and
/// its body. A record without a blank line is all headers.
pub fn split_header_body(data: &[u8]) -> (&[u8], &[u8]) {
    match find_header_end(data) {
        Some((end, sep_len)) => data.split_at(end + sep_len),
        None => (data, &[]),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_find_header_end() {
        // "From: a@b.com\n" = 14 bytes, "Subject: Hi\n" = 12 bytes
        let data = b"From: a@b.com\nSubject: Hi\n\nBody\n";
        assert_eq!(find_header_end(data), Some((25, 2)));
    }

    #[test]
    fn test_find_header_end_crlf() {
        let data = b"From: a@b.com\r\nSubject: Hi\r\n\r\nBody\r\n";
        assert_eq!(find_header_end(data), Some((26, 4)));
    }

    #[test]
    fn test_split_header_body() {
        let (headers, body) = split_header_body(b"From: a@b.com\n\nBody\n");
        assert_eq!(headers, b"From: a@b.com\n\n");
        assert_eq!(body, b"Body\n");

        let (headers, body) = split_header_body(b"From: a@b.com\n");
        assert_eq!(headers, b"From: a@b.com\n");
        assert!(body.is_empty());
    }
}
