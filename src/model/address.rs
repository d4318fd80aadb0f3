//! Mailbox address parsing for `From:` and `To:` values (RFC 5322 §3.4).

/// One address with its optional display name.
///
/// `"Anne Müller <Anne@Example.org>"` has the display name `Anne Müller`
/// and the address `Anne@Example.org`; the address keeps its case.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EmailAddress {
    pub display_name: String,
    pub address: String,
}

impl EmailAddress {
    /// Parse one entry: `addr`, `<addr>`, `Name <addr>`, `"Name" <addr>`,
    /// or the old `addr (Name)` form.
    pub fn parse(raw: &str) -> Self {
        let entry = raw.trim();

        if let (Some(open), Some(close)) = (entry.rfind('<'), entry.rfind('>')) {
            if open < close {
                return Self {
                    display_name: unquote(&entry[..open]),
                    address: entry[open + 1..close].trim().to_string(),
                };
            }
        }

        if let Some((addr, comment)) = entry
            .strip_suffix(')')
            .and_then(|s| s.split_once('('))
            .filter(|(addr, _)| addr.contains('@'))
        {
            return Self {
                display_name: unescape(comment.trim()),
                address: addr.trim().to_string(),
            };
        }

        Self {
            display_name: String::new(),
            address: unquote(entry),
        }
    }

    /// Parse an address list.
    ///
    /// Commas inside quotes, comments, or angle brackets do not separate
    /// entries, and group syntax (`team: a@x, b@x;`) contributes its members.
    /// Entries that do not yield a plausible address are dropped.
    pub fn parse_list(raw: &str) -> Vec<Self> {
        let mut entries = Vec::new();
        let mut current = String::new();
        let mut quoted = false;
        let mut angle = false;
        let mut comment_depth = 0usize;
        let mut escaped = false;

        let mut push = |entry: &mut String| {
            let addr = Self::parse(entry);
            if !addr.address.is_empty() && !addr.address.contains(char::is_whitespace) {
                entries.push(addr);
            }
            entry.clear();
        };

        for ch in raw.chars() {
            if escaped {
                escaped = false;
                current.push(ch);
                continue;
            }
            match ch {
                '\\' if quoted || comment_depth > 0 => escaped = true,
                '"' if comment_depth == 0 => quoted = !quoted,
                '(' if !quoted => comment_depth += 1,
                ')' if !quoted => comment_depth = comment_depth.saturating_sub(1),
                '<' if !quoted && comment_depth == 0 => angle = true,
                '>' if !quoted && comment_depth == 0 => angle = false,
                _ => {}
            }
            let separating = !quoted && !angle && comment_depth == 0;
            match ch {
                ':' if separating => current.clear(),
                ',' | ';' if separating => push(&mut current),
                _ => current.push(ch),
            }
        }
        push(&mut current);

        entries
    }

    /// Lower-cased bare address, the form used for recipient keys.
    pub fn normalized(&self) -> String {
        self.address.to_lowercase()
    }
}

fn unquote(s: &str) -> String {
    let s = s.trim();
    match s.strip_prefix('"').and_then(|inner| inner.strip_suffix('"')) {
        Some(inner) => unescape(inner).trim().to_string(),
        None => s.to_string(),
    }
}

/// Resolve `\x` quoted pairs to `x`.
fn unescape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars();
    while let Some(ch) = chars.next() {
        match ch {
            '\\' => out.extend(chars.next()),
            _ => out.push(ch),
        }
    }
    out
}
