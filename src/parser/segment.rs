//! Line-based segmentation of a reply body into top, attribution,
//! interleaved, and bottom regions.

use regex::Regex;

/// Maximum number of lines moved from the top region into the attribution.
const MAX_ATTRIBUTION_LINES: usize = 2;

/// The regions of a message body. Every field is a `\n`-joined line list.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Segments {
    /// Lines before the first quoted line, minus the attribution.
    pub top: String,
    /// Up to two non-empty lines right above the first quote ("X wrote:").
    pub attribution: String,
    /// Everything from the first quoted line up to the bottom region.
    pub interleaved: String,
    /// Unquoted lines after the last quote block.
    pub bottom: String,
    /// Every non-empty unquoted line (attribution lines excluded).
    pub unquoted: String,
    /// Every non-empty quoted line.
    pub quoted: String,
}

/// Splits message bodies using the configured quote and smiley patterns.
#[derive(Debug, Clone)]
pub struct Segmenter {
    quote: Regex,
    smileys: Regex,
    control: Regex,
}

impl Segmenter {
    /// Both patterns must already be anchored at the line start.
    pub fn new(quote: Regex, smileys: Regex) -> Self {
        Self {
            quote,
            smileys,
            control: Regex::new(r"^-----.*-----$").expect("valid pattern"),
        }
    }

    /// A line is quoted if it matches the quote pattern but not a smiley.
    pub fn is_quoted(&self, line: &str) -> bool {
        self.quote.is_match(line) && !self.smileys.is_match(line)
    }

    /// Segment `body`. Processing stops at the first control line
    /// (`-----...-----`, e.g. a PGP armor marker).
    pub fn segment(&self, body: &str) -> Segments {
        let mut top: Vec<&str> = Vec::new();
        let mut attribution: Vec<&str> = Vec::new();
        let mut interleaved: Vec<&str> = Vec::new();
        let mut bottom: Vec<&str> = Vec::new();
        let mut unquoted: Vec<&str> = Vec::new();
        let mut quoted: Vec<&str> = Vec::new();
        let mut before_attribution = true;
        let mut following_quote = false;

        for line in body.split('\n') {
            if self.control.is_match(line) {
                break;
            }

            if self.is_quoted(line) {
                if before_attribution {
                    for _ in 0..MAX_ATTRIBUTION_LINES {
                        match top.last() {
                            Some(last) if !last.is_empty() => {
                                attribution.insert(0, *last);
                                top.pop();
                                unquoted.pop();
                            }
                            _ => break,
                        }
                    }
                    before_attribution = false;
                }
                bottom.clear();
                following_quote = true;
                if !line.is_empty() {
                    quoted.push(line);
                }
            } else {
                if !following_quote {
                    bottom.push(line);
                }
                following_quote = false;
                if !line.is_empty() {
                    unquoted.push(line);
                }
            }

            if before_attribution {
                top.push(line);
            } else {
                interleaved.push(line);
            }
        }

        // The bottom lines are the tail of the interleaved region.
        let keep = interleaved.len().saturating_sub(bottom.len());
        interleaved.truncate(keep);

        Segments {
            top: top.join("\n"),
            attribution: attribution.join("\n"),
            interleaved: interleaved.join("\n"),
            bottom: bottom.join("\n"),
            unquoted: unquoted.join("\n"),
            quoted: quoted.join("\n"),
        }
    }
}
