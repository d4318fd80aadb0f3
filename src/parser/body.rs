//! Signature, greeting, goodbye, and language extraction from a decoded body.

use regex::Regex;

use super::language::LanguageGuesser;
use super::segment::Segmenter;

/// Number of words handed to the language guesser.
const LANGUAGE_SAMPLE_WORDS: usize = 20;

/// What was learned from the text after the signature was removed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Salutation {
    pub greeting: String,
    pub goodbye: String,
    pub language: String,
}

/// Regex-driven extraction of the conversational parts of a body.
#[derive(Debug, Clone)]
pub struct BodyExtractor {
    signature: Regex,
    greeting: Regex,
    goodbye: Regex,
    non_word: Regex,
    segmenter: Segmenter,
}

impl BodyExtractor {
    pub fn new(segmenter: Segmenter) -> Self {
        Self {
            signature: Regex::new(r"(?s)\n-- \n(.*)$").expect("valid pattern"),
            greeting: Regex::new(r"^(.{2,40})\n\n").expect("valid pattern"),
            goodbye: Regex::new(
                r"\n\n((?:.{2,40}\n.{2,40})|(?:.{2,40}\n\n.{2,40})|(?:.{2,40}))$",
            )
            .expect("valid pattern"),
            non_word: Regex::new(r"\W+").expect("valid pattern"),
            segmenter,
        }
    }

    /// Split off the signature (after a `"\n-- \n"` line).
    ///
    /// Returns the remaining body (trailing newlines removed) and the
    /// signature, which is empty if there is none.
    pub fn split_signature(&self, body: &str) -> (String, String) {
        let Some(caps) = self.signature.captures(body) else {
            return (body.to_string(), String::new());
        };
        let signature = caps.get(1).map_or("", |m| m.as_str()).to_string();
        if signature.is_empty() {
            return (body.to_string(), signature);
        }
        let start = caps.get(0).map_or(body.len(), |m| m.start());
        (body[..start].trim_end_matches('\n').to_string(), signature)
    }

    /// Learn greeting, goodbye, and language from a body without signature.
    ///
    /// Nothing is learned unless the body opens with a short greeting line
    /// followed by a blank line.
    pub fn salutation(&self, body: &str, guesser: &dyn LanguageGuesser) -> Salutation {
        let mut result = Salutation::default();

        let Some(caps) = self.greeting.captures(body) else {
            return result;
        };
        let (Some(greeting), Some(whole)) = (caps.get(1), caps.get(0)) else {
            return result;
        };
        result.greeting = greeting.as_str().to_string();

        let rest = body[whole.end()..].trim_start_matches('\n');
        let segments = self.segmenter.segment(rest);

        let sample = format!("{} {}", segments.unquoted, segments.quoted);
        let words: Vec<&str> = self
            .non_word
            .split(&sample)
            .filter(|w| !w.is_empty())
            .take(LANGUAGE_SAMPLE_WORDS)
            .collect();
        result.language = guesser.guess(&words.join(" ")).unwrap_or_default();

        if segments.unquoted.is_empty() {
            result.greeting.clear();
        }

        let goodbye = self
            .goodbye
            .captures(segments.top.trim_end_matches('\n'))
            .or_else(|| self.goodbye.captures(segments.bottom.trim_end_matches('\n')))
            .and_then(|caps| caps.get(1).map(|m| m.as_str().to_string()));

        if let Some(goodbye) = goodbye {
            // The goodbye must not be all there is.
            let remainder = self.goodbye.replacen(rest, 1, "");
            if !remainder.trim_matches('\n').is_empty() {
                result.goodbye = goodbye;
            }
        }

        result
    }
}
