//! Language guessing for message bodies.

use std::collections::HashSet;

/// Guesses the language of a short text sample.
pub trait LanguageGuesser {
    /// An ISO 639-1 code, or `None` if the language is unknown.
    fn guess(&self, text: &str) -> Option<String>;
}

impl<F> LanguageGuesser for F
where
    F: Fn(&str) -> Option<String>,
{
    fn guess(&self, text: &str) -> Option<String> {
        self(text)
    }
}

/// Never recognizes anything; used when language guessing is disabled.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoGuesser;

impl LanguageGuesser for NoGuesser {
    fn guess(&self, _text: &str) -> Option<String> {
        None
    }
}

/// Minimum number of stopword hits before a language is reported.
const MIN_HITS: usize = 2;

const STOPWORDS: &[(&str, &[&str])] = &[
    (
        "en",
        &[
            "the", "and", "is", "are", "you", "that", "this", "for", "with", "have", "not",
            "was", "will", "can", "would", "what", "of", "to", "it", "be",
        ],
    ),
    (
        "de",
        &[
            "der", "die", "das", "und", "ist", "nicht", "ich", "du", "sie", "wir", "mit", "auf",
            "ein", "eine", "zu", "den", "auch", "es", "hast", "habe",
        ],
    ),
    (
        "fr",
        &[
            "le", "la", "les", "et", "est", "pas", "je", "vous", "nous", "une", "des", "pour",
            "que", "qui", "dans", "avec", "sur", "ce", "du", "au",
        ],
    ),
    (
        "es",
        &[
            "el", "los", "las", "y", "es", "por", "que", "una", "para", "con", "del", "pero",
            "como", "muy", "yo", "tu", "su", "al", "lo", "se",
        ],
    ),
    (
        "it",
        &[
            "il", "gli", "che", "non", "per", "sono", "una", "della", "con", "come", "anche",
            "io", "ti", "mi", "ma", "ho", "hai", "questo", "di", "e",
        ],
    ),
    (
        "nl",
        &[
            "de", "het", "een", "en", "van", "ik", "je", "niet", "dat", "op", "met", "voor",
            "zijn", "maar", "ook", "wat", "bij", "dit", "er", "heb",
        ],
    ),
];

/// Stopword-frequency guesser for a handful of European languages.
#[derive(Debug, Clone)]
pub struct StopwordGuesser {
    languages: Vec<(&'static str, HashSet<&'static str>)>,
}

impl Default for StopwordGuesser {
    fn default() -> Self {
        Self {
            languages: STOPWORDS
                .iter()
                .map(|(code, words)| (*code, words.iter().copied().collect()))
                .collect(),
        }
    }
}

impl LanguageGuesser for StopwordGuesser {
    fn guess(&self, text: &str) -> Option<String> {
        let words: Vec<String> = text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
            .map(str::to_lowercase)
            .collect();

        let mut scores: Vec<(&str, usize)> = self
            .languages
            .iter()
            .map(|(code, stopwords)| {
                let hits = words
                    .iter()
                    .filter(|w| stopwords.contains(w.as_str()))
                    .count();
                (*code, hits)
            })
            .collect();
        scores.sort_by(|a, b| b.1.cmp(&a.1));

        match scores.as_slice() {
            [(code, best), rest @ ..] if *best >= MIN_HITS => {
                // A tie is as good as no answer.
                if rest.first().is_some_and(|(_, second)| second == best) {
                    None
                } else {
                    Some(code.to_string())
                }
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stopword_guesser() {
        let g = StopwordGuesser::default();
        assert_eq!(
            g.guess("I think that this is the plan for you").as_deref(),
            Some("en")
        );
        assert_eq!(
            g.guess("Ich habe das nicht gesehen und du auch nicht").as_deref(),
            Some("de")
        );
        assert_eq!(g.guess("xyzzy plugh"), None);
        assert_eq!(g.guess(""), None);
    }

    #[test]
    fn test_closure_guesser() {
        let g = |_: &str| Some("sv".to_string());
        assert_eq!(g.guess("hej").as_deref(), Some("sv"));
        assert_eq!(NoGuesser.guess("the and the"), None);
    }
}
