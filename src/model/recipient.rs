//! Recipient buckets and their per-attribute weight statistics.

use std::collections::{BTreeMap, BTreeSet};

use rand::seq::SliceRandom;
use rand::Rng;

use super::message::MessageAttributes;

/// The attributes tracked for every recipient bucket.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Attribute {
    ToAddressesKey,
    FromHeader,
    FromAddress,
    FromDisplayName,
    Signature,
    Greeting,
    Goodbye,
    Charset,
    Language,
    MailboxPath,
}

impl Attribute {
    /// Every attribute, in output order.
    pub const ALL: [Attribute; 10] = [
        Attribute::ToAddressesKey,
        Attribute::FromHeader,
        Attribute::FromAddress,
        Attribute::FromDisplayName,
        Attribute::Signature,
        Attribute::Greeting,
        Attribute::Goodbye,
        Attribute::Charset,
        Attribute::Language,
        Attribute::MailboxPath,
    ];

    /// The value of this attribute in a message record.
    pub fn value_of<'a>(&self, attrs: &'a MessageAttributes) -> &'a str {
        match self {
            Self::ToAddressesKey => &attrs.to_addresses_key,
            Self::FromHeader => &attrs.from_header,
            Self::FromAddress => &attrs.from_address,
            Self::FromDisplayName => &attrs.from_display_name,
            Self::Signature => &attrs.signature,
            Self::Greeting => &attrs.greeting,
            Self::Goodbye => &attrs.goodbye,
            Self::Charset => &attrs.charset,
            Self::Language => &attrs.language,
            Self::MailboxPath => &attrs.mailbox_path,
        }
    }
}

/// How a dominant value is picked from a [`WeightMap`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Selection {
    /// The single value with the highest weight.
    Max,
    /// A uniformly random value among the top `percent` of keys by weight,
    /// at most `limit` of them.
    TopPercent { percent: f64, limit: usize },
}

/// Accumulated weight per observed value of one attribute.
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(transparent)]
pub struct WeightMap(BTreeMap<String, f64>);

impl WeightMap {
    pub fn add(&mut self, value: &str, weight: f64) {
        *self.0.entry(value.to_string()).or_insert(0.0) += weight;
    }

    pub fn get(&self, value: &str) -> Option<f64> {
        self.0.get(value).copied()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.0.iter().map(|(k, w)| (k.as_str(), *w))
    }

    /// Candidates ranked by descending weight; ties go to the larger key.
    ///
    /// The empty value is dropped whenever a non-empty value exists.
    fn ranked(&self) -> Vec<(&str, f64)> {
        let has_non_empty = self.0.keys().any(|k| !k.is_empty());
        let mut ranked: Vec<(&str, f64)> = self
            .iter()
            .filter(|(k, _)| !(has_non_empty && k.is_empty()))
            .collect();
        ranked.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| b.0.cmp(a.0)));
        if ranked.len() == 1 && ranked[0].0.is_empty() {
            ranked.clear();
        }
        ranked
    }

    /// The highest-weight value, or `None` if nothing but the empty value
    /// was ever observed.
    pub fn fittest(&self) -> Option<&str> {
        self.ranked().first().map(|(k, _)| *k)
    }

    /// Pick the dominant value according to `selection`.
    pub fn mode<R: Rng + ?Sized>(&self, selection: Selection, rng: &mut R) -> Option<&str> {
        let ranked = self.ranked();
        match selection {
            Selection::TopPercent { percent, limit } if limit > 1 => {
                let wanted = (ranked.len() as f64 * percent / 100.0).ceil() as usize;
                let num = wanted.min(limit).max(1).min(ranked.len());
                ranked[..num].choose(rng).map(|(k, _)| *k)
            }
            _ => ranked.first().map(|(k, _)| *k),
        }
    }
}

/// Aggregation bucket for one exact set of recipient addresses.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Recipient {
    pub addresses: BTreeSet<String>,
    weights: BTreeMap<Attribute, WeightMap>,
}

impl Recipient {
    /// Create an empty bucket for `addresses`.
    pub fn new(addresses: BTreeSet<String>) -> Self {
        Self {
            addresses,
            weights: Attribute::ALL
                .iter()
                .map(|a| (*a, WeightMap::default()))
                .collect(),
        }
    }

    /// Add `weight` to the observed value of every tracked attribute.
    pub fn add(&mut self, attrs: &MessageAttributes, weight: f64) {
        for attribute in Attribute::ALL {
            self.weights
                .entry(attribute)
                .or_default()
                .add(attribute.value_of(attrs), weight);
        }
    }

    /// The weight statistics of one attribute.
    pub fn weights(&self, attribute: Attribute) -> &WeightMap {
        static EMPTY: WeightMap = WeightMap(BTreeMap::new());
        self.weights.get(&attribute).unwrap_or(&EMPTY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn map(entries: &[(&str, f64)]) -> WeightMap {
        let mut m = WeightMap::default();
        for (k, w) in entries {
            m.add(k, *w);
        }
        m
    }

    #[test]
    fn test_empty_value_is_suppressed() {
        let m = map(&[("", 5.0), ("en", 2.0)]);
        assert_eq!(m.fittest(), Some("en"));
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..20 {
            let pick = m.mode(
                Selection::TopPercent {
                    percent: 100.0,
                    limit: 5,
                },
                &mut rng,
            );
            assert_eq!(pick, Some("en"));
        }
    }

    #[test]
    fn test_only_empty_value_gives_none() {
        assert_eq!(map(&[("", 3.0)]).fittest(), None);
        assert_eq!(WeightMap::default().fittest(), None);
    }

    #[test]
    fn test_tie_goes_to_larger_key() {
        assert_eq!(map(&[("a", 1.0), ("b", 1.0)]).fittest(), Some("b"));
    }

    #[test]
    fn test_top_percent_stays_within_top_keys() {
        let m = map(&[("w1", 10.0), ("w2", 9.0), ("w3", 1.0), ("w4", 0.5)]);
        let mut rng = StdRng::seed_from_u64(42);
        // ceil(4 * 50%) = 2 candidates
        for _ in 0..50 {
            let pick = m
                .mode(
                    Selection::TopPercent {
                        percent: 50.0,
                        limit: 5,
                    },
                    &mut rng,
                )
                .unwrap();
            assert!(pick == "w1" || pick == "w2");
        }
        // limit 1 means plain maximum
        let pick = m.mode(
            Selection::TopPercent {
                percent: 100.0,
                limit: 1,
            },
            &mut rng,
        );
        assert_eq!(pick, Some("w1"));
    }

    #[test]
    fn test_add_accumulates_every_attribute() {
        let mut attrs = MessageAttributes::default();
        attrs.from_address = "me@x".to_string();
        attrs.set_recipients(["a@x".to_string()]);
        let mut r = Recipient::new(attrs.to_addresses.clone());
        r.add(&attrs, 1.0);
        r.add(&attrs, 0.5);
        assert_eq!(r.weights(Attribute::FromAddress).get("me@x"), Some(1.5));
        assert_eq!(r.weights(Attribute::Greeting).get(""), Some(1.5));
    }
}
