//! Folding of scanned messages into per-recipient-set buckets.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::Serialize;
use tracing::debug;

use crate::cache::store::MessageCache;
use crate::config::ScanOptions;
use crate::model::message::{age_in_days, Message};
use crate::model::recipient::{Attribute, Recipient, Selection, WeightMap};
use crate::model::weight::WeightFormula;
use crate::scan::{filter_reason, ScanStats};

/// All recipient buckets of one scan, keyed by `to_addresses_key`.
#[derive(Debug, Clone)]
pub struct RecipientMap {
    formula: WeightFormula,
    buckets: BTreeMap<String, Recipient>,
}

impl RecipientMap {
    pub fn new(formula: WeightFormula) -> Self {
        Self {
            formula,
            buckets: BTreeMap::new(),
        }
    }

    /// Add the evidence of `message` to its bucket and return its weight.
    pub fn fold(&mut self, message: &Message) -> f64 {
        let weight = self.formula.weight(message.age_days);
        let attrs = &message.attrs;
        self.buckets
            .entry(attrs.to_addresses_key.clone())
            .or_insert_with(|| Recipient::new(attrs.to_addresses.clone()))
            .add(attrs, weight);
        weight
    }

    pub fn get(&self, key: &str) -> Option<&Recipient> {
        self.buckets.get(key)
    }

    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Recipient)> {
        self.buckets.iter().map(|(k, r)| (k.as_str(), r))
    }

    /// Buckets ordered by (key length, key), with each attribute's mode
    /// picked by `options`' selection settings.
    pub fn summary<R: Rng + ?Sized>(
        &self,
        options: &ScanOptions,
        rng: &mut R,
    ) -> Vec<RecipientSummary> {
        let mut keys: Vec<&String> = self.buckets.keys().collect();
        keys.sort_by(|a, b| a.len().cmp(&b.len()).then_with(|| a.cmp(b)));

        keys.into_iter()
            .filter_map(|key| self.buckets.get(key).map(|r| (key, r)))
            .map(|(key, recipient)| {
                let modes = Attribute::ALL
                    .iter()
                    .map(|attribute| {
                        let selection = match attribute {
                            Attribute::Greeting => options.greeting_selection,
                            Attribute::Goodbye => options.goodbye_selection,
                            _ => Selection::Max,
                        };
                        let mode = recipient
                            .weights(*attribute)
                            .mode(selection, rng)
                            .map(str::to_string);
                        (*attribute, mode)
                    })
                    .collect();
                let weights = Attribute::ALL
                    .iter()
                    .map(|a| (*a, recipient.weights(*a).clone()))
                    .collect();
                RecipientSummary {
                    key: key.clone(),
                    addresses: recipient.addresses.iter().cloned().collect(),
                    modes,
                    weights,
                }
            })
            .collect()
    }
}

/// Rendered statistics of one bucket.
#[derive(Debug, Clone, Serialize)]
pub struct RecipientSummary {
    pub key: String,
    pub addresses: Vec<String>,
    /// Selected value per attribute; `None` when only empty values were seen.
    pub modes: BTreeMap<Attribute, Option<String>>,
    pub weights: BTreeMap<Attribute, WeightMap>,
}

/// Rebuild the recipient statistics from cached records alone.
///
/// Rejected entries are skipped and the header filters are applied again.
pub fn aggregate_from_cache(
    cache: &MessageCache,
    options: &ScanOptions,
    now: DateTime<Utc>,
) -> (RecipientMap, ScanStats) {
    let mut recipients = RecipientMap::new(options.weight_formula);
    let mut stats = ScanStats::default();

    for (msgid, entry) in cache.entries() {
        stats.seen += 1;
        stats.cache_hits += 1;
        if entry.rejection.is_some() {
            stats.rejected += 1;
            continue;
        }
        let message = Message {
            msgid: Some(msgid.to_string()),
            position: entry.attrs.mailbox_path.clone(),
            checksum: entry.checksum,
            age_days: age_in_days(entry.attrs.timestamp, now),
            attrs: entry.attrs.clone(),
        };
        if let Some(reason) = filter_reason(&message, options) {
            debug!(msgid, reason, "Filtered cached message");
            stats.filtered += 1;
            continue;
        }
        recipients.fold(&message);
    }

    (recipients, stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::model::message::MessageAttributes;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn message(to: &[&str], age_days: i64) -> Message {
        let mut attrs = MessageAttributes {
            from_address: "me@x".to_string(),
            greeting: "Hi,".to_string(),
            ..Default::default()
        };
        attrs.set_recipients(to.iter().map(|s| s.to_string()));
        Message {
            msgid: None,
            position: "box#0".to_string(),
            checksum: 0,
            age_days,
            attrs,
        }
    }

    #[test]
    fn test_weights_accumulate_with_age_decay() {
        let mut map = RecipientMap::new(WeightFormula::default());
        for age in [0, 1, 3] {
            map.fold(&message(&["a@x"], age));
        }
        let weight = map
            .get("a@x")
            .unwrap()
            .weights(Attribute::FromAddress)
            .get("me@x")
            .unwrap();
        let expected = 1.0 + 1.0 / 2f64.sqrt() + 0.5;
        assert!((weight - expected).abs() < 1e-9);
        assert!((weight - 2.207).abs() < 1e-3);
    }

    #[test]
    fn test_recipient_order_does_not_matter() {
        let mut map = RecipientMap::new(WeightFormula::Constant);
        map.fold(&message(&["b@x", "a@x"], 0));
        map.fold(&message(&["a@x", "B@x"], 0));
        assert_eq!(map.len(), 1);
        let bucket = map.get("a@x b@x").unwrap();
        assert_eq!(bucket.weights(Attribute::ToAddressesKey).get("a@x b@x"), Some(2.0));
    }

    #[test]
    fn test_summary_order_and_modes() {
        let options = Config::default().resolve().unwrap();
        let mut map = RecipientMap::new(options.weight_formula);
        map.fold(&message(&["long-address@x"], 0));
        map.fold(&message(&["b@x"], 0));
        map.fold(&message(&["a@x"], 0));

        let mut rng = StdRng::seed_from_u64(1);
        let summary = map.summary(&options, &mut rng);
        let keys: Vec<&str> = summary.iter().map(|s| s.key.as_str()).collect();
        assert_eq!(keys, ["a@x", "b@x", "long-address@x"]);
        assert_eq!(summary[0].modes[&Attribute::Greeting].as_deref(), Some("Hi,"));
        assert_eq!(summary[0].modes[&Attribute::Signature], None);

        let json = serde_json::to_value(&summary[0]).unwrap();
        assert_eq!(json["modes"]["from_address"], "me@x");
        assert_eq!(json["weights"]["greeting"]["Hi,"], 1.0);
    }
}
