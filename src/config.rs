//! Settings from `config.toml`.
//!
//! The file is `$MUTTLEARN_CONFIG` or `muttlearn/config.toml` under the
//! platform config directory; missing keys take their defaults.
//!
//! [`Config::resolve`] compiles the raw settings into [`ScanOptions`], the
//! form the scanner works with.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{LearnError, Result};
use crate::model::recipient::Selection;
use crate::model::weight::WeightFormula;

pub const DEFAULT_QUOTE_REGEXP: &str = r"^([ \t]*[|>:}#])+";
pub const DEFAULT_SMILEYS: &str = r"(>From )|(:[-^]?[\]\[)(><}{|/DP])";
pub const DEFAULT_ASSUMED_CHARSET: &str = "us-ascii:iso-8859-1:utf-8";

/// Everything read from `config.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub general: GeneralConfig,
    /// Settings that change what is learned from a message.
    pub scan: ScanConfig,
    /// Address patterns identifying the user and mailing lists.
    pub addresses: AddressConfig,
    /// How dominant greetings and goodbyes are picked.
    pub selection: SelectionConfig,
}

/// Settings that do not affect the learned statistics.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Override cache directory for the message cache and logs.
    pub cache_dir: Option<PathBuf>,
    /// Default `tracing` filter, overridden by `-v` and `RUST_LOG`.
    pub log_level: String,
    /// Mailboxes scanned when none are given on the command line.
    pub mailboxes: Vec<String>,
}

/// Message scanning settings. Most of them are recorded in the cache
/// metadata, and changing one of those invalidates the cache.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    /// Ignore messages older than this many days (negative = no limit).
    pub max_age: i64,
    pub quote_regexp: String,
    pub smileys: String,
    /// Skip messages where any recipient is one of my addresses.
    pub exclude_mails_to_me: bool,
    /// Skip messages whose sender is not one of my addresses.
    pub only_include_mails_from_me: bool,
    /// Learn from messages sent to mailing lists too.
    pub personalize_mailinglists: bool,
    /// Skip messages with more than one recipient.
    pub skip_multiple_recipients: bool,
    /// Colon-separated charsets tried for bodies without a declared charset.
    pub assumed_charset: String,
    /// Recency weight: "inverse_sqrt", "inverse", "constant", "exponential:<days>".
    pub weight_formula: String,
}

/// Regex lists, each matched against lower-cased addresses.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AddressConfig {
    pub alternates: Vec<String>,
    pub unalternates: Vec<String>,
    pub lists: Vec<String>,
    pub unlists: Vec<String>,
    pub subscribe: Vec<String>,
    pub unsubscribe: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SelectionConfig {
    pub greeting_random_percent: f64,
    pub greeting_random_max: usize,
    pub goodbye_random_percent: f64,
    pub goodbye_random_max: usize,
}

// ── Defaults ────────────────────────────────────────────────────

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            cache_dir: None,
            log_level: "warn".to_string(),
            mailboxes: Vec::new(),
        }
    }
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            max_age: -1,
            quote_regexp: DEFAULT_QUOTE_REGEXP.to_string(),
            smileys: DEFAULT_SMILEYS.to_string(),
            exclude_mails_to_me: true,
            only_include_mails_from_me: true,
            personalize_mailinglists: false,
            skip_multiple_recipients: false,
            assumed_charset: String::new(),
            weight_formula: WeightFormula::default().to_string(),
        }
    }
}

impl Default for SelectionConfig {
    fn default() -> Self {
        Self {
            greeting_random_percent: 25.0,
            greeting_random_max: 5,
            goodbye_random_percent: 25.0,
            goodbye_random_max: 5,
        }
    }
}

// ── Resolution ──────────────────────────────────────────────────

/// One named group of addresses: members match some `include` pattern and
/// no `exclude` pattern.
#[derive(Debug, Clone)]
pub struct AddressGroup {
    include: Vec<Regex>,
    exclude: Vec<Regex>,
}

impl AddressGroup {
    fn compile(option: &str, include: &[String], exclude: &[String]) -> Result<Self> {
        let compile_all = |name: String, patterns: &[String]| {
            patterns
                .iter()
                .map(|p| compile_anchored(&name, p))
                .collect::<Result<Vec<_>>>()
        };
        Ok(Self {
            include: compile_all(option.to_string(), include)?,
            exclude: compile_all(format!("un{option}"), exclude)?,
        })
    }

    pub fn is_empty(&self) -> bool {
        self.include.is_empty()
    }

    pub fn contains(&self, address: &str) -> bool {
        self.include.iter().any(|re| re.is_match(address))
            && !self.exclude.iter().any(|re| re.is_match(address))
    }
}

/// Address groups used by the filters and the mailing-list check.
#[derive(Debug, Clone)]
pub struct AddressGroups {
    pub alternates: AddressGroup,
    pub lists: AddressGroup,
    pub subscribed: AddressGroup,
}

impl AddressGroups {
    /// Whether `address` is one of my own addresses.
    pub fn is_me(&self, address: &str) -> bool {
        self.alternates.contains(address)
    }

    /// Whether `address` is a known or subscribed mailing list.
    pub fn is_mailing_list(&self, address: &str) -> bool {
        self.lists.contains(address) || self.subscribed.contains(address)
    }
}

/// Resolved, validated settings for a scan.
#[derive(Debug, Clone)]
pub struct ScanOptions {
    pub max_age: i64,
    pub quote: Regex,
    pub smileys: Regex,
    pub exclude_mails_to_me: bool,
    pub only_include_mails_from_me: bool,
    pub personalize_mailinglists: bool,
    pub skip_multiple_recipients: bool,
    pub assumed_charsets: Vec<String>,
    pub weight_formula: WeightFormula,
    pub addresses: AddressGroups,
    pub greeting_selection: Selection,
    pub goodbye_selection: Selection,
    /// Snapshot of the scan-affecting settings, for the cache metadata.
    variables: BTreeMap<String, String>,
    /// Snapshot of the address pattern lists, for the cache metadata.
    groups: BTreeMap<String, Vec<String>>,
}

impl ScanOptions {
    /// Scan-affecting settings by name, as recorded in the cache metadata.
    pub fn scan_variables(&self) -> &BTreeMap<String, String> {
        &self.variables
    }

    /// Address pattern lists by name, as recorded in the cache metadata.
    pub fn address_lists(&self) -> &BTreeMap<String, Vec<String>> {
        &self.groups
    }
}

impl Config {
    /// Compile and validate the configuration.
    pub fn resolve(&self) -> Result<ScanOptions> {
        let scan = &self.scan;
        let addrs = &self.addresses;

        let addresses = AddressGroups {
            alternates: AddressGroup::compile("alternates", &addrs.alternates, &addrs.unalternates)?,
            lists: AddressGroup::compile("lists", &addrs.lists, &addrs.unlists)?,
            subscribed: AddressGroup::compile("subscribe", &addrs.subscribe, &addrs.unsubscribe)?,
        };

        let mut exclude_mails_to_me = scan.exclude_mails_to_me;
        let mut only_include_mails_from_me = scan.only_include_mails_from_me;
        if addresses.alternates.is_empty() {
            if exclude_mails_to_me {
                tracing::warn!("exclude_mails_to_me is set but no alternates are configured, ignoring it");
                exclude_mails_to_me = false;
            }
            if only_include_mails_from_me {
                tracing::warn!(
                    "only_include_mails_from_me is set but no alternates are configured, ignoring it"
                );
                only_include_mails_from_me = false;
            }
        }

        let assumed_charsets: Vec<String> = if scan.assumed_charset.trim().is_empty() {
            DEFAULT_ASSUMED_CHARSET
        } else {
            scan.assumed_charset.as_str()
        }
        .split(':')
        .map(|c| c.trim().to_lowercase())
        .filter(|c| !c.is_empty())
        .collect();

        let variables = BTreeMap::from([
            ("max_age".to_string(), scan.max_age.to_string()),
            ("quote_regexp".to_string(), scan.quote_regexp.clone()),
            ("smileys".to_string(), scan.smileys.clone()),
            (
                "exclude_mails_to_me".to_string(),
                exclude_mails_to_me.to_string(),
            ),
            (
                "only_include_mails_from_me".to_string(),
                only_include_mails_from_me.to_string(),
            ),
            (
                "personalize_mailinglists".to_string(),
                scan.personalize_mailinglists.to_string(),
            ),
            ("assumed_charset".to_string(), assumed_charsets.join(":")),
        ]);

        let groups = BTreeMap::from([
            ("alternates".to_string(), addrs.alternates.clone()),
            ("unalternates".to_string(), addrs.unalternates.clone()),
            ("lists".to_string(), addrs.lists.clone()),
            ("unlists".to_string(), addrs.unlists.clone()),
            ("subscribe".to_string(), addrs.subscribe.clone()),
            ("unsubscribe".to_string(), addrs.unsubscribe.clone()),
        ]);

        let sel = &self.selection;
        Ok(ScanOptions {
            max_age: scan.max_age,
            quote: compile_anchored("quote_regexp", &scan.quote_regexp)?,
            smileys: compile_anchored("smileys", &scan.smileys)?,
            exclude_mails_to_me,
            only_include_mails_from_me,
            personalize_mailinglists: scan.personalize_mailinglists,
            skip_multiple_recipients: scan.skip_multiple_recipients,
            assumed_charsets,
            weight_formula: scan.weight_formula.parse()?,
            addresses,
            greeting_selection: Selection::TopPercent {
                percent: sel.greeting_random_percent,
                limit: sel.greeting_random_max,
            },
            goodbye_selection: Selection::TopPercent {
                percent: sel.goodbye_random_percent,
                limit: sel.goodbye_random_max,
            },
            variables,
            groups,
        })
    }

    /// Mailboxes from the configuration with `~` expanded.
    pub fn mailboxes(&self) -> Vec<PathBuf> {
        self.general
            .mailboxes
            .iter()
            .map(|m| expand_tilde(m))
            .collect()
    }
}

/// Compile `pattern` so that it only matches at the start of the input.
fn compile_anchored(option: &str, pattern: &str) -> Result<Regex> {
    Regex::new(&format!("^(?:{pattern})")).map_err(|source| LearnError::InvalidPattern {
        option: option.to_string(),
        source,
    })
}

/// Expand a leading `~` to the home directory.
pub fn expand_tilde(path: &str) -> PathBuf {
    match path.strip_prefix('~') {
        Some(rest) if rest.is_empty() || rest.starts_with('/') => match dirs::home_dir() {
            Some(home) => home.join(rest.trim_start_matches('/')),
            None => PathBuf::from(path),
        },
        _ => PathBuf::from(path),
    }
}

// ── Load / dump ─────────────────────────────────────────────────

/// The config file, if one exists at the usual place; defaults otherwise.
pub fn load_config() -> Config {
    config_file_path()
        .filter(|path| path.is_file())
        .map(|path| load_config_from(&path))
        .unwrap_or_default()
}

/// Read `path` as TOML. Unreadable or invalid files are logged and
/// replaced by the defaults.
pub fn load_config_from(path: &Path) -> Config {
    match read_config(path) {
        Ok(config) => {
            tracing::debug!(path = %path.display(), "Loaded configuration");
            config
        }
        Err(e) => {
            tracing::warn!(error = %e, "Ignoring configuration file");
            Config::default()
        }
    }
}

fn read_config(path: &Path) -> Result<Config> {
    let text = std::fs::read_to_string(path).map_err(|e| LearnError::io(path, e))?;
    toml::from_str(&text).map_err(|e| LearnError::InvalidConfig {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })
}

/// Render the configuration as TOML.
pub fn dump_config(config: &Config) -> Result<String> {
    toml::to_string_pretty(config).map_err(|e| LearnError::Serialization(e.to_string()))
}

/// `$MUTTLEARN_CONFIG`, else `muttlearn/config.toml` under the platform
/// config directory.
pub fn config_file_path() -> Option<PathBuf> {
    std::env::var_os("MUTTLEARN_CONFIG")
        .map(PathBuf::from)
        .or_else(|| dirs::config_dir().map(|dir| dir.join("muttlearn").join("config.toml")))
}

/// Where the message cache, its metadata, and the log file live.
pub fn cache_dir(config: &Config) -> PathBuf {
    config.general.cache_dir.clone().unwrap_or_else(|| {
        dirs::cache_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("muttlearn")
    })
}

pub fn log_file_path(config: &Config) -> PathBuf {
    cache_dir(config).join("muttlearn.log")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_documented_values() {
        let cfg = Config::default();
        assert_eq!(cfg.scan.max_age, -1);
        assert_eq!(cfg.scan.quote_regexp, DEFAULT_QUOTE_REGEXP);
        assert!(cfg.scan.exclude_mails_to_me);
        assert_eq!(cfg.selection.greeting_random_max, 5);
        assert_eq!(cfg.general.log_level, "warn");
    }

    #[test]
    fn test_unparsable_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[scan]\nmax_age = \"soon\"\n").unwrap();
        assert!(matches!(
            read_config(&path),
            Err(LearnError::InvalidConfig { .. })
        ));
        assert_eq!(load_config_from(&path).scan.max_age, -1);
        assert!(matches!(
            read_config(&dir.path().join("missing.toml")),
            Err(LearnError::Io { .. })
        ));
    }

    #[test]
    fn test_dumped_config_parses_back() {
        let dumped = dump_config(&Config::default()).unwrap();
        let parsed: Config = toml::from_str(&dumped).unwrap();
        assert_eq!(parsed.scan.smileys, DEFAULT_SMILEYS);
        assert_eq!(parsed.scan.weight_formula, "inverse_sqrt");
    }

    #[test]
    fn test_missing_sections_fall_back() {
        let partial = r#"
[scan]
max_age = 30

[addresses]
alternates = ["me@example\\.org"]
"#;
        let cfg: Config = toml::from_str(partial).unwrap();
        assert_eq!(cfg.scan.max_age, 30);
        assert_eq!(cfg.addresses.alternates.len(), 1);
        assert_eq!(cfg.scan.smileys, DEFAULT_SMILEYS);
        assert_eq!(cfg.selection.goodbye_random_percent, 25.0);
    }

    #[test]
    fn test_resolve_disables_me_filters_without_alternates() {
        let opts = Config::default().resolve().unwrap();
        assert!(!opts.exclude_mails_to_me);
        assert!(!opts.only_include_mails_from_me);
        assert_eq!(opts.scan_variables()["exclude_mails_to_me"], "false");
        assert_eq!(opts.assumed_charsets, ["us-ascii", "iso-8859-1", "utf-8"]);
    }

    #[test]
    fn test_address_groups() {
        let mut cfg = Config::default();
        cfg.addresses.alternates = vec![r".*@me\.org".to_string()];
        cfg.addresses.unalternates = vec![r"noreply@me\.org".to_string()];
        cfg.addresses.subscribe = vec![r"dev@lists\.org".to_string()];
        let opts = cfg.resolve().unwrap();
        assert!(opts.exclude_mails_to_me);
        assert!(opts.addresses.is_me("anne@me.org"));
        assert!(!opts.addresses.is_me("noreply@me.org"));
        assert!(!opts.addresses.is_me("anne@other.org"));
        // Patterns are anchored at the start.
        assert!(!opts.addresses.is_mailing_list("xdev@lists.org"));
        assert!(opts.addresses.is_mailing_list("dev@lists.org"));
    }

    #[test]
    fn test_invalid_pattern_is_fatal() {
        let mut cfg = Config::default();
        cfg.scan.quote_regexp = "(".to_string();
        assert!(matches!(
            cfg.resolve(),
            Err(LearnError::InvalidPattern { option, .. }) if option == "quote_regexp"
        ));
        let mut cfg = Config::default();
        cfg.scan.weight_formula = "1/age".to_string();
        assert!(matches!(
            cfg.resolve(),
            Err(LearnError::InvalidWeightFormula(_))
        ));
    }

    #[test]
    fn test_expand_tilde() {
        assert_eq!(expand_tilde("/var/mail/me"), PathBuf::from("/var/mail/me"));
        assert_eq!(expand_tilde("~user/x"), PathBuf::from("~user/x"));
        if let Some(home) = dirs::home_dir() {
            assert_eq!(expand_tilde("~/Mail/inbox"), home.join("Mail/inbox"));
        }
    }
}
