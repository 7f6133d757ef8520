//! Configuration types for usenet-indexer
//!
//! A single [`Config`] value is built once (from TOML, JSON or in code), checked
//! with [`Config::validate`] and then handed to the orchestrator, pipeline and
//! post-processor at construction. Nothing in the crate reads configuration
//! ambiently.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Scan loop settings (the `[scan]` table)
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ScanConfig {
    /// Maximum number of groups scanned at the same time (None = one task per group)
    #[serde(default)]
    pub update_threads: Option<usize>,

    /// How long the cycle waits for the primary scan tasks (default: 600s)
    ///
    /// Tasks still running afterwards are abandoned for this cycle and their
    /// groups are picked up again next cycle.
    #[serde(default = "default_scan_timeout", with = "duration_serde")]
    pub scan_timeout: Duration,

    /// Sleep between cycles (default: 300s)
    #[serde(default = "default_update_wait", with = "duration_serde")]
    pub update_wait: Duration,

    /// Backfill recorded article gaps after the primary scan (default: false)
    #[serde(default)]
    pub retry_missed: bool,

    /// Age in days after which unfinished binaries are deleted (default: 3, 0 disables)
    #[serde(default = "default_dead_binary_age_days")]
    pub dead_binary_age_days: u32,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            update_threads: None,
            scan_timeout: default_scan_timeout(),
            update_wait: default_update_wait(),
            retry_missed: false,
            dead_binary_age_days: default_dead_binary_age_days(),
        }
    }
}

/// Minimum release size for a set of groups
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct MinSizeRule {
    /// Minimum size in bytes
    pub bytes: u64,
    /// Group names the minimum applies to
    pub groups: Vec<String>,
}

/// Release finalization and post-processing settings (the `[postprocess]` table)
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PostProcessConfig {
    /// Percentage of declared segments that must be present (default: 100)
    #[serde(default = "default_min_completion")]
    pub min_completion: f64,

    /// Minimum number of archive-like parts a binary needs (default: 1)
    #[serde(default = "default_min_archives")]
    pub min_archives: u32,

    /// Per-group minimum sizes
    #[serde(default)]
    pub min_size: Vec<MinSizeRule>,

    /// Run the release post-processing passes after finalization (default: false)
    #[serde(default)]
    pub enabled: bool,

    /// Delete releases confirmed as password protected (default: true)
    #[serde(default = "default_true")]
    pub delete_passworded: bool,

    /// Also delete releases that are only possibly password protected (default: true)
    #[serde(default = "default_true")]
    pub delete_potentially_passworded: bool,

    /// Re-apply blacklist rules to already published releases (default: false)
    #[serde(default)]
    pub delete_blacklisted_releases: bool,

    /// Only purge blacklisted releases posted within this many days (None = all)
    #[serde(default)]
    pub delete_blacklisted_days: Option<u32>,

    /// Delete releases flagged as unwanted (default: false)
    #[serde(default)]
    pub delete_bad_releases: bool,

    /// Categories whose releases get a rename attempt (default: Misc > Other, Books > Ebook)
    #[serde(default = "default_rename_categories")]
    pub rename_categories: Vec<i64>,
}

impl Default for PostProcessConfig {
    fn default() -> Self {
        Self {
            min_completion: default_min_completion(),
            min_archives: default_min_archives(),
            min_size: vec![],
            enabled: false,
            delete_passworded: true,
            delete_potentially_passworded: true,
            delete_blacklisted_releases: false,
            delete_blacklisted_days: None,
            delete_bad_releases: false,
            rename_categories: default_rename_categories(),
        }
    }
}

impl PostProcessConfig {
    /// Minimum size configured for a group, if any
    ///
    /// When several rules list the same group the largest minimum wins, so a
    /// binary is rejected as soon as any rule would reject it.
    pub fn min_size_for(&self, group: &str) -> Option<u64> {
        self.min_size
            .iter()
            .filter(|rule| rule.groups.iter().any(|g| g == group))
            .map(|rule| rule.bytes)
            .max()
    }
}

/// One title pattern of the default classifier
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct CategoryRule {
    /// Case-insensitive regex tested against the release name
    pub pattern: String,
    /// Category assigned when the pattern matches
    pub category: i64,
    /// Optional regex the group name must match for this rule to apply
    #[serde(default)]
    pub groups: Option<String>,
}

/// Default classifier rules (the `[categories]` table)
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct CategoryConfig {
    /// Rules, evaluated in order; the first match wins
    #[serde(default)]
    pub rules: Vec<CategoryRule>,
}

/// Main configuration for the indexer
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Config {
    /// Database path (default: "./usenet-indexer.db")
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,

    /// Scan loop settings
    #[serde(default)]
    pub scan: ScanConfig,

    /// Finalization and post-processing settings
    #[serde(default)]
    pub postprocess: PostProcessConfig,

    /// Default classifier rules
    #[serde(default)]
    pub categories: CategoryConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            scan: ScanConfig::default(),
            postprocess: PostProcessConfig::default(),
            categories: CategoryConfig::default(),
        }
    }
}

impl Config {
    /// Parse a configuration from TOML text
    pub fn from_toml_str(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }

    /// Load a configuration file (`.json` is parsed as JSON, anything else as TOML)
    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        match path.extension().and_then(|e| e.to_str()) {
            Some("json") => Ok(serde_json::from_str(&text)?),
            _ => Self::from_toml_str(&text),
        }
    }

    /// Reject settings the scan loop cannot run with
    ///
    /// Called before the orchestrator starts; a failure here is fatal and the
    /// loop is never entered.
    pub fn validate(&self) -> Result<()> {
        let completion = self.postprocess.min_completion;
        if !(completion > 0.0 && completion <= 100.0) {
            return Err(Error::config(
                "postprocess.min_completion",
                format!("must be within (0, 100], got {completion}"),
            ));
        }

        if self.scan.update_threads == Some(0) {
            return Err(Error::config(
                "scan.update_threads",
                "must be greater than zero (omit it for one task per group)",
            ));
        }

        if let Some(threads) = self.scan.update_threads
            && threads > tokio::sync::Semaphore::MAX_PERMITS
        {
            return Err(Error::config(
                "scan.update_threads",
                format!(
                    "must be at most {}, got {threads}",
                    tokio::sync::Semaphore::MAX_PERMITS
                ),
            ));
        }

        if self.scan.scan_timeout.is_zero() {
            return Err(Error::config(
                "scan.scan_timeout",
                "must be greater than zero",
            ));
        }

        for rule in &self.postprocess.min_size {
            if rule.groups.is_empty() {
                return Err(Error::config(
                    "postprocess.min_size",
                    format!("rule for {} bytes lists no groups", rule.bytes),
                ));
            }
        }

        for rule in &self.categories.rules {
            let patterns = std::iter::once(&rule.pattern).chain(rule.groups.as_ref());
            for pattern in patterns {
                regex::Regex::new(pattern).map_err(|e| {
                    Error::config(
                        "categories.rules",
                        format!("invalid pattern '{pattern}': {e}"),
                    )
                })?;
            }
        }

        Ok(())
    }
}

fn default_database_path() -> PathBuf {
    PathBuf::from("./usenet-indexer.db")
}

fn default_scan_timeout() -> Duration {
    Duration::from_secs(600)
}

fn default_update_wait() -> Duration {
    Duration::from_secs(300)
}

fn default_dead_binary_age_days() -> u32 {
    3
}

fn default_min_completion() -> f64 {
    100.0
}

fn default_min_archives() -> u32 {
    1
}

fn default_true() -> bool {
    true
}

fn default_rename_categories() -> Vec<i64> {
    vec![8010, 7020]
}

// Duration serialization helper
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}
