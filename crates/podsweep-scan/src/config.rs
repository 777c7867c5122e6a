//! Scan configuration
//!
//! Defaults, optionally overlaid by a TOML file. The cluster identifier is
//! not part of the file; it always comes from `EKS_CLUSTER_NAME`.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use podsweep_k8s::{
    DEFAULT_EXCHANGE_TIMEOUT, DEFAULT_TOKEN_TTL, EksTokenProvider, LogOptions, TokenCache,
};
use podsweep_logs::{LogScanner, MarkerPredicate, RegexPredicate, SeverityPredicate};
use podsweep_types::{LogLevel, NamespaceRef};

use crate::error::ConfigError;
use crate::orchestrator::{DEFAULT_FETCH_TIMEOUT, DEFAULT_REFRESH_MARGIN, ScanSettings};

/// Namespaces checked when none are configured
pub const DEFAULT_NAMESPACES: &[&str] = &["ui", "orders"];

/// How log lines are classified
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MatcherConfig {
    /// Case-insensitive substring
    Marker { marker: String },
    /// Case-insensitive regular expression
    Regex { pattern: String },
    /// Parsed severity at or above `threshold`
    Severity { threshold: String },
}

impl Default for MatcherConfig {
    fn default() -> Self {
        Self::Marker {
            marker: podsweep_logs::DEFAULT_MARKER.to_string(),
        }
    }
}

impl MatcherConfig {
    pub fn build(&self) -> Result<LogScanner, ConfigError> {
        let invalid = |e: podsweep_logs::PredicateError| ConfigError::Invalid(e.to_string());
        Ok(match self {
            Self::Marker { marker } => LogScanner::new(MarkerPredicate::new(marker).map_err(invalid)?),
            Self::Regex { pattern } => LogScanner::new(RegexPredicate::new(pattern).map_err(invalid)?),
            Self::Severity { threshold } => {
                let level = LogLevel::parse(threshold).ok_or_else(|| {
                    ConfigError::Invalid(format!("unknown severity threshold '{}'", threshold))
                })?;
                LogScanner::new(SeverityPredicate::new(level))
            }
        })
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct ScanConfig {
    /// Namespaces to scan, in order
    pub namespaces: Vec<String>,
    /// Kubeconfig context (defaults to current-context)
    pub context: Option<String>,
    pub matcher: MatcherConfig,
    pub exchange_timeout_secs: u64,
    pub fetch_timeout_secs: u64,
    pub concurrency: usize,
    pub refresh_margin_secs: i64,
    /// Token lifetime assumed when the CLI does not report an expiry
    pub token_ttl_secs: i64,
    pub tail_lines: Option<i64>,
    pub since_seconds: Option<i64>,
    /// Reuse tokens across runs via `~/.podsweep/token-cache.json`
    pub token_cache: bool,
    pub aws_region: Option<String>,
    pub aws_profile: Option<String>,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            namespaces: DEFAULT_NAMESPACES.iter().map(|s| s.to_string()).collect(),
            context: None,
            matcher: MatcherConfig::default(),
            exchange_timeout_secs: DEFAULT_EXCHANGE_TIMEOUT.as_secs(),
            fetch_timeout_secs: DEFAULT_FETCH_TIMEOUT.as_secs(),
            concurrency: 1,
            refresh_margin_secs: DEFAULT_REFRESH_MARGIN.num_seconds(),
            token_ttl_secs: DEFAULT_TOKEN_TTL.num_seconds(),
            tail_lines: None,
            since_seconds: None,
            token_cache: false,
            aws_region: None,
            aws_profile: None,
        }
    }
}

impl ScanConfig {
    /// Load defaults, overlaid by `path` if given
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(path) => Self::from_file(path),
            None => Ok(Self::default()),
        }
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Check values that deserialize fine but cannot drive a scan
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.namespaces.is_empty() {
            return Err(ConfigError::Invalid("no namespaces to scan".to_string()));
        }
        if let Some(blank) = self.namespaces.iter().find(|ns| ns.trim().is_empty()) {
            return Err(ConfigError::Invalid(format!("invalid namespace '{}'", blank)));
        }
        if self.concurrency == 0 {
            return Err(ConfigError::Invalid("concurrency must be at least 1".to_string()));
        }
        if self.exchange_timeout_secs == 0 || self.fetch_timeout_secs == 0 {
            return Err(ConfigError::Invalid("timeouts must be positive".to_string()));
        }
        if self.token_ttl_secs <= 0 || self.refresh_margin_secs < 0 {
            return Err(ConfigError::Invalid(
                "token ttl must be positive and refresh margin non-negative".to_string(),
            ));
        }
        self.matcher.build().map(|_| ())
    }

    pub fn namespace_refs(&self) -> Vec<NamespaceRef> {
        self.namespaces
            .iter()
            .map(|ns| NamespaceRef::new(ns.trim()))
            .collect()
    }

    pub fn scanner(&self) -> Result<LogScanner, ConfigError> {
        self.matcher.build()
    }

    pub fn settings(&self) -> ScanSettings {
        ScanSettings {
            fetch_timeout: Duration::from_secs(self.fetch_timeout_secs),
            concurrency: self.concurrency,
            refresh_margin: chrono::Duration::seconds(self.refresh_margin_secs),
            ..ScanSettings::default()
        }
    }

    pub fn log_options(&self) -> LogOptions {
        LogOptions {
            tail_lines: self.tail_lines,
            since_seconds: self.since_seconds,
        }
    }

    fn token_cache_path(&self) -> Option<PathBuf> {
        self.token_cache.then(TokenCache::default_path).flatten()
    }

    pub fn token_provider(&self) -> EksTokenProvider {
        EksTokenProvider::new()
            .with_region(self.aws_region.clone())
            .with_profile(self.aws_profile.clone())
            .with_timeout(Duration::from_secs(self.exchange_timeout_secs))
            .with_token_ttl(chrono::Duration::seconds(self.token_ttl_secs))
            .with_cache(self.token_cache_path())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = ScanConfig::default();
        config.validate().unwrap();
        assert_eq!(
            config.namespace_refs(),
            vec![NamespaceRef::new("ui"), NamespaceRef::new("orders")]
        );
    }

    #[test]
    fn test_defaults_match_runtime_constants() {
        let config = ScanConfig::default();
        let settings = config.settings();
        assert_eq!(settings.fetch_timeout, DEFAULT_FETCH_TIMEOUT);
        assert_eq!(settings.refresh_margin, DEFAULT_REFRESH_MARGIN);
        assert_eq!(
            Duration::from_secs(config.exchange_timeout_secs),
            DEFAULT_EXCHANGE_TIMEOUT
        );
        assert_eq!(
            chrono::Duration::seconds(config.token_ttl_secs),
            DEFAULT_TOKEN_TTL
        );
    }

    #[test]
    fn test_load_partial_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("podsweep.toml");
        fs::write(
            &path,
            r#"
namespaces = ["checkout", "carts"]
concurrency = 4
tail_lines = 500

[matcher]
kind = "severity"
threshold = "warn"
"#,
        )
        .unwrap();

        let config = ScanConfig::load(Some(&path)).unwrap();
        config.validate().unwrap();
        assert_eq!(config.namespaces, vec!["checkout", "carts"]);
        assert_eq!(config.concurrency, 4);
        assert_eq!(config.log_options().tail_lines, Some(500));
        assert_eq!(
            config.matcher,
            MatcherConfig::Severity {
                threshold: "warn".to_string()
            }
        );
        // Untouched fields keep their defaults
        assert_eq!(config.fetch_timeout_secs, 120);
    }

    #[test]
    fn test_unknown_field_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("podsweep.toml");
        fs::write(&path, "namespace = \"ui\"\n").unwrap();
        assert!(matches!(
            ScanConfig::load(Some(&path)),
            Err(ConfigError::Parse { .. })
        ));
    }

    #[test]
    fn test_missing_file_is_read_error() {
        let err = ScanConfig::load(Some(Path::new("/nonexistent/podsweep.toml"))).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = ScanConfig::default();
        config.namespaces.clear();
        assert!(config.validate().is_err());

        let mut config = ScanConfig::default();
        config.concurrency = 0;
        assert!(config.validate().is_err());

        let mut config = ScanConfig::default();
        config.matcher = MatcherConfig::Regex {
            pattern: "(".to_string(),
        };
        assert!(config.validate().is_err());

        let mut config = ScanConfig::default();
        config.matcher = MatcherConfig::Severity {
            threshold: "loud".to_string(),
        };
        assert!(config.validate().is_err());
    }
}
