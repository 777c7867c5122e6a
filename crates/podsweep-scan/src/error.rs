use std::path::PathBuf;

use podsweep_k8s::{ClusterError, CredentialError};
use thiserror::Error;

/// A scan that ended before any namespace was touched
#[derive(Debug, Error)]
pub enum ScanFailure {
    #[error(transparent)]
    Credential(#[from] CredentialError),

    #[error("cluster authentication failed: {0}")]
    Authentication(#[source] ClusterError),
}

impl ScanFailure {
    /// Static input was missing or invalid, as opposed to a runtime fault
    pub fn is_configuration(&self) -> bool {
        matches!(self, Self::Credential(CredentialError::Configuration(_)))
    }
}

/// Problems loading or validating a config file
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid configuration: {0}")]
    Invalid(String),
}
