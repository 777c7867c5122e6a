//! Cluster credentials
//!
//! Resolves the cluster identifier from the environment and exchanges it for a
//! short-lived bearer token through the AWS CLI.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use podsweep_types::Credential;
use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tracing::{debug, info};

use crate::error::CredentialError;
use crate::token_cache::TokenCache;

/// Environment variable holding the EKS cluster name
pub const CLUSTER_NAME_ENV: &str = "EKS_CLUSTER_NAME";

/// Default bound on one token exchange
pub const DEFAULT_EXCHANGE_TIMEOUT: Duration = Duration::from_secs(30);

/// Assumed token lifetime when the CLI does not report one (EKS tokens last 15 minutes)
pub const DEFAULT_TOKEN_TTL: chrono::Duration = chrono::Duration::minutes(14);

/// Read access to process environment variables
pub trait EnvSource: Send + Sync {
    fn var(&self, key: &str) -> Option<String>;
}

/// The real process environment
#[derive(Clone, Copy, Debug, Default)]
pub struct ProcessEnv;

impl EnvSource for ProcessEnv {
    fn var(&self, key: &str) -> Option<String> {
        std::env::var(key).ok()
    }
}

impl EnvSource for HashMap<String, String> {
    fn var(&self, key: &str) -> Option<String> {
        self.get(key).cloned()
    }
}

/// Read the cluster identifier. Missing or blank is a configuration error.
pub fn cluster_name_from_env(env: &dyn EnvSource) -> Result<String, CredentialError> {
    match env.var(CLUSTER_NAME_ENV) {
        Some(name) if !name.trim().is_empty() => Ok(name.trim().to_string()),
        _ => Err(CredentialError::Configuration(format!(
            "{} environment variable is not set",
            CLUSTER_NAME_ENV
        ))),
    }
}

/// Source of bearer tokens for a cluster
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    /// Exchange a cluster identifier for a fresh credential
    async fn obtain_token(&self, cluster: &str) -> Result<Credential, CredentialError>;

    /// Forget a credential the control plane rejected.
    ///
    /// Returns true if the credential came from a cache, meaning a new
    /// exchange may produce a different token.
    async fn invalidate(&self, _credential: &Credential) -> bool {
        false
    }
}

/// Obtains tokens by running `aws eks get-token`
#[derive(Clone, Debug)]
pub struct EksTokenProvider {
    program: String,
    region: Option<String>,
    profile: Option<String>,
    timeout: Duration,
    token_ttl: chrono::Duration,
    cache_path: Option<PathBuf>,
}

impl Default for EksTokenProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl EksTokenProvider {
    pub fn new() -> Self {
        Self {
            program: "aws".to_string(),
            region: None,
            profile: None,
            timeout: DEFAULT_EXCHANGE_TIMEOUT,
            token_ttl: DEFAULT_TOKEN_TTL,
            cache_path: None,
        }
    }

    /// Use a different executable in place of `aws`
    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    pub fn with_region(mut self, region: Option<String>) -> Self {
        self.region = region;
        self
    }

    pub fn with_profile(mut self, profile: Option<String>) -> Self {
        self.profile = profile;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_token_ttl(mut self, ttl: chrono::Duration) -> Self {
        self.token_ttl = ttl;
        self
    }

    /// Persist tokens in a cache file between runs
    pub fn with_cache(mut self, path: Option<PathBuf>) -> Self {
        self.cache_path = path;
        self
    }

    fn args(&self, cluster: &str) -> Vec<String> {
        let mut args = vec![
            "eks".to_string(),
            "get-token".to_string(),
            "--cluster-name".to_string(),
            cluster.to_string(),
            "--output".to_string(),
            "json".to_string(),
        ];
        if let Some(region) = &self.region {
            args.extend(["--region".to_string(), region.clone()]);
        }
        if let Some(profile) = &self.profile {
            args.extend(["--profile".to_string(), profile.clone()]);
        }
        args
    }

    async fn exchange(&self, cluster: &str) -> Result<Credential, CredentialError> {
        let mut command = tokio::process::Command::new(&self.program);
        command
            .args(self.args(cluster))
            .stdin(Stdio::null())
            .kill_on_drop(true);

        let output = match tokio::time::timeout(self.timeout, command.output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                return Err(CredentialError::exchange(
                    cluster,
                    format!("failed to run {}: {}", self.program, e),
                ));
            }
            Err(_) => {
                return Err(CredentialError::exchange(
                    cluster,
                    format!("{} did not finish within {:?}", self.program, self.timeout),
                ));
            }
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(CredentialError::exchange(
                cluster,
                format!("{} exited with {}: {}", self.program, output.status, stderr.trim()),
            ));
        }

        parse_token_response(cluster, &output.stdout, Utc::now(), self.token_ttl)
    }
}

#[async_trait]
impl CredentialProvider for EksTokenProvider {
    async fn obtain_token(&self, cluster: &str) -> Result<Credential, CredentialError> {
        if cluster.trim().is_empty() {
            return Err(CredentialError::Configuration(
                "cluster identifier is empty".to_string(),
            ));
        }

        if let Some(path) = &self.cache_path {
            if let Some(credential) = TokenCache::load(path).credential(cluster, Utc::now()) {
                debug!(cluster, "using cached token");
                return Ok(credential);
            }
        }

        info!(cluster, "exchanging cluster identity for a bearer token");
        let credential = self.exchange(cluster).await?;

        if let Some(path) = &self.cache_path {
            let mut cache = TokenCache::load(path);
            cache.insert(&credential);
            cache.cleanup(Utc::now());
            cache.save(path);
        }

        Ok(credential)
    }

    async fn invalidate(&self, credential: &Credential) -> bool {
        let Some(path) = &self.cache_path else {
            return false;
        };
        let mut cache = TokenCache::load(path);
        let evicted = cache.evict(credential.cluster(), credential.token());
        if evicted {
            debug!(cluster = credential.cluster(), "evicted rejected cached token");
            cache.save(path);
        }
        evicted
    }
}

/// Parse the ExecCredential JSON printed by `aws eks get-token`.
///
/// The token lives at `status.token`. `status.expirationTimestamp` is used as
/// the expiry when present, otherwise `now + ttl`.
pub fn parse_token_response(
    cluster: &str,
    stdout: &[u8],
    now: DateTime<Utc>,
    ttl: chrono::Duration,
) -> Result<Credential, CredentialError> {
    let response: serde_json::Value = serde_json::from_slice(stdout)
        .map_err(|e| CredentialError::exchange(cluster, format!("malformed token output: {}", e)))?;

    let status = response.get("status");
    let token = status
        .and_then(|s| s.get("token"))
        .and_then(|t| t.as_str())
        .ok_or_else(|| CredentialError::exchange(cluster, "token output has no status.token"))?;

    let expires_at = status
        .and_then(|s| s.get("expirationTimestamp"))
        .and_then(|t| t.as_str())
        .and_then(|t| DateTime::parse_from_rfc3339(t).ok())
        .map(|t| t.with_timezone(&Utc))
        .unwrap_or(now + ttl);

    Credential::new(cluster, token, now, expires_at)
        .ok_or_else(|| CredentialError::exchange(cluster, "token output has an empty status.token"))
}
