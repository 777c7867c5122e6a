//! Token caching for EKS authentication
//!
//! Caches exchanged tokens on disk so repeated gate runs skip the slow
//! `aws eks get-token` call. Entries are keyed by cluster name and honoured
//! until shortly before the token's own expiry.

use chrono::{DateTime, Utc};
use podsweep_types::Credential;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Seconds before expiry at which a cached token stops being served
const EXPIRY_BUFFER_SECS: i64 = 30;

/// Cached token entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachedToken {
    pub token: String,
    pub obtained_at: i64,
    pub expiration_timestamp: i64,
}

impl CachedToken {
    /// Check if the token is still usable at `now`
    pub fn is_valid(&self, now: DateTime<Utc>) -> bool {
        self.expiration_timestamp > now.timestamp() + EXPIRY_BUFFER_SECS
    }
}

/// Token cache stored on disk
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct TokenCache {
    /// Map of cluster name to cached token
    pub tokens: HashMap<String, CachedToken>,
}

impl TokenCache {
    /// Default cache location, `~/.podsweep/token-cache.json`
    pub fn default_path() -> Option<PathBuf> {
        let home = dirs::home_dir()?;
        Some(home.join(".podsweep").join("token-cache.json"))
    }

    /// Load the token cache from disk. A missing or corrupt file yields an empty cache.
    pub fn load(path: &Path) -> Self {
        fs::read_to_string(path)
            .ok()
            .and_then(|content| serde_json::from_str(&content).ok())
            .unwrap_or_default()
    }

    /// Save the token cache to disk. Failures only cost a future exchange.
    pub fn save(&self, path: &Path) {
        if let Some(parent) = path.parent() {
            let _ = fs::create_dir_all(parent);
        }
        let result = serde_json::to_string_pretty(self)
            .map_err(std::io::Error::other)
            .and_then(|content| write_private(path, content.as_bytes()));
        if let Err(err) = result {
            debug!(path = %path.display(), error = %err, "failed to write token cache");
        }
    }

    /// Get a cached credential for a cluster if still valid
    pub fn credential(&self, cluster_name: &str, now: DateTime<Utc>) -> Option<Credential> {
        let cached = self
            .tokens
            .get(cluster_name)
            .filter(|t| t.is_valid(now))?;
        Credential::new(
            cluster_name,
            cached.token.clone(),
            DateTime::from_timestamp(cached.obtained_at, 0)?,
            DateTime::from_timestamp(cached.expiration_timestamp, 0)?,
        )
    }

    /// Store a credential in the cache
    pub fn insert(&mut self, credential: &Credential) {
        self.tokens.insert(
            credential.cluster().to_string(),
            CachedToken {
                token: credential.token().to_string(),
                obtained_at: credential.obtained_at().timestamp(),
                expiration_timestamp: credential.expires_at().timestamp(),
            },
        );
    }

    /// Remove the entry for `cluster_name` if it holds `token`
    pub fn evict(&mut self, cluster_name: &str, token: &str) -> bool {
        let matches = self
            .tokens
            .get(cluster_name)
            .is_some_and(|t| t.token == token);
        if matches {
            self.tokens.remove(cluster_name);
        }
        matches
    }

    /// Clean up expired tokens
    pub fn cleanup(&mut self, now: DateTime<Utc>) {
        self.tokens.retain(|_, t| t.is_valid(now));
    }
}

/// Write `content` readable by the owner only. The file holds bearer tokens.
fn write_private(path: &Path, content: &[u8]) -> io::Result<()> {
    let mut options = fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};
        options.mode(0o600);
        // `mode` only applies when the file is created.
        if path.exists() {
            fs::set_permissions(path, fs::Permissions::from_mode(0o600))?;
        }
    }
    let mut file = options.open(path)?;
    file.write_all(content)
}
