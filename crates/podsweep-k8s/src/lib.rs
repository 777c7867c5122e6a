//! Kubernetes access for podsweep
//!
//! This crate obtains EKS bearer tokens and wraps the control-plane calls a
//! scan needs: verifying the token, listing pods and reading pod logs.

mod client;
mod credential;
mod error;
mod retry;
mod token_cache;

pub use client::{ClusterClient, KubeClusterClient, LogOptions, LogStream};
pub use credential::{
    CLUSTER_NAME_ENV, CredentialProvider, DEFAULT_EXCHANGE_TIMEOUT, DEFAULT_TOKEN_TTL,
    EksTokenProvider, EnvSource, ProcessEnv, cluster_name_from_env, parse_token_response,
};
pub use error::{ClusterError, CredentialError};
pub use retry::{RETRY_BACKOFF, retry_transient};
pub use token_cache::{CachedToken, TokenCache};

// Re-export types that are used in our public API
pub use podsweep_types::{Credential, LogLine, NamespaceRef, PodRef};
