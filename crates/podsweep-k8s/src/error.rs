use podsweep_types::{NamespaceRef, PodRef, ScanErrorKind};
use thiserror::Error;

/// Failures obtaining a cluster credential. Both variants abort a scan.
#[derive(Debug, Error)]
pub enum CredentialError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("token exchange for cluster {cluster} failed: {message}")]
    Exchange { cluster: String, message: String },
}

impl CredentialError {
    pub fn exchange(cluster: &str, message: impl Into<String>) -> Self {
        Self::Exchange {
            cluster: cluster.to_string(),
            message: message.into(),
        }
    }

    /// Only exchange failures are worth retrying
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Exchange { .. })
    }
}

/// Failures talking to the cluster control plane.
#[derive(Debug, Error)]
pub enum ClusterError {
    #[error("cluster client used before authenticate")]
    NotAuthenticated,

    #[error("cluster client configuration error: {message}")]
    Config { message: String },

    #[error("namespace {namespace} not found")]
    NamespaceNotFound { namespace: String },

    #[error("pod {namespace}/{name} not found")]
    PodNotFound { namespace: String, name: String },

    #[error("request rejected by the control plane ({code}): {message}")]
    Authorization { code: u16, message: String },

    #[error("transient API failure: {message}")]
    TransientApi { message: String },
}

/// What a request was aimed at, used to classify 404 responses
#[derive(Clone, Copy, Debug)]
pub(crate) enum Target<'a> {
    Cluster,
    Namespace(&'a NamespaceRef),
    Pod(&'a PodRef),
}

impl ClusterError {
    pub fn transient(message: impl Into<String>) -> Self {
        Self::TransientApi {
            message: message.into(),
        }
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, Self::TransientApi { .. })
    }

    /// Category recorded when this error is captured per namespace or pod
    pub fn kind(&self) -> ScanErrorKind {
        match self {
            Self::NotAuthenticated | Self::Config { .. } => ScanErrorKind::NotAuthenticated,
            Self::NamespaceNotFound { .. } => ScanErrorKind::NamespaceNotFound,
            Self::PodNotFound { .. } => ScanErrorKind::PodNotFound,
            Self::Authorization { .. } => ScanErrorKind::Authorization,
            Self::TransientApi { .. } => ScanErrorKind::TransientApi,
        }
    }

    pub(crate) fn from_kube(err: kube::Error, target: Target<'_>) -> Self {
        match err {
            kube::Error::Api(resp) => match (resp.code, target) {
                (401 | 403, _) => Self::Authorization {
                    code: resp.code,
                    message: resp.message,
                },
                (404, Target::Namespace(ns)) => Self::NamespaceNotFound {
                    namespace: ns.to_string(),
                },
                (404, Target::Pod(pod)) => Self::PodNotFound {
                    namespace: pod.namespace.to_string(),
                    name: pod.name.clone(),
                },
                (code, _) => Self::TransientApi {
                    message: format!("{} ({})", resp.message, code),
                },
            },
            kube::Error::Auth(e) => Self::Authorization {
                code: 401,
                message: e.to_string(),
            },
            other => Self::TransientApi {
                message: other.to_string(),
            },
        }
    }
}
