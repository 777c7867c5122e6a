//! Shared types for podsweep
//!
//! This crate contains the data model passed between the credential, cluster,
//! log classification and orchestration crates.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::fmt;

// ============================================================================
// Credentials
// ============================================================================

/// A bearer token obtained for one cluster.
///
/// Credentials are never mutated. A refresh produces a new value that replaces
/// the old one wholesale.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    cluster: String,
    token: String,
    obtained_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
}

impl Credential {
    /// Build a credential. Returns `None` if the token is empty.
    pub fn new(
        cluster: impl Into<String>,
        token: impl Into<String>,
        obtained_at: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Option<Self> {
        let token = token.into();
        if token.trim().is_empty() {
            return None;
        }
        Some(Self {
            cluster: cluster.into(),
            token,
            obtained_at,
            expires_at,
        })
    }

    pub fn cluster(&self) -> &str {
        &self.cluster
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn obtained_at(&self) -> DateTime<Utc> {
        self.obtained_at
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }

    /// Whether the token expires within `margin` of `now`
    pub fn is_stale(&self, now: DateTime<Utc>, margin: Duration) -> bool {
        self.expires_at - margin <= now
    }
}

// The token never appears in logs or debug output.
impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("cluster", &self.cluster)
            .field("token", &"<redacted>")
            .field("obtained_at", &self.obtained_at)
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

// ============================================================================
// Kubernetes Resource References
// ============================================================================

/// Name of a namespace to scan
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct NamespaceRef(String);

impl NamespaceRef {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NamespaceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for NamespaceRef {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for NamespaceRef {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// A pod as seen at listing time
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct PodRef {
    pub namespace: NamespaceRef,
    pub name: String,
    /// Container names from the pod spec, in spec order
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub containers: Vec<String>,
}

impl PodRef {
    pub fn new(namespace: NamespaceRef, name: impl Into<String>) -> Self {
        Self {
            namespace,
            name: name.into(),
            containers: Vec::new(),
        }
    }

    pub fn with_containers(mut self, containers: Vec<String>) -> Self {
        self.containers = containers;
        self
    }
}

impl fmt::Display for PodRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

// ============================================================================
// Log Types
// ============================================================================

/// One line of pod output
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LogLine {
    /// Container the line came from (if the pod has more than one)
    pub container: Option<String>,

    /// Line number within the container's log, starting at 1
    pub line_number: u64,

    /// Line content without the trailing newline
    pub text: String,
}

impl LogLine {
    pub fn new(line_number: u64, text: impl Into<String>) -> Self {
        Self {
            container: None,
            line_number,
            text: text.into(),
        }
    }

    pub fn in_container(mut self, container: impl Into<String>) -> Self {
        self.container = Some(container.into());
        self
    }
}

/// Log severity level
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
    Fatal,
}

impl LogLevel {
    /// Parse log level from common formats
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "trace" | "trc" | "trce" => Some(Self::Trace),
            "debug" | "dbg" | "debg" => Some(Self::Debug),
            "info" | "inf" | "information" => Some(Self::Info),
            "warn" | "warning" | "wrn" => Some(Self::Warn),
            "error" | "err" | "erro" => Some(Self::Error),
            "fatal" | "panic" | "critical" | "crit" | "ftl" => Some(Self::Fatal),
            _ => None,
        }
    }
}

// ============================================================================
// Scan Results
// ============================================================================

/// A log line that matched the error predicate
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Finding {
    pub pod: PodRef,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub container: Option<String>,
    pub line_number: u64,
    pub reason: String,
}

/// Category of a per-resource failure
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanErrorKind {
    NamespaceNotFound,
    PodNotFound,
    Authorization,
    TransientApi,
    NotAuthenticated,
}

impl ScanErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NamespaceNotFound => "namespace-not-found",
            Self::PodNotFound => "pod-not-found",
            Self::Authorization => "authorization",
            Self::TransientApi => "transient-api",
            Self::NotAuthenticated => "not-authenticated",
        }
    }
}

impl fmt::Display for ScanErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A namespace or pod that could not be scanned
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ScanError {
    pub kind: ScanErrorKind,
    pub namespace: NamespaceRef,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pod: Option<String>,
    pub message: String,
}

impl ScanError {
    pub fn for_namespace(
        kind: ScanErrorKind,
        namespace: NamespaceRef,
        message: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            namespace,
            pod: None,
            message: message.into(),
        }
    }

    pub fn for_pod(kind: ScanErrorKind, pod: &PodRef, message: impl Into<String>) -> Self {
        Self {
            kind,
            namespace: pod.namespace.clone(),
            pod: Some(pod.name.clone()),
            message: message.into(),
        }
    }
}

/// How a completed scan should be read
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ScanOutcome {
    /// Every pod was scanned and nothing matched
    Clean,
    /// At least one log line matched
    FindingsPresent,
    /// Nothing matched, but some namespaces or pods could not be scanned
    Incomplete,
}

/// Aggregated output of one scan run
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ScanResult {
    findings: Vec<Finding>,
    pods_scanned: usize,
    errors: Vec<ScanError>,
}

impl ScanResult {
    pub fn new(findings: Vec<Finding>, pods_scanned: usize, errors: Vec<ScanError>) -> Self {
        Self {
            findings,
            pods_scanned,
            errors,
        }
    }

    pub fn findings(&self) -> &[Finding] {
        &self.findings
    }

    pub fn pods_scanned(&self) -> usize {
        self.pods_scanned
    }

    pub fn errors(&self) -> &[ScanError] {
        &self.errors
    }

    pub fn is_clean(&self) -> bool {
        self.findings.is_empty() && self.errors.is_empty()
    }

    pub fn outcome(&self) -> ScanOutcome {
        if !self.findings.is_empty() {
            ScanOutcome::FindingsPresent
        } else if !self.errors.is_empty() {
            ScanOutcome::Incomplete
        } else {
            ScanOutcome::Clean
        }
    }
}

/// Orchestrator lifecycle
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum ScanState {
    #[default]
    Idle,
    Authenticating,
    Scanning {
        namespace_index: usize,
        pod_index: usize,
    },
    Aggregating,
    Done,
    Failed,
}
