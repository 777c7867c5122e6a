//! Scan orchestration for podsweep
//!
//! `run_scan` is the single entry point a gate or test harness calls. It
//! returns either a fatal `ScanFailure` (nothing was scanned) or a complete
//! `ScanResult` whose findings and errors the caller inspects.

mod config;
mod error;
mod orchestrator;
mod store;

use std::sync::Arc;

pub use config::{DEFAULT_NAMESPACES, MatcherConfig, ScanConfig};
pub use error::{ConfigError, ScanFailure};
pub use orchestrator::{
    DEFAULT_FETCH_TIMEOUT, DEFAULT_REFRESH_COOLDOWN, DEFAULT_REFRESH_MARGIN, ScanOrchestrator,
    ScanSettings,
};
pub use store::CredentialStore;

use podsweep_k8s::{ClusterClient, CredentialProvider, EnvSource};
use podsweep_logs::LogScanner;

// Re-export types used in our public API
pub use podsweep_types::{
    Finding, NamespaceRef, PodRef, ScanError, ScanErrorKind, ScanOutcome, ScanResult, ScanState,
};

/// Scan `namespaces` on the cluster named by `EKS_CLUSTER_NAME` in `env`
pub async fn run_scan(
    env: &dyn EnvSource,
    provider: Arc<dyn CredentialProvider>,
    client: Arc<dyn ClusterClient>,
    scanner: LogScanner,
    settings: ScanSettings,
    namespaces: &[NamespaceRef],
) -> Result<ScanResult, ScanFailure> {
    ScanOrchestrator::new(provider, client, scanner, settings)
        .run_from_env(env, namespaces)
        .await
}
