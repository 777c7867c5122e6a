//! Scan orchestration
//!
//! Drives one run: obtain a token, authenticate, walk the namespaces and
//! their pods, classify each pod's log and assemble a `ScanResult`.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use futures::{StreamExt, TryStreamExt, stream};
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use podsweep_k8s::{
    ClusterClient, ClusterError, CredentialError, CredentialProvider, EnvSource, RETRY_BACKOFF,
    cluster_name_from_env, retry_transient,
};
use podsweep_logs::LogScanner;
use podsweep_types::{
    Credential, Finding, NamespaceRef, PodRef, ScanError, ScanErrorKind, ScanResult, ScanState,
};

use crate::error::ScanFailure;
use crate::store::CredentialStore;

/// Default bound on reading and classifying one pod's log
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(120);

/// Default time before expiry at which a token is refreshed
pub const DEFAULT_REFRESH_MARGIN: chrono::Duration = chrono::Duration::seconds(60);

/// Default wait after a failed refresh before the next attempt
pub const DEFAULT_REFRESH_COOLDOWN: Duration = Duration::from_secs(30);

/// Runtime knobs for a scan
#[derive(Clone, Debug)]
pub struct ScanSettings {
    /// Bound on the fetch and classification of a single pod
    pub fetch_timeout: Duration,
    /// Pods scanned at once within a namespace
    pub concurrency: usize,
    /// Refresh the token when it expires within this margin
    pub refresh_margin: chrono::Duration,
    /// Minimum gap between refresh attempts after one fails
    pub refresh_cooldown: Duration,
    /// Pause before retrying a transient failure
    pub retry_backoff: Duration,
}

impl Default for ScanSettings {
    fn default() -> Self {
        Self {
            fetch_timeout: DEFAULT_FETCH_TIMEOUT,
            concurrency: 1,
            refresh_margin: DEFAULT_REFRESH_MARGIN,
            refresh_cooldown: DEFAULT_REFRESH_COOLDOWN,
            retry_backoff: RETRY_BACKOFF,
        }
    }
}

/// A refresh attempt that did not install a new token
#[derive(Clone, Copy, Debug)]
struct RefreshFailure {
    at: Instant,
    token_expired: bool,
}

/// What scanning one pod produced
struct PodOutcome {
    findings: Vec<Finding>,
    error: Option<ScanError>,
}

pub struct ScanOrchestrator {
    provider: Arc<dyn CredentialProvider>,
    client: Arc<dyn ClusterClient>,
    scanner: LogScanner,
    settings: ScanSettings,
    credentials: CredentialStore,
    state: Mutex<ScanState>,
    refresh_lock: tokio::sync::Mutex<()>,
    last_refresh_failure: Mutex<Option<RefreshFailure>>,
}

impl ScanOrchestrator {
    pub fn new(
        provider: Arc<dyn CredentialProvider>,
        client: Arc<dyn ClusterClient>,
        scanner: LogScanner,
        settings: ScanSettings,
    ) -> Self {
        Self {
            provider,
            client,
            scanner,
            settings,
            credentials: CredentialStore::new(),
            state: Mutex::new(ScanState::Idle),
            refresh_lock: tokio::sync::Mutex::new(()),
            last_refresh_failure: Mutex::new(None),
        }
    }

    /// Current lifecycle state
    pub fn state(&self) -> ScanState {
        *self.state.lock()
    }

    /// Credential currently installed on the client
    pub fn credential(&self) -> Option<Arc<Credential>> {
        self.credentials.current()
    }

    fn set_state(&self, next: ScanState) {
        let mut state = self.state.lock();
        if *state != next {
            debug!(from = ?*state, to = ?next, "scan state");
            *state = next;
        }
    }

    /// Run a scan for the cluster named by `EKS_CLUSTER_NAME` in `env`
    pub async fn run_from_env(
        &self,
        env: &dyn EnvSource,
        namespaces: &[NamespaceRef],
    ) -> Result<ScanResult, ScanFailure> {
        match cluster_name_from_env(env) {
            Ok(cluster) => self.run(&cluster, namespaces).await,
            Err(err) => {
                self.set_state(ScanState::Authenticating);
                self.set_state(ScanState::Failed);
                warn!(error = %err, "scan aborted before authentication");
                Err(err.into())
            }
        }
    }

    /// Run a scan of `namespaces`, in order, on `cluster`
    pub async fn run(
        &self,
        cluster: &str,
        namespaces: &[NamespaceRef],
    ) -> Result<ScanResult, ScanFailure> {
        self.set_state(ScanState::Authenticating);
        if let Err(err) = self.authenticate(cluster).await {
            self.set_state(ScanState::Failed);
            warn!(cluster, error = %err, "scan aborted during authentication");
            return Err(err);
        }

        let mut findings = Vec::new();
        let mut errors = Vec::new();
        let mut pods_scanned = 0;

        for (namespace_index, namespace) in namespaces.iter().enumerate() {
            self.set_state(ScanState::Scanning {
                namespace_index,
                pod_index: 0,
            });
            self.refresh_if_stale(cluster).await;

            let client = &self.client;
            let listed = retry_transient("list pods", self.settings.retry_backoff, move || {
                client.list_pods(namespace)
            })
            .await;

            let pods = match listed {
                Ok(pods) => pods,
                Err(err) => {
                    warn!(%namespace, error = %err, "namespace could not be scanned");
                    errors.push(ScanError::for_namespace(
                        err.kind(),
                        namespace.clone(),
                        err.to_string(),
                    ));
                    continue;
                }
            };
            info!(%namespace, pods = pods.len(), "scanning namespace");

            // `buffered` keeps listing order regardless of completion order.
            let mut outcomes = stream::iter(pods.iter().enumerate())
                .map(move |(pod_index, pod)| async move {
                    self.set_state(ScanState::Scanning {
                        namespace_index,
                        pod_index,
                    });
                    self.refresh_if_stale(cluster).await;
                    self.scan_pod(pod).await
                })
                .buffered(self.settings.concurrency.max(1));

            while let Some(outcome) = outcomes.next().await {
                findings.extend(outcome.findings);
                match outcome.error {
                    Some(error) => errors.push(error),
                    None => pods_scanned += 1,
                }
            }
        }

        self.set_state(ScanState::Aggregating);
        let result = ScanResult::new(findings, pods_scanned, errors);
        info!(
            pods_scanned = result.pods_scanned(),
            findings = result.findings().len(),
            errors = result.errors().len(),
            "scan complete"
        );
        self.set_state(ScanState::Done);
        Ok(result)
    }

    async fn authenticate(&self, cluster: &str) -> Result<(), ScanFailure> {
        let credential = self.obtain_token(cluster).await?;

        let rejected = match self.install(credential.clone()).await {
            Ok(()) => return Ok(()),
            Err(err @ ClusterError::Authorization { .. }) => err,
            Err(err) => return Err(ScanFailure::Authentication(err)),
        };

        // Only a cached token deserves a second chance.
        if !self.provider.invalidate(&credential).await {
            return Err(ScanFailure::Authentication(rejected));
        }
        info!(cluster, "cached token rejected, exchanging a fresh one");
        let fresh = self.obtain_token(cluster).await?;
        self.install(fresh)
            .await
            .map_err(ScanFailure::Authentication)
    }

    async fn install(&self, credential: Credential) -> Result<(), ClusterError> {
        self.client.authenticate(&credential).await?;
        let client = &self.client;
        retry_transient("verify", self.settings.retry_backoff, move || client.verify()).await?;
        self.credentials.replace(credential);
        Ok(())
    }

    /// Exchange a token, retrying once on an exchange failure
    async fn obtain_token(&self, cluster: &str) -> Result<Credential, CredentialError> {
        match self.provider.obtain_token(cluster).await {
            Err(err) if err.is_retryable() => {
                warn!(cluster, error = %err, "token exchange failed, retrying once");
                tokio::time::sleep(self.settings.retry_backoff).await;
                self.provider.obtain_token(cluster).await
            }
            other => other,
        }
    }

    /// Swap in a new token if the current one is about to expire.
    ///
    /// Failures leave the old token in place; requests it can no longer
    /// authorise are recorded per pod. After a failure, further attempts wait
    /// for `refresh_cooldown`, except for one attempt once the token expires.
    async fn refresh_if_stale(&self, cluster: &str) {
        let is_stale = |credential: &Option<Arc<Credential>>| {
            credential
                .as_ref()
                .is_some_and(|c| c.is_stale(Utc::now(), self.settings.refresh_margin))
        };
        if !is_stale(&self.credentials.current()) {
            return;
        }

        let _guard = self.refresh_lock.lock().await;
        // Another task may have refreshed while we waited.
        let current = self.credentials.current();
        if !is_stale(&current) {
            return;
        }
        let now = Utc::now();
        let token_expired = current.is_some_and(|c| c.expires_at() <= now);
        if self.refresh_backing_off(token_expired) {
            debug!(cluster, "recent token refresh failed, not retrying yet");
            return;
        }

        info!(cluster, "token near expiry, refreshing");
        let installed = match self.obtain_token(cluster).await {
            Ok(fresh) => match self.client.authenticate(&fresh).await {
                Ok(()) => {
                    self.credentials.replace(fresh);
                    true
                }
                Err(err) => {
                    warn!(cluster, error = %err, "failed to install refreshed token");
                    false
                }
            },
            Err(err) => {
                warn!(cluster, error = %err, "token refresh failed, keeping current token");
                false
            }
        };

        *self.last_refresh_failure.lock() = (!installed).then(|| RefreshFailure {
            at: Instant::now(),
            token_expired,
        });
    }

    fn refresh_backing_off(&self, token_expired: bool) -> bool {
        let Some(failure) = *self.last_refresh_failure.lock() else {
            return false;
        };
        if failure.at.elapsed() >= self.settings.refresh_cooldown {
            return false;
        }
        // The token expired since the last failure: worth one more try.
        !(token_expired && !failure.token_expired)
    }

    async fn scan_pod(&self, pod: &PodRef) -> PodOutcome {
        debug!(pod = %pod, "scanning pod");
        let mut findings = Vec::new();

        let scan = async {
            let mut lines = self.client.fetch_logs(pod).await?;
            while let Some(line) = lines.try_next().await? {
                if let Some(finding) = self.scanner.inspect(&line, pod) {
                    info!(
                        pod = %pod,
                        container = ?finding.container,
                        line = finding.line_number,
                        "error marker in log"
                    );
                    findings.push(finding);
                }
            }
            Ok::<_, ClusterError>(())
        };

        let error = match tokio::time::timeout(self.settings.fetch_timeout, scan).await {
            Ok(Ok(())) => None,
            Ok(Err(err)) => Some(ScanError::for_pod(err.kind(), pod, err.to_string())),
            Err(_) => Some(ScanError::for_pod(
                ScanErrorKind::TransientApi,
                pod,
                format!(
                    "log fetch did not finish within {:?}",
                    self.settings.fetch_timeout
                ),
            )),
        };

        if let Some(error) = &error {
            warn!(pod = %pod, kind = %error.kind, message = %error.message, "pod could not be scanned");
        }

        PodOutcome { findings, error }
    }
}
