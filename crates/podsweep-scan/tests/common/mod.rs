#![allow(dead_code)]

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use futures::{StreamExt, stream};
use parking_lot::Mutex;

use podsweep_k8s::{
    CLUSTER_NAME_ENV, ClusterClient, ClusterError, CredentialError, CredentialProvider, LogStream,
};
use podsweep_scan::ScanSettings;
use podsweep_types::{Credential, LogLine, NamespaceRef, PodRef};

pub const CLUSTER: &str = "retail-store";

pub fn env_with_cluster() -> HashMap<String, String> {
    HashMap::from([(CLUSTER_NAME_ENV.to_string(), CLUSTER.to_string())])
}

pub fn namespaces(names: &[&str]) -> Vec<NamespaceRef> {
    names.iter().map(|n| NamespaceRef::new(*n)).collect()
}

pub fn fast_settings() -> ScanSettings {
    ScanSettings {
        fetch_timeout: Duration::from_secs(5),
        retry_backoff: Duration::ZERO,
        ..ScanSettings::default()
    }
}

// ============================================================================
// Credential provider
// ============================================================================

pub enum Grant {
    Token(&'static str, chrono::Duration),
    Fail,
    Misconfigured,
}

/// Hands out tokens from a script, one entry per exchange
pub struct ScriptedProvider {
    script: Mutex<VecDeque<Grant>>,
    cached_tokens: Mutex<HashSet<String>>,
    calls: Mutex<usize>,
}

impl ScriptedProvider {
    pub fn new(script: Vec<Grant>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script.into()),
            cached_tokens: Mutex::new(HashSet::new()),
            calls: Mutex::new(0),
        })
    }

    pub fn token(token: &'static str) -> Arc<Self> {
        Self::new(vec![Grant::Token(token, chrono::Duration::minutes(14))])
    }

    /// Treat `token` as served from a cache, so invalidating it succeeds
    pub fn mark_cached(&self, token: &str) {
        self.cached_tokens.lock().insert(token.to_string());
    }

    pub fn calls(&self) -> usize {
        *self.calls.lock()
    }
}

#[async_trait]
impl CredentialProvider for ScriptedProvider {
    async fn obtain_token(&self, cluster: &str) -> Result<Credential, CredentialError> {
        *self.calls.lock() += 1;
        let grant = self.script.lock().pop_front();
        match grant {
            Some(Grant::Token(token, ttl)) => {
                let now = Utc::now();
                Credential::new(cluster, token, now, now + ttl)
                    .ok_or_else(|| CredentialError::exchange(cluster, "empty token"))
            }
            Some(Grant::Misconfigured) => Err(CredentialError::Configuration(
                "cluster identifier is empty".to_string(),
            )),
            Some(Grant::Fail) | None => Err(CredentialError::exchange(cluster, "exit status 255")),
        }
    }

    async fn invalidate(&self, credential: &Credential) -> bool {
        self.cached_tokens.lock().remove(credential.token())
    }
}

// ============================================================================
// Cluster
// ============================================================================

#[derive(Clone, Copy, Debug)]
pub enum Failure {
    Transient,
    PodGone,
    Forbidden,
}

impl Failure {
    fn into_error(self, pod: &PodRef) -> ClusterError {
        match self {
            Self::Transient => ClusterError::transient("connection reset by peer"),
            Self::PodGone => ClusterError::PodNotFound {
                namespace: pod.namespace.to_string(),
                name: pod.name.clone(),
            },
            Self::Forbidden => ClusterError::Authorization {
                code: 401,
                message: "Unauthorized".to_string(),
            },
        }
    }
}

#[derive(Clone, Debug)]
pub enum PodLog {
    Lines(Vec<&'static str>),
    FailOpen(Failure),
    FailAfter(Vec<&'static str>, Failure),
    /// Lines that arrive only after a delay
    Delayed(Duration, Vec<&'static str>),
    Hang,
}

/// In-memory cluster with scripted pod logs
#[derive(Default)]
pub struct FakeCluster {
    namespaces: HashMap<String, Vec<(String, PodLog)>>,
    rejected_tokens: HashSet<String>,
    list_failures: Mutex<HashMap<String, usize>>,
    installed: Mutex<Vec<String>>,
    listed: Mutex<Vec<String>>,
    fetched: Mutex<Vec<String>>,
}

impl FakeCluster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pod(mut self, namespace: &str, name: &str, log: PodLog) -> Self {
        self.namespaces
            .entry(namespace.to_string())
            .or_default()
            .push((name.to_string(), log));
        self
    }

    pub fn empty_namespace(mut self, namespace: &str) -> Self {
        self.namespaces.entry(namespace.to_string()).or_default();
        self
    }

    pub fn reject_token(mut self, token: &str) -> Self {
        self.rejected_tokens.insert(token.to_string());
        self
    }

    /// Fail the next `times` pod listings of `namespace` with a transient error
    pub fn flaky_listing(self, namespace: &str, times: usize) -> Self {
        self.list_failures.lock().insert(namespace.to_string(), times);
        self
    }

    pub fn build(self) -> Arc<Self> {
        Arc::new(self)
    }

    pub fn installed_tokens(&self) -> Vec<String> {
        self.installed.lock().clone()
    }

    pub fn listed(&self) -> Vec<String> {
        self.listed.lock().clone()
    }

    pub fn fetched(&self) -> Vec<String> {
        self.fetched.lock().clone()
    }

    fn current_token(&self) -> Result<String, ClusterError> {
        self.installed
            .lock()
            .last()
            .cloned()
            .ok_or(ClusterError::NotAuthenticated)
    }
}

#[async_trait]
impl ClusterClient for FakeCluster {
    async fn authenticate(&self, credential: &Credential) -> Result<(), ClusterError> {
        self.installed.lock().push(credential.token().to_string());
        Ok(())
    }

    async fn verify(&self) -> Result<(), ClusterError> {
        let token = self.current_token()?;
        if self.rejected_tokens.contains(&token) {
            return Err(ClusterError::Authorization {
                code: 401,
                message: "Unauthorized".to_string(),
            });
        }
        Ok(())
    }

    async fn list_pods(&self, namespace: &NamespaceRef) -> Result<Vec<PodRef>, ClusterError> {
        self.current_token()?;
        self.listed.lock().push(namespace.to_string());

        if let Some(remaining) = self.list_failures.lock().get_mut(namespace.as_str()) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(ClusterError::transient("503 Service Unavailable"));
            }
        }

        let pods = self.namespaces.get(namespace.as_str()).ok_or_else(|| {
            ClusterError::NamespaceNotFound {
                namespace: namespace.to_string(),
            }
        })?;
        Ok(pods
            .iter()
            .map(|(name, _)| PodRef::new(namespace.clone(), name.clone()))
            .collect())
    }

    async fn fetch_logs(&self, pod: &PodRef) -> Result<LogStream, ClusterError> {
        self.current_token()?;
        self.fetched.lock().push(pod.to_string());

        let log = self
            .namespaces
            .get(pod.namespace.as_str())
            .and_then(|pods| pods.iter().find(|(name, _)| *name == pod.name))
            .map(|(_, log)| log.clone())
            .ok_or_else(|| Failure::PodGone.into_error(pod))?;

        let to_lines = |texts: Vec<&'static str>| {
            texts
                .into_iter()
                .enumerate()
                .map(|(i, t)| Ok(LogLine::new(i as u64 + 1, t)))
                .collect::<Vec<_>>()
        };

        Ok(match log {
            PodLog::Lines(texts) => stream::iter(to_lines(texts)).boxed(),
            PodLog::FailOpen(failure) => return Err(failure.into_error(pod)),
            PodLog::FailAfter(texts, failure) => {
                let mut items = to_lines(texts);
                items.push(Err(failure.into_error(pod)));
                stream::iter(items).boxed()
            }
            PodLog::Delayed(delay, texts) => {
                let mut items = to_lines(texts);
                stream::once(tokio::time::sleep(delay))
                    .flat_map(move |()| stream::iter(std::mem::take(&mut items)))
                    .boxed()
            }
            PodLog::Hang => stream::pending().boxed(),
        })
    }
}
