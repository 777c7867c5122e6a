//! Kubernetes client for podsweep

use async_trait::async_trait;
use futures::stream::{self, BoxStream};
use futures::{AsyncBufRead, AsyncBufReadExt, Stream, StreamExt, TryStreamExt};
use k8s_openapi::api::core::v1::{Namespace, Pod};
use kube::Api;
use kube::api::{ListParams, LogParams};
use kube::config::{AuthInfo, KubeConfigOptions, Kubeconfig, NamedAuthInfo};
use parking_lot::RwLock;
use tracing::debug;

use podsweep_types::{Credential, LogLine, NamespaceRef, PodRef};

use crate::error::{ClusterError, Target};
use crate::retry::{RETRY_BACKOFF, retry_transient};

/// Lazy, finite sequence of log lines for one pod
pub type LogStream = BoxStream<'static, Result<LogLine, ClusterError>>;

/// Authenticated access to the cluster control plane
#[async_trait]
pub trait ClusterClient: Send + Sync {
    /// Install `credential` as the bearer token for every later call
    async fn authenticate(&self, credential: &Credential) -> Result<(), ClusterError>;

    /// Make a cheap authenticated call to confirm the token is accepted
    async fn verify(&self) -> Result<(), ClusterError>;

    /// Snapshot of the pods scheduled in `namespace`
    async fn list_pods(&self, namespace: &NamespaceRef) -> Result<Vec<PodRef>, ClusterError>;

    /// Point-in-time read of the pod's log buffer. Never follows.
    async fn fetch_logs(&self, pod: &PodRef) -> Result<LogStream, ClusterError>;
}

/// Bounds applied to every log read
#[derive(Clone, Debug, Default)]
pub struct LogOptions {
    /// Only read this many lines from the end of each container log
    pub tail_lines: Option<i64>,
    /// Only read lines newer than this many seconds
    pub since_seconds: Option<i64>,
}

/// Kubernetes client wrapper
///
/// Cluster endpoint and CA come from kubeconfig. The user entry of the
/// selected context is replaced by the bearer token handed to `authenticate`.
pub struct KubeClusterClient {
    kubeconfig: Kubeconfig,
    context: Option<String>,
    log_options: LogOptions,
    session: RwLock<Option<kube::Client>>,
}

impl KubeClusterClient {
    /// Create a client by loading the local kubeconfig
    pub fn new(context: Option<String>, log_options: LogOptions) -> Result<Self, ClusterError> {
        let kubeconfig = Kubeconfig::read().map_err(|e| ClusterError::Config {
            message: format!("failed to read kubeconfig: {}", e),
        })?;
        Ok(Self::from_kubeconfig(kubeconfig, context, log_options))
    }

    pub fn from_kubeconfig(
        kubeconfig: Kubeconfig,
        context: Option<String>,
        log_options: LogOptions,
    ) -> Self {
        Self {
            kubeconfig,
            context,
            log_options,
            session: RwLock::new(None),
        }
    }

    fn context_name(&self) -> Option<&str> {
        self.context
            .as_deref()
            .or(self.kubeconfig.current_context.as_deref())
    }

    fn session(&self) -> Result<kube::Client, ClusterError> {
        self.session.read().clone().ok_or(ClusterError::NotAuthenticated)
    }

    /// Create a copy of kubeconfig with token-based auth instead of exec
    fn kubeconfig_with_token(&self, token: &str) -> Kubeconfig {
        let mut kubeconfig = self.kubeconfig.clone();

        let user_name = self.context_name().and_then(|context_name| {
            kubeconfig
                .contexts
                .iter()
                .find(|c| c.name == context_name)
                .and_then(|c| c.context.as_ref())
                .and_then(|c| c.user.clone())
        });

        let Some(user_name) = user_name else {
            return kubeconfig;
        };

        let auth_info = AuthInfo {
            token: Some(token.to_string().into()),
            ..Default::default()
        };

        if let Some(named) = kubeconfig
            .auth_infos
            .iter_mut()
            .find(|a| a.name == user_name)
        {
            named.auth_info = Some(auth_info);
        } else {
            kubeconfig.auth_infos.push(NamedAuthInfo {
                name: user_name,
                auth_info: Some(auth_info),
            });
        }

        kubeconfig
    }

    /// Client config for the selected context authenticating with `token` only
    async fn client_config(&self, token: &str) -> Result<kube::Config, ClusterError> {
        let options = KubeConfigOptions {
            context: self.context_name().map(str::to_string),
            ..Default::default()
        };
        let mut config =
            kube::Config::from_custom_kubeconfig(self.kubeconfig_with_token(token), &options)
                .await
                .map_err(|e| ClusterError::Config {
                    message: format!("failed to build client config: {}", e),
                })?;

        // A context without a user entry still gets the token.
        config.auth_info = AuthInfo {
            token: Some(token.to_string().into()),
            ..Default::default()
        };
        Ok(config)
    }
}

#[async_trait]
impl ClusterClient for KubeClusterClient {
    async fn authenticate(&self, credential: &Credential) -> Result<(), ClusterError> {
        let config = self.client_config(credential.token()).await?;

        let client = kube::Client::try_from(config).map_err(|e| ClusterError::Config {
            message: format!("failed to create client: {}", e),
        })?;

        *self.session.write() = Some(client);
        debug!(cluster = credential.cluster(), "installed bearer token");
        Ok(())
    }

    async fn verify(&self) -> Result<(), ClusterError> {
        let namespaces: Api<Namespace> = Api::all(self.session()?);
        namespaces
            .list(&ListParams::default().limit(1))
            .await
            .map_err(|e| ClusterError::from_kube(e, Target::Cluster))?;
        Ok(())
    }

    async fn list_pods(&self, namespace: &NamespaceRef) -> Result<Vec<PodRef>, ClusterError> {
        let client = self.session()?;

        // Listing pods in a missing namespace returns an empty list, so check first.
        let namespaces: Api<Namespace> = Api::all(client.clone());
        match namespaces.get_opt(namespace.as_str()).await {
            Ok(Some(_)) => {}
            Ok(None) => {
                return Err(ClusterError::NamespaceNotFound {
                    namespace: namespace.to_string(),
                });
            }
            Err(kube::Error::Api(resp)) if resp.code == 403 => {
                debug!(%namespace, "no permission to read namespace, listing pods directly");
            }
            Err(e) => return Err(ClusterError::from_kube(e, Target::Namespace(namespace))),
        }

        let pods: Api<Pod> = Api::namespaced(client, namespace.as_str());
        let list = pods
            .list(&ListParams::default())
            .await
            .map_err(|e| ClusterError::from_kube(e, Target::Namespace(namespace)))?;

        Ok(list
            .items
            .into_iter()
            .filter_map(|pod| pod_to_ref(pod, namespace))
            .collect())
    }

    async fn fetch_logs(&self, pod: &PodRef) -> Result<LogStream, ClusterError> {
        let api: Api<Pod> = Api::namespaced(self.session()?, pod.namespace.as_str());

        let targets: Vec<Option<String>> = if pod.containers.is_empty() {
            vec![None]
        } else {
            pod.containers.iter().cloned().map(Some).collect()
        };
        let annotate = pod.containers.len() > 1;
        let pod = pod.clone();
        let options = self.log_options.clone();

        // Containers are opened one after another as the previous one drains.
        let lines = stream::iter(targets)
            .then(move |container| {
                let api = api.clone();
                let pod = pod.clone();
                let options = options.clone();
                async move {
                    retry_transient("fetch logs", RETRY_BACKOFF, || {
                        open_container_log(
                            api.clone(),
                            pod.clone(),
                            container.clone(),
                            options.clone(),
                            annotate,
                        )
                    })
                    .await
                }
            })
            .try_flatten()
            .boxed();

        Ok(lines)
    }
}

/// Convert a k8s Pod to a PodRef
fn pod_to_ref(pod: Pod, namespace: &NamespaceRef) -> Option<PodRef> {
    let name = pod.metadata.name?;
    let containers = pod
        .spec
        .map(|spec| spec.containers.into_iter().map(|c| c.name).collect())
        .unwrap_or_default();
    Some(PodRef::new(namespace.clone(), name).with_containers(containers))
}

async fn open_container_log(
    api: Api<Pod>,
    pod: PodRef,
    container: Option<String>,
    options: LogOptions,
    annotate: bool,
) -> Result<LogStream, ClusterError> {
    let params = LogParams {
        follow: false,
        container: container.clone(),
        tail_lines: options.tail_lines,
        since_seconds: options.since_seconds,
        ..Default::default()
    };

    let reader = match api.log_stream(&pod.name, &params).await {
        Ok(reader) => reader,
        // A container that has not started yet has no output.
        Err(kube::Error::Api(resp)) if resp.code == 400 && resp.message.contains("waiting to start") => {
            debug!(pod = %pod, ?container, "container not started, no logs");
            return Ok(stream::empty().boxed());
        }
        Err(e) => return Err(ClusterError::from_kube(e, Target::Pod(&pod))),
    };

    let label = if annotate { container } else { None };
    let source = pod.to_string();

    Ok(raw_lines(Box::pin(reader))
        .enumerate()
        .map(move |(index, line)| {
            line.map(|text| {
                let line = LogLine::new(index as u64 + 1, text);
                match &label {
                    Some(c) => line.in_container(c.clone()),
                    None => line,
                }
            })
            .map_err(|e| ClusterError::transient(format!("reading logs of {}: {}", source, e)))
        })
        .boxed())
}

/// Split a log body on `\n`. Bytes that are not UTF-8 are replaced rather
/// than ending the read, so later lines are still classified.
fn raw_lines<R>(reader: R) -> impl Stream<Item = std::io::Result<String>>
where
    R: AsyncBufRead + Unpin,
{
    stream::unfold(Some(reader), |reader| async move {
        let mut reader = reader?;
        let mut buf = Vec::new();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => None,
            Ok(_) => {
                if buf.last() == Some(&b'\n') {
                    buf.pop();
                    if buf.last() == Some(&b'\r') {
                        buf.pop();
                    }
                }
                Some((Ok(String::from_utf8_lossy(&buf).into_owned()), Some(reader)))
            }
            Err(e) => Some((Err(e), None)),
        }
    })
}
