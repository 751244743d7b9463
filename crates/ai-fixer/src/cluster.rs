//! Cluster access: the warning event stream and the managed Deployment.
//!
//! Both seams are traits so the pipeline can be driven without an API
//! server; the `Kube*` types are the production implementations.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;
use futures::StreamExt;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::Event;
use kube::api::{Api, ListParams, PostParams, WatchEvent, WatchParams};
use kube::{Client, ResourceExt};
use tracing::{debug, warn};

use crate::error::{FixerError, Result};

/// Event type the watcher cares about.
pub const WARNING_EVENT_TYPE: &str = "Warning";

/// Upper bound the API server accepts for a watch timeout.
pub const MAX_WATCH_TIMEOUT_SECS: u64 = 290;

/// HTTP status the API server uses when a resource version is too old.
const GONE: u16 = 410;

/// One event as delivered by the cluster event stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterEvent {
    /// `Warning` or `Normal`
    pub event_type: String,
    pub timestamp: Option<DateTime<Utc>>,
    pub namespace: String,
    pub object_name: String,
    pub reason: String,
    pub message: String,
}

impl ClusterEvent {
    /// Flatten a `core/v1 Event` into the fields the pipeline uses.
    #[must_use]
    pub fn from_event(event: &Event) -> Self {
        let timestamp = event
            .last_timestamp
            .as_ref()
            .map(|t| t.0)
            .or_else(|| event.event_time.as_ref().map(|t| t.0))
            .or_else(|| event.first_timestamp.as_ref().map(|t| t.0))
            .or_else(|| event.metadata.creation_timestamp.as_ref().map(|t| t.0));

        Self {
            event_type: event.type_.clone().unwrap_or_default(),
            timestamp,
            namespace: event
                .metadata
                .namespace
                .clone()
                .or_else(|| event.involved_object.namespace.clone())
                .unwrap_or_default(),
            object_name: event.involved_object.name.clone().unwrap_or_default(),
            reason: event.reason.clone().unwrap_or_default(),
            message: event.message.clone().unwrap_or_default(),
        }
    }

    pub fn is_warning(&self) -> bool {
        self.event_type == WARNING_EVENT_TYPE
    }
}

/// Namespace-scoped subscription to cluster events.
#[async_trait]
pub trait EventSource: Send + Sync {
    /// Open a new subscription. The stream ending means the subscription
    /// closed and a new one has to be opened.
    async fn subscribe(&self, namespace: &str) -> Result<BoxStream<'static, ClusterEvent>>;
}

/// Watches `core/v1 Event` objects through the Kubernetes API.
///
/// Remembers the last resource version it saw so a reconnect resumes where
/// the previous stream stopped instead of replaying history.
pub struct KubeEventSource {
    client: Client,
    resource_version: Arc<Mutex<Option<String>>>,
}

impl KubeEventSource {
    #[must_use]
    pub fn new(client: Client) -> Self {
        Self {
            client,
            resource_version: Arc::new(Mutex::new(None)),
        }
    }

    fn remembered_version(&self) -> Option<String> {
        self.resource_version
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

fn remember(slot: &Mutex<Option<String>>, version: Option<String>) {
    *slot.lock().unwrap_or_else(PoisonError::into_inner) = version;
}

#[async_trait]
impl EventSource for KubeEventSource {
    async fn subscribe(&self, namespace: &str) -> Result<BoxStream<'static, ClusterEvent>> {
        let api: Api<Event> = Api::namespaced(self.client.clone(), namespace);

        // Start from "now" on the first subscription: events already in the
        // cluster were raised before this instance was watching.
        let version = match self.remembered_version() {
            Some(version) => version,
            None => api
                .list_metadata(&ListParams::default().limit(1))
                .await
                .map_err(|e| FixerError::connectivity("event list", e))?
                .metadata
                .resource_version
                .unwrap_or_else(|| "0".to_string()),
        };

        debug!(namespace, resource_version = %version, "Opening event watch");

        let stream = api
            .watch(&WatchParams::default(), &version)
            .await
            .map_err(|e| FixerError::connectivity("event watch", e))?;

        let slot = Arc::clone(&self.resource_version);
        let events = stream
            .filter_map(move |item| {
                let slot = Arc::clone(&slot);
                async move {
                    match item {
                        Ok(WatchEvent::Added(event) | WatchEvent::Modified(event)) => {
                            remember(&slot, event.resource_version());
                            Some(ClusterEvent::from_event(&event))
                        }
                        Ok(WatchEvent::Deleted(event)) => {
                            remember(&slot, event.resource_version());
                            None
                        }
                        Ok(WatchEvent::Bookmark(bookmark)) => {
                            remember(&slot, Some(bookmark.metadata.resource_version));
                            None
                        }
                        Ok(WatchEvent::Error(status)) => {
                            warn!(
                                code = status.code,
                                message = %status.message,
                                "Event watch error"
                            );
                            if status.code == GONE {
                                remember(&slot, None);
                            }
                            None
                        }
                        Err(e) => {
                            warn!(error = %e, "Event watch stream error");
                            None
                        }
                    }
                }
            })
            .boxed();

        Ok(events)
    }
}

/// One observation made while watching a rollout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RolloutUpdate {
    /// Replica counts from a Deployment status update
    Status { desired: i32, ready: i32 },
    /// The watch stream reported an error
    StreamError(String),
}

impl RolloutUpdate {
    /// Read desired and ready replicas, with the API defaults for unset fields.
    #[must_use]
    pub fn from_deployment(deployment: &Deployment) -> Self {
        let desired = deployment
            .spec
            .as_ref()
            .and_then(|spec| spec.replicas)
            .unwrap_or(1);
        let ready = deployment
            .status
            .as_ref()
            .and_then(|status| status.ready_replicas)
            .unwrap_or(0);
        Self::Status { desired, ready }
    }
}

/// Read, update and watch the managed Deployment.
#[async_trait]
pub trait WorkloadClient: Send + Sync {
    /// Look up a deployment; `None` when it does not exist.
    async fn get(&self, namespace: &str, name: &str) -> Result<Option<Deployment>>;

    /// Replace an existing deployment. The object must carry the current
    /// `resourceVersion`.
    async fn replace(&self, deployment: &Deployment) -> Result<Deployment>;

    /// Watch a single deployment for at most `timeout`.
    async fn watch_rollout(
        &self,
        namespace: &str,
        name: &str,
        timeout: Duration,
    ) -> Result<BoxStream<'static, RolloutUpdate>>;
}

/// [`WorkloadClient`] backed by the Kubernetes API.
pub struct KubeWorkloads {
    client: Client,
}

impl KubeWorkloads {
    #[must_use]
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn api(&self, namespace: &str) -> Api<Deployment> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

#[async_trait]
impl WorkloadClient for KubeWorkloads {
    async fn get(&self, namespace: &str, name: &str) -> Result<Option<Deployment>> {
        self.api(namespace)
            .get_opt(name)
            .await
            .map_err(|e| FixerError::connectivity("deployment lookup", e))
    }

    async fn replace(&self, deployment: &Deployment) -> Result<Deployment> {
        let name = deployment.name_any();
        let namespace = deployment.namespace().unwrap_or_default();

        self.api(&namespace)
            .replace(&name, &PostParams::default(), deployment)
            .await
            .map_err(|e| match e {
                kube::Error::Api(response) => FixerError::UpdateRejected {
                    namespace: namespace.clone(),
                    name: name.clone(),
                    details: response.message,
                },
                other => FixerError::connectivity("deployment update", other),
            })
    }

    async fn watch_rollout(
        &self,
        namespace: &str,
        name: &str,
        timeout: Duration,
    ) -> Result<BoxStream<'static, RolloutUpdate>> {
        let timeout_secs = timeout.as_secs().clamp(1, MAX_WATCH_TIMEOUT_SECS) as u32;
        let params = WatchParams::default()
            .fields(&format!("metadata.name={name}"))
            .timeout(timeout_secs);

        let stream = self
            .api(namespace)
            .watch(&params, "0")
            .await
            .map_err(|e| FixerError::connectivity("deployment watch", e))?;

        let updates = stream
            .filter_map(|item| async move {
                match item {
                    Ok(WatchEvent::Added(d) | WatchEvent::Modified(d)) => {
                        Some(RolloutUpdate::from_deployment(&d))
                    }
                    Ok(WatchEvent::Deleted(d)) => Some(RolloutUpdate::StreamError(format!(
                        "deployment {} was deleted during the rollout",
                        d.name_any()
                    ))),
                    Ok(WatchEvent::Bookmark(_)) => None,
                    Ok(WatchEvent::Error(status)) => {
                        Some(RolloutUpdate::StreamError(status.message))
                    }
                    Err(e) => Some(RolloutUpdate::StreamError(e.to_string())),
                }
            })
            .boxed();

        Ok(updates)
    }
}
