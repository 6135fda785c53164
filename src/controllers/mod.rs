use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use kube::api::{Api, Patch, PatchParams};
use kube::{Client, ResourceExt};
use serde::Serialize;
use serde_json::json;
use tokio::sync::RwLock;
use tracing::*;
use url::Url;

use crate::resources::workspaces::{Workspace, WorkspaceStatus};
use crate::{is_conflict, Error, Metrics, Result};

pub mod culling;
pub mod workspace;

#[cfg(test)]
pub(crate) mod fixtures;

pub const DEFAULT_ISTIO_GATEWAY: &str = "kubeflow/kubeflow-gateway";
pub const DEFAULT_ISTIO_HOST: &str = "*";
pub const DEFAULT_CLUSTER_DOMAIN: &str = "cluster.local";
pub const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(15);

/// Diagnostics to be exposed by the web server
#[derive(Clone, Serialize)]
pub struct Diagnostics {
    pub last_event: DateTime<Utc>,
}

impl Default for Diagnostics {
    fn default() -> Self {
        Self {
            last_event: Utc::now(),
        }
    }
}

/// Settings that reach the controllers from the command line or environment
#[derive(Clone, Debug)]
pub struct ControllerConfig {
    /// Gateway the generated VirtualServices attach to
    pub istio_gateway: String,
    /// Host the generated VirtualServices match
    pub istio_host: String,
    /// Domain used to build in-cluster service addresses
    pub cluster_domain: String,
    /// Timeout of the Jupyter activity probe
    pub http_timeout: Duration,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            istio_gateway: DEFAULT_ISTIO_GATEWAY.into(),
            istio_host: DEFAULT_ISTIO_HOST.into(),
            cluster_domain: DEFAULT_CLUSTER_DOMAIN.into(),
            http_timeout: DEFAULT_HTTP_TIMEOUT,
        }
    }
}

impl ControllerConfig {
    /// `<service>.<namespace>.svc.<cluster-domain>`
    pub fn service_host(&self, service_name: &str, service_namespace: &str) -> String {
        format!(
            "{service_name}.{service_namespace}.svc.{}",
            self.cluster_domain
        )
    }

    pub fn service_url(
        &self,
        service_name: &str,
        service_namespace: &str,
        port: i32,
        path: Option<&str>,
    ) -> Result<Url, url::ParseError> {
        let mut url = Url::parse(&format!(
            "http://{}:{port}",
            self.service_host(service_name, service_namespace)
        ))?;

        if let Some(path) = path {
            url.set_path(path)
        }

        Ok(url)
    }
}

/// State shared between the controllers and the web server
#[derive(Clone, Default)]
pub struct State {
    /// Diagnostics populated by the reconcilers
    pub diagnostics: Arc<RwLock<Diagnostics>>,
    /// Metrics registry
    pub registry: prometheus::Registry,
    config: ControllerConfig,
}

/// State wrapper around the controller outputs for the web server
impl State {
    pub fn new(config: ControllerConfig) -> Self {
        Self {
            diagnostics: Arc::new(RwLock::new(Diagnostics::default())),
            registry: prometheus::Registry::default(),
            config,
        }
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    /// Metrics getter
    pub fn metrics(&self) -> Vec<prometheus::proto::MetricFamily> {
        self.registry.gather()
    }

    /// State getter
    pub async fn diagnostics(&self) -> Diagnostics {
        self.diagnostics.read().await.clone()
    }
}

/// Apply `update` to the workspace status and write it back, guarded by the resource version the status was
/// read at. On a conflict the workspace is fetched again and `update` re-applied, up to `attempts` times.
/// Nothing is written when `update` leaves the status unchanged.
pub(crate) async fn update_workspace_status<F>(
    client: &Client,
    ws: &Workspace,
    attempts: usize,
    update: F,
) -> Result<()>
where
    F: Fn(&mut WorkspaceStatus),
{
    let name = ws.name_any();
    let namespace = ws
        .namespace()
        .ok_or(Error::MissingObjectKey(".metadata.namespace"))?;
    let api: Api<Workspace> = Api::namespaced(client.clone(), &namespace);

    let mut current = ws.clone();
    for attempt in 1..=attempts {
        let old = current.status.clone();
        let mut new = old.clone().unwrap_or_default();
        update(&mut new);
        if old.as_ref() == Some(&new) {
            return Ok(());
        }

        let patch = json!({
            "metadata": { "resourceVersion": current.resource_version() },
            "status": new,
        });
        match api
            .patch_status(&name, &PatchParams::default(), &Patch::Merge(&patch))
            .await
        {
            Ok(_) => return Ok(()),
            Err(e) if is_conflict(&e) => {
                debug!("Status update of Workspace {name} conflicted (attempt {attempt}/{attempts})");
                if attempt < attempts {
                    current = api.get_status(&name).await?;
                }
            }
            Err(e) => return Err(e.into()),
        }
    }

    Err(Error::Conflict)
}

/// Run the workspace and culling controllers until shutdown
pub async fn run(client: Client, state: State) {
    let metrics = match Metrics::default().register(&state.registry) {
        Ok(metrics) => metrics,
        Err(e) => {
            error!("Could not register metrics: {e:?}");
            std::process::exit(1);
        }
    };

    futures::join!(
        workspace::run(client.clone(), metrics.clone(), state.clone()),
        culling::run(client, metrics, state),
    );
}
