use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use chrono::Utc;
use futures::StreamExt;
use k8s_openapi::api::apps::v1::{StatefulSet, StatefulSetStatus};
use k8s_openapi::api::core::v1::{Pod, PodStatus, Service, ServiceSpec};
use kube::runtime::events::Recorder;
use kube::runtime::reflector::ObjectRef;
use kube::runtime::{reflector, watcher, Predicate, WatchStreamExt};
use kube::{
    api::{Api, ListParams, ResourceExt},
    client::Client,
    runtime::{
        controller::{Action, Controller},
        events::{Event, EventType},
        watcher::Config,
    },
    Resource,
};
use serde::Serialize;
use tokio::{sync::RwLock, time::Duration};
use tracing::*;

use crate::controllers::{update_workspace_status, ControllerConfig, Diagnostics, State};
use crate::reconcilers::redirects::{resolve, OptionValue, Resolution};
use crate::reconcilers::{APP_MANAGED_BY_LABEL, FIELD_MANAGER, WORKSPACE_NAME_LABEL};
use crate::resources::virtualservices::VirtualService;
use crate::resources::workspacekinds::WorkspaceKind;
use crate::resources::workspaces::{
    Workspace, WorkspacePodOptionInfo, WorkspacePodOptionsStatus, WorkspaceState,
};
use crate::{is_not_found, telemetry, Error, Metrics, Result};

use super::reconcilers::service::{desired_service, reconcile_service};
use super::reconcilers::statefulset::{desired_statefulset, reconcile_statefulset};
use super::reconcilers::virtualservice::{desired_virtual_service, reconcile_virtual_service};
use super::reconcilers::{find_owned, pod_name, workspace_state};

const CONTROLLER_NAME: &str = "workspace";
const STATUS_UPDATE_ATTEMPTS: usize = 3;

// Context for our reconciler
#[derive(Clone)]
pub(super) struct Context {
    /// Kubernetes client
    pub client: Client,
    /// Kubernetes event recorder
    pub recorder: Recorder,
    /// Gateway, host and cluster domain settings
    pub config: ControllerConfig,
    // Whether the Istio VirtualService CRD is installed
    pub istio_installed: bool,
    /// Diagnostics read by the web server
    pub diagnostics: Arc<RwLock<Diagnostics>>,
    /// Prometheus metrics
    pub metrics: Metrics,
}

impl Context {
    pub fn new(client: Client, metrics: Metrics, state: &State, istio_installed: bool) -> Arc<Context> {
        Arc::new(Context {
            client: client.clone(),
            recorder: Recorder::new(client, FIELD_MANAGER.into()),
            config: state.config().clone(),
            istio_installed,
            diagnostics: state.diagnostics.clone(),
            metrics,
        })
    }
}

/// What the children look like after a successful pass
struct Reconciled {
    state: WorkspaceState,
    message: String,
    pending_restart: bool,
    options: WorkspacePodOptionsStatus,
}

#[instrument(skip(ctx, ws), fields(trace_id))]
async fn reconcile(ws: Arc<Workspace>, ctx: Arc<Context>) -> Result<Action> {
    if let Some(trace_id) = telemetry::get_trace_id() {
        Span::current().record("trace_id", field::display(&trace_id));
    }
    let _timer = ctx.metrics.count_and_measure(CONTROLLER_NAME);
    ctx.diagnostics.write().await.last_event = Utc::now();

    if ws.meta().deletion_timestamp.is_some() {
        // children go away with the owner reference cascade
        debug!("Workspace {} is being deleted", ws.name_any());
        return Ok(Action::await_change());
    }

    info!(
        "Reconciling Workspace {} in namespace {}",
        ws.name_any(),
        ws.namespace().unwrap_or_default()
    );
    match ws.reconcile_status(&ctx).await {
        Ok(action) => Ok(action),
        Err(Error::KubeError(err)) if is_not_found(&err) => {
            debug!("Workspace {} no longer exists", ws.name_any());
            Ok(Action::await_change())
        }
        Err(err) => {
            warn!("reconcile failed: {:?}", err);

            ctx.recorder
                .publish(
                    &Event {
                        type_: EventType::Warning,
                        reason: "FailedReconcile".into(),
                        note: Some(err.to_string()),
                        action: "Reconcile".into(),
                        secondary: None,
                    },
                    &ws.object_ref(&()),
                )
                .await?;

            ctx.metrics.reconcile_failure(CONTROLLER_NAME, ws.as_ref(), &err);
            Err(err)
        }
    }
}

fn error_policy<K, C>(_ws: Arc<K>, _: &Error, _ctx: C) -> Action {
    Action::requeue(Duration::from_secs(30))
}

fn resolve_option<'a, V: OptionValue>(
    option: &'static str,
    values: &'a [V],
    selected: &str,
    default: &str,
) -> Result<Resolution<'a, V>> {
    let start = if selected.is_empty() {
        default
    } else {
        selected
    };
    resolve(values, start).map_err(|source| Error::OptionNotResolvable {
        option,
        id: start.to_owned(),
        source,
    })
}

fn option_info<V: OptionValue>(resolution: &Resolution<'_, V>) -> WorkspacePodOptionInfo {
    WorkspacePodOptionInfo {
        desired: resolution.id().to_owned(),
        redirect_chain: resolution.chain.clone(),
    }
}

impl Workspace {
    async fn reconcile(&self, ctx: &Context) -> Result<Reconciled> {
        let client = &ctx.client;
        let namespace = self
            .namespace()
            .ok_or(Error::MissingObjectKey(".metadata.namespace"))?;

        let kinds: Api<WorkspaceKind> = Api::all(client.clone());
        let kind = kinds
            .get_opt(&self.spec.kind)
            .await?
            .ok_or_else(|| Error::WorkspaceKindNotFound(self.spec.kind.clone()))?;

        let kind_options = &kind.spec.pod_template.options;
        let image = resolve_option(
            "imageConfig",
            &kind_options.image_config.values,
            &self.spec.pod_template.options.image_config,
            &kind_options.image_config.spawner.default,
        )?;
        let pod_config = resolve_option(
            "podConfig",
            &kind_options.pod_config.values,
            &self.spec.pod_template.options.pod_config,
            &kind_options.pod_config.spawner.default,
        )?;

        let oref = self
            .controller_owner_ref(&())
            .ok_or(Error::MissingObjectKey(".metadata.uid"))?;

        let desired_ss = desired_statefulset(self, &kind, image.value, pod_config.value, &oref)?;
        let existing_ss = find_owned::<StatefulSet>(client, self).await?;
        // a paused workspace has no pod to disturb, so deferred changes land while paused
        let defer_template = self.spec.defer_updates && !self.spec.paused;
        let (ss, pending_restart) =
            reconcile_statefulset(client, &namespace, existing_ss, desired_ss, defer_template)
                .await?;

        let desired_svc = desired_service(self, image.value, &oref);
        let existing_svc = find_owned::<Service>(client, self).await?;
        let svc = reconcile_service(client, &namespace, existing_svc, desired_svc).await?;

        if ctx.istio_installed {
            let desired_vs = desired_virtual_service(
                self,
                &kind,
                image.value,
                &svc.name_any(),
                &ctx.config,
                &oref,
            )?;
            reconcile_virtual_service(client, &namespace, desired_vs).await?;
        }

        let pods: Api<Pod> = Api::namespaced(client.clone(), &namespace);
        let pod = pods.get_opt(&pod_name(&ss)).await?;
        let (state, message) = workspace_state(self, &ss, pod.as_ref());

        Ok(Reconciled {
            state,
            message,
            pending_restart,
            options: WorkspacePodOptionsStatus {
                image_config: option_info(&image),
                pod_config: option_info(&pod_config),
            },
        })
    }

    async fn reconcile_status(&self, ctx: &Context) -> Result<Action> {
        match self.reconcile(ctx).await {
            Ok(reconciled) => {
                let paused = self.spec.paused;
                let now = Utc::now().timestamp();
                update_workspace_status(&ctx.client, self, STATUS_UPDATE_ATTEMPTS, |status| {
                    status.state = reconciled.state;
                    status.state_message = reconciled.message.clone();
                    status.pending_restart = reconciled.pending_restart;
                    status.pod_template_options = reconciled.options.clone();
                    status.pause_time = match (paused, status.pause_time) {
                        (true, 0) => now,
                        (true, since) => since,
                        (false, _) => 0,
                    };
                })
                .await?;

                // If no events were received, check back every 5 minutes
                Ok(Action::requeue(Duration::from_secs(5 * 60)))
            }
            Err(err) if err.is_dependency_error() => {
                info!("Workspace {} is not reconcilable yet: {err}", self.name_any());

                let message = err.to_string();
                update_workspace_status(&ctx.client, self, STATUS_UPDATE_ATTEMPTS, |status| {
                    status.state = WorkspaceState::Error;
                    status.state_message = message.clone();
                })
                .await?;

                Ok(Action::requeue(Duration::from_secs(60)))
            }
            Err(err) => Err(err),
        }
    }
}

/// Run the Workspace controller
pub async fn run(client: Client, metrics: Metrics, state: State) {
    let ws_api = Api::<Workspace>::all(client.clone());
    let wsk_api = Api::<WorkspaceKind>::all(client.clone());
    let ss_api = Api::<StatefulSet>::all(client.clone());
    let svc_api = Api::<Service>::all(client.clone());
    let pod_api = Api::<Pod>::all(client.clone());
    let vs_api = Api::<VirtualService>::all(client.clone());

    if let Err(e) = ws_api.list(&ListParams::default().limit(1)).await {
        error!("Workspace is not queryable; {e:?}. Is the CRD installed?");
        std::process::exit(1);
    }
    if let Err(e) = wsk_api.list(&ListParams::default().limit(1)).await {
        error!("WorkspaceKind is not queryable; {e:?}. Is the CRD installed?");
        std::process::exit(1);
    }

    let istio_installed = match client.list_api_groups().await {
        Ok(list) => list.groups.iter().any(|group| {
            group.name == VirtualService::group(&())
                && group
                    .versions
                    .iter()
                    .any(|v| v.version == VirtualService::version(&()))
        }),
        Err(e) => {
            error!("Could not list api groups: {e:?}");
            std::process::exit(1);
        }
    };
    if istio_installed {
        info!("Istio detected; workspaces will be routed through VirtualServices");
    } else {
        warn!("Istio VirtualService is not available on apiserver; workspaces will not be routed");
    }

    // all resources we create have this label
    let cfg = Config::default().labels(&format!("{APP_MANAGED_BY_LABEL}={FIELD_MANAGER}"));
    // but workspaces and workspacekinds dont
    let ws_cfg = Config::default();

    let (ws_store, ws_writer) = reflector::store();
    let ws_reflector = reflector(ws_writer, watcher(ws_api, ws_cfg.clone()))
        .map(|event| ensure_deletion_change(event))
        .touched_objects()
        .default_backoff()
        // status writes are ours, only spec and metadata changes matter
        .predicate_filter(changed_predicate);

    let ss_watcher = watcher(ss_api, cfg.clone())
        .map(|event| ensure_deletion_change(event))
        .touched_objects()
        .default_backoff()
        .predicate_filter(changed_predicate.combine(status_predicate_serde));

    let svc_watcher = watcher(svc_api, cfg.clone())
        .map(|event| ensure_deletion_change(event))
        .touched_objects()
        .default_backoff()
        // svc has no generation so we hash the spec to check for changes
        .predicate_filter(changed_predicate.combine(spec_predicate_serde));

    // pods are owned by the statefulset, so they are mapped back through the workspace label
    let pod_watcher = watcher(pod_api, cfg.clone())
        .map(|event| ensure_deletion_change(event))
        .touched_objects()
        .default_backoff()
        .predicate_filter(changed_predicate.combine(status_predicate_serde));

    let wsk_watcher = watcher(wsk_api, ws_cfg.clone())
        .touched_objects()
        .default_backoff()
        .predicate_filter(changed_predicate);

    let kind_store = ws_store.clone();
    let controller = Controller::for_stream(ws_reflector, ws_store)
        .shutdown_on_signal()
        .owns_stream(ss_watcher)
        .owns_stream(svc_watcher)
        .watches_stream(pod_watcher, |pod| -> Option<ObjectRef<Workspace>> {
            let name = pod.labels().get(WORKSPACE_NAME_LABEL)?;
            let namespace = pod.namespace()?;
            Some(ObjectRef::new(name).within(&namespace))
        })
        .watches_stream(wsk_watcher, move |kind| {
            let kind_name = kind.name_any();
            kind_store
                .state()
                .into_iter()
                .filter(|ws| ws.spec.kind == kind_name)
                .map(|ws| ObjectRef::from_obj(ws.as_ref()))
                .collect::<Vec<_>>()
        });
    let controller = if istio_installed {
        let vs_watcher = watcher(vs_api, cfg.clone())
            .map(|event| ensure_deletion_change(event))
            .touched_objects()
            .default_backoff()
            // avoid apply loops that seem to happen with crds
            .predicate_filter(changed_predicate);

        controller.owns_stream(vs_watcher)
    } else {
        controller
    };
    controller
        .run(
            reconcile,
            error_policy,
            Context::new(client, metrics, &state, istio_installed),
        )
        .filter_map(|x| async move { Result::ok(x) })
        .for_each(|_| futures::future::ready(()))
        .await;
}

// deletion apparently doesn't lead to any change in metadata otherwise, which means the changed_predicate
// would drop them.
fn ensure_deletion_change<K: Resource, E>(
    mut event: Result<kube::runtime::watcher::Event<K>, E>,
) -> Result<kube::runtime::watcher::Event<K>, E> {
    if let Ok(kube::runtime::watcher::Event::Delete(ref mut object)) = event {
        let meta = object.meta_mut();
        meta.generation = match meta.generation {
            Some(val) => Some(val + 1),
            None => Some(0),
        }
    }
    event
}

fn changed_predicate<K: Resource>(obj: &K) -> Option<u64> {
    let mut hasher = DefaultHasher::new();
    if let Some(g) = obj.meta().generation {
        // covers spec but not metadata or status
        g.hash(&mut hasher)
    }
    obj.labels().hash(&mut hasher);
    obj.annotations().hash(&mut hasher);
    // ignore status
    Some(hasher.finish())
}

trait MyHasStatus {
    type Status;

    fn status(&self) -> Option<&Self::Status>;
}

impl MyHasStatus for StatefulSet {
    type Status = StatefulSetStatus;

    fn status(&self) -> Option<&Self::Status> {
        self.status.as_ref()
    }
}

impl MyHasStatus for Pod {
    type Status = PodStatus;

    fn status(&self) -> Option<&Self::Status> {
        self.status.as_ref()
    }
}

fn status_predicate_serde<K: Resource + MyHasStatus>(obj: &K) -> Option<u64>
where
    K::Status: Serialize,
{
    let mut hasher = DefaultHasher::new();
    if let Some(s) = obj.status() {
        // a status that cannot be keyed still counts as a change
        serde_hashkey::to_key(s).ok()?.hash(&mut hasher);
    }
    Some(hasher.finish())
}

trait MyHasSpec {
    type Spec;

    fn spec(&self) -> &Self::Spec;
}

impl MyHasSpec for Service {
    type Spec = Option<ServiceSpec>;

    fn spec(&self) -> &Self::Spec {
        &self.spec
    }
}

fn spec_predicate_serde<K: Resource + MyHasSpec>(obj: &K) -> Option<u64>
where
    K::Spec: Serialize,
{
    let mut hasher = DefaultHasher::new();
    serde_hashkey::to_key(obj.spec()).ok()?.hash(&mut hasher);
    Some(hasher.finish())
}
