use std::hash::Hasher;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::StreamExt;
use k8s_openapi::api::core::v1::{Pod, Service};
use kube::api::{Api, ListParams, PostParams, ResourceExt};
use kube::client::Client;
use kube::runtime::controller::{Action, Controller};
use kube::runtime::events::{Event, EventType, Recorder};
use kube::runtime::watcher::Config;
use kube::Resource;
use tokio::{sync::RwLock, time::Duration};
use tracing::*;

use crate::controllers::workspace::reconcilers::{find_owned, pod_name};
use crate::controllers::{update_workspace_status, ControllerConfig, Diagnostics, State};
use crate::reconcilers::FIELD_MANAGER;
use crate::resources::workspacekinds::{CullingConfig, WorkspaceKind};
use crate::resources::workspaces::{
    ProbeResult, ProbeStatus, Workspace, WorkspaceActivity, WorkspaceState,
};
use crate::{is_conflict, is_not_found, telemetry, Error, Metrics, Result};

use super::probes::{
    jupyter_status_path, probe_exec, probe_jupyter, Activity, ProbeOutcome, JUPYTER_PORT,
};

/// Grace added to maxInactiveSeconds before a workspace is paused
pub const INACTIVITY_TOLERANCE_BUFFER_SECONDS: i64 = 5;

const CONTROLLER_NAME: &str = "culling";

pub(super) struct Context {
    /// Kubernetes client
    pub client: Client,
    /// Kubernetes event recorder
    pub recorder: Recorder,
    /// HTTP client for the Jupyter probe, carries the probe timeout
    pub http_client: reqwest::Client,
    pub config: ControllerConfig,
    /// Diagnostics read by the web server
    pub diagnostics: Arc<RwLock<Diagnostics>>,
    /// Prometheus metrics
    pub metrics: Metrics,
}

impl Context {
    pub fn new(client: Client, metrics: Metrics, state: &State) -> Result<Arc<Context>> {
        let http_client = reqwest::Client::builder()
            .timeout(state.config().http_timeout)
            .build()?;

        Ok(Arc::new(Context {
            client: client.clone(),
            recorder: Recorder::new(client, FIELD_MANAGER.into()),
            http_client,
            config: state.config().clone(),
            diagnostics: state.diagnostics.clone(),
            metrics,
        }))
    }
}

/// The timing knobs of a culling policy, in seconds
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CullingWindow {
    pub max_inactive: i64,
    pub max_probe_interval: i64,
    pub min_probe_interval: i64,
}

impl From<&CullingConfig> for CullingWindow {
    fn from(culling: &CullingConfig) -> Self {
        Self {
            max_inactive: culling.max_inactive_seconds(),
            max_probe_interval: culling.max_probe_interval_seconds(),
            min_probe_interval: culling.min_probe_interval_seconds(),
        }
    }
}

impl CullingWindow {
    fn min_interval(&self) -> Duration {
        Duration::from_secs(self.min_probe_interval.max(1).unsigned_abs())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Plan {
    /// Too early to probe, look again after this long
    Wait(Duration),
    /// Probe now, and look again after this long
    Probe(Duration),
}

impl Plan {
    pub fn requeue_after(&self) -> Duration {
        match self {
            Plan::Wait(d) | Plan::Probe(d) => *d,
        }
    }
}

/// `maxProbeInterval - sinceLastProbe` clamped into `[minProbeInterval, maxProbeInterval]`, spread by up to 10%
/// with a jitter derived from `jitter_key` that stays inside the same range.
pub fn requeue_interval(window: CullingWindow, since_probe_secs: i64, jitter_key: &str) -> Duration {
    let min = window.min_probe_interval.max(1);
    let max = window.max_probe_interval.max(min);
    let base = window
        .max_probe_interval
        .saturating_sub(since_probe_secs)
        .clamp(min, max);

    let spread = (max - base).min(base / 10);
    let mut hasher = fnv::FnvHasher::default();
    hasher.write(jitter_key.as_bytes());
    let jitter = (hasher.finish() % (spread.unsigned_abs() + 1)) as i64;

    Duration::from_secs((base + jitter).unsigned_abs())
}

/// Decide whether a running workspace is due for a probe
pub fn plan(
    window: CullingWindow,
    activity: &WorkspaceActivity,
    now: DateTime<Utc>,
    jitter_key: &str,
) -> Plan {
    let now_ms = now.timestamp_millis();
    let last_probe_ms = activity
        .last_probe
        .as_ref()
        .map(|p| p.end_time_ms)
        .unwrap_or_default();

    let since_probe_ms = now_ms.saturating_sub(last_probe_ms);
    let since_activity_ms = now_ms.saturating_sub(activity.last_activity.saturating_mul(1000));
    let since_update_ms = now_ms.saturating_sub(activity.last_update.saturating_mul(1000));

    let requeue_after = requeue_interval(window, since_probe_ms.div_euclid(1000), jitter_key);

    if since_probe_ms < window.min_probe_interval.saturating_mul(1000)
        || since_activity_ms < window.max_inactive.saturating_mul(1000)
        || since_update_ms < window.max_probe_interval.saturating_mul(1000)
    {
        Plan::Wait(requeue_after)
    } else {
        Plan::Probe(requeue_after)
    }
}

/// Whether what the probe saw means the workspace should be paused
pub fn should_cull(activity: &Activity, window: CullingWindow, now: DateTime<Utc>) -> bool {
    match activity {
        Activity::Idle => true,
        Activity::LastActiveAt(at) => {
            (now - *at).num_seconds()
                > window
                    .max_inactive
                    .saturating_add(INACTIVITY_TOLERANCE_BUFFER_SECONDS)
        }
    }
}

#[instrument(skip(ctx, ws), fields(trace_id))]
async fn reconcile(ws: Arc<Workspace>, ctx: Arc<Context>) -> Result<Action> {
    if let Some(trace_id) = telemetry::get_trace_id() {
        Span::current().record("trace_id", field::display(&trace_id));
    }
    let _timer = ctx.metrics.count_and_measure(CONTROLLER_NAME);
    ctx.diagnostics.write().await.last_event = Utc::now();

    match ws.cull(&ctx).await {
        Ok(action) => Ok(action),
        Err(Error::Conflict) => {
            debug!("Workspace {} changed while culling, retrying", ws.name_any());
            Ok(Action::requeue(Duration::ZERO))
        }
        Err(Error::KubeError(err)) if is_conflict(&err) => {
            debug!("Workspace {} changed while culling, retrying", ws.name_any());
            Ok(Action::requeue(Duration::ZERO))
        }
        Err(Error::KubeError(err)) if is_not_found(&err) => Ok(Action::await_change()),
        Err(err) => {
            warn!("culling failed: {:?}", err);
            ctx.metrics.reconcile_failure(CONTROLLER_NAME, ws.as_ref(), &err);
            Err(err)
        }
    }
}

fn error_policy<K, C>(_ws: Arc<K>, _: &Error, _ctx: C) -> Action {
    Action::requeue(Duration::from_secs(30))
}

impl Workspace {
    async fn cull(&self, ctx: &Context) -> Result<Action> {
        let name = self.name_any();

        if self.meta().deletion_timestamp.is_some() {
            debug!("Workspace {name} is being deleted, skipping culling");
            return Ok(Action::await_change());
        }
        if self.spec.disable_culling {
            debug!("Culling is disabled for Workspace {name}");
            return Ok(Action::await_change());
        }
        if self.spec.paused {
            debug!("Workspace {name} is paused, skipping culling");
            return Ok(Action::await_change());
        }
        if self.state() != WorkspaceState::Running {
            debug!("Workspace {name} is not running, skipping culling");
            return Ok(Action::await_change());
        }

        let kinds: Api<WorkspaceKind> = Api::all(ctx.client.clone());
        let kind = kinds
            .get_opt(&self.spec.kind)
            .await?
            .ok_or_else(|| Error::WorkspaceKindNotFound(self.spec.kind.clone()))?;
        let Some(culling) = kind.culling().filter(|c| c.enabled) else {
            debug!("Culling is disabled for WorkspaceKind {}", kind.name_any());
            return Ok(Action::await_change());
        };
        let window = CullingWindow::from(culling);

        let requeue_after = match plan(
            window,
            &self.activity(),
            Utc::now(),
            &self.uid().unwrap_or_default(),
        ) {
            Plan::Wait(requeue_after) => {
                debug!("Workspace {name} is not due for a probe, requeueing after {requeue_after:?}");
                return Ok(Action::requeue(requeue_after));
            }
            Plan::Probe(requeue_after) => requeue_after,
        };

        let namespace = self
            .namespace()
            .ok_or(Error::MissingObjectKey(".metadata.namespace"))?;
        let started = Utc::now();
        let probe = &culling.activity_probe;

        let outcome = if probe.jupyter.is_some() {
            match find_owned::<Service>(&ctx.client, self).await {
                Ok(Some(svc)) => {
                    let url = ctx.config.service_url(
                        &svc.name_any(),
                        &namespace,
                        JUPYTER_PORT,
                        Some(&jupyter_status_path(&namespace, &name)),
                    )?;
                    probe_jupyter(&ctx.http_client, url).await
                }
                Ok(None) | Err(Error::MultipleChildren { .. }) => {
                    ProbeOutcome::failure("Failed to fetch service name for workspace")
                }
                Err(err) => return Err(err),
            }
        } else if let Some(exec) = probe.exec.as_ref() {
            match find_owned::<k8s_openapi::api::apps::v1::StatefulSet>(&ctx.client, self).await {
                Ok(Some(ss)) => {
                    let pods: Api<Pod> = Api::namespaced(ctx.client.clone(), &namespace);
                    probe_exec(&pods, &pod_name(&ss), exec, started).await
                }
                Ok(None) | Err(Error::MultipleChildren { .. }) => {
                    ProbeOutcome::failure("Failed to fetch pod name for workspace")
                }
                Err(err) => return Err(err),
            }
        } else {
            // admission guarantees one of the two, nothing to probe otherwise
            return Ok(Action::requeue(requeue_after));
        };

        self.record_outcome(ctx, window, outcome, started, requeue_after)
            .await
    }

    /// Pause the workspace if the probe says so, then store what the probe saw
    async fn record_outcome(
        &self,
        ctx: &Context,
        window: CullingWindow,
        mut outcome: ProbeOutcome,
        started: DateTime<Utc>,
        requeue_after: Duration,
    ) -> Result<Action> {
        let name = self.name_any();
        let namespace = self
            .namespace()
            .ok_or(Error::MissingObjectKey(".metadata.namespace"))?;
        let now = Utc::now();

        let mut current = self.clone();
        let cull = outcome
            .activity
            .as_ref()
            .is_some_and(|activity| should_cull(activity, window, now));

        if cull {
            info!("Culling Workspace {name} in namespace {namespace} due to inactivity");

            let api: Api<Workspace> = Api::namespaced(ctx.client.clone(), &namespace);
            let mut paused = self.clone();
            paused.spec.paused = true;
            match api.replace(&name, &PostParams::default(), &paused).await {
                Ok(updated) => {
                    current = updated;
                    ctx.metrics.workspace_culled();
                    if let Err(e) = ctx
                        .recorder
                        .publish(
                            &Event {
                                type_: EventType::Normal,
                                reason: "Culled".into(),
                                note: Some(format!(
                                    "Paused after more than {} seconds of inactivity",
                                    window.max_inactive
                                )),
                                action: "Culling".into(),
                                secondary: None,
                            },
                            &self.object_ref(&()),
                        )
                        .await
                    {
                        warn!("Could not publish Culled event for Workspace {name}: {e}");
                    }
                }
                Err(e) if is_conflict(&e) => return Err(Error::Conflict),
                Err(e) => {
                    warn!("Could not pause Workspace {name}: {e}");
                    outcome = ProbeOutcome::failure("Failed to pause workspace");
                }
            }
        }

        ctx.metrics.probe_completed(outcome.result);

        let ended = Utc::now();
        update_workspace_status(&ctx.client, &current, 1, |status| {
            status.activity.last_probe = Some(ProbeStatus {
                start_time_ms: started.timestamp_millis(),
                end_time_ms: ended.timestamp_millis(),
                result: outcome.result,
                message: outcome.message.clone(),
            });
            status.activity.last_update = started.timestamp();
            if let Some(Activity::LastActiveAt(at)) = outcome.activity {
                status.activity.last_activity = at.timestamp();
            }
        })
        .await?;

        if outcome.result == ProbeResult::Success {
            Ok(Action::requeue(requeue_after))
        } else {
            Ok(Action::requeue(window.min_interval()))
        }
    }
}

/// Run the culling controller
pub async fn run(client: Client, metrics: Metrics, state: State) {
    let ws_api = Api::<Workspace>::all(client.clone());

    if let Err(e) = ws_api.list(&ListParams::default().limit(1)).await {
        error!("Workspace is not queryable; {e:?}. Is the CRD installed?");
        std::process::exit(1);
    }

    let ctx = match Context::new(client, metrics, &state) {
        Ok(ctx) => ctx,
        Err(e) => {
            error!("Could not build the probe HTTP client: {e:?}");
            std::process::exit(1);
        }
    };

    // the culler reacts to status changes too, a workspace becoming Running is what arms it
    Controller::new(ws_api, Config::default())
        .shutdown_on_signal()
        .run(reconcile, error_policy, ctx)
        .filter_map(|x| async move { Result::ok(x) })
        .for_each(|_| futures::future::ready(()))
        .await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_json_diff::assert_json_include;
    use chrono::TimeZone;
    use http::{Method, StatusCode};
    use serde_json::json;

    use crate::controllers::fixtures::*;
    use crate::controllers::workspace::reconcilers::test_fixtures::{workspace, workspace_kind};
    use crate::resources::workspaces::WorkspaceStatus;

    const KIND_PATH: &str = "/apis/kubeflow.org/v1beta1/workspacekinds/jupyterlab";
    const SVC_PATH: &str = "/api/v1/namespaces/user-ns/services";
    const WS_PATH: &str = "/apis/kubeflow.org/v1beta1/namespaces/user-ns/workspaces/my-ws";
    const STATUS_PATH: &str = "/apis/kubeflow.org/v1beta1/namespaces/user-ns/workspaces/my-ws/status";
    const EVENTS_PATH: &str = "/apis/events.k8s.io/v1/namespaces/user-ns/events";

    fn window() -> CullingWindow {
        CullingWindow {
            max_inactive: 100,
            max_probe_interval: 60,
            min_probe_interval: 10,
        }
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()
    }

    fn activity(probed_secs_ago: i64, active_secs_ago: i64, updated_secs_ago: i64) -> WorkspaceActivity {
        let now = now();
        WorkspaceActivity {
            last_activity: now.timestamp() - active_secs_ago,
            last_update: now.timestamp() - updated_secs_ago,
            last_probe: Some(ProbeStatus {
                start_time_ms: (now.timestamp() - probed_secs_ago) * 1000 - 20,
                end_time_ms: (now.timestamp() - probed_secs_ago) * 1000,
                result: ProbeResult::Success,
                message: "Jupyter probe succeeded".into(),
            }),
        }
    }

    fn running_workspace() -> Workspace {
        let mut ws = workspace();
        ws.status = Some(WorkspaceStatus {
            state: WorkspaceState::Running,
            activity: activity(500, 500, 500),
            ..Default::default()
        });
        ws
    }

    fn context(client: Client) -> Arc<Context> {
        Context::new(client, Metrics::default(), &State::default()).unwrap()
    }

    #[test]
    fn test_recent_probe_waits_within_bounds() {
        let plan = plan(window(), &activity(5, 500, 500), now(), "ws-uid");
        let Plan::Wait(requeue_after) = plan else {
            panic!("expected no probe, got {plan:?}");
        };
        assert!(requeue_after >= Duration::from_secs(10), "{requeue_after:?}");
        assert!(requeue_after <= Duration::from_secs(60), "{requeue_after:?}");
    }

    #[test]
    fn test_requeue_interval_stays_in_range() {
        for key in ["a", "b", "ws-uid", "0b5c7f4e-6d4f-4a8e-9a55-0c0f1b7a2f10"] {
            for since in [-30, 0, 5, 50, 59, 60, 61, 10_000] {
                let d = requeue_interval(window(), since, key);
                assert!(d >= Duration::from_secs(10) && d <= Duration::from_secs(60), "{since} {key}: {d:?}");
            }
        }
        // a never-probed workspace is looked at again after the minimum interval
        let d = requeue_interval(window(), i64::MAX / 1000, "ws-uid");
        assert!(d >= Duration::from_secs(10) && d <= Duration::from_secs(11));
    }

    #[test]
    fn test_requeue_interval_is_deterministic() {
        assert_eq!(
            requeue_interval(window(), 20, "ws-uid"),
            requeue_interval(window(), 20, "ws-uid")
        );
    }

    #[test]
    fn test_misconfigured_window_does_not_panic() {
        let inverted = CullingWindow {
            max_inactive: 100,
            max_probe_interval: 5,
            min_probe_interval: 30,
        };
        assert_eq!(requeue_interval(inverted, 0, "x"), Duration::from_secs(30));
    }

    #[test]
    fn test_plan_probes_only_when_everything_is_stale() {
        assert!(matches!(plan(window(), &activity(500, 500, 500), now(), "k"), Plan::Probe(_)));
        // active recently
        assert!(matches!(plan(window(), &activity(500, 50, 500), now(), "k"), Plan::Wait(_)));
        // updated recently
        assert!(matches!(plan(window(), &activity(500, 500, 30), now(), "k"), Plan::Wait(_)));
        // never probed, never active
        assert!(matches!(
            plan(window(), &WorkspaceActivity::default(), now(), "k"),
            Plan::Probe(_)
        ));
    }

    #[test]
    fn test_should_cull() {
        let now = now();
        assert!(should_cull(&Activity::Idle, window(), now));
        assert!(!should_cull(
            &Activity::LastActiveAt(now - chrono::Duration::seconds(104)),
            window(),
            now
        ));
        assert!(should_cull(
            &Activity::LastActiveAt(now - chrono::Duration::seconds(106)),
            window(),
            now
        ));
    }

    #[tokio::test]
    async fn test_paused_workspace_is_skipped() {
        let (client, server) = MockApiServer::start(|_, _, _| not_found());
        let mut ws = running_workspace();
        ws.spec.paused = true;

        let action = reconcile(Arc::new(ws), context(client)).await.unwrap();
        assert_eq!(action, Action::await_change());
        assert!(server.requests().is_empty());
    }

    #[tokio::test]
    async fn test_missing_service_records_failed_probe() {
        let (client, server) = MockApiServer::start(|method, path, _| match (method.as_str(), path) {
            ("GET", KIND_PATH) => ok(workspace_kind()),
            ("GET", SVC_PATH) => list("v1", "Service", vec![]),
            ("PATCH", STATUS_PATH) => ok(workspace()),
            _ => not_found(),
        });

        let action = reconcile(Arc::new(running_workspace()), context(client))
            .await
            .unwrap();
        assert_eq!(action, Action::requeue(Duration::from_secs(10)));

        let writes = server.writes();
        assert_eq!(writes.len(), 1, "{writes:?}");
        assert_eq!(writes[0].path, STATUS_PATH);
        assert_json_include!(
            actual: writes[0].body.clone(),
            expected: json!({
                "status": {"activity": {
                    "lastActivity": now().timestamp() - 500,
                    "lastProbe": {
                        "result": "Failure",
                        "message": "Failed to fetch service name for workspace"
                    }
                }}
            })
        );
    }

    #[tokio::test]
    async fn test_idle_workspace_is_paused() {
        let (client, server) = MockApiServer::start(|method, path, body| match (method.as_str(), path) {
            ("PUT", WS_PATH) => {
                let mut updated = body.clone();
                updated["metadata"]["resourceVersion"] = json!("101");
                (StatusCode::OK, updated)
            }
            ("POST", EVENTS_PATH) => created(body),
            ("PATCH", STATUS_PATH) => ok(workspace()),
            _ => not_found(),
        });

        let ws = running_workspace();
        let action = ws
            .record_outcome(
                &context(client),
                window(),
                ProbeOutcome::success("Bash probe succeeded", Activity::Idle),
                Utc::now(),
                Duration::from_secs(42),
            )
            .await
            .unwrap();
        assert_eq!(action, Action::requeue(Duration::from_secs(42)));

        let put = server.find(Method::PUT, WS_PATH).unwrap();
        assert_eq!(put.body["spec"]["paused"], json!(true));

        let status = server.find(Method::PATCH, STATUS_PATH).unwrap();
        assert_json_include!(
            actual: status.body,
            expected: json!({
                "metadata": {"resourceVersion": "101"},
                "status": {"activity": {
                    "lastActivity": now().timestamp() - 500,
                    "lastProbe": {"result": "Success", "message": "Bash probe succeeded"}
                }}
            })
        );
    }

    #[tokio::test]
    async fn test_recent_activity_is_recorded_without_pausing() {
        let (client, server) = MockApiServer::start(|method, path, _| match (method.as_str(), path) {
            ("PATCH", STATUS_PATH) => ok(workspace()),
            _ => not_found(),
        });

        let active_at = Utc::now() - chrono::Duration::seconds(30);
        running_workspace()
            .record_outcome(
                &context(client),
                window(),
                ProbeOutcome::success("Jupyter probe succeeded", Activity::LastActiveAt(active_at)),
                Utc::now(),
                Duration::from_secs(42),
            )
            .await
            .unwrap();

        assert!(server.find(Method::PUT, WS_PATH).is_none());
        let status = server.find(Method::PATCH, STATUS_PATH).unwrap();
        assert_eq!(
            status.body["status"]["activity"]["lastActivity"],
            json!(active_at.timestamp())
        );
    }

    #[tokio::test]
    async fn test_conflicting_pause_is_retried_immediately() {
        let (client, server) = MockApiServer::start(|method, path, _| match (method.as_str(), path) {
            ("PUT", WS_PATH) => conflict(),
            _ => not_found(),
        });

        let ws = Arc::new(running_workspace());
        let result = ws
            .record_outcome(
                &context(client),
                window(),
                ProbeOutcome::success("Bash probe succeeded", Activity::Idle),
                Utc::now(),
                Duration::from_secs(42),
            )
            .await;
        assert!(matches!(result, Err(Error::Conflict)));
        assert!(server.find(Method::PATCH, STATUS_PATH).is_none());
    }
}
