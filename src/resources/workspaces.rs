use std::collections::BTreeMap;

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Workspace is a user's development environment, instantiated from the templates of a WorkspaceKind
#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[kube(
    kind = "Workspace",
    group = "kubeflow.org",
    version = "v1beta1",
    namespaced,
    printcolumn = r#"{"name":"State", "type":"string", "jsonPath":".status.state"}"#,
    printcolumn = r#"{"name":"Kind", "type":"string", "jsonPath":".spec.kind"}"#,
    printcolumn = r#"{"name":"Paused", "type":"boolean", "jsonPath":".spec.paused"}"#,
    printcolumn = r#"{"name":"Message", "priority": 1, "type":"string", "jsonPath":".status.stateMessage"}"#,
    printcolumn = r#"{"name":"Age", "type":"date", "jsonPath":".metadata.creationTimestamp"}"#
)]
#[kube(status = "WorkspaceStatus", shortname = "ws")]
#[serde(rename_all = "camelCase")]
pub struct WorkspaceSpec {
    /// paused scales the workspace pod to zero while keeping its volumes.
    #[serde(default)]
    pub paused: bool,
    /// deferUpdates holds back pod template changes until the workspace is next paused.
    #[serde(default)]
    pub defer_updates: bool,
    /// disableCulling exempts the workspace from idle culling.
    #[serde(default)]
    pub disable_culling: bool,
    /// kind is the name of the WorkspaceKind this workspace is built from.
    #[schemars(length(min = 1))]
    pub kind: String,
    pub pod_template: WorkspacePodTemplate,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct WorkspacePodTemplate {
    /// Labels and annotations merged onto the pod, on top of the kind's.
    pub pod_metadata: Option<PodMetadata>,
    #[serde(default)]
    pub volumes: WorkspacePodVolumes,
    pub options: WorkspacePodOptions,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PodMetadata {
    pub labels: Option<BTreeMap<String, String>>,
    pub annotations: Option<BTreeMap<String, String>>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct WorkspacePodVolumes {
    /// Name of the PVC mounted at the kind's home mount path.
    pub home: Option<String>,
    #[serde(default)]
    pub data: Vec<PodVolumeMount>,
    #[serde(default)]
    pub secrets: Vec<PodSecretMount>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PodVolumeMount {
    pub pvc_name: String,
    pub mount_path: String,
    #[serde(default)]
    pub read_only: bool,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PodSecretMount {
    pub secret_name: String,
    pub mount_path: String,
    pub default_mode: Option<i32>,
}

/// The option ids selected from the kind. An empty id selects the kind's default.
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct WorkspacePodOptions {
    #[serde(default)]
    pub image_config: String,
    #[serde(default)]
    pub pod_config: String,
}

/// Status of the Workspace. Written by the controllers only.
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct WorkspaceStatus {
    #[serde(default)]
    pub activity: WorkspaceActivity,
    /// Unix seconds of the last transition into Paused, 0 while not paused.
    #[serde(default)]
    pub pause_time: i64,
    /// True when a pod template change is held back by deferUpdates.
    #[serde(default)]
    pub pending_restart: bool,
    #[serde(default)]
    pub pod_template_options: WorkspacePodOptionsStatus,
    #[serde(default)]
    pub state: WorkspaceState,
    #[serde(default)]
    pub state_message: String,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct WorkspaceActivity {
    /// Unix seconds of the last observed user activity.
    #[serde(default)]
    pub last_activity: i64,
    /// Unix seconds of the last time the activity was updated by a probe.
    #[serde(default)]
    pub last_update: i64,
    pub last_probe: Option<ProbeStatus>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ProbeStatus {
    pub start_time_ms: i64,
    pub end_time_ms: i64,
    pub result: ProbeResult,
    #[serde(default)]
    pub message: String,
}

#[derive(Deserialize, Serialize, Clone, Copy, Debug, Default, PartialEq, Eq, JsonSchema)]
pub enum ProbeResult {
    Success,
    #[default]
    Failure,
    Timeout,
}

impl ProbeResult {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProbeResult::Success => "Success",
            ProbeResult::Failure => "Failure",
            ProbeResult::Timeout => "Timeout",
        }
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct WorkspacePodOptionsStatus {
    #[serde(default)]
    pub image_config: WorkspacePodOptionInfo,
    #[serde(default)]
    pub pod_config: WorkspacePodOptionInfo,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct WorkspacePodOptionInfo {
    /// The terminal option id the workspace is actually running.
    #[serde(default)]
    pub desired: String,
    #[serde(default)]
    pub redirect_chain: Vec<RedirectStep>,
}

/// One hop of a redirect chain
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, Eq, JsonSchema)]
pub struct RedirectStep {
    pub source: String,
    pub target: String,
}

#[derive(Deserialize, Serialize, Clone, Copy, Debug, Default, PartialEq, Eq, JsonSchema)]
pub enum WorkspaceState {
    Running,
    Terminating,
    Paused,
    Pending,
    Error,
    #[default]
    Unknown,
}

impl std::fmt::Display for WorkspaceState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            WorkspaceState::Running => "Running",
            WorkspaceState::Terminating => "Terminating",
            WorkspaceState::Paused => "Paused",
            WorkspaceState::Pending => "Pending",
            WorkspaceState::Error => "Error",
            WorkspaceState::Unknown => "Unknown",
        };
        f.write_str(s)
    }
}

impl Workspace {
    pub fn state(&self) -> WorkspaceState {
        self.status
            .as_ref()
            .map(|s| s.state)
            .unwrap_or_default()
    }

    pub fn activity(&self) -> WorkspaceActivity {
        self.status
            .as_ref()
            .map(|s| s.activity.clone())
            .unwrap_or_default()
    }
}
