use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{
    Affinity, EnvVar, PodSecurityContext, Probe, ResourceRequirements, SecurityContext, Toleration,
};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

pub use super::workspaces::PodMetadata;

pub const DEFAULT_MAX_INACTIVE_SECONDS: i64 = 86400;
pub const DEFAULT_MAX_PROBE_INTERVAL_SECONDS: i64 = 300;
pub const DEFAULT_MIN_PROBE_INTERVAL_SECONDS: i64 = 20;
pub const DEFAULT_IMAGE_PULL_POLICY: &str = "IfNotPresent";

/// WorkspaceKind is a template for Workspaces: the images, pod configurations, routing and culling policy
/// they may use.
#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[kube(
    kind = "WorkspaceKind",
    group = "kubeflow.org",
    version = "v1beta1",
    printcolumn = r#"{"name":"Deprecated", "type":"boolean", "jsonPath":".spec.spawner.deprecated"}"#,
    printcolumn = r#"{"name":"Hidden", "type":"boolean", "jsonPath":".spec.spawner.hidden"}"#,
    printcolumn = r#"{"name":"Age", "type":"date", "jsonPath":".metadata.creationTimestamp"}"#
)]
#[kube(shortname = "wsk")]
#[serde(rename_all = "camelCase")]
pub struct WorkspaceKindSpec {
    pub spawner: WorkspaceKindSpawner,
    pub pod_template: WorkspaceKindPodTemplate,
}

/// How the kind is presented by the spawner UI
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct WorkspaceKindSpawner {
    pub display_name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub hidden: bool,
    #[serde(default)]
    pub deprecated: bool,
    pub deprecation_message: Option<String>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct WorkspaceKindPodTemplate {
    pub pod_metadata: Option<PodMetadata>,
    /// The service account the workspace pods run as. This field is immutable.
    pub service_account: ServiceAccountRef,
    pub culling: Option<CullingConfig>,
    pub probes: Option<ContainerProbes>,
    /// This field is immutable.
    pub volume_mounts: VolumeMounts,
    pub http_proxy: Option<HttpProxy>,
    /// Environment variables for the main container. Values may use `{{ httpPathPrefix "<port-id>" }}`.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub extra_env: Vec<EnvVar>,
    pub container_security_context: Option<SecurityContext>,
    pub security_context: Option<PodSecurityContext>,
    pub options: KindOptions,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
pub struct ServiceAccountRef {
    pub name: String,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
pub struct VolumeMounts {
    /// Mount path of the workspace's home volume
    pub home: String,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ContainerProbes {
    pub startup_probe: Option<Probe>,
    pub liveness_probe: Option<Probe>,
    pub readiness_probe: Option<Probe>,
}

/// Idle culling policy
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CullingConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Seconds of inactivity after which a workspace is paused. Defaults to 86400.
    #[schemars(range(min = 60))]
    pub max_inactive_seconds: Option<i64>,
    /// Upper bound between two probes. Defaults to 300.
    #[schemars(range(min = 1))]
    pub max_probe_interval_seconds: Option<i64>,
    /// Lower bound between two probes. Defaults to 20.
    #[schemars(range(min = 1))]
    pub min_probe_interval_seconds: Option<i64>,
    pub activity_probe: ActivityProbe,
}

fn default_true() -> bool {
    true
}

impl Default for CullingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_inactive_seconds: None,
            max_probe_interval_seconds: None,
            min_probe_interval_seconds: None,
            activity_probe: ActivityProbe::default(),
        }
    }
}

impl CullingConfig {
    pub fn max_inactive_seconds(&self) -> i64 {
        self.max_inactive_seconds
            .unwrap_or(DEFAULT_MAX_INACTIVE_SECONDS)
    }

    pub fn max_probe_interval_seconds(&self) -> i64 {
        self.max_probe_interval_seconds
            .unwrap_or(DEFAULT_MAX_PROBE_INTERVAL_SECONDS)
    }

    pub fn min_probe_interval_seconds(&self) -> i64 {
        self.min_probe_interval_seconds
            .unwrap_or(DEFAULT_MIN_PROBE_INTERVAL_SECONDS)
    }
}

/// Exactly one of exec or jupyter must be set
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
pub struct ActivityProbe {
    pub exec: Option<ActivityProbeExec>,
    pub jupyter: Option<ActivityProbeJupyter>,
}

/// Runs a script in the main container. The script writes `{"has_activity": bool, "last_activity": "<RFC3339>"}`
/// to outputPath.
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ActivityProbeExec {
    pub output_path: String,
    #[schemars(range(min = 1, max = 300))]
    pub timeout_seconds: i64,
    pub script: String,
}

/// Reads last_activity from the JupyterLab status API
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ActivityProbeJupyter {
    pub last_activity: bool,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct HttpProxy {
    /// Strip `/workspace/<namespace>/<name>/<port-id>` before forwarding requests.
    #[serde(default)]
    pub remove_path_prefix: bool,
    pub request_headers: Option<RequestHeaders>,
}

/// Header manipulations. Keys and values may use `{{ httpPathPrefix "<port-id>" }}`.
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
pub struct RequestHeaders {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub set: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub add: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub remove: Vec<String>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct KindOptions {
    pub image_config: ImageConfig,
    pub pod_config: PodConfig,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
pub struct OptionSpawner {
    /// Id of the value used when a workspace does not select one
    pub default: String,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct OptionValueSpawner {
    pub display_name: String,
    pub description: Option<String>,
    #[serde(default)]
    pub hidden: bool,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
pub struct OptionRedirect {
    /// Id of the value that replaces this one
    pub to: String,
    pub message: Option<RedirectMessage>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
pub struct RedirectMessage {
    pub level: RedirectMessageLevel,
    pub text: String,
}

#[derive(Deserialize, Serialize, Clone, Copy, Debug, Default, PartialEq, Eq, JsonSchema)]
pub enum RedirectMessageLevel {
    #[default]
    Info,
    Warning,
    Danger,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
pub struct ImageConfig {
    pub spawner: OptionSpawner,
    pub values: Vec<ImageConfigValue>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
pub struct ImageConfigValue {
    pub id: String,
    #[serde(default)]
    pub spawner: OptionValueSpawner,
    pub redirect: Option<OptionRedirect>,
    pub spec: ImageConfigSpec,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ImageConfigSpec {
    pub image: String,
    /// Defaults to IfNotPresent
    pub image_pull_policy: Option<String>,
    #[serde(default)]
    pub ports: Vec<ImagePort>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ImagePort {
    /// Used in the HTTP path prefix, `/workspace/<namespace>/<name>/<id>/`
    #[schemars(regex(pattern = r"^[a-z0-9][a-z0-9_-]*$"))]
    pub id: String,
    #[serde(default)]
    pub display_name: String,
    #[schemars(range(min = 1, max = 65535))]
    pub port: i32,
    /// Only HTTP is supported
    pub protocol: Option<String>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
pub struct PodConfig {
    pub spawner: OptionSpawner,
    pub values: Vec<PodConfigValue>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
pub struct PodConfigValue {
    pub id: String,
    #[serde(default)]
    pub spawner: OptionValueSpawner,
    pub redirect: Option<OptionRedirect>,
    pub spec: PodConfigSpec,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PodConfigSpec {
    pub affinity: Option<Affinity>,
    pub node_selector: Option<BTreeMap<String, String>>,
    pub tolerations: Option<Vec<Toleration>>,
    pub resources: Option<ResourceRequirements>,
}

impl WorkspaceKind {
    pub fn culling(&self) -> Option<&CullingConfig> {
        self.spec.pod_template.culling.as_ref()
    }

    pub fn image_config(&self, id: &str) -> Option<&ImageConfigValue> {
        self.spec
            .pod_template
            .options
            .image_config
            .values
            .iter()
            .find(|v| v.id == id)
    }

    pub fn pod_config(&self, id: &str) -> Option<&PodConfigValue> {
        self.spec
            .pod_template
            .options
            .pod_config
            .values
            .iter()
            .find(|v| v.id == id)
    }
}
