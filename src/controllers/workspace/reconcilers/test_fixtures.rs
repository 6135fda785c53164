use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::EnvVar;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::Resource;

use crate::resources::workspacekinds::*;
use crate::resources::workspaces::*;

pub fn workspace() -> Workspace {
    let mut ws = Workspace::new(
        "my-ws",
        WorkspaceSpec {
            kind: "jupyterlab".into(),
            pod_template: WorkspacePodTemplate {
                pod_metadata: Some(PodMetadata {
                    labels: Some(BTreeMap::from([("team".into(), "workspace".into())])),
                    annotations: None,
                }),
                volumes: WorkspacePodVolumes {
                    home: Some("my-home-pvc".into()),
                    data: vec![PodVolumeMount {
                        pvc_name: "my-data-pvc".into(),
                        mount_path: "/data/my-data".into(),
                        read_only: true,
                    }],
                    secrets: vec![PodSecretMount {
                        secret_name: "creds".into(),
                        mount_path: "/secrets/creds".into(),
                        default_mode: Some(420),
                    }],
                },
                options: WorkspacePodOptions {
                    image_config: "jupyterlab_scipy_190".into(),
                    pod_config: "small_cpu".into(),
                },
            },
            ..Default::default()
        },
    );
    let meta = ws.meta_mut();
    meta.namespace = Some("user-ns".into());
    meta.uid = Some("ws-uid".into());
    meta.resource_version = Some("100".into());
    ws
}

pub fn owner_ref() -> OwnerReference {
    workspace()
        .controller_owner_ref(&())
        .expect("workspace fixture has a uid")
}

fn image(id: &str, version: &str, redirect_to: Option<&str>) -> ImageConfigValue {
    ImageConfigValue {
        id: id.into(),
        spawner: OptionValueSpawner {
            display_name: format!("JupyterLab SciPy {version}"),
            ..Default::default()
        },
        redirect: redirect_to.map(|to| OptionRedirect {
            to: to.into(),
            message: Some(RedirectMessage {
                level: RedirectMessageLevel::Info,
                text: "This update will change the JupyterLab version.".into(),
            }),
        }),
        spec: ImageConfigSpec {
            image: format!("ghcr.io/kubeflow/notebooks/jupyter-scipy:v{version}"),
            image_pull_policy: None,
            ports: vec![ImagePort {
                id: "jupyterlab".into(),
                display_name: "JupyterLab".into(),
                port: 8888,
                protocol: Some("HTTP".into()),
            }],
        },
    }
}

fn pod_config(id: &str, cpu: &str, redirect_to: Option<&str>) -> PodConfigValue {
    use k8s_openapi::api::core::v1::ResourceRequirements;
    use k8s_openapi::apimachinery::pkg::api::resource::Quantity;

    PodConfigValue {
        id: id.into(),
        spawner: OptionValueSpawner {
            display_name: id.into(),
            ..Default::default()
        },
        redirect: redirect_to.map(|to| OptionRedirect {
            to: to.into(),
            message: None,
        }),
        spec: PodConfigSpec {
            node_selector: Some(BTreeMap::from([("disktype".into(), "ssd".into())])),
            resources: Some(ResourceRequirements {
                requests: Some(BTreeMap::from([("cpu".into(), Quantity(cpu.into()))])),
                ..Default::default()
            }),
            ..Default::default()
        },
    }
}

pub fn workspace_kind() -> WorkspaceKind {
    WorkspaceKind::new(
        "jupyterlab",
        WorkspaceKindSpec {
            spawner: WorkspaceKindSpawner {
                display_name: "JupyterLab Notebook".into(),
                ..Default::default()
            },
            pod_template: WorkspaceKindPodTemplate {
                pod_metadata: Some(PodMetadata {
                    labels: Some(BTreeMap::from([
                        ("team".into(), "kind".into()),
                        ("kind-label".into(), "x".into()),
                    ])),
                    annotations: None,
                }),
                service_account: ServiceAccountRef {
                    name: "default-editor".into(),
                },
                culling: Some(CullingConfig {
                    enabled: true,
                    max_inactive_seconds: Some(100),
                    max_probe_interval_seconds: Some(60),
                    min_probe_interval_seconds: Some(10),
                    activity_probe: ActivityProbe {
                        exec: None,
                        jupyter: Some(ActivityProbeJupyter {
                            last_activity: true,
                        }),
                    },
                }),
                volume_mounts: VolumeMounts {
                    home: "/home/jovyan".into(),
                },
                http_proxy: Some(HttpProxy {
                    remove_path_prefix: false,
                    request_headers: Some(RequestHeaders {
                        set: BTreeMap::from([(
                            "X-RStudio-Root-Path".into(),
                            r#"{{ httpPathPrefix "jupyterlab" }}"#.into(),
                        )]),
                        ..Default::default()
                    }),
                }),
                extra_env: vec![EnvVar {
                    name: "NB_PREFIX".into(),
                    value: Some(r#"{{ httpPathPrefix "jupyterlab" }}"#.into()),
                    value_from: None,
                }],
                options: KindOptions {
                    image_config: ImageConfig {
                        spawner: OptionSpawner {
                            default: "jupyterlab_scipy_190".into(),
                        },
                        values: vec![
                            image("jupyterlab_scipy_180", "1.8.0", Some("jupyterlab_scipy_190")),
                            image("jupyterlab_scipy_190", "1.9.0", None),
                        ],
                    },
                    pod_config: PodConfig {
                        spawner: OptionSpawner {
                            default: "tiny_cpu".into(),
                        },
                        values: vec![
                            pod_config("tiny_cpu", "100m", Some("small_cpu")),
                            pod_config("small_cpu", "1", None),
                        ],
                    },
                },
                ..Default::default()
            },
        },
    )
}
