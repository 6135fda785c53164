use std::collections::BTreeMap;
use std::hash::Hasher;

use k8s_openapi::api::apps::v1::{StatefulSet, StatefulSetSpec};
use k8s_openapi::api::core::v1::{
    Container, ContainerPort, EnvVar, PersistentVolumeClaimVolumeSource, PodSpec, PodTemplateSpec,
    SecretVolumeSource, Volume, VolumeMount,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta, OwnerReference};
use kube::api::{Api, PostParams};
use kube::ResourceExt;
use tracing::*;

use crate::reconcilers::template::{render, WorkspacePorts};
use crate::reconcilers::{managed_labels, object_meta, selector_labels, FIELD_MANAGER};
use crate::resources::workspacekinds::{
    ImageConfigValue, PodConfigValue, WorkspaceKind, DEFAULT_IMAGE_PULL_POLICY,
};
use crate::resources::workspaces::Workspace;
use crate::Result;

pub const MAIN_CONTAINER_NAME: &str = "main";
pub const POD_TEMPLATE_HASH_ANNOTATION: &str = "notebooks.kubeflow.org/pod-template-hash";

const HOME_VOLUME_NAME: &str = "home-volume";

/// Container port name for an image port
pub fn port_name(port: i32) -> String {
    format!("http-{port}")
}

/// Build the StatefulSet running the workspace pod
pub fn desired_statefulset(
    ws: &Workspace,
    kind: &WorkspaceKind,
    image: &ImageConfigValue,
    pod_config: &PodConfigValue,
    oref: &OwnerReference,
) -> Result<StatefulSet> {
    let name = ws.name_any();
    let namespace = ws.namespace().unwrap_or_default();
    let kind_template = &kind.spec.pod_template;

    let ports = WorkspacePorts::new(
        &namespace,
        &name,
        image.spec.ports.iter().map(|p| p.id.as_str()),
    );

    let env = kind_template
        .extra_env
        .iter()
        .map(|env| {
            Ok(EnvVar {
                name: env.name.clone(),
                value: env
                    .value
                    .as_deref()
                    .map(|v| render(v, &ports))
                    .transpose()?,
                value_from: env.value_from.clone(),
            })
        })
        .collect::<Result<Vec<_>>>()?;

    let (volumes, volume_mounts) = volumes(ws, kind);

    let container_ports = image
        .spec
        .ports
        .iter()
        .map(|p| ContainerPort {
            name: Some(port_name(p.port)),
            container_port: p.port,
            protocol: Some("TCP".into()),
            ..Default::default()
        })
        .collect::<Vec<_>>();

    let probes = kind_template.probes.clone().unwrap_or_default();

    let container = Container {
        name: MAIN_CONTAINER_NAME.into(),
        image: Some(image.spec.image.clone()),
        image_pull_policy: Some(
            image
                .spec
                .image_pull_policy
                .clone()
                .unwrap_or_else(|| DEFAULT_IMAGE_PULL_POLICY.into()),
        ),
        ports: (!container_ports.is_empty()).then_some(container_ports),
        env: (!env.is_empty()).then_some(env),
        volume_mounts: (!volume_mounts.is_empty()).then_some(volume_mounts),
        resources: pod_config.spec.resources.clone(),
        security_context: kind_template.container_security_context.clone(),
        startup_probe: probes.startup_probe,
        liveness_probe: probes.liveness_probe,
        readiness_probe: probes.readiness_probe,
        ..Default::default()
    };

    let pod_spec = PodSpec {
        containers: vec![container],
        volumes: (!volumes.is_empty()).then_some(volumes),
        service_account_name: Some(kind_template.service_account.name.clone()),
        security_context: kind_template.security_context.clone(),
        affinity: pod_config.spec.affinity.clone(),
        node_selector: pod_config.spec.node_selector.clone(),
        tolerations: pod_config.spec.tolerations.clone(),
        ..Default::default()
    };

    // kind metadata first so that the workspace can override it, our own labels last
    let mut pod_labels = BTreeMap::new();
    let mut pod_annotations = BTreeMap::new();
    for metadata in [
        kind_template.pod_metadata.as_ref(),
        ws.spec.pod_template.pod_metadata.as_ref(),
    ]
    .into_iter()
    .flatten()
    {
        pod_labels.extend(metadata.labels.clone().unwrap_or_default());
        pod_annotations.extend(metadata.annotations.clone().unwrap_or_default());
    }
    pod_labels.extend(managed_labels(&name));
    pod_labels.extend(selector_labels(&name));

    let template = PodTemplateSpec {
        metadata: Some(ObjectMeta {
            labels: Some(pod_labels),
            annotations: (!pod_annotations.is_empty()).then_some(pod_annotations),
            ..Default::default()
        }),
        spec: Some(pod_spec),
    };

    let hash = pod_template_hash(&template)?;

    Ok(StatefulSet {
        metadata: object_meta(
            oref,
            &name,
            BTreeMap::new(),
            BTreeMap::from([(POD_TEMPLATE_HASH_ANNOTATION.to_owned(), hash)]),
        ),
        spec: Some(StatefulSetSpec {
            replicas: Some(if ws.spec.paused { 0 } else { 1 }),
            selector: LabelSelector {
                match_labels: Some(selector_labels(&name)),
                match_expressions: None,
            },
            template,
            ..Default::default()
        }),
        status: None,
    })
}

fn volumes(ws: &Workspace, kind: &WorkspaceKind) -> (Vec<Volume>, Vec<VolumeMount>) {
    let ws_volumes = &ws.spec.pod_template.volumes;
    let mut volumes = Vec::new();
    let mut mounts = Vec::new();

    if let Some(home) = ws_volumes.home.as_ref().filter(|h| !h.is_empty()) {
        volumes.push(pvc_volume(HOME_VOLUME_NAME, home, false));
        mounts.push(VolumeMount {
            name: HOME_VOLUME_NAME.into(),
            mount_path: kind.spec.pod_template.volume_mounts.home.clone(),
            ..Default::default()
        });
    }

    for (i, data) in ws_volumes.data.iter().enumerate() {
        let name = format!("data-volume-{i}");
        volumes.push(pvc_volume(&name, &data.pvc_name, data.read_only));
        mounts.push(VolumeMount {
            name,
            mount_path: data.mount_path.clone(),
            read_only: data.read_only.then_some(true),
            ..Default::default()
        });
    }

    for (i, secret) in ws_volumes.secrets.iter().enumerate() {
        let name = format!("secret-volume-{i}");
        volumes.push(Volume {
            name: name.clone(),
            secret: Some(SecretVolumeSource {
                secret_name: Some(secret.secret_name.clone()),
                default_mode: secret.default_mode,
                ..Default::default()
            }),
            ..Default::default()
        });
        mounts.push(VolumeMount {
            name,
            mount_path: secret.mount_path.clone(),
            read_only: Some(true),
            ..Default::default()
        });
    }

    (volumes, mounts)
}

fn pvc_volume(name: &str, claim_name: &str, read_only: bool) -> Volume {
    Volume {
        name: name.into(),
        persistent_volume_claim: Some(PersistentVolumeClaimVolumeSource {
            claim_name: claim_name.into(),
            read_only: read_only.then_some(true),
        }),
        ..Default::default()
    }
}

/// Fingerprint of a pod template, so that api server defaulting doesn't register as a change
pub fn pod_template_hash(template: &PodTemplateSpec) -> Result<String> {
    let mut hasher = fnv::FnvHasher::default();
    hasher.write(serde_json::to_string(template)?.as_bytes());
    Ok(format!("{:016x}", hasher.finish()))
}

fn template_hash_of(ss: &StatefulSet) -> Option<&str> {
    ss.metadata
        .annotations
        .as_ref()?
        .get(POD_TEMPLATE_HASH_ANNOTATION)
        .map(String::as_str)
}

/// Outcome of copying desired fields onto a live StatefulSet
#[derive(Debug, Default, PartialEq, Eq)]
pub struct StatefulSetDiff {
    /// The live object was modified and needs an update
    pub changed: bool,
    /// A template change was held back
    pub pending_restart: bool,
}

/// Copy the fields we own from `desired` onto `existing`. When `defer_template` is set, a changed pod
/// template is left alone and reported as a pending restart instead.
pub fn copy_statefulset_fields(
    desired: &StatefulSet,
    existing: &mut StatefulSet,
    defer_template: bool,
) -> StatefulSetDiff {
    let mut diff = StatefulSetDiff::default();

    let template_changed = template_hash_of(desired) != template_hash_of(existing);
    let defer = template_changed && defer_template;
    diff.pending_restart = defer;

    let mut annotations = desired.metadata.annotations.clone();
    if defer {
        // keep the live hash so that the held back template keeps showing as different
        if let (Some(annotations), Some(live)) = (annotations.as_mut(), template_hash_of(existing)) {
            annotations.insert(POD_TEMPLATE_HASH_ANNOTATION.into(), live.to_owned());
        }
    }

    if existing.metadata.labels != desired.metadata.labels {
        existing.metadata.labels = desired.metadata.labels.clone();
        diff.changed = true;
    }
    if existing.metadata.annotations != annotations {
        existing.metadata.annotations = annotations;
        diff.changed = true;
    }

    let (Some(desired_spec), Some(existing_spec)) = (desired.spec.as_ref(), existing.spec.as_mut())
    else {
        if existing.spec.is_none() {
            existing.spec = desired.spec.clone();
            diff.changed = true;
        }
        return diff;
    };

    if existing_spec.replicas != desired_spec.replicas {
        existing_spec.replicas = desired_spec.replicas;
        diff.changed = true;
    }
    if existing_spec.selector != desired_spec.selector {
        existing_spec.selector = desired_spec.selector.clone();
        diff.changed = true;
    }
    if template_changed && !defer {
        existing_spec.template = desired_spec.template.clone();
        diff.changed = true;
    }

    diff
}

/// Create the StatefulSet, or bring the live one in line with `desired`
pub async fn reconcile_statefulset(
    client: &kube::Client,
    namespace: &str,
    existing: Option<StatefulSet>,
    desired: StatefulSet,
    defer_template: bool,
) -> Result<(StatefulSet, bool)> {
    let ss_api: Api<StatefulSet> = Api::namespaced(client.clone(), namespace);
    let params = PostParams {
        dry_run: false,
        field_manager: Some(FIELD_MANAGER.into()),
    };

    let Some(mut existing) = existing else {
        let created = ss_api.create(&params, &desired).await?;
        debug!(
            "Created StatefulSet {} in namespace {}",
            created.name_any(),
            namespace
        );
        return Ok((created, false));
    };

    let diff = copy_statefulset_fields(&desired, &mut existing, defer_template);
    if !diff.changed {
        return Ok((existing, diff.pending_restart));
    }

    let name = existing.name_any();
    debug!("Updating StatefulSet {} in namespace {}", name, namespace);
    let updated = ss_api.replace(&name, &params, &existing).await?;
    Ok((updated, diff.pending_restart))
}
