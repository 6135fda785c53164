use std::collections::{BTreeMap, BTreeSet};

use kube::api::{Api, ListParams};
use kube::core::admission::{AdmissionRequest, Operation};
use kube::{Client, ResourceExt};

use super::FieldError;
use crate::reconcilers::quantity_parser::normalize_pod_config_spec;
use crate::reconcilers::redirects::{resolve_default, validate_graph, OptionValue, RedirectError};
use crate::reconcilers::template;
use crate::resources::workspacekinds::{
    CullingConfig, ImageConfigValue, PodConfigValue, WorkspaceKind, WorkspaceKindPodTemplate,
};
use crate::resources::workspaces::Workspace;
use crate::Result;

const IMAGE_CONFIG_PATH: &str = "spec.podTemplate.options.imageConfig";
const POD_CONFIG_PATH: &str = "spec.podTemplate.options.podConfig";
const EXTRA_ENV_PATH: &str = "spec.podTemplate.extraEnv";
const REQUEST_HEADERS_PATH: &str = "spec.podTemplate.httpProxy.requestHeaders";
const CULLING_PATH: &str = "spec.podTemplate.culling";

fn value_path(option_path: &str, id: &str) -> String {
    format!("{option_path}.values[{id}]")
}

/// How many workspaces use each option value, directly or at the end of their redirect chain
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct OptionUsage {
    pub image_config: BTreeMap<String, usize>,
    pub pod_config: BTreeMap<String, usize>,
}

impl OptionUsage {
    /// Count the options of `kind` used by `workspaces`. An empty selection uses the kind's default.
    pub fn count(kind: &WorkspaceKind, workspaces: &[Workspace]) -> Self {
        let options = &kind.spec.pod_template.options;
        let mut usage = Self::default();

        for ws in workspaces.iter().filter(|ws| ws.spec.kind == kind.name_any()) {
            let selected = &ws.spec.pod_template.options;
            let desired = ws.status.as_ref().map(|s| &s.pod_template_options);

            let image_ids = BTreeSet::from([
                selected_or_default(&selected.image_config, &options.image_config.spawner.default),
                desired.map(|d| d.image_config.desired.as_str()).unwrap_or_default(),
            ]);
            for id in image_ids.into_iter().filter(|id| !id.is_empty()) {
                *usage.image_config.entry(id.to_owned()).or_default() += 1;
            }

            let pod_ids = BTreeSet::from([
                selected_or_default(&selected.pod_config, &options.pod_config.spawner.default),
                desired.map(|d| d.pod_config.desired.as_str()).unwrap_or_default(),
            ]);
            for id in pod_ids.into_iter().filter(|id| !id.is_empty()) {
                *usage.pod_config.entry(id.to_owned()).or_default() += 1;
            }
        }

        usage
    }
}

fn selected_or_default<'a>(selected: &'a str, default: &'a str) -> &'a str {
    if selected.is_empty() {
        default
    } else {
        selected
    }
}

fn graph_errors<V: OptionValue>(option_path: &str, values: &[V]) -> Vec<FieldError> {
    validate_graph(values)
        .into_iter()
        .map(|(id, err)| FieldError::new(format!("{}.redirect.to", value_path(option_path, &id)), err.to_string()))
        .collect()
}

fn default_error<V: OptionValue>(option_path: &str, option_name: &str, values: &[V], default: &str) -> Option<FieldError> {
    let path = format!("{option_path}.spawner.default");
    match resolve_default(values, default) {
        Ok(_) => None,
        Err(RedirectError::DefaultMissing(id)) => Some(FieldError::new(path, format!("default {option_name} {id:?} not found"))),
        Err(err) => Some(FieldError::new(
            path,
            format!("default {option_name} {default:?} does not resolve: {err}"),
        )),
    }
}

/// Both option graphs must be free of cycles and dangling redirects, and both defaults must resolve
pub fn validate_options(kind: &WorkspaceKind) -> Vec<FieldError> {
    let options = &kind.spec.pod_template.options;
    let mut errors = graph_errors(IMAGE_CONFIG_PATH, &options.image_config.values);
    errors.extend(graph_errors(POD_CONFIG_PATH, &options.pod_config.values));
    errors.extend(default_error(
        IMAGE_CONFIG_PATH,
        "imageConfig",
        &options.image_config.values,
        &options.image_config.spawner.default,
    ));
    errors.extend(default_error(
        POD_CONFIG_PATH,
        "podConfig",
        &options.pod_config.values,
        &options.pod_config.spawner.default,
    ));
    errors
}

/// No port number may be declared twice within one image config
pub fn validate_ports(value: &ImageConfigValue) -> Vec<FieldError> {
    let mut seen = BTreeSet::new();
    value
        .spec
        .ports
        .iter()
        .filter(|port| !seen.insert(port.port))
        .map(|port| {
            FieldError::new(
                format!("{}.spec.ports[{}].port", value_path(IMAGE_CONFIG_PATH, &value.id), port.id),
                format!("port {} is defined more than once", port.port),
            )
        })
        .collect()
}

/// Environment values and header templates must parse and execute
pub fn validate_templates(pod_template: &WorkspaceKindPodTemplate) -> Vec<FieldError> {
    let mut errors = validate_extra_env(pod_template);
    errors.extend(validate_request_headers(pod_template));
    errors
}

fn validate_extra_env(pod_template: &WorkspaceKindPodTemplate) -> Vec<FieldError> {
    pod_template
        .extra_env
        .iter()
        .filter_map(|env| {
            let value = env.value.as_deref()?;
            template::validate(value)
                .err()
                .map(|err| FieldError::new(format!("{EXTRA_ENV_PATH}[{}].value", env.name), err.to_string()))
        })
        .collect()
}

fn validate_request_headers(pod_template: &WorkspaceKindPodTemplate) -> Vec<FieldError> {
    let Some(headers) = pod_template
        .http_proxy
        .as_ref()
        .and_then(|p| p.request_headers.as_ref())
    else {
        return Vec::new();
    };

    let mut errors = Vec::new();
    for (op, entries) in [("set", &headers.set), ("add", &headers.add)] {
        for (key, value) in entries {
            let path = format!("{REQUEST_HEADERS_PATH}.{op}[{key}]");
            for raw in [key, value] {
                if let Err(err) = template::validate(raw) {
                    errors.push(FieldError::new(path.clone(), err.to_string()));
                }
            }
        }
    }
    for (i, key) in headers.remove.iter().enumerate() {
        if let Err(err) = template::validate(key) {
            errors.push(FieldError::new(format!("{REQUEST_HEADERS_PATH}.remove[{i}]"), err.to_string()));
        }
    }
    errors
}

/// An enabled culling policy needs exactly one probe and a sane probe window
pub fn validate_culling(culling: Option<&CullingConfig>) -> Vec<FieldError> {
    let Some(culling) = culling.filter(|c| c.enabled) else {
        return Vec::new();
    };

    let mut errors = Vec::new();
    let probe = &culling.activity_probe;
    if probe.exec.is_some() == probe.jupyter.is_some() {
        errors.push(FieldError::new(
            format!("{CULLING_PATH}.activityProbe"),
            "exactly one of exec or jupyter must be set",
        ));
    }
    if let Some(exec) = &probe.exec {
        if exec.timeout_seconds <= 0 {
            errors.push(FieldError::new(
                format!("{CULLING_PATH}.activityProbe.exec.timeoutSeconds"),
                "must be greater than zero",
            ));
        }
        if exec.output_path.is_empty() {
            errors.push(FieldError::new(
                format!("{CULLING_PATH}.activityProbe.exec.outputPath"),
                "must not be empty",
            ));
        }
    }

    for (field, value) in [
        ("maxInactiveSeconds", culling.max_inactive_seconds),
        ("maxProbeIntervalSeconds", culling.max_probe_interval_seconds),
        ("minProbeIntervalSeconds", culling.min_probe_interval_seconds),
    ] {
        if value.is_some_and(|v| v <= 0) {
            errors.push(FieldError::new(format!("{CULLING_PATH}.{field}"), "must be greater than zero"));
        }
    }

    let (min, max) = (
        culling.min_probe_interval_seconds(),
        culling.max_probe_interval_seconds(),
    );
    if min > max {
        errors.push(FieldError::new(
            format!("{CULLING_PATH}.minProbeIntervalSeconds"),
            format!("must not exceed maxProbeIntervalSeconds ({max})"),
        ));
    }

    errors
}

/// Everything a new WorkspaceKind must satisfy
pub fn validate_create(kind: &WorkspaceKind) -> Vec<FieldError> {
    let pod_template = &kind.spec.pod_template;
    let mut errors = validate_options(kind);
    for value in &pod_template.options.image_config.values {
        errors.extend(validate_ports(value));
    }
    errors.extend(validate_templates(pod_template));
    errors.extend(validate_culling(pod_template.culling.as_ref()));
    errors
}

/// How a value list changed between two versions of a kind
struct ValueChanges<'a> {
    removed: Vec<&'a str>,
    changed: Vec<&'a str>,
    added: Vec<&'a str>,
}

fn value_changes<'a, V: OptionValue>(
    old: &'a [V],
    new: &'a [V],
    same_spec: impl Fn(&V, &V) -> bool,
) -> ValueChanges<'a> {
    let old_by_id: BTreeMap<&str, &V> = old.iter().map(|v| (v.id(), v)).collect();
    let new_ids: BTreeSet<&str> = new.iter().map(|v| v.id()).collect();

    let mut changes = ValueChanges {
        removed: old_by_id
            .keys()
            .copied()
            .filter(|id| !new_ids.contains(id))
            .collect(),
        changed: Vec::new(),
        added: Vec::new(),
    };
    for value in new {
        match old_by_id.get(value.id()).copied() {
            Some(previous) if !same_spec(previous, value) => changes.changed.push(value.id()),
            Some(_) => {}
            None => changes.added.push(value.id()),
        }
    }
    changes
}

fn in_use_errors(
    option_path: &str,
    option_name: &str,
    changes: &ValueChanges<'_>,
    usage: &BTreeMap<String, usize>,
) -> Vec<FieldError> {
    let in_use = |id: &&str| usage.get(*id).is_some_and(|n| *n > 0);

    let removed = changes.removed.iter().copied().filter(in_use).map(|id| {
        FieldError::new(
            value_path(option_path, id),
            format!("{option_name} value {id:?} is in use and cannot be removed"),
        )
    });
    let changed = changes.changed.iter().copied().filter(in_use).map(|id| {
        FieldError::new(
            format!("{}.spec", value_path(option_path, id)),
            format!("{option_name} value {id:?} is in use and cannot be changed"),
        )
    });
    removed.chain(changed).collect()
}

/// Everything an update must satisfy. Values in use by a workspace are frozen; only new or changed values are
/// checked in depth, while the redirect graphs are always checked as a whole.
pub fn validate_update(old: &WorkspaceKind, new: &WorkspaceKind, usage: &OptionUsage) -> Vec<FieldError> {
    let mut errors = Vec::new();
    let (old_template, new_template) = (&old.spec.pod_template, &new.spec.pod_template);

    if old.name_any() != new.name_any() {
        errors.push(FieldError::new("metadata.name", "field is immutable"));
    }
    if old_template.service_account.name != new_template.service_account.name {
        errors.push(FieldError::new(
            "spec.podTemplate.serviceAccount.name",
            "field is immutable",
        ));
    }
    if old_template.volume_mounts.home != new_template.volume_mounts.home {
        errors.push(FieldError::new("spec.podTemplate.volumeMounts.home", "field is immutable"));
    }

    let images = value_changes(
        &old_template.options.image_config.values,
        &new_template.options.image_config.values,
        |a: &ImageConfigValue, b| a.spec == b.spec,
    );
    errors.extend(in_use_errors(IMAGE_CONFIG_PATH, "imageConfig", &images, &usage.image_config));

    let pods = value_changes(
        &old_template.options.pod_config.values,
        &new_template.options.pod_config.values,
        |a: &PodConfigValue, b| normalize_pod_config_spec(&a.spec) == normalize_pod_config_spec(&b.spec),
    );
    errors.extend(in_use_errors(POD_CONFIG_PATH, "podConfig", &pods, &usage.pod_config));

    errors.extend(validate_options(new));

    let to_check: BTreeSet<&str> = images.changed.iter().chain(&images.added).copied().collect();
    for value in &new_template.options.image_config.values {
        if to_check.contains(value.id.as_str()) {
            errors.extend(validate_ports(value));
        }
    }

    if old_template.extra_env != new_template.extra_env {
        errors.extend(validate_extra_env(new_template));
    }
    if old_template.http_proxy != new_template.http_proxy {
        errors.extend(validate_request_headers(new_template));
    }
    if old_template.culling != new_template.culling {
        errors.extend(validate_culling(new_template.culling.as_ref()));
    }

    errors
}

async fn workspaces_of_kind(client: &Client, kind_name: &str) -> Result<Vec<Workspace>> {
    let api: Api<Workspace> = Api::all(client.clone());
    let workspaces = api.list(&ListParams::default()).await?;
    Ok(workspaces
        .items
        .into_iter()
        .filter(|ws| ws.spec.kind == kind_name)
        .collect())
}

pub async fn admit(client: &Client, req: &AdmissionRequest<WorkspaceKind>) -> Result<Vec<FieldError>> {
    match (&req.operation, &req.object, &req.old_object) {
        (Operation::Create, Some(kind), _) => Ok(validate_create(kind)),
        (Operation::Update, Some(new), Some(old)) => {
            let workspaces = workspaces_of_kind(client, &old.name_any()).await?;
            let usage = OptionUsage::count(old, &workspaces);
            Ok(validate_update(old, new, &usage))
        }
        (Operation::Delete, _, _) => {
            let workspaces = workspaces_of_kind(client, &req.name).await?;
            if workspaces.is_empty() {
                Ok(Vec::new())
            } else {
                Ok(vec![FieldError::new(
                    "metadata.name",
                    format!("WorkspaceKind is used by {} workspace(s)", workspaces.len()),
                )])
            }
        }
        _ => Ok(Vec::new()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::{Method, StatusCode};
    use k8s_openapi::api::core::v1::EnvVar;
    use serde_json::json;

    use crate::controllers::fixtures::*;
    use crate::controllers::workspace::reconcilers::test_fixtures::{workspace, workspace_kind};
    use crate::resources::workspacekinds::{ActivityProbeExec, ImagePort, OptionRedirect};
    use crate::resources::workspaces::WorkspaceStatus;

    fn paths(errors: &[FieldError]) -> Vec<&str> {
        errors.iter().map(|e| e.path.as_str()).collect()
    }

    fn image_values(kind: &mut WorkspaceKind) -> &mut Vec<ImageConfigValue> {
        &mut kind.spec.pod_template.options.image_config.values
    }

    #[test]
    fn test_valid_kind_is_accepted() {
        assert_eq!(validate_create(&workspace_kind()), vec![]);
    }

    #[test]
    fn test_missing_default_is_rejected() {
        let mut kind = workspace_kind();
        kind.spec.pod_template.options.image_config.spawner.default = "jupyterlab_scipy_200".into();

        assert_eq!(
            validate_create(&kind),
            vec![FieldError::new(
                "spec.podTemplate.options.imageConfig.spawner.default",
                "default imageConfig \"jupyterlab_scipy_200\" not found",
            )]
        );
    }

    #[test]
    fn test_cycle_is_rejected() {
        let mut kind = workspace_kind();
        image_values(&mut kind)[1].redirect = Some(OptionRedirect {
            to: "jupyterlab_scipy_180".into(),
            message: None,
        });

        let errors = validate_create(&kind);
        assert!(errors
            .iter()
            .any(|e| e.path.ends_with(".redirect.to") && e.detail.starts_with("cycle detected")));
        // the default now resolves into the cycle as well
        assert!(paths(&errors).contains(&"spec.podTemplate.options.imageConfig.spawner.default"));
    }

    #[test]
    fn test_duplicate_ports_are_rejected() {
        let mut kind = workspace_kind();
        image_values(&mut kind)[0].spec.ports.push(ImagePort {
            id: "lab2".into(),
            display_name: "Again".into(),
            port: 8888,
            protocol: None,
        });

        assert_eq!(
            validate_create(&kind),
            vec![FieldError::new(
                "spec.podTemplate.options.imageConfig.values[jupyterlab_scipy_180].spec.ports[lab2].port",
                "port 8888 is defined more than once",
            )]
        );
    }

    #[test]
    fn test_same_port_in_different_images_is_fine() {
        let kind = workspace_kind();
        let values = &kind.spec.pod_template.options.image_config.values;
        assert_eq!(values[0].spec.ports[0].port, values[1].spec.ports[0].port);
        assert!(values.iter().all(|v| validate_ports(v).is_empty()));
    }

    #[test]
    fn test_bad_templates_are_rejected() {
        let mut kind = workspace_kind();
        kind.spec.pod_template.extra_env.push(EnvVar {
            name: "BROKEN".into(),
            value: Some("{{ httpPathPrefix ".into()),
            value_from: None,
        });
        if let Some(headers) = kind
            .spec
            .pod_template
            .http_proxy
            .as_mut()
            .and_then(|p| p.request_headers.as_mut())
        {
            headers.add.insert("X-Bad".into(), "{{ nope }}".into());
        }

        assert_eq!(
            paths(&validate_create(&kind)),
            vec![
                "spec.podTemplate.extraEnv[BROKEN].value",
                "spec.podTemplate.httpProxy.requestHeaders.add[X-Bad]",
            ]
        );
    }

    #[test]
    fn test_culling_consistency() {
        let mut culling = workspace_kind().spec.pod_template.culling.unwrap();
        assert!(validate_culling(Some(&culling)).is_empty());

        culling.activity_probe.exec = Some(ActivityProbeExec {
            output_path: "/tmp/out.json".into(),
            timeout_seconds: 10,
            script: "true".into(),
        });
        culling.min_probe_interval_seconds = Some(120);
        assert_eq!(
            paths(&validate_culling(Some(&culling))),
            vec![
                "spec.podTemplate.culling.activityProbe",
                "spec.podTemplate.culling.minProbeIntervalSeconds",
            ]
        );

        culling.enabled = false;
        assert!(validate_culling(Some(&culling)).is_empty());
        assert!(validate_culling(None).is_empty());
    }

    #[test]
    fn test_usage_counts_defaults_and_redirect_targets() {
        let kind = workspace_kind();

        let mut on_old_image = workspace();
        on_old_image.spec.pod_template.options.image_config = "jupyterlab_scipy_180".into();
        on_old_image.spec.pod_template.options.pod_config = String::new();
        let mut status = WorkspaceStatus::default();
        status.pod_template_options.image_config.desired = "jupyterlab_scipy_190".into();
        on_old_image.status = Some(status);

        let mut other_kind = workspace();
        other_kind.spec.kind = "codeserver".into();

        let usage = OptionUsage::count(&kind, &[on_old_image, workspace(), other_kind]);
        assert_eq!(
            usage.image_config,
            BTreeMap::from([
                ("jupyterlab_scipy_180".to_owned(), 1),
                ("jupyterlab_scipy_190".to_owned(), 2)
            ])
        );
        assert_eq!(
            usage.pod_config,
            BTreeMap::from([("small_cpu".to_owned(), 1), ("tiny_cpu".to_owned(), 1)])
        );
    }

    #[test]
    fn test_values_in_use_are_frozen() {
        let old = workspace_kind();
        let usage = OptionUsage::count(&old, &[workspace()]);

        let mut changed = old.clone();
        image_values(&mut changed)[1].spec.image = "ghcr.io/kubeflow/notebooks/jupyter-scipy:v1.9.1".into();
        assert_eq!(
            validate_update(&old, &changed, &usage),
            vec![FieldError::new(
                "spec.podTemplate.options.imageConfig.values[jupyterlab_scipy_190].spec",
                "imageConfig value \"jupyterlab_scipy_190\" is in use and cannot be changed",
            )]
        );

        let mut removed = old.clone();
        removed.spec.pod_template.options.pod_config.values.remove(1);
        let errors = validate_update(&old, &removed, &usage);
        assert!(errors.contains(&FieldError::new(
            "spec.podTemplate.options.podConfig.values[small_cpu]",
            "podConfig value \"small_cpu\" is in use and cannot be removed",
        )));

        // nobody uses the old image, so it may change freely
        let mut unused = old.clone();
        image_values(&mut unused)[0].spec.image = "ghcr.io/kubeflow/notebooks/jupyter-scipy:v1.8.1".into();
        assert_eq!(validate_update(&old, &unused, &usage), vec![]);
    }

    #[test]
    fn test_equivalent_quantities_are_not_a_change() {
        use k8s_openapi::apimachinery::pkg::api::resource::Quantity;

        let old = workspace_kind();
        let usage = OptionUsage::count(&old, &[workspace()]);

        let mut new = old.clone();
        let small = &mut new.spec.pod_template.options.pod_config.values[1];
        if let Some(requests) = small.spec.resources.as_mut().and_then(|r| r.requests.as_mut()) {
            requests.insert("cpu".into(), Quantity("1000m".into()));
        }

        assert_eq!(validate_update(&old, &new, &usage), vec![]);
    }

    #[test]
    fn test_immutable_fields() {
        let old = workspace_kind();
        let mut new = old.clone();
        new.spec.pod_template.service_account.name = "other".into();
        new.spec.pod_template.volume_mounts.home = "/home/other".into();

        assert_eq!(
            paths(&validate_update(&old, &new, &OptionUsage::default())),
            vec![
                "spec.podTemplate.serviceAccount.name",
                "spec.podTemplate.volumeMounts.home",
            ]
        );
    }

    #[test]
    fn test_only_new_values_are_checked_in_depth() {
        let mut old = workspace_kind();
        // already broken before the update, and left alone by it
        image_values(&mut old)[0].spec.ports.push(ImagePort {
            id: "again".into(),
            display_name: String::new(),
            port: 8888,
            protocol: None,
        });

        let mut new = old.clone();
        let mut added = new.spec.pod_template.options.image_config.values[1].clone();
        added.id = "jupyterlab_scipy_200".into();
        added.spec.ports.push(ImagePort {
            id: "dup".into(),
            display_name: String::new(),
            port: 8888,
            protocol: None,
        });
        image_values(&mut new).push(added);

        assert_eq!(
            paths(&validate_update(&old, &new, &OptionUsage::default())),
            vec!["spec.podTemplate.options.imageConfig.values[jupyterlab_scipy_200].spec.ports[dup].port"]
        );
    }

    fn request(operation: &str, object: Option<&WorkspaceKind>, old: Option<&WorkspaceKind>) -> AdmissionRequest<WorkspaceKind> {
        let review = json!({
            "apiVersion": "admission.k8s.io/v1",
            "kind": "AdmissionReview",
            "request": {
                "uid": "uid-1",
                "kind": {"group": "kubeflow.org", "version": "v1beta1", "kind": "WorkspaceKind"},
                "resource": {"group": "kubeflow.org", "version": "v1beta1", "resource": "workspacekinds"},
                "name": "jupyterlab",
                "operation": operation,
                "userInfo": {"username": "admin"},
                "object": object,
                "oldObject": old,
                "dryRun": false
            }
        });
        let review: kube::core::admission::AdmissionReview<WorkspaceKind> =
            serde_json::from_value(review).unwrap();
        review.try_into().unwrap()
    }

    fn workspaces_response(items: Vec<Workspace>) -> (StatusCode, serde_json::Value) {
        list(
            "kubeflow.org/v1beta1",
            "Workspace",
            items.into_iter().map(|ws| serde_json::to_value(ws).unwrap()).collect(),
        )
    }

    #[tokio::test]
    async fn test_delete_in_use_is_denied() {
        let mut other = workspace();
        other.spec.kind = "codeserver".into();
        let (client, server) =
            MockApiServer::start(move |_, _, _| workspaces_response(vec![workspace(), other.clone()]));

        let kind = workspace_kind();
        let errors = admit(&client, &request("DELETE", None, Some(&kind))).await.unwrap();

        assert_eq!(
            errors,
            vec![FieldError::new("metadata.name", "WorkspaceKind is used by 1 workspace(s)")]
        );
        assert!(server
            .find(Method::GET, "/apis/kubeflow.org/v1beta1/workspaces")
            .is_some());
    }

    #[tokio::test]
    async fn test_delete_unused_is_allowed() {
        let (client, _server) = MockApiServer::start(|_, _, _| workspaces_response(vec![]));

        let kind = workspace_kind();
        let errors = admit(&client, &request("DELETE", None, Some(&kind))).await.unwrap();
        assert!(errors.is_empty());
    }

    #[tokio::test]
    async fn test_update_checks_usage() {
        let (client, _server) = MockApiServer::start(|_, _, _| workspaces_response(vec![workspace()]));

        let old = workspace_kind();
        let mut new = old.clone();
        image_values(&mut new).remove(1);

        let errors = admit(&client, &request("UPDATE", Some(&new), Some(&old))).await.unwrap();
        assert!(errors.contains(&FieldError::new(
            "spec.podTemplate.options.imageConfig.values[jupyterlab_scipy_190]",
            "imageConfig value \"jupyterlab_scipy_190\" is in use and cannot be removed",
        )));
    }
}
