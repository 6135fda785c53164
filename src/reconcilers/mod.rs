use std::collections::BTreeMap;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};

pub mod quantity_parser;
pub mod redirects;
pub mod template;

pub const FIELD_MANAGER: &str = "workspaces-controller";

pub const APP_MANAGED_BY_LABEL: &str = "app.kubernetes.io/managed-by";
/// Set on every child object, the value is the workspace name
pub const WORKSPACE_NAME_LABEL: &str = "notebooks.kubeflow.org/workspace-name";
/// Pod selector label of the StatefulSet and Service, the value is the workspace name
pub const STATEFULSET_SELECTOR_LABEL: &str = "statefulset";

const MAX_NAME_LENGTH: usize = 63;

pub fn managed_labels(workspace_name: &str) -> BTreeMap<String, String> {
    BTreeMap::from([
        (APP_MANAGED_BY_LABEL.into(), FIELD_MANAGER.into()),
        (WORKSPACE_NAME_LABEL.into(), workspace_name.into()),
    ])
}

pub fn selector_labels(workspace_name: &str) -> BTreeMap<String, String> {
    BTreeMap::from([(STATEFULSET_SELECTOR_LABEL.into(), workspace_name.into())])
}

/// Label selector string matching all children of a workspace
pub fn children_selector(workspace_name: &str) -> String {
    format!("{WORKSPACE_NAME_LABEL}={workspace_name}")
}

/// `ws-<name>`, cut so that generated suffixes still fit into a DNS label
pub fn child_name_prefix(workspace_name: &str) -> String {
    let mut prefix = format!("ws-{workspace_name}");
    // leave room for the `-xxxxx` the api server appends to generateName
    prefix.truncate(MAX_NAME_LENGTH - 6);
    prefix.trim_end_matches('-').to_owned()
}

pub fn object_meta(
    oref: &OwnerReference,
    workspace_name: &str,
    labels: BTreeMap<String, String>,
    annotations: BTreeMap<String, String>,
) -> ObjectMeta {
    let mut all_labels = labels;
    all_labels.extend(managed_labels(workspace_name));

    ObjectMeta {
        generate_name: Some(format!("{}-", child_name_prefix(workspace_name))),
        labels: Some(all_labels),
        annotations: (!annotations.is_empty()).then_some(annotations),
        owner_references: Some(vec![oref.clone()]),
        ..Default::default()
    }
}

/// Whether the object's controller owner reference points at the given uid
pub fn is_controlled_by(meta: &ObjectMeta, uid: &str) -> bool {
    meta.owner_references
        .iter()
        .flatten()
        .any(|o| o.controller == Some(true) && o.uid == uid)
}
