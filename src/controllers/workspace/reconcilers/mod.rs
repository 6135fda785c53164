use k8s_openapi::api::apps::v1::StatefulSet;
use k8s_openapi::api::core::v1::Pod;
use kube::api::{Api, ListParams};
use kube::{Resource, ResourceExt};
use serde::de::DeserializeOwned;

use crate::reconcilers::{children_selector, is_controlled_by};
use crate::resources::workspaces::{Workspace, WorkspaceState};
use crate::{Error, Result};

pub mod service;
pub mod statefulset;
pub mod virtualservice;

#[cfg(test)]
pub(crate) mod test_fixtures;

/// Find the single object of a kind that the workspace controls. More than one is an error.
pub async fn find_owned<K>(client: &kube::Client, ws: &Workspace) -> Result<Option<K>>
where
    K: Resource<DynamicType = (), Scope = k8s_openapi::NamespaceResourceScope>
        + Clone
        + DeserializeOwned
        + std::fmt::Debug,
{
    let namespace = ws.namespace().unwrap_or_default();
    let uid = ws.uid().unwrap_or_default();
    let api: Api<K> = Api::namespaced(client.clone(), &namespace);

    let mut owned: Vec<K> = api
        .list(&ListParams::default().labels(&children_selector(&ws.name_any())))
        .await?
        .items
        .into_iter()
        .filter(|o| is_controlled_by(o.meta(), &uid))
        .collect();

    match owned.len() {
        0 | 1 => Ok(owned.pop()),
        _ => Err(Error::MultipleChildren {
            kind: K::kind(&()).to_string(),
            workspace: ws.name_any(),
        }),
    }
}

/// Name of the only pod of a workspace StatefulSet
pub fn pod_name(ss: &StatefulSet) -> String {
    format!("{}-0", ss.name_any())
}

fn main_container_waiting(pod: &Pod) -> Option<(String, String)> {
    pod.status
        .as_ref()?
        .container_statuses
        .as_ref()?
        .iter()
        .find(|c| c.name == statefulset::MAIN_CONTAINER_NAME)?
        .state
        .as_ref()?
        .waiting
        .as_ref()
        .map(|w| {
            (
                w.reason.clone().unwrap_or_default(),
                w.message.clone().unwrap_or_default(),
            )
        })
}

fn pod_ready(pod: &Pod) -> bool {
    let Some(status) = pod.status.as_ref() else {
        return false;
    };
    status.phase.as_deref() == Some("Running")
        && status
            .container_statuses
            .as_ref()
            .is_some_and(|cs| !cs.is_empty() && cs.iter().all(|c| c.ready))
}

/// Derive the workspace state from its StatefulSet and pod
pub fn workspace_state(
    ws: &Workspace,
    ss: &StatefulSet,
    pod: Option<&Pod>,
) -> (WorkspaceState, String) {
    let pod_terminating = pod.is_some_and(|p| p.metadata.deletion_timestamp.is_some());

    if ws.spec.paused {
        let replicas = ss.status.as_ref().map(|s| s.replicas).unwrap_or_default();
        return if pod.is_none() && replicas == 0 {
            (WorkspaceState::Paused, "Workspace is paused.".into())
        } else {
            (
                WorkspaceState::Terminating,
                "Workspace is pausing, its pod is being terminated.".into(),
            )
        };
    }

    let Some(pod) = pod else {
        return (
            WorkspaceState::Pending,
            "Workspace is pending, its pod has not been created yet.".into(),
        );
    };

    if pod_terminating {
        return (
            WorkspaceState::Terminating,
            "Workspace pod is being terminated.".into(),
        );
    }

    let ready_replicas = ss
        .status
        .as_ref()
        .and_then(|s| s.ready_replicas)
        .unwrap_or_default();
    if pod_ready(pod) && ready_replicas > 0 {
        return (WorkspaceState::Running, "Workspace is running.".into());
    }

    if let Some((reason, message)) = main_container_waiting(pod) {
        match reason.as_str() {
            "ContainerCreating" | "PodInitializing" => {
                return (
                    WorkspaceState::Pending,
                    format!("Workspace is pending: {reason}."),
                )
            }
            "CrashLoopBackOff" | "ImagePullBackOff" | "ErrImagePull" | "CreateContainerConfigError"
            | "InvalidImageName" => {
                return (
                    WorkspaceState::Error,
                    format!("Workspace has error: {reason}: {message}"),
                )
            }
            _ => {}
        }
    }

    match pod.status.as_ref().and_then(|s| s.phase.as_deref()) {
        Some("Pending") => (
            WorkspaceState::Pending,
            "Workspace is pending, its pod is being scheduled.".into(),
        ),
        Some("Running") => (
            WorkspaceState::Pending,
            "Workspace is starting, waiting for its pod to become ready.".into(),
        ),
        _ => (
            WorkspaceState::Unknown,
            "Workspace is in an unknown state.".into(),
        ),
    }
}
