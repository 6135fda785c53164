use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{Service, ServicePort, ServiceSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::api::{Api, PostParams};
use kube::ResourceExt;
use tracing::*;

use super::statefulset::port_name;
use crate::reconcilers::{object_meta, selector_labels, FIELD_MANAGER};
use crate::resources::workspacekinds::ImageConfigValue;
use crate::resources::workspaces::Workspace;
use crate::Result;

/// Build the ClusterIP Service in front of the workspace pod, one port per image port
pub fn desired_service(ws: &Workspace, image: &ImageConfigValue, oref: &OwnerReference) -> Service {
    let name = ws.name_any();

    let ports = image
        .spec
        .ports
        .iter()
        .map(|p| ServicePort {
            name: Some(port_name(p.port)),
            port: p.port,
            protocol: Some("TCP".into()),
            target_port: Some(IntOrString::Int(p.port)),
            ..Default::default()
        })
        .collect();

    Service {
        metadata: object_meta(oref, &name, BTreeMap::new(), BTreeMap::new()),
        spec: Some(ServiceSpec {
            type_: Some("ClusterIP".into()),
            selector: Some(selector_labels(&name)),
            ports: Some(ports),
            ..Default::default()
        }),
        status: None,
    }
}

/// Copy the fields we own from `desired` onto `existing`, returning whether anything changed.
/// Fields allocated by the api server, like clusterIP, are never touched.
pub fn copy_service_fields(desired: &Service, existing: &mut Service) -> bool {
    let mut changed = false;

    if existing.metadata.labels != desired.metadata.labels {
        existing.metadata.labels = desired.metadata.labels.clone();
        changed = true;
    }
    if existing.metadata.annotations != desired.metadata.annotations {
        existing.metadata.annotations = desired.metadata.annotations.clone();
        changed = true;
    }

    let desired_spec = desired.spec.clone().unwrap_or_default();
    let existing_spec = existing.spec.get_or_insert_with(Default::default);

    if existing_spec.selector != desired_spec.selector {
        existing_spec.selector = desired_spec.selector;
        changed = true;
    }
    if existing_spec.ports != desired_spec.ports {
        existing_spec.ports = desired_spec.ports;
        changed = true;
    }
    if existing_spec.type_ != desired_spec.type_ {
        existing_spec.type_ = desired_spec.type_;
        changed = true;
    }

    changed
}

/// Create the Service, or bring the live one in line with `desired`
pub async fn reconcile_service(
    client: &kube::Client,
    namespace: &str,
    existing: Option<Service>,
    desired: Service,
) -> Result<Service> {
    let svc_api: Api<Service> = Api::namespaced(client.clone(), namespace);
    let params = PostParams {
        dry_run: false,
        field_manager: Some(FIELD_MANAGER.into()),
    };

    let Some(mut existing) = existing else {
        let created = svc_api.create(&params, &desired).await?;
        debug!(
            "Created Service {} in namespace {}",
            created.name_any(),
            namespace
        );
        return Ok(created);
    };

    if !copy_service_fields(&desired, &mut existing) {
        return Ok(existing);
    }

    let name = existing.name_any();
    debug!("Updating Service {} in namespace {}", name, namespace);
    Ok(svc_api.replace(&name, &params, &existing).await?)
}
