use std::collections::BTreeMap;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::api::{Api, PostParams};
use kube::ResourceExt;
use tracing::*;

use crate::controllers::ControllerConfig;
use crate::reconcilers::template::{render, WorkspacePorts};
use crate::reconcilers::{child_name_prefix, is_controlled_by, object_meta, FIELD_MANAGER};
use crate::resources::virtualservices::{
    Destination, HeaderOperations, Headers, HttpMatchRequest, HttpRewrite, HttpRoute,
    HttpRouteDestination, PortSelector, StringMatch, VirtualService, VirtualServiceSpec,
};
use crate::resources::workspacekinds::{ImageConfigValue, WorkspaceKind};
use crate::resources::workspaces::Workspace;
use crate::{Error, Result};

/// The VirtualService of a workspace has a fixed name, unlike its other children
pub fn virtual_service_name(ws: &Workspace) -> String {
    child_name_prefix(&ws.name_any())
}

/// Build the VirtualService routing `/workspace/<namespace>/<name>/<port-id>` to each port of the workspace
pub fn desired_virtual_service(
    ws: &Workspace,
    kind: &WorkspaceKind,
    image: &ImageConfigValue,
    service_name: &str,
    config: &ControllerConfig,
    oref: &OwnerReference,
) -> Result<VirtualService> {
    let name = ws.name_any();
    let namespace = ws.namespace().unwrap_or_default();

    let ports = WorkspacePorts::new(
        &namespace,
        &name,
        image.spec.ports.iter().map(|p| p.id.as_str()),
    );

    let http_proxy = kind.spec.pod_template.http_proxy.clone().unwrap_or_default();

    let headers = match http_proxy.request_headers {
        Some(request_headers) => {
            let render_map = |map: &BTreeMap<String, String>| {
                map.iter()
                    .map(|(k, v)| Ok((render(k, &ports)?, render(v, &ports)?)))
                    .collect::<Result<BTreeMap<_, _>>>()
            };
            let operations = HeaderOperations {
                set: render_map(&request_headers.set)?,
                add: render_map(&request_headers.add)?,
                remove: request_headers
                    .remove
                    .iter()
                    .map(|h| Ok(render(h, &ports)?))
                    .collect::<Result<Vec<_>>>()?,
            };
            let empty =
                operations.set.is_empty() && operations.add.is_empty() && operations.remove.is_empty();
            (!empty).then_some(Headers {
                request: Some(operations),
            })
        }
        None => None,
    };

    let host = config.service_host(service_name, &namespace);

    let http = image
        .spec
        .ports
        .iter()
        .map(|p| HttpRoute {
            match_: vec![HttpMatchRequest {
                uri: Some(StringMatch::Prefix(format!(
                    "/workspace/{namespace}/{name}/{}",
                    p.id
                ))),
            }],
            rewrite: http_proxy.remove_path_prefix.then(|| HttpRewrite {
                uri: Some("/".into()),
            }),
            route: vec![HttpRouteDestination {
                destination: Destination {
                    host: host.clone(),
                    port: Some(PortSelector {
                        number: p.port as u32,
                    }),
                },
            }],
            headers: headers.clone(),
        })
        .collect();

    let mut metadata = object_meta(oref, &name, BTreeMap::new(), BTreeMap::new());
    metadata.generate_name = None;
    metadata.name = Some(virtual_service_name(ws));
    metadata.namespace = Some(namespace);

    Ok(VirtualService {
        metadata,
        spec: VirtualServiceSpec {
            hosts: vec![config.istio_host.clone()],
            gateways: vec![config.istio_gateway.clone()],
            http,
        },
    })
}

/// Create the VirtualService, or bring the live one in line with `desired`. A VirtualService of the same name
/// controlled by anything else is left alone.
pub async fn reconcile_virtual_service(
    client: &kube::Client,
    namespace: &str,
    desired: VirtualService,
) -> Result<VirtualService> {
    let vs_api: Api<VirtualService> = Api::namespaced(client.clone(), namespace);
    let params = PostParams {
        dry_run: false,
        field_manager: Some(FIELD_MANAGER.into()),
    };
    let name = desired.name_any();
    let owner_uid = desired
        .metadata
        .owner_references
        .iter()
        .flatten()
        .find(|o| o.controller == Some(true))
        .map(|o| o.uid.clone())
        .ok_or(Error::MissingObjectKey(".metadata.ownerReferences"))?;

    let Some(mut existing) = vs_api.get_opt(&name).await? else {
        debug!("Creating VirtualService {} in namespace {}", name, namespace);
        return Ok(vs_api.create(&params, &desired).await?);
    };

    if !is_controlled_by(&existing.metadata, &owner_uid) {
        return Err(Error::NotControlled {
            kind: "VirtualService",
            name,
        });
    }

    let unchanged = existing.spec == desired.spec
        && existing.metadata.labels == desired.metadata.labels
        && existing.metadata.annotations == desired.metadata.annotations;
    if unchanged {
        return Ok(existing);
    }

    existing.spec = desired.spec;
    existing.metadata.labels = desired.metadata.labels;
    existing.metadata.annotations = desired.metadata.annotations;

    debug!("Updating VirtualService {} in namespace {}", name, namespace);
    Ok(vs_api.replace(&name, &params, &existing).await?)
}
