use kube::api::Api;
use kube::core::admission::{AdmissionRequest, Operation};
use kube::Client;

use super::FieldError;
use crate::resources::workspacekinds::WorkspaceKind;
use crate::resources::workspaces::Workspace;
use crate::Result;

/// A workspace must name an existing kind, and any option it selects must exist in that kind
pub fn validate(ws: &Workspace, kind: Option<&WorkspaceKind>) -> Vec<FieldError> {
    let Some(kind) = kind else {
        return vec![FieldError::new(
            "spec.kind",
            format!("workspace kind {:?} not found", ws.spec.kind),
        )];
    };

    let options = &ws.spec.pod_template.options;
    let mut errors = Vec::new();
    if !options.image_config.is_empty() && kind.image_config(&options.image_config).is_none() {
        errors.push(FieldError::new(
            "spec.podTemplate.options.imageConfig",
            format!(
                "imageConfig {:?} not found in workspace kind {:?}",
                options.image_config, ws.spec.kind
            ),
        ));
    }
    if !options.pod_config.is_empty() && kind.pod_config(&options.pod_config).is_none() {
        errors.push(FieldError::new(
            "spec.podTemplate.options.podConfig",
            format!(
                "podConfig {:?} not found in workspace kind {:?}",
                options.pod_config, ws.spec.kind
            ),
        ));
    }
    errors
}

pub fn validate_update(old: &Workspace, new: &Workspace) -> Vec<FieldError> {
    if old.spec.kind != new.spec.kind {
        vec![FieldError::new("spec.kind", "field is immutable")]
    } else {
        Vec::new()
    }
}

pub async fn admit(client: &Client, req: &AdmissionRequest<Workspace>) -> Result<Vec<FieldError>> {
    let Some(ws) = req.object.as_ref() else {
        return Ok(Vec::new());
    };

    let mut errors = match (&req.operation, &req.old_object) {
        (Operation::Create, _) => Vec::new(),
        (Operation::Update, Some(old)) => validate_update(old, ws),
        (Operation::Update, None) => Vec::new(),
        _ => return Ok(Vec::new()),
    };

    let kinds: Api<WorkspaceKind> = Api::all(client.clone());
    let kind = kinds.get_opt(&ws.spec.kind).await?;
    errors.extend(validate(ws, kind.as_ref()));
    Ok(errors)
}
