//! Validating admission for Workspaces and WorkspaceKinds

use std::fmt;

use actix_web::{post, web, web::Data, HttpResponse, Responder};
use kube::core::admission::{AdmissionRequest, AdmissionResponse, AdmissionReview};
use kube::{Client, Resource};
use tracing::*;

use crate::resources::workspacekinds::WorkspaceKind;
use crate::resources::workspaces::Workspace;
use crate::Result;

pub mod workspace;
pub mod workspacekind;

/// One reason an object was rejected, rendered as `<path>: <detail>`
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FieldError {
    pub path: String,
    pub detail: String,
}

impl FieldError {
    pub fn new(path: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            detail: detail.into(),
        }
    }
}

impl fmt::Display for FieldError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.path, self.detail)
    }
}

pub fn deny_message(errors: &[FieldError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

fn respond<K: Resource>(
    req: &AdmissionRequest<K>,
    result: Result<Vec<FieldError>>,
) -> AdmissionResponse {
    match result {
        Ok(errors) if errors.is_empty() => AdmissionResponse::from(req),
        Ok(errors) => {
            let message = deny_message(&errors);
            info!("Denied {:?} of {} {}: {message}", req.operation, req.kind.kind, req.name);
            AdmissionResponse::from(req).deny(message)
        }
        Err(e) => {
            warn!("Could not validate {} {}: {e:?}", req.kind.kind, req.name);
            AdmissionResponse::from(req).deny(format!("internal error: {e}"))
        }
    }
}

#[post("/validate-workspace")]
async fn validate_workspace(
    client: Data<Client>,
    body: web::Json<AdmissionReview<Workspace>>,
) -> impl Responder {
    let req: AdmissionRequest<Workspace> = match body.into_inner().try_into() {
        Ok(req) => req,
        Err(e) => {
            error!("Failed to parse admission request: {e}");
            return HttpResponse::Ok().json(AdmissionResponse::invalid(e.to_string()).into_review());
        }
    };

    let result = workspace::admit(&client, &req).await;
    HttpResponse::Ok().json(respond(&req, result).into_review())
}

#[post("/validate-workspacekind")]
async fn validate_workspacekind(
    client: Data<Client>,
    body: web::Json<AdmissionReview<WorkspaceKind>>,
) -> impl Responder {
    let req: AdmissionRequest<WorkspaceKind> = match body.into_inner().try_into() {
        Ok(req) => req,
        Err(e) => {
            error!("Failed to parse admission request: {e}");
            return HttpResponse::Ok().json(AdmissionResponse::invalid(e.to_string()).into_review());
        }
    };

    let result = workspacekind::admit(&client, &req).await;
    HttpResponse::Ok().json(respond(&req, result).into_review())
}

/// Mount the admission endpoints. Expects a `Data<kube::Client>` in the app.
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(validate_workspace).service(validate_workspacekind);
}
