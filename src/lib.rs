use thiserror::Error;

use reconcilers::redirects::RedirectError;
use reconcilers::template::TemplateError;

#[derive(Error, Debug)]
pub enum Error {
    #[error("SerializationError: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Kube Error: {0}")]
    KubeError(#[from] kube::Error),

    #[error("workspace kind not found")]
    WorkspaceKindNotFound(String),

    #[error("{option} {id:?} could not be resolved: {source}")]
    OptionNotResolvable {
        option: &'static str,
        id: String,
        source: RedirectError,
    },

    #[error(transparent)]
    TemplateError(#[from] TemplateError),

    #[error("Multiple {kind}s found for workspace {workspace}")]
    MultipleChildren {
        kind: String,
        workspace: String,
    },

    #[error("{kind} {name} exists but is not controlled by this workspace")]
    NotControlled { kind: &'static str, name: String },

    #[error("Object is missing key: {0}")]
    MissingObjectKey(&'static str),

    #[error("Status update conflicted with another writer")]
    Conflict,

    #[error("Activity probe failed: {0}")]
    ProbeFailed(String),

    #[error(transparent)]
    HttpError(#[from] reqwest::Error),

    #[error(transparent)]
    InvalidUrl(#[from] url::ParseError),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

impl Error {
    pub fn metric_label(&self) -> &'static str {
        match self {
            Error::SerializationError(_) => "SerializationError",
            Error::KubeError(_) => "KubeError",
            Error::WorkspaceKindNotFound(_) => "WorkspaceKindNotFound",
            Error::OptionNotResolvable { .. } => "OptionNotResolvable",
            Error::TemplateError(_) => "TemplateError",
            Error::MultipleChildren { .. } => "MultipleChildren",
            Error::NotControlled { .. } => "NotControlled",
            Error::MissingObjectKey(_) => "MissingObjectKey",
            Error::Conflict => "Conflict",
            Error::ProbeFailed(_) => "ProbeFailed",
            Error::HttpError(_) => "HttpError",
            Error::InvalidUrl(_) => "InvalidUrl",
        }
    }

    /// Errors that are caused by the objects we were given rather than the infrastructure, and belong in
    /// the workspace status
    pub fn is_dependency_error(&self) -> bool {
        matches!(
            self,
            Error::WorkspaceKindNotFound(_)
                | Error::OptionNotResolvable { .. }
                | Error::TemplateError(_)
                | Error::MultipleChildren { .. }
                | Error::NotControlled { .. }
        )
    }
}

pub(crate) fn is_conflict(err: &kube::Error) -> bool {
    matches!(err, kube::Error::Api(e) if e.code == 409)
}

pub(crate) fn is_not_found(err: &kube::Error) -> bool {
    matches!(err, kube::Error::Api(e) if e.code == 404)
}

pub mod controllers;

/// Log and trace integrations
pub mod telemetry;

/// Metrics
mod metrics;

pub use controllers::{ControllerConfig, State};
pub use metrics::Metrics;

/// Helpers shared by the controllers and the webhook
pub mod reconcilers;

/// CRDs
pub mod resources;

/// Admission webhook
pub mod webhook;
