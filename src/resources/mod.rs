/// Workspace CRD
pub mod workspaces;

/// WorkspaceKind CRD
pub mod workspacekinds;

/// External Istio CRD
pub mod virtualservices;
