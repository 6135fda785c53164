//! Pauses running workspaces that nobody has used for a while

pub mod controller;
pub mod probes;

pub use controller::run;
