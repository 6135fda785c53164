//! Activity probes: asking a running workspace when it was last used

use std::time::Duration;

use chrono::{DateTime, Utc};
use k8s_openapi::api::core::v1::Pod;
use kube::api::{Api, AttachParams};
use serde::Deserialize;
use tokio::io::AsyncReadExt;
use tracing::*;
use url::Url;

use crate::controllers::workspace::reconcilers::statefulset::MAIN_CONTAINER_NAME;
use crate::resources::workspacekinds::ActivityProbeExec;
use crate::resources::workspaces::ProbeResult;
use crate::{Error, Result};

/// JupyterLab listens here in every image that uses the jupyter probe
pub const JUPYTER_PORT: i32 = 8888;

/// What a probe learned about the user
#[derive(Clone, Debug, PartialEq)]
pub enum Activity {
    /// The user was last seen at this time
    LastActiveAt(DateTime<Utc>),
    /// The workspace reported that nobody is using it
    Idle,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ProbeOutcome {
    pub result: ProbeResult,
    pub message: String,
    /// Only set for successful probes
    pub activity: Option<Activity>,
}

impl ProbeOutcome {
    pub fn success(message: &str, activity: Activity) -> Self {
        Self {
            result: ProbeResult::Success,
            message: message.into(),
            activity: Some(activity),
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            result: ProbeResult::Failure,
            message: message.into(),
            activity: None,
        }
    }

    pub fn timeout(message: &str) -> Self {
        Self {
            result: ProbeResult::Timeout,
            message: message.into(),
            activity: None,
        }
    }
}

#[derive(Deserialize)]
struct JupyterStatus {
    #[serde(default)]
    last_activity: String,
}

/// Interpret the body of `GET .../jupyterlab/api/status`
pub fn parse_jupyter_status(body: &[u8]) -> ProbeOutcome {
    let status: JupyterStatus = match serde_json::from_slice(body) {
        Ok(status) => status,
        Err(_) => return ProbeOutcome::failure("Jupyter probe failed: invalid response body"),
    };

    match DateTime::parse_from_rfc3339(&status.last_activity) {
        Ok(at) => ProbeOutcome::success(
            "Jupyter probe succeeded",
            Activity::LastActiveAt(at.with_timezone(&Utc)),
        ),
        Err(_) => ProbeOutcome::failure("Jupyter probe failed: invalid last activity time"),
    }
}

pub fn jupyter_status_path(namespace: &str, name: &str) -> String {
    format!("/workspace/{namespace}/{name}/jupyterlab/api/status")
}

/// Ask the JupyterLab server behind the workspace service for its last activity.
/// The client carries the configured timeout.
pub async fn probe_jupyter(http_client: &reqwest::Client, url: Url) -> ProbeOutcome {
    debug!("Probing {url}");

    let response = match http_client.get(url).send().await {
        Ok(response) => response,
        Err(e) if e.is_timeout() => return ProbeOutcome::timeout("JupyterLab API request timeout"),
        Err(e) => {
            debug!("JupyterLab API request failed: {e}");
            return ProbeOutcome::failure("Jupyter probe failed");
        }
    };

    if response.status() != reqwest::StatusCode::OK {
        return ProbeOutcome::failure(format!(
            "Jupyter probe failed: HTTP {}",
            response.status().as_u16()
        ));
    }

    match response.bytes().await {
        Ok(body) => parse_jupyter_status(&body),
        Err(e) if e.is_timeout() => ProbeOutcome::timeout("JupyterLab API request timeout"),
        Err(_) => ProbeOutcome::failure("Jupyter probe failed: invalid response body"),
    }
}

/// The JSON document an exec probe script leaves in its output file
#[derive(Deserialize, Debug, Default, PartialEq)]
pub struct ExecProbeReport {
    pub has_activity: Option<bool>,
    pub last_activity: Option<String>,
}

/// Interpret what the exec probe printed. An explicit `has_activity` wins over `last_activity`.
pub fn parse_exec_report(stdout: &str, now: DateTime<Utc>) -> ProbeOutcome {
    let report: ExecProbeReport = match serde_json::from_str(stdout.trim()) {
        Ok(report) => report,
        Err(_) => return ProbeOutcome::failure("Failed to parse activity probe JSON"),
    };

    match report {
        ExecProbeReport {
            has_activity: Some(false),
            ..
        } => ProbeOutcome::success("Bash probe succeeded", Activity::Idle),
        ExecProbeReport {
            has_activity: Some(true),
            ..
        } => ProbeOutcome::success("Bash probe succeeded", Activity::LastActiveAt(now)),
        ExecProbeReport {
            has_activity: None,
            last_activity: Some(last_activity),
        } => match DateTime::parse_from_rfc3339(&last_activity) {
            Ok(at) => ProbeOutcome::success(
                "Bash probe succeeded",
                Activity::LastActiveAt(at.with_timezone(&Utc)),
            ),
            Err(_) => ProbeOutcome::failure("Failed to parse last activity time"),
        },
        ExecProbeReport {
            has_activity: None,
            last_activity: None,
        } => ProbeOutcome::failure(
            "Failed to parse activity probe JSON: has_activity and last_activity are both missing",
        ),
    }
}

pub fn exec_command(exec: &ActivityProbeExec) -> Vec<String> {
    vec![
        "bash".into(),
        "-c".into(),
        format!(
            "rm -f {out}; {script}; cat {out}",
            out = exec.output_path,
            script = exec.script
        ),
    ]
}

async fn run_exec(pods: &Api<Pod>, pod_name: &str, exec: &ActivityProbeExec) -> Result<String> {
    let params = AttachParams::default()
        .container(MAIN_CONTAINER_NAME)
        .stdin(false)
        .stdout(true)
        .stderr(false);
    let mut attached = pods.exec(pod_name, exec_command(exec), &params).await?;

    let mut stdout = String::new();
    if let Some(mut reader) = attached.stdout() {
        reader
            .read_to_string(&mut stdout)
            .await
            .map_err(|e| Error::ProbeFailed(e.to_string()))?;
    }

    if let Some(status) = attached.take_status() {
        if let Some(status) = status.await {
            if status.status.as_deref() == Some("Failure") {
                return Err(Error::ProbeFailed(status.message.unwrap_or_default()));
            }
        }
    }

    Ok(stdout)
}

/// Run the kind's probe script in the workspace pod, bounded by its timeout
pub async fn probe_exec(
    pods: &Api<Pod>,
    pod_name: &str,
    exec: &ActivityProbeExec,
    now: DateTime<Utc>,
) -> ProbeOutcome {
    let timeout = Duration::from_secs(exec.timeout_seconds.max(1).unsigned_abs());

    match tokio::time::timeout(timeout, run_exec(pods, pod_name, exec)).await {
        Ok(Ok(stdout)) => parse_exec_report(&stdout, now),
        Ok(Err(e)) => {
            debug!("Exec probe in pod {pod_name} failed: {e}");
            ProbeOutcome::failure("Failed to execute command probe")
        }
        Err(_) => ProbeOutcome::timeout("Bash probe timeout"),
    }
}
