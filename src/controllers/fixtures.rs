//! A fake api server for driving reconcilers in tests

use std::sync::{Arc, Mutex};

use http::{Method, Request, Response, StatusCode};
use kube::client::Body;
use kube::Client;
use serde_json::{json, Value};

#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub method: Method,
    pub path: String,
    pub body: Value,
}

/// Answers every request through `responder` and records what was asked
pub struct MockApiServer {
    requests: Arc<Mutex<Vec<RecordedRequest>>>,
    task: tokio::task::JoinHandle<()>,
}

impl MockApiServer {
    pub fn start<F>(responder: F) -> (Client, Self)
    where
        F: Fn(&Method, &str, &Value) -> (StatusCode, Value) + Send + Sync + 'static,
    {
        let (mock_service, mut handle) = tower_test::mock::pair::<Request<Body>, Response<Body>>();
        let client = Client::new(mock_service, "default");

        let requests = Arc::new(Mutex::new(Vec::new()));
        let recorded = requests.clone();
        let task = tokio::spawn(async move {
            while let Some((request, send)) = handle.next_request().await {
                let method = request.method().clone();
                let path = request.uri().path().to_owned();
                let bytes = request.into_body().collect_bytes().await.unwrap();
                let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);

                let (status, response) = responder(&method, &path, &body);
                recorded.lock().unwrap().push(RecordedRequest { method, path, body });

                send.send_response(
                    Response::builder()
                        .status(status)
                        .body(Body::from(serde_json::to_vec(&response).unwrap()))
                        .unwrap(),
                );
            }
        });

        (client, Self { requests, task })
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().unwrap().clone()
    }

    /// Everything except reads
    pub fn writes(&self) -> Vec<RecordedRequest> {
        self.requests()
            .into_iter()
            .filter(|r| r.method != Method::GET)
            .collect()
    }

    pub fn find(&self, method: Method, path: &str) -> Option<RecordedRequest> {
        self.requests()
            .into_iter()
            .find(|r| r.method == method && r.path == path)
    }
}

impl Drop for MockApiServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

pub fn ok(value: impl serde::Serialize) -> (StatusCode, Value) {
    (StatusCode::OK, serde_json::to_value(value).unwrap())
}

pub fn list(api_version: &str, kind: &str, items: Vec<Value>) -> (StatusCode, Value) {
    (
        StatusCode::OK,
        json!({
            "apiVersion": api_version,
            "kind": format!("{kind}List"),
            "metadata": {"resourceVersion": "1"},
            "items": items,
        }),
    )
}

fn status(code: StatusCode, reason: &str) -> (StatusCode, Value) {
    (
        code,
        json!({
            "kind": "Status",
            "apiVersion": "v1",
            "metadata": {},
            "status": "Failure",
            "message": reason,
            "reason": reason,
            "code": code.as_u16(),
        }),
    )
}

pub fn not_found() -> (StatusCode, Value) {
    status(StatusCode::NOT_FOUND, "NotFound")
}

pub fn conflict() -> (StatusCode, Value) {
    status(StatusCode::CONFLICT, "Conflict")
}

/// Echo a created object back the way the api server would, filling in name from generateName
pub fn created(body: &Value) -> (StatusCode, Value) {
    let mut object = body.clone();
    let meta = &mut object["metadata"];
    if meta.get("name").is_none_or(Value::is_null) {
        let generate_name = meta["generateName"].as_str().unwrap_or_default().to_owned();
        meta["name"] = json!(format!("{generate_name}abcde"));
    }
    meta["uid"] = json!("child-uid");
    meta["resourceVersion"] = json!("1");
    (StatusCode::CREATED, object)
}
