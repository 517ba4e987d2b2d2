//! In-process stand-in for the management appliance.
//!
//! # Design
//! Serves just enough of the REST surface to drive the client end to end:
//! FCoE network CRUD answering with task references, scripted tasks that
//! advance one state per GET, an octet-stream download, a multipart upload,
//! fixed-status routes for the error table and a few oddities (204, a
//! redirect loop, a slow route for pool tests). Every request is recorded
//! so tests can assert on exactly what the client sent.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::{
    body::Bytes,
    extract::{Path, Query, Request, State},
    http::{header, HeaderMap, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::{net::TcpListener, sync::RwLock};
use uuid::Uuid;

/// File name served by the download route.
pub const DOWNLOAD_FILE_NAME: &str = "a:b,c.txt";
/// Contents served by the download route.
pub const DOWNLOAD_CONTENTS: &[u8] = b"support dump contents\n";
/// Members in the `/rest/large` collection; the body runs past 12 MiB.
pub const LARGE_MEMBER_COUNT: usize = 60_000;

/// A stored FCoE network.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FcoeNetwork {
    #[serde(rename = "type")]
    pub kind: String,
    pub uri: String,
    pub name: String,
    pub vlan_id: u32,
    #[serde(default)]
    pub description: Option<String>,
}

/// One request as the appliance saw it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RecordedRequest {
    pub method: String,
    pub path: String,
    pub query: Option<String>,
    pub headers: Vec<(String, String)>,
}

impl RecordedRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

#[derive(Clone, Debug)]
struct ScriptedTask {
    name: String,
    resource_uri: Option<String>,
    states: Vec<String>,
    cursor: usize,
}

/// Shared appliance state.
#[derive(Debug)]
pub struct Appliance {
    networks: RwLock<HashMap<String, FcoeNetwork>>,
    tasks: RwLock<HashMap<String, ScriptedTask>>,
    task_script: Vec<String>,
    current_version: u32,
    requests: Mutex<Vec<RecordedRequest>>,
    slow_in_flight: AtomicUsize,
    slow_peak: AtomicUsize,
}

pub type SharedAppliance = Arc<Appliance>;

impl Default for Appliance {
    fn default() -> Self {
        Self::with_task_script(&["Running", "Completed"])
    }
}

impl Appliance {
    /// New tasks walk through `states`, one per GET, then stay on the last.
    pub fn with_task_script(states: &[&str]) -> Self {
        Self {
            networks: RwLock::new(HashMap::new()),
            tasks: RwLock::new(HashMap::new()),
            task_script: states.iter().map(|s| s.to_string()).collect(),
            current_version: 600,
            requests: Mutex::new(Vec::new()),
            slow_in_flight: AtomicUsize::new(0),
            slow_peak: AtomicUsize::new(0),
        }
    }

    /// Requests seen so far, oldest first.
    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests
            .lock()
            .map(|log| log.clone())
            .unwrap_or_default()
    }

    /// Requests whose path equals `path`.
    pub fn requests_to(&self, path: &str) -> Vec<RecordedRequest> {
        self.requests().into_iter().filter(|r| r.path == path).collect()
    }

    /// Highest number of concurrent requests the slow route served.
    pub fn slow_peak(&self) -> usize {
        self.slow_peak.load(Ordering::SeqCst)
    }

    /// Register a task following `states` and return its id.
    pub async fn add_task(&self, name: &str, states: &[&str]) -> String {
        let id = Uuid::new_v4().to_string();
        let task = ScriptedTask {
            name: name.to_string(),
            resource_uri: None,
            states: states.iter().map(|s| s.to_string()).collect(),
            cursor: 0,
        };
        self.tasks.write().await.insert(id.clone(), task);
        id
    }

    async fn start_task(&self, name: &str, resource_uri: Option<String>) -> String {
        let id = Uuid::new_v4().to_string();
        let task = ScriptedTask {
            name: name.to_string(),
            resource_uri,
            states: self.task_script.clone(),
            cursor: 0,
        };
        self.tasks.write().await.insert(id.clone(), task);
        id
    }
}

pub fn app() -> Router {
    app_with_state(Arc::new(Appliance::default()))
}

pub fn app_with_state(state: SharedAppliance) -> Router {
    Router::new()
        .route("/rest/version", get(version))
        .route("/rest/fcoe-networks", get(list_networks).post(create_network))
        .route(
            "/rest/fcoe-networks/{id}",
            get(get_network)
                .put(update_network)
                .patch(patch_network)
                .delete(delete_network),
        )
        .route("/rest/tasks/{id}", get(get_task))
        .route("/rest/artifact-bundles", post(upload_bundle))
        .route("/rest/artifact-bundles/download/{id}", get(download_bundle))
        .route("/rest/fc-sans/managed-sans/{id}/issues", post(issues_report))
        .route("/rest/fc-sans/managed-sans/{id}/endpoints", post(endpoints_csv))
        .route("/rest/status/{code}", get(fixed_status))
        .route("/rest/empty", get(no_content))
        .route("/rest/accepted", post(accepted_fixed))
        .route("/rest/loop", get(redirect_loop))
        .route("/rest/slow", get(slow))
        .route("/rest/large", get(large_collection))
        .route("/rest/echo", post(echo))
        .layer(middleware::from_fn_with_state(state.clone(), record))
        .with_state(state)
}

pub async fn run(listener: TcpListener) -> Result<(), std::io::Error> {
    run_with_state(listener, Arc::new(Appliance::default())).await
}

pub async fn run_with_state(listener: TcpListener, state: SharedAppliance) -> Result<(), std::io::Error> {
    axum::serve(listener, app_with_state(state)).await
}

async fn record(State(state): State<SharedAppliance>, request: Request, next: Next) -> Response {
    let recorded = RecordedRequest {
        method: request.method().to_string(),
        path: request.uri().path().to_string(),
        query: request.uri().query().map(str::to_string),
        headers: request
            .headers()
            .iter()
            .filter_map(|(k, v)| v.to_str().ok().map(|v| (k.as_str().to_string(), v.to_string())))
            .collect(),
    };
    if let Ok(mut log) = state.requests.lock() {
        log.push(recorded);
    }
    next.run(request).await
}

fn error_body(status: StatusCode, message: &str) -> Response {
    (
        status,
        Json(json!({"errorCode": status.as_u16().to_string(), "message": message})),
    )
        .into_response()
}

/// 202 with an empty body and an absolute `Location` pointing at the task.
fn task_accepted(headers: &HeaderMap, task_id: &str) -> Response {
    let host = headers
        .get(header::HOST)
        .and_then(|h| h.to_str().ok())
        .unwrap_or("localhost");
    (
        StatusCode::ACCEPTED,
        [(header::LOCATION, format!("http://{host}/rest/tasks/{task_id}"))],
    )
        .into_response()
}

async fn version(State(state): State<SharedAppliance>) -> Json<Value> {
    Json(json!({"currentVersion": state.current_version, "minimumVersion": 120}))
}

fn collection(members: Vec<FcoeNetwork>) -> Value {
    json!({
        "type": "FcoeNetworkCollection",
        "uri": "/rest/fcoe-networks",
        "category": "fcoe-networks",
        "start": 0,
        "count": members.len(),
        "total": members.len(),
        "members": members,
    })
}

async fn list_networks(
    State(state): State<SharedAppliance>,
    Query(query): Query<HashMap<String, String>>,
) -> Json<Value> {
    let networks = state.networks.read().await;
    let wanted = query
        .get("filter")
        .and_then(|f| f.strip_prefix("name='"))
        .and_then(|f| f.strip_suffix('\''));
    let mut members: Vec<FcoeNetwork> = networks
        .values()
        .filter(|n| wanted.is_none_or(|name| n.name == name))
        .cloned()
        .collect();
    members.sort_by(|a, b| a.name.cmp(&b.name));
    Json(collection(members))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct NetworkInput {
    name: Option<String>,
    vlan_id: Option<u32>,
    description: Option<String>,
}

async fn create_network(
    State(state): State<SharedAppliance>,
    headers: HeaderMap,
    Json(input): Json<NetworkInput>,
) -> Response {
    let Some(name) = input.name.filter(|n| !n.is_empty()) else {
        return error_body(StatusCode::BAD_REQUEST, "name is required");
    };
    let id = Uuid::new_v4().to_string();
    let network = FcoeNetwork {
        kind: "fcoe-networkV300".to_string(),
        uri: format!("/rest/fcoe-networks/{id}"),
        name,
        vlan_id: input.vlan_id.unwrap_or(1),
        description: input.description,
    };
    let uri = network.uri.clone();
    state.networks.write().await.insert(id, network);
    let task_id = state.start_task("Create", Some(uri)).await;
    task_accepted(&headers, &task_id)
}

async fn get_network(State(state): State<SharedAppliance>, Path(id): Path<String>) -> Response {
    match state.networks.read().await.get(&id) {
        Some(network) => Json(network.clone()).into_response(),
        None => error_body(StatusCode::NOT_FOUND, "resource not found"),
    }
}

async fn update_network(
    State(state): State<SharedAppliance>,
    Path(id): Path<String>,
    headers: HeaderMap,
    Json(input): Json<NetworkInput>,
) -> Response {
    let uri = {
        let mut networks = state.networks.write().await;
        let Some(network) = networks.get_mut(&id) else {
            return error_body(StatusCode::NOT_FOUND, "resource not found");
        };
        if let Some(name) = input.name {
            network.name = name;
        }
        if let Some(vlan_id) = input.vlan_id {
            network.vlan_id = vlan_id;
        }
        if input.description.is_some() {
            network.description = input.description;
        }
        network.uri.clone()
    };
    let task_id = state.start_task("Update", Some(uri)).await;
    task_accepted(&headers, &task_id)
}

async fn patch_network(
    State(state): State<SharedAppliance>,
    Path(id): Path<String>,
    headers: HeaderMap,
    Json(ops): Json<Value>,
) -> Response {
    let Some(ops) = ops.as_array() else {
        return error_body(StatusCode::BAD_REQUEST, "patch body must be an array");
    };
    let uri = {
        let mut networks = state.networks.write().await;
        let Some(network) = networks.get_mut(&id) else {
            return error_body(StatusCode::NOT_FOUND, "resource not found");
        };
        for op in ops {
            if op.get("op").and_then(Value::as_str) != Some("replace") {
                return error_body(StatusCode::BAD_REQUEST, "only replace is supported");
            }
            match (op.get("path").and_then(Value::as_str), op.get("value")) {
                (Some("/name"), Some(Value::String(name))) => network.name = name.clone(),
                (Some("/description"), Some(Value::String(d))) => network.description = Some(d.clone()),
                _ => return error_body(StatusCode::BAD_REQUEST, "unsupported patch path"),
            }
        }
        network.uri.clone()
    };
    let task_id = state.start_task("Patch", Some(uri)).await;
    task_accepted(&headers, &task_id)
}

async fn delete_network(
    State(state): State<SharedAppliance>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Response {
    if state.networks.write().await.remove(&id).is_none() {
        return error_body(StatusCode::NOT_FOUND, "resource not found");
    }
    let task_id = state.start_task("Delete", None).await;
    task_accepted(&headers, &task_id)
}

async fn get_task(State(state): State<SharedAppliance>, Path(id): Path<String>) -> Response {
    let mut tasks = state.tasks.write().await;
    let Some(task) = tasks.get_mut(&id) else {
        return error_body(StatusCode::NOT_FOUND, "task not found");
    };
    let last = task.states.len().saturating_sub(1);
    let task_state = task
        .states
        .get(task.cursor.min(last))
        .cloned()
        .unwrap_or_else(|| "Unknown".to_string());
    task.cursor = (task.cursor + 1).min(last);

    let terminal = matches!(
        task_state.as_str(),
        "Completed" | "Terminated" | "Error" | "Killed" | "Interrupted" | "Warning"
    );
    let errors = if matches!(task_state.as_str(), "Error" | "Warning") {
        json!([{"errorCode": "MOCK_FAILURE", "message": format!("{} failed", task.name), "recommendedActions": ["retry"]}])
    } else {
        json!([])
    };
    Json(json!({
        "type": "TaskResourceV2",
        "uri": format!("/rest/tasks/{id}"),
        "name": task.name,
        "taskState": task_state,
        "percentComplete": if terminal { 100 } else { 50 },
        "taskErrors": errors,
        "associatedResource": task.resource_uri.as_ref().map(|uri| json!({"resourceUri": uri})),
    }))
    .into_response()
}

async fn upload_bundle(State(state): State<SharedAppliance>, headers: HeaderMap, body: Bytes) -> Response {
    let is_multipart = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.starts_with("multipart/form-data; boundary="));
    let text = String::from_utf8_lossy(&body);
    if !is_multipart || !text.contains("name=\"file\"") {
        return error_body(StatusCode::UNSUPPORTED_MEDIA_TYPE, "expected a multipart file upload");
    }
    let task_id = state.start_task("Upload", None).await;
    task_accepted(&headers, &task_id)
}

async fn download_bundle(Path(_id): Path<String>) -> Response {
    (
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, "application/octet-stream".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{DOWNLOAD_FILE_NAME}\""),
            ),
        ],
        DOWNLOAD_CONTENTS,
    )
        .into_response()
}

/// Answers with a plain body and the task only in `Location`.
async fn issues_report(State(state): State<SharedAppliance>, Path(id): Path<String>) -> Response {
    let task_id = state.start_task("Issues report", None).await;
    let mut response = Json(json!({"uri": format!("/rest/fc-sans/managed-sans/{id}")})).into_response();
    if let Ok(location) = format!("/rest/tasks/{task_id}").parse() {
        response.headers_mut().insert(header::LOCATION, location);
    }
    response
}

async fn endpoints_csv(Path(id): Path<String>) -> String {
    format!("/rest/fc-sans/managed-sans/{id}/endpoints.csv")
}

async fn fixed_status(Path(code): Path<u16>) -> Response {
    let status = StatusCode::from_u16(code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    error_body(status, &format!("status {code}"))
}

async fn no_content() -> StatusCode {
    StatusCode::NO_CONTENT
}

/// Always points at a task with the fixed id `T1`.
async fn accepted_fixed(State(state): State<SharedAppliance>, headers: HeaderMap) -> Response {
    {
        let mut tasks = state.tasks.write().await;
        tasks.entry("T1".to_string()).or_insert_with(|| ScriptedTask {
            name: "Fixed".to_string(),
            resource_uri: None,
            states: vec!["Completed".to_string()],
            cursor: 0,
        });
    }
    task_accepted(&headers, "T1")
}

async fn redirect_loop() -> Response {
    (StatusCode::ACCEPTED, [(header::LOCATION, "/rest/loop")]).into_response()
}

async fn slow(State(state): State<SharedAppliance>) -> Json<Value> {
    let now = state.slow_in_flight.fetch_add(1, Ordering::SeqCst) + 1;
    state.slow_peak.fetch_max(now, Ordering::SeqCst);
    tokio::time::sleep(Duration::from_millis(150)).await;
    state.slow_in_flight.fetch_sub(1, Ordering::SeqCst);
    Json(json!({"ok": true}))
}

async fn large_collection() -> Json<Value> {
    let filler = "x".repeat(200);
    let members: Vec<Value> = (0..LARGE_MEMBER_COUNT)
        .map(|i| {
            json!({
                "type": "server-hardware",
                "uri": format!("/rest/server-hardware/{i}"),
                "name": format!("enclosure-1, bay {i}"),
                "description": filler,
            })
        })
        .collect();
    Json(json!({
        "type": "server-hardware-list",
        "start": 0,
        "count": members.len(),
        "total": members.len(),
        "members": members,
    }))
}

/// Plain 200 resource: the received body and content type, no `taskState`.
async fn echo(headers: HeaderMap, body: Bytes) -> Json<Value> {
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    Json(json!({
        "uri": "/rest/echo",
        "contentType": content_type,
        "body": String::from_utf8_lossy(&body),
    }))
}
