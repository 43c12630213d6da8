/**
 * MOCK PARK API - in-process HTTP server for integration tests
 *
 * ROLE:
 * Serves the park/ecological JSON API on 127.0.0.1:<random port> so the
 * real HttpResource can be exercised end to end without the Flask backends.
 *
 * BEHAVIOUR:
 * - Collections are registered with an id field and an envelope style
 *   (bare array, `data` + pagination, or a keyed `{success, <key>: [...]}`)
 * - GET    /api/{collection}        read, honours page/per_page and equality filters
 * - POST   /api/{collection}        create, 400 with field errors on missing fields
 * - PUT    /api/{collection}/{id}   shallow merge, returns the record or an ack
 * - DELETE /api/{collection}/{id}   404 when already gone
 * - Bearer token checked on every route when configured (401 otherwise)
 *
 * Scripted failures let a test force the next request on a collection to fail.
 */

use axum::extract::{Path, Query, Request, State};
use axum::http::{header, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, put};
use axum::{Json, Router};
use parking_lot::Mutex;
use serde_json::{json, Map, Value};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::task::JoinHandle;

pub type Shared<T> = Arc<Mutex<T>>;

#[derive(Debug, Clone, PartialEq)]
pub enum EnvelopeStyle {
    Bare,
    Paginated,
    Keyed(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum AckStyle {
    /// Update answers with the merged record
    Record,
    /// Update answers with `{success: true, message}`
    Message,
}

#[derive(Debug, Clone)]
struct Collection {
    id_field: String,
    envelope: EnvelopeStyle,
    ack: AckStyle,
    required: Vec<String>,
    records: Vec<Value>,
    failures: VecDeque<(StatusCode, Value)>,
}

#[derive(Default)]
struct ApiState {
    collections: HashMap<String, Collection>,
    token: Option<String>,
}

#[derive(Clone)]
struct AppState {
    api: Shared<ApiState>,
    requests: Arc<AtomicU64>,
    next_id: Arc<AtomicU64>,
}

/// Handle to a running mock server; the server stops when this is dropped
pub struct MockParkApi {
    addr: SocketAddr,
    state: AppState,
    server: JoinHandle<()>,
}

impl MockParkApi {
    pub async fn start() -> anyhow::Result<Self> {
        let state = AppState {
            api: Arc::new(Mutex::new(ApiState::default())),
            requests: Arc::new(AtomicU64::new(0)),
            next_id: Arc::new(AtomicU64::new(1000)),
        };
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let app = build_router(state.clone());
        let server = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app).await {
                log::error!("mock park API stopped: {e}");
            }
        });
        log::info!("🧪 mock park API listening on {addr}");
        Ok(Self {
            addr,
            state,
            server,
        })
    }

    /// Base URL to put in `SyncConfig::base_url`
    pub fn base_url(&self) -> String {
        format!("http://{}/api", self.addr)
    }

    pub fn require_token(&self, token: &str) {
        self.state.api.lock().token = Some(token.to_string());
    }

    pub fn add_collection(&self, name: &str, id_field: &str, envelope: EnvelopeStyle) {
        self.state.api.lock().collections.insert(
            name.to_string(),
            Collection {
                id_field: id_field.to_string(),
                envelope,
                ack: AckStyle::Record,
                required: Vec::new(),
                records: Vec::new(),
                failures: VecDeque::new(),
            },
        );
    }

    pub fn set_ack_style(&self, name: &str, ack: AckStyle) {
        if let Some(c) = self.state.api.lock().collections.get_mut(name) {
            c.ack = ack;
        }
    }

    /// Fields a POST must carry, otherwise 400 with per-field errors
    pub fn require_fields(&self, name: &str, fields: &[&str]) {
        if let Some(c) = self.state.api.lock().collections.get_mut(name) {
            c.required = fields.iter().map(|f| f.to_string()).collect();
        }
    }

    pub fn seed(&self, name: &str, records: Vec<Value>) {
        if let Some(c) = self.state.api.lock().collections.get_mut(name) {
            c.records = records;
        }
    }

    pub fn records(&self, name: &str) -> Vec<Value> {
        self.state
            .api
            .lock()
            .collections
            .get(name)
            .map(|c| c.records.clone())
            .unwrap_or_default()
    }

    /// The next request on `name` answers `status` with `body`
    pub fn fail_next(&self, name: &str, status: u16, body: Value) {
        if let Some(c) = self.state.api.lock().collections.get_mut(name) {
            let status = StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
            c.failures.push_back((status, body));
        }
    }

    pub fn request_count(&self) -> u64 {
        self.state.requests.load(Ordering::SeqCst)
    }
}

impl Drop for MockParkApi {
    fn drop(&mut self) {
        self.server.abort();
    }
}

fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/api/{collection}", get(list_records).post(create_record))
        .route("/api/{collection}/{id}", put(update_record).delete(delete_record))
        .layer(middleware::from_fn_with_state(state.clone(), require_bearer))
        .with_state(state)
}

async fn require_bearer(State(app): State<AppState>, req: Request, next: Next) -> Response {
    app.requests.fetch_add(1, Ordering::SeqCst);
    let expected = app.api.lock().token.clone();
    if let Some(expected) = expected {
        let ok = req
            .headers()
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .is_some_and(|v| v == expected);
        if !ok {
            log::warn!("🔒 rejected request without a valid bearer token");
            return (
                StatusCode::UNAUTHORIZED,
                Json(json!({"success": false, "message": "token invalid or expired"})),
            )
                .into_response();
        }
    }
    next.run(req).await
}

fn not_found(what: &str) -> Response {
    (StatusCode::NOT_FOUND, Json(json!({"success": false, "error": format!("{what} not found")}))).into_response()
}

fn id_of(record: &Value, id_field: &str) -> Option<String> {
    match record.get(id_field)? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Pops a scripted failure for the collection, if any
fn scripted_failure(collection: &mut Collection) -> Option<Response> {
    collection
        .failures
        .pop_front()
        .map(|(status, body)| (status, Json(body)).into_response())
}

// GET /api/{collection}
async fn list_records(
    State(app): State<AppState>,
    Path(name): Path<String>,
    Query(params): Query<BTreeMap<String, String>>,
) -> Response {
    let mut api = app.api.lock();
    let Some(collection) = api.collections.get_mut(&name) else {
        return not_found(&name);
    };
    if let Some(failure) = scripted_failure(collection) {
        return failure;
    }

    let filtered: Vec<Value> = collection
        .records
        .iter()
        .filter(|r| {
            params.iter().all(|(key, wanted)| {
                if key == "page" || key == "per_page" {
                    return true;
                }
                match r.get(key) {
                    Some(Value::String(s)) => s == wanted,
                    Some(other) => &other.to_string() == wanted,
                    None => false,
                }
            })
        })
        .cloned()
        .collect();

    match &collection.envelope {
        EnvelopeStyle::Bare => Json(Value::Array(filtered)).into_response(),
        EnvelopeStyle::Keyed(key) => {
            let mut body = Map::new();
            body.insert("success".into(), Value::Bool(true));
            body.insert(key.clone(), Value::Array(filtered));
            Json(Value::Object(body)).into_response()
        }
        EnvelopeStyle::Paginated => {
            let page: usize = params.get("page").and_then(|p| p.parse().ok()).unwrap_or(1).max(1);
            let per_page: usize = params.get("per_page").and_then(|p| p.parse().ok()).unwrap_or(20).max(1);
            let total = filtered.len();
            let items: Vec<Value> = filtered.into_iter().skip((page - 1) * per_page).take(per_page).collect();
            Json(json!({
                "success": true,
                "data": items,
                "pagination": {
                    "page": page,
                    "per_page": per_page,
                    "total": total,
                    "pages": total.div_ceil(per_page),
                }
            }))
            .into_response()
        }
    }
}

// POST /api/{collection}
async fn create_record(
    State(app): State<AppState>,
    Path(name): Path<String>,
    Json(payload): Json<Value>,
) -> Response {
    let mut api = app.api.lock();
    let Some(collection) = api.collections.get_mut(&name) else {
        return not_found(&name);
    };
    if let Some(failure) = scripted_failure(collection) {
        return failure;
    }
    let Value::Object(mut fields) = payload else {
        return (StatusCode::BAD_REQUEST, Json(json!({"error": "expected a JSON object"}))).into_response();
    };

    let missing: Map<String, Value> = collection
        .required
        .iter()
        .filter(|f| fields.get(f.as_str()).map_or(true, |v| v.is_null() || v.as_str() == Some("")))
        .map(|f| (f.clone(), Value::String(format!("{f} is required"))))
        .collect();
    if !missing.is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({"success": false, "error": "validation failed", "errors": missing})),
        )
            .into_response();
    }

    let id_field = collection.id_field.clone();
    if !fields.contains_key(&id_field) {
        let id = app.next_id.fetch_add(1, Ordering::SeqCst);
        fields.insert(id_field.clone(), Value::String(id.to_string()));
    }
    fields.insert("created_at".into(), Value::String("2024-05-01 12:00:00".into()));
    let record = Value::Object(fields);
    let id = id_of(&record, &id_field).unwrap_or_default();
    collection.records.retain(|r| id_of(r, &id_field).as_deref() != Some(id.as_str()));
    collection.records.push(record.clone());
    log::info!("➕ [{name}] created {id}");
    (StatusCode::CREATED, Json(record)).into_response()
}

// PUT /api/{collection}/{id}
async fn update_record(
    State(app): State<AppState>,
    Path((name, id)): Path<(String, String)>,
    Json(patch): Json<Value>,
) -> Response {
    let mut api = app.api.lock();
    let Some(collection) = api.collections.get_mut(&name) else {
        return not_found(&name);
    };
    if let Some(failure) = scripted_failure(collection) {
        return failure;
    }
    let id_field = collection.id_field.clone();
    let ack = collection.ack.clone();
    let Some(record) = collection
        .records
        .iter_mut()
        .find(|r| id_of(r, &id_field).as_deref() == Some(id.as_str()))
    else {
        return not_found(&id);
    };

    if let (Value::Object(target), Value::Object(patch)) = (record, patch) {
        for (key, value) in patch {
            if key != id_field {
                target.insert(key, value);
            }
        }
        log::info!("✏️ [{name}] updated {id}");
        match ack {
            AckStyle::Record => Json(Value::Object(target.clone())).into_response(),
            AckStyle::Message => Json(json!({"success": true, "message": "updated"})).into_response(),
        }
    } else {
        (StatusCode::BAD_REQUEST, Json(json!({"error": "expected a JSON object"}))).into_response()
    }
}

// DELETE /api/{collection}/{id}
async fn delete_record(State(app): State<AppState>, Path((name, id)): Path<(String, String)>) -> Response {
    let mut api = app.api.lock();
    let Some(collection) = api.collections.get_mut(&name) else {
        return not_found(&name);
    };
    if let Some(failure) = scripted_failure(collection) {
        return failure;
    }
    let id_field = collection.id_field.clone();
    let before = collection.records.len();
    collection
        .records
        .retain(|r| id_of(r, &id_field).as_deref() != Some(id.as_str()));
    if collection.records.len() == before {
        return not_found(&id);
    }
    log::info!("🗑️ [{name}] deleted {id}");
    Json(json!({"success": true})).into_response()
}
