//! In-process fake of the Appwrite REST API for tests
//!
//! Translates the HTTP surface onto the local store and identity service from
//! `rack-core`, and checks the project header and session cookie the way the
//! real API does.

use axum::{
    extract::{Path, RawQuery, Request, State},
    http::{header, HeaderMap, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, patch, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::net::TcpListener;

use rack_core::config::RackConfig;
use rack_core::identity::{IdentityService, LocalIdentityService};
use rack_core::store::{Collection, Document, DocumentData, DocumentStore, LocalDocumentStore, Query};
use rack_core::Error;

pub(crate) const PROJECT_ID: &str = "rack-test";
pub(crate) const DATABASE_ID: &str = "main";
const SESSION_COOKIE: &str = "a_session_rack";

#[derive(Clone)]
struct Backend {
    store: LocalDocumentStore,
    identity: LocalIdentityService,
}

struct FakeError(Error);

impl From<Error> for FakeError {
    fn from(err: Error) -> Self {
        Self(err)
    }
}

impl IntoResponse for FakeError {
    fn into_response(self) -> Response {
        let (status, kind) = match &self.0 {
            Error::NotFound(_) => (StatusCode::NOT_FOUND, "document_not_found"),
            Error::Unauthorized(_) => (StatusCode::UNAUTHORIZED, "user_unauthorized"),
            Error::Forbidden(_) => (StatusCode::FORBIDDEN, "user_forbidden"),
            Error::Conflict(_) => (StatusCode::CONFLICT, "user_already_exists"),
            Error::InvalidInput(_) | Error::Validation(_) => {
                (StatusCode::BAD_REQUEST, "general_argument_invalid")
            }
            _ => (StatusCode::INTERNAL_SERVER_ERROR, "general_unknown"),
        };
        let body = json!({
            "message": self.0.user_message(),
            "code": status.as_u16(),
            "type": kind,
        });
        (status, Json(body)).into_response()
    }
}

type FakeResult<T> = std::result::Result<T, FakeError>;

pub(crate) struct FakeAppwrite {
    pub base_url: String,
    pub store: LocalDocumentStore,
    pub identity: LocalIdentityService,
}

/// Route client logs to the test harness output.
pub(crate) fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("rack_remote=debug,rack_core=debug")
        .with_test_writer()
        .try_init();
}

impl FakeAppwrite {
    pub async fn start() -> Self {
        init_tracing();
        let backend = Backend {
            store: LocalDocumentStore::in_memory(),
            identity: LocalIdentityService::new(),
        };
        let app = router(backend.clone());
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        Self {
            base_url: format!("http://{}/v1", addr),
            store: backend.store,
            identity: backend.identity,
        }
    }

    /// Configuration pointing a client at this fake.
    pub fn config(&self) -> RackConfig {
        RackConfig {
            endpoint: Some(self.base_url.clone()),
            project_id: Some(PROJECT_ID.to_string()),
            database_id: Some(DATABASE_ID.to_string()),
            servers_collection_id: Some(Collection::Servers.as_str().to_string()),
            applications_collection_id: Some(Collection::Applications.as_str().to_string()),
            server_groups_collection_id: Some(Collection::ServerGroups.as_str().to_string()),
            ..RackConfig::default()
        }
    }
}

fn router(backend: Backend) -> Router {
    let documents = "/v1/databases/{db}/collections/{collection}/documents";
    Router::new()
        .route(documents, get(list_documents).post(create_document))
        .route(
            &format!("{}/{{id}}", documents),
            get(get_document).patch(update_document).delete(delete_document),
        )
        .route("/v1/account", get(get_account).post(create_account))
        .route("/v1/account/sessions/email", post(create_session))
        .route("/v1/account/sessions/current", axum::routing::delete(delete_session))
        .route("/v1/account/recovery", post(create_recovery).put(update_recovery))
        .route("/v1/account/name", patch(update_name))
        .route("/v1/account/email", patch(update_email))
        .route("/v1/account/password", patch(update_password))
        .layer(middleware::from_fn(require_project))
        .with_state(backend)
}

async fn require_project(request: Request, next: Next) -> Response {
    let project = request
        .headers()
        .get("x-appwrite-project")
        .and_then(|value| value.to_str().ok());
    if project != Some(PROJECT_ID) {
        return FakeError(Error::InvalidInput("Project is not accessible".to_string())).into_response();
    }
    next.run(request).await
}

fn require_session(headers: &HeaderMap) -> FakeResult<()> {
    let signed_in = headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .any(|cookies| cookies.contains(&format!("{}=", SESSION_COOKIE)));
    if signed_in {
        Ok(())
    } else {
        Err(Error::Unauthorized("User (role: guests) missing scope (account)".to_string()).into())
    }
}

fn collection(db: &str, name: &str) -> FakeResult<Collection> {
    if db != DATABASE_ID {
        return Err(Error::NotFound("Database not found".to_string()).into());
    }
    Collection::ALL
        .into_iter()
        .find(|collection| collection.as_str() == name)
        .ok_or_else(|| Error::NotFound("Collection not found".to_string()).into())
}

#[derive(Debug, Deserialize)]
struct WireQuery {
    method: String,
    #[serde(default)]
    attribute: Option<String>,
    #[serde(default)]
    values: Vec<Value>,
}

fn parse_queries(raw: Option<String>) -> FakeResult<Vec<Query>> {
    let mut queries = Vec::new();
    for pair in raw.unwrap_or_default().split('&').filter(|pair| !pair.is_empty()) {
        let Some((key, value)) = pair.split_once('=') else {
            continue;
        };
        let key = urlencoding::decode(key).map_err(|e| Error::InvalidInput(e.to_string()))?;
        if key != "queries[]" {
            continue;
        }
        let value = urlencoding::decode(value).map_err(|e| Error::InvalidInput(e.to_string()))?;
        let wire: WireQuery = serde_json::from_str(&value).map_err(Error::from)?;
        let first = wire.values.into_iter().next().unwrap_or(Value::Null);
        match (wire.method.as_str(), wire.attribute) {
            ("equal", Some(attribute)) => queries.push(Query::equal(attribute, first)),
            ("limit", _) => queries.push(Query::limit(first.as_u64().unwrap_or(25) as usize)),
            (method, _) => {
                return Err(Error::InvalidInput(format!("Unsupported query method {}", method)).into())
            }
        }
    }
    Ok(queries)
}

/// Add the metadata the real API puts on every document.
fn with_metadata(doc: Document, collection: Collection) -> Value {
    let mut value = json!(doc);
    if let Some(map) = value.as_object_mut() {
        map.insert("$collectionId".to_string(), json!(collection.as_str()));
        map.insert("$databaseId".to_string(), json!(DATABASE_ID));
        map.insert("$permissions".to_string(), json!([]));
    }
    value
}

async fn list_documents(
    State(backend): State<Backend>,
    Path((db, name)): Path<(String, String)>,
    headers: HeaderMap,
    RawQuery(raw): RawQuery,
) -> FakeResult<Json<Value>> {
    require_session(&headers)?;
    let collection = collection(&db, &name)?;
    let queries = parse_queries(raw)?;
    let docs = backend.store.list_documents(collection, &queries).await?;
    let documents: Vec<Value> = docs
        .into_iter()
        .map(|doc| with_metadata(doc, collection))
        .collect();
    Ok(Json(json!({ "total": documents.len(), "documents": documents })))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateDocumentRequest {
    document_id: String,
    data: DocumentData,
}

async fn create_document(
    State(backend): State<Backend>,
    Path((db, name)): Path<(String, String)>,
    headers: HeaderMap,
    Json(body): Json<CreateDocumentRequest>,
) -> FakeResult<(StatusCode, Json<Value>)> {
    require_session(&headers)?;
    let collection = collection(&db, &name)?;
    if body.document_id != "unique()" {
        return Err(Error::InvalidInput("Custom document ids are not supported".to_string()).into());
    }
    let doc = backend.store.create_document(collection, body.data).await?;
    Ok((StatusCode::CREATED, Json(with_metadata(doc, collection))))
}

async fn get_document(
    State(backend): State<Backend>,
    Path((db, name, id)): Path<(String, String, String)>,
    headers: HeaderMap,
) -> FakeResult<Json<Value>> {
    require_session(&headers)?;
    let collection = collection(&db, &name)?;
    let doc = backend.store.get_document(collection, &id).await?;
    Ok(Json(with_metadata(doc, collection)))
}

#[derive(Debug, Deserialize)]
struct UpdateDocumentRequest {
    data: DocumentData,
}

async fn update_document(
    State(backend): State<Backend>,
    Path((db, name, id)): Path<(String, String, String)>,
    headers: HeaderMap,
    Json(body): Json<UpdateDocumentRequest>,
) -> FakeResult<Json<Value>> {
    require_session(&headers)?;
    let collection = collection(&db, &name)?;
    let doc = backend.store.update_document(collection, &id, body.data).await?;
    Ok(Json(with_metadata(doc, collection)))
}

async fn delete_document(
    State(backend): State<Backend>,
    Path((db, name, id)): Path<(String, String, String)>,
    headers: HeaderMap,
) -> FakeResult<StatusCode> {
    require_session(&headers)?;
    let collection = collection(&db, &name)?;
    backend.store.delete_document(collection, &id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
struct CreateAccountRequest {
    email: String,
    password: String,
    #[serde(default)]
    name: String,
}

async fn create_account(
    State(backend): State<Backend>,
    Json(body): Json<CreateAccountRequest>,
) -> FakeResult<(StatusCode, Json<Value>)> {
    let principal = backend
        .identity
        .create_account(&body.email, &body.password, &body.name)
        .await?;
    Ok((StatusCode::CREATED, Json(json!(principal))))
}

async fn get_account(State(backend): State<Backend>, headers: HeaderMap) -> FakeResult<Json<Value>> {
    require_session(&headers)?;
    let principal = backend
        .identity
        .current_account()
        .await?
        .ok_or_else(|| Error::Unauthorized("No active session".to_string()))?;
    Ok(Json(json!(principal)))
}

#[derive(Debug, Deserialize)]
struct CreateSessionRequest {
    email: String,
    password: String,
}

async fn create_session(
    State(backend): State<Backend>,
    Json(body): Json<CreateSessionRequest>,
) -> FakeResult<Response> {
    let principal = backend
        .identity
        .create_session(&body.email, &body.password)
        .await?;
    let cookie = format!("{}={}; Path=/; HttpOnly", SESSION_COOKIE, principal.id);
    Ok((
        StatusCode::CREATED,
        [(header::SET_COOKIE, cookie)],
        Json(json!({ "$id": "current", "userId": principal.id })),
    )
        .into_response())
}

async fn delete_session(State(backend): State<Backend>, headers: HeaderMap) -> FakeResult<Response> {
    require_session(&headers)?;
    backend.identity.delete_session().await?;
    let cookie = format!("{}=; Path=/; Max-Age=0", SESSION_COOKIE);
    Ok((StatusCode::NO_CONTENT, [(header::SET_COOKIE, cookie)]).into_response())
}

#[derive(Debug, Deserialize)]
struct CreateRecoveryRequest {
    email: String,
    url: String,
}

async fn create_recovery(
    State(backend): State<Backend>,
    Json(body): Json<CreateRecoveryRequest>,
) -> FakeResult<(StatusCode, Json<Value>)> {
    backend.identity.create_recovery(&body.email, &body.url).await?;
    Ok((StatusCode::CREATED, Json(json!({ "$id": "recovery" }))))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UpdateRecoveryRequest {
    user_id: String,
    secret: String,
    password: String,
}

async fn update_recovery(
    State(backend): State<Backend>,
    Json(body): Json<UpdateRecoveryRequest>,
) -> FakeResult<Json<Value>> {
    backend
        .identity
        .update_recovery(&body.user_id, &body.secret, &body.password)
        .await?;
    Ok(Json(json!({ "$id": "recovery" })))
}

#[derive(Debug, Deserialize)]
struct UpdateNameRequest {
    name: String,
}

async fn update_name(
    State(backend): State<Backend>,
    headers: HeaderMap,
    Json(body): Json<UpdateNameRequest>,
) -> FakeResult<Json<Value>> {
    require_session(&headers)?;
    Ok(Json(json!(backend.identity.update_name(&body.name).await?)))
}

#[derive(Debug, Deserialize)]
struct UpdateEmailRequest {
    email: String,
    password: String,
}

async fn update_email(
    State(backend): State<Backend>,
    headers: HeaderMap,
    Json(body): Json<UpdateEmailRequest>,
) -> FakeResult<Json<Value>> {
    require_session(&headers)?;
    let principal = backend
        .identity
        .update_email(&body.email, &body.password)
        .await?;
    Ok(Json(json!(principal)))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UpdatePasswordRequest {
    password: String,
    old_password: String,
}

async fn update_password(
    State(backend): State<Backend>,
    headers: HeaderMap,
    Json(body): Json<UpdatePasswordRequest>,
) -> FakeResult<Json<Value>> {
    require_session(&headers)?;
    let principal = backend
        .identity
        .update_password(&body.password, &body.old_password)
        .await?;
    Ok(Json(json!(principal)))
}
