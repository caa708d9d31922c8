// clipkeeper - Daemon HTTP Routes
// axum handlers over the shared history and snippet stores

use std::sync::Arc;

use axum::async_trait;
use axum::extract::{FromRequest, FromRequestParts, Path, Query, Request, State};
use axum::http::request::Parts;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post, put};
use axum::{Json, Router};
use serde::de::DeserializeOwned;
use serde::Deserialize;

use super::DaemonState;
use crate::api::{
    CaptureRequest, CreateFolderRequest, CreateSnippetRequest, ErrorBody, HealthResponse,
    MoveSnippetRequest, RenameFolderRequest, SearchResponse, SnippetExport, StatsResponse,
    SuccessResponse, SERVICE_NAME,
};
use crate::error::StoreError;
use crate::model::{ClipItem, HistoryFolder, Snippet, SnippetFolder};
use crate::store::{Imported, SnippetPatch};

/// Error response with a JSON `{error, detail}` body
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    detail: String,
}

impl ApiError {
    fn bad_request(detail: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            detail: detail.into(),
        }
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        let status = match &err {
            StoreError::Invalid(_) => StatusCode::BAD_REQUEST,
            StoreError::NotFound { .. } => StatusCode::NOT_FOUND,
            StoreError::FolderExists(_) => StatusCode::CONFLICT,
        };
        Self {
            status,
            detail: err.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: self
                .status
                .canonical_reason()
                .unwrap_or("error")
                .to_string(),
            detail: self.detail,
        };
        (self.status, Json(body)).into_response()
    }
}

/// JSON body whose rejection is reported as a 400 `ApiError`
pub struct ApiJson<T>(pub T);

#[async_trait]
impl<T, S> FromRequest<S> for ApiJson<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        match Json::<T>::from_request(req, state).await {
            Ok(Json(value)) => Ok(Self(value)),
            Err(rejection) => Err(ApiError::bad_request(rejection.body_text())),
        }
    }
}

/// Query string whose rejection is reported as a 400 `ApiError`
pub struct ApiQuery<T>(pub T);

#[async_trait]
impl<T, S> FromRequestParts<S> for ApiQuery<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        match Query::<T>::from_request_parts(parts, state).await {
            Ok(Query(value)) => Ok(Self(value)),
            Err(rejection) => Err(ApiError::bad_request(rejection.body_text())),
        }
    }
}

type ApiResult<T> = Result<Json<T>, ApiError>;
type SharedState = State<Arc<DaemonState>>;

pub fn router(state: Arc<DaemonState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/stats", get(stats))
        .route(
            "/history",
            get(history).post(capture).delete(clear_history),
        )
        .route("/history/recent", get(recent_history))
        .route("/history/folders", get(history_folders))
        .route("/history/:id", delete(delete_history_item))
        .route("/snippets", get(all_snippets).post(create_snippet))
        .route("/snippets/:folder", get(folder_snippets))
        .route(
            "/snippets/:folder/:id",
            put(update_snippet).delete(delete_snippet),
        )
        .route("/snippets/:folder/:id/move", post(move_snippet))
        .route("/folders", get(list_folders).post(create_folder))
        .route("/folders/:name", put(rename_folder).delete(delete_folder))
        .route("/search", get(search))
        .route("/export", get(export_snippets))
        .route("/import", post(import_snippets))
        .with_state(state)
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        service: SERVICE_NAME.to_string(),
        pid: std::process::id(),
    })
}

async fn stats(State(state): SharedState) -> Json<StatsResponse> {
    let history = state.history.read().await;
    let snippets = state.snippets.read().await;
    Json(StatsResponse {
        history_count: history.len(),
        max_history_size: history.limits().max_items,
        folder_count: snippets.folders().len(),
        snippet_count: snippets.snippet_count(),
        uptime_secs: state.uptime().as_secs(),
    })
}

// History

#[derive(Deserialize)]
struct HistoryQuery {
    limit: Option<usize>,
}

async fn history(
    State(state): SharedState,
    ApiQuery(query): ApiQuery<HistoryQuery>,
) -> Json<Vec<ClipItem>> {
    let history = state.history.read().await;
    let items = history.items();
    let limit = query.limit.unwrap_or(items.len()).min(items.len());
    Json(items[..limit].to_vec())
}

async fn recent_history(State(state): SharedState) -> Json<Vec<ClipItem>> {
    Json(state.history.read().await.recent().to_vec())
}

async fn history_folders(State(state): SharedState) -> Json<Vec<HistoryFolder>> {
    Json(state.history.read().await.folders())
}

async fn capture(
    State(state): SharedState,
    ApiJson(request): ApiJson<CaptureRequest>,
) -> ApiResult<ClipItem> {
    let captured = state
        .history
        .write()
        .await
        .capture(&request.content, request.source_app.as_deref())?;
    tracing::debug!(id = %captured.item.id, promoted = captured.promoted, "captured clip");
    Ok(Json(captured.item))
}

async fn delete_history_item(
    State(state): SharedState,
    Path(id): Path<String>,
) -> ApiResult<SuccessResponse> {
    state.history.write().await.delete(&id)?;
    Ok(Json(SuccessResponse::ok("Item deleted")))
}

async fn clear_history(State(state): SharedState) -> Json<SuccessResponse> {
    state.history.write().await.clear();
    Json(SuccessResponse::ok("History cleared"))
}

// Snippets

async fn all_snippets(State(state): SharedState) -> Json<Vec<SnippetFolder>> {
    Json(state.snippets.read().await.folders().to_vec())
}

async fn folder_snippets(
    State(state): SharedState,
    Path(folder): Path<String>,
) -> ApiResult<Vec<Snippet>> {
    let snippets = state.snippets.read().await;
    let folder = snippets
        .folder(&folder)
        .ok_or_else(|| StoreError::folder_not_found(&folder))?;
    Ok(Json(folder.snippets.clone()))
}

async fn create_snippet(
    State(state): SharedState,
    ApiJson(request): ApiJson<CreateSnippetRequest>,
) -> ApiResult<Snippet> {
    let (content, default_name) = match (&request.clip_id, &request.content) {
        (Some(clip_id), _) => {
            if clip_id.trim().is_empty() {
                return Err(ApiError::bad_request("clip_id cannot be empty"));
            }
            let history = state.history.read().await;
            let item = history
                .get(clip_id)
                .ok_or_else(|| StoreError::clip_not_found(clip_id))?;
            (item.content.clone(), item.display.clone())
        }
        (None, Some(content)) => (content.clone(), crate::model::display_string(content, 30)),
        (None, None) => return Err(ApiError::bad_request("either clip_id or content is required")),
    };
    let name = request
        .name
        .filter(|n| !n.trim().is_empty())
        .unwrap_or(default_name);

    let snippet =
        state
            .snippets
            .write()
            .await
            .add_snippet(&request.folder, &content, &name, request.tags)?;
    Ok(Json(snippet))
}

async fn update_snippet(
    State(state): SharedState,
    Path((folder, id)): Path<(String, String)>,
    ApiJson(patch): ApiJson<SnippetPatch>,
) -> ApiResult<Snippet> {
    let snippet = state
        .snippets
        .write()
        .await
        .update_snippet(&folder, &id, patch)?;
    Ok(Json(snippet))
}

async fn delete_snippet(
    State(state): SharedState,
    Path((folder, id)): Path<(String, String)>,
) -> ApiResult<SuccessResponse> {
    state.snippets.write().await.delete_snippet(&folder, &id)?;
    Ok(Json(SuccessResponse::ok("Snippet deleted")))
}

async fn move_snippet(
    State(state): SharedState,
    Path((folder, id)): Path<(String, String)>,
    ApiJson(request): ApiJson<MoveSnippetRequest>,
) -> ApiResult<Snippet> {
    let snippet = state
        .snippets
        .write()
        .await
        .move_snippet(&id, &folder, &request.to_folder)?;
    Ok(Json(snippet))
}

// Folders

async fn list_folders(State(state): SharedState) -> Json<Vec<String>> {
    Json(state.snippets.read().await.folder_names())
}

async fn create_folder(
    State(state): SharedState,
    ApiJson(request): ApiJson<CreateFolderRequest>,
) -> ApiResult<SnippetFolder> {
    let mut snippets = state.snippets.write().await;
    let folder = snippets.create_folder(&request.folder_name)?.clone();
    Ok(Json(folder))
}

async fn rename_folder(
    State(state): SharedState,
    Path(name): Path<String>,
    ApiJson(request): ApiJson<RenameFolderRequest>,
) -> ApiResult<SuccessResponse> {
    state
        .snippets
        .write()
        .await
        .rename_folder(&name, &request.new_name)?;
    Ok(Json(SuccessResponse::ok("Folder renamed")))
}

async fn delete_folder(
    State(state): SharedState,
    Path(name): Path<String>,
) -> ApiResult<SuccessResponse> {
    state.snippets.write().await.delete_folder(&name)?;
    Ok(Json(SuccessResponse::ok("Folder deleted")))
}

#[derive(Deserialize)]
struct SearchQuery {
    #[serde(default)]
    q: String,
}

async fn search(
    State(state): SharedState,
    ApiQuery(query): ApiQuery<SearchQuery>,
) -> Json<SearchResponse> {
    if query.q.is_empty() {
        return Json(SearchResponse::default());
    }
    let history = state.history.read().await.search(&query.q);
    let snippets = state.snippets.read().await.search(&query.q);
    Json(SearchResponse { history, snippets })
}

// Export and import

async fn export_snippets(State(state): SharedState) -> Json<SnippetExport> {
    Json(SnippetExport::new(state.snippets.read().await.export()))
}

async fn import_snippets(
    State(state): SharedState,
    ApiJson(payload): ApiJson<SnippetExport>,
) -> ApiResult<Imported> {
    if payload.version > SnippetExport::VERSION {
        return Err(ApiError::bad_request(format!(
            "unsupported export version {}",
            payload.version
        )));
    }
    let imported = state.snippets.write().await.import(payload.folders)?;
    tracing::info!(
        folders = imported.folders.len(),
        snippets = imported.snippets,
        conflicts = ?imported.conflicts,
        "imported snippets"
    );
    Ok(Json(imported))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use serde_json::{json, Value};
    use tower::ServiceExt;

    use crate::store::{ClipboardStore, HistoryLimits, SnippetStore};

    fn app() -> Router {
        let state = DaemonState::new(
            ClipboardStore::new(HistoryLimits::default()),
            SnippetStore::new(),
        );
        router(Arc::new(state))
    }

    async fn call(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(body.map_or_else(Body::empty, |b| Body::from(b.to_string())))
            .unwrap();
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, value)
    }

    #[tokio::test]
    async fn health_identifies_the_daemon() {
        let (status, body) = call(&app(), "GET", "/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["service"], SERVICE_NAME);
        assert_eq!(body["pid"], std::process::id());
    }

    #[tokio::test]
    async fn duplicate_capture_is_promoted() {
        let app = app();
        for content in ["a", "b", "a"] {
            let (status, _) = call(&app, "POST", "/history", Some(json!({ "content": content }))).await;
            assert_eq!(status, StatusCode::OK);
        }
        let (_, history) = call(&app, "GET", "/history", None).await;
        let contents: Vec<_> = history
            .as_array()
            .unwrap()
            .iter()
            .map(|item| item["content"].as_str().unwrap().to_string())
            .collect();
        assert_eq!(contents, ["a", "b"]);
    }

    #[tokio::test]
    async fn empty_capture_is_bad_request() {
        let (status, body) = call(&app(), "POST", "/history", Some(json!({ "content": "" }))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["detail"].is_string());
    }

    #[tokio::test]
    async fn folder_conflict_and_missing_folder() {
        let app = app();
        let create = json!({ "folder_name": "work" });
        let (status, _) = call(&app, "POST", "/folders", Some(create.clone())).await;
        assert_eq!(status, StatusCode::OK);
        let (status, body) = call(&app, "POST", "/folders", Some(create)).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["error"], "Conflict");

        let (status, _) = call(&app, "GET", "/snippets/nowhere", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn snippet_from_clip_then_move() {
        let app = app();
        let (_, clip) = call(&app, "POST", "/history", Some(json!({ "content": "cargo test" }))).await;
        call(&app, "POST", "/folders", Some(json!({ "folder_name": "dev" }))).await;
        call(&app, "POST", "/folders", Some(json!({ "folder_name": "misc" }))).await;

        let (status, snippet) = call(
            &app,
            "POST",
            "/snippets",
            Some(json!({ "clip_id": clip["id"], "folder": "dev" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(snippet["content"], "cargo test");
        assert_ne!(snippet["id"], clip["id"]);

        let uri = format!("/snippets/dev/{}/move", snippet["id"].as_str().unwrap());
        let (status, _) = call(&app, "POST", &uri, Some(json!({ "to_folder": "misc" }))).await;
        assert_eq!(status, StatusCode::OK);

        let (_, misc) = call(&app, "GET", "/snippets/misc", None).await;
        assert_eq!(misc.as_array().unwrap().len(), 1);
        let (_, dev) = call(&app, "GET", "/snippets/dev", None).await;
        assert!(dev.as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn snippet_without_source_is_rejected() {
        let app = app();
        call(&app, "POST", "/folders", Some(json!({ "folder_name": "dev" }))).await;
        let (status, _) = call(&app, "POST", "/snippets", Some(json!({ "folder": "dev" }))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn search_spans_history_and_snippets() {
        let app = app();
        call(&app, "POST", "/history", Some(json!({ "content": "Hello World" }))).await;
        call(&app, "POST", "/folders", Some(json!({ "folder_name": "greetings" }))).await;
        call(
            &app,
            "POST",
            "/snippets",
            Some(json!({ "content": "say hello", "folder": "greetings" })),
        )
        .await;

        let (_, found) = call(&app, "GET", "/search?q=HELLO", None).await;
        assert_eq!(found["history"].as_array().unwrap().len(), 1);
        assert_eq!(found["snippets"].as_array().unwrap().len(), 1);

        let (_, empty) = call(&app, "GET", "/search", None).await;
        assert!(empty["history"].as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn malformed_bodies_are_bad_requests_with_detail() {
        let app = app();
        let cases = [
            ("POST", "/folders", json!({})),
            ("POST", "/history", json!({ "content": 5 })),
            ("POST", "/snippets", json!({ "content": "x" })),
            ("PUT", "/folders/work", json!({ "name": "other" })),
        ];
        for (method, uri, body) in cases {
            let (status, error) = call(&app, method, uri, Some(body)).await;
            assert_eq!(status, StatusCode::BAD_REQUEST, "{method} {uri}");
            assert_eq!(error["error"], "Bad Request");
            assert!(error["detail"].as_str().is_some_and(|d| !d.is_empty()), "{method} {uri}");
        }
    }

    #[tokio::test]
    async fn non_json_body_is_a_bad_request() {
        let request = Request::builder()
            .method("POST")
            .uri("/history")
            .header("content-type", "application/json")
            .body(Body::from("{ not json"))
            .unwrap();
        let response = app().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body: ErrorBody = serde_json::from_slice(&bytes).unwrap();
        assert!(!body.detail.is_empty());
    }

    #[tokio::test]
    async fn history_limit_returns_most_recent() {
        let app = app();
        for content in ["one", "two", "three"] {
            call(&app, "POST", "/history", Some(json!({ "content": content }))).await;
        }
        let (_, limited) = call(&app, "GET", "/history?limit=2", None).await;
        let contents: Vec<_> = limited
            .as_array()
            .unwrap()
            .iter()
            .map(|item| item["content"].as_str().unwrap())
            .collect();
        assert_eq!(contents, ["three", "two"]);

        let (_, all) = call(&app, "GET", "/history?limit=50", None).await;
        assert_eq!(all.as_array().unwrap().len(), 3);

        let (status, body) = call(&app, "GET", "/history?limit=lots", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["detail"].is_string());
    }

    #[tokio::test]
    async fn export_then_import_into_another_daemon() {
        let source = app();
        call(&source, "POST", "/folders", Some(json!({ "folder_name": "shell" }))).await;
        call(
            &source,
            "POST",
            "/snippets",
            Some(json!({ "content": "ls -la", "name": "list", "folder": "shell" })),
        )
        .await;
        let (status, export) = call(&source, "GET", "/export", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(export["version"], SnippetExport::VERSION);

        let target = app();
        call(&target, "POST", "/folders", Some(json!({ "folder_name": "shell" }))).await;
        call(&target, "POST", "/folders", Some(json!({ "folder_name": "notes" }))).await;
        let (status, imported) = call(&target, "POST", "/import", Some(export.clone())).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(imported["conflicts"], json!(["shell"]));
        assert_eq!(imported["snippets"], 0);

        let fresh = app();
        let (_, imported) = call(&fresh, "POST", "/import", Some(export)).await;
        assert_eq!(imported["folders"], json!(["shell"]));
        let (_, shell) = call(&fresh, "GET", "/snippets/shell", None).await;
        assert_eq!(shell[0]["name"], "list");
    }

    #[tokio::test]
    async fn invalid_imports_are_rejected() {
        let app = app();
        let (status, _) = call(&app, "POST", "/import", Some(json!({ "folders": "nope" }))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let future = json!({ "version": 99, "exported_at": "2026-01-01T00:00:00Z", "folders": [] });
        let (status, body) = call(&app, "POST", "/import", Some(future)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["detail"].as_str().unwrap().contains("version"));

        let (_, folders) = call(&app, "GET", "/folders", None).await;
        assert!(folders.as_array().unwrap().is_empty());
    }
}
