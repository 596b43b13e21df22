//! HTTP bridge between the browser extension and the host.
//!
//! The extension's content script, background script, and side panel each
//! talk to the host over this JSON API. The content script reports posts,
//! the background script relays tab focus and tab closure, and the panel
//! mounts, generates, and reads its view.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`    | `/health` | Health check (returns version) |
//! | `POST`   | `/posts/observed` | Report the post viewed in a context |
//! | `GET`    | `/current-post` | Current post, resolved by the active-context policy |
//! | `GET`    | `/contexts/{id}/current-post` | Current post for a given context |
//! | `POST`   | `/contexts/{id}/activate` | Mark a context as the host's active one |
//! | `DELETE` | `/contexts/{id}` | Forget a closed context |
//! | `POST`   | `/panel/mount` | Open the panel, restoring its last state |
//! | `GET`    | `/panel` | What the panel currently shows |
//! | `POST`   | `/panel/generate` | Generate a reply for the displayed post |
//! | `POST`   | `/panel/explain` | Explain the displayed reply |
//! | `GET`    | `/preferences` | Read generation preferences |
//! | `PUT`    | `/preferences` | Replace generation preferences |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "post text must not be empty" } }
//! ```
//!
//! Error codes: `bad_request` (400), `generation_failed` (502), `internal` (500).
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted; requests come from an
//! extension origin.

use std::sync::Arc;

use anyhow::Context as _;
use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};

use reply_companion_core::models::{ContextId, Post};
use reply_companion_core::session::{Completion, PanelSession, SwitchOutcome};
use reply_companion_core::store::PreferenceStore;

use crate::config::Config;
use crate::coordinator::{Coordinator, CoordinatorHandle};
use crate::generation::create_generator;
use crate::host::TrackedHost;
use crate::panel::{PanelRuntime, PanelView};
use crate::preferences::{self, Preferences};
use crate::stores::Stores;

/// Shared application state passed to all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub coordinator: CoordinatorHandle,
    pub host: Arc<TrackedHost>,
    pub panel: Arc<PanelRuntime>,
    pub preferences: Arc<dyn PreferenceStore>,
}

/// Wires stores, coordinator, generator, and panel from `config`.
pub async fn build_state(config: &Config) -> anyhow::Result<AppState> {
    let stores = Stores::open(config).await?;

    if config.coordinator.purge_on_start {
        stores
            .contexts
            .clear_all()
            .await
            .context("Failed to purge contexts from a previous session")?;
    }

    let host = Arc::new(TrackedHost::new());
    let coordinator = Coordinator::new(
        stores.contexts.clone(),
        host.clone(),
        config.coordinator.active_context,
    )
    .spawn();

    let generator = create_generator(&config.generation)?;
    let session = PanelSession::new(
        stores.artifact_cache(config.cache.capacity)?,
        stores.snapshots.clone(),
    );
    let panel = PanelRuntime::new(
        session,
        coordinator.clone(),
        generator,
        stores.preferences.clone(),
    );
    panel.spawn_listener();

    Ok(AppState {
        coordinator,
        host,
        panel,
        preferences: stores.preferences,
    })
}

pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handle_health))
        .route("/posts/observed", post(handle_post_observed))
        .route("/current-post", get(handle_current_post))
        .route("/contexts/{id}/current-post", get(handle_context_current_post))
        .route("/contexts/{id}/activate", post(handle_activate))
        .route("/contexts/{id}", delete(handle_context_destroyed))
        .route("/panel/mount", post(handle_mount))
        .route("/panel", get(handle_view))
        .route("/panel/generate", post(handle_generate))
        .route("/panel/explain", post(handle_explain))
        .route("/preferences", get(handle_get_preferences).put(handle_put_preferences))
        .layer(cors)
        .with_state(state)
}

/// Starts the HTTP bridge on `[server].bind` and runs until terminated.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let state = build_state(config).await?;
    let listener = tokio::net::TcpListener::bind(&config.server.bind)
        .await
        .with_context(|| format!("Failed to bind {}", config.server.bind))?;
    info!("Reply companion listening on http://{}", config.server.bind);
    axum::serve(listener, router(state)).await?;
    Ok(())
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

struct AppError {
    status: StatusCode,
    code: String,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code,
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request".to_string(),
        message: message.into(),
    }
}

fn internal(err: anyhow::Error) -> AppError {
    warn!("Request failed: {:#}", err);
    AppError {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        code: "internal".to_string(),
        message: format!("{:#}", err),
    }
}

/// Panel precondition failures ("No post is displayed", "No reply to
/// explain") are the caller's fault; anything else came from the provider.
fn classify_generation_error(err: anyhow::Error) -> AppError {
    let msg = format!("{:#}", err);
    if msg.starts_with("No post") || msg.starts_with("No reply") {
        bad_request(msg)
    } else {
        warn!("Generation failed: {}", msg);
        AppError {
            status: StatusCode::BAD_GATEWAY,
            code: "generation_failed".to_string(),
            message: msg,
        }
    }
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// ============ Contexts ============

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PostObservedRequest {
    context_id: ContextId,
    post: Post,
}

async fn handle_post_observed(
    State(state): State<AppState>,
    Json(req): Json<PostObservedRequest>,
) -> Result<StatusCode, AppError> {
    req.post.validate().map_err(|e| bad_request(e.to_string()))?;
    state
        .coordinator
        .post_observed(req.context_id, req.post)
        .await
        .map_err(internal)?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Serialize)]
struct CurrentPostResponse {
    post: Option<Post>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CurrentPostQuery {
    #[serde(default)]
    context_id: Option<ContextId>,
}

async fn handle_current_post(
    State(state): State<AppState>,
    Query(query): Query<CurrentPostQuery>,
) -> Result<Json<CurrentPostResponse>, AppError> {
    let post = state
        .coordinator
        .query_current_post(query.context_id.as_ref())
        .await
        .map_err(internal)?;
    Ok(Json(CurrentPostResponse { post }))
}

async fn handle_context_current_post(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<CurrentPostResponse>, AppError> {
    let context = ContextId::new(id);
    let post = state
        .coordinator
        .query_current_post(Some(&context))
        .await
        .map_err(internal)?;
    Ok(Json(CurrentPostResponse { post }))
}

async fn handle_activate(State(state): State<AppState>, Path(id): Path<String>) -> StatusCode {
    state.host.set_active(ContextId::new(id)).await;
    StatusCode::NO_CONTENT
}

async fn handle_context_destroyed(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, AppError> {
    let context = ContextId::new(id);
    state.host.forget(&context).await;
    state
        .coordinator
        .context_destroyed(context)
        .await
        .map_err(internal)?;
    Ok(StatusCode::NO_CONTENT)
}

// ============ Panel ============

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct MountRequest {
    #[serde(default)]
    context_id: Option<ContextId>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct MountResponse {
    snapshot_restored: bool,
    /// `"restored"` or `"fresh"` when the panel switched to a newer post.
    adopted: Option<&'static str>,
    view: PanelView,
}

fn outcome_name(outcome: SwitchOutcome) -> &'static str {
    match outcome {
        SwitchOutcome::Restored => "restored",
        SwitchOutcome::Fresh => "fresh",
    }
}

/// The body is optional: a panel that does not know its tab sends none.
async fn handle_mount(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<MountResponse>, AppError> {
    let req: MountRequest = if body.is_empty() {
        MountRequest::default()
    } else {
        serde_json::from_slice(&body).map_err(|e| bad_request(e.to_string()))?
    };
    let report = state.panel.mount(req.context_id).await;
    Ok(Json(MountResponse {
        snapshot_restored: report.snapshot_restored,
        adopted: report.adopted.map(outcome_name),
        view: state.panel.view().await,
    }))
}

async fn handle_view(State(state): State<AppState>) -> Json<PanelView> {
    Json(state.panel.view().await)
}

#[derive(Serialize)]
struct CompletionResponse {
    /// `false` when the post changed while the request was running.
    applied: bool,
    view: PanelView,
}

async fn handle_generate(
    State(state): State<AppState>,
) -> Result<Json<CompletionResponse>, AppError> {
    let completion = state
        .panel
        .generate()
        .await
        .map_err(classify_generation_error)?;
    Ok(Json(CompletionResponse {
        applied: completion == Completion::Applied,
        view: state.panel.view().await,
    }))
}

async fn handle_explain(
    State(state): State<AppState>,
) -> Result<Json<CompletionResponse>, AppError> {
    let completion = state
        .panel
        .explain()
        .await
        .map_err(classify_generation_error)?;
    Ok(Json(CompletionResponse {
        applied: completion == Completion::Applied,
        view: state.panel.view().await,
    }))
}

// ============ Preferences ============

async fn handle_get_preferences(State(state): State<AppState>) -> Json<Preferences> {
    Json(preferences::load(state.preferences.as_ref()).await)
}

async fn handle_put_preferences(
    State(state): State<AppState>,
    Json(prefs): Json<Preferences>,
) -> Result<Json<Preferences>, AppError> {
    preferences::save(state.preferences.as_ref(), &prefs)
        .await
        .map_err(internal)?;
    Ok(Json(prefs))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::parse_config;

    const CONFIG: &str = r#"
[db]
path = "./unused.sqlite"

[server]
bind = "127.0.0.1:0"

[storage]
backend = "memory"
"#;

    async fn spawn_server() -> String {
        let config = parse_config(CONFIG).unwrap();
        let state = build_state(&config).await.unwrap();
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router(state)).await.unwrap();
        });
        format!("http://{}", addr)
    }

    #[tokio::test]
    async fn test_health() {
        let base = spawn_server().await;
        let json: serde_json::Value = reqwest::get(format!("{}/health", base))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(json["status"], "ok");
    }

    #[tokio::test]
    async fn test_report_then_query_and_destroy() {
        let base = spawn_server().await;
        let client = reqwest::Client::new();

        let resp = client
            .post(format!("{}/posts/observed", base))
            .json(&serde_json::json!({ "contextId": "12", "post": { "text": "Hello world" } }))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 204);

        let json: serde_json::Value = client
            .get(format!("{}/contexts/12/current-post", base))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(json["post"]["text"], "Hello world");

        let resp = client
            .delete(format!("{}/contexts/12", base))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 204);

        let json: serde_json::Value = client
            .get(format!("{}/current-post?contextId=12", base))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert!(json["post"].is_null());
    }

    #[tokio::test]
    async fn test_blank_post_is_bad_request() {
        let base = spawn_server().await;
        let resp = reqwest::Client::new()
            .post(format!("{}/posts/observed", base))
            .json(&serde_json::json!({ "contextId": "1", "post": { "text": "  " } }))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 400);
        let json: serde_json::Value = resp.json().await.unwrap();
        assert_eq!(json["error"]["code"], "bad_request");
    }

    #[tokio::test]
    async fn test_mount_adopts_reported_post() {
        let base = spawn_server().await;
        let client = reqwest::Client::new();
        client
            .post(format!("{}/posts/observed", base))
            .json(&serde_json::json!({ "contextId": "5", "post": { "text": "Late panel" } }))
            .send()
            .await
            .unwrap();

        let json: serde_json::Value = client
            .post(format!("{}/panel/mount", base))
            .json(&serde_json::json!({ "contextId": "5" }))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(json["adopted"], "fresh");
        assert_eq!(json["view"]["post"]["text"], "Late panel");
    }

    #[tokio::test]
    async fn test_generate_with_disabled_provider() {
        let base = spawn_server().await;
        let client = reqwest::Client::new();

        let resp = client
            .post(format!("{}/panel/generate", base))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 400);

        client
            .post(format!("{}/posts/observed", base))
            .json(&serde_json::json!({ "contextId": "1", "post": { "text": "Hi" } }))
            .send()
            .await
            .unwrap();
        client
            .post(format!("{}/panel/mount", base))
            .json(&serde_json::json!({ "contextId": "1" }))
            .send()
            .await
            .unwrap();

        let resp = client
            .post(format!("{}/panel/generate", base))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 502);
        let json: serde_json::Value = resp.json().await.unwrap();
        assert_eq!(json["error"]["code"], "generation_failed");
    }

    #[tokio::test]
    async fn test_preferences_round_trip() {
        let base = spawn_server().await;
        let client = reqwest::Client::new();

        let json: serde_json::Value = client
            .get(format!("{}/preferences", base))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(json["tone"], "friendly");

        client
            .put(format!("{}/preferences", base))
            .json(&serde_json::json!({ "tone": "dry", "personaSamples": ["ok."] }))
            .send()
            .await
            .unwrap();

        let json: serde_json::Value = client
            .get(format!("{}/preferences", base))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(json["tone"], "dry");
        assert_eq!(json["length"], "short");
    }
}
