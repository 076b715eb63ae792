use axum::extract::{Path, State};
use axum::http::{HeaderValue, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use dashmap::DashMap;
use merge_engine::{CandidateUpdate, ChoiceAudit, ConflictBlock, ResolutionChoice, ResolveError, Transition};
use mergebot_core::{FileContext, ResolutionSession, SessionSnapshot, Settings, SharedSession};
use mergebot_engines::{record_choice, run_all, EngineSet, PollPolicy};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use uuid::Uuid;

#[derive(Clone)]
struct AppState {
    sessions: Arc<DashMap<Uuid, SharedSession>>,
    fetches: Arc<DashMap<Uuid, CancellationToken>>,
    settings: Arc<Settings>,
    engines: EngineSet,
    shutdown: CancellationToken,
}

impl AppState {
    fn session(&self, id: Uuid) -> Result<SharedSession, AppError> {
        self.sessions
            .get(&id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| SessionNotFound(id).into())
    }
}

#[derive(Debug, Deserialize)]
struct CreateSessionRequest {
    content: String,
    #[serde(default)]
    file: Option<FileContext>,
}

#[derive(Debug, Serialize)]
struct CreateSessionResponse {
    id: Uuid,
    blocks: Vec<ConflictBlock>,
    outstanding: usize,
}

#[derive(Debug, Deserialize)]
struct ApplyBody {
    block: usize,
    choice: ResolutionChoice,
}

#[derive(Debug, Serialize)]
struct ApplyResponse {
    transition: Transition,
    audit: ChoiceAudit,
}

#[derive(Debug, Deserialize)]
struct EditBody {
    content: String,
    #[serde(default)]
    line: usize,
}

#[derive(Debug, Serialize)]
struct StatusResponse {
    status: String,
    version: String,
    sessions: usize,
    engines: Vec<&'static str>,
}

#[derive(Debug, thiserror::Error)]
#[error("session {0} not found")]
struct SessionNotFound(Uuid);

struct AppError(anyhow::Error);

impl AppError {
    fn status(&self) -> StatusCode {
        if self.0.is::<SessionNotFound>() {
            return StatusCode::NOT_FOUND;
        }
        match self.0.downcast_ref::<ResolveError>() {
            Some(ResolveError::LocationNotFound { .. }) => StatusCode::CONFLICT,
            Some(ResolveError::MissingResolution { .. }) => StatusCode::NOT_FOUND,
            Some(_) => StatusCode::BAD_REQUEST,
            None => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        (
            self.status(),
            Json(serde_json::json!({ "error": self.0.to_string() })),
        )
            .into_response()
    }
}

impl<E: Into<anyhow::Error>> From<E> for AppError {
    fn from(err: E) -> Self {
        Self(err.into())
    }
}

/// HTTP API over resolution sessions, for editor front-ends.
pub struct HttpServer {
    settings: Arc<Settings>,
    engines: EngineSet,
}

impl HttpServer {
    pub fn new(settings: Settings, engines: EngineSet) -> Self {
        Self {
            settings: Arc::new(settings),
            engines,
        }
    }

    /// Routes with their state. Collectors started by `fetch` are cancelled
    /// through `shutdown`.
    pub fn router(&self, shutdown: CancellationToken) -> Router {
        let state = AppState {
            sessions: Arc::new(DashMap::new()),
            fetches: Arc::new(DashMap::new()),
            settings: self.settings.clone(),
            engines: self.engines.clone(),
            shutdown,
        };

        Router::new()
            .route("/v1/sessions", post(create_session))
            .route("/v1/sessions/{id}", get(get_session).delete(delete_session))
            .route("/v1/sessions/{id}/apply", post(apply_handler))
            .route("/v1/sessions/{id}/edit", post(edit_handler))
            .route("/v1/sessions/{id}/undo", post(undo_handler))
            .route("/v1/sessions/{id}/redo", post(redo_handler))
            .route("/v1/sessions/{id}/reset", post(reset_handler))
            .route("/v1/sessions/{id}/candidates", post(candidates_handler))
            .route("/v1/sessions/{id}/fetch", post(fetch_handler))
            .route("/v1/status", get(status_handler))
            .layer(cors_layer(&self.settings.http.cors_origins))
            .with_state(state)
    }

    pub async fn start(
        &self,
        mut shutdown: tokio::sync::broadcast::Receiver<()>,
    ) -> anyhow::Result<()> {
        let token = CancellationToken::new();
        let app = self.router(token.clone());

        let addr = SocketAddr::from(([0, 0, 0, 0], self.settings.http.port));
        tracing::info!("HTTP API listening on {}", addr);

        let listener = tokio::net::TcpListener::bind(addr).await?;

        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown.recv().await;
                token.cancel();
            })
            .await?;

        Ok(())
    }
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let layer = CorsLayer::new().allow_methods(Any).allow_headers(Any);
    if origins.is_empty() {
        return layer.allow_origin(Any);
    }
    let origins: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match origin.parse() {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!("Ignoring invalid CORS origin: {}", origin);
                None
            }
        })
        .collect();
    layer.allow_origin(AllowOrigin::list(origins))
}

async fn create_session(
    State(state): State<AppState>,
    Json(req): Json<CreateSessionRequest>,
) -> Result<Json<CreateSessionResponse>, AppError> {
    let file = req.file.unwrap_or_else(|| {
        let project = &state.settings.project;
        FileContext {
            project_path: project.project_path.clone(),
            target_branch: project.target_branch.clone(),
            source_branch: project.source_branch.clone(),
            ..Default::default()
        }
    });
    let session = ResolutionSession::new(file, &req.content, state.settings.diff.algorithm);
    let response = CreateSessionResponse {
        id: session.id,
        blocks: session.manager.blocks().to_vec(),
        outstanding: session.manager.outstanding().len(),
    };

    tracing::info!(
        session = %response.id,
        blocks = response.blocks.len(),
        "Session opened"
    );
    state.sessions.insert(response.id, session.shared());
    Ok(Json(response))
}

async fn get_session(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<SessionSnapshot>, AppError> {
    let session = state.session(id)?;
    let snapshot = session.lock().await.snapshot();
    Ok(Json(snapshot))
}

async fn delete_session(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, AppError> {
    if let Some((_, token)) = state.fetches.remove(&id) {
        token.cancel();
    }
    state.sessions.remove(&id).ok_or(SessionNotFound(id))?;
    tracing::info!(session = %id, "Session closed");
    Ok(Json(serde_json::json!({ "status": "ok" })))
}

async fn apply_handler(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<ApplyBody>,
) -> Result<Json<ApplyResponse>, AppError> {
    let session = state.session(id)?;
    let (applied, record) = {
        let mut guard = session.lock().await;
        let applied = guard.manager.apply_resolution(req.block, req.choice)?;
        let record = guard.choice_record(req.block, applied.audit.clone());
        (applied, record)
    };

    if let Some(sink) = state.engines.audit.clone() {
        let handle = record_choice(sink, record);
        tokio::spawn(async move {
            if let Ok(Some(notice)) = handle.await {
                session.lock().await.push_notice(notice);
            }
        });
    }

    Ok(Json(ApplyResponse {
        transition: applied.transition,
        audit: applied.audit,
    }))
}

async fn edit_handler(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<EditBody>,
) -> Result<Json<Option<Transition>>, AppError> {
    let session = state.session(id)?;
    let transition = session.lock().await.manager.edit(&req.content, req.line);
    Ok(Json(transition))
}

async fn undo_handler(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Option<Transition>>, AppError> {
    let session = state.session(id)?;
    let transition = session.lock().await.manager.undo();
    Ok(Json(transition))
}

async fn redo_handler(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Option<Transition>>, AppError> {
    let session = state.session(id)?;
    let transition = session.lock().await.manager.redo();
    Ok(Json(transition))
}

async fn reset_handler(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Transition>, AppError> {
    let session = state.session(id)?;
    let transition = session.lock().await.manager.reset();
    Ok(Json(transition))
}

async fn candidates_handler(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(update): Json<CandidateUpdate>,
) -> Result<Json<Transition>, AppError> {
    let session = state.session(id)?;
    tracing::debug!(session = %id, source = %update.source(), "Candidate update");
    let transition = session.lock().await.manager.commit(update);
    Ok(Json(transition))
}

/// Start the engine collectors for a session. A second fetch cancels the
/// first.
async fn fetch_handler(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<(StatusCode, Json<serde_json::Value>), AppError> {
    let session = state.session(id)?;
    let token = state.shutdown.child_token();
    if let Some(previous) = state.fetches.insert(id, token.clone()) {
        previous.cancel();
    }

    let policy = PollPolicy::from(&state.settings.polling);
    let engines = state.engines.clone();
    let enabled = engines.enabled();
    let fetches = state.fetches.clone();
    tokio::spawn(async move {
        run_all(engines, session, policy, token.clone()).await;
        fetches.remove_if(&id, |_, _| !token.is_cancelled());
        tracing::info!(session = %id, "Candidate fetch finished");
    });

    Ok((
        StatusCode::ACCEPTED,
        Json(serde_json::json!({ "status": "fetching", "engines": enabled })),
    ))
}

async fn status_handler(State(state): State<AppState>) -> Json<StatusResponse> {
    Json(StatusResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        sessions: state.sessions.len(),
        engines: state.engines.enabled(),
    })
}
