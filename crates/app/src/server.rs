use crate::config::SessionFactory;
use axum::extract::{DefaultBodyLimit, Multipart, Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use docchat_core::{
    ChainError, ChatRecord, ModelError, Session, SessionError, SessionPhase, UploadOutcome,
    UploadedFile,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, RwLock};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use uuid::Uuid;

const MAX_UPLOAD_BYTES: usize = 64 * 1024 * 1024;
const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

type SessionHandle = Arc<Mutex<Session>>;

struct SessionEntry {
    handle: SessionHandle,
    last_activity: Instant,
}

impl SessionEntry {
    fn is_expired(&self, max_idle: Duration) -> bool {
        self.last_activity.elapsed() >= max_idle
    }
}

#[derive(Clone)]
pub struct AppState {
    factory: SessionFactory,
    sessions: Arc<RwLock<HashMap<Uuid, SessionEntry>>>,
}

impl AppState {
    pub fn new(factory: SessionFactory) -> Self {
        Self {
            factory,
            sessions: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    async fn session(&self, id: Uuid) -> Result<SessionHandle, ApiError> {
        let mut sessions = self.sessions.write().await;
        let entry = sessions.get_mut(&id).ok_or(ApiError::SessionNotFound(id))?;
        entry.last_activity = Instant::now();
        Ok(entry.handle.clone())
    }

    /// Closes sessions untouched for at least `max_idle` and removes their
    /// working directories. Sessions with a request in flight are kept.
    pub async fn evict_idle(&self, max_idle: Duration) -> usize {
        let expired = {
            let mut sessions = self.sessions.write().await;
            let ids = sessions
                .iter()
                .filter(|(_, entry)| entry.is_expired(max_idle) && entry.handle.try_lock().is_ok())
                .map(|(id, _)| *id)
                .collect::<Vec<_>>();
            ids.into_iter()
                .filter_map(|id| sessions.remove(&id).map(|entry| (id, entry.handle)))
                .collect::<Vec<_>>()
        };

        let evicted = expired.len();
        for (id, handle) in expired {
            if let Err(error) = close_session(id, handle).await {
                warn!(session = %id, %error, "could not close idle session");
            }
        }
        evicted
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error_type: String,
    pub message: String,
}

#[derive(Debug)]
pub enum ApiError {
    SessionNotFound(Uuid),
    InvalidRequest(String),
    Session(SessionError),
}

impl From<SessionError> for ApiError {
    fn from(error: SessionError) -> Self {
        ApiError::Session(error)
    }
}

impl ApiError {
    fn status_and_type(&self) -> (StatusCode, &'static str) {
        match self {
            ApiError::SessionNotFound(_) => (StatusCode::NOT_FOUND, "session_not_found"),
            ApiError::InvalidRequest(_) => (StatusCode::BAD_REQUEST, "invalid_request"),
            ApiError::Session(error) => match error {
                SessionError::NoDocuments => (StatusCode::BAD_REQUEST, "no_documents"),
                SessionError::EmptyQuestion => (StatusCode::BAD_REQUEST, "empty_question"),
                SessionError::Ingest(_) => (StatusCode::UNPROCESSABLE_ENTITY, "extraction_failed"),
                SessionError::Search(_) => (StatusCode::BAD_GATEWAY, "embedding_failed"),
                SessionError::Chain(ChainError::Model(ModelError::RateLimited(_))) => {
                    (StatusCode::TOO_MANY_REQUESTS, "rate_limited")
                }
                SessionError::Chain(ChainError::Model(ModelError::Unauthorized { .. })) => {
                    (StatusCode::BAD_GATEWAY, "model_unauthorized")
                }
                SessionError::Chain(_) => (StatusCode::BAD_GATEWAY, "model_failed"),
                SessionError::Io(_) => (StatusCode::INTERNAL_SERVER_ERROR, "storage_failed"),
            },
        }
    }

    fn message(&self) -> String {
        match self {
            ApiError::SessionNotFound(id) => format!("no session {id}"),
            ApiError::InvalidRequest(message) => message.clone(),
            ApiError::Session(error) => error.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_type) = self.status_and_type();
        if status.is_server_error() {
            warn!(%status, error = %self.message(), "request failed");
        }
        let body = ErrorResponse {
            error_type: error_type.to_string(),
            message: self.message(),
        };
        (status, Json(body)).into_response()
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CreatedSession {
    pub session_id: Uuid,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AskRequest {
    pub question: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SourceRef {
    pub file_name: String,
    pub chunk_index: u64,
    pub distance: f32,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AskResponse {
    pub answer: String,
    pub standalone_question: String,
    pub sources: Vec<SourceRef>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TranscriptResponse {
    pub phase: SessionPhase,
    pub files: Vec<String>,
    pub records: Vec<ChatRecord>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/sessions", post(create_session))
        .route("/sessions/:id", axum::routing::delete(delete_session))
        .route("/sessions/:id/files", post(upload_files))
        .route("/sessions/:id/ask", post(ask))
        .route("/sessions/:id/transcript", get(transcript))
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn serve(
    bind: SocketAddr,
    factory: SessionFactory,
    session_idle: Duration,
) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(bind).await?;
    info!(%bind, idle_secs = session_idle.as_secs(), "http server listening");

    let state = AppState::new(factory);
    let sweeper = state.clone();
    tokio::spawn(async move {
        let period = session_idle.clamp(Duration::from_secs(1), SWEEP_INTERVAL);
        let mut ticker = tokio::time::interval(period);
        loop {
            ticker.tick().await;
            let evicted = sweeper.evict_idle(session_idle).await;
            if evicted > 0 {
                info!(evicted, "evicted idle sessions");
            }
        }
    });

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;

    Ok(())
}

async fn health() -> &'static str {
    "ok"
}

async fn create_session(State(state): State<AppState>) -> (StatusCode, Json<CreatedSession>) {
    let session = state.factory.isolated();
    let session_id = session.id();
    state
        .sessions
        .write()
        .await
        .insert(
            session_id,
            SessionEntry {
                handle: Arc::new(Mutex::new(session)),
                last_activity: Instant::now(),
            },
        );
    info!(session = %session_id, "session created");

    (StatusCode::CREATED, Json(CreatedSession { session_id }))
}

async fn delete_session(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    let entry = state
        .sessions
        .write()
        .await
        .remove(&id)
        .ok_or(ApiError::SessionNotFound(id))?;

    close_session(id, entry.handle).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn close_session(id: Uuid, handle: SessionHandle) -> Result<(), SessionError> {
    let working_dir = handle.lock().await.working_dir().to_path_buf();
    match Arc::into_inner(handle) {
        Some(session) => session.into_inner().close(true).await?,
        None => {
            if let Err(error) = tokio::fs::remove_dir_all(&working_dir).await {
                warn!(session = %id, %error, "could not remove working dir of busy session");
            }
        }
    }
    Ok(())
}

async fn upload_files(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    mut multipart: Multipart,
) -> Result<Json<UploadOutcome>, ApiError> {
    let handle = state.session(id).await?;

    let mut files = Vec::new();
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|error| ApiError::InvalidRequest(error.to_string()))?
    {
        let Some(name) = field.file_name().map(str::to_string) else {
            continue;
        };
        let bytes = field
            .bytes()
            .await
            .map_err(|error| ApiError::InvalidRequest(error.to_string()))?;
        files.push(UploadedFile::new(name, bytes.to_vec()));
    }

    let outcome = handle.lock().await.upload(files).await?;
    Ok(Json(outcome))
}

async fn ask(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(request): Json<AskRequest>,
) -> Result<Json<AskResponse>, ApiError> {
    let handle = state.session(id).await?;
    let answer = handle.lock().await.ask(&request.question).await?;

    Ok(Json(AskResponse {
        answer: answer.text,
        standalone_question: answer.standalone_question,
        sources: answer
            .sources
            .into_iter()
            .map(|hit| SourceRef {
                file_name: hit.chunk.file_name,
                chunk_index: hit.chunk.chunk_index,
                distance: hit.distance,
            })
            .collect(),
    }))
}

async fn transcript(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<TranscriptResponse>, ApiError> {
    let handle = state.session(id).await?;
    let session = handle.lock().await;

    Ok(Json(TranscriptResponse {
        phase: session.phase(),
        files: session.files().to_vec(),
        records: session.render().to_vec(),
    }))
}
