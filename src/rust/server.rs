//! HTTP front end for the classifier.
//!
//! Routes:
//! - `GET /health`
//! - `POST /ai/diagnose` with `{"inputText": "...", "k": 3}`
//! - `POST /ai/process-voice` with `{"inputText": "..."}`

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};

use crate::assistant::{Assistant, AssistantReply, DEFAULT_ASSISTANT_TOP_K};
use crate::classifier::{ClassifierError, InferenceEngine, Prediction};

/// Shared handler state.
#[derive(Debug, Clone)]
pub struct AppState {
    assistant: Assistant,
}

impl AppState {
    pub fn new(engine: Arc<InferenceEngine>) -> Self {
        Self {
            assistant: Assistant::new(engine),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiagnoseRequest {
    pub input_text: String,
    #[serde(default)]
    pub k: Option<usize>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoiceRequest {
    pub input_text: String,
}

#[derive(Debug, Serialize, PartialEq)]
pub struct Diagnosis {
    pub disease: String,
    pub probability: f32,
}

impl From<Prediction> for Diagnosis {
    fn from(p: Prediction) -> Self {
        Self {
            disease: p.label,
            probability: p.probability,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct DiagnoseResponse {
    pub diagnoses: Vec<Diagnosis>,
}

#[derive(Debug, Serialize)]
pub struct VoiceResponse {
    pub response: AssistantReply,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

/// A failed request, rendered as `{"error": "..."}`.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }

    fn internal(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: message.into(),
        }
    }
}

impl From<ClassifierError> for ApiError {
    fn from(err: ClassifierError) -> Self {
        match err {
            ClassifierError::ValidationError(msg) => Self::bad_request(msg),
            other => {
                log::error!("Inference failed: {}", other);
                Self::internal(other.to_string())
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(ErrorBody { error: self.message })).into_response()
    }
}

fn require_text(text: &str) -> Result<(), ApiError> {
    if text.trim().is_empty() {
        return Err(ApiError::bad_request("inputText must not be empty"));
    }
    Ok(())
}

/// Runs blocking model work off the async executor.
async fn blocking<T, F>(work: F) -> Result<T, ApiError>
where
    F: FnOnce() -> Result<T, ClassifierError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| ApiError::internal(format!("Inference task failed: {}", e)))?
        .map_err(ApiError::from)
}

pub async fn health_check() -> (StatusCode, Json<HealthResponse>) {
    let health = HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    };
    (StatusCode::OK, Json(health))
}

/// Top-k diseases for a symptom description.
pub async fn diagnose(
    State(state): State<AppState>,
    Json(payload): Json<DiagnoseRequest>,
) -> Result<(StatusCode, Json<DiagnoseResponse>), ApiError> {
    require_text(&payload.input_text)?;
    let k = payload.k.unwrap_or(DEFAULT_ASSISTANT_TOP_K);
    let engine = Arc::clone(state.assistant.engine());
    let predictions = blocking(move || engine.predict_top_k(&payload.input_text, k)).await?;
    let diagnoses = predictions.into_iter().map(Diagnosis::from).collect();
    Ok((StatusCode::OK, Json(DiagnoseResponse { diagnoses })))
}

pub async fn process_voice(
    State(state): State<AppState>,
    Json(payload): Json<VoiceRequest>,
) -> Result<(StatusCode, Json<VoiceResponse>), ApiError> {
    require_text(&payload.input_text)?;
    let assistant = state.assistant.clone();
    let response = blocking(move || assistant.respond(&payload.input_text)).await?;
    Ok((StatusCode::OK, Json(VoiceResponse { response })))
}

pub fn router(engine: Arc<InferenceEngine>) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/ai/diagnose", post(diagnose))
        .route("/ai/process-voice", post(process_voice))
        .with_state(AppState::new(engine))
}

/// Binds `addr` and serves until the process is stopped.
pub async fn serve(engine: Arc<InferenceEngine>, addr: SocketAddr) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    log::info!("Listening on {}", listener.local_addr()?);
    axum::serve(listener, router(engine)).await
}
