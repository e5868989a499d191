use crate::error::ArchiveError;
use crate::ingest::IngestHandle;
use crate::record::Record;
use crate::rotation::{EngineStatus, IngestOutcome};
use axum::body::Bytes;
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;

#[derive(Clone)]
pub struct HttpState {
    pub ingest: IngestHandle,
}

#[derive(Debug, Serialize)]
struct IngestResponse {
    outcome: &'static str,
    path: Option<String>,
}

impl From<IngestOutcome> for IngestResponse {
    fn from(outcome: IngestOutcome) -> Self {
        match outcome {
            IngestOutcome::Opened { path } => Self {
                outcome: "opened",
                path: Some(path.display().to_string()),
            },
            IngestOutcome::Appended => Self {
                outcome: "appended",
                path: None,
            },
            IngestOutcome::Rotated { path, .. } => Self {
                outcome: "rotated",
                path: Some(path.display().to_string()),
            },
        }
    }
}

fn error_response(err: ArchiveError) -> (StatusCode, String) {
    let status = match &err {
        ArchiveError::InvalidTimestamp { .. } | ArchiveError::InvalidRecord { .. } => {
            StatusCode::BAD_REQUEST
        }
        ArchiveError::EngineStopped => StatusCode::SERVICE_UNAVAILABLE,
        ArchiveError::FileSystem { .. } | ArchiveError::Upload { .. } => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    };
    (status, err.to_string())
}

async fn healthz() -> &'static str {
    "ok"
}

async fn get_status(
    State(state): State<HttpState>,
) -> Result<Json<EngineStatus>, (StatusCode, String)> {
    let status = state.ingest.status().await.map_err(error_response)?;
    Ok(Json(status))
}

/// The body is stored as sent, so it is read as bytes rather than through
/// the `Json` extractor.
async fn post_iot_data(
    State(state): State<HttpState>,
    body: Bytes,
) -> Result<Json<IngestResponse>, (StatusCode, String)> {
    let record = Record::from_json_slice(&body).map_err(error_response)?;
    let outcome = state.ingest.ingest(record).await.map_err(error_response)?;
    Ok(Json(outcome.into()))
}

pub fn router(state: HttpState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/v1/status", get(get_status))
        .route("/iot-data", post(post_iot_data))
        .with_state(state)
}
