use std::convert::Infallible;
use std::sync::Arc;

use axum::{
    extract::rejection::{JsonRejection, QueryRejection},
    extract::{Multipart, Query, State},
    response::sse::{Event, KeepAlive, Sse},
    Json,
};
use bytes::Bytes;
use futures::{stream, Stream, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::analysis::errors::AnalysisError;
use crate::errors::AppError;
use crate::extraction::{extract_text, DocumentFormat};
use crate::models::analysis::{AnalysisOptions, AnalysisRequest, AnalysisResult};
use crate::quota::QuotaRecord;
use crate::state::AppState;
use crate::streaming::AnalysisEvent;

#[derive(Deserialize)]
pub struct CallerQuery {
    pub caller_id: String,
}

/// POST /api/v1/analysis
pub async fn handle_analyze(
    State(state): State<AppState>,
    payload: Result<Json<AnalysisRequest>, JsonRejection>,
) -> Result<Json<AnalysisResult>, AppError> {
    let Json(req) = payload?;
    let result = state
        .orchestrator
        .analyze(&req, &CancellationToken::new())
        .await?;
    Ok(Json(result))
}

/// POST /api/v1/analysis/stream
///
/// Emits `progress` and `partial` events as they arrive, then exactly one
/// `complete` or `error`. Dropping the response (client disconnect) cancels
/// the analysis.
pub async fn handle_analyze_stream(
    State(state): State<AppState>,
    payload: Result<Json<AnalysisRequest>, JsonRejection>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, AppError> {
    let Json(mut req) = payload?;
    req.options.streaming = true;

    let (events_tx, events_rx) = mpsc::unbounded_channel::<AnalysisEvent>();
    let (done_tx, done_rx) = oneshot::channel();
    let cancel = CancellationToken::new();

    let orchestrator = Arc::clone(&state.orchestrator);
    let task_cancel = cancel.clone();
    tokio::spawn(async move {
        let mut events = events_tx;
        let outcome = orchestrator.run(&req, &mut events, &task_cancel).await;
        // Dropping `events` here ends the intermediate stream before the
        // terminal event is read.
        drop(events);
        let _ = done_tx.send(outcome);
    });

    let guard = cancel.drop_guard();
    let intermediate = UnboundedReceiverStream::new(events_rx).map(|event| {
        let name = match &event {
            AnalysisEvent::Progress { .. } => "progress",
            AnalysisEvent::Partial { .. } => "partial",
        };
        Ok(sse_event(name, &event))
    });
    let terminal = stream::once(async move {
        let outcome = done_rx.await;
        let _ = guard.disarm();
        Ok(terminal_event(outcome))
    });

    Ok(Sse::new(intermediate.chain(terminal)).keep_alive(KeepAlive::default()))
}

fn terminal_event(outcome: Result<Result<AnalysisResult, AnalysisError>, oneshot::error::RecvError>) -> Event {
    match outcome {
        Ok(Ok(result)) => sse_event("complete", &result),
        Ok(Err(e)) => sse_event("error", &AppError::from(e).detail()),
        Err(_) => {
            let err = AppError::from(AnalysisError::Internal("analysis task ended unexpectedly".into()));
            sse_event("error", &err.detail())
        }
    }
}

fn sse_event<T: Serialize>(name: &str, payload: &T) -> Event {
    Event::default().event(name).json_data(payload).unwrap_or_else(|e| {
        warn!("Failed to encode '{name}' event: {e}");
        Event::default()
            .event("error")
            .data(r#"{"code":"INTERNAL_ERROR","message":"event encoding failed"}"#)
    })
}

struct UploadedFile {
    content_type: Option<String>,
    file_name: Option<String>,
    bytes: Bytes,
}

/// POST /api/v1/analysis/upload
///
/// Multipart fields: `file`, `role_description`, `caller_id` and optional
/// `options` (JSON-encoded `AnalysisOptions`).
pub async fn handle_upload(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<AnalysisResult>, AppError> {
    let mut file = None;
    let mut role_description = String::new();
    let mut caller_id = String::new();
    let mut options = AnalysisOptions::default();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::Validation(format!("Invalid multipart body: {e}")))?
    {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "file" => {
                let content_type = field.content_type().map(str::to_string);
                let file_name = field.file_name().map(str::to_string);
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| AppError::Validation(format!("Failed to read file: {e}")))?;
                file = Some(UploadedFile {
                    content_type,
                    file_name,
                    bytes,
                });
            }
            "role_description" => role_description = read_text(field).await?,
            "caller_id" => caller_id = read_text(field).await?,
            "options" => {
                let raw = read_text(field).await?;
                options = serde_json::from_str(&raw)
                    .map_err(|e| AppError::Validation(format!("Invalid options: {e}")))?;
            }
            other => debug!("Ignoring multipart field '{other}'"),
        }
    }

    let file = file.ok_or_else(|| AppError::Validation("Missing 'file' field".to_string()))?;
    let document = match extract_upload(file).await? {
        Ok(text) => text,
        Err(err) => {
            state.orchestrator.record_failure(&caller_id, &err);
            return Err(err.into());
        }
    };

    let req = AnalysisRequest {
        document,
        role_description,
        caller_id,
        options,
    };
    let result = state
        .orchestrator
        .analyze(&req, &CancellationToken::new())
        .await?;
    Ok(Json(result))
}

/// Outer error: the extraction task itself died. Inner: the document could
/// not be read.
async fn extract_upload(file: UploadedFile) -> Result<Result<String, AnalysisError>, AppError> {
    let format = match DocumentFormat::detect(
        file.content_type.as_deref(),
        file.file_name.as_deref(),
        &file.bytes,
    ) {
        Ok(format) => format,
        Err(e) => return Ok(Err(e.into())),
    };

    let bytes = file.bytes;
    let extracted = tokio::task::spawn_blocking(move || extract_text(&bytes, format))
        .await
        .map_err(|e| AppError::Internal(anyhow::anyhow!("extraction task failed: {e}")))?;
    Ok(extracted.map_err(AnalysisError::from))
}

async fn read_text(field: axum::extract::multipart::Field<'_>) -> Result<String, AppError> {
    field
        .text()
        .await
        .map_err(|e| AppError::Validation(format!("Invalid multipart field: {e}")))
}

/// GET /api/v1/quota
pub async fn handle_quota(
    State(state): State<AppState>,
    query: Result<Query<CallerQuery>, QueryRejection>,
) -> Result<Json<QuotaRecord>, AppError> {
    let Query(params) = query?;
    if params.caller_id.trim().is_empty() {
        return Err(AppError::Validation("caller_id is required".to_string()));
    }
    let record = state.orchestrator.quota().record(&params.caller_id).await;
    Ok(Json(record))
}
