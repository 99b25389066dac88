use crate::config::Config;
use crate::errors::AppError;
use crate::service::KeysService;
use crate::transcoding::{Format, MIME_CSV, MIME_JSON};
use axum::{
    body::Bytes,
    extract::State,
    http::{header, HeaderMap, StatusCode, Uri},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use std::sync::Arc;

/// Shared application state injected into handlers.
pub struct AppState {
    /// Resolution service holding the current lookup snapshot.
    pub service: KeysService,
    /// Application configuration.
    pub config: Config,
}

/// Health check endpoint.
///
/// Reports the served model and snapshot. Reference data is only probed when
/// `HEALTHCHECK_PROBE_REFERENCE_DATA` is enabled; a failed probe returns 503.
pub async fn health(State(state): State<Arc<AppState>>) -> (StatusCode, Json<serde_json::Value>) {
    let snapshot = state.service.snapshot();

    match state
        .service
        .health(state.config.healthcheck_probe_reference_data)
    {
        Ok(()) => (
            StatusCode::OK,
            Json(json!({
                "status": "healthy",
                "service": "rust-keys-server",
                "version": env!("CARGO_PKG_VERSION"),
                "model": snapshot.config.model,
                "generation": snapshot.generation,
                "loaded_at": snapshot.loaded_at,
            })),
        ),
        Err(e) => {
            tracing::error!("Health probe failed: {}", e);
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({
                    "status": "unhealthy",
                    "detail": e.to_string(),
                })),
            )
        }
    }
}

/// POST .../get_keys
///
/// Body format comes from `Content-Type`, response format from `Accept`.
pub async fn get_keys(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, AppError> {
    let input = request_format(&headers)?;
    let output = response_format(&headers)?;
    tracing::info!(
        "POST get_keys - {} bytes, {:?} -> {:?}",
        body.len(),
        input,
        output
    );

    let (payload, summary) = state.service.get_keys(&body, input, output).await?;
    tracing::debug!(
        "get_keys produced {} rows ({} bytes)",
        summary.total_rows(),
        payload.len()
    );

    Ok((
        StatusCode::OK,
        [(header::CONTENT_TYPE, output.mime())],
        payload,
    )
        .into_response())
}

/// POST .../reload
pub async fn reload(State(state): State<Arc<AppState>>) -> Result<Json<serde_json::Value>, AppError> {
    let snapshot = state.service.reload().await?;
    Ok(Json(json!({
        "status": "reloaded",
        "model": snapshot.config.model,
        "generation": snapshot.generation,
        "loaded_at": snapshot.loaded_at,
    })))
}

pub async fn not_found(uri: Uri) -> AppError {
    AppError::NotFound(format!("no route for {}", uri.path()))
}

/// Reads the body format from `Content-Type`.
pub fn request_format(headers: &HeaderMap) -> Result<Format, AppError> {
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .ok_or_else(|| AppError::BadRequest("missing Content-Type header".to_string()))?
        .to_str()
        .map_err(|_| AppError::BadRequest("Content-Type header is not valid text".to_string()))?;
    Ok(Format::from_mime(content_type)?)
}

/// Picks the first producible media range from `Accept`.
///
/// A missing header, `*/*` and `application/*` select JSON; `text/*` selects CSV.
/// Ranges with `q=0` are skipped.
pub fn response_format(headers: &HeaderMap) -> Result<Format, AppError> {
    let accept = match headers.get(header::ACCEPT) {
        Some(value) => value
            .to_str()
            .map_err(|_| AppError::BadRequest("Accept header is not valid text".to_string()))?,
        None => return Ok(Format::Json),
    };
    if accept.trim().is_empty() {
        return Ok(Format::Json);
    }

    for range in accept.split(',') {
        let mut parts = range.split(';').map(str::trim);
        let media = parts.next().unwrap_or_default().to_ascii_lowercase();
        let refused = parts.any(|p| {
            p.strip_prefix("q=")
                .and_then(|q| q.parse::<f32>().ok())
                .is_some_and(|q| q <= 0.0)
        });
        if refused {
            continue;
        }
        match media.as_str() {
            MIME_JSON | "application/*" | "*/*" => return Ok(Format::Json),
            MIME_CSV | "text/*" => return Ok(Format::Csv),
            _ => {}
        }
    }

    Err(AppError::NotAcceptable(format!(
        "cannot produce any of '{}'; supported: {}, {}",
        accept, MIME_CSV, MIME_JSON
    )))
}
