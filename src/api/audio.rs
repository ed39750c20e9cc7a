use crate::api::middleware::RequireAuth;
use crate::error::{AppError, Result};
use crate::models::{FileType, GenerateRequest, GenerateResponse, ResetResponse, StatusResponse};
use crate::services::orchestrator::PlayableLocation;
use crate::state::AppState;
use axum::{
    body::Body,
    extract::{Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Json, Redirect, Response},
    routing::{get, post},
    Router,
};
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio_util::io::ReaderStream;

pub fn audio_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/generate/:session_id", post(generate))
        .route("/reset/:session_id", post(reset))
        .route("/status/:session_id", get(status))
        .route("/stream/:session_id", get(stream))
        .route("/hls/:session_id/stream.m3u8", get(hls_playlist))
        .route("/hls/:session_id/:segment", get(hls_segment))
        .route("/voices", get(voices))
}

/// Session ids are used to build local filesystem paths (see `SessionPaths`)
/// and object-store key prefixes, so they're restricted to a safe charset at
/// the boundary rather than trusted as opaque strings.
fn validate_session_id(session_id: &str) -> Result<()> {
    let valid = !session_id.is_empty()
        && session_id.len() <= 128
        && session_id.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if valid {
        Ok(())
    } else {
        Err(AppError::InputInvalid(format!("invalid session id: {session_id}")))
    }
}

async fn generate(
    State(state): State<Arc<AppState>>,
    RequireAuth(claims): RequireAuth,
    Path(session_id): Path<String>,
    Json(req): Json<GenerateRequest>,
) -> Result<Json<GenerateResponse>> {
    validate_session_id(&session_id)?;
    let resp = state
        .orchestrator
        .start_generation(&claims.sub, &session_id, req)
        .await?;
    Ok(Json(resp))
}

async fn reset(
    State(state): State<Arc<AppState>>,
    RequireAuth(claims): RequireAuth,
    Path(session_id): Path<String>,
) -> Result<Json<ResetResponse>> {
    validate_session_id(&session_id)?;
    state.orchestrator.reset(&claims.sub, &session_id).await?;
    Ok(Json(ResetResponse { status: "reset", session_id }))
}

async fn status(
    State(state): State<Arc<AppState>>,
    RequireAuth(claims): RequireAuth,
    Path(session_id): Path<String>,
) -> Result<Json<StatusResponse>> {
    validate_session_id(&session_id)?;
    let resp = state.orchestrator.status(&claims.sub, &session_id).await?;
    Ok(Json(resp))
}

async fn stream(
    State(state): State<Arc<AppState>>,
    RequireAuth(claims): RequireAuth,
    Path(session_id): Path<String>,
    headers: HeaderMap,
) -> Result<Response> {
    validate_session_id(&session_id)?;
    match state.orchestrator.resolve_playable(&claims.sub, &session_id).await? {
        PlayableLocation::Redirect(url) => Ok(Redirect::temporary(&url).into_response()),
        PlayableLocation::NotFound => Err(AppError::NotFound(format!("no audio for session {session_id}"))),
        PlayableLocation::Local { path, file_type } => {
            let content_type = match file_type {
                FileType::Wav => "audio/wav",
                FileType::Mp3 => "audio/mpeg",
            };
            serve_ranged_file(&path, content_type, headers.get(header::RANGE)).await
        }
    }
}

async fn hls_playlist(
    State(state): State<Arc<AppState>>,
    RequireAuth(claims): RequireAuth,
    Path(session_id): Path<String>,
) -> Result<Response> {
    validate_session_id(&session_id)?;
    match state.orchestrator.hls_playlist(&claims.sub, &session_id).await? {
        Some(bytes) => Ok((
            [(header::CONTENT_TYPE, "application/vnd.apple.mpegurl")],
            bytes,
        )
            .into_response()),
        None => Err(AppError::NotFound(format!("no HLS playlist for session {session_id}"))),
    }
}

async fn hls_segment(
    State(state): State<Arc<AppState>>,
    RequireAuth(claims): RequireAuth,
    Path((session_id, segment)): Path<(String, String)>,
) -> Result<Response> {
    validate_session_id(&session_id)?;
    let name_ok = segment.starts_with("segment_")
        && segment.ends_with(".ts")
        && segment.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.');
    if !name_ok {
        return Err(AppError::InputInvalid(
            "segment name must match segment_*.ts".to_string(),
        ));
    }

    match state.orchestrator.hls_segment(&claims.sub, &session_id, &segment).await? {
        PlayableLocation::Redirect(url) => Ok((
            StatusCode::FOUND,
            [(header::LOCATION, url)],
        )
            .into_response()),
        PlayableLocation::NotFound => Err(AppError::NotFound(format!("segment {segment} not found"))),
        PlayableLocation::Local { path, .. } => {
            let bytes = tokio::fs::read(&path).await.map_err(AppError::Io)?;
            Ok(([(header::CONTENT_TYPE, "video/mp2t")], bytes).into_response())
        }
    }
}

#[derive(Debug, Deserialize)]
struct VoicesQuery {
    #[serde(default)]
    force: bool,
    api_key: Option<String>,
}

async fn voices(
    State(state): State<Arc<AppState>>,
    RequireAuth(_claims): RequireAuth,
    Query(params): Query<VoicesQuery>,
) -> Result<Json<Value>> {
    let catalog = state
        .tts
        .get_voice_catalog(params.force, params.api_key.as_deref())
        .await?;
    Ok(Json(catalog))
}

/// Serves `path` honoring a single-range `Range: bytes=a-b` request, since the
/// progressive WAV may still be growing while a client is seeking within it.
async fn serve_ranged_file(
    path: &std::path::Path,
    content_type: &'static str,
    range_header: Option<&axum::http::HeaderValue>,
) -> Result<Response> {
    let mut file = tokio::fs::File::open(path).await.map_err(AppError::Io)?;
    let total_len = file.metadata().await.map_err(AppError::Io)?.len();

    let range = range_header
        .and_then(|v| v.to_str().ok())
        .and_then(parse_range_header)
        .map(|(start, end)| (start, end.unwrap_or(total_len.saturating_sub(1)).min(total_len.saturating_sub(1))));

    match range {
        Some((start, end)) if start <= end && total_len > 0 => {
            let len = end - start + 1;
            file.seek(std::io::SeekFrom::Start(start)).await.map_err(AppError::Io)?;
            let limited = file.take(len);
            let body = Body::from_stream(ReaderStream::new(limited));

            let response = Response::builder()
                .status(StatusCode::PARTIAL_CONTENT)
                .header(header::CONTENT_TYPE, content_type)
                .header(header::ACCEPT_RANGES, "bytes")
                .header(header::CONTENT_RANGE, format!("bytes {start}-{end}/{total_len}"))
                .header(header::CONTENT_LENGTH, len.to_string())
                .header(header::CACHE_CONTROL, "no-cache")
                .body(body)
                .map_err(|e| AppError::Internal(anyhow::anyhow!(e)))?;
            Ok(response)
        }
        _ => {
            let body = Body::from_stream(ReaderStream::new(file));
            let response = Response::builder()
                .status(StatusCode::OK)
                .header(header::CONTENT_TYPE, content_type)
                .header(header::ACCEPT_RANGES, "bytes")
                .header(header::CONTENT_LENGTH, total_len.to_string())
                .header(header::CACHE_CONTROL, "no-cache")
                .body(body)
                .map_err(|e| AppError::Internal(anyhow::anyhow!(e)))?;
            Ok(response)
        }
    }
}

/// Parses a single-range `bytes=start-end` (end optional) header value.
fn parse_range_header(value: &str) -> Option<(u64, Option<u64>)> {
    let spec = value.strip_prefix("bytes=")?;
    let (start_str, end_str) = spec.split_once('-')?;
    let start = start_str.parse::<u64>().ok()?;
    let end = if end_str.is_empty() { None } else { end_str.parse::<u64>().ok() };
    Some((start, end))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_a_bounded_range() {
        assert_eq!(parse_range_header("bytes=0-99"), Some((0, Some(99))));
    }

    #[test]
    fn parses_an_open_ended_range() {
        assert_eq!(parse_range_header("bytes=500-"), Some((500, None)));
    }

    #[test]
    fn rejects_a_malformed_range() {
        assert_eq!(parse_range_header("not-a-range"), None);
    }
}
