use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("invalid input: {0}")]
    InputInvalid(String),

    #[error("unauthorized")]
    Unauthorized,

    #[error("not found: {0}")]
    NotFound(String),

    #[error("upstream TTS rejected the request (status {status})")]
    UpstreamRejected { status: u16, body: String },

    #[error("upstream TTS stream truncated after {chunks} chunks")]
    UpstreamTruncated { chunks: u64 },

    #[error("upstream TTS timed out")]
    UpstreamTimeout,

    #[error("HLS sidecar stdin pipe broken")]
    SidecarPipeBroken,

    #[error("object store error (transient): {0}")]
    TransientStoreError(String),

    #[error("object store error (permanent): {0}")]
    PermanentStoreError(String),

    #[error("audio transcode failed: {0}")]
    TranscodeFailed(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("upstream http error: {0}")]
    Reqwest(#[from] reqwest::Error),

    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl AppError {
    /// Machine-readable error code carried alongside the HTTP status in every
    /// JSON error body (see the `{error, code}` contract).
    pub fn code(&self) -> &'static str {
        match self {
            AppError::InputInvalid(_) => "input_invalid",
            AppError::Unauthorized => "unauthorized",
            AppError::NotFound(_) => "not_found",
            AppError::UpstreamRejected { .. } => "upstream_rejected",
            AppError::UpstreamTruncated { .. } => "upstream_truncated",
            AppError::UpstreamTimeout => "upstream_timeout",
            AppError::SidecarPipeBroken => "sidecar_pipe_broken",
            AppError::TransientStoreError(_) => "transient_store_error",
            AppError::PermanentStoreError(_) => "permanent_store_error",
            AppError::TranscodeFailed(_) => "transcode_failed",
            AppError::Io(_) => "io_error",
            AppError::Reqwest(_) => "upstream_http_error",
            AppError::Internal(_) => "internal_error",
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match &self {
            AppError::InputInvalid(_) => StatusCode::BAD_REQUEST,
            AppError::Unauthorized => StatusCode::UNAUTHORIZED,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::UpstreamRejected { .. }
            | AppError::UpstreamTruncated { .. }
            | AppError::UpstreamTimeout
            | AppError::Reqwest(_) => StatusCode::BAD_GATEWAY,
            AppError::SidecarPipeBroken
            | AppError::TransientStoreError(_)
            | AppError::PermanentStoreError(_)
            | AppError::TranscodeFailed(_)
            | AppError::Io(_)
            | AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        if status == StatusCode::INTERNAL_SERVER_ERROR || status == StatusCode::BAD_GATEWAY {
            tracing::error!(error = %self, code = self.code(), "request failed");
        }

        let body = Json(json!({
            "error": self.to_string(),
            "code": self.code(),
        }));

        (status, body).into_response()
    }
}

pub type Result<T> = std::result::Result<T, AppError>;
