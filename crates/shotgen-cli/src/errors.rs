use axum::extract::multipart::MultipartError;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use shotgen_contracts::api::ErrorResponse;
use shotgen_engine::PipelineError;
use thiserror::Error as ThisError;

#[derive(ThisError, Debug)]
pub enum Error {
    /// Malformed request: missing form field, unreadable value
    #[error("{message}")]
    BadRequest { message: String },

    /// Failure inside the generation pipeline
    #[error(transparent)]
    Pipeline(#[from] PipelineError),

    /// Multipart body could not be parsed or exceeded the size limit
    #[error("Failed to parse multipart data: {0}")]
    Multipart(#[from] MultipartError),

    /// Failure outside the pipeline, e.g. a worker that did not finish
    #[error("{message}")]
    Internal { message: String },
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

impl Error {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::BadRequest {
            message: message.into(),
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            Error::BadRequest { .. } => StatusCode::BAD_REQUEST,
            Error::Pipeline(err) if err.is_client_error() => StatusCode::BAD_REQUEST,
            Error::Pipeline(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Error::Multipart(err) => err.status(),
            Error::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(status = status.as_u16(), "request failed: {:#}", self);
        } else {
            tracing::warn!(status = status.as_u16(), "request rejected: {}", self);
        }
        (status, Json(ErrorResponse::new(self.to_string()))).into_response()
    }
}
