use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use ingest::LoadError;
use pipeline::PipelineError;
use serde::Serialize;
use tracing::warn;

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub code: &'static str,
    pub message: String,
}

/// Handler error, rendered as a JSON body with a matching status
#[derive(Debug)]
pub struct AppError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl AppError {
    pub fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
        }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn code(&self) -> &'static str {
        self.code
    }
}

impl From<PipelineError> for AppError {
    fn from(err: PipelineError) -> Self {
        let (status, code) = match &err {
            PipelineError::Load(LoadError::UnsupportedFormat(_)) => {
                (StatusCode::UNSUPPORTED_MEDIA_TYPE, "UNSUPPORTED_FORMAT")
            }
            PipelineError::Load(LoadError::Io { source, .. })
                if source.kind() == std::io::ErrorKind::NotFound =>
            {
                (StatusCode::NOT_FOUND, "NOT_FOUND")
            }
            PipelineError::Load(_) => (StatusCode::UNPROCESSABLE_ENTITY, "LOAD_FAILED"),
            PipelineError::Extraction(_) => (StatusCode::BAD_GATEWAY, "EXTRACTION_FAILED"),
            PipelineError::Store(_) => (StatusCode::SERVICE_UNAVAILABLE, "STORE_FAILED"),
            PipelineError::Vector(_) => (StatusCode::BAD_GATEWAY, "VECTOR_INDEX_FAILED"),
            PipelineError::Cancelled => (StatusCode::SERVICE_UNAVAILABLE, "CANCELLED"),
            PipelineError::Config(_) | PipelineError::Graph(_) | PipelineError::Schema(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR")
            }
        };
        Self::new(status, code, err.to_string())
    }
}

impl From<index::StoreError> for AppError {
    fn from(err: index::StoreError) -> Self {
        Self::new(StatusCode::SERVICE_UNAVAILABLE, "STORE_FAILED", err.to_string())
    }
}

impl From<index::VectorError> for AppError {
    fn from(err: index::VectorError) -> Self {
        Self::new(StatusCode::BAD_GATEWAY, "VECTOR_INDEX_FAILED", err.to_string())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            warn!(code = self.code(), error = %self.message, "Request failed");
        }
        let body = ErrorBody {
            code: self.code,
            message: self.message,
        };
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_status_mapping() {
        let missing = PipelineError::Load(LoadError::Io {
            path: PathBuf::from("missing.txt"),
            source: std::io::Error::from(std::io::ErrorKind::NotFound),
        });
        assert_eq!(AppError::from(missing).status(), StatusCode::NOT_FOUND);

        let unsupported = PipelineError::Load(LoadError::UnsupportedFormat("pptx".to_string()));
        assert_eq!(AppError::from(unsupported).status(), StatusCode::UNSUPPORTED_MEDIA_TYPE);

        assert_eq!(
            AppError::from(PipelineError::Cancelled).status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }

    #[test]
    fn test_response_carries_mapped_status() {
        let unsupported = PipelineError::Load(LoadError::UnsupportedFormat("pptx".to_string()));
        let response = AppError::from(unsupported).into_response();
        assert_eq!(response.status(), StatusCode::UNSUPPORTED_MEDIA_TYPE);

        let response = AppError::from(PipelineError::Cancelled).into_response();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }
}
