use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;
use tracing::error;
use uuid::Uuid;

/// Error payload returned to API clients
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

/// Errors surfaced at the API boundary
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Invalid or malformed metadata YAML file: {0}")]
    InvalidMetadata(String),

    #[error("The uploaded file is not a valid ZIP archive: {0}")]
    InvalidArchive(String),

    #[error("Missing multipart field '{0}'")]
    MissingField(&'static str),

    #[error("Malformed upload request: {0}")]
    BadUpload(String),

    #[error("File with ID {0} not found")]
    FileNotFound(Uuid),

    #[error("File record found, but data does not exist in storage")]
    ObjectMissing,

    #[error("Metadata database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Object storage error: {0}")]
    Storage(String),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::InvalidMetadata(_)
            | ApiError::InvalidArchive(_)
            | ApiError::MissingField(_)
            | ApiError::BadUpload(_) => StatusCode::BAD_REQUEST,
            ApiError::FileNotFound(_) | ApiError::ObjectMissing => StatusCode::NOT_FOUND,
            // Pool exhaustion means the metadata store is unreachable, not
            // that the request was wrong.
            ApiError::Database(sqlx::Error::PoolTimedOut)
            | ApiError::Database(sqlx::Error::PoolClosed) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Database(_) | ApiError::Storage(_) | ApiError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    fn code(&self) -> &'static str {
        match self {
            ApiError::InvalidMetadata(_) => "INVALID_METADATA",
            ApiError::InvalidArchive(_) => "INVALID_ARCHIVE",
            ApiError::MissingField(_) => "MISSING_FIELD",
            ApiError::BadUpload(_) => "BAD_UPLOAD",
            ApiError::FileNotFound(_) => "NOT_FOUND",
            ApiError::ObjectMissing => "OBJECT_MISSING",
            ApiError::Database(_) => "DATABASE_ERROR",
            ApiError::Storage(_) => "STORAGE_ERROR",
            ApiError::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();

        if status.is_server_error() {
            error!(error = %self, code = self.code(), "Request failed");
            metrics::counter!("catalog.requests.failed").increment(1);
        }

        (
            status,
            Json(ErrorResponse {
                error: self.to_string(),
                code: self.code().to_string(),
            }),
        )
            .into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            ApiError::InvalidMetadata("bad".into()).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError::FileNotFound(Uuid::nil()).status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(ApiError::ObjectMissing.status(), StatusCode::NOT_FOUND);
        assert_eq!(
            ApiError::Database(sqlx::Error::PoolTimedOut).status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            ApiError::Storage("put failed".into()).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_error_codes() {
        assert_eq!(ApiError::ObjectMissing.code(), "OBJECT_MISSING");
        assert_eq!(ApiError::MissingField("data_file").code(), "MISSING_FIELD");
    }
}
