use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use std::fmt::Display;

use crate::services::camera_client::CameraError;
use crate::services::meter_monitor::MonitorError;
use crate::services::orchestrator::CaptureError;
use crate::services::reading_parser::ParseError;
use crate::services::reading_validator::ValidationError;
use crate::services::snapshot_archive::SnapshotError;
use crate::services::vision::VisionError;

/// Mirrors the error `kind` values spec'd for HTTP error bodies (spec.md §6/§7).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, utoipa::ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    ConfigInvalid,
    NotFound,
    NetworkError,
    Timeout,
    HttpStatus,
    InvalidImage,
    VisionUnavailable,
    ProviderHttpError,
    ProviderRateLimited,
    ParseError,
    DuplicateCapture,
    WriteError,
    Internal,
}

impl ErrorKind {
    fn default_status(self) -> StatusCode {
        match self {
            ErrorKind::ConfigInvalid => StatusCode::BAD_REQUEST,
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::NetworkError
            | ErrorKind::Timeout
            | ErrorKind::HttpStatus
            | ErrorKind::InvalidImage
            | ErrorKind::VisionUnavailable
            | ErrorKind::ProviderHttpError
            | ErrorKind::ProviderRateLimited => StatusCode::BAD_GATEWAY,
            ErrorKind::ParseError => StatusCode::UNPROCESSABLE_ENTITY,
            ErrorKind::DuplicateCapture => StatusCode::OK,
            ErrorKind::WriteError | ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    status: &'static str,
    kind: ErrorKind,
    message: String,
}

#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub kind: ErrorKind,
    pub message: String,
}

impl AppError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            status: kind.default_status(),
            kind,
            message: message.into(),
        }
    }

    pub fn with_status(kind: ErrorKind, status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            kind,
            message: message.into(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, message)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            status: "error",
            kind: self.kind,
            message: self.message,
        };
        (self.status, Json(body)).into_response()
    }
}

pub type AppResult<T> = Result<T, AppError>;

pub fn internal_error(err: impl Display) -> AppError {
    tracing::error!(error = %err, "internal error");
    AppError::internal("internal server error")
}

impl From<CameraError> for AppError {
    fn from(err: CameraError) -> Self {
        match err {
            CameraError::Timeout => AppError::new(ErrorKind::Timeout, err.to_string()),
            CameraError::HttpStatus { .. } => AppError::new(ErrorKind::HttpStatus, err.to_string()),
            CameraError::InvalidImage => AppError::new(ErrorKind::InvalidImage, err.to_string()),
            CameraError::NetworkError(_) => AppError::new(ErrorKind::NetworkError, err.to_string()),
        }
    }
}

impl From<VisionError> for AppError {
    fn from(err: VisionError) -> Self {
        match err {
            VisionError::Unavailable => AppError::new(ErrorKind::VisionUnavailable, err.to_string()),
            VisionError::ProviderHttpError { .. } => {
                AppError::new(ErrorKind::ProviderHttpError, err.to_string())
            }
            VisionError::RateLimited => AppError::new(ErrorKind::ProviderRateLimited, err.to_string()),
            VisionError::UnknownProvider(_) | VisionError::UnknownPromptProfile(_) => {
                AppError::new(ErrorKind::ConfigInvalid, err.to_string())
            }
        }
    }
}

impl From<ParseError> for AppError {
    fn from(err: ParseError) -> Self {
        AppError::new(ErrorKind::ParseError, err.to_string())
    }
}

impl From<ValidationError> for AppError {
    fn from(err: ValidationError) -> Self {
        match err {
            ValidationError::DuplicateCapture => AppError::new(ErrorKind::DuplicateCapture, err.to_string()),
            ValidationError::NegativeTotal(_) => AppError::new(ErrorKind::ParseError, err.to_string()),
        }
    }
}

impl From<SnapshotError> for AppError {
    fn from(err: SnapshotError) -> Self {
        match err {
            SnapshotError::NotFound(_) => AppError::not_found(err.to_string()),
            SnapshotError::Io(_) | SnapshotError::Persist(_) | SnapshotError::Json(_) => {
                AppError::new(ErrorKind::WriteError, err.to_string())
            }
        }
    }
}

impl From<MonitorError> for AppError {
    fn from(err: MonitorError) -> Self {
        match err {
            MonitorError::Camera(inner) => inner.into(),
            MonitorError::Vision(inner) => inner.into(),
            MonitorError::Parse(inner) => inner.into(),
            MonitorError::Validation(inner) => inner.into(),
            MonitorError::Snapshot(inner) => inner.into(),
            MonitorError::VisionExhausted(_) => AppError::new(ErrorKind::VisionUnavailable, err.to_string()),
            MonitorError::CycleTimeout => AppError::new(ErrorKind::Timeout, err.to_string()),
            MonitorError::DuplicateCapture => AppError::new(ErrorKind::DuplicateCapture, err.to_string()),
        }
    }
}

impl From<CaptureError> for AppError {
    fn from(err: CaptureError) -> Self {
        match err {
            CaptureError::UnknownMeter => AppError::not_found("unknown meter"),
            CaptureError::Failed(inner) => inner.into(),
        }
    }
}

pub fn map_db_error(err: sqlx::Error) -> AppError {
    let status = match &err {
        sqlx::Error::RowNotFound => StatusCode::NOT_FOUND,
        sqlx::Error::Database(db) => match db.code().as_deref() {
            Some("23505") => StatusCode::CONFLICT,    // unique_violation
            Some("23503") => StatusCode::BAD_REQUEST, // foreign_key_violation
            Some("23502") => StatusCode::BAD_REQUEST, // not_null_violation
            Some("22P02") => StatusCode::BAD_REQUEST, // invalid_text_representation
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        },
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };

    tracing::error!(error = %err, status = %status, "database error");

    let (kind, message) = match status {
        StatusCode::NOT_FOUND => (ErrorKind::NotFound, "resource not found"),
        StatusCode::CONFLICT => (ErrorKind::WriteError, "resource already exists"),
        StatusCode::BAD_REQUEST => (ErrorKind::WriteError, "invalid request"),
        _ => (ErrorKind::WriteError, "database error"),
    };

    AppError::with_status(kind, status, message)
}
