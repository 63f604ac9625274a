use axum::{Json, http::StatusCode, response::IntoResponse};
use serde_json::json;
use thiserror::Error;
use tracing::{error, warn};

use super::models::ErrorResponse;
use crate::error::ServiceError;

const INTERNAL_MESSAGE: &str = "An unexpected error occurred. Please try again later.";

#[derive(Debug, Error)]
pub enum ApiError {
    /// Request body or query failed to parse or validate.
    #[error("{0}")]
    InvalidPayload(String),
    #[error(transparent)]
    Service(#[from] ServiceError),
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::InvalidPayload(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ApiError::Service(err) => match err {
                ServiceError::InvalidUrl(_) => StatusCode::BAD_REQUEST,
                ServiceError::UnsupportedPlatform(_) => StatusCode::UNPROCESSABLE_ENTITY,
                ServiceError::NotFound(_) | ServiceError::FormatNotAvailable(_) => {
                    StatusCode::NOT_FOUND
                }
                ServiceError::ExtractionFailed(_) => StatusCode::BAD_GATEWAY,
                ServiceError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            // Clients only ever see the six service codes
            ApiError::InvalidPayload(_) => "INVALID_URL",
            ApiError::Service(err) => err.code(),
        }
    }

    /// Body text; internal details never leave the process.
    fn public_message(&self) -> String {
        match self {
            ApiError::Service(ServiceError::Internal(_)) => INTERNAL_MESSAGE.to_string(),
            other => other.to_string(),
        }
    }

    fn log(&self) {
        match self {
            ApiError::InvalidPayload(_) | ApiError::Service(ServiceError::InvalidUrl(_)) => {}
            ApiError::Service(ServiceError::Internal(detail)) => {
                error!(code = self.code(), detail = %detail, "Unexpected error");
            }
            ApiError::Service(err) => {
                warn!(code = err.code(), message = %err.message(), "Domain error");
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        self.log();
        let status = self.status_code();
        let body = ErrorResponse {
            code: self.code(),
            message: self.public_message(),
        };

        (status, Json(json!(body))).into_response()
    }
}

impl From<serde_json::Error> for ApiError {
    fn from(value: serde_json::Error) -> Self {
        ApiError::InvalidPayload(format!("Invalid request body: {value}"))
    }
}
