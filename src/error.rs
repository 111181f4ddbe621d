use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Validation error: {0}")]
    Validation(#[from] validator::ValidationErrors),

    #[error("Bad request: {0}")]
    BadRequest(anyhow::Error),

    #[error("Not found: {0}")]
    NotFound(anyhow::Error),

    #[error("Authenticity error: {0}")]
    Authenticity(anyhow::Error),

    #[error("Gateway error: {message}")]
    Gateway {
        message: String,
        /// Raw error body returned by the gateway, kept for diagnostics.
        body: Option<serde_json::Value>,
        /// Transport-level failures are retryable; gateway rejections are not.
        retryable: bool,
    },

    #[error("Database error: {0}")]
    Database(anyhow::Error),

    #[error("Internal server error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl AppError {
    pub fn gateway_rejection(message: impl Into<String>, body: Option<serde_json::Value>) -> Self {
        AppError::Gateway {
            message: message.into(),
            body,
            retryable: false,
        }
    }

    pub fn gateway_transport(err: impl std::fmt::Display) -> Self {
        AppError::Gateway {
            message: err.to_string(),
            body: None,
            retryable: true,
        }
    }
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        AppError::Database(anyhow::Error::new(err))
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::Internal(anyhow::Error::new(err))
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        #[derive(Serialize)]
        struct ErrorEnvelope {
            status: bool,
            message: String,
            #[serde(skip_serializing_if = "Option::is_none")]
            error: Option<serde_json::Value>,
        }

        let (status, message, error) = match self {
            AppError::Validation(err) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                "Validation error".to_string(),
                Some(serde_json::json!(err.to_string())),
            ),
            AppError::BadRequest(err) => (StatusCode::BAD_REQUEST, err.to_string(), None),
            AppError::NotFound(err) => (StatusCode::NOT_FOUND, err.to_string(), None),
            AppError::Authenticity(err) => (StatusCode::UNAUTHORIZED, err.to_string(), None),
            AppError::Gateway { message, body, .. } => (
                StatusCode::BAD_GATEWAY,
                format!("Payment gateway error: {}", message),
                body,
            ),
            AppError::Database(err) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Database error".to_string(),
                Some(serde_json::json!(err.to_string())),
            ),
            AppError::Internal(err) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Internal server error".to_string(),
                Some(serde_json::json!(err.to_string())),
            ),
        };

        (
            status,
            Json(ErrorEnvelope {
                status: false,
                message,
                error,
            }),
        )
            .into_response()
    }
}
