use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use thiserror::Error;

use crate::models::{ApiResponse, TeamId};

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Not enough {what} for training: need at least {required}, found {found}")]
    InsufficientData {
        what: &'static str,
        required: usize,
        found: usize,
    },

    #[error("Team not found: {0}")]
    TeamNotFound(TeamId),

    #[error("A team cannot play itself (team {0})")]
    InvalidMatchup(TeamId),

    #[error("No trained model found. Train a model first.")]
    NoModel,

    #[error("Model file not found: {0}. Train a model first.")]
    ArtifactMissing(String),

    #[error("File not found: {0}")]
    FileNotFound(String),

    #[error("Malformed match history: {0}")]
    Extraction(String),

    #[error("{0}")]
    InvalidInput(String),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

pub type AppResult<T> = std::result::Result<T, AppError>;

impl AppError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::InsufficientData { .. }
            | AppError::InvalidMatchup(_)
            | AppError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            AppError::TeamNotFound(_)
            | AppError::NoModel
            | AppError::ArtifactMissing(_)
            | AppError::FileNotFound(_) => StatusCode::NOT_FOUND,
            AppError::Extraction(_) | AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!("Request failed: {:#}", self);
        } else {
            tracing::info!("Request rejected ({}): {}", status, self);
        }
        (status, Json(ApiResponse::<()>::error(self.to_string()))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_error_categories_to_status() {
        let insufficient = AppError::InsufficientData {
            what: "matches",
            required: 50,
            found: 49,
        };
        assert_eq!(insufficient.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(AppError::TeamNotFound(7).status_code(), StatusCode::NOT_FOUND);
        assert_eq!(AppError::NoModel.status_code(), StatusCode::NOT_FOUND);
        assert_eq!(
            AppError::Internal(anyhow::anyhow!("boom")).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn no_model_message_tells_caller_to_train() {
        assert!(AppError::NoModel.to_string().contains("No trained model"));
    }
}
