use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

use crate::services::PipelineError;

/// Application-level errors
#[derive(thiserror::Error, Debug)]
pub enum AppError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("could not process that request: {0}")]
    Pipeline(#[from] PipelineError),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
            AppError::InvalidInput(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            AppError::Pipeline(PipelineError::Collaborator { .. }) => {
                (StatusCode::BAD_GATEWAY, self.to_string())
            }
            AppError::Pipeline(PipelineError::StageOrder { .. }) => {
                (StatusCode::INTERNAL_SERVER_ERROR, self.to_string())
            }
            AppError::Pipeline(_) => (StatusCode::UNPROCESSABLE_ENTITY, self.to_string()),
        };

        if status.is_server_error() {
            tracing::error!(status = %status, error = %message, "Request failed");
        } else {
            tracing::warn!(status = %status, error = %message, "Request rejected");
        }

        let body = Json(json!({
            "error": message
        }));

        (status, body).into_response()
    }
}

pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::{CollaboratorError, ReconcileError, Stage};

    #[test]
    fn test_status_mapping() {
        let cases = vec![
            (AppError::NotFound("session".into()), StatusCode::NOT_FOUND),
            (AppError::InvalidInput("top_k".into()), StatusCode::BAD_REQUEST),
            (
                AppError::Pipeline(PipelineError::MalformedOutput {
                    stage: Stage::Match,
                    reason: "expected array".into(),
                }),
                StatusCode::UNPROCESSABLE_ENTITY,
            ),
            (
                AppError::Pipeline(PipelineError::Reconciliation(ReconcileError::EmptyName)),
                StatusCode::UNPROCESSABLE_ENTITY,
            ),
            (
                AppError::Pipeline(PipelineError::Collaborator {
                    stage: Stage::Extraction,
                    source: CollaboratorError::EmptyContent,
                }),
                StatusCode::BAD_GATEWAY,
            ),
            (
                AppError::Pipeline(PipelineError::StageOrder {
                    stage: Stage::Recommend,
                    reason: "previous stage has not completed",
                }),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];

        for (error, expected) in cases {
            assert_eq!(error.into_response().status(), expected);
        }
    }

    #[test]
    fn test_pipeline_message_prefix() {
        let error = AppError::Pipeline(PipelineError::Reconciliation(ReconcileError::EmptyName));
        assert!(error.to_string().starts_with("could not process that request: "));
    }
}
