use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use chrono::NaiveDate;
use thiserror::Error;
use tracing::error;

use crate::models::TemplateId;

/// Failures reported by a template or instance store.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("template {0} does not exist")]
    NotFound(TemplateId),
    #[error("an instance of template {template_id} already exists on {date}")]
    Conflict {
        template_id: TemplateId,
        date: NaiveDate,
    },
}

#[derive(Debug, Clone, Error, PartialEq)]
pub enum SchedulerError {
    #[error("failed to read from store: {0}")]
    StoreReadFailed(StoreError),
    #[error("failed to write to store: {0}")]
    StoreWriteFailed(StoreError),
    #[error("template {template_id} is already scheduled for {date}")]
    DuplicateOccurrence {
        template_id: TemplateId,
        date: NaiveDate,
    },
    #[error("invalid template: {0}")]
    InvalidTemplate(String),
    #[error("invalid override: {0}")]
    InvalidOverride(String),
    #[error("template {0} not found")]
    TemplateNotFound(TemplateId),
}

#[derive(Debug)]
pub enum ApiError {
    Unauthorized(String),
    BadRequest(String),
    NotFound(String),
    Conflict(String),
    Unprocessable(String),
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, msg).into_response(),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg).into_response(),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg).into_response(),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, msg).into_response(),
            ApiError::Unprocessable(msg) => {
                (StatusCode::UNPROCESSABLE_ENTITY, msg).into_response()
            }
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg).into_response(),
        }
    }
}

impl From<SchedulerError> for ApiError {
    fn from(value: SchedulerError) -> Self {
        match value {
            SchedulerError::DuplicateOccurrence { .. } => ApiError::Conflict(value.to_string()),
            SchedulerError::TemplateNotFound(_) => ApiError::NotFound(value.to_string()),
            SchedulerError::InvalidTemplate(_) | SchedulerError::InvalidOverride(_) => {
                ApiError::Unprocessable(value.to_string())
            }
            SchedulerError::StoreReadFailed(err) | SchedulerError::StoreWriteFailed(err) => {
                error!("store error: {err}");
                ApiError::Internal("Schedule storage is unavailable".into())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duplicate_maps_to_conflict() {
        let err = SchedulerError::DuplicateOccurrence {
            template_id: 3,
            date: NaiveDate::from_ymd_opt(2024, 1, 29).unwrap(),
        };
        let response = ApiError::from(err).into_response();
        assert_eq!(response.status(), StatusCode::CONFLICT);
    }

    #[test]
    fn test_store_failure_is_hidden() {
        let err = SchedulerError::StoreWriteFailed(StoreError::Unavailable("disk".into()));
        match ApiError::from(err) {
            ApiError::Internal(msg) => assert!(!msg.contains("disk")),
            other => panic!("unexpected mapping: {other:?}"),
        }
    }
}
