use actix_web::{HttpResponse, ResponseError, http::StatusCode};
use serde_json::json;
use std::collections::BTreeMap;
use thiserror::Error;

use crate::model::leave_status::WorkflowError;

/// field name -> messages, rendered inline by clients
pub type FieldErrors = BTreeMap<String, Vec<String>>;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Validation failed")]
    Validation(FieldErrors),
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    Unauthorized(String),
    #[error("{0}")]
    Forbidden(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Conflict(String),
    #[error("Insufficient leave balance: {remaining} day(s) remaining, {requested} requested")]
    InsufficientBalance { remaining: f64, requested: f64 },
    #[error("Internal Server Error")]
    Database(#[from] sqlx::Error),
    #[error("Internal Server Error")]
    Internal(#[from] anyhow::Error),
}

impl AppError {
    pub fn field(field: &str, message: impl Into<String>) -> Self {
        let mut errors = FieldErrors::new();
        errors.insert(field.to_string(), vec![message.into()]);
        AppError::Validation(errors)
    }
}

impl ResponseError for AppError {
    fn status_code(&self) -> StatusCode {
        match self {
            AppError::Validation(_) | AppError::InsufficientBalance { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AppError::Forbidden(_) => StatusCode::FORBIDDEN,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::Database(_) | AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let body = match self {
            AppError::Validation(errors) => json!({
                "message": self.to_string(),
                "errors": errors,
            }),
            AppError::InsufficientBalance { .. } => json!({
                "message": self.to_string(),
                "errors": { "total_days": [self.to_string()] },
            }),
            AppError::Database(e) => {
                tracing::error!(error = %e, "Database error");
                json!({ "message": self.to_string() })
            }
            AppError::Internal(e) => {
                tracing::error!(error = ?e, "Internal error");
                json!({ "message": self.to_string() })
            }
            _ => json!({ "message": self.to_string() }),
        };

        HttpResponse::build(self.status_code()).json(body)
    }
}

impl From<WorkflowError> for AppError {
    fn from(err: WorkflowError) -> Self {
        let message = err.to_string();
        match err {
            WorkflowError::InvalidTransition { .. } => AppError::Conflict(message),
            WorkflowError::NotPermitted(_) | WorkflowError::NotOwner(_) | WorkflowError::SelfReview => {
                AppError::Forbidden(message)
            }
            WorkflowError::CommentRequired => AppError::field("comments", message),
            WorkflowError::ReasonRequired => AppError::field("reason", message),
            WorkflowError::LeaveAlreadyStarted => AppError::field("start_date", message),
            WorkflowError::MedicalCertificateRequired => AppError::field("attachment", message),
        }
    }
}

/// Flattens validator output into field messages.
pub fn field_errors(errors: &validator::ValidationErrors) -> FieldErrors {
    let mut fields = FieldErrors::new();
    for (field, errs) in errors.field_errors() {
        let messages = errs.iter().map(|e| match &e.message {
            Some(m) => m.to_string(),
            None => format!("{} is invalid ({})", field, e.code),
        });
        fields.entry(field.to_string()).or_default().extend(messages);
    }
    fields
}

impl From<validator::ValidationErrors> for AppError {
    fn from(errors: validator::ValidationErrors) -> Self {
        AppError::Validation(field_errors(&errors))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::leave_status::{LeaveAction, LeaveStatus};
    use actix_web::body::to_bytes;

    async fn body_json(err: AppError) -> (StatusCode, serde_json::Value) {
        let resp = err.error_response();
        let status = resp.status();
        let bytes = to_bytes(resp.into_body()).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[actix_web::test]
    async fn validation_errors_are_field_level() {
        let (status, json) = body_json(AppError::field("leave_type_id", "Leave type is required")).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(json["message"], "Validation failed");
        assert_eq!(json["errors"]["leave_type_id"][0], "Leave type is required");
    }

    #[actix_web::test]
    async fn insufficient_balance_points_at_total_days() {
        let (status, json) = body_json(AppError::InsufficientBalance {
            remaining: 1.5,
            requested: 3.0,
        })
        .await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert!(json["errors"]["total_days"][0].as_str().unwrap().contains("1.5"));
    }

    #[actix_web::test]
    async fn internal_errors_hide_details() {
        let (status, json) = body_json(AppError::Internal(anyhow::anyhow!("disk on fire"))).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(json["message"], "Internal Server Error");
    }

    #[test]
    fn workflow_errors_map_to_http_semantics() {
        let conflict: AppError = WorkflowError::InvalidTransition {
            from: LeaveStatus::Approved,
            action: LeaveAction::HrApprove,
        }
        .into();
        assert_eq!(conflict.status_code(), StatusCode::CONFLICT);

        let forbidden: AppError = WorkflowError::SelfReview.into();
        assert_eq!(forbidden.status_code(), StatusCode::FORBIDDEN);

        match AppError::from(WorkflowError::CommentRequired) {
            AppError::Validation(errors) => assert!(errors.contains_key("comments")),
            other => panic!("unexpected {other:?}"),
        }
        match AppError::from(WorkflowError::ReasonRequired) {
            AppError::Validation(errors) => assert!(errors.contains_key("reason")),
            other => panic!("unexpected {other:?}"),
        }
    }
}
