//! API v1 routes.

mod auth;
mod events;

use axum::Router;
use validator::ValidationErrors;

use crate::api::error::{ApiError, FieldError};
use crate::state::AppState;

/// Create API v1 routes.
pub fn routes() -> Router<AppState> {
    Router::new()
        .nest("/auth", auth::routes())
        .merge(events::routes())
}

/// 400 carrying one entry per failed field rule.
fn validation_error(errors: ValidationErrors, request_id: &str) -> ApiError {
    let mut details: Vec<FieldError> = Vec::new();
    for (field, errs) in errors.field_errors() {
        for e in errs.iter() {
            details.push(FieldError {
                field: field.to_string(),
                message: e
                    .message
                    .as_ref()
                    .map(|m| m.to_string())
                    .unwrap_or_else(|| e.code.to_string()),
            });
        }
    }
    details.sort_by(|a, b| a.field.cmp(&b.field));

    ApiError::bad_request("invalid_argument", "Request validation failed")
        .with_details(details)
        .with_request_id(request_id.to_string())
}
