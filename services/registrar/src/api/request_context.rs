//! Request-scoped context extracted from HTTP requests.

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum::http::HeaderMap;
use campus_id::RequestId;

use crate::api::error::ApiError;
use crate::api::tokens;
use crate::model::{Actor, Role};
use crate::state::AppState;

pub const REQUEST_ID_HEADER: &str = "x-request-id";
pub const AUTHORIZATION_HEADER: &str = "Authorization";

#[derive(Debug, Clone)]
pub struct RequestContext {
    pub request_id: String,
    /// The bearer token as presented, for logout.
    pub token: Option<String>,
    /// `None` for anonymous requests.
    pub actor: Option<Actor>,
}

impl RequestContext {
    /// The caller's identity, or 401 if the request carried no token.
    pub fn actor(&self) -> Result<&Actor, ApiError> {
        self.actor.as_ref().ok_or_else(|| {
            ApiError::unauthorized("unauthorized", "Missing or invalid Authorization token")
                .with_request_id(self.request_id.clone())
        })
    }

    /// The caller's identity, or 403 if it lacks `role`.
    pub fn actor_with_role(&self, role: Role) -> Result<&Actor, ApiError> {
        let actor = self.actor()?;
        if !actor.has_role(role) {
            return Err(ApiError::forbidden(
                "forbidden",
                format!("The {role} role is required for this operation"),
            )
            .with_request_id(self.request_id.clone()));
        }
        Ok(actor)
    }
}

fn header_string(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
}

fn bearer_token(headers: &HeaderMap, request_id: &str) -> Result<Option<String>, ApiError> {
    let Some(auth_value) = header_string(headers, AUTHORIZATION_HEADER) else {
        return Ok(None);
    };

    let Some(token) = auth_value.trim().strip_prefix("Bearer ") else {
        return Err(ApiError::unauthorized(
            "invalid_authorization",
            "Authorization must be a Bearer token",
        )
        .with_request_id(request_id.to_string()));
    };

    let token = token.trim();
    if token.is_empty() {
        return Err(ApiError::unauthorized(
            "invalid_authorization",
            "Authorization Bearer token cannot be empty",
        )
        .with_request_id(request_id.to_string()));
    }

    Ok(Some(token.to_string()))
}

impl FromRequestParts<AppState> for RequestContext {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let request_id = header_string(&parts.headers, REQUEST_ID_HEADER)
            .unwrap_or_else(|| RequestId::new().to_string());

        let token = bearer_token(&parts.headers, &request_id)?;
        let actor = match &token {
            Some(token) => {
                Some(tokens::validate_session_token(state.users(), token, &request_id).await?)
            }
            None => None,
        };

        Ok(Self {
            request_id,
            token,
            actor,
        })
    }
}
