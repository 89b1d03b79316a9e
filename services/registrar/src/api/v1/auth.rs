//! Account and session endpoints.
//!
//! Endpoints:
//! - POST /v1/auth/signup - Create an account
//! - POST /v1/auth/login  - Exchange credentials for a bearer token
//! - POST /v1/auth/logout - Revoke the presented token
//! - GET  /v1/auth/whoami - Current identity and roles

use axum::{
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use campus_id::UserId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use validator::Validate;

use super::validation_error;
use crate::api::error::ApiError;
use crate::api::request_context::RequestContext;
use crate::api::tokens::{self, hash_token};
use crate::db::StoreError;
use crate::model::{Role, RoleSet, UserProfile, UserRecord};
use crate::state::AppState;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/signup", post(signup))
        .route("/login", post(login))
        .route("/logout", post(logout))
        .route("/whoami", get(whoami))
}

// =============================================================================
// Request/Response Types
// =============================================================================

#[derive(Debug, Deserialize, Validate)]
pub struct SignupRequest {
    #[validate(email(message = "must be a valid email address"))]
    pub email: String,

    #[validate(length(min = 6, message = "must be at least 6 characters"))]
    pub password: String,

    #[validate(length(min = 1, max = 200, message = "must be 1 to 200 characters"))]
    pub full_name: String,

    /// "student", "coordinator", or both.
    #[validate(length(min = 1, message = "at least one role is required"))]
    pub roles: Vec<String>,

    #[serde(default)]
    pub student_number: Option<String>,
    #[serde(default)]
    pub department: Option<String>,
    #[serde(default)]
    pub year: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct UserResponse {
    pub id: UserId,
    pub email: String,
    pub full_name: String,
    pub roles: Vec<String>,
    pub profile: UserProfile,
    pub created_at: DateTime<Utc>,
}

impl From<&UserRecord> for UserResponse {
    fn from(user: &UserRecord) -> Self {
        Self {
            id: user.user_id,
            email: user.email.clone(),
            full_name: user.full_name.clone(),
            roles: user.roles.labels(),
            profile: user.profile.clone(),
            created_at: user.created_at,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct SessionResponse {
    pub access_token: String,
    pub token_type: &'static str,
    pub expires_at: DateTime<Utc>,
    pub user: UserResponse,
}

#[derive(Debug, Serialize)]
struct WhoAmIResponse {
    user_id: UserId,
    email: String,
    roles: Vec<String>,
}

fn parse_roles(labels: &[String], request_id: &str) -> Result<RoleSet, ApiError> {
    let mut roles = Vec::with_capacity(labels.len());
    for label in labels {
        let Some(role) = Role::parse(label.trim().to_lowercase().as_str()) else {
            return Err(ApiError::bad_request(
                "invalid_role",
                format!("Unknown role '{label}'; expected 'student' or 'coordinator'"),
            )
            .with_request_id(request_id.to_string()));
        };
        roles.push(role);
    }
    Ok(RoleSet::new(roles))
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

// =============================================================================
// Handlers
// =============================================================================

/// POST /v1/auth/signup
async fn signup(
    State(state): State<AppState>,
    ctx: RequestContext,
    Json(req): Json<SignupRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let request_id = ctx.request_id;
    req.validate()
        .map_err(|e| validation_error(e, &request_id))?;

    let roles = parse_roles(&req.roles, &request_id)?;
    let password_hash = tokens::spawn_hash_password(req.password, &request_id).await?;
    let user = UserRecord {
        user_id: UserId::new(),
        email: req.email.trim().to_lowercase(),
        full_name: req.full_name.trim().to_string(),
        password_hash,
        roles,
        profile: UserProfile {
            student_number: non_blank(req.student_number),
            department: non_blank(req.department),
            year: non_blank(req.year),
            phone: non_blank(req.phone),
        },
        created_at: Utc::now(),
    };

    match state.users().insert_user(&user).await {
        Ok(()) => {}
        Err(StoreError::Duplicate { .. }) => {
            return Err(ApiError::conflict(
                "email_taken",
                "An account with this email already exists",
            )
            .with_request_id(request_id));
        }
        Err(e) => {
            tracing::error!(error = %e, request_id = %request_id, "Failed to create user");
            return Err(
                ApiError::service_unavailable("store_unavailable", "Failed to create account")
                    .with_retry_after_seconds(1)
                    .with_request_id(request_id),
            );
        }
    }

    tracing::info!(
        user_id = %user.user_id,
        roles = ?user.roles.labels(),
        request_id = %request_id,
        "User signed up"
    );

    Ok((StatusCode::CREATED, Json(UserResponse::from(&user))))
}

/// POST /v1/auth/login
async fn login(
    State(state): State<AppState>,
    ctx: RequestContext,
    Json(req): Json<LoginRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let request_id = ctx.request_id;
    let invalid = || {
        ApiError::unauthorized("invalid_credentials", "Email or password is incorrect")
            .with_request_id(request_id.clone())
    };

    let email = req.email.trim().to_lowercase();
    let user = state
        .users()
        .find_user_by_email(&email)
        .await
        .map_err(|e| {
            tracing::error!(error = %e, request_id = %request_id, "Failed to load user");
            ApiError::service_unavailable("store_unavailable", "Failed to log in")
                .with_retry_after_seconds(1)
                .with_request_id(request_id.clone())
        })?
        .ok_or_else(invalid)?;

    let verified =
        tokens::spawn_verify_password(req.password, user.password_hash.clone(), &request_id)
            .await?;
    if !verified {
        return Err(invalid());
    }

    let (access_token, session) =
        tokens::create_session(state.users(), &user, state.session_ttl(), &request_id).await?;

    tracing::info!(user_id = %user.user_id, request_id = %request_id, "User logged in");

    Ok(Json(SessionResponse {
        access_token,
        token_type: "Bearer",
        expires_at: session.expires_at,
        user: UserResponse::from(&user),
    }))
}

/// POST /v1/auth/logout
async fn logout(
    State(state): State<AppState>,
    ctx: RequestContext,
) -> Result<impl IntoResponse, ApiError> {
    ctx.actor()?;
    let Some(token) = ctx.token.as_deref() else {
        return Err(ApiError::unauthorized("unauthorized", "Missing Authorization token")
            .with_request_id(ctx.request_id));
    };

    state
        .users()
        .delete_session(&hash_token(token))
        .await
        .map_err(|e| {
            tracing::error!(error = %e, request_id = %ctx.request_id, "Failed to revoke session");
            ApiError::service_unavailable("store_unavailable", "Failed to log out")
                .with_request_id(ctx.request_id.clone())
        })?;

    Ok(StatusCode::NO_CONTENT)
}

/// GET /v1/auth/whoami
async fn whoami(ctx: RequestContext) -> Result<impl IntoResponse, ApiError> {
    let actor = ctx.actor()?;
    Ok(Json(WhoAmIResponse {
        user_id: actor.user_id,
        email: actor.email.clone(),
        roles: actor.roles.labels(),
    }))
}
