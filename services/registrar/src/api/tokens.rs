//! Session tokens and password hashes.
//!
//! Token format: `cev_at_<32 random bytes, base64url>`. Only the SHA-256 hex
//! digest of a token is ever stored. Passwords are stored as Argon2id PHC
//! strings, salt included.

use argon2::password_hash::{
    self, rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString,
};
use argon2::Argon2;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use chrono::{Duration, Utc};
use rand::Rng;
use sha2::{Digest, Sha256};

use crate::api::error::ApiError;
use crate::db::UserStore;
use crate::model::{Actor, SessionRecord, UserRecord};

pub const SESSION_TOKEN_PREFIX: &str = "cev_at_";

/// Default session lifetime.
pub const SESSION_LIFETIME_HOURS: i64 = 24;

const TOKEN_BYTES: usize = 32;

pub fn generate_session_token() -> String {
    let mut bytes = [0u8; TOKEN_BYTES];
    rand::rng().fill(&mut bytes);
    format!("{}{}", SESSION_TOKEN_PREFIX, URL_SAFE_NO_PAD.encode(bytes))
}

pub fn hash_token(token: &str) -> String {
    hex::encode(Sha256::digest(token.as_bytes()))
}

/// Argon2id PHC string for `password`, with a fresh random salt embedded.
pub fn hash_password(password: &str) -> Result<String, password_hash::Error> {
    let salt = SaltString::generate(&mut OsRng);
    Ok(Argon2::default()
        .hash_password(password.as_bytes(), &salt)?
        .to_string())
}

/// Checks `password` against a stored PHC string. An unparseable hash never
/// verifies.
pub fn verify_password(password: &str, password_hash: &str) -> bool {
    match PasswordHash::new(password_hash) {
        Ok(parsed) => Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok(),
        Err(e) => {
            tracing::warn!(error = %e, "Stored password hash is malformed");
            false
        }
    }
}

/// [`hash_password`] on the blocking pool.
pub async fn spawn_hash_password(password: String, request_id: &str) -> Result<String, ApiError> {
    let failed = |message: String| {
        tracing::error!(error = %message, request_id = %request_id, "Failed to hash password");
        ApiError::internal("internal_error", "Failed to create account")
            .with_request_id(request_id.to_string())
    };

    tokio::task::spawn_blocking(move || hash_password(&password))
        .await
        .map_err(|e| failed(e.to_string()))?
        .map_err(|e| failed(e.to_string()))
}

/// [`verify_password`] on the blocking pool.
pub async fn spawn_verify_password(
    password: String,
    password_hash: String,
    request_id: &str,
) -> Result<bool, ApiError> {
    tokio::task::spawn_blocking(move || verify_password(&password, &password_hash))
        .await
        .map_err(|e| {
            tracing::error!(error = %e, request_id = %request_id, "Password check panicked");
            ApiError::internal("internal_error", "Failed to log in")
                .with_request_id(request_id.to_string())
        })
}

/// Issue a session for `user`, returning the bearer token and its record.
pub async fn create_session(
    users: &dyn UserStore,
    user: &UserRecord,
    lifetime: Duration,
    request_id: &str,
) -> Result<(String, SessionRecord), ApiError> {
    let token = generate_session_token();
    let now = Utc::now();
    let session = SessionRecord {
        token_hash: hash_token(&token),
        user_id: user.user_id,
        created_at: now,
        expires_at: now + lifetime,
    };

    users.insert_session(&session).await.map_err(|e| {
        tracing::error!(error = %e, request_id = %request_id, "Failed to store session");
        ApiError::internal("internal_error", "Failed to create session")
            .with_request_id(request_id.to_string())
    })?;

    Ok((token, session))
}

/// Resolve a bearer token to the identity it was issued for.
pub async fn validate_session_token(
    users: &dyn UserStore,
    token: &str,
    request_id: &str,
) -> Result<Actor, ApiError> {
    let unauthorized = |code: &str, msg: &str| {
        ApiError::unauthorized(code.to_string(), msg.to_string())
            .with_request_id(request_id.to_string())
    };
    let store_failure = |e: crate::db::StoreError| {
        tracing::error!(error = %e, request_id = %request_id, "Failed to validate session");
        ApiError::service_unavailable("store_unavailable", "Failed to validate token")
            .with_request_id(request_id.to_string())
    };

    if !token.starts_with(SESSION_TOKEN_PREFIX) {
        return Err(unauthorized("invalid_token", "Invalid token format"));
    }

    let token_hash = hash_token(token);
    let Some(session) = users
        .find_session(&token_hash)
        .await
        .map_err(store_failure)?
    else {
        return Err(unauthorized("invalid_token", "Token not found or revoked"));
    };

    if session.expires_at <= Utc::now() {
        if let Err(e) = users.delete_session(&token_hash).await {
            tracing::warn!(error = %e, request_id = %request_id, "Failed to remove expired session");
        }
        return Err(unauthorized("token_expired", "Token has expired"));
    }

    let Some(user) = users
        .find_user(&session.user_id)
        .await
        .map_err(store_failure)?
    else {
        return Err(unauthorized("invalid_token", "Token subject no longer exists"));
    };

    Ok(Actor {
        user_id: user.user_id,
        email: user.email,
        roles: user.roles,
    })
}
