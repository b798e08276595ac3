//! Authentication Middleware
//! Mission: Turn a bearer token into a verified session context, or refuse

use crate::auth::{
    api::AuthState,
    jwt::TokenError,
    models::SessionContext,
    revocation::blacklist_key,
};
use crate::error::ApiError;
use axum::{
    extract::{Request, State},
    http::{header::AUTHORIZATION, HeaderMap},
    middleware::Next,
    response::Response,
};
use thiserror::Error;
use tracing::{debug, warn};

/// Why a request was not admitted.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum AccessError {
    #[error("Authorization header is required")]
    MissingCredentials,
    #[error("Invalid authorization header format")]
    MalformedHeader,
    #[error("Invalid or expired token")]
    InvalidOrExpiredToken,
    #[error("Token has been revoked")]
    Revoked,
    #[error("User not found")]
    UserNotFound,
    #[error("User account is deactivated")]
    AccountDeactivated,
    #[error("{0}")]
    Internal(String),
}

impl From<AccessError> for ApiError {
    fn from(e: AccessError) -> Self {
        match e {
            AccessError::Internal(detail) => ApiError::Internal(detail),
            other => ApiError::Authentication(other.to_string()),
        }
    }
}

/// Pull the token out of `Authorization: Bearer <token>`
pub fn extract_bearer(headers: &HeaderMap) -> Result<&str, AccessError> {
    let raw = match headers.get(AUTHORIZATION) {
        None => return Err(AccessError::MissingCredentials),
        Some(value) => value.to_str().map_err(|_| AccessError::MalformedHeader)?,
    };

    if raw.trim().is_empty() {
        return Err(AccessError::MissingCredentials);
    }

    let token = raw
        .strip_prefix("Bearer ")
        .ok_or(AccessError::MalformedHeader)?;

    if token.is_empty() || token.chars().any(char::is_whitespace) {
        return Err(AccessError::MalformedHeader);
    }

    Ok(token)
}

/// Run every admission check in order and build the session context.
///
/// 1. header present, 2. bearer format, 3. signature and lifetime,
/// 4. not blacklisted, 5. user exists, 6. user active.
pub async fn authenticate(
    state: &AuthState,
    headers: &HeaderMap,
) -> Result<SessionContext, AccessError> {
    let token = extract_bearer(headers)?;

    let claims = state.jwt_handler.validate(token).map_err(|e| {
        match e {
            TokenError::SignatureInvalid => warn!("Rejected token with bad signature"),
            other => debug!(reason = %other, "Rejected token"),
        }
        AccessError::InvalidOrExpiredToken
    })?;

    // A revocation lookup we cannot complete must not admit the token
    let revoked = state
        .cache_call(state.cache.exists(&blacklist_key(token)))
        .await
        .map_err(|e| AccessError::Internal(format!("revocation lookup failed: {e}")))?;
    if revoked {
        debug!(user_id = claims.user_id, "Rejected revoked token");
        return Err(AccessError::Revoked);
    }

    let user = state
        .directory_call(state.user_store.find_by_id(claims.user_id))
        .await
        .map_err(|e| AccessError::Internal(format!("user lookup failed: {e}")))?
        .ok_or(AccessError::UserNotFound)?;

    if !user.is_active {
        return Err(AccessError::AccountDeactivated);
    }

    if user.role != claims.role {
        debug!(
            user_id = user.id,
            token_role = claims.role.as_str(),
            live_role = user.role.as_str(),
            "Role changed since token issue, using live role"
        );
    }

    Ok(SessionContext {
        user_id: user.id,
        username: user.username.clone(),
        role: user.role,
        token: token.to_string(),
        expires_at: claims.exp,
        user,
    })
}

/// Auth middleware that admits requests carrying a valid, unrevoked token
/// of an existing active user
pub async fn auth_middleware(
    State(state): State<AuthState>,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let session = authenticate(&state, req.headers()).await?;

    req.extensions_mut().insert(session);

    Ok(next.run(req).await)
}
