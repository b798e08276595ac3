//! Authentication API Endpoints
//! Mission: Expose login, session and user management over HTTP

use crate::auth::{
    jwt::JwtHandler,
    middleware::auth_middleware,
    models::{
        CreateUserRequest, LoginRequest, LoginResponse, MessageResponse, PageQuery,
        ProtectedData, RegisterRequest, SessionContext, TokenResponse, UpdateUserRequest,
        UserEnvelope, UserListResponse, UserResponse,
    },
    password::PasswordHasher,
    revocation::CacheStore,
    roles::{role_gate, RoleGate},
    user_store::UserDirectory,
};
use crate::config::Config;
use crate::error::{ApiError, ApiResult};
use crate::middleware::request_logging;
use axum::{
    extract::{
        rejection::{JsonRejection, QueryRejection},
        Path, Query, State,
    },
    http::StatusCode,
    middleware,
    routing::{get, patch, post},
    Extension, Json, Router,
};
use serde_json::{json, Value};
use std::sync::Arc;
use tower_http::cors::CorsLayer;

/// Shared auth state
#[derive(Clone)]
pub struct AuthState {
    pub config: Arc<Config>,
    pub user_store: Arc<dyn UserDirectory>,
    pub cache: Arc<dyn CacheStore>,
    pub jwt_handler: Arc<JwtHandler>,
    pub passwords: Arc<PasswordHasher>,
}

impl AuthState {
    pub fn new(
        config: Arc<Config>,
        user_store: Arc<dyn UserDirectory>,
        cache: Arc<dyn CacheStore>,
        passwords: Arc<PasswordHasher>,
    ) -> Self {
        let jwt_handler = Arc::new(JwtHandler::new(&config.jwt_secret, config.jwt_expire_hours));

        Self {
            config,
            user_store,
            cache,
            jwt_handler,
            passwords,
        }
    }
}

/// Build the full application router
pub fn router(state: AuthState) -> Router {
    let public = Router::new()
        .route("/health", get(health))
        .route("/api/auth/login", post(login))
        .route("/api/auth/register", post(register));

    let session = Router::new()
        .route("/api/auth/logout", post(logout))
        .route("/api/auth/profile", get(profile).put(update_profile))
        .route("/api/auth/refresh", post(refresh));

    let members = Router::new()
        .route("/api/protected/data", get(protected_data))
        .route_layer(middleware::from_fn_with_state(RoleGate::any_user(), role_gate));

    let admin = Router::new()
        .route("/api/users", get(list_users).post(create_user))
        .route(
            "/api/users/:id",
            get(get_user).put(update_user).delete(delete_user),
        )
        .route("/api/users/:id/status", patch(toggle_status))
        .route_layer(middleware::from_fn_with_state(RoleGate::admin_only(), role_gate));

    // Added last so it runs before any role gate
    let protected = Router::new()
        .merge(session)
        .merge(members)
        .merge(admin)
        .route_layer(middleware::from_fn_with_state(state.clone(), auth_middleware));

    Router::new()
        .merge(public)
        .merge(protected)
        .with_state(state)
        .layer(middleware::from_fn(request_logging))
        .layer(CorsLayer::permissive())
}

/// Unwrap a JSON body, reporting any decode failure as a 400
fn body<T>(payload: Result<Json<T>, JsonRejection>) -> ApiResult<T> {
    payload
        .map(|Json(value)| value)
        .map_err(|e| ApiError::validation(format!("Invalid request data: {}", e.body_text())))
}

fn parse_user_id(raw: &str) -> ApiResult<i64> {
    raw.parse::<i64>()
        .ok()
        .filter(|id| *id > 0)
        .ok_or_else(|| ApiError::validation("Invalid user ID"))
}

/// Health endpoint - GET /health
pub async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

/// Login endpoint - POST /api/auth/login
pub async fn login(
    State(state): State<AuthState>,
    payload: Result<Json<LoginRequest>, JsonRejection>,
) -> ApiResult<Json<LoginResponse>> {
    Ok(Json(state.login(body(payload)?).await?))
}

/// Registration endpoint - POST /api/auth/register
pub async fn register(
    State(state): State<AuthState>,
    payload: Result<Json<RegisterRequest>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<UserEnvelope>)> {
    let user = state.register(body(payload)?).await?;
    Ok((
        StatusCode::CREATED,
        Json(UserEnvelope {
            message: Some("User registered successfully".to_string()),
            user,
        }),
    ))
}

/// Logout endpoint - POST /api/auth/logout
pub async fn logout(
    State(state): State<AuthState>,
    Extension(session): Extension<SessionContext>,
) -> Json<MessageResponse> {
    state.logout(&session).await;
    Json(MessageResponse {
        message: "Logout successful".to_string(),
    })
}

/// Current user - GET /api/auth/profile
pub async fn profile(
    State(state): State<AuthState>,
    Extension(session): Extension<SessionContext>,
) -> Json<UserEnvelope> {
    Json(UserEnvelope {
        message: None,
        user: state.profile(&session),
    })
}

/// Update current user - PUT /api/auth/profile
pub async fn update_profile(
    State(state): State<AuthState>,
    Extension(session): Extension<SessionContext>,
    payload: Result<Json<UpdateUserRequest>, JsonRejection>,
) -> ApiResult<Json<UserEnvelope>> {
    let user = state.update_profile(&session, body(payload)?).await?;
    Ok(Json(UserEnvelope {
        message: Some("Profile updated successfully".to_string()),
        user,
    }))
}

/// Token refresh - POST /api/auth/refresh
pub async fn refresh(
    State(state): State<AuthState>,
    Extension(session): Extension<SessionContext>,
) -> ApiResult<Json<TokenResponse>> {
    Ok(Json(state.refresh(&session).await?))
}

/// GET /api/protected/data
pub async fn protected_data(Extension(session): Extension<SessionContext>) -> Json<ProtectedData> {
    Json(ProtectedData {
        message: "This is protected data".to_string(),
        user_id: session.user_id,
        role: session.role,
    })
}

/// List users (admin) - GET /api/users
pub async fn list_users(
    State(state): State<AuthState>,
    query: Result<Query<PageQuery>, QueryRejection>,
) -> ApiResult<Json<UserListResponse>> {
    let Query(query) = query.map_err(|_| {
        ApiError::validation("Invalid request data: page and limit must be integers")
    })?;
    Ok(Json(state.list_users(query).await?))
}

/// Create user (admin) - POST /api/users
pub async fn create_user(
    State(state): State<AuthState>,
    payload: Result<Json<CreateUserRequest>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<UserEnvelope>)> {
    let user = state.create_user(body(payload)?).await?;
    Ok((
        StatusCode::CREATED,
        Json(UserEnvelope {
            message: Some("User created successfully".to_string()),
            user,
        }),
    ))
}

/// Get user (admin) - GET /api/users/:id
pub async fn get_user(
    State(state): State<AuthState>,
    Path(id): Path<String>,
) -> ApiResult<Json<UserEnvelope>> {
    let user: UserResponse = state.get_user(parse_user_id(&id)?).await?;
    Ok(Json(UserEnvelope {
        message: None,
        user,
    }))
}

/// Update user (admin) - PUT /api/users/:id
pub async fn update_user(
    State(state): State<AuthState>,
    Path(id): Path<String>,
    payload: Result<Json<UpdateUserRequest>, JsonRejection>,
) -> ApiResult<Json<UserEnvelope>> {
    let id = parse_user_id(&id)?;
    let user = state.update_user(id, body(payload)?).await?;
    Ok(Json(UserEnvelope {
        message: Some("User updated successfully".to_string()),
        user,
    }))
}

/// Soft-delete user (admin) - DELETE /api/users/:id
pub async fn delete_user(
    State(state): State<AuthState>,
    Extension(session): Extension<SessionContext>,
    Path(id): Path<String>,
) -> ApiResult<Json<MessageResponse>> {
    state.delete_user(&session, parse_user_id(&id)?).await?;
    Ok(Json(MessageResponse {
        message: "User deleted successfully".to_string(),
    }))
}

/// Flip active flag (admin) - PATCH /api/users/:id/status
pub async fn toggle_status(
    State(state): State<AuthState>,
    Path(id): Path<String>,
) -> ApiResult<Json<UserEnvelope>> {
    let user = state.toggle_status(parse_user_id(&id)?).await?;
    let message = if user.is_active {
        "User activated successfully"
    } else {
        "User deactivated successfully"
    };
    Ok(Json(UserEnvelope {
        message: Some(message.to_string()),
        user,
    }))
}
