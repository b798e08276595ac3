//! Auth Service
//! Mission: Login, registration, sessions and user administration on top of
//! the directory, the token handler and the cache

use crate::auth::{
    api::AuthState,
    models::{
        CreateUserRequest, LoginRequest, LoginResponse, PageQuery, Pagination, RegisterRequest,
        SessionContext, TokenResponse, UpdateUserRequest, User, UserListResponse, UserResponse,
        UserRole,
    },
    password::MAX_PASSWORD_LENGTH,
    revocation::{blacklist_key, session_key, user_key, StoreError, REVOKED_MARKER},
    user_store::{DirectoryError, NewUser, UniqueField, UserChanges},
};
use crate::error::{ApiError, ApiResult};
use chrono::Utc;
use std::future::Future;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, info, warn};

pub const USERNAME_MIN_LEN: usize = 3;
pub const USERNAME_MAX_LEN: usize = 20;
pub const DEFAULT_PAGE_SIZE: i64 = 10;
pub const MAX_PAGE_SIZE: i64 = 100;

const INVALID_CREDENTIALS: &str = "Invalid credentials";

impl From<DirectoryError> for ApiError {
    fn from(e: DirectoryError) -> Self {
        match e {
            DirectoryError::Conflict(UniqueField::Username) => {
                ApiError::Conflict("Username already exists".to_string())
            }
            DirectoryError::Conflict(UniqueField::Email) => {
                ApiError::Conflict("Email already exists".to_string())
            }
            DirectoryError::NotFound => ApiError::NotFound("User not found".to_string()),
            DirectoryError::Timeout | DirectoryError::Storage(_) => {
                ApiError::Internal(e.to_string())
            }
        }
    }
}

impl AuthState {
    /// Run a directory call under the configured deadline
    pub(crate) async fn directory_call<T, F>(&self, call: F) -> Result<T, DirectoryError>
    where
        F: Future<Output = Result<T, DirectoryError>>,
    {
        timeout(self.config.store_timeout(), call)
            .await
            .map_err(|_| DirectoryError::Timeout)?
    }

    /// Run a cache call under the configured deadline
    pub(crate) async fn cache_call<T, F>(&self, call: F) -> Result<T, StoreError>
    where
        F: Future<Output = Result<T, StoreError>>,
    {
        timeout(self.config.store_timeout(), call)
            .await
            .map_err(|_| StoreError::Timeout)?
    }

    // Cache writes never fail the request they belong to. A lost blacklist
    // write leaves the token usable until expiry, so it is logged loudly.
    async fn cache_put_best_effort(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
        purpose: &'static str,
        user_id: i64,
    ) {
        if let Err(e) = self.cache_call(self.cache.put(key, value, ttl)).await {
            warn!(purpose, user_id, error = %e, "⚠️  Cache write failed, continuing");
        }
    }

    async fn cache_delete_best_effort(&self, key: &str, purpose: &'static str, user_id: i64) {
        if let Err(e) = self.cache_call(self.cache.delete(key)).await {
            warn!(purpose, user_id, error = %e, "⚠️  Cache delete failed, continuing");
        }
    }

    async fn invalidate_user_cache(&self, user_id: i64) {
        self.cache_delete_best_effort(&user_key(user_id), "user cache", user_id)
            .await;
    }

    async fn issue_token(&self, user: &User) -> ApiResult<(String, i64)> {
        let (token, expires_in) = self
            .jwt_handler
            .issue(user)
            .map_err(|e| ApiError::internal(format!("token issue failed: {e}")))?;

        self.cache_put_best_effort(
            &session_key(&token),
            &user.id.to_string(),
            Duration::from_secs(expires_in.max(0) as u64),
            "session hint",
            user.id,
        )
        .await;

        Ok((token, expires_in))
    }

    /// POST /api/auth/login
    pub async fn login(&self, req: LoginRequest) -> ApiResult<LoginResponse> {
        let login = req.username.trim();
        if login.is_empty() || req.password.is_empty() {
            return Err(ApiError::validation(
                "Invalid request data: username and password are required",
            ));
        }

        info!(login = %login, "🔐 Login attempt");

        let user = self
            .directory_call(self.user_store.find_by_login(login))
            .await?;

        let Some(user) = user else {
            self.passwords.verify_dummy(&req.password).await;
            warn!(login = %login, "❌ Failed login attempt");
            return Err(ApiError::Authentication(INVALID_CREDENTIALS.to_string()));
        };

        if !self.passwords.verify(&req.password, &user.password_hash).await {
            warn!(login = %login, user_id = user.id, "❌ Failed login attempt");
            return Err(ApiError::Authentication(INVALID_CREDENTIALS.to_string()));
        }

        if !user.is_active {
            warn!(user_id = user.id, "Login refused for deactivated account");
            return Err(ApiError::Authentication(
                "User account is deactivated".to_string(),
            ));
        }

        let (token, expires_in) = self.issue_token(&user).await?;

        info!(
            user_id = user.id,
            username = %user.username,
            role = user.role.as_str(),
            "✅ Login successful"
        );

        Ok(LoginResponse {
            message: "Login successful".to_string(),
            token,
            expires_in,
            user: UserResponse::from_user(&user),
        })
    }

    /// POST /api/auth/register
    pub async fn register(&self, req: RegisterRequest) -> ApiResult<UserResponse> {
        let user = self
            .create_account(req.username, req.email, req.password, UserRole::User)
            .await?;
        Ok(UserResponse::from_user(&user))
    }

    async fn create_account(
        &self,
        username: String,
        email: String,
        password: String,
        role: UserRole,
    ) -> ApiResult<User> {
        let username = username.trim().to_string();
        let email = email.trim().to_string();
        validate_username(&username)?;
        validate_email(&email)?;
        validate_password(&password, self.config.min_password_length)?;

        let password_hash = self
            .passwords
            .hash(&password)
            .await
            .map_err(|e| ApiError::internal(e.to_string()))?;

        let user = self
            .directory_call(self.user_store.create(NewUser {
                username,
                email,
                password_hash,
                role,
                is_active: true,
            }))
            .await?;

        Ok(user)
    }

    /// POST /api/auth/logout
    ///
    /// Revocation is best effort; the response is a success either way.
    pub async fn logout(&self, session: &SessionContext) {
        let remaining = session.expires_at - Utc::now().timestamp();
        if remaining > 0 {
            self.cache_put_best_effort(
                &blacklist_key(&session.token),
                REVOKED_MARKER,
                Duration::from_secs(remaining as u64),
                "blacklist",
                session.user_id,
            )
            .await;
        }

        self.cache_delete_best_effort(&session_key(&session.token), "session hint", session.user_id)
            .await;

        info!(user_id = session.user_id, "👋 Logged out");
    }

    /// GET /api/auth/profile
    pub fn profile(&self, session: &SessionContext) -> UserResponse {
        UserResponse::from_user(&session.user)
    }

    /// PUT /api/auth/profile
    pub async fn update_profile(
        &self,
        session: &SessionContext,
        req: UpdateUserRequest,
    ) -> ApiResult<UserResponse> {
        // Role changes go by the live role, not the token claim
        let allow_role_change = session.role == UserRole::Admin;
        let changes = self.changes_from_request(req, allow_role_change).await?;

        let user = self
            .directory_call(self.user_store.update(session.user_id, changes))
            .await?;
        self.invalidate_user_cache(user.id).await;

        Ok(UserResponse::from_user(&user))
    }

    /// POST /api/auth/refresh
    pub async fn refresh(&self, session: &SessionContext) -> ApiResult<TokenResponse> {
        let (token, expires_in) = self.issue_token(&session.user).await?;
        debug!(user_id = session.user_id, "Token refreshed");

        Ok(TokenResponse {
            message: "Token refreshed successfully".to_string(),
            token,
            expires_in,
        })
    }

    /// GET /api/users
    pub async fn list_users(&self, query: PageQuery) -> ApiResult<UserListResponse> {
        let page = query.page.unwrap_or(1).max(1);
        let limit = query
            .limit
            .unwrap_or(DEFAULT_PAGE_SIZE)
            .clamp(1, MAX_PAGE_SIZE);
        let offset = (page - 1).saturating_mul(limit);

        let (users, total) = self
            .directory_call(self.user_store.list(offset, limit))
            .await?;

        Ok(UserListResponse {
            users: users.iter().map(UserResponse::from_user).collect(),
            pagination: Pagination { page, limit, total },
        })
    }

    /// POST /api/users
    pub async fn create_user(&self, req: CreateUserRequest) -> ApiResult<UserResponse> {
        let role = req.role.unwrap_or(UserRole::User);
        let user = self
            .create_account(req.username, req.email, req.password, role)
            .await?;
        Ok(UserResponse::from_user(&user))
    }

    /// GET /api/users/:id, read through the `user:<id>` cache
    pub async fn get_user(&self, id: i64) -> ApiResult<UserResponse> {
        let key = user_key(id);

        match self.cache_call(self.cache.get(&key)).await {
            Ok(Some(raw)) => match serde_json::from_str::<UserResponse>(&raw) {
                Ok(cached) => return Ok(cached),
                Err(e) => warn!(user_id = id, error = %e, "Dropping unreadable user cache entry"),
            },
            Ok(None) => {}
            Err(e) => warn!(user_id = id, error = %e, "⚠️  User cache read failed"),
        }

        let user = self
            .directory_call(self.user_store.find_by_id(id))
            .await?
            .ok_or_else(|| ApiError::NotFound("User not found".to_string()))?;
        let response = UserResponse::from_user(&user);

        match serde_json::to_string(&response) {
            Ok(raw) => {
                self.cache_put_best_effort(&key, &raw, self.config.user_cache_ttl(), "user cache", id)
                    .await
            }
            Err(e) => warn!(user_id = id, error = %e, "Could not serialize user for cache"),
        }

        Ok(response)
    }

    /// PUT /api/users/:id
    pub async fn update_user(&self, id: i64, req: UpdateUserRequest) -> ApiResult<UserResponse> {
        let changes = self.changes_from_request(req, true).await?;

        let user = self
            .directory_call(self.user_store.update(id, changes))
            .await?;
        self.invalidate_user_cache(id).await;

        info!(user_id = id, role = user.role.as_str(), "User updated");
        Ok(UserResponse::from_user(&user))
    }

    /// DELETE /api/users/:id (soft delete)
    pub async fn delete_user(&self, session: &SessionContext, id: i64) -> ApiResult<()> {
        if id == session.user_id {
            return Err(ApiError::validation("Cannot delete your own account"));
        }

        self.directory_call(self.user_store.soft_delete(id))
            .await?;
        self.invalidate_user_cache(id).await;

        info!(user_id = id, by = session.user_id, "🗑️  User deleted");
        Ok(())
    }

    /// PATCH /api/users/:id/status
    pub async fn toggle_status(&self, id: i64) -> ApiResult<UserResponse> {
        let user = self
            .directory_call(self.user_store.find_by_id(id))
            .await?
            .ok_or_else(|| ApiError::NotFound("User not found".to_string()))?;

        let updated = self
            .directory_call(self.user_store.update(
                id,
                UserChanges {
                    is_active: Some(!user.is_active),
                    ..Default::default()
                },
            ))
            .await?;
        self.invalidate_user_cache(id).await;

        info!(user_id = id, active = updated.is_active, "User status toggled");
        Ok(UserResponse::from_user(&updated))
    }

    async fn changes_from_request(
        &self,
        req: UpdateUserRequest,
        allow_role_change: bool,
    ) -> ApiResult<UserChanges> {
        let mut changes = UserChanges::default();

        if let Some(email) = req.email.map(|e| e.trim().to_string()).filter(|e| !e.is_empty()) {
            validate_email(&email)?;
            changes.email = Some(email);
        }

        if let Some(role) = req.role {
            if !allow_role_change {
                return Err(ApiError::Authorization(
                    "Only admins can change roles".to_string(),
                ));
            }
            changes.role = Some(role);
        }

        if let Some(password) = req.password.filter(|p| !p.is_empty()) {
            validate_password(&password, self.config.min_password_length)?;
            let hash = self
                .passwords
                .hash(&password)
                .await
                .map_err(|e| ApiError::internal(e.to_string()))?;
            changes.password_hash = Some(hash);
        }

        Ok(changes)
    }
}

pub fn validate_username(username: &str) -> ApiResult<()> {
    let len = username.chars().count();
    if !(USERNAME_MIN_LEN..=USERNAME_MAX_LEN).contains(&len) {
        return Err(ApiError::validation(format!(
            "Invalid request data: username must be {}-{} characters",
            USERNAME_MIN_LEN, USERNAME_MAX_LEN
        )));
    }
    if username.chars().any(char::is_whitespace) {
        return Err(ApiError::validation(
            "Invalid request data: username must not contain whitespace",
        ));
    }
    Ok(())
}

/// Structural check only: one `@`, non-empty local part, dotted domain.
pub fn validate_email(email: &str) -> ApiResult<()> {
    let invalid = || ApiError::validation("Invalid request data: invalid email address");

    if email.chars().any(char::is_whitespace) {
        return Err(invalid());
    }
    let (local, domain) = email.split_once('@').ok_or_else(invalid)?;
    if local.is_empty() || domain.contains('@') {
        return Err(invalid());
    }
    let Some((host, tld)) = domain.rsplit_once('.') else {
        return Err(invalid());
    };
    if host.is_empty() || tld.is_empty() || domain.starts_with('.') {
        return Err(invalid());
    }
    Ok(())
}

pub fn validate_password(password: &str, min_len: usize) -> ApiResult<()> {
    if password.chars().count() < min_len {
        return Err(ApiError::validation(format!(
            "Invalid request data: password must be at least {} characters",
            min_len
        )));
    }
    if password.len() > MAX_PASSWORD_LENGTH {
        return Err(ApiError::validation(format!(
            "Invalid request data: password must be at most {} bytes",
            MAX_PASSWORD_LENGTH
        )));
    }
    Ok(())
}
