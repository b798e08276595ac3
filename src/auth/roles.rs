//! Role Gate
//! Mission: Restrict routes to a fixed set of roles

use crate::auth::models::{SessionContext, UserRole};
use crate::error::ApiError;
use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use tracing::debug;

/// Allowed roles for a group of routes. Must sit behind `auth_middleware`.
#[derive(Debug, Clone, Copy)]
pub struct RoleGate {
    allowed: &'static [UserRole],
}

impl RoleGate {
    pub const fn any_of(allowed: &'static [UserRole]) -> Self {
        Self { allowed }
    }

    pub const fn admin_only() -> Self {
        Self::any_of(&[UserRole::Admin])
    }

    pub const fn any_user() -> Self {
        Self::any_of(&[UserRole::Admin, UserRole::User])
    }

    pub fn allows(&self, role: UserRole) -> bool {
        self.allowed.contains(&role)
    }

    pub fn check(&self, session: Option<&SessionContext>) -> Result<(), ApiError> {
        let session = session.ok_or_else(|| {
            ApiError::Authentication("Authorization header is required".to_string())
        })?;

        if !self.allows(session.role) {
            debug!(
                user_id = session.user_id,
                role = session.role.as_str(),
                "Role not allowed"
            );
            return Err(ApiError::Authorization("Insufficient permissions".to_string()));
        }

        Ok(())
    }
}

pub async fn role_gate(
    State(gate): State<RoleGate>,
    req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    gate.check(req.extensions().get::<SessionContext>())?;
    Ok(next.run(req).await)
}
