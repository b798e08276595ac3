//! Authentication Module
//! Mission: Secure API access with JWT tokens, revocation and RBAC

pub mod api;
pub mod jwt;
pub mod middleware;
pub mod models;
pub mod password;
pub mod revocation;
pub mod roles;
pub mod service;
pub mod user_store;

pub use api::{router, AuthState};
pub use jwt::JwtHandler;
pub use middleware::auth_middleware;
pub use password::PasswordHasher;
pub use revocation::{CacheStore, MemoryCacheStore};
pub use roles::RoleGate;
pub use user_store::{UserDirectory, UserStore};
