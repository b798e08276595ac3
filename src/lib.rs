//! Authgate Library
//!
//! Password login, JWT sessions with revocation, role gates and user
//! administration. Exposed as a library for the binary and the
//! integration tests.

pub mod auth;
pub mod config;
pub mod error;
pub mod middleware;

pub use auth::router;
pub use config::Config;
pub use error::{ApiError, ApiResult};
