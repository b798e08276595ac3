//! Service Configuration
//! Mission: One explicit config object, built from flags, env and `.env`

use clap::Parser;
use std::path::Path;
use std::time::Duration;
use tracing::warn;

pub const DEFAULT_JWT_SECRET: &str = "default_jwt_secret";

/// Secrets shorter than this are accepted but flagged at startup.
pub const RECOMMENDED_SECRET_BYTES: usize = 32;

pub const MAX_JWT_EXPIRE_HOURS: i64 = 87_600;

#[derive(Parser, Debug, Clone)]
#[command(name = "authgate")]
#[command(about = "JWT authentication and user management service")]
pub struct Config {
    /// Path to the SQLite user directory
    #[arg(long, env = "DATABASE_PATH", default_value = "./authgate.db")]
    pub database_path: String,

    #[arg(long, env = "SERVER_HOST", default_value = "0.0.0.0")]
    pub host: String,

    #[arg(long, env = "SERVER_PORT", default_value = "8080")]
    pub port: u16,

    /// `debug` or `release`; only changes the default log filter
    #[arg(long, env = "SERVER_MODE", default_value = "debug")]
    pub server_mode: String,

    /// HMAC secret used to sign and verify tokens
    #[arg(long, env = "JWT_SECRET", default_value = DEFAULT_JWT_SECRET, hide_env_values = true)]
    pub jwt_secret: String,

    /// Token lifetime, 1 hour up to 10 years
    #[arg(
        long,
        env = "JWT_EXPIRE_HOURS",
        default_value = "24",
        value_parser = clap::value_parser!(i64).range(1..=MAX_JWT_EXPIRE_HOURS)
    )]
    pub jwt_expire_hours: i64,

    #[arg(long, env = "BCRYPT_COST", default_value_t = bcrypt::DEFAULT_COST)]
    pub bcrypt_cost: u32,

    #[arg(long, env = "MIN_PASSWORD_LENGTH", default_value = "6")]
    pub min_password_length: usize,

    /// Deadline applied to every directory and cache call
    #[arg(long, env = "STORE_TIMEOUT_MS", default_value = "2000")]
    pub store_timeout_ms: u64,

    #[arg(long, env = "CACHE_MAX_ENTRIES", default_value = "100000")]
    pub cache_max_entries: u64,

    #[arg(long, env = "USER_CACHE_TTL_SECS", default_value = "300")]
    pub user_cache_ttl_secs: u64,

    /// Password for the admin account seeded on first start
    #[arg(long, env = "DEFAULT_ADMIN_PASSWORD", default_value = "password", hide_env_values = true)]
    pub default_admin_password: String,
}

impl Config {
    /// Load `.env` (cwd and crate dir) then parse flags with env fallbacks.
    pub fn load() -> Self {
        load_env();
        Self::parse()
    }

    pub fn store_timeout(&self) -> Duration {
        Duration::from_millis(self.store_timeout_ms)
    }

    pub fn user_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.user_cache_ttl_secs)
    }

    /// Token lifetime in seconds.
    pub fn token_lifetime_secs(&self) -> i64 {
        self.jwt_expire_hours.saturating_mul(3600)
    }

    pub fn is_release(&self) -> bool {
        self.server_mode.eq_ignore_ascii_case("release")
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Warn about settings that work but weaken the deployment.
    pub fn warn_on_weak_settings(&self) {
        if self.jwt_secret == DEFAULT_JWT_SECRET {
            warn!("⚠️  JWT_SECRET is the built-in default, set a real secret in production");
        } else if self.jwt_secret.len() < RECOMMENDED_SECRET_BYTES {
            warn!(
                secret_len = self.jwt_secret.len(),
                recommended = RECOMMENDED_SECRET_BYTES,
                "⚠️  JWT_SECRET is short"
            );
        }
    }

    /// Defaults with a cheap bcrypt cost, for tests.
    pub fn for_tests(database_path: &str) -> Self {
        let mut config = Self::parse_from(["authgate"]);
        config.database_path = database_path.to_string();
        config.jwt_secret = "test-secret-key-for-authgate-0123456789".to_string();
        config.bcrypt_cost = 4;
        config
    }
}

fn load_env() {
    // 1) Standard dotenv search (cwd + parents)
    let _ = dotenv::dotenv();

    // 2) Also try the crate root, for runs launched from elsewhere
    let candidate = Path::new(env!("CARGO_MANIFEST_DIR")).join(".env");
    if candidate.exists() {
        let _ = dotenv::from_path(&candidate);
    }
}
