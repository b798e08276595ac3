//! Authgate - JWT authentication and user management service
//! Mission: Register, log in, authorize and revoke, nothing else

use anyhow::{Context, Result};
use authgate::{
    auth::{
        router, user_store::DirectoryError, AuthState, MemoryCacheStore, PasswordHasher,
        UserStore,
    },
    Config,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::load();
    init_tracing(&config);

    info!("🚀 Authgate starting");
    config.warn_on_weak_settings();
    info!(
        lifetime_secs = config.token_lifetime_secs(),
        mode = %config.server_mode,
        "🔐 Token lifetime configured"
    );

    let user_store = UserStore::new(&config.database_path)
        .with_context(|| format!("failed to open user directory at {}", config.database_path))?;
    info!(path = %config.database_path, "📁 User directory ready");

    let passwords =
        PasswordHasher::new(config.bcrypt_cost).context("failed to initialize password hasher")?;

    seed_default_admin(&config, &user_store, &passwords).await?;

    let cache = MemoryCacheStore::new(config.cache_max_entries);

    let bind_addr = config.bind_addr();
    let state = AuthState::new(
        Arc::new(config),
        Arc::new(user_store),
        Arc::new(cache),
        Arc::new(passwords),
    );
    let app = router(state);

    let listener = TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("failed to bind {bind_addr}"))?;
    info!("🌐 Listening on http://{}", bind_addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
    .context("server error")?;

    Ok(())
}

/// Create the `admin` account when no admin exists yet
async fn seed_default_admin(
    config: &Config,
    user_store: &UserStore,
    passwords: &PasswordHasher,
) -> Result<()> {
    let hash = passwords
        .hash(&config.default_admin_password)
        .await
        .context("failed to hash default admin password")?;

    match user_store.seed_default_admin(&hash) {
        Ok(Some(admin)) => warn!(
            user_id = admin.id,
            username = %admin.username,
            "🔑 Seeded default admin account, change its password"
        ),
        Ok(None) => {}
        // Another account took the name between the check and the insert
        Err(DirectoryError::Conflict(field)) => {
            warn!(?field, "⚠️  Default admin not seeded, continuing without it")
        }
        Err(e) => return Err(e).context("failed to seed default admin"),
    }

    Ok(())
}

fn init_tracing(config: &Config) {
    let default_filter = if config.is_release() {
        "authgate=info"
    } else {
        "authgate=debug,tower_http=debug"
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}
