use anyhow::{Context, Result};
use std::sync::Arc;
use tether::accounts::{AccountLinker, AccountStore};
use tether::api::{create_auth_router, AuthAppState};
use tether::config::load_from_env;
use tether::credentials::TokenCipher;
use tether::identity::IdentityTokenValidator;
use tether::oauth::{OAuthFlowController, ProviderClient};
use tether::session::SessionIssuer;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing subscriber
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tether=info".into()),
        )
        .init();

    info!("Tether starting...");

    let config_path = std::env::var("TETHER_CONFIG").unwrap_or_else(|_| "tether.toml".to_string());
    let config = load_from_env(&config_path)?;

    info!(
        config_path = %config_path,
        bind_addr = %config.server.bind_addr,
        provider = %config.provider.name,
        database_path = %config.storage.database_path,
        "Configuration loaded"
    );

    if config.provider.client_id.is_empty() {
        warn!("Provider client id is empty; logins will fail at the provider");
    }

    let cipher = Arc::new(
        TokenCipher::from_config(Some(config.encryption.token_key.as_str()))
            .context("Invalid token encryption key")?,
    );

    let store = Arc::new(
        AccountStore::new(&config.storage.database_path)
            .context("Failed to initialize account store")?,
    );
    info!("Account store initialized");

    let mut validator = IdentityTokenValidator::new(
        config.identity.expected_audiences(&config.provider),
    );
    if config.identity.verify_signature {
        validator = validator.with_signature_secret(&config.identity.trust_secret);
    }

    let sessions = SessionIssuer::new(
        &config.session.signing_secret,
        config.session.access_lifetime_seconds,
        config.session.refresh_lifetime_seconds,
    )
    .context("Invalid session configuration")?;

    let provider = ProviderClient::new(config.provider.clone())?;
    let linker = AccountLinker::new(store, cipher);
    let controller = Arc::new(OAuthFlowController::new(provider, validator, linker, sessions));

    let router = create_auth_router(AuthAppState { controller });
    let listener = tokio::net::TcpListener::bind(config.server.bind_addr.as_str())
        .await
        .with_context(|| format!("Failed to bind {}", config.server.bind_addr))?;
    info!(bind_addr = %config.server.bind_addr, "Auth API listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutdown signal received");
        })
        .await
        .context("Auth API server error")?;

    info!("Tether stopped");
    Ok(())
}
