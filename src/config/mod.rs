use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

pub use crate::oauth::ProviderConfig;

/// Complete Tether configuration
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TetherConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub provider: ProviderConfig,
    #[serde(default)]
    pub identity: IdentityConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub encryption: EncryptionConfig,
}

/// HTTP server configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
}

fn default_bind_addr() -> String {
    "0.0.0.0:8000".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
        }
    }
}

/// Identity token policy
#[derive(Debug, Clone, Default, Deserialize)]
pub struct IdentityConfig {
    /// Shared secret for signature checks (only used with `verify_signature`)
    #[serde(default)]
    pub trust_secret: String,
    /// Accepted audiences; empty means the provider client id
    #[serde(default)]
    pub audiences: Vec<String>,
    #[serde(default)]
    pub verify_signature: bool,
}

impl IdentityConfig {
    /// Audiences to enforce. Empty when neither audiences nor a client id is set,
    /// which disables the audience check.
    pub fn expected_audiences(&self, provider: &ProviderConfig) -> Vec<String> {
        if !self.audiences.is_empty() {
            return self.audiences.clone();
        }
        if provider.client_id.is_empty() {
            Vec::new()
        } else {
            vec![provider.client_id.clone()]
        }
    }
}

/// Session credential configuration
#[derive(Debug, Clone, Deserialize)]
pub struct SessionConfig {
    #[serde(default)]
    pub signing_secret: String,
    #[serde(default = "default_access_lifetime")]
    pub access_lifetime_seconds: i64,
    #[serde(default = "default_refresh_lifetime")]
    pub refresh_lifetime_seconds: i64,
}

fn default_access_lifetime() -> i64 {
    crate::session::DEFAULT_ACCESS_LIFETIME_SECONDS
}

fn default_refresh_lifetime() -> i64 {
    crate::session::DEFAULT_REFRESH_LIFETIME_SECONDS
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            signing_secret: String::new(),
            access_lifetime_seconds: default_access_lifetime(),
            refresh_lifetime_seconds: default_refresh_lifetime(),
        }
    }
}

/// Account database configuration
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_database_path")]
    pub database_path: String,
}

fn default_database_path() -> String {
    "tether.db".to_string()
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
        }
    }
}

/// Provider token encryption configuration
#[derive(Debug, Clone, Default, Deserialize)]
pub struct EncryptionConfig {
    /// Base64-encoded 32-byte key. Empty generates a key per process.
    #[serde(default)]
    pub token_key: String,
}

impl TetherConfig {
    /// Overlay non-empty values from a variable lookup.
    ///
    /// Kept separate from `std::env` so tests can supply their own variables.
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).filter(|v| !v.is_empty());

        if let Some(v) = get("TETHER_BIND_ADDR") {
            self.server.bind_addr = v;
        }
        if let Some(v) = get("TETHER_CLIENT_ID") {
            self.provider.client_id = v;
        }
        if let Some(v) = get("TETHER_CLIENT_SECRET") {
            self.provider.client_secret = v;
        }
        if let Some(v) = get("TETHER_REDIRECT_URL") {
            self.provider.redirect_url = v;
        }
        if let Some(v) = get("TETHER_IDENTITY_SECRET") {
            self.identity.trust_secret = v;
        }
        if let Some(v) = get("TETHER_SESSION_SECRET") {
            self.session.signing_secret = v;
        }
        if let Some(v) = get("TETHER_TOKEN_KEY") {
            self.encryption.token_key = v;
        }
        if let Some(v) = get("TETHER_DATABASE_PATH") {
            self.storage.database_path = v;
        }
    }
}

/// Load configuration from TOML file
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<TetherConfig> {
    let path = path.as_ref();
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file {}", path.display()))?;
    let config: TetherConfig = toml::from_str(&contents)
        .with_context(|| format!("Failed to parse config file {}", path.display()))?;
    Ok(config)
}

/// Load the file if it exists (defaults otherwise), then apply environment overrides.
pub fn load_from_env<P: AsRef<Path>>(path: P) -> Result<TetherConfig> {
    let path = path.as_ref();
    let mut config = if path.exists() {
        load_config(path)?
    } else {
        TetherConfig::default()
    };
    config.apply_overrides(|name| std::env::var(name).ok());
    Ok(config)
}
