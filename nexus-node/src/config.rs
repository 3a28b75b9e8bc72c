use std::path::PathBuf;

use nexus_common::{Environment, NexusError, Result};

/// Runtime configuration, resolved from environment variables at startup.
#[derive(Debug, Clone)]
pub struct Config {
    pub bind_addr: String,
    pub database_path: PathBuf,
    pub environment: Environment,
    pub jwt_secret: String,
    /// 32-byte hex AEAD master key for at-rest secrets.
    pub encryption_key_hex: String,
    /// 32-byte hex master derivation secret.
    pub master_secret_hex: String,
    pub webhook_secret: String,
    pub price_oracle_url: Option<String>,
    pub price_oracle_key: Option<String>,
    pub cors_origins: Vec<String>,
    /// Bind the mock chain adapters instead of live RPC; always on outside
    /// production unless explicitly disabled.
    pub use_mock_chains: bool,
}

fn var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

/// Development fallback secret: deterministic so local restarts keep
/// decrypting the same store. Never accepted in production.
const DEV_FALLBACK_HEX: &str = "0101010101010101010101010101010101010101010101010101010101010101";

impl Config {
    pub fn from_env() -> Result<Self> {
        let environment = Environment::from_name(&var("NEXUS_ENVIRONMENT").unwrap_or_default());

        let required = |name: &str, dev_default: &str| -> Result<String> {
            match var(name) {
                Some(v) => Ok(v),
                None if environment.is_production() => Err(NexusError::Internal(format!(
                    "{} must be set in production",
                    name
                ))),
                None => {
                    tracing::warn!(target: "config", "{} not set; using development default", name);
                    Ok(dev_default.to_string())
                }
            }
        };

        let use_mock_chains = match var("NEXUS_USE_MOCK_CHAINS") {
            Some(v) => v == "1" || v.eq_ignore_ascii_case("true"),
            None => !environment.is_production(),
        };

        Ok(Self {
            bind_addr: var("NEXUS_BIND_ADDR").unwrap_or_else(|| "0.0.0.0:8080".into()),
            database_path: var("NEXUS_DATABASE_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("data/nexus.redb")),
            jwt_secret: required("NEXUS_JWT_SECRET", "dev-jwt-secret")?,
            encryption_key_hex: required("NEXUS_ENCRYPTION_KEY", DEV_FALLBACK_HEX)?,
            master_secret_hex: required("NEXUS_MASTER_SECRET", DEV_FALLBACK_HEX)?,
            webhook_secret: required("NEXUS_WEBHOOK_SECRET", "dev-webhook-secret")?,
            price_oracle_url: var("NEXUS_PRICE_ORACLE_URL"),
            price_oracle_key: var("NEXUS_PRICE_ORACLE_KEY"),
            cors_origins: var("NEXUS_CORS_ORIGINS")
                .map(|v| v.split(',').map(|s| s.trim().to_string()).collect())
                .unwrap_or_default(),
            environment,
            use_mock_chains,
        })
    }
}
