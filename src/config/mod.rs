use anyhow::Context;
use std::env;

/// Runtime configuration for the Drive access core
#[derive(Clone)]
pub struct AccessConfig {
    /// Database URL (default: "sqlite::memory:")
    pub database_url: String,

    /// JWT secret for API bearer tokens and signed OAuth state (Required in production)
    pub jwt_secret: String,

    /// Secret the credential vault key is derived from (Required in production)
    pub credential_encryption_key: String,

    /// Google OAuth client ID
    pub google_client_id: String,
    /// Google OAuth client secret
    pub google_client_secret: String,
    /// Google OAuth redirect URI (our /drive/callback)
    pub google_redirect_uri: String,

    /// Credentials expiring within this many seconds count as expired (default: 60)
    pub token_expiry_skew_secs: i64,

    /// TTL handed to `issue` when the caller does not ask for one (default: 300)
    pub capability_default_ttl_secs: i64,

    /// Timeout for opening a provider download and for each streamed chunk (default: 30)
    pub proxy_timeout_secs: u64,

    /// Root directory of locally stored asset originals (default: "./storage")
    pub storage_root: String,

    /// Interval of the expired-capability sweep (default: 300)
    pub sweep_interval_secs: u64,

    /// Allowed CORS Origins (comma separated)
    pub allowed_origins: Vec<String>,
}

impl std::fmt::Debug for AccessConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccessConfig")
            .field("database_url", &self.database_url)
            .field("google_client_id", &self.google_client_id)
            .field("google_redirect_uri", &self.google_redirect_uri)
            .field("token_expiry_skew_secs", &self.token_expiry_skew_secs)
            .field("capability_default_ttl_secs", &self.capability_default_ttl_secs)
            .field("proxy_timeout_secs", &self.proxy_timeout_secs)
            .field("storage_root", &self.storage_root)
            .field("sweep_interval_secs", &self.sweep_interval_secs)
            .field("allowed_origins", &self.allowed_origins)
            .finish_non_exhaustive()
    }
}

impl Default for AccessConfig {
    fn default() -> Self {
        Self {
            database_url: "sqlite::memory:".to_string(),
            jwt_secret: "secret".to_string(),
            credential_encryption_key: "dev_credential_key".to_string(),
            google_client_id: String::new(),
            google_client_secret: String::new(),
            google_redirect_uri: "http://localhost:3000/drive/callback".to_string(),
            token_expiry_skew_secs: 60,
            capability_default_ttl_secs: 300,
            proxy_timeout_secs: 30,
            storage_root: "./storage".to_string(),
            sweep_interval_secs: 300,
            allowed_origins: vec![
                "http://localhost:3000".to_string(),
                "http://localhost:5173".to_string(), // Vite default
                "http://127.0.0.1:3000".to_string(),
            ],
        }
    }
}

fn parsed_or<T: std::str::FromStr>(key: &str, fallback: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(fallback)
}

impl AccessConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        let default = Self::default();

        Self {
            database_url: env::var("DATABASE_URL").unwrap_or(default.database_url),
            jwt_secret: env::var("JWT_SECRET").unwrap_or(default.jwt_secret),
            credential_encryption_key: env::var("CREDENTIAL_ENCRYPTION_KEY")
                .unwrap_or(default.credential_encryption_key),
            google_client_id: env::var("GOOGLE_CLIENT_ID").unwrap_or(default.google_client_id),
            google_client_secret: env::var("GOOGLE_CLIENT_SECRET")
                .unwrap_or(default.google_client_secret),
            google_redirect_uri: env::var("GOOGLE_REDIRECT_URI")
                .unwrap_or(default.google_redirect_uri),
            token_expiry_skew_secs: parsed_or(
                "TOKEN_EXPIRY_SKEW_SECS",
                default.token_expiry_skew_secs,
            ),
            capability_default_ttl_secs: parsed_or(
                "CAPABILITY_DEFAULT_TTL_SECS",
                default.capability_default_ttl_secs,
            ),
            proxy_timeout_secs: parsed_or("PROXY_TIMEOUT_SECS", default.proxy_timeout_secs),
            storage_root: env::var("STORAGE_ROOT").unwrap_or(default.storage_root),
            sweep_interval_secs: parsed_or("SWEEP_INTERVAL_SECS", default.sweep_interval_secs),
            allowed_origins: env::var("ALLOWED_ORIGINS")
                .ok()
                .map(|v| v.split(',').map(|s| s.trim().to_string()).collect())
                .unwrap_or(default.allowed_origins),
        }
    }

    /// Create config for development (relaxed timeouts, dev secrets)
    pub fn development() -> Self {
        Self {
            proxy_timeout_secs: 120,
            sweep_interval_secs: 60,
            ..Self::default()
        }
    }

    /// Create config for production (secrets must be provided)
    pub fn production() -> anyhow::Result<Self> {
        let from_env = Self::from_env();
        Ok(Self {
            jwt_secret: env::var("JWT_SECRET").context("CRITICAL: JWT_SECRET must be set")?,
            credential_encryption_key: env::var("CREDENTIAL_ENCRYPTION_KEY")
                .context("CRITICAL: CREDENTIAL_ENCRYPTION_KEY must be set")?,
            ..from_env
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AccessConfig::default();
        assert_eq!(config.token_expiry_skew_secs, 60);
        assert_eq!(config.capability_default_ttl_secs, 300);
        assert!(!config.allowed_origins.contains(&"*".to_string()));
    }

    #[test]
    fn test_debug_hides_secrets() {
        let config = AccessConfig {
            jwt_secret: "jwt-very-secret".to_string(),
            credential_encryption_key: "vault-very-secret".to_string(),
            ..AccessConfig::default()
        };
        let rendered = format!("{:?}", config);
        assert!(!rendered.contains("jwt-very-secret"));
        assert!(!rendered.contains("vault-very-secret"));
    }

    #[test]
    fn test_production_config() {
        unsafe {
            env::set_var("JWT_SECRET", "test_secret");
            env::set_var("CREDENTIAL_ENCRYPTION_KEY", "test_vault_key");
        }
        let config = AccessConfig::production().unwrap();
        unsafe {
            env::remove_var("JWT_SECRET");
            env::remove_var("CREDENTIAL_ENCRYPTION_KEY");
        }
        assert_eq!(config.jwt_secret, "test_secret");
        assert_eq!(config.credential_encryption_key, "test_vault_key");
    }
}
