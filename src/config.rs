//! Configuration for the gateway
//!
//! All settings come from environment variables. Object-store credentials are
//! intentionally optional at load time: a stream that starts without them is
//! stopped with a status message instead of failing process startup.

use std::path::PathBuf;

/// Top-level gateway configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// HTTP server settings
    pub server: ServerConfig,

    /// Request-signature and stream-key secret
    pub auth: AuthConfig,

    /// Object-store settings
    pub storage: StorageConfig,
}

/// HTTP server settings
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Port for the control API
    pub http_port: u16,

    /// Root directory the encoder writes HLS artifacts into
    pub output_dir: PathBuf,

    /// Encoder executable launched per accepted connection
    pub encoder_binary: String,
}

/// Shared HMAC secret for API signatures and stream keys
#[derive(Debug, Clone)]
pub struct AuthConfig {
    pub hmac_secret: Option<String>,
}

/// Cloudflare R2 settings (S3-compatible)
#[derive(Debug, Clone)]
pub struct StorageConfig {
    pub account_id: Option<String>,
    pub access_key: Option<String>,
    pub secret_key: Option<String>,
    pub bucket: Option<String>,

    /// Public base URL playback links are derived from
    pub public_base_url: Option<String>,
}

/// Static credential triple for the R2 client
#[derive(Debug, Clone)]
pub struct R2Credentials {
    pub account_id: String,
    pub access_key: String,
    pub secret_key: String,
}

fn default_http_port() -> u16 {
    8080
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("output")
}

fn default_encoder_binary() -> String {
    "ffmpeg".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_port: default_http_port(),
            output_dir: default_output_dir(),
            encoder_binary: default_encoder_binary(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            auth: AuthConfig { hmac_secret: None },
            storage: StorageConfig {
                account_id: None,
                access_key: None,
                secret_key: None,
                bucket: None,
                public_base_url: None,
            },
        }
    }
}

impl Config {
    /// Load configuration from environment variables, falling back to defaults
    pub fn from_env() -> Self {
        let mut config = Config::default();

        if let Ok(port) = std::env::var("GATEWAY_HTTP_PORT") {
            if let Ok(p) = port.parse() {
                config.server.http_port = p;
            }
        }
        if let Ok(dir) = std::env::var("OUTPUT_DIR") {
            config.server.output_dir = PathBuf::from(dir);
        }
        if let Some(binary) = non_empty_var("ENCODER_BINARY") {
            config.server.encoder_binary = binary;
        }

        config.auth.hmac_secret = non_empty_var("HMAC_SECRET");

        config.storage.account_id = non_empty_var("R2_ACCOUNT_ID");
        config.storage.access_key = non_empty_var("R2_ACCESS_KEY");
        config.storage.secret_key = non_empty_var("R2_SECRET_KEY");
        config.storage.bucket = non_empty_var("BUCKET_NAME");
        config.storage.public_base_url = non_empty_var("CLOUDFLARE_PUBLIC_URL");

        config
    }
}

impl StorageConfig {
    /// All three credential parts, or `None` if any is missing
    pub fn credentials(&self) -> Option<R2Credentials> {
        Some(R2Credentials {
            account_id: self.account_id.clone()?,
            access_key: self.access_key.clone()?,
            secret_key: self.secret_key.clone()?,
        })
    }
}

fn non_empty_var(name: &str) -> Option<String> {
    match std::env::var(name) {
        Ok(v) if !v.is_empty() => Some(v),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.server.http_port, 8080);
        assert_eq!(config.server.output_dir, PathBuf::from("output"));
        assert_eq!(config.server.encoder_binary, "ffmpeg");
        assert!(config.auth.hmac_secret.is_none());
        assert!(config.storage.credentials().is_none());
    }

    #[test]
    fn test_partial_credentials_are_rejected() {
        let storage = StorageConfig {
            account_id: Some("acc".to_string()),
            access_key: Some("key".to_string()),
            secret_key: None,
            bucket: Some("bucket".to_string()),
            public_base_url: None,
        };
        assert!(storage.credentials().is_none());
    }

    #[test]
    fn test_full_credentials() {
        let storage = StorageConfig {
            account_id: Some("acc".to_string()),
            access_key: Some("key".to_string()),
            secret_key: Some("secret".to_string()),
            bucket: Some("bucket".to_string()),
            public_base_url: Some("https://cdn.example.com".to_string()),
        };

        let creds = storage.credentials().unwrap();
        assert_eq!(creds.account_id, "acc");
        assert_eq!(creds.access_key, "key");
        assert_eq!(creds.secret_key, "secret");
    }
}
