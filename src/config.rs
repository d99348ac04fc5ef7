//! Gateway configuration.
//!
//! Loaded from environment variables (optionally via a `.env` file), with
//! defaults for everything but nothing secret inside: credentials live in
//! the credential file, never in the environment.

use eyre::{eyre, Result, WrapErr};
use serde::Deserialize;
use std::env;
use std::path::Path;
use url::Url;

/// Main configuration for the gateway core.
#[derive(Debug, Clone, Deserialize)]
pub struct GatewayConfig {
    pub api: ApiConfig,
    pub credentials: CredentialConfig,
}

/// Exchange API endpoint configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Validity window for signed requests, in milliseconds.
    #[serde(default = "default_recv_window_ms")]
    pub recv_window_ms: u64,
    #[serde(default = "default_http_timeout_secs")]
    pub http_timeout_secs: u64,
}

/// Credential file and prompting configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct CredentialConfig {
    /// File name under the user's home directory.
    #[serde(default = "default_credential_file")]
    pub file_name: String,
    /// Prompt interactively for values the file does not hold.
    #[serde(default = "default_prompt_missing")]
    pub prompt_missing: bool,
    #[serde(default = "default_api_key_name")]
    pub api_key_name: String,
    #[serde(default = "default_secret_key_name")]
    pub secret_key_name: String,
}

/// Default functions
fn default_base_url() -> String {
    "https://api.binance.com".to_string()
}

fn default_recv_window_ms() -> u64 {
    10_000
}

fn default_http_timeout_secs() -> u64 {
    30
}

fn default_credential_file() -> String {
    "panzer.tmp".to_string()
}

fn default_prompt_missing() -> bool {
    true
}

fn default_api_key_name() -> String {
    "api_key".to_string()
}

fn default_secret_key_name() -> String {
    "api_secret".to_string()
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            api: ApiConfig {
                base_url: default_base_url(),
                recv_window_ms: default_recv_window_ms(),
                http_timeout_secs: default_http_timeout_secs(),
            },
            credentials: CredentialConfig {
                file_name: default_credential_file(),
                prompt_missing: default_prompt_missing(),
                api_key_name: default_api_key_name(),
                secret_key_name: default_secret_key_name(),
            },
        }
    }
}

impl GatewayConfig {
    /// Load configuration from environment variables.
    /// Loads a `.env` file first when one is present.
    pub fn load() -> Result<Self> {
        Self::load_from_file(".env").or_else(|_| Self::load_from_env())
    }

    /// Load from a specific .env file path.
    pub fn load_from_file(path: &str) -> Result<Self> {
        if Path::new(path).exists() {
            dotenvy::from_filename(path)
                .wrap_err_with(|| format!("Failed to load .env file from {}", path))?;
        }
        Self::load_from_env()
    }

    fn load_from_env() -> Result<Self> {
        let api = ApiConfig {
            base_url: env::var("MBX_BASE_URL").unwrap_or_else(|_| default_base_url()),
            recv_window_ms: env::var("MBX_RECV_WINDOW_MS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(default_recv_window_ms()),
            http_timeout_secs: env::var("MBX_HTTP_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(default_http_timeout_secs()),
        };

        let credentials = CredentialConfig {
            file_name: env::var("MBX_CREDENTIAL_FILE")
                .unwrap_or_else(|_| default_credential_file()),
            prompt_missing: env::var("MBX_PROMPT_MISSING")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(default_prompt_missing()),
            api_key_name: env::var("MBX_API_KEY_NAME").unwrap_or_else(|_| default_api_key_name()),
            secret_key_name: env::var("MBX_SECRET_KEY_NAME")
                .unwrap_or_else(|_| default_secret_key_name()),
        };

        let config = GatewayConfig { api, credentials };
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        let url = Url::parse(&self.api.base_url)
            .wrap_err_with(|| format!("api.base_url '{}' is not a URL", self.api.base_url))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(eyre!("api.base_url must be http or https"));
        }

        // The exchange rejects recvWindow above one minute.
        if self.api.recv_window_ms == 0 || self.api.recv_window_ms > 60_000 {
            return Err(eyre!("api.recv_window_ms must be in 1..=60000"));
        }

        if self.api.http_timeout_secs == 0 {
            return Err(eyre!("api.http_timeout_secs cannot be zero"));
        }

        if self.credentials.file_name.is_empty()
            || self.credentials.file_name.contains(['/', '\\'])
        {
            return Err(eyre!(
                "credentials.file_name must be a bare file name, got '{}'",
                self.credentials.file_name
            ));
        }

        if self.credentials.api_key_name.is_empty() || self.credentials.secret_key_name.is_empty() {
            return Err(eyre!("credential key names cannot be empty"));
        }

        Ok(())
    }

    pub fn base_url(&self) -> Result<Url> {
        Url::parse(&self.api.base_url).wrap_err("api.base_url is not a URL")
    }
}
