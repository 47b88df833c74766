//! Bridge configuration.
//!
//! Loaded from a TOML file with environment-variable overrides for the
//! account credentials, so secrets can stay out of the file.

use crate::error::{BridgeError, BridgeResult};
use serde::Deserialize;
use std::path::Path;

/// Cloud endpoints for one environment (production or beta).
#[derive(Debug, Clone, Deserialize)]
pub struct Hosts {
    /// Identity provider (token grants and household exchange).
    pub heimdall: String,
    /// GraphQL discovery endpoint.
    pub niflheim: String,
    /// MQTT-over-websocket broker proxy.
    pub bifrost: String,
}

/// OAuth client registration used for the password grant.
#[derive(Debug, Clone, Deserialize)]
pub struct OauthConfig {
    pub client_id: String,
    pub client_secret: String,
    /// Value sent as the `x-fh-app-id` header on every identity call.
    pub app_id: String,
}

/// Top-level bridge configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct BridgeConfig {
    /// Account email. Overridable via `FIMP_EMAIL`.
    #[serde(default)]
    pub email: String,
    /// Account password. Overridable via `FIMP_PASSWORD`.
    #[serde(default)]
    pub password: String,
    /// Household to bridge. When unset the first household on the account
    /// is used.
    #[serde(default)]
    pub household_id: Option<String>,

    pub hosts: Hosts,
    pub oauth: OauthConfig,

    /// Seconds between session resyncs.
    #[serde(default = "default_resync_interval")]
    pub resync_interval_secs: u64,
    /// Seconds between auth-token refreshes.
    #[serde(default = "default_token_refresh_interval")]
    pub token_refresh_interval_secs: u64,
    /// Seconds between gateway reachability polls.
    #[serde(default = "default_gateway_poll_interval")]
    pub gateway_poll_interval_secs: u64,
}

fn default_resync_interval() -> u64 {
    300
}

fn default_token_refresh_interval() -> u64 {
    14_400
}

fn default_gateway_poll_interval() -> u64 {
    30
}

impl BridgeConfig {
    /// Load configuration from a TOML file and apply env overrides.
    pub fn load(path: impl AsRef<Path>) -> BridgeResult<Self> {
        let raw = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            BridgeError::Config(format!("cannot read {}: {e}", path.as_ref().display()))
        })?;
        let mut config: BridgeConfig =
            toml::from_str(&raw).map_err(|e| BridgeError::Config(e.to_string()))?;
        config.apply_env_overrides();
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(email) = std::env::var("FIMP_EMAIL") {
            self.email = email;
        }
        if let Ok(password) = std::env::var("FIMP_PASSWORD") {
            self.password = password;
        }
    }

    /// Reject configurations the bridge cannot start with.
    pub fn validate(&self) -> BridgeResult<()> {
        if self.email.is_empty() {
            return Err(BridgeError::Config("no email configured".into()));
        }
        if self.password.is_empty() {
            return Err(BridgeError::Config("no password configured".into()));
        }
        Ok(())
    }
}
