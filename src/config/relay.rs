//! Relay endpoint configuration
//!
//! The relay project id is read from the environment so it never has to live in a
//! checked-in config file:
//!
//! ```bash
//! export RELAY_PROJECT_ID="your-project-id"
//! export RELAY_URL="wss://relay.walletconnect.com"   # optional
//! ```

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use url::Url;

/// Environment variable names
pub mod env_vars {
    pub const RELAY_PROJECT_ID: &str = "RELAY_PROJECT_ID";
    pub const RELAY_URL: &str = "RELAY_URL";
}

/// Public relay endpoint
pub const DEFAULT_RELAY_URL: &str = "wss://relay.walletconnect.com";

/// Project id used when `RELAY_PROJECT_ID` is not set (loopback/dev only)
pub const DEV_PROJECT_ID: &str = "local-dev";

/// Fixed project/relay configuration handed to the relay transport at setup
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayConfig {
    /// Relay project identifier
    pub project_id: String,
    /// Relay websocket endpoint
    pub relay_url: String,
}

impl RelayConfig {
    /// Build from environment variables, falling back to dev defaults
    pub fn from_env() -> Self {
        let project_id = match std::env::var(env_vars::RELAY_PROJECT_ID) {
            Ok(id) => id,
            Err(_) => {
                tracing::debug!("RELAY_PROJECT_ID not set, using dev project id");
                DEV_PROJECT_ID.to_string()
            }
        };
        let relay_url =
            std::env::var(env_vars::RELAY_URL).unwrap_or_else(|_| DEFAULT_RELAY_URL.to_string());

        Self {
            project_id,
            relay_url,
        }
    }

    /// Check the configuration before a transport is initialised with it
    pub fn validate(&self) -> Result<Url> {
        if self.project_id.trim().is_empty() {
            return Err(Error::Config("relay project id is empty".to_string()));
        }

        let url = Url::parse(&self.relay_url)
            .map_err(|e| Error::Config(format!("invalid relay url {}: {}", self.relay_url, e)))?;

        match url.scheme() {
            "ws" | "wss" => Ok(url),
            other => Err(Error::Config(format!(
                "relay url must use ws or wss, got {}",
                other
            ))),
        }
    }
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self::from_env()
    }
}
