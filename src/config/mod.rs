//! Configuration for the session manager

pub mod relay;

use serde::{Deserialize, Serialize};
use std::time::Duration;

pub use relay::RelayConfig;

/// Chain served by the bundled EVM signing capability
pub const DEFAULT_CHAIN_ID: &str = "eip155:1";

/// Metadata the wallet announces to peers when the transport is initialised
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalletMetadata {
    pub name: String,
    pub description: String,
    pub url: String,
    #[serde(default)]
    pub icons: Vec<String>,
}

impl Default for WalletMetadata {
    fn default() -> Self {
        Self {
            name: "Avail".to_string(),
            description: "Frictionless control of your money and data privately.".to_string(),
            url: "avail.global".to_string(),
            icons: Vec::new(),
        }
    }
}

/// Approval surface settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalSettings {
    /// How long a proposal may wait for a user decision before it is rejected
    pub timeout_ms: u64,
}

impl ApprovalSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl Default for ApprovalSettings {
    fn default() -> Self {
        Self {
            timeout_ms: 300_000, // 5 minutes
        }
    }
}

/// Main configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Relay project and endpoint
    #[serde(default)]
    pub relay: RelayConfig,
    /// Wallet metadata announced to peers
    #[serde(default)]
    pub wallet: WalletMetadata,
    /// Approval wait settings
    #[serde(default)]
    pub approval: ApprovalSettings,
    /// Chain identifier served by the signing capability
    #[serde(default = "default_chain_id")]
    pub chain_id: String,
    /// File backing the dapp session store (in-memory when unset)
    #[serde(default)]
    pub session_store_path: Option<String>,
    /// Path to audit log file
    #[serde(default)]
    pub audit_log_path: Option<String>,
}

fn default_chain_id() -> String {
    DEFAULT_CHAIN_ID.to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            relay: RelayConfig::default(),
            wallet: WalletMetadata::default(),
            approval: ApprovalSettings::default(),
            chain_id: default_chain_id(),
            session_store_path: None,
            audit_log_path: Some("sessions.jsonl".to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deserialize_fills_defaults() {
        let value = serde_json::json!({
            "relay": {
                "project_id": "abc",
                "relay_url": "wss://relay.example"
            }
        });
        let parsed: Config = serde_json::from_value(value).expect("parse config");
        assert_eq!(parsed.relay.project_id, "abc");
        assert_eq!(parsed.chain_id, DEFAULT_CHAIN_ID);
        assert_eq!(parsed.approval.timeout_ms, 300_000);
        assert_eq!(parsed.wallet.name, "Avail");
        assert!(parsed.session_store_path.is_none());
    }

    #[test]
    fn deserialize_explicit() {
        let value = serde_json::json!({
            "relay": {
                "project_id": "abc",
                "relay_url": "wss://relay.example"
            },
            "wallet": {
                "name": "Test Wallet",
                "description": "for tests",
                "url": "wallet.test"
            },
            "approval": { "timeout_ms": 1500 },
            "chain_id": "eip155:10",
            "session_store_path": "sessions.json",
            "audit_log_path": null
        });
        let parsed: Config = serde_json::from_value(value).expect("parse config");
        assert_eq!(parsed.wallet.name, "Test Wallet");
        assert!(parsed.wallet.icons.is_empty());
        assert_eq!(parsed.approval.timeout(), Duration::from_millis(1500));
        assert_eq!(parsed.chain_id, "eip155:10");
        assert_eq!(parsed.session_store_path.as_deref(), Some("sessions.json"));
        assert!(parsed.audit_log_path.is_none());
    }
}
