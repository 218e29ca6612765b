//! EVM signing capability
//!
//! SECURITY: This is the ONLY place where private keys exist.
//! - Keys are held in alloy's PrivateKeySigner which handles crypto securely
//! - Keys are never serialized
//! - Keys are never logged

use super::{CapabilityProvider, SigningCapability};
use crate::types::{RpcResponse, SessionRequest};
use crate::{Error, Result};
use alloy::hex;
use alloy::primitives::Address;
use alloy::signers::local::PrivateKeySigner;
use alloy::signers::SignerSync;
use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde_json::Value;
use std::str::FromStr;
use std::sync::Arc;

/// Environment variable holding the hex-encoded signing key
pub const PRIVATE_KEY_ENV: &str = "PRIVATE_KEY";

const PERSONAL_SIGN: &str = "personal_sign";
const ETH_SIGN: &str = "eth_sign";

/// Signing capability backed by a local secp256k1 key
pub struct EvmSigningCapability {
    /// The signer
    signer: PrivateKeySigner,
    /// Public address (safe to expose)
    address: Address,
    /// Chain served, e.g. `eip155:1`
    chain_id: String,
}

impl EvmSigningCapability {
    /// Create a capability from a hex-encoded private key
    pub fn from_secret(key: &SecretString, chain_id: impl Into<String>) -> Result<Self> {
        let key_hex = key.expose_secret();
        let key_hex = key_hex.strip_prefix("0x").unwrap_or(key_hex);

        let signer: PrivateKeySigner = key_hex
            .parse()
            .map_err(|e| Error::Capability(format!("Invalid private key: {}", e)))?;

        let address = signer.address();

        Ok(Self {
            signer,
            address,
            chain_id: chain_id.into(),
        })
    }

    /// Get the public address (safe to share)
    pub fn address(&self) -> Address {
        self.address
    }

    /// EIP-191 sign `message` and return the 0x-prefixed signature
    fn sign_message(&self, message: &[u8]) -> std::result::Result<String, String> {
        self.signer
            .sign_message_sync(message)
            .map(|signature| hex::encode_prefixed(signature.as_bytes()))
            .map_err(|e| format!("Signing failed: {}", e))
    }

    /// Split `personal_sign` (message, address) / `eth_sign` (address, message) params
    fn message_and_signer<'a>(
        &self,
        method: &str,
        params: &'a Value,
    ) -> std::result::Result<(&'a str, &'a str), String> {
        let items = params
            .as_array()
            .filter(|items| items.len() >= 2)
            .ok_or_else(|| format!("{} expects [message, address] params", method))?;

        let first = items[0]
            .as_str()
            .ok_or_else(|| format!("{} params must be strings", method))?;
        let second = items[1]
            .as_str()
            .ok_or_else(|| format!("{} params must be strings", method))?;

        if method == ETH_SIGN {
            Ok((second, first))
        } else {
            Ok((first, second))
        }
    }

    fn handle_sign(&self, method: &str, params: &Value) -> std::result::Result<String, String> {
        let (message, requested) = self.message_and_signer(method, params)?;

        let requested = Address::from_str(requested)
            .map_err(|e| format!("Invalid signer address: {}", e))?;
        if requested != self.address {
            return Err(format!("Address {} is not managed by this wallet", requested));
        }

        self.sign_message(&decode_message(message))
    }
}

/// Hex payloads are signed as bytes, anything else as UTF-8 text
fn decode_message(message: &str) -> Vec<u8> {
    message
        .strip_prefix("0x")
        .and_then(|stripped| hex::decode(stripped).ok())
        .unwrap_or_else(|| message.as_bytes().to_vec())
}

#[async_trait]
impl SigningCapability for EvmSigningCapability {
    fn chain_id(&self) -> String {
        self.chain_id.clone()
    }

    fn supported_methods(&self) -> Vec<String> {
        vec![PERSONAL_SIGN.to_string(), ETH_SIGN.to_string()]
    }

    fn supported_events(&self) -> Vec<String> {
        vec!["accountsChanged".to_string(), "chainChanged".to_string()]
    }

    fn current_account(&self) -> String {
        self.address.to_checksum(None)
    }

    async fn execute(&self, request: &SessionRequest) -> RpcResponse {
        let method = request.request.method.as_str();
        let outcome = match method {
            PERSONAL_SIGN | ETH_SIGN => self.handle_sign(method, &request.request.params),
            other => Err(format!("Unsupported method: {}", other)),
        };

        match outcome {
            Ok(signature) => RpcResponse::success(request.id, signature),
            Err(message) => {
                tracing::debug!(request_id = request.id, method, error = %message, "Signing call failed");
                RpcResponse::error(request.id, message)
            }
        }
    }
}

// Implement Debug manually to avoid exposing the signer
impl std::fmt::Debug for EvmSigningCapability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EvmSigningCapability")
            .field("address", &self.address)
            .field("chain_id", &self.chain_id)
            .field("signer", &"[REDACTED]")
            .finish()
    }
}

/// Reads the signing key from the environment each time the manager is set up
pub struct EvmCapabilityProvider {
    var_name: String,
    chain_id: String,
}

impl EvmCapabilityProvider {
    pub fn new(var_name: impl Into<String>, chain_id: impl Into<String>) -> Self {
        Self {
            var_name: var_name.into(),
            chain_id: chain_id.into(),
        }
    }
}

#[async_trait]
impl CapabilityProvider for EvmCapabilityProvider {
    async fn bind(&self) -> Result<Arc<dyn SigningCapability>> {
        let key = std::env::var(&self.var_name).map_err(|_| {
            Error::Capability(format!(
                "Environment variable {} not set. Required for wallet initialization.",
                self.var_name
            ))
        })?;
        let key = SecretString::from(key);

        let capability = EvmSigningCapability::from_secret(&key, self.chain_id.clone())?;
        tracing::info!(address = %capability.current_account(), chain_id = %self.chain_id, "Bound EVM signing capability");
        Ok(Arc::new(capability))
    }
}
