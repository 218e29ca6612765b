//! Signing capability
//!
//! The capability holds key material and executes signing calls routed from
//! established sessions. Keys never leave the capability implementation.

mod evm;

pub use evm::{EvmCapabilityProvider, EvmSigningCapability, PRIVATE_KEY_ENV};

use crate::types::{RpcResponse, SessionRequest};
use crate::Result;
use async_trait::async_trait;
use std::sync::Arc;

/// A signing identity on one chain
///
/// `execute` encodes expected failures (unsupported method, bad params, user denial)
/// as [`RpcResponse::Error`]; it must not panic for them.
#[async_trait]
pub trait SigningCapability: Send + Sync {
    /// Chain identifier in `namespace:reference` form, e.g. `eip155:1`
    fn chain_id(&self) -> String;

    /// Methods this capability can execute, in preference order
    fn supported_methods(&self) -> Vec<String>;

    /// Events this capability may emit to peers
    fn supported_events(&self) -> Vec<String>;

    /// Current account identifier (address)
    fn current_account(&self) -> String;

    /// Execute one signing call
    async fn execute(&self, request: &SessionRequest) -> RpcResponse;
}

/// Produces the capability bound at manager setup
#[async_trait]
pub trait CapabilityProvider: Send + Sync {
    async fn bind(&self) -> Result<Arc<dyn SigningCapability>>;
}

/// Provider that hands out an already-constructed capability
pub struct StaticCapabilityProvider {
    capability: Arc<dyn SigningCapability>,
}

impl StaticCapabilityProvider {
    pub fn new(capability: Arc<dyn SigningCapability>) -> Self {
        Self { capability }
    }
}

#[async_trait]
impl CapabilityProvider for StaticCapabilityProvider {
    async fn bind(&self) -> Result<Arc<dyn SigningCapability>> {
        Ok(Arc::clone(&self.capability))
    }
}

/// Namespace key of a chain id (`"eip155:1"` -> `"eip155"`)
pub fn namespace_of(chain_id: &str) -> &str {
    chain_id.split(':').next().unwrap_or(chain_id)
}

/// CAIP-10 account id for `account` on `chain_id`
pub fn account_id(chain_id: &str, account: &str) -> String {
    format!("{}:{}", chain_id, account)
}
