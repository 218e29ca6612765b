//! Wallet peer-session manager
//!
//! Lets third-party applications pair with the wallet over a relay, negotiates a
//! session with the user's approval and routes the peer's signing requests to the
//! wallet's signing capability.
//!
//! # Security Model
//!
//! - Every session needs an explicit decision on the approval surface
//! - Requests are only executed for the chain the capability serves
//! - Private keys never leave the signing capability
//! - Negotiation outcomes and answered requests go to an audit trail

pub mod approval;
pub mod audit;
pub mod capability;
pub mod config;
pub mod demo;
pub mod manager;
pub mod namespaces;
pub mod relay;
pub mod store;
pub mod types;

mod error;

// Re-export commonly used types
pub use config::{Config, RelayConfig, WalletMetadata};
pub use error::{Error, Result};
pub use manager::{LifecycleEvent, SessionManager};
pub use relay::PairingUri;
