//! Session negotiation data model
//!
//! Proposals, requests and sessions as delivered by the relay, plus the JSON-RPC
//! response envelope and the dapp record persisted per session.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Relay-assigned id of a session proposal
pub type ProposalId = u64;

/// JSON-RPC id of a session request
pub type RequestId = u64;

/// Default JSON-RPC error code for failed requests
pub const RPC_ERROR_CODE: i64 = -32000;

/// Outcome of the relay's domain verification for a peer
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Validation {
    #[default]
    Unknown,
    Valid,
    Invalid,
}

/// Trust metadata attached to a proposal or request (display only)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerifyContext {
    pub origin: String,
    #[serde(default)]
    pub validation: Validation,
    #[serde(default)]
    pub verify_url: String,
    #[serde(default)]
    pub is_scam: Option<bool>,
}

/// Self-description published by a peer
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerMetadata {
    pub name: String,
    pub description: String,
    pub url: String,
    #[serde(default)]
    pub icons: Vec<String>,
}

impl PeerMetadata {
    /// First advertised icon, if any
    pub fn icon(&self) -> Option<&str> {
        self.icons.first().map(String::as_str)
    }
}

/// Relay protocol requested for a session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayProtocol {
    pub protocol: String,
}

impl RelayProtocol {
    pub fn new(protocol: impl Into<String>) -> Self {
        Self {
            protocol: protocol.into(),
        }
    }
}

/// Chains, methods and events a peer asks for under one namespace key
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProposalNamespace {
    #[serde(default)]
    pub chains: Vec<String>,
    #[serde(default)]
    pub methods: Vec<String>,
    #[serde(default)]
    pub events: Vec<String>,
}

/// Namespaces keyed by namespace key (`"eip155"`) or full chain id (`"eip155:1"`)
pub type ProposalNamespaces = BTreeMap<String, ProposalNamespace>;

/// What an established session is allowed to do under one namespace key
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionNamespace {
    pub chains: Vec<String>,
    pub accounts: Vec<String>,
    pub methods: Vec<String>,
    pub events: Vec<String>,
}

pub type SessionNamespaces = BTreeMap<String, SessionNamespace>;

/// A peer's request to establish a session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Proposal {
    pub id: ProposalId,
    pub proposer: PeerMetadata,
    pub relays: Vec<RelayProtocol>,
    #[serde(default)]
    pub required_namespaces: ProposalNamespaces,
    #[serde(default)]
    pub optional_namespaces: ProposalNamespaces,
    /// Topic of the pairing this proposal arrived on (`wc:<pairingTopic>@...`)
    pub pairing_topic: String,
    #[serde(default)]
    pub verify_context: VerifyContext,
}

/// The JSON-RPC call carried by a session request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcRequest {
    pub method: String,
    #[serde(default)]
    pub params: Value,
}

/// A signing call submitted by a peer over an established session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionRequest {
    pub topic: String,
    pub id: RequestId,
    pub chain_id: String,
    pub request: RpcRequest,
    #[serde(default)]
    pub verify_context: VerifyContext,
}

/// An approved session as returned by the relay
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub topic: String,
    pub relay: RelayProtocol,
    pub namespaces: SessionNamespaces,
}

/// Relay SDK reason attached to rejections and disconnects
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reason {
    pub code: i64,
    pub message: String,
}

impl Reason {
    pub fn user_rejected() -> Self {
        Self {
            code: 5000,
            message: "user rejected".to_string(),
        }
    }

    pub fn user_disconnected() -> Self {
        Self {
            code: 6000,
            message: "user disconnected".to_string(),
        }
    }
}

/// Peer-initiated session teardown
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDelete {
    pub topic: String,
    pub reason: Reason,
}

/// Liveness check on a session or pairing topic
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ping {
    pub topic: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RpcError {
    pub code: i64,
    pub message: String,
}

/// JSON-RPC 2.0 response sent back to the peer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RpcResponse {
    Result { id: RequestId, result: Value },
    Error { id: RequestId, error: RpcError },
}

impl RpcResponse {
    pub fn success(id: RequestId, result: impl Into<Value>) -> Self {
        RpcResponse::Result {
            id,
            result: result.into(),
        }
    }

    pub fn error(id: RequestId, message: impl Into<String>) -> Self {
        RpcResponse::Error {
            id,
            error: RpcError {
                code: RPC_ERROR_CODE,
                message: message.into(),
            },
        }
    }

    pub fn id(&self) -> RequestId {
        match self {
            RpcResponse::Result { id, .. } | RpcResponse::Error { id, .. } => *id,
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, RpcResponse::Error { .. })
    }

    /// Error message, if this is an error response
    pub fn error_message(&self) -> Option<&str> {
        match self {
            RpcResponse::Error { error, .. } => Some(&error.message),
            RpcResponse::Result { .. } => None,
        }
    }

    /// Re-key the response to `id`
    pub fn with_id(mut self, new_id: RequestId) -> Self {
        match &mut self {
            RpcResponse::Result { id, .. } | RpcResponse::Error { id, .. } => *id = new_id,
        }
        self
    }
}

/// Dapp details kept per session topic for the wallet UI
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DappSessionRecord {
    pub name: String,
    pub description: String,
    pub url: String,
    pub icon: Option<String>,
}

impl From<&PeerMetadata> for DappSessionRecord {
    fn from(metadata: &PeerMetadata) -> Self {
        Self {
            name: metadata.name.clone(),
            description: metadata.description.clone(),
            url: metadata.url.clone(),
            icon: metadata.icon().map(str::to_string),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn rpc_error_serializes_as_json_rpc() {
        let response = RpcResponse::error(7, "chain unsupported: eth:1");
        let value = serde_json::to_value(&response).unwrap();
        assert_eq!(
            value,
            json!({"id": 7, "error": {"code": -32000, "message": "chain unsupported: eth:1"}})
        );
    }

    #[test]
    fn rpc_result_deserializes_untagged() {
        let parsed: RpcResponse = serde_json::from_value(json!({"id": 3, "result": "sig"})).unwrap();
        assert_eq!(parsed, RpcResponse::success(3, "sig"));
        assert!(!parsed.is_error());
        assert_eq!(parsed.error_message(), None);
    }

    #[test]
    fn with_id_rekeys_both_variants() {
        assert_eq!(RpcResponse::success(1, "x").with_id(9).id(), 9);
        assert_eq!(RpcResponse::error(1, "x").with_id(9).id(), 9);
    }

    #[test]
    fn dapp_record_takes_first_icon() {
        let metadata = PeerMetadata {
            name: "TestDapp".to_string(),
            description: "desc".to_string(),
            url: "https://dapp.test".to_string(),
            icons: vec!["a.png".to_string(), "b.png".to_string()],
        };
        let record = DappSessionRecord::from(&metadata);
        assert_eq!(record.icon.as_deref(), Some("a.png"));
        assert_eq!(record.name, "TestDapp");

        let bare = DappSessionRecord::from(&PeerMetadata::default());
        assert!(bare.icon.is_none());
    }

    #[test]
    fn verify_context_defaults_to_unknown() {
        let parsed: VerifyContext =
            serde_json::from_value(json!({"origin": "https://dapp.test"})).unwrap();
        assert_eq!(parsed.validation, Validation::Unknown);
        assert!(parsed.is_scam.is_none());
    }
}
