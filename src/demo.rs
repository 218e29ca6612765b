//! Scripted peer session over the loopback relay
//!
//! Drives one full negotiation against a [`SessionManager`]: pairing, a proposal
//! asking for `personal_sign`, one signing request on the approved session and
//! teardown.

use crate::approval::{ApprovalDecision, ChannelApprovalSurface};
use crate::capability::namespace_of;
use crate::manager::SessionManager;
use crate::relay::{LoopbackRelay, PairingUri, RelayCall};
use crate::types::{
    PeerMetadata, Proposal, ProposalId, ProposalNamespace, ProposalNamespaces, RelayProtocol,
    RequestId, RpcRequest, RpcResponse, Session, SessionRequest, Validation, VerifyContext,
};
use crate::{Error, Result};
use alloy::hex;
use secrecy::SecretString;
use serde::Serialize;
use serde_json::json;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use uuid::Uuid;

const RELAY_PROTOCOL: &str = "irn";
const RESPONSE_TIMEOUT: Duration = Duration::from_secs(30);

/// A dapp on the other end of the loopback relay
pub struct SimulatedPeer {
    relay: Arc<LoopbackRelay>,
    metadata: PeerMetadata,
    pairing_topic: String,
    next_id: AtomicU64,
}

impl SimulatedPeer {
    pub fn new(relay: Arc<LoopbackRelay>, name: impl Into<String>) -> Self {
        let pairing_topic = blake3::hash(Uuid::new_v4().as_bytes()).to_hex().to_string();
        Self {
            relay,
            metadata: PeerMetadata {
                name: name.into(),
                description: "Scripted peer on the loopback relay".to_string(),
                url: "https://demo.dapp.local".to_string(),
                icons: Vec::new(),
            },
            pairing_topic,
            next_id: AtomicU64::new(1),
        }
    }

    pub fn pairing_topic(&self) -> &str {
        &self.pairing_topic
    }

    /// URI the wallet would scan to pair with this peer
    pub fn pairing_uri(&self) -> String {
        let sym_key = blake3::hash(Uuid::new_v4().as_bytes()).to_hex().to_string();
        PairingUri::new(
            self.pairing_topic.clone(),
            RELAY_PROTOCOL,
            SecretString::from(sym_key),
        )
        .to_uri_string()
    }

    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::SeqCst)
    }

    /// Ask for a session on `chain_id` with `personal_sign`
    pub fn propose(&self, chain_id: &str) -> ProposalId {
        let mut required = ProposalNamespaces::new();
        required.insert(
            namespace_of(chain_id).to_string(),
            ProposalNamespace {
                chains: vec![chain_id.to_string()],
                methods: vec!["personal_sign".to_string()],
                events: vec!["accountsChanged".to_string()],
            },
        );
        let mut optional = ProposalNamespaces::new();
        optional.insert(
            namespace_of(chain_id).to_string(),
            ProposalNamespace {
                chains: vec![chain_id.to_string()],
                methods: vec!["eth_sign".to_string()],
                events: vec!["chainChanged".to_string()],
            },
        );

        let id = self.next_id();
        self.relay.propose(Proposal {
            id,
            proposer: self.metadata.clone(),
            relays: vec![RelayProtocol::new(RELAY_PROTOCOL)],
            required_namespaces: required,
            optional_namespaces: optional,
            pairing_topic: self.pairing_topic.clone(),
            verify_context: self.verify_context(),
        });
        id
    }

    /// Ask `account` to `personal_sign` `message` over `session`
    pub fn sign(&self, session: &Session, chain_id: &str, account: &str, message: &str) -> RequestId {
        let id = self.next_id();
        self.relay.request(SessionRequest {
            topic: session.topic.clone(),
            id,
            chain_id: chain_id.to_string(),
            request: RpcRequest {
                method: "personal_sign".to_string(),
                params: json!([hex::encode_prefixed(message.as_bytes()), account]),
            },
            verify_context: self.verify_context(),
        });
        id
    }

    fn verify_context(&self) -> VerifyContext {
        VerifyContext {
            origin: self.metadata.url.clone(),
            validation: Validation::Unknown,
            ..Default::default()
        }
    }
}

/// Approval surface that answers every prompt with `decision`
pub fn auto_approval(decision: ApprovalDecision) -> ChannelApprovalSurface {
    let (surface, mut prompts) = ChannelApprovalSurface::new();
    tokio::spawn(async move {
        while let Some(mut prompt) = prompts.recv().await {
            tracing::info!(
                proposal_id = prompt.request.proposal_id,
                peer = %prompt.request.peer_name,
                ?decision,
                "Answering connection request"
            );
            prompt.responder.decide(decision);
        }
    });
    surface
}

/// What the scripted peer observed
#[derive(Debug, Serialize)]
pub struct DemoReport {
    pub pairing_topic: String,
    pub proposal_id: ProposalId,
    pub session_topic: Option<String>,
    pub account: Option<String>,
    pub response: Option<RpcResponse>,
}

/// Run one scripted session against `manager`, closing it afterwards
pub async fn run(
    manager: &SessionManager,
    relay: Arc<LoopbackRelay>,
    message: &str,
) -> Result<DemoReport> {
    let mut calls = relay.subscribe_calls();
    let peer = SimulatedPeer::new(relay, "Demo Dapp");
    let chain_id = manager.config().chain_id.clone();

    manager.pair(&peer.pairing_uri()).await?;
    let proposal_id = peer.propose(&chain_id);

    let mut report = DemoReport {
        pairing_topic: peer.pairing_topic().to_string(),
        proposal_id,
        session_topic: None,
        account: None,
        response: None,
    };

    let decision_wait = manager.config().approval.timeout() + Duration::from_secs(5);
    let decided = next_call(&mut calls, decision_wait, |call| {
        matches!(call, RelayCall::Approve { params, .. } if params.id == proposal_id)
            || matches!(call, RelayCall::Reject { id, .. } if *id == proposal_id)
    })
    .await;

    let session = match decided {
        Ok(RelayCall::Approve { session, .. }) => Some(session),
        Ok(_) => {
            tracing::info!(proposal_id, "Proposal was rejected");
            None
        }
        Err(e) => {
            manager.close().await;
            return Err(e);
        }
    };

    if let Some(session) = session {
        let account = session
            .namespaces
            .values()
            .flat_map(|namespace| namespace.accounts.iter())
            .find_map(|account| account.rsplit(':').next())
            .map(str::to_string);
        report.session_topic = Some(session.topic.clone());

        if let Some(account) = &account {
            let request_id = peer.sign(&session, &chain_id, account, message);
            let responded = next_call(&mut calls, RESPONSE_TIMEOUT, |call| {
                matches!(call, RelayCall::Respond { response, .. } if response.id() == request_id)
            })
            .await;
            match responded {
                Ok(RelayCall::Respond { response, .. }) => report.response = Some(response),
                Ok(_) => {}
                Err(e) => tracing::warn!(request_id, error = %e, "No response to signing request"),
            }
        }
        report.account = account;
    }

    manager.close().await;
    Ok(report)
}

async fn next_call(
    calls: &mut broadcast::Receiver<RelayCall>,
    wait: Duration,
    wanted: impl Fn(&RelayCall) -> bool,
) -> Result<RelayCall> {
    let deadline = tokio::time::Instant::now() + wait;
    loop {
        match tokio::time::timeout_at(deadline, calls.recv()).await {
            Ok(Ok(call)) if wanted(&call) => return Ok(call),
            Ok(Ok(_)) | Ok(Err(RecvError::Lagged(_))) => continue,
            Ok(Err(RecvError::Closed)) => {
                return Err(Error::Relay("loopback relay went away".to_string()))
            }
            Err(_) => {
                return Err(Error::Relay(format!(
                    "peer saw no reply within {:?}",
                    wait
                )))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::{EvmSigningCapability, StaticCapabilityProvider};
    use crate::config::{Config, RelayConfig};
    use crate::relay::LoopbackConnector;

    const TEST_KEY: &str = "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";

    fn manager(relay: Arc<LoopbackRelay>, decision: ApprovalDecision) -> SessionManager {
        let config = Config {
            relay: RelayConfig {
                project_id: "demo".to_string(),
                relay_url: "wss://relay.test".to_string(),
            },
            ..Config::default()
        };
        let capability =
            EvmSigningCapability::from_secret(&SecretString::from(TEST_KEY.to_string()), "eip155:1")
                .unwrap();

        SessionManager::builder(config)
            .relay(Arc::new(LoopbackConnector::new(relay)))
            .capabilities(Arc::new(StaticCapabilityProvider::new(Arc::new(capability))))
            .approvals(Arc::new(auto_approval(decision)))
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn approved_demo_signs_message() {
        let relay = Arc::new(LoopbackRelay::new());
        let manager = manager(relay.clone(), ApprovalDecision::Approved);

        let report = run(&manager, relay.clone(), "hello from the demo").await.unwrap();

        assert!(report.session_topic.is_some());
        assert_eq!(
            report.account.as_deref().map(str::to_lowercase).as_deref(),
            Some("0xf39fd6e51aad88f6f4ce6ab8827279cfffb92266")
        );
        let response = report.response.expect("signing response");
        assert!(!response.is_error());
        assert!(!manager.has_session().await);
        assert!(relay
            .calls()
            .iter()
            .any(|call| matches!(call, RelayCall::Disconnect { .. })));
    }

    #[tokio::test]
    async fn rejected_demo_has_no_session() {
        let relay = Arc::new(LoopbackRelay::new());
        let manager = manager(relay.clone(), ApprovalDecision::Rejected);

        let report = run(&manager, relay, "hello").await.unwrap();

        assert!(report.session_topic.is_none());
        assert!(report.response.is_none());
    }

    #[test]
    fn pairing_uri_round_trips() {
        let peer = SimulatedPeer::new(Arc::new(LoopbackRelay::new()), "Peer");
        let uri = PairingUri::parse(&peer.pairing_uri()).unwrap();
        assert_eq!(uri.topic, peer.pairing_topic());
        assert_eq!(uri.relay_protocol, RELAY_PROTOCOL);
    }
}
