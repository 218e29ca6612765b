//! Relay transport interface
//!
//! The relay delivers proposal/request/delete/ping events from peers and exposes the
//! approve/reject/respond/disconnect primitives. Its wire protocol and cryptography
//! live behind [`RelayTransport`]; the manager only sees typed events and calls.

mod loopback;
mod uri;

pub use loopback::{LoopbackConnector, LoopbackRelay, RelayCall};
pub use uri::PairingUri;

use crate::config::{RelayConfig, WalletMetadata};
use crate::types::{
    Ping, Proposal, ProposalId, Reason, RpcResponse, Session, SessionDelete, SessionNamespaces,
    SessionRequest,
};
use crate::Result;
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc;
use uuid::Uuid;

/// Event streams a listener can be registered for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    SessionProposal,
    SessionRequest,
    SessionDelete,
    SessionPing,
    PairingPing,
}

impl EventKind {
    /// Every stream the session manager listens on
    pub const ALL: [EventKind; 5] = [
        EventKind::SessionProposal,
        EventKind::SessionRequest,
        EventKind::SessionDelete,
        EventKind::SessionPing,
        EventKind::PairingPing,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            EventKind::SessionProposal => "session_proposal",
            EventKind::SessionRequest => "session_request",
            EventKind::SessionDelete => "session_delete",
            EventKind::SessionPing => "session_ping",
            EventKind::PairingPing => "pairing_ping",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// An inbound relay event
#[derive(Debug, Clone)]
pub enum RelayEvent {
    Proposal(Proposal),
    Request(SessionRequest),
    Delete(SessionDelete),
    SessionPing(Ping),
    PairingPing(Ping),
}

impl RelayEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            RelayEvent::Proposal(_) => EventKind::SessionProposal,
            RelayEvent::Request(_) => EventKind::SessionRequest,
            RelayEvent::Delete(_) => EventKind::SessionDelete,
            RelayEvent::SessionPing(_) => EventKind::SessionPing,
            RelayEvent::PairingPing(_) => EventKind::PairingPing,
        }
    }
}

/// Where a transport delivers events for a registered listener
pub type EventSink = mpsc::UnboundedSender<RelayEvent>;

/// Handle returned by [`RelayTransport::on`], consumed by [`RelayTransport::off`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(Uuid);

impl ListenerId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ListenerId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ListenerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Parameters of a session approval
#[derive(Debug, Clone, PartialEq)]
pub struct ApproveParams {
    pub id: ProposalId,
    pub relay_protocol: String,
    pub namespaces: SessionNamespaces,
}

/// A live connection to the relay
#[async_trait]
pub trait RelayTransport: Send + Sync {
    /// Identifier of this client on the relay (diagnostics only)
    async fn client_id(&self) -> Result<String>;

    /// Start pairing; the peer's proposal arrives later as an event
    async fn pair(&self, uri: &PairingUri) -> Result<()>;

    async fn approve_session(&self, params: ApproveParams) -> Result<Session>;

    async fn reject_session(&self, id: ProposalId, reason: Reason) -> Result<()>;

    async fn respond_session_request(&self, topic: &str, response: RpcResponse) -> Result<()>;

    async fn disconnect_session(&self, topic: &str, reason: Reason) -> Result<()>;

    /// Register `sink` for events of `kind`
    fn on(&self, kind: EventKind, sink: EventSink) -> Result<ListenerId>;

    /// Remove a listener; unknown ids are not an error
    fn off(&self, kind: EventKind, listener: ListenerId) -> Result<()>;
}

/// Initialises a relay transport from the fixed relay configuration
#[async_trait]
pub trait RelayConnector: Send + Sync {
    async fn connect(
        &self,
        config: &RelayConfig,
        metadata: &WalletMetadata,
    ) -> Result<Arc<dyn RelayTransport>>;
}
