//! In-process relay
//!
//! Delivers peer events straight to registered listeners and records every call the
//! wallet makes, so a simulated peer (or a test) can drive the whole negotiation
//! without a network. Topics are derived with blake3 like relay topics are.

use super::{
    ApproveParams, EventKind, EventSink, ListenerId, PairingUri, RelayConnector, RelayEvent,
    RelayTransport,
};
use crate::config::{RelayConfig, WalletMetadata};
use crate::types::{
    Ping, Proposal, ProposalId, Reason, RelayProtocol, RpcResponse, Session, SessionDelete,
    SessionRequest,
};
use crate::{Error, Result};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::broadcast;
use uuid::Uuid;

/// A call made by the wallet against the relay
#[derive(Debug, Clone, PartialEq)]
pub enum RelayCall {
    Pair { topic: String },
    Approve { params: ApproveParams, session: Session },
    Reject { id: ProposalId, reason: Reason },
    Respond { topic: String, response: RpcResponse },
    Disconnect { topic: String, reason: Reason },
}

#[derive(Default)]
struct LoopbackState {
    listeners: HashMap<ListenerId, (EventKind, EventSink)>,
    calls: Vec<RelayCall>,
    sessions: HashMap<String, Session>,
    failing_calls: HashSet<&'static str>,
    failing_registrations: HashSet<EventKind>,
}

/// Relay transport that never leaves the process
pub struct LoopbackRelay {
    client_id: String,
    state: Mutex<LoopbackState>,
    calls_tx: broadcast::Sender<RelayCall>,
}

impl LoopbackRelay {
    pub fn new() -> Self {
        let (calls_tx, _) = broadcast::channel(256);
        Self {
            client_id: topic_for(&["client", &Uuid::new_v4().to_string()]),
            state: Mutex::new(LoopbackState::default()),
            calls_tx,
        }
    }

    fn state(&self) -> MutexGuard<'_, LoopbackState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Watch calls made by the wallet as they happen
    pub fn subscribe_calls(&self) -> broadcast::Receiver<RelayCall> {
        self.calls_tx.subscribe()
    }

    /// Every call made so far, oldest first
    pub fn calls(&self) -> Vec<RelayCall> {
        self.state().calls.clone()
    }

    /// Number of listeners currently registered for `kind`
    pub fn listener_count(&self, kind: EventKind) -> usize {
        self.state()
            .listeners
            .values()
            .filter(|(registered, _)| *registered == kind)
            .count()
    }

    /// Make the named primitive (`"approve"`, `"reject"`, `"respond"`, `"disconnect"`,
    /// `"pair"`, `"client_id"`) fail from now on
    pub fn fail_call(&self, name: &'static str) {
        self.state().failing_calls.insert(name);
    }

    /// Make listener registration for `kind` fail from now on
    pub fn fail_registration(&self, kind: EventKind) {
        self.state().failing_registrations.insert(kind);
    }

    /// Whether a session with `topic` is live on the relay
    pub fn has_session(&self, topic: &str) -> bool {
        self.state().sessions.contains_key(topic)
    }

    /// Deliver an event to every listener of its kind; returns how many received it
    pub fn emit(&self, event: RelayEvent) -> usize {
        let kind = event.kind();
        let state = self.state();
        state
            .listeners
            .values()
            .filter(|(registered, _)| *registered == kind)
            .filter(|(_, sink)| sink.send(event.clone()).is_ok())
            .count()
    }

    pub fn propose(&self, proposal: Proposal) -> usize {
        self.emit(RelayEvent::Proposal(proposal))
    }

    pub fn request(&self, request: SessionRequest) -> usize {
        self.emit(RelayEvent::Request(request))
    }

    /// Peer-side teardown of a session
    pub fn delete(&self, topic: &str, reason: Reason) -> usize {
        self.state().sessions.remove(topic);
        self.emit(RelayEvent::Delete(SessionDelete {
            topic: topic.to_string(),
            reason,
        }))
    }

    pub fn ping(&self, topic: &str) -> usize {
        self.emit(RelayEvent::SessionPing(Ping {
            topic: topic.to_string(),
        }))
    }

    fn check(&self, name: &'static str) -> Result<()> {
        if self.state().failing_calls.contains(name) {
            return Err(Error::Relay(format!("loopback {} failed", name)));
        }
        Ok(())
    }

    fn record(&self, call: RelayCall) {
        self.state().calls.push(call.clone());
        // No subscribers is fine
        let _ = self.calls_tx.send(call);
    }
}

impl Default for LoopbackRelay {
    fn default() -> Self {
        Self::new()
    }
}

/// Hex blake3 digest over `parts`, the shape of relay topics
fn topic_for(parts: &[&str]) -> String {
    let mut hasher = blake3::Hasher::new();
    for part in parts {
        hasher.update(part.as_bytes());
        hasher.update(b":");
    }
    hasher.finalize().to_hex().to_string()
}

#[async_trait]
impl RelayTransport for LoopbackRelay {
    async fn client_id(&self) -> Result<String> {
        self.check("client_id")?;
        Ok(self.client_id.clone())
    }

    async fn pair(&self, uri: &PairingUri) -> Result<()> {
        self.check("pair")?;
        tracing::debug!(topic = %uri.topic, "Loopback pairing");
        self.record(RelayCall::Pair {
            topic: uri.topic.clone(),
        });
        Ok(())
    }

    async fn approve_session(&self, params: ApproveParams) -> Result<Session> {
        self.check("approve")?;
        let session = Session {
            topic: topic_for(&[
                "session",
                &params.id.to_string(),
                &Uuid::new_v4().to_string(),
            ]),
            relay: RelayProtocol::new(params.relay_protocol.clone()),
            namespaces: params.namespaces.clone(),
        };
        self.state()
            .sessions
            .insert(session.topic.clone(), session.clone());
        self.record(RelayCall::Approve {
            params,
            session: session.clone(),
        });
        Ok(session)
    }

    async fn reject_session(&self, id: ProposalId, reason: Reason) -> Result<()> {
        self.check("reject")?;
        self.record(RelayCall::Reject { id, reason });
        Ok(())
    }

    async fn respond_session_request(&self, topic: &str, response: RpcResponse) -> Result<()> {
        self.check("respond")?;
        self.record(RelayCall::Respond {
            topic: topic.to_string(),
            response,
        });
        Ok(())
    }

    async fn disconnect_session(&self, topic: &str, reason: Reason) -> Result<()> {
        self.check("disconnect")?;
        self.state().sessions.remove(topic);
        self.record(RelayCall::Disconnect {
            topic: topic.to_string(),
            reason,
        });
        Ok(())
    }

    fn on(&self, kind: EventKind, sink: EventSink) -> Result<ListenerId> {
        let mut state = self.state();
        if state.failing_registrations.contains(&kind) {
            return Err(Error::Relay(format!("cannot register {} listener", kind)));
        }
        let id = ListenerId::new();
        state.listeners.insert(id, (kind, sink));
        Ok(id)
    }

    fn off(&self, kind: EventKind, listener: ListenerId) -> Result<()> {
        let mut state = self.state();
        match state.listeners.get(&listener) {
            Some((registered, _)) if *registered == kind => {
                state.listeners.remove(&listener);
            }
            Some((registered, _)) => {
                return Err(Error::Relay(format!(
                    "listener {} is registered for {}, not {}",
                    listener, registered, kind
                )));
            }
            None => {}
        }
        Ok(())
    }
}

/// Connector that hands out one shared [`LoopbackRelay`]
pub struct LoopbackConnector {
    relay: Arc<LoopbackRelay>,
    connects: AtomicUsize,
    failure: Mutex<Option<String>>,
}

impl LoopbackConnector {
    pub fn new(relay: Arc<LoopbackRelay>) -> Self {
        Self {
            relay,
            connects: AtomicUsize::new(0),
            failure: Mutex::new(None),
        }
    }

    /// Make every later `connect` fail with `message`
    pub fn fail_with(&self, message: impl Into<String>) {
        let mut failure = self.failure.lock().unwrap_or_else(|p| p.into_inner());
        *failure = Some(message.into());
    }

    /// Number of successful connects
    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RelayConnector for LoopbackConnector {
    async fn connect(
        &self,
        config: &RelayConfig,
        metadata: &WalletMetadata,
    ) -> Result<Arc<dyn RelayTransport>> {
        let failure = self
            .failure
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .clone();
        if let Some(message) = failure {
            return Err(Error::Relay(message));
        }

        config.validate()?;
        tracing::info!(
            relay_url = %config.relay_url,
            wallet = %metadata.name,
            "Connected loopback relay"
        );
        self.connects.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::clone(&self.relay) as Arc<dyn RelayTransport>)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    #[tokio::test]
    async fn delivers_only_to_matching_kind() {
        let relay = LoopbackRelay::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        relay.on(EventKind::SessionPing, tx).unwrap();

        assert_eq!(relay.ping("topic-a"), 1);
        assert_eq!(relay.delete("topic-a", Reason::user_disconnected()), 0);

        match rx.recv().await {
            Some(RelayEvent::SessionPing(ping)) => assert_eq!(ping.topic, "topic-a"),
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn off_is_idempotent() {
        let relay = LoopbackRelay::new();
        let (tx, _rx) = mpsc::unbounded_channel();
        let id = relay.on(EventKind::SessionRequest, tx).unwrap();
        assert_eq!(relay.listener_count(EventKind::SessionRequest), 1);

        relay.off(EventKind::SessionRequest, id).unwrap();
        relay.off(EventKind::SessionRequest, id).unwrap();
        assert_eq!(relay.listener_count(EventKind::SessionRequest), 0);
    }

    #[test]
    fn injected_registration_failure() {
        let relay = LoopbackRelay::new();
        relay.fail_registration(EventKind::SessionDelete);
        let (tx, _rx) = mpsc::unbounded_channel();
        assert!(relay.on(EventKind::SessionDelete, tx).is_err());
    }

    #[tokio::test]
    async fn approve_records_call_and_session() {
        let relay = LoopbackRelay::new();
        let mut calls = relay.subscribe_calls();
        let session = relay
            .approve_session(ApproveParams {
                id: 1,
                relay_protocol: "irn".to_string(),
                namespaces: Default::default(),
            })
            .await
            .unwrap();

        assert_eq!(session.topic.len(), 64);
        assert!(relay.has_session(&session.topic));
        assert!(matches!(calls.recv().await, Ok(RelayCall::Approve { .. })));
    }

    #[tokio::test]
    async fn connector_failure_is_reported() {
        let connector = LoopbackConnector::new(Arc::new(LoopbackRelay::new()));
        connector.fail_with("relay unreachable");
        let config = RelayConfig {
            project_id: "abc".to_string(),
            relay_url: "wss://relay.example".to_string(),
        };
        let err = connector
            .connect(&config, &WalletMetadata::default())
            .await
            .err()
            .unwrap();
        assert!(err.to_string().contains("relay unreachable"));
        assert_eq!(connector.connects(), 0);
    }
}
