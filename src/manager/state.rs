//! Manager-owned session state
//!
//! Only five transitions write here: `bind` (setup), `reserve` / `release` (an
//! approval call in flight), `establish` (approval completion),
//! `record_verify_context` (inbound proposal/request) and `end_session` /
//! `end_session_if` (teardown and peer delete).
//!
//! At most one proposal holds the approval slot, and never while a session is
//! established.

use crate::capability::SigningCapability;
use crate::relay::RelayTransport;
use crate::types::{ProposalId, VerifyContext};
use std::fmt;
use std::sync::Arc;

#[derive(Default)]
pub struct SessionState {
    capability: Option<Arc<dyn SigningCapability>>,
    transport: Option<Arc<dyn RelayTransport>>,
    pairing_topic: Option<String>,
    session_topic: Option<String>,
    negotiating: Option<ProposalId>,
    verify_context: Option<VerifyContext>,
    client_id: Option<String>,
}

/// Topics of a session that was just torn down
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndedSession {
    pub pairing_topic: Option<String>,
    pub session_topic: String,
}

impl SessionState {
    pub fn bind(
        &mut self,
        capability: Arc<dyn SigningCapability>,
        transport: Arc<dyn RelayTransport>,
        client_id: Option<String>,
    ) {
        self.capability = Some(capability);
        self.transport = Some(transport);
        self.client_id = client_id;
    }

    /// Capability and transport, if setup has completed
    pub fn bindings(&self) -> Option<(Arc<dyn SigningCapability>, Arc<dyn RelayTransport>)> {
        match (&self.capability, &self.transport) {
            (Some(capability), Some(transport)) => {
                Some((Arc::clone(capability), Arc::clone(transport)))
            }
            _ => None,
        }
    }

    pub fn transport(&self) -> Option<Arc<dyn RelayTransport>> {
        self.transport.clone()
    }

    /// Claim the approval slot for `proposal_id`; `false` if a session exists or
    /// another proposal holds the slot
    pub fn reserve(&mut self, proposal_id: ProposalId) -> bool {
        if self.session_topic.is_some() || self.negotiating.is_some() {
            return false;
        }
        self.negotiating = Some(proposal_id);
        true
    }

    /// Give the slot back if `proposal_id` holds it
    pub fn release(&mut self, proposal_id: ProposalId) {
        if self.negotiating == Some(proposal_id) {
            self.negotiating = None;
        }
    }

    /// Proposal whose approval call is in flight
    pub fn negotiating(&self) -> Option<ProposalId> {
        self.negotiating
    }

    pub fn establish(
        &mut self,
        pairing_topic: String,
        session_topic: String,
        verify_context: VerifyContext,
    ) {
        self.negotiating = None;
        self.verify_context = Some(verify_context);
        self.pairing_topic = Some(pairing_topic);
        self.session_topic = Some(session_topic);
    }

    pub fn record_verify_context(&mut self, verify_context: VerifyContext) {
        self.verify_context = Some(verify_context);
    }

    /// Clear both topics, returning them if a session was active
    pub fn end_session(&mut self) -> Option<EndedSession> {
        let pairing_topic = self.pairing_topic.take();
        self.session_topic.take().map(|session_topic| EndedSession {
            pairing_topic,
            session_topic,
        })
    }

    /// Like [`end_session`](Self::end_session), but only for the session on `topic`
    pub fn end_session_if(&mut self, topic: &str) -> Option<EndedSession> {
        if self.session_topic.as_deref() == Some(topic) {
            self.end_session()
        } else {
            None
        }
    }

    pub fn has_session(&self) -> bool {
        self.session_topic.is_some()
    }

    pub fn session_topic(&self) -> Option<&str> {
        self.session_topic.as_deref()
    }

    pub fn pairing_topic(&self) -> Option<&str> {
        self.pairing_topic.as_deref()
    }

    pub fn verify_context(&self) -> Option<&VerifyContext> {
        self.verify_context.as_ref()
    }

    pub fn client_id(&self) -> Option<&str> {
        self.client_id.as_deref()
    }
}

impl fmt::Debug for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionState")
            .field("bound", &self.bindings().is_some())
            .field("pairing_topic", &self.pairing_topic)
            .field("session_topic", &self.session_topic)
            .field("negotiating", &self.negotiating)
            .field("verify_context", &self.verify_context)
            .field("client_id", &self.client_id)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn establish_then_end() {
        let mut state = SessionState::default();
        assert!(!state.has_session());

        state.establish(
            "pairing".to_string(),
            "session".to_string(),
            VerifyContext::default(),
        );
        assert_eq!(state.pairing_topic(), Some("pairing"));
        assert_eq!(state.session_topic(), Some("session"));

        let ended = state.end_session().unwrap();
        assert_eq!(ended.session_topic, "session");
        assert_eq!(ended.pairing_topic.as_deref(), Some("pairing"));
        assert!(state.pairing_topic().is_none());
        assert!(state.end_session().is_none());
    }

    #[test]
    fn end_session_if_ignores_other_topics() {
        let mut state = SessionState::default();
        state.establish(
            "pairing".to_string(),
            "session".to_string(),
            VerifyContext::default(),
        );

        assert!(state.end_session_if("stale").is_none());
        assert!(state.has_session());
        assert!(state.end_session_if("session").is_some());
        assert!(!state.has_session());
    }

    #[test]
    fn approval_slot_is_exclusive() {
        let mut state = SessionState::default();
        assert!(state.reserve(1));
        assert!(!state.reserve(2));
        assert_eq!(state.negotiating(), Some(1));

        state.release(2);
        assert_eq!(state.negotiating(), Some(1));
        state.release(1);
        assert!(state.reserve(2));

        state.establish(
            "pairing".to_string(),
            "session".to_string(),
            VerifyContext::default(),
        );
        assert!(state.negotiating().is_none());
        assert!(!state.reserve(3));
    }

    #[test]
    fn unbound_state_has_no_bindings() {
        let state = SessionState::default();
        assert!(state.bindings().is_none());
        assert!(state.transport().is_none());
        assert!(format!("{:?}", state).contains("bound: false"));
    }
}
