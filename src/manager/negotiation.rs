//! Proposal negotiation
//!
//! `Received -> AwaitingApproval -> Approved | Rejected`. Every failure along the way
//! ends in the same relay rejection; the cause only reaches the logs and the audit
//! trail.
//!
//! A proposal holds the single approval slot from just before `approve_session` until
//! its session is established or the call fails, so two approvals can never both
//! reach the relay. A negotiation that outlives `close()` is abandoned.

use super::{LifecycleEvent, SessionManager};
use crate::approval::{ApprovalDecision, ApprovalOutcome, ApprovalRequest};
use crate::audit::AuditEntry;
use crate::capability::SigningCapability;
use crate::namespaces::{build_approved_namespaces, supported_namespaces, NamespaceError};
use crate::relay::{ApproveParams, RelayTransport};
use crate::types::{DappSessionRecord, Proposal, ProposalId, Reason, Session};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{error, info, warn};

/// Why a proposal was not approved
#[derive(Error, Debug)]
pub enum NegotiationError {
    #[error("session manager is not set up")]
    NotReady,

    #[error("a session is already active on {0}")]
    SessionActive(String),

    #[error("proposal {0} is already being approved")]
    ApprovalInFlight(ProposalId),

    #[error("session manager was closed")]
    Closed,

    #[error("approval surface failed: {0}")]
    Surface(#[source] crate::Error),

    #[error("user rejected the connection")]
    Rejected,

    #[error("approval surface closed without a decision")]
    SurfaceClosed,

    #[error("no decision within {0:?}")]
    TimedOut(Duration),

    #[error(transparent)]
    Namespace(#[from] NamespaceError),

    #[error("proposal offers no relay protocol")]
    MissingRelayProtocol,

    #[error("relay refused approval: {0}")]
    Approve(#[source] crate::Error),
}

impl SessionManager {
    pub(super) async fn on_session_proposal(&self, proposal: Proposal) {
        let (bindings, mut generation) = {
            let mut state = self.inner.state.write().await;
            let bindings = state.bindings();
            if bindings.is_some() {
                state.record_verify_context(proposal.verify_context.clone());
            }
            (bindings, self.inner.generation.subscribe())
        };
        let Some((capability, transport)) = bindings else {
            warn!(proposal_id = proposal.id, error = %NegotiationError::NotReady, "Dropping session proposal");
            return;
        };
        let started = *generation.borrow_and_update();

        info!(
            proposal_id = proposal.id,
            peer = %proposal.proposer.name,
            pairing_topic = %proposal.pairing_topic,
            "Session proposal received"
        );

        match self
            .negotiate(
                &proposal,
                capability.as_ref(),
                transport.as_ref(),
                &mut generation,
            )
            .await
        {
            Ok(session) => {
                self.session_established(&proposal, session, started, transport.as_ref())
                    .await
            }
            Err(cause) => self.reject(&proposal, transport.as_ref(), cause).await,
        }
    }

    async fn negotiate(
        &self,
        proposal: &Proposal,
        capability: &dyn SigningCapability,
        transport: &dyn RelayTransport,
        generation: &mut watch::Receiver<u64>,
    ) -> Result<Session, NegotiationError> {
        let started = *generation.borrow();
        self.ensure_slot_free().await?;

        let mut pending = self
            .inner
            .approvals
            .open(ApprovalRequest::connect(proposal))
            .await
            .map_err(NegotiationError::Surface)?;

        let timeout = self.inner.config.approval.timeout();
        let outcome = tokio::select! {
            outcome = pending.wait(timeout) => Some(outcome),
            _ = generation.changed() => None,
        };
        pending.close();

        match outcome {
            Some(ApprovalOutcome::Decided(ApprovalDecision::Approved)) => {
                info!(proposal_id = proposal.id, "User approved connection");
            }
            Some(ApprovalOutcome::Decided(ApprovalDecision::Rejected)) => {
                return Err(NegotiationError::Rejected)
            }
            Some(ApprovalOutcome::SurfaceClosed) => return Err(NegotiationError::SurfaceClosed),
            Some(ApprovalOutcome::TimedOut) => return Err(NegotiationError::TimedOut(timeout)),
            None => return Err(NegotiationError::Closed),
        }

        let namespaces = build_approved_namespaces(proposal, &supported_namespaces(capability))?;
        let relay_protocol = proposal
            .relays
            .first()
            .map(|relay| relay.protocol.clone())
            .ok_or(NegotiationError::MissingRelayProtocol)?;

        self.reserve(proposal.id, started).await?;

        match transport
            .approve_session(ApproveParams {
                id: proposal.id,
                relay_protocol,
                namespaces,
            })
            .await
        {
            Ok(session) => Ok(session),
            Err(e) => {
                self.inner.state.write().await.release(proposal.id);
                Err(NegotiationError::Approve(e))
            }
        }
    }

    /// Fail early when the proposal could not be approved anyway
    async fn ensure_slot_free(&self) -> Result<(), NegotiationError> {
        let state = self.inner.state.read().await;
        if let Some(topic) = state.session_topic() {
            return Err(NegotiationError::SessionActive(topic.to_string()));
        }
        match state.negotiating() {
            Some(other) => Err(NegotiationError::ApprovalInFlight(other)),
            None => Ok(()),
        }
    }

    /// Take the approval slot, unless the manager was closed since `started`
    async fn reserve(&self, proposal_id: ProposalId, started: u64) -> Result<(), NegotiationError> {
        let mut state = self.inner.state.write().await;
        if *self.inner.generation.borrow() != started {
            return Err(NegotiationError::Closed);
        }
        if let Some(topic) = state.session_topic() {
            return Err(NegotiationError::SessionActive(topic.to_string()));
        }
        if let Some(other) = state.negotiating() {
            return Err(NegotiationError::ApprovalInFlight(other));
        }
        state.reserve(proposal_id);
        Ok(())
    }

    async fn session_established(
        &self,
        proposal: &Proposal,
        session: Session,
        started: u64,
        transport: &dyn RelayTransport,
    ) {
        let current = {
            let mut state = self.inner.state.write().await;
            let current = *self.inner.generation.borrow() == started;
            if current {
                state.establish(
                    proposal.pairing_topic.clone(),
                    session.topic.clone(),
                    proposal.verify_context.clone(),
                );
            } else {
                state.release(proposal.id);
            }
            current
        };

        if !current {
            self.abandon(proposal, &session, transport).await;
            return;
        }

        let record = DappSessionRecord::from(&proposal.proposer);
        if let Err(e) = self.inner.store.put(&session.topic, &record).await {
            warn!(topic = %session.topic, error = %e, "Failed to store dapp session record");
        }

        info!(
            proposal_id = proposal.id,
            topic = %session.topic,
            peer = %proposal.proposer.name,
            "Session established"
        );
        self.audit(
            AuditEntry::new("proposal_approved", "success")
                .proposal(proposal.id)
                .topic(session.topic.clone())
                .peer(proposal.proposer.name.clone()),
        )
        .await;

        self.broadcast(LifecycleEvent::Connected { session });
    }

    /// The relay approved a session after `close()`; take it down again
    async fn abandon(&self, proposal: &Proposal, session: &Session, transport: &dyn RelayTransport) {
        warn!(
            proposal_id = proposal.id,
            topic = %session.topic,
            "Session manager closed during approval, disconnecting session"
        );
        let status = match transport
            .disconnect_session(&session.topic, Reason::user_disconnected())
            .await
        {
            Ok(()) => "disconnected",
            Err(e) => {
                error!(topic = %session.topic, error = %e, "Failed to disconnect abandoned session");
                "error"
            }
        };

        self.audit(
            AuditEntry::new("proposal_abandoned", status)
                .proposal(proposal.id)
                .topic(session.topic.clone())
                .peer(proposal.proposer.name.clone()),
        )
        .await;
    }

    async fn reject(
        &self,
        proposal: &Proposal,
        transport: &dyn RelayTransport,
        cause: NegotiationError,
    ) {
        match &cause {
            NegotiationError::Rejected => {
                info!(proposal_id = proposal.id, "User rejected connection")
            }
            _ => warn!(proposal_id = proposal.id, reason = %cause, "Rejecting session proposal"),
        }

        let status = match transport
            .reject_session(proposal.id, Reason::user_rejected())
            .await
        {
            Ok(()) => "rejected",
            Err(e) => {
                error!(proposal_id = proposal.id, error = %e, "Failed to reject session proposal");
                "error"
            }
        };

        self.audit(
            AuditEntry::new("proposal_rejected", status)
                .proposal(proposal.id)
                .peer(proposal.proposer.name.clone())
                .detail(cause.to_string()),
        )
        .await;
    }
}
