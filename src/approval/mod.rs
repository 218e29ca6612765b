//! Approval surface
//!
//! The approval surface is an independently running UI that shows one connection
//! request and answers with a single decision. Each proposal gets its own one-shot
//! decision channel:
//! - the first decision wins, later ones are no-ops
//! - a surface that goes away without deciding resolves to [`ApprovalOutcome::SurfaceClosed`]
//! - the manager bounds the wait with a timeout

mod channel;
mod terminal;

pub use channel::{ApprovalPrompt, ChannelApprovalSurface};
pub use terminal::TerminalApprovalSurface;

use crate::types::{Proposal, ProposalId};
use crate::Result;
use async_trait::async_trait;
use serde::Serialize;
use std::time::Duration;
use tokio::sync::oneshot;

/// What the surface is asked to approve
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ApprovalKind {
    Connect,
}

/// Human-readable connection request shown to the user
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ApprovalRequest {
    pub proposal_id: ProposalId,
    pub kind: ApprovalKind,
    pub question: String,
    pub approve_response: String,
    pub reject_response: String,
    pub peer_name: String,
    pub description: String,
    pub dapp_url: String,
    pub dapp_image: Option<String>,
}

impl ApprovalRequest {
    pub fn connect(proposal: &Proposal) -> Self {
        let metadata = &proposal.proposer;
        Self {
            proposal_id: proposal.id,
            kind: ApprovalKind::Connect,
            question: format!("Do you want to connect to {}?", metadata.name),
            approve_response: "User approved wallet connect".to_string(),
            reject_response: "User rejected wallet connect".to_string(),
            peer_name: metadata.name.clone(),
            description: metadata.description.clone(),
            dapp_url: metadata.url.clone(),
            dapp_image: metadata.icon().map(str::to_string),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ApprovalDecision {
    Approved,
    Rejected,
}

/// How waiting on a pending approval ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApprovalOutcome {
    Decided(ApprovalDecision),
    SurfaceClosed,
    TimedOut,
}

/// Manager-side end of one proposal's decision channel
#[derive(Debug)]
pub struct PendingApproval {
    proposal_id: ProposalId,
    decision: oneshot::Receiver<ApprovalDecision>,
    close: Option<oneshot::Sender<()>>,
}

impl PendingApproval {
    /// Create the two ends of a decision channel for `proposal_id`
    pub fn channel(proposal_id: ProposalId) -> (PendingApproval, ApprovalResponder) {
        let (decision_tx, decision_rx) = oneshot::channel();
        let (close_tx, close_rx) = oneshot::channel();
        (
            PendingApproval {
                proposal_id,
                decision: decision_rx,
                close: Some(close_tx),
            },
            ApprovalResponder {
                proposal_id,
                decision: Some(decision_tx),
                closed: close_rx,
            },
        )
    }

    pub fn proposal_id(&self) -> ProposalId {
        self.proposal_id
    }

    /// Wait for the single decision, at most `timeout`
    pub async fn wait(&mut self, timeout: Duration) -> ApprovalOutcome {
        match tokio::time::timeout(timeout, &mut self.decision).await {
            Ok(Ok(decision)) => ApprovalOutcome::Decided(decision),
            Ok(Err(_)) => ApprovalOutcome::SurfaceClosed,
            Err(_) => ApprovalOutcome::TimedOut,
        }
    }

    /// Tell the surface to close its window
    pub fn close(&mut self) {
        if let Some(close) = self.close.take() {
            // The surface may already be gone
            let _ = close.send(());
        }
    }
}

impl Drop for PendingApproval {
    fn drop(&mut self) {
        self.close();
    }
}

/// Surface-side end of one proposal's decision channel
#[derive(Debug)]
pub struct ApprovalResponder {
    proposal_id: ProposalId,
    decision: Option<oneshot::Sender<ApprovalDecision>>,
    closed: oneshot::Receiver<()>,
}

impl ApprovalResponder {
    pub fn proposal_id(&self) -> ProposalId {
        self.proposal_id
    }

    /// Returns `false` if a decision was already made or nobody is waiting
    pub fn approve(&mut self) -> bool {
        self.decide(ApprovalDecision::Approved)
    }

    /// Returns `false` if a decision was already made or nobody is waiting
    pub fn reject(&mut self) -> bool {
        self.decide(ApprovalDecision::Rejected)
    }

    pub fn decide(&mut self, decision: ApprovalDecision) -> bool {
        match self.decision.take() {
            Some(tx) => tx.send(decision).is_ok(),
            None => false,
        }
    }

    pub fn is_decided(&self) -> bool {
        self.decision.is_none()
    }

    /// Resolves once the manager has closed this request
    pub async fn closed(&mut self) {
        let _ = (&mut self.closed).await;
    }
}

/// An interactive surface able to ask the user about a connection request
#[async_trait]
pub trait ApprovalSurface: Send + Sync {
    /// Show `request`; the returned handle yields the user's decision
    async fn open(&self, request: ApprovalRequest) -> Result<PendingApproval>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::PeerMetadata;

    fn proposal() -> Proposal {
        Proposal {
            id: 42,
            proposer: PeerMetadata {
                name: "TestDapp".to_string(),
                description: "A test dapp".to_string(),
                url: "https://dapp.test".to_string(),
                icons: vec!["https://dapp.test/icon.png".to_string()],
            },
            relays: Vec::new(),
            required_namespaces: Default::default(),
            optional_namespaces: Default::default(),
            pairing_topic: "pairing".to_string(),
            verify_context: Default::default(),
        }
    }

    #[test]
    fn connect_request_describes_peer() {
        let request = ApprovalRequest::connect(&proposal());
        assert_eq!(request.proposal_id, 42);
        assert_eq!(request.kind, ApprovalKind::Connect);
        assert_eq!(request.question, "Do you want to connect to TestDapp?");
        assert_eq!(request.dapp_url, "https://dapp.test");
        assert_eq!(request.dapp_image.as_deref(), Some("https://dapp.test/icon.png"));
    }

    #[tokio::test]
    async fn first_decision_wins() {
        let (mut pending, mut responder) = PendingApproval::channel(1);
        assert!(responder.approve());
        assert!(!responder.reject());
        assert!(responder.is_decided());
        assert_eq!(
            pending.wait(Duration::from_secs(1)).await,
            ApprovalOutcome::Decided(ApprovalDecision::Approved)
        );
    }

    #[tokio::test]
    async fn dropped_responder_closes_surface() {
        let (mut pending, responder) = PendingApproval::channel(1);
        drop(responder);
        assert_eq!(
            pending.wait(Duration::from_secs(1)).await,
            ApprovalOutcome::SurfaceClosed
        );
    }

    #[tokio::test]
    async fn wait_times_out() {
        let (mut pending, _responder) = PendingApproval::channel(1);
        assert_eq!(
            pending.wait(Duration::from_millis(20)).await,
            ApprovalOutcome::TimedOut
        );
    }

    #[tokio::test]
    async fn responder_sees_close() {
        let (mut pending, mut responder) = PendingApproval::channel(7);
        pending.close();
        tokio::time::timeout(Duration::from_secs(1), responder.closed())
            .await
            .expect("close signal");

        drop(pending);
        assert!(!responder.approve());
    }
}
