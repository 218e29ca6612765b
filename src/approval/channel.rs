//! Approval surface backed by a message channel
//!
//! Each opened request is forwarded as an [`ApprovalPrompt`] to whatever task owns
//! the receiving end (a UI process bridge, a scripted peer in tests, ...).

use super::{ApprovalRequest, ApprovalResponder, ApprovalSurface, PendingApproval};
use crate::{Error, Result};
use async_trait::async_trait;
use tokio::sync::mpsc;

/// A connection request plus the means to answer it
#[derive(Debug)]
pub struct ApprovalPrompt {
    pub request: ApprovalRequest,
    pub responder: ApprovalResponder,
}

/// Forwards approval requests over an unbounded channel
#[derive(Clone)]
pub struct ChannelApprovalSurface {
    tx: mpsc::UnboundedSender<ApprovalPrompt>,
}

impl ChannelApprovalSurface {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ApprovalPrompt>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

#[async_trait]
impl ApprovalSurface for ChannelApprovalSurface {
    async fn open(&self, request: ApprovalRequest) -> Result<PendingApproval> {
        let (pending, responder) = PendingApproval::channel(request.proposal_id);
        tracing::debug!(proposal_id = request.proposal_id, "Opening approval prompt");

        self.tx
            .send(ApprovalPrompt { request, responder })
            .map_err(|_| Error::Approval("approval surface is not running".to_string()))?;

        Ok(pending)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::approval::{ApprovalDecision, ApprovalKind, ApprovalOutcome};
    use std::time::Duration;

    fn request() -> ApprovalRequest {
        ApprovalRequest {
            proposal_id: 3,
            kind: ApprovalKind::Connect,
            question: "Do you want to connect to TestDapp?".to_string(),
            approve_response: String::new(),
            reject_response: String::new(),
            peer_name: "TestDapp".to_string(),
            description: String::new(),
            dapp_url: String::new(),
            dapp_image: None,
        }
    }

    #[tokio::test]
    async fn forwards_prompt_and_decision() {
        let (surface, mut prompts) = ChannelApprovalSurface::new();
        let mut pending = surface.open(request()).await.unwrap();

        let mut prompt = prompts.recv().await.expect("prompt");
        assert_eq!(prompt.request.peer_name, "TestDapp");
        assert_eq!(prompt.responder.proposal_id(), 3);
        assert!(prompt.responder.reject());

        assert_eq!(
            pending.wait(Duration::from_secs(1)).await,
            ApprovalOutcome::Decided(ApprovalDecision::Rejected)
        );
    }

    #[tokio::test]
    async fn open_fails_without_receiver() {
        let (surface, prompts) = ChannelApprovalSurface::new();
        drop(prompts);
        let err = surface.open(request()).await.unwrap_err();
        assert!(matches!(err, Error::Approval(_)));
    }
}
