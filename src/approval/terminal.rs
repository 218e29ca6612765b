//! Approval surface on the controlling terminal
//!
//! Stdin is read on a detached thread. A blocking read cannot be interrupted, so when
//! the manager closes the prompt (timeout, teardown) the thread is left waiting for a
//! line and its answer is discarded; it never holds up runtime shutdown.

use super::{ApprovalRequest, ApprovalSurface, PendingApproval};
use crate::Result;
use async_trait::async_trait;
use std::io::{BufRead, Write};
use tokio::sync::oneshot;

/// Shows the prompt and blocks for an answer; `None` when there is none
type AnswerReader = fn(&str) -> Option<bool>;

/// Asks `y/N` on stdin for each connection request
#[derive(Debug, Clone, Copy)]
pub struct TerminalApprovalSurface {
    read: AnswerReader,
}

impl TerminalApprovalSurface {
    pub fn new() -> Self {
        Self { read: read_answer }
    }

    #[cfg(test)]
    fn with_reader(read: AnswerReader) -> Self {
        Self { read }
    }
}

impl Default for TerminalApprovalSurface {
    fn default() -> Self {
        Self::new()
    }
}

fn render(request: &ApprovalRequest) -> String {
    let mut text = format!("\n{}\n", request.question);
    if !request.description.is_empty() {
        text.push_str(&format!("  {}\n", request.description));
    }
    if !request.dapp_url.is_empty() {
        text.push_str(&format!("  url: {}\n", request.dapp_url));
    }
    text.push_str("Approve? [y/N] ");
    text
}

/// `None` when stdin is closed or unreadable
fn read_answer(prompt: &str) -> Option<bool> {
    let mut stdout = std::io::stdout();
    stdout.write_all(prompt.as_bytes()).ok()?;
    stdout.flush().ok()?;

    let mut line = String::new();
    let read = std::io::stdin().lock().read_line(&mut line).ok()?;
    if read == 0 {
        return None;
    }
    Some(parse_answer(&line))
}

/// Anything but `y`/`yes` is a rejection
fn parse_answer(line: &str) -> bool {
    matches!(line.trim().to_ascii_lowercase().as_str(), "y" | "yes")
}

#[async_trait]
impl ApprovalSurface for TerminalApprovalSurface {
    async fn open(&self, request: ApprovalRequest) -> Result<PendingApproval> {
        let (pending, mut responder) = PendingApproval::channel(request.proposal_id);
        let prompt = render(&request);
        let read = self.read;

        let (answer_tx, answer_rx) = oneshot::channel();
        std::thread::spawn(move || {
            // The prompt may be gone by now
            let _ = answer_tx.send(read(&prompt));
        });

        tokio::spawn(async move {
            let answer = tokio::select! {
                _ = responder.closed() => None,
                answer = answer_rx => answer.ok().flatten(),
            };

            match answer {
                Some(true) => {
                    responder.approve();
                }
                Some(false) => {
                    responder.reject();
                }
                None => {
                    tracing::debug!(
                        proposal_id = responder.proposal_id(),
                        "Terminal prompt closed without an answer"
                    );
                }
            }
        });

        Ok(pending)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::approval::{ApprovalDecision, ApprovalKind, ApprovalOutcome};
    use std::time::{Duration, Instant};

    #[test]
    fn only_yes_approves() {
        assert!(parse_answer("y\n"));
        assert!(parse_answer(" YES "));
        assert!(!parse_answer("\n"));
        assert!(!parse_answer("nope"));
    }

    fn request() -> ApprovalRequest {
        ApprovalRequest {
            proposal_id: 1,
            kind: ApprovalKind::Connect,
            question: "Do you want to connect to TestDapp?".to_string(),
            approve_response: String::new(),
            reject_response: String::new(),
            peer_name: "TestDapp".to_string(),
            description: String::new(),
            dapp_url: "https://dapp.test".to_string(),
            dapp_image: None,
        }
    }

    #[tokio::test]
    async fn answer_becomes_decision() {
        let surface = TerminalApprovalSurface::with_reader(|_| Some(true));
        let mut pending = surface.open(request()).await.unwrap();
        assert_eq!(
            pending.wait(Duration::from_secs(2)).await,
            ApprovalOutcome::Decided(ApprovalDecision::Approved)
        );
    }

    #[test]
    fn unanswered_prompt_does_not_block_shutdown() {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()
            .unwrap();
        let surface = TerminalApprovalSurface::with_reader(|_| {
            std::thread::sleep(Duration::from_secs(30));
            Some(true)
        });

        runtime.block_on(async {
            let mut pending = surface.open(request()).await.unwrap();
            assert_eq!(
                pending.wait(Duration::from_millis(20)).await,
                ApprovalOutcome::TimedOut
            );
        });

        let started = Instant::now();
        drop(runtime);
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn render_includes_question_and_url() {
        let text = render(&request());
        assert!(text.contains("Do you want to connect to TestDapp?"));
        assert!(text.contains("url: https://dapp.test"));
        assert!(text.ends_with("[y/N] "));
    }
}
