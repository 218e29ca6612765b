//! Request routing
//!
//! Each session request gets exactly one response on its topic. The capability is
//! only called for its own chain.

use super::SessionManager;
use crate::audit::AuditEntry;
use crate::capability::SigningCapability;
use crate::types::{RpcResponse, SessionRequest};
use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use tracing::{debug, error, info, warn};

impl SessionManager {
    pub(super) async fn on_session_request(&self, request: SessionRequest) {
        let bindings = {
            let mut state = self.inner.state.write().await;
            let bindings = state.bindings();
            if bindings.is_some() {
                state.record_verify_context(request.verify_context.clone());
            }
            bindings
        };
        let Some((capability, transport)) = bindings else {
            warn!(request_id = request.id, topic = %request.topic, "Dropping session request, manager is not set up");
            return;
        };

        let response = execute(capability.as_ref(), &request)
            .await
            .with_id(request.id);
        let status = if response.is_error() { "error" } else { "success" };
        let detail = response.error_message().map(str::to_string);

        if let Err(e) = transport
            .respond_session_request(&request.topic, response)
            .await
        {
            error!(request_id = request.id, topic = %request.topic, error = %e, "Failed to respond to session request");
        }

        let mut entry = AuditEntry::new("request_responded", status)
            .topic(request.topic.clone())
            .request(request.id)
            .method(request.request.method.clone());
        if let Some(detail) = detail {
            entry = entry.detail(detail);
        }
        self.audit(entry).await;
    }
}

/// Produce the response for `request`, never panicking
async fn execute(capability: &dyn SigningCapability, request: &SessionRequest) -> RpcResponse {
    let chain_id = capability.chain_id();
    if request.chain_id != chain_id {
        info!(
            request_id = request.id,
            chain_id = %request.chain_id,
            supported = %chain_id,
            "Refusing request for unsupported chain"
        );
        return RpcResponse::error(request.id, format!("chain unsupported: {}", request.chain_id));
    }

    debug!(request_id = request.id, method = %request.request.method, "Executing session request");
    match AssertUnwindSafe(capability.execute(request))
        .catch_unwind()
        .await
    {
        Ok(response) => response,
        Err(panic) => {
            let message = panic_message(panic.as_ref());
            error!(request_id = request.id, method = %request.request.method, panic = %message, "Signing capability panicked");
            RpcResponse::error(request.id, format!("signing capability failed: {}", message))
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
