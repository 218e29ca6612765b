//! Relay listener bookkeeping
//!
//! Registrations are drained when they are removed, so tearing down twice removes
//! nothing the second time.

use crate::relay::{EventKind, EventSink, ListenerId, RelayTransport};
use crate::{Error, Result};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

type Registration = (EventKind, ListenerId);

/// Listeners currently registered with the relay and the task draining them
#[derive(Default)]
pub(crate) struct Listeners {
    transport: Option<Arc<dyn RelayTransport>>,
    registered: Vec<Registration>,
    dispatcher: Option<JoinHandle<()>>,
}

impl Listeners {
    pub fn is_active(&self) -> bool {
        !self.registered.is_empty()
    }

    pub fn activate(
        &mut self,
        transport: Arc<dyn RelayTransport>,
        registered: Vec<Registration>,
        dispatcher: JoinHandle<()>,
    ) {
        self.transport = Some(transport);
        self.registered = registered;
        self.dispatcher = Some(dispatcher);
    }

    /// Remove every listener and stop the dispatcher; returns how many were removed
    pub fn deactivate(&mut self) -> usize {
        let registered = std::mem::take(&mut self.registered);
        let removed = registered.len();
        if let Some(transport) = self.transport.take() {
            unregister_all(transport.as_ref(), registered);
        }
        if let Some(dispatcher) = self.dispatcher.take() {
            dispatcher.abort();
        }
        removed
    }
}

/// Register `sink` for every event kind, or for none of them
pub(crate) fn register_all(
    transport: &dyn RelayTransport,
    sink: &EventSink,
) -> Result<Vec<Registration>> {
    let mut registered = Vec::with_capacity(EventKind::ALL.len());
    for kind in EventKind::ALL {
        match transport.on(kind, sink.clone()) {
            Ok(id) => {
                debug!(event = %kind, listener = %id, "Registered relay listener");
                registered.push((kind, id));
            }
            Err(e) => {
                unregister_all(transport, registered);
                return Err(Error::Initialization(format!(
                    "failed to register {} listener: {}",
                    kind, e
                )));
            }
        }
    }
    Ok(registered)
}

/// Best effort: failures are logged and the rest are still removed
pub(crate) fn unregister_all(transport: &dyn RelayTransport, registered: Vec<Registration>) {
    for (kind, id) in registered {
        if let Err(e) = transport.off(kind, id) {
            warn!(event = %kind, listener = %id, error = %e, "Failed to unregister relay listener");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::relay::LoopbackRelay;
    use tokio::sync::mpsc;

    #[test]
    fn registers_every_kind() {
        let relay = LoopbackRelay::new();
        let (tx, _rx) = mpsc::unbounded_channel();

        let registered = register_all(&relay, &tx).unwrap();
        assert_eq!(registered.len(), EventKind::ALL.len());
        for kind in EventKind::ALL {
            assert_eq!(relay.listener_count(kind), 1);
        }
    }

    #[test]
    fn failed_registration_rolls_back() {
        let relay = LoopbackRelay::new();
        relay.fail_registration(EventKind::SessionPing);
        let (tx, _rx) = mpsc::unbounded_channel();

        let err = register_all(&relay, &tx).unwrap_err();
        assert!(err.to_string().contains("session_ping"));
        for kind in EventKind::ALL {
            assert_eq!(relay.listener_count(kind), 0);
        }
    }

    #[tokio::test]
    async fn deactivate_twice_removes_once() {
        let relay = Arc::new(LoopbackRelay::new());
        let (tx, _rx) = mpsc::unbounded_channel();
        let registered = register_all(relay.as_ref(), &tx).unwrap();

        let mut listeners = Listeners::default();
        listeners.activate(
            relay.clone() as Arc<dyn RelayTransport>,
            registered,
            tokio::spawn(async {}),
        );
        assert!(listeners.is_active());

        assert_eq!(listeners.deactivate(), EventKind::ALL.len());
        assert_eq!(listeners.deactivate(), 0);
        assert!(!listeners.is_active());
        assert_eq!(relay.listener_count(EventKind::SessionProposal), 0);
    }
}
