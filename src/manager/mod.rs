//! Session manager
//!
//! Owns the lifecycle of at most one peer session: listener registration with the
//! relay, proposal negotiation through the approval surface, request routing to the
//! signing capability and teardown.
//!
//! [`SessionManager`] is a cheap handle; clones share the same state. Inbound relay
//! events are drained by a dispatcher task that runs each event on its own task, so a
//! request can be answered while a proposal is still waiting on the user.

mod listeners;
mod negotiation;
mod routing;
mod state;


pub use negotiation::NegotiationError;
pub use state::{EndedSession, SessionState};

use crate::approval::ApprovalSurface;
use crate::audit::{AuditEntry, SessionAuditLog};
use crate::capability::CapabilityProvider;
use crate::config::Config;
use crate::relay::{PairingUri, RelayConnector, RelayEvent};
use crate::store::{MemorySessionStore, SessionStore};
use crate::types::{Reason, Session, SessionDelete, VerifyContext};
use crate::{Error, Result};
use chrono::Utc;
use listeners::{register_all, Listeners};
use std::sync::{Arc, Weak};
use tokio::sync::{broadcast, mpsc, watch, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Session lifecycle notifications for the rest of the application
#[derive(Debug, Clone, PartialEq)]
pub enum LifecycleEvent {
    Connected {
        session: Session,
    },
    Disconnected {
        topic: Option<String>,
        reason: String,
    },
}

struct Inner {
    config: Config,
    connector: Arc<dyn RelayConnector>,
    capabilities: Arc<dyn CapabilityProvider>,
    approvals: Arc<dyn ApprovalSurface>,
    store: Arc<dyn SessionStore>,
    audit: Option<SessionAuditLog>,
    lifecycle: broadcast::Sender<LifecycleEvent>,
    /// Bumped by `close()` while holding the state lock; negotiations started under an
    /// older value are abandoned
    generation: watch::Sender<u64>,
    state: RwLock<SessionState>,
    listeners: Mutex<Listeners>,
}

/// Handle to the wallet's session manager
#[derive(Clone)]
pub struct SessionManager {
    inner: Arc<Inner>,
}

/// Collects the manager's collaborators
pub struct SessionManagerBuilder {
    config: Config,
    connector: Option<Arc<dyn RelayConnector>>,
    capabilities: Option<Arc<dyn CapabilityProvider>>,
    approvals: Option<Arc<dyn ApprovalSurface>>,
    store: Option<Arc<dyn SessionStore>>,
    audit: Option<SessionAuditLog>,
}

impl SessionManagerBuilder {
    pub fn relay(mut self, connector: Arc<dyn RelayConnector>) -> Self {
        self.connector = Some(connector);
        self
    }

    pub fn capabilities(mut self, provider: Arc<dyn CapabilityProvider>) -> Self {
        self.capabilities = Some(provider);
        self
    }

    pub fn approvals(mut self, surface: Arc<dyn ApprovalSurface>) -> Self {
        self.approvals = Some(surface);
        self
    }

    /// Defaults to an in-memory store
    pub fn store(mut self, store: Arc<dyn SessionStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn audit_log(mut self, audit: SessionAuditLog) -> Self {
        self.audit = Some(audit);
        self
    }

    pub fn build(self) -> Result<SessionManager> {
        let connector = self
            .connector
            .ok_or_else(|| Error::Config("session manager needs a relay connector".to_string()))?;
        let capabilities = self.capabilities.ok_or_else(|| {
            Error::Config("session manager needs a signing capability provider".to_string())
        })?;
        let approvals = self
            .approvals
            .ok_or_else(|| Error::Config("session manager needs an approval surface".to_string()))?;
        let store = self
            .store
            .unwrap_or_else(|| Arc::new(MemorySessionStore::new()));

        let (lifecycle, _) = broadcast::channel(64);
        let (generation, _) = watch::channel(0);

        Ok(SessionManager {
            inner: Arc::new(Inner {
                config: self.config,
                connector,
                capabilities,
                approvals,
                store,
                audit: self.audit,
                lifecycle,
                generation,
                state: RwLock::new(SessionState::default()),
                listeners: Mutex::new(Listeners::default()),
            }),
        })
    }
}

impl SessionManager {
    pub fn builder(config: Config) -> SessionManagerBuilder {
        SessionManagerBuilder {
            config,
            connector: None,
            capabilities: None,
            approvals: None,
            store: None,
            audit: None,
        }
    }

    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    /// Receive lifecycle events from now on
    pub fn subscribe(&self) -> broadcast::Receiver<LifecycleEvent> {
        self.inner.lifecycle.subscribe()
    }

    pub async fn session_topic(&self) -> Option<String> {
        self.inner.state.read().await.session_topic().map(str::to_string)
    }

    pub async fn pairing_topic(&self) -> Option<String> {
        self.inner.state.read().await.pairing_topic().map(str::to_string)
    }

    /// Trust metadata of the most recent proposal or request
    pub async fn verify_context(&self) -> Option<VerifyContext> {
        self.inner.state.read().await.verify_context().cloned()
    }

    /// Relay client id derived at setup, if it could be read
    pub async fn client_id(&self) -> Option<String> {
        self.inner.state.read().await.client_id().map(str::to_string)
    }

    pub async fn has_session(&self) -> bool {
        self.inner.state.read().await.has_session()
    }

    /// Bind the signing capability, connect the relay and start listening
    ///
    /// Calling it again while listeners are registered does nothing. On failure no
    /// listener is left registered.
    pub async fn setup(&self) -> Result<()> {
        let mut listeners = self.inner.listeners.lock().await;
        if listeners.is_active() {
            debug!("Session manager already set up");
            return Ok(());
        }

        let capability = self
            .inner
            .capabilities
            .bind()
            .await
            .map_err(|e| Error::Initialization(format!("signing capability unavailable: {}", e)))?;

        let transport = self
            .inner
            .connector
            .connect(&self.inner.config.relay, &self.inner.config.wallet)
            .await
            .map_err(|e| Error::Initialization(format!("relay transport unavailable: {}", e)))?;

        let client_id = match transport.client_id().await {
            Ok(id) => {
                info!(client_id = %id, "Relay client ready");
                Some(id)
            }
            Err(e) => {
                warn!(error = %e, "Could not read relay client id");
                None
            }
        };

        let (sink, events) = mpsc::unbounded_channel();
        let registered = register_all(transport.as_ref(), &sink)?;

        info!(
            chain_id = %capability.chain_id(),
            account = %capability.current_account(),
            "Session manager listening"
        );
        self.inner
            .state
            .write()
            .await
            .bind(capability, Arc::clone(&transport), client_id);

        let dispatcher = spawn_dispatcher(Arc::downgrade(&self.inner), events);
        listeners.activate(transport, registered, dispatcher);
        Ok(())
    }

    /// Set up if needed, then start pairing with the peer behind `uri`
    pub async fn pair(&self, uri: &str) -> Result<()> {
        self.setup().await?;

        let uri = PairingUri::parse(uri)?;
        let now = u64::try_from(Utc::now().timestamp()).unwrap_or_default();
        if uri.is_expired(now) {
            return Err(Error::InvalidArgument(format!(
                "pairing uri for {} has expired",
                uri.topic
            )));
        }

        let transport = self
            .inner
            .state
            .read()
            .await
            .transport()
            .ok_or_else(|| Error::Initialization("relay transport is not bound".to_string()))?;

        info!(topic = %uri.topic, version = uri.version, "Pairing with peer");
        transport.pair(&uri).await
    }

    /// Tear everything down; every step is attempted and failures are only logged
    ///
    /// Negotiations still in progress are abandoned: a pending prompt is closed and
    /// rejected, and a session approved on the relay meanwhile is disconnected.
    pub async fn close(&self) {
        let mut listeners = self.inner.listeners.lock().await;

        let (ended, transport) = {
            let mut state = self.inner.state.write().await;
            self.inner.generation.send_modify(|generation| *generation += 1);
            (state.end_session(), state.transport())
        };

        if let Some(ended) = ended {
            if let Some(transport) = transport {
                if let Err(e) = transport
                    .disconnect_session(&ended.session_topic, Reason::user_disconnected())
                    .await
                {
                    warn!(topic = %ended.session_topic, error = %e, "Failed to disconnect session");
                }
            }
            self.session_ended(ended, Reason::user_disconnected()).await;
        }

        let removed = listeners.deactivate();
        if removed > 0 {
            info!(listeners = removed, "Session manager closed");
        }
    }

    /// Route one relay event to its handler
    pub async fn handle_event(&self, event: RelayEvent) {
        match event {
            RelayEvent::Proposal(proposal) => self.on_session_proposal(proposal).await,
            RelayEvent::Request(request) => self.on_session_request(request).await,
            RelayEvent::Delete(delete) => self.on_session_delete(delete).await,
            RelayEvent::SessionPing(ping) => debug!(topic = %ping.topic, "Session ping"),
            RelayEvent::PairingPing(ping) => debug!(topic = %ping.topic, "Pairing ping"),
        }
    }

    async fn on_session_delete(&self, delete: SessionDelete) {
        let ended = self.inner.state.write().await.end_session_if(&delete.topic);
        match ended {
            Some(ended) => {
                info!(topic = %delete.topic, code = delete.reason.code, reason = %delete.reason.message, "Peer deleted session");
                self.session_ended(ended, delete.reason).await;
            }
            None => debug!(topic = %delete.topic, "Ignoring delete for unknown session"),
        }
    }

    /// Bookkeeping shared by local and peer teardown, after state was cleared
    async fn session_ended(&self, ended: EndedSession, reason: Reason) {
        if let Err(e) = self.inner.store.remove(&ended.session_topic).await {
            warn!(topic = %ended.session_topic, error = %e, "Failed to remove dapp session record");
        }

        self.audit(
            AuditEntry::new("session_disconnected", "success")
                .topic(ended.session_topic.clone())
                .detail(reason.message.clone()),
        )
        .await;

        self.broadcast(LifecycleEvent::Disconnected {
            topic: Some(ended.session_topic),
            reason: reason.message,
        });
    }

    fn broadcast(&self, event: LifecycleEvent) {
        // Nobody listening is fine
        let _ = self.inner.lifecycle.send(event);
    }

    async fn audit(&self, entry: AuditEntry) {
        if let Some(audit) = &self.inner.audit {
            audit.record(entry).await;
        }
    }
}

fn spawn_dispatcher(
    inner: Weak<Inner>,
    mut events: mpsc::UnboundedReceiver<RelayEvent>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            let Some(strong) = inner.upgrade() else {
                break;
            };
            debug!(event = %event.kind(), "Relay event received");
            let manager = SessionManager { inner: strong };
            tokio::spawn(async move { manager.handle_event(event).await });
        }
        debug!("Relay event dispatcher stopped");
    })
}
