//! services/api/src/chat/session_provider.rs
//!
//! The per-connection session capability. Instead of reading ambient global
//! auth state, the dispatcher and orchestrator hold a [`SessionHandle`];
//! sign-in and sign-out flow through it, and interested parties subscribe
//! for change notifications (dropping the receiver unsubscribes).

use std::sync::Arc;

use greenbot_core::domain::AuthContext;
use greenbot_core::ports::SessionProvider;
use tokio::sync::watch;

/// A watch-channel-backed [`SessionProvider`].
#[derive(Clone)]
pub struct SessionHandle {
    tx: Arc<watch::Sender<Option<AuthContext>>>,
}

impl SessionHandle {
    /// A handle with no signed-in user.
    pub fn anonymous() -> Self {
        Self::new(None)
    }

    pub fn new(initial: Option<AuthContext>) -> Self {
        let (tx, _rx) = watch::channel(initial);
        Self { tx: Arc::new(tx) }
    }

    /// Replaces the current identity and notifies subscribers.
    pub fn set(&self, context: AuthContext) {
        self.tx.send_replace(Some(context));
    }

    /// Drops the current identity and notifies subscribers.
    pub fn clear(&self) {
        self.tx.send_replace(None);
    }

    /// Subscribe to session changes. Dropping the receiver unsubscribes.
    pub fn subscribe(&self) -> watch::Receiver<Option<AuthContext>> {
        self.tx.subscribe()
    }
}

impl SessionProvider for SessionHandle {
    fn current(&self) -> Option<AuthContext> {
        self.tx.borrow().clone()
    }
}
