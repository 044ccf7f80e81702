// services/api/src/chat/mod.rs

// The client-side half of the system: the provider router and the
// per-connection conversation state machine it feeds.
pub mod dispatch;
pub mod session;
pub mod session_provider;

pub use dispatch::ChatDispatcher;
pub use session::{ChatSession, PendingSend, PENDING_CONTENT};
pub use session_provider::SessionHandle;
