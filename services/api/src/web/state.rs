//! services/api/src/web/state.rs
//!
//! Defines the application's shared state.

use crate::adapters::db::DbAdapter;
use crate::adapters::local_store::LocalStore;
use crate::config::Config;
use greenbot_core::ports::{CredentialStore, QuizStore};
use std::sync::Arc;

/// The shared application state, created once at startup and passed to all handlers.
///
/// `db` is held concretely (the auth-session methods are not behind a port);
/// the same adapter is also exposed through the port-typed fields so
/// handlers depend on the contracts, not the implementation.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub db: Arc<DbAdapter>,
    pub credentials: Arc<dyn CredentialStore>,
    pub quizzes: Arc<dyn QuizStore>,
    pub local: Arc<LocalStore>,
    /// Shared outbound HTTP client for relay and provider calls.
    pub http: reqwest::Client,
}

impl AppState {
    pub fn new(config: Arc<Config>, db: Arc<DbAdapter>, local: Arc<LocalStore>) -> Self {
        Self {
            credentials: db.clone(),
            quizzes: db.clone(),
            config,
            db,
            local,
            http: reqwest::Client::new(),
        }
    }
}
