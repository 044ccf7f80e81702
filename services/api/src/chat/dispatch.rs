//! services/api/src/chat/dispatch.rs
//!
//! The provider router. Decides how a chat request reaches an LLM provider:
//! through the server-side relay (default, keys never touch the client
//! path) or directly against the provider endpoint with a locally cached
//! key (compatibility fallback). Failures are normalized into the core
//! error taxonomy; no retries happen here.

use std::sync::Arc;

use async_trait::async_trait;
use greenbot_core::domain::{ChatTurn, Provider};
use greenbot_core::ports::{ChatService, ServiceError, ServiceResult, SessionProvider};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::adapters::local_store::LocalStore;
use crate::adapters::providers;
use crate::config::RoutingMode;

#[derive(Serialize)]
struct RelayRequest<'a> {
    messages: &'a [ChatTurn],
    provider: Provider,
}

/// The relay's structured error body.
#[derive(Deserialize, Default)]
struct RelayError {
    error: Option<String>,
    #[serde(rename = "needsSetup", default)]
    needs_setup: bool,
}

/// Routes chat requests to a provider on behalf of one session.
pub struct ChatDispatcher {
    http: reqwest::Client,
    relay_url: String,
    mode: RoutingMode,
    sessions: Arc<dyn SessionProvider>,
    local: Arc<LocalStore>,
}

impl ChatDispatcher {
    pub fn new(
        http: reqwest::Client,
        relay_url: String,
        mode: RoutingMode,
        sessions: Arc<dyn SessionProvider>,
        local: Arc<LocalStore>,
    ) -> Self {
        Self {
            http,
            relay_url,
            mode,
            sessions,
            local,
        }
    }

    /// Server-relay mode: requires an active session; the relay re-resolves
    /// the caller and uses the server-held key.
    async fn send_via_relay(
        &self,
        history: &[ChatTurn],
        provider: Provider,
    ) -> ServiceResult<String> {
        let auth = self.sessions.current().ok_or(ServiceError::AuthRequired)?;
        debug!(%provider, "dispatching chat through relay");

        let response = self
            .http
            .post(&self.relay_url)
            .bearer_auth(&auth.access_token)
            .json(&RelayRequest {
                messages: history,
                provider,
            })
            .send()
            .await
            .map_err(|e| ServiceError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let relay_error: RelayError = serde_json::from_str(&body).unwrap_or_default();
            if status.as_u16() == 401 {
                return Err(ServiceError::AuthRequired);
            }
            if relay_error.needs_setup {
                return Err(ServiceError::MissingCredential(provider));
            }
            return Err(ServiceError::Provider {
                status: status.as_u16(),
                body: relay_error.error.unwrap_or(body),
            });
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| ServiceError::Network(e.to_string()))?;
        providers::extract_reply(&body)
    }

    /// Direct mode: requires a non-empty locally cached key for the chosen
    /// provider and calls its endpoint without the relay.
    async fn send_direct(&self, history: &[ChatTurn], provider: Provider) -> ServiceResult<String> {
        let key = self
            .local
            .cached_key(provider)?
            .ok_or(ServiceError::MissingCredential(provider))?;
        debug!(%provider, "dispatching chat directly to provider");

        let body = providers::forward_chat(&self.http, provider, &key, history).await?;
        providers::extract_reply(&body)
    }
}

#[async_trait]
impl ChatService for ChatDispatcher {
    async fn send_chat(&self, history: &[ChatTurn], provider: Provider) -> ServiceResult<String> {
        match self.mode {
            RoutingMode::Relay => self.send_via_relay(history, provider).await,
            RoutingMode::Direct => self.send_direct(history, provider).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use greenbot_core::domain::{AuthContext, Role};
    use crate::chat::session_provider::SessionHandle;
    use uuid::Uuid;

    fn dispatcher(mode: RoutingMode, sessions: SessionHandle) -> (tempfile::TempDir, ChatDispatcher) {
        let dir = tempfile::tempdir().unwrap();
        let local = Arc::new(LocalStore::open_at(&dir.path().join("local.json")).unwrap());
        let dispatcher = ChatDispatcher::new(
            reqwest::Client::new(),
            // A port nothing listens on: any attempt to reach it would fail,
            // and the short-circuit tests must not get that far.
            "http://127.0.0.1:9/ai-chat".to_string(),
            mode,
            Arc::new(sessions),
            local,
        );
        (dir, dispatcher)
    }

    fn history() -> Vec<ChatTurn> {
        vec![ChatTurn::new(Role::User, "Hello")]
    }

    #[tokio::test]
    async fn relay_mode_without_session_fails_auth_required() {
        let (_dir, dispatcher) = dispatcher(RoutingMode::Relay, SessionHandle::anonymous());
        let err = dispatcher
            .send_chat(&history(), Provider::OpenAi)
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::AuthRequired));
    }

    #[tokio::test]
    async fn direct_mode_without_cached_key_fails_missing_credential() {
        let sessions = SessionHandle::new(Some(AuthContext {
            user_id: Uuid::new_v4(),
            access_token: "token".into(),
        }));
        let (_dir, dispatcher) = dispatcher(RoutingMode::Direct, sessions);
        let err = dispatcher
            .send_chat(&history(), Provider::Grok)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ServiceError::MissingCredential(Provider::Grok)
        ));
    }

    #[tokio::test]
    async fn relay_failure_bodies_normalize() {
        // needsSetup flags map to MissingCredential regardless of wording.
        let parsed: RelayError =
            serde_json::from_str(r#"{"error":"No API keys configured","needsSetup":true}"#)
                .unwrap();
        assert!(parsed.needs_setup);
        assert_eq!(parsed.error.as_deref(), Some("No API keys configured"));

        let parsed: RelayError = serde_json::from_str(r#"{"error":"boom"}"#).unwrap();
        assert!(!parsed.needs_setup);
    }
}
