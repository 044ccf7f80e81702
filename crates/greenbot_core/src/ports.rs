//! crates/greenbot_core/src/ports.rs
//!
//! Defines the service contracts (traits) for the application's core logic.
//! These traits form the boundary of the hexagonal architecture, allowing the core
//! to be independent of specific external implementations like databases or APIs.

use async_trait::async_trait;
use uuid::Uuid;

use crate::domain::{
    AuthContext, ChatMessage, ChatTurn, Conversation, CredentialRecord, CredentialUpdate,
    Provider, QuizResult,
};
use crate::persona::PersonaId;

//=========================================================================================
// Error Taxonomy and Result Type
//=========================================================================================

/// The single error taxonomy shared by every port.
///
/// Store-layer and provider-layer failures are caught at the orchestrator
/// boundary and turned into a user-visible chat message; nothing here is
/// fatal to the process.
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    /// No valid session where one is required.
    #[error("authentication required")]
    AuthRequired,
    /// A provider was selected but no key is resolvable for it.
    #[error("no {0} API key configured")]
    MissingCredential(Provider),
    /// The upstream LLM API rejected the request.
    #[error("provider returned HTTP {status}: {body}")]
    Provider { status: u16, body: String },
    /// Transport-level failure reaching a remote endpoint.
    #[error("network failure: {0}")]
    Network(String),
    /// A backing-store read or write failed.
    #[error("store operation failed: {0}")]
    Persistence(String),
    /// A malformed identifier or payload was rejected before any write.
    #[error("validation failed: {0}")]
    Validation(String),
    /// The requested item does not exist.
    #[error("not found: {0}")]
    NotFound(String),
}

/// A convenience type alias for `Result<T, ServiceError>`.
pub type ServiceResult<T> = Result<T, ServiceError>;

//=========================================================================================
// Service Ports (Traits)
//=========================================================================================

/// Storage for conversations and their messages.
///
/// Two implementations exist: the remote database for authenticated users
/// and the local mirror for anonymous sessions. Exactly one is selected per
/// session and injected into the orchestrator; call sites never re-check
/// authentication state.
#[async_trait]
pub trait ConversationRepository: Send + Sync {
    async fn create_conversation(
        &self,
        title: &str,
        persona: PersonaId,
        user_id: Option<Uuid>,
    ) -> ServiceResult<Conversation>;

    /// Appends a message. Returns `false` (logged, nothing written) when
    /// `conversation_id` is the nil placeholder or the conversation does not
    /// exist. This guards against persisting into a conversation that was
    /// never created. Refreshes the conversation's `updated_at` on success.
    async fn append_message(
        &self,
        conversation_id: Uuid,
        message: &ChatMessage,
    ) -> ServiceResult<bool>;

    /// Loads a conversation and its messages ordered by timestamp ascending.
    async fn conversation_with_messages(
        &self,
        conversation_id: Uuid,
    ) -> ServiceResult<(Conversation, Vec<ChatMessage>)>;

    /// Lists conversations ordered by `updated_at` descending.
    async fn list_conversations(&self, user_id: Option<Uuid>) -> ServiceResult<Vec<Conversation>>;

    /// Deletes a conversation and its messages, messages first. A failure
    /// deleting messages aborts before the conversation row is touched.
    async fn delete_conversation(&self, conversation_id: Uuid) -> ServiceResult<()>;

    async fn set_conversation_persona(
        &self,
        conversation_id: Uuid,
        persona: PersonaId,
    ) -> ServiceResult<()>;
}

/// Storage for per-user provider API keys.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn get_credentials(&self, user_id: Uuid) -> ServiceResult<Option<CredentialRecord>>;

    /// Read-merge-write: fields left `None` in `update` keep their stored
    /// values, so saving one provider's key never clobbers the others.
    async fn save_credentials(&self, user_id: Uuid, update: &CredentialUpdate)
        -> ServiceResult<()>;
}

/// Storage for completed quiz results.
#[async_trait]
pub trait QuizStore: Send + Sync {
    async fn save_result(&self, result: &QuizResult) -> ServiceResult<Uuid>;

    /// Results for a user, most recent first.
    async fn history(&self, user_id: Uuid, limit: i64) -> ServiceResult<Vec<QuizResult>>;

    /// Best percentage for one quiz type, if the user has any attempts.
    async fn best_score(&self, user_id: Uuid, quiz_type: &str) -> ServiceResult<Option<i32>>;
}

/// The provider-routing contract: resolves a credential and turns an ordered
/// message history into the assistant's reply text.
#[async_trait]
pub trait ChatService: Send + Sync {
    async fn send_chat(&self, history: &[ChatTurn], provider: Provider) -> ServiceResult<String>;
}

/// The injected session capability. Components that need the caller's
/// identity receive one of these rather than reaching for ambient state.
pub trait SessionProvider: Send + Sync {
    fn current(&self) -> Option<AuthContext>;
}
