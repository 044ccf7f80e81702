//! crates/greenbot_core/src/domain.rs
//!
//! Defines the pure, core data structures for the application.
//! These structs are independent of any database or serialization backend;
//! serde derives exist because the same shapes travel over the chat
//! WebSocket and into the local mirror file.

use crate::persona::PersonaId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Who authored a chat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sender {
    User,
    Bot,
}

impl Sender {
    /// The chat-completion role for this sender.
    pub fn as_role(&self) -> Role {
        match self {
            Sender::User => Role::User,
            Sender::Bot => Role::Assistant,
        }
    }
}

/// A single message inside a conversation transcript.
///
/// Messages are append-only. The one exception is the transient pending
/// placeholder the orchestrator creates while a provider call is in flight:
/// its `content` is replaced in place (matched by `id`, never by position)
/// once the real response or an error message arrives.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: Uuid,
    pub content: String,
    pub sender: Sender,
    pub persona: Option<PersonaId>,
    pub timestamp: DateTime<Utc>,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            content: content.into(),
            sender: Sender::User,
            persona: None,
            timestamp: Utc::now(),
        }
    }

    pub fn bot(content: impl Into<String>, persona: PersonaId) -> Self {
        Self {
            id: Uuid::new_v4(),
            content: content.into(),
            sender: Sender::Bot,
            persona: Some(persona),
            timestamp: Utc::now(),
        }
    }
}

/// An ordered thread of messages belonging to one user (or to one anonymous
/// local session, in which case `user_id` is `None`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    pub id: Uuid,
    pub title: String,
    pub persona: PersonaId,
    pub user_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A lightweight sidebar entry for the conversation list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatHistoryEntry {
    pub id: Uuid,
    pub title: String,
    pub date: DateTime<Utc>,
    pub selected: bool,
}

/// The role attached to a chat-completion turn on the provider wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// One turn of the history sent to a chat-completion endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatTurn {
    pub role: Role,
    pub content: String,
}

impl ChatTurn {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

/// The LLM providers a chat can be routed to.
///
/// Each variant carries its endpoint URL and model identifier as data,
/// selected by exhaustive match. There is no "unknown provider" value:
/// anything that parses is routable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Provider {
    #[serde(rename = "openai")]
    OpenAi,
    #[serde(rename = "deepseek")]
    DeepSeek,
    #[serde(rename = "grok")]
    Grok,
}

impl Provider {
    pub const ALL: [Provider; 3] = [Provider::OpenAi, Provider::DeepSeek, Provider::Grok];

    /// The chat-completions endpoint for this provider.
    pub fn endpoint_url(&self) -> &'static str {
        match self {
            Provider::OpenAi => "https://api.openai.com/v1/chat/completions",
            Provider::DeepSeek => "https://api.deepseek.com/v1/chat/completions",
            Provider::Grok => "https://api.x.ai/v1/chat/completions",
        }
    }

    /// The model identifier sent in the request body.
    pub fn model(&self) -> &'static str {
        match self {
            Provider::OpenAi => "gpt-4o",
            Provider::DeepSeek => "deepseek-chat",
            Provider::Grok => "grok-beta",
        }
    }

    /// The lowercase wire tag, also used as the preference value.
    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::OpenAi => "openai",
            Provider::DeepSeek => "deepseek",
            Provider::Grok => "grok",
        }
    }
}

impl std::fmt::Display for Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Provider {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "openai" => Ok(Provider::OpenAi),
            "deepseek" => Ok(Provider::DeepSeek),
            "grok" => Ok(Provider::Grok),
            other => Err(format!("unknown provider: {other}")),
        }
    }
}

/// The per-user collection of third-party provider API keys.
///
/// Exactly one record exists per user (upsert semantics). A key that was
/// never configured is `None`; an empty string is treated the same as
/// missing when resolving a key for a call.
#[derive(Debug, Clone)]
pub struct CredentialRecord {
    pub id: Uuid,
    pub user_id: Uuid,
    pub openai_key: Option<String>,
    pub deepseek_key: Option<String>,
    pub grok_key: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl CredentialRecord {
    /// The stored key for `provider`, if configured and non-empty.
    pub fn key_for(&self, provider: Provider) -> Option<&str> {
        let key = match provider {
            Provider::OpenAi => self.openai_key.as_deref(),
            Provider::DeepSeek => self.deepseek_key.as_deref(),
            Provider::Grok => self.grok_key.as_deref(),
        };
        key.filter(|k| !k.trim().is_empty())
    }
}

/// A partial credential update. `None` fields keep whatever the stored
/// record already holds; the store must read-merge-write so that saving one
/// provider's key never erases the others.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CredentialUpdate {
    pub openai_key: Option<String>,
    pub deepseek_key: Option<String>,
    pub grok_key: Option<String>,
}

/// Masks key material for display: a fixed-width mask plus the last four
/// characters. Keys are never rendered or logged in full.
pub fn mask_key(key: &str) -> String {
    let chars: Vec<char> = key.chars().collect();
    let tail: String = chars[chars.len().saturating_sub(4)..].iter().collect();
    format!("{}{}", "\u{2022}".repeat(8), tail)
}

/// One answered question inside a completed quiz.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuizAnswer {
    pub question_id: String,
    pub selected_answer: i32,
    pub correct_answer: i32,
    pub is_correct: bool,
}

/// A completed quiz attempt. Immutable once created; the `attempts_count`
/// aggregate is maintained by a store-side trigger, not here.
#[derive(Debug, Clone)]
pub struct QuizResult {
    pub id: Uuid,
    pub user_id: Uuid,
    pub quiz_type: String,
    pub quiz_title: String,
    pub score: i32,
    pub total_questions: i32,
    pub percentage: i32,
    pub answers: Vec<QuizAnswer>,
    pub completed_at: DateTime<Utc>,
}

// Represents a user - used throughout app
#[derive(Debug, Clone)]
pub struct User {
    pub user_id: Uuid,
    pub email: Option<String>,
}

// Only used internally for login/signup - contains sensitive data
#[derive(Debug, Clone)]
pub struct UserCredentials {
    pub user_id: Uuid,
    pub email: String,
    pub hashed_password: String,
}

/// The resolved identity of the caller on this connection, as handed out by
/// a [`crate::ports::SessionProvider`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthContext {
    pub user_id: Uuid,
    pub access_token: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_table_is_exhaustive() {
        for provider in Provider::ALL {
            assert!(provider.endpoint_url().starts_with("https://"));
            assert!(!provider.model().is_empty());
            assert_eq!(provider.as_str().parse::<Provider>().unwrap(), provider);
        }
    }

    #[test]
    fn key_for_treats_empty_as_missing() {
        let record = CredentialRecord {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            openai_key: Some("sk-live-1234".into()),
            deepseek_key: Some("   ".into()),
            grok_key: None,
            updated_at: Utc::now(),
        };
        assert_eq!(record.key_for(Provider::OpenAi), Some("sk-live-1234"));
        assert_eq!(record.key_for(Provider::DeepSeek), None);
        assert_eq!(record.key_for(Provider::Grok), None);
    }

    #[test]
    fn mask_key_keeps_last_four() {
        assert_eq!(
            mask_key("sk-live-abcd1234"),
            format!("{}1234", "\u{2022}".repeat(8))
        );
        // Short keys still get the fixed-width mask.
        assert_eq!(mask_key("abc"), format!("{}abc", "\u{2022}".repeat(8)));
    }
}
