//! services/api/src/adapters/db.rs
//!
//! This module contains the database adapter, which is the concrete implementation
//! of the storage ports from the `core` crate for authenticated users. It handles
//! all interactions with the PostgreSQL database using `sqlx`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use greenbot_core::domain::{
    ChatMessage, Conversation, CredentialRecord, CredentialUpdate, QuizAnswer, QuizResult, Sender,
    User, UserCredentials,
};
use greenbot_core::persona::PersonaId;
use greenbot_core::ports::{
    ConversationRepository, CredentialStore, QuizStore, ServiceError, ServiceResult,
};
use sqlx::{FromRow, PgPool};
use tracing::warn;
use uuid::Uuid;

//=========================================================================================
// The Main Adapter Struct
//=========================================================================================

/// A database adapter backing the authenticated persistence path.
#[derive(Clone)]
pub struct DbAdapter {
    pool: PgPool,
}

impl DbAdapter {
    /// Creates a new `DbAdapter`.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// A helper function to run database migrations at startup.
    pub async fn run_migrations(&self) -> Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }
}

fn persistence(e: sqlx::Error) -> ServiceError {
    ServiceError::Persistence(e.to_string())
}

/// Merges a partial credential update against the stored record. Unset
/// fields keep their stored values.
fn merge_keys(
    existing: Option<CredentialRecord>,
    update: &CredentialUpdate,
) -> (Option<String>, Option<String>, Option<String>) {
    match existing {
        Some(record) => (
            update.openai_key.clone().or(record.openai_key),
            update.deepseek_key.clone().or(record.deepseek_key),
            update.grok_key.clone().or(record.grok_key),
        ),
        None => (
            update.openai_key.clone(),
            update.deepseek_key.clone(),
            update.grok_key.clone(),
        ),
    }
}

//=========================================================================================
// "Impure" Database Record Structs
//=========================================================================================

#[derive(FromRow)]
struct ConversationRecord {
    id: Uuid,
    title: String,
    persona: String,
    user_id: Option<Uuid>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}
impl ConversationRecord {
    fn to_domain(self) -> Conversation {
        Conversation {
            id: self.id,
            title: self.title,
            // Conversations store the display name; unknown names fall back
            // to the primary persona.
            persona: PersonaId::from_display_name(&self.persona).unwrap_or_default(),
            user_id: self.user_id,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

#[derive(FromRow)]
struct MessageRecord {
    id: Uuid,
    content: String,
    sender: String,
    persona: Option<String>,
    created_at: DateTime<Utc>,
}
impl MessageRecord {
    fn to_domain(self) -> ChatMessage {
        ChatMessage {
            id: self.id,
            content: self.content,
            sender: if self.sender == "user" {
                Sender::User
            } else {
                Sender::Bot
            },
            persona: self
                .persona
                .as_deref()
                .and_then(PersonaId::from_display_name),
            timestamp: self.created_at,
        }
    }
}

#[derive(FromRow)]
struct ApiKeyRecord {
    id: Uuid,
    user_id: Uuid,
    openai_key: Option<String>,
    deepseek_key: Option<String>,
    grok_key: Option<String>,
    updated_at: DateTime<Utc>,
}
impl ApiKeyRecord {
    fn to_domain(self) -> CredentialRecord {
        CredentialRecord {
            id: self.id,
            user_id: self.user_id,
            openai_key: self.openai_key,
            deepseek_key: self.deepseek_key,
            grok_key: self.grok_key,
            updated_at: self.updated_at,
        }
    }
}

#[derive(FromRow)]
struct QuizResultRecord {
    id: Uuid,
    user_id: Uuid,
    quiz_type: String,
    quiz_title: String,
    score: i32,
    total_questions: i32,
    percentage: i32,
    answers: Option<String>,
    completed_at: DateTime<Utc>,
}
impl QuizResultRecord {
    fn to_domain(self) -> QuizResult {
        let answers: Vec<QuizAnswer> = self
            .answers
            .as_deref()
            .and_then(|raw| serde_json::from_str(raw).ok())
            .unwrap_or_default();
        QuizResult {
            id: self.id,
            user_id: self.user_id,
            quiz_type: self.quiz_type,
            quiz_title: self.quiz_title,
            score: self.score,
            total_questions: self.total_questions,
            percentage: self.percentage,
            answers,
            completed_at: self.completed_at,
        }
    }
}

#[derive(FromRow)]
struct UserAuthRecord {
    user_id: Uuid,
    email: String,
    hashed_password: String,
}

//=========================================================================================
// `ConversationRepository` Trait Implementation (authenticated path)
//=========================================================================================

#[async_trait]
impl ConversationRepository for DbAdapter {
    async fn create_conversation(
        &self,
        title: &str,
        persona: PersonaId,
        user_id: Option<Uuid>,
    ) -> ServiceResult<Conversation> {
        let user_id =
            user_id.ok_or_else(|| ServiceError::Validation("conversation owner required".into()))?;

        let record = sqlx::query_as::<_, ConversationRecord>(
            "INSERT INTO conversations (id, title, persona, user_id) VALUES ($1, $2, $3, $4) \
             RETURNING id, title, persona, user_id, created_at, updated_at",
        )
        .bind(Uuid::new_v4())
        .bind(title)
        .bind(persona.display_name())
        .bind(user_id)
        .fetch_one(&self.pool)
        .await
        .map_err(persistence)?;
        Ok(record.to_domain())
    }

    async fn append_message(
        &self,
        conversation_id: Uuid,
        message: &ChatMessage,
    ) -> ServiceResult<bool> {
        if conversation_id.is_nil() {
            warn!("append_message: refusing to save against the nil conversation id");
            return Ok(false);
        }

        let exists: bool =
            sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM conversations WHERE id = $1)")
                .bind(conversation_id)
                .fetch_one(&self.pool)
                .await
                .map_err(persistence)?;
        if !exists {
            warn!(%conversation_id, "append_message: conversation does not exist, skipping save");
            return Ok(false);
        }

        let sender = match message.sender {
            Sender::User => "user",
            Sender::Bot => "bot",
        };
        sqlx::query(
            "INSERT INTO messages (id, conversation_id, content, sender, persona, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(message.id)
        .bind(conversation_id)
        .bind(&message.content)
        .bind(sender)
        .bind(message.persona.map(|p| p.display_name()))
        .bind(message.timestamp)
        .execute(&self.pool)
        .await
        .map_err(persistence)?;

        // Refresh the conversation's activity timestamp. Deliberately not in
        // a transaction with the insert above: the timestamp is advisory.
        sqlx::query("UPDATE conversations SET updated_at = NOW() WHERE id = $1")
            .bind(conversation_id)
            .execute(&self.pool)
            .await
            .map_err(persistence)?;

        Ok(true)
    }

    async fn conversation_with_messages(
        &self,
        conversation_id: Uuid,
    ) -> ServiceResult<(Conversation, Vec<ChatMessage>)> {
        let conversation = sqlx::query_as::<_, ConversationRecord>(
            "SELECT id, title, persona, user_id, created_at, updated_at FROM conversations \
             WHERE id = $1",
        )
        .bind(conversation_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(persistence)?
        .ok_or_else(|| ServiceError::NotFound(format!("Conversation {}", conversation_id)))?;

        let messages = sqlx::query_as::<_, MessageRecord>(
            "SELECT id, content, sender, persona, created_at FROM messages \
             WHERE conversation_id = $1 ORDER BY created_at ASC",
        )
        .bind(conversation_id)
        .fetch_all(&self.pool)
        .await
        .map_err(persistence)?;

        Ok((
            conversation.to_domain(),
            messages.into_iter().map(|m| m.to_domain()).collect(),
        ))
    }

    async fn list_conversations(&self, user_id: Option<Uuid>) -> ServiceResult<Vec<Conversation>> {
        let user_id = match user_id {
            Some(id) => id,
            None => return Ok(Vec::new()),
        };
        let records = sqlx::query_as::<_, ConversationRecord>(
            "SELECT id, title, persona, user_id, created_at, updated_at FROM conversations \
             WHERE user_id = $1 ORDER BY updated_at DESC",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(persistence)?;
        Ok(records.into_iter().map(|r| r.to_domain()).collect())
    }

    async fn delete_conversation(&self, conversation_id: Uuid) -> ServiceResult<()> {
        // Messages first; if this fails the conversation row is left alone.
        sqlx::query("DELETE FROM messages WHERE conversation_id = $1")
            .bind(conversation_id)
            .execute(&self.pool)
            .await
            .map_err(persistence)?;

        sqlx::query("DELETE FROM conversations WHERE id = $1")
            .bind(conversation_id)
            .execute(&self.pool)
            .await
            .map_err(persistence)?;
        Ok(())
    }

    async fn set_conversation_persona(
        &self,
        conversation_id: Uuid,
        persona: PersonaId,
    ) -> ServiceResult<()> {
        sqlx::query("UPDATE conversations SET persona = $1 WHERE id = $2")
            .bind(persona.display_name())
            .bind(conversation_id)
            .execute(&self.pool)
            .await
            .map_err(persistence)?;
        Ok(())
    }
}

//=========================================================================================
// `CredentialStore` Trait Implementation
//=========================================================================================

#[async_trait]
impl CredentialStore for DbAdapter {
    async fn get_credentials(&self, user_id: Uuid) -> ServiceResult<Option<CredentialRecord>> {
        let record = sqlx::query_as::<_, ApiKeyRecord>(
            "SELECT id, user_id, openai_key, deepseek_key, grok_key, updated_at FROM api_keys \
             WHERE user_id = $1",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(persistence)?;
        Ok(record.map(|r| r.to_domain()))
    }

    async fn save_credentials(
        &self,
        user_id: Uuid,
        update: &CredentialUpdate,
    ) -> ServiceResult<()> {
        // Read-merge-write: fields left unset keep their stored values so a
        // single-provider save never clobbers the sibling keys.
        let existing = self.get_credentials(user_id).await?;
        let (openai, deepseek, grok) = merge_keys(existing, update);

        sqlx::query(
            "INSERT INTO api_keys (id, user_id, openai_key, deepseek_key, grok_key, updated_at) \
             VALUES ($1, $2, $3, $4, $5, NOW()) \
             ON CONFLICT (user_id) DO UPDATE SET \
               openai_key = EXCLUDED.openai_key, \
               deepseek_key = EXCLUDED.deepseek_key, \
               grok_key = EXCLUDED.grok_key, \
               updated_at = NOW()",
        )
        .bind(Uuid::new_v4())
        .bind(user_id)
        .bind(openai)
        .bind(deepseek)
        .bind(grok)
        .execute(&self.pool)
        .await
        .map_err(persistence)?;
        Ok(())
    }
}

//=========================================================================================
// `QuizStore` Trait Implementation
//=========================================================================================

#[async_trait]
impl QuizStore for DbAdapter {
    async fn save_result(&self, result: &QuizResult) -> ServiceResult<Uuid> {
        let answers = serde_json::to_string(&result.answers)
            .map_err(|e| ServiceError::Persistence(e.to_string()))?;
        let id: Uuid = sqlx::query_scalar(
            "INSERT INTO quiz_results \
               (id, user_id, quiz_type, quiz_title, score, total_questions, percentage, answers) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8) RETURNING id",
        )
        .bind(result.id)
        .bind(result.user_id)
        .bind(&result.quiz_type)
        .bind(&result.quiz_title)
        .bind(result.score)
        .bind(result.total_questions)
        .bind(result.percentage)
        .bind(answers)
        .fetch_one(&self.pool)
        .await
        .map_err(persistence)?;
        Ok(id)
    }

    async fn history(&self, user_id: Uuid, limit: i64) -> ServiceResult<Vec<QuizResult>> {
        let records = sqlx::query_as::<_, QuizResultRecord>(
            "SELECT id, user_id, quiz_type, quiz_title, score, total_questions, percentage, \
                    answers, completed_at \
             FROM quiz_results WHERE user_id = $1 ORDER BY completed_at DESC LIMIT $2",
        )
        .bind(user_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(persistence)?;
        Ok(records.into_iter().map(|r| r.to_domain()).collect())
    }

    async fn best_score(&self, user_id: Uuid, quiz_type: &str) -> ServiceResult<Option<i32>> {
        let best: Option<i32> = sqlx::query_scalar(
            "SELECT MAX(percentage) FROM quiz_results WHERE user_id = $1 AND quiz_type = $2",
        )
        .bind(user_id)
        .bind(quiz_type)
        .fetch_one(&self.pool)
        .await
        .map_err(persistence)?;
        Ok(best)
    }
}

//=========================================================================================
// Auth Session Methods (used by the auth handlers and middleware)
//=========================================================================================

impl DbAdapter {
    pub async fn create_user_with_email(
        &self,
        email: &str,
        hashed_password: &str,
    ) -> ServiceResult<User> {
        let user_id: Uuid = sqlx::query_scalar(
            "INSERT INTO users (user_id, email, hashed_password) VALUES ($1, $2, $3) \
             RETURNING user_id",
        )
        .bind(Uuid::new_v4())
        .bind(email)
        .bind(hashed_password)
        .fetch_one(&self.pool)
        .await
        .map_err(persistence)?;
        Ok(User {
            user_id,
            email: Some(email.to_string()),
        })
    }

    pub async fn get_user_by_email(&self, email: &str) -> ServiceResult<UserCredentials> {
        let record = sqlx::query_as::<_, UserAuthRecord>(
            "SELECT user_id, email, hashed_password FROM users WHERE email = $1",
        )
        .bind(email)
        .fetch_optional(&self.pool)
        .await
        .map_err(persistence)?
        .ok_or_else(|| ServiceError::NotFound(format!("user {}", email)))?;
        Ok(UserCredentials {
            user_id: record.user_id,
            email: record.email,
            hashed_password: record.hashed_password,
        })
    }

    pub async fn create_auth_session(
        &self,
        session_id: &str,
        user_id: Uuid,
        expires_at: DateTime<Utc>,
    ) -> ServiceResult<()> {
        sqlx::query("INSERT INTO auth_sessions (id, user_id, expires_at) VALUES ($1, $2, $3)")
            .bind(session_id)
            .bind(user_id)
            .bind(expires_at)
            .execute(&self.pool)
            .await
            .map_err(persistence)?;
        Ok(())
    }

    /// Resolves a bearer token to a user id, rejecting unknown and expired
    /// sessions alike.
    pub async fn validate_auth_session(&self, session_id: &str) -> ServiceResult<Uuid> {
        let user_id: Option<Uuid> = sqlx::query_scalar(
            "SELECT user_id FROM auth_sessions WHERE id = $1 AND expires_at > NOW()",
        )
        .bind(session_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(persistence)?;
        user_id.ok_or(ServiceError::AuthRequired)
    }

    pub async fn delete_auth_session(&self, session_id: &str) -> ServiceResult<()> {
        sqlx::query("DELETE FROM auth_sessions WHERE id = $1")
            .bind(session_id)
            .execute(&self.pool)
            .await
            .map_err(persistence)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn record(deepseek: Option<&str>) -> CredentialRecord {
        CredentialRecord {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            openai_key: None,
            deepseek_key: deepseek.map(str::to_string),
            grok_key: None,
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn saving_one_key_preserves_the_siblings() {
        let update = CredentialUpdate {
            openai_key: Some("sk-new-openai".into()),
            ..Default::default()
        };
        let (openai, deepseek, grok) = merge_keys(Some(record(Some("sk-old-deepseek"))), &update);
        assert_eq!(openai.as_deref(), Some("sk-new-openai"));
        assert_eq!(deepseek.as_deref(), Some("sk-old-deepseek"));
        assert_eq!(grok, None);
    }

    #[test]
    fn update_wins_over_the_stored_key() {
        let update = CredentialUpdate {
            deepseek_key: Some("sk-rotated".into()),
            ..Default::default()
        };
        let (_, deepseek, _) = merge_keys(Some(record(Some("sk-stale"))), &update);
        assert_eq!(deepseek.as_deref(), Some("sk-rotated"));
    }

    #[test]
    fn first_save_takes_the_update_as_is() {
        let update = CredentialUpdate {
            grok_key: Some("xai-123".into()),
            ..Default::default()
        };
        let (openai, deepseek, grok) = merge_keys(None, &update);
        assert_eq!(openai, None);
        assert_eq!(deepseek, None);
        assert_eq!(grok.as_deref(), Some("xai-123"));
    }
}
