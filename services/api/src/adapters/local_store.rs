//! services/api/src/adapters/local_store.rs
//!
//! The durable key-value mirror for anonymous sessions. Everything lives in
//! a single JSON document on disk: the ordered chat list (newest first), the
//! tombstone set of deleted chat ids, cached per-provider keys for the
//! direct routing mode, and the provider/theme preferences.
//!
//! Writes are read-modify-write without locking across processes; two
//! concurrent writers lose updates and the last write wins. The local mirror
//! and the remote store are never merged: switching to an authenticated
//! session clears the mirror instead of importing it.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use directories::ProjectDirs;
use greenbot_core::domain::{ChatMessage, Conversation, Provider};
use greenbot_core::persona::PersonaId;
use greenbot_core::ports::{ConversationRepository, ServiceError, ServiceResult};
use serde::{Deserialize, Serialize};
use tracing::warn;
use uuid::Uuid;

/// One locally mirrored chat.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredChat {
    pub id: Uuid,
    pub title: String,
    #[serde(default)]
    pub persona: PersonaId,
    pub date: DateTime<Utc>,
    pub messages: Vec<ChatMessage>,
}

impl StoredChat {
    fn to_conversation(&self) -> Conversation {
        Conversation {
            id: self.id,
            title: self.title.clone(),
            persona: self.persona,
            user_id: None,
            created_at: self.date,
            updated_at: self.date,
        }
    }
}

/// The single persisted document.
#[derive(Debug, Default, Serialize, Deserialize)]
struct LocalState {
    #[serde(default)]
    chats: Vec<StoredChat>,
    #[serde(default)]
    deleted_chats: Vec<Uuid>,
    #[serde(default)]
    provider_keys: BTreeMap<String, String>,
    #[serde(default)]
    selected_provider: Option<Provider>,
    #[serde(default)]
    theme: Option<String>,
}

/// File-backed store for everything an anonymous session persists.
pub struct LocalStore {
    path: PathBuf,
    state: Mutex<LocalState>,
}

impl LocalStore {
    /// Open (or create) the store in the platform data directory.
    pub fn open_default() -> ServiceResult<Self> {
        let dirs = ProjectDirs::from("com", "greenbot", "greenbot")
            .ok_or_else(|| ServiceError::Persistence("no platform data directory".into()))?;
        let data_dir = dirs.data_dir();
        std::fs::create_dir_all(data_dir)
            .map_err(|e| ServiceError::Persistence(e.to_string()))?;
        Self::open_at(&data_dir.join("greenbot-local.json"))
    }

    /// Open (or create) the store at an explicit path. Used by tests and by
    /// the `LOCAL_STORE_PATH` override.
    pub fn open_at(path: &Path) -> ServiceResult<Self> {
        let state = match std::fs::read_to_string(path) {
            Ok(raw) => serde_json::from_str(&raw).unwrap_or_else(|e| {
                warn!(path = %path.display(), "local store unreadable, starting fresh: {e}");
                LocalState::default()
            }),
            Err(_) => LocalState::default(),
        };
        Ok(Self {
            path: path.to_path_buf(),
            state: Mutex::new(state),
        })
    }

    fn lock(&self) -> ServiceResult<MutexGuard<'_, LocalState>> {
        self.state
            .lock()
            .map_err(|_| ServiceError::Persistence("local store lock poisoned".into()))
    }

    fn persist(&self, state: &LocalState) -> ServiceResult<()> {
        let raw = serde_json::to_string_pretty(state)
            .map_err(|e| ServiceError::Persistence(e.to_string()))?;
        std::fs::write(&self.path, raw).map_err(|e| ServiceError::Persistence(e.to_string()))
    }

    /// All chats that are not tombstoned, newest first. Tombstones are
    /// consulted on every load so a deleted chat never resurrects from
    /// stale mirror data.
    pub fn load_all(&self) -> ServiceResult<Vec<StoredChat>> {
        let state = self.lock()?;
        Ok(state
            .chats
            .iter()
            .filter(|c| !state.deleted_chats.contains(&c.id))
            .cloned()
            .collect())
    }

    /// Update a chat in place if it exists, otherwise insert it as newest.
    pub fn upsert_chat(&self, chat: StoredChat) -> ServiceResult<()> {
        let mut state = self.lock()?;
        match state.chats.iter().position(|c| c.id == chat.id) {
            Some(index) => state.chats[index] = chat,
            None => state.chats.insert(0, chat),
        }
        self.persist(&state)
    }

    /// Remove a chat and record a tombstone for it.
    pub fn remove_chat(&self, id: Uuid) -> ServiceResult<()> {
        let mut state = self.lock()?;
        state.chats.retain(|c| c.id != id);
        if !state.deleted_chats.contains(&id) {
            state.deleted_chats.push(id);
        }
        self.persist(&state)
    }

    /// Empties the chat mirror. Called when an anonymous session becomes
    /// authenticated; local chats are never imported into an account.
    pub fn clear_chats(&self) -> ServiceResult<()> {
        let mut state = self.lock()?;
        state.chats.clear();
        self.persist(&state)
    }

    pub fn cached_key(&self, provider: Provider) -> ServiceResult<Option<String>> {
        let state = self.lock()?;
        Ok(state
            .provider_keys
            .get(provider.as_str())
            .filter(|k| !k.trim().is_empty())
            .cloned())
    }

    pub fn set_cached_key(&self, provider: Provider, key: &str) -> ServiceResult<()> {
        let mut state = self.lock()?;
        state
            .provider_keys
            .insert(provider.as_str().to_string(), key.to_string());
        self.persist(&state)
    }

    pub fn selected_provider(&self) -> ServiceResult<Option<Provider>> {
        Ok(self.lock()?.selected_provider)
    }

    pub fn set_selected_provider(&self, provider: Provider) -> ServiceResult<()> {
        let mut state = self.lock()?;
        state.selected_provider = Some(provider);
        self.persist(&state)
    }

    pub fn theme(&self) -> ServiceResult<Option<String>> {
        Ok(self.lock()?.theme.clone())
    }

    pub fn set_theme(&self, theme: &str) -> ServiceResult<()> {
        let mut state = self.lock()?;
        state.theme = Some(theme.to_string());
        self.persist(&state)
    }
}

//=========================================================================================
// `ConversationRepository` Trait Implementation (anonymous path)
//=========================================================================================

#[async_trait]
impl ConversationRepository for LocalStore {
    async fn create_conversation(
        &self,
        title: &str,
        persona: PersonaId,
        _user_id: Option<Uuid>,
    ) -> ServiceResult<Conversation> {
        let chat = StoredChat {
            id: Uuid::new_v4(),
            title: title.to_string(),
            persona,
            date: Utc::now(),
            messages: Vec::new(),
        };
        let conversation = chat.to_conversation();
        self.upsert_chat(chat)?;
        Ok(conversation)
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
        let mut state = self.lock()?;
        let Some(chat) = state.chats.iter_mut().find(|c| c.id == conversation_id) else {
            warn!(%conversation_id, "append_message: chat not in local mirror, skipping save");
            return Ok(false);
        };
        chat.messages.push(message.clone());
        chat.date = Utc::now();
        self.persist(&state)?;
        Ok(true)
    }

    async fn conversation_with_messages(
        &self,
        conversation_id: Uuid,
    ) -> ServiceResult<(Conversation, Vec<ChatMessage>)> {
        let chat = self
            .load_all()?
            .into_iter()
            .find(|c| c.id == conversation_id)
            .ok_or_else(|| ServiceError::NotFound(format!("Chat {}", conversation_id)))?;
        let conversation = chat.to_conversation();
        Ok((conversation, chat.messages))
    }

    async fn list_conversations(&self, _user_id: Option<Uuid>) -> ServiceResult<Vec<Conversation>> {
        Ok(self
            .load_all()?
            .iter()
            .map(StoredChat::to_conversation)
            .collect())
    }

    async fn delete_conversation(&self, conversation_id: Uuid) -> ServiceResult<()> {
        self.remove_chat(conversation_id)
    }

    async fn set_conversation_persona(
        &self,
        conversation_id: Uuid,
        persona: PersonaId,
    ) -> ServiceResult<()> {
        let mut state = self.lock()?;
        if let Some(chat) = state.chats.iter_mut().find(|c| c.id == conversation_id) {
            chat.persona = persona;
            self.persist(&state)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use greenbot_core::domain::Sender;

    fn store() -> (tempfile::TempDir, LocalStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalStore::open_at(&dir.path().join("local.json")).unwrap();
        (dir, store)
    }

    #[tokio::test]
    async fn upsert_inserts_newest_first_and_updates_in_place() {
        let (_dir, store) = store();
        let a = store
            .create_conversation("first", PersonaId::Greenbot, None)
            .await
            .unwrap();
        let b = store
            .create_conversation("second", PersonaId::Waste, None)
            .await
            .unwrap();

        let chats = store.load_all().unwrap();
        assert_eq!(chats.len(), 2);
        assert_eq!(chats[0].id, b.id);

        let mut chat = chats.into_iter().find(|c| c.id == a.id).unwrap();
        chat.title = "first, renamed".to_string();
        store.upsert_chat(chat).unwrap();

        let chats = store.load_all().unwrap();
        assert_eq!(chats.len(), 2);
        assert_eq!(chats[1].title, "first, renamed");
    }

    #[tokio::test]
    async fn append_then_load_preserves_order() {
        let (_dir, store) = store();
        let conv = store
            .create_conversation("ordering", PersonaId::Greenbot, None)
            .await
            .unwrap();
        for i in 0..5 {
            let msg = ChatMessage::user(format!("message {i}"));
            assert!(store.append_message(conv.id, &msg).await.unwrap());
        }
        let (_, messages) = store.conversation_with_messages(conv.id).await.unwrap();
        assert_eq!(messages.len(), 5);
        for pair in messages.windows(2) {
            assert!(pair[0].timestamp <= pair[1].timestamp);
        }
        assert_eq!(messages[0].content, "message 0");
        assert_eq!(messages[4].content, "message 4");
    }

    #[tokio::test]
    async fn append_to_unknown_chat_is_a_logged_noop() {
        let (_dir, store) = store();
        let msg = ChatMessage::user("hello");
        assert!(!store.append_message(Uuid::nil(), &msg).await.unwrap());
        assert!(!store.append_message(Uuid::new_v4(), &msg).await.unwrap());
    }

    #[tokio::test]
    async fn tombstone_wins_over_stale_mirror_data() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("local.json");

        // Seed a file where the mirrored list still contains a chat that was
        // already tombstoned.
        let stale = Uuid::new_v4();
        let kept = Uuid::new_v4();
        let raw = serde_json::json!({
            "chats": [
                { "id": stale, "title": "ghost", "persona": "greenbot",
                  "date": Utc::now(), "messages": [] },
                { "id": kept, "title": "alive", "persona": "greenbot",
                  "date": Utc::now(), "messages": [] },
            ],
            "deleted_chats": [stale],
        });
        std::fs::write(&path, raw.to_string()).unwrap();

        let store = LocalStore::open_at(&path).unwrap();
        let chats = store.load_all().unwrap();
        assert_eq!(chats.len(), 1);
        assert_eq!(chats[0].id, kept);
    }

    #[tokio::test]
    async fn delete_survives_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("local.json");
        let id;
        {
            let store = LocalStore::open_at(&path).unwrap();
            let conv = store
                .create_conversation("doomed", PersonaId::Greenbot, None)
                .await
                .unwrap();
            id = conv.id;
            store.delete_conversation(id).await.unwrap();
        }
        let reopened = LocalStore::open_at(&path).unwrap();
        assert!(reopened.load_all().unwrap().is_empty());
        assert!(matches!(
            reopened.conversation_with_messages(id).await,
            Err(ServiceError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn clear_chats_keeps_preferences() {
        let (_dir, store) = store();
        store
            .create_conversation("anon chat", PersonaId::Energy, None)
            .await
            .unwrap();
        store.set_cached_key(Provider::OpenAi, "sk-cached").unwrap();
        store.set_selected_provider(Provider::DeepSeek).unwrap();

        store.clear_chats().unwrap();
        assert!(store.load_all().unwrap().is_empty());
        assert_eq!(
            store.cached_key(Provider::OpenAi).unwrap().as_deref(),
            Some("sk-cached")
        );
        assert_eq!(
            store.selected_provider().unwrap(),
            Some(Provider::DeepSeek)
        );
    }

    #[test]
    fn bot_messages_keep_their_persona_tag() {
        let msg = ChatMessage::bot("hello", PersonaId::Climate);
        assert_eq!(msg.sender, Sender::Bot);
        let json = serde_json::to_string(&msg).unwrap();
        let back: ChatMessage = serde_json::from_str(&json).unwrap();
        assert_eq!(back.persona, Some(PersonaId::Climate));
    }
}
