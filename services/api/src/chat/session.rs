//! services/api/src/chat/session.rs
//!
//! The per-connection conversation state machine. A session starts with no
//! conversation and transitions to an active one on the first successful
//! send (lazy creation) or when the user opens a chat from history. The
//! async glue that persists messages and talks to the provider router lives
//! in the WebSocket handler; everything here is synchronous state.

use chrono::Utc;
use greenbot_core::domain::{
    ChatHistoryEntry, ChatMessage, ChatTurn, Conversation, Provider, Role, Sender,
};
use greenbot_core::persona::{system_prompt_for, PersonaId};
use greenbot_core::ports::ServiceError;
use uuid::Uuid;

/// Content of the transient placeholder shown while a reply is pending.
pub const PENDING_CONTENT: &str = "Thinking...";

/// How many prior transcript turns are sent to the provider.
const CONTEXT_WINDOW_TURNS: usize = 20;

const TITLE_MAX_CHARS: usize = 30;

/// Everything the caller needs to drive one in-flight send: the optimistic
/// user message, the pending placeholder to replace later (by id), and the
/// provider-ready turn list.
pub struct PendingSend {
    pub user: ChatMessage,
    pub placeholder: ChatMessage,
    pub turns: Vec<ChatTurn>,
    /// True when this send must lazily create the conversation.
    pub first_message: bool,
}

/// The stateful controller behind one chat connection.
pub struct ChatSession {
    persona: PersonaId,
    provider: Provider,
    conversation_id: Option<Uuid>,
    messages: Vec<ChatMessage>,
    history: Vec<ChatHistoryEntry>,
    /// The chat currently being loaded, if any. Guards `select_chat`
    /// idempotence while a load is in flight.
    loading: Option<Uuid>,
}

impl ChatSession {
    pub fn new(persona: PersonaId, provider: Provider) -> Self {
        Self {
            persona,
            provider,
            conversation_id: None,
            messages: vec![ChatMessage::bot(persona.welcome_message(), persona)],
            history: Vec::new(),
            loading: None,
        }
    }

    pub fn persona(&self) -> PersonaId {
        self.persona
    }

    pub fn provider(&self) -> Provider {
        self.provider
    }

    pub fn set_provider(&mut self, provider: Provider) {
        self.provider = provider;
    }

    pub fn conversation_id(&self) -> Option<Uuid> {
        self.conversation_id
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn history(&self) -> &[ChatHistoryEntry] {
        &self.history
    }

    /// Replaces the sidebar history with freshly listed conversations.
    pub fn set_history(&mut self, conversations: &[Conversation]) {
        let selected = self.conversation_id;
        self.history = conversations
            .iter()
            .map(|c| ChatHistoryEntry {
                id: c.id,
                title: c.title.clone(),
                date: c.updated_at,
                selected: Some(c.id) == selected,
            })
            .collect();
    }

    /// Derives a conversation title from its first message: the first 30
    /// characters, with an ellipsis when the message is longer.
    pub fn derive_title(content: &str) -> String {
        let chars: Vec<char> = content.chars().collect();
        if chars.len() > TITLE_MAX_CHARS {
            let head: String = chars[..TITLE_MAX_CHARS].iter().collect();
            format!("{head}...")
        } else {
            content.to_string()
        }
    }

    /// Starts a send. Returns `None` on blank input (a no-op). Otherwise
    /// appends the user message and a pending placeholder to the transcript
    /// and hands back the provider-ready turn list: the persona's system
    /// prompt, the most recent transcript turns, and the new user turn.
    pub fn begin_send(&mut self, content: &str) -> Option<PendingSend> {
        let content = content.trim();
        if content.is_empty() {
            return None;
        }

        let mut turns = Vec::with_capacity(self.messages.len() + 2);
        turns.push(ChatTurn::new(
            Role::System,
            system_prompt_for(self.persona.display_name()),
        ));
        let window_start = self.messages.len().saturating_sub(CONTEXT_WINDOW_TURNS);
        for message in &self.messages[window_start..] {
            turns.push(ChatTurn::new(
                message.sender.as_role(),
                message.content.clone(),
            ));
        }
        turns.push(ChatTurn::new(Role::User, content));

        let user = ChatMessage::user(content);
        let placeholder = ChatMessage::bot(PENDING_CONTENT, self.persona);
        self.messages.push(user.clone());
        self.messages.push(placeholder.clone());

        Some(PendingSend {
            user,
            placeholder,
            turns,
            first_message: self.conversation_id.is_none(),
        })
    }

    /// Records the lazily created conversation and selects it in history.
    pub fn note_conversation(&mut self, conversation: &Conversation) {
        self.conversation_id = Some(conversation.id);
        for entry in &mut self.history {
            entry.selected = false;
        }
        self.history.insert(
            0,
            ChatHistoryEntry {
                id: conversation.id,
                title: conversation.title.clone(),
                date: conversation.updated_at,
                selected: true,
            },
        );
    }

    /// Replaces the pending placeholder with the final content: the reply
    /// text on success, a user-facing error message otherwise. Matching is
    /// by message id, never by position: messages appended while the call
    /// was in flight stay untouched. Returns the finalized message, or
    /// `None` if the placeholder is gone (e.g. the transcript was reset).
    pub fn resolve_pending(
        &mut self,
        placeholder_id: Uuid,
        outcome: &Result<String, ServiceError>,
    ) -> Option<ChatMessage> {
        let message = self
            .messages
            .iter_mut()
            .find(|m| m.id == placeholder_id)?;
        message.content = match outcome {
            Ok(text) => text.clone(),
            Err(e) => user_facing_message(e),
        };
        message.timestamp = Utc::now();
        Some(message.clone())
    }

    /// Resets to a fresh transcript with the current persona's welcome
    /// message. Deselects history; deletes nothing.
    pub fn new_chat(&mut self) {
        self.conversation_id = None;
        self.loading = None;
        self.messages = vec![ChatMessage::bot(
            self.persona.welcome_message(),
            self.persona,
        )];
        for entry in &mut self.history {
            entry.selected = false;
        }
    }

    /// Begins selecting a chat. Returns `false` (no load should happen) when
    /// the chat is already selected or a load for it is already in flight.
    pub fn select_chat(&mut self, id: Uuid) -> bool {
        if self.conversation_id == Some(id) || self.loading == Some(id) {
            return false;
        }
        self.loading = Some(id);
        true
    }

    /// Installs a loaded conversation. The current persona is inferred from
    /// the most recent bot message carrying a persona tag, falling back to
    /// the primary persona.
    pub fn finish_select(&mut self, conversation: &Conversation, messages: Vec<ChatMessage>) {
        self.loading = None;
        self.conversation_id = Some(conversation.id);
        self.persona = messages
            .iter()
            .rev()
            .find(|m| m.sender == Sender::Bot)
            .and_then(|m| m.persona)
            .unwrap_or_default();
        self.messages = if messages.is_empty() {
            vec![ChatMessage::bot(
                self.persona.welcome_message(),
                self.persona,
            )]
        } else {
            messages
        };
        for entry in &mut self.history {
            entry.selected = entry.id == conversation.id;
        }
    }

    /// Abandons an in-flight select after a load failure.
    pub fn abort_select(&mut self, id: Uuid) {
        if self.loading == Some(id) {
            self.loading = None;
        }
    }

    /// Removes a deleted chat from history; if it was the active one, the
    /// transcript resets as if `new_chat` had been called.
    pub fn forget_chat(&mut self, id: Uuid) {
        self.history.retain(|entry| entry.id != id);
        if self.conversation_id == Some(id) {
            self.new_chat();
        }
    }

    /// Switches persona. The most recent bot message is replaced with the
    /// new persona's introduction; if the transcript has no bot message yet,
    /// the introduction is appended instead. Returns the intro message.
    pub fn change_persona(&mut self, persona: PersonaId) -> ChatMessage {
        self.persona = persona;
        let intro = ChatMessage::bot(persona.welcome_message(), persona);
        match self.messages.iter().rposition(|m| m.sender == Sender::Bot) {
            Some(index) => self.messages[index] = intro.clone(),
            None => self.messages.push(intro.clone()),
        }
        intro
    }
}

/// Maps a normalized error to the message shown in place of the reply.
pub fn user_facing_message(error: &ServiceError) -> String {
    match error {
        ServiceError::AuthRequired => {
            "You must be logged in to use the chat. Please sign in and try again.".to_string()
        }
        ServiceError::MissingCredential(provider) => format!(
            "No {} API key configured. Please add your API keys in Settings.",
            provider.as_str().to_uppercase()
        ),
        ServiceError::Provider { status: 401, .. } => {
            "Your API key was rejected. Please check it in Settings and try again.".to_string()
        }
        ServiceError::Provider { status, body }
            if *status == 402 || body.contains("insufficient_quota") =>
        {
            "Your API account has insufficient credits. Please add credits to your API provider account."
                .to_string()
        }
        ServiceError::Provider { status, body }
            if *status == 429 || body.contains("rate limit") =>
        {
            "You've hit the rate limit. Please try again in a few minutes.".to_string()
        }
        ServiceError::Provider { .. } => {
            "The AI service rejected the request. Please try again later.".to_string()
        }
        ServiceError::Network(_) => {
            "Failed to communicate with the AI service. Please try again.".to_string()
        }
        _ => "I'm sorry, I couldn't process your request. Please try again later.".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session() -> ChatSession {
        ChatSession::new(PersonaId::Greenbot, Provider::OpenAi)
    }

    #[test]
    fn starts_with_a_welcome_message_and_no_conversation() {
        let session = session();
        assert!(session.conversation_id().is_none());
        assert_eq!(session.messages().len(), 1);
        assert_eq!(session.messages()[0].sender, Sender::Bot);
        assert_eq!(
            session.messages()[0].content,
            PersonaId::Greenbot.welcome_message()
        );
    }

    #[test]
    fn blank_input_is_a_noop() {
        let mut session = session();
        assert!(session.begin_send("").is_none());
        assert!(session.begin_send("   \n\t").is_none());
        assert_eq!(session.messages().len(), 1);
    }

    #[test]
    fn begin_send_appends_user_and_placeholder() {
        let mut session = session();
        let pending = session.begin_send("How do I start composting?").unwrap();

        assert!(pending.first_message);
        assert_eq!(session.messages().len(), 3);
        assert_eq!(session.messages()[1].id, pending.user.id);
        assert_eq!(session.messages()[2].id, pending.placeholder.id);
        assert_eq!(session.messages()[2].content, PENDING_CONTENT);

        // System prompt, welcome turn, and the fresh user turn.
        assert_eq!(pending.turns.len(), 3);
        assert_eq!(pending.turns[0].role, Role::System);
        assert_eq!(pending.turns[2].role, Role::User);
        assert_eq!(pending.turns[2].content, "How do I start composting?");
    }

    #[test]
    fn context_window_caps_history_turns() {
        let mut session = session();
        for i in 0..30 {
            let pending = session.begin_send(&format!("message {i}")).unwrap();
            session.resolve_pending(pending.placeholder.id, &Ok(format!("reply {i}")));
        }
        let pending = session.begin_send("latest").unwrap();
        // system + capped window + new user turn
        assert_eq!(pending.turns.len(), 1 + 20 + 1);
        assert_eq!(pending.turns.last().unwrap().content, "latest");
    }

    #[test]
    fn resolve_matches_by_id_not_position() {
        let mut session = session();
        let pending = session.begin_send("first question").unwrap();

        // Another message lands while the call is in flight.
        let racing = session.begin_send("second question").unwrap();

        let resolved = session
            .resolve_pending(pending.placeholder.id, &Ok("first answer".to_string()))
            .unwrap();
        assert_eq!(resolved.id, pending.placeholder.id);

        let contents: Vec<&str> = session
            .messages()
            .iter()
            .map(|m| m.content.as_str())
            .collect();
        // The first placeholder resolved in place; the second is still pending.
        assert!(contents.contains(&"first answer"));
        assert_eq!(
            session
                .messages()
                .iter()
                .filter(|m| m.content == PENDING_CONTENT)
                .count(),
            1
        );
        assert_eq!(
            session
                .messages()
                .iter()
                .find(|m| m.id == racing.placeholder.id)
                .unwrap()
                .content,
            PENDING_CONTENT
        );
    }

    #[test]
    fn resolve_failure_replaces_with_user_facing_text() {
        let mut session = session();
        let pending = session.begin_send("hello").unwrap();
        let err = ServiceError::Provider {
            status: 402,
            body: "insufficient_quota".into(),
        };
        let resolved = session
            .resolve_pending(pending.placeholder.id, &Err(err))
            .unwrap();
        assert!(resolved.content.contains("insufficient credits"));
        // Exactly one finalized message replaced the placeholder.
        assert_eq!(session.messages().len(), 3);
    }

    #[test]
    fn title_derivation_truncates_at_thirty_chars() {
        let long = "This is a very long opening question about solar panels and cost";
        let title = ChatSession::derive_title(long);
        assert_eq!(title, format!("{}...", &long[..30]));
        assert_eq!(title.chars().count(), 33);

        assert_eq!(ChatSession::derive_title("Hello"), "Hello");
        let exactly_30 = "a".repeat(30);
        assert_eq!(ChatSession::derive_title(&exactly_30), exactly_30);
    }

    #[test]
    fn select_chat_is_idempotent_while_loading() {
        let mut session = session();
        let id = Uuid::new_v4();
        assert!(session.select_chat(id));
        // Second call while the load is in flight: no second load.
        assert!(!session.select_chat(id));

        let conversation = Conversation {
            id,
            title: "loaded".into(),
            persona: PersonaId::Greenbot,
            user_id: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        session.finish_select(&conversation, vec![]);
        // Already selected: still a no-op.
        assert!(!session.select_chat(id));
        // A different chat loads fine.
        assert!(session.select_chat(Uuid::new_v4()));
    }

    #[test]
    fn finish_select_infers_persona_from_last_bot_message() {
        let mut session = session();
        let id = Uuid::new_v4();
        session.select_chat(id);

        let conversation = Conversation {
            id,
            title: "energy talk".into(),
            persona: PersonaId::Energy,
            user_id: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        let messages = vec![
            ChatMessage::bot("welcome", PersonaId::Greenbot),
            ChatMessage::user("tell me about heat pumps"),
            ChatMessage::bot("heat pumps move heat", PersonaId::Energy),
        ];
        session.finish_select(&conversation, messages);
        assert_eq!(session.persona(), PersonaId::Energy);
        assert_eq!(session.conversation_id(), Some(id));
    }

    #[test]
    fn finish_select_defaults_persona_without_bot_tags() {
        let mut session = ChatSession::new(PersonaId::Climate, Provider::OpenAi);
        let id = Uuid::new_v4();
        session.select_chat(id);
        let conversation = Conversation {
            id,
            title: "untagged".into(),
            persona: PersonaId::Climate,
            user_id: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        session.finish_select(&conversation, vec![ChatMessage::user("only me here")]);
        assert_eq!(session.persona(), PersonaId::Greenbot);
    }

    #[test]
    fn new_chat_resets_without_deleting_history() {
        let mut session = session();
        let conversation = Conversation {
            id: Uuid::new_v4(),
            title: "kept".into(),
            persona: PersonaId::Greenbot,
            user_id: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        session.note_conversation(&conversation);
        session.begin_send("some content");

        session.new_chat();
        assert!(session.conversation_id().is_none());
        assert_eq!(session.messages().len(), 1);
        assert_eq!(session.history().len(), 1);
        assert!(!session.history()[0].selected);
    }

    #[test]
    fn change_persona_replaces_most_recent_bot_message() {
        let mut session = session();
        let pending = session.begin_send("hi").unwrap();
        session.resolve_pending(pending.placeholder.id, &Ok("hello!".to_string()));

        let intro = session.change_persona(PersonaId::Waste);
        assert_eq!(session.persona(), PersonaId::Waste);
        let last = session.messages().last().unwrap();
        assert_eq!(last.id, intro.id);
        assert_eq!(last.content, PersonaId::Waste.welcome_message());
        // The transcript did not grow: the bot message was replaced in place.
        assert_eq!(session.messages().len(), 3);
    }

    #[test]
    fn error_messages_distinguish_failure_classes() {
        let invalid = user_facing_message(&ServiceError::Provider {
            status: 401,
            body: "bad key".into(),
        });
        assert!(invalid.contains("API key was rejected"));

        let billing = user_facing_message(&ServiceError::Provider {
            status: 400,
            body: "insufficient_quota: top up".into(),
        });
        assert!(billing.contains("insufficient credits"));

        let network = user_facing_message(&ServiceError::Network("timeout".into()));
        assert!(network.contains("try again"));

        let missing = user_facing_message(&ServiceError::MissingCredential(Provider::Grok));
        assert!(missing.contains("GROK"));
    }
}
