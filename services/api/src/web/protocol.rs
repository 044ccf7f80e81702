//! services/api/src/web/protocol.rs
//!
//! Defines the WebSocket message protocol between the browser client and the
//! API server for the chat application.

use greenbot_core::domain::{ChatHistoryEntry, ChatMessage, Conversation, Provider};
use greenbot_core::persona::PersonaId;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

//=========================================================================================
// Messages Sent FROM the Client (Browser) TO the Server
//=========================================================================================

/// Represents the structured text messages a client can send to the server.
#[derive(Deserialize, Debug)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Opens a session. This must be the first message sent on the
    /// connection; a missing or invalid token starts an anonymous session
    /// backed by the local mirror.
    Init { access_token: Option<String> },

    /// Upgrades an anonymous session after the user signs in. The local
    /// mirror is cleared, never merged into the account.
    Authenticate { access_token: String },

    /// Drops the signed-in identity and falls back to the local mirror.
    SignOut,

    /// Sends a chat message. Blank content is ignored.
    SendMessage { content: String },

    /// Starts a fresh chat. Resets the transcript only; deletes nothing.
    NewChat,

    /// Opens a chat from history. A repeat select for the same chat is a
    /// no-op.
    SelectChat { id: Uuid },

    /// Deletes a chat and its messages.
    DeleteChat { id: Uuid },

    ChangePersona { persona: PersonaId },

    SetProvider { provider: Provider },

    /// Caches a provider key for the direct routing mode. Only meaningful
    /// when the server runs with direct routing; the relay never needs it.
    CacheProviderKey { provider: Provider, key: String },

    /// Stores the UI theme preference.
    SetTheme { theme: String },
}

//=========================================================================================
// Messages Sent FROM the Server TO the Client (Browser)
//=========================================================================================

/// Represents the structured text messages the server can send to the client.
#[derive(Serialize, Debug, Clone)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Confirms session setup (also re-sent after Authenticate/SignOut).
    SessionReady {
        authenticated: bool,
        persona: PersonaId,
        provider: Provider,
        theme: Option<String>,
        messages: Vec<ChatMessage>,
        history: Vec<ChatHistoryEntry>,
    },

    /// The user's message was accepted into the transcript.
    MessageAppended { message: ChatMessage },

    /// A placeholder reply is pending; it will be resolved or failed by id.
    MessagePending { message: ChatMessage },

    /// The pending placeholder resolved into the real reply.
    MessageResolved { message: ChatMessage },

    /// The pending placeholder was replaced with an error message.
    MessageFailed { message: ChatMessage },

    /// A conversation was lazily created for the first message.
    ChatStarted { conversation: Conversation },

    /// The transcript was reset to a fresh welcome message.
    ChatReset { message: ChatMessage },

    /// A chat from history finished loading.
    ChatSelected {
        conversation: Conversation,
        persona: PersonaId,
        messages: Vec<ChatMessage>,
    },

    ChatDeleted { id: Uuid },

    /// The persona switched; `message` replaced the most recent bot message
    /// (or was appended if there was none).
    PersonaChanged {
        persona: PersonaId,
        message: ChatMessage,
    },

    ProviderChanged { provider: Provider },

    /// Reports a recoverable error the client should surface inline.
    Error { message: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_messages_deserialize_from_tagged_json() {
        let msg: ClientMessage =
            serde_json::from_str(r#"{"type":"send_message","content":"Hello"}"#).unwrap();
        assert!(matches!(msg, ClientMessage::SendMessage { content } if content == "Hello"));

        let msg: ClientMessage =
            serde_json::from_str(r#"{"type":"change_persona","persona":"waste"}"#).unwrap();
        assert!(matches!(
            msg,
            ClientMessage::ChangePersona {
                persona: PersonaId::Waste
            }
        ));

        let msg: ClientMessage =
            serde_json::from_str(r#"{"type":"set_provider","provider":"deepseek"}"#).unwrap();
        assert!(matches!(
            msg,
            ClientMessage::SetProvider {
                provider: Provider::DeepSeek
            }
        ));
    }

    #[test]
    fn server_messages_serialize_with_type_tags() {
        let msg = ServerMessage::ChatDeleted { id: Uuid::nil() };
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["type"], "chat_deleted");

        let msg = ServerMessage::Error {
            message: "nope".into(),
        };
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["type"], "error");
        assert_eq!(json["message"], "nope");
    }
}
