//! services/api/src/web/ws_handler.rs
//!
//! This is the main entry point and control loop for a chat WebSocket
//! connection. It resolves the caller's identity once at Init, injects the
//! matching conversation repository (remote for authenticated users, local
//! mirror otherwise) and a per-connection provider dispatcher, then drives
//! the [`ChatSession`] state machine from client messages.
//!
//! The loop is sequential: one client message is fully handled before the
//! next is read. There is no cancellation and no de-duplication; a rapid
//! double-send from two tabs races two placeholder/response pairs.

use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::Response,
};
use futures::{stream::SplitSink, SinkExt, StreamExt};
use greenbot_core::domain::{AuthContext, Provider};
use greenbot_core::persona::PersonaId;
use greenbot_core::ports::{ChatService, ConversationRepository, SessionProvider};
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::chat::{ChatDispatcher, ChatSession, SessionHandle};
use crate::web::protocol::{ClientMessage, ServerMessage};
use crate::web::state::AppState;

/// The handler for upgrading HTTP requests to WebSocket connections.
///
/// The route is public: anonymous sessions are first-class and identity is
/// established by the Init message, not by middleware.
pub async fn ws_handler(ws: WebSocketUpgrade, State(app_state): State<Arc<AppState>>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, app_state))
}

/// Everything one live connection needs: the shared app state, the injected
/// repository and dispatcher, and the session state machine.
struct Connection {
    app_state: Arc<AppState>,
    auth: SessionHandle,
    repo: Arc<dyn ConversationRepository>,
    chat: Arc<dyn ChatService>,
    session: ChatSession,
    sender: SplitSink<WebSocket, Message>,
}

impl Connection {
    /// Sends one protocol message. Returns `false` when the client is gone.
    async fn send(&mut self, message: &ServerMessage) -> bool {
        let json = match serde_json::to_string(message) {
            Ok(json) => json,
            Err(e) => {
                error!("Failed to serialize server message: {e}");
                return true;
            }
        };
        self.sender.send(Message::Text(json.into())).await.is_ok()
    }

    fn user_id(&self) -> Option<Uuid> {
        self.auth.current().map(|ctx| ctx.user_id)
    }

    /// Re-selects the repository after a session change and reloads history.
    async fn sync_session(&mut self) {
        let authenticated = self.user_id().is_some();
        self.repo = if authenticated {
            self.app_state.db.clone()
        } else {
            self.app_state.local.clone()
        };
        self.session.new_chat();
        self.reload_history().await;
        let ready = self.session_ready(authenticated);
        self.send(&ready).await;
    }

    async fn reload_history(&mut self) {
        match self.repo.list_conversations(self.user_id()).await {
            Ok(conversations) => self.session.set_history(&conversations),
            Err(e) => {
                error!("Failed to list conversations: {e}");
                self.session.set_history(&[]);
            }
        }
    }

    fn session_ready(&self, authenticated: bool) -> ServerMessage {
        ServerMessage::SessionReady {
            authenticated,
            persona: self.session.persona(),
            provider: self.session.provider(),
            theme: self.app_state.local.theme().ok().flatten(),
            messages: self.session.messages().to_vec(),
            history: self.session.history().to_vec(),
        }
    }

    //=====================================================================================
    // Client Message Handling
    //=====================================================================================

    async fn handle(&mut self, message: ClientMessage) {
        match message {
            ClientMessage::Init { .. } => {
                warn!("Received subsequent Init message, which is ignored.");
            }
            ClientMessage::Authenticate { access_token } => {
                self.authenticate(access_token).await;
            }
            ClientMessage::SignOut => {
                self.auth.clear();
                self.sync_session().await;
            }
            ClientMessage::SendMessage { content } => {
                self.process_send(&content).await;
            }
            ClientMessage::NewChat => {
                self.session.new_chat();
                let reset = ServerMessage::ChatReset {
                    message: self.session.messages()[0].clone(),
                };
                self.send(&reset).await;
            }
            ClientMessage::SelectChat { id } => {
                self.select_chat(id).await;
            }
            ClientMessage::DeleteChat { id } => {
                self.delete_chat(id).await;
            }
            ClientMessage::ChangePersona { persona } => {
                self.change_persona(persona).await;
            }
            ClientMessage::SetProvider { provider } => {
                self.set_provider(provider).await;
            }
            ClientMessage::CacheProviderKey { provider, key } => {
                if let Err(e) = self.app_state.local.set_cached_key(provider, &key) {
                    error!(%provider, "Failed to cache provider key: {e}");
                    let failure = ServerMessage::Error {
                        message: "Failed to store the provider key.".to_string(),
                    };
                    self.send(&failure).await;
                }
            }
            ClientMessage::SetTheme { theme } => {
                if let Err(e) = self.app_state.local.set_theme(&theme) {
                    warn!("Failed to store theme preference: {e}");
                }
            }
        }
    }

    /// The send-message flow: optimistic user message + pending placeholder,
    /// lazy conversation creation on the first message, provider dispatch,
    /// then placeholder resolution (by id) and persistence of the finalized
    /// pair through the injected repository.
    async fn process_send(&mut self, content: &str) {
        let Some(pending) = self.session.begin_send(content) else {
            return;
        };
        let appended = ServerMessage::MessageAppended {
            message: pending.user.clone(),
        };
        self.send(&appended).await;
        let placeholder = ServerMessage::MessagePending {
            message: pending.placeholder.clone(),
        };
        self.send(&placeholder).await;

        // First message in a fresh session: create the conversation with a
        // title derived from the message.
        if pending.first_message {
            let title = ChatSession::derive_title(content.trim());
            match self
                .repo
                .create_conversation(&title, self.session.persona(), self.user_id())
                .await
            {
                Ok(conversation) => {
                    self.session.note_conversation(&conversation);
                    let started = ServerMessage::ChatStarted { conversation };
                    self.send(&started).await;
                }
                Err(e) => {
                    // The transcript stays usable in memory; persistence of
                    // this exchange is skipped.
                    error!("Failed to create conversation: {e}");
                }
            }
        }

        if let Some(conversation_id) = self.session.conversation_id() {
            self.persist_message(conversation_id, &pending.user).await;
        }

        let outcome = self
            .chat
            .send_chat(&pending.turns, self.session.provider())
            .await;
        if let Err(e) = &outcome {
            warn!(provider = %self.session.provider(), "Chat dispatch failed: {e}");
        }

        let Some(finalized) = self.session.resolve_pending(pending.placeholder.id, &outcome)
        else {
            // The transcript was reset while the call was in flight.
            return;
        };
        let resolution = if outcome.is_ok() {
            ServerMessage::MessageResolved {
                message: finalized.clone(),
            }
        } else {
            ServerMessage::MessageFailed {
                message: finalized.clone(),
            }
        };
        self.send(&resolution).await;

        if let Some(conversation_id) = self.session.conversation_id() {
            self.persist_message(conversation_id, &finalized).await;
        }
    }

    async fn persist_message(
        &mut self,
        conversation_id: Uuid,
        message: &greenbot_core::domain::ChatMessage,
    ) {
        match self.repo.append_message(conversation_id, message).await {
            Ok(true) => {}
            Ok(false) => {
                warn!(%conversation_id, "Message save skipped: invalid conversation id");
            }
            Err(e) => {
                error!(%conversation_id, "Failed to save message: {e}");
            }
        }
    }

    async fn select_chat(&mut self, id: Uuid) {
        // Repeat selects and selects racing an in-flight load are no-ops.
        if !self.session.select_chat(id) {
            return;
        }
        match self.repo.conversation_with_messages(id).await {
            Ok((conversation, messages)) => {
                self.session.finish_select(&conversation, messages);
                let selected = ServerMessage::ChatSelected {
                    conversation,
                    persona: self.session.persona(),
                    messages: self.session.messages().to_vec(),
                };
                self.send(&selected).await;
            }
            Err(e) => {
                self.session.abort_select(id);
                error!(%id, "Failed to load chat: {e}");
                let failure = ServerMessage::Error {
                    message: "Failed to load chat.".to_string(),
                };
                self.send(&failure).await;
            }
        }
    }

    async fn delete_chat(&mut self, id: Uuid) {
        match self.repo.delete_conversation(id).await {
            Ok(()) => {
                self.session.forget_chat(id);
                let deleted = ServerMessage::ChatDeleted { id };
                self.send(&deleted).await;
            }
            Err(e) => {
                error!(%id, "Failed to delete chat: {e}");
                let failure = ServerMessage::Error {
                    message: "Failed to delete chat.".to_string(),
                };
                self.send(&failure).await;
            }
        }
    }

    async fn change_persona(&mut self, persona: PersonaId) {
        let intro = self.session.change_persona(persona);
        let changed = ServerMessage::PersonaChanged {
            persona,
            message: intro,
        };
        self.send(&changed).await;

        // Persist the persona change against the active conversation.
        if let Some(conversation_id) = self.session.conversation_id() {
            if let Err(e) = self
                .repo
                .set_conversation_persona(conversation_id, persona)
                .await
            {
                error!(%conversation_id, "Failed to update conversation persona: {e}");
            }
        }
    }

    async fn set_provider(&mut self, provider: Provider) {
        self.session.set_provider(provider);
        if let Err(e) = self.app_state.local.set_selected_provider(provider) {
            warn!("Failed to store provider preference: {e}");
        }
        let changed = ServerMessage::ProviderChanged { provider };
        self.send(&changed).await;
    }

    async fn authenticate(&mut self, access_token: String) {
        match self.app_state.db.validate_auth_session(&access_token).await {
            Ok(user_id) => {
                self.auth.set(AuthContext {
                    user_id,
                    access_token,
                });
                // Local chats are never imported into an account; the mirror
                // is cleared to avoid cross-account leakage.
                if let Err(e) = self.app_state.local.clear_chats() {
                    warn!("Failed to clear local mirror: {e}");
                }
                self.sync_session().await;
            }
            Err(e) => {
                warn!("Authenticate rejected: {e}");
                let failure = ServerMessage::Error {
                    message: "Session expired. Please sign in again.".to_string(),
                };
                self.send(&failure).await;
            }
        }
    }
}

async fn handle_socket(socket: WebSocket, app_state: Arc<AppState>) {
    let (sender, mut receiver) = socket.split();

    // --- 1. Initialization Phase ---
    let init_token = match receiver.next().await {
        Some(Ok(Message::Text(init_json))) => {
            match serde_json::from_str::<ClientMessage>(&init_json) {
                Ok(ClientMessage::Init { access_token }) => access_token,
                _ => {
                    error!("First message was not a valid Init message.");
                    return;
                }
            }
        }
        _ => {
            error!("Client disconnected before sending Init message.");
            return;
        }
    };

    // Resolve the identity once; an invalid token degrades to anonymous.
    let auth = SessionHandle::anonymous();
    if let Some(token) = init_token {
        match app_state.db.validate_auth_session(&token).await {
            Ok(user_id) => auth.set(AuthContext {
                user_id,
                access_token: token,
            }),
            Err(e) => warn!("Init token rejected, starting anonymous session: {e}"),
        }
    }

    let authenticated = auth.current().is_some();
    info!(authenticated, "New chat WebSocket connection established");

    let repo: Arc<dyn ConversationRepository> = if authenticated {
        app_state.db.clone()
    } else {
        app_state.local.clone()
    };
    let chat: Arc<dyn ChatService> = Arc::new(ChatDispatcher::new(
        app_state.http.clone(),
        app_state.config.relay_url.clone(),
        app_state.config.routing_mode,
        Arc::new(auth.clone()),
        app_state.local.clone(),
    ));

    let provider = app_state
        .local
        .selected_provider()
        .ok()
        .flatten()
        .unwrap_or(Provider::OpenAi);
    let session = ChatSession::new(PersonaId::Greenbot, provider);

    let mut connection = Connection {
        app_state,
        auth,
        repo,
        chat,
        session,
        sender,
    };
    connection.reload_history().await;
    let ready = connection.session_ready(authenticated);
    if !connection.send(&ready).await {
        error!("Failed to send session ready message.");
        return;
    }

    // --- 2. Main Message Loop ---
    loop {
        match receiver.next().await {
            Some(Ok(Message::Text(text))) => {
                match serde_json::from_str::<ClientMessage>(&text) {
                    Ok(client_msg) => connection.handle(client_msg).await,
                    Err(e) => warn!("Failed to deserialize client message: {e}"),
                }
            }
            Some(Ok(Message::Close(_))) => {
                info!("Client sent close message.");
                break;
            }
            Some(Ok(_)) => {}
            _ => {
                info!("Client disconnected.");
                break;
            }
        }
    }

    info!("WebSocket connection closed.");
}
