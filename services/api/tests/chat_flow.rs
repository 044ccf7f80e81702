//! End-to-end exercise of the anonymous chat flow: the session state
//! machine, the local mirror repository, and a canned provider router wired
//! together the same way the WebSocket handler wires them.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use greenbot_api::adapters::local_store::LocalStore;
use greenbot_api::chat::{ChatSession, PENDING_CONTENT};
use greenbot_core::domain::{ChatTurn, Provider, Sender};
use greenbot_core::persona::PersonaId;
use greenbot_core::ports::{
    ChatService, ConversationRepository, ServiceError, ServiceResult,
};

/// A provider router that returns a canned outcome and counts calls.
struct CannedChat {
    reply: Option<String>,
    calls: AtomicUsize,
}

impl CannedChat {
    fn answering(reply: &str) -> Self {
        Self {
            reply: Some(reply.to_string()),
            calls: AtomicUsize::new(0),
        }
    }

    fn failing() -> Self {
        Self {
            reply: None,
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl ChatService for CannedChat {
    async fn send_chat(&self, _history: &[ChatTurn], _provider: Provider) -> ServiceResult<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match &self.reply {
            Some(reply) => Ok(reply.clone()),
            None => Err(ServiceError::Network("connection refused".into())),
        }
    }
}

/// Runs one send through the same sequence the connection handler uses.
async fn run_send(
    session: &mut ChatSession,
    repo: &Arc<LocalStore>,
    chat: &Arc<CannedChat>,
    content: &str,
) {
    let Some(pending) = session.begin_send(content) else {
        return;
    };

    if pending.first_message {
        let title = ChatSession::derive_title(content.trim());
        let conversation = repo
            .create_conversation(&title, session.persona(), None)
            .await
            .expect("conversation should be created");
        session.note_conversation(&conversation);
    }

    let conversation_id = session.conversation_id().expect("conversation id is set");
    assert!(repo
        .append_message(conversation_id, &pending.user)
        .await
        .unwrap());

    let outcome = chat.send_chat(&pending.turns, session.provider()).await;
    let finalized = session
        .resolve_pending(pending.placeholder.id, &outcome)
        .expect("placeholder still present");
    assert!(repo
        .append_message(conversation_id, &finalized)
        .await
        .unwrap());
}

#[tokio::test]
async fn first_unauthenticated_send_creates_a_two_message_local_chat() {
    let dir = tempfile::tempdir().unwrap();
    let repo = Arc::new(LocalStore::open_at(&dir.path().join("local.json")).unwrap());
    let chat = Arc::new(CannedChat::answering("Hi! Ask me anything green."));
    let mut session = ChatSession::new(PersonaId::Greenbot, Provider::OpenAi);

    run_send(&mut session, &repo, &chat, "Hello").await;

    let chats = repo.load_all().unwrap();
    assert_eq!(chats.len(), 1);
    assert_eq!(chats[0].title, "Hello");
    assert_eq!(chats[0].messages.len(), 2);
    assert_eq!(chats[0].messages[0].sender, Sender::User);
    assert_eq!(chats[0].messages[0].content, "Hello");
    assert_eq!(chats[0].messages[1].sender, Sender::Bot);
    assert_eq!(chats[0].messages[1].content, "Hi! Ask me anything green.");
    assert_eq!(chat.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn failed_dispatch_persists_an_error_reply_instead() {
    let dir = tempfile::tempdir().unwrap();
    let repo = Arc::new(LocalStore::open_at(&dir.path().join("local.json")).unwrap());
    let chat = Arc::new(CannedChat::failing());
    let mut session = ChatSession::new(PersonaId::Greenbot, Provider::OpenAi);

    run_send(&mut session, &repo, &chat, "Hello").await;

    let chats = repo.load_all().unwrap();
    assert_eq!(chats.len(), 1);
    assert_eq!(chats[0].messages.len(), 2);
    let reply = &chats[0].messages[1];
    assert_eq!(reply.sender, Sender::Bot);
    assert_ne!(reply.content, PENDING_CONTENT);
    assert!(reply.content.contains("try again"));
}

#[tokio::test]
async fn long_first_message_gets_a_truncated_title() {
    let dir = tempfile::tempdir().unwrap();
    let repo = Arc::new(LocalStore::open_at(&dir.path().join("local.json")).unwrap());
    let chat = Arc::new(CannedChat::answering("ok"));
    let mut session = ChatSession::new(PersonaId::Greenbot, Provider::OpenAi);

    let content = "This is a very long opening question about solar panels and cost";
    run_send(&mut session, &repo, &chat, content).await;

    let chats = repo.load_all().unwrap();
    assert_eq!(chats[0].title, format!("{}...", &content[..30]));
}

#[tokio::test]
async fn followup_sends_reuse_the_conversation() {
    let dir = tempfile::tempdir().unwrap();
    let repo = Arc::new(LocalStore::open_at(&dir.path().join("local.json")).unwrap());
    let chat = Arc::new(CannedChat::answering("answer"));
    let mut session = ChatSession::new(PersonaId::Greenbot, Provider::OpenAi);

    run_send(&mut session, &repo, &chat, "first").await;
    run_send(&mut session, &repo, &chat, "second").await;

    let chats = repo.load_all().unwrap();
    assert_eq!(chats.len(), 1);
    assert_eq!(chats[0].messages.len(), 4);
    // Messages load back in non-decreasing timestamp order.
    let (_, messages) = repo
        .conversation_with_messages(chats[0].id)
        .await
        .unwrap();
    for pair in messages.windows(2) {
        assert!(pair[0].timestamp <= pair[1].timestamp);
    }
}
