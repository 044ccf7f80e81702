pub mod domain;
pub mod persona;
pub mod ports;
pub mod quiz;

pub use domain::{
    AuthContext, ChatHistoryEntry, ChatMessage, ChatTurn, Conversation, CredentialRecord,
    CredentialUpdate, Provider, QuizAnswer, QuizResult, Role, Sender, User, UserCredentials,
};
pub use persona::{system_prompt_for, PersonaId};
pub use ports::{
    ChatService, ConversationRepository, CredentialStore, QuizStore, ServiceError, ServiceResult,
    SessionProvider,
};
