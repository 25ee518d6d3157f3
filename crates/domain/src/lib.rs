//! PetZone 聊天核心领域模型
//!
//! 包含用户、会话、参与者、消息等实体，WebSocket 事件的强类型定义，
//! 以及统一的错误类型。领域层不依赖任何 IO。

pub mod conversation;
pub mod errors;
pub mod events;
pub mod message;
pub mod user;
pub mod value_objects;

pub use conversation::{
    Conversation, ConversationDetail, ConversationSummary, PairKey, Participant,
};
pub use errors::{DomainError, RepositoryError};
pub use events::{
    ClientEvent, ConversationRef, ErrorPayload, PeerPresence, ReadReceipt, SendMessagePayload,
    ServerEvent, ThemePayload, TypingPayload, UnreadNotice, UserRef,
};
pub use message::{Message, MessageDraft, MessagePage, NewMessage};
pub use user::User;
pub use value_objects::{
    ConnectionId, ConversationId, MessageId, PasswordHash, Theme, Timestamp, UserId, Username,
};
