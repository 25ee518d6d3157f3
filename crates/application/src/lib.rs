//! 应用层实现。
//!
//! 这里提供围绕领域模型的用例服务：会话与消息的读写、权限校验、
//! 在线状态与房间管理，以及把实时事件翻译成投递指令的分发器。
//! 存储、密码哈希、图片存储都通过 trait 抽象，由基础设施层实现。

pub mod clock;
pub mod dispatcher;
pub mod error;
pub mod gate;
pub mod memory;
pub mod password;
pub mod presence;
pub mod repository;
pub mod rooms;
pub mod services;
pub mod upload;

pub use clock::{Clock, FixedClock, SystemClock};
pub use dispatcher::{ChatDispatcher, Dispatch, Session};
pub use error::ApplicationError;
pub use gate::ConversationGate;
pub use memory::{InMemoryChatStore, InMemoryPresenceTracker, InMemoryRoomRegistry};
pub use password::{PasswordHasher, PasswordHasherError};
pub use presence::PresenceTracker;
pub use repository::{ConversationRepository, MessageRepository, UserRepository};
pub use rooms::{JoinOutcome, RoomMember, RoomRegistry};
pub use services::{
    AuthenticateUserRequest, ConversationService, ConversationServiceDependencies, ReadOutcome,
    RegisterUserRequest, SentMessage, UserService, UserServiceDependencies, DEFAULT_PAGE_LIMIT,
    MAX_PAGE_LIMIT,
};
pub use upload::{ImageStore, ImageUpload, UploadError};
