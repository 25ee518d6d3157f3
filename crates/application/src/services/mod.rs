mod conversation_service;
mod user_service;

pub use conversation_service::{
    ConversationService, ConversationServiceDependencies, ReadOutcome, SentMessage,
    DEFAULT_PAGE_LIMIT, MAX_PAGE_LIMIT,
};
pub use user_service::{
    AuthenticateUserRequest, RegisterUserRequest, UserService, UserServiceDependencies,
};
