use async_trait::async_trait;
use domain::{
    Conversation, ConversationDetail, ConversationId, ConversationSummary, Message, MessageId,
    NewMessage, PairKey, RepositoryError, Theme, Timestamp, User, UserId, Username,
};

#[async_trait]
pub trait UserRepository: Send + Sync {
    /// 用户名重复时返回 `RepositoryError::Conflict`
    async fn create(&self, user: User) -> Result<User, RepositoryError>;
    async fn find_by_id(&self, id: UserId) -> Result<Option<User>, RepositoryError>;
    async fn find_by_username(&self, username: &Username) -> Result<Option<User>, RepositoryError>;
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ConversationRepository: Send + Sync {
    /// 查找或创建一对用户的会话，返回值中的 bool 表示是否新建。
    ///
    /// 实现必须依赖 pair key 的唯一性，而不是先查后写，
    /// 这样并发调用也只会得到同一个会话。
    async fn find_or_create_one_to_one(
        &self,
        pair: PairKey,
        now: Timestamp,
    ) -> Result<(ConversationDetail, bool), RepositoryError>;

    async fn find_by_id(
        &self,
        id: ConversationId,
    ) -> Result<Option<ConversationDetail>, RepositoryError>;

    async fn is_participant(
        &self,
        id: ConversationId,
        user_id: UserId,
    ) -> Result<bool, RepositoryError>;

    /// 用户的全部会话，按最近活跃时间倒序
    async fn list_for_user(
        &self,
        user_id: UserId,
    ) -> Result<Vec<ConversationSummary>, RepositoryError>;

    async fn update_theme(
        &self,
        id: ConversationId,
        theme: Theme,
    ) -> Result<Conversation, RepositoryError>;

    /// 依次删除消息、参与者、会话本身
    async fn delete(&self, id: ConversationId) -> Result<(), RepositoryError>;
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MessageRepository: Send + Sync {
    /// 写入消息并刷新会话的 `updated_at`，返回带发送者名字的完整记录
    async fn save_message(&self, message: NewMessage) -> Result<Message, RepositoryError>;

    /// 取 id 严格小于 `before` 的最多 `limit` 条消息，按 id 降序
    async fn list_messages(
        &self,
        conversation_id: ConversationId,
        before: Option<MessageId>,
        limit: u32,
    ) -> Result<Vec<Message>, RepositoryError>;

    /// 更新读者的 `last_read_at`，并把别人发来的未读消息标记为已读，返回标记条数
    async fn mark_read(
        &self,
        conversation_id: ConversationId,
        reader: UserId,
        at: Timestamp,
    ) -> Result<u64, RepositoryError>;
}
