use async_trait::async_trait;
use domain::{ConnectionId, UserId};

use crate::error::ApplicationError;

/// 在线状态管理器
///
/// 每个用户最多只有一条权威连接。新连接会顶替旧连接，
/// 旧连接稍后断开时不能把用户错误地标记为离线。
#[async_trait]
pub trait PresenceTracker: Send + Sync {
    /// 记录 `connection` 为用户的权威连接，返回被顶替的旧连接（调用方负责关闭）
    async fn connect(
        &self,
        user_id: UserId,
        connection: ConnectionId,
    ) -> Result<Option<ConnectionId>, ApplicationError>;

    /// 仅当 `connection` 仍是权威连接时才移除，返回用户是否因此离线
    async fn disconnect(
        &self,
        user_id: UserId,
        connection: ConnectionId,
    ) -> Result<bool, ApplicationError>;

    async fn connection_of(&self, user_id: UserId)
        -> Result<Option<ConnectionId>, ApplicationError>;

    /// 在线用户快照，按 id 排序
    async fn online_users(&self) -> Result<Vec<UserId>, ApplicationError>;
}
