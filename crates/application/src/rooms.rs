use async_trait::async_trait;
use domain::{ConnectionId, ConversationId, UserId};

use crate::error::ApplicationError;

/// 房间里的一条连接
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RoomMember {
    pub connection_id: ConnectionId,
    pub user_id: UserId,
}

/// 加入房间的结果
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JoinOutcome {
    /// 同一用户此前留在房间里的其他连接，已被移出
    pub evicted: Vec<ConnectionId>,
    /// 加入前房间里其他用户的连接
    pub peers: Vec<RoomMember>,
}

impl JoinOutcome {
    /// 房间中已经在场的其他用户（去重）
    pub fn present_users(&self) -> Vec<UserId> {
        let mut users: Vec<UserId> = self.peers.iter().map(|m| m.user_id).collect();
        users.sort();
        users.dedup();
        users
    }
}

/// 会话房间注册表：会话 -> 当前打开该会话的连接
#[async_trait]
pub trait RoomRegistry: Send + Sync {
    async fn join(
        &self,
        conversation_id: ConversationId,
        member: RoomMember,
    ) -> Result<JoinOutcome, ApplicationError>;

    /// 返回连接之前是否在房间里
    async fn leave(
        &self,
        conversation_id: ConversationId,
        connection_id: ConnectionId,
    ) -> Result<bool, ApplicationError>;

    async fn members(
        &self,
        conversation_id: ConversationId,
    ) -> Result<Vec<RoomMember>, ApplicationError>;

    async fn contains(
        &self,
        conversation_id: ConversationId,
        connection_id: ConnectionId,
    ) -> Result<bool, ApplicationError>;

    /// 把连接移出所有房间，返回它曾经所在的会话
    async fn drop_connection(
        &self,
        connection_id: ConnectionId,
    ) -> Result<Vec<ConversationId>, ApplicationError>;

    /// 解散房间，返回原有成员
    async fn clear(
        &self,
        conversation_id: ConversationId,
    ) -> Result<Vec<RoomMember>, ApplicationError>;
}
