use std::collections::BTreeMap;

use async_trait::async_trait;
use domain::{ConnectionId, UserId};
use tokio::sync::RwLock;

use crate::error::ApplicationError;
use crate::presence::PresenceTracker;

/// 单进程的在线状态表
#[derive(Debug, Default)]
pub struct InMemoryPresenceTracker {
    connections: RwLock<BTreeMap<UserId, ConnectionId>>,
}

impl InMemoryPresenceTracker {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PresenceTracker for InMemoryPresenceTracker {
    async fn connect(
        &self,
        user_id: UserId,
        connection: ConnectionId,
    ) -> Result<Option<ConnectionId>, ApplicationError> {
        let previous = self.connections.write().await.insert(user_id, connection);
        let superseded = previous.filter(|old| *old != connection);

        tracing::debug!(
            user_id = %user_id,
            connection_id = %connection,
            superseded = ?superseded,
            "用户上线"
        );
        Ok(superseded)
    }

    async fn disconnect(
        &self,
        user_id: UserId,
        connection: ConnectionId,
    ) -> Result<bool, ApplicationError> {
        let mut connections = self.connections.write().await;
        match connections.get(&user_id) {
            Some(current) if *current == connection => {
                connections.remove(&user_id);
                tracing::debug!(user_id = %user_id, connection_id = %connection, "用户离线");
                Ok(true)
            }
            // 已被新连接顶替，忽略
            _ => Ok(false),
        }
    }

    async fn connection_of(
        &self,
        user_id: UserId,
    ) -> Result<Option<ConnectionId>, ApplicationError> {
        Ok(self.connections.read().await.get(&user_id).copied())
    }

    async fn online_users(&self) -> Result<Vec<UserId>, ApplicationError> {
        Ok(self.connections.read().await.keys().copied().collect())
    }
}
