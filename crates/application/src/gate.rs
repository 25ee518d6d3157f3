//! 按会话串行化消息的写入与投递
//!
//! 同一会话的消息 id 由存储分配，投递顺序却取决于各自的任务什么时候跑完。
//! 发送方先拿到会话锁再写库，并一直持有到投递指令进入各连接的发送队列，
//! 房间成员看到的 `message:new` 才会按 id 递增。

use std::{collections::HashMap, sync::Arc};

use domain::ConversationId;
use tokio::sync::{Mutex, OwnedMutexGuard};

#[derive(Debug, Default)]
pub struct ConversationGate {
    locks: Mutex<HashMap<ConversationId, Arc<Mutex<()>>>>,
}

impl ConversationGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// 等待轮到该会话。不同会话互不阻塞。
    pub async fn acquire(&self, conversation_id: ConversationId) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().await;
            locks.entry(conversation_id).or_default().clone()
        };
        lock.lock_owned().await
    }

    /// 会话删除后释放对应的锁
    pub async fn forget(&self, conversation_id: ConversationId) {
        self.locks.lock().await.remove(&conversation_id);
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn same_conversation_waits_for_holder() {
        let gate = ConversationGate::new();
        let id = ConversationId(1);

        let held = gate.acquire(id).await;
        let blocked = tokio::time::timeout(Duration::from_millis(50), gate.acquire(id)).await;
        assert!(blocked.is_err());

        drop(held);
        let next = tokio::time::timeout(Duration::from_millis(50), gate.acquire(id)).await;
        assert!(next.is_ok());
    }

    #[tokio::test]
    async fn other_conversations_are_not_blocked() {
        let gate = ConversationGate::new();
        let _held = gate.acquire(ConversationId(1)).await;

        let other =
            tokio::time::timeout(Duration::from_millis(50), gate.acquire(ConversationId(2))).await;
        assert!(other.is_ok());
    }

    #[tokio::test]
    async fn forgotten_conversation_starts_fresh() {
        let gate = ConversationGate::new();
        let id = ConversationId(7);
        drop(gate.acquire(id).await);

        gate.forget(id).await;
        assert!(gate.locks.lock().await.is_empty());
        let again = tokio::time::timeout(Duration::from_millis(50), gate.acquire(id)).await;
        assert!(again.is_ok());
    }
}
