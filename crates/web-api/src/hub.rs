//! 连接中心：连接 id 到发送队列的映射
//!
//! 分发器产出的 [`Dispatch`] 在这里被序列化并放进对应连接的有界队列。
//! 队列满或已关闭的连接会被移除并通知其主循环退出。

use std::{collections::HashMap, sync::Arc};

use application::Dispatch;
use domain::{ConnectionId, ServerEvent};
use tokio::sync::{mpsc, Notify, RwLock};

/// 写任务要发送到套接字的内容
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    Text(String),
    Pong(Vec<u8>),
}

#[derive(Debug)]
struct ConnectionHandle {
    sender: mpsc::Sender<Outbound>,
    shutdown: Arc<Notify>,
}

#[derive(Debug, Clone, Default)]
pub struct ConnectionHub {
    connections: Arc<RwLock<HashMap<ConnectionId, ConnectionHandle>>>,
}

impl ConnectionHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register(
        &self,
        connection_id: ConnectionId,
        sender: mpsc::Sender<Outbound>,
        shutdown: Arc<Notify>,
    ) {
        self.connections
            .write()
            .await
            .insert(connection_id, ConnectionHandle { sender, shutdown });
    }

    pub async fn unregister(&self, connection_id: ConnectionId) {
        self.connections.write().await.remove(&connection_id);
    }

    pub async fn len(&self) -> usize {
        self.connections.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// 按顺序投递
    pub async fn deliver(&self, dispatches: Vec<Dispatch>) {
        for dispatch in dispatches {
            match dispatch {
                Dispatch::To(connection_id, event) => {
                    if let Some(text) = encode(&event) {
                        self.send_to(connection_id, text).await;
                    }
                }
                Dispatch::All(event) => {
                    if let Some(text) = encode(&event) {
                        self.broadcast(text).await;
                    }
                }
                Dispatch::Close(connection_id) => self.close(connection_id).await,
            }
        }
    }

    async fn send_to(&self, connection_id: ConnectionId, text: String) {
        let failed = {
            let connections = self.connections.read().await;
            match connections.get(&connection_id) {
                Some(handle) => handle.sender.try_send(Outbound::Text(text)).is_err(),
                None => false,
            }
        };
        if failed {
            self.drop_slow(connection_id).await;
        }
    }

    async fn broadcast(&self, text: String) {
        let failed: Vec<ConnectionId> = {
            let connections = self.connections.read().await;
            connections
                .iter()
                .filter(|(_, handle)| handle.sender.try_send(Outbound::Text(text.clone())).is_err())
                .map(|(id, _)| *id)
                .collect()
        };
        for connection_id in failed {
            self.drop_slow(connection_id).await;
        }
    }

    async fn drop_slow(&self, connection_id: ConnectionId) {
        tracing::warn!(connection_id = %connection_id, "发送队列已满或已关闭，断开连接");
        self.close(connection_id).await;
    }

    /// 移除连接并通知其主循环退出
    pub async fn close(&self, connection_id: ConnectionId) {
        if let Some(handle) = self.connections.write().await.remove(&connection_id) {
            handle.shutdown.notify_one();
        }
    }
}

fn encode(event: &ServerEvent) -> Option<String> {
    match serde_json::to_string(event) {
        Ok(text) => Some(text),
        Err(err) => {
            tracing::warn!(error = %err, "failed to serialize websocket payload");
            None
        }
    }
}
