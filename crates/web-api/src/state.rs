use std::{path::PathBuf, sync::Arc, time::Duration};

use application::{
    ChatDispatcher, ConversationService, Dispatch, ImageStore, Session, UserService,
};
use domain::ClientEvent;

use crate::{hub::ConnectionHub, JwtService};

/// WebSocket 连接参数
#[derive(Debug, Clone)]
pub struct WebSocketSettings {
    pub channel_capacity: usize,
    pub ping_interval: Duration,
}

impl From<&config::WebSocketConfig> for WebSocketSettings {
    fn from(config: &config::WebSocketConfig) -> Self {
        Self {
            channel_capacity: config.channel_capacity,
            ping_interval: Duration::from_secs(config.ping_interval_secs),
        }
    }
}

#[derive(Clone)]
pub struct AppState {
    pub user_service: Arc<UserService>,
    pub conversation_service: Arc<ConversationService>,
    pub dispatcher: Arc<ChatDispatcher>,
    pub hub: ConnectionHub,
    pub jwt_service: Arc<JwtService>,
    pub image_store: Arc<dyn ImageStore>,
    /// `/uploads` 对外提供的目录
    pub uploads_dir: PathBuf,
    pub upload_limit: usize,
    pub websocket: WebSocketSettings,
}

impl AppState {
    /// REST 修改成功后把实时事件推给在线连接。推送失败只记日志，不影响响应。
    pub async fn publish(
        &self,
        what: &'static str,
        dispatches: Result<Vec<Dispatch>, application::ApplicationError>,
    ) {
        match dispatches {
            Ok(dispatches) => self.hub.deliver(dispatches).await,
            Err(err) => tracing::warn!(event = what, error = %err, "实时推送失败"),
        }
    }

    /// 处理一条客户端事件并投递结果。
    /// 发送消息时会话锁一直持有到投递指令进入发送队列，房间内按 id 顺序收到消息。
    pub async fn handle_event(&self, session: Session, event: ClientEvent) {
        let _turn = match &event {
            ClientEvent::SendMessage(payload) => {
                Some(self.dispatcher.sequence(payload.conversation_id).await)
            }
            _ => None,
        };
        let dispatches = self.dispatcher.handle(session, event).await;
        self.hub.deliver(dispatches).await;
    }
}
