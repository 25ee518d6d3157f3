#![allow(dead_code)]

use std::{path::PathBuf, sync::Arc, time::Duration};

use application::{
    ChatDispatcher, ConversationService, ConversationServiceDependencies, InMemoryChatStore,
    InMemoryPresenceTracker, InMemoryRoomRegistry, SystemClock, UserService,
    UserServiceDependencies,
};
use futures_util::{SinkExt, StreamExt};
use infrastructure::{BcryptPasswordHasher, LocalImageStore};
use reqwest::Client;
use serde_json::{json, Value};
use tokio::{
    net::{TcpListener, TcpStream},
    sync::oneshot,
    time::timeout,
};
use tokio_tungstenite::{
    connect_async, tungstenite::Message as WsFrame, MaybeTlsStream, WebSocketStream,
};
use uuid::Uuid;
use web_api::{router, AppState, ConnectionHub, JwtConfig, JwtService, WebSocketSettings};

pub const TEST_SECRET: &str = "test-secret-that-is-at-least-32-characters";
pub const UPLOAD_LIMIT: usize = 64 * 1024;

pub type WsClient = WebSocketStream<MaybeTlsStream<TcpStream>>;

pub fn build_state(uploads_dir: PathBuf, base_url: &str) -> AppState {
    let store = Arc::new(InMemoryChatStore::new());
    let clock = Arc::new(SystemClock);
    let hasher = BcryptPasswordHasher::with_cost(4).expect("bcrypt cost");

    let user_service = Arc::new(UserService::new(UserServiceDependencies {
        user_repository: store.clone(),
        password_hasher: Arc::new(hasher),
        clock: clock.clone(),
    }));
    let conversation_service = Arc::new(ConversationService::new(
        ConversationServiceDependencies {
            conversation_repository: store.clone(),
            message_repository: store.clone(),
            user_repository: store,
            clock,
        },
    ));
    let dispatcher = Arc::new(ChatDispatcher::new(
        conversation_service.clone(),
        Arc::new(InMemoryPresenceTracker::new()),
        Arc::new(InMemoryRoomRegistry::new()),
    ));
    let image_store = LocalImageStore::new(
        uploads_dir.clone(),
        format!("{base_url}/uploads"),
        UPLOAD_LIMIT,
    );

    AppState {
        user_service,
        conversation_service,
        dispatcher,
        hub: ConnectionHub::new(),
        jwt_service: Arc::new(JwtService::new(JwtConfig {
            secret: TEST_SECRET.to_owned(),
            expiration_hours: 1,
        })),
        image_store: Arc::new(image_store),
        uploads_dir,
        upload_limit: UPLOAD_LIMIT,
        websocket: WebSocketSettings {
            channel_capacity: 256,
            ping_interval: Duration::from_secs(30),
        },
    }
}

/// 在随机端口上启动完整服务
pub struct TestServer {
    pub base_http: String,
    pub base_ws: String,
    pub client: Client,
    pub uploads_dir: PathBuf,
    shutdown: Option<oneshot::Sender<()>>,
}

impl TestServer {
    pub async fn spawn() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");
        let base_http = format!("http://{addr}");
        let uploads_dir = std::env::temp_dir().join(format!("petzone-uploads-{}", Uuid::new_v4()));

        let app = router(build_state(uploads_dir.clone(), &base_http));
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        tokio::spawn(async move {
            axum::serve(listener, app.into_make_service())
                .with_graceful_shutdown(async {
                    let _ = shutdown_rx.await;
                })
                .await
                .ok();
        });

        Self {
            base_ws: format!("ws://{addr}"),
            base_http,
            client: Client::new(),
            uploads_dir,
            shutdown: Some(shutdown_tx),
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_http, path)
    }

    /// 注册并登录，返回 (用户 id, token)
    pub async fn signup(&self, username: &str) -> (String, String) {
        let response = self
            .client
            .post(self.url("/api/v1/auth/register"))
            .json(&json!({"username": username, "password": "secret-pass"}))
            .send()
            .await
            .expect("register");
        assert_eq!(response.status(), 201, "register {username}");

        let login: Value = self
            .client
            .post(self.url("/api/v1/auth/login"))
            .json(&json!({"username": username, "password": "secret-pass"}))
            .send()
            .await
            .expect("login")
            .json()
            .await
            .expect("login json");
        let id = login["user"]["id"].as_str().expect("user id").to_owned();
        let token = login["token"].as_str().expect("token").to_owned();
        (id, token)
    }

    pub async fn open_conversation(&self, token: &str, peer_id: &str) -> i64 {
        let detail: Value = self
            .client
            .post(self.url("/api/v1/conversations"))
            .bearer_auth(token)
            .json(&json!({"peerId": peer_id}))
            .send()
            .await
            .expect("open conversation")
            .json()
            .await
            .expect("conversation json");
        detail["id"].as_i64().expect("conversation id")
    }

    pub async fn connect_ws(&self, token: &str) -> WsClient {
        let (socket, _) = connect_async(format!("{}/api/v1/ws?token={token}", self.base_ws))
            .await
            .expect("websocket handshake");
        socket
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        let _ = std::fs::remove_dir_all(&self.uploads_dir);
    }
}

pub async fn send_event(socket: &mut WsClient, event: Value) {
    socket
        .send(WsFrame::Text(event.to_string().into()))
        .await
        .expect("send frame");
}

/// 读取下一条文本事件，超时返回 None
pub async fn next_event(socket: &mut WsClient) -> Option<Value> {
    loop {
        let frame = timeout(Duration::from_secs(2), socket.next()).await.ok()??;
        match frame.ok()? {
            WsFrame::Text(text) => return serde_json::from_str(text.as_str()).ok(),
            WsFrame::Close(_) => return None,
            _ => continue,
        }
    }
}

/// 跳过其他事件，直到收到指定名称的事件
pub async fn expect_event(socket: &mut WsClient, name: &str) -> Value {
    loop {
        let event = next_event(socket)
            .await
            .unwrap_or_else(|| panic!("no `{name}` event received"));
        if event["event"] == name {
            return event["data"].clone();
        }
    }
}
