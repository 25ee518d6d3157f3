//! PetZone 聊天服务入口
//!
//! 读取配置，装配存储与服务，启动 REST + WebSocket 服务器。

use std::{path::PathBuf, sync::Arc};

use anyhow::Context;
use application::{
    ChatDispatcher, Clock, ConversationRepository, ConversationService,
    ConversationServiceDependencies, InMemoryChatStore, InMemoryPresenceTracker,
    InMemoryRoomRegistry, MessageRepository, SystemClock, UserRepository, UserService,
    UserServiceDependencies,
};
use config::AppConfig;
use infrastructure::{create_pg_pool, BcryptPasswordHasher, LocalImageStore, PgChatStore, MIGRATOR};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use web_api::{router, AppState, ConnectionHub, JwtService, WebSocketSettings};

const DEFAULT_LOG_FILTER: &str = "info,petzone_chat=debug,tower_http=debug";

/// 三个仓储接口由同一个存储实现提供
struct Repositories {
    users: Arc<dyn UserRepository>,
    conversations: Arc<dyn ConversationRepository>,
    messages: Arc<dyn MessageRepository>,
}

impl Repositories {
    fn from_store<S>(store: Arc<S>) -> Self
    where
        S: UserRepository + ConversationRepository + MessageRepository + 'static,
    {
        Self {
            users: store.clone(),
            conversations: store.clone(),
            messages: store,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::load().context("加载配置失败")?;
    init_tracing(config.logging.json);
    tracing::info!(config = %config.redacted(), "配置加载完成");

    let repositories = connect_storage(&config).await?;
    let state = build_state(&config, repositories)?;

    let app = router(state);
    let address = config.bind_address();
    let listener = tokio::net::TcpListener::bind(&address)
        .await
        .with_context(|| format!("无法监听 {address}"))?;

    tracing::info!("PetZone 聊天服务启动在 http://{address}");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("服务已停止");
    Ok(())
}

fn init_tracing(json: bool) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

async fn connect_storage(config: &AppConfig) -> anyhow::Result<Repositories> {
    if config.database.is_memory() {
        tracing::warn!("使用内存存储，进程退出后数据全部丢失");
        return Ok(Repositories::from_store(Arc::new(InMemoryChatStore::new())));
    }

    let pool = create_pg_pool(&config.database.url, config.database.max_connections)
        .await
        .context("连接数据库失败")?;
    MIGRATOR.run(&pool).await.context("数据库迁移失败")?;
    tracing::info!("数据库迁移完成");

    Ok(Repositories::from_store(Arc::new(PgChatStore::new(pool))))
}

fn build_state(config: &AppConfig, repositories: Repositories) -> anyhow::Result<AppState> {
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let password_hasher =
        BcryptPasswordHasher::with_cost(config.bcrypt_cost).context("bcrypt 参数无效")?;

    let user_service = Arc::new(UserService::new(UserServiceDependencies {
        user_repository: repositories.users.clone(),
        password_hasher: Arc::new(password_hasher),
        clock: clock.clone(),
    }));
    let conversation_service = Arc::new(ConversationService::new(
        ConversationServiceDependencies {
            conversation_repository: repositories.conversations,
            message_repository: repositories.messages,
            user_repository: repositories.users,
            clock,
        },
    ));

    // 在线状态与房间只存在于本进程
    let dispatcher = Arc::new(ChatDispatcher::new(
        conversation_service.clone(),
        Arc::new(InMemoryPresenceTracker::new()),
        Arc::new(InMemoryRoomRegistry::new()),
    ));

    let uploads_dir = PathBuf::from(&config.uploads.dir);
    let image_store = LocalImageStore::new(
        uploads_dir.clone(),
        config.uploads.public_base_url.clone(),
        config.uploads.max_bytes,
    );

    Ok(AppState {
        user_service,
        conversation_service,
        dispatcher,
        hub: ConnectionHub::new(),
        jwt_service: Arc::new(JwtService::new(config.jwt.clone())),
        image_store: Arc::new(image_store),
        uploads_dir,
        upload_limit: config.uploads.max_bytes,
        websocket: WebSocketSettings::from(&config.websocket),
    })
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %err, "无法监听 Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                tracing::error!(error = %err, "无法监听 SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("收到退出信号，开始优雅关闭");
}
