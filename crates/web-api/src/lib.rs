//! Web API 层。
//!
//! 提供 Axum 路由，把 HTTP 请求委托给应用层的用例服务，
//! 把 WebSocket 事件交给分发器，再由连接中心投递给各个连接。

mod auth;
mod error;
mod extract;
mod hub;
mod routes;
mod state;
mod websocket;

pub use auth::{AuthUser, Claims, JwtService, LoginResponse};
pub use config::JwtConfig;
pub use error::{ApiError, ErrorBody};
pub use extract::{ApiJson, ApiPath, ApiQuery};
pub use hub::ConnectionHub;
pub use routes::router;
pub use state::{AppState, WebSocketSettings};
