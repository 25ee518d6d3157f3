//! WebSocket 连接
//!
//! 每条连接拆成读写两个任务：读任务按顺序把客户端事件交给分发器并投递结果，
//! 写任务把发送队列里的内容写回套接字并定时发送 ping。
//! 任一任务结束或连接中心要求关闭时，清理在线状态和房间。

use std::{sync::Arc, time::Duration};

use application::{ApplicationError, Session};
use axum::{
    extract::{
        ws::{Message as WsMessage, WebSocket, WebSocketUpgrade},
        State,
    },
    http::HeaderMap,
    response::Response,
};
use domain::{ClientEvent, DomainError, ServerEvent, UserId};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::{mpsc, Notify};

use crate::{error::ApiError, extract::ApiQuery, hub::Outbound, state::AppState};

#[derive(Debug, Deserialize)]
pub(crate) struct WsQuery {
    token: Option<String>,
}

/// 升级前完成认证，失败直接返回 401，不会建立连接
pub(crate) async fn websocket_upgrade(
    State(state): State<AppState>,
    headers: HeaderMap,
    ApiQuery(query): ApiQuery<WsQuery>,
    ws: WebSocketUpgrade,
) -> Result<Response, ApiError> {
    let user_id = state
        .jwt_service
        .authenticate_handshake(&headers, query.token.as_deref())?;
    // token 有效但用户已不存在
    match state.user_service.find_user(user_id).await {
        Ok(_) => {}
        Err(ApplicationError::Domain(DomainError::UserNotFound)) => {
            return Err(ApiError::unauthorized("unknown user"));
        }
        Err(err) => return Err(err.into()),
    }
    Ok(ws.on_upgrade(move |socket| run_connection(socket, state, user_id)))
}

async fn run_connection(socket: WebSocket, state: AppState, user_id: UserId) {
    let session = Session::new(user_id);
    let (tx, mut rx) = mpsc::channel::<Outbound>(state.websocket.channel_capacity);
    let shutdown = Arc::new(Notify::new());

    state
        .hub
        .register(session.connection_id, tx.clone(), shutdown.clone())
        .await;

    match state.dispatcher.connect(session).await {
        Ok(dispatches) => state.hub.deliver(dispatches).await,
        Err(err) => {
            tracing::error!(user_id = %user_id, error = %err, "failed to register presence");
            state.hub.unregister(session.connection_id).await;
            return;
        }
    }
    tracing::info!(
        user_id = %user_id,
        connection_id = %session.connection_id,
        "WebSocket 连接已建立"
    );

    let (mut sink, mut incoming) = socket.split();
    let ping_interval = state.websocket.ping_interval;

    let mut send_task = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(ping_interval);
        ticker.tick().await;
        loop {
            tokio::select! {
                outbound = rx.recv() => {
                    let message = match outbound {
                        Some(Outbound::Text(text)) => WsMessage::Text(text.into()),
                        Some(Outbound::Pong(data)) => WsMessage::Pong(data.into()),
                        None => break,
                    };
                    if sink.send(message).await.is_err() {
                        break;
                    }
                }
                _ = ticker.tick() => {
                    if sink.send(WsMessage::Ping(Vec::new().into())).await.is_err() {
                        break;
                    }
                }
            }
        }
        let _ = sink.close().await;
    });

    let mut recv_task = {
        let state = state.clone();
        tokio::spawn(async move {
            while let Some(Ok(message)) = incoming.next().await {
                match message {
                    WsMessage::Text(text) => {
                        match serde_json::from_str::<ClientEvent>(text.as_str()) {
                            Ok(event) => state.handle_event(session, event).await,
                            Err(err) => {
                                tracing::debug!(
                                    connection_id = %session.connection_id,
                                    error = %err,
                                    "malformed client frame"
                                );
                                state
                                    .hub
                                    .deliver(vec![application::Dispatch::To(
                                        session.connection_id,
                                        ServerEvent::error("invalid event payload"),
                                    )])
                                    .await;
                            }
                        }
                    }
                    WsMessage::Binary(_) => {
                        state
                            .hub
                            .deliver(vec![application::Dispatch::To(
                                session.connection_id,
                                ServerEvent::error("binary frames are not supported"),
                            )])
                            .await;
                    }
                    WsMessage::Ping(data) => {
                        if tx.try_send(Outbound::Pong(data.to_vec())).is_err() {
                            break;
                        }
                    }
                    WsMessage::Pong(_) => {}
                    WsMessage::Close(_) => break,
                }
            }
        })
    };

    let send_finished = tokio::select! {
        _ = &mut send_task => true,
        _ = &mut recv_task => false,
        _ = shutdown.notified() => {
            tracing::info!(connection_id = %session.connection_id, "连接被服务端关闭");
            false
        }
    };
    recv_task.abort();
    state.hub.unregister(session.connection_id).await;
    if !send_finished {
        // 发送端全部释放后写任务会把队列剩余内容写完再退出
        let _ = tokio::time::timeout(Duration::from_millis(200), &mut send_task).await;
        send_task.abort();
    }

    let dispatches = state.dispatcher.disconnect(session).await;
    state.hub.deliver(dispatches).await;

    tracing::info!(
        user_id = %user_id,
        connection_id = %session.connection_id,
        "WebSocket 连接已断开"
    );
}
