//! 实时事件分发
//!
//! [`ChatDispatcher`] 不直接接触套接字：每个入口都返回一组 [`Dispatch`]，
//! 由传输层按顺序投递。这样房间和在线状态的逻辑可以脱离网络单独测试。

use std::sync::Arc;

use domain::{
    ClientEvent, ConnectionId, Conversation, ConversationId, ConversationRef, Message,
    PeerPresence, ReadReceipt, ServerEvent, ThemePayload, TypingPayload, UnreadNotice, UserId,
    UserRef,
};

use tokio::sync::OwnedMutexGuard;

use crate::error::ApplicationError;
use crate::gate::ConversationGate;
use crate::presence::PresenceTracker;
use crate::rooms::{RoomMember, RoomRegistry};
use crate::services::{ConversationService, ReadOutcome};

/// 一条已认证的 WebSocket 连接
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Session {
    pub connection_id: ConnectionId,
    pub user_id: UserId,
}

impl Session {
    pub fn new(user_id: UserId) -> Self {
        Self {
            connection_id: ConnectionId::generate(),
            user_id,
        }
    }

    fn as_member(&self) -> RoomMember {
        RoomMember {
            connection_id: self.connection_id,
            user_id: self.user_id,
        }
    }
}

/// 投递指令
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dispatch {
    To(ConnectionId, ServerEvent),
    All(ServerEvent),
    Close(ConnectionId),
}

pub struct ChatDispatcher {
    conversations: Arc<ConversationService>,
    presence: Arc<dyn PresenceTracker>,
    rooms: Arc<dyn RoomRegistry>,
    gate: ConversationGate,
}

impl ChatDispatcher {
    pub fn new(
        conversations: Arc<ConversationService>,
        presence: Arc<dyn PresenceTracker>,
        rooms: Arc<dyn RoomRegistry>,
    ) -> Self {
        Self {
            conversations,
            presence,
            rooms,
            gate: ConversationGate::new(),
        }
    }

    pub fn presence(&self) -> &Arc<dyn PresenceTracker> {
        &self.presence
    }

    /// 发送消息前取得会话锁，持有到投递指令入队为止
    pub async fn sequence(&self, conversation_id: ConversationId) -> OwnedMutexGuard<()> {
        self.gate.acquire(conversation_id).await
    }

    /// 新连接上线。被顶替的旧连接会收到 `Close`。
    pub async fn connect(&self, session: Session) -> Result<Vec<Dispatch>, ApplicationError> {
        let superseded = self
            .presence
            .connect(session.user_id, session.connection_id)
            .await?;

        let mut out = Vec::with_capacity(2);
        if let Some(old) = superseded {
            tracing::info!(
                user_id = %session.user_id,
                connection_id = %old,
                "旧连接被新连接顶替"
            );
            out.push(Dispatch::Close(old));
        }
        out.push(Dispatch::All(ServerEvent::UserOnline(UserRef {
            user_id: session.user_id,
        })));
        Ok(out)
    }

    /// 连接断开：退出所有房间，必要时广播离线
    pub async fn disconnect(&self, session: Session) -> Vec<Dispatch> {
        match self.try_disconnect(session).await {
            Ok(out) => out,
            Err(err) => {
                tracing::warn!(
                    user_id = %session.user_id,
                    connection_id = %session.connection_id,
                    error = %err,
                    "清理连接状态失败"
                );
                Vec::new()
            }
        }
    }

    async fn try_disconnect(&self, session: Session) -> Result<Vec<Dispatch>, ApplicationError> {
        let mut out = Vec::new();
        for conversation_id in self.rooms.drop_connection(session.connection_id).await? {
            out.extend(self.peer_left(session.user_id, conversation_id).await?);
        }

        let went_offline = self
            .presence
            .disconnect(session.user_id, session.connection_id)
            .await?;
        if went_offline {
            out.push(Dispatch::All(ServerEvent::UserOffline(UserRef {
                user_id: session.user_id,
            })));
        }
        Ok(out)
    }

    /// 处理一条客户端事件；任何失败都只回给发起的连接
    pub async fn handle(&self, session: Session, event: ClientEvent) -> Vec<Dispatch> {
        let name = event.name();
        let conversation_id = event.conversation_id();

        let result = match event {
            ClientEvent::JoinConversation(id) => self.join(session, id).await,
            ClientEvent::LeaveConversation(id) => self.leave(session, id).await,
            ClientEvent::SendMessage(payload) => {
                self.send_message(
                    session,
                    payload.conversation_id,
                    payload.body,
                    payload.image_url,
                )
                .await
            }
            ClientEvent::MarkRead(id) => self.mark_read(session, id).await,
            ClientEvent::Typing(id) => self.typing(session, id, true).await,
            ClientEvent::StopTyping(id) => self.typing(session, id, false).await,
            ClientEvent::ThemeUpdated(payload) => {
                self.update_theme(session, payload.conversation_id, payload.theme)
                    .await
            }
        };

        result.unwrap_or_else(|err| {
            tracing::warn!(
                event = name,
                user_id = %session.user_id,
                connection_id = %session.connection_id,
                conversation_id = %conversation_id,
                error = %err,
                "处理客户端事件失败"
            );
            vec![Dispatch::To(
                session.connection_id,
                ServerEvent::error(err.client_message()),
            )]
        })
    }

    async fn join(
        &self,
        session: Session,
        conversation_id: ConversationId,
    ) -> Result<Vec<Dispatch>, ApplicationError> {
        self.conversations
            .require_participant(session.user_id, conversation_id)
            .await?;
        let outcome = self.rooms.join(conversation_id, session.as_member()).await?;

        if !outcome.evicted.is_empty() {
            tracing::debug!(
                conversation_id = %conversation_id,
                user_id = %session.user_id,
                evicted = outcome.evicted.len(),
                "同一用户的旧连接已移出房间"
            );
        }

        let joined = ServerEvent::PeerJoined(PeerPresence {
            user_id: session.user_id,
            conversation_id,
        });
        let mut out: Vec<Dispatch> = outcome
            .peers
            .iter()
            .map(|peer| Dispatch::To(peer.connection_id, joined.clone()))
            .collect();

        // 让新加入者知道谁已经在房间里
        for user_id in outcome.present_users() {
            out.push(Dispatch::To(
                session.connection_id,
                ServerEvent::PeerJoined(PeerPresence {
                    user_id,
                    conversation_id,
                }),
            ));
        }
        Ok(out)
    }

    async fn leave(
        &self,
        session: Session,
        conversation_id: ConversationId,
    ) -> Result<Vec<Dispatch>, ApplicationError> {
        if !self
            .rooms
            .leave(conversation_id, session.connection_id)
            .await?
        {
            return Ok(Vec::new());
        }
        self.peer_left(session.user_id, conversation_id).await
    }

    /// 用户在房间里已没有任何连接时，通知剩下的成员
    async fn peer_left(
        &self,
        user_id: UserId,
        conversation_id: ConversationId,
    ) -> Result<Vec<Dispatch>, ApplicationError> {
        let remaining = self.rooms.members(conversation_id).await?;
        if remaining.iter().any(|m| m.user_id == user_id) {
            return Ok(Vec::new());
        }
        let left = ServerEvent::PeerLeft(PeerPresence {
            user_id,
            conversation_id,
        });
        Ok(remaining
            .into_iter()
            .map(|m| Dispatch::To(m.connection_id, left.clone()))
            .collect())
    }

    async fn send_message(
        &self,
        session: Session,
        conversation_id: ConversationId,
        body: String,
        image_url: Option<String>,
    ) -> Result<Vec<Dispatch>, ApplicationError> {
        let sent = self
            .conversations
            .send_message(session.user_id, conversation_id, body, image_url)
            .await?;
        self.publish_message(&sent.message, &sent.recipients).await
    }

    /// 新消息投递：房间内所有连接收到 `message:new`，
    /// 其他参与者的权威连接收到 `conversation:unread`
    pub async fn publish_message(
        &self,
        message: &Message,
        recipients: &[UserId],
    ) -> Result<Vec<Dispatch>, ApplicationError> {
        let mut out: Vec<Dispatch> = self
            .rooms
            .members(message.conversation_id)
            .await?
            .into_iter()
            .map(|m| Dispatch::To(m.connection_id, ServerEvent::MessageNew(message.clone())))
            .collect();

        let notice = ServerEvent::ConversationUnread(UnreadNotice {
            conversation_id: message.conversation_id,
            message: message.preview(),
            sender_id: message.sender_id,
            sender_name: message.sender_name.clone(),
            timestamp: message.created_at,
        });
        for connection_id in self.connections_of(recipients).await? {
            out.push(Dispatch::To(connection_id, notice.clone()));
        }
        Ok(out)
    }

    async fn mark_read(
        &self,
        session: Session,
        conversation_id: ConversationId,
    ) -> Result<Vec<Dispatch>, ApplicationError> {
        let outcome = self
            .conversations
            .mark_read(session.user_id, conversation_id)
            .await?;
        self.publish_read(&outcome).await
    }

    /// 已读回执：房间收到 `message:read`，每个参与者的连接收到 `conversation:read`
    pub async fn publish_read(
        &self,
        outcome: &ReadOutcome,
    ) -> Result<Vec<Dispatch>, ApplicationError> {
        let receipt = ReadReceipt {
            conversation_id: outcome.conversation_id,
            user_id: outcome.reader,
            read_at: outcome.read_at,
        };

        let mut out: Vec<Dispatch> = self
            .rooms
            .members(outcome.conversation_id)
            .await?
            .into_iter()
            .map(|m| Dispatch::To(m.connection_id, ServerEvent::MessageRead(receipt.clone())))
            .collect();
        for connection_id in self.connections_of(&outcome.participants).await? {
            out.push(Dispatch::To(
                connection_id,
                ServerEvent::ConversationRead(receipt.clone()),
            ));
        }
        Ok(out)
    }

    /// 输入状态只转发给房间；不在房间内的连接发来的直接忽略，不回执
    async fn typing(
        &self,
        session: Session,
        conversation_id: ConversationId,
        started: bool,
    ) -> Result<Vec<Dispatch>, ApplicationError> {
        if !self
            .rooms
            .contains(conversation_id, session.connection_id)
            .await?
        {
            tracing::debug!(
                connection_id = %session.connection_id,
                conversation_id = %conversation_id,
                "ignoring typing outside the room"
            );
            return Ok(Vec::new());
        }

        let payload = TypingPayload {
            user_id: session.user_id,
            conversation_id,
        };
        let event = if started {
            ServerEvent::Typing(payload)
        } else {
            ServerEvent::StopTyping(payload)
        };
        self.to_room(conversation_id, Some(session.connection_id), event)
            .await
    }

    async fn update_theme(
        &self,
        session: Session,
        conversation_id: ConversationId,
        theme: String,
    ) -> Result<Vec<Dispatch>, ApplicationError> {
        let conversation = self
            .conversations
            .update_theme(session.user_id, conversation_id, theme)
            .await?;
        self.theme_changed(&conversation, Some(session.connection_id))
            .await
    }

    /// REST 修改主题后通知房间内所有连接
    pub async fn publish_theme(
        &self,
        conversation: &Conversation,
    ) -> Result<Vec<Dispatch>, ApplicationError> {
        self.theme_changed(conversation, None).await
    }

    async fn theme_changed(
        &self,
        conversation: &Conversation,
        except: Option<ConnectionId>,
    ) -> Result<Vec<Dispatch>, ApplicationError> {
        let event = ServerEvent::ThemeUpdated(ThemePayload {
            conversation_id: conversation.id,
            theme: conversation.theme.as_str().to_owned(),
        });
        self.to_room(conversation.id, except, event).await
    }

    /// 会话删除后解散房间，并通知房间成员和所有参与者
    pub async fn publish_deleted(
        &self,
        conversation_id: ConversationId,
        participants: &[UserId],
    ) -> Result<Vec<Dispatch>, ApplicationError> {
        let mut targets: Vec<ConnectionId> = self
            .rooms
            .clear(conversation_id)
            .await?
            .into_iter()
            .map(|m| m.connection_id)
            .collect();
        targets.extend(self.connections_of(participants).await?);
        self.gate.forget(conversation_id).await;
        targets.sort();
        targets.dedup();

        let event = ServerEvent::ConversationDeleted(ConversationRef { conversation_id });
        Ok(targets
            .into_iter()
            .map(|connection_id| Dispatch::To(connection_id, event.clone()))
            .collect())
    }

    async fn to_room(
        &self,
        conversation_id: ConversationId,
        except: Option<ConnectionId>,
        event: ServerEvent,
    ) -> Result<Vec<Dispatch>, ApplicationError> {
        Ok(self
            .rooms
            .members(conversation_id)
            .await?
            .into_iter()
            .filter(|m| Some(m.connection_id) != except)
            .map(|m| Dispatch::To(m.connection_id, event.clone()))
            .collect())
    }

    async fn connections_of(
        &self,
        users: &[UserId],
    ) -> Result<Vec<ConnectionId>, ApplicationError> {
        let mut connections = Vec::with_capacity(users.len());
        for user_id in users {
            if let Some(connection_id) = self.presence.connection_of(*user_id).await? {
                connections.push(connection_id);
            }
        }
        Ok(connections)
    }
}
