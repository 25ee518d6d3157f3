//! WebSocket 实时事件定义
//!
//! 每一帧都是 `{"event": "<名称>", "data": <载荷>}` 形式的 JSON 文本。
//! 客户端事件在边界处反序列化为 [`ClientEvent`]，无法解析的帧直接拒绝，
//! 不会进入分发逻辑。

use serde::{Deserialize, Serialize};

use crate::message::Message;
use crate::value_objects::{ConversationId, Timestamp, UserId};

/// 客户端发往服务端的事件
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ClientEvent {
    JoinConversation(ConversationId),
    LeaveConversation(ConversationId),
    SendMessage(SendMessagePayload),
    MarkRead(ConversationId),
    Typing(ConversationId),
    StopTyping(ConversationId),
    ThemeUpdated(ThemePayload),
}

impl ClientEvent {
    pub fn name(&self) -> &'static str {
        match self {
            ClientEvent::JoinConversation(_) => "join_conversation",
            ClientEvent::LeaveConversation(_) => "leave_conversation",
            ClientEvent::SendMessage(_) => "send_message",
            ClientEvent::MarkRead(_) => "mark_read",
            ClientEvent::Typing(_) => "typing",
            ClientEvent::StopTyping(_) => "stop_typing",
            ClientEvent::ThemeUpdated(_) => "theme_updated",
        }
    }

    pub fn conversation_id(&self) -> ConversationId {
        match self {
            ClientEvent::JoinConversation(id)
            | ClientEvent::LeaveConversation(id)
            | ClientEvent::MarkRead(id)
            | ClientEvent::Typing(id)
            | ClientEvent::StopTyping(id) => *id,
            ClientEvent::SendMessage(payload) => payload.conversation_id,
            ClientEvent::ThemeUpdated(payload) => payload.conversation_id,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessagePayload {
    pub conversation_id: ConversationId,
    #[serde(default)]
    pub body: String,
    #[serde(default)]
    pub image_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThemePayload {
    pub conversation_id: ConversationId,
    pub theme: String,
}

/// 服务端推送给客户端的事件
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum ServerEvent {
    #[serde(rename = "user_online")]
    UserOnline(UserRef),
    #[serde(rename = "user_offline")]
    UserOffline(UserRef),
    #[serde(rename = "peer_joined_conversation")]
    PeerJoined(PeerPresence),
    #[serde(rename = "peer_left_conversation")]
    PeerLeft(PeerPresence),
    #[serde(rename = "message:new")]
    MessageNew(Message),
    #[serde(rename = "message:error")]
    MessageError(ErrorPayload),
    #[serde(rename = "message:read")]
    MessageRead(ReadReceipt),
    #[serde(rename = "conversation:unread")]
    ConversationUnread(UnreadNotice),
    #[serde(rename = "conversation:read")]
    ConversationRead(ReadReceipt),
    #[serde(rename = "conversation:deleted")]
    ConversationDeleted(ConversationRef),
    #[serde(rename = "typing")]
    Typing(TypingPayload),
    #[serde(rename = "stop_typing")]
    StopTyping(TypingPayload),
    #[serde(rename = "theme:updated")]
    ThemeUpdated(ThemePayload),
}

impl ServerEvent {
    pub fn error(message: impl Into<String>) -> Self {
        ServerEvent::MessageError(ErrorPayload {
            message: message.into(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserRef {
    pub user_id: UserId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PeerPresence {
    pub user_id: UserId,
    pub conversation_id: ConversationId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorPayload {
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadReceipt {
    pub conversation_id: ConversationId,
    pub user_id: UserId,
    pub read_at: Timestamp,
}

/// 发给不在房间内的参与者的未读提醒，用于刷新角标。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnreadNotice {
    pub conversation_id: ConversationId,
    pub message: String,
    pub sender_id: UserId,
    pub sender_name: String,
    pub timestamp: Timestamp,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypingPayload {
    pub user_id: UserId,
    pub conversation_id: ConversationId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationRef {
    pub conversation_id: ConversationId,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use uuid::Uuid;

    #[test]
    fn parses_client_events_from_wire_format() {
        let join: ClientEvent =
            serde_json::from_value(json!({"event": "join_conversation", "data": 7})).unwrap();
        assert_eq!(join, ClientEvent::JoinConversation(ConversationId::new(7)));

        let send: ClientEvent = serde_json::from_value(json!({
            "event": "send_message",
            "data": {"conversationId": 7, "body": "hi"}
        }))
        .unwrap();
        assert_eq!(
            send,
            ClientEvent::SendMessage(SendMessagePayload {
                conversation_id: ConversationId::new(7),
                body: "hi".into(),
                image_url: None,
            })
        );
    }

    #[test]
    fn rejects_unknown_or_malformed_events() {
        assert!(serde_json::from_value::<ClientEvent>(json!({"event": "shout", "data": 1})).is_err());
        assert!(serde_json::from_value::<ClientEvent>(
            json!({"event": "mark_read", "data": "seven"})
        )
        .is_err());
    }

    #[test]
    fn server_events_use_colon_names() {
        let event = ServerEvent::ThemeUpdated(ThemePayload {
            conversation_id: ConversationId::new(3),
            theme: "ocean".into(),
        });
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["event"], "theme:updated");
        assert_eq!(value["data"]["conversationId"], 3);

        let online = ServerEvent::UserOnline(UserRef {
            user_id: UserId::from(Uuid::nil()),
        });
        let value = serde_json::to_value(&online).unwrap();
        assert_eq!(value["event"], "user_online");
        assert_eq!(value["data"]["userId"], Uuid::nil().to_string());
    }
}
