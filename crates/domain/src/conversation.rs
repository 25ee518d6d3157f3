use serde::{Deserialize, Serialize};

use crate::errors::DomainError;
use crate::message::Message;
use crate::value_objects::{ConversationId, Theme, Timestamp, UserId};

/// 两个用户之间的一对一会话。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    pub id: ConversationId,
    pub theme: Theme,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

/// 会话成员记录，携带个人的已读进度。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Participant {
    pub conversation_id: ConversationId,
    pub user_id: UserId,
    pub username: String,
    pub last_read_at: Option<Timestamp>,
}

/// 会话详情：元数据加全部参与者。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationDetail {
    #[serde(flatten)]
    pub conversation: Conversation,
    pub participants: Vec<Participant>,
}

impl ConversationDetail {
    pub fn is_participant(&self, user_id: UserId) -> bool {
        self.participants.iter().any(|p| p.user_id == user_id)
    }

    pub fn participant_ids(&self) -> Vec<UserId> {
        self.participants.iter().map(|p| p.user_id).collect()
    }
}

/// 会话列表项
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationSummary {
    pub id: ConversationId,
    pub theme: Theme,
    pub updated_at: Timestamp,
    pub peer: Option<Participant>,
    pub last_message: Option<Message>,
    pub unread_count: i64,
}

/// 无序用户对的规范化键 `"<小uuid>:<大uuid>"`。
///
/// 存储层对该键建唯一约束，保证同一对用户只有一个会话。
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PairKey {
    low: UserId,
    high: UserId,
}

impl PairKey {
    pub fn new(a: UserId, b: UserId) -> Result<Self, DomainError> {
        if a == b {
            return Err(DomainError::invalid_argument(
                "peerId",
                "cannot start a conversation with yourself",
            ));
        }
        let (low, high) = if a < b { (a, b) } else { (b, a) };
        Ok(Self { low, high })
    }

    pub fn users(&self) -> [UserId; 2] {
        [self.low, self.high]
    }

    pub fn as_key(&self) -> String {
        format!("{}:{}", self.low, self.high)
    }
}
