use serde::{Deserialize, Serialize};

use crate::errors::DomainError;
use crate::value_objects::{ConversationId, MessageId, Timestamp, UserId};

const MAX_BODY_CHARS: usize = 4000;
const MAX_IMAGE_URL_LEN: usize = 2048;

/// 已持久化的消息。
///
/// 创建后只有 `read_at` 会变化。`sender_name` 随消息一起返回，
/// 这样广播时无需再查一次用户表。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: MessageId,
    pub conversation_id: ConversationId,
    pub sender_id: UserId,
    pub sender_name: String,
    pub body: String,
    pub image_url: Option<String>,
    pub created_at: Timestamp,
    pub read_at: Option<Timestamp>,
}

impl Message {
    /// 未读通知里使用的简短预览文本
    pub fn preview(&self) -> String {
        if self.body.is_empty() && self.image_url.is_some() {
            "[image]".to_owned()
        } else {
            self.body.clone()
        }
    }
}

/// 校验过的消息内容：正文与图片至少有一个非空。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageDraft {
    body: String,
    image_url: Option<String>,
}

impl MessageDraft {
    pub fn new(body: impl Into<String>, image_url: Option<String>) -> Result<Self, DomainError> {
        let body = body.into().trim().to_owned();
        let image_url = image_url
            .map(|url| url.trim().to_owned())
            .filter(|url| !url.is_empty());

        if body.is_empty() && image_url.is_none() {
            return Err(DomainError::invalid_argument(
                "message",
                "body or imageUrl is required",
            ));
        }
        if body.chars().count() > MAX_BODY_CHARS {
            return Err(DomainError::invalid_argument("body", "too long"));
        }
        if let Some(url) = &image_url {
            if url.len() > MAX_IMAGE_URL_LEN {
                return Err(DomainError::invalid_argument("imageUrl", "too long"));
            }
        }

        Ok(Self { body, image_url })
    }

    pub fn into_parts(self) -> (String, Option<String>) {
        (self.body, self.image_url)
    }
}

/// 待写入的消息
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewMessage {
    pub conversation_id: ConversationId,
    pub sender_id: UserId,
    pub body: String,
    pub image_url: Option<String>,
    pub created_at: Timestamp,
}

impl NewMessage {
    pub fn new(
        conversation_id: ConversationId,
        sender_id: UserId,
        draft: MessageDraft,
        created_at: Timestamp,
    ) -> Self {
        let (body, image_url) = draft.into_parts();
        Self {
            conversation_id,
            sender_id,
            body,
            image_url,
            created_at,
        }
    }
}

/// 反向游标分页的一页。
///
/// `messages` 按时间升序；`next_cursor` 是本页最旧消息的 id，
/// 只有当本页恰好装满时才返回，否则为 `None` 表示已到底。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessagePage {
    pub messages: Vec<Message>,
    pub next_cursor: Option<MessageId>,
}

impl MessagePage {
    /// `rows` 必须是按 id 降序取出的结果
    pub fn from_newest_first(mut rows: Vec<Message>, limit: u32) -> Self {
        let next_cursor = if rows.len() == limit as usize {
            rows.last().map(|m| m.id)
        } else {
            None
        };
        rows.reverse();
        Self {
            messages: rows,
            next_cursor,
        }
    }
}
