use std::sync::Arc;

use domain::{
    Conversation, ConversationDetail, ConversationId, ConversationSummary, DomainError, Message,
    MessageDraft, MessageId, MessagePage, NewMessage, PairKey, RepositoryError, Theme, Timestamp,
    UserId,
};

use crate::{
    clock::Clock,
    error::ApplicationError,
    repository::{ConversationRepository, MessageRepository, UserRepository},
};

pub const DEFAULT_PAGE_LIMIT: u32 = 30;
pub const MAX_PAGE_LIMIT: u32 = 100;

pub struct ConversationServiceDependencies {
    pub conversation_repository: Arc<dyn ConversationRepository>,
    pub message_repository: Arc<dyn MessageRepository>,
    pub user_repository: Arc<dyn UserRepository>,
    pub clock: Arc<dyn Clock>,
}

/// 已写入的消息和需要收到未读提醒的其他参与者
#[derive(Debug, Clone)]
pub struct SentMessage {
    pub message: Message,
    pub recipients: Vec<UserId>,
}

#[derive(Debug, Clone)]
pub struct ReadOutcome {
    pub conversation_id: ConversationId,
    pub reader: UserId,
    pub read_at: Timestamp,
    /// 本次被标记为已读的消息条数
    pub updated: u64,
    pub participants: Vec<UserId>,
}

/// 会话与消息用例。所有读写都先校验调用者是参与者。
pub struct ConversationService {
    deps: ConversationServiceDependencies,
}

impl ConversationService {
    pub fn new(deps: ConversationServiceDependencies) -> Self {
        Self { deps }
    }

    /// 查找或创建与 `peer_id` 的一对一会话，bool 表示是否新建
    pub async fn open_conversation(
        &self,
        requester: UserId,
        peer_id: UserId,
    ) -> Result<(ConversationDetail, bool), ApplicationError> {
        let pair = PairKey::new(requester, peer_id)?;
        if self
            .deps
            .user_repository
            .find_by_id(peer_id)
            .await?
            .is_none()
        {
            return Err(DomainError::UserNotFound.into());
        }

        let (detail, created) = self
            .deps
            .conversation_repository
            .find_or_create_one_to_one(pair, self.deps.clock.now())
            .await?;

        if created {
            tracing::info!(
                conversation_id = %detail.conversation.id,
                user_id = %requester,
                peer_id = %peer_id,
                "创建会话"
            );
        }
        Ok((detail, created))
    }

    pub async fn list_conversations(
        &self,
        user_id: UserId,
    ) -> Result<Vec<ConversationSummary>, ApplicationError> {
        Ok(self
            .deps
            .conversation_repository
            .list_for_user(user_id)
            .await?)
    }

    /// 会话不存在返回 404 类错误，存在但不是参与者返回 403 类错误
    pub async fn get_conversation(
        &self,
        requester: UserId,
        conversation_id: ConversationId,
    ) -> Result<ConversationDetail, ApplicationError> {
        let detail = self
            .deps
            .conversation_repository
            .find_by_id(conversation_id)
            .await?
            .ok_or(DomainError::ConversationNotFound)?;
        if !detail.is_participant(requester) {
            return Err(DomainError::NotParticipant.into());
        }
        Ok(detail)
    }

    pub async fn require_participant(
        &self,
        requester: UserId,
        conversation_id: ConversationId,
    ) -> Result<(), ApplicationError> {
        let is_participant = self
            .deps
            .conversation_repository
            .is_participant(conversation_id, requester)
            .await?;
        if is_participant {
            return Ok(());
        }
        // 区分会话不存在和无权访问
        self.get_conversation(requester, conversation_id)
            .await
            .map(|_| ())
    }

    pub async fn list_messages(
        &self,
        requester: UserId,
        conversation_id: ConversationId,
        cursor: Option<MessageId>,
        limit: Option<u32>,
    ) -> Result<MessagePage, ApplicationError> {
        self.require_participant(requester, conversation_id).await?;

        let limit = limit
            .unwrap_or(DEFAULT_PAGE_LIMIT)
            .clamp(1, MAX_PAGE_LIMIT);
        let rows = self
            .deps
            .message_repository
            .list_messages(conversation_id, cursor, limit)
            .await?;
        Ok(MessagePage::from_newest_first(rows, limit))
    }

    /// 先校验内容再校验权限，任何一步失败都不会写入
    pub async fn send_message(
        &self,
        sender: UserId,
        conversation_id: ConversationId,
        body: String,
        image_url: Option<String>,
    ) -> Result<SentMessage, ApplicationError> {
        let draft = MessageDraft::new(body, image_url)?;
        let detail = self.get_conversation(sender, conversation_id).await?;

        let message = self
            .deps
            .message_repository
            .save_message(NewMessage::new(
                conversation_id,
                sender,
                draft,
                self.deps.clock.now(),
            ))
            .await
            .map_err(|err| match err {
                // 会话在校验之后被删除
                RepositoryError::NotFound => {
                    ApplicationError::from(DomainError::ConversationNotFound)
                }
                other => other.into(),
            })?;

        tracing::debug!(
            conversation_id = %conversation_id,
            message_id = %message.id,
            user_id = %sender,
            "消息已保存"
        );

        let recipients = detail
            .participant_ids()
            .into_iter()
            .filter(|id| *id != sender)
            .collect();
        Ok(SentMessage {
            message,
            recipients,
        })
    }

    pub async fn mark_read(
        &self,
        reader: UserId,
        conversation_id: ConversationId,
    ) -> Result<ReadOutcome, ApplicationError> {
        let detail = self.get_conversation(reader, conversation_id).await?;
        let read_at = self.deps.clock.now();
        let updated = self
            .deps
            .message_repository
            .mark_read(conversation_id, reader, read_at)
            .await?;

        Ok(ReadOutcome {
            conversation_id,
            reader,
            read_at,
            updated,
            participants: detail.participant_ids(),
        })
    }

    pub async fn update_theme(
        &self,
        requester: UserId,
        conversation_id: ConversationId,
        theme: String,
    ) -> Result<Conversation, ApplicationError> {
        let theme = Theme::parse(theme)?;
        self.require_participant(requester, conversation_id).await?;
        let conversation = self
            .deps
            .conversation_repository
            .update_theme(conversation_id, theme)
            .await?;
        tracing::info!(
            conversation_id = %conversation_id,
            theme = %conversation.theme,
            "会话主题已更新"
        );
        Ok(conversation)
    }

    /// 删除会话，返回原参与者以便通知在线客户端
    pub async fn delete_conversation(
        &self,
        requester: UserId,
        conversation_id: ConversationId,
    ) -> Result<Vec<UserId>, ApplicationError> {
        let detail = self.get_conversation(requester, conversation_id).await?;
        self.deps
            .conversation_repository
            .delete(conversation_id)
            .await
            .map_err(|err| match err {
                RepositoryError::NotFound => {
                    ApplicationError::from(DomainError::ConversationNotFound)
                }
                other => other.into(),
            })?;
        tracing::info!(conversation_id = %conversation_id, user_id = %requester, "会话已删除");
        Ok(detail.participant_ids())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;
    use crate::memory::InMemoryChatStore;
    use chrono::Utc;
    use domain::{PasswordHash, User, Username};
    use uuid::Uuid;

    struct Fixture {
        service: ConversationService,
        alice: UserId,
        bob: UserId,
        carol: UserId,
    }

    async fn fixture() -> Fixture {
        let store = Arc::new(InMemoryChatStore::new());
        let mut ids = Vec::new();
        for name in ["alice", "bob", "carol"] {
            let user = User::register(
                UserId::from(Uuid::new_v4()),
                Username::parse(name).unwrap(),
                PasswordHash::new("hash").unwrap(),
                Utc::now(),
            );
            ids.push(UserRepository::create(store.as_ref(), user).await.unwrap().id);
        }
        let service = ConversationService::new(ConversationServiceDependencies {
            conversation_repository: store.clone(),
            message_repository: store.clone(),
            user_repository: store,
            clock: Arc::new(SystemClock),
        });
        Fixture {
            service,
            alice: ids[0],
            bob: ids[1],
            carol: ids[2],
        }
    }

    #[tokio::test]
    async fn open_conversation_is_idempotent_from_either_side() {
        let f = fixture().await;
        let (first, created) = f.service.open_conversation(f.alice, f.bob).await.unwrap();
        assert!(created);
        let (second, created) = f.service.open_conversation(f.bob, f.alice).await.unwrap();
        assert!(!created);
        assert_eq!(first.conversation.id, second.conversation.id);
        assert_eq!(first.conversation.theme.as_str(), "default");
    }

    #[tokio::test]
    async fn open_conversation_rejects_self_and_unknown_peer() {
        let f = fixture().await;
        assert!(matches!(
            f.service.open_conversation(f.alice, f.alice).await,
            Err(ApplicationError::Domain(DomainError::InvalidArgument { .. }))
        ));
        assert!(matches!(
            f.service
                .open_conversation(f.alice, UserId::from(Uuid::new_v4()))
                .await,
            Err(ApplicationError::Domain(DomainError::UserNotFound))
        ));
    }

    #[tokio::test]
    async fn outsiders_are_forbidden_and_missing_is_not_found() {
        let f = fixture().await;
        let (detail, _) = f.service.open_conversation(f.alice, f.bob).await.unwrap();
        let id = detail.conversation.id;

        assert!(matches!(
            f.service.get_conversation(f.carol, id).await,
            Err(ApplicationError::Domain(DomainError::NotParticipant))
        ));
        assert!(matches!(
            f.service
                .send_message(f.carol, id, "hi".into(), None)
                .await,
            Err(ApplicationError::Domain(DomainError::NotParticipant))
        ));
        assert!(matches!(
            f.service
                .list_messages(f.alice, ConversationId::new(999), None, None)
                .await,
            Err(ApplicationError::Domain(DomainError::ConversationNotFound))
        ));
    }

    #[tokio::test]
    async fn empty_message_is_rejected_without_storing() {
        let f = fixture().await;
        let (detail, _) = f.service.open_conversation(f.alice, f.bob).await.unwrap();
        let id = detail.conversation.id;

        let err = f
            .service
            .send_message(f.alice, id, "   ".into(), None)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ApplicationError::Domain(DomainError::InvalidArgument { .. })
        ));
        let page = f.service.list_messages(f.alice, id, None, None).await.unwrap();
        assert!(page.messages.is_empty());
    }

    #[tokio::test]
    async fn paging_backwards_visits_every_message_once() {
        let f = fixture().await;
        let (detail, _) = f.service.open_conversation(f.alice, f.bob).await.unwrap();
        let id = detail.conversation.id;

        let mut sent = Vec::new();
        for i in 0..7 {
            let sender = if i % 2 == 0 { f.alice } else { f.bob };
            let out = f
                .service
                .send_message(sender, id, format!("m{i}"), None)
                .await
                .unwrap();
            sent.push(out.message.id);
        }

        let mut seen = Vec::new();
        let mut cursor = None;
        loop {
            let page = f
                .service
                .list_messages(f.alice, id, cursor, Some(3))
                .await
                .unwrap();
            let ids: Vec<MessageId> = page.messages.iter().map(|m| m.id).collect();
            assert!(ids.windows(2).all(|w| w[0] < w[1]));
            seen.splice(0..0, ids);
            match page.next_cursor {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }
        assert_eq!(seen, sent);
    }

    #[tokio::test]
    async fn page_limit_is_clamped() {
        let f = fixture().await;
        let (detail, _) = f.service.open_conversation(f.alice, f.bob).await.unwrap();
        let id = detail.conversation.id;
        for i in 0..3 {
            f.service
                .send_message(f.alice, id, format!("m{i}"), None)
                .await
                .unwrap();
        }
        let page = f
            .service
            .list_messages(f.alice, id, None, Some(0))
            .await
            .unwrap();
        assert_eq!(page.messages.len(), 1);
        assert!(page.next_cursor.is_some());
    }

    #[tokio::test]
    async fn mark_read_only_touches_messages_from_others() {
        let f = fixture().await;
        let (detail, _) = f.service.open_conversation(f.alice, f.bob).await.unwrap();
        let id = detail.conversation.id;

        f.service
            .send_message(f.alice, id, "from alice".into(), None)
            .await
            .unwrap();
        f.service
            .send_message(f.bob, id, "from bob".into(), None)
            .await
            .unwrap();

        let outcome = f.service.mark_read(f.alice, id).await.unwrap();
        assert_eq!(outcome.updated, 1);
        assert_eq!(outcome.participants.len(), 2);

        let page = f.service.list_messages(f.alice, id, None, None).await.unwrap();
        for message in page.messages {
            if message.sender_id == f.alice {
                assert!(message.read_at.is_none());
            } else {
                assert_eq!(message.read_at, Some(outcome.read_at));
            }
        }

        let summaries = f.service.list_conversations(f.alice).await.unwrap();
        assert_eq!(summaries[0].unread_count, 0);
        let summaries = f.service.list_conversations(f.bob).await.unwrap();
        assert_eq!(summaries[0].unread_count, 1);
    }

    #[tokio::test]
    async fn theme_is_validated_then_persisted() {
        let f = fixture().await;
        let (detail, _) = f.service.open_conversation(f.alice, f.bob).await.unwrap();
        let id = detail.conversation.id;

        assert!(f
            .service
            .update_theme(f.alice, id, "not a theme!".into())
            .await
            .is_err());
        let updated = f
            .service
            .update_theme(f.bob, id, "ocean".into())
            .await
            .unwrap();
        assert_eq!(updated.theme.as_str(), "ocean");
        let detail = f.service.get_conversation(f.alice, id).await.unwrap();
        assert_eq!(detail.conversation.theme.as_str(), "ocean");
    }

    #[tokio::test]
    async fn delete_removes_conversation_for_everyone() {
        let f = fixture().await;
        let (detail, _) = f.service.open_conversation(f.alice, f.bob).await.unwrap();
        let id = detail.conversation.id;
        f.service
            .send_message(f.alice, id, "bye".into(), None)
            .await
            .unwrap();

        assert!(matches!(
            f.service.delete_conversation(f.carol, id).await,
            Err(ApplicationError::Domain(DomainError::NotParticipant))
        ));
        let participants = f.service.delete_conversation(f.alice, id).await.unwrap();
        assert_eq!(participants.len(), 2);

        assert!(matches!(
            f.service.get_conversation(f.bob, id).await,
            Err(ApplicationError::Domain(DomainError::ConversationNotFound))
        ));
        assert!(f.service.list_conversations(f.bob).await.unwrap().is_empty());
    }
}
