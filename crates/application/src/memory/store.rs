
use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use domain::{
    Conversation, ConversationDetail, ConversationId, ConversationSummary, Message, MessageId,
    NewMessage, PairKey, Participant, RepositoryError, Theme, Timestamp, User, UserId, Username,
};
use tokio::sync::RwLock;

use crate::repository::{ConversationRepository, MessageRepository, UserRepository};

#[derive(Default)]
struct Tables {
    users: HashMap<UserId, User>,
    conversations: BTreeMap<ConversationId, Conversation>,
    pair_index: HashMap<String, ConversationId>,
    participants: BTreeMap<(ConversationId, UserId), Option<Timestamp>>,
    messages: BTreeMap<MessageId, Message>,
    last_conversation_id: i64,
    last_message_id: i64,
}

impl Tables {
    fn username_of(&self, user_id: UserId) -> String {
        self.users
            .get(&user_id)
            .map(|user| user.username.as_str().to_owned())
            .unwrap_or_default()
    }

    fn participants_of(&self, id: ConversationId) -> Vec<Participant> {
        self.participants
            .range((id, UserId::from(uuid::Uuid::nil()))..)
            .take_while(|((conversation_id, _), _)| *conversation_id == id)
            .map(|((conversation_id, user_id), last_read_at)| Participant {
                conversation_id: *conversation_id,
                user_id: *user_id,
                username: self.username_of(*user_id),
                last_read_at: *last_read_at,
            })
            .collect()
    }

    fn detail(&self, id: ConversationId) -> Option<ConversationDetail> {
        self.conversations
            .get(&id)
            .map(|conversation| ConversationDetail {
                conversation: conversation.clone(),
                participants: self.participants_of(id),
            })
    }

    fn messages_of(&self, id: ConversationId) -> impl DoubleEndedIterator<Item = &Message> {
        self.messages
            .values()
            .filter(move |message| message.conversation_id == id)
    }
}

#[derive(Default)]
pub struct InMemoryChatStore {
    tables: RwLock<Tables>,
}

impl InMemoryChatStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl UserRepository for InMemoryChatStore {
    async fn create(&self, user: User) -> Result<User, RepositoryError> {
        let mut tables = self.tables.write().await;
        let taken = tables
            .users
            .values()
            .any(|existing| existing.username == user.username || existing.id == user.id);
        if taken {
            return Err(RepositoryError::Conflict);
        }
        tables.users.insert(user.id, user.clone());
        Ok(user)
    }

    async fn find_by_id(&self, id: UserId) -> Result<Option<User>, RepositoryError> {
        Ok(self.tables.read().await.users.get(&id).cloned())
    }

    async fn find_by_username(&self, username: &Username) -> Result<Option<User>, RepositoryError> {
        let tables = self.tables.read().await;
        Ok(tables
            .users
            .values()
            .find(|user| &user.username == username)
            .cloned())
    }
}

#[async_trait]
impl ConversationRepository for InMemoryChatStore {
    async fn find_or_create_one_to_one(
        &self,
        pair: PairKey,
        now: Timestamp,
    ) -> Result<(ConversationDetail, bool), RepositoryError> {
        let mut tables = self.tables.write().await;
        let key = pair.as_key();

        if let Some(id) = tables.pair_index.get(&key).copied() {
            let detail = tables.detail(id).ok_or(RepositoryError::NotFound)?;
            return Ok((detail, false));
        }

        tables.last_conversation_id += 1;
        let id = ConversationId::new(tables.last_conversation_id);
        tables.conversations.insert(
            id,
            Conversation {
                id,
                theme: Theme::default(),
                created_at: now,
                updated_at: now,
            },
        );
        tables.pair_index.insert(key, id);
        for user_id in pair.users() {
            tables.participants.insert((id, user_id), None);
        }

        let detail = tables.detail(id).ok_or(RepositoryError::NotFound)?;
        Ok((detail, true))
    }

    async fn find_by_id(
        &self,
        id: ConversationId,
    ) -> Result<Option<ConversationDetail>, RepositoryError> {
        Ok(self.tables.read().await.detail(id))
    }

    async fn is_participant(
        &self,
        id: ConversationId,
        user_id: UserId,
    ) -> Result<bool, RepositoryError> {
        Ok(self
            .tables
            .read()
            .await
            .participants
            .contains_key(&(id, user_id)))
    }

    async fn list_for_user(
        &self,
        user_id: UserId,
    ) -> Result<Vec<ConversationSummary>, RepositoryError> {
        let tables = self.tables.read().await;
        let mut summaries: Vec<ConversationSummary> = tables
            .participants
            .iter()
            .filter(|((_, participant), _)| *participant == user_id)
            .filter_map(|((conversation_id, _), _)| {
                let conversation = tables.conversations.get(conversation_id)?;
                let peer = tables
                    .participants_of(*conversation_id)
                    .into_iter()
                    .find(|p| p.user_id != user_id);
                let last_message = tables.messages_of(*conversation_id).next_back().cloned();
                let unread_count = tables
                    .messages_of(*conversation_id)
                    .filter(|m| m.sender_id != user_id && m.read_at.is_none())
                    .count() as i64;
                Some(ConversationSummary {
                    id: conversation.id,
                    theme: conversation.theme.clone(),
                    updated_at: conversation.updated_at,
                    peer,
                    last_message,
                    unread_count,
                })
            })
            .collect();

        summaries.sort_by(|a, b| b.updated_at.cmp(&a.updated_at).then(b.id.cmp(&a.id)));
        Ok(summaries)
    }

    async fn update_theme(
        &self,
        id: ConversationId,
        theme: Theme,
    ) -> Result<Conversation, RepositoryError> {
        let mut tables = self.tables.write().await;
        let conversation = tables
            .conversations
            .get_mut(&id)
            .ok_or(RepositoryError::NotFound)?;
        conversation.theme = theme;
        Ok(conversation.clone())
    }

    async fn delete(&self, id: ConversationId) -> Result<(), RepositoryError> {
        let mut tables = self.tables.write().await;
        if !tables.conversations.contains_key(&id) {
            return Err(RepositoryError::NotFound);
        }
        tables.messages.retain(|_, message| message.conversation_id != id);
        tables.participants.retain(|(conversation_id, _), _| *conversation_id != id);
        tables.pair_index.retain(|_, conversation_id| *conversation_id != id);
        tables.conversations.remove(&id);
        Ok(())
    }
}

#[async_trait]
impl MessageRepository for InMemoryChatStore {
    async fn save_message(&self, message: NewMessage) -> Result<Message, RepositoryError> {
        let mut tables = self.tables.write().await;
        let sender_name = tables.username_of(message.sender_id);
        let conversation = tables
            .conversations
            .get_mut(&message.conversation_id)
            .ok_or(RepositoryError::NotFound)?;
        conversation.updated_at = message.created_at;

        tables.last_message_id += 1;
        let stored = Message {
            id: MessageId::new(tables.last_message_id),
            conversation_id: message.conversation_id,
            sender_id: message.sender_id,
            sender_name,
            body: message.body,
            image_url: message.image_url,
            created_at: message.created_at,
            read_at: None,
        };
        tables.messages.insert(stored.id, stored.clone());
        Ok(stored)
    }

    async fn list_messages(
        &self,
        conversation_id: ConversationId,
        before: Option<MessageId>,
        limit: u32,
    ) -> Result<Vec<Message>, RepositoryError> {
        let tables = self.tables.read().await;
        Ok(tables
            .messages_of(conversation_id)
            .rev()
            .filter(|message| before.map_or(true, |cursor| message.id < cursor))
            .take(limit as usize)
            .cloned()
            .collect())
    }

    async fn mark_read(
        &self,
        conversation_id: ConversationId,
        reader: UserId,
        at: Timestamp,
    ) -> Result<u64, RepositoryError> {
        let mut tables = self.tables.write().await;
        let last_read_at = tables
            .participants
            .get_mut(&(conversation_id, reader))
            .ok_or(RepositoryError::NotFound)?;
        *last_read_at = Some(at);

        let mut updated = 0;
        for message in tables.messages.values_mut() {
            if message.conversation_id == conversation_id
                && message.sender_id != reader
                && message.read_at.is_none()
            {
                message.read_at = Some(at);
                updated += 1;
            }
        }
        Ok(updated)
    }
}
