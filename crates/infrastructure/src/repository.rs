use application::repository::{ConversationRepository, MessageRepository, UserRepository};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use domain::{
    Conversation, ConversationDetail, ConversationId, ConversationSummary, Message, MessageId,
    NewMessage, PairKey, Participant, PasswordHash, RepositoryError, Theme, Timestamp, User,
    UserId, Username,
};
use sqlx::{postgres::PgPoolOptions, FromRow, PgPool, Postgres, Transaction};
use uuid::Uuid;

fn map_sqlx_err(err: sqlx::Error) -> RepositoryError {
    match &err {
        sqlx::Error::Database(db) if db.is_unique_violation() => RepositoryError::Conflict,
        sqlx::Error::Database(db) if db.is_foreign_key_violation() => RepositoryError::NotFound,
        _ => RepositoryError::storage(err.to_string()),
    }
}

fn invalid_data(message: impl Into<String>) -> RepositoryError {
    RepositoryError::storage(message)
}

#[derive(Debug, FromRow)]
struct UserRecord {
    id: Uuid,
    username: String,
    password_hash: String,
    created_at: DateTime<Utc>,
}

impl TryFrom<UserRecord> for User {
    type Error = RepositoryError;

    fn try_from(value: UserRecord) -> Result<Self, Self::Error> {
        let username = Username::parse(value.username).map_err(|err| invalid_data(err.to_string()))?;
        let password =
            PasswordHash::new(value.password_hash).map_err(|err| invalid_data(err.to_string()))?;
        Ok(User::register(
            UserId::from(value.id),
            username,
            password,
            value.created_at,
        ))
    }
}

#[derive(Debug, FromRow)]
struct ConversationRecord {
    id: i64,
    theme: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<ConversationRecord> for Conversation {
    type Error = RepositoryError;

    fn try_from(value: ConversationRecord) -> Result<Self, Self::Error> {
        Ok(Conversation {
            id: ConversationId::from(value.id),
            theme: Theme::parse(value.theme).map_err(|err| invalid_data(err.to_string()))?,
            created_at: value.created_at,
            updated_at: value.updated_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct ParticipantRecord {
    conversation_id: i64,
    user_id: Uuid,
    username: String,
    last_read_at: Option<DateTime<Utc>>,
}

impl From<ParticipantRecord> for Participant {
    fn from(value: ParticipantRecord) -> Self {
        Participant {
            conversation_id: ConversationId::from(value.conversation_id),
            user_id: UserId::from(value.user_id),
            username: value.username,
            last_read_at: value.last_read_at,
        }
    }
}

#[derive(Debug, FromRow)]
struct MessageRecord {
    id: i64,
    conversation_id: i64,
    sender_id: Uuid,
    sender_name: String,
    body: String,
    image_url: Option<String>,
    created_at: DateTime<Utc>,
    read_at: Option<DateTime<Utc>>,
}

impl From<MessageRecord> for Message {
    fn from(value: MessageRecord) -> Self {
        Message {
            id: MessageId::from(value.id),
            conversation_id: ConversationId::from(value.conversation_id),
            sender_id: UserId::from(value.sender_id),
            sender_name: value.sender_name,
            body: value.body,
            image_url: value.image_url,
            created_at: value.created_at,
            read_at: value.read_at,
        }
    }
}

/// 会话列表的一行：会话本身、对方参与者、最后一条消息和未读数
#[derive(Debug, FromRow)]
struct SummaryRecord {
    id: i64,
    theme: String,
    updated_at: DateTime<Utc>,
    peer_id: Option<Uuid>,
    peer_username: Option<String>,
    peer_last_read_at: Option<DateTime<Utc>>,
    last_id: Option<i64>,
    last_sender_id: Option<Uuid>,
    last_sender_name: Option<String>,
    last_body: Option<String>,
    last_image_url: Option<String>,
    last_created_at: Option<DateTime<Utc>>,
    last_read_at: Option<DateTime<Utc>>,
    unread_count: i64,
}

impl TryFrom<SummaryRecord> for ConversationSummary {
    type Error = RepositoryError;

    fn try_from(value: SummaryRecord) -> Result<Self, Self::Error> {
        let id = ConversationId::from(value.id);
        let peer = match (value.peer_id, value.peer_username) {
            (Some(user_id), Some(username)) => Some(Participant {
                conversation_id: id,
                user_id: UserId::from(user_id),
                username,
                last_read_at: value.peer_last_read_at,
            }),
            _ => None,
        };
        let last_message = match (
            value.last_id,
            value.last_sender_id,
            value.last_created_at,
        ) {
            (Some(message_id), Some(sender_id), Some(created_at)) => Some(Message {
                id: MessageId::from(message_id),
                conversation_id: id,
                sender_id: UserId::from(sender_id),
                sender_name: value.last_sender_name.unwrap_or_default(),
                body: value.last_body.unwrap_or_default(),
                image_url: value.last_image_url,
                created_at,
                read_at: value.last_read_at,
            }),
            _ => None,
        };

        Ok(ConversationSummary {
            id,
            theme: Theme::parse(value.theme).map_err(|err| invalid_data(err.to_string()))?,
            updated_at: value.updated_at,
            peer,
            last_message,
            unread_count: value.unread_count,
        })
    }
}

/// 基于 Postgres 的聊天存储，实现全部三个仓储接口
#[derive(Clone)]
pub struct PgChatStore {
    pool: PgPool,
}

impl PgChatStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn begin(&self) -> Result<Transaction<'static, Postgres>, RepositoryError> {
        self.pool.begin().await.map_err(map_sqlx_err)
    }

    async fn load_detail(
        &self,
        id: ConversationId,
    ) -> Result<Option<ConversationDetail>, RepositoryError> {
        let record = sqlx::query_as::<_, ConversationRecord>(
            r#"
            SELECT id, theme, created_at, updated_at
            FROM conversations
            WHERE id = $1
            "#,
        )
        .bind(i64::from(id))
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        let Some(record) = record else {
            return Ok(None);
        };

        let participants = sqlx::query_as::<_, ParticipantRecord>(
            r#"
            SELECT p.conversation_id, p.user_id, u.username, p.last_read_at
            FROM conversation_participants p
            JOIN users u ON u.id = p.user_id
            WHERE p.conversation_id = $1
            ORDER BY p.user_id
            "#,
        )
        .bind(i64::from(id))
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        Ok(Some(ConversationDetail {
            conversation: Conversation::try_from(record)?,
            participants: participants.into_iter().map(Participant::from).collect(),
        }))
    }
}

#[async_trait]
impl UserRepository for PgChatStore {
    async fn create(&self, user: User) -> Result<User, RepositoryError> {
        let record = sqlx::query_as::<_, UserRecord>(
            r#"
            INSERT INTO users (id, username, password_hash, created_at)
            VALUES ($1, $2, $3, $4)
            RETURNING id, username, password_hash, created_at
            "#,
        )
        .bind(Uuid::from(user.id))
        .bind(user.username.as_str())
        .bind(user.password.as_str())
        .bind(user.created_at)
        .fetch_one(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        User::try_from(record)
    }

    async fn find_by_id(&self, id: UserId) -> Result<Option<User>, RepositoryError> {
        let record = sqlx::query_as::<_, UserRecord>(
            r#"
            SELECT id, username, password_hash, created_at
            FROM users
            WHERE id = $1
            "#,
        )
        .bind(Uuid::from(id))
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        record.map(User::try_from).transpose()
    }

    async fn find_by_username(&self, username: &Username) -> Result<Option<User>, RepositoryError> {
        let record = sqlx::query_as::<_, UserRecord>(
            r#"
            SELECT id, username, password_hash, created_at
            FROM users
            WHERE username = $1
            "#,
        )
        .bind(username.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        record.map(User::try_from).transpose()
    }
}

#[async_trait]
impl ConversationRepository for PgChatStore {
    async fn find_or_create_one_to_one(
        &self,
        pair: PairKey,
        now: Timestamp,
    ) -> Result<(ConversationDetail, bool), RepositoryError> {
        let key = pair.as_key();
        let mut tx = self.begin().await?;

        // 并发创建同一对用户时，后到的 INSERT 会等待先到的事务提交后什么也不做
        let inserted: Option<i64> = sqlx::query_scalar(
            r#"
            INSERT INTO conversations (pair_key, created_at, updated_at)
            VALUES ($1, $2, $2)
            ON CONFLICT (pair_key) DO NOTHING
            RETURNING id
            "#,
        )
        .bind(&key)
        .bind(now)
        .fetch_optional(&mut *tx)
        .await
        .map_err(map_sqlx_err)?;

        let (id, created) = match inserted {
            Some(id) => {
                for user_id in pair.users() {
                    sqlx::query(
                        r#"
                        INSERT INTO conversation_participants (conversation_id, user_id)
                        VALUES ($1, $2)
                        "#,
                    )
                    .bind(id)
                    .bind(Uuid::from(user_id))
                    .execute(&mut *tx)
                    .await
                    .map_err(map_sqlx_err)?;
                }
                (id, true)
            }
            None => {
                let id: i64 =
                    sqlx::query_scalar("SELECT id FROM conversations WHERE pair_key = $1")
                        .bind(&key)
                        .fetch_one(&mut *tx)
                        .await
                        .map_err(map_sqlx_err)?;
                (id, false)
            }
        };
        tx.commit().await.map_err(map_sqlx_err)?;

        let detail = self
            .load_detail(ConversationId::from(id))
            .await?
            .ok_or(RepositoryError::NotFound)?;
        Ok((detail, created))
    }

    async fn find_by_id(
        &self,
        id: ConversationId,
    ) -> Result<Option<ConversationDetail>, RepositoryError> {
        self.load_detail(id).await
    }

    async fn is_participant(
        &self,
        id: ConversationId,
        user_id: UserId,
    ) -> Result<bool, RepositoryError> {
        sqlx::query_scalar(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM conversation_participants
                WHERE conversation_id = $1 AND user_id = $2
            )
            "#,
        )
        .bind(i64::from(id))
        .bind(Uuid::from(user_id))
        .fetch_one(&self.pool)
        .await
        .map_err(map_sqlx_err)
    }

    async fn list_for_user(
        &self,
        user_id: UserId,
    ) -> Result<Vec<ConversationSummary>, RepositoryError> {
        let records = sqlx::query_as::<_, SummaryRecord>(
            r#"
            SELECT
                c.id,
                c.theme,
                c.updated_at,
                peer.user_id AS peer_id,
                pu.username AS peer_username,
                peer.last_read_at AS peer_last_read_at,
                lm.id AS last_id,
                lm.sender_id AS last_sender_id,
                lu.username AS last_sender_name,
                lm.body AS last_body,
                lm.image_url AS last_image_url,
                lm.created_at AS last_created_at,
                lm.read_at AS last_read_at,
                (
                    SELECT COUNT(*)
                    FROM messages m
                    WHERE m.conversation_id = c.id
                      AND m.sender_id <> $1
                      AND m.read_at IS NULL
                ) AS unread_count
            FROM conversation_participants me
            JOIN conversations c ON c.id = me.conversation_id
            LEFT JOIN conversation_participants peer
                ON peer.conversation_id = c.id AND peer.user_id <> me.user_id
            LEFT JOIN users pu ON pu.id = peer.user_id
            LEFT JOIN LATERAL (
                SELECT id, sender_id, body, image_url, created_at, read_at
                FROM messages
                WHERE conversation_id = c.id
                ORDER BY id DESC
                LIMIT 1
            ) lm ON TRUE
            LEFT JOIN users lu ON lu.id = lm.sender_id
            WHERE me.user_id = $1
            ORDER BY c.updated_at DESC, c.id DESC
            "#,
        )
        .bind(Uuid::from(user_id))
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        records
            .into_iter()
            .map(ConversationSummary::try_from)
            .collect()
    }

    async fn update_theme(
        &self,
        id: ConversationId,
        theme: Theme,
    ) -> Result<Conversation, RepositoryError> {
        let record = sqlx::query_as::<_, ConversationRecord>(
            r#"
            UPDATE conversations
            SET theme = $2
            WHERE id = $1
            RETURNING id, theme, created_at, updated_at
            "#,
        )
        .bind(i64::from(id))
        .bind(theme.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_err)?
        .ok_or(RepositoryError::NotFound)?;

        Conversation::try_from(record)
    }

    async fn delete(&self, id: ConversationId) -> Result<(), RepositoryError> {
        let mut tx = self.begin().await?;
        let id = i64::from(id);

        sqlx::query("DELETE FROM messages WHERE conversation_id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx_err)?;
        sqlx::query("DELETE FROM conversation_participants WHERE conversation_id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx_err)?;
        let deleted = sqlx::query("DELETE FROM conversations WHERE id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx_err)?
            .rows_affected();

        if deleted == 0 {
            // tx 在 drop 时回滚
            return Err(RepositoryError::NotFound);
        }
        tx.commit().await.map_err(map_sqlx_err)
    }
}

#[async_trait]
impl MessageRepository for PgChatStore {
    async fn save_message(&self, message: NewMessage) -> Result<Message, RepositoryError> {
        let mut tx = self.begin().await?;
        let conversation_id = i64::from(message.conversation_id);

        let touched = sqlx::query("UPDATE conversations SET updated_at = $2 WHERE id = $1")
            .bind(conversation_id)
            .bind(message.created_at)
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx_err)?
            .rows_affected();
        if touched == 0 {
            return Err(RepositoryError::NotFound);
        }

        let record = sqlx::query_as::<_, MessageRecord>(
            r#"
            WITH inserted AS (
                INSERT INTO messages (conversation_id, sender_id, body, image_url, created_at)
                VALUES ($1, $2, $3, $4, $5)
                RETURNING id, conversation_id, sender_id, body, image_url, created_at, read_at
            )
            SELECT i.id, i.conversation_id, i.sender_id, u.username AS sender_name,
                   i.body, i.image_url, i.created_at, i.read_at
            FROM inserted i
            JOIN users u ON u.id = i.sender_id
            "#,
        )
        .bind(conversation_id)
        .bind(Uuid::from(message.sender_id))
        .bind(&message.body)
        .bind(message.image_url.as_deref())
        .bind(message.created_at)
        .fetch_one(&mut *tx)
        .await
        .map_err(map_sqlx_err)?;

        tx.commit().await.map_err(map_sqlx_err)?;
        Ok(Message::from(record))
    }

    async fn list_messages(
        &self,
        conversation_id: ConversationId,
        before: Option<MessageId>,
        limit: u32,
    ) -> Result<Vec<Message>, RepositoryError> {
        let records = sqlx::query_as::<_, MessageRecord>(
            r#"
            SELECT m.id, m.conversation_id, m.sender_id, u.username AS sender_name,
                   m.body, m.image_url, m.created_at, m.read_at
            FROM messages m
            JOIN users u ON u.id = m.sender_id
            WHERE m.conversation_id = $1
              AND ($2::BIGINT IS NULL OR m.id < $2)
            ORDER BY m.id DESC
            LIMIT $3
            "#,
        )
        .bind(i64::from(conversation_id))
        .bind(before.map(i64::from))
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        Ok(records.into_iter().map(Message::from).collect())
    }

    async fn mark_read(
        &self,
        conversation_id: ConversationId,
        reader: UserId,
        at: Timestamp,
    ) -> Result<u64, RepositoryError> {
        let mut tx = self.begin().await?;
        let conversation_id = i64::from(conversation_id);
        let reader = Uuid::from(reader);

        let touched = sqlx::query(
            r#"
            UPDATE conversation_participants
            SET last_read_at = $3
            WHERE conversation_id = $1 AND user_id = $2
            "#,
        )
        .bind(conversation_id)
        .bind(reader)
        .bind(at)
        .execute(&mut *tx)
        .await
        .map_err(map_sqlx_err)?
        .rows_affected();
        if touched == 0 {
            return Err(RepositoryError::NotFound);
        }

        let updated = sqlx::query(
            r#"
            UPDATE messages
            SET read_at = $3
            WHERE conversation_id = $1
              AND sender_id <> $2
              AND read_at IS NULL
            "#,
        )
        .bind(conversation_id)
        .bind(reader)
        .bind(at)
        .execute(&mut *tx)
        .await
        .map_err(map_sqlx_err)?
        .rows_affected();

        tx.commit().await.map_err(map_sqlx_err)?;
        Ok(updated)
    }
}

pub async fn create_pg_pool(
    database_url: &str,
    max_connections: u32,
) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(database_url)
        .await
}
