use std::collections::{BTreeMap, BTreeSet};

use async_trait::async_trait;
use domain::{ConnectionId, ConversationId};
use tokio::sync::RwLock;

use crate::error::ApplicationError;
use crate::rooms::{JoinOutcome, RoomMember, RoomRegistry};

#[derive(Debug, Default)]
pub struct InMemoryRoomRegistry {
    rooms: RwLock<BTreeMap<ConversationId, BTreeSet<RoomMember>>>,
}

impl InMemoryRoomRegistry {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RoomRegistry for InMemoryRoomRegistry {
    async fn join(
        &self,
        conversation_id: ConversationId,
        member: RoomMember,
    ) -> Result<JoinOutcome, ApplicationError> {
        let mut rooms = self.rooms.write().await;
        let room = rooms.entry(conversation_id).or_default();

        let evicted: Vec<ConnectionId> = room
            .iter()
            .filter(|m| m.user_id == member.user_id && m.connection_id != member.connection_id)
            .map(|m| m.connection_id)
            .collect();
        room.retain(|m| m.user_id != member.user_id);

        let peers = room.iter().copied().collect();
        room.insert(member);

        Ok(JoinOutcome { evicted, peers })
    }

    async fn leave(
        &self,
        conversation_id: ConversationId,
        connection_id: ConnectionId,
    ) -> Result<bool, ApplicationError> {
        let mut rooms = self.rooms.write().await;
        let Some(room) = rooms.get_mut(&conversation_id) else {
            return Ok(false);
        };
        let before = room.len();
        room.retain(|m| m.connection_id != connection_id);
        let removed = room.len() != before;
        if room.is_empty() {
            rooms.remove(&conversation_id);
        }
        Ok(removed)
    }

    async fn members(
        &self,
        conversation_id: ConversationId,
    ) -> Result<Vec<RoomMember>, ApplicationError> {
        Ok(self
            .rooms
            .read()
            .await
            .get(&conversation_id)
            .map(|room| room.iter().copied().collect())
            .unwrap_or_default())
    }

    async fn contains(
        &self,
        conversation_id: ConversationId,
        connection_id: ConnectionId,
    ) -> Result<bool, ApplicationError> {
        Ok(self
            .rooms
            .read()
            .await
            .get(&conversation_id)
            .is_some_and(|room| room.iter().any(|m| m.connection_id == connection_id)))
    }

    async fn drop_connection(
        &self,
        connection_id: ConnectionId,
    ) -> Result<Vec<ConversationId>, ApplicationError> {
        let mut rooms = self.rooms.write().await;
        let mut left = Vec::new();
        for (conversation_id, room) in rooms.iter_mut() {
            let before = room.len();
            room.retain(|m| m.connection_id != connection_id);
            if room.len() != before {
                left.push(*conversation_id);
            }
        }
        rooms.retain(|_, room| !room.is_empty());
        Ok(left)
    }

    async fn clear(
        &self,
        conversation_id: ConversationId,
    ) -> Result<Vec<RoomMember>, ApplicationError> {
        Ok(self
            .rooms
            .write()
            .await
            .remove(&conversation_id)
            .map(|room| room.into_iter().collect())
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use domain::UserId;
    use uuid::Uuid;

    fn member(user_id: UserId) -> RoomMember {
        RoomMember {
            connection_id: ConnectionId::generate(),
            user_id,
        }
    }

    #[tokio::test]
    async fn rejoin_from_new_connection_evicts_old_one() {
        let registry = InMemoryRoomRegistry::new();
        let room = ConversationId::new(1);
        let alice = UserId::from(Uuid::new_v4());
        let bob = UserId::from(Uuid::new_v4());

        let bob_conn = member(bob);
        registry.join(room, bob_conn).await.unwrap();

        let first = member(alice);
        let outcome = registry.join(room, first).await.unwrap();
        assert!(outcome.evicted.is_empty());
        assert_eq!(outcome.present_users(), vec![bob]);

        let second = member(alice);
        let outcome = registry.join(room, second).await.unwrap();
        assert_eq!(outcome.evicted, vec![first.connection_id]);
        assert_eq!(outcome.peers, vec![bob_conn]);

        assert!(!registry.contains(room, first.connection_id).await.unwrap());
        assert!(registry.contains(room, second.connection_id).await.unwrap());
        assert_eq!(registry.members(room).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn drop_connection_reports_rooms_and_prunes_empty_ones() {
        let registry = InMemoryRoomRegistry::new();
        let alice = member(UserId::from(Uuid::new_v4()));
        registry.join(ConversationId::new(1), alice).await.unwrap();
        registry.join(ConversationId::new(2), alice).await.unwrap();

        let left = registry.drop_connection(alice.connection_id).await.unwrap();
        assert_eq!(left, vec![ConversationId::new(1), ConversationId::new(2)]);
        assert!(registry.members(ConversationId::new(1)).await.unwrap().is_empty());
        assert!(!registry
            .leave(ConversationId::new(2), alice.connection_id)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn clear_returns_previous_members() {
        let registry = InMemoryRoomRegistry::new();
        let room = ConversationId::new(9);
        let alice = member(UserId::from(Uuid::new_v4()));
        registry.join(room, alice).await.unwrap();

        assert_eq!(registry.clear(room).await.unwrap(), vec![alice]);
        assert!(registry.members(room).await.unwrap().is_empty());
    }
}
