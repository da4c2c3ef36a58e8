//! Room registry interface and in-memory implementation

use crate::error::{MatchmakingError, Result};
use crate::types::{MatchResult, PairKey, ParticipantId, Room};
use crate::utils::{current_timestamp, generate_room_id};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::RwLock;

/// Trait for room registry operations
#[async_trait]
pub trait RoomRegistry: Send + Sync {
    /// Look up the canonical room for an unordered pair
    async fn find_room_for_pair(&self, a: &ParticipantId, b: &ParticipantId)
        -> Result<Option<Room>>;

    /// Return the pair's room, creating it if none exists
    ///
    /// Concurrent calls for the same pair must all return the same room.
    async fn create_or_get_room(&self, a: &ParticipantId, b: &ParticipantId) -> Result<Room>;

    /// Durably record a committed pairing for delivery to both participants
    async fn record_match(&self, result: &MatchResult) -> Result<()>;

    /// Read the undelivered pairing for a participant without consuming it
    async fn peek_match(&self, participant_id: &ParticipantId) -> Result<Option<MatchResult>>;

    /// Take the undelivered pairing for a participant, if any
    async fn take_match(&self, participant_id: &ParticipantId) -> Result<Option<MatchResult>>;

    /// Drop undelivered pairings recorded before `cutoff`
    async fn purge_results_before(&self, cutoff: DateTime<Utc>) -> Result<usize>;

    /// Number of rooms in the registry
    async fn room_count(&self) -> Result<usize>;
}

/// In-memory room registry
#[derive(Debug, Default)]
pub struct InMemoryRoomRegistry {
    rooms: RwLock<HashMap<PairKey, Room>>,
    deliveries: RwLock<HashMap<ParticipantId, MatchResult>>,
}

impl InMemoryRoomRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// All rooms (for admin/debugging)
    pub fn rooms(&self) -> Result<Vec<Room>> {
        let rooms = self
            .rooms
            .read()
            .map_err(|_| MatchmakingError::rooms_unavailable("Failed to acquire rooms read lock"))?;
        Ok(rooms.values().cloned().collect())
    }
}

#[async_trait]
impl RoomRegistry for InMemoryRoomRegistry {
    async fn find_room_for_pair(
        &self,
        a: &ParticipantId,
        b: &ParticipantId,
    ) -> Result<Option<Room>> {
        let rooms = self
            .rooms
            .read()
            .map_err(|_| MatchmakingError::rooms_unavailable("Failed to acquire rooms read lock"))?;

        Ok(rooms.get(&PairKey::new(a.clone(), b.clone())).cloned())
    }

    async fn create_or_get_room(&self, a: &ParticipantId, b: &ParticipantId) -> Result<Room> {
        let mut rooms = self
            .rooms
            .write()
            .map_err(|_| MatchmakingError::rooms_unavailable("Failed to acquire rooms write lock"))?;

        let pair = PairKey::new(a.clone(), b.clone());
        let room = rooms.entry(pair.clone()).or_insert_with(|| Room {
            room_id: generate_room_id(),
            pair,
            created_at: current_timestamp(),
        });

        Ok(room.clone())
    }

    async fn record_match(&self, result: &MatchResult) -> Result<()> {
        let mut deliveries = self.deliveries.write().map_err(|_| {
            MatchmakingError::rooms_unavailable("Failed to acquire deliveries write lock")
        })?;

        for member in result.pair.members() {
            deliveries.insert(member.clone(), result.clone());
        }

        Ok(())
    }

    async fn peek_match(&self, participant_id: &ParticipantId) -> Result<Option<MatchResult>> {
        let deliveries = self.deliveries.read().map_err(|_| {
            MatchmakingError::rooms_unavailable("Failed to acquire deliveries read lock")
        })?;

        Ok(deliveries.get(participant_id).cloned())
    }

    async fn take_match(&self, participant_id: &ParticipantId) -> Result<Option<MatchResult>> {
        let mut deliveries = self.deliveries.write().map_err(|_| {
            MatchmakingError::rooms_unavailable("Failed to acquire deliveries write lock")
        })?;

        Ok(deliveries.remove(participant_id))
    }

    async fn purge_results_before(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        let mut deliveries = self.deliveries.write().map_err(|_| {
            MatchmakingError::rooms_unavailable("Failed to acquire deliveries write lock")
        })?;

        let before = deliveries.len();
        deliveries.retain(|_, result| result.matched_at >= cutoff);
        Ok(before - deliveries.len())
    }

    async fn room_count(&self) -> Result<usize> {
        let rooms = self
            .rooms
            .read()
            .map_err(|_| MatchmakingError::rooms_unavailable("Failed to acquire rooms read lock"))?;
        Ok(rooms.len())
    }
}
