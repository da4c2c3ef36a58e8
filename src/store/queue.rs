//! Waiting-queue storage interface and in-memory implementation

use crate::error::{MatchmakingError, Result};
use crate::types::{Claim, ClaimToken, MatchAttributes, Participant, ParticipantId, QueueEntry};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeSet, HashMap};
use std::sync::RwLock;

/// Result of an insert-if-absent enqueue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    Inserted,
    AlreadyQueued,
}

/// Result of a conditional claim on a queue entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClaimOutcome {
    Claimed,
    /// Another live claim token holds the entry
    HeldByOther,
    NotFound,
}

/// Result of removing a queue entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoveOutcome {
    Removed,
    NotFound,
    /// Only returned by `remove_unclaimed`
    Claimed,
}

/// Trait for queue storage operations
///
/// Implementations must give read-your-writes consistency to a single caller
/// and must perform `enqueue`, `claim`, `release` and `remove_unclaimed` as
/// atomic conditional writes.
#[async_trait]
pub trait QueueStore: Send + Sync {
    /// Insert an entry for the participant unless one is already live
    async fn enqueue(&self, participant: &Participant) -> Result<EnqueueOutcome>;

    /// Get the live entry for a participant
    async fn get(&self, participant_id: &ParticipantId) -> Result<Option<QueueEntry>>;

    /// Entries other than the requester that speak the same language, are not
    /// in `exclude`, and are not reserved by a live claim
    async fn query_candidates(
        &self,
        participant_id: &ParticipantId,
        attributes: &MatchAttributes,
        exclude: &BTreeSet<ParticipantId>,
    ) -> Result<Vec<QueueEntry>>;

    /// Reserve an entry for a pairing attempt
    ///
    /// Succeeds if the entry exists and is unclaimed, its claim has expired,
    /// or it is already held by the same token.
    async fn claim(
        &self,
        participant_id: &ParticipantId,
        token: ClaimToken,
        expires_at: DateTime<Utc>,
    ) -> Result<ClaimOutcome>;

    /// Drop a reservation if it is still held by `token`
    async fn release(&self, participant_id: &ParticipantId, token: ClaimToken) -> Result<bool>;

    /// Remove an entry regardless of claims
    async fn remove(&self, participant_id: &ParticipantId) -> Result<RemoveOutcome>;

    /// Remove an entry only if no live claim holds it
    async fn remove_unclaimed(&self, participant_id: &ParticipantId) -> Result<RemoveOutcome>;

    /// Remove unclaimed entries enqueued before `cutoff`
    async fn remove_expired(&self, cutoff: DateTime<Utc>) -> Result<Vec<ParticipantId>>;

    /// Number of live entries
    async fn len(&self) -> Result<usize>;
}

/// In-memory queue store
#[derive(Debug, Default)]
pub struct InMemoryQueueStore {
    entries: RwLock<HashMap<ParticipantId, QueueEntry>>,
}

impl InMemoryQueueStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of every entry (for admin/debugging)
    pub fn snapshot(&self) -> Result<Vec<QueueEntry>> {
        let entries = self.read()?;
        Ok(entries.values().cloned().collect())
    }

    fn read(
        &self,
    ) -> Result<std::sync::RwLockReadGuard<'_, HashMap<ParticipantId, QueueEntry>>> {
        self.entries
            .read()
            .map_err(|_| MatchmakingError::queue_unavailable("Failed to acquire queue read lock").into())
    }

    fn write(
        &self,
    ) -> Result<std::sync::RwLockWriteGuard<'_, HashMap<ParticipantId, QueueEntry>>> {
        self.entries
            .write()
            .map_err(|_| MatchmakingError::queue_unavailable("Failed to acquire queue write lock").into())
    }
}

#[async_trait]
impl QueueStore for InMemoryQueueStore {
    async fn enqueue(&self, participant: &Participant) -> Result<EnqueueOutcome> {
        let mut entries = self.write()?;

        if entries.contains_key(&participant.id) {
            return Ok(EnqueueOutcome::AlreadyQueued);
        }

        entries.insert(participant.id.clone(), QueueEntry::new(participant.clone()));
        Ok(EnqueueOutcome::Inserted)
    }

    async fn get(&self, participant_id: &ParticipantId) -> Result<Option<QueueEntry>> {
        let entries = self.read()?;
        Ok(entries.get(participant_id).cloned())
    }

    async fn query_candidates(
        &self,
        participant_id: &ParticipantId,
        attributes: &MatchAttributes,
        exclude: &BTreeSet<ParticipantId>,
    ) -> Result<Vec<QueueEntry>> {
        let now = Utc::now();
        let entries = self.read()?;

        let candidates = entries
            .values()
            .filter(|entry| {
                entry.participant_id() != participant_id
                    && !exclude.contains(entry.participant_id())
                    && entry.participant.attributes.same_language(attributes)
                    && !entry.is_claimed(now)
            })
            .cloned()
            .collect();

        Ok(candidates)
    }

    async fn claim(
        &self,
        participant_id: &ParticipantId,
        token: ClaimToken,
        expires_at: DateTime<Utc>,
    ) -> Result<ClaimOutcome> {
        let now = Utc::now();
        let mut entries = self.write()?;

        let Some(entry) = entries.get_mut(participant_id) else {
            return Ok(ClaimOutcome::NotFound);
        };

        match entry.claim {
            Some(existing) if existing.is_live(now) && existing.token != token => {
                Ok(ClaimOutcome::HeldByOther)
            }
            _ => {
                entry.claim = Some(Claim { token, expires_at });
                Ok(ClaimOutcome::Claimed)
            }
        }
    }

    async fn release(&self, participant_id: &ParticipantId, token: ClaimToken) -> Result<bool> {
        let mut entries = self.write()?;

        match entries.get_mut(participant_id) {
            Some(entry) if entry.claim.map(|c| c.token) == Some(token) => {
                entry.claim = None;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn remove(&self, participant_id: &ParticipantId) -> Result<RemoveOutcome> {
        let mut entries = self.write()?;

        match entries.remove(participant_id) {
            Some(_) => Ok(RemoveOutcome::Removed),
            None => Ok(RemoveOutcome::NotFound),
        }
    }

    async fn remove_unclaimed(&self, participant_id: &ParticipantId) -> Result<RemoveOutcome> {
        let now = Utc::now();
        let mut entries = self.write()?;

        match entries.get(participant_id) {
            None => Ok(RemoveOutcome::NotFound),
            Some(entry) if entry.is_claimed(now) => Ok(RemoveOutcome::Claimed),
            Some(_) => {
                entries.remove(participant_id);
                Ok(RemoveOutcome::Removed)
            }
        }
    }

    async fn remove_expired(&self, cutoff: DateTime<Utc>) -> Result<Vec<ParticipantId>> {
        let now = Utc::now();
        let mut entries = self.write()?;

        let expired: Vec<ParticipantId> = entries
            .values()
            .filter(|entry| entry.enqueued_at < cutoff && !entry.is_claimed(now))
            .map(|entry| entry.participant_id().clone())
            .collect();

        for participant_id in &expired {
            entries.remove(participant_id);
        }

        Ok(expired)
    }

    async fn len(&self) -> Result<usize> {
        Ok(self.read()?.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use uuid::Uuid;

    fn participant(id: &str, language: &str) -> Participant {
        Participant::new(id, MatchAttributes::for_language(language))
    }

    fn in_a_minute() -> DateTime<Utc> {
        Utc::now() + Duration::seconds(60)
    }

    #[tokio::test]
    async fn test_enqueue_is_insert_if_absent() {
        let store = InMemoryQueueStore::new();
        let p = participant("u1", "en");

        assert_eq!(store.enqueue(&p).await.unwrap(), EnqueueOutcome::Inserted);
        assert_eq!(
            store.enqueue(&p).await.unwrap(),
            EnqueueOutcome::AlreadyQueued
        );
        assert_eq!(store.len().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_enqueue_creates_single_entry() {
        let store = std::sync::Arc::new(InMemoryQueueStore::new());

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let store = store.clone();
                tokio::spawn(async move { store.enqueue(&participant("u1", "en")).await.unwrap() })
            })
            .collect();

        let outcomes = futures::future::join_all(handles).await;
        let inserted = outcomes
            .into_iter()
            .filter(|o| matches!(o, Ok(EnqueueOutcome::Inserted)))
            .count();

        assert_eq!(inserted, 1);
        assert_eq!(store.len().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_query_filters_self_language_exclusions_and_claims() {
        let store = InMemoryQueueStore::new();
        for p in [
            participant("me", "en"),
            participant("en_1", "en"),
            participant("en_2", "EN"),
            participant("blocked", "en"),
            participant("reserved", "en"),
            participant("ko_1", "ko"),
        ] {
            store.enqueue(&p).await.unwrap();
        }
        store
            .claim(&"reserved".to_string(), Uuid::new_v4(), in_a_minute())
            .await
            .unwrap();

        let exclude: BTreeSet<_> = ["blocked".to_string()].into_iter().collect();
        let mut ids: Vec<_> = store
            .query_candidates(&"me".to_string(), &MatchAttributes::for_language("en"), &exclude)
            .await
            .unwrap()
            .into_iter()
            .map(|e| e.participant.id)
            .collect();
        ids.sort();

        assert_eq!(ids, vec!["en_1".to_string(), "en_2".to_string()]);
    }

    #[tokio::test]
    async fn test_claim_is_exclusive_until_released() {
        let store = InMemoryQueueStore::new();
        store.enqueue(&participant("u1", "en")).await.unwrap();
        let id = "u1".to_string();
        let first = Uuid::new_v4();
        let second = Uuid::new_v4();

        assert_eq!(
            store.claim(&id, first, in_a_minute()).await.unwrap(),
            ClaimOutcome::Claimed
        );
        // Same token is idempotent
        assert_eq!(
            store.claim(&id, first, in_a_minute()).await.unwrap(),
            ClaimOutcome::Claimed
        );
        assert_eq!(
            store.claim(&id, second, in_a_minute()).await.unwrap(),
            ClaimOutcome::HeldByOther
        );

        // Releasing with the wrong token is a no-op
        assert!(!store.release(&id, second).await.unwrap());
        assert!(store.release(&id, first).await.unwrap());

        assert_eq!(
            store.claim(&id, second, in_a_minute()).await.unwrap(),
            ClaimOutcome::Claimed
        );
    }

    #[tokio::test]
    async fn test_expired_claim_can_be_taken_over() {
        let store = InMemoryQueueStore::new();
        store.enqueue(&participant("u1", "en")).await.unwrap();
        let id = "u1".to_string();

        let stale = Utc::now() - Duration::seconds(1);
        store.claim(&id, Uuid::new_v4(), stale).await.unwrap();

        assert_eq!(
            store.claim(&id, Uuid::new_v4(), in_a_minute()).await.unwrap(),
            ClaimOutcome::Claimed
        );
    }

    #[tokio::test]
    async fn test_claim_missing_entry() {
        let store = InMemoryQueueStore::new();
        assert_eq!(
            store
                .claim(&"ghost".to_string(), Uuid::new_v4(), in_a_minute())
                .await
                .unwrap(),
            ClaimOutcome::NotFound
        );
    }

    #[tokio::test]
    async fn test_remove_and_remove_unclaimed() {
        let store = InMemoryQueueStore::new();
        store.enqueue(&participant("u1", "en")).await.unwrap();
        store.enqueue(&participant("u2", "en")).await.unwrap();
        let (u1, u2) = ("u1".to_string(), "u2".to_string());

        store.claim(&u2, Uuid::new_v4(), in_a_minute()).await.unwrap();

        assert_eq!(
            store.remove_unclaimed(&u1).await.unwrap(),
            RemoveOutcome::Removed
        );
        assert_eq!(
            store.remove_unclaimed(&u1).await.unwrap(),
            RemoveOutcome::NotFound
        );
        assert_eq!(
            store.remove_unclaimed(&u2).await.unwrap(),
            RemoveOutcome::Claimed
        );
        assert_eq!(store.remove(&u2).await.unwrap(), RemoveOutcome::Removed);
        assert_eq!(store.remove(&u2).await.unwrap(), RemoveOutcome::NotFound);
    }

    #[tokio::test]
    async fn test_remove_expired_skips_recent_and_claimed() {
        let store = InMemoryQueueStore::new();
        store.enqueue(&participant("old", "en")).await.unwrap();
        store.enqueue(&participant("old_claimed", "en")).await.unwrap();
        store
            .claim(&"old_claimed".to_string(), Uuid::new_v4(), in_a_minute())
            .await
            .unwrap();

        let cutoff = Utc::now() + Duration::milliseconds(1);
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        store.enqueue(&participant("fresh", "en")).await.unwrap();

        let expired = store.remove_expired(cutoff).await.unwrap();
        assert_eq!(expired, vec!["old".to_string()]);
        assert_eq!(store.len().await.unwrap(), 2);
    }
}
