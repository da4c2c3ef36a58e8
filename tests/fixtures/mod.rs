//! Test fixtures and instrumented store implementations for integration testing
#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tandem_match::error::{MatchmakingError, Result};
use tandem_match::matching::{MatchEngine, MatchingConfig, UniformSelector};
use tandem_match::store::{
    ClaimOutcome, EnqueueOutcome, InMemoryQueueStore, InMemoryRoomRegistry, QueueStore,
    RemoveOutcome,
};
use tandem_match::types::{
    ClaimToken, MatchAttributes, MatchRequest, Participant, ParticipantId, QueueEntry,
};
use tokio::sync::Barrier;

/// Queue store wrapper that records calls and can inject interleavings
#[derive(Default)]
pub struct InstrumentedQueue {
    inner: InMemoryQueueStore,
    removed: Mutex<HashMap<ParticipantId, usize>>,
    claim_calls: AtomicUsize,
    query_calls: AtomicUsize,
    query_barrier: Mutex<Option<(Arc<Barrier>, usize)>>,
    vanish_on_claim: Mutex<HashSet<ParticipantId>>,
    always_held: Mutex<HashSet<ParticipantId>>,
    fail_next_remove: Mutex<HashSet<ParticipantId>>,
    echo_requester: Mutex<bool>,
}

impl InstrumentedQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hold the first `parties` candidate queries until all of them have run
    pub fn with_query_barrier(self, parties: usize) -> Self {
        *self.query_barrier.lock().unwrap() = Some((Arc::new(Barrier::new(parties)), parties));
        self
    }

    /// Remove `id` from the queue right before its first claim
    pub fn vanish_on_claim(&self, id: &str) {
        self.vanish_on_claim.lock().unwrap().insert(id.to_string());
    }

    /// Report every claim on `id` as held by another attempt
    pub fn always_held(&self, id: &str) {
        self.always_held.lock().unwrap().insert(id.to_string());
    }

    /// Fail the next `remove` of `id` with a store outage
    pub fn fail_next_remove(&self, id: &str) {
        self.fail_next_remove.lock().unwrap().insert(id.to_string());
    }

    /// Return the requester among its own candidates
    pub fn echo_requester(&self) {
        *self.echo_requester.lock().unwrap() = true;
    }

    /// Times a `remove` actually deleted the entry for `id`
    pub fn removed_count(&self, id: &str) -> usize {
        self.removed.lock().unwrap().get(id).copied().unwrap_or(0)
    }

    pub fn claim_calls(&self) -> usize {
        self.claim_calls.load(Ordering::SeqCst)
    }

    pub fn inner(&self) -> &InMemoryQueueStore {
        &self.inner
    }
}

#[async_trait]
impl QueueStore for InstrumentedQueue {
    async fn enqueue(&self, participant: &Participant) -> Result<EnqueueOutcome> {
        self.inner.enqueue(participant).await
    }

    async fn get(&self, participant_id: &ParticipantId) -> Result<Option<QueueEntry>> {
        self.inner.get(participant_id).await
    }

    async fn query_candidates(
        &self,
        participant_id: &ParticipantId,
        attributes: &MatchAttributes,
        exclude: &BTreeSet<ParticipantId>,
    ) -> Result<Vec<QueueEntry>> {
        let call = self.query_calls.fetch_add(1, Ordering::SeqCst);
        let mut candidates = self
            .inner
            .query_candidates(participant_id, attributes, exclude)
            .await?;

        // Both sides leave with a snapshot taken before either claimed
        let barrier = self
            .query_barrier
            .lock()
            .unwrap()
            .as_ref()
            .filter(|(_, parties)| call < *parties)
            .map(|(barrier, _)| barrier.clone());
        if let Some(barrier) = barrier {
            barrier.wait().await;
        }

        let echo = *self.echo_requester.lock().unwrap();
        if echo {
            if let Some(entry) = self.inner.get(participant_id).await? {
                candidates.push(entry);
            }
        }

        Ok(candidates)
    }

    async fn claim(
        &self,
        participant_id: &ParticipantId,
        token: ClaimToken,
        expires_at: DateTime<Utc>,
    ) -> Result<ClaimOutcome> {
        self.claim_calls.fetch_add(1, Ordering::SeqCst);

        if self.always_held.lock().unwrap().contains(participant_id) {
            return Ok(ClaimOutcome::HeldByOther);
        }

        let vanish = self.vanish_on_claim.lock().unwrap().remove(participant_id);
        if vanish {
            self.inner.remove(participant_id).await?;
        }

        self.inner.claim(participant_id, token, expires_at).await
    }

    async fn release(&self, participant_id: &ParticipantId, token: ClaimToken) -> Result<bool> {
        self.inner.release(participant_id, token).await
    }

    async fn remove(&self, participant_id: &ParticipantId) -> Result<RemoveOutcome> {
        let fail = self.fail_next_remove.lock().unwrap().remove(participant_id);
        if fail {
            return Err(MatchmakingError::queue_unavailable("injected remove failure").into());
        }

        let outcome = self.inner.remove(participant_id).await?;
        if outcome == RemoveOutcome::Removed {
            *self
                .removed
                .lock()
                .unwrap()
                .entry(participant_id.clone())
                .or_insert(0) += 1;
        }
        Ok(outcome)
    }

    async fn remove_unclaimed(&self, participant_id: &ParticipantId) -> Result<RemoveOutcome> {
        self.inner.remove_unclaimed(participant_id).await
    }

    async fn remove_expired(&self, cutoff: DateTime<Utc>) -> Result<Vec<ParticipantId>> {
        self.inner.remove_expired(cutoff).await
    }

    async fn len(&self) -> Result<usize> {
        self.inner.len().await
    }
}

/// Engine over the given queue and a fresh room registry
pub fn create_engine(queue: Arc<dyn QueueStore>) -> (MatchEngine, Arc<InMemoryRoomRegistry>) {
    let rooms = Arc::new(InMemoryRoomRegistry::new());
    let engine = MatchEngine::new(queue, rooms.clone());
    (engine, rooms)
}

/// Engine with a seeded selector and a custom attempt limit
pub fn create_engine_with(
    queue: Arc<dyn QueueStore>,
    max_attempts: u32,
    seed: u64,
) -> (MatchEngine, Arc<InMemoryRoomRegistry>) {
    let rooms = Arc::new(InMemoryRoomRegistry::new());
    let engine = MatchEngine::new(queue, rooms.clone())
        .with_selector(Arc::new(UniformSelector::seeded(seed)))
        .with_config(MatchingConfig {
            max_attempts,
            ..MatchingConfig::default()
        });
    (engine, rooms)
}

/// Match request for an English speaker
pub fn en(id: &str) -> MatchRequest {
    MatchRequest::new(id, MatchAttributes::for_language("en"))
}

pub fn id(s: &str) -> ParticipantId {
    s.to_string()
}
