//! Matching engine implementation
//!
//! This module provides the MatchEngine that orchestrates a match request:
//! idempotent enqueue, candidate search, uniform random selection, room
//! resolution, commit and queue cleanup. All coordination with concurrent
//! requests goes through conditional operations on the stores, so the engine
//! stays correct when callers run in separate processes.

use crate::config::MatchmakingSettings;
use crate::error::{MatchmakingError, Result};
use crate::matching::compatibility::{AttributeCompatibility, CompatibilityPolicy};
use crate::matching::eligible_candidates;
use crate::matching::selection::{select_from, CandidateSelector, UniformSelector};
use crate::metrics::MetricsCollector;
use crate::store::{ClaimOutcome, EnqueueOutcome, QueueStore, RemoveOutcome, RoomRegistry};
use crate::types::{
    CancelOutcome, ClaimToken, MatchOutcome, MatchRequest, MatchResult, PairKey, Participant,
    ParticipantId, Room,
};
use crate::utils::{current_timestamp, generate_claim_token, timestamp_after, timestamp_before};
use serde::Serialize;
use std::collections::BTreeSet;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// Configuration for the matching engine
#[derive(Debug, Clone)]
pub struct MatchingConfig {
    /// Pairing attempts per request before answering Pending
    pub max_attempts: u32,
    /// Pause after losing a race for a candidate
    pub retry_backoff: Duration,
    /// How long a pairing reservation protects a queue entry
    pub claim_ttl: Duration,
    /// Waiting time after which an unclaimed entry is swept
    pub max_wait: Duration,
    /// How long an undelivered match result is kept
    pub result_ttl: Duration,
}

impl Default for MatchingConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            retry_backoff: Duration::from_millis(10),
            claim_ttl: Duration::from_secs(30),
            max_wait: Duration::from_secs(300),
            result_ttl: Duration::from_secs(600),
        }
    }
}

impl From<&MatchmakingSettings> for MatchingConfig {
    fn from(settings: &MatchmakingSettings) -> Self {
        Self {
            max_attempts: settings.max_match_attempts,
            retry_backoff: Duration::from_millis(settings.retry_backoff_ms),
            claim_ttl: Duration::from_secs(settings.claim_ttl_seconds),
            max_wait: Duration::from_secs(settings.max_wait_time_seconds),
            result_ttl: Duration::from_secs(settings.result_ttl_seconds),
        }
    }
}

/// Statistics about matching engine operations
#[derive(Debug, Clone, Default, Serialize)]
pub struct EngineStats {
    /// Total match requests received
    pub match_requests: u64,
    /// Pairings committed by this engine
    pub matches_made: u64,
    /// Pairings handed to the waiting side on a later request
    pub matches_delivered: u64,
    /// Requests answered with Pending
    pub pending_responses: u64,
    /// Attempts lost to a concurrent pairing
    pub candidate_races: u64,
    /// Rooms created for a new pair
    pub rooms_created: u64,
    /// Existing rooms reused for a pair
    pub rooms_reused: u64,
    /// Times the store returned the requester as its own candidate
    pub self_match_faults: u64,
    /// Successful cancellations
    pub cancellations: u64,
    /// Entries swept after waiting too long
    pub participants_expired: u64,
    /// Current number of queued participants
    pub participants_waiting: usize,
    /// Current number of rooms in the registry
    pub rooms_total: usize,
}

/// Outcome of a single pairing attempt within a request
#[derive(Debug)]
enum PairingAttempt {
    Matched(MatchResult),
    NoCandidates,
    /// The requester's own entry vanished (cancelled, expired or paired)
    RequesterGone,
    /// The chosen candidate was taken by a concurrent attempt
    Contended { reason: String },
}

/// The random-pairing matching engine
#[derive(Clone)]
pub struct MatchEngine {
    /// Waiting queue
    queue: Arc<dyn QueueStore>,
    /// Room registry and match deliveries
    rooms: Arc<dyn RoomRegistry>,
    /// Compatibility rules for candidates
    policy: Arc<dyn CompatibilityPolicy>,
    /// Random candidate selector
    selector: Arc<dyn CandidateSelector>,
    /// Engine configuration
    config: MatchingConfig,
    /// Engine statistics
    stats: Arc<RwLock<EngineStats>>,
    /// Metrics collector for recording performance data
    metrics_collector: Arc<MetricsCollector>,
}

impl MatchEngine {
    /// Create a new engine with default policy, selector and configuration
    pub fn new(queue: Arc<dyn QueueStore>, rooms: Arc<dyn RoomRegistry>) -> Self {
        let metrics_collector = Arc::new(MetricsCollector::new().unwrap_or_else(|_| {
            warn!("Failed to create metrics collector, using default");
            MetricsCollector::default()
        }));

        Self::with_metrics(queue, rooms, metrics_collector)
    }

    /// Create a new engine with a metrics collector
    pub fn with_metrics(
        queue: Arc<dyn QueueStore>,
        rooms: Arc<dyn RoomRegistry>,
        metrics_collector: Arc<MetricsCollector>,
    ) -> Self {
        Self {
            queue,
            rooms,
            policy: Arc::new(AttributeCompatibility::new()),
            selector: Arc::new(UniformSelector::new()),
            config: MatchingConfig::default(),
            stats: Arc::new(RwLock::new(EngineStats::default())),
            metrics_collector,
        }
    }

    pub fn with_config(mut self, config: MatchingConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_policy(mut self, policy: Arc<dyn CompatibilityPolicy>) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_selector(mut self, selector: Arc<dyn CandidateSelector>) -> Self {
        self.selector = selector;
        self
    }

    pub fn config(&self) -> &MatchingConfig {
        &self.config
    }

    pub fn queue(&self) -> Arc<dyn QueueStore> {
        self.queue.clone()
    }

    pub fn rooms(&self) -> Arc<dyn RoomRegistry> {
        self.rooms.clone()
    }

    /// Handle a match request
    ///
    /// Returns `Pending` while no compatible counterpart is available and
    /// `Matched` once the participant has a room. Store failures propagate
    /// unchanged; the caller is expected to retry the whole request.
    pub async fn request_match(&self, request: MatchRequest) -> Result<MatchOutcome> {
        let start_time = Instant::now();
        validate_request(&request)?;

        info!(
            "Processing match request - participant: '{}', language: {}, exclusions: {}",
            request.participant_id,
            request.attributes.language,
            request.exclude.len() + request.attributes.blocked.len()
        );

        self.update_stats(|stats| stats.match_requests += 1)?;

        let result = self.run_match_cycle(&request).await;
        let duration = start_time.elapsed();

        match &result {
            Ok(MatchOutcome::Matched { room_id, partner_id }) => {
                info!(
                    "Match request completed - participant: '{}', partner: '{}', room: {}, duration: {:.2}ms",
                    request.participant_id,
                    partner_id,
                    room_id,
                    duration.as_secs_f64() * 1000.0
                );
                self.metrics_collector
                    .record_match_request("matched", duration);
            }
            Ok(MatchOutcome::Pending) => {
                info!(
                    "Match request pending - participant: '{}', duration: {:.2}ms",
                    request.participant_id,
                    duration.as_secs_f64() * 1000.0
                );
                self.update_stats(|stats| stats.pending_responses += 1)?;
                self.metrics_collector
                    .record_match_request("pending", duration);
            }
            Err(e) => {
                error!(
                    "Match request failed - participant: '{}', duration: {:.2}ms, error: {}",
                    request.participant_id,
                    duration.as_secs_f64() * 1000.0,
                    e
                );
                self.metrics_collector.record_match_request("error", duration);
            }
        }

        result
    }

    async fn run_match_cycle(&self, request: &MatchRequest) -> Result<MatchOutcome> {
        let participant_id = &request.participant_id;

        // A counterpart may already have paired us while we waited
        if let Some(outcome) = self.collect_delivery(participant_id).await? {
            return Ok(outcome);
        }

        let participant = Participant::new(participant_id.clone(), request.attributes.clone());
        match self.queue.enqueue(&participant).await? {
            EnqueueOutcome::Inserted => {
                info!("Participant '{}' added to the waiting queue", participant_id);
                self.metrics_collector.record_enqueue(true);

                // A pairing committed between the first check and the insert
                // removed our previous entry; the fresh one must not be offered.
                if let Some(outcome) = self.collect_delivery(participant_id).await? {
                    return Ok(outcome);
                }
            }
            EnqueueOutcome::AlreadyQueued => {
                debug!("Participant '{}' already queued", participant_id);
                self.metrics_collector.record_enqueue(false);
            }
        }

        let exclude = request.exclusion_set();
        let mut raced = false;

        for attempt in 1..=self.config.max_attempts {
            if attempt > 1 {
                if let Some(outcome) = self.collect_delivery(participant_id).await? {
                    return Ok(outcome);
                }
            }

            match self.try_pair(&participant, &exclude).await? {
                PairingAttempt::Matched(result) => {
                    return result.outcome_for(participant_id).ok_or_else(|| {
                        MatchmakingError::InternalError {
                            message: format!(
                                "Committed pair {} does not contain '{}'",
                                result.pair, participant_id
                            ),
                        }
                        .into()
                    });
                }
                PairingAttempt::NoCandidates if raced && attempt < self.config.max_attempts => {
                    // Members of an in-flight pairing are hidden by their claims
                    debug!(
                        "No free candidates for '{}' after a race, waiting for in-flight pairings",
                        participant_id
                    );
                    tokio::time::sleep(self.config.retry_backoff).await;
                }
                PairingAttempt::NoCandidates => {
                    // A counterpart may have paired us since the last check
                    if let Some(outcome) = self.collect_delivery(participant_id).await? {
                        return Ok(outcome);
                    }
                    debug!("No compatible candidates for '{}'", participant_id);
                    return Ok(MatchOutcome::Pending);
                }
                PairingAttempt::RequesterGone => {
                    if let Some(outcome) = self.collect_delivery(participant_id).await? {
                        return Ok(outcome);
                    }
                    info!(
                        "Participant '{}' left the queue mid-request, treating as expired",
                        participant_id
                    );
                    return Ok(MatchOutcome::Pending);
                }
                PairingAttempt::Contended { reason } => {
                    warn!(
                        "Candidate race for '{}' on attempt {}/{}: {}",
                        participant_id, attempt, self.config.max_attempts, reason
                    );
                    self.update_stats(|stats| stats.candidate_races += 1)?;
                    self.metrics_collector.record_candidate_race();
                    raced = true;
                    tokio::time::sleep(self.config.retry_backoff).await;
                }
            }
        }

        if let Some(outcome) = self.collect_delivery(participant_id).await? {
            return Ok(outcome);
        }

        warn!(
            "Giving up on pairing '{}' after {} contended attempts",
            participant_id, self.config.max_attempts
        );
        Ok(MatchOutcome::Pending)
    }

    /// One pass of search, selection, reservation and commit
    async fn try_pair(
        &self,
        participant: &Participant,
        exclude: &BTreeSet<ParticipantId>,
    ) -> Result<PairingAttempt> {
        let raw = self
            .queue
            .query_candidates(&participant.id, &participant.attributes, exclude)
            .await?;
        let raw_count = raw.len();

        let eligible = eligible_candidates(participant, exclude, raw, self.policy.as_ref());

        if eligible.self_matches > 0 {
            error!(
                "Queue store returned '{}' as its own candidate {} time(s); excluded from selection",
                participant.id, eligible.self_matches
            );
            let faults = eligible.self_matches as u64;
            self.update_stats(|stats| stats.self_match_faults += faults)?;
            self.metrics_collector
                .record_self_match_fault(eligible.self_matches);
        }

        self.metrics_collector
            .record_candidate_set_size(eligible.entries.len());
        debug!(
            "Candidate search for '{}' - raw: {}, eligible: {}",
            participant.id,
            raw_count,
            eligible.entries.len()
        );

        let Some(candidate) = select_from(self.selector.as_ref(), &eligible.entries) else {
            return Ok(PairingAttempt::NoCandidates);
        };

        let pair = PairKey::new(participant.id.clone(), candidate.participant_id().clone());
        debug!(
            "Selected '{}' for '{}' out of {} candidates",
            candidate.participant_id(),
            participant.id,
            eligible.entries.len()
        );

        let token = generate_claim_token();
        let expires_at = timestamp_after(current_timestamp(), self.config.claim_ttl);
        let mut held: Vec<&ParticipantId> = Vec::with_capacity(2);

        // Claims are taken in canonical pair order so that two attempts on the
        // same pair always contend on the same entry first.
        for member in pair.members() {
            let outcome = match self.queue.claim(member, token, expires_at).await {
                Ok(outcome) => outcome,
                Err(e) => {
                    self.release_claims(&held, token).await;
                    return Err(e);
                }
            };

            match outcome {
                ClaimOutcome::Claimed => held.push(member),
                ClaimOutcome::HeldByOther => {
                    self.release_claims(&held, token).await;
                    return Ok(PairingAttempt::Contended {
                        reason: format!("'{}' is reserved by another pairing", member),
                    });
                }
                ClaimOutcome::NotFound => {
                    self.release_claims(&held, token).await;
                    if *member == participant.id {
                        return Ok(PairingAttempt::RequesterGone);
                    }
                    return Ok(PairingAttempt::Contended {
                        reason: format!("candidate '{}' is no longer queued", member),
                    });
                }
            }
        }

        let room = match self.resolve_room(&pair).await {
            Ok(room) => room,
            Err(e) => {
                self.release_claims(&held, token).await;
                return Err(e);
            }
        };

        // Reservations only protect the pair for `claim_ttl`; a stalled attempt
        // must not commit over entries another attempt has since claimed.
        match self.lapsed_claim(&pair, token).await {
            Ok(None) => {}
            Ok(Some(member)) => {
                self.release_claims(&held, token).await;
                return Ok(PairingAttempt::Contended {
                    reason: format!("reservation on '{}' lapsed before commit", member),
                });
            }
            Err(e) => {
                self.release_claims(&held, token).await;
                return Err(e);
            }
        }

        let result = MatchResult::new(room.room_id, pair.clone());
        if let Err(e) = self.rooms.record_match(&result).await {
            self.release_claims(&held, token).await;
            return Err(e);
        }

        // The pairing is durable from here on. Claims are left in place on
        // failure so nobody else pairs these entries before they expire.
        self.commit_queue_removal(&result).await?;
        self.rooms.take_match(&participant.id).await?;

        self.update_stats(|stats| stats.matches_made += 1)?;
        info!("Paired {} in room {}", result.pair, result.room_id);

        Ok(PairingAttempt::Matched(result))
    }

    /// Reuse the pair's room if one exists, otherwise create it
    async fn resolve_room(&self, pair: &PairKey) -> Result<Room> {
        if let Some(room) = self
            .rooms
            .find_room_for_pair(pair.first(), pair.second())
            .await?
        {
            debug!("Reusing room {} for {}", room.room_id, pair);
            self.update_stats(|stats| stats.rooms_reused += 1)?;
            self.metrics_collector.record_room_resolution(true);
            return Ok(room);
        }

        let room = self
            .rooms
            .create_or_get_room(pair.first(), pair.second())
            .await?;
        debug!("Created room {} for {}", room.room_id, pair);
        self.update_stats(|stats| stats.rooms_created += 1)?;
        self.metrics_collector.record_room_resolution(false);
        Ok(room)
    }

    async fn commit_queue_removal(&self, result: &MatchResult) -> Result<()> {
        for member in result.pair.members() {
            match self.queue.remove(member).await? {
                RemoveOutcome::Removed => {
                    debug!("Removed '{}' from the waiting queue", member)
                }
                RemoveOutcome::NotFound | RemoveOutcome::Claimed => warn!(
                    "Queue entry for '{}' already gone while committing room {}",
                    member, result.room_id
                ),
            }
        }
        Ok(())
    }

    async fn release_claims(&self, held: &[&ParticipantId], token: ClaimToken) {
        for member in held {
            match self.queue.release(member, token).await {
                Ok(true) => debug!("Released reservation on '{}'", member),
                Ok(false) => debug!("Reservation on '{}' already gone", member),
                Err(e) => warn!(
                    "Failed to release reservation on '{}', it will expire: {}",
                    member, e
                ),
            }
        }
    }

    /// First pair member whose entry no longer carries our live claim
    async fn lapsed_claim<'a>(
        &self,
        pair: &'a PairKey,
        token: ClaimToken,
    ) -> Result<Option<&'a ParticipantId>> {
        let now = current_timestamp();

        for member in pair.members() {
            let held = self
                .queue
                .get(member)
                .await?
                .and_then(|entry| entry.claim)
                .is_some_and(|claim| claim.token == token && claim.is_live(now));
            if !held {
                return Ok(Some(member));
            }
        }

        Ok(None)
    }

    /// Hand over a pairing recorded by the counterpart, if any
    ///
    /// The delivery is acknowledged only after the queue entry is gone, so a
    /// failed request can be retried without losing the room.
    async fn collect_delivery(&self, participant_id: &ParticipantId) -> Result<Option<MatchOutcome>> {
        let Some(result) = self.rooms.peek_match(participant_id).await? else {
            return Ok(None);
        };

        // The committing side may have stopped before removing our entry
        if self.queue.remove(participant_id).await? == RemoveOutcome::Removed {
            debug!("Removed lingering queue entry for '{}'", participant_id);
        }
        self.rooms.take_match(participant_id).await?;

        self.update_stats(|stats| stats.matches_delivered += 1)?;
        info!(
            "Delivering match to '{}' - room {}",
            participant_id, result.room_id
        );

        Ok(result.outcome_for(participant_id))
    }

    /// Withdraw a participant from the queue
    ///
    /// Entries reserved by an in-flight pairing are left alone.
    pub async fn cancel(&self, participant_id: &ParticipantId) -> Result<CancelOutcome> {
        if participant_id.trim().is_empty() {
            return Err(MatchmakingError::InvalidMatchRequest {
                reason: "Participant ID cannot be empty".to_string(),
            }
            .into());
        }

        let outcome = match self.queue.remove_unclaimed(participant_id).await? {
            RemoveOutcome::Removed => CancelOutcome::Cancelled,
            RemoveOutcome::NotFound => CancelOutcome::NotQueued,
            RemoveOutcome::Claimed => CancelOutcome::PairingInProgress,
        };

        info!("Cancel request for '{}': {:?}", participant_id, outcome);
        if outcome == CancelOutcome::Cancelled {
            self.update_stats(|stats| stats.cancellations += 1)?;
        }
        self.metrics_collector.record_cancellation(outcome);

        Ok(outcome)
    }

    /// Sweep entries that waited too long and undelivered results
    pub async fn cleanup_expired(&self) -> Result<usize> {
        let now = current_timestamp();

        let expired = self
            .queue
            .remove_expired(timestamp_before(now, self.config.max_wait))
            .await?;
        let purged = self
            .rooms
            .purge_results_before(timestamp_before(now, self.config.result_ttl))
            .await?;

        if !expired.is_empty() {
            info!(
                "Expired {} waiting participant(s): {:?}",
                expired.len(),
                expired
            );
        }
        if purged > 0 {
            info!("Purged {} undelivered match result(s)", purged);
        }

        let count = expired.len();
        self.update_stats(|stats| stats.participants_expired += count as u64)?;
        self.metrics_collector.record_expired(count);

        Ok(count)
    }

    /// Get current engine statistics
    pub async fn get_stats(&self) -> Result<EngineStats> {
        let mut stats = self
            .stats
            .read()
            .map_err(|_| MatchmakingError::InternalError {
                message: "Failed to acquire stats lock".to_string(),
            })?
            .clone();

        stats.participants_waiting = self.queue.len().await?;
        stats.rooms_total = self.rooms.room_count().await?;
        Ok(stats)
    }

    fn update_stats(&self, update: impl FnOnce(&mut EngineStats)) -> Result<()> {
        let mut stats = self
            .stats
            .write()
            .map_err(|_| MatchmakingError::InternalError {
                message: "Failed to acquire stats lock".to_string(),
            })?;
        update(&mut stats);
        Ok(())
    }
}

fn validate_request(request: &MatchRequest) -> Result<()> {
    if request.participant_id.trim().is_empty() {
        return Err(MatchmakingError::InvalidMatchRequest {
            reason: "Participant ID cannot be empty".to_string(),
        }
        .into());
    }

    if request.attributes.language.trim().is_empty() {
        return Err(MatchmakingError::InvalidMatchRequest {
            reason: "Language cannot be empty".to_string(),
        }
        .into());
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::is_transient;
    use crate::store::{InMemoryQueueStore, InMemoryRoomRegistry};
    use crate::types::{Claim, MatchAttributes, QueueEntry};
    use crate::utils::generate_room_id;
    use async_trait::async_trait;
    use chrono::{DateTime, Utc};
    use mockall::mock;

    mock! {
        pub Queue {}

        #[async_trait]
        impl QueueStore for Queue {
            async fn enqueue(&self, participant: &Participant) -> Result<EnqueueOutcome>;
            async fn get(&self, participant_id: &ParticipantId) -> Result<Option<QueueEntry>>;
            async fn query_candidates(
                &self,
                participant_id: &ParticipantId,
                attributes: &MatchAttributes,
                exclude: &BTreeSet<ParticipantId>,
            ) -> Result<Vec<QueueEntry>>;
            async fn claim(
                &self,
                participant_id: &ParticipantId,
                token: ClaimToken,
                expires_at: DateTime<Utc>,
            ) -> Result<ClaimOutcome>;
            async fn release(&self, participant_id: &ParticipantId, token: ClaimToken) -> Result<bool>;
            async fn remove(&self, participant_id: &ParticipantId) -> Result<RemoveOutcome>;
            async fn remove_unclaimed(&self, participant_id: &ParticipantId) -> Result<RemoveOutcome>;
            async fn remove_expired(&self, cutoff: DateTime<Utc>) -> Result<Vec<ParticipantId>>;
            async fn len(&self) -> Result<usize>;
        }
    }

    mock! {
        pub Rooms {}

        #[async_trait]
        impl RoomRegistry for Rooms {
            async fn find_room_for_pair(
                &self,
                a: &ParticipantId,
                b: &ParticipantId,
            ) -> Result<Option<Room>>;
            async fn create_or_get_room(&self, a: &ParticipantId, b: &ParticipantId) -> Result<Room>;
            async fn record_match(&self, result: &MatchResult) -> Result<()>;
            async fn peek_match(&self, participant_id: &ParticipantId) -> Result<Option<MatchResult>>;
            async fn take_match(&self, participant_id: &ParticipantId) -> Result<Option<MatchResult>>;
            async fn purge_results_before(&self, cutoff: DateTime<Utc>) -> Result<usize>;
            async fn room_count(&self) -> Result<usize>;
        }
    }

    fn request(id: &str, language: &str) -> MatchRequest {
        MatchRequest::new(id, MatchAttributes::for_language(language))
    }

    fn create_engine() -> (MatchEngine, Arc<InMemoryQueueStore>, Arc<InMemoryRoomRegistry>) {
        let queue = Arc::new(InMemoryQueueStore::new());
        let rooms = Arc::new(InMemoryRoomRegistry::new());
        let engine = MatchEngine::new(queue.clone(), rooms.clone())
            .with_selector(Arc::new(UniformSelector::seeded(11)));
        (engine, queue, rooms)
    }

    #[tokio::test]
    async fn test_empty_queue_is_pending_and_requester_stays_queued() {
        let (engine, queue, _rooms) = create_engine();

        let outcome = engine.request_match(request("u1", "en")).await.unwrap();

        assert_eq!(outcome, MatchOutcome::Pending);
        assert!(queue.get(&"u1".to_string()).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_two_participants_are_paired_and_dequeued() {
        let (engine, queue, rooms) = create_engine();

        assert_eq!(
            engine.request_match(request("u1", "en")).await.unwrap(),
            MatchOutcome::Pending
        );

        let outcome = engine.request_match(request("u2", "en")).await.unwrap();
        let MatchOutcome::Matched { room_id, partner_id } = outcome else {
            panic!("expected a match, got {:?}", outcome);
        };
        assert_eq!(partner_id, "u1");

        assert_eq!(queue.len().await.unwrap(), 0);
        let room = rooms
            .find_room_for_pair(&"u1".to_string(), &"u2".to_string())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(room.room_id, room_id);

        // The waiting side learns its room on the next request
        assert_eq!(
            engine.request_match(request("u1", "en")).await.unwrap(),
            MatchOutcome::Matched {
                room_id,
                partner_id: "u2".to_string()
            }
        );
        assert_eq!(queue.len().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_repeated_requests_keep_one_entry() {
        let (engine, queue, _rooms) = create_engine();

        for _ in 0..3 {
            assert_eq!(
                engine.request_match(request("u1", "en")).await.unwrap(),
                MatchOutcome::Pending
            );
        }

        assert_eq!(queue.len().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_existing_room_is_reused() {
        let (engine, _queue, rooms) = create_engine();
        let existing = rooms
            .create_or_get_room(&"a".to_string(), &"b".to_string())
            .await
            .unwrap();

        engine.request_match(request("a", "en")).await.unwrap();
        let outcome = engine.request_match(request("b", "en")).await.unwrap();

        assert_eq!(outcome.room_id(), Some(existing.room_id));
        assert_eq!(rooms.room_count().await.unwrap(), 1);

        let stats = engine.get_stats().await.unwrap();
        assert_eq!(stats.rooms_reused, 1);
        assert_eq!(stats.rooms_created, 0);
    }

    #[tokio::test]
    async fn test_incompatible_and_excluded_candidates_stay_pending() {
        let (engine, queue, _rooms) = create_engine();

        engine.request_match(request("u1", "en")).await.unwrap();
        engine.request_match(request("k1", "ko")).await.unwrap();

        let outcome = engine
            .request_match(request("u2", "en").excluding("u1"))
            .await
            .unwrap();

        assert_eq!(outcome, MatchOutcome::Pending);
        assert_eq!(queue.len().await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_invalid_requests_are_rejected() {
        let (engine, _queue, _rooms) = create_engine();

        let err = engine.request_match(request("", "en")).await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<MatchmakingError>(),
            Some(MatchmakingError::InvalidMatchRequest { .. })
        ));

        assert!(engine.request_match(request("u1", "  ")).await.is_err());
    }

    #[tokio::test]
    async fn test_self_candidate_from_store_is_never_paired() {
        let mut queue = MockQueue::new();
        queue
            .expect_enqueue()
            .times(1)
            .returning(|_| Ok(EnqueueOutcome::Inserted));
        queue.expect_query_candidates().times(1).returning(|id, attributes, _| {
            Ok(vec![QueueEntry::new(Participant::new(
                id.clone(),
                attributes.clone(),
            ))])
        });
        queue.expect_claim().never();
        queue.expect_len().returning(|| Ok(1));

        let engine = MatchEngine::new(Arc::new(queue), Arc::new(InMemoryRoomRegistry::new()));

        let outcome = engine.request_match(request("u1", "en")).await.unwrap();
        assert_eq!(outcome, MatchOutcome::Pending);

        let stats = engine.get_stats().await.unwrap();
        assert_eq!(stats.self_match_faults, 1);
        assert_eq!(stats.matches_made, 0);
    }

    #[tokio::test]
    async fn test_transient_queue_error_propagates() {
        let mut queue = MockQueue::new();
        queue
            .expect_enqueue()
            .returning(|_| Err(MatchmakingError::queue_unavailable("connection refused").into()));

        let engine = MatchEngine::new(Arc::new(queue), Arc::new(InMemoryRoomRegistry::new()));

        let err = engine.request_match(request("u1", "en")).await.unwrap_err();
        assert!(is_transient(&err));
    }

    #[tokio::test]
    async fn test_room_failure_releases_reservations() {
        let queue = Arc::new(InMemoryQueueStore::new());
        let mut rooms = MockRooms::new();
        rooms.expect_peek_match().returning(|_| Ok(None));
        rooms
            .expect_find_room_for_pair()
            .returning(|_, _| Err(MatchmakingError::rooms_unavailable("timeout").into()));
        rooms.expect_record_match().never();

        let engine = MatchEngine::new(queue.clone(), Arc::new(rooms));

        engine.request_match(request("u1", "en")).await.unwrap();
        let err = engine.request_match(request("u2", "en")).await.unwrap_err();
        assert!(is_transient(&err));

        let now = Utc::now();
        for id in ["u1", "u2"] {
            let entry = queue.get(&id.to_string()).await.unwrap().unwrap();
            assert!(!entry.is_claimed(now), "{} should not stay reserved", id);
        }
    }

    #[tokio::test]
    async fn test_requester_vanishing_mid_request_is_benign() {
        let mut queue = MockQueue::new();
        queue
            .expect_enqueue()
            .returning(|_| Ok(EnqueueOutcome::Inserted));
        queue.expect_query_candidates().returning(|_, _, _| {
            Ok(vec![QueueEntry::new(Participant::new(
                "b_candidate",
                MatchAttributes::for_language("en"),
            ))])
        });
        // "a_me" sorts first, so its own claim is attempted first
        queue
            .expect_claim()
            .withf(|id, _, _| id.as_str() == "a_me")
            .times(1)
            .returning(|_, _, _| Ok(ClaimOutcome::NotFound));
        queue.expect_release().never();

        let engine = MatchEngine::new(Arc::new(queue), Arc::new(InMemoryRoomRegistry::new()));

        let outcome = engine.request_match(request("a_me", "en")).await.unwrap();
        assert_eq!(outcome, MatchOutcome::Pending);
    }

    #[tokio::test]
    async fn test_delivery_survives_failed_queue_cleanup() {
        let rooms = Arc::new(InMemoryRoomRegistry::new());
        let room = rooms
            .create_or_get_room(&"u1".to_string(), &"u2".to_string())
            .await
            .unwrap();
        rooms
            .record_match(&MatchResult::new(room.room_id, room.pair.clone()))
            .await
            .unwrap();

        let mut queue = MockQueue::new();
        let mut removes = 0;
        queue.expect_remove().times(2).returning(move |_| {
            removes += 1;
            if removes == 1 {
                Err(MatchmakingError::queue_unavailable("connection reset").into())
            } else {
                Ok(RemoveOutcome::NotFound)
            }
        });

        let engine = MatchEngine::new(Arc::new(queue), rooms.clone());

        let err = engine.request_match(request("u1", "en")).await.unwrap_err();
        assert!(is_transient(&err));

        // Retrying the whole request still hands over the room
        let outcome = engine.request_match(request("u1", "en")).await.unwrap();
        assert_eq!(
            outcome,
            MatchOutcome::Matched {
                room_id: room.room_id,
                partner_id: "u2".to_string()
            }
        );
        assert!(rooms.peek_match(&"u1".to_string()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_pairing_committed_during_search_is_delivered() {
        let result = MatchResult::new(generate_room_id(), PairKey::new("u1", "u2"));

        let mut rooms = MockRooms::new();
        let delivered = result.clone();
        let mut peeks = 0;
        // Nothing at the start of the request, recorded by the time the search is empty
        rooms.expect_peek_match().returning(move |_| {
            peeks += 1;
            Ok((peeks > 1).then(|| delivered.clone()))
        });
        let taken = result.clone();
        rooms
            .expect_take_match()
            .times(1)
            .returning(move |_| Ok(Some(taken.clone())));

        let mut queue = MockQueue::new();
        queue
            .expect_enqueue()
            .returning(|_| Ok(EnqueueOutcome::AlreadyQueued));
        queue
            .expect_query_candidates()
            .returning(|_, _, _| Ok(Vec::new()));
        queue
            .expect_remove()
            .times(1)
            .returning(|_| Ok(RemoveOutcome::NotFound));

        let engine = MatchEngine::new(Arc::new(queue), Arc::new(rooms));

        let outcome = engine.request_match(request("u1", "en")).await.unwrap();
        assert_eq!(
            outcome,
            MatchOutcome::Matched {
                room_id: result.room_id,
                partner_id: "u2".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_lapsed_reservation_is_not_committed() {
        let mut queue = MockQueue::new();
        queue
            .expect_enqueue()
            .returning(|_| Ok(EnqueueOutcome::AlreadyQueued));
        queue.expect_query_candidates().returning(|_, _, _| {
            Ok(vec![QueueEntry::new(Participant::new(
                "b",
                MatchAttributes::for_language("en"),
            ))])
        });
        queue
            .expect_claim()
            .times(2)
            .returning(|_, _, _| Ok(ClaimOutcome::Claimed));
        // Our reservations expired and another attempt holds the entries now
        queue.expect_get().returning(|id| {
            let mut entry = QueueEntry::new(Participant::new(
                id.clone(),
                MatchAttributes::for_language("en"),
            ));
            entry.claim = Some(Claim {
                token: generate_claim_token(),
                expires_at: Utc::now() + chrono::Duration::seconds(30),
            });
            Ok(Some(entry))
        });
        queue.expect_release().times(2).returning(|_, _| Ok(false));
        queue.expect_remove().never();

        let mut rooms = MockRooms::new();
        rooms.expect_peek_match().returning(|_| Ok(None));
        rooms.expect_find_room_for_pair().returning(|a, b| {
            Ok(Some(Room {
                room_id: generate_room_id(),
                pair: PairKey::new(a.clone(), b.clone()),
                created_at: Utc::now(),
            }))
        });
        rooms.expect_record_match().never();

        let engine = MatchEngine::new(Arc::new(queue), Arc::new(rooms)).with_config(
            MatchingConfig {
                max_attempts: 1,
                ..MatchingConfig::default()
            },
        );

        let outcome = engine.request_match(request("a", "en")).await.unwrap();
        assert_eq!(outcome, MatchOutcome::Pending);
    }

    #[tokio::test]
    async fn test_cancel_outcomes() {
        let (engine, queue, _rooms) = create_engine();
        let u1 = "u1".to_string();

        assert_eq!(engine.cancel(&u1).await.unwrap(), CancelOutcome::NotQueued);

        engine.request_match(request("u1", "en")).await.unwrap();
        assert_eq!(engine.cancel(&u1).await.unwrap(), CancelOutcome::Cancelled);
        assert_eq!(queue.len().await.unwrap(), 0);

        engine.request_match(request("u1", "en")).await.unwrap();
        queue
            .claim(&u1, generate_claim_token(), Utc::now() + chrono::Duration::seconds(30))
            .await
            .unwrap();
        assert_eq!(
            engine.cancel(&u1).await.unwrap(),
            CancelOutcome::PairingInProgress
        );
        assert_eq!(queue.len().await.unwrap(), 1);

        assert!(engine.cancel(&"".to_string()).await.is_err());
    }

    #[tokio::test]
    async fn test_cleanup_expired_sweeps_old_entries() {
        let (engine, queue, _rooms) = create_engine();
        let engine = engine.with_config(MatchingConfig {
            max_wait: Duration::from_millis(1),
            ..MatchingConfig::default()
        });

        engine.request_match(request("u1", "en")).await.unwrap();
        engine.request_match(request("k1", "ko")).await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert_eq!(engine.cleanup_expired().await.unwrap(), 2);
        assert_eq!(queue.len().await.unwrap(), 0);
        assert_eq!(engine.get_stats().await.unwrap().participants_expired, 2);
    }

    #[tokio::test]
    async fn test_stats_track_outcomes() {
        let (engine, _queue, _rooms) = create_engine();

        engine.request_match(request("u1", "en")).await.unwrap();
        engine.request_match(request("u2", "en")).await.unwrap();
        engine.request_match(request("u1", "en")).await.unwrap();

        let stats = engine.get_stats().await.unwrap();
        assert_eq!(stats.match_requests, 3);
        assert_eq!(stats.pending_responses, 1);
        assert_eq!(stats.matches_made, 1);
        assert_eq!(stats.matches_delivered, 1);
        assert_eq!(stats.rooms_created, 1);
        assert_eq!(stats.rooms_total, 1);
        assert_eq!(stats.participants_waiting, 0);
    }

    #[test]
    fn test_config_from_settings() {
        let settings = MatchmakingSettings::default();
        let config = MatchingConfig::from(&settings);
        assert_eq!(config.max_attempts, settings.max_match_attempts);
        assert_eq!(
            config.claim_ttl,
            Duration::from_secs(settings.claim_ttl_seconds)
        );
    }
}
