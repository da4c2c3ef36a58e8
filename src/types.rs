//! Common types used throughout the matchmaking service

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use uuid::Uuid;

/// Unique identifier for participants
pub type ParticipantId = String;

/// Unique identifier for conversation rooms
pub type RoomId = Uuid;

/// Token identifying a single pairing attempt's reservation of queue entries
pub type ClaimToken = Uuid;

/// Self-reported gender of a participant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Gender {
    Male,
    Female,
    Other,
}

impl std::fmt::Display for Gender {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Gender::Male => write!(f, "male"),
            Gender::Female => write!(f, "female"),
            Gender::Other => write!(f, "other"),
        }
    }
}

/// Attributes used to decide whether two participants can be paired
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchAttributes {
    /// Spoken language, compared case-insensitively
    pub language: String,
    #[serde(default)]
    pub gender: Option<Gender>,
    /// Only pair with participants of this gender
    #[serde(default)]
    pub preferred_gender: Option<Gender>,
    /// Identities this participant has blocked
    #[serde(default)]
    pub blocked: BTreeSet<ParticipantId>,
}

impl MatchAttributes {
    /// Attributes with only a language set
    pub fn for_language(language: impl Into<String>) -> Self {
        Self {
            language: language.into(),
            gender: None,
            preferred_gender: None,
            blocked: BTreeSet::new(),
        }
    }

    /// Whether this participant speaks the same language as `other`
    pub fn same_language(&self, other: &MatchAttributes) -> bool {
        self.language.trim().eq_ignore_ascii_case(other.language.trim())
    }
}

/// A participant asking to be matched
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Participant {
    pub id: ParticipantId,
    pub attributes: MatchAttributes,
    pub requested_at: DateTime<Utc>,
}

impl Participant {
    pub fn new(id: impl Into<ParticipantId>, attributes: MatchAttributes) -> Self {
        Self {
            id: id.into(),
            attributes,
            requested_at: Utc::now(),
        }
    }
}

/// Reservation of a queue entry by an in-flight pairing attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claim {
    pub token: ClaimToken,
    pub expires_at: DateTime<Utc>,
}

impl Claim {
    /// A claim past its expiry no longer protects the entry
    pub fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.expires_at > now
    }
}

/// A participant materialized in the waiting queue
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueEntry {
    pub participant: Participant,
    pub enqueued_at: DateTime<Utc>,
    pub claim: Option<Claim>,
}

impl QueueEntry {
    pub fn new(participant: Participant) -> Self {
        Self {
            participant,
            enqueued_at: Utc::now(),
            claim: None,
        }
    }

    pub fn participant_id(&self) -> &ParticipantId {
        &self.participant.id
    }

    /// Whether a live claim currently reserves this entry
    pub fn is_claimed(&self, now: DateTime<Utc>) -> bool {
        self.claim.map(|claim| claim.is_live(now)).unwrap_or(false)
    }
}

/// Canonical unordered pair of participant identities
///
/// The two identities are stored sorted, so `PairKey::new(a, b)` and
/// `PairKey::new(b, a)` are equal and hash identically.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PairKey {
    first: ParticipantId,
    second: ParticipantId,
}

impl PairKey {
    pub fn new(a: impl Into<ParticipantId>, b: impl Into<ParticipantId>) -> Self {
        let (a, b) = (a.into(), b.into());
        if a <= b {
            Self { first: a, second: b }
        } else {
            Self { first: b, second: a }
        }
    }

    pub fn first(&self) -> &ParticipantId {
        &self.first
    }

    pub fn second(&self) -> &ParticipantId {
        &self.second
    }

    /// Both identities in canonical order
    pub fn members(&self) -> [&ParticipantId; 2] {
        [&self.first, &self.second]
    }

    pub fn contains(&self, id: &str) -> bool {
        self.first == id || self.second == id
    }

    /// The member that is not `id`, if `id` belongs to the pair
    pub fn partner_of(&self, id: &str) -> Option<&ParticipantId> {
        if self.first == id {
            Some(&self.second)
        } else if self.second == id {
            Some(&self.first)
        } else {
            None
        }
    }
}

impl std::fmt::Display for PairKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{{{}, {}}}", self.first, self.second)
    }
}

/// Durable conversation room shared by two participants
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Room {
    pub room_id: RoomId,
    pub pair: PairKey,
    pub created_at: DateTime<Utc>,
}

/// A committed pairing, delivered to both participants
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchResult {
    pub room_id: RoomId,
    pub pair: PairKey,
    pub matched_at: DateTime<Utc>,
}

impl MatchResult {
    pub fn new(room_id: RoomId, pair: PairKey) -> Self {
        Self {
            room_id,
            pair,
            matched_at: Utc::now(),
        }
    }

    /// The outcome as seen by one side of the pair
    pub fn outcome_for(&self, id: &str) -> Option<MatchOutcome> {
        self.pair
            .partner_of(id)
            .map(|partner| MatchOutcome::Matched {
                room_id: self.room_id,
                partner_id: partner.clone(),
            })
    }
}

/// Request to be matched with a random compatible participant
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchRequest {
    pub participant_id: ParticipantId,
    pub attributes: MatchAttributes,
    /// Extra identities to skip for this request only (e.g. recent partners)
    #[serde(default)]
    pub exclude: BTreeSet<ParticipantId>,
}

impl MatchRequest {
    pub fn new(participant_id: impl Into<ParticipantId>, attributes: MatchAttributes) -> Self {
        Self {
            participant_id: participant_id.into(),
            attributes,
            exclude: BTreeSet::new(),
        }
    }

    pub fn excluding(mut self, id: impl Into<ParticipantId>) -> Self {
        self.exclude.insert(id.into());
        self
    }

    /// Blocked identities plus the per-request exclusions
    pub fn exclusion_set(&self) -> BTreeSet<ParticipantId> {
        self.attributes
            .blocked
            .iter()
            .chain(self.exclude.iter())
            .filter(|id| **id != self.participant_id)
            .cloned()
            .collect()
    }
}

/// What the caller observes after a match request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum MatchOutcome {
    /// Queued, no counterpart yet
    Pending,
    /// Paired into a room
    Matched {
        room_id: RoomId,
        partner_id: ParticipantId,
    },
}

impl MatchOutcome {
    pub fn room_id(&self) -> Option<RoomId> {
        match self {
            MatchOutcome::Pending => None,
            MatchOutcome::Matched { room_id, .. } => Some(*room_id),
        }
    }

    pub fn is_matched(&self) -> bool {
        matches!(self, MatchOutcome::Matched { .. })
    }
}

/// Result of an out-of-band cancellation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CancelOutcome {
    Cancelled,
    NotQueued,
    /// A pairing attempt holds the entry; it cannot be withdrawn now
    PairingInProgress,
}
