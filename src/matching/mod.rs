//! Random-pairing matchmaking
//!
//! This module holds the matching engine together with the pluggable pieces it
//! is built from: the compatibility policy that filters candidates and the
//! selector that picks one of them uniformly at random.

pub mod compatibility;
pub mod engine;
pub mod selection;

// Re-export commonly used types
pub use compatibility::{AttributeCompatibility, CompatibilityPolicy};
pub use engine::{EngineStats, MatchEngine, MatchingConfig};
pub use selection::{CandidateSelector, UniformSelector};

use crate::types::{Participant, ParticipantId, QueueEntry};
use std::collections::BTreeSet;

/// Candidates left after filtering a raw query result
#[derive(Debug, Clone, Default)]
pub struct EligibleCandidates {
    /// Compatible entries sorted by participant id
    pub entries: Vec<QueueEntry>,
    /// Times the requester itself showed up in the raw result
    pub self_matches: usize,
}

/// Filter a raw candidate set down to the entries the requester may pair with
///
/// The requester's own entry, excluded identities, entries under a live claim,
/// and incompatible entries are dropped. The result is sorted by id so that
/// selection does not depend on the store's iteration order.
pub fn eligible_candidates(
    requester: &Participant,
    exclude: &BTreeSet<ParticipantId>,
    raw: Vec<QueueEntry>,
    policy: &dyn CompatibilityPolicy,
) -> EligibleCandidates {
    let now = chrono::Utc::now();
    let mut self_matches = 0;

    let mut entries: Vec<QueueEntry> = raw
        .into_iter()
        .filter(|entry| {
            if entry.participant_id() == &requester.id {
                self_matches += 1;
                return false;
            }
            !exclude.contains(entry.participant_id())
                && !entry.is_claimed(now)
                && policy.is_compatible(requester, entry)
        })
        .collect();

    entries.sort_by(|a, b| a.participant_id().cmp(b.participant_id()));
    entries.dedup_by(|a, b| a.participant_id() == b.participant_id());

    EligibleCandidates {
        entries,
        self_matches,
    }
}
