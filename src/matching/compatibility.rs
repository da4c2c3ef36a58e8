//! Compatibility rules deciding whether two participants may be paired

use crate::types::{Gender, MatchAttributes, Participant, QueueEntry};

/// Trait for pairing compatibility rules
pub trait CompatibilityPolicy: Send + Sync {
    /// Whether `requester` may be paired with the queued `candidate`
    fn is_compatible(&self, requester: &Participant, candidate: &QueueEntry) -> bool;
}

/// Attribute-based compatibility
///
/// Two participants are compatible when:
/// - they speak the same language
/// - each side's gender preference, if any, is satisfied by the other
/// - neither has blocked the other
#[derive(Debug, Clone, Default)]
pub struct AttributeCompatibility {
    /// Treat an unknown gender as satisfying any preference
    pub lenient_unknown_gender: bool,
}

impl AttributeCompatibility {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lenient() -> Self {
        Self {
            lenient_unknown_gender: true,
        }
    }

    fn preference_satisfied(&self, preferred: Option<Gender>, actual: Option<Gender>) -> bool {
        match (preferred, actual) {
            (None, _) => true,
            (Some(wanted), Some(gender)) => wanted == gender,
            (Some(_), None) => self.lenient_unknown_gender,
        }
    }

    fn mutually_preferred(&self, a: &MatchAttributes, b: &MatchAttributes) -> bool {
        self.preference_satisfied(a.preferred_gender, b.gender)
            && self.preference_satisfied(b.preferred_gender, a.gender)
    }
}

impl CompatibilityPolicy for AttributeCompatibility {
    fn is_compatible(&self, requester: &Participant, candidate: &QueueEntry) -> bool {
        let theirs = &candidate.participant.attributes;
        let ours = &requester.attributes;

        ours.same_language(theirs)
            && self.mutually_preferred(ours, theirs)
            && !ours.blocked.contains(&candidate.participant.id)
            && !theirs.blocked.contains(&requester.id)
    }
}
