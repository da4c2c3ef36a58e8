//! Property tests for candidate filtering and selection

use proptest::prelude::*;
use std::collections::BTreeSet;
use tandem_match::matching::{
    eligible_candidates, AttributeCompatibility, CandidateSelector, UniformSelector,
};
use tandem_match::types::{MatchAttributes, Participant, QueueEntry};

fn entry(id: &str, language: &str) -> QueueEntry {
    QueueEntry::new(Participant::new(id, MatchAttributes::for_language(language)))
}

proptest! {
    #[test]
    fn prop_requester_never_eligible(
        ids in proptest::collection::vec("[a-e]{1,2}", 0..30),
        requester in "[a-e]{1,2}",
        excluded in proptest::collection::btree_set("[a-e]{1,2}", 0..5),
    ) {
        let me = Participant::new(requester.clone(), MatchAttributes::for_language("en"));
        let raw: Vec<_> = ids.iter().map(|id| entry(id, "en")).collect();
        let echoed = ids.iter().filter(|id| **id == requester).count();

        let eligible = eligible_candidates(&me, &excluded, raw, &AttributeCompatibility::new());

        prop_assert_eq!(eligible.self_matches, echoed);
        for candidate in &eligible.entries {
            prop_assert_ne!(candidate.participant_id(), &requester);
            prop_assert!(!excluded.contains(candidate.participant_id()));
        }
    }

    #[test]
    fn prop_eligible_set_is_sorted_and_unique(
        ids in proptest::collection::vec("[a-z]{1,3}", 0..40),
    ) {
        let me = Participant::new("requester", MatchAttributes::for_language("en"));
        let raw: Vec<_> = ids.iter().map(|id| entry(id, "en")).collect();
        let expected: BTreeSet<_> = ids.iter().filter(|id| *id != "requester").cloned().collect();

        let eligible =
            eligible_candidates(&me, &BTreeSet::new(), raw, &AttributeCompatibility::new());

        let got: Vec<_> = eligible.entries.iter().map(|e| e.participant_id().clone()).collect();
        let want: Vec<_> = expected.into_iter().collect();
        prop_assert_eq!(got, want);
    }

    #[test]
    fn prop_selected_index_is_in_range(len in 0usize..500, seed in any::<u64>()) {
        let selector = UniformSelector::seeded(seed);
        match selector.select_index(len) {
            None => prop_assert_eq!(len, 0),
            Some(index) => prop_assert!(index < len),
        }
    }
}
