//! Association conflicts: detections claimed by more than one open event.

use std::collections::{BTreeMap, BTreeSet};

use crate::event::EventId;
use crate::item::ConflictStatus;
use crate::signal_detection::SignalDetectionId;
use crate::state::WorkstationState;

/// Maps every conflicted detection to the open events that associate it, in id order.
///
/// Events whose preferred hypothesis for the open stage is rejected or deleted do not count.
pub fn find_association_conflicts(
    state: &WorkstationState,
) -> BTreeMap<SignalDetectionId, Vec<EventId>> {
    let stage = state.open_stage();
    let mut claims: BTreeMap<SignalDetectionId, Vec<EventId>> = BTreeMap::new();
    for event in state.data.events.values().filter(|e| e.is_open(stage)) {
        for sd_id in event.associated_signal_detection_ids(stage) {
            claims.entry(sd_id).or_default().push(event.id.clone());
        }
    }
    claims.retain(|_, events| events.len() > 1);
    claims
}

/// Classifies the transition `original -> state` by its effect on the conflicted detection set.
pub fn determine_conflict_status(
    original: &WorkstationState,
    state: &WorkstationState,
) -> ConflictStatus {
    let before: BTreeSet<SignalDetectionId> =
        find_association_conflicts(original).into_keys().collect();
    let after: BTreeSet<SignalDetectionId> =
        find_association_conflicts(state).into_keys().collect();
    classify(&before, &after)
}

fn classify(before: &BTreeSet<String>, after: &BTreeSet<String>) -> ConflictStatus {
    if before == after {
        ConflictStatus::None
    } else if after.len() > before.len() || !after.is_subset(before) {
        ConflictStatus::CreatedConflict
    } else if after.len() < before.len() {
        ConflictStatus::ResolvedConflict
    } else {
        ConflictStatus::None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::HistoryAction;
    use crate::fixtures;
    use crate::reducer::reduce_tracked;
    use pretty_assertions::assert_eq;

    fn set(ids: &[&str]) -> BTreeSet<String> {
        ids.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn second_claim_creates_a_conflict() {
        let original = fixtures::demo_state();
        assert!(find_association_conflicts(&original).is_empty());

        let mut state = original.clone();
        reduce_tracked(
            &mut state,
            &HistoryAction::AssociateSignalDetectionsToEvent {
                event_id: "E2".to_string(),
                signal_detection_ids: vec!["SD1".to_string()],
            },
        );
        let conflicts = find_association_conflicts(&state);
        assert_eq!(
            conflicts.get("SD1"),
            Some(&vec!["E1".to_string(), "E2".to_string()])
        );
        assert_eq!(
            determine_conflict_status(&original, &state),
            ConflictStatus::CreatedConflict
        );
        assert_eq!(
            determine_conflict_status(&state, &original),
            ConflictStatus::ResolvedConflict
        );
    }

    #[test]
    fn rejected_events_do_not_conflict() {
        let mut state = fixtures::demo_state();
        reduce_tracked(
            &mut state,
            &HistoryAction::AssociateSignalDetectionsToEvent {
                event_id: "E2".to_string(),
                signal_detection_ids: vec!["SD1".to_string()],
            },
        );
        if let Some(h) = state
            .data
            .events
            .get_mut("E2")
            .and_then(|e| e.preferred_hypothesis_mut("AL1"))
        {
            h.deleted = true;
        }
        assert!(find_association_conflicts(&state).is_empty());
    }

    #[test]
    fn classification_rules() {
        assert_eq!(classify(&set(&["a"]), &set(&["a"])), ConflictStatus::None);
        assert_eq!(classify(&set(&[]), &set(&["a"])), ConflictStatus::CreatedConflict);
        // same size, but a new id appeared
        assert_eq!(classify(&set(&["a"]), &set(&["b"])), ConflictStatus::CreatedConflict);
        assert_eq!(classify(&set(&["a", "b"]), &set(&["a"])), ConflictStatus::ResolvedConflict);
    }
}
