//! Listeners that scrub selection state after an undo/redo commit.
//!
//! A replay can delete, reject or remove entities the analyst has selected. Each listener inspects
//! the committed store and returns the untracked actions that drop the dangling references.

use crate::action::Action;
use crate::state::WorkstationState;

pub trait CommitListener: Send + Sync {
    fn name(&self) -> &'static str;

    /// Actions that reconcile `state`, or `None` when nothing dangles.
    fn reconcile(&self, state: &WorkstationState) -> Option<Action>;
}

fn event_is_live(state: &WorkstationState, event_id: &str) -> bool {
    state
        .data
        .events
        .get(event_id)
        .is_some_and(|e| e.is_open(state.open_stage()))
}

fn detection_is_live(state: &WorkstationState, sd_id: &str) -> bool {
    state
        .data
        .signal_detections
        .get(sd_id)
        .is_some_and(|sd| !sd.is_deleted())
}

/// Drops selected detections that no longer exist or are deleted.
pub struct SelectedSignalDetections;

impl CommitListener for SelectedSignalDetections {
    fn name(&self) -> &'static str {
        "selected signal detections"
    }

    fn reconcile(&self, state: &WorkstationState) -> Option<Action> {
        let selected = &state.app.analyst.selected_sd_ids;
        let kept: Vec<_> = selected
            .iter()
            .filter(|id| detection_is_live(state, id))
            .cloned()
            .collect();
        (kept.len() != selected.len()).then_some(Action::SetSelectedSignalDetectionIds(kept))
    }
}

/// Drops selected events that are gone, rejected or deleted.
pub struct SelectedEvents;

impl CommitListener for SelectedEvents {
    fn name(&self) -> &'static str {
        "selected events"
    }

    fn reconcile(&self, state: &WorkstationState) -> Option<Action> {
        let selected = &state.app.analyst.selected_event_ids;
        let kept: Vec<_> = selected
            .iter()
            .filter(|id| event_is_live(state, id))
            .cloned()
            .collect();
        (kept.len() != selected.len()).then_some(Action::SetSelectedEventIds(kept))
    }
}

/// Closes the open event once it is gone, rejected or deleted.
pub struct OpenEvent;

impl CommitListener for OpenEvent {
    fn name(&self) -> &'static str {
        "open event"
    }

    fn reconcile(&self, state: &WorkstationState) -> Option<Action> {
        match &state.app.analyst.open_event_id {
            Some(id) if !event_is_live(state, id) => Some(Action::SetOpenEventId(None)),
            _ => None,
        }
    }
}

pub fn default_listeners() -> Vec<Box<dyn CommitListener>> {
    vec![
        Box::new(SelectedSignalDetections),
        Box::new(SelectedEvents),
        Box::new(OpenEvent),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::HistoryAction;
    use crate::fixtures;
    use crate::reducer::reduce_tracked;
    use pretty_assertions::assert_eq;

    #[test]
    fn live_selections_are_left_alone() {
        let mut state = fixtures::demo_state();
        state.app.analyst.selected_sd_ids = vec!["SD1".to_string()];
        state.app.analyst.selected_event_ids = vec!["E1".to_string()];
        state.app.analyst.open_event_id = Some("E1".to_string());
        for listener in default_listeners() {
            assert_eq!(listener.reconcile(&state), None, "{}", listener.name());
        }
    }

    #[test]
    fn dangling_selections_are_dropped() {
        let mut state = fixtures::demo_state();
        state.app.analyst.selected_sd_ids = vec!["SD1".to_string(), "SD9".to_string()];
        state.app.analyst.selected_event_ids = vec!["E1".to_string(), "E2".to_string()];
        state.app.analyst.open_event_id = Some("E2".to_string());
        reduce_tracked(
            &mut state,
            &HistoryAction::RejectEvents {
                event_ids: vec!["E2".to_string()],
            },
        );

        assert_eq!(
            SelectedSignalDetections.reconcile(&state),
            Some(Action::SetSelectedSignalDetectionIds(vec!["SD1".to_string()]))
        );
        assert_eq!(
            SelectedEvents.reconcile(&state),
            Some(Action::SetSelectedEventIds(vec!["E1".to_string()]))
        );
        assert_eq!(OpenEvent.reconcile(&state), Some(Action::SetOpenEventId(None)));
    }
}
