//! Which entities a per-entity history item is relevant to.
//!
//! An event item is relevant to the event itself and to every detection associated to it before or
//! after the change. A detection item is relevant to the detection and to every event that
//! associates it before or after the change. Ids recorded on the previous item of the same stack are
//! carried forward as `false` so that the association history never loses an id.

use crate::event::EventId;
use crate::history::HistoryState;
use crate::item::AssociatedIds;
use crate::state::{EntityKind, WorkstationState};

/// Associated ids for the item about to be appended to the `kind`/`id` stack.
pub fn associated_ids(
    original: &WorkstationState,
    state: &WorkstationState,
    history: &HistoryState,
    kind: EntityKind,
    id: &str,
) -> AssociatedIds {
    let mut ids = carried_forward(history, kind, id);
    match kind {
        EntityKind::Event => {
            ids.events.insert(id.to_string(), true);
            for snapshot in [original, state] {
                let stage = snapshot.open_stage();
                if let Some(event) = snapshot.data.events.get(id) {
                    for sd_id in event.associated_signal_detection_ids(stage) {
                        ids.signal_detections.insert(sd_id, true);
                    }
                }
            }
        }
        EntityKind::SignalDetection => {
            ids.signal_detections.insert(id.to_string(), true);
            for snapshot in [original, state] {
                for event_id in events_associating(snapshot, id) {
                    ids.events.insert(event_id, true);
                }
            }
        }
    }
    ids
}

fn carried_forward(history: &HistoryState, kind: EntityKind, id: &str) -> AssociatedIds {
    let mut ids = AssociatedIds::default();
    let previous = history
        .entity_stack(kind, id)
        .last()
        .and_then(|item| item.associated_ids.as_ref());
    if let Some(previous) = previous {
        for kind in EntityKind::ALL {
            let carried = ids.ids_mut(kind);
            for key in previous.ids(kind).keys() {
                carried.insert(key.clone(), false);
            }
        }
    }
    ids
}

/// Events whose preferred hypothesis for the open stage associates `signal_detection_id`.
pub fn events_associating(state: &WorkstationState, signal_detection_id: &str) -> Vec<EventId> {
    let stage = state.open_stage();
    state
        .data
        .events
        .values()
        .filter(|event| event.is_associated_to(stage, signal_detection_id))
        .map(|event| event.id.clone())
        .collect()
}
