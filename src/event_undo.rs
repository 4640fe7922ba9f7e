//! Event-scoped undo/redo.
//!
//! Only per-entity items tagged for the event (`associatedIds.events[event] == true`) take part.
//! Tagged items are grouped by transaction and the transactions ordered by time, then by global
//! index. An undo step reverts the tagged items of the latest transaction that still has applied
//! ones; a redo step re-applies those of the earliest transaction that still has reverted ones.
//! The global item of a touched transaction is then re-derived from its siblings (applied iff all
//! are applied), so a transaction that also touched other events reads as not applied while only
//! partially reverted.

use tracing::debug;

use crate::error::HistoryError;
use crate::history::{HistoryState, ItemLocation};
use crate::item::{HistoryItemId, HistoryStatus, TransactionId};
use crate::patch::Patch;
use crate::undo::Transition;

#[derive(Debug, Clone)]
struct TaggedTransaction {
    transaction_id: TransactionId,
    index: usize,
    time: f64,
    items: Vec<ItemLocation>,
}

impl TaggedTransaction {
    fn any_with(&self, history: &HistoryState, status: HistoryStatus) -> bool {
        self.items
            .iter()
            .any(|loc| history.item_at(loc).is_some_and(|i| i.status == status))
    }
}

fn tagged_transactions(history: &HistoryState, event_id: &str) -> Vec<TaggedTransaction> {
    let mut tagged: Vec<TaggedTransaction> = Vec::new();
    for (index, global) in history.stack.iter().enumerate() {
        let items: Vec<ItemLocation> = history
            .sibling_locations(global.transaction_id)
            .into_iter()
            .filter(|loc| history.item_at(loc).is_some_and(|i| i.is_tagged_event(event_id)))
            .collect();
        if !items.is_empty() {
            tagged.push(TaggedTransaction {
                transaction_id: global.transaction_id,
                index,
                time: global.time,
                items,
            });
        }
    }
    tagged.sort_by(|a, b| a.time.total_cmp(&b.time).then(a.index.cmp(&b.index)));
    tagged
}

/// Global index of the transaction the next event undo would revert.
pub fn event_undo_position(history: &HistoryState, event_id: &str) -> Option<usize> {
    tagged_transactions(history, event_id)
        .iter()
        .rev()
        .find(|t| t.any_with(history, HistoryStatus::Applied))
        .map(|t| t.index)
}

/// Global index of the transaction the next event redo would re-apply, or the stack length.
pub fn event_redo_position(history: &HistoryState, event_id: &str) -> usize {
    tagged_transactions(history, event_id)
        .iter()
        .find(|t| t.any_with(history, HistoryStatus::NotApplied))
        .map_or(history.stack.len(), |t| t.index)
}

pub fn can_event_undo(history: &HistoryState, event_id: &str) -> bool {
    event_undo_position(history, event_id).is_some()
}

pub fn can_event_redo(history: &HistoryState, event_id: &str) -> bool {
    event_redo_position(history, event_id) < history.stack.len()
}

/// Flips the tagged items of `target` to `to` and re-derives its global item.
fn flip_tagged(
    history: &mut HistoryState,
    target: &TaggedTransaction,
    to: HistoryStatus,
    patches: &mut Vec<Patch>,
) {
    let mut locations = target.items.clone();
    if to == HistoryStatus::NotApplied {
        locations.reverse();
    }
    let mut item_patches = Vec::new();
    for loc in &locations {
        if let Some(item) = history.item_at_mut(loc) {
            if item.status != to {
                item.status = to;
                item_patches.extend_from_slice(item.patches_toward(to));
            }
        }
    }

    let mut global_patches = Vec::new();
    if history.derive_global_status(target.transaction_id) == Some(to) {
        if let Some(global) = history.stack.get(target.index) {
            global_patches.extend_from_slice(global.patches_toward(to));
        }
    }

    match to {
        HistoryStatus::Applied => {
            patches.extend(global_patches);
            patches.extend(item_patches);
        }
        HistoryStatus::NotApplied => {
            patches.extend(item_patches);
            patches.extend(global_patches);
        }
    }
}

fn step(history: &mut HistoryState, event_id: &str, to: HistoryStatus, patches: &mut Vec<Patch>) -> bool {
    let from = to.flipped();
    let target = {
        let view: &HistoryState = history;
        let tagged = tagged_transactions(view, event_id);
        let found = match to {
            HistoryStatus::NotApplied => tagged.iter().rev().find(|t| t.any_with(view, from)),
            HistoryStatus::Applied => tagged.iter().find(|t| t.any_with(view, from)),
        };
        found.cloned()
    };
    match target {
        Some(target) => {
            flip_tagged(history, &target, to, patches);
            true
        }
        None => false,
    }
}

fn walk(
    history: &HistoryState,
    event_id: &str,
    count: usize,
    to: HistoryStatus,
) -> Result<Transition, HistoryError> {
    if count == 0 {
        return Err(HistoryError::InvalidCount);
    }
    let operation = match to {
        HistoryStatus::NotApplied => "event undo",
        HistoryStatus::Applied => "event redo",
    };
    let mut next = history.clone();
    if tagged_transactions(&next, event_id).is_empty() {
        debug!("{operation} requested for {event_id} with no history");
        return Ok(Transition {
            history: next,
            patches: Vec::new(),
        });
    }
    let mut patches = Vec::new();
    let mut steps = 0;
    while steps < count && step(&mut next, event_id, to, &mut patches) {
        steps += 1;
    }
    if steps == 0 {
        return Err(HistoryError::NoProgress {
            operation,
            position: event_undo_position(history, event_id),
        });
    }
    debug!("{operation} for {event_id} moved {steps} transaction(s)");
    Ok(Transition {
        history: next,
        patches,
    })
}

pub fn event_undo(
    history: &HistoryState,
    event_id: &str,
    count: usize,
) -> Result<Transition, HistoryError> {
    walk(history, event_id, count, HistoryStatus::NotApplied)
}

pub fn event_redo(
    history: &HistoryState,
    event_id: &str,
    count: usize,
) -> Result<Transition, HistoryError> {
    walk(history, event_id, count, HistoryStatus::Applied)
}

fn walk_to(
    history: &HistoryState,
    event_id: &str,
    id: HistoryItemId,
    to: HistoryStatus,
) -> Result<Transition, HistoryError> {
    let tx = history
        .transaction_of(id)
        .ok_or(HistoryError::ItemNotFound(id))?;
    let target = tagged_transactions(history, event_id)
        .into_iter()
        .find(|t| t.transaction_id == tx)
        .ok_or_else(|| HistoryError::NotAssociated {
            id,
            event_id: event_id.to_string(),
        })?;
    let from = to.flipped();
    if !target.any_with(history, from) {
        return Err(HistoryError::WrongSide { id, status: to });
    }

    let mut next = history.clone();
    let mut patches = Vec::new();
    while target.any_with(&next, from) {
        if !step(&mut next, event_id, to, &mut patches) {
            return Err(HistoryError::NoProgress {
                operation: "event undo/redo by id",
                position: event_undo_position(&next, event_id),
            });
        }
    }
    Ok(Transition {
        history: next,
        patches,
    })
}

/// Event-undoes until every tagged item of the transaction containing `id` is reverted.
pub fn event_undo_by_id(
    history: &HistoryState,
    event_id: &str,
    id: HistoryItemId,
) -> Result<Transition, HistoryError> {
    walk_to(history, event_id, id, HistoryStatus::NotApplied)
}

/// Event-redoes until every tagged item of the transaction containing `id` is applied.
pub fn event_redo_by_id(
    history: &HistoryState,
    event_id: &str,
    id: HistoryItemId,
) -> Result<Transition, HistoryError> {
    walk_to(history, event_id, id, HistoryStatus::Applied)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::HistoryAction;
    use crate::capture::capture_changes;
    use crate::fixtures;
    use crate::reducer::reduce_tracked;
    use crate::state::{EntityKind, WorkstationState};
    use crate::undo;
    use pretty_assertions::assert_eq;

    fn record(actions: &[HistoryAction]) -> (WorkstationState, HistoryState) {
        let mut state = fixtures::demo_state();
        let mut history = HistoryState::new();
        for (i, action) in actions.iter().enumerate() {
            let original = state.clone();
            reduce_tracked(&mut state, action);
            if let Some(change) =
                capture_changes(action, &original, &state, &history, i as f64, true)
                    .expect("capture")
            {
                history.add(change, 500).expect("add");
            }
        }
        (state, history)
    }

    fn phase(id: &str, phase: &str) -> HistoryAction {
        HistoryAction::UpdatePhase {
            signal_detection_ids: vec![id.to_string()],
            phase: phase.to_string(),
        }
    }

    fn sd_phase(state: &WorkstationState, id: &str) -> String {
        state.data.signal_detections[id]
            .phase()
            .unwrap_or_default()
            .to_string()
    }

    fn scenario() -> Vec<HistoryAction> {
        vec![
            HistoryAction::AssociateSignalDetectionsToEvent {
                event_id: "E1".to_string(),
                signal_detection_ids: vec!["SD3".to_string()],
            },
            phase("SD3", "P5KPdf"),
            phase("SD4", "Pg"),
        ]
    }

    #[test]
    fn event_undo_only_touches_tagged_items() {
        let (state, history) = record(&scenario());
        assert_eq!(event_undo_position(&history, "E1"), Some(1));

        let undone = event_undo(&history, "E1", 1).expect("event undo");
        let undone_state = state.with_patches(&undone.patches).expect("patches");
        assert_eq!(sd_phase(&undone_state, "SD3"), "S");
        assert_eq!(sd_phase(&undone_state, "SD4"), "Pg");
        assert!(undone_state.data.events["E1"].is_associated_to("AL1", "SD3"));

        // The SD4 transaction is untouched.
        let sd4 = undone.history.entity_stack(EntityKind::SignalDetection, "SD4");
        assert!(sd4.iter().all(|i| i.is_applied()));
        assert!(undone.history.stack[2].is_applied());
        assert!(!undone.history.stack[1].is_applied());
        assert_eq!(event_undo_position(&undone.history, "E1"), Some(0));
        assert_eq!(event_redo_position(&undone.history, "E1"), 1);

        // Global undo instead reverts the latest transaction regardless of association.
        let global = undo::undo(&history, 1).expect("undo");
        let global_state = state.with_patches(&global.patches).expect("patches");
        assert_eq!(sd_phase(&global_state, "SD4"), "Pn");
        assert_eq!(sd_phase(&global_state, "SD3"), "P5KPdf");
    }

    #[test]
    fn event_undo_then_redo_round_trips() {
        let (state, history) = record(&scenario());
        let undone = event_undo(&history, "E1", 2).expect("event undo");
        let undone_state = state.with_patches(&undone.patches).expect("undo patches");
        assert!(!undone_state.data.events["E1"].is_associated_to("AL1", "SD3"));
        assert!(!can_event_undo(&undone.history, "E1"));

        let redone = event_redo(&undone.history, "E1", 2).expect("event redo");
        let redone_state = undone_state.with_patches(&redone.patches).expect("redo patches");
        assert_eq!(redone_state, state);
        assert_eq!(redone.history, history);
        assert!(!can_event_redo(&redone.history, "E1"));
    }

    #[test]
    fn multi_event_transactions_read_partially_applied() {
        let (state, history) = record(&[HistoryAction::RejectEvents {
            event_ids: vec!["E1".to_string(), "E2".to_string()],
        }]);
        let undone = event_undo(&history, "E2", 1).expect("event undo");
        assert!(!undone.history.stack[0].is_applied());
        assert!(undone.history.entity_stack(EntityKind::Event, "E1")[0].is_applied());
        let undone_state = state.with_patches(&undone.patches).expect("patches");
        assert!(undone_state.data.events["E2"].is_open("AL1"));
        assert!(!undone_state.data.events["E1"].is_open("AL1"));

        // Global redo completes the partial transaction.
        let redone = undo::redo(&undone.history, 1).expect("redo");
        assert_eq!(redone.history, history);
        assert_eq!(undone_state.with_patches(&redone.patches).expect("patches"), state);
    }

    #[test]
    fn by_id_requests_are_validated() {
        let (_, history) = record(&scenario());
        let sd4_item = history.entity_stack(EntityKind::SignalDetection, "SD4")[0].id;
        assert!(matches!(
            event_undo_by_id(&history, "E1", sd4_item),
            Err(HistoryError::NotAssociated { .. })
        ));

        let association = history.stack[0].id;
        let undone = event_undo_by_id(&history, "E1", association).expect("undo by id");
        assert_eq!(event_undo_position(&undone.history, "E1"), None);
        assert!(matches!(
            event_undo_by_id(&undone.history, "E1", association),
            Err(HistoryError::WrongSide { .. })
        ));
        let redone = event_redo_by_id(&undone.history, "E1", association).expect("redo by id");
        assert_eq!(event_redo_position(&redone.history, "E1"), 1);
    }

    #[test]
    fn unknown_events_are_no_ops() {
        let (_, history) = record(&scenario());
        let transition = event_undo(&history, "E7", 1).expect("no-op");
        assert!(transition.patches.is_empty());
        assert!(matches!(event_undo(&history, "E1", 0), Err(HistoryError::InvalidCount)));
        assert!(matches!(
            event_redo(&history, "E1", 1),
            Err(HistoryError::NoProgress { .. })
        ));
    }
}
