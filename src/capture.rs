//! Capture: turns one tracked mutation into a [`HistoryChange`].
//!
//! The store snapshots before and after the mutation are serialized and diffed. Non-entity actions
//! produce a single global item whose patches cover the `app` namespace and the non-entity `data`
//! collections. Entity actions produce an (empty) global item plus one item per changed event or
//! detection, each diffed at `data/<collection>/<id>` and chained on the previous diff so that the
//! items of one transaction compose.

use std::collections::BTreeSet;

use serde_json::Value;
use tracing::{debug, error};
use uuid::Uuid;

use crate::action::HistoryAction;
use crate::associations::associated_ids;
use crate::conflict::determine_conflict_status;
use crate::error::HistoryError;
use crate::history::HistoryState;
use crate::item::{ConflictStatus, HistoryChange, HistoryItem, HistoryStatus};
use crate::label::label_descriptions;
use crate::patch::{self, PathSegment};
use crate::state::{EntityKind, WorkstationState, APP_KEY, DATA_KEY};

fn entity_value<'a>(root: &'a Value, kind: EntityKind, id: &str) -> Option<&'a Value> {
    root.get(DATA_KEY)?.get(kind.data_key())?.get(id)
}

/// Copies every branch outside the entity collections from `state` into `draft`.
fn copy_untracked_branches(draft: &mut Value, state: &Value) {
    if let (Some(slot), Some(app)) = (draft.get_mut(APP_KEY), state.get(APP_KEY)) {
        *slot = app.clone();
    }
    let (Some(Value::Object(draft_data)), Some(Value::Object(data))) =
        (draft.get_mut(DATA_KEY), state.get(DATA_KEY))
    else {
        return;
    };
    let entity_keys = EntityKind::ALL.map(EntityKind::data_key);
    for (key, value) in data {
        if !entity_keys.contains(&key.as_str()) {
            draft_data.insert(key.clone(), value.clone());
        }
    }
}

/// Captures `original -> state` for `action`. Returns `None` when the mutation was a no-op.
///
/// With `validate` set, the chained patches must reproduce `state` exactly.
pub fn capture_changes(
    action: &HistoryAction,
    original: &WorkstationState,
    state: &WorkstationState,
    history: &HistoryState,
    time: f64,
    validate: bool,
) -> Result<Option<HistoryChange>, HistoryError> {
    if original == state {
        debug!("{} made zero state changes", action.kind());
        return Ok(None);
    }

    let kind = action.kind();
    let transaction_id = Uuid::new_v4();
    let labels = label_descriptions(action, original, state);
    let before = serde_json::to_value(original)?;
    let after = serde_json::to_value(state)?;

    let mut next = before.clone();
    if !kind.is_entity_action() {
        copy_untracked_branches(&mut next, &after);
    }
    let (patches, inverse_patches) = patch::diff(&before, &next);

    let item = |label: (String, String), patches, inverse_patches| HistoryItem {
        id: Uuid::new_v4(),
        transaction_id,
        kind,
        time,
        label: label.0,
        description: label.1,
        status: HistoryStatus::Applied,
        associated_ids: None,
        conflict_status: ConflictStatus::None,
        is_deletion: kind.is_deletion(),
        is_rejection: kind.is_rejection(),
        patches,
        inverse_patches,
    };

    let mut change = HistoryChange {
        history: item(labels.history.clone(), patches, inverse_patches),
        events: Default::default(),
        signal_detections: Default::default(),
    };

    if kind.is_entity_action() {
        let conflict_status = determine_conflict_status(original, state);
        for entity in EntityKind::ALL {
            let ids: BTreeSet<String> = original
                .entity_ids(entity)
                .into_iter()
                .chain(state.entity_ids(entity))
                .collect();
            for id in ids {
                let from = entity_value(&next, entity, &id);
                let to = entity_value(&after, entity, &id);
                if from == to {
                    continue;
                }
                let prefix: Vec<PathSegment> = vec![
                    DATA_KEY.into(),
                    entity.data_key().into(),
                    id.as_str().into(),
                ];
                let (patches, inverse_patches) = patch::diff_at(&prefix, from, to);
                patch::apply_patches(&mut next, &patches)?;

                let mut entity_item = item(labels.for_entity(entity, &id), patches, inverse_patches);
                entity_item.associated_ids =
                    Some(associated_ids(original, state, history, entity, &id));
                entity_item.conflict_status = conflict_status;
                match entity {
                    EntityKind::Event => change.events.insert(id, entity_item),
                    EntityKind::SignalDetection => change.signal_detections.insert(id, entity_item),
                };
            }
        }
    }

    if validate {
        validate_capture(&next, &after)?;
    }
    Ok(Some(change))
}

fn validate_capture(produced: &Value, expected: &Value) -> Result<(), HistoryError> {
    for branch in [APP_KEY, DATA_KEY] {
        if produced.get(branch) != expected.get(branch) {
            error!("captured patches do not reproduce the {branch} state");
            return Err(HistoryError::CaptureMismatch {
                branch: branch.to_string(),
            });
        }
    }
    Ok(())
}
