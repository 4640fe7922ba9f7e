//! Global undo/redo.
//!
//! The cursor is the boundary between applied and not-applied global items. An undo step flips the
//! last applied transaction to `not applied`, a redo step flips the first not-applied transaction
//! to `applied`; in both cases every per-entity sibling that is not yet on the target side flips
//! with it. All patches of one request are returned as a single batch.

use tracing::debug;

use crate::error::HistoryError;
use crate::history::HistoryState;
use crate::item::{HistoryItemId, HistoryStatus};
use crate::patch::Patch;

/// Next history state plus the patches that take the store there.
#[derive(Debug, Clone, PartialEq)]
pub struct Transition {
    pub history: HistoryState,
    pub patches: Vec<Patch>,
}

impl Transition {
    fn unchanged(history: &HistoryState) -> Self {
        Self {
            history: history.clone(),
            patches: Vec::new(),
        }
    }
}

/// Flips the transaction at global `index` (and its siblings) to `to`, collecting the patches in
/// replay order: forward patches global-first, inverse patches siblings-first in reverse.
pub(crate) fn flip_transaction(
    history: &mut HistoryState,
    index: usize,
    to: HistoryStatus,
    patches: &mut Vec<Patch>,
) {
    let Some(global) = history.stack.get_mut(index) else {
        return;
    };
    let tx = global.transaction_id;
    let mut global_patches = Vec::new();
    if global.status != to {
        global.status = to;
        global_patches.extend_from_slice(global.patches_toward(to));
    }

    let mut siblings = history.sibling_locations(tx);
    if to == HistoryStatus::NotApplied {
        siblings.reverse();
    }
    let mut sibling_patches = Vec::new();
    for loc in &siblings {
        if let Some(item) = history.item_at_mut(loc) {
            if item.status != to {
                item.status = to;
                sibling_patches.extend_from_slice(item.patches_toward(to));
            }
        }
    }

    match to {
        HistoryStatus::Applied => {
            patches.extend(global_patches);
            patches.extend(sibling_patches);
        }
        HistoryStatus::NotApplied => {
            patches.extend(sibling_patches);
            patches.extend(global_patches);
        }
    }
}

fn undo_step(history: &mut HistoryState, patches: &mut Vec<Patch>) -> bool {
    match history.undo_position() {
        Some(index) => {
            flip_transaction(history, index, HistoryStatus::NotApplied, patches);
            true
        }
        None => false,
    }
}

fn redo_step(history: &mut HistoryState, patches: &mut Vec<Patch>) -> bool {
    let index = history.redo_position();
    if index >= history.stack.len() {
        return false;
    }
    flip_transaction(history, index, HistoryStatus::Applied, patches);
    true
}

fn walk(
    history: &HistoryState,
    count: usize,
    operation: &'static str,
    step: fn(&mut HistoryState, &mut Vec<Patch>) -> bool,
) -> Result<Transition, HistoryError> {
    if count == 0 {
        return Err(HistoryError::InvalidCount);
    }
    if history.stack.is_empty() {
        debug!("{operation} requested on an empty history");
        return Ok(Transition::unchanged(history));
    }
    let mut next = history.clone();
    let mut patches = Vec::new();
    let mut steps = 0;
    while steps < count && step(&mut next, &mut patches) {
        steps += 1;
    }
    if steps == 0 {
        return Err(HistoryError::NoProgress {
            operation,
            position: history.undo_position(),
        });
    }
    debug!("{operation} moved {steps} transaction(s)");
    Ok(Transition {
        history: next,
        patches,
    })
}

/// Undoes up to `count` transactions.
pub fn undo(history: &HistoryState, count: usize) -> Result<Transition, HistoryError> {
    walk(history, count, "undo", undo_step)
}

/// Redoes up to `count` transactions.
pub fn redo(history: &HistoryState, count: usize) -> Result<Transition, HistoryError> {
    walk(history, count, "redo", redo_step)
}

fn target_index(history: &HistoryState, id: HistoryItemId) -> Result<usize, HistoryError> {
    let tx = history
        .transaction_of(id)
        .ok_or(HistoryError::ItemNotFound(id))?;
    history
        .global_index(tx)
        .ok_or(HistoryError::MissingTransaction(tx))
}

/// Undoes transactions until the one containing `id` is no longer applied.
pub fn undo_by_id(history: &HistoryState, id: HistoryItemId) -> Result<Transition, HistoryError> {
    let index = target_index(history, id)?;
    if !history.stack[index].is_applied() {
        return Err(HistoryError::WrongSide {
            id,
            status: HistoryStatus::NotApplied,
        });
    }
    let mut next = history.clone();
    let mut patches = Vec::new();
    while next.stack[index].is_applied() {
        if !undo_step(&mut next, &mut patches) {
            return Err(HistoryError::NoProgress {
                operation: "undo by id",
                position: next.undo_position(),
            });
        }
    }
    Ok(Transition {
        history: next,
        patches,
    })
}

/// Redoes transactions until the one containing `id` is applied.
pub fn redo_by_id(history: &HistoryState, id: HistoryItemId) -> Result<Transition, HistoryError> {
    let index = target_index(history, id)?;
    if history.stack[index].is_applied() {
        return Err(HistoryError::WrongSide {
            id,
            status: HistoryStatus::Applied,
        });
    }
    let mut next = history.clone();
    let mut patches = Vec::new();
    while !next.stack[index].is_applied() {
        if !redo_step(&mut next, &mut patches) {
            return Err(HistoryError::NoProgress {
                operation: "redo by id",
                position: next.undo_position(),
            });
        }
    }
    Ok(Transition {
        history: next,
        patches,
    })
}
