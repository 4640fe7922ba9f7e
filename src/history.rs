//! History state: the global stack plus one stack per changed event and signal detection.
//!
//! Every stack keeps its items in chronological order. The boundary between `applied` and
//! `not applied` items is the undo/redo cursor; it is derived from item statuses rather than
//! stored, so a status flip is the only way to move it.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::HistoryError;
use crate::event::EventId;
use crate::item::{HistoryChange, HistoryItem, HistoryItemId, HistoryMode, HistoryStatus, TransactionId};
use crate::signal_detection::SignalDetectionId;
use crate::state::EntityKind;

/// Address of a per-entity item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemLocation {
    pub kind: EntityKind,
    pub entity_id: String,
    pub index: usize,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct HistoryState {
    pub mode: HistoryMode,
    pub stack: Vec<HistoryItem>,
    pub events: BTreeMap<EventId, Vec<HistoryItem>>,
    pub signal_detections: BTreeMap<SignalDetectionId, Vec<HistoryItem>>,
}

impl HistoryState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the mode, or toggles it when `mode` is `None`.
    pub fn set_mode(&mut self, mode: Option<HistoryMode>) {
        self.mode = mode.unwrap_or_else(|| self.mode.toggled());
    }

    /// Wipes every stack and resets the mode.
    pub fn clear(&mut self) {
        debug!("clearing all undo/redo history");
        *self = Self::default();
    }

    pub fn entity_stacks(&self, kind: EntityKind) -> &BTreeMap<String, Vec<HistoryItem>> {
        match kind {
            EntityKind::Event => &self.events,
            EntityKind::SignalDetection => &self.signal_detections,
        }
    }

    fn entity_stacks_mut(&mut self, kind: EntityKind) -> &mut BTreeMap<String, Vec<HistoryItem>> {
        match kind {
            EntityKind::Event => &mut self.events,
            EntityKind::SignalDetection => &mut self.signal_detections,
        }
    }

    pub fn entity_stack(&self, kind: EntityKind, id: &str) -> &[HistoryItem] {
        self.entity_stacks(kind)
            .get(id)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// Appends a captured change as one transaction.
    ///
    /// Abandoned redo branches are purged first and the oldest transactions are evicted until the
    /// new global item fits within `max_history`.
    pub fn add(&mut self, change: HistoryChange, max_history: usize) -> Result<(), HistoryError> {
        if let Some(item) = change.items().find(|item| !item.is_applied()) {
            return Err(HistoryError::NotApplied(item.id));
        }

        let purged = self.purge_abandoned();
        if purged > 0 {
            debug!("purged {purged} abandoned history transaction(s)");
        }
        while !self.stack.is_empty() && self.stack.len() >= max_history.max(1) {
            self.evict_oldest();
        }

        let HistoryChange {
            history,
            events,
            signal_detections,
        } = change;
        info!(
            "recorded {} ({} event item(s), {} signal detection item(s))",
            history.kind,
            events.len(),
            signal_detections.len()
        );
        self.stack.push(history);
        for (id, item) in events {
            self.events.entry(id).or_default().push(item);
        }
        for (id, item) in signal_detections {
            self.signal_detections.entry(id).or_default().push(item);
        }
        Ok(())
    }

    /// Removes the trailing run of transactions that are fully not applied, i.e. no item of the
    /// transaction (global or per-entity) is still applied. A new action truncates the redo future.
    pub fn purge_abandoned(&mut self) -> usize {
        let mut purged = 0;
        while let Some(last) = self.stack.last() {
            let tx = last.transaction_id;
            let orphaned = !last.is_applied()
                && self
                    .sibling_locations(tx)
                    .iter()
                    .all(|loc| self.item_at(loc).is_some_and(|i| !i.is_applied()));
            if !orphaned {
                break;
            }
            self.remove_transaction(tx);
            purged += 1;
        }
        purged
    }

    /// Evicts the oldest transaction from the global stack and from every per-entity stack.
    pub fn evict_oldest(&mut self) {
        if let Some(oldest) = self.stack.first() {
            let tx = oldest.transaction_id;
            debug!("evicting history transaction {tx}");
            self.remove_transaction(tx);
        }
    }

    fn remove_transaction(&mut self, tx: TransactionId) {
        self.stack.retain(|item| item.transaction_id != tx);
        for kind in EntityKind::ALL {
            let stacks = self.entity_stacks_mut(kind);
            for stack in stacks.values_mut() {
                stack.retain(|item| item.transaction_id != tx);
            }
            stacks.retain(|_, stack| !stack.is_empty());
        }
    }

    pub fn global_index(&self, tx: TransactionId) -> Option<usize> {
        self.stack.iter().position(|item| item.transaction_id == tx)
    }

    /// Resolves a global or per-entity item id to its transaction.
    pub fn transaction_of(&self, id: HistoryItemId) -> Option<TransactionId> {
        if let Some(item) = self.stack.iter().find(|item| item.id == id) {
            return Some(item.transaction_id);
        }
        EntityKind::ALL.iter().find_map(|kind| {
            self.entity_stacks(*kind)
                .values()
                .flatten()
                .find(|item| item.id == id)
                .map(|item| item.transaction_id)
        })
    }

    /// Per-entity items belonging to `tx`, events first, in key order.
    pub fn sibling_locations(&self, tx: TransactionId) -> Vec<ItemLocation> {
        let mut locations = Vec::new();
        for kind in EntityKind::ALL {
            for (entity_id, stack) in self.entity_stacks(kind) {
                for (index, item) in stack.iter().enumerate() {
                    if item.transaction_id == tx {
                        locations.push(ItemLocation {
                            kind,
                            entity_id: entity_id.clone(),
                            index,
                        });
                    }
                }
            }
        }
        locations
    }

    pub fn item_at(&self, loc: &ItemLocation) -> Option<&HistoryItem> {
        self.entity_stacks(loc.kind)
            .get(&loc.entity_id)
            .and_then(|stack| stack.get(loc.index))
    }

    pub fn item_at_mut(&mut self, loc: &ItemLocation) -> Option<&mut HistoryItem> {
        self.entity_stacks_mut(loc.kind)
            .get_mut(&loc.entity_id)
            .and_then(|stack| stack.get_mut(loc.index))
    }

    /// Recomputes the global item of `tx` from its per-entity siblings: it is applied iff every
    /// sibling is applied. Returns the new status when it changed.
    pub fn derive_global_status(&mut self, tx: TransactionId) -> Option<HistoryStatus> {
        let siblings = self.sibling_locations(tx);
        if siblings.is_empty() {
            return None;
        }
        let all_applied = siblings
            .iter()
            .all(|loc| self.item_at(loc).is_some_and(HistoryItem::is_applied));
        let status = if all_applied {
            HistoryStatus::Applied
        } else {
            HistoryStatus::NotApplied
        };
        let index = self.global_index(tx)?;
        let item = &mut self.stack[index];
        if item.status == status {
            return None;
        }
        item.status = status;
        Some(status)
    }

    /// Index of the last applied global item.
    pub fn undo_position(&self) -> Option<usize> {
        self.stack.iter().rposition(HistoryItem::is_applied)
    }

    /// Index of the first not-applied global item, or the stack length.
    pub fn redo_position(&self) -> usize {
        self.stack
            .iter()
            .position(|item| !item.is_applied())
            .unwrap_or(self.stack.len())
    }

    pub fn can_undo(&self) -> bool {
        self.undo_position().is_some()
    }

    pub fn can_redo(&self) -> bool {
        self.redo_position() < self.stack.len()
    }

    /// Checks that applied items form a contiguous prefix of the global stack and of every
    /// per-entity stack.
    pub fn verify_boundaries(&self) -> Result<(), HistoryError> {
        if !is_applied_prefix(&self.stack) {
            return Err(HistoryError::BoundaryViolation {
                stack: "global".to_string(),
            });
        }
        for kind in EntityKind::ALL {
            for (id, stack) in self.entity_stacks(kind) {
                if !is_applied_prefix(stack) {
                    return Err(HistoryError::BoundaryViolation {
                        stack: format!("{}/{id}", kind.data_key()),
                    });
                }
            }
        }
        Ok(())
    }
}

fn is_applied_prefix(stack: &[HistoryItem]) -> bool {
    let boundary = stack
        .iter()
        .position(|item| !item.is_applied())
        .unwrap_or(stack.len());
    stack[boundary..].iter().all(|item| !item.is_applied())
}
