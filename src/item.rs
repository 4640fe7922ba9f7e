//! The unit of history.

use std::collections::BTreeMap;
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::action::ActionKind;
use crate::event::EventId;
use crate::patch::Patch;
use crate::signal_detection::SignalDetectionId;
use crate::state::EntityKind;

pub type HistoryItemId = Uuid;

/// Groups the global item and the per-entity items produced by one user action.
pub type TransactionId = Uuid;

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum HistoryStatus {
    #[serde(rename = "applied")]
    Applied,
    #[serde(rename = "not applied")]
    NotApplied,
}

impl HistoryStatus {
    pub fn flipped(self) -> Self {
        match self {
            HistoryStatus::Applied => HistoryStatus::NotApplied,
            HistoryStatus::NotApplied => HistoryStatus::Applied,
        }
    }
}

impl fmt::Display for HistoryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HistoryStatus::Applied => f.write_str("applied"),
            HistoryStatus::NotApplied => f.write_str("not applied"),
        }
    }
}

/// Which undo/redo scope is active.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum HistoryMode {
    #[default]
    Global,
    Event,
}

impl HistoryMode {
    pub fn toggled(self) -> Self {
        match self {
            HistoryMode::Global => HistoryMode::Event,
            HistoryMode::Event => HistoryMode::Global,
        }
    }
}

/// Whether a transition created or resolved an association conflict.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConflictStatus {
    #[serde(rename = "created conflict")]
    CreatedConflict,
    #[serde(rename = "resolved conflict")]
    ResolvedConflict,
    #[default]
    #[serde(rename = "none")]
    None,
}

/// Entities an item is relevant to.
///
/// `true` marks a current relevance, `false` a relevance inherited from an earlier item for the
/// same entity. Ids are never dropped, so the full association history stays enumerable.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct AssociatedIds {
    pub events: BTreeMap<EventId, bool>,
    pub signal_detections: BTreeMap<SignalDetectionId, bool>,
}

impl AssociatedIds {
    pub fn ids(&self, kind: EntityKind) -> &BTreeMap<String, bool> {
        match kind {
            EntityKind::Event => &self.events,
            EntityKind::SignalDetection => &self.signal_detections,
        }
    }

    pub fn ids_mut(&mut self, kind: EntityKind) -> &mut BTreeMap<String, bool> {
        match kind {
            EntityKind::Event => &mut self.events,
            EntityKind::SignalDetection => &mut self.signal_detections,
        }
    }

    /// True when `event_id` is currently (not just historically) relevant.
    pub fn is_tagged_event(&self, event_id: &str) -> bool {
        self.events.get(event_id).copied().unwrap_or(false)
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HistoryItem {
    pub id: HistoryItemId,
    pub transaction_id: TransactionId,
    pub kind: ActionKind,
    /// Epoch seconds, strictly increasing across transactions.
    pub time: f64,
    pub label: String,
    pub description: String,
    pub status: HistoryStatus,
    /// Present on per-entity items only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub associated_ids: Option<AssociatedIds>,
    pub conflict_status: ConflictStatus,
    pub is_deletion: bool,
    pub is_rejection: bool,
    pub patches: Vec<Patch>,
    pub inverse_patches: Vec<Patch>,
}

impl HistoryItem {
    pub fn is_applied(&self) -> bool {
        self.status == HistoryStatus::Applied
    }

    pub fn is_tagged_event(&self, event_id: &str) -> bool {
        self.associated_ids
            .as_ref()
            .is_some_and(|ids| ids.is_tagged_event(event_id))
    }

    /// Patches that move this item to `status`: forward patches to apply, inverse to revert.
    pub fn patches_toward(&self, status: HistoryStatus) -> &[Patch] {
        match status {
            HistoryStatus::Applied => &self.patches,
            HistoryStatus::NotApplied => &self.inverse_patches,
        }
    }
}

/// Everything captured for one action: one global item plus the per-entity items.
#[derive(Debug, Clone, PartialEq)]
pub struct HistoryChange {
    pub history: HistoryItem,
    pub events: BTreeMap<EventId, HistoryItem>,
    pub signal_detections: BTreeMap<SignalDetectionId, HistoryItem>,
}

impl HistoryChange {
    pub fn transaction_id(&self) -> TransactionId {
        self.history.transaction_id
    }

    pub fn entity_items(&self, kind: EntityKind) -> &BTreeMap<String, HistoryItem> {
        match kind {
            EntityKind::Event => &self.events,
            EntityKind::SignalDetection => &self.signal_detections,
        }
    }

    pub fn items(&self) -> impl Iterator<Item = &HistoryItem> {
        std::iter::once(&self.history)
            .chain(self.events.values())
            .chain(self.signal_detections.values())
    }
}

/// Wall-clock epoch seconds, bumped by a millisecond whenever the clock would not advance.
#[derive(Debug, Clone, Default)]
pub struct HistoryClock {
    last: f64,
}

impl HistoryClock {
    pub fn now(&mut self) -> f64 {
        let wall = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs_f64())
            .unwrap_or(0.0);
        let time = if wall > self.last {
            wall
        } else {
            self.last + 0.001
        };
        self.last = time;
        time
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clock_is_strictly_increasing() {
        let mut clock = HistoryClock::default();
        let mut previous = clock.now();
        for _ in 0..1000 {
            let next = clock.now();
            assert!(next > previous);
            previous = next;
        }
    }

    #[test]
    fn statuses_serialize_with_spaces() {
        let json = serde_json::to_string(&HistoryStatus::NotApplied).expect("serializes");
        assert_eq!(json, "\"not applied\"");
        let json = serde_json::to_string(&ConflictStatus::CreatedConflict).expect("serializes");
        assert_eq!(json, "\"created conflict\"");
    }

    #[test]
    fn only_true_marks_tag_an_event() {
        let mut ids = AssociatedIds::default();
        ids.events.insert("E1".to_string(), true);
        ids.events.insert("E2".to_string(), false);
        assert!(ids.is_tagged_event("E1"));
        assert!(!ids.is_tagged_event("E2"));
        assert!(!ids.is_tagged_event("E3"));
    }
}
