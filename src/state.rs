//! The normalized entity store observed by the history engine.
//!
//! The store has two namespaces: `app` (workflow and analyst UI state) and `data` (entities fetched
//! by the query layer). Only the `events` and `signalDetections` collections of `data` are tracked
//! per entity; everything else is tracked on the flat global timeline.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::HistoryError;
use crate::event::{Event, EventId};
use crate::patch::{self, Patch};
use crate::signal_detection::{SignalDetection, SignalDetectionId, Station};

pub const APP_KEY: &str = "app";
pub const DATA_KEY: &str = "data";
pub const EVENTS_KEY: &str = "events";
pub const SIGNAL_DETECTIONS_KEY: &str = "signalDetections";

/// The two entity collections that get per-entity history.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "camelCase")]
pub enum EntityKind {
    Event,
    SignalDetection,
}

impl EntityKind {
    pub const ALL: [EntityKind; 2] = [EntityKind::Event, EntityKind::SignalDetection];

    /// Key of the collection under the `data` namespace.
    pub fn data_key(self) -> &'static str {
        match self {
            EntityKind::Event => EVENTS_KEY,
            EntityKind::SignalDetection => SIGNAL_DETECTIONS_KEY,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowState {
    /// Name of the open processing stage; hypotheses are resolved against it.
    pub open_interval_name: String,
    #[serde(default)]
    pub open_activity_names: Vec<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct AnalystState {
    pub default_signal_detection_phase: String,
    #[serde(default)]
    pub selected_event_ids: Vec<EventId>,
    #[serde(default)]
    pub selected_sd_ids: Vec<SignalDetectionId>,
    #[serde(default)]
    pub open_event_id: Option<EventId>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct AppState {
    pub workflow: WorkflowState,
    pub analyst: AnalystState,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct DataState {
    pub events: BTreeMap<EventId, Event>,
    pub signal_detections: BTreeMap<SignalDetectionId, SignalDetection>,
    /// Station metadata; non-entity data tracked only on the global timeline.
    #[serde(default)]
    pub stations: BTreeMap<String, Station>,
}

/// Snapshot of everything history can observe or restore.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct WorkstationState {
    pub app: AppState,
    pub data: DataState,
}

impl WorkstationState {
    pub fn open_stage(&self) -> &str {
        &self.app.workflow.open_interval_name
    }

    pub fn entity_ids(&self, kind: EntityKind) -> Vec<String> {
        match kind {
            EntityKind::Event => self.data.events.keys().cloned().collect(),
            EntityKind::SignalDetection => self.data.signal_detections.keys().cloned().collect(),
        }
    }

    /// Applies `patches` as one batch and returns the resulting state.
    ///
    /// `self` is untouched on failure.
    pub fn with_patches(&self, patches: &[Patch]) -> Result<Self, HistoryError> {
        if patches.is_empty() {
            return Ok(self.clone());
        }
        let mut value = serde_json::to_value(self)?;
        patch::apply_patches(&mut value, patches)?;
        Ok(serde_json::from_value(value)?)
    }
}
