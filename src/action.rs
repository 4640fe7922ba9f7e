use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::event::{Event, EventId};
use crate::item::HistoryMode;
use crate::signal_detection::{ArrivalTime, SignalDetection, SignalDetectionId};

/// The closed set of store mutations that history records.
///
/// Anything not expressible here is invisible to the capture step.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum HistoryAction {
    AssociateSignalDetectionsToEvent {
        event_id: EventId,
        signal_detection_ids: Vec<SignalDetectionId>,
    },
    UnassociateSignalDetectionsToEvent {
        event_id: EventId,
        signal_detection_ids: Vec<SignalDetectionId>,
    },
    /// Copies each event (associations included) under the paired new id.
    DuplicateEvents {
        event_ids: Vec<EventId>,
        new_event_ids: Vec<EventId>,
    },
    CreateEventFromSignalDetections {
        new_event_id: EventId,
        signal_detection_ids: Vec<SignalDetectionId>,
    },
    CreateVirtualEvent {
        new_event_id: EventId,
        time: f64,
        latitude_degrees: f64,
        longitude_degrees: f64,
        depth_km: f64,
    },
    RejectEvents {
        event_ids: Vec<EventId>,
    },
    DeleteEvents {
        event_ids: Vec<EventId>,
    },
    CreateSignalDetection {
        signal_detection: SignalDetection,
    },
    DeleteSignalDetections {
        signal_detection_ids: Vec<SignalDetectionId>,
    },
    UpdateArrivalTime {
        arrival_times: BTreeMap<SignalDetectionId, ArrivalTime>,
    },
    UpdatePhase {
        signal_detection_ids: Vec<SignalDetectionId>,
        phase: String,
    },
    /// App-namespace change; recorded on the global timeline only.
    SetDefaultSignalDetectionPhase {
        phase: String,
    },
}

/// Payload-free tag of a [`HistoryAction`], stored on every history item.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase")]
pub enum ActionKind {
    AssociateSignalDetectionsToEvent,
    UnassociateSignalDetectionsToEvent,
    DuplicateEvents,
    CreateEventFromSignalDetections,
    CreateVirtualEvent,
    RejectEvents,
    DeleteEvents,
    CreateSignalDetection,
    DeleteSignalDetections,
    UpdateArrivalTime,
    UpdatePhase,
    SetDefaultSignalDetectionPhase,
}

impl ActionKind {
    /// Entity actions get per-entity history items; the rest only a global one.
    pub fn is_entity_action(self) -> bool {
        !matches!(self, ActionKind::SetDefaultSignalDetectionPhase)
    }

    pub fn is_deletion(self) -> bool {
        matches!(
            self,
            ActionKind::DeleteEvents | ActionKind::DeleteSignalDetections
        )
    }

    pub fn is_rejection(self) -> bool {
        matches!(self, ActionKind::RejectEvents)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ActionKind::AssociateSignalDetectionsToEvent => "data/associateSignalDetectionsToEvent",
            ActionKind::UnassociateSignalDetectionsToEvent => {
                "data/unassociateSignalDetectionsToEvent"
            }
            ActionKind::DuplicateEvents => "data/duplicateEvents",
            ActionKind::CreateEventFromSignalDetections => "data/createEventFromSignalDetections",
            ActionKind::CreateVirtualEvent => "data/createVirtualEvent",
            ActionKind::RejectEvents => "data/rejectEvents",
            ActionKind::DeleteEvents => "data/deleteEvents",
            ActionKind::CreateSignalDetection => "data/createSignalDetection",
            ActionKind::DeleteSignalDetections => "data/deleteSignalDetections",
            ActionKind::UpdateArrivalTime => "data/updateArrivalTimeSignalDetection",
            ActionKind::UpdatePhase => "data/updatePhaseSignalDetection",
            ActionKind::SetDefaultSignalDetectionPhase => "analyst/setDefaultSignalDetectionPhase",
        }
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl HistoryAction {
    pub fn kind(&self) -> ActionKind {
        match self {
            HistoryAction::AssociateSignalDetectionsToEvent { .. } => {
                ActionKind::AssociateSignalDetectionsToEvent
            }
            HistoryAction::UnassociateSignalDetectionsToEvent { .. } => {
                ActionKind::UnassociateSignalDetectionsToEvent
            }
            HistoryAction::DuplicateEvents { .. } => ActionKind::DuplicateEvents,
            HistoryAction::CreateEventFromSignalDetections { .. } => {
                ActionKind::CreateEventFromSignalDetections
            }
            HistoryAction::CreateVirtualEvent { .. } => ActionKind::CreateVirtualEvent,
            HistoryAction::RejectEvents { .. } => ActionKind::RejectEvents,
            HistoryAction::DeleteEvents { .. } => ActionKind::DeleteEvents,
            HistoryAction::CreateSignalDetection { .. } => ActionKind::CreateSignalDetection,
            HistoryAction::DeleteSignalDetections { .. } => ActionKind::DeleteSignalDetections,
            HistoryAction::UpdateArrivalTime { .. } => ActionKind::UpdateArrivalTime,
            HistoryAction::UpdatePhase { .. } => ActionKind::UpdatePhase,
            HistoryAction::SetDefaultSignalDetectionPhase { .. } => {
                ActionKind::SetDefaultSignalDetectionPhase
            }
        }
    }
}

/// Requests against the history stacks.
#[derive(Debug, Clone, PartialEq)]
pub enum HistoryCommand {
    Undo { count: usize },
    UndoById { id: Uuid },
    Redo { count: usize },
    RedoById { id: Uuid },
    EventUndo { event_id: EventId, count: usize },
    EventUndoById { event_id: EventId, id: Uuid },
    EventRedo { event_id: EventId, count: usize },
    EventRedoById { event_id: EventId, id: Uuid },
}

impl HistoryCommand {
    pub fn is_undo(&self) -> bool {
        matches!(
            self,
            HistoryCommand::Undo { .. }
                | HistoryCommand::UndoById { .. }
                | HistoryCommand::EventUndo { .. }
                | HistoryCommand::EventUndoById { .. }
        )
    }

    pub fn is_event_scoped(&self) -> bool {
        matches!(
            self,
            HistoryCommand::EventUndo { .. }
                | HistoryCommand::EventUndoById { .. }
                | HistoryCommand::EventRedo { .. }
                | HistoryCommand::EventRedoById { .. }
        )
    }
}

/// Everything that can be dispatched against the workstation store.
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    /// A recorded mutation.
    Track(HistoryAction),
    History(HistoryCommand),
    /// Sets the mode, or toggles it when `None`.
    SetHistoryMode(Option<HistoryMode>),
    ClearHistory,
    // Untracked store updates (query results and selection state).
    AddEvents(Vec<Event>),
    AddSignalDetections(Vec<SignalDetection>),
    SetOpenIntervalName(String),
    SetSelectedEventIds(Vec<EventId>),
    SetSelectedSignalDetectionIds(Vec<SignalDetectionId>),
    SetOpenEventId(Option<EventId>),
}
