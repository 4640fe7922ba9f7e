//! Human-readable labels and descriptions for history items.

use std::collections::BTreeMap;

use chrono::DateTime;
use tracing::warn;

use crate::action::HistoryAction;
use crate::signal_detection::{ArrivalTime, SignalDetection};
use crate::state::{EntityKind, WorkstationState};

const MULTIPLE: &str = "Multiple";

/// `(label, description)` for the global item and for each per-entity item of one transaction.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LabelDescriptions {
    pub history: (String, String),
    pub events: BTreeMap<String, (String, String)>,
    pub signal_detections: BTreeMap<String, (String, String)>,
}

impl LabelDescriptions {
    /// Label for a per-entity item; entities without their own entry inherit the transaction's.
    pub fn for_entity(&self, kind: EntityKind, id: &str) -> (String, String) {
        let entries = match kind {
            EntityKind::Event => &self.events,
            EntityKind::SignalDetection => &self.signal_detections,
        };
        entries.get(id).cloned().unwrap_or_else(|| self.history.clone())
    }
}

/// Formats epoch seconds as `YYYY-MM-DD HH:MM:SS.mmm` (UTC).
pub fn format_time(seconds: Option<f64>) -> String {
    let Some(seconds) = seconds.filter(|s| s.is_finite()) else {
        return "unknown".to_string();
    };
    let millis = (seconds * 1000.0).round() as i64;
    let nanos = (millis.rem_euclid(1000) * 1_000_000) as u32;
    match DateTime::from_timestamp(millis.div_euclid(1000), nanos) {
        Some(time) => time.format("%Y-%m-%d %H:%M:%S%.3f").to_string(),
        None => "unknown".to_string(),
    }
}

fn station_phase(sd: Option<&SignalDetection>) -> String {
    match sd {
        Some(sd) => format!("{}-{}", sd.station.name, sd.phase().unwrap_or("?")),
        None => "unknown".to_string(),
    }
}

fn summarize(
    label: &str,
    entries: &BTreeMap<String, (String, String)>,
    multiple: String,
) -> (String, String) {
    let description = match entries.values().next() {
        Some((_, description)) if entries.len() == 1 => description.clone(),
        _ => multiple,
    };
    (label.to_string(), description)
}

fn event_time(state: &WorkstationState, event_id: &str) -> String {
    format_time(
        state
            .data
            .events
            .get(event_id)
            .and_then(|e| e.time(state.open_stage())),
    )
}

fn event_entries(
    state: &WorkstationState,
    label: &str,
    event_ids: &[String],
    verb: &str,
) -> BTreeMap<String, (String, String)> {
    event_ids
        .iter()
        .map(|id| {
            let description = format!("EV-{} {verb}", event_time(state, id));
            (id.clone(), (label.to_string(), description))
        })
        .collect()
}

fn arrival_change(before: Option<ArrivalTime>, after: Option<ArrivalTime>) -> String {
    let value_changed = before.map(|t| t.value) != after.map(|t| t.value);
    let sd_before = before.and_then(|t| t.standard_deviation);
    let sd_after = after.and_then(|t| t.standard_deviation);
    if !value_changed && sd_before != sd_after {
        let fmt = |v: Option<f64>| v.map_or_else(|| "none".to_string(), |v| format!("{v:.3}s"));
        return format!("time uncertainty changed from {} to {}", fmt(sd_before), fmt(sd_after));
    }
    format!(
        "time changed from {} to {}",
        format_time(before.map(|t| t.value)),
        format_time(after.map(|t| t.value))
    )
}

/// Builds the labels for `action` given the store before and after it ran.
pub fn label_descriptions(
    action: &HistoryAction,
    original: &WorkstationState,
    state: &WorkstationState,
) -> LabelDescriptions {
    let sds = &state.data.signal_detections;
    match action {
        HistoryAction::AssociateSignalDetectionsToEvent {
            event_id,
            signal_detection_ids,
        }
        | HistoryAction::UnassociateSignalDetectionsToEvent {
            event_id,
            signal_detection_ids,
        } => {
            let (label, verb) = match action {
                HistoryAction::AssociateSignalDetectionsToEvent { .. } => {
                    ("Association", "associated")
                }
                _ => ("Unassociation", "unassociated"),
            };
            let time = event_time(state, event_id);
            let signal_detections: BTreeMap<_, _> = signal_detection_ids
                .iter()
                .map(|id| {
                    let description = format!("{} {verb} to EV-{time}", station_phase(sds.get(id)));
                    (id.clone(), (label.to_string(), description))
                })
                .collect();
            LabelDescriptions {
                history: summarize(label, &signal_detections, MULTIPLE.to_string()),
                signal_detections,
                ..Default::default()
            }
        }
        HistoryAction::DuplicateEvents { new_event_ids, .. } => {
            let events = event_entries(state, "Creation", new_event_ids, "created (duplicate)");
            LabelDescriptions {
                history: summarize("Creation", &events, MULTIPLE.to_string()),
                events,
                ..Default::default()
            }
        }
        HistoryAction::RejectEvents { event_ids } => {
            let events = event_entries(state, "Rejection", event_ids, "rejected");
            LabelDescriptions {
                history: summarize("Rejection", &events, MULTIPLE.to_string()),
                events,
                ..Default::default()
            }
        }
        HistoryAction::DeleteEvents { event_ids } => {
            let events = event_entries(state, "Deletion", event_ids, "deleted");
            LabelDescriptions {
                history: summarize("Deletion", &events, MULTIPLE.to_string()),
                events,
                ..Default::default()
            }
        }
        HistoryAction::CreateEventFromSignalDetections { new_event_id, .. }
        | HistoryAction::CreateVirtualEvent { new_event_id, .. } => {
            let events = event_entries(state, "Creation", std::slice::from_ref(new_event_id), "created");
            LabelDescriptions {
                history: summarize("Creation", &events, MULTIPLE.to_string()),
                events,
                ..Default::default()
            }
        }
        HistoryAction::CreateSignalDetection { signal_detection } => {
            let description = format!(
                "{} created at {}",
                station_phase(Some(signal_detection)),
                format_time(signal_detection.arrival_time().map(|t| t.value))
            );
            let entry = ("Creation".to_string(), description);
            LabelDescriptions {
                history: entry.clone(),
                signal_detections: BTreeMap::from([(signal_detection.id.clone(), entry)]),
                ..Default::default()
            }
        }
        HistoryAction::DeleteSignalDetections {
            signal_detection_ids,
        } => {
            let signal_detections: BTreeMap<_, _> = signal_detection_ids
                .iter()
                .map(|id| {
                    let sd = sds.get(id);
                    let description = format!(
                        "{} deleted at {}",
                        station_phase(sd),
                        format_time(sd.and_then(|s| s.arrival_time()).map(|t| t.value))
                    );
                    (id.clone(), ("Deletion".to_string(), description))
                })
                .collect();
            LabelDescriptions {
                history: summarize("Deletion", &signal_detections, MULTIPLE.to_string()),
                signal_detections,
                ..Default::default()
            }
        }
        HistoryAction::UpdateArrivalTime { arrival_times } => {
            let signal_detections: BTreeMap<_, _> = arrival_times
                .keys()
                .map(|id| {
                    let before = original.data.signal_detections.get(id).and_then(|s| s.arrival_time());
                    let after = sds.get(id).and_then(|s| s.arrival_time());
                    let description = format!(
                        "{} {}",
                        station_phase(sds.get(id)),
                        arrival_change(before, after)
                    );
                    (id.clone(), ("Time".to_string(), description))
                })
                .collect();
            LabelDescriptions {
                history: summarize("Time", &signal_detections, MULTIPLE.to_string()),
                signal_detections,
                ..Default::default()
            }
        }
        HistoryAction::UpdatePhase {
            signal_detection_ids,
            phase,
        } => {
            let signal_detections: BTreeMap<_, _> = signal_detection_ids
                .iter()
                .map(|id| {
                    let description = format!(
                        "{} phase changed to {}",
                        station_phase(original.data.signal_detections.get(id)),
                        sds.get(id).and_then(|s| s.phase()).unwrap_or(phase.as_str())
                    );
                    (id.clone(), ("Phase".to_string(), description))
                })
                .collect();
            LabelDescriptions {
                history: summarize("Phase", &signal_detections, format!("{MULTIPLE} to {phase}")),
                signal_detections,
                ..Default::default()
            }
        }
        HistoryAction::SetDefaultSignalDetectionPhase { phase } => {
            if original.app.analyst.default_signal_detection_phase == *phase {
                warn!("default phase is already {phase}");
            }
            LabelDescriptions {
                history: (
                    "Default phase".to_string(),
                    format!("Default phase set to {phase}"),
                ),
                ..Default::default()
            }
        }
    }
}
