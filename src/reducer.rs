//! Store reducers for every dispatchable mutation.
//!
//! These are the mutations the history engine observes; they know nothing about history
//! themselves. Payloads referring to unknown entities are skipped with a warning.

use tracing::warn;

use crate::action::{Action, HistoryAction};
use crate::event::{Event, EventHypothesisId, LocationSolution, SignalDetectionHypothesisRef};
use crate::signal_detection::SignalDetectionId;
use crate::state::WorkstationState;

/// Applies a tracked mutation in place.
pub fn reduce_tracked(state: &mut WorkstationState, action: &HistoryAction) {
    let stage = state.open_stage().to_string();
    match action {
        HistoryAction::AssociateSignalDetectionsToEvent {
            event_id,
            signal_detection_ids,
        } => associate(state, &stage, event_id, signal_detection_ids),
        HistoryAction::UnassociateSignalDetectionsToEvent {
            event_id,
            signal_detection_ids,
        } => {
            let Some(hypothesis) = state
                .data
                .events
                .get_mut(event_id)
                .and_then(|e| e.preferred_hypothesis_mut(&stage))
            else {
                warn!("unassociate: unknown event {event_id}");
                return;
            };
            hypothesis
                .associated_signal_detection_hypotheses
                .retain(|r| !signal_detection_ids.contains(&r.signal_detection_id));
        }
        HistoryAction::DuplicateEvents {
            event_ids,
            new_event_ids,
        } => {
            for (event_id, new_event_id) in event_ids.iter().zip(new_event_ids) {
                let Some(source) = state.data.events.get(event_id) else {
                    warn!("duplicate: unknown event {event_id}");
                    continue;
                };
                let duplicate = duplicate_event(source, new_event_id);
                state.data.events.insert(new_event_id.clone(), duplicate);
            }
        }
        HistoryAction::CreateEventFromSignalDetections {
            new_event_id,
            signal_detection_ids,
        } => {
            let time = signal_detection_ids
                .iter()
                .filter_map(|id| state.data.signal_detections.get(id))
                .filter_map(|sd| sd.arrival_time())
                .map(|t| t.value)
                .fold(f64::INFINITY, f64::min);
            let time = if time.is_finite() { time } else { 0.0 };
            let event = Event::new(new_event_id, &stage, location(new_event_id, time, 0.0, 0.0, 0.0));
            state.data.events.insert(new_event_id.clone(), event);
            associate(state, &stage, new_event_id, signal_detection_ids);
        }
        HistoryAction::CreateVirtualEvent {
            new_event_id,
            time,
            latitude_degrees,
            longitude_degrees,
            depth_km,
        } => {
            if ![*time, *latitude_degrees, *longitude_degrees, *depth_km]
                .iter()
                .all(|v| v.is_finite())
            {
                warn!("create virtual event: non-finite location for {new_event_id}");
                return;
            }
            let location = location(
                new_event_id,
                *time,
                *latitude_degrees,
                *longitude_degrees,
                *depth_km,
            );
            state
                .data
                .events
                .insert(new_event_id.clone(), Event::new(new_event_id, &stage, location));
        }
        HistoryAction::RejectEvents { event_ids } => {
            for event_id in event_ids {
                match state
                    .data
                    .events
                    .get_mut(event_id)
                    .and_then(|e| e.preferred_hypothesis_mut(&stage))
                {
                    Some(hypothesis) => {
                        hypothesis.rejected = true;
                        hypothesis.associated_signal_detection_hypotheses.clear();
                    }
                    None => warn!("reject: unknown event {event_id}"),
                }
            }
        }
        HistoryAction::DeleteEvents { event_ids } => {
            for event_id in event_ids {
                match state
                    .data
                    .events
                    .get_mut(event_id)
                    .and_then(|e| e.preferred_hypothesis_mut(&stage))
                {
                    Some(hypothesis) => hypothesis.deleted = true,
                    None => warn!("delete: unknown event {event_id}"),
                }
            }
        }
        HistoryAction::CreateSignalDetection { signal_detection } => {
            let finite = signal_detection.arrival_time().map_or(true, |t| {
                t.value.is_finite() && t.standard_deviation.map_or(true, f64::is_finite)
            });
            if !finite {
                warn!(
                    "create signal detection: non-finite arrival time for {}",
                    signal_detection.id
                );
                return;
            }
            state
                .data
                .signal_detections
                .insert(signal_detection.id.clone(), signal_detection.clone());
        }
        HistoryAction::DeleteSignalDetections {
            signal_detection_ids,
        } => {
            for id in signal_detection_ids {
                match state
                    .data
                    .signal_detections
                    .get_mut(id)
                    .and_then(|sd| sd.current_hypothesis_mut())
                {
                    Some(hypothesis) => hypothesis.deleted = true,
                    None => {
                        warn!("delete: unknown signal detection {id}");
                        continue;
                    }
                }
                // a deleted detection may not stay associated
                for event in state.data.events.values_mut() {
                    if let Some(hypothesis) = event.preferred_hypothesis_mut(&stage) {
                        hypothesis
                            .associated_signal_detection_hypotheses
                            .retain(|r| &r.signal_detection_id != id);
                    }
                }
            }
        }
        HistoryAction::UpdateArrivalTime { arrival_times } => {
            for (id, arrival_time) in arrival_times {
                let finite = arrival_time.value.is_finite()
                    && arrival_time.standard_deviation.map_or(true, f64::is_finite);
                if !finite {
                    warn!("update arrival time: non-finite arrival time for {id}");
                    continue;
                }
                match state
                    .data
                    .signal_detections
                    .get_mut(id)
                    .and_then(|sd| sd.current_hypothesis_mut())
                {
                    Some(hypothesis) => hypothesis.arrival_time = *arrival_time,
                    None => warn!("update arrival time: unknown signal detection {id}"),
                }
            }
        }
        HistoryAction::UpdatePhase {
            signal_detection_ids,
            phase,
        } => {
            for id in signal_detection_ids {
                match state
                    .data
                    .signal_detections
                    .get_mut(id)
                    .and_then(|sd| sd.current_hypothesis_mut())
                {
                    Some(hypothesis) => hypothesis.phase = phase.clone(),
                    None => warn!("update phase: unknown signal detection {id}"),
                }
            }
        }
        HistoryAction::SetDefaultSignalDetectionPhase { phase } => {
            state.app.analyst.default_signal_detection_phase = phase.clone();
        }
    }
}

/// Applies an untracked store update in place. Returns `false` for actions that are not store
/// updates (history commands and tracked mutations).
pub fn reduce_untracked(state: &mut WorkstationState, action: &Action) -> bool {
    match action {
        Action::AddEvents(events) => {
            for event in events {
                state.data.events.insert(event.id.clone(), event.clone());
            }
        }
        Action::AddSignalDetections(detections) => {
            for sd in detections {
                state
                    .data
                    .stations
                    .entry(sd.station.name.clone())
                    .or_insert_with(|| sd.station.clone());
                state.data.signal_detections.insert(sd.id.clone(), sd.clone());
            }
        }
        Action::SetOpenIntervalName(name) => state.app.workflow.open_interval_name = name.clone(),
        Action::SetSelectedEventIds(ids) => state.app.analyst.selected_event_ids = ids.clone(),
        Action::SetSelectedSignalDetectionIds(ids) => {
            state.app.analyst.selected_sd_ids = ids.clone()
        }
        Action::SetOpenEventId(id) => state.app.analyst.open_event_id = id.clone(),
        Action::Track(_)
        | Action::History(_)
        | Action::SetHistoryMode(_)
        | Action::ClearHistory => return false,
    }
    true
}

fn associate(
    state: &mut WorkstationState,
    stage: &str,
    event_id: &str,
    signal_detection_ids: &[SignalDetectionId],
) {
    let refs: Vec<SignalDetectionHypothesisRef> = signal_detection_ids
        .iter()
        .filter_map(|id| match state.data.signal_detections.get(id) {
            Some(sd) => sd.current_hypothesis().map(|h| SignalDetectionHypothesisRef {
                signal_detection_id: id.clone(),
                hypothesis_id: h.id.clone(),
            }),
            None => {
                warn!("associate: unknown signal detection {id}");
                None
            }
        })
        .collect();

    let Some(hypothesis) = state
        .data
        .events
        .get_mut(event_id)
        .and_then(|e| e.preferred_hypothesis_mut(stage))
    else {
        warn!("associate: unknown event {event_id}");
        return;
    };
    for r in refs {
        let already = hypothesis
            .associated_signal_detection_hypotheses
            .iter()
            .any(|a| a.signal_detection_id == r.signal_detection_id);
        if !already {
            hypothesis.associated_signal_detection_hypotheses.push(r);
        }
    }
}

fn duplicate_event(source: &Event, new_event_id: &str) -> Event {
    let mut duplicate = source.clone();
    duplicate.id = new_event_id.to_string();
    for hypothesis in &mut duplicate.event_hypotheses {
        hypothesis.id = EventHypothesisId {
            event_id: new_event_id.to_string(),
            hypothesis_id: hypothesis.id.hypothesis_id.clone(),
        };
    }
    duplicate
}

fn location(
    event_id: &str,
    time: f64,
    latitude_degrees: f64,
    longitude_degrees: f64,
    depth_km: f64,
) -> LocationSolution {
    LocationSolution {
        id: format!("{event_id}-loc0"),
        time,
        latitude_degrees,
        longitude_degrees,
        depth_km,
    }
}
