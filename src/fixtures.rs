//! Demo store contents for the scripted driver and the unit tests.
//!
//! Stage `AL1`, two events ten minutes apart, four detections. `E1` associates `SD1` and `SD2`;
//! `SD3` and `SD4` are unassociated.

use crate::event::{Event, LocationSolution, SignalDetectionHypothesisRef};
use crate::signal_detection::SignalDetection;
use crate::state::{AnalystState, AppState, DataState, WorkflowState, WorkstationState};

pub const DEMO_STAGE: &str = "AL1";

/// 2021-12-01 00:00:00 UTC.
pub const DEMO_ORIGIN: f64 = 1_638_316_800.0;

fn event(id: &str, offset: f64, associated: &[&SignalDetection]) -> Event {
    let mut event = Event::new(
        id,
        DEMO_STAGE,
        LocationSolution {
            id: format!("{id}-loc0"),
            time: DEMO_ORIGIN + offset,
            latitude_degrees: 0.0,
            longitude_degrees: 0.0,
            depth_km: 10.0,
        },
    );
    if let Some(hypothesis) = event.preferred_hypothesis_mut(DEMO_STAGE) {
        hypothesis.associated_signal_detection_hypotheses = associated
            .iter()
            .filter_map(|sd| {
                sd.current_hypothesis().map(|h| SignalDetectionHypothesisRef {
                    signal_detection_id: sd.id.clone(),
                    hypothesis_id: h.id.clone(),
                })
            })
            .collect();
    }
    event
}

pub fn demo_signal_detections() -> Vec<SignalDetection> {
    vec![
        SignalDetection::new("SD1", "ASAR", "P", DEMO_ORIGIN + 60.0),
        SignalDetection::new("SD2", "PDAR", "P", DEMO_ORIGIN + 90.0),
        SignalDetection::new("SD3", "TXAR", "S", DEMO_ORIGIN + 660.0),
        SignalDetection::new("SD4", "ARCES", "Pn", DEMO_ORIGIN + 690.0),
    ]
}

pub fn demo_events() -> Vec<Event> {
    let sds = demo_signal_detections();
    let associated: Vec<&SignalDetection> = sds.iter().take(2).collect();
    vec![event("E1", 0.0, &associated), event("E2", 600.0, &[])]
}

pub fn demo_state() -> WorkstationState {
    let mut data = DataState::default();
    for sd in demo_signal_detections() {
        data.stations
            .insert(sd.station.name.clone(), sd.station.clone());
        data.signal_detections.insert(sd.id.clone(), sd);
    }
    for event in demo_events() {
        data.events.insert(event.id.clone(), event);
    }
    WorkstationState {
        app: AppState {
            workflow: WorkflowState {
                open_interval_name: DEMO_STAGE.to_string(),
                open_activity_names: vec!["Event Review".to_string()],
            },
            analyst: AnalystState {
                default_signal_detection_phase: "P".to_string(),
                ..Default::default()
            },
        },
        data,
    }
}
