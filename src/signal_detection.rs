use serde::{Deserialize, Serialize};

/// Identifier of a [`SignalDetection`] in the entity store.
pub type SignalDetectionId = String;

/// Recording station a detection was made on.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Station {
    pub name: String,
}

/// Arrival time measurement in epoch seconds.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ArrivalTime {
    pub value: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub standard_deviation: Option<f64>,
}

/// One revision of a detection's measurements.
///
/// Edits never rewrite earlier hypotheses in the analysis pipeline, but in the workstation store the
/// current (last) hypothesis is updated in place and history captures the difference.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SignalDetectionHypothesis {
    pub id: String,
    #[serde(default)]
    pub deleted: bool,
    pub phase: String,
    pub arrival_time: ArrivalTime,
}

/// A phase arrival picked on a station's waveform.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SignalDetection {
    pub id: SignalDetectionId,
    pub station: Station,
    pub signal_detection_hypotheses: Vec<SignalDetectionHypothesis>,
}

impl SignalDetection {
    pub fn new(id: &str, station: &str, phase: &str, arrival_time: f64) -> Self {
        Self {
            id: id.to_string(),
            station: Station {
                name: station.to_string(),
            },
            signal_detection_hypotheses: vec![SignalDetectionHypothesis {
                id: format!("{id}-h0"),
                deleted: false,
                phase: phase.to_string(),
                arrival_time: ArrivalTime {
                    value: arrival_time,
                    standard_deviation: None,
                },
            }],
        }
    }

    pub fn current_hypothesis(&self) -> Option<&SignalDetectionHypothesis> {
        self.signal_detection_hypotheses.last()
    }

    pub fn current_hypothesis_mut(&mut self) -> Option<&mut SignalDetectionHypothesis> {
        self.signal_detection_hypotheses.last_mut()
    }

    pub fn phase(&self) -> Option<&str> {
        self.current_hypothesis().map(|h| h.phase.as_str())
    }

    pub fn arrival_time(&self) -> Option<ArrivalTime> {
        self.current_hypothesis().map(|h| h.arrival_time)
    }

    pub fn is_deleted(&self) -> bool {
        self.current_hypothesis().map_or(true, |h| h.deleted)
    }
}
