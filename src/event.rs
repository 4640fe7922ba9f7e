use serde::{Deserialize, Serialize};

use crate::signal_detection::SignalDetectionId;

/// Identifier of an [`Event`] in the entity store.
pub type EventId = String;

/// Fully qualified hypothesis id: the owning event plus the hypothesis within it.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct EventHypothesisId {
    pub event_id: EventId,
    pub hypothesis_id: String,
}

/// Reference from an event hypothesis to the detection hypothesis it associates.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SignalDetectionHypothesisRef {
    pub signal_detection_id: SignalDetectionId,
    pub hypothesis_id: String,
}

/// A hypocentre estimate.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LocationSolution {
    pub id: String,
    /// Origin time in epoch seconds.
    pub time: f64,
    pub latitude_degrees: f64,
    pub longitude_degrees: f64,
    pub depth_km: f64,
}

/// One analyst or pipeline interpretation of an event.
///
/// Association is expressed here, on the event side: a detection is "associated to an event" when
/// the event's preferred hypothesis for the open stage references one of its hypotheses.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EventHypothesis {
    pub id: EventHypothesisId,
    #[serde(default)]
    pub rejected: bool,
    #[serde(default)]
    pub deleted: bool,
    #[serde(default)]
    pub associated_signal_detection_hypotheses: Vec<SignalDetectionHypothesisRef>,
    #[serde(default)]
    pub location_solutions: Vec<LocationSolution>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preferred_location_solution_id: Option<String>,
}

/// Which hypothesis a processing stage prefers.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PreferredEventHypothesis {
    pub stage: String,
    pub hypothesis_id: String,
}

/// A seismic event: a set of competing hypotheses plus the per-stage preference among them.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    pub id: EventId,
    pub event_hypotheses: Vec<EventHypothesis>,
    #[serde(default)]
    pub preferred_event_hypothesis_by_stage: Vec<PreferredEventHypothesis>,
}

impl Event {
    /// Builds an event with a single hypothesis that is preferred for `stage`.
    pub fn new(id: &str, stage: &str, location: LocationSolution) -> Self {
        let hypothesis_id = format!("{id}-h0");
        Self {
            id: id.to_string(),
            event_hypotheses: vec![EventHypothesis {
                id: EventHypothesisId {
                    event_id: id.to_string(),
                    hypothesis_id: hypothesis_id.clone(),
                },
                rejected: false,
                deleted: false,
                associated_signal_detection_hypotheses: Vec::new(),
                preferred_location_solution_id: Some(location.id.clone()),
                location_solutions: vec![location],
            }],
            preferred_event_hypothesis_by_stage: vec![PreferredEventHypothesis {
                stage: stage.to_string(),
                hypothesis_id,
            }],
        }
    }

    fn preferred_index(&self, stage: &str) -> Option<usize> {
        let preferred = self
            .preferred_event_hypothesis_by_stage
            .iter()
            .find(|p| p.stage == stage)
            .and_then(|p| {
                self.event_hypotheses
                    .iter()
                    .position(|h| h.id.hypothesis_id == p.hypothesis_id)
            });
        preferred.or_else(|| self.event_hypotheses.len().checked_sub(1))
    }

    /// The hypothesis preferred for `stage`, falling back to the most recent hypothesis when the
    /// stage has no explicit preference.
    pub fn preferred_hypothesis(&self, stage: &str) -> Option<&EventHypothesis> {
        self.preferred_index(stage)
            .and_then(|i| self.event_hypotheses.get(i))
    }

    pub fn preferred_hypothesis_mut(&mut self, stage: &str) -> Option<&mut EventHypothesis> {
        let index = self.preferred_index(stage)?;
        self.event_hypotheses.get_mut(index)
    }

    /// Detections associated to the preferred hypothesis for `stage`, in association order.
    pub fn associated_signal_detection_ids(&self, stage: &str) -> Vec<SignalDetectionId> {
        self.preferred_hypothesis(stage)
            .map(|h| {
                h.associated_signal_detection_hypotheses
                    .iter()
                    .map(|r| r.signal_detection_id.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn is_associated_to(&self, stage: &str, signal_detection_id: &str) -> bool {
        self.preferred_hypothesis(stage).is_some_and(|h| {
            h.associated_signal_detection_hypotheses
                .iter()
                .any(|r| r.signal_detection_id == signal_detection_id)
        })
    }

    /// True while the preferred hypothesis is neither rejected nor deleted.
    pub fn is_open(&self, stage: &str) -> bool {
        self.preferred_hypothesis(stage)
            .is_some_and(|h| !h.rejected && !h.deleted)
    }

    /// Origin time of the preferred location solution of the preferred hypothesis.
    pub fn time(&self, stage: &str) -> Option<f64> {
        let hypothesis = self.preferred_hypothesis(stage)?;
        let solution = match &hypothesis.preferred_location_solution_id {
            Some(id) => hypothesis.location_solutions.iter().find(|l| &l.id == id),
            None => hypothesis.location_solutions.last(),
        };
        solution.map(|l| l.time)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn location(time: f64) -> LocationSolution {
        LocationSolution {
            id: "loc".to_string(),
            time,
            latitude_degrees: 0.0,
            longitude_degrees: 0.0,
            depth_km: 10.0,
        }
    }

    #[test]
    fn preferred_hypothesis_follows_stage_then_falls_back() {
        let mut event = Event::new("E1", "AL1", location(100.0));
        let mut second = event.event_hypotheses[0].clone();
        second.id.hypothesis_id = "E1-h1".to_string();
        second.rejected = true;
        event.event_hypotheses.push(second);

        assert_eq!(
            event.preferred_hypothesis("AL1").map(|h| h.id.hypothesis_id.as_str()),
            Some("E1-h0")
        );
        // No preference for AL2: the latest hypothesis wins.
        assert_eq!(
            event.preferred_hypothesis("AL2").map(|h| h.id.hypothesis_id.as_str()),
            Some("E1-h1")
        );
        assert!(event.is_open("AL1"));
        assert!(!event.is_open("AL2"));
    }

    #[test]
    fn time_uses_preferred_location_solution() {
        let event = Event::new("E1", "AL1", location(1234.5));
        assert_eq!(event.time("AL1"), Some(1234.5));
    }
}
