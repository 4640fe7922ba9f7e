//! Line-oriented command scripts for the driver binary.
//!
//! One command per line, whitespace separated; `#` starts a comment.

use std::collections::BTreeMap;

use thiserror::Error;
use uuid::Uuid;

use crate::action::{Action, HistoryAction, HistoryCommand};
use crate::item::HistoryMode;
use crate::signal_detection::{ArrivalTime, SignalDetection};

#[derive(Debug, Error, PartialEq)]
pub enum ScriptError {
    #[error("unknown command `{0}`")]
    UnknownCommand(String),
    #[error("`{command}` needs {argument}")]
    MissingArgument {
        command: String,
        argument: &'static str,
    },
    #[error("`{0}` is not a number")]
    InvalidNumber(String),
    #[error("`{0}` is not a history item id")]
    InvalidId(String),
    #[error("`{0}` is not a history mode (global | event)")]
    InvalidMode(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum ScriptCommand {
    Dispatch(Action),
    /// Print the store and the history.
    Show,
}

struct Args<'a> {
    command: &'a str,
    rest: std::vec::IntoIter<&'a str>,
}

impl<'a> Args<'a> {
    fn required(&mut self, argument: &'static str) -> Result<&'a str, ScriptError> {
        self.rest.next().ok_or_else(|| ScriptError::MissingArgument {
            command: self.command.to_string(),
            argument,
        })
    }

    fn number(&mut self, argument: &'static str) -> Result<f64, ScriptError> {
        finite(self.required(argument)?)
    }

    fn optional_number(&mut self) -> Result<Option<f64>, ScriptError> {
        self.rest.next().map(finite).transpose()
    }

    fn count(&mut self) -> Result<usize, ScriptError> {
        match self.rest.next() {
            Some(v) => v.parse().map_err(|_| ScriptError::InvalidNumber(v.to_string())),
            None => Ok(1),
        }
    }

    fn id(&mut self) -> Result<Uuid, ScriptError> {
        let value = self.required("a history item id")?;
        Uuid::parse_str(value).map_err(|_| ScriptError::InvalidId(value.to_string()))
    }

    /// Remaining arguments; at least one is required.
    fn list(&mut self, argument: &'static str) -> Result<Vec<String>, ScriptError> {
        let first = self.required(argument)?.to_string();
        Ok(std::iter::once(first)
            .chain(self.rest.by_ref().map(str::to_string))
            .collect())
    }
}

/// Parses a finite float; `NaN` and infinities have no JSON form in the captured patches.
fn finite(value: &str) -> Result<f64, ScriptError> {
    value
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
        .ok_or_else(|| ScriptError::InvalidNumber(value.to_string()))
}

fn track(action: HistoryAction) -> Option<ScriptCommand> {
    Some(ScriptCommand::Dispatch(Action::Track(action)))
}

fn history(command: HistoryCommand) -> Option<ScriptCommand> {
    Some(ScriptCommand::Dispatch(Action::History(command)))
}

/// Parses one script line. Blank and comment lines yield `None`.
pub fn parse_line(line: &str) -> Result<Option<ScriptCommand>, ScriptError> {
    let line = line.split('#').next().unwrap_or_default().trim();
    let mut words = line.split_whitespace();
    let Some(command) = words.next() else {
        return Ok(None);
    };
    let mut args = Args {
        command,
        rest: words.collect::<Vec<_>>().into_iter(),
    };

    let parsed = match command {
        "associate" | "unassociate" => {
            let event_id = args.required("an event id")?.to_string();
            let signal_detection_ids = args.list("signal detection ids")?;
            track(if command == "associate" {
                HistoryAction::AssociateSignalDetectionsToEvent {
                    event_id,
                    signal_detection_ids,
                }
            } else {
                HistoryAction::UnassociateSignalDetectionsToEvent {
                    event_id,
                    signal_detection_ids,
                }
            })
        }
        "phase" => {
            let phase = args.required("a phase")?.to_string();
            track(HistoryAction::UpdatePhase {
                signal_detection_ids: args.list("signal detection ids")?,
                phase,
            })
        }
        "time" => {
            let id = args.required("a signal detection id")?.to_string();
            let value = args.number("an arrival time")?;
            let standard_deviation = args.optional_number()?;
            track(HistoryAction::UpdateArrivalTime {
                arrival_times: BTreeMap::from([(
                    id,
                    ArrivalTime {
                        value,
                        standard_deviation,
                    },
                )]),
            })
        }
        "reject" => track(HistoryAction::RejectEvents {
            event_ids: args.list("event ids")?,
        }),
        "delete-event" => track(HistoryAction::DeleteEvents {
            event_ids: args.list("event ids")?,
        }),
        "delete-sd" => track(HistoryAction::DeleteSignalDetections {
            signal_detection_ids: args.list("signal detection ids")?,
        }),
        "duplicate" => {
            let event_id = args.required("an event id")?.to_string();
            let new_event_id = args.required("a new event id")?.to_string();
            track(HistoryAction::DuplicateEvents {
                event_ids: vec![event_id],
                new_event_ids: vec![new_event_id],
            })
        }
        "create-event" => {
            let new_event_id = args.required("a new event id")?.to_string();
            track(HistoryAction::CreateEventFromSignalDetections {
                new_event_id,
                signal_detection_ids: args.list("signal detection ids")?,
            })
        }
        "virtual" => {
            let new_event_id = args.required("a new event id")?.to_string();
            let time = args.number("an origin time")?;
            track(HistoryAction::CreateVirtualEvent {
                new_event_id,
                time,
                latitude_degrees: args.optional_number()?.unwrap_or(0.0),
                longitude_degrees: args.optional_number()?.unwrap_or(0.0),
                depth_km: args.optional_number()?.unwrap_or(0.0),
            })
        }
        "create-sd" => {
            let id = args.required("a signal detection id")?;
            let station = args.required("a station")?;
            let phase = args.required("a phase")?;
            let time = args.number("an arrival time")?;
            track(HistoryAction::CreateSignalDetection {
                signal_detection: SignalDetection::new(id, station, phase, time),
            })
        }
        "default-phase" => track(HistoryAction::SetDefaultSignalDetectionPhase {
            phase: args.required("a phase")?.to_string(),
        }),
        "undo" => history(HistoryCommand::Undo {
            count: args.count()?,
        }),
        "redo" => history(HistoryCommand::Redo {
            count: args.count()?,
        }),
        "undo-id" => history(HistoryCommand::UndoById { id: args.id()? }),
        "redo-id" => history(HistoryCommand::RedoById { id: args.id()? }),
        "event-undo" | "event-redo" => {
            let event_id = args.required("an event id")?.to_string();
            let count = args.count()?;
            history(if command == "event-undo" {
                HistoryCommand::EventUndo { event_id, count }
            } else {
                HistoryCommand::EventRedo { event_id, count }
            })
        }
        "event-undo-id" | "event-redo-id" => {
            let event_id = args.required("an event id")?.to_string();
            let id = args.id()?;
            history(if command == "event-undo-id" {
                HistoryCommand::EventUndoById { event_id, id }
            } else {
                HistoryCommand::EventRedoById { event_id, id }
            })
        }
        "mode" => {
            let mode = match args.rest.next() {
                None => None,
                Some("global") => Some(HistoryMode::Global),
                Some("event") => Some(HistoryMode::Event),
                Some(other) => return Err(ScriptError::InvalidMode(other.to_string())),
            };
            Some(ScriptCommand::Dispatch(Action::SetHistoryMode(mode)))
        }
        "open" => {
            let event_id = args.required("an event id or `none`")?;
            let event_id = (event_id != "none").then(|| event_id.to_string());
            Some(ScriptCommand::Dispatch(Action::SetOpenEventId(event_id)))
        }
        "select" => Some(ScriptCommand::Dispatch(Action::SetSelectedSignalDetectionIds(
            args.rest.by_ref().map(str::to_string).collect(),
        ))),
        "select-events" => Some(ScriptCommand::Dispatch(Action::SetSelectedEventIds(
            args.rest.by_ref().map(str::to_string).collect(),
        ))),
        "clear" => Some(ScriptCommand::Dispatch(Action::ClearHistory)),
        "show" => Some(ScriptCommand::Show),
        other => return Err(ScriptError::UnknownCommand(other.to_string())),
    };
    Ok(parsed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn dispatched(line: &str) -> Action {
        match parse_line(line) {
            Ok(Some(ScriptCommand::Dispatch(action))) => action,
            other => panic!("`{line}` parsed to {other:?}"),
        }
    }

    #[test]
    fn blank_and_comment_lines_are_skipped() {
        assert_eq!(parse_line("   "), Ok(None));
        assert_eq!(parse_line("# nothing here"), Ok(None));
        assert_eq!(parse_line("show # trailing"), Ok(Some(ScriptCommand::Show)));
    }

    #[test]
    fn tracked_commands() {
        assert_eq!(
            dispatched("associate E1 SD3 SD4"),
            Action::Track(HistoryAction::AssociateSignalDetectionsToEvent {
                event_id: "E1".to_string(),
                signal_detection_ids: vec!["SD3".to_string(), "SD4".to_string()],
            })
        );
        assert_eq!(
            dispatched("phase P5KPdf SD1"),
            Action::Track(HistoryAction::UpdatePhase {
                signal_detection_ids: vec!["SD1".to_string()],
                phase: "P5KPdf".to_string(),
            })
        );
        assert!(matches!(
            dispatched("virtual E9 1638316800 10 20"),
            Action::Track(HistoryAction::CreateVirtualEvent { depth_km, latitude_degrees, .. })
                if depth_km == 0.0 && latitude_degrees == 10.0
        ));
    }

    #[test]
    fn history_commands_default_to_one_step() {
        assert_eq!(
            dispatched("undo"),
            Action::History(HistoryCommand::Undo { count: 1 })
        );
        assert_eq!(
            dispatched("event-redo E1 3"),
            Action::History(HistoryCommand::EventRedo {
                event_id: "E1".to_string(),
                count: 3
            })
        );
        assert_eq!(dispatched("mode"), Action::SetHistoryMode(None));
        assert_eq!(dispatched("open none"), Action::SetOpenEventId(None));
    }

    #[test]
    fn errors_name_the_problem() {
        assert_eq!(
            parse_line("explode"),
            Err(ScriptError::UnknownCommand("explode".to_string()))
        );
        assert_eq!(
            parse_line("associate E1"),
            Err(ScriptError::MissingArgument {
                command: "associate".to_string(),
                argument: "signal detection ids"
            })
        );
        assert_eq!(
            parse_line("undo many"),
            Err(ScriptError::InvalidNumber("many".to_string()))
        );
        assert_eq!(
            parse_line("virtual E9 NaN"),
            Err(ScriptError::InvalidNumber("NaN".to_string()))
        );
        assert_eq!(
            parse_line("time SD1 100 inf"),
            Err(ScriptError::InvalidNumber("inf".to_string()))
        );
        assert_eq!(
            parse_line("undo-id not-a-uuid"),
            Err(ScriptError::InvalidId("not-a-uuid".to_string()))
        );
        assert_eq!(
            parse_line("mode sideways"),
            Err(ScriptError::InvalidMode("sideways".to_string()))
        );
    }
}
