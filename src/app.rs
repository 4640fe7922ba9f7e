//! Root store: the entity store, its history, and the dispatch path that ties them together.
//!
//! Every mutation funnels through [`App::update`]. Tracked mutations are reduced, captured and
//! recorded; history commands are planned against cloned state and committed in one swap.
//! The split `apply_tracked` / `record` and `plan` / `commit` halves let the runtime move the
//! capture and planning work off the dispatch path.

use tracing::{debug, error, info, warn};

use crate::action::{Action, HistoryAction, HistoryCommand};
use crate::capture::capture_changes;
use crate::cleanup::{default_listeners, CommitListener};
use crate::config::HistoryConfig;
use crate::conflict::determine_conflict_status;
use crate::error::HistoryError;
use crate::event_undo;
use crate::history::HistoryState;
use crate::item::{ConflictStatus, HistoryChange, HistoryClock, HistoryMode, TransactionId};
use crate::reducer::{reduce_tracked, reduce_untracked};
use crate::state::WorkstationState;
use crate::undo::{self, Transition};

/// Outcome of one dispatched action.
#[derive(Debug, Clone, PartialEq)]
pub enum Dispatched {
    /// Untracked store update, mode change or history clear.
    Applied,
    /// Tracked mutation recorded as a new transaction.
    Recorded(TransactionId),
    /// Tracked mutation that did not change the store.
    Unchanged,
    /// Tracked mutation that changed the store but could not be captured.
    Unrecorded,
    Replayed(ReplayReport),
    /// Undo/redo planned against a store that has since moved on, or a capture taken against a
    /// history that has since moved on.
    Stale,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReplayReport {
    pub command: HistoryCommand,
    pub patches: usize,
    pub conflict_status: ConflictStatus,
}

/// Snapshot pair for one tracked mutation, ready to be diffed.
#[derive(Debug, Clone)]
pub struct CaptureJob {
    pub action: HistoryAction,
    original: WorkstationState,
    state: WorkstationState,
    history: HistoryState,
    history_version: u64,
    time: f64,
    validate: bool,
}

impl CaptureJob {
    /// History version the capture was diffed against.
    pub fn history_version(&self) -> u64 {
        self.history_version
    }

    pub fn run(&self) -> Result<Option<HistoryChange>, HistoryError> {
        capture_changes(
            &self.action,
            &self.original,
            &self.state,
            &self.history,
            self.time,
            self.validate,
        )
    }
}

/// An undo/redo request against a fixed store version.
#[derive(Debug, Clone)]
pub struct ReplayJob {
    pub command: HistoryCommand,
    state: WorkstationState,
    history: HistoryState,
    version: u64,
    validate: bool,
}

/// A computed undo/redo, ready to be committed.
#[derive(Debug, Clone)]
pub struct Replay {
    pub command: HistoryCommand,
    pub history: HistoryState,
    pub state: WorkstationState,
    pub patches: usize,
    pub conflict_status: ConflictStatus,
    version: u64,
}

impl ReplayJob {
    pub fn run(&self) -> Result<Replay, HistoryError> {
        let Transition { history, patches } = match &self.command {
            HistoryCommand::Undo { count } => undo::undo(&self.history, *count),
            HistoryCommand::UndoById { id } => undo::undo_by_id(&self.history, *id),
            HistoryCommand::Redo { count } => undo::redo(&self.history, *count),
            HistoryCommand::RedoById { id } => undo::redo_by_id(&self.history, *id),
            HistoryCommand::EventUndo { event_id, count } => {
                event_undo::event_undo(&self.history, event_id, *count)
            }
            HistoryCommand::EventUndoById { event_id, id } => {
                event_undo::event_undo_by_id(&self.history, event_id, *id)
            }
            HistoryCommand::EventRedo { event_id, count } => {
                event_undo::event_redo(&self.history, event_id, *count)
            }
            HistoryCommand::EventRedoById { event_id, id } => {
                event_undo::event_redo_by_id(&self.history, event_id, *id)
            }
        }?;

        if self.validate && !self.command.is_event_scoped() && self.history.verify_boundaries().is_ok()
        {
            history.verify_boundaries()?;
        }

        let state = self.state.with_patches(&patches)?;
        let conflict_status = determine_conflict_status(&self.state, &state);
        Ok(Replay {
            command: self.command.clone(),
            history,
            state,
            patches: patches.len(),
            conflict_status,
            version: self.version,
        })
    }
}

pub struct App {
    state: WorkstationState,
    history: HistoryState,
    config: HistoryConfig,
    clock: HistoryClock,
    /// Bumped on every store change; replays planned against an older version are dropped.
    version: u64,
    /// Bumped on every history change; captures diffed against an older history are dropped.
    history_version: u64,
    listeners: Vec<Box<dyn CommitListener>>,
}

impl App {
    pub fn new(config: HistoryConfig) -> Self {
        Self::with_state(config, WorkstationState::default())
    }

    pub fn with_state(config: HistoryConfig, state: WorkstationState) -> Self {
        Self {
            state,
            history: HistoryState::new(),
            config,
            clock: HistoryClock::default(),
            version: 0,
            history_version: 0,
            listeners: default_listeners(),
        }
    }

    pub fn state(&self) -> &WorkstationState {
        &self.state
    }

    pub fn history(&self) -> &HistoryState {
        &self.history
    }

    pub fn config(&self) -> &HistoryConfig {
        &self.config
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn mode(&self) -> HistoryMode {
        self.history.mode
    }

    /// Dispatches `action` synchronously.
    pub fn update(&mut self, action: Action) -> Result<Dispatched, HistoryError> {
        let result = match action {
            Action::Track(tracked) => Ok(self.track(&tracked)),
            Action::History(command) => {
                let job = self.plan(command);
                job.run().and_then(|replay| self.commit(replay))
            }
            Action::SetHistoryMode(mode) => {
                self.history.set_mode(mode);
                debug!("history mode is now {:?}", self.history.mode);
                Ok(Dispatched::Applied)
            }
            Action::ClearHistory => {
                self.history.clear();
                self.history_version += 1;
                Ok(Dispatched::Applied)
            }
            other => {
                if reduce_untracked(&mut self.state, &other) {
                    self.version += 1;
                }
                Ok(Dispatched::Applied)
            }
        };
        if let Err(err) = &result {
            self.log_failure(err);
        }
        result
    }

    fn track(&mut self, action: &HistoryAction) -> Dispatched {
        let job = self.apply_tracked(action);
        match job.run() {
            Ok(Some(change)) => match self.record(change, job.history_version()) {
                Ok(outcome) => outcome,
                Err(err) => {
                    self.log_failure(&err);
                    Dispatched::Unrecorded
                }
            },
            Ok(None) => Dispatched::Unchanged,
            Err(err) => {
                error!("rejected undo/redo history for {}: {err}", action.kind());
                Dispatched::Unrecorded
            }
        }
    }

    /// Reduces a tracked mutation and returns the capture work for it.
    pub fn apply_tracked(&mut self, action: &HistoryAction) -> CaptureJob {
        debug!("received {} to be tracked with undo/redo history", action.kind());
        let original = self.state.clone();
        reduce_tracked(&mut self.state, action);
        if original != self.state {
            self.version += 1;
        }
        CaptureJob {
            action: action.clone(),
            original,
            state: self.state.clone(),
            history: self.history.clone(),
            history_version: self.history_version,
            time: self.clock.now(),
            validate: self.config.validate_captures,
        }
    }

    /// Appends a captured change to the history.
    ///
    /// A change captured against `history_version` is dropped as stale once the history has moved
    /// on (an undo/redo or clear committed in between); its mutation stays in the store unrecorded.
    pub fn record(
        &mut self,
        change: HistoryChange,
        history_version: u64,
    ) -> Result<Dispatched, HistoryError> {
        if history_version != self.history_version {
            warn!(
                "dropping stale {} capture taken at history version {} (now {})",
                change.history.kind, history_version, self.history_version
            );
            return Ok(Dispatched::Stale);
        }
        let tx = change.transaction_id();
        self.history.add(change, self.config.max_history)?;
        self.history_version += 1;
        Ok(Dispatched::Recorded(tx))
    }

    /// Mode-aware routing: count-based undo/redo act on the open event in event mode.
    pub fn route(&self, command: HistoryCommand) -> HistoryCommand {
        let open_event = match (self.history.mode, &self.state.app.analyst.open_event_id) {
            (HistoryMode::Event, Some(event_id)) => event_id.clone(),
            _ => return command,
        };
        match command {
            HistoryCommand::Undo { count } => HistoryCommand::EventUndo {
                event_id: open_event,
                count,
            },
            HistoryCommand::Redo { count } => HistoryCommand::EventRedo {
                event_id: open_event,
                count,
            },
            other => other,
        }
    }

    pub fn active_undo(&self, count: usize) -> HistoryCommand {
        self.route(HistoryCommand::Undo { count })
    }

    pub fn active_redo(&self, count: usize) -> HistoryCommand {
        self.route(HistoryCommand::Redo { count })
    }

    pub fn plan(&self, command: HistoryCommand) -> ReplayJob {
        ReplayJob {
            command: self.route(command),
            state: self.state.clone(),
            history: self.history.clone(),
            version: self.version,
            validate: self.config.validate_captures,
        }
    }

    /// Swaps in a computed replay and lets the listeners reconcile selection state.
    pub fn commit(&mut self, replay: Replay) -> Result<Dispatched, HistoryError> {
        if replay.version != self.version {
            debug!(
                "dropping stale {:?} planned at version {} (now {})",
                replay.command, replay.version, self.version
            );
            return Ok(Dispatched::Stale);
        }
        self.history = replay.history;
        self.state = replay.state;
        self.version += 1;
        self.history_version += 1;
        info!(
            "replayed {:?}: {} patch(es), conflict status {:?}",
            replay.command, replay.patches, replay.conflict_status
        );

        for listener in &self.listeners {
            if let Some(action) = listener.reconcile(&self.state) {
                debug!("{} listener reconciled {:?}", listener.name(), action);
                reduce_untracked(&mut self.state, &action);
            }
        }
        Ok(Dispatched::Replayed(ReplayReport {
            command: replay.command,
            patches: replay.patches,
            conflict_status: replay.conflict_status,
        }))
    }

    pub fn undo_position(&self) -> Option<usize> {
        self.history.undo_position()
    }

    pub fn redo_position(&self) -> usize {
        self.history.redo_position()
    }

    pub fn event_undo_position(&self, event_id: &str) -> Option<usize> {
        event_undo::event_undo_position(&self.history, event_id)
    }

    pub fn event_redo_position(&self, event_id: &str) -> usize {
        event_undo::event_redo_position(&self.history, event_id)
    }

    fn active_event(&self) -> Option<&str> {
        match self.history.mode {
            HistoryMode::Event => self.state.app.analyst.open_event_id.as_deref(),
            HistoryMode::Global => None,
        }
    }

    pub fn can_undo(&self) -> bool {
        match self.active_event() {
            Some(event_id) => event_undo::can_event_undo(&self.history, event_id),
            None => self.history.can_undo(),
        }
    }

    pub fn can_redo(&self) -> bool {
        match self.active_event() {
            Some(event_id) => event_undo::can_event_redo(&self.history, event_id),
            None => self.history.can_redo(),
        }
    }

    /// Logs a failed request with the history context it failed in.
    pub(crate) fn log_failure(&self, err: &HistoryError) {
        error!(
            "history request failed: {err} (stack length {}, undo position {:?}, redo position {}, mode {:?})",
            self.history.stack.len(),
            self.history.undo_position(),
            self.history.redo_position(),
            self.history.mode
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures;
    use crate::state::EntityKind;
    use pretty_assertions::assert_eq;

    fn app() -> App {
        let config = HistoryConfig {
            validate_captures: true,
            ..HistoryConfig::default()
        };
        App::with_state(config, fixtures::demo_state())
    }

    fn associate(event_id: &str, sd: &str) -> Action {
        Action::Track(HistoryAction::AssociateSignalDetectionsToEvent {
            event_id: event_id.to_string(),
            signal_detection_ids: vec![sd.to_string()],
        })
    }

    fn phase(sd: &str, phase: &str) -> Action {
        Action::Track(HistoryAction::UpdatePhase {
            signal_detection_ids: vec![sd.to_string()],
            phase: phase.to_string(),
        })
    }

    #[test]
    fn no_op_actions_are_not_recorded() {
        let mut app = app();
        let outcome = app.update(associate("E1", "SD1")).expect("dispatch");
        assert_eq!(outcome, Dispatched::Unchanged);
        assert!(app.history().stack.is_empty());
    }

    #[test]
    fn undo_and_redo_report_conflict_transitions() {
        let mut app = app();
        let before = app.state().clone();
        assert!(matches!(
            app.update(associate("E2", "SD1")).expect("dispatch"),
            Dispatched::Recorded(_)
        ));
        let after = app.state().clone();

        let Dispatched::Replayed(report) = app
            .update(Action::History(HistoryCommand::Undo { count: 1 }))
            .expect("undo")
        else {
            panic!("undo should replay");
        };
        assert_eq!(report.conflict_status, ConflictStatus::ResolvedConflict);
        assert_eq!(app.state(), &before);

        let Dispatched::Replayed(report) = app
            .update(Action::History(HistoryCommand::Redo { count: 1 }))
            .expect("redo")
        else {
            panic!("redo should replay");
        };
        assert_eq!(report.conflict_status, ConflictStatus::CreatedConflict);
        assert_eq!(app.state(), &after);
    }

    #[test]
    fn eviction_keeps_the_newest_transactions() {
        let config = HistoryConfig {
            max_history: 3,
            ..HistoryConfig::default()
        };
        let mut app = App::with_state(config, fixtures::demo_state());
        for p in ["S", "Pn", "Pg", "Lg", "Sn"] {
            app.update(phase("SD1", p)).expect("dispatch");
        }
        assert_eq!(app.history().stack.len(), 3);
        assert_eq!(app.history().entity_stack(EntityKind::SignalDetection, "SD1").len(), 3);
        app.history().verify_boundaries().expect("boundaries");

        app.update(Action::History(HistoryCommand::Undo { count: 3 }))
            .expect("undo");
        assert_eq!(app.state().data.signal_detections["SD1"].phase(), Some("Pn"));
    }

    #[test]
    fn event_mode_routes_to_the_open_event() {
        let mut app = app();
        app.update(associate("E1", "SD3")).expect("dispatch");
        app.update(phase("SD3", "P5KPdf")).expect("dispatch");
        app.update(phase("SD4", "Pg")).expect("dispatch");

        app.update(Action::SetHistoryMode(None)).expect("toggle");
        app.update(Action::SetOpenEventId(Some("E1".to_string())))
            .expect("open");
        assert_eq!(
            app.active_undo(1),
            HistoryCommand::EventUndo {
                event_id: "E1".to_string(),
                count: 1
            }
        );

        app.update(Action::History(HistoryCommand::Undo { count: 1 }))
            .expect("undo");
        let sds = &app.state().data.signal_detections;
        assert_eq!(sds["SD3"].phase(), Some("S"));
        assert_eq!(sds["SD4"].phase(), Some("Pg"));
        assert!(app.can_undo());
        assert!(app.can_redo());
    }

    #[test]
    fn replays_scrub_dangling_selection() {
        let mut app = app();
        app.update(Action::Track(HistoryAction::CreateVirtualEvent {
            new_event_id: "E9".to_string(),
            time: fixtures::DEMO_ORIGIN,
            latitude_degrees: 0.0,
            longitude_degrees: 0.0,
            depth_km: 0.0,
        }))
        .expect("dispatch");
        app.update(Action::SetSelectedEventIds(vec!["E1".to_string(), "E9".to_string()]))
            .expect("select");
        app.update(Action::SetOpenEventId(Some("E9".to_string())))
            .expect("open");

        app.update(Action::History(HistoryCommand::Undo { count: 1 }))
            .expect("undo");
        assert!(!app.state().data.events.contains_key("E9"));
        assert_eq!(app.state().app.analyst.selected_event_ids, vec!["E1".to_string()]);
        assert_eq!(app.state().app.analyst.open_event_id, None);
    }

    #[test]
    fn stale_replays_are_dropped() {
        let mut app = app();
        app.update(phase("SD1", "S")).expect("dispatch");
        let replay = app
            .plan(HistoryCommand::Undo { count: 1 })
            .run()
            .expect("plan");
        app.update(phase("SD2", "S")).expect("dispatch");
        assert_eq!(app.commit(replay).expect("commit"), Dispatched::Stale);
        assert_eq!(app.history().undo_position(), Some(1));
    }

    #[test]
    fn captures_overtaken_by_a_replay_are_dropped() {
        let mut app = app();
        app.update(phase("SD1", "S")).expect("dispatch");

        // A second capture is taken, then an undo commits before it is recorded.
        let job = app.apply_tracked(&HistoryAction::UpdatePhase {
            signal_detection_ids: vec!["SD1".to_string()],
            phase: "Pn".to_string(),
        });
        let replay = app
            .plan(HistoryCommand::Undo { count: 1 })
            .run()
            .expect("plan");
        assert!(matches!(app.commit(replay).expect("commit"), Dispatched::Replayed(_)));
        assert_eq!(app.state().data.signal_detections["SD1"].phase(), Some("P"));

        let change = job.run().expect("capture").expect("store changed");
        assert_eq!(
            app.record(change, job.history_version()).expect("record"),
            Dispatched::Stale
        );

        // The undone transaction survives and redo restores exactly what it recorded.
        assert_eq!(app.history().stack.len(), 1);
        assert!(!app.history().stack[0].is_applied());
        app.update(Action::History(HistoryCommand::Redo { count: 1 }))
            .expect("redo");
        assert_eq!(app.state().data.signal_detections["SD1"].phase(), Some("S"));
    }

    #[test]
    fn clearing_history_invalidates_pending_captures() {
        let mut app = app();
        let job = app.apply_tracked(&HistoryAction::UpdatePhase {
            signal_detection_ids: vec!["SD1".to_string()],
            phase: "Pn".to_string(),
        });
        app.update(Action::ClearHistory).expect("clear");
        let change = job.run().expect("capture").expect("store changed");
        assert_eq!(
            app.record(change, job.history_version()).expect("record"),
            Dispatched::Stale
        );
        assert!(app.history().stack.is_empty());
    }

    #[test]
    fn failed_requests_leave_the_store_untouched() {
        let mut app = app();
        app.update(phase("SD1", "S")).expect("dispatch");
        let state = app.state().clone();
        let history = app.history().clone();
        let err = app
            .update(Action::History(HistoryCommand::UndoById {
                id: uuid::Uuid::new_v4(),
            }))
            .unwrap_err();
        assert!(matches!(err, HistoryError::ItemNotFound(_)));
        assert_eq!(app.state(), &state);
        assert_eq!(app.history(), &history);
    }

    #[test]
    fn clear_resets_history() {
        let mut app = app();
        app.update(phase("SD1", "S")).expect("dispatch");
        app.update(Action::SetHistoryMode(Some(HistoryMode::Event)))
            .expect("mode");
        app.update(Action::ClearHistory).expect("clear");
        assert!(app.history().stack.is_empty());
        assert_eq!(app.mode(), HistoryMode::Global);
        assert!(!app.can_undo());
    }
}
