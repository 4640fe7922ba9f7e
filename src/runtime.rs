//! Async workstation actor.
//!
//! All store mutation happens inside the actor's loop, one request at a time. Capture and
//! undo/redo planning run as background tasks; a newer request of the same kind cancels the
//! in-flight one through its [`CancellationToken`], and a per-kind generation counter makes sure a
//! result that races its cancellation is ignored. Undo/redo results are additionally checked
//! against the store version at commit, so a replay planned before an unrelated mutation never
//! lands. Undo/redo requests that arrive while a capture is in flight are held until it has been
//! recorded, so every replay is planned against a history that includes the latest mutation.

use thiserror::Error;
use tokio::select;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use crate::action::{Action, ActionKind, HistoryCommand};
use crate::app::{App, Dispatched, Replay};
use crate::error::HistoryError;
use crate::history::HistoryState;
use crate::item::HistoryChange;
use crate::state::WorkstationState;

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("workstation actor has shut down")]
    Closed,
}

/// Result of a background task that may be superseded.
#[derive(Debug, PartialEq)]
pub enum TaskOutcome<T> {
    Completed(T),
    Cancelled,
    Panicked,
}

/// Runs `work` on the blocking pool unless `token` is cancelled first.
pub async fn run_cancellable<T, F>(token: CancellationToken, work: F) -> TaskOutcome<T>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    let handle = tokio::task::spawn_blocking(work);
    select! {
        biased;
        _ = token.cancelled() => TaskOutcome::Cancelled,
        joined = handle => match joined {
            Ok(value) => TaskOutcome::Completed(value),
            Err(_) => TaskOutcome::Panicked,
        },
    }
}

/// Supersession bookkeeping for one kind of background task.
#[derive(Debug, Default)]
pub struct TaskSlot {
    generation: u64,
    token: Option<CancellationToken>,
}

impl TaskSlot {
    /// Cancels the in-flight task, if any, and hands out the token for the next one.
    pub fn begin(&mut self) -> (u64, CancellationToken) {
        if let Some(previous) = self.token.take() {
            previous.cancel();
        }
        self.generation += 1;
        let token = CancellationToken::new();
        self.token = Some(token.clone());
        (self.generation, token)
    }

    pub fn is_current(&self, generation: u64) -> bool {
        self.generation == generation
    }

    /// True while the most recently started task has not reported back.
    pub fn is_busy(&self) -> bool {
        self.token.is_some()
    }

    pub fn finish(&mut self, generation: u64) {
        if self.is_current(generation) {
            self.token = None;
        }
    }
}

/// Read-only view of the actor's store.
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub state: WorkstationState,
    pub history: HistoryState,
    pub version: u64,
    pub can_undo: bool,
    pub can_redo: bool,
    /// Outcome of the most recently completed request.
    pub last_outcome: Option<Result<Dispatched, String>>,
}

enum Request {
    Dispatch(Action),
    Settle(oneshot::Sender<()>),
    Snapshot(oneshot::Sender<Snapshot>),
}

enum Completion {
    Capture {
        generation: u64,
        kind: ActionKind,
        history_version: u64,
        outcome: TaskOutcome<Result<Option<HistoryChange>, HistoryError>>,
    },
    Replay {
        generation: u64,
        outcome: TaskOutcome<Result<Replay, HistoryError>>,
    },
}

/// Cloneable handle to a running [`Workstation`].
#[derive(Clone)]
pub struct WorkstationHandle {
    requests: mpsc::Sender<Request>,
}

impl WorkstationHandle {
    pub async fn dispatch(&self, action: Action) -> Result<(), RuntimeError> {
        self.requests
            .send(Request::Dispatch(action))
            .await
            .map_err(|_| RuntimeError::Closed)
    }

    /// Resolves once no background task is in flight.
    pub async fn settle(&self) -> Result<(), RuntimeError> {
        let (tx, rx) = oneshot::channel();
        self.requests
            .send(Request::Settle(tx))
            .await
            .map_err(|_| RuntimeError::Closed)?;
        rx.await.map_err(|_| RuntimeError::Closed)
    }

    pub async fn snapshot(&self) -> Result<Snapshot, RuntimeError> {
        let (tx, rx) = oneshot::channel();
        self.requests
            .send(Request::Snapshot(tx))
            .await
            .map_err(|_| RuntimeError::Closed)?;
        rx.await.map_err(|_| RuntimeError::Closed)
    }
}

pub struct Workstation {
    app: App,
    requests: mpsc::Receiver<Request>,
    completions: mpsc::UnboundedReceiver<Completion>,
    completion_tx: mpsc::UnboundedSender<Completion>,
    capture: TaskSlot,
    replay: TaskSlot,
    /// Undo/redo held back until the in-flight capture is recorded.
    pending_replay: Option<HistoryCommand>,
    in_flight: usize,
    settle_waiters: Vec<oneshot::Sender<()>>,
    last_outcome: Option<Result<Dispatched, String>>,
}

impl Workstation {
    pub fn new(app: App) -> (Self, WorkstationHandle) {
        let (request_tx, requests) = mpsc::channel(64);
        let (completion_tx, completions) = mpsc::unbounded_channel();
        (
            Self {
                app,
                requests,
                completions,
                completion_tx,
                capture: TaskSlot::default(),
                replay: TaskSlot::default(),
                pending_replay: None,
                in_flight: 0,
                settle_waiters: Vec::new(),
                last_outcome: None,
            },
            WorkstationHandle {
                requests: request_tx,
            },
        )
    }

    /// Runs until every handle is dropped.
    pub async fn run(mut self) {
        debug!("workstation actor starting");
        loop {
            select! {
                maybe_request = self.requests.recv() => {
                    match maybe_request {
                        Some(request) => self.handle_request(request),
                        None => break,
                    }
                }
                Some(completion) = self.completions.recv() => {
                    self.handle_completion(completion);
                }
            }
        }
        debug!("workstation actor stopped");
    }

    fn handle_request(&mut self, request: Request) {
        match request {
            Request::Dispatch(action) => self.dispatch(action),
            Request::Settle(reply) => {
                if self.in_flight == 0 {
                    let _ = reply.send(());
                } else {
                    self.settle_waiters.push(reply);
                }
            }
            Request::Snapshot(reply) => {
                let _ = reply.send(Snapshot {
                    state: self.app.state().clone(),
                    history: self.app.history().clone(),
                    version: self.app.version(),
                    can_undo: self.app.can_undo(),
                    can_redo: self.app.can_redo(),
                    last_outcome: self.last_outcome.clone(),
                });
            }
        }
    }

    fn dispatch(&mut self, action: Action) {
        match action {
            Action::Track(tracked) => {
                if let Some(command) = self.pending_replay.take() {
                    debug!("dropping held {command:?}: superseded by {}", tracked.kind());
                    self.last_outcome = Some(Ok(Dispatched::Stale));
                }
                let job = self.app.apply_tracked(&tracked);
                let kind = tracked.kind();
                let history_version = job.history_version();
                let (generation, token) = self.capture.begin();
                let tx = self.completion_tx.clone();
                self.in_flight += 1;
                tokio::spawn(async move {
                    let outcome = run_cancellable(token, move || job.run()).await;
                    let _ = tx.send(Completion::Capture {
                        generation,
                        kind,
                        history_version,
                        outcome,
                    });
                });
            }
            Action::History(command) => {
                debug!(
                    "received {} request {:?}",
                    if command.is_undo() { "undo" } else { "redo" },
                    command
                );
                if self.capture.is_busy() {
                    if let Some(previous) = self.pending_replay.replace(command) {
                        debug!("cancelled held undo/redo request {previous:?}");
                    }
                } else {
                    self.start_replay(command);
                }
            }
            other => {
                let outcome = self.app.update(other).map_err(|err| err.to_string());
                self.last_outcome = Some(outcome);
            }
        }
    }

    /// Plans `command` against the current store and runs it in the background, superseding any
    /// in-flight replay.
    fn start_replay(&mut self, command: HistoryCommand) {
        let job = self.app.plan(command);
        let (generation, token) = self.replay.begin();
        let tx = self.completion_tx.clone();
        self.in_flight += 1;
        tokio::spawn(async move {
            let outcome = run_cancellable(token, move || job.run()).await;
            let _ = tx.send(Completion::Replay {
                generation,
                outcome,
            });
        });
    }

    fn handle_completion(&mut self, completion: Completion) {
        match completion {
            Completion::Capture {
                generation,
                kind,
                history_version,
                outcome,
            } => {
                let current = self.capture.is_current(generation);
                self.capture.finish(generation);
                match outcome {
                    TaskOutcome::Completed(result) if current => {
                        self.last_outcome = Some(self.record(kind, history_version, result));
                    }
                    TaskOutcome::Panicked => error!("capture task for {kind} panicked"),
                    _ => debug!("cancelled undo/redo history for {kind}"),
                }
            }
            Completion::Replay {
                generation,
                outcome,
            } => {
                let current = self.replay.is_current(generation);
                self.replay.finish(generation);
                match outcome {
                    TaskOutcome::Completed(result) if current => {
                        let outcome = result.and_then(|replay| self.app.commit(replay));
                        if let Err(err) = &outcome {
                            self.app.log_failure(err);
                        }
                        self.last_outcome = Some(outcome.map_err(|err| err.to_string()));
                    }
                    TaskOutcome::Panicked => error!("undo/redo task panicked"),
                    _ => debug!("cancelled undo/redo request"),
                }
            }
        }

        if !self.capture.is_busy() {
            if let Some(command) = self.pending_replay.take() {
                self.start_replay(command);
            }
        }

        self.in_flight = self.in_flight.saturating_sub(1);
        if self.in_flight == 0 {
            for waiter in self.settle_waiters.drain(..) {
                let _ = waiter.send(());
            }
        }
    }

    fn record(
        &mut self,
        kind: ActionKind,
        history_version: u64,
        result: Result<Option<HistoryChange>, HistoryError>,
    ) -> Result<Dispatched, String> {
        match result {
            Ok(Some(change)) => match self.app.record(change, history_version) {
                Ok(outcome) => Ok(outcome),
                Err(err) => {
                    self.app.log_failure(&err);
                    Err(err.to_string())
                }
            },
            Ok(None) => Ok(Dispatched::Unchanged),
            Err(err) => {
                error!("rejected undo/redo history for {kind}: {err}");
                Ok(Dispatched::Unrecorded)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::HistoryAction;
    use crate::config::HistoryConfig;
    use crate::fixtures;
    use crate::state::EntityKind;
    use pretty_assertions::assert_eq;

    fn spawn_workstation() -> WorkstationHandle {
        let app = App::with_state(HistoryConfig::default(), fixtures::demo_state());
        let (workstation, handle) = Workstation::new(app);
        tokio::spawn(workstation.run());
        handle
    }

    fn workstation() -> Workstation {
        let app = App::with_state(HistoryConfig::default(), fixtures::demo_state());
        Workstation::new(app).0
    }

    fn phase(sd: &str, phase: &str) -> Action {
        Action::Track(HistoryAction::UpdatePhase {
            signal_detection_ids: vec![sd.to_string()],
            phase: phase.to_string(),
        })
    }

    /// Feeds completions back into the actor until no background task is left.
    async fn drain(workstation: &mut Workstation) {
        while workstation.in_flight > 0 {
            let completion = workstation
                .completions
                .recv()
                .await
                .expect("completion channel open");
            workstation.handle_completion(completion);
        }
    }

    #[test]
    fn begin_cancels_the_previous_token() {
        let mut slot = TaskSlot::default();
        let (first, first_token) = slot.begin();
        let (second, second_token) = slot.begin();
        assert!(first_token.is_cancelled());
        assert!(!second_token.is_cancelled());
        assert!(!slot.is_current(first));
        assert!(slot.is_current(second));
    }

    #[tokio::test]
    async fn cancelled_work_produces_nothing() {
        let token = CancellationToken::new();
        token.cancel();
        let outcome = run_cancellable(token, || 42).await;
        assert_eq!(outcome, TaskOutcome::Cancelled);

        let outcome = run_cancellable(CancellationToken::new(), || 42).await;
        assert_eq!(outcome, TaskOutcome::Completed(42));
    }

    #[tokio::test]
    async fn tracked_actions_are_recorded_and_undone() {
        let handle = spawn_workstation();
        handle
            .dispatch(Action::Track(HistoryAction::UpdatePhase {
                signal_detection_ids: vec!["SD1".to_string()],
                phase: "Pn".to_string(),
            }))
            .await
            .expect("dispatch");
        handle.settle().await.expect("settle");

        let snapshot = handle.snapshot().await.expect("snapshot");
        assert_eq!(snapshot.history.stack.len(), 1);
        assert!(snapshot.can_undo);
        assert!(matches!(snapshot.last_outcome, Some(Ok(Dispatched::Recorded(_)))));

        handle
            .dispatch(Action::History(HistoryCommand::Undo { count: 1 }))
            .await
            .expect("dispatch");
        handle.settle().await.expect("settle");

        let snapshot = handle.snapshot().await.expect("snapshot");
        assert_eq!(snapshot.state, fixtures::demo_state());
        assert!(!snapshot.can_undo);
        assert!(snapshot.can_redo);
    }

    #[tokio::test]
    async fn invariant_errors_are_reported_without_mutation() {
        let handle = spawn_workstation();
        handle
            .dispatch(Action::History(HistoryCommand::Redo { count: 1 }))
            .await
            .expect("dispatch");
        handle.settle().await.expect("settle");

        let snapshot = handle.snapshot().await.expect("snapshot");
        // empty history: redo is a no-op replay
        assert!(matches!(snapshot.last_outcome, Some(Ok(Dispatched::Replayed(_)))));
        assert_eq!(snapshot.state, fixtures::demo_state());

        handle
            .dispatch(Action::History(HistoryCommand::Undo { count: 0 }))
            .await
            .expect("dispatch");
        handle.settle().await.expect("settle");
        let snapshot = handle.snapshot().await.expect("snapshot");
        assert!(matches!(snapshot.last_outcome, Some(Err(_))));
        assert_eq!(snapshot.state, fixtures::demo_state());
        assert!(snapshot.history.stack.is_empty());
    }

    #[tokio::test]
    async fn superseded_capture_records_nothing() {
        let mut workstation = workstation();
        workstation.dispatch(phase("SD1", "S"));
        workstation.dispatch(phase("SD2", "Pn"));
        assert_eq!(workstation.in_flight, 2);
        drain(&mut workstation).await;

        let history = workstation.app.history();
        assert_eq!(history.stack.len(), 1);
        assert!(history.entity_stack(EntityKind::SignalDetection, "SD1").is_empty());
        assert_eq!(history.entity_stack(EntityKind::SignalDetection, "SD2").len(), 1);
        assert!(matches!(workstation.last_outcome, Some(Ok(Dispatched::Recorded(_)))));
        assert!(!workstation.capture.is_busy());
    }

    #[tokio::test]
    async fn only_the_newest_undo_commits() {
        let mut workstation = workstation();
        workstation.app.update(phase("SD1", "S")).expect("dispatch");
        workstation.app.update(phase("SD1", "Pn")).expect("dispatch");

        workstation.dispatch(Action::History(HistoryCommand::Undo { count: 1 }));
        workstation.dispatch(Action::History(HistoryCommand::Undo { count: 1 }));
        drain(&mut workstation).await;

        let history = workstation.app.history();
        assert_eq!(history.undo_position(), Some(0));
        assert!(history.stack[0].is_applied());
        assert!(!history.stack[1].is_applied());
        assert_eq!(
            workstation.app.state().data.signal_detections["SD1"].phase(),
            Some("S")
        );
        assert!(matches!(workstation.last_outcome, Some(Ok(Dispatched::Replayed(_)))));
    }

    #[tokio::test]
    async fn undo_waits_for_the_in_flight_capture() {
        let mut workstation = workstation();
        workstation.app.update(phase("SD1", "S")).expect("dispatch");

        workstation.dispatch(phase("SD1", "Pn"));
        workstation.dispatch(Action::History(HistoryCommand::Undo { count: 1 }));
        assert!(workstation.pending_replay.is_some());
        assert_eq!(workstation.in_flight, 1);
        drain(&mut workstation).await;

        // The capture was recorded first, so the undo reverts it rather than the earlier change.
        let history = workstation.app.history();
        assert_eq!(history.stack.len(), 2);
        assert!(history.stack[0].is_applied());
        assert!(!history.stack[1].is_applied());
        history.verify_boundaries().expect("boundaries hold");
        assert_eq!(
            workstation.app.state().data.signal_detections["SD1"].phase(),
            Some("S")
        );
    }

    #[tokio::test]
    async fn new_mutation_drops_a_held_undo() {
        let mut workstation = workstation();
        workstation.dispatch(phase("SD1", "S"));
        workstation.dispatch(Action::History(HistoryCommand::Undo { count: 1 }));
        workstation.dispatch(phase("SD2", "Pn"));
        assert!(workstation.pending_replay.is_none());
        drain(&mut workstation).await;

        let history = workstation.app.history();
        assert_eq!(history.stack.len(), 1);
        assert!(history.stack.iter().all(|item| item.is_applied()));
    }

    #[tokio::test]
    async fn back_to_back_track_and_undo_through_the_handle() {
        let handle = spawn_workstation();
        handle.dispatch(phase("SD1", "S")).await.expect("dispatch");
        handle.settle().await.expect("settle");
        handle.dispatch(phase("SD1", "Pn")).await.expect("dispatch");
        handle
            .dispatch(Action::History(HistoryCommand::Undo { count: 1 }))
            .await
            .expect("dispatch");
        handle.settle().await.expect("settle");

        let snapshot = handle.snapshot().await.expect("snapshot");
        assert_eq!(snapshot.history.stack.len(), 2);
        assert!(!snapshot.history.stack[1].is_applied());
        assert_eq!(snapshot.state.data.signal_detections["SD1"].phase(), Some("S"));
        assert!(snapshot.can_redo);

        handle
            .dispatch(Action::History(HistoryCommand::Redo { count: 1 }))
            .await
            .expect("dispatch");
        handle.settle().await.expect("settle");
        let snapshot = handle.snapshot().await.expect("snapshot");
        assert_eq!(snapshot.state.data.signal_detections["SD1"].phase(), Some("Pn"));
    }
}
