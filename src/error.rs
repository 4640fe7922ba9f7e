//! Error taxonomy for the history engine.
//!
//! Invariant violations are fatal to the single request that raised them: the engine computes
//! every transition on cloned state, so returning one of these errors never leaves a partially
//! mutated store or history behind.

use thiserror::Error;
use uuid::Uuid;

use crate::event::EventId;
use crate::item::HistoryStatus;
use crate::patch::PatchError;

#[derive(Debug, Error)]
pub enum HistoryError {
    /// An `*ById` request named an item that is in no stack.
    #[error("history item {0} was not found")]
    ItemNotFound(Uuid),

    /// The target of an `*ById` request is already on the requested side of the cursor.
    #[error("history item {id} is already {status}")]
    WrongSide { id: Uuid, status: HistoryStatus },

    /// An event-scoped `*ById` request named an item unrelated to the event.
    #[error("history item {id} is not associated with event {event_id}")]
    NotAssociated { id: Uuid, event_id: EventId },

    /// Undo/redo walked the stack without moving the boundary.
    #[error("{operation} made no progress from position {position:?}")]
    NoProgress {
        operation: &'static str,
        position: Option<usize>,
    },

    #[error("undo/redo count must be at least one")]
    InvalidCount,

    /// A freshly captured item was appended with a status other than `applied`.
    #[error("history item {0} must be applied when appended")]
    NotApplied(Uuid),

    /// Per-entity items reference a transaction that has no global item.
    #[error("transaction {0} has no global history item")]
    MissingTransaction(Uuid),

    /// Applied items no longer form a contiguous prefix.
    #[error("applied items do not form a prefix of the {stack} stack")]
    BoundaryViolation { stack: String },

    /// Debug validation: the captured patches do not reproduce the post-action store.
    #[error("captured patches do not reproduce the `{branch}` branch")]
    CaptureMismatch { branch: String },

    #[error(transparent)]
    Patch(#[from] PatchError),

    #[error("store (de)serialization failed: {0}")]
    Serde(#[from] serde_json::Error),
}
