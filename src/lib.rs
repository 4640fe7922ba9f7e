//! Undo/redo history for an interactive seismic analysis workstation.
//!
//! Every tracked mutation of the store is captured as a transaction of forward and inverse
//! patches. Transactions live on a global timeline and, per touched entity, on per-event and
//! per-signal-detection timelines. Undo and redo replay those patches either across the whole
//! store (global scope) or restricted to the entries associated with one event (event scope).
//!
//! The [`app::App`] owns the store and history and applies each step as a pure transition
//! followed by an atomic swap; [`runtime::Workstation`] runs it as an actor and cancels
//! superseded background work.

pub mod action;
pub mod app;
pub mod associations;
pub mod capture;
pub mod cleanup;
pub mod config;
pub mod conflict;
pub mod error;
pub mod event;
pub mod event_undo;
pub mod fixtures;
pub mod history;
pub mod item;
pub mod label;
pub mod patch;
pub mod reducer;
pub mod runtime;
pub mod script;
pub mod signal_detection;
pub mod state;
pub mod undo;
