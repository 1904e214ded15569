//! Shared marimo kernel protocol types.
//!
//! This crate holds the wire types exchanged with a marimo kernel over its
//! LSP-like channel, plus the pure reducer that folds cell operations into a
//! cell's runtime state.
//!
//! # Contents
//!
//! - Identity newtypes (`CellId`, `RunId`, `NotebookUri`)
//! - Kernel → host operations, tagged by `op`, tolerant of unknown tags
//! - `cell-op` payloads and the `CellRuntimeState` reducer
//! - Host → kernel command envelopes and renderer commands

mod cell;
mod command;
mod ids;
mod operation;
mod runtime_state;

pub use cell::{
    CellChannel, CellMessage, Console, OutputMessage, RuntimeStatus, MARIMO_ERROR_MIMETYPE,
};
pub use command::{api, CommandParams, KernelCommand, RendererCommand};
pub use ids::{CellId, NotebookUri, RunId};
pub use operation::{
    DataSourceConnection, DataTable, DecodeError, MarimoOperation, Operation,
    VariableDeclaration, VariableValue, KNOWN_OPS,
};
pub use runtime_state::{transition, CellRuntimeState};
