//! Interfaces the notebook host implements for the bridge.
//!
//! The bridge never renders anything itself. It asks the host to create
//! execution tokens for cells, to start/end them and to replace the outputs
//! shown for a cell. Editors and controllers are looked up per operation
//! through the registries below and are never cached by the bridge.

use std::sync::Arc;

use futures::future::BoxFuture;
use marimo_protocol::{CellId, NotebookUri, Operation};

use crate::error::HostError;
use crate::output_builder::CellOutput;

/// The host's handle for one in-progress (or finished) cell execution.
///
/// Timestamps are in host units (milliseconds).
pub trait ExecutionToken: Send + Sync {
    fn start(&self, timestamp_ms: Option<u64>);

    fn end(&self, success: bool, timestamp_ms: Option<u64>);

    /// Replace every output displayed for this execution's cell.
    fn replace_output(&self, outputs: Vec<CellOutput>) -> BoxFuture<'_, Result<(), HostError>>;
}

/// An open editor showing a notebook.
pub trait NotebookEditor: Send + Sync {
    fn notebook_uri(&self) -> &NotebookUri;
}

/// The host component able to run cell executions for a notebook.
pub trait NotebookController: Send + Sync {
    /// Create an execution token for a cell of the editor's notebook.
    ///
    /// Fails with [`HostError::CellNotFound`] when the cell no longer exists.
    fn create_execution(
        &self,
        editor: &dyn NotebookEditor,
        cell_id: &CellId,
    ) -> Result<Arc<dyn ExecutionToken>, HostError>;
}

/// Lookup of the editor most recently active for a notebook.
pub trait EditorRegistry: Send + Sync {
    fn last_editor(&self, notebook_uri: &NotebookUri) -> Option<Arc<dyn NotebookEditor>>;
}

/// Lookup of the controller currently selected for a notebook.
pub trait ControllerRegistry: Send + Sync {
    fn active_controller(&self, editor: &dyn NotebookEditor) -> Option<Arc<dyn NotebookController>>;
}

/// The UI renderer that displays interactive marimo elements.
pub trait RendererHost: Send + Sync {
    fn post_message(
        &self,
        notebook_uri: &NotebookUri,
        operation: Operation,
    ) -> BoxFuture<'_, Result<(), HostError>>;
}

/// Reacts to the kernel reporting packages it could not import.
pub trait PackageAlertHandler: Send + Sync {
    fn on_missing_packages(
        &self,
        notebook_uri: &NotebookUri,
        packages: Vec<String>,
        isolated: bool,
    ) -> BoxFuture<'_, Result<(), HostError>>;
}

/// User-visible notifications.
pub trait UserNotifier: Send + Sync {
    fn show_error(&self, message: String) -> BoxFuture<'_, ()>;
}

/// Editor and controller resolved for the notebook an operation belongs to.
#[derive(Clone)]
pub struct HostContext {
    pub editor: Arc<dyn NotebookEditor>,
    pub controller: Arc<dyn NotebookController>,
}
