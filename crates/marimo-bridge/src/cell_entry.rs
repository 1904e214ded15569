//! Per-cell record kept by the execution registry.

use std::sync::Arc;

use log::{error, warn};
use marimo_protocol::{transition, CellId, CellMessage, CellRuntimeState, NotebookUri, RunId};

use crate::error::HostError;
use crate::execution_handle::ExecutionHandle;
use crate::host::{HostContext, NotebookEditor};
use crate::output_builder::build_cell_outputs;

/// Everything the bridge tracks for one cell.
///
/// Entries are values: every operation produces a new entry that replaces the
/// old one in the registry map.
#[derive(Clone)]
pub struct CellEntry {
    pub id: CellId,
    pub state: CellRuntimeState,
    pub editor: Arc<dyn NotebookEditor>,
    pub pending_execution: Option<ExecutionHandle>,
    /// Run id of the most recently attached handle. Survives the handle.
    pub last_run_id: Option<RunId>,
}

impl CellEntry {
    pub fn new(id: CellId, editor: Arc<dyn NotebookEditor>) -> Self {
        Self {
            id,
            state: CellRuntimeState::default(),
            editor,
            pending_execution: None,
            last_run_id: None,
        }
    }

    /// Fold a kernel message into the runtime state.
    pub fn transition(&self, message: &CellMessage) -> Self {
        Self {
            state: transition(&self.state, message),
            ..self.clone()
        }
    }

    pub fn with_execution(&self, handle: ExecutionHandle) -> Self {
        Self {
            last_run_id: Some(handle.run_id().clone()),
            pending_execution: Some(handle),
            ..self.clone()
        }
    }

    /// End an open execution as failed and detach it.
    pub fn interrupt(&self) -> Self {
        self.end(false, None)
    }

    pub fn start(&self, timestamp: f64) -> Self {
        match &self.pending_execution {
            Some(handle) if handle.is_pending() => Self {
                pending_execution: Some(handle.start(timestamp)),
                ..self.clone()
            },
            _ => self.clone(),
        }
    }

    /// End an open execution and detach it. State and last run id are kept.
    pub fn end(&self, success: bool, timestamp: Option<f64>) -> Self {
        if let Some(handle) = &self.pending_execution {
            if !handle.is_completed() {
                handle.end(success, timestamp);
            }
        }
        self.detach()
    }

    /// Forget the execution without telling the host.
    pub fn detach(&self) -> Self {
        Self {
            pending_execution: None,
            ..self.clone()
        }
    }

    /// Whether both entries carry the same host execution.
    pub fn shares_execution(&self, other: &CellEntry) -> bool {
        match (&self.pending_execution, &other.pending_execution) {
            (Some(a), Some(b)) => Arc::ptr_eq(a.inner(), b.inner()),
            _ => false,
        }
    }

    pub fn has_open_execution(&self) -> bool {
        self.pending_execution
            .as_ref()
            .is_some_and(|h| !h.is_completed())
    }

    pub fn notebook_uri(&self) -> &NotebookUri {
        self.editor.notebook_uri()
    }

    /// Push this entry's outputs to the host, if there is anywhere to put them.
    ///
    /// With no tracked execution, an error output is still shown through a
    /// short-lived execution that is started, filled and ended as failed.
    /// Failing to create that execution is returned; failures to update
    /// outputs are logged and swallowed.
    pub async fn maybe_update_cell_output(
        &self,
        deps: Option<&HostContext>,
    ) -> Result<(), HostError> {
        match &self.pending_execution {
            None => {
                if !self.state.has_error_output() {
                    return Ok(());
                }
                let Some(deps) = deps else {
                    return Ok(());
                };
                let token = deps
                    .controller
                    .create_execution(deps.editor.as_ref(), &self.id)?;
                token.start(None);
                if let Err(e) = token.replace_output(build_cell_outputs(&self.state)).await {
                    error!(
                        "[registry] Failed to show error output for cell {}: {}",
                        self.id, e
                    );
                }
                token.end(false, None);
                Ok(())
            }
            Some(handle) if handle.is_running() => {
                let outputs = build_cell_outputs(&self.state);
                if let Err(e) = handle.inner().replace_output(outputs).await {
                    error!(
                        "[registry] Failed to update outputs for cell {}: {}",
                        self.id, e
                    );
                }
                Ok(())
            }
            Some(handle) => {
                if handle.is_completed() {
                    warn!(
                        "[registry] Cell {} holds a completed execution; skipping output update",
                        self.id
                    );
                }
                Ok(())
            }
        }
    }
}
