//! In-memory host that records every call the bridge makes.
//!
//! Used by the `replay` command to print a call trace, and by tests to
//! assert on the exact sequence of host side effects.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures::future::BoxFuture;
use futures::FutureExt;
use marimo_protocol::{CellId, NotebookUri, Operation};
use serde::Serialize;

use crate::error::HostError;
use crate::host::{
    ControllerRegistry, EditorRegistry, ExecutionToken, HostContext, NotebookController,
    NotebookEditor, PackageAlertHandler, RendererHost, UserNotifier,
};
use crate::output_builder::CellOutput;

/// One recorded host call.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum HostEvent {
    Create {
        token: u64,
        notebook: NotebookUri,
        cell_id: CellId,
    },
    Start {
        token: u64,
        timestamp_ms: Option<u64>,
    },
    End {
        token: u64,
        success: bool,
        timestamp_ms: Option<u64>,
    },
    ReplaceOutput {
        token: u64,
        outputs: Vec<CellOutput>,
    },
    Renderer {
        notebook: NotebookUri,
        op: String,
    },
    MissingPackages {
        notebook: NotebookUri,
        packages: Vec<String>,
        isolated: bool,
    },
    Prompt {
        message: String,
    },
}

impl HostEvent {
    pub fn token(&self) -> Option<u64> {
        match self {
            HostEvent::Create { token, .. }
            | HostEvent::Start { token, .. }
            | HostEvent::End { token, .. }
            | HostEvent::ReplaceOutput { token, .. } => Some(*token),
            _ => None,
        }
    }
}

#[derive(Default)]
struct Shared {
    events: Mutex<Vec<HostEvent>>,
    next_token: AtomicU64,
    missing_cells: Mutex<HashSet<CellId>>,
    closed_notebooks: Mutex<HashSet<NotebookUri>>,
    detached_controllers: Mutex<HashSet<NotebookUri>>,
    failing_outputs: Mutex<bool>,
    failing_alerts: Mutex<bool>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Shared {
    fn record(&self, event: HostEvent) {
        lock(&self.events).push(event);
    }

    fn next_token(&self) -> u64 {
        self.next_token.fetch_add(1, Ordering::SeqCst) + 1
    }
}

/// Recording host. Every notebook has an editor and a controller unless it
/// has been closed with [`RecordingHost::close_notebook`].
#[derive(Clone, Default)]
pub struct RecordingHost {
    shared: Arc<Shared>,
    editors: Arc<Mutex<HashMap<NotebookUri, Arc<RecordingEditor>>>>,
}

impl RecordingHost {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of all recorded events, in call order.
    pub fn events(&self) -> Vec<HostEvent> {
        lock(&self.shared.events).clone()
    }

    /// Events that concern one token.
    pub fn token_events(&self, token: u64) -> Vec<HostEvent> {
        self.events()
            .into_iter()
            .filter(|e| e.token() == Some(token))
            .collect()
    }

    pub fn count(&self, predicate: impl Fn(&HostEvent) -> bool) -> usize {
        lock(&self.shared.events)
            .iter()
            .filter(|e| predicate(*e))
            .count()
    }

    /// Token ids created for a cell, oldest first.
    pub fn tokens_for(&self, cell_id: &str) -> Vec<u64> {
        lock(&self.shared.events)
            .iter()
            .filter_map(|e| match e {
                HostEvent::Create { token, cell_id: c, .. } if c.as_str() == cell_id => {
                    Some(*token)
                }
                _ => None,
            })
            .collect()
    }

    pub fn clear_events(&self) {
        lock(&self.shared.events).clear();
    }

    /// Make `create_execution` fail with "cell not found" for a cell.
    pub fn remove_cell(&self, cell_id: impl Into<CellId>) {
        lock(&self.shared.missing_cells).insert(cell_id.into());
    }

    /// Make editor lookups fail for a notebook.
    pub fn close_notebook(&self, notebook: impl Into<NotebookUri>) {
        lock(&self.shared.closed_notebooks).insert(notebook.into());
    }

    /// Keep the notebook's editor but leave it without an active controller.
    pub fn detach_controller(&self, notebook: impl Into<NotebookUri>) {
        lock(&self.shared.detached_controllers).insert(notebook.into());
    }

    pub fn fail_output_updates(&self, fail: bool) {
        *lock(&self.shared.failing_outputs) = fail;
    }

    pub fn fail_package_alerts(&self, fail: bool) {
        *lock(&self.shared.failing_alerts) = fail;
    }

    /// A token not bound to any cell.
    pub fn new_token(&self) -> (Arc<dyn ExecutionToken>, u64) {
        let id = self.shared.next_token();
        let token = RecordingToken {
            id,
            shared: self.shared.clone(),
        };
        (Arc::new(token), id)
    }

    pub fn editor(&self, notebook: impl Into<NotebookUri>) -> Arc<RecordingEditor> {
        let notebook = notebook.into();
        lock(&self.editors)
            .entry(notebook.clone())
            .or_insert_with(|| Arc::new(RecordingEditor { notebook_uri: notebook }))
            .clone()
    }

    pub fn controller(&self) -> Arc<RecordingController> {
        Arc::new(RecordingController {
            shared: self.shared.clone(),
        })
    }

    /// Editor and controller for a notebook, as the dispatch loop resolves them.
    pub fn context(&self, notebook: impl Into<NotebookUri>) -> HostContext {
        HostContext {
            editor: self.editor(notebook),
            controller: self.controller(),
        }
    }
}

impl EditorRegistry for RecordingHost {
    fn last_editor(&self, notebook_uri: &NotebookUri) -> Option<Arc<dyn NotebookEditor>> {
        if lock(&self.shared.closed_notebooks).contains(notebook_uri) {
            return None;
        }
        let editor: Arc<dyn NotebookEditor> = self.editor(notebook_uri.clone());
        Some(editor)
    }
}

impl ControllerRegistry for RecordingHost {
    fn active_controller(
        &self,
        editor: &dyn NotebookEditor,
    ) -> Option<Arc<dyn NotebookController>> {
        let notebook = editor.notebook_uri();
        if lock(&self.shared.closed_notebooks).contains(notebook)
            || lock(&self.shared.detached_controllers).contains(notebook)
        {
            return None;
        }
        let controller: Arc<dyn NotebookController> = self.controller();
        Some(controller)
    }
}

impl RendererHost for RecordingHost {
    fn post_message(
        &self,
        notebook_uri: &NotebookUri,
        operation: Operation,
    ) -> BoxFuture<'_, Result<(), HostError>> {
        self.shared.record(HostEvent::Renderer {
            notebook: notebook_uri.clone(),
            op: operation.name().to_string(),
        });
        futures::future::ready(Ok(())).boxed()
    }
}

impl PackageAlertHandler for RecordingHost {
    fn on_missing_packages(
        &self,
        notebook_uri: &NotebookUri,
        packages: Vec<String>,
        isolated: bool,
    ) -> BoxFuture<'_, Result<(), HostError>> {
        self.shared.record(HostEvent::MissingPackages {
            notebook: notebook_uri.clone(),
            packages,
            isolated,
        });
        let result = if *lock(&self.shared.failing_alerts) {
            Err(HostError::Execution("package installer unavailable".into()))
        } else {
            Ok(())
        };
        futures::future::ready(result).boxed()
    }
}

impl UserNotifier for RecordingHost {
    fn show_error(&self, message: String) -> BoxFuture<'_, ()> {
        self.shared.record(HostEvent::Prompt { message });
        futures::future::ready(()).boxed()
    }
}

pub struct RecordingEditor {
    notebook_uri: NotebookUri,
}

impl NotebookEditor for RecordingEditor {
    fn notebook_uri(&self) -> &NotebookUri {
        &self.notebook_uri
    }
}

pub struct RecordingController {
    shared: Arc<Shared>,
}

impl NotebookController for RecordingController {
    fn create_execution(
        &self,
        editor: &dyn NotebookEditor,
        cell_id: &CellId,
    ) -> Result<Arc<dyn ExecutionToken>, HostError> {
        if lock(&self.shared.missing_cells).contains(cell_id) {
            return Err(HostError::CellNotFound(cell_id.clone()));
        }
        let id = self.shared.next_token();
        self.shared.record(HostEvent::Create {
            token: id,
            notebook: editor.notebook_uri().clone(),
            cell_id: cell_id.clone(),
        });
        Ok(Arc::new(RecordingToken {
            id,
            shared: self.shared.clone(),
        }))
    }
}

struct RecordingToken {
    id: u64,
    shared: Arc<Shared>,
}

impl ExecutionToken for RecordingToken {
    fn start(&self, timestamp_ms: Option<u64>) {
        self.shared.record(HostEvent::Start {
            token: self.id,
            timestamp_ms,
        });
    }

    fn end(&self, success: bool, timestamp_ms: Option<u64>) {
        self.shared.record(HostEvent::End {
            token: self.id,
            success,
            timestamp_ms,
        });
    }

    fn replace_output(&self, outputs: Vec<CellOutput>) -> BoxFuture<'_, Result<(), HostError>> {
        self.shared.record(HostEvent::ReplaceOutput {
            token: self.id,
            outputs,
        });
        let result = if *lock(&self.shared.failing_outputs) {
            Err(HostError::Execution("output update rejected".into()))
        } else {
            Ok(())
        };
        futures::future::ready(result).boxed()
    }
}
