//! Tracks which cells have stale inputs.

use std::collections::{BTreeSet, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};

use marimo_protocol::{CellId, NotebookUri};

/// Set of `(notebook, cell)` pairs whose inputs changed since their last run.
#[derive(Debug, Default)]
pub struct CellStalenessStore {
    stale: Mutex<HashSet<(NotebookUri, CellId)>>,
}

impl CellStalenessStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn cells(&self) -> MutexGuard<'_, HashSet<(NotebookUri, CellId)>> {
        self.stale.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn mark_stale(&self, notebook: &NotebookUri, cell_id: &CellId) {
        self.cells().insert((notebook.clone(), cell_id.clone()));
    }

    pub fn clear_stale(&self, notebook: &NotebookUri, cell_id: &CellId) {
        self.cells().remove(&(notebook.clone(), cell_id.clone()));
    }

    pub fn is_stale(&self, notebook: &NotebookUri, cell_id: &CellId) -> bool {
        self.cells().contains(&(notebook.clone(), cell_id.clone()))
    }

    /// Stale cells of a notebook, sorted.
    pub fn stale_cells(&self, notebook: &NotebookUri) -> Vec<CellId> {
        self.cells()
            .iter()
            .filter(|(nb, _)| nb == notebook)
            .map(|(_, cell)| cell.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    pub fn clear_notebook(&self, notebook: &NotebookUri) {
        self.cells().retain(|(nb, _)| nb != notebook);
    }
}
