//! Reconciles kernel cell operations with host cell executions.
//!
//! The registry owns one [`CellEntry`] per `(notebook, cell)` it has heard
//! about. Cell ids are only unique within a notebook. Each kernel `cell-op`
//! is folded into the cell's entry and, depending on the reported status,
//! drives the entry's execution handle:
//!
//! - `queued`: a fresh host execution is created (ending any still-open one)
//! - `running`: the execution is started and outputs are pushed
//! - `idle`: outputs are pushed, then the execution is ended after
//!   [`FINALIZE_DELAY`] unless a newer run has been queued meanwhile
//! - anything else: outputs are pushed
//!
//! ## Concurrency
//!
//! The entry map is shared with the finalize timers. Every update is a
//! whole-entry read-modify-write under one lock acquisition. The lock is never
//! held across an await or while calling into the host, so host callbacks may
//! read the registry. Entries are detached under the lock and their host
//! executions started or ended after it is released.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use log::{debug, info, warn};
use marimo_protocol::{CellId, CellMessage, NotebookUri, RunId, RuntimeStatus};

use crate::cell_entry::CellEntry;
use crate::error::{BridgeError, HostError, Result};
use crate::execution_handle::ExecutionHandle;
use crate::host::{HostContext, NotebookEditor};
use crate::staleness::CellStalenessStore;

/// How long to wait after `idle` before ending the host execution.
///
/// The kernel flushes its stdio roughly every 10ms, so console output can
/// still arrive after `idle`. Five flush intervals absorb that tail.
pub const FINALIZE_DELAY: Duration = Duration::from_millis(50);

type EntryKey = (NotebookUri, CellId);
type EntryMap = HashMap<EntryKey, CellEntry>;

fn lock_entries(entries: &Mutex<EntryMap>) -> MutexGuard<'_, EntryMap> {
    entries.lock().unwrap_or_else(PoisonError::into_inner)
}

fn entry_key(ctx: &HostContext, cell_id: &CellId) -> EntryKey {
    (ctx.editor.notebook_uri().clone(), cell_id.clone())
}

/// Fold `message` into its cell's entry (creating it if needed) and store it.
fn fold(entries: &mut EntryMap, key: &EntryKey, message: &CellMessage, ctx: &HostContext) -> CellEntry {
    let next = match entries.get(key) {
        Some(entry) => entry.transition(message),
        None => CellEntry::new(message.cell_id.clone(), ctx.editor.clone()).transition(message),
    };
    entries.insert(key.clone(), next.clone());
    next
}

fn finalize(
    entries: &Mutex<EntryMap>,
    key: &EntryKey,
    expected_run: &Option<RunId>,
    timestamp: Option<f64>,
) {
    let finished = {
        let mut entries = lock_entries(entries);
        let Some(entry) = entries.get(key) else {
            debug!("[registry] Finalize for unknown cell {}; ignoring", key.1);
            return;
        };
        if entry.last_run_id != *expected_run {
            debug!(
                "[registry] Finalize for cell {} superseded by run {:?}",
                key.1, entry.last_run_id
            );
            return;
        }
        let finished = entry.clone();
        entries.insert(key.clone(), finished.detach());
        finished
    };
    finished.end(true, timestamp);
}

fn status_label(status: Option<RuntimeStatus>) -> String {
    status.map_or_else(|| "none".to_string(), |s| s.to_string())
}

/// Execution state for every cell the kernel has reported on.
pub struct ExecutionRegistry {
    entries: Arc<Mutex<EntryMap>>,
    staleness: Arc<CellStalenessStore>,
    finalize_delay: Duration,
}

impl ExecutionRegistry {
    pub fn new(staleness: Arc<CellStalenessStore>) -> Self {
        Self {
            entries: Arc::new(Mutex::new(HashMap::new())),
            staleness,
            finalize_delay: FINALIZE_DELAY,
        }
    }

    pub fn with_finalize_delay(mut self, delay: Duration) -> Self {
        self.finalize_delay = delay;
        self
    }

    pub fn finalize_delay(&self) -> Duration {
        self.finalize_delay
    }

    /// Snapshot of a cell's entry.
    pub fn entry(&self, notebook: &NotebookUri, cell_id: &CellId) -> Option<CellEntry> {
        lock_entries(&self.entries)
            .get(&(notebook.clone(), cell_id.clone()))
            .cloned()
    }

    pub fn len(&self) -> usize {
        lock_entries(&self.entries).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of cells with a host execution that has not ended yet.
    pub fn open_executions(&self) -> usize {
        lock_entries(&self.entries)
            .values()
            .filter(|e| e.has_open_execution())
            .count()
    }

    /// Handle an `interrupted` operation: fail every open execution of the
    /// editor's notebook.
    pub fn handle_interrupted(&self, editor: &dyn NotebookEditor) {
        let notebook = editor.notebook_uri();
        let interrupted: Vec<CellEntry> = {
            let mut entries = lock_entries(&self.entries);
            entries
                .iter_mut()
                .filter(|((nb, _), entry)| nb == notebook && entry.pending_execution.is_some())
                .map(|(_, entry)| {
                    let previous = entry.clone();
                    *entry = entry.detach();
                    previous
                })
                .collect()
        };
        for entry in &interrupted {
            entry.interrupt();
        }
        debug!(
            "[registry] Interrupted {} execution(s) in {}",
            interrupted.len(),
            notebook
        );
    }

    /// Handle a `cell-op` operation.
    ///
    /// A cell that no longer exists in the host document is logged and
    /// skipped. A `queued` message without a run id is an error.
    pub async fn handle_cell_operation(
        &self,
        message: &CellMessage,
        ctx: &HostContext,
    ) -> Result<()> {
        let result = match message.status {
            Some(RuntimeStatus::Queued) => self.on_queued(message, ctx),
            Some(RuntimeStatus::Running) => self.on_running(message, ctx).await,
            Some(RuntimeStatus::Idle) => self.on_idle(message, ctx).await,
            _ => self.on_update(message, ctx).await,
        };

        match result {
            Err(BridgeError::Host(HostError::CellNotFound(cell_id))) => {
                warn!(
                    "[registry] Cell {} not found in notebook (status: {}); skipping",
                    cell_id,
                    status_label(message.status)
                );
                Ok(())
            }
            other => other,
        }
    }

    fn on_queued(&self, message: &CellMessage, ctx: &HostContext) -> Result<()> {
        let cell_id = &message.cell_id;
        let key = entry_key(ctx, cell_id);

        let (run_id, preempted, previous_run) = {
            let mut entries = lock_entries(&self.entries);
            let entry = fold(&mut entries, &key, message, ctx);

            self.staleness.clear_stale(&key.0, cell_id);
            if entry.state.stale_inputs {
                self.staleness.mark_stale(&key.0, cell_id);
            }

            let run_id = message
                .run_id
                .clone()
                .ok_or_else(|| BridgeError::MissingRunId(cell_id.clone()))?;

            let preempted = entry.pending_execution.is_some().then(|| {
                entries.insert(key.clone(), entry.detach());
                entry.clone()
            });
            (run_id, preempted, entry.last_run_id)
        };

        if let Some(previous) = preempted {
            if previous.has_open_execution() {
                info!(
                    "[registry] Cell {} re-queued as {} before {:?} finished; ending previous run",
                    cell_id, run_id, previous_run
                );
            }
            previous.end(false, None);
        }

        let token = ctx
            .controller
            .create_execution(ctx.editor.as_ref(), cell_id)?;
        let handle = ExecutionHandle::pending(token, run_id.clone());

        let mut entries = lock_entries(&self.entries);
        let attached = match entries.get(&key) {
            Some(entry) if entry.pending_execution.is_none() && entry.last_run_id == previous_run => {
                Some(entry.with_execution(handle.clone()))
            }
            _ => None,
        };
        match attached {
            Some(entry) => {
                entries.insert(key, entry);
                debug!("[registry] Cell {} queued as {}", cell_id, run_id);
            }
            None => {
                drop(entries);
                warn!(
                    "[registry] Cell {} changed while creating execution for {}; discarding it",
                    cell_id, run_id
                );
                handle.end(false, None);
            }
        }
        Ok(())
    }

    async fn on_running(&self, message: &CellMessage, ctx: &HostContext) -> Result<()> {
        let key = entry_key(ctx, &message.cell_id);
        let entry = fold(&mut lock_entries(&self.entries), &key, message, ctx);
        if entry.pending_execution.is_none() {
            warn!(
                "[registry] Cell {} reported running without being queued",
                message.cell_id
            );
        }

        let started = entry.start(message.timestamp.unwrap_or(0.0));
        let current = {
            let mut entries = lock_entries(&self.entries);
            let next = match (entries.get(&key), &started.pending_execution) {
                (Some(current), Some(handle)) if current.shares_execution(&started) => {
                    Some(current.with_execution(handle.clone()))
                }
                _ => None,
            };
            match next {
                Some(next) => {
                    entries.insert(key.clone(), next.clone());
                    next
                }
                None => entries.get(&key).cloned().unwrap_or(started),
            }
        };
        current.maybe_update_cell_output(Some(ctx)).await?;
        Ok(())
    }

    async fn on_idle(&self, message: &CellMessage, ctx: &HostContext) -> Result<()> {
        let key = entry_key(ctx, &message.cell_id);
        let entry = fold(&mut lock_entries(&self.entries), &key, message, ctx);
        let expected_run = entry.last_run_id.clone();

        let result = entry.maybe_update_cell_output(Some(ctx)).await;
        self.schedule_finalize(key, expected_run, message.timestamp);
        result?;
        Ok(())
    }

    async fn on_update(&self, message: &CellMessage, ctx: &HostContext) -> Result<()> {
        let key = entry_key(ctx, &message.cell_id);
        let entry = fold(&mut lock_entries(&self.entries), &key, message, ctx);
        entry.maybe_update_cell_output(Some(ctx)).await?;
        Ok(())
    }

    fn schedule_finalize(&self, key: EntryKey, expected_run: Option<RunId>, timestamp: Option<f64>) {
        let entries = Arc::clone(&self.entries);
        let delay = self.finalize_delay;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            finalize(&entries, &key, &expected_run, timestamp);
        });
    }

    /// End every open execution as failed and forget all cells.
    pub fn dispose(&self) {
        let open: Vec<CellEntry> = lock_entries(&self.entries)
            .drain()
            .map(|(_, entry)| entry)
            .filter(CellEntry::has_open_execution)
            .collect();
        for entry in &open {
            entry.end(false, None);
        }
        if !open.is_empty() {
            info!("[registry] Disposed with {} open execution(s)", open.len());
        }
    }
}

impl Drop for ExecutionRegistry {
    fn drop(&mut self) {
        self.dispose();
    }
}
