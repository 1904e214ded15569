//! Per-run execution handles.
//!
//! An [`ExecutionHandle`] pairs a host execution token with the kernel run id
//! it was created for. Handles only move forward (Pending → Running →
//! Completed); each transition returns a new handle and leaves the old value
//! untouched.
//!
//! Host side effects go through [`HostExecution`], which fires `start` and
//! `end` at most once per token. A stale copy of a handle that gets ended a
//! second time therefore cannot close the host execution twice.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use marimo_protocol::RunId;

use crate::error::HostError;
use crate::host::ExecutionToken;
use crate::output_builder::CellOutput;

/// Kernel timestamps are seconds; the host wants milliseconds.
pub const HOST_TIME_SCALE: f64 = 1000.0;

/// Convert a kernel timestamp (seconds) to host units.
pub fn to_host_time(seconds: f64) -> u64 {
    (seconds * HOST_TIME_SCALE).round().max(0.0) as u64
}

/// A host execution token with at-most-once start/end.
pub struct HostExecution {
    token: Arc<dyn ExecutionToken>,
    started: AtomicBool,
    ended: AtomicBool,
}

impl HostExecution {
    pub fn new(token: Arc<dyn ExecutionToken>) -> Arc<Self> {
        Arc::new(Self {
            token,
            started: AtomicBool::new(false),
            ended: AtomicBool::new(false),
        })
    }

    fn start(&self, timestamp_ms: Option<u64>) {
        if self.ended.load(Ordering::SeqCst) {
            return;
        }
        if !self.started.swap(true, Ordering::SeqCst) {
            self.token.start(timestamp_ms);
        }
    }

    fn end(&self, success: bool, timestamp_ms: Option<u64>) {
        if !self.ended.swap(true, Ordering::SeqCst) {
            self.token.end(success, timestamp_ms);
        }
    }

    pub fn has_ended(&self) -> bool {
        self.ended.load(Ordering::SeqCst)
    }

    pub async fn replace_output(&self, outputs: Vec<CellOutput>) -> Result<(), HostError> {
        self.token.replace_output(outputs).await
    }
}

/// Lifecycle of one kernel run as seen by the host.
#[derive(Clone)]
pub enum ExecutionHandle {
    /// The kernel queued the run.
    Pending {
        inner: Arc<HostExecution>,
        run_id: RunId,
    },
    /// The kernel started the run; the host execution has been started.
    Running {
        inner: Arc<HostExecution>,
        run_id: RunId,
    },
    /// The host execution has been ended. Terminal.
    Completed {
        inner: Arc<HostExecution>,
        run_id: RunId,
    },
}

impl ExecutionHandle {
    pub fn pending(token: Arc<dyn ExecutionToken>, run_id: RunId) -> Self {
        ExecutionHandle::Pending {
            inner: HostExecution::new(token),
            run_id,
        }
    }

    pub fn run_id(&self) -> &RunId {
        match self {
            ExecutionHandle::Pending { run_id, .. }
            | ExecutionHandle::Running { run_id, .. }
            | ExecutionHandle::Completed { run_id, .. } => run_id,
        }
    }

    pub fn inner(&self) -> &Arc<HostExecution> {
        match self {
            ExecutionHandle::Pending { inner, .. }
            | ExecutionHandle::Running { inner, .. }
            | ExecutionHandle::Completed { inner, .. } => inner,
        }
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, ExecutionHandle::Pending { .. })
    }

    pub fn is_running(&self) -> bool {
        matches!(self, ExecutionHandle::Running { .. })
    }

    pub fn is_completed(&self) -> bool {
        matches!(self, ExecutionHandle::Completed { .. })
    }

    /// Pending → Running, starting the host execution at `timestamp` (seconds).
    ///
    /// Any other state is returned unchanged.
    pub fn start(&self, timestamp: f64) -> ExecutionHandle {
        match self {
            ExecutionHandle::Pending { inner, run_id } => {
                inner.start(Some(to_host_time(timestamp)));
                ExecutionHandle::Running {
                    inner: inner.clone(),
                    run_id: run_id.clone(),
                }
            }
            other => other.clone(),
        }
    }

    /// Pending/Running → Completed, ending the host execution.
    ///
    /// Ending a completed handle is a no-op.
    pub fn end(&self, success: bool, timestamp: Option<f64>) -> ExecutionHandle {
        match self {
            ExecutionHandle::Pending { inner, run_id }
            | ExecutionHandle::Running { inner, run_id } => {
                inner.end(success, timestamp.map(to_host_time));
                ExecutionHandle::Completed {
                    inner: inner.clone(),
                    run_id: run_id.clone(),
                }
            }
            completed @ ExecutionHandle::Completed { .. } => completed.clone(),
        }
    }
}

impl fmt::Debug for ExecutionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match self {
            ExecutionHandle::Pending { .. } => "Pending",
            ExecutionHandle::Running { .. } => "Running",
            ExecutionHandle::Completed { .. } => "Completed",
        };
        f.debug_struct(state)
            .field("run_id", self.run_id())
            .finish()
    }
}
