//! Kernel transport: inbound operation notifications and outbound commands.
//!
//! The process layer that launches the kernel and speaks its LSP-like
//! protocol implements [`KernelTransport`]. The bridge only needs two things
//! from it: a stream of raw operation payloads and a way to send a command.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures::future::BoxFuture;
use futures::stream::BoxStream;
use futures::{FutureExt, StreamExt};
use log::{debug, info, warn};
use marimo_protocol::{api, CellId, KernelCommand, MarimoOperation, NotebookUri};
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::error::TransportError;

/// Connection to a running kernel.
pub trait KernelTransport: Send + Sync {
    /// Subscribe to operation notifications.
    ///
    /// The stream ends when the kernel stops; callers subscribe again after a
    /// restart.
    fn notifications(&self) -> BoxStream<'static, Value>;

    /// Send a command and wait for the kernel's reply.
    fn execute_command(&self, command: KernelCommand) -> BoxFuture<'_, Result<Value, TransportError>>;
}

/// Typed outbound API over a [`KernelTransport`].
#[derive(Clone)]
pub struct KernelClient {
    transport: Arc<dyn KernelTransport>,
}

impl KernelClient {
    pub fn new(transport: Arc<dyn KernelTransport>) -> Self {
        Self { transport }
    }

    pub async fn execute(&self, command: KernelCommand) -> Result<Value, TransportError> {
        debug!(
            "[transport] -> {} for {}",
            command.command, command.params.notebook_uri
        );
        self.transport.execute_command(command).await
    }

    /// Call a kernel API for a notebook.
    pub async fn call(
        &self,
        api: &str,
        notebook: &NotebookUri,
        params: Value,
    ) -> Result<Value, TransportError> {
        self.execute(KernelCommand::new(api, notebook.clone(), params))
            .await
    }

    /// Run cells with the given source code.
    pub async fn run_cells(
        &self,
        notebook: &NotebookUri,
        cell_ids: &[CellId],
        codes: &[String],
    ) -> Result<Value, TransportError> {
        self.call(
            api::RUN,
            notebook,
            json!({ "cellIds": cell_ids, "codes": codes }),
        )
        .await
    }

    pub async fn interrupt(&self, notebook: &NotebookUri) -> Result<Value, TransportError> {
        self.call(api::INTERRUPT, notebook, json!({})).await
    }

    pub async fn restart(&self, notebook: &NotebookUri) -> Result<Value, TransportError> {
        self.call(api::RESTART, notebook, json!({})).await
    }
}

/// Feed kernel notifications into the operation queue.
///
/// Malformed payloads are logged and dropped. When the notification stream
/// ends the pump waits `backoff` and subscribes again. It stops once the
/// queue is closed.
pub fn spawn_notification_pump(
    transport: Arc<dyn KernelTransport>,
    queue: mpsc::UnboundedSender<MarimoOperation>,
    backoff: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let mut notifications = transport.notifications();
            while let Some(payload) = notifications.next().await {
                match MarimoOperation::from_value(payload) {
                    Ok(operation) => {
                        if queue.send(operation).is_err() {
                            debug!("[transport] Operation queue closed; stopping pump");
                            return;
                        }
                    }
                    Err(e) => {
                        warn!("[transport] Dropping malformed notification: {}", e);
                    }
                }
            }

            if queue.is_closed() {
                return;
            }
            info!(
                "[transport] Notification stream ended; resubscribing in {:?}",
                backoff
            );
            tokio::time::sleep(backoff).await;
        }
    })
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// In-memory transport.
///
/// Each [`ChannelTransport::open_session`] stands for one kernel lifetime:
/// payloads sent on the returned sender are delivered on the next
/// subscription, and dropping the sender ends that subscription's stream.
/// Commands are recorded and answered with `null`.
#[derive(Default)]
pub struct ChannelTransport {
    sessions: Mutex<VecDeque<futures::channel::mpsc::UnboundedReceiver<Value>>>,
    commands: Mutex<Vec<KernelCommand>>,
    down: Mutex<bool>,
}

impl ChannelTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn open_session(&self) -> futures::channel::mpsc::UnboundedSender<Value> {
        let (tx, rx) = futures::channel::mpsc::unbounded();
        lock(&self.sessions).push_back(rx);
        tx
    }

    /// Commands sent so far, oldest first.
    pub fn sent_commands(&self) -> Vec<KernelCommand> {
        lock(&self.commands).clone()
    }

    /// Make every command fail with [`TransportError::KernelDown`].
    pub fn set_down(&self, down: bool) {
        *lock(&self.down) = down;
    }
}

impl KernelTransport for ChannelTransport {
    fn notifications(&self) -> BoxStream<'static, Value> {
        match lock(&self.sessions).pop_front() {
            Some(session) => session.boxed(),
            None => futures::stream::empty().boxed(),
        }
    }

    fn execute_command(&self, command: KernelCommand) -> BoxFuture<'_, Result<Value, TransportError>> {
        let result = if *lock(&self.down) {
            Err(TransportError::KernelDown)
        } else {
            lock(&self.commands).push(command);
            Ok(Value::Null)
        };
        futures::future::ready(result).boxed()
    }
}
