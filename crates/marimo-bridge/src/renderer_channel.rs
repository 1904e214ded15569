//! Commands from the UI renderer back to the kernel.
//!
//! Interactive elements rendered in the host (sliders, widgets, function
//! calls) post `{command, params}` messages. They are drained in order by a
//! single task and forwarded to the kernel of the editor's notebook.

use std::sync::Arc;

use log::{debug, error};
use marimo_protocol::RendererCommand;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::host::NotebookEditor;
use crate::transport::KernelClient;

/// A message posted by the renderer of an editor.
pub struct RendererMessage {
    pub editor: Arc<dyn NotebookEditor>,
    pub message: Value,
}

/// Decode a renderer message.
///
/// The renderer and this crate ship together, so an unknown command name is
/// a bug: it panics in debug builds and is logged in release builds. A known
/// command with malformed params is logged and skipped.
fn decode_command(message: Value) -> Option<RendererCommand> {
    let Some(name) = message.get("command").and_then(Value::as_str) else {
        error!("[renderer] Dropping message without a command: {}", message);
        return None;
    };
    if !RendererCommand::is_known(name) {
        if cfg!(debug_assertions) {
            panic!("[renderer] Unknown renderer command: {}", name);
        }
        error!("[renderer] Unknown renderer command: {}", name);
        return None;
    }
    if !message.get("params").is_some_and(Value::is_object) {
        error!("[renderer] Dropping {} with malformed params: {}", name, message);
        return None;
    }

    let name = name.to_string();
    match serde_json::from_value::<RendererCommand>(message) {
        Ok(command) => Some(command),
        Err(e) => {
            error!("[renderer] Dropping malformed {} command: {}", name, e);
            None
        }
    }
}

/// Start the renderer command channel.
pub fn spawn_renderer_channel(
    client: KernelClient,
) -> (mpsc::UnboundedSender<RendererMessage>, JoinHandle<()>) {
    let (tx, mut rx) = mpsc::unbounded_channel::<RendererMessage>();

    let task = tokio::spawn(async move {
        while let Some(RendererMessage { editor, message }) = rx.recv().await {
            let notebook = editor.notebook_uri().clone();
            let Some(command) = decode_command(message) else {
                continue;
            };
            let api = command.kernel_api();
            if let Err(e) = client.execute(command.into_kernel_command(notebook.clone())).await {
                error!("[renderer] Failed to send {} for {}: {}", api, notebook, e);
            }
        }
        debug!("[renderer] Channel closed");
    });

    (tx, task)
}
