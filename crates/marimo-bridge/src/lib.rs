//! marimo-bridge - Turns marimo kernel notifications into live per-cell
//! execution state inside a notebook host.
//!
//! The kernel reports, per notebook and per cell, when a run is queued,
//! starts, produces output and goes idle. The bridge folds those reports into
//! host execution tokens: one token per run, started once and ended once,
//! even when reports arrive late, out of order or are cut short by an
//! interrupt. A reverse channel carries commands from interactive UI
//! elements back to the kernel.
//!
//! Data flow:
//!
//! ```text
//! KernelTransport ──▶ notification pump ──▶ dispatch loop ──┬─▶ ExecutionRegistry ──▶ host tokens
//!                                                            ├─▶ variables / datasources stores
//!                                                            └─▶ renderer forwarding
//! UI renderer ──▶ renderer channel ──▶ KernelClient ──▶ KernelTransport
//! ```

pub mod bridge;
pub mod cell_entry;
pub mod config;
pub mod datasources;
pub mod dispatch;
pub mod error;
pub mod execution_handle;
pub mod execution_registry;
pub mod host;
pub mod output_builder;
pub mod recording;
pub mod renderer_channel;
pub mod replay;
pub mod staleness;
pub mod transport;
pub mod variables;

pub use bridge::Bridge;
pub use config::{default_config_path, load_config, try_load_config, BridgeConfig};
pub use dispatch::{HostServices, OperationDispatcher};
pub use error::{BridgeError, HostError, Result, TransportError};
pub use execution_registry::{ExecutionRegistry, FINALIZE_DELAY};
pub use host::{
    ControllerRegistry, EditorRegistry, ExecutionToken, HostContext, NotebookController,
    NotebookEditor, PackageAlertHandler, RendererHost, UserNotifier,
};
pub use renderer_channel::RendererMessage;
pub use transport::{KernelClient, KernelTransport};
