//! The operation dispatch loop.
//!
//! Every kernel operation for every notebook goes through one queue with one
//! consumer, so operations are applied in the order the kernel sent them.
//! Slow or unordered side work (renderer forwarding, missing-package prompts)
//! is handed off to other tasks so it never blocks the loop.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use log::{debug, error, info, warn};
use marimo_protocol::{MarimoOperation, NotebookUri, Operation};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::datasources::{ColumnPreview, DatasourcesStore, SqlPreview};
use crate::error::{BridgeError, Result};
use crate::execution_registry::ExecutionRegistry;
use crate::host::{
    ControllerRegistry, EditorRegistry, HostContext, PackageAlertHandler, RendererHost,
    UserNotifier,
};
use crate::variables::VariablesStore;

/// The host services the dispatch loop calls into.
#[derive(Clone)]
pub struct HostServices {
    pub editors: Arc<dyn EditorRegistry>,
    pub controllers: Arc<dyn ControllerRegistry>,
    pub renderer: Arc<dyn RendererHost>,
    pub packages: Arc<dyn PackageAlertHandler>,
    pub notifier: Arc<dyn UserNotifier>,
}

impl HostServices {
    /// Use one object for every host service.
    pub fn from_host<H>(host: Arc<H>) -> Self
    where
        H: EditorRegistry
            + ControllerRegistry
            + RendererHost
            + PackageAlertHandler
            + UserNotifier
            + 'static,
    {
        Self {
            editors: host.clone(),
            controllers: host.clone(),
            renderer: host.clone(),
            packages: host.clone(),
            notifier: host,
        }
    }
}

/// Routes operations to the registry, the stores and the renderer.
pub struct OperationDispatcher {
    host: HostServices,
    registry: Arc<ExecutionRegistry>,
    variables: Arc<VariablesStore>,
    datasources: Arc<DatasourcesStore>,
}

/// Running dispatch loop.
pub struct DispatchHandle {
    queue: mpsc::UnboundedSender<MarimoOperation>,
    loop_task: JoinHandle<()>,
    renderer_task: JoinHandle<()>,
}

impl DispatchHandle {
    /// Sender for the operation queue.
    pub fn queue(&self) -> mpsc::UnboundedSender<MarimoOperation> {
        self.queue.clone()
    }

    pub fn abort(&self) {
        self.loop_task.abort();
        self.renderer_task.abort();
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

impl OperationDispatcher {
    pub fn new(
        host: HostServices,
        registry: Arc<ExecutionRegistry>,
        variables: Arc<VariablesStore>,
        datasources: Arc<DatasourcesStore>,
    ) -> Self {
        Self {
            host,
            registry,
            variables,
            datasources,
        }
    }

    /// Start the loop and the renderer forwarding task.
    pub fn spawn(self) -> DispatchHandle {
        let (queue, rx) = mpsc::unbounded_channel();
        let (renderer_tx, renderer_rx) = mpsc::unbounded_channel();

        let renderer_task = spawn_renderer_forwarder(self.host.renderer.clone(), renderer_rx);
        let loop_task = tokio::spawn(self.run(rx, renderer_tx));

        DispatchHandle {
            queue,
            loop_task,
            renderer_task,
        }
    }

    async fn run(
        self,
        mut rx: mpsc::UnboundedReceiver<MarimoOperation>,
        renderer_tx: mpsc::UnboundedSender<(NotebookUri, Operation)>,
    ) {
        while let Some(op) = rx.recv().await {
            let name = op.operation.name().to_string();
            let notebook = op.notebook_uri.clone();

            let result = AssertUnwindSafe(self.dispatch(op, &renderer_tx))
                .catch_unwind()
                .await;

            let cause = match result {
                Ok(Ok(())) => continue,
                Ok(Err(e)) => format!("{} ({:?})", e, e),
                Err(panic) => format!("panic: {}", panic_message(panic.as_ref())),
            };

            error!(
                "[dispatch] Failed to process {} for {}: {}",
                name, notebook, cause
            );
            let notifier = self.host.notifier.clone();
            tokio::spawn(async move {
                notifier
                    .show_error(format!(
                        "Failed to process marimo operation '{}'. See logs for details.",
                        name
                    ))
                    .await;
            });
        }
        info!("[dispatch] Operation queue closed; stopping");
    }

    async fn dispatch(
        &self,
        op: MarimoOperation,
        renderer_tx: &mpsc::UnboundedSender<(NotebookUri, Operation)>,
    ) -> Result<()> {
        let MarimoOperation {
            notebook_uri,
            operation,
        } = op;

        let Some(editor) = self.host.editors.last_editor(&notebook_uri) else {
            warn!(
                "[dispatch] No editor open for {}; dropping {}",
                notebook_uri,
                operation.name()
            );
            return Ok(());
        };
        let Some(controller) = self.host.controllers.active_controller(editor.as_ref()) else {
            warn!(
                "[dispatch] No active controller for {}; dropping {}",
                notebook_uri,
                operation.name()
            );
            return Ok(());
        };
        let ctx = HostContext { editor, controller };

        match operation {
            Operation::CellOp(message) => {
                self.registry.handle_cell_operation(&message, &ctx).await?;
            }
            Operation::Interrupted {} => {
                self.registry.handle_interrupted(ctx.editor.as_ref());
            }
            Operation::MissingPackageAlert { packages, isolated } => {
                let handler = self.host.packages.clone();
                tokio::spawn(async move {
                    if let Err(e) = handler
                        .on_missing_packages(&notebook_uri, packages, isolated)
                        .await
                    {
                        error!(
                            "[dispatch] Missing-package handler failed for {}: {}",
                            notebook_uri, e
                        );
                    }
                });
            }
            Operation::Variables { variables } => {
                self.variables
                    .set_declarations(&notebook_uri, &variables)
                    .await;
            }
            Operation::VariableValues { variables } => {
                self.variables.set_values(&notebook_uri, &variables).await;
            }
            Operation::DataSourceConnections { connections } => {
                self.datasources
                    .merge_connections(&notebook_uri, &connections)
                    .await;
            }
            Operation::Datasets {
                tables,
                clear_channel,
            } => {
                self.datasources
                    .merge_tables(&notebook_uri, &tables, clear_channel.as_deref())
                    .await;
            }
            Operation::SqlTablePreview {
                request_id,
                table,
                error,
            } => {
                let preview = SqlPreview {
                    table,
                    error,
                    ..Default::default()
                };
                self.datasources
                    .record_sql_preview(&notebook_uri, &request_id, preview)
                    .await;
            }
            Operation::SqlTableListPreview {
                request_id,
                tables,
                error,
            } => {
                let preview = SqlPreview {
                    tables,
                    error,
                    ..Default::default()
                };
                self.datasources
                    .record_sql_preview(&notebook_uri, &request_id, preview)
                    .await;
            }
            Operation::DataColumnPreview {
                table_name,
                column_name,
                chart_spec,
                chart_code,
                summary,
                error,
            } => {
                let preview = ColumnPreview {
                    table_name,
                    column_name,
                    chart_spec,
                    chart_code,
                    summary,
                    error,
                };
                self.datasources
                    .record_column_preview(&notebook_uri, preview)
                    .await;
            }
            op @ (Operation::RemoveUiElements { .. }
            | Operation::FunctionCallResult { .. }
            | Operation::SendUiElementMessage { .. }) => {
                renderer_tx
                    .send((notebook_uri, op))
                    .map_err(|_| BridgeError::ChannelClosed)?;
            }
            ignored @ (Operation::CompletedRun {}
            | Operation::UpdateCellCodes { .. }
            | Operation::FocusCell { .. }) => {
                debug!("[dispatch] Ignoring {} for {}", ignored.name(), notebook_uri);
            }
            Operation::Unknown { op } => {
                warn!("[dispatch] Unknown operation '{}' for {}", op, notebook_uri);
            }
        }
        Ok(())
    }
}

fn spawn_renderer_forwarder(
    renderer: Arc<dyn RendererHost>,
    mut rx: mpsc::UnboundedReceiver<(NotebookUri, Operation)>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some((notebook, operation)) = rx.recv().await {
            let name = operation.name().to_string();
            if let Err(e) = renderer.post_message(&notebook, operation).await {
                warn!(
                    "[dispatch] Failed to forward {} to renderer for {}: {}",
                    name, notebook, e
                );
            }
        }
    })
}
