//! The bridge service: wires transport, dispatch loop, registry and stores.
//!
//! One [`Bridge`] exists per activation of the host extension. It owns the
//! background tasks; shutting it down (or dropping it) aborts them and fails
//! every host execution that is still open.

use std::sync::Arc;

use log::info;
use marimo_protocol::MarimoOperation;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::config::BridgeConfig;
use crate::datasources::DatasourcesStore;
use crate::dispatch::{DispatchHandle, HostServices, OperationDispatcher};
use crate::error::{BridgeError, Result};
use crate::execution_registry::ExecutionRegistry;
use crate::renderer_channel::{spawn_renderer_channel, RendererMessage};
use crate::staleness::CellStalenessStore;
use crate::transport::{spawn_notification_pump, KernelClient, KernelTransport};
use crate::variables::VariablesStore;

pub struct Bridge {
    session_id: Uuid,
    config: BridgeConfig,
    registry: Arc<ExecutionRegistry>,
    staleness: Arc<CellStalenessStore>,
    variables: Arc<VariablesStore>,
    datasources: Arc<DatasourcesStore>,
    client: KernelClient,
    dispatch: DispatchHandle,
    renderer: mpsc::UnboundedSender<RendererMessage>,
    tasks: Vec<JoinHandle<()>>,
    stopped: bool,
}

impl Bridge {
    /// Build the bridge and start its background tasks.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(
        config: BridgeConfig,
        transport: Arc<dyn KernelTransport>,
        host: HostServices,
    ) -> Self {
        let session_id = Uuid::new_v4();
        let staleness = Arc::new(CellStalenessStore::new());
        let registry = Arc::new(
            ExecutionRegistry::new(staleness.clone()).with_finalize_delay(config.finalize_delay()),
        );
        let variables = Arc::new(VariablesStore::new());
        let datasources = Arc::new(DatasourcesStore::new());
        let client = KernelClient::new(transport.clone());

        let dispatch = OperationDispatcher::new(
            host,
            registry.clone(),
            variables.clone(),
            datasources.clone(),
        )
        .spawn();
        let pump = spawn_notification_pump(
            transport,
            dispatch.queue(),
            config.resubscribe_backoff(),
        );
        let (renderer, renderer_task) = spawn_renderer_channel(client.clone());

        info!(
            "[bridge] Session {} started (finalize delay {:?})",
            session_id,
            config.finalize_delay()
        );

        Self {
            session_id,
            config,
            registry,
            staleness,
            variables,
            datasources,
            client,
            dispatch,
            renderer,
            tasks: vec![pump, renderer_task],
            stopped: false,
        }
    }

    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<ExecutionRegistry> {
        &self.registry
    }

    pub fn staleness(&self) -> &Arc<CellStalenessStore> {
        &self.staleness
    }

    pub fn variables(&self) -> &Arc<VariablesStore> {
        &self.variables
    }

    pub fn datasources(&self) -> &Arc<DatasourcesStore> {
        &self.datasources
    }

    /// Outbound kernel API for host command handlers.
    pub fn client(&self) -> &KernelClient {
        &self.client
    }

    /// Sender the host uses to post renderer messages.
    pub fn renderer_sender(&self) -> mpsc::UnboundedSender<RendererMessage> {
        self.renderer.clone()
    }

    /// Put an operation on the dispatch queue directly.
    pub fn enqueue(&self, operation: MarimoOperation) -> Result<()> {
        self.dispatch
            .queue()
            .send(operation)
            .map_err(|_| BridgeError::ChannelClosed)
    }

    /// Stop all tasks and fail every open host execution.
    pub fn shutdown(&mut self) {
        if self.stopped {
            return;
        }
        self.stopped = true;

        self.dispatch.abort();
        for task in self.tasks.drain(..) {
            task.abort();
        }
        let open = self.registry.open_executions();
        self.registry.dispose();
        info!(
            "[bridge] Session {} stopped ({} open execution(s) ended)",
            self.session_id, open
        );
    }
}

impl Drop for Bridge {
    fn drop(&mut self) {
        self.shutdown();
    }
}
