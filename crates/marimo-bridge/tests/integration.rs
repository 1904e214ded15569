//! Integration tests for the bridge.
//!
//! These tests drive a full `Bridge` through an in-memory kernel transport and
//! assert on the calls made to a recording host.

use std::sync::Arc;
use std::time::Duration;

use futures::channel::mpsc::UnboundedSender;
use marimo_bridge::recording::{HostEvent, RecordingHost};
use marimo_bridge::transport::ChannelTransport;
use marimo_bridge::{Bridge, BridgeConfig, HostServices, RendererMessage};
use marimo_protocol::{api, CellId, MarimoOperation, NotebookUri, Operation};
use serde_json::{json, Value};
use tokio::time::sleep;

const NB: &str = "file:///notebook.py";

struct TestBridge {
    host: RecordingHost,
    transport: Arc<ChannelTransport>,
    session: UnboundedSender<Value>,
    bridge: Bridge,
}

fn start_with(config: BridgeConfig) -> TestBridge {
    let host = RecordingHost::new();
    let transport = ChannelTransport::new();
    let session = transport.open_session();
    let bridge = Bridge::start(
        config,
        transport.clone(),
        HostServices::from_host(Arc::new(host.clone())),
    );
    TestBridge {
        host,
        transport,
        session,
        bridge,
    }
}

fn start() -> TestBridge {
    start_with(BridgeConfig::default())
}

impl TestBridge {
    /// Deliver a kernel notification and let the loop process it.
    async fn kernel(&self, notebook: &str, operation: Value) {
        self.session
            .unbounded_send(json!({ "notebookUri": notebook, "operation": operation }))
            .unwrap();
        sleep(Duration::from_millis(1)).await;
    }

    async fn cell(&self, operation: Value) {
        self.kernel(NB, operation).await;
    }

    fn ends(&self, token: u64) -> Vec<(bool, Option<u64>)> {
        self.host
            .token_events(token)
            .into_iter()
            .filter_map(|e| match e {
                HostEvent::End {
                    success,
                    timestamp_ms,
                    ..
                } => Some((success, timestamp_ms)),
                _ => None,
            })
            .collect()
    }

    fn starts(&self, token: u64) -> Vec<Option<u64>> {
        self.host
            .token_events(token)
            .into_iter()
            .filter_map(|e| match e {
                HostEvent::Start { timestamp_ms, .. } => Some(timestamp_ms),
                _ => None,
            })
            .collect()
    }
}

#[tokio::test(start_paused = true)]
async fn test_cell_run_lifecycle() {
    let t = start();

    t.cell(json!({"op": "cell-op", "cell_id": "c1", "status": "queued", "run_id": "r1"}))
        .await;
    t.cell(json!({"op": "cell-op", "cell_id": "c1", "status": "running", "timestamp": 1.0}))
        .await;
    t.cell(json!({
        "op": "cell-op",
        "cell_id": "c1",
        "console": {"channel": "stdout", "mimetype": "text/plain", "data": "working\n"}
    }))
    .await;
    t.cell(json!({"op": "cell-op", "cell_id": "c1", "status": "idle", "timestamp": 1.5}))
        .await;

    let token = t.host.tokens_for("c1")[0];
    assert!(t.ends(token).is_empty(), "end must wait for the finalize delay");

    sleep(Duration::from_millis(100)).await;

    assert_eq!(t.starts(token), vec![Some(1000)]);
    assert_eq!(t.ends(token), vec![(true, Some(1500))]);
    assert_eq!(t.host.tokens_for("c1").len(), 1);

    let last_push = t
        .host
        .token_events(token)
        .into_iter()
        .filter_map(|e| match e {
            HostEvent::ReplaceOutput { outputs, .. } => Some(outputs),
            _ => None,
        })
        .last()
        .unwrap();
    assert_eq!(last_push.len(), 1);
    assert_eq!(last_push[0].items[0].data, "working\n");
}

#[tokio::test(start_paused = true)]
async fn test_requeue_within_finalize_window() {
    let t = start();

    t.cell(json!({"op": "cell-op", "cell_id": "c1", "status": "queued", "run_id": "r1"}))
        .await;
    t.cell(json!({"op": "cell-op", "cell_id": "c1", "status": "idle"}))
        .await;
    t.cell(json!({"op": "cell-op", "cell_id": "c1", "status": "queued", "run_id": "r2"}))
        .await;

    let tokens = t.host.tokens_for("c1");
    assert_eq!(tokens.len(), 2);
    assert_eq!(t.ends(tokens[0]), vec![(false, None)]);

    sleep(Duration::from_millis(100)).await;

    assert_eq!(t.ends(tokens[0]), vec![(false, None)]);
    assert!(t.ends(tokens[1]).is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_error_before_queue_shows_ephemeral_output() {
    let t = start();

    t.cell(json!({
        "op": "cell-op",
        "cell_id": "c1",
        "output": {
            "channel": "marimo-error",
            "mimetype": "application/vnd.marimo+error",
            "data": [{"type": "cycle", "msg": "cycle detected"}]
        }
    }))
    .await;

    let tokens = t.host.tokens_for("c1");
    assert_eq!(tokens.len(), 1);
    let kinds: Vec<_> = t
        .host
        .token_events(tokens[0])
        .into_iter()
        .map(|e| serde_json::to_value(&e).unwrap()["event"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(kinds, vec!["create", "start", "replace_output", "end"]);
    assert_eq!(t.ends(tokens[0]), vec![(false, None)]);
    assert!(t
        .bridge
        .registry()
        .entry(&NotebookUri::new(NB), &CellId::new("c1"))
        .unwrap()
        .pending_execution
        .is_none());
}

#[tokio::test(start_paused = true)]
async fn test_interrupt_is_scoped_to_notebook() {
    let t = start();
    let other = "file:///other.py";

    t.cell(json!({"op": "cell-op", "cell_id": "a", "status": "queued", "run_id": "r1"}))
        .await;
    t.kernel(other, json!({"op": "cell-op", "cell_id": "b", "status": "queued", "run_id": "r2"}))
        .await;
    t.cell(json!({"op": "interrupted"})).await;

    let a = t.host.tokens_for("a")[0];
    let b = t.host.tokens_for("b")[0];
    assert_eq!(t.ends(a), vec![(false, None)]);
    assert!(t.ends(b).is_empty());
    assert_eq!(t.bridge.registry().open_executions(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_notebooks_sharing_a_cell_id_do_not_interfere() {
    let t = start();
    let other = "file:///other.py";

    t.cell(json!({"op": "cell-op", "cell_id": "Hbol", "status": "queued", "run_id": "r1"}))
        .await;
    t.cell(json!({"op": "cell-op", "cell_id": "Hbol", "status": "running", "timestamp": 1.0}))
        .await;
    t.kernel(other, json!({"op": "cell-op", "cell_id": "Hbol", "status": "queued", "run_id": "r2"}))
        .await;
    t.kernel(other, json!({"op": "interrupted"})).await;

    let tokens = t.host.tokens_for("Hbol");
    assert_eq!(tokens.len(), 2);
    assert!(t.ends(tokens[0]).is_empty());
    assert_eq!(t.ends(tokens[1]), vec![(false, None)]);

    t.cell(json!({"op": "cell-op", "cell_id": "Hbol", "status": "idle", "timestamp": 2.0}))
        .await;
    sleep(Duration::from_millis(100)).await;
    assert_eq!(t.ends(tokens[0]), vec![(true, Some(2000))]);
    assert_eq!(t.bridge.registry().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_renderer_commands_reach_kernel() {
    let t = start();

    t.bridge
        .renderer_sender()
        .send(RendererMessage {
            editor: t.host.editor(NB),
            message: json!({"command": "set_ui_element_value", "params": {"object_ids": ["slider-1"], "values": [7]}}),
        })
        .unwrap();
    sleep(Duration::from_millis(1)).await;

    let commands = t.transport.sent_commands();
    assert_eq!(commands.len(), 1);
    assert_eq!(commands[0].command, api::SET_UI_ELEMENT_VALUE);
    assert_eq!(commands[0].params.notebook_uri, NotebookUri::new(NB));
    assert_eq!(
        serde_json::to_value(&commands[0]).unwrap(),
        json!({
            "command": "marimo.set_ui_element_value",
            "params": {
                "notebookUri": NB,
                "inner": {"object_ids": ["slider-1"], "values": [7]}
            }
        })
    );
}

#[tokio::test(start_paused = true)]
async fn test_kernel_restart_resubscribes() {
    let mut t = start();

    t.cell(json!({"op": "cell-op", "cell_id": "c1", "status": "queued", "run_id": "r1"}))
        .await;

    // The kernel goes away: its notification stream ends.
    t.session = t.transport.open_session();
    sleep(Duration::from_secs(1)).await;

    t.cell(json!({"op": "cell-op", "cell_id": "c2", "status": "queued", "run_id": "r2"}))
        .await;
    sleep(Duration::from_secs(1)).await;

    assert_eq!(t.host.tokens_for("c2").len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_sibling_stores_are_updated() {
    let t = start();
    let nb = NotebookUri::new(NB);

    t.cell(json!({
        "op": "variables",
        "variables": [{"name": "df", "declared_by": ["c1"], "used_by": ["c2"]}]
    }))
    .await;
    t.cell(json!({
        "op": "variable-values",
        "variables": [{"name": "df", "value": "DataFrame(3x2)", "datatype": "DataFrame"}]
    }))
    .await;
    t.cell(json!({
        "op": "datasets",
        "tables": [{"name": "df", "source": "memory", "source_type": "local", "num_rows": 3}]
    }))
    .await;
    t.cell(json!({"op": "focus-cell", "cell_id": "c1"})).await;

    let df = t.bridge.variables().get(&nb, "df").await.unwrap();
    assert_eq!(df.value.as_deref(), Some("DataFrame(3x2)"));
    assert_eq!(df.used_by, vec![CellId::new("c2")]);
    let tables = t.bridge.datasources().tables(&nb).await;
    assert_eq!(tables[0].num_rows, Some(3));
    assert!(t.host.events().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_malformed_and_failed_operations_do_not_stop_bridge() {
    let t = start();

    t.session.unbounded_send(json!({"garbage": true})).unwrap();
    t.cell(json!({"op": "cell-op", "cell_id": "c1", "status": "queued"}))
        .await;
    t.cell(json!({"op": "cell-op", "cell_id": "c2", "status": "queued", "run_id": "r2"}))
        .await;

    let prompts = t
        .host
        .count(|e| matches!(e, HostEvent::Prompt { .. }));
    assert_eq!(prompts, 1);
    assert_eq!(t.host.tokens_for("c2").len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_enqueue_and_custom_finalize_delay() {
    let t = start_with(BridgeConfig {
        finalize_delay_ms: 300,
        ..Default::default()
    });
    assert_eq!(t.bridge.config().finalize_delay_ms, 300);

    let op = |value: Value| MarimoOperation::new(NB, Operation::from_value(value).unwrap());
    t.bridge
        .enqueue(op(json!({"op": "cell-op", "cell_id": "c1", "status": "queued", "run_id": "r1"})))
        .unwrap();
    t.bridge
        .enqueue(op(json!({"op": "cell-op", "cell_id": "c1", "status": "running", "timestamp": 2.0})))
        .unwrap();
    t.bridge
        .enqueue(op(json!({"op": "cell-op", "cell_id": "c1", "status": "idle", "timestamp": 3.0})))
        .unwrap();

    sleep(Duration::from_millis(200)).await;
    let token = t.host.tokens_for("c1")[0];
    assert!(t.ends(token).is_empty());

    sleep(Duration::from_millis(200)).await;
    assert_eq!(t.ends(token), vec![(true, Some(3000))]);
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_fails_open_executions() {
    let mut t = start();

    t.cell(json!({"op": "cell-op", "cell_id": "c1", "status": "queued", "run_id": "r1"}))
        .await;
    t.cell(json!({"op": "cell-op", "cell_id": "c1", "status": "running", "timestamp": 1.0}))
        .await;

    t.bridge.shutdown();
    t.bridge.shutdown();

    let token = t.host.tokens_for("c1")[0];
    assert_eq!(t.ends(token), vec![(false, None)]);
    assert!(t.bridge.registry().is_empty());
}
