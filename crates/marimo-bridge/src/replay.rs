//! Replaying recorded kernel operations against a recording host.

use std::io::BufRead;
use std::sync::Arc;
use std::time::Duration;

use log::warn;
use serde_json::Value;

use crate::bridge::Bridge;
use crate::config::BridgeConfig;
use crate::dispatch::HostServices;
use crate::error::Result;
use crate::recording::{HostEvent, RecordingHost};
use crate::transport::ChannelTransport;

/// Parse one JSON payload per line. Blank lines are skipped; lines that are
/// not JSON are logged and skipped.
pub fn read_payloads(reader: impl BufRead) -> Result<Vec<Value>> {
    let mut payloads = Vec::new();
    for (index, line) in reader.lines().enumerate() {
        let line = line?;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match serde_json::from_str(line) {
            Ok(value) => payloads.push(value),
            Err(e) => warn!("[bridge] Skipping line {}: {}", index + 1, e),
        }
    }
    Ok(payloads)
}

/// Feed `payloads` through a bridge as one kernel session, wait `settle`
/// for timers, shut down and return the host calls that were made.
pub async fn replay(payloads: Vec<Value>, config: BridgeConfig, settle: Duration) -> Vec<HostEvent> {
    let host = RecordingHost::new();
    let transport = ChannelTransport::new();
    let session = transport.open_session();

    let mut bridge = Bridge::start(
        config,
        transport.clone(),
        HostServices::from_host(Arc::new(host.clone())),
    );

    for payload in payloads {
        if session.unbounded_send(payload).is_err() {
            break;
        }
    }
    drop(session);

    tokio::time::sleep(settle).await;
    bridge.shutdown();
    host.events()
}
