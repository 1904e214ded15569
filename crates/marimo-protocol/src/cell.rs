//! `cell-op` payloads: per-cell status, output and console updates.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::ids::{CellId, RunId};

/// Mimetype used for marimo error payloads (a JSON array of error objects).
pub const MARIMO_ERROR_MIMETYPE: &str = "application/vnd.marimo+error";

/// Runtime status reported by the kernel for a cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RuntimeStatus {
    Queued,
    Running,
    Idle,
    DisabledTransitively,
    /// Any status this build does not know about.
    #[serde(other)]
    Unknown,
}

impl std::fmt::Display for RuntimeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RuntimeStatus::Queued => write!(f, "queued"),
            RuntimeStatus::Running => write!(f, "running"),
            RuntimeStatus::Idle => write!(f, "idle"),
            RuntimeStatus::DisabledTransitively => write!(f, "disabled-transitively"),
            RuntimeStatus::Unknown => write!(f, "unknown"),
        }
    }
}

/// Channel an output was written to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CellChannel {
    Output,
    #[serde(rename = "marimo-error", alias = "error")]
    MarimoError,
    Stdout,
    Stderr,
    Stdin,
    Pdb,
    Media,
    #[serde(other)]
    Unknown,
}

/// A single output: the cell's primary output or one console entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputMessage {
    pub channel: CellChannel,
    pub mimetype: String,
    /// Either a string or structured JSON, depending on the mimetype.
    #[serde(default)]
    pub data: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<f64>,
}

impl OutputMessage {
    pub fn new(channel: CellChannel, mimetype: impl Into<String>, data: impl Into<Value>) -> Self {
        Self {
            channel,
            mimetype: mimetype.into(),
            data: data.into(),
            timestamp: None,
        }
    }

    /// Plain-text console line on the given channel.
    pub fn text(channel: CellChannel, text: impl Into<String>) -> Self {
        Self::new(channel, "text/plain", Value::String(text.into()))
    }

    pub fn is_error(&self) -> bool {
        self.channel == CellChannel::MarimoError
    }

    /// True when the output carries no displayable content.
    pub fn is_empty(&self) -> bool {
        match &self.data {
            Value::Null => true,
            Value::String(s) => s.is_empty(),
            Value::Array(items) => items.is_empty(),
            Value::Object(map) => map.is_empty(),
            _ => false,
        }
    }

    /// True when this is an error output reporting a user interruption.
    pub fn is_interruption(&self) -> bool {
        self.is_error()
            && self.data.as_array().is_some_and(|errors| {
                errors
                    .iter()
                    .any(|e| e.get("type").and_then(Value::as_str) == Some("interruption"))
            })
    }

    /// The payload as text: strings verbatim, anything else as compact JSON.
    pub fn data_as_text(&self) -> String {
        match &self.data {
            Value::String(s) => s.clone(),
            Value::Null => String::new(),
            other => other.to_string(),
        }
    }
}

/// Console field of a cell message: the kernel sends either one entry or a list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Console {
    Many(Vec<OutputMessage>),
    One(OutputMessage),
}

/// A `cell-op` notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CellMessage {
    pub cell_id: CellId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_id: Option<RunId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<RuntimeStatus>,
    /// Seconds since the epoch, as reported by the kernel.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<OutputMessage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub console: Option<Console>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stale_inputs: Option<bool>,
}

impl CellMessage {
    /// A message with only a cell id; use the `with_*` builders to fill it in.
    pub fn new(cell_id: impl Into<CellId>) -> Self {
        Self {
            cell_id: cell_id.into(),
            run_id: None,
            status: None,
            timestamp: None,
            output: None,
            console: None,
            stale_inputs: None,
        }
    }

    pub fn with_status(mut self, status: RuntimeStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_run_id(mut self, run_id: impl Into<RunId>) -> Self {
        self.run_id = Some(run_id.into());
        self
    }

    pub fn with_timestamp(mut self, timestamp: f64) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    pub fn with_output(mut self, output: OutputMessage) -> Self {
        self.output = Some(output);
        self
    }

    pub fn with_console(mut self, console: Vec<OutputMessage>) -> Self {
        self.console = Some(Console::Many(console));
        self
    }

    pub fn with_stale_inputs(mut self, stale: bool) -> Self {
        self.stale_inputs = Some(stale);
        self
    }
}
