//! Host → kernel commands.
//!
//! Every outbound call is a [`KernelCommand`] envelope: the kernel API name plus
//! the notebook it targets and an opaque inner payload.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::ids::NotebookUri;

/// Kernel API names used by the host side.
pub mod api {
    pub const RUN: &str = "marimo.run";
    pub const INTERRUPT: &str = "marimo.interrupt";
    pub const RESTART: &str = "marimo.restart";
    pub const SET_UI_ELEMENT_VALUE: &str = "marimo.set_ui_element_value";
    pub const FUNCTION_CALL_REQUEST: &str = "marimo.function_call_request";
    pub const UPDATE_WIDGET_MODEL: &str = "marimo.update_widget_model";
}

/// Parameters of a kernel command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandParams {
    #[serde(rename = "notebookUri")]
    pub notebook_uri: NotebookUri,
    pub inner: Value,
}

/// Outbound command envelope, sent through the transport's `execute_command`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KernelCommand {
    pub command: String,
    pub params: CommandParams,
}

impl KernelCommand {
    pub fn new(command: impl Into<String>, notebook_uri: NotebookUri, inner: Value) -> Self {
        Self {
            command: command.into(),
            params: CommandParams {
                notebook_uri,
                inner,
            },
        }
    }
}

/// Commands the UI renderer sends back towards the kernel.
///
/// Serialized as `{"command": "...", "params": {...}}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "command", content = "params", rename_all = "snake_case")]
pub enum RendererCommand {
    SetUiElementValue(Value),
    FunctionCallRequest(Value),
    UpdateWidgetModel(Value),
}

impl RendererCommand {
    /// Wire names of every command, as they appear in the `command` field.
    pub const NAMES: &'static [&'static str] = &[
        "set_ui_element_value",
        "function_call_request",
        "update_widget_model",
    ];

    pub fn is_known(command: &str) -> bool {
        Self::NAMES.contains(&command)
    }

    /// The kernel API this command is forwarded to.
    pub fn kernel_api(&self) -> &'static str {
        match self {
            RendererCommand::SetUiElementValue(_) => api::SET_UI_ELEMENT_VALUE,
            RendererCommand::FunctionCallRequest(_) => api::FUNCTION_CALL_REQUEST,
            RendererCommand::UpdateWidgetModel(_) => api::UPDATE_WIDGET_MODEL,
        }
    }

    /// Wrap this command into an outbound envelope for `notebook_uri`.
    pub fn into_kernel_command(self, notebook_uri: NotebookUri) -> KernelCommand {
        let api = self.kernel_api();
        let inner = match self {
            RendererCommand::SetUiElementValue(params)
            | RendererCommand::FunctionCallRequest(params)
            | RendererCommand::UpdateWidgetModel(params) => params,
        };
        KernelCommand::new(api, notebook_uri, inner)
    }
}
