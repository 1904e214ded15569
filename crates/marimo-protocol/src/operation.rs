//! Kernel → host operations.
//!
//! The kernel publishes one notification per operation, shaped as
//! `{"notebookUri": "...", "operation": {"op": "cell-op", ...}}`. The `op`
//! field selects the variant; tags this build does not know about decode to
//! [`Operation::Unknown`] instead of failing, so a newer kernel cannot wedge
//! an older extension.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::cell::CellMessage;
use crate::ids::{CellId, NotebookUri};

/// Every `op` tag that decodes to a known [`Operation`] variant.
pub const KNOWN_OPS: &[&str] = &[
    "cell-op",
    "interrupted",
    "missing-package-alert",
    "variables",
    "variable-values",
    "data-source-connections",
    "datasets",
    "sql-table-preview",
    "sql-table-list-preview",
    "data-column-preview",
    "remove-ui-elements",
    "function-call-result",
    "send-ui-element-message",
    "completed-run",
    "update-cell-codes",
    "focus-cell",
];

/// Error decoding an operation payload.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("Operation payload has no \"op\" tag")]
    MissingTag,

    #[error("Malformed operation payload: {0}")]
    Json(#[from] serde_json::Error),
}

/// A variable declaration reported by the kernel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VariableDeclaration {
    pub name: String,
    #[serde(default)]
    pub declared_by: Vec<CellId>,
    #[serde(default)]
    pub used_by: Vec<CellId>,
}

/// A variable's current value preview.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VariableValue {
    pub name: String,
    #[serde(default)]
    pub value: Option<String>,
    #[serde(default)]
    pub datatype: Option<String>,
}

/// A database/engine connection known to the kernel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataSourceConnection {
    pub name: String,
    #[serde(default)]
    pub source: String,
    #[serde(default)]
    pub dialect: String,
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub databases: Value,
}

/// A table or dataframe the kernel can describe.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataTable {
    pub name: String,
    #[serde(default)]
    pub source: String,
    #[serde(default)]
    pub source_type: String,
    #[serde(default)]
    pub num_rows: Option<u64>,
    #[serde(default)]
    pub num_columns: Option<u64>,
    #[serde(default)]
    pub columns: Value,
}

/// The operation carried by a kernel notification, tagged by `op`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "kebab-case")]
pub enum Operation {
    CellOp(CellMessage),
    Interrupted {},
    MissingPackageAlert {
        #[serde(default)]
        packages: Vec<String>,
        #[serde(default)]
        isolated: bool,
    },
    Variables {
        variables: Vec<VariableDeclaration>,
    },
    VariableValues {
        variables: Vec<VariableValue>,
    },
    DataSourceConnections {
        connections: Vec<DataSourceConnection>,
    },
    Datasets {
        tables: Vec<DataTable>,
        #[serde(default)]
        clear_channel: Option<String>,
    },
    SqlTablePreview {
        request_id: String,
        #[serde(default)]
        table: Option<Value>,
        #[serde(default)]
        error: Option<String>,
    },
    SqlTableListPreview {
        request_id: String,
        #[serde(default)]
        tables: Vec<Value>,
        #[serde(default)]
        error: Option<String>,
    },
    DataColumnPreview {
        table_name: String,
        column_name: String,
        #[serde(default)]
        chart_spec: Option<Value>,
        #[serde(default)]
        chart_code: Option<String>,
        #[serde(default)]
        summary: Option<Value>,
        #[serde(default)]
        error: Option<String>,
    },
    RemoveUiElements {
        cell_id: CellId,
    },
    FunctionCallResult {
        function_call_id: String,
        #[serde(default)]
        return_value: Value,
        #[serde(default)]
        status: Value,
    },
    SendUiElementMessage {
        #[serde(default)]
        ui_element: Option<String>,
        #[serde(default)]
        model_id: Option<String>,
        #[serde(default)]
        message: Value,
        #[serde(default)]
        buffers: Vec<String>,
    },
    CompletedRun {},
    UpdateCellCodes {
        #[serde(default)]
        cell_ids: Vec<CellId>,
    },
    FocusCell {
        #[serde(default)]
        cell_id: Option<CellId>,
    },
    /// An `op` tag this build does not recognize.
    #[serde(skip)]
    Unknown { op: String },
}

impl Operation {
    /// Decode an operation payload, mapping unrecognized tags to [`Operation::Unknown`].
    pub fn from_value(value: Value) -> Result<Self, DecodeError> {
        let op = value
            .get("op")
            .and_then(Value::as_str)
            .ok_or(DecodeError::MissingTag)?;
        if !KNOWN_OPS.contains(&op) {
            return Ok(Operation::Unknown { op: op.to_string() });
        }
        Ok(serde_json::from_value(value)?)
    }

    /// The wire tag of this operation.
    pub fn name(&self) -> &str {
        match self {
            Operation::CellOp(_) => "cell-op",
            Operation::Interrupted {} => "interrupted",
            Operation::MissingPackageAlert { .. } => "missing-package-alert",
            Operation::Variables { .. } => "variables",
            Operation::VariableValues { .. } => "variable-values",
            Operation::DataSourceConnections { .. } => "data-source-connections",
            Operation::Datasets { .. } => "datasets",
            Operation::SqlTablePreview { .. } => "sql-table-preview",
            Operation::SqlTableListPreview { .. } => "sql-table-list-preview",
            Operation::DataColumnPreview { .. } => "data-column-preview",
            Operation::RemoveUiElements { .. } => "remove-ui-elements",
            Operation::FunctionCallResult { .. } => "function-call-result",
            Operation::SendUiElementMessage { .. } => "send-ui-element-message",
            Operation::CompletedRun {} => "completed-run",
            Operation::UpdateCellCodes { .. } => "update-cell-codes",
            Operation::FocusCell { .. } => "focus-cell",
            Operation::Unknown { op } => op,
        }
    }
}

/// Wire shape of a kernel operation notification.
#[derive(Deserialize)]
struct RawMarimoOperation {
    #[serde(rename = "notebookUri")]
    notebook_uri: NotebookUri,
    operation: Value,
}

/// One unit of work for the dispatch loop: an operation for a notebook.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawMarimoOperation")]
pub struct MarimoOperation {
    #[serde(rename = "notebookUri")]
    pub notebook_uri: NotebookUri,
    pub operation: Operation,
}

impl MarimoOperation {
    pub fn new(notebook_uri: impl Into<NotebookUri>, operation: Operation) -> Self {
        Self {
            notebook_uri: notebook_uri.into(),
            operation,
        }
    }

    /// Decode a notification payload.
    pub fn from_value(value: Value) -> Result<Self, DecodeError> {
        let raw: RawMarimoOperation = serde_json::from_value(value)?;
        raw.try_into()
    }
}

impl TryFrom<RawMarimoOperation> for MarimoOperation {
    type Error = DecodeError;

    fn try_from(raw: RawMarimoOperation) -> Result<Self, Self::Error> {
        Ok(MarimoOperation {
            notebook_uri: raw.notebook_uri,
            operation: Operation::from_value(raw.operation)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cell::RuntimeStatus;
    use serde_json::json;

    #[test]
    fn test_decode_cell_op() {
        let op = MarimoOperation::from_value(json!({
            "notebookUri": "file:///nb.py",
            "operation": {
                "op": "cell-op",
                "cell_id": "c1",
                "run_id": "r1",
                "status": "queued"
            }
        }))
        .unwrap();

        assert_eq!(op.notebook_uri.as_str(), "file:///nb.py");
        match op.operation {
            Operation::CellOp(msg) => {
                assert_eq!(msg.cell_id.as_str(), "c1");
                assert_eq!(msg.status, Some(RuntimeStatus::Queued));
            }
            other => panic!("unexpected operation: {:?}", other),
        }
    }

    #[test]
    fn test_unknown_tag_is_preserved() {
        let op = Operation::from_value(json!({"op": "startup-logs", "content": "x"})).unwrap();
        assert_eq!(
            op,
            Operation::Unknown {
                op: "startup-logs".to_string()
            }
        );
        assert_eq!(op.name(), "startup-logs");
    }

    #[test]
    fn test_missing_tag_is_an_error() {
        let err = Operation::from_value(json!({"cell_id": "c1"})).unwrap_err();
        assert!(matches!(err, DecodeError::MissingTag));
    }

    #[test]
    fn test_malformed_known_op_is_an_error() {
        let err = Operation::from_value(json!({"op": "remove-ui-elements"})).unwrap_err();
        assert!(matches!(err, DecodeError::Json(_)));
    }

    #[test]
    fn test_ignored_ops_tolerate_extra_fields() {
        let op = Operation::from_value(json!({
            "op": "update-cell-codes",
            "cell_ids": ["a"],
            "codes": ["x = 1"],
            "code_is_stale": false
        }))
        .unwrap();
        assert_eq!(op.name(), "update-cell-codes");

        let op = Operation::from_value(json!({"op": "completed-run", "extra": 1})).unwrap();
        assert_eq!(op, Operation::CompletedRun {});
    }

    #[test]
    fn test_known_ops_match_names() {
        for tag in KNOWN_OPS {
            assert!(tag.chars().all(|c| c.is_ascii_lowercase() || c == '-'));
        }
        let op = Operation::MissingPackageAlert {
            packages: vec!["polars".into()],
            isolated: true,
        };
        let value = serde_json::to_value(&op).unwrap();
        assert_eq!(value["op"], "missing-package-alert");
        assert!(KNOWN_OPS.contains(&op.name()));
    }

    #[test]
    fn test_marimo_operation_deserialize_via_serde() {
        let op: MarimoOperation = serde_json::from_str(
            r#"{"notebookUri": "nb", "operation": {"op": "interrupted"}}"#,
        )
        .unwrap();
        assert_eq!(op.operation, Operation::Interrupted {});
    }
}
