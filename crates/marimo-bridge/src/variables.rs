//! Variable state reported by the kernel, per notebook.
//!
//! The kernel sends two kinds of updates:
//! - `variables`: the full list of declared variables with the cells that
//!   declare and use them
//! - `variable-values`: display values and datatypes for some variables
//!
//! The two arrive independently. A declaration list never wipes the values
//! of variables that are still declared.

use std::collections::HashMap;

use marimo_protocol::{CellId, NotebookUri, VariableDeclaration, VariableValue};
use serde::Serialize;
use tokio::sync::RwLock;

/// What the bridge knows about one variable.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Variable {
    pub name: String,
    pub declared_by: Vec<CellId>,
    pub used_by: Vec<CellId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub datatype: Option<String>,
}

/// Thread-safe per-notebook variable table.
pub struct VariablesStore {
    notebooks: RwLock<HashMap<NotebookUri, HashMap<String, Variable>>>,
}

impl VariablesStore {
    pub fn new() -> Self {
        Self {
            notebooks: RwLock::new(HashMap::new()),
        }
    }

    /// Handle a `variables` operation: replace the declaration list.
    pub async fn set_declarations(
        &self,
        notebook: &NotebookUri,
        declarations: &[VariableDeclaration],
    ) {
        let mut notebooks = self.notebooks.write().await;
        let previous = notebooks.remove(notebook).unwrap_or_default();

        let next = declarations
            .iter()
            .map(|decl| {
                let known = previous.get(&decl.name);
                let variable = Variable {
                    name: decl.name.clone(),
                    declared_by: decl.declared_by.clone(),
                    used_by: decl.used_by.clone(),
                    value: known.and_then(|v| v.value.clone()),
                    datatype: known.and_then(|v| v.datatype.clone()),
                };
                (decl.name.clone(), variable)
            })
            .collect();

        notebooks.insert(notebook.clone(), next);
    }

    /// Handle a `variable-values` operation: update values in place.
    ///
    /// Values for names not yet declared are kept; the declaration usually
    /// follows shortly.
    pub async fn set_values(&self, notebook: &NotebookUri, values: &[VariableValue]) {
        let mut notebooks = self.notebooks.write().await;
        let table = notebooks.entry(notebook.clone()).or_default();

        for value in values {
            let variable = table
                .entry(value.name.clone())
                .or_insert_with(|| Variable {
                    name: value.name.clone(),
                    ..Default::default()
                });
            variable.value = value.value.clone();
            variable.datatype = value.datatype.clone();
        }
    }

    /// All variables of a notebook, sorted by name.
    pub async fn variables(&self, notebook: &NotebookUri) -> Vec<Variable> {
        let notebooks = self.notebooks.read().await;
        let mut variables: Vec<_> = notebooks
            .get(notebook)
            .map(|table| table.values().cloned().collect())
            .unwrap_or_default();
        variables.sort_by(|a, b| a.name.cmp(&b.name));
        variables
    }

    pub async fn get(&self, notebook: &NotebookUri, name: &str) -> Option<Variable> {
        let notebooks = self.notebooks.read().await;
        notebooks.get(notebook).and_then(|t| t.get(name)).cloned()
    }

    /// Forget everything about a notebook (kernel restart or close).
    pub async fn clear(&self, notebook: &NotebookUri) {
        let mut notebooks = self.notebooks.write().await;
        notebooks.remove(notebook);
    }
}

impl Default for VariablesStore {
    fn default() -> Self {
        Self::new()
    }
}
