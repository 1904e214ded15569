//! Data sources, tables and previews reported by the kernel, per notebook.

use std::collections::HashMap;

use marimo_protocol::{DataSourceConnection, DataTable, NotebookUri};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::RwLock;

/// Result of a SQL table or table-list preview request.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SqlPreview {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub table: Option<Value>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tables: Vec<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Summary and chart for one column of a table.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ColumnPreview {
    pub table_name: String,
    pub column_name: String,
    pub chart_spec: Option<Value>,
    pub chart_code: Option<String>,
    pub summary: Option<Value>,
    pub error: Option<String>,
}

#[derive(Default)]
struct NotebookData {
    connections: HashMap<String, DataSourceConnection>,
    tables: HashMap<String, DataTable>,
    sql_previews: HashMap<String, SqlPreview>,
    column_previews: HashMap<(String, String), ColumnPreview>,
}

/// Thread-safe per-notebook data source state.
pub struct DatasourcesStore {
    notebooks: RwLock<HashMap<NotebookUri, NotebookData>>,
}

impl DatasourcesStore {
    pub fn new() -> Self {
        Self {
            notebooks: RwLock::new(HashMap::new()),
        }
    }

    /// Handle `data-source-connections`: merge by connection name.
    pub async fn merge_connections(
        &self,
        notebook: &NotebookUri,
        connections: &[DataSourceConnection],
    ) {
        let mut notebooks = self.notebooks.write().await;
        let data = notebooks.entry(notebook.clone()).or_default();
        for connection in connections {
            data.connections
                .insert(connection.name.clone(), connection.clone());
        }
    }

    /// Handle `datasets`: merge tables by name.
    ///
    /// With `clear_channel`, every table of that source type is dropped first.
    pub async fn merge_tables(
        &self,
        notebook: &NotebookUri,
        tables: &[DataTable],
        clear_channel: Option<&str>,
    ) {
        let mut notebooks = self.notebooks.write().await;
        let data = notebooks.entry(notebook.clone()).or_default();
        if let Some(channel) = clear_channel {
            data.tables.retain(|_, table| table.source_type != channel);
        }
        for table in tables {
            data.tables.insert(table.name.clone(), table.clone());
        }
    }

    /// Handle `sql-table-preview` and `sql-table-list-preview`.
    pub async fn record_sql_preview(
        &self,
        notebook: &NotebookUri,
        request_id: &str,
        preview: SqlPreview,
    ) {
        let mut notebooks = self.notebooks.write().await;
        notebooks
            .entry(notebook.clone())
            .or_default()
            .sql_previews
            .insert(request_id.to_string(), preview);
    }

    /// Handle `data-column-preview`.
    pub async fn record_column_preview(&self, notebook: &NotebookUri, preview: ColumnPreview) {
        let mut notebooks = self.notebooks.write().await;
        let key = (preview.table_name.clone(), preview.column_name.clone());
        notebooks
            .entry(notebook.clone())
            .or_default()
            .column_previews
            .insert(key, preview);
    }

    /// Connections of a notebook, sorted by name.
    pub async fn connections(&self, notebook: &NotebookUri) -> Vec<DataSourceConnection> {
        let notebooks = self.notebooks.read().await;
        let mut connections: Vec<_> = notebooks
            .get(notebook)
            .map(|d| d.connections.values().cloned().collect())
            .unwrap_or_default();
        connections.sort_by(|a, b| a.name.cmp(&b.name));
        connections
    }

    /// Tables of a notebook, sorted by name.
    pub async fn tables(&self, notebook: &NotebookUri) -> Vec<DataTable> {
        let notebooks = self.notebooks.read().await;
        let mut tables: Vec<_> = notebooks
            .get(notebook)
            .map(|d| d.tables.values().cloned().collect())
            .unwrap_or_default();
        tables.sort_by(|a, b| a.name.cmp(&b.name));
        tables
    }

    pub async fn sql_preview(&self, notebook: &NotebookUri, request_id: &str) -> Option<SqlPreview> {
        let notebooks = self.notebooks.read().await;
        notebooks
            .get(notebook)
            .and_then(|d| d.sql_previews.get(request_id))
            .cloned()
    }

    pub async fn column_preview(
        &self,
        notebook: &NotebookUri,
        table_name: &str,
        column_name: &str,
    ) -> Option<ColumnPreview> {
        let notebooks = self.notebooks.read().await;
        notebooks
            .get(notebook)
            .and_then(|d| {
                d.column_previews
                    .get(&(table_name.to_string(), column_name.to_string()))
            })
            .cloned()
    }

    pub async fn clear(&self, notebook: &NotebookUri) {
        let mut notebooks = self.notebooks.write().await;
        notebooks.remove(notebook);
    }
}

impl Default for DatasourcesStore {
    fn default() -> Self {
        Self::new()
    }
}
