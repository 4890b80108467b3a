use qgpt_types::{SqlExample, TableSchema, Workspace};
use serde::Serialize;

use crate::{CatalogData, CatalogSource, StoreError};

/// Read-only store of workspaces, table schemas and curated examples.
///
/// Workspace names resolve case-insensitively; table and example ids resolve
/// exactly. Ids a workspace lists but the catalog lacks resolve to nothing.
#[derive(Clone, Debug, Default)]
pub struct Catalog {
    workspaces: Vec<Workspace>,
    tables: Vec<TableSchema>,
    examples: Vec<SqlExample>,
}

#[derive(Clone, Debug, Serialize)]
pub struct WorkspaceSummary {
    pub name: String,
    pub description: String,
    pub tables: usize,
    pub examples: usize,
    /// Table ids listed by the workspace that the catalog does not hold.
    pub missing_tables: Vec<String>,
}

#[derive(Clone, Debug, Serialize)]
pub struct CatalogSummary {
    pub workspaces: Vec<WorkspaceSummary>,
    pub tables: usize,
    pub examples: usize,
}

impl Catalog {
    pub fn new(data: CatalogData) -> Self {
        Self {
            workspaces: data.workspaces,
            tables: data.tables,
            examples: data.examples,
        }
    }

    pub fn load(source: &dyn CatalogSource) -> Result<Self, StoreError> {
        let data = source.load()?;
        tracing::debug!(
            workspaces = data.workspaces.len(),
            tables = data.tables.len(),
            examples = data.examples.len(),
            "catalog loaded"
        );
        Ok(Self::new(data))
    }

    pub fn workspaces(&self) -> &[Workspace] {
        &self.workspaces
    }

    pub fn tables(&self) -> &[TableSchema] {
        &self.tables
    }

    pub fn examples(&self) -> &[SqlExample] {
        &self.examples
    }

    pub fn workspace_names(&self) -> Vec<String> {
        self.workspaces.iter().map(|w| w.name.clone()).collect()
    }

    pub fn workspace_by_name(&self, name: &str) -> Option<&Workspace> {
        self.workspaces
            .iter()
            .find(|w| w.name.eq_ignore_ascii_case(name.trim()))
    }

    /// Tables belonging to any of the named workspaces, in catalog order.
    pub fn tables_for<S: AsRef<str>>(&self, workspace_names: &[S]) -> Vec<&TableSchema> {
        let ids: Vec<&str> = workspace_names
            .iter()
            .filter_map(|n| self.workspace_by_name(n.as_ref()))
            .flat_map(|w| w.table_ids.iter().map(String::as_str))
            .collect();
        self.tables
            .iter()
            .filter(|t| ids.contains(&t.table_id.as_str()))
            .collect()
    }

    pub fn table_by_id(&self, id: &str) -> Option<&TableSchema> {
        self.tables.iter().find(|t| t.table_id == id)
    }

    /// Curated examples belonging to any of the named workspaces, in catalog order.
    pub fn examples_for<S: AsRef<str>>(&self, workspace_names: &[S]) -> Vec<&SqlExample> {
        let ids: Vec<&str> = workspace_names
            .iter()
            .filter_map(|n| self.workspace_by_name(n.as_ref()))
            .flat_map(|w| w.example_ids.iter().map(String::as_str))
            .collect();
        self.examples
            .iter()
            .filter(|ex| ids.contains(&ex.id.as_str()))
            .collect()
    }

    pub fn summary(&self) -> CatalogSummary {
        let workspaces = self
            .workspaces
            .iter()
            .map(|w| {
                let names = [w.name.as_str()];
                WorkspaceSummary {
                    name: w.name.clone(),
                    description: w.description.clone(),
                    tables: self.tables_for(&names).len(),
                    examples: self.examples_for(&names).len(),
                    missing_tables: w
                        .table_ids
                        .iter()
                        .filter(|id| self.table_by_id(id).is_none())
                        .cloned()
                        .collect(),
                }
            })
            .collect();
        CatalogSummary {
            workspaces,
            tables: self.tables.len(),
            examples: self.examples.len(),
        }
    }
}
