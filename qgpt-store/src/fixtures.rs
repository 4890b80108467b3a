use std::fs;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;

use crate::{CatalogData, CatalogSource, StoreError};

pub const WORKSPACES_FILE: &str = "workspaces.yml";
pub const SCHEMAS_FILE: &str = "schemas.yml";
pub const EXAMPLES_FILE: &str = "sql_examples.yml";

/// Directory of YAML fixtures as written by a schema exporter:
/// `workspaces.yml`, `schemas.yml` and (optionally) `sql_examples.yml`.
pub struct FixtureDir {
    root: PathBuf,
}

impl FixtureDir {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl CatalogSource for FixtureDir {
    fn load(&self) -> Result<CatalogData, StoreError> {
        let examples_path = self.root.join(EXAMPLES_FILE);
        let examples = if examples_path.exists() {
            read_list(&examples_path)?
        } else {
            Vec::new()
        };
        Ok(CatalogData {
            workspaces: read_list(&self.root.join(WORKSPACES_FILE))?,
            tables: read_list(&self.root.join(SCHEMAS_FILE))?,
            examples,
        })
    }
}

fn read_list<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>, StoreError> {
    let text = fs::read_to_string(path).map_err(|source| StoreError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    if text.trim().is_empty() {
        return Ok(Vec::new());
    }
    let rows: Option<Vec<T>> = serde_yaml::from_str(&text).map_err(|source| StoreError::Yaml {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(rows.unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Catalog;

    #[test]
    fn missing_examples_file_means_no_examples() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join(WORKSPACES_FILE),
            "- name: Core\n  table_ids: [core.users]\n",
        )
        .unwrap();
        fs::write(
            dir.path().join(SCHEMAS_FILE),
            "- table_id: core.users\n  columns:\n    - name: user_id\n      type: bigint\n",
        )
        .unwrap();

        let catalog = Catalog::load(&FixtureDir::new(dir.path())).unwrap();
        assert_eq!(catalog.workspace_names(), vec!["Core"]);
        assert!(catalog.examples().is_empty());
        let users = catalog.table_by_id("core.users").unwrap();
        assert_eq!(users.columns[0].data_type, "bigint");
        assert!(users.columns[0].description.is_empty());
    }

    #[test]
    fn missing_schema_file_is_an_io_error() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(WORKSPACES_FILE), "[]").unwrap();
        let err = FixtureDir::new(dir.path()).load().unwrap_err();
        assert!(matches!(err, StoreError::Io { .. }));
    }

    #[test]
    fn malformed_yaml_names_the_file() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(WORKSPACES_FILE), "name: [unclosed").unwrap();
        fs::write(dir.path().join(SCHEMAS_FILE), "[]").unwrap();
        let err = FixtureDir::new(dir.path()).load().unwrap_err();
        assert!(err.to_string().contains(WORKSPACES_FILE));
    }
}
