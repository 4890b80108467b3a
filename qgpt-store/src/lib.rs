use std::path::PathBuf;

use qgpt_types::{SqlExample, TableSchema, Workspace};
use thiserror::Error;

pub mod catalog;
pub use catalog::{Catalog, CatalogSummary, WorkspaceSummary};

pub mod fixtures;
pub use fixtures::FixtureDir;

pub mod vector;
pub use vector::{cosine_similarity, Hit, VectorIndex};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("cannot read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("cannot parse {path}: {source}")]
    Yaml {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
}

/// The three collections a catalog is built from.
#[derive(Clone, Debug, Default)]
pub struct CatalogData {
    pub workspaces: Vec<Workspace>,
    pub tables: Vec<TableSchema>,
    pub examples: Vec<SqlExample>,
}

/// Supplier of catalog data: fixture files, a live schema exporter, a test.
///
/// Called once before any pipeline run.
pub trait CatalogSource {
    fn load(&self) -> Result<CatalogData, StoreError>;
}

/// Source that hands out data already in memory.
pub struct StaticSource(pub CatalogData);

impl CatalogSource for StaticSource {
    fn load(&self) -> Result<CatalogData, StoreError> {
        Ok(self.0.clone())
    }
}
