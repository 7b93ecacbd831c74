//! Warehouse seam: append one extracted dataset to a destination table.

pub mod bigquery;
pub mod schema;
pub mod token;

pub use bigquery::{BigQueryLoader, BigQueryOptions};
pub use schema::{DatasetSchema, FieldMode, FieldType, SchemaField};
pub use token::TokenSource;

use crate::error::LoadError;
use anyhow::{bail, Result};
use futures::future::BoxFuture;
use serde::Serialize;
use std::fmt;
use std::path::Path;
use std::str::FromStr;

/// Fully qualified `project.dataset.table` identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct TableId {
    pub project: String,
    pub dataset: String,
    pub table: String,
}

impl FromStr for TableId {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        let parts: Vec<&str> = value.trim().split('.').collect();
        let [project, dataset, table] = parts.as_slice() else {
            bail!("table id {value:?} must look like project.dataset.table");
        };
        if [project, dataset, table].iter().any(|part| part.is_empty()) {
            bail!("table id {value:?} has an empty component");
        }
        Ok(Self {
            project: (*project).to_owned(),
            dataset: (*dataset).to_owned(),
            table: (*table).to_owned(),
        })
    }
}

impl fmt::Display for TableId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.project, self.dataset, self.table)
    }
}

/// Uploads a completed dataset and waits for the warehouse to finish.
///
/// An absent or empty artifact loads as zero rows without contacting the
/// warehouse. Loads append; repeating one duplicates its rows.
pub trait WarehouseLoader: Send + Sync {
    fn load<'a>(
        &'a self,
        schema: &'static DatasetSchema,
        location: &'a Path,
        table: &'a TableId,
    ) -> BoxFuture<'a, Result<u64, LoadError>>;
}
