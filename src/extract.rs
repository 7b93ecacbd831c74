//! Extraction seam: turns a block range into two newline-delimited JSON
//! datasets (marketplace listings and shop products).

pub mod command;

pub use command::CommandExtractor;

use crate::error::ExtractionError;
use crate::sync::window::BlockRange;
use crate::warehouse::schema::{DatasetSchema, LISTINGS_SCHEMA, PRODUCTS_SCHEMA};
use futures::future::BoxFuture;
use serde::Serialize;
use std::fmt;
use std::path::{Path, PathBuf};

/// Record kinds produced by one extraction run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DatasetKind {
    Listings,
    Products,
}

impl DatasetKind {
    pub const ALL: [DatasetKind; 2] = [DatasetKind::Listings, DatasetKind::Products];

    pub fn as_str(self) -> &'static str {
        match self {
            DatasetKind::Listings => "listings",
            DatasetKind::Products => "products",
        }
    }

    /// Well-known artifact name inside the extraction output directory.
    pub fn file_name(self) -> &'static str {
        match self {
            DatasetKind::Listings => "marketplace.json",
            DatasetKind::Products => "dshop.json",
        }
    }

    pub fn schema(self) -> &'static DatasetSchema {
        match self {
            DatasetKind::Listings => &LISTINGS_SCHEMA,
            DatasetKind::Products => &PRODUCTS_SCHEMA,
        }
    }
}

impl fmt::Display for DatasetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Parameters forwarded verbatim to the extraction delegate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExtractionRequest {
    pub range: BlockRange,
    pub batch_size: usize,
    pub max_workers: usize,
}

/// A fully written artifact for one dataset kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputDataset {
    kind: DatasetKind,
    path: PathBuf,
}

impl OutputDataset {
    pub fn new(kind: DatasetKind, path: impl Into<PathBuf>) -> Self {
        Self {
            kind,
            path: path.into(),
        }
    }

    pub fn kind(&self) -> DatasetKind {
        self.kind
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Artifacts left behind by a successful extraction. A kind with no entry
/// produced no artifact at all, which loads as zero rows.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtractionOutput {
    datasets: Vec<OutputDataset>,
}

impl ExtractionOutput {
    pub fn new(datasets: Vec<OutputDataset>) -> Self {
        Self { datasets }
    }

    pub fn dataset(&self, kind: DatasetKind) -> Option<&OutputDataset> {
        self.datasets.iter().find(|dataset| dataset.kind == kind)
    }

    pub fn datasets(&self) -> &[OutputDataset] {
        &self.datasets
    }
}

/// External batch job that extracts records for a block range.
///
/// The call resolves only once the whole range has been processed. It must be
/// safe to repeat with the same range, and on failure it must not leave an
/// artifact that looks complete.
pub trait ExtractionDelegate: Send + Sync {
    fn extract<'a>(
        &'a self,
        request: &'a ExtractionRequest,
    ) -> BoxFuture<'a, Result<ExtractionOutput, ExtractionError>>;
}
