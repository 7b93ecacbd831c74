//! Runs the external ETL job (`ethereumetl export_origin` by default) as a
//! child process.
//!
//! The child writes into `*.partial` files. Only after it exits successfully
//! are the partial files renamed onto the well-known artifact paths, so a
//! crashed, killed, or timed-out run never leaves a complete-looking artifact.
//! Stale artifacts from a previous tick are removed before every run.

use super::{DatasetKind, ExtractionDelegate, ExtractionOutput, ExtractionRequest, OutputDataset};
use crate::error::ExtractionError;
use crate::runtime::config::SyncConfig;
use anyhow::{bail, Result};
use futures::future::BoxFuture;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;

const EXPORT_SUBCOMMAND: &str = "export_origin";
const PARTIAL_SUFFIX: &str = ".partial";
const STDERR_TAIL_BYTES: usize = 2048;

#[derive(Debug, Clone)]
pub struct CommandExtractor {
    program: String,
    args: Vec<String>,
    provider_url: String,
    output_dir: PathBuf,
}

impl ExtractionDelegate for CommandExtractor {
    fn extract<'a>(
        &'a self,
        request: &'a ExtractionRequest,
    ) -> BoxFuture<'a, Result<ExtractionOutput, ExtractionError>> {
        Box::pin(self.run(request))
    }
}

impl CommandExtractor {
    /// `command` is the program followed by any leading arguments.
    pub fn new(
        command: &[String],
        provider_url: impl Into<String>,
        output_dir: impl Into<PathBuf>,
    ) -> Result<Self> {
        let Some((program, args)) = command.split_first() else {
            bail!("extraction command cannot be empty");
        };

        let extractor = Self {
            program: program.clone(),
            args: args.to_vec(),
            provider_url: provider_url.into(),
            output_dir: output_dir.into(),
        };

        for kind in DatasetKind::ALL {
            tracing::info!(
                dataset = %kind,
                path = %extractor.artifact_path(kind).display(),
                "job output file set"
            );
        }

        Ok(extractor)
    }

    pub fn from_config(config: &SyncConfig) -> Result<Self> {
        Self::new(
            config.extract_command(),
            config.provider_url(),
            config.extract_output_dir(),
        )
    }

    /// Final location of the artifact for `kind`.
    pub fn artifact_path(&self, kind: DatasetKind) -> PathBuf {
        self.output_dir.join(kind.file_name())
    }

    fn partial_path(&self, kind: DatasetKind) -> PathBuf {
        self.output_dir
            .join(format!("{}{PARTIAL_SUFFIX}", kind.file_name()))
    }

    async fn run(&self, request: &ExtractionRequest) -> Result<ExtractionOutput, ExtractionError> {
        tokio::fs::create_dir_all(&self.output_dir)
            .await
            .map_err(|source| ExtractionError::Artifact {
                path: self.output_dir.clone(),
                source,
            })?;
        self.clear_artifacts().await?;

        let listings_partial = self.partial_path(DatasetKind::Listings);
        let products_partial = self.partial_path(DatasetKind::Products);

        tracing::info!(
            start = request.range.start(),
            end = request.range.end(),
            batch_size = request.batch_size,
            max_workers = request.max_workers,
            program = %self.program,
            "running extraction job"
        );

        let output = Command::new(&self.program)
            .args(&self.args)
            .arg(EXPORT_SUBCOMMAND)
            .arg("--start-block")
            .arg(request.range.start().to_string())
            .arg("--end-block")
            .arg(request.range.end().to_string())
            .arg("--batch-size")
            .arg(request.batch_size.to_string())
            .arg("--max-workers")
            .arg(request.max_workers.to_string())
            .arg("--provider-uri")
            .arg(&self.provider_url)
            .arg("--marketplace-output")
            .arg(&listings_partial)
            .arg("--shop-output")
            .arg(&products_partial)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|source| ExtractionError::Spawn {
                program: self.program.clone(),
                source,
            })?;

        if !output.status.success() {
            self.remove_partials().await;
            return Err(ExtractionError::Failed {
                status: output.status.to_string(),
                stderr: stderr_tail(&output.stderr),
            });
        }

        let mut datasets = Vec::with_capacity(DatasetKind::ALL.len());
        for kind in DatasetKind::ALL {
            let partial = self.partial_path(kind);
            let artifact = self.artifact_path(kind);
            match tokio::fs::rename(&partial, &artifact).await {
                Ok(()) => datasets.push(OutputDataset::new(kind, artifact)),
                Err(err) if err.kind() == ErrorKind::NotFound => {
                    tracing::debug!(dataset = %kind, "extraction produced no artifact");
                }
                Err(source) => {
                    self.remove_partials().await;
                    self.clear_artifacts().await.ok();
                    return Err(ExtractionError::Artifact {
                        path: artifact,
                        source,
                    });
                }
            }
        }

        tracing::info!(artifacts = datasets.len(), "extraction done");
        Ok(ExtractionOutput::new(datasets))
    }

    async fn clear_artifacts(&self) -> Result<(), ExtractionError> {
        for kind in DatasetKind::ALL {
            for path in [self.artifact_path(kind), self.partial_path(kind)] {
                remove_if_exists(&path)
                    .await
                    .map_err(|source| ExtractionError::Artifact { path, source })?;
            }
        }
        Ok(())
    }

    async fn remove_partials(&self) {
        for kind in DatasetKind::ALL {
            let path = self.partial_path(kind);
            if let Err(err) = remove_if_exists(&path).await {
                tracing::warn!(path = %path.display(), error = %err, "failed to remove partial artifact");
            }
        }
    }
}

async fn remove_if_exists(path: &Path) -> std::io::Result<()> {
    match tokio::fs::remove_file(path).await {
        Err(err) if err.kind() != ErrorKind::NotFound => Err(err),
        _ => Ok(()),
    }
}

fn stderr_tail(stderr: &[u8]) -> String {
    let text = String::from_utf8_lossy(stderr);
    let trimmed = text.trim();
    let mut cut = trimmed.len().saturating_sub(STDERR_TAIL_BYTES);
    while !trimmed.is_char_boundary(cut) {
        cut += 1;
    }
    trimmed[cut..].to_owned()
}
