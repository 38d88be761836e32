//! Fetched-batch archive and the manual batch runner.
//!
//! The daemon archives every non-empty fetch as
//! `<dir>/<group>_<account>_posts.json`, so an account listed in two groups
//! keeps one file per group.
//! [`ManualBatchRunner`] replays such a directory through the transform and
//! save stages without consulting checkpoints.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{info, instrument, warn};

use sundew_output::OutputSink;
use sundew_shared::{AccountGroup, Item, Result, SundewError};

use crate::pipeline::{TransformProgress, TransformSettings, transform_batch};
use crate::transform::Transformer;

/// Writes fetched batches for later replay.
#[derive(Debug, Clone)]
pub struct BatchArchive {
    dir: PathBuf,
}

impl BatchArchive {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Overwrite the batch file for `account` within `group` with `items`.
    pub fn write(&self, group: &str, account: &str, items: &[Item]) -> Result<PathBuf> {
        std::fs::create_dir_all(&self.dir).map_err(|e| SundewError::io(&self.dir, e))?;
        let path = self.dir.join(format!("{group}_{account}_posts.json"));
        let json = serde_json::to_string_pretty(items)
            .map_err(|e| SundewError::validation(e.to_string()))?;
        std::fs::write(&path, json).map_err(|e| SundewError::io(&path, e))?;
        info!(group, account, items = items.len(), path = %path.display(), "stored fetched batch");
        Ok(path)
    }
}

/// Read and concatenate every `*.json` batch file in `dir`, by file name.
///
/// A missing directory yields no items. Files that are not a JSON array of
/// items are skipped with a warning.
pub fn read_batches(dir: &Path) -> Result<Vec<Item>> {
    if !dir.exists() {
        info!(dir = %dir.display(), "batch directory does not exist");
        return Ok(Vec::new());
    }

    let mut files: Vec<PathBuf> = std::fs::read_dir(dir)
        .map_err(|e| SundewError::io(dir, e))?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| p.is_file() && p.extension().is_some_and(|ext| ext == "json"))
        .collect();
    files.sort();

    let mut items = Vec::new();
    for path in files {
        let content = match std::fs::read_to_string(&path) {
            Ok(c) => c,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "unreadable batch file, skipping");
                continue;
            }
        };
        match serde_json::from_str::<Vec<Item>>(&content) {
            Ok(batch) => items.extend(batch),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "malformed batch file, skipping");
            }
        }
    }
    Ok(items)
}

/// Result of one manual run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchSummary {
    /// Items read from the directory.
    pub read: usize,
    /// Processed items handed to the sink.
    pub saved: usize,
}

/// One-shot replay of archived batches.
pub struct ManualBatchRunner {
    transformer: Arc<dyn Transformer>,
    sink: Arc<dyn OutputSink>,
    settings: TransformSettings,
}

impl ManualBatchRunner {
    pub fn new(
        transformer: Arc<dyn Transformer>,
        sink: Arc<dyn OutputSink>,
        settings: TransformSettings,
    ) -> Self {
        Self {
            transformer,
            sink,
            settings,
        }
    }

    /// Transform and save everything under `dir` with `group`'s instruction.
    #[instrument(skip_all, fields(group = %group.name, dir = %dir.display()))]
    pub async fn run(
        &self,
        group: &AccountGroup,
        dir: &Path,
        progress: &dyn TransformProgress,
    ) -> Result<BatchSummary> {
        let items = read_batches(dir)?;
        if items.is_empty() {
            info!("no archived items to process");
            return Ok(BatchSummary::default());
        }

        info!(items = items.len(), "processing archived items");
        let processed = transform_batch(
            self.transformer.as_ref(),
            &items,
            &group.instruction,
            &self.settings,
            progress,
        )
        .await?;
        self.sink.save(&processed).await?;

        Ok(BatchSummary {
            read: items.len(),
            saved: processed.len(),
        })
    }
}
