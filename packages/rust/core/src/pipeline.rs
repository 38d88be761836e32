//! Shared transform stage: items → processed items under one instruction.
//!
//! Used by both the scheduled ingestion cycle and the manual batch runner.

use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, error, info, instrument, warn};

use sundew_shared::{FailurePolicy, Item, ItemId, ProcessedItem, Result, TransformerConfig};

use crate::transform::Transformer;

/// How a batch is driven through the transformer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransformSettings {
    /// Minimum time between the starts of consecutive transform calls.
    pub spacing: Duration,
    pub on_failure: FailurePolicy,
}

impl Default for TransformSettings {
    fn default() -> Self {
        Self::from(&TransformerConfig::default())
    }
}

impl From<&TransformerConfig> for TransformSettings {
    fn from(config: &TransformerConfig) -> Self {
        Self {
            spacing: config.spacing(),
            on_failure: config.on_failure,
        }
    }
}

// ---------------------------------------------------------------------------
// Progress trait
// ---------------------------------------------------------------------------

/// Progress callback for batch transformation.
pub trait TransformProgress: Send + Sync {
    /// Called once before the first item.
    fn started(&self, total: usize);
    /// Called after each item, whether it was transformed or skipped.
    fn item_done(&self, current: usize, total: usize, id: &ItemId);
    /// Called once after the last item.
    fn finished(&self, transformed: usize, skipped: usize);
}

/// No-op progress for the daemon path and tests.
pub struct SilentProgress;

impl TransformProgress for SilentProgress {
    fn started(&self, _total: usize) {}
    fn item_done(&self, _current: usize, _total: usize, _id: &ItemId) {}
    fn finished(&self, _transformed: usize, _skipped: usize) {}
}

/// Transform `items` sequentially, in order.
///
/// Under [`FailurePolicy::Halt`] the first failure is returned and nothing
/// after it is attempted. Under [`FailurePolicy::SkipItem`] the failed item
/// is dropped from the output and the batch continues.
#[instrument(skip_all, fields(items = items.len()))]
pub async fn transform_batch(
    transformer: &dyn Transformer,
    items: &[Item],
    instruction: &str,
    settings: &TransformSettings,
    progress: &dyn TransformProgress,
) -> Result<Vec<ProcessedItem>> {
    let total = items.len();
    progress.started(total);

    let mut processed = Vec::with_capacity(total);
    let mut skipped = 0usize;
    let mut last_start: Option<Instant> = None;

    for (i, item) in items.iter().enumerate() {
        if let Some(prev) = last_start {
            tokio::time::sleep_until(prev + settings.spacing).await;
        }
        last_start = Some(Instant::now());

        match transformer.transform(item, instruction).await {
            Ok(p) => {
                debug!(item_id = %item.id, "item transformed");
                processed.push(p);
            }
            Err(e) => match settings.on_failure {
                FailurePolicy::Halt => {
                    error!(item_id = %item.id, error = %e, "transformation failed, halting");
                    return Err(e);
                }
                FailurePolicy::SkipItem => {
                    warn!(item_id = %item.id, error = %e, "transformation failed, skipping item");
                    skipped += 1;
                }
            },
        }
        progress.item_done(i + 1, total, &item.id);
    }

    progress.finished(processed.len(), skipped);
    info!(transformed = processed.len(), skipped, "batch transformed");
    Ok(processed)
}
