//! Per-account ingestion: fetch since checkpoint, transform, save, advance.
//!
//! The checkpoint for a `(group, account)` pair moves only after the sink
//! accepted the batch, and only forward.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use sundew_output::OutputSink;
use sundew_shared::{AccountGroup, Item, ItemId, Result};
use sundew_source::{ContentSource, FetchOutcome};
use sundew_storage::CheckpointStore;

use crate::backoff::BackoffPolicy;
use crate::batch::BatchArchive;
use crate::pipeline::{SilentProgress, TransformSettings, transform_batch};
use crate::transform::Transformer;

/// Why an account was abandoned for this cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    /// Transient failures outlasted the backoff budget.
    RetriesExhausted { attempts: u32 },
    /// Still rate limited after the allowed cooldowns.
    RateLimited,
    /// The source reported a non-retryable failure.
    FetchFailed(String),
    /// Stop was requested while waiting to retry.
    Cancelled,
    /// Any other non-fatal error (checkpoint storage, etc.).
    Error(String),
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::RetriesExhausted { attempts } => {
                write!(f, "retries exhausted after {attempts} attempts")
            }
            Self::RateLimited => f.write_str("rate limited"),
            Self::FetchFailed(msg) => write!(f, "fetch failed: {msg}"),
            Self::Cancelled => f.write_str("cancelled"),
            Self::Error(msg) => f.write_str(msg),
        }
    }
}

/// What one account run did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccountOutcome {
    /// `items` processed items saved; checkpoint is now `checkpoint`.
    Saved { items: usize, checkpoint: ItemId },
    NoNewItems,
    Skipped { reason: SkipReason },
    /// The sink rejected the batch; checkpoint unchanged.
    SaveFailed { error: String },
}

/// Orchestrates one `(group, account)` pass over the collaborators.
pub struct IngestionCycle {
    source: Arc<dyn ContentSource>,
    transformer: Arc<dyn Transformer>,
    sink: Arc<dyn OutputSink>,
    checkpoints: Arc<dyn CheckpointStore>,
    backoff: BackoffPolicy,
    settings: TransformSettings,
    max_rate_limit_retries: u32,
    archive: Option<BatchArchive>,
}

impl IngestionCycle {
    pub fn new(
        source: Arc<dyn ContentSource>,
        transformer: Arc<dyn Transformer>,
        sink: Arc<dyn OutputSink>,
        checkpoints: Arc<dyn CheckpointStore>,
    ) -> Self {
        Self {
            source,
            transformer,
            sink,
            checkpoints,
            backoff: BackoffPolicy::default(),
            settings: TransformSettings::default(),
            max_rate_limit_retries: 1,
            archive: None,
        }
    }

    pub fn with_backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn with_settings(mut self, settings: TransformSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Cooldowns tolerated per account before it is skipped.
    pub fn with_rate_limit_retries(mut self, retries: u32) -> Self {
        self.max_rate_limit_retries = retries;
        self
    }

    pub fn with_archive(mut self, archive: BatchArchive) -> Self {
        self.archive = Some(archive);
        self
    }

    /// Run one account.
    ///
    /// Fetch failures and save failures come back as outcomes. An `Err` is
    /// either a transform failure under the halt policy (fatal) or a
    /// checkpoint storage failure (not fatal).
    #[instrument(skip_all, fields(group = %group.name, account = %account))]
    pub async fn run_account(
        &self,
        group: &AccountGroup,
        account: &str,
        cancel: &CancellationToken,
    ) -> Result<AccountOutcome> {
        let cursor = self.checkpoints.get(&group.name, account).await?;

        let fetched = match self.fetch(account, cursor.as_ref(), cancel).await {
            Ok(items) => items,
            Err(reason) => {
                warn!(%reason, "skipping account for this cycle");
                return Ok(AccountOutcome::Skipped { reason });
            }
        };

        let total = fetched.len();
        let items: Vec<Item> = fetched
            .into_iter()
            .filter(|item| cursor.as_ref().is_none_or(|c| &item.id > c))
            .collect();
        if items.len() < total {
            warn!(
                dropped = total - items.len(),
                cursor = ?cursor.as_ref().map(ItemId::as_str),
                "source returned items at or below the checkpoint"
            );
        }

        let Some(candidate) = items.iter().map(|i| &i.id).max().cloned() else {
            debug!("no new items");
            return Ok(AccountOutcome::NoNewItems);
        };
        info!(items = items.len(), "fetched new items");

        if let Some(archive) = &self.archive {
            if let Err(e) = archive.write(&group.name, account, &items) {
                warn!(error = %e, "failed to archive fetched batch");
            }
        }

        let processed = transform_batch(
            self.transformer.as_ref(),
            &items,
            &group.instruction,
            &self.settings,
            &SilentProgress,
        )
        .await?;

        if let Err(e) = self.sink.save(&processed).await {
            error!(error = %e, "save failed, checkpoint unchanged");
            return Ok(AccountOutcome::SaveFailed {
                error: e.to_string(),
            });
        }

        if cursor.as_ref().is_none_or(|c| &candidate > c) {
            self.checkpoints
                .set(&group.name, account, &candidate)
                .await?;
        }
        info!(saved = processed.len(), checkpoint = %candidate, "account processed");

        Ok(AccountOutcome::Saved {
            items: processed.len(),
            checkpoint: candidate,
        })
    }

    /// Fetch with transient retries and rate-limit cooldowns.
    async fn fetch(
        &self,
        account: &str,
        cursor: Option<&ItemId>,
        cancel: &CancellationToken,
    ) -> std::result::Result<Vec<Item>, SkipReason> {
        let mut attempt = 0u32;
        let mut cooldowns = 0u32;

        loop {
            let outcome = self.source.fetch_new(account, cursor).await;
            debug!(outcome = outcome.kind(), attempt, cooldowns, "fetch returned");
            match outcome {
                FetchOutcome::Fetched(items) => return Ok(items),
                FetchOutcome::Transient(message) => {
                    let Some(delay) = self.backoff.delay(attempt) else {
                        return Err(SkipReason::RetriesExhausted {
                            attempts: attempt + 1,
                        });
                    };
                    warn!(
                        attempt = attempt + 1,
                        max_attempts = self.backoff.max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %message,
                        "transient fetch failure, backing off"
                    );
                    tokio::select! {
                        _ = cancel.cancelled() => return Err(SkipReason::Cancelled),
                        _ = tokio::time::sleep(delay) => {}
                    }
                    attempt += 1;
                }
                FetchOutcome::RateLimited { partial, cooldown } => {
                    warn!(
                        partial = partial.len(),
                        cooldown_secs = cooldown.as_secs(),
                        "rate limited, cooling down"
                    );
                    cool_down(cooldown).await;
                    if cooldowns >= self.max_rate_limit_retries {
                        return Err(SkipReason::RateLimited);
                    }
                    cooldowns += 1;
                }
                FetchOutcome::Fatal(message) => {
                    return Err(SkipReason::FetchFailed(message));
                }
            }
        }
    }
}

/// Provider cooldowns stall the worker and ignore the stop signal.
async fn cool_down(duration: Duration) {
    tokio::time::sleep(duration).await;
}
