//! Ingestion orchestration for Sundew.
//!
//! This crate provides:
//! - [`IngestionCycle`]: fetch → transform → save → checkpoint for one account
//! - [`Scheduler`]: the single background worker walking all groups each interval
//! - [`ManualBatchRunner`]: replay of archived batches, checkpoint-free
//! - [`BackoffPolicy`]: retry delays for transient fetch failures
//! - [`ChatTransformer`]: the OpenAI-compatible [`Transformer`]

pub mod backoff;
pub mod batch;
pub mod ingest;
pub mod pipeline;
pub mod scheduler;
pub mod transform;

#[cfg(test)]
mod test_support;

pub use backoff::BackoffPolicy;
pub use batch::{BatchArchive, BatchSummary, ManualBatchRunner, read_batches};
pub use ingest::{AccountOutcome, IngestionCycle, SkipReason};
pub use pipeline::{SilentProgress, TransformProgress, TransformSettings, transform_batch};
pub use scheduler::{AccountReport, CycleReport, Scheduler, SchedulerHandle, SchedulerState};
pub use transform::{ChatTransformer, Transformer};
