//! Shared types, error model, and configuration for Sundew.
//!
//! This crate is the foundation depended on by all other Sundew crates.
//! It provides:
//! - [`SundewError`]: the unified error type
//! - Domain types ([`Item`], [`ProcessedItem`], [`ItemId`], [`AccountGroup`])
//! - Configuration ([`AppConfig`] and its sections, config loading and validation)

pub mod config;
pub mod error;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AppConfig, BatchConfig, CheckpointConfig, FailurePolicy, OutputConfig,
    OutputFormat, RetryConfig, SourceConfig, TransformerConfig, config_dir, default_config_path,
    init_config, load_config, load_config_from, validate_credentials,
};
pub use error::{Result, SundewError};
pub use types::{AccountGroup, Item, ItemId, ProcessedItem};
