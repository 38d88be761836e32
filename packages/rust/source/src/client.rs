//! The content source contract consumed by the ingestion cycle.

use std::time::Duration;

use async_trait::async_trait;
use sundew_shared::{Item, ItemId};

/// Result of one `fetch_new` call, classified for the caller.
///
/// The cycle matches on this exhaustively: transient failures go through
/// backoff, rate limits through a cooldown, fatal failures skip the account.
#[derive(Debug, Clone, PartialEq)]
pub enum FetchOutcome {
    /// Items newer than the cursor, ordered oldest to newest. May be empty.
    Fetched(Vec<Item>),
    /// The provider asked us to back off. `partial` holds whatever was
    /// gathered before the signal, in the same order as `Fetched`.
    RateLimited {
        partial: Vec<Item>,
        cooldown: Duration,
    },
    /// Connectivity or timeout class failure; worth retrying.
    Transient(String),
    /// Anything else: malformed response, rejected credentials, unknown account.
    Fatal(String),
}

impl FetchOutcome {
    /// Short label for log fields.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Fetched(_) => "fetched",
            Self::RateLimited { .. } => "rate_limited",
            Self::Transient(_) => "transient",
            Self::Fatal(_) => "fatal",
        }
    }
}

/// A provider of per-account content items.
#[async_trait]
pub trait ContentSource: Send + Sync {
    /// Fetch items for `account` newer than `cursor` (everything available when `None`).
    async fn fetch_new(&self, account: &str, cursor: Option<&ItemId>) -> FetchOutcome;
}
