//! Core domain types for Sundew ingestion.

use std::cmp::Ordering;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

// ---------------------------------------------------------------------------
// ItemId
// ---------------------------------------------------------------------------

/// Opaque, totally ordered item identifier supplied by the content source.
///
/// Providers hand out identifiers either as JSON numbers or as decimal
/// strings (X snowflake ids), so both deserialize into the same value.
/// Purely numeric ids compare numerically and sort before any non-numeric
/// id; non-numeric ids compare lexicographically.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct ItemId(String);

impl ItemId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn is_numeric(&self) -> bool {
        !self.0.is_empty() && self.0.bytes().all(|b| b.is_ascii_digit())
    }
}

impl Ord for ItemId {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self.is_numeric(), other.is_numeric()) {
            // Equal length digit strings order like the numbers they spell.
            (true, true) => self
                .0
                .len()
                .cmp(&other.0.len())
                .then_with(|| self.0.cmp(&other.0)),
            (true, false) => Ordering::Less,
            (false, true) => Ordering::Greater,
            (false, false) => self.0.cmp(&other.0),
        }
    }
}

impl PartialOrd for ItemId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<'de> Deserialize<'de> for ItemId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Text(String),
            Number(u64),
        }

        Ok(match Raw::deserialize(deserializer)? {
            Raw::Text(s) => Self(s),
            Raw::Number(n) => Self(n.to_string()),
        })
    }
}

impl std::fmt::Display for ItemId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ItemId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for ItemId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<u64> for ItemId {
    fn from(n: u64) -> Self {
        Self(n.to_string())
    }
}

// ---------------------------------------------------------------------------
// AccountGroup
// ---------------------------------------------------------------------------

/// A named, ordered set of accounts sharing one transformation instruction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountGroup {
    /// Group identifier.
    pub name: String,
    /// Account handles, polled in this order.
    pub accounts: Vec<String>,
    /// Natural-language instruction handed to the transformer.
    pub instruction: String,
}

// ---------------------------------------------------------------------------
// Item / ProcessedItem
// ---------------------------------------------------------------------------

/// A single content item as returned by the content source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Item {
    pub id: ItemId,
    pub created_at: DateTime<Utc>,
    pub text: String,
}

/// The transformed form of an [`Item`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessedItem {
    /// Inherited from the source item.
    pub id: ItemId,
    pub created_at: DateTime<Utc>,
    pub original_text: String,
    /// Model output; `None` when the model answered without content.
    pub processed_content: Option<String>,
}

impl ProcessedItem {
    /// Build a processed item from its source item and the transformer output.
    pub fn from_item(item: &Item, processed_content: Option<String>) -> Self {
        Self {
            id: item.id.clone(),
            created_at: item.created_at,
            original_text: item.text.clone(),
            processed_content,
        }
    }
}
