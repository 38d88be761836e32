//! Scripted collaborators shared by the core tests.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use sundew_output::OutputSink;
use sundew_shared::{AccountGroup, Item, ItemId, ProcessedItem, Result, SundewError};
use sundew_source::{ContentSource, FetchOutcome};

use crate::transform::Transformer;

pub fn item(id: u64) -> Item {
    Item {
        id: ItemId::from(id),
        created_at: Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
            + chrono::Duration::seconds(id as i64),
        text: format!("post {id}"),
    }
}

pub fn items(ids: &[u64]) -> Vec<Item> {
    ids.iter().copied().map(item).collect()
}

pub fn group(name: &str, accounts: &[&str]) -> AccountGroup {
    AccountGroup {
        name: name.into(),
        accounts: accounts.iter().map(|a| a.to_string()).collect(),
        instruction: format!("summarize for {name}"),
    }
}

// ---------------------------------------------------------------------------
// ScriptedSource
// ---------------------------------------------------------------------------

/// Replays queued outcomes per account; an empty queue yields no items.
#[derive(Default)]
pub struct ScriptedSource {
    scripts: Mutex<HashMap<String, VecDeque<FetchOutcome>>>,
    calls: Mutex<Vec<(String, Option<ItemId>)>>,
}

impl ScriptedSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, account: &str, outcome: FetchOutcome) {
        self.scripts
            .lock()
            .unwrap()
            .entry(account.to_string())
            .or_default()
            .push_back(outcome);
    }

    /// Every `(account, cursor)` the source was asked for, in call order.
    pub fn calls(&self) -> Vec<(String, Option<ItemId>)> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_for(&self, account: &str) -> Vec<Option<ItemId>> {
        self.calls()
            .into_iter()
            .filter(|(a, _)| a == account)
            .map(|(_, cursor)| cursor)
            .collect()
    }
}

#[async_trait]
impl ContentSource for ScriptedSource {
    async fn fetch_new(&self, account: &str, cursor: Option<&ItemId>) -> FetchOutcome {
        self.calls
            .lock()
            .unwrap()
            .push((account.to_string(), cursor.cloned()));
        self.scripts
            .lock()
            .unwrap()
            .get_mut(account)
            .and_then(VecDeque::pop_front)
            .unwrap_or(FetchOutcome::Fetched(Vec::new()))
    }
}

// ---------------------------------------------------------------------------
// RecordingTransformer
// ---------------------------------------------------------------------------

/// Echoes `"{instruction}: {text}"`, failing on chosen ids.
#[derive(Default)]
pub struct RecordingTransformer {
    failing: HashSet<ItemId>,
    delay: Option<Duration>,
    calls: Mutex<Vec<(ItemId, tokio::time::Instant)>>,
}

impl RecordingTransformer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_on(mut self, id: u64) -> Self {
        self.failing.insert(ItemId::from(id));
        self
    }

    /// Make every call take `delay` before answering.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn seen(&self) -> Vec<ItemId> {
        self.calls.lock().unwrap().iter().map(|(id, _)| id.clone()).collect()
    }

    /// Start time of every call.
    pub fn started_at(&self) -> Vec<tokio::time::Instant> {
        self.calls.lock().unwrap().iter().map(|(_, at)| *at).collect()
    }
}

#[async_trait]
impl Transformer for RecordingTransformer {
    async fn transform(&self, item: &Item, instruction: &str) -> Result<ProcessedItem> {
        self.calls
            .lock()
            .unwrap()
            .push((item.id.clone(), tokio::time::Instant::now()));
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.failing.contains(&item.id) {
            return Err(SundewError::transform(&item.id, "model refused"));
        }
        Ok(ProcessedItem::from_item(
            item,
            Some(format!("{instruction}: {}", item.text)),
        ))
    }
}

// ---------------------------------------------------------------------------
// RecordingSink
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct RecordingSink {
    batches: Mutex<Vec<Vec<ProcessedItem>>>,
    fail: AtomicBool,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn batches(&self) -> Vec<Vec<ProcessedItem>> {
        self.batches.lock().unwrap().clone()
    }

    pub fn saved_ids(&self) -> Vec<ItemId> {
        self.batches()
            .into_iter()
            .flatten()
            .map(|p| p.id)
            .collect()
    }
}

#[async_trait]
impl OutputSink for RecordingSink {
    async fn save(&self, batch: &[ProcessedItem]) -> Result<()> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(SundewError::Output("disk full".into()));
        }
        self.batches.lock().unwrap().push(batch.to_vec());
        Ok(())
    }
}
