// Test mocks for the discovery run.
//
// Three mocks matching the three trait seams:
// - MockFetcher (ResourceFetcher): category name to canned records or error
// - MemoryCacheStore (CacheStore): expiring rows with injectable failures
// - MemoryUpdateChannel (UpdateChannel): delayed queue with a send log

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use ownergraph_common::{Category, ResourceRecord, SortKey, UpdateMessage};

use crate::fetch::{FetchDetail, ResourceFetcher};
use crate::store::{CacheRow, CacheStore, QueuedMessage, UpdateChannel};

// ---------------------------------------------------------------------------
// MockFetcher
// ---------------------------------------------------------------------------

enum MockResponse {
    Records(Vec<ResourceRecord>),
    Error(String),
    Slow(Duration),
}

/// HashMap-based resource fetcher. Returns `Err` for unregistered categories.
/// Builder pattern: `.on_category()`, `.failing()`, `.slow()`,
/// `.with_latency()`. Tracks the peak number of concurrent fetches.
pub struct MockFetcher {
    responses: HashMap<String, MockResponse>,
    requests: Mutex<Vec<(String, FetchDetail)>>,
    latency: Duration,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
}

/// Decrements the in-flight count even when the fetch is cancelled.
struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl Default for MockFetcher {
    fn default() -> Self {
        Self::new()
    }
}

impl MockFetcher {
    pub fn new() -> Self {
        Self {
            responses: HashMap::new(),
            requests: Mutex::new(Vec::new()),
            latency: Duration::ZERO,
            in_flight: AtomicUsize::new(0),
            peak_in_flight: AtomicUsize::new(0),
        }
    }

    /// Every fetch sleeps this long before answering.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Highest number of fetches observed running at the same time.
    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }

    pub fn on_category(mut self, name: &str, records: Vec<ResourceRecord>) -> Self {
        self.responses
            .insert(name.to_string(), MockResponse::Records(records));
        self
    }

    pub fn failing(mut self, name: &str, error: &str) -> Self {
        self.responses
            .insert(name.to_string(), MockResponse::Error(error.to_string()));
        self
    }

    /// Sleeps for `delay`, then returns no records.
    pub fn slow(mut self, name: &str, delay: Duration) -> Self {
        self.responses
            .insert(name.to_string(), MockResponse::Slow(delay));
        self
    }

    /// `n` records for `category`, each tagged with an owner team.
    pub fn records(category: &str, n: usize) -> Vec<ResourceRecord> {
        (0..n)
            .map(|i| {
                let mut tags = BTreeMap::new();
                tags.insert("ownership:team".to_string(), "platform".to_string());
                tags.insert("env".to_string(), "test".to_string());
                ResourceRecord {
                    arn: format!("arn:aws:test:us-east-1:123456789012:{category}/{i}"),
                    region: "us-east-1".to_string(),
                    tags,
                    category: category.to_string(),
                }
            })
            .collect()
    }

    /// Categories requested so far, in request order.
    pub fn requested(&self) -> Vec<String> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .map(|(name, _)| name.clone())
            .collect()
    }

    pub fn detail_requests(&self, detail: FetchDetail) -> usize {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, d)| *d == detail)
            .count()
    }
}

#[async_trait]
impl ResourceFetcher for MockFetcher {
    async fn fetch(&self, category: &Category, detail: FetchDetail) -> Result<Vec<ResourceRecord>> {
        self.requests
            .lock()
            .unwrap()
            .push((category.name.to_string(), detail));

        let running = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(running, Ordering::SeqCst);
        let _guard = InFlight(&self.in_flight);
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        match self.responses.get(category.name) {
            Some(MockResponse::Records(records)) => Ok(records.clone()),
            Some(MockResponse::Error(message)) => bail!("{message}"),
            Some(MockResponse::Slow(delay)) => {
                tokio::time::sleep(*delay).await;
                Ok(Vec::new())
            }
            None => bail!("MockFetcher: no response for category {}", category.name),
        }
    }
}

// ---------------------------------------------------------------------------
// MemoryCacheStore
// ---------------------------------------------------------------------------

/// In-memory cache rows. Writes whose sort key starts with a registered
/// prefix fail, as do all reads once `.failing_reads()` is set.
#[derive(Default)]
pub struct MemoryCacheStore {
    rows: Mutex<HashMap<(String, String), CacheRow>>,
    failing_prefixes: HashSet<String>,
    failing_reads: bool,
}

impl MemoryCacheStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail writes to keys like `COMPRESSED#...` or `LAST_FULL_SCRAPE`.
    pub fn failing_writes(mut self, key_prefix: &str) -> Self {
        self.failing_prefixes.insert(key_prefix.to_string());
        self
    }

    pub fn failing_reads(mut self) -> Self {
        self.failing_reads = true;
        self
    }

    /// Every stored row, expired or not.
    pub fn rows(&self) -> Vec<CacheRow> {
        self.rows.lock().unwrap().values().cloned().collect()
    }

    /// Stored rows whose sort key starts with `prefix`.
    pub fn rows_with_prefix(&self, prefix: &str) -> Vec<CacheRow> {
        self.rows()
            .into_iter()
            .filter(|row| row.sort_key.to_string().starts_with(prefix))
            .collect()
    }

    pub fn row(&self, account_id: &str, sort_key: &SortKey) -> Option<CacheRow> {
        self.rows
            .lock()
            .unwrap()
            .get(&(account_id.to_string(), sort_key.to_string()))
            .cloned()
    }

    /// Shift every row's expiry, as if `by` had elapsed.
    pub fn age(&self, by: chrono::Duration) {
        for row in self.rows.lock().unwrap().values_mut() {
            row.expires_at -= by;
        }
    }
}

#[async_trait]
impl CacheStore for MemoryCacheStore {
    async fn put(&self, row: CacheRow) -> Result<()> {
        let key = row.sort_key.to_string();
        if self.failing_prefixes.iter().any(|p| key.starts_with(p.as_str())) {
            bail!("simulated write failure for {key}");
        }
        self.rows
            .lock()
            .unwrap()
            .insert((row.account_id.clone(), key), row);
        Ok(())
    }

    async fn get(&self, account_id: &str, sort_key: &SortKey) -> Result<Option<CacheRow>> {
        if self.failing_reads {
            bail!("simulated read failure for {sort_key}");
        }
        Ok(self
            .row(account_id, sort_key)
            .filter(|row| !row.is_expired(Utc::now())))
    }

    async fn purge_expired(&self) -> Result<u64> {
        let now = Utc::now();
        let mut rows = self.rows.lock().unwrap();
        let before = rows.len();
        rows.retain(|_, row| !row.is_expired(now));
        Ok((before - rows.len()) as u64)
    }
}

// ---------------------------------------------------------------------------
// MemoryUpdateChannel
// ---------------------------------------------------------------------------

struct Pending {
    id: i64,
    message: UpdateMessage,
    visible_at: DateTime<Utc>,
    claimed: bool,
    attempts: i32,
}

/// In-memory delayed queue. Every enqueue is also kept in a send log with
/// the delay it was given.
#[derive(Default)]
pub struct MemoryUpdateChannel {
    pending: Mutex<Vec<Pending>>,
    sent: Mutex<Vec<(UpdateMessage, chrono::Duration)>>,
    acked: Mutex<Vec<i64>>,
    next_id: AtomicI64,
    failing: AtomicBool,
}

impl MemoryUpdateChannel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing(self) -> Self {
        self.failing.store(true, Ordering::SeqCst);
        self
    }

    /// Every message ever enqueued, with its delay.
    pub fn sent(&self) -> Vec<(UpdateMessage, chrono::Duration)> {
        self.sent.lock().unwrap().clone()
    }

    /// Messages not yet acked.
    pub fn pending_count(&self) -> usize {
        self.pending.lock().unwrap().len()
    }

    pub fn acked(&self) -> Vec<i64> {
        self.acked.lock().unwrap().clone()
    }

    /// Make delayed messages visible, as if `by` had elapsed.
    pub fn advance(&self, by: chrono::Duration) {
        for entry in self.pending.lock().unwrap().iter_mut() {
            entry.visible_at -= by;
        }
    }
}

#[async_trait]
impl UpdateChannel for MemoryUpdateChannel {
    async fn enqueue(&self, message: &UpdateMessage, delay: chrono::Duration) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            bail!("simulated enqueue failure");
        }
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        self.pending.lock().unwrap().push(Pending {
            id,
            message: message.clone(),
            visible_at: Utc::now() + delay,
            claimed: false,
            attempts: 0,
        });
        self.sent.lock().unwrap().push((message.clone(), delay));
        Ok(())
    }

    async fn dequeue_ready(&self, limit: u32) -> Result<Vec<QueuedMessage>> {
        let now = Utc::now();
        let mut pending = self.pending.lock().unwrap();
        let mut claimed = Vec::new();
        for entry in pending.iter_mut() {
            if claimed.len() >= limit as usize {
                break;
            }
            if entry.claimed || entry.visible_at > now {
                continue;
            }
            entry.claimed = true;
            entry.attempts += 1;
            claimed.push(QueuedMessage {
                id: entry.id,
                message: entry.message.clone(),
                attempts: entry.attempts,
            });
        }
        Ok(claimed)
    }

    async fn ack(&self, id: i64) -> Result<()> {
        self.pending.lock().unwrap().retain(|entry| entry.id != id);
        self.acked.lock().unwrap().push(id);
        Ok(())
    }

    async fn release(&self, id: i64, delay: chrono::Duration) -> Result<()> {
        let visible_at = Utc::now() + delay;
        for entry in self.pending.lock().unwrap().iter_mut() {
            if entry.id == id {
                entry.claimed = false;
                entry.visible_at = visible_at;
            }
        }
        Ok(())
    }
}
