//! ==============================================================================
//! cache.rs - keyed query cache with in-flight deduplication
//! ==============================================================================
//!
//! purpose:
//!     memoizes gateway results per query key and tells the view what state
//!     each key is in, without refetching on every render.
//!
//! entry lifecycle:
//!
//! ```text
//!     Idle ──get_or_fetch──> Loading ──ok──> Success
//!                               │  └──err──> Error   (last good data kept)
//!                               │
//!     Success/Error ──(stale)──> Loading      (prior data stays visible)
//! ```
//!
//! rules:
//!     - a fresh entry is returned as-is, no fetch
//!     - at most one fetch per key is in flight; other callers wait for it
//!     - a result is applied to the key its fetch was started for, nothing else
//!     - an invalidate that lands mid-flight keeps the entry stale afterwards
//!     - a fetch whose entry was evicted is discarded on arrival
//!     - readings merged while a fetch is out are re-applied to its result
//!
//! concurrency:
//!     the state mutex is never held across an await. waiting callers park on
//!     a watch channel whose sender lives as long as the in-flight fetch.
//!
//! relationships:
//!     - used by: console.rs (readings / sensor list queries, toggle merge)
//!     - configured by: config.rs (RetryPolicy)
//!
//! ==============================================================================

use crate::domain::{Reading, SensorId};
use crate::error::{ClientError, Result};

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::watch;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum QueryKey {
    Sensors,
    Readings(SensorId),
}

impl fmt::Display for QueryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueryKey::Sensors => f.write_str("sensors"),
            QueryKey::Readings(id) => write!(f, "readings/{}", id),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum QueryData {
    Sensors(Vec<SensorId>),
    /// always ascending by timestamp once stored
    Readings(Vec<Reading>),
}

impl QueryData {
    fn normalize(&mut self) {
        if let QueryData::Readings(readings) = self {
            // stable: equal timestamps keep gateway order
            readings.sort_by_key(|r| r.timestamp);
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum QueryStatus {
    #[default]
    Idle,
    Loading,
    Success,
    Error,
}

/// A snapshot of one cache entry.
#[derive(Clone, Debug, PartialEq)]
pub struct QueryEntry {
    pub key: QueryKey,
    pub status: QueryStatus,
    pub data: Option<QueryData>,
    /// unix seconds of the last successful fetch
    pub fetched_at: Option<i64>,
    /// the failure behind an `Error` status
    pub error: Option<ClientError>,
}

impl QueryEntry {
    fn new(key: QueryKey) -> Self {
        Self {
            key,
            status: QueryStatus::Idle,
            data: None,
            fetched_at: None,
            error: None,
        }
    }

    pub fn sensors(&self) -> Option<&[SensorId]> {
        match &self.data {
            Some(QueryData::Sensors(ids)) => Some(ids),
            _ => None,
        }
    }

    pub fn readings(&self) -> Option<&[Reading]> {
        match &self.data {
            Some(QueryData::Readings(readings)) => Some(readings),
            _ => None,
        }
    }

    /// chronologically last reading
    pub fn last_reading(&self) -> Option<&Reading> {
        self.readings().and_then(|r| r.last())
    }
}

/// Retries for transient (network) failures, with doubling delay.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    pub retries: u32,
    pub base_delay: Duration,
}

impl RetryPolicy {
    pub fn none() -> Self {
        Self { retries: 0, base_delay: Duration::ZERO }
    }

    fn delay(&self, attempt: u32) -> Duration {
        self.base_delay.saturating_mul(1u32 << attempt.min(16))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { retries: 2, base_delay: Duration::from_millis(250) }
    }
}

// ==============================================================================
// internal state
// ==============================================================================

struct Pending {
    id: u64,
    done: watch::Receiver<()>,
    prev_status: QueryStatus,
    /// readings merged while this fetch was out; its result may predate them
    merged: Vec<Reading>,
}

struct Slot {
    entry: QueryEntry,
    stale: bool,
    /// bumped by every invalidation
    generation: u64,
    pending: Option<Pending>,
}

impl Slot {
    fn new(key: QueryKey) -> Self {
        Self {
            entry: QueryEntry::new(key),
            stale: true,
            generation: 0,
            pending: None,
        }
    }
}

#[derive(Default)]
struct CacheState {
    slots: HashMap<QueryKey, Slot>,
    next_id: u64,
}

impl CacheState {
    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }
}

enum Role {
    Fresh(QueryEntry),
    Follower(watch::Receiver<()>),
    Leader {
        id: u64,
        generation: u64,
        done: watch::Sender<()>,
    },
}

/// Removes the pending marker if the leading future is dropped before its
/// fetch completes; dropping `_done` wakes the followers either way.
struct InFlight<'a> {
    cache: &'a QueryCache,
    key: QueryKey,
    id: u64,
    completed: bool,
    _done: watch::Sender<()>,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if !self.completed {
            self.cache.abandon(self.key, self.id);
        }
    }
}

// ==============================================================================
// query cache - public interface
// ==============================================================================

#[derive(Clone)]
pub struct QueryCache {
    state: Arc<Mutex<CacheState>>,
    revision: Arc<watch::Sender<u64>>,
    retry: RetryPolicy,
}

impl Default for QueryCache {
    fn default() -> Self {
        Self::new(RetryPolicy::default())
    }
}

impl QueryCache {
    pub fn new(retry: RetryPolicy) -> Self {
        let (revision, _) = watch::channel(0);
        Self {
            state: Arc::new(Mutex::new(CacheState::default())),
            revision: Arc::new(revision),
            retry,
        }
    }

    fn lock(&self) -> MutexGuard<'_, CacheState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Receives a new revision after every mutation.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.revision.subscribe()
    }

    pub fn revision(&self) -> u64 {
        *self.revision.borrow()
    }

    /// Bump the revision so subscribers re-render.
    pub fn notify(&self) {
        self.revision.send_modify(|r| *r += 1);
    }

    /// Current entry for `key`, never fetches.
    pub fn peek(&self, key: QueryKey) -> QueryEntry {
        self.lock()
            .slots
            .get(&key)
            .map(|slot| slot.entry.clone())
            .unwrap_or_else(|| QueryEntry::new(key))
    }

    pub fn is_stale(&self, key: QueryKey) -> bool {
        self.lock().slots.get(&key).map(|slot| slot.stale).unwrap_or(true)
    }

    pub fn is_fetching(&self, key: QueryKey) -> bool {
        self.lock()
            .slots
            .get(&key)
            .map(|slot| slot.pending.is_some())
            .unwrap_or(false)
    }

    /// Return the entry for `key`, fetching it first if it is stale or absent.
    ///
    /// While a fetch for `key` is outstanding every other caller waits for it
    /// instead of calling its own `fetcher`. `fetcher` may be called more than
    /// once by the leader when the retry policy allows it.
    pub async fn get_or_fetch<F, Fut>(&self, key: QueryKey, mut fetcher: F) -> QueryEntry
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<QueryData>>,
    {
        let role = self.claim(key);

        match role {
            Role::Fresh(entry) => entry,
            Role::Follower(mut done) => {
                tracing::debug!(%key, "attaching to in-flight fetch");
                // the sender never sends; it closes when the fetch ends
                let _ = done.changed().await;
                self.peek(key)
            }
            Role::Leader { id, generation, done } => {
                self.notify();
                let mut in_flight = InFlight {
                    cache: self,
                    key,
                    id,
                    completed: false,
                    _done: done,
                };

                let result = self.fetch_with_retries(key, &mut fetcher).await;
                let entry = self.complete(key, id, generation, result);
                in_flight.completed = true;
                entry
            }
        }
    }

    fn claim(&self, key: QueryKey) -> Role {
        let mut state = self.lock();
        let id = state.next_id();
        let slot = state.slots.entry(key).or_insert_with(|| Slot::new(key));

        if let Some(pending) = &slot.pending {
            return Role::Follower(pending.done.clone());
        }
        if !slot.stale {
            return Role::Fresh(slot.entry.clone());
        }

        let (done, done_rx) = watch::channel(());
        slot.pending = Some(Pending {
            id,
            done: done_rx,
            prev_status: slot.entry.status,
            merged: Vec::new(),
        });
        slot.entry.status = QueryStatus::Loading;
        tracing::debug!(%key, fetch = id, "fetch started");

        Role::Leader {
            id,
            generation: slot.generation,
            done,
        }
    }

    async fn fetch_with_retries<F, Fut>(&self, key: QueryKey, fetcher: &mut F) -> Result<QueryData>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<QueryData>>,
    {
        let mut attempt = 0;
        loop {
            match fetcher().await {
                Err(e) if e.is_transient() && attempt < self.retry.retries => {
                    let delay = self.retry.delay(attempt);
                    tracing::warn!(%key, attempt = attempt + 1, ?delay, "fetch failed, retrying: {}", e);
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                result => return result,
            }
        }
    }

    fn complete(&self, key: QueryKey, id: u64, generation: u64, result: Result<QueryData>) -> QueryEntry {
        let entry = {
            let mut state = self.lock();
            let slot = match state.slots.get_mut(&key) {
                Some(slot) if slot.pending.as_ref().map(|p| p.id) == Some(id) => slot,
                _ => {
                    tracing::debug!(%key, fetch = id, "discarding result of evicted fetch");
                    return QueryEntry::new(key);
                }
            };
            let merged = slot.pending.take().map(|p| p.merged).unwrap_or_default();

            match result {
                Ok(mut data) => {
                    data.normalize();
                    if let QueryData::Readings(readings) = &mut data {
                        for reading in merged {
                            merge_by_timestamp(readings, reading);
                        }
                    }
                    slot.entry.status = QueryStatus::Success;
                    slot.entry.data = Some(data);
                    slot.entry.fetched_at = Some(chrono::Utc::now().timestamp());
                    slot.entry.error = None;
                    slot.stale = slot.generation != generation;
                    tracing::debug!(%key, fetch = id, stale = slot.stale, "fetch succeeded");
                }
                Err(e) => {
                    // keep the last good data for display
                    tracing::warn!(%key, fetch = id, "fetch failed: {}", e);
                    slot.entry.status = QueryStatus::Error;
                    slot.entry.error = Some(e);
                }
            }
            slot.entry.clone()
        };
        self.notify();
        entry
    }

    fn abandon(&self, key: QueryKey, id: u64) {
        {
            let mut state = self.lock();
            let Some(slot) = state.slots.get_mut(&key) else {
                return;
            };
            if slot.pending.as_ref().map(|p| p.id) != Some(id) {
                return;
            }
            if let Some(pending) = slot.pending.take() {
                slot.entry.status = pending.prev_status;
            }
            tracing::debug!(%key, fetch = id, "fetch abandoned");
        }
        self.notify();
    }

    /// Mark `key` stale so the next `get_or_fetch` refetches it.
    pub fn invalidate(&self, key: QueryKey) {
        {
            let mut state = self.lock();
            let Some(slot) = state.slots.get_mut(&key) else {
                return;
            };
            slot.stale = true;
            slot.generation += 1;
        }
        tracing::debug!(%key, "invalidated");
        self.notify();
    }

    /// Drop the entry for `key`. A fetch still in flight for it is discarded
    /// when it lands.
    pub fn evict(&self, key: QueryKey) {
        let removed = self.lock().slots.remove(&key).is_some();
        if removed {
            tracing::debug!(%key, "evicted");
            self.notify();
        }
    }

    pub fn clear(&self) {
        self.lock().slots.clear();
        self.notify();
    }

    /// Merge an authoritative reading into the cached history of `sensor`.
    ///
    /// A reading with the timestamp of an existing one replaces it, otherwise
    /// it is inserted in timestamp order. Any entry holding a history takes
    /// the merge, whatever its status; a fetch still in flight re-applies it
    /// to its own result. Returns whether the merge happened.
    pub fn merge_reading(&self, sensor: SensorId, reading: Reading) -> bool {
        let key = QueryKey::Readings(sensor);
        {
            let mut state = self.lock();
            let Some(slot) = state.slots.get_mut(&key) else {
                return false;
            };
            let Some(QueryData::Readings(readings)) = &mut slot.entry.data else {
                return false;
            };

            merge_by_timestamp(readings, reading.clone());
            slot.entry.fetched_at = Some(chrono::Utc::now().timestamp());
            match &mut slot.pending {
                Some(pending) => pending.merged.push(reading),
                // an errored entry still owes a refetch
                None if slot.entry.status == QueryStatus::Success => slot.stale = false,
                None => {}
            }
        }

        tracing::debug!(%key, "merged reading");
        self.notify();
        true
    }
}

fn merge_by_timestamp(readings: &mut Vec<Reading>, reading: Reading) {
    if let Some(pos) = readings.iter().rposition(|r| r.timestamp == reading.timestamp) {
        readings[pos] = reading;
    } else {
        let pos = readings.partition_point(|r| r.timestamp < reading.timestamp);
        readings.insert(pos, reading);
    }
}
