//! Deduplicating, rate-limited work queue.
//!
//! Items are keyed. A key is in at most one of these places at a time:
//!
//! - **queued**: waiting in FIFO order for a worker
//! - **processing**: handed out by [`WorkQueue::get`], not yet [`done`]
//!
//! and it may additionally be **dirty**: re-added while processing. Adding a
//! key that is already queued only replaces its payload, so repeated
//! notifications collapse into one unit of work carrying the latest payload.
//! Adding a key that is processing parks the payload; [`done`] puts the key
//! back in line. No two workers ever hold the same key.
//!
//! Retries are scheduled with [`add_rate_limited`]. Every plain [`add`] makes
//! its payload the latest for the key; a retry that fires after a newer
//! payload was added is dropped even if that payload was already processed,
//! so a failed old payload never lands on top of a newer one.
//!
//! [`add`]: WorkQueue::add
//! [`add_rate_limited`]: WorkQueue::add_rate_limited
//! [`done`]: WorkQueue::done

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::fmt::Display;
use std::hash::Hash;
use std::pin::pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::trace;

use super::backoff::BackoffConfig;
use super::bucket::{BucketConfig, TokenBucket};

/// What happened to an added item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddOutcome {
    /// The key was not known and is now queued.
    Queued,

    /// The key was already queued; the pending payload was replaced.
    Collapsed,

    /// The key is being processed; it will be requeued on `done`.
    Deferred,

    /// A delayed add whose payload is older than the latest add for the key.
    /// Nothing was queued.
    Superseded,

    /// The queue is shutting down and no longer accepts work.
    Rejected,
}

/// Point-in-time view of a queue, for observability.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    /// Keys waiting for a worker.
    pub queued: usize,

    /// Keys currently held by workers.
    pub processing: usize,

    /// Requeue counters of keys that are backing off.
    pub requeues: BTreeMap<String, u32>,

    pub shutting_down: bool,
}

struct QueueState<K, V> {
    order: VecDeque<K>,
    /// Latest payload per queued or dirty key.
    pending: HashMap<K, V>,
    /// Keys held by workers, with the generation they were handed out at.
    processing: HashMap<K, u64>,
    /// Generation of the latest payload added per key. Every `add` draws a
    /// fresh one; delayed adds only land while theirs is still current.
    generations: HashMap<K, u64>,
    last_generation: u64,
    requeues: HashMap<K, u32>,
    bucket: TokenBucket,
    shutting_down: bool,
}

impl<K: Clone + Eq + Hash, V> QueueState<K, V> {
    fn next_generation(&mut self, key: &K) -> u64 {
        self.last_generation += 1;
        self.generations.insert(key.clone(), self.last_generation);
        self.last_generation
    }

    /// The generation a retry of `key` belongs to: the one its worker was
    /// handed, or the latest one if no worker holds the key.
    fn retry_generation(&mut self, key: &K) -> u64 {
        if let Some(&generation) = self.processing.get(key) {
            return generation;
        }
        match self.generations.get(key) {
            Some(&generation) => generation,
            None => self.next_generation(key),
        }
    }
}

/// A keyed work queue with deduplication, backoff and graceful shutdown.
///
/// Cloning is cheap; clones share the same queue.
pub struct WorkQueue<K, V> {
    inner: Arc<Inner<K, V>>,
}

struct Inner<K, V> {
    state: Mutex<QueueState<K, V>>,
    notify: Notify,
    backoff: BackoffConfig,
    /// Cancels sleeping delayed adds on shutdown.
    shutdown: CancellationToken,
}

impl<K, V> Clone for WorkQueue<K, V> {
    fn clone(&self) -> Self {
        WorkQueue {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<K, V> WorkQueue<K, V>
where
    K: Clone + Eq + Hash + Send + 'static,
    V: Send + 'static,
{
    /// Creates an empty queue with the default overall requeue rate.
    pub fn new(backoff: BackoffConfig) -> Self {
        Self::with_limits(backoff, BucketConfig::DEFAULT)
    }

    /// Creates an empty queue whose requeues wait for the longer of the
    /// per-key `backoff` and the overall `bucket`.
    pub fn with_limits(backoff: BackoffConfig, bucket: BucketConfig) -> Self {
        WorkQueue {
            inner: Arc::new(Inner {
                state: Mutex::new(QueueState {
                    order: VecDeque::new(),
                    pending: HashMap::new(),
                    processing: HashMap::new(),
                    generations: HashMap::new(),
                    last_generation: 0,
                    requeues: HashMap::new(),
                    bucket: TokenBucket::new(bucket),
                    shutting_down: false,
                }),
                notify: Notify::new(),
                backoff,
                shutdown: CancellationToken::new(),
            }),
        }
    }

    // Nothing in here panics while holding the lock, but a poisoned lock
    // would still hold consistent state.
    fn lock(&self) -> MutexGuard<'_, QueueState<K, V>> {
        self.inner.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn backoff(&self) -> BackoffConfig {
        self.inner.backoff
    }

    pub fn bucket(&self) -> BucketConfig {
        self.lock().bucket.config()
    }

    /// Adds an item, replacing any payload already pending for the key.
    ///
    /// The item becomes the latest for its key: delayed adds scheduled for
    /// older payloads of the key are dropped when they fire.
    pub fn add(&self, key: K, payload: V) -> AddOutcome {
        self.insert(key, payload, None)
    }

    /// Queues `payload`. A fresh add (`generation` is `None`) draws a new
    /// generation and replaces any pending payload; a delayed add only lands
    /// if its generation is still the latest and never replaces.
    fn insert(&self, key: K, payload: V, generation: Option<u64>) -> AddOutcome {
        let outcome = {
            let mut state = self.lock();
            if state.shutting_down {
                return AddOutcome::Rejected;
            }
            match generation {
                None => {
                    state.next_generation(&key);
                }
                Some(generation) if state.generations.get(&key) != Some(&generation) => {
                    return AddOutcome::Superseded;
                }
                Some(_) => {}
            }
            let processing = state.processing.contains_key(&key);
            if let Some(existing) = state.pending.get_mut(&key) {
                if generation.is_none() {
                    *existing = payload;
                }
                return if processing {
                    AddOutcome::Deferred
                } else {
                    AddOutcome::Collapsed
                };
            }
            state.pending.insert(key.clone(), payload);
            if processing {
                AddOutcome::Deferred
            } else {
                state.order.push_back(key);
                AddOutcome::Queued
            }
        };
        if outcome == AddOutcome::Queued {
            self.inner.notify.notify_one();
        }
        outcome
    }

    /// Waits for the next item.
    ///
    /// Returns `None` once the queue is shutting down and nothing is left
    /// queued. The caller owns the key until it calls [`WorkQueue::done`];
    /// [`WorkQueue::in_flight`] does that on drop.
    pub async fn get(&self) -> Option<(K, V)> {
        loop {
            let mut notified = pin!(self.inner.notify.notified());
            // Register before checking state so a concurrent add or shutdown
            // cannot slip between the check and the wait.
            notified.as_mut().enable();

            {
                let mut state = self.lock();
                while let Some(key) = state.order.pop_front() {
                    if let Some(payload) = state.pending.remove(&key) {
                        let generation = state.generations.get(&key).copied().unwrap_or_default();
                        state.processing.insert(key.clone(), generation);
                        return Some((key, payload));
                    }
                }
                if state.shutting_down {
                    return None;
                }
            }

            notified.await;
        }
    }

    /// Marks a key as no longer being processed.
    ///
    /// If the key was re-added meanwhile it goes to the back of the queue with
    /// its newest payload.
    pub fn done(&self, key: &K) {
        let requeued = {
            let mut state = self.lock();
            state.processing.remove(key);
            if state.pending.contains_key(key) {
                state.order.push_back(key.clone());
                true
            } else {
                false
            }
        };
        if requeued {
            self.inner.notify.notify_one();
        }
    }

    /// Returns a guard that calls [`WorkQueue::done`] for `key` when dropped.
    pub fn in_flight(&self, key: K) -> InFlight<'_, K, V> {
        InFlight { queue: self, key }
    }

    /// Re-adds an item after a delay and bumps its requeue counter.
    ///
    /// The delay is the longer of the key's exponential backoff and the
    /// overall bucket delay. When it expires the item is added only if no
    /// newer payload was added for the key in the meantime, whether or not
    /// that newer payload has already been processed.
    pub fn add_rate_limited(&self, key: K, payload: V) -> Duration {
        let (delay, generation) = {
            let mut state = self.lock();
            let count = state.requeues.entry(key.clone()).or_insert(0);
            let backoff = self.inner.backoff.delay_for_attempt(*count);
            *count = count.saturating_add(1);
            let overall = state.bucket.reserve(Instant::now());
            (backoff.max(overall), state.retry_generation(&key))
        };
        self.schedule(key, payload, delay, generation);
        delay
    }

    /// Adds an item once `delay` has elapsed, unless a newer payload for the
    /// key is added first.
    pub fn add_after(&self, key: K, payload: V, delay: Duration) {
        let generation = self.lock().retry_generation(&key);
        self.schedule(key, payload, delay, generation);
    }

    fn schedule(&self, key: K, payload: V, delay: Duration, generation: u64) {
        if delay.is_zero() {
            self.insert(key, payload, Some(generation));
            return;
        }
        let queue = self.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = queue.inner.shutdown.cancelled() => {
                    trace!("Dropping delayed add on shutdown");
                }
                _ = tokio::time::sleep(delay) => {
                    if queue.insert(key, payload, Some(generation)) == AddOutcome::Superseded {
                        trace!(generation, "Dropping delayed add superseded by a newer one");
                    }
                }
            }
        });
    }

    /// How many times the key has been requeued since it was last forgotten.
    pub fn num_requeues(&self, key: &K) -> u32 {
        self.lock().requeues.get(key).copied().unwrap_or(0)
    }

    /// Resets the key's requeue counter.
    ///
    /// Unless a newer payload is waiting, this also retires the key's
    /// generation, so any delayed add still in flight for it is dropped.
    pub fn forget(&self, key: &K) {
        let mut state = self.lock();
        state.requeues.remove(key);
        if !state.pending.contains_key(key) {
            state.generations.remove(key);
        }
    }

    /// Stops accepting work and wakes all waiting workers.
    ///
    /// Already queued items are still handed out; `get` returns `None` once
    /// they are drained.
    pub fn shut_down(&self) {
        self.lock().shutting_down = true;
        self.inner.shutdown.cancel();
        self.inner.notify.notify_waiters();
    }

    /// Whether [`WorkQueue::shut_down`] has been called.
    pub fn is_shutting_down(&self) -> bool {
        self.lock().shutting_down
    }

    /// Number of keys waiting for a worker.
    pub fn len(&self) -> usize {
        self.lock().order.len()
    }

    /// True when no key is waiting for a worker. Keys being processed do not
    /// count.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<K, V> WorkQueue<K, V>
where
    K: Clone + Eq + Hash + Send + Display + 'static,
    V: Send + 'static,
{
    /// Snapshot of queue depth, keys in progress and requeue counters.
    ///
    /// Keys are rendered with `Display` so the result serializes as a plain
    /// JSON object.
    pub fn stats(&self) -> QueueStats {
        let state = self.lock();
        QueueStats {
            queued: state.order.len(),
            processing: state.processing.len(),
            requeues: state
                .requeues
                .iter()
                .map(|(k, n)| (k.to_string(), *n))
                .collect(),
            shutting_down: state.shutting_down,
        }
    }
}

impl<K, V> std::fmt::Debug for WorkQueue<K, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkQueue")
            .field("backoff", &self.inner.backoff)
            .finish_non_exhaustive()
    }
}

/// Scoped ownership of a key handed out by [`WorkQueue::get`].
///
/// Dropping the guard releases the key, including when the owning task
/// unwinds.
pub struct InFlight<'a, K, V>
where
    K: Clone + Eq + Hash + Send + 'static,
    V: Send + 'static,
{
    queue: &'a WorkQueue<K, V>,
    key: K,
}

impl<K, V> InFlight<'_, K, V>
where
    K: Clone + Eq + Hash + Send + 'static,
    V: Send + 'static,
{
    /// The key this guard releases.
    pub fn key(&self) -> &K {
        &self.key
    }
}

impl<K, V> Drop for InFlight<'_, K, V>
where
    K: Clone + Eq + Hash + Send + 'static,
    V: Send + 'static,
{
    fn drop(&mut self) {
        self.queue.done(&self.key);
    }
}
