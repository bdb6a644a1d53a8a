//! Tether work queue: deduplicating, rate-limited queue of object keys.
//!
//! A key is held in at most one of three places at a time: pending (ready for
//! [`RateLimitedQueue::get`]), waiting (scheduled by `add_after`), or processing
//! (handed to a worker and not yet released with [`RateLimitedQueue::done`]).
//! Re-adding a key while it is processing marks it dirty; `done` then makes it
//! pending again, so no key is ever held by two workers.

#![forbid(unsafe_code)]

use std::cmp::Reverse;
use std::collections::{BinaryHeap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use metrics::{counter, gauge};
use rustc_hash::{FxHashMap, FxHashSet};
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::debug;

mod backoff;

pub use backoff::ExponentialBackoff;

pub struct RateLimitedQueue {
    name: String,
    backoff: ExponentialBackoff,
    state: Mutex<State>,
    notify: Notify,
}

#[derive(Default)]
struct State {
    queue: VecDeque<String>,
    dirty: FxHashSet<String>,
    processing: FxHashSet<String>,
    waiting: BinaryHeap<Reverse<(Instant, u64, String)>>,
    waiting_at: FxHashMap<String, Instant>,
    seq: u64,
    requeues: FxHashMap<String, u32>,
    shutting_down: bool,
}

impl State {
    /// Returns true when the key became ready for `get`.
    fn insert(&mut self, key: String) -> bool {
        if self.dirty.contains(&key) {
            return false;
        }
        self.dirty.insert(key.clone());
        if self.processing.contains(&key) {
            return false;
        }
        self.queue.push_back(key);
        true
    }

    fn promote_ready(&mut self, now: Instant) {
        while let Some(Reverse((at, _, _))) = self.waiting.peek() {
            if *at > now {
                break;
            }
            let Some(Reverse((at, _, key))) = self.waiting.pop() else { break };
            // superseded by an earlier deadline for the same key
            if self.waiting_at.get(&key) != Some(&at) {
                continue;
            }
            self.waiting_at.remove(&key);
            self.insert(key);
        }
    }

    fn next_deadline(&self) -> Option<Instant> {
        self.waiting.peek().map(|Reverse((at, _, _))| *at)
    }
}

impl RateLimitedQueue {
    pub fn new(name: &str, backoff: ExponentialBackoff) -> Self {
        Self { name: name.to_string(), backoff, state: Mutex::new(State::default()), notify: Notify::new() }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn report_depth(&self, st: &State) {
        gauge!("tether_queue_depth", st.queue.len() as f64, "queue" => self.name.clone());
    }

    /// Mark `key` pending. Coalesces with an already pending copy; no-op after shutdown.
    pub fn add(&self, key: &str) {
        let ready = {
            let mut st = self.lock();
            if st.shutting_down {
                debug!(queue = %self.name, key, "add after shutdown ignored");
                return;
            }
            let ready = st.insert(key.to_string());
            self.report_depth(&st);
            ready
        };
        counter!("tether_queue_adds_total", 1, "queue" => self.name.clone());
        if ready {
            self.notify.notify_one();
        }
    }

    /// Make `key` pending once `delay` has elapsed. An earlier pending deadline for the
    /// same key is kept.
    pub fn add_after(&self, key: &str, delay: Duration) {
        if delay.is_zero() {
            return self.add(key);
        }
        {
            let mut st = self.lock();
            if st.shutting_down {
                return;
            }
            let at = Instant::now() + delay;
            if matches!(st.waiting_at.get(key), Some(existing) if *existing <= at) {
                return;
            }
            st.seq = st.seq.wrapping_add(1);
            let seq = st.seq;
            st.waiting_at.insert(key.to_string(), at);
            st.waiting.push(Reverse((at, seq, key.to_string())));
        }
        // wake a getter so it re-arms its timer against the new deadline
        self.notify.notify_one();
    }

    /// Schedule `key` after its current backoff delay and count one more requeue.
    /// Returns the delay applied.
    pub fn add_rate_limited(&self, key: &str) -> Duration {
        let delay = {
            let mut st = self.lock();
            let n = st.requeues.entry(key.to_string()).or_insert(0);
            let delay = self.backoff.delay(*n);
            *n = n.saturating_add(1);
            delay
        };
        counter!("tether_queue_retries_total", 1, "queue" => self.name.clone());
        debug!(queue = %self.name, key, delay_ms = %delay.as_millis(), "requeue with backoff");
        self.add_after(key, delay);
        delay
    }

    /// Clear retry bookkeeping for `key`.
    pub fn forget(&self, key: &str) {
        self.lock().requeues.remove(key);
    }

    pub fn num_requeues(&self, key: &str) -> u32 {
        self.lock().requeues.get(key).copied().unwrap_or(0)
    }

    /// Wait for the next pending key. `None` once the queue is shut down.
    pub async fn get(&self) -> Option<String> {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let deadline = {
                let mut st = self.lock();
                if st.shutting_down {
                    return None;
                }
                st.promote_ready(Instant::now());
                if let Some(key) = st.queue.pop_front() {
                    st.dirty.remove(&key);
                    st.processing.insert(key.clone());
                    self.report_depth(&st);
                    return Some(key);
                }
                st.next_deadline()
            };

            match deadline {
                Some(at) => {
                    tokio::select! {
                        _ = &mut notified => {}
                        _ = tokio::time::sleep_until(at) => {}
                    }
                }
                None => notified.await,
            }
        }
    }

    /// Release a key returned by `get`. A key re-added meanwhile becomes pending again.
    pub fn done(&self, key: &str) {
        let ready = {
            let mut st = self.lock();
            st.processing.remove(key);
            if !st.shutting_down && st.dirty.contains(key) {
                st.queue.push_back(key.to_string());
                self.report_depth(&st);
                true
            } else {
                false
            }
        };
        if ready {
            self.notify.notify_one();
        }
    }

    /// Stop accepting work, drop pending and waiting keys, and release every blocked `get`.
    pub fn shut_down(&self) {
        {
            let mut st = self.lock();
            if st.shutting_down {
                return;
            }
            st.shutting_down = true;
            st.queue.clear();
            st.dirty.clear();
            st.waiting.clear();
            st.waiting_at.clear();
            self.report_depth(&st);
        }
        debug!(queue = %self.name, "queue shut down");
        self.notify.notify_waiters();
    }

    pub fn is_shutting_down(&self) -> bool {
        self.lock().shutting_down
    }

    /// Number of keys ready for `get`.
    pub fn len(&self) -> usize {
        self.lock().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
