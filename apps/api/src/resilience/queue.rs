//! Request Queue: priority admission with bounded concurrency and a rolling
//! rate cap.
//!
//! Waiting tasks live in a heap ordered by priority rank, then enqueue order.
//! Admission is granted through a oneshot; a waiter that gives up (timeout or
//! cancellation) removes itself from the heap, or hands back the slot if the
//! grant raced its departure.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, VecDeque};
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use thiserror::Error;
use tokio::sync::{broadcast, oneshot};
use tokio::time::Instant;
use tracing::debug;

use crate::models::analysis::Priority;

const EVENT_CAPACITY: usize = 64;

#[derive(Debug, Clone)]
pub struct QueueConfig {
    pub concurrency: usize,
    /// Admissions allowed per `rate_interval`.
    pub rate_limit: usize,
    pub rate_interval: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            concurrency: 3,
            rate_limit: 5,
            rate_interval: Duration::from_secs(1),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueEvent {
    /// Work arrived while the queue was idle.
    Active,
    /// Nothing queued and nothing in flight.
    Idle,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum QueueError {
    #[error("task timed out after {0:?}")]
    Timeout(Duration),

    #[error("queue released the task without admitting it")]
    Closed,
}

struct Waiter {
    rank: u8,
    seq: u64,
    grant: oneshot::Sender<()>,
}

impl PartialEq for Waiter {
    fn eq(&self, other: &Self) -> bool {
        self.rank == other.rank && self.seq == other.seq
    }
}

impl Eq for Waiter {}

impl Ord for Waiter {
    // Max-heap: higher rank first, then the earlier sequence number.
    fn cmp(&self, other: &Self) -> Ordering {
        self.rank
            .cmp(&other.rank)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for Waiter {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

struct QueueState {
    waiting: BinaryHeap<Waiter>,
    in_flight: usize,
    /// Admission instants inside the current rate interval.
    admitted: VecDeque<Instant>,
    next_seq: u64,
    timer_armed: bool,
    active: bool,
}

struct Shared {
    config: QueueConfig,
    state: Mutex<QueueState>,
    events: broadcast::Sender<QueueEvent>,
}

#[derive(Clone)]
pub struct RequestQueue {
    shared: Arc<Shared>,
}

impl RequestQueue {
    pub fn new(config: QueueConfig) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            shared: Arc::new(Shared {
                config,
                state: Mutex::new(QueueState {
                    waiting: BinaryHeap::new(),
                    in_flight: 0,
                    admitted: VecDeque::new(),
                    next_seq: 0,
                    timer_armed: false,
                    active: false,
                }),
                events,
            }),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<QueueEvent> {
        self.shared.events.subscribe()
    }

    pub fn queued(&self) -> usize {
        self.shared.lock().waiting.len()
    }

    pub fn in_flight(&self) -> usize {
        self.shared.lock().in_flight
    }

    /// Waits for admission, then runs `task` while holding a slot. `timeout`
    /// covers both the wait and the run; on expiry the task is dropped and
    /// the slot (if any) released.
    pub async fn submit<F, Fut, T>(
        &self,
        priority: Priority,
        timeout: Duration,
        task: F,
    ) -> Result<T, QueueError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let run = async {
            let _slot = self.admit(priority).await?;
            Ok::<T, QueueError>(task().await)
        };
        match tokio::time::timeout(timeout, run).await {
            Ok(result) => result,
            Err(_) => {
                debug!("Queued task timed out after {:?}", timeout);
                Err(QueueError::Timeout(timeout))
            }
        }
    }

    async fn admit(&self, priority: Priority) -> Result<Slot, QueueError> {
        let (grant, rx) = oneshot::channel();
        let seq = {
            let mut state = self.shared.lock();
            let seq = state.next_seq;
            state.next_seq += 1;
            state.waiting.push(Waiter {
                rank: priority.rank(),
                seq,
                grant,
            });
            seq
        };
        let pending = PendingAdmission {
            shared: self.shared.clone(),
            seq,
            rx: Some(rx),
        };
        self.shared.pump();
        pending.wait().await
    }
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Grants as many waiters as the concurrency and rate limits allow.
    fn pump(self: &Arc<Self>) {
        let mut state = self.lock();
        let now = Instant::now();

        while let Some(front) = state.admitted.front() {
            if now.duration_since(*front) >= self.config.rate_interval {
                state.admitted.pop_front();
            } else {
                break;
            }
        }

        while !state.waiting.is_empty() && state.in_flight < self.config.concurrency.max(1) {
            if state.admitted.len() >= self.config.rate_limit.max(1) {
                self.arm_timer(&mut state);
                break;
            }
            let Some(waiter) = state.waiting.pop() else {
                break;
            };
            if waiter.grant.send(()).is_ok() {
                state.in_flight += 1;
                state.admitted.push_back(now);
            }
        }

        let busy = state.in_flight > 0 || !state.waiting.is_empty();
        if busy != state.active {
            state.active = busy;
            let _ = self.events.send(if busy {
                QueueEvent::Active
            } else {
                QueueEvent::Idle
            });
        }
    }

    /// Re-pumps once the oldest admission leaves the rate interval.
    fn arm_timer(self: &Arc<Self>, state: &mut QueueState) {
        if state.timer_armed {
            return;
        }
        let Some(oldest) = state.admitted.front().copied() else {
            return;
        };
        state.timer_armed = true;
        let wake_at = oldest + self.config.rate_interval;
        let shared = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep_until(wake_at).await;
            shared.lock().timer_armed = false;
            shared.pump();
        });
    }

    fn release(self: &Arc<Self>) {
        {
            let mut state = self.lock();
            state.in_flight = state.in_flight.saturating_sub(1);
        }
        self.pump();
    }
}

struct PendingAdmission {
    shared: Arc<Shared>,
    seq: u64,
    rx: Option<oneshot::Receiver<()>>,
}

impl PendingAdmission {
    async fn wait(mut self) -> Result<Slot, QueueError> {
        let granted = match self.rx.as_mut() {
            Some(rx) => rx.await.is_ok(),
            None => false,
        };
        self.rx = None;
        if granted {
            Ok(Slot {
                shared: self.shared.clone(),
            })
        } else {
            Err(QueueError::Closed)
        }
    }
}

impl Drop for PendingAdmission {
    fn drop(&mut self) {
        let Some(mut rx) = self.rx.take() else {
            return;
        };
        let granted = {
            let mut state = self.shared.lock();
            if rx.try_recv().is_ok() {
                true
            } else {
                let seq = self.seq;
                state.waiting.retain(|w| w.seq != seq);
                false
            }
        };
        if granted {
            self.shared.release();
        } else {
            self.shared.pump();
        }
    }
}

/// A held concurrency slot, released on drop.
struct Slot {
    shared: Arc<Shared>,
}

impl Drop for Slot {
    fn drop(&mut self) {
        self.shared.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};
    use tokio::sync::watch;

    const LONG: Duration = Duration::from_secs(600);

    fn queue(concurrency: usize, rate_limit: usize) -> RequestQueue {
        RequestQueue::new(QueueConfig {
            concurrency,
            rate_limit,
            rate_interval: Duration::from_secs(1),
        })
    }

    async fn settle() {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    /// Spawns `n` tasks that hold their slots until the returned sender fires.
    async fn occupy(
        q: &RequestQueue,
        n: usize,
    ) -> (watch::Sender<bool>, Vec<tokio::task::JoinHandle<Result<(), QueueError>>>) {
        let (release, gate) = watch::channel(false);
        let mut handles = Vec::new();
        for _ in 0..n {
            let q = q.clone();
            let mut gate = gate.clone();
            handles.push(tokio::spawn(async move {
                q.submit(Priority::Normal, LONG, || async move {
                    let _ = gate.changed().await;
                })
                .await
            }));
        }
        settle().await;
        (release, handles)
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrency_is_bounded() {
        let q = queue(3, 100);
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let q = q.clone();
                let running = running.clone();
                let peak = peak.clone();
                tokio::spawn(async move {
                    q.submit(Priority::Normal, LONG, || async move {
                        let now = running.fetch_add(1, AtomicOrdering::SeqCst) + 1;
                        peak.fetch_max(now, AtomicOrdering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(50)).await;
                        running.fetch_sub(1, AtomicOrdering::SeqCst);
                    })
                    .await
                })
            })
            .collect();

        for h in handles {
            h.await.unwrap().unwrap();
        }
        assert_eq!(peak.load(AtomicOrdering::SeqCst), 3);
        assert_eq!(q.in_flight(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_high_priority_runs_before_low() {
        let q = queue(3, 100);
        let (release, mut handles) = occupy(&q, 3).await;
        let log = Arc::new(Mutex::new(Vec::new()));

        for (label, priority) in [
            ("low", Priority::Low),
            ("low", Priority::Low),
            ("high", Priority::High),
            ("high", Priority::High),
            ("high", Priority::High),
        ] {
            let q = q.clone();
            let log = log.clone();
            handles.push(tokio::spawn(async move {
                q.submit(priority, LONG, || async move {
                    log.lock().unwrap().push(label);
                    tokio::time::sleep(Duration::from_millis(10)).await;
                })
                .await
            }));
            settle().await;
        }
        assert_eq!(q.queued(), 5);

        release.send(true).unwrap();
        for h in handles {
            h.await.unwrap().unwrap();
        }
        assert_eq!(*log.lock().unwrap(), vec!["high", "high", "high", "low", "low"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fifo_within_priority_band() {
        let q = queue(1, 100);
        let (release, mut handles) = occupy(&q, 1).await;
        let log = Arc::new(Mutex::new(Vec::new()));

        for i in 0..4 {
            let q = q.clone();
            let log = log.clone();
            handles.push(tokio::spawn(async move {
                q.submit(Priority::Normal, LONG, || async move {
                    log.lock().unwrap().push(i);
                })
                .await
            }));
            settle().await;
        }

        release.send(true).unwrap();
        for h in handles {
            h.await.unwrap().unwrap();
        }
        assert_eq!(*log.lock().unwrap(), vec![0, 1, 2, 3]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_cap_defers_excess_admissions() {
        let q = queue(10, 5);
        let t0 = Instant::now();
        let handles: Vec<_> = (0..7)
            .map(|_| {
                let q = q.clone();
                tokio::spawn(async move {
                    q.submit(Priority::Normal, LONG, || async move { t0.elapsed() })
                        .await
                })
            })
            .collect();

        let mut offsets = Vec::new();
        for h in handles {
            offsets.push(h.await.unwrap().unwrap());
        }
        let immediate = offsets.iter().filter(|d| **d < Duration::from_secs(1)).count();
        assert_eq!(immediate, 5);
        assert!(offsets.iter().all(|d| *d < Duration::from_secs(2)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_while_queued_leaves_no_trace() {
        let q = queue(1, 100);
        let (release, handles) = occupy(&q, 1).await;

        let ran = AtomicUsize::new(0);
        let res = q
            .submit(Priority::High, Duration::from_millis(50), || async {
                ran.fetch_add(1, AtomicOrdering::SeqCst);
            })
            .await;
        assert_eq!(res, Err(QueueError::Timeout(Duration::from_millis(50))));
        assert_eq!(q.queued(), 0);
        assert_eq!(ran.load(AtomicOrdering::SeqCst), 0);

        release.send(true).unwrap();
        for h in handles {
            h.await.unwrap().unwrap();
        }
        assert_eq!(q.in_flight(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_in_flight_releases_slot() {
        let q = queue(1, 100);
        let res = q
            .submit(Priority::Normal, Duration::from_secs(1), || {
                tokio::time::sleep(Duration::from_secs(10))
            })
            .await;
        assert!(matches!(res, Err(QueueError::Timeout(_))));
        assert_eq!(q.in_flight(), 0);

        let ok = q.submit(Priority::Normal, LONG, || async { 42 }).await;
        assert_eq!(ok, Ok(42));
    }

    #[tokio::test(start_paused = true)]
    async fn test_emits_active_then_idle() {
        let q = queue(3, 100);
        let mut rx = q.subscribe();
        q.submit(Priority::Normal, LONG, || async {}).await.unwrap();
        assert_eq!(rx.try_recv().unwrap(), QueueEvent::Active);
        assert_eq!(rx.try_recv().unwrap(), QueueEvent::Idle);
        assert!(rx.try_recv().is_err());
    }
}
