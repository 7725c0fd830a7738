//! Circuit Breaker: guards the single remote-capability call.
//!
//! ```text
//! Closed → Open:      failure ratio ≥ threshold over the rolling window
//! Open → HalfOpen:    after the reset timeout
//! HalfOpen → Closed:  the probe call succeeds
//! HalfOpen → Open:    the probe call fails
//! ```
//!
//! Only one probe is let through while half-open; concurrent callers are
//! rejected as if the circuit were open. Every call is bounded by
//! `call_timeout`, and a timeout counts as a failure.

use std::collections::VecDeque;
use std::future::Future;
use std::sync::Mutex;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;
use tokio::sync::broadcast;
use tokio::time::Instant;
use tracing::{info, warn};

const EVENT_CAPACITY: usize = 64;

#[derive(Debug, Clone)]
pub struct BreakerConfig {
    /// Failure share (0–1) at or above which the circuit opens.
    pub failure_ratio: f64,
    pub window: Duration,
    pub buckets: u32,
    /// Calls the window must hold before the ratio is considered.
    pub min_calls: u32,
    pub reset_timeout: Duration,
    pub call_timeout: Duration,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_ratio: 0.5,
            window: Duration::from_secs(10),
            buckets: 10,
            min_calls: 5,
            reset_timeout: Duration::from_secs(30),
            call_timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerEvent {
    Opened,
    HalfOpened,
    Closed,
    /// A call was refused without reaching the downstream.
    Rejected,
}

#[derive(Debug, Error)]
pub enum BreakerError<E> {
    #[error("circuit is open")]
    Open,

    #[error("call timed out after {0:?}")]
    Timeout(Duration),

    #[error("{0}")]
    Inner(E),
}

#[derive(Debug)]
struct Bucket {
    started: Instant,
    successes: u32,
    failures: u32,
}

#[derive(Debug)]
struct BreakerInner {
    state: CircuitState,
    opened_at: Option<Instant>,
    probe_in_flight: bool,
    buckets: VecDeque<Bucket>,
}

pub struct CircuitBreaker {
    name: String,
    config: BreakerConfig,
    inner: Mutex<BreakerInner>,
    events: broadcast::Sender<BreakerEvent>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: BreakerConfig) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            name: name.into(),
            config,
            inner: Mutex::new(BreakerInner {
                state: CircuitState::Closed,
                opened_at: None,
                probe_in_flight: false,
                buckets: VecDeque::new(),
            }),
            events,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BreakerEvent> {
        self.events.subscribe()
    }

    /// Current state, applying the open → half-open transition when the reset
    /// timeout has elapsed.
    pub fn state(&self) -> CircuitState {
        let mut inner = self.lock();
        self.maybe_half_open(&mut inner);
        inner.state
    }

    /// Runs `f` through the breaker. `f` is not invoked at all when the
    /// circuit refuses the call.
    pub async fn call<F, Fut, T, E>(&self, f: F) -> Result<T, BreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let mut attempt = self.admit().ok_or(BreakerError::Open)?;

        match tokio::time::timeout(self.config.call_timeout, f()).await {
            Ok(Ok(value)) => {
                attempt.settle(true);
                Ok(value)
            }
            Ok(Err(err)) => {
                attempt.settle(false);
                Err(BreakerError::Inner(err))
            }
            Err(_) => {
                warn!(
                    "Circuit '{}' call timed out after {:?}",
                    self.name, self.config.call_timeout
                );
                attempt.settle(false);
                Err(BreakerError::Timeout(self.config.call_timeout))
            }
        }
    }

    fn admit(&self) -> Option<Attempt<'_>> {
        let mut inner = self.lock();
        self.maybe_half_open(&mut inner);

        match inner.state {
            CircuitState::Closed => Some(Attempt::new(self, false)),
            CircuitState::HalfOpen if !inner.probe_in_flight => {
                inner.probe_in_flight = true;
                Some(Attempt::new(self, true))
            }
            CircuitState::HalfOpen | CircuitState::Open => {
                self.emit(BreakerEvent::Rejected);
                None
            }
        }
    }

    fn record(&self, probe: bool, success: bool) {
        let mut inner = self.lock();
        let now = Instant::now();

        if probe {
            inner.probe_in_flight = false;
            if success {
                inner.state = CircuitState::Closed;
                inner.opened_at = None;
                inner.buckets.clear();
                info!("Circuit '{}' closed after successful probe", self.name);
                self.emit(BreakerEvent::Closed);
            } else {
                self.trip(&mut inner, now);
            }
            return;
        }

        // A call admitted while closed may finish after the circuit moved on.
        if inner.state != CircuitState::Closed {
            return;
        }

        self.prune(&mut inner, now);
        let bucket = self.current_bucket(&mut inner, now);
        if success {
            bucket.successes += 1;
        } else {
            bucket.failures += 1;
        }

        let (successes, failures) = inner
            .buckets
            .iter()
            .fold((0u32, 0u32), |(s, f), b| (s + b.successes, f + b.failures));
        let total = successes + failures;
        if total >= self.config.min_calls.max(1)
            && failures as f64 / total as f64 >= self.config.failure_ratio
        {
            self.trip(&mut inner, now);
        }
    }

    fn trip(&self, inner: &mut BreakerInner, now: Instant) {
        inner.state = CircuitState::Open;
        inner.opened_at = Some(now);
        inner.buckets.clear();
        warn!(
            "Circuit '{}' opened; rejecting calls for {:?}",
            self.name, self.config.reset_timeout
        );
        self.emit(BreakerEvent::Opened);
    }

    fn maybe_half_open(&self, inner: &mut BreakerInner) {
        if inner.state != CircuitState::Open {
            return;
        }
        let elapsed = inner
            .opened_at
            .map(|at| at.elapsed() >= self.config.reset_timeout)
            .unwrap_or(true);
        if elapsed {
            inner.state = CircuitState::HalfOpen;
            inner.probe_in_flight = false;
            info!("Circuit '{}' half-open; allowing one probe", self.name);
            self.emit(BreakerEvent::HalfOpened);
        }
    }

    fn prune(&self, inner: &mut BreakerInner, now: Instant) {
        while let Some(front) = inner.buckets.front() {
            if now.duration_since(front.started) >= self.config.window {
                inner.buckets.pop_front();
            } else {
                break;
            }
        }
    }

    fn current_bucket<'a>(&self, inner: &'a mut BreakerInner, now: Instant) -> &'a mut Bucket {
        let width = self.config.window / self.config.buckets.max(1);
        let needs_new = inner
            .buckets
            .back()
            .map(|b| now.duration_since(b.started) >= width)
            .unwrap_or(true);
        if needs_new {
            inner.buckets.push_back(Bucket {
                started: now,
                successes: 0,
                failures: 0,
            });
        }
        // Non-empty after the push above.
        let last = inner.buckets.len() - 1;
        &mut inner.buckets[last]
    }

    fn emit(&self, event: BreakerEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BreakerInner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// An admitted call. Dropping it unsettled (the caller was cancelled) frees
/// the probe slot without counting an outcome.
struct Attempt<'a> {
    breaker: &'a CircuitBreaker,
    probe: bool,
    settled: bool,
}

impl<'a> Attempt<'a> {
    fn new(breaker: &'a CircuitBreaker, probe: bool) -> Self {
        Self {
            breaker,
            probe,
            settled: false,
        }
    }

    fn settle(&mut self, success: bool) {
        self.settled = true;
        self.breaker.record(self.probe, success);
    }
}

impl Drop for Attempt<'_> {
    fn drop(&mut self) {
        if !self.settled && self.probe {
            self.breaker.lock().probe_in_flight = false;
        }
    }
}
