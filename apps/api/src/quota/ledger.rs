//! Usage ledger: persisted per-caller counters behind a narrow interface.
//!
//! `RedisUsageLedger` is the production store; `MemoryUsageLedger` keeps the
//! same semantics in process memory for tests and Redis-less development.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use redis::aio::ConnectionManager;
use serde::Serialize;
use thiserror::Error;
use tracing::info;
use uuid::Uuid;

use crate::models::user::SubscriptionTier;

const MINUTE_MS: i64 = 60_000;
const MINUTE_KEY_TTL_SECS: i64 = 120;
const DAY_KEY_TTL_SECS: i64 = 2 * 24 * 60 * 60;
const MONTH_KEY_TTL_SECS: i64 = 32 * 24 * 60 * 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UsageWindow {
    /// The trailing 60 seconds.
    Minute,
    /// The current UTC calendar day.
    Day,
    /// The current UTC calendar month.
    Month,
}

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("ledger call timed out")]
    Timeout,
}

/// Day and month counts after one analysis was consumed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Consumed {
    pub day: u64,
    pub month: u64,
}

#[async_trait]
pub trait UsageLedger: Send + Sync {
    async fn usage(&self, caller_id: &str, window: UsageWindow) -> Result<u64, LedgerError>;

    /// Adds one admitted request to the rolling minute and returns the count
    /// including it.
    async fn count_request(&self, caller_id: &str, at: DateTime<Utc>) -> Result<u64, LedgerError>;

    /// Consumes one analysis from the day and month windows containing `at`.
    /// The increment is atomic, so the returned counts decide admission.
    async fn decrement(&self, caller_id: &str, at: DateTime<Utc>) -> Result<Consumed, LedgerError>;

    /// Returns a unit taken by `decrement` at `at`.
    async fn refund(&self, caller_id: &str, at: DateTime<Utc>) -> Result<(), LedgerError>;

    async fn tier(&self, caller_id: &str) -> Result<SubscriptionTier, LedgerError>;
}

fn day_stamp(now: DateTime<Utc>) -> String {
    now.format("%Y-%m-%d").to_string()
}

fn month_stamp(now: DateTime<Utc>) -> String {
    now.format("%Y-%m").to_string()
}

// ────────────────────────────────────────────────────────────────────────────
// Redis
// ────────────────────────────────────────────────────────────────────────────

/// Keys:
/// - `usage:{caller}:minute` sorted set of request ids scored by epoch millis
/// - `usage:{caller}:day:{YYYY-MM-DD}` and `usage:{caller}:month:{YYYY-MM}` counters
/// - `tier:{caller}` subscription tier name
#[derive(Clone)]
pub struct RedisUsageLedger {
    conn: ConnectionManager,
}

impl RedisUsageLedger {
    pub async fn connect(redis_url: &str) -> Result<Self, LedgerError> {
        info!("Connecting to Redis usage ledger...");
        let client = redis::Client::open(redis_url)?;
        let conn = client.get_connection_manager().await?;
        info!("Redis usage ledger connected");
        Ok(Self { conn })
    }

    fn minute_key(caller_id: &str) -> String {
        format!("usage:{caller_id}:minute")
    }

    fn day_key(caller_id: &str, now: DateTime<Utc>) -> String {
        format!("usage:{caller_id}:day:{}", day_stamp(now))
    }

    fn month_key(caller_id: &str, now: DateTime<Utc>) -> String {
        format!("usage:{caller_id}:month:{}", month_stamp(now))
    }
}

#[async_trait]
impl UsageLedger for RedisUsageLedger {
    async fn usage(&self, caller_id: &str, window: UsageWindow) -> Result<u64, LedgerError> {
        let now = Utc::now();
        let mut conn = self.conn.clone();

        let count = match window {
            UsageWindow::Minute => {
                let floor = now.timestamp_millis() - MINUTE_MS;
                redis::cmd("ZCOUNT")
                    .arg(Self::minute_key(caller_id))
                    .arg(format!("({floor}"))
                    .arg("+inf")
                    .query_async::<_, u64>(&mut conn)
                    .await?
            }
            UsageWindow::Day => redis::cmd("GET")
                .arg(Self::day_key(caller_id, now))
                .query_async::<_, Option<u64>>(&mut conn)
                .await?
                .unwrap_or(0),
            UsageWindow::Month => redis::cmd("GET")
                .arg(Self::month_key(caller_id, now))
                .query_async::<_, Option<u64>>(&mut conn)
                .await?
                .unwrap_or(0),
        };
        Ok(count)
    }

    async fn count_request(&self, caller_id: &str, at: DateTime<Utc>) -> Result<u64, LedgerError> {
        let at_ms = at.timestamp_millis();
        let minute_key = Self::minute_key(caller_id);
        let mut conn = self.conn.clone();

        let (count,): (u64,) = redis::pipe()
            .atomic()
            .cmd("ZREMRANGEBYSCORE")
            .arg(&minute_key)
            .arg("-inf")
            .arg(at_ms - MINUTE_MS)
            .ignore()
            .cmd("ZADD")
            .arg(&minute_key)
            .arg(at_ms)
            .arg(Uuid::new_v4().to_string())
            .ignore()
            .cmd("EXPIRE")
            .arg(&minute_key)
            .arg(MINUTE_KEY_TTL_SECS)
            .ignore()
            .cmd("ZCARD")
            .arg(&minute_key)
            .query_async(&mut conn)
            .await?;
        Ok(count)
    }

    async fn decrement(&self, caller_id: &str, at: DateTime<Utc>) -> Result<Consumed, LedgerError> {
        let day_key = Self::day_key(caller_id, at);
        let month_key = Self::month_key(caller_id, at);
        let mut conn = self.conn.clone();

        let (day, month): (u64, u64) = redis::pipe()
            .atomic()
            .cmd("INCR")
            .arg(&day_key)
            .cmd("EXPIRE")
            .arg(&day_key)
            .arg(DAY_KEY_TTL_SECS)
            .ignore()
            .cmd("INCR")
            .arg(&month_key)
            .cmd("EXPIRE")
            .arg(&month_key)
            .arg(MONTH_KEY_TTL_SECS)
            .ignore()
            .query_async(&mut conn)
            .await?;
        Ok(Consumed { day, month })
    }

    async fn refund(&self, caller_id: &str, at: DateTime<Utc>) -> Result<(), LedgerError> {
        let mut conn = self.conn.clone();
        redis::pipe()
            .atomic()
            .cmd("DECR")
            .arg(Self::day_key(caller_id, at))
            .ignore()
            .cmd("DECR")
            .arg(Self::month_key(caller_id, at))
            .ignore()
            .query_async::<_, ()>(&mut conn)
            .await?;
        Ok(())
    }

    async fn tier(&self, caller_id: &str) -> Result<SubscriptionTier, LedgerError> {
        let mut conn = self.conn.clone();
        let raw: Option<String> = redis::cmd("GET")
            .arg(format!("tier:{caller_id}"))
            .query_async(&mut conn)
            .await?;
        Ok(raw.map(|t| SubscriptionTier::parse(&t)).unwrap_or_default())
    }
}

// ────────────────────────────────────────────────────────────────────────────
// In-memory
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Default)]
struct CallerUsage {
    minute: VecDeque<DateTime<Utc>>,
    day: HashMap<String, u64>,
    month: HashMap<String, u64>,
    tier: SubscriptionTier,
}

#[derive(Debug, Default)]
pub struct MemoryUsageLedger {
    callers: Mutex<HashMap<String, CallerUsage>>,
}

impl MemoryUsageLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_tier(&self, caller_id: &str, tier: SubscriptionTier) {
        self.lock().entry(caller_id.to_string()).or_default().tier = tier;
    }

    /// Overwrites the current count for one window.
    pub fn set_usage(&self, caller_id: &str, window: UsageWindow, count: u64) {
        let now = Utc::now();
        let mut callers = self.lock();
        let usage = callers.entry(caller_id.to_string()).or_default();
        match window {
            UsageWindow::Minute => {
                usage.minute = std::iter::repeat(now).take(count as usize).collect();
            }
            UsageWindow::Day => {
                usage.day.insert(day_stamp(now), count);
            }
            UsageWindow::Month => {
                usage.month.insert(month_stamp(now), count);
            }
        }
    }

    fn usage_at(&self, caller_id: &str, window: UsageWindow, now: DateTime<Utc>) -> u64 {
        let callers = self.lock();
        let Some(usage) = callers.get(caller_id) else {
            return 0;
        };
        match window {
            UsageWindow::Minute => {
                let floor = now - ChronoDuration::milliseconds(MINUTE_MS);
                usage.minute.iter().filter(|at| **at > floor).count() as u64
            }
            UsageWindow::Day => usage.day.get(&day_stamp(now)).copied().unwrap_or(0),
            UsageWindow::Month => usage.month.get(&month_stamp(now)).copied().unwrap_or(0),
        }
    }

    fn count_request_at(&self, caller_id: &str, now: DateTime<Utc>) -> u64 {
        let mut callers = self.lock();
        let usage = callers.entry(caller_id.to_string()).or_default();

        let floor = now - ChronoDuration::milliseconds(MINUTE_MS);
        while usage.minute.front().is_some_and(|at| *at <= floor) {
            usage.minute.pop_front();
        }
        usage.minute.push_back(now);
        usage.minute.len() as u64
    }

    fn consume_at(&self, caller_id: &str, now: DateTime<Utc>) -> Consumed {
        let mut callers = self.lock();
        let usage = callers.entry(caller_id.to_string()).or_default();

        let (day_key, month_key) = (day_stamp(now), month_stamp(now));
        // Old calendar keys would otherwise accumulate.
        usage.day.retain(|k, _| *k == day_key);
        usage.month.retain(|k, _| *k == month_key);

        let day = usage.day.entry(day_key).or_insert(0);
        *day += 1;
        let day = *day;
        let month = usage.month.entry(month_key).or_insert(0);
        *month += 1;
        Consumed { day, month: *month }
    }

    fn refund_at(&self, caller_id: &str, at: DateTime<Utc>) {
        let mut callers = self.lock();
        let Some(usage) = callers.get_mut(caller_id) else {
            return;
        };
        if let Some(day) = usage.day.get_mut(&day_stamp(at)) {
            *day = day.saturating_sub(1);
        }
        if let Some(month) = usage.month.get_mut(&month_stamp(at)) {
            *month = month.saturating_sub(1);
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, CallerUsage>> {
        self.callers.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl UsageLedger for MemoryUsageLedger {
    async fn usage(&self, caller_id: &str, window: UsageWindow) -> Result<u64, LedgerError> {
        Ok(self.usage_at(caller_id, window, Utc::now()))
    }

    async fn count_request(&self, caller_id: &str, at: DateTime<Utc>) -> Result<u64, LedgerError> {
        Ok(self.count_request_at(caller_id, at))
    }

    async fn decrement(&self, caller_id: &str, at: DateTime<Utc>) -> Result<Consumed, LedgerError> {
        Ok(self.consume_at(caller_id, at))
    }

    async fn refund(&self, caller_id: &str, at: DateTime<Utc>) -> Result<(), LedgerError> {
        self.refund_at(caller_id, at);
        Ok(())
    }

    async fn tier(&self, caller_id: &str) -> Result<SubscriptionTier, LedgerError> {
        Ok(self
            .lock()
            .get(caller_id)
            .map(|u| u.tier)
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[tokio::test]
    async fn test_memory_ledger_counts_every_window() {
        let ledger = MemoryUsageLedger::new();
        let now = Utc::now();
        assert_eq!(ledger.count_request("alice", now).await.unwrap(), 1);
        assert_eq!(ledger.count_request("alice", now).await.unwrap(), 2);
        ledger.decrement("alice", now).await.unwrap();
        let consumed = ledger.decrement("alice", now).await.unwrap();
        assert_eq!(consumed, Consumed { day: 2, month: 2 });

        for window in [UsageWindow::Minute, UsageWindow::Day, UsageWindow::Month] {
            assert_eq!(ledger.usage("alice", window).await.unwrap(), 2);
            assert_eq!(ledger.usage("bob", window).await.unwrap(), 0);
        }
    }

    #[test]
    fn test_minute_window_rolls_off() {
        let ledger = MemoryUsageLedger::new();
        let t0 = Utc.with_ymd_and_hms(2026, 3, 10, 12, 0, 0).unwrap();
        ledger.count_request_at("alice", t0);
        ledger.count_request_at("alice", t0 + ChronoDuration::seconds(30));

        let later = t0 + ChronoDuration::seconds(61);
        assert_eq!(ledger.usage_at("alice", UsageWindow::Minute, later), 1);
        assert_eq!(ledger.count_request_at("alice", later), 2);
        assert_eq!(ledger.usage_at("alice", UsageWindow::Day, later), 0);
    }

    #[test]
    fn test_day_resets_at_utc_midnight_but_month_carries() {
        let ledger = MemoryUsageLedger::new();
        let evening = Utc.with_ymd_and_hms(2026, 3, 10, 23, 59, 0).unwrap();
        ledger.consume_at("alice", evening);

        let next_day = Utc.with_ymd_and_hms(2026, 3, 11, 0, 1, 0).unwrap();
        assert_eq!(ledger.usage_at("alice", UsageWindow::Day, next_day), 0);
        assert_eq!(ledger.usage_at("alice", UsageWindow::Month, next_day), 1);

        let next_month = Utc.with_ymd_and_hms(2026, 4, 1, 0, 0, 0).unwrap();
        assert_eq!(ledger.usage_at("alice", UsageWindow::Month, next_month), 0);
    }

    #[test]
    fn test_refund_returns_unit_to_its_own_day() {
        let ledger = MemoryUsageLedger::new();
        let evening = Utc.with_ymd_and_hms(2026, 3, 10, 23, 59, 0).unwrap();
        ledger.consume_at("alice", evening);
        ledger.consume_at("alice", evening);
        ledger.refund_at("alice", evening);
        assert_eq!(ledger.usage_at("alice", UsageWindow::Day, evening), 1);
        assert_eq!(ledger.usage_at("alice", UsageWindow::Month, evening), 1);

        ledger.refund_at("alice", evening);
        ledger.refund_at("alice", evening);
        assert_eq!(ledger.usage_at("alice", UsageWindow::Day, evening), 0);
        ledger.refund_at("bob", evening);
    }

    #[tokio::test]
    async fn test_tier_defaults_to_free() {
        let ledger = MemoryUsageLedger::new();
        assert_eq!(ledger.tier("alice").await.unwrap(), SubscriptionTier::Free);
        ledger.set_tier("alice", SubscriptionTier::Pro);
        assert_eq!(ledger.tier("alice").await.unwrap(), SubscriptionTier::Pro);
    }

    #[tokio::test]
    async fn test_set_usage_overrides_window() {
        let ledger = MemoryUsageLedger::new();
        ledger.set_usage("alice", UsageWindow::Day, 100);
        assert_eq!(ledger.usage("alice", UsageWindow::Day).await.unwrap(), 100);
        assert_eq!(ledger.usage("alice", UsageWindow::Month).await.unwrap(), 0);
    }
}
