//! Quota/Rate Gate: per-caller limits over a rolling minute, the UTC
//! calendar day and the UTC calendar month.
//!
//! Admission counts toward the rolling minute whatever the outcome. Day and
//! month units are reserved atomically at admission and handed back unless
//! the analysis succeeds, so only successes are charged.
//!
//! Read failures of the ledger are never fatal: the gate assumes no usage and
//! the free tier. Writes are best-effort and time-bounded.

pub mod ledger;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Datelike, NaiveDate, Utc};
use serde::Serialize;
use tracing::warn;

use crate::models::user::SubscriptionTier;
use crate::quota::ledger::{Consumed, LedgerError, UsageLedger, UsageWindow};

pub const MINUTE_LIMIT: u64 = 10;
pub const DAILY_LIMIT: u64 = 100;

const DEFAULT_LEDGER_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum QuotaScope {
    Rate,
    Daily,
    Monthly,
}

impl fmt::Display for QuotaScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            QuotaScope::Rate => "rate",
            QuotaScope::Daily => "daily",
            QuotaScope::Monthly => "monthly",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WindowUsage {
    pub used: u64,
    pub limit: u64,
    pub remaining: u64,
    pub resets_at: DateTime<Utc>,
}

impl WindowUsage {
    fn new(used: u64, limit: u64, resets_at: DateTime<Utc>) -> Self {
        Self {
            used,
            limit,
            remaining: limit.saturating_sub(used),
            resets_at,
        }
    }

    pub fn exhausted(&self) -> bool {
        self.used >= self.limit
    }
}

/// Snapshot of one caller's usage in every window.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QuotaRecord {
    pub caller_id: String,
    pub tier: SubscriptionTier,
    pub minute: WindowUsage,
    pub day: WindowUsage,
    pub month: WindowUsage,
}

impl QuotaRecord {
    /// First exhausted window, checked rate → daily → monthly.
    pub fn exhausted(&self) -> Option<QuotaScope> {
        if self.minute.exhausted() {
            Some(QuotaScope::Rate)
        } else if self.day.exhausted() {
            Some(QuotaScope::Daily)
        } else if self.month.exhausted() {
            Some(QuotaScope::Monthly)
        } else {
            None
        }
    }
}

#[derive(Clone)]
pub struct QuotaGate {
    ledger: Arc<dyn UsageLedger>,
    ledger_timeout: Duration,
}

impl QuotaGate {
    pub fn new(ledger: Arc<dyn UsageLedger>) -> Self {
        Self {
            ledger,
            ledger_timeout: DEFAULT_LEDGER_TIMEOUT,
        }
    }

    pub async fn record(&self, caller_id: &str) -> QuotaRecord {
        let (minute, day, month, tier) = tokio::join!(
            self.bounded(self.ledger.usage(caller_id, UsageWindow::Minute)),
            self.bounded(self.ledger.usage(caller_id, UsageWindow::Day)),
            self.bounded(self.ledger.usage(caller_id, UsageWindow::Month)),
            self.bounded(self.ledger.tier(caller_id)),
        );

        let minute = or_default(minute, caller_id, "minute usage");
        let day = or_default(day, caller_id, "daily usage");
        let month = or_default(month, caller_id, "monthly usage");
        let tier = or_default(tier, caller_id, "tier");

        let now = Utc::now();
        QuotaRecord {
            caller_id: caller_id.to_string(),
            tier,
            minute: WindowUsage::new(minute, MINUTE_LIMIT, now + chrono::Duration::seconds(60)),
            day: WindowUsage::new(day, DAILY_LIMIT, next_day(now)),
            month: WindowUsage::new(month, tier.monthly_limit(), next_month(now)),
        }
    }

    /// Passes when every window has headroom; otherwise names the first
    /// exhausted scope.
    pub async fn check(&self, caller_id: &str) -> Result<QuotaRecord, QuotaScope> {
        let record = self.record(caller_id).await;
        match record.exhausted() {
            Some(scope) => Err(scope),
            None => Ok(record),
        }
    }

    /// Admits one request: counts it in the rolling minute and reserves one
    /// day and month unit. Over-limit reservations are refunded before the
    /// scope is returned, so concurrent callers cannot overrun a cap.
    pub async fn reserve(&self, caller_id: &str) -> Result<QuotaReservation, QuotaScope> {
        let record = self.check(caller_id).await?;
        let at = Utc::now();

        match self.bounded(self.ledger.count_request(caller_id, at)).await {
            Ok(count) if count > MINUTE_LIMIT => return Err(QuotaScope::Rate),
            Ok(_) => {}
            Err(e) => warn!("Failed to count request for caller '{caller_id}': {e}"),
        }

        let consumed = match self.bounded(self.ledger.decrement(caller_id, at)).await {
            Ok(consumed) => consumed,
            Err(e) => {
                warn!("Failed to reserve usage for caller '{caller_id}': {e}");
                return Ok(QuotaReservation::unheld(self.clone(), caller_id, at));
            }
        };

        let reservation = QuotaReservation::held(self.clone(), caller_id, at);
        match over_limit(consumed, &record) {
            Some(scope) => {
                reservation.release().await;
                Err(scope)
            }
            None => Ok(reservation),
        }
    }

    async fn refund(&self, caller_id: &str, at: DateTime<Utc>) {
        if let Err(e) = self.bounded(self.ledger.refund(caller_id, at)).await {
            warn!("Failed to refund usage for caller '{caller_id}': {e}");
        }
    }

    async fn bounded<T>(
        &self,
        call: impl std::future::Future<Output = Result<T, LedgerError>>,
    ) -> Result<T, LedgerError> {
        tokio::time::timeout(self.ledger_timeout, call)
            .await
            .unwrap_or(Err(LedgerError::Timeout))
    }
}

fn over_limit(consumed: Consumed, record: &QuotaRecord) -> Option<QuotaScope> {
    if consumed.day > record.day.limit {
        Some(QuotaScope::Daily)
    } else if consumed.month > record.month.limit {
        Some(QuotaScope::Monthly)
    } else {
        None
    }
}

/// One reserved day/month unit. Dropping it without `commit` hands the unit
/// back, so failed, degraded and cancelled analyses are never charged.
pub struct QuotaReservation {
    gate: QuotaGate,
    caller_id: String,
    reserved_at: DateTime<Utc>,
    held: bool,
}

impl QuotaReservation {
    fn held(gate: QuotaGate, caller_id: &str, reserved_at: DateTime<Utc>) -> Self {
        Self::with_hold(gate, caller_id, reserved_at, true)
    }

    /// The ledger write failed; nothing to hand back.
    fn unheld(gate: QuotaGate, caller_id: &str, reserved_at: DateTime<Utc>) -> Self {
        Self::with_hold(gate, caller_id, reserved_at, false)
    }

    fn with_hold(gate: QuotaGate, caller_id: &str, reserved_at: DateTime<Utc>, held: bool) -> Self {
        Self {
            gate,
            caller_id: caller_id.to_string(),
            reserved_at,
            held,
        }
    }

    /// Keeps the unit as consumed.
    pub fn commit(mut self) {
        self.held = false;
    }

    /// Hands the unit back and waits for the ledger.
    pub async fn release(mut self) {
        if std::mem::take(&mut self.held) {
            self.gate.refund(&self.caller_id, self.reserved_at).await;
        }
    }
}

impl Drop for QuotaReservation {
    fn drop(&mut self) {
        if !self.held {
            return;
        }
        let gate = self.gate.clone();
        let caller_id = std::mem::take(&mut self.caller_id);
        let at = self.reserved_at;
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move { gate.refund(&caller_id, at).await });
            }
            Err(_) => warn!("No runtime to refund usage for caller '{caller_id}'"),
        }
    }
}

fn or_default<T: Default>(res: Result<T, LedgerError>, caller_id: &str, what: &str) -> T {
    res.unwrap_or_else(|e| {
        warn!("Usage ledger read of {what} for '{caller_id}' failed, assuming none: {e}");
        T::default()
    })
}

fn next_day(now: DateTime<Utc>) -> DateTime<Utc> {
    let date = now.date_naive().succ_opt().unwrap_or(NaiveDate::MAX);
    midnight(date)
}

fn next_month(now: DateTime<Utc>) -> DateTime<Utc> {
    let (year, month) = if now.month() == 12 {
        (now.year() + 1, 1)
    } else {
        (now.year(), now.month() + 1)
    };
    let date = NaiveDate::from_ymd_opt(year, month, 1).unwrap_or(NaiveDate::MAX);
    midnight(date)
}

fn midnight(date: NaiveDate) -> DateTime<Utc> {
    date.and_hms_opt(0, 0, 0)
        .map(|dt| dt.and_utc())
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::quota::ledger::MemoryUsageLedger;
    use async_trait::async_trait;
    use chrono::TimeZone;

    struct BrokenLedger;

    #[async_trait]
    impl UsageLedger for BrokenLedger {
        async fn usage(&self, _: &str, _: UsageWindow) -> Result<u64, LedgerError> {
            Err(LedgerError::Timeout)
        }
        async fn count_request(&self, _: &str, _: DateTime<Utc>) -> Result<u64, LedgerError> {
            Err(LedgerError::Timeout)
        }
        async fn decrement(&self, _: &str, _: DateTime<Utc>) -> Result<Consumed, LedgerError> {
            Err(LedgerError::Timeout)
        }
        async fn refund(&self, _: &str, _: DateTime<Utc>) -> Result<(), LedgerError> {
            Err(LedgerError::Timeout)
        }
        async fn tier(&self, _: &str) -> Result<SubscriptionTier, LedgerError> {
            Err(LedgerError::Timeout)
        }
    }

    fn gate_with(ledger: Arc<MemoryUsageLedger>) -> QuotaGate {
        QuotaGate::new(ledger)
    }

    #[tokio::test]
    async fn test_fresh_caller_passes() {
        let ledger = Arc::new(MemoryUsageLedger::new());
        let record = gate_with(ledger).check("alice").await.unwrap();
        assert_eq!(record.minute.remaining, MINUTE_LIMIT);
        assert_eq!(record.day.limit, DAILY_LIMIT);
        assert_eq!(record.month.limit, 5);
        assert_eq!(record.tier, SubscriptionTier::Free);
    }

    #[tokio::test]
    async fn test_daily_cap_rejects_with_daily_scope() {
        let ledger = Arc::new(MemoryUsageLedger::new());
        ledger.set_tier("alice", SubscriptionTier::Enterprise);
        ledger.set_usage("alice", UsageWindow::Day, DAILY_LIMIT);
        assert_eq!(gate_with(ledger).check("alice").await, Err(QuotaScope::Daily));
    }

    #[tokio::test]
    async fn test_rate_is_checked_before_calendar_windows() {
        let ledger = Arc::new(MemoryUsageLedger::new());
        ledger.set_usage("alice", UsageWindow::Minute, MINUTE_LIMIT);
        ledger.set_usage("alice", UsageWindow::Day, DAILY_LIMIT);
        assert_eq!(gate_with(ledger).check("alice").await, Err(QuotaScope::Rate));
    }

    #[tokio::test]
    async fn test_monthly_cap_follows_tier() {
        let ledger = Arc::new(MemoryUsageLedger::new());
        ledger.set_usage("alice", UsageWindow::Month, 5);
        let gate = gate_with(ledger.clone());
        assert_eq!(gate.check("alice").await, Err(QuotaScope::Monthly));

        ledger.set_tier("alice", SubscriptionTier::Pro);
        let record = gate.check("alice").await.unwrap();
        assert_eq!(record.month.remaining, 95);
    }

    #[tokio::test]
    async fn test_committed_reservation_consumes_one_analysis() {
        let ledger = Arc::new(MemoryUsageLedger::new());
        let gate = gate_with(ledger);
        gate.reserve("alice").await.unwrap().commit();
        let record = gate.record("alice").await;
        assert_eq!(record.minute.used, 1);
        assert_eq!(record.day.used, 1);
        assert_eq!(record.month.used, 1);
    }

    #[tokio::test]
    async fn test_released_reservation_still_counts_the_request() {
        let ledger = Arc::new(MemoryUsageLedger::new());
        let gate = gate_with(ledger);
        gate.reserve("alice").await.unwrap().release().await;
        let record = gate.record("alice").await;
        assert_eq!(record.minute.used, 1);
        assert_eq!(record.day.used, 0);
        assert_eq!(record.month.used, 0);
    }

    #[tokio::test]
    async fn test_dropped_reservation_is_refunded() {
        let ledger = Arc::new(MemoryUsageLedger::new());
        let gate = gate_with(ledger);
        drop(gate.reserve("alice").await.unwrap());
        for _ in 0..5 {
            tokio::task::yield_now().await;
        }
        assert_eq!(gate.record("alice").await.day.used, 0);
    }

    #[tokio::test]
    async fn test_eleventh_request_in_a_minute_hits_rate_scope() {
        let ledger = Arc::new(MemoryUsageLedger::new());
        let gate = gate_with(ledger);
        for _ in 0..MINUTE_LIMIT {
            gate.reserve("alice").await.unwrap().release().await;
        }
        assert_eq!(gate.reserve("alice").await.err(), Some(QuotaScope::Rate));
    }

    #[tokio::test]
    async fn test_concurrent_reservations_cannot_overrun_daily_cap() {
        let ledger = Arc::new(MemoryUsageLedger::new());
        ledger.set_tier("alice", SubscriptionTier::Enterprise);
        ledger.set_usage("alice", UsageWindow::Day, DAILY_LIMIT - 1);
        let gate = gate_with(ledger);

        let attempts = futures::future::join_all((0..5).map(|_| gate.reserve("alice"))).await;
        let (held, rejected): (Vec<_>, Vec<_>) = attempts.into_iter().partition(|r| r.is_ok());
        assert_eq!(held.len(), 1);
        assert!(rejected
            .iter()
            .all(|r| matches!(r, Err(QuotaScope::Daily))));
        for reservation in held.into_iter().flatten() {
            reservation.commit();
        }
        assert_eq!(gate.record("alice").await.day.used, DAILY_LIMIT);
    }

    #[tokio::test]
    async fn test_ledger_failures_are_not_fatal() {
        let gate = QuotaGate::new(Arc::new(BrokenLedger));
        let record = gate.check("alice").await.unwrap();
        assert_eq!(record.day.used, 0);
        assert_eq!(record.tier, SubscriptionTier::Free);
        gate.reserve("alice").await.unwrap().commit();
    }

    #[test]
    fn test_reset_boundaries() {
        let now = Utc.with_ymd_and_hms(2026, 12, 31, 18, 30, 0).unwrap();
        assert_eq!(next_day(now), Utc.with_ymd_and_hms(2027, 1, 1, 0, 0, 0).unwrap());
        assert_eq!(next_month(now), Utc.with_ymd_and_hms(2027, 1, 1, 0, 0, 0).unwrap());

        let mid = Utc.with_ymd_and_hms(2026, 2, 14, 9, 0, 0).unwrap();
        assert_eq!(next_month(mid), Utc.with_ymd_and_hms(2026, 3, 1, 0, 0, 0).unwrap());
    }
}
