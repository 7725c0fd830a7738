//! Error log collaborator. Every failed analysis is recorded with a severity
//! derived from its kind. Recording is fire-and-forget: a failure here is
//! logged and never replaces the error returned to the caller.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::PgPool;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::analysis::errors::AnalysisError;
use crate::models::analysis::Severity;

#[derive(Debug, Clone, Serialize)]
pub struct ErrorRecord {
    pub id: Uuid,
    pub caller_id: String,
    pub code: &'static str,
    pub severity: Severity,
    pub message: String,
    pub context: serde_json::Value,
    pub occurred_at: DateTime<Utc>,
}

impl ErrorRecord {
    pub fn new(caller_id: &str, err: &AnalysisError, context: serde_json::Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            caller_id: caller_id.to_string(),
            code: err.code(),
            severity: err.severity(),
            message: err.to_string(),
            context,
            occurred_at: Utc::now(),
        }
    }
}

#[async_trait]
pub trait ErrorLog: Send + Sync {
    async fn record(&self, record: &ErrorRecord) -> anyhow::Result<()>;
}

fn severity_label(severity: Severity) -> &'static str {
    match severity {
        Severity::High => "high",
        Severity::Medium => "medium",
        Severity::Low => "low",
    }
}

/// Emits each record as a structured `tracing` event only.
pub struct TracingErrorLog;

#[async_trait]
impl ErrorLog for TracingErrorLog {
    async fn record(&self, record: &ErrorRecord) -> anyhow::Result<()> {
        match record.severity {
            Severity::High => error!(
                caller_id = %record.caller_id,
                code = record.code,
                context = %record.context,
                "Analysis failed: {}", record.message
            ),
            Severity::Medium | Severity::Low => warn!(
                caller_id = %record.caller_id,
                code = record.code,
                severity = severity_label(record.severity),
                "Analysis failed: {}", record.message
            ),
        }
        Ok(())
    }
}

/// Persists records to the `analysis_error_log` table.
#[derive(Clone)]
pub struct PgErrorLog {
    pool: PgPool,
}

impl PgErrorLog {
    /// Creates the table if absent.
    pub async fn new(pool: PgPool) -> anyhow::Result<Self> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS analysis_error_log (
                id          UUID PRIMARY KEY,
                caller_id   TEXT NOT NULL,
                code        TEXT NOT NULL,
                severity    TEXT NOT NULL,
                message     TEXT NOT NULL,
                context     JSONB NOT NULL DEFAULT '{}'::jsonb,
                occurred_at TIMESTAMPTZ NOT NULL
            )
            "#,
        )
        .execute(&pool)
        .await?;
        info!("Error log table ready");
        Ok(Self { pool })
    }
}

#[async_trait]
impl ErrorLog for PgErrorLog {
    async fn record(&self, record: &ErrorRecord) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            INSERT INTO analysis_error_log
                (id, caller_id, code, severity, message, context, occurred_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(record.id)
        .bind(&record.caller_id)
        .bind(record.code)
        .bind(severity_label(record.severity))
        .bind(&record.message)
        .bind(&record.context)
        .bind(record.occurred_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

/// Keeps records in memory so tests can assert on them.
#[cfg(test)]
#[derive(Default)]
pub struct MemoryErrorLog {
    records: std::sync::Mutex<Vec<ErrorRecord>>,
}

#[cfg(test)]
impl MemoryErrorLog {
    pub fn records(&self) -> Vec<ErrorRecord> {
        self.records.lock().unwrap().clone()
    }
}

#[cfg(test)]
#[async_trait]
impl ErrorLog for MemoryErrorLog {
    async fn record(&self, record: &ErrorRecord) -> anyhow::Result<()> {
        self.records.lock().unwrap().push(record.clone());
        Ok(())
    }
}
