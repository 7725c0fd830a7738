//! Orchestrator: runs one analysis request end to end.
//!
//! cache → quota reservation → queue slot → circuit breaker (+ retries) →
//! remote call or stream → cache and quota commit. Terminal failures fall back to the local
//! heuristic scorer only when the caller opted into degraded mode.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::analysis::error_log::{ErrorLog, ErrorRecord};
use crate::analysis::errors::AnalysisError;
use crate::capability::{CapabilityRequest, ScoringCapability};
use crate::models::analysis::{validate_remote_result, AnalysisRequest, AnalysisResult, ProcessingMetadata};
use crate::quota::QuotaGate;
use crate::resilience::{
    AnalysisCache, BreakerConfig, BreakerError, CacheConfig, CircuitBreaker, CircuitState,
    QueueConfig, QueueError, RequestQueue,
};
use crate::scoring::FallbackScorer;
use crate::streaming::{ChunkHandler, Discard, StreamReader};

const MAX_RETRY_DELAY: Duration = Duration::from_secs(30);
const ERROR_LOG_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub cache: CacheConfig,
    pub breaker: BreakerConfig,
    pub queue: QueueConfig,
    /// Used when a request carries no `timeout_ms`.
    pub default_timeout: Duration,
    /// First backoff delay; doubles on every retry.
    pub retry_base_delay: Duration,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            cache: CacheConfig::default(),
            breaker: BreakerConfig::default(),
            queue: QueueConfig::default(),
            default_timeout: Duration::from_millis(60_000),
            retry_base_delay: Duration::from_secs(1),
        }
    }
}

pub struct Orchestrator {
    capability: Arc<dyn ScoringCapability>,
    error_log: Arc<dyn ErrorLog>,
    quota: QuotaGate,
    cache: AnalysisCache,
    breaker: CircuitBreaker,
    queue: RequestQueue,
    fallback: FallbackScorer,
    default_timeout: Duration,
    retry_base_delay: Duration,
}

impl Orchestrator {
    pub fn new(
        capability: Arc<dyn ScoringCapability>,
        quota: QuotaGate,
        error_log: Arc<dyn ErrorLog>,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            capability,
            error_log,
            quota,
            cache: AnalysisCache::new(config.cache),
            breaker: CircuitBreaker::new("scoring-capability", config.breaker),
            queue: RequestQueue::new(config.queue),
            fallback: FallbackScorer,
            default_timeout: config.default_timeout,
            retry_base_delay: config.retry_base_delay,
        }
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    pub fn queue(&self) -> &RequestQueue {
        &self.queue
    }

    pub fn quota(&self) -> &QuotaGate {
        &self.quota
    }

    /// Single-shot or streamed per `request.options.streaming`, with
    /// intermediate chunks dropped.
    pub async fn analyze(
        &self,
        request: &AnalysisRequest,
        cancel: &CancellationToken,
    ) -> Result<AnalysisResult, AnalysisError> {
        self.run(request, &mut Discard, cancel).await
    }

    /// Runs the request, forwarding progress and partial chunks to `handler`
    /// when streaming. Resolves exactly once, with `Cancelled` if `cancel`
    /// fires first.
    pub async fn run(
        &self,
        request: &AnalysisRequest,
        handler: &mut dyn ChunkHandler,
        cancel: &CancellationToken,
    ) -> Result<AnalysisResult, AnalysisError> {
        let started = Instant::now();

        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(AnalysisError::Cancelled),
            outcome = self.execute(request, handler, cancel, started) => outcome,
        };

        match outcome {
            Ok(result) => Ok(result),
            Err(err) => {
                self.record_error(request, &err);
                if request.options.allow_degraded && err.is_degradable() {
                    warn!(
                        caller_id = %request.caller_id,
                        "Serving fallback result: {err}"
                    );
                    Ok(self.degraded(request, &err, started))
                } else {
                    Err(err)
                }
            }
        }
    }

    async fn execute(
        &self,
        request: &AnalysisRequest,
        handler: &mut dyn ChunkHandler,
        cancel: &CancellationToken,
        started: Instant,
    ) -> Result<AnalysisResult, AnalysisError> {
        validate_request(request)?;

        let key = AnalysisCache::key(&request.document, &request.role_description);
        if let Some(mut hit) = self.cache.get(&key) {
            debug!(caller_id = %request.caller_id, "Cache hit");
            hit.metadata.cache_hit = true;
            hit.metadata.elapsed_ms = elapsed_ms(started);
            return Ok(hit);
        }

        // Dropped on every early return, which refunds the unit.
        let reservation = self
            .quota
            .reserve(&request.caller_id)
            .await
            .map_err(|scope| AnalysisError::QuotaExceeded { scope })?;

        let timeout = request
            .options
            .timeout_ms
            .map(Duration::from_millis)
            .unwrap_or(self.default_timeout);

        let mut result = self
            .queue
            .submit(request.options.priority, timeout, move || {
                self.call_with_retries(request, handler, cancel)
            })
            .await
            .map_err(|e| match e {
                QueueError::Timeout(d) => {
                    AnalysisError::unavailable(format!("request timed out after {}ms", d.as_millis()))
                }
                QueueError::Closed => AnalysisError::Internal("request queue closed".to_string()),
            })??;

        result.metadata.elapsed_ms = elapsed_ms(started);
        self.cache.put(key, result.clone());
        reservation.commit();

        info!(
            caller_id = %request.caller_id,
            overall_score = result.overall_score,
            elapsed_ms = result.metadata.elapsed_ms,
            "Analysis complete"
        );
        Ok(result)
    }

    /// Retries retryable failures with exponential backoff, but never once
    /// the circuit has opened.
    async fn call_with_retries(
        &self,
        request: &AnalysisRequest,
        handler: &mut dyn ChunkHandler,
        cancel: &CancellationToken,
    ) -> Result<AnalysisResult, AnalysisError> {
        let mut attempt: u32 = 0;
        loop {
            let chunks: &mut dyn ChunkHandler = &mut *handler;
            let err = match self
                .breaker
                .call(move || self.call_remote(request, chunks, cancel))
                .await
            {
                Ok(result) => return Ok(result),
                Err(BreakerError::Open) => return Err(AnalysisError::unavailable("circuit open")),
                Err(BreakerError::Timeout(d)) => {
                    AnalysisError::unavailable(format!("remote call timed out after {}ms", d.as_millis()))
                }
                Err(BreakerError::Inner(e)) => e,
            };

            if !err.is_retryable()
                || attempt >= request.options.max_retries
                || self.breaker.state() == CircuitState::Open
            {
                return Err(err);
            }

            let delay = self
                .retry_base_delay
                .saturating_mul(2u32.saturating_pow(attempt))
                .min(MAX_RETRY_DELAY);
            attempt += 1;
            warn!(
                caller_id = %request.caller_id,
                "Remote attempt {attempt} failed ({err}), retrying in {delay:?}"
            );
            tokio::time::sleep(delay).await;
        }
    }

    async fn call_remote(
        &self,
        request: &AnalysisRequest,
        handler: &mut dyn ChunkHandler,
        cancel: &CancellationToken,
    ) -> Result<AnalysisResult, AnalysisError> {
        let started = Instant::now();
        if request.options.streaming {
            let stream = self
                .capability
                .analyze_stream(&CapabilityRequest::streaming(request))
                .await?;
            Ok(StreamReader::new(handler, cancel.clone()).read(stream).await?)
        } else {
            let payload = self
                .capability
                .analyze(&CapabilityRequest::single_shot(request))
                .await?;
            validate_remote_result(payload, ProcessingMetadata::remote(elapsed_ms(started)))
                .map_err(|details| AnalysisError::Validation { details })
        }
    }

    fn degraded(&self, request: &AnalysisRequest, err: &AnalysisError, started: Instant) -> AnalysisResult {
        let mut result = self.fallback.score_with_depth(
            &request.document,
            &request.role_description,
            request.options.analysis_depth,
        );
        result.metadata.degraded_reason = Some(err.to_string());
        result.metadata.elapsed_ms = elapsed_ms(started);
        result
    }

    /// Records a failure that happened before a request reached the pipeline,
    /// such as an unreadable upload.
    pub fn record_failure(&self, caller_id: &str, err: &AnalysisError) {
        self.submit_record(ErrorRecord::new(caller_id, err, json!({"stage": "intake"})));
    }

    fn record_error(&self, request: &AnalysisRequest, err: &AnalysisError) {
        self.submit_record(ErrorRecord::new(
            &request.caller_id,
            err,
            json!({
                "priority": request.options.priority,
                "analysis_depth": request.options.analysis_depth.as_str(),
                "streaming": request.options.streaming,
                "allow_degraded": request.options.allow_degraded,
                "circuit_state": self.breaker.state(),
            }),
        ));
    }

    fn submit_record(&self, record: ErrorRecord) {
        let log = Arc::clone(&self.error_log);
        tokio::spawn(async move {
            match tokio::time::timeout(ERROR_LOG_TIMEOUT, log.record(&record)).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!("Failed to record analysis error {}: {e:#}", record.id),
                Err(_) => warn!("Timed out recording analysis error {}", record.id),
            }
        });
    }
}

fn validate_request(request: &AnalysisRequest) -> Result<(), AnalysisError> {
    let mut details = Vec::new();
    if request.document.trim().is_empty() {
        details.push("document is empty".to_string());
    }
    if request.role_description.trim().is_empty() {
        details.push("role_description is empty".to_string());
    }
    if request.caller_id.trim().is_empty() {
        details.push("caller_id is empty".to_string());
    }
    if details.is_empty() {
        Ok(())
    } else {
        Err(AnalysisError::InvalidRequest { details })
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    started.elapsed().as_millis() as u64
}
