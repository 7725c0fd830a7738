use thiserror::Error;

use crate::capability::CapabilityError;
use crate::extraction::ExtractionError;
use crate::models::analysis::Severity;
use crate::quota::QuotaScope;
use crate::streaming::StreamError;

/// Typed failures of one analysis request.
#[derive(Debug, Error)]
pub enum AnalysisError {
    /// Rejected before any queueing; nothing was consumed.
    #[error("Invalid request: {}", .details.join("; "))]
    InvalidRequest { details: Vec<String> },

    #[error("Quota exceeded ({scope})")]
    QuotaExceeded { scope: QuotaScope },

    /// Circuit open, timeout, or the remote failed to serve the call.
    #[error("Scoring capability unavailable: {reason}")]
    CapabilityUnavailable { reason: String, retryable: bool },

    /// The remote answered with a result that fails validation.
    #[error("Remote result failed validation: {}", .details.join("; "))]
    Validation { details: Vec<String> },

    #[error("Streaming protocol error: {0}")]
    StreamingProtocol(String),

    #[error("Extraction error: {0}")]
    Extraction(#[from] ExtractionError),

    #[error("Analysis cancelled")]
    Cancelled,

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AnalysisError {
    pub fn unavailable(reason: impl Into<String>) -> Self {
        AnalysisError::CapabilityUnavailable {
            reason: reason.into(),
            retryable: true,
        }
    }

    /// Stable machine-readable code, shared by HTTP bodies, stream error
    /// events and the error log.
    pub fn code(&self) -> &'static str {
        match self {
            AnalysisError::InvalidRequest { .. } => "VALIDATION_ERROR",
            AnalysisError::QuotaExceeded { .. } => "QUOTA_EXCEEDED",
            AnalysisError::CapabilityUnavailable { .. } => "CAPABILITY_UNAVAILABLE",
            AnalysisError::Validation { .. } => "UPSTREAM_VALIDATION_ERROR",
            AnalysisError::StreamingProtocol(_) => "STREAMING_PROTOCOL_ERROR",
            AnalysisError::Extraction(_) => "EXTRACTION_ERROR",
            AnalysisError::Cancelled => "CANCELLED",
            AnalysisError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    pub fn severity(&self) -> Severity {
        match self {
            AnalysisError::QuotaExceeded { .. }
            | AnalysisError::InvalidRequest { .. }
            | AnalysisError::Cancelled => Severity::Low,
            AnalysisError::Extraction(_) => Severity::Medium,
            AnalysisError::CapabilityUnavailable { .. }
            | AnalysisError::Validation { .. }
            | AnalysisError::StreamingProtocol(_)
            | AnalysisError::Internal(_) => Severity::High,
        }
    }

    /// Worth another attempt against the remote.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            AnalysisError::CapabilityUnavailable { retryable: true, .. }
        )
    }

    /// May be replaced by a fallback result when the caller allows it.
    pub fn is_degradable(&self) -> bool {
        matches!(
            self,
            AnalysisError::CapabilityUnavailable { .. } | AnalysisError::StreamingProtocol(_)
        )
    }
}

impl From<CapabilityError> for AnalysisError {
    fn from(err: CapabilityError) -> Self {
        match err {
            CapabilityError::Parse(e) => AnalysisError::Validation {
                details: vec![format!("response body is not JSON: {e}")],
            },
            other => AnalysisError::CapabilityUnavailable {
                retryable: other.is_retryable(),
                reason: other.to_string(),
            },
        }
    }
}

impl From<StreamError> for AnalysisError {
    fn from(err: StreamError) -> Self {
        match err {
            StreamError::Cancelled => AnalysisError::Cancelled,
            StreamError::Transport(e) => e.into(),
            StreamError::Remote {
                code,
                message,
                retryable: true,
            } => AnalysisError::unavailable(format!("{code}: {message}")),
            other => AnalysisError::StreamingProtocol(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_severity_by_kind() {
        assert_eq!(
            AnalysisError::QuotaExceeded {
                scope: QuotaScope::Rate
            }
            .severity(),
            Severity::Low
        );
        assert_eq!(AnalysisError::unavailable("open").severity(), Severity::High);
        assert_eq!(
            AnalysisError::StreamingProtocol("x".into()).severity(),
            Severity::High
        );
        assert_eq!(
            AnalysisError::Extraction(ExtractionError::Empty).severity(),
            Severity::Medium
        );
    }

    #[test]
    fn test_only_capability_and_stream_failures_degrade() {
        assert!(AnalysisError::unavailable("open").is_degradable());
        assert!(AnalysisError::StreamingProtocol("eof".into()).is_degradable());
        assert!(!AnalysisError::Validation { details: vec![] }.is_degradable());
        assert!(!AnalysisError::Cancelled.is_degradable());
        assert!(!AnalysisError::QuotaExceeded {
            scope: QuotaScope::Daily
        }
        .is_degradable());
    }

    #[test]
    fn test_capability_errors_map_by_retryability() {
        let busy: AnalysisError = CapabilityError::Api {
            status: 503,
            message: "busy".into(),
        }
        .into();
        assert!(busy.is_retryable());

        let rejected: AnalysisError = CapabilityError::Api {
            status: 400,
            message: "bad".into(),
        }
        .into();
        assert!(matches!(
            rejected,
            AnalysisError::CapabilityUnavailable {
                retryable: false,
                ..
            }
        ));
    }

    #[test]
    fn test_stream_errors_map_to_taxonomy() {
        let retryable: AnalysisError = StreamError::Remote {
            code: "OVERLOADED".into(),
            message: "try later".into(),
            retryable: true,
        }
        .into();
        assert!(retryable.is_retryable());

        let ended: AnalysisError = StreamError::EndedWithoutResult.into();
        assert_eq!(ended.code(), "STREAMING_PROTOCOL_ERROR");
        assert!(ended.to_string().contains("stream ended without result"));

        let invalid: AnalysisError = StreamError::InvalidResult(vec!["scores missing".into()]).into();
        assert!(matches!(invalid, AnalysisError::StreamingProtocol(_)));

        assert!(matches!(
            AnalysisError::from(StreamError::Cancelled),
            AnalysisError::Cancelled
        ));
    }
}
