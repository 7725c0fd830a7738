use serde::{Deserialize, Serialize};

/// One event decoded from the remote capability's event stream.
///
/// The `complete` payload stays untyped here; the stream reader validates it
/// into an `AnalysisResult` before anything downstream sees it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamingChunk {
    Progress {
        percent: f64,
        stage: String,
        #[serde(default)]
        message: String,
    },
    Partial {
        section: String,
        content: serde_json::Value,
    },
    Complete {
        result: serde_json::Value,
    },
    Error {
        code: String,
        message: String,
        #[serde(default)]
        retryable: bool,
    },
}

impl StreamingChunk {
    pub fn tag(&self) -> &'static str {
        match self {
            StreamingChunk::Progress { .. } => "progress",
            StreamingChunk::Partial { .. } => "partial",
            StreamingChunk::Complete { .. } => "complete",
            StreamingChunk::Error { .. } => "error",
        }
    }
}
