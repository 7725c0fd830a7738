//! Analysis request/result shapes and the trust-boundary validation applied to
//! payloads coming back from the remote scoring capability.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Fixed component weights. They sum to 1.0.
pub const KEYWORD_WEIGHT: f64 = 0.35;
pub const SKILLS_WEIGHT: f64 = 0.25;
pub const ATS_WEIGHT: f64 = 0.20;
pub const EXPERIENCE_WEIGHT: f64 = 0.20;

// ────────────────────────────────────────────────────────────────────────────
// Request
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisDepth {
    #[default]
    Comprehensive,
    Quick,
    KeywordOnly,
}

impl AnalysisDepth {
    pub fn as_str(&self) -> &'static str {
        match self {
            AnalysisDepth::Comprehensive => "comprehensive",
            AnalysisDepth::Quick => "quick",
            AnalysisDepth::KeywordOnly => "keyword_only",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    High,
    #[default]
    Normal,
    Low,
}

impl Priority {
    /// Numeric rank used by the request queue: high=10, normal=5, low=1.
    pub fn rank(&self) -> u8 {
        match self {
            Priority::High => 10,
            Priority::Normal => 5,
            Priority::Low => 1,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisOptions {
    pub analysis_depth: AnalysisDepth,
    pub streaming: bool,
    pub priority: Priority,
    /// Per-request deadline covering queue wait and the remote call.
    /// `None` uses the server default.
    pub timeout_ms: Option<u64>,
    pub max_retries: u32,
    /// Substitute a local heuristic result when the remote capability is
    /// unavailable instead of failing.
    pub allow_degraded: bool,
}

impl Default for AnalysisOptions {
    fn default() -> Self {
        Self {
            analysis_depth: AnalysisDepth::Comprehensive,
            streaming: false,
            priority: Priority::Normal,
            timeout_ms: None,
            max_retries: 2,
            allow_degraded: false,
        }
    }
}

/// One submitted (document, role description) pair. Never mutated after submission.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisRequest {
    pub document: String,
    pub role_description: String,
    pub caller_id: String,
    #[serde(default)]
    pub options: AnalysisOptions,
}

// ────────────────────────────────────────────────────────────────────────────
// Result
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ComponentScores {
    pub keyword_match: f64,
    pub skills_alignment: f64,
    pub ats_compatibility: f64,
    pub experience_relevance: f64,
}

impl ComponentScores {
    /// The fixed weighted combination of the four components.
    pub fn overall(&self) -> f64 {
        (KEYWORD_WEIGHT * self.keyword_match
            + SKILLS_WEIGHT * self.skills_alignment
            + ATS_WEIGHT * self.ats_compatibility
            + EXPERIENCE_WEIGHT * self.experience_relevance)
            .clamp(0.0, 100.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SuggestionCategory {
    Keywords,
    Skills,
    Experience,
    Formatting,
    Content,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    High,
    Medium,
    Low,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Suggestion {
    pub category: SuggestionCategory,
    pub severity: Severity,
    pub message: String,
    pub actionable: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct KeywordReport {
    pub detected: Vec<String>,
    pub missing: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultSource {
    /// Scored by the remote capability.
    Remote,
    /// Heuristic result from the local fallback engine.
    Fallback,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessingMetadata {
    pub elapsed_ms: u64,
    pub cache_hit: bool,
    pub produced_at: DateTime<Utc>,
    pub source: ResultSource,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub degraded_reason: Option<String>,
}

impl ProcessingMetadata {
    pub fn remote(elapsed_ms: u64) -> Self {
        Self {
            elapsed_ms,
            cache_hit: false,
            produced_at: Utc::now(),
            source: ResultSource::Remote,
            degraded_reason: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub overall_score: f64,
    pub scores: ComponentScores,
    pub suggestions: Vec<Suggestion>,
    pub keywords: KeywordReport,
    pub metadata: ProcessingMetadata,
}

impl AnalysisResult {
    pub fn is_degraded(&self) -> bool {
        self.metadata.source == ResultSource::Fallback
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Trust-boundary validation
// ────────────────────────────────────────────────────────────────────────────

/// Loosely-typed payload as sent by the remote capability. Every field is
/// optional so that missing fields are reported as violations rather than
/// surfacing as an opaque serde error.
#[derive(Debug, Deserialize)]
struct RemoteResultPayload {
    overall_score: Option<f64>,
    scores: Option<RemoteScores>,
    #[serde(default)]
    suggestions: Vec<RemoteSuggestion>,
    #[serde(default)]
    keywords: KeywordReport,
}

#[derive(Debug, Deserialize)]
struct RemoteScores {
    keyword_match: Option<f64>,
    skills_alignment: Option<f64>,
    ats_compatibility: Option<f64>,
    experience_relevance: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct RemoteSuggestion {
    category: Option<SuggestionCategory>,
    severity: Option<Severity>,
    message: Option<String>,
    #[serde(default = "default_actionable")]
    actionable: bool,
}

fn default_actionable() -> bool {
    true
}

/// Validates a remote payload into an `AnalysisResult`.
///
/// On failure returns every violation found. The overall score is always
/// recomputed from the components; a remote overall score that disagrees by
/// more than one point is logged and replaced.
pub fn validate_remote_result(
    value: serde_json::Value,
    metadata: ProcessingMetadata,
) -> Result<AnalysisResult, Vec<String>> {
    let payload: RemoteResultPayload =
        serde_json::from_value(value).map_err(|e| vec![format!("payload shape: {e}")])?;

    let mut violations = Vec::new();

    let scores = match payload.scores {
        Some(s) => {
            let mut take = |name: &str, v: Option<f64>| -> f64 {
                match v {
                    Some(x) if x.is_finite() && (0.0..=100.0).contains(&x) => x,
                    Some(x) => {
                        violations.push(format!("scores.{name} out of range: {x}"));
                        0.0
                    }
                    None => {
                        violations.push(format!("scores.{name} missing"));
                        0.0
                    }
                }
            };
            ComponentScores {
                keyword_match: take("keyword_match", s.keyword_match),
                skills_alignment: take("skills_alignment", s.skills_alignment),
                ats_compatibility: take("ats_compatibility", s.ats_compatibility),
                experience_relevance: take("experience_relevance", s.experience_relevance),
            }
        }
        None => {
            violations.push("scores missing".to_string());
            return Err(violations);
        }
    };

    let mut suggestions = Vec::with_capacity(payload.suggestions.len());
    for (i, s) in payload.suggestions.into_iter().enumerate() {
        match (s.category, s.severity, s.message) {
            (Some(category), Some(severity), Some(message)) if !message.trim().is_empty() => {
                suggestions.push(Suggestion {
                    category,
                    severity,
                    message,
                    actionable: s.actionable,
                })
            }
            _ => violations.push(format!("suggestions[{i}] incomplete")),
        }
    }

    if !violations.is_empty() {
        return Err(violations);
    }

    let overall_score = scores.overall();
    if let Some(remote_overall) = payload.overall_score {
        if (remote_overall - overall_score).abs() > 1.0 {
            tracing::warn!(
                "Remote overall score {remote_overall} disagrees with weighted components {overall_score:.2}; using weighted value"
            );
        }
    }

    Ok(AnalysisResult {
        overall_score,
        scores,
        suggestions,
        keywords: payload.keywords,
        metadata,
    })
}
