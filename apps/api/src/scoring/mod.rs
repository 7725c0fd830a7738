//! Fallback Scoring Engine: local heuristic scorer used when the remote
//! capability is degraded.
//!
//! Pure, synchronous and deterministic: no I/O, no clock reads apart from the
//! processing metadata stamp. Same inputs always yield the same scores.

pub mod ats;
pub mod industry;
pub mod keywords;
pub mod similarity;

use std::time::Instant;

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::models::analysis::{
    AnalysisDepth, AnalysisResult, ComponentScores, KeywordReport, ProcessingMetadata,
    ResultSource, Severity, Suggestion, SuggestionCategory,
};
use crate::scoring::ats::{ats_score, detect_defects};
use crate::scoring::industry::detect_industry;
use crate::scoring::keywords::{extract_keywords, ExtractedKeywords};
use crate::scoring::similarity::is_match;

/// Score used for a component when the role offers nothing to compare against.
const NEUTRAL_SCORE: f64 = 50.0;
const SOFT_SKILL_WEIGHT: f64 = 0.5;
const MAX_LISTED_KEYWORDS: usize = 10;
const QUICK_SUGGESTION_LIMIT: usize = 5;

// ────────────────────────────────────────────────────────────────────────────
// Missing keyword insight
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Impact {
    High,
    Medium,
    Low,
}

impl Impact {
    /// high when more than 5 keywords are missing, medium when more than 2.
    pub fn from_missing(count: usize) -> Self {
        if count > 5 {
            Impact::High
        } else if count > 2 {
            Impact::Medium
        } else {
            Impact::Low
        }
    }

    fn severity(&self) -> Severity {
        match self {
            Impact::High => Severity::High,
            Impact::Medium => Severity::Medium,
            Impact::Low => Severity::Low,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct KeywordGap {
    pub missing: Vec<String>,
    /// matched / total role keywords.
    pub confidence: f64,
    pub impact: Impact,
}

pub fn keyword_gap(role_keywords: &[String], document_keywords: &[String]) -> KeywordGap {
    let missing: Vec<String> = role_keywords
        .iter()
        .filter(|k| !has_match(k, document_keywords))
        .cloned()
        .collect();
    let confidence = if role_keywords.is_empty() {
        0.0
    } else {
        (role_keywords.len() - missing.len()) as f64 / role_keywords.len() as f64
    };
    KeywordGap {
        impact: Impact::from_missing(missing.len()),
        missing,
        confidence,
    }
}

// ────────────────────────────────────────────────────────────────────────────
// FallbackScorer
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default)]
pub struct FallbackScorer;

impl FallbackScorer {
    pub fn score(&self, document: &str, role_description: &str) -> AnalysisResult {
        self.score_with_depth(document, role_description, AnalysisDepth::Comprehensive)
    }

    /// `KeywordOnly` keeps only keyword suggestions; `Quick` caps the list.
    pub fn score_with_depth(
        &self,
        document: &str,
        role_description: &str,
        depth: AnalysisDepth,
    ) -> AnalysisResult {
        let started = Instant::now();

        let industry = detect_industry(role_description);
        let role = extract_keywords(role_description, industry);
        let doc = extract_keywords(document, industry);

        let role_terms = role.role_terms();
        let doc_terms = doc.all();

        let keyword_match = match_fraction(&role_terms, &doc_terms);
        let skills_alignment = weighted_match(
            &[
                (role.technical.as_slice(), 1.0),
                (role.soft_skills.as_slice(), SOFT_SKILL_WEIGHT),
            ],
            &doc_terms,
        );
        let experience_relevance = weighted_match(
            &[
                (role.action_verbs.as_slice(), 1.0),
                (role.industry_terms.as_slice(), 1.0),
            ],
            &doc_terms,
        );

        let defects = detect_defects(document);

        let scores = ComponentScores {
            keyword_match,
            skills_alignment,
            ats_compatibility: ats_score(&defects),
            experience_relevance,
        };

        let gap = keyword_gap(&role_terms, &doc_terms);
        let detected: Vec<String> = role_terms
            .iter()
            .filter(|k| !gap.missing.contains(*k))
            .cloned()
            .collect();

        let mut suggestions = build_suggestions(&gap, &role, &doc, &scores);
        suggestions.extend(defects.iter().map(|d| Suggestion {
            category: SuggestionCategory::Formatting,
            severity: d.severity(),
            message: d.advice().to_string(),
            actionable: true,
        }));
        // Stable: keeps insertion order within a severity.
        suggestions.sort_by_key(|s| s.severity);

        match depth {
            AnalysisDepth::Comprehensive => {}
            AnalysisDepth::Quick => suggestions.truncate(QUICK_SUGGESTION_LIMIT),
            AnalysisDepth::KeywordOnly => {
                suggestions.retain(|s| s.category == SuggestionCategory::Keywords)
            }
        }

        AnalysisResult {
            overall_score: scores.overall(),
            scores,
            suggestions,
            keywords: KeywordReport {
                detected,
                missing: gap.missing,
            },
            metadata: ProcessingMetadata {
                elapsed_ms: started.elapsed().as_millis() as u64,
                cache_hit: false,
                produced_at: Utc::now(),
                source: ResultSource::Fallback,
                degraded_reason: None,
            },
        }
    }
}

fn has_match(keyword: &str, candidates: &[String]) -> bool {
    candidates.iter().any(|c| is_match(keyword, c))
}

/// Share of role keywords with a match in the document, 0–100. Neutral when
/// the role yields no keywords.
fn match_fraction(role_keywords: &[String], document_keywords: &[String]) -> f64 {
    weighted_match(&[(role_keywords, 1.0)], document_keywords)
}

fn weighted_match(groups: &[(&[String], f64)], document_keywords: &[String]) -> f64 {
    let mut total = 0.0;
    let mut matched = 0.0;
    for (keywords, weight) in groups {
        for k in keywords.iter() {
            total += weight;
            if has_match(k, document_keywords) {
                matched += weight;
            }
        }
    }
    if total == 0.0 {
        return NEUTRAL_SCORE;
    }
    (matched / total * 100.0).round().clamp(0.0, 100.0)
}

fn build_suggestions(
    gap: &KeywordGap,
    role: &ExtractedKeywords,
    doc: &ExtractedKeywords,
    scores: &ComponentScores,
) -> Vec<Suggestion> {
    let mut suggestions = Vec::new();

    if !gap.missing.is_empty() {
        let listed: Vec<&str> = gap
            .missing
            .iter()
            .take(MAX_LISTED_KEYWORDS)
            .map(String::as_str)
            .collect();
        suggestions.push(Suggestion {
            category: SuggestionCategory::Keywords,
            severity: gap.impact.severity(),
            message: format!(
                "Add missing keywords from the role description: {} (coverage {:.0}%).",
                listed.join(", "),
                gap.confidence * 100.0
            ),
            actionable: true,
        });
    }

    if scores.skills_alignment < 60.0 {
        let missing_skills: Vec<&str> = role
            .technical
            .iter()
            .chain(&role.soft_skills)
            .filter(|s| gap.missing.contains(*s))
            .take(MAX_LISTED_KEYWORDS)
            .map(String::as_str)
            .collect();
        if !missing_skills.is_empty() {
            suggestions.push(Suggestion {
                category: SuggestionCategory::Skills,
                severity: Severity::Medium,
                message: format!(
                    "Show evidence of the required skills: {}.",
                    missing_skills.join(", ")
                ),
                actionable: true,
            });
        }
    }

    if doc.metrics.is_empty() {
        suggestions.push(Suggestion {
            category: SuggestionCategory::Content,
            severity: Severity::Medium,
            message: "Quantify achievements with numbers, percentages or amounts.".to_string(),
            actionable: true,
        });
    }

    if doc.action_verbs.len() < 3 {
        suggestions.push(Suggestion {
            category: SuggestionCategory::Experience,
            severity: Severity::Low,
            message: "Start experience bullets with strong action verbs such as delivered, optimized or launched.".to_string(),
            actionable: true,
        });
    }

    suggestions
}
