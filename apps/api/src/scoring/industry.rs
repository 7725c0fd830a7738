//! Industry detection from the role title and description.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Industry {
    #[default]
    Technology,
    Healthcare,
    Finance,
    Education,
    Marketing,
    Sales,
}

struct IndustryProfile {
    industry: Industry,
    /// Phrases in the title or description that identify the industry.
    indicators: &'static [&'static str],
    /// Industry-specific phrases scored as experience keywords.
    terms: &'static [&'static str],
}

/// Scan order matters: the first profile with a matching indicator wins.
const PROFILES: &[IndustryProfile] = &[
    IndustryProfile {
        industry: Industry::Healthcare,
        indicators: &["nurse", "clinical", "hospital", "patient", "healthcare", "medical", "pharma"],
        terms: &["patient care", "hipaa", "electronic health records", "clinical trials", "triage", "care coordination", "medical terminology"],
    },
    IndustryProfile {
        industry: Industry::Finance,
        indicators: &["financial", "finance", "banking", "accountant", "investment", "auditor", "fintech"],
        terms: &["financial modeling", "risk management", "compliance", "forecasting", "portfolio", "reconciliation", "gaap", "budgeting"],
    },
    IndustryProfile {
        industry: Industry::Education,
        indicators: &["teacher", "curriculum", "school", "education", "instructor", "tutor"],
        terms: &["curriculum development", "lesson planning", "classroom management", "student engagement", "assessment", "pedagogy"],
    },
    IndustryProfile {
        industry: Industry::Marketing,
        indicators: &["marketing", "brand", "content strategist", "seo specialist", "growth"],
        terms: &["seo", "campaign", "brand strategy", "content marketing", "market research", "conversion", "social media", "analytics"],
    },
    IndustryProfile {
        industry: Industry::Sales,
        indicators: &["sales", "account executive", "business development", "account manager"],
        terms: &["pipeline", "quota", "crm", "lead generation", "negotiation", "account management", "cold calling", "closing"],
    },
    IndustryProfile {
        industry: Industry::Technology,
        indicators: &["software", "developer", "engineer", "devops", "programmer", "architect", "data scientist"],
        terms: &["agile", "scrum", "microservices", "continuous integration", "cloud", "distributed systems", "code review", "scalability", "api design"],
    },
];

/// Returns the first industry whose indicator appears in the role title
/// (first non-empty line) or the description. Defaults to technology.
pub fn detect_industry(role_description: &str) -> Industry {
    let title = role_description
        .lines()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .unwrap_or_default();
    let haystack = format!("{} {}", title, role_description).to_lowercase();

    PROFILES
        .iter()
        .find(|p| p.indicators.iter().any(|i| haystack.contains(i)))
        .map(|p| p.industry)
        .unwrap_or_default()
}

pub fn industry_terms(industry: Industry) -> &'static [&'static str] {
    PROFILES
        .iter()
        .find(|p| p.industry == industry)
        .map(|p| p.terms)
        .unwrap_or(&[])
}
