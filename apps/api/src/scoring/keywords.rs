//! Keyword extraction against curated term lists.
//!
//! Curated terms match by substring containment on the normalized text, so
//! every list entry must be longer than two characters (shorter tokens are
//! discarded during normalization and could never match).

use std::collections::HashSet;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::scoring::industry::{industry_terms, Industry};

pub const TECHNICAL_SKILLS: &[&str] = &[
    "javascript", "typescript", "python", "java", "rust", "golang", "kotlin", "swift", "ruby",
    "php", "scala", "c++", "sql", "react", "angular", "vue", "node", "django", "flask", "spring",
    "graphql", "rest", "aws", "azure", "gcp", "docker", "kubernetes", "terraform", "jenkins",
    "linux", "git", "postgresql", "mysql", "mongodb", "redis", "kafka", "spark", "hadoop",
    "tensorflow", "pytorch", "machine learning", "data analysis", "excel", "tableau", "salesforce",
    "figma",
];

pub const SOFT_SKILLS: &[&str] = &[
    "leadership", "communication", "teamwork", "collaboration", "problem solving", "mentoring",
    "stakeholder management", "project management", "time management", "critical thinking",
    "adaptability", "presentation",
];

pub const ACTION_VERBS: &[&str] = &[
    "achieved", "architected", "automated", "built", "coordinated", "created", "delivered",
    "designed", "developed", "drove", "implemented", "improved", "increased", "launched",
    "managed", "mentored", "negotiated", "optimized", "orchestrated", "reduced", "spearheaded",
    "streamlined",
];

/// Capitalized words that are sentence furniture rather than entities.
const STOP_WORDS: &[&str] = &[
    "the", "and", "for", "with", "our", "you", "your", "we", "are", "this", "that", "will",
    "who", "what", "about", "join", "team", "role", "job", "position", "company", "responsibilities",
    "requirements", "required", "preferred", "skills", "experience", "education", "summary",
    "work", "history", "projects", "must", "have", "nice", "looking", "seeking", "candidate",
    "ideal", "senior", "junior", "lead", "inc", "ltd", "llc", "january", "february", "march",
    "april", "may", "june", "july", "august", "september", "october", "november", "december",
    "present", "current",
];

static METRIC_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)(?:[$€£]\s?\d[\d,]*(?:\.\d+)?\s?[kmb]?)|(?:\b\d+(?:\.\d+)?\s?%)|(?:\b\d+(?:\.\d+)?x\b)|(?:\b\d+\+?\s(?:years?|users|customers|clients|projects|people|engineers|members)\b)",
    )
    .expect("metric pattern is valid")
});

static ENTITY_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b[A-Z][a-zA-Z]+(?:[ \t]+[A-Z][a-zA-Z]+)*").expect("entity pattern is valid")
});

/// Keywords found in one text, grouped by where they came from.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExtractedKeywords {
    pub technical: Vec<String>,
    pub soft_skills: Vec<String>,
    pub action_verbs: Vec<String>,
    pub industry_terms: Vec<String>,
    /// Numbers, percentages and currency amounts. Only meaningful on the
    /// document side.
    pub metrics: Vec<String>,
    pub entities: Vec<String>,
}

impl ExtractedKeywords {
    /// Everything a role asks for: curated terms plus named entities.
    pub fn role_terms(&self) -> Vec<String> {
        dedup_ordered(
            self.technical
                .iter()
                .chain(&self.soft_skills)
                .chain(&self.action_verbs)
                .chain(&self.industry_terms)
                .chain(&self.entities),
        )
    }

    /// Every keyword found, metrics included.
    pub fn all(&self) -> Vec<String> {
        dedup_ordered(self.role_terms().iter().chain(&self.metrics))
    }
}

/// Lower-cases, replaces punctuation (other than `+` and `#`) with spaces,
/// and drops tokens of two characters or fewer.
pub fn normalize(text: &str) -> String {
    let cleaned: String = text
        .to_lowercase()
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || c.is_whitespace() || c == '+' || c == '#' {
                c
            } else {
                ' '
            }
        })
        .collect();

    cleaned
        .split_whitespace()
        .filter(|t| t.chars().count() > 2)
        .collect::<Vec<_>>()
        .join(" ")
}

pub fn extract_keywords(text: &str, industry: Industry) -> ExtractedKeywords {
    let normalized = normalize(text);

    let technical = match_terms(&normalized, TECHNICAL_SKILLS);
    let soft_skills = match_terms(&normalized, SOFT_SKILLS);
    let action_verbs = match_terms(&normalized, ACTION_VERBS);
    let industry_terms = match_terms(&normalized, industry_terms(industry));

    let metrics = dedup_ordered(
        METRIC_RE
            .find_iter(text)
            .map(|m| m.as_str().trim().to_lowercase())
            .collect::<Vec<_>>()
            .iter(),
    );

    let curated: HashSet<&str> = technical
        .iter()
        .chain(&soft_skills)
        .chain(&action_verbs)
        .chain(&industry_terms)
        .map(String::as_str)
        .collect();
    let entities = dedup_ordered(
        extract_entities(text)
            .into_iter()
            .filter(|e| !curated.contains(e.as_str()))
            .collect::<Vec<_>>()
            .iter(),
    );

    ExtractedKeywords {
        technical,
        soft_skills,
        action_verbs,
        industry_terms,
        metrics,
        entities,
    }
}

fn match_terms(normalized: &str, terms: &[&str]) -> Vec<String> {
    terms
        .iter()
        .filter(|t| normalized.contains(*t))
        .map(|t| t.to_string())
        .collect()
}

/// Capitalized word sequences with leading stop words stripped.
fn extract_entities(text: &str) -> Vec<String> {
    ENTITY_RE
        .find_iter(text)
        .filter_map(|m| {
            let words: Vec<String> = m
                .as_str()
                .split_whitespace()
                .map(str::to_lowercase)
                .skip_while(|w| STOP_WORDS.contains(&w.as_str()))
                .collect();
            let entity = words.join(" ");
            let keep = entity.chars().count() > 2 && !STOP_WORDS.contains(&entity.as_str());
            keep.then_some(entity)
        })
        .collect()
}

fn dedup_ordered<'a>(items: impl Iterator<Item = &'a String>) -> Vec<String> {
    let mut seen = HashSet::new();
    items.filter(|s| seen.insert(s.to_string())).cloned().collect()
}
