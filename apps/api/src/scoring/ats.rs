//! Structural checks estimating how well a document survives automated screening.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::models::analysis::Severity;

const PENALTY_PER_DEFECT: f64 = 10.0;
const MAX_DOCUMENT_CHARS: usize = 5000;
const MIN_DOCUMENT_CHARS: usize = 500;

const EDUCATION_MARKERS: &[&str] = &[
    "education", "university", "college", "bachelor", "master", "degree", "phd", "diploma",
];

static EMAIL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}").expect("email pattern is valid")
});

static PHONE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?:\+?\d{1,3}[\s.-]?)?\(?\d{3}\)?[\s.-]?\d{3}[\s.-]?\d{4}")
        .expect("phone pattern is valid")
});

static STREET_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b\d+\s+(?:[a-z0-9.]+\s+){1,4}(?:street|st|avenue|ave|road|rd|boulevard|blvd|lane|ln|drive|dr|way)\b")
        .expect("street pattern is valid")
});

static CITY_REGION_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b[A-Z][a-z]+(?:\s[A-Z][a-z]+)*,\s*[A-Z]{2}\b").expect("city pattern is valid")
});

static YEAR_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b(?:19|20)\d{2}\b").expect("year pattern is valid"));

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AtsDefect {
    MissingEmail,
    MissingPhone,
    MissingAddress,
    MissingEducation,
    MissingYears,
    MissingSkillsSection,
    TooLong,
    TooShort,
}

impl AtsDefect {
    pub fn severity(&self) -> Severity {
        match self {
            AtsDefect::MissingEmail | AtsDefect::MissingPhone => Severity::High,
            AtsDefect::TooLong | AtsDefect::TooShort | AtsDefect::MissingSkillsSection => {
                Severity::Medium
            }
            AtsDefect::MissingAddress | AtsDefect::MissingEducation | AtsDefect::MissingYears => {
                Severity::Low
            }
        }
    }

    pub fn advice(&self) -> &'static str {
        match self {
            AtsDefect::MissingEmail => "Add a professional email address to your contact details.",
            AtsDefect::MissingPhone => "Add a phone number to your contact details.",
            AtsDefect::MissingAddress => "Add your city and region so location filters can place you.",
            AtsDefect::MissingEducation => "Add an Education section with your degree or training.",
            AtsDefect::MissingYears => "Add dates (years) to your experience and education entries.",
            AtsDefect::MissingSkillsSection => "Add a dedicated Skills section with relevant keywords.",
            AtsDefect::TooLong => "Shorten the document; screening systems favour concise resumes.",
            AtsDefect::TooShort => "Expand the document with more detail about your experience.",
        }
    }
}

pub fn detect_defects(document: &str) -> Vec<AtsDefect> {
    let lower = document.to_lowercase();
    let chars = document.chars().count();
    let mut defects = Vec::new();

    if !EMAIL_RE.is_match(document) {
        defects.push(AtsDefect::MissingEmail);
    }
    if !PHONE_RE.is_match(document) {
        defects.push(AtsDefect::MissingPhone);
    }
    if !STREET_RE.is_match(document) && !CITY_REGION_RE.is_match(document) {
        defects.push(AtsDefect::MissingAddress);
    }
    if !EDUCATION_MARKERS.iter().any(|m| lower.contains(m)) {
        defects.push(AtsDefect::MissingEducation);
    }
    if !YEAR_RE.is_match(document) {
        defects.push(AtsDefect::MissingYears);
    }
    if !lower.contains("skills") {
        defects.push(AtsDefect::MissingSkillsSection);
    }
    if chars > MAX_DOCUMENT_CHARS {
        defects.push(AtsDefect::TooLong);
    }
    if chars < MIN_DOCUMENT_CHARS {
        defects.push(AtsDefect::TooShort);
    }

    defects
}

/// 100 minus 10 per defect, floored at 0.
pub fn ats_score(defects: &[AtsDefect]) -> f64 {
    (100.0 - PENALTY_PER_DEFECT * defects.len() as f64).max(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn complete_resume() -> String {
        let mut doc = String::from(
            "Jane Doe\njane.doe@example.com | (555) 123-4567 | Austin, TX\n\n\
             Experience\nSoftware Engineer, Acme Corp (2019 - 2024)\n\
             Developed services in Rust and Python.\n\n\
             Education\nB.Sc. Computer Science, State University, 2018\n\n\
             Skills\nRust, Python, Kubernetes, PostgreSQL\n",
        );
        while doc.chars().count() < MIN_DOCUMENT_CHARS {
            doc.push_str("Delivered reliable systems for customers across the platform. ");
        }
        doc
    }

    #[test]
    fn test_complete_resume_has_no_defects() {
        let defects = detect_defects(&complete_resume());
        assert!(defects.is_empty(), "{defects:?}");
        assert_eq!(ats_score(&defects), 100.0);
    }

    #[test]
    fn test_bare_text_collects_every_short_document_defect() {
        let defects = detect_defects("just some words");
        assert_eq!(
            defects,
            vec![
                AtsDefect::MissingEmail,
                AtsDefect::MissingPhone,
                AtsDefect::MissingAddress,
                AtsDefect::MissingEducation,
                AtsDefect::MissingYears,
                AtsDefect::MissingSkillsSection,
                AtsDefect::TooShort,
            ]
        );
        assert_eq!(ats_score(&defects), 30.0);
    }

    #[test]
    fn test_street_address_counts_as_address() {
        let doc = "Lives at 42 Elm Street downtown";
        assert!(!detect_defects(doc).contains(&AtsDefect::MissingAddress));
    }

    #[test]
    fn test_too_long_document() {
        let doc = format!("{}{}", complete_resume(), "x".repeat(MAX_DOCUMENT_CHARS));
        assert_eq!(detect_defects(&doc), vec![AtsDefect::TooLong]);
    }

    #[test]
    fn test_score_floors_at_zero() {
        let many = vec![AtsDefect::MissingEmail; 12];
        assert_eq!(ats_score(&many), 0.0);
    }
}
