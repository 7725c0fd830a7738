//! Fuzzy keyword similarity.

/// Two keywords match when their similarity is strictly above this value.
/// Every keyword-derived score depends on it.
pub const MATCH_THRESHOLD: f64 = 0.7;

const CONTAINMENT_BOOST: f64 = 0.3;

/// Normalized Levenshtein similarity: `(max_len - distance) / max_len`,
/// boosted by 0.3 (capped at 1.0) when the strings are equal or one contains
/// the other. Symmetric in its arguments.
pub fn similarity(a: &str, b: &str) -> f64 {
    let max_len = a.chars().count().max(b.chars().count());
    if max_len == 0 {
        return 1.0;
    }

    let distance = strsim::levenshtein(a, b);
    let mut ratio = (max_len - distance.min(max_len)) as f64 / max_len as f64;

    if a == b || a.contains(b) || b.contains(a) {
        ratio = (ratio + CONTAINMENT_BOOST).min(1.0);
    }
    ratio
}

pub fn is_match(a: &str, b: &str) -> bool {
    similarity(a, b) > MATCH_THRESHOLD
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identical_is_one() {
        assert_eq!(similarity("kubernetes", "kubernetes"), 1.0);
    }

    #[test]
    fn test_containment_gets_boost() {
        // distance 4 over 9 chars → 5/9 ≈ 0.556, +0.3 → ≈ 0.856
        let s = similarity("react", "reactjs+x");
        assert!(s > 0.85 && s < 0.86, "got {s}");
        assert!(is_match("react", "reactjs+x"));
    }

    #[test]
    fn test_unrelated_terms_do_not_match() {
        assert!(!is_match("aws", "react"));
        assert!(!is_match("leadership", "react"));
    }

    #[test]
    fn test_one_typo_matches() {
        // 1 edit over 11 chars → ≈ 0.909
        assert!(is_match("postgresql", "postgressql"));
    }

    #[test]
    fn test_threshold_is_strict() {
        // "abc" vs "abd": 2/3 ≈ 0.667 → no match
        assert!(!is_match("abc", "abd"));
    }

    #[test]
    fn test_symmetry() {
        let pairs = [
            ("react", "reactjs"),
            ("aws", "azure"),
            ("", "python"),
            ("machine learning", "learning"),
            ("c++", "c#"),
            ("docker", "dockerfile"),
        ];
        for (a, b) in pairs {
            assert_eq!(similarity(a, b), similarity(b, a), "{a} / {b}");
        }
    }
}
