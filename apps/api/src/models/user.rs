use serde::{Deserialize, Serialize};

/// Subscription tier of a caller. Drives the calendar-month analysis cap.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionTier {
    #[default]
    Free,
    Pro,
    Premium,
    Enterprise,
}

impl SubscriptionTier {
    pub fn monthly_limit(&self) -> u64 {
        match self {
            SubscriptionTier::Free => 5,
            SubscriptionTier::Pro => 100,
            SubscriptionTier::Premium => 500,
            SubscriptionTier::Enterprise => 1000,
        }
    }

    /// Parses a stored tier name. Unknown names fall back to `Free`.
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "pro" => SubscriptionTier::Pro,
            "premium" => SubscriptionTier::Premium,
            "enterprise" => SubscriptionTier::Enterprise,
            _ => SubscriptionTier::Free,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_monthly_limits_per_tier() {
        assert_eq!(SubscriptionTier::Free.monthly_limit(), 5);
        assert_eq!(SubscriptionTier::Pro.monthly_limit(), 100);
        assert_eq!(SubscriptionTier::Premium.monthly_limit(), 500);
        assert_eq!(SubscriptionTier::Enterprise.monthly_limit(), 1000);
    }

    #[test]
    fn test_parse_unknown_is_free() {
        assert_eq!(SubscriptionTier::parse("PRO"), SubscriptionTier::Pro);
        assert_eq!(SubscriptionTier::parse("gold"), SubscriptionTier::Free);
    }
}
