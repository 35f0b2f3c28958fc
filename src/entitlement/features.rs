//! Premium feature catalogue.

use std::collections::BTreeSet;

/// Granted with every paid subscription.
pub const PREMIUM_FEATURES: &[&str] = &[
    "ad_free",
    "custom_adhan_sounds",
    "premium_themes",
    "prayer_analytics",
    "cloud_backup",
    "widget_customization",
    "unlimited_favorites",
    "offline_quran_audio",
];

/// Added on top of [`PREMIUM_FEATURES`] for VIP grants.
pub const VIP_FEATURES: &[&str] = &["vip_exclusive", "lifetime_access"];

/// Hard-blocked for free users. Anything not listed here is available to
/// everyone, possibly soft-limited by the caller.
pub const PREMIUM_ONLY: &[&str] = &[
    "custom_adhan_sounds",
    "premium_themes",
    "prayer_analytics",
    "cloud_backup",
    "widget_customization",
    "offline_quran_audio",
    "vip_exclusive",
];

pub fn premium_feature_set() -> BTreeSet<String> {
    PREMIUM_FEATURES.iter().map(|f| f.to_string()).collect()
}

pub fn vip_feature_set() -> BTreeSet<String> {
    PREMIUM_FEATURES
        .iter()
        .chain(VIP_FEATURES)
        .map(|f| f.to_string())
        .collect()
}

/// Gate for free vs premium. Premium users may use everything.
pub fn can_use_feature(is_premium: bool, feature: &str) -> bool {
    is_premium || !PREMIUM_ONLY.contains(&feature)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_free_user_blocked_only_on_denylist() {
        assert!(!can_use_feature(false, "prayer_analytics"));
        assert!(!can_use_feature(false, "cloud_backup"));
        assert!(can_use_feature(false, "unlimited_favorites"));
        assert!(can_use_feature(false, "qibla_compass"));
    }

    #[test]
    fn test_premium_user_unblocked() {
        for feature in PREMIUM_ONLY {
            assert!(can_use_feature(true, feature));
        }
    }

    #[test]
    fn test_vip_set_extends_premium_set() {
        let vip = vip_feature_set();
        assert!(premium_feature_set().is_subset(&vip));
        assert!(vip.contains("vip_exclusive"));
        assert!(vip.contains("lifetime_access"));
    }
}
