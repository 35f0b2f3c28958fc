use std::collections::BTreeSet;

use chrono::{DateTime, Duration, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Result, SyncError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubscriptionType {
    Monthly,
    Yearly,
    Family,
}

impl SubscriptionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubscriptionType::Monthly => "monthly",
            SubscriptionType::Yearly => "yearly",
            SubscriptionType::Family => "family",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "monthly" => Some(SubscriptionType::Monthly),
            "yearly" | "annual" => Some(SubscriptionType::Yearly),
            "family" => Some(SubscriptionType::Family),
            _ => None,
        }
    }

    /// Parse a plan name, rejecting anything unknown.
    pub fn parse(s: &str) -> Result<Self> {
        Self::from_str(s).ok_or_else(|| SyncError::InvalidSubscriptionType(s.to_string()))
    }

    /// Family plans are billed yearly.
    pub fn duration(&self) -> Duration {
        match self {
            SubscriptionType::Monthly => Duration::days(30),
            SubscriptionType::Yearly | SubscriptionType::Family => Duration::days(365),
        }
    }
}

impl std::fmt::Display for SubscriptionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Expiry given to VIP grants so nothing downstream ever sees them lapse.
pub fn vip_expiry() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2099, 12, 31, 23, 59, 59)
        .single()
        .unwrap_or_else(|| Utc::now() + Duration::days(365 * 75))
}

/// The device's premium status as last computed.
///
/// `has_purchased_premium` is sticky: deactivation keeps it, only
/// `is_premium` toggles.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EntitlementRecord {
    pub is_premium: bool,
    pub subscription_type: Option<SubscriptionType>,
    pub subscription_id: Option<String>,
    pub expiry_date: Option<DateTime<Utc>>,
    pub features: BTreeSet<String>,
    pub has_purchased_premium: bool,
    pub premium_activated_at: Option<DateTime<Utc>>,
    pub is_vip: bool,
    pub vip_reason: Option<String>,
    pub vip_granted_by: Option<String>,
    pub vip_granted_at: Option<DateTime<Utc>>,
}

impl EntitlementRecord {
    /// The all-default record, carrying over only the purchase flag.
    pub fn deactivated(has_purchased_premium: bool) -> Self {
        Self {
            has_purchased_premium,
            ..Self::default()
        }
    }

    /// VIP grants never expire; a record without an expiry date doesn't either.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        if self.is_vip {
            return false;
        }
        matches!(self.expiry_date, Some(exp) if exp <= now)
    }

    /// Time left before expiry, if the record is premium, non-VIP and not yet expired.
    pub fn remaining_at(&self, now: DateTime<Utc>) -> Option<Duration> {
        if self.is_vip || !self.is_premium {
            return None;
        }
        let exp = self.expiry_date?;
        let left = exp - now;
        (left > Duration::zero()).then_some(left)
    }

    pub fn has_feature(&self, feature: &str) -> bool {
        self.is_premium && self.features.contains(feature)
    }
}
