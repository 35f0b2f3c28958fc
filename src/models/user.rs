use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// Account snapshot persisted under `user_data` after a login or a
/// post-payment sync.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UserRecord {
    #[serde(deserialize_with = "lenient_string")]
    pub id: String,
    pub email: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    /// 1 = premium, 0 = free
    #[serde(deserialize_with = "lenient_flag")]
    pub premium_status: u8,
    pub subscription_type: Option<String>,
    pub subscription_id: Option<String>,
    #[serde(deserialize_with = "lenient_datetime")]
    pub premium_expiry: Option<DateTime<Utc>>,
    pub stripe_customer_id: Option<String>,
    pub device_id: Option<String>,
    #[serde(deserialize_with = "lenient_bool")]
    pub is_vip: bool,
    pub vip_reason: Option<String>,
    pub vip_granted_by: Option<String>,
    #[serde(deserialize_with = "lenient_datetime")]
    pub vip_granted_at: Option<DateTime<Utc>>,
    #[serde(deserialize_with = "lenient_datetime")]
    pub last_sync: Option<DateTime<Utc>>,
}

impl UserRecord {
    pub fn is_premium(&self) -> bool {
        self.premium_status == 1
    }

    /// Either a paid premium account or a VIP grant.
    pub fn grants_premium(&self) -> bool {
        self.is_premium() || self.is_vip
    }

    /// Normalize a raw user object as returned by the account API.
    ///
    /// The server is not consistent about field casing, so each field is
    /// looked up under its snake_case name first, then camelCase.
    pub fn from_api(raw: &Value, now: DateTime<Utc>) -> Self {
        let premium_status = pick(raw, &["premium_status", "premiumStatus", "is_premium", "isPremium"])
            .map(flag_from_value)
            .unwrap_or(0);

        Self {
            id: pick(raw, &["id", "user_id", "userId"])
                .and_then(string_from_value)
                .unwrap_or_default(),
            email: pick_string(raw, &["email"]),
            first_name: pick_string(raw, &["first_name", "firstName", "user_first_name"]),
            last_name: pick_string(raw, &["last_name", "lastName"]),
            premium_status,
            subscription_type: pick_string(raw, &["subscription_type", "subscriptionType", "premium_type"]),
            subscription_id: pick_string(raw, &["subscription_id", "subscriptionId"]),
            premium_expiry: pick(raw, &["premium_expiry", "premiumExpiry", "expiry_date"])
                .and_then(datetime_from_value),
            stripe_customer_id: pick_string(raw, &["stripe_customer_id", "stripeCustomerId"]),
            device_id: pick_string(raw, &["device_id", "deviceId"]),
            is_vip: pick(raw, &["is_vip", "isVip"]).map(flag_from_value) == Some(1),
            vip_reason: pick_string(raw, &["vip_reason", "vipReason"]),
            vip_granted_by: pick_string(raw, &["vip_granted_by", "vipGrantedBy"]),
            vip_granted_at: pick(raw, &["vip_granted_at", "vipGrantedAt"]).and_then(datetime_from_value),
            last_sync: Some(now),
        }
    }
}

/// One entry of the account's premium purchase history.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PremiumPurchase {
    #[serde(alias = "subscriptionType", alias = "premium_type")]
    pub subscription_type: Option<String>,
    #[serde(
        alias = "expires_at",
        alias = "premium_expiry",
        alias = "expiryDate",
        deserialize_with = "lenient_datetime"
    )]
    pub expiry_date: Option<DateTime<Utc>>,
    #[serde(alias = "platform")]
    pub payment_method: Option<String>,
}

impl PremiumPurchase {
    pub fn is_active_at(&self, now: DateTime<Utc>) -> bool {
        matches!(self.expiry_date, Some(exp) if exp > now)
    }
}

fn pick<'a>(raw: &'a Value, names: &[&str]) -> Option<&'a Value> {
    names
        .iter()
        .filter_map(|name| raw.get(*name))
        .find(|v| !v.is_null())
}

fn pick_string(raw: &Value, names: &[&str]) -> Option<String> {
    pick(raw, names).and_then(string_from_value)
}

fn string_from_value(v: &Value) -> Option<String> {
    match v {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn flag_from_value(v: &Value) -> u8 {
    match v {
        Value::Bool(b) => u8::from(*b),
        Value::Number(n) => u8::from(n.as_i64() == Some(1)),
        Value::String(s) => u8::from(s == "1" || s.eq_ignore_ascii_case("true")),
        _ => 0,
    }
}

fn datetime_from_value(v: &Value) -> Option<DateTime<Utc>> {
    match v {
        Value::String(s) => DateTime::parse_from_rfc3339(s)
            .map(|d| d.with_timezone(&Utc))
            .ok(),
        // Unix seconds or milliseconds
        Value::Number(n) => {
            let n = n.as_i64()?;
            if n > 10_000_000_000 {
                DateTime::from_timestamp_millis(n)
            } else {
                DateTime::from_timestamp(n, 0)
            }
        }
        _ => None,
    }
}

fn lenient_string<'de, D: Deserializer<'de>>(d: D) -> Result<String, D::Error> {
    let v = Value::deserialize(d)?;
    Ok(string_from_value(&v).unwrap_or_default())
}

fn lenient_flag<'de, D: Deserializer<'de>>(d: D) -> Result<u8, D::Error> {
    let v = Value::deserialize(d)?;
    Ok(flag_from_value(&v))
}

fn lenient_bool<'de, D: Deserializer<'de>>(d: D) -> Result<bool, D::Error> {
    let v = Value::deserialize(d)?;
    Ok(flag_from_value(&v) == 1)
}

fn lenient_datetime<'de, D: Deserializer<'de>>(d: D) -> Result<Option<DateTime<Utc>>, D::Error> {
    let v = Value::deserialize(d)?;
    Ok(datetime_from_value(&v))
}
