use serde::{Deserialize, Serialize};

use super::SubscriptionType;
use crate::error::{Result, SyncError};

/// How the user is paying for the plan chosen after signup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    /// Stripe Checkout (Android)
    Stripe,
    /// Native in-app purchase (iOS)
    InApp,
}

impl PaymentMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentMethod::Stripe => "stripe",
            PaymentMethod::InApp => "in_app",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "stripe" => Some(PaymentMethod::Stripe),
            "in_app" | "iap" | "apple" => Some(PaymentMethod::InApp),
            _ => None,
        }
    }
}

/// Signup form contents held between form submission and payment
/// confirmation, so the account can be logged into without asking the user
/// again.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingRegistration {
    pub email: String,
    /// Removed from storage as soon as a login with it succeeds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(default)]
    pub user_first_name: Option<String>,
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default)]
    pub subscription_type: Option<SubscriptionType>,
    #[serde(default)]
    pub plan_price: Option<String>,
    #[serde(default)]
    pub payment_method: Option<PaymentMethod>,
}

impl PendingRegistration {
    pub fn new(email: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            password: Some(password.into()),
            user_first_name: None,
            language: None,
            subscription_type: None,
            plan_price: None,
            payment_method: None,
        }
    }

    pub fn validate(&self) -> Result<()> {
        validate_email_format(&self.email)?;
        match self.password.as_deref() {
            Some(p) if !p.is_empty() => Ok(()),
            _ => Err(SyncError::Validation("password is required".into())),
        }
    }

    /// Same record without the password.
    pub fn scrubbed(&self) -> Self {
        Self {
            password: None,
            ..self.clone()
        }
    }
}

impl std::fmt::Debug for PendingRegistration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingRegistration")
            .field("email", &self.email)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("user_first_name", &self.user_first_name)
            .field("language", &self.language)
            .field("subscription_type", &self.subscription_type)
            .field("plan_price", &self.plan_price)
            .field("payment_method", &self.payment_method)
            .finish()
    }
}

/// Basic email format validation.
///
/// Exactly one `@`, non-empty local part without spaces, and a domain with
/// at least one inner dot. Permissive on purpose.
fn validate_email_format(email: &str) -> Result<()> {
    let email = email.trim();
    let invalid = || SyncError::Validation(format!("invalid email address: {}", email));

    if email.is_empty() {
        return Err(SyncError::Validation("email is required".into()));
    }

    let (local, domain) = email.split_once('@').ok_or_else(invalid)?;
    if local.is_empty() || local.contains(' ') || domain.contains('@') {
        return Err(invalid());
    }
    if !domain.contains('.') || domain.starts_with('.') || domain.ends_with('.') {
        return Err(invalid());
    }

    Ok(())
}
