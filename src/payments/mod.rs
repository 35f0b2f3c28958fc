//! Post-payment reconciliation.
//!
//! Between signup and payment confirmation the signup form lives in storage
//! as a [`PendingRegistration`]. Once the payment provider hands control
//! back, [`PaymentReconciler`] logs into the new account with those
//! credentials, materializes the session, activates premium and only then
//! deletes the pending registration, so every step can be retried from the top.

use std::sync::Arc;

use serde_json::Value;

use crate::api::{normalize, AccountApi, ApiEnvelope, Credentials};
use crate::clock::{Clock, SystemClock};
use crate::config::Timings;
use crate::entitlement::EntitlementStore;
use crate::error::{Result, SyncError};
use crate::models::{EntitlementRecord, PaymentMethod, PendingRegistration, SubscriptionType, UserRecord};
use crate::storage::{flag_value, keys, StorageAdapter};

const MANUAL_LOGIN_MESSAGE: &str = "Payment received. Please log in to activate premium.";

/// Result of a post-payment sync attempt.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncOutcome {
    pub success: bool,
    pub user: Option<UserRecord>,
    pub requires_manual_login: bool,
    pub message: Option<String>,
}

impl SyncOutcome {
    fn synced(user: Option<UserRecord>) -> Self {
        Self {
            success: true,
            user,
            ..Default::default()
        }
    }

    fn manual_login(message: impl Into<String>) -> Self {
        Self {
            success: false,
            user: None,
            requires_manual_login: true,
            message: Some(message.into()),
        }
    }
}

/// Read-only snapshot of the session keys.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncStatus {
    pub has_user_data: bool,
    pub has_auth_token: bool,
    pub has_refresh_token: bool,
    pub is_logged_in: bool,
    pub explicit_connection: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActivationOutcome {
    Activated(EntitlementRecord),
    /// Sync did not succeed even after retrying; the user has to log in.
    ManualLoginRequired { message: String },
    /// Synced but premium could not be activated. The pending registration
    /// is kept so the whole sequence can run again.
    Failed { message: String },
}

pub struct PaymentReconciler {
    storage: Arc<dyn StorageAdapter>,
    api: Arc<dyn AccountApi>,
    entitlement: Arc<EntitlementStore>,
    clock: Arc<dyn Clock>,
    timings: Timings,
}

impl PaymentReconciler {
    pub fn new(
        storage: Arc<dyn StorageAdapter>,
        api: Arc<dyn AccountApi>,
        entitlement: Arc<EntitlementStore>,
    ) -> Self {
        Self {
            storage,
            api,
            entitlement,
            clock: Arc::new(SystemClock),
            timings: Timings::default(),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_timings(mut self, timings: Timings) -> Self {
        self.timings = timings;
        self
    }

    // ==================== Pending registration ====================

    /// Store the submitted signup form until payment completes.
    pub async fn save_pending_registration(&self, registration: &PendingRegistration) -> Result<()> {
        registration.validate()?;
        self.write_pending(registration).await?;
        tracing::info!(email = %registration.email, "Pending registration saved");
        Ok(())
    }

    /// Record the chosen plan on the pending registration.
    pub async fn select_plan(
        &self,
        plan: &str,
        price: Option<&str>,
        method: PaymentMethod,
    ) -> Result<PendingRegistration> {
        let plan = SubscriptionType::parse(plan)?;
        let mut registration = self
            .pending_registration()
            .await?
            .ok_or_else(|| SyncError::Precondition("no pending registration".into()))?;

        registration.subscription_type = Some(plan);
        registration.plan_price = price.map(str::to_string);
        registration.payment_method = Some(method);

        self.write_pending(&registration).await?;
        tracing::info!(plan = %plan, method = method.as_str(), "Plan selected");
        Ok(registration)
    }

    pub async fn pending_registration(&self) -> Result<Option<PendingRegistration>> {
        match self.storage.get(keys::PENDING_REGISTRATION).await? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    /// Delete the pending registration. Returns whether it succeeded.
    pub async fn cleanup_pending_registration(&self) -> bool {
        match self.storage.remove(keys::PENDING_REGISTRATION).await {
            Ok(()) => {
                tracing::debug!("Pending registration removed");
                true
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed to remove pending registration");
                false
            }
        }
    }

    // ==================== Sync ====================

    /// Log into the freshly paid account and persist the session.
    ///
    /// Never fails; a failure result always asks for a manual login. The
    /// pending registration is left in place.
    pub async fn sync_user_after_payment(&self) -> SyncOutcome {
        let registration = match self.pending_registration().await {
            Ok(Some(registration)) => registration,
            Ok(None) => return self.sync_without_registration().await,
            Err(e) => {
                tracing::warn!(error = %e, "Pending registration unreadable");
                return SyncOutcome::manual_login(MANUAL_LOGIN_MESSAGE);
            }
        };

        // Already scrubbed by an earlier successful login
        let Some(password) = registration.password.clone().filter(|p| !p.is_empty()) else {
            return self.sync_without_registration().await;
        };

        // Let the payment webhook land server-side first
        tokio::time::sleep(self.timings.payment_webhook_grace).await;

        let credentials = Credentials {
            email: registration.email.clone(),
            password,
        };

        let response = match self.api.login_with_credentials(&credentials).await {
            Ok(response) if response.success => response,
            Ok(response) => {
                let message = response.message_or("Login failed");
                tracing::info!(reason = %message, "Post-payment login rejected");
                return SyncOutcome::manual_login(message);
            }
            Err(e) => {
                tracing::warn!(error = %e, "Post-payment login failed");
                return SyncOutcome::manual_login(MANUAL_LOGIN_MESSAGE);
            }
        };

        match self.finish_login(&registration, &response).await {
            Ok(user) => {
                tracing::info!(user_id = %user.id, "User synced after payment");
                SyncOutcome::synced(Some(user))
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed to persist session after payment");
                SyncOutcome::manual_login(MANUAL_LOGIN_MESSAGE)
            }
        }
    }

    async fn sync_without_registration(&self) -> SyncOutcome {
        match self.storage.get_flag(keys::EXPLICIT_CONNECTION).await {
            Ok(true) => {
                tracing::debug!("Already synced, nothing to do");
                let user = match self.storage.get(keys::USER_DATA).await {
                    Ok(Some(raw)) => serde_json::from_str(&raw).ok(),
                    _ => None,
                };
                SyncOutcome::synced(user)
            }
            Ok(false) => SyncOutcome::manual_login(MANUAL_LOGIN_MESSAGE),
            Err(e) => {
                tracing::warn!(error = %e, "Could not read connection state");
                SyncOutcome::manual_login(MANUAL_LOGIN_MESSAGE)
            }
        }
    }

    async fn finish_login(
        &self,
        registration: &PendingRegistration,
        response: &ApiEnvelope,
    ) -> Result<UserRecord> {
        let raw = normalize::extract_user(response)
            .ok_or_else(|| SyncError::Api {
                status: None,
                message: "login response carries no user".into(),
            })?;

        let user = self.materialize_session(raw, response).await?;
        self.storage
            .set(keys::EXPLICIT_CONNECTION, flag_value(true))
            .await?;

        // The password has served its purpose
        if let Err(e) = self.write_pending(&registration.scrubbed()).await {
            tracing::warn!(error = %e, "Failed to scrub password from pending registration");
        }

        Ok(user)
    }

    /// Persist the user record, login flag and tokens from a login response.
    /// A missing token is logged, not an error.
    pub async fn materialize_session(&self, raw: &Value, envelope: &ApiEnvelope) -> Result<UserRecord> {
        let user = UserRecord::from_api(raw, self.clock.now());

        self.storage
            .set(keys::USER_DATA, &serde_json::to_string(&user)?)
            .await?;
        self.storage.set(keys::IS_LOGGED_IN, flag_value(true)).await?;

        match normalize::auth_token(Some(raw), envelope) {
            Some(token) => self.storage.set(keys::AUTH_TOKEN, &token).await?,
            None => tracing::warn!("Login response carries no auth token"),
        }
        match normalize::refresh_token(Some(raw), envelope) {
            Some(token) => self.storage.set(keys::REFRESH_TOKEN, &token).await?,
            None => tracing::debug!("Login response carries no refresh token"),
        }

        Ok(user)
    }

    /// Up to `max_retries` sync attempts, sleeping `attempt * step` between them.
    pub async fn retry_user_sync(&self, max_retries: u32) -> SyncOutcome {
        let mut last = SyncOutcome::manual_login(MANUAL_LOGIN_MESSAGE);

        for attempt in 1..=max_retries {
            last = self.sync_user_after_payment().await;
            if last.success {
                return last;
            }
            tracing::debug!(attempt, max_retries, "User sync attempt failed");

            if attempt < max_retries {
                tokio::time::sleep(self.timings.retry_backoff_step * attempt).await;
            }
        }

        tracing::info!(max_retries, "User sync failed after retries");
        SyncOutcome {
            success: false,
            requires_manual_login: true,
            ..last
        }
    }

    /// Sync, activate, reload, then delete the pending registration.
    pub async fn complete_payment_activation(&self) -> ActivationOutcome {
        let mut outcome = self.sync_user_after_payment().await;
        if !outcome.success {
            outcome = self.retry_user_sync(2).await;
        }
        if !outcome.success {
            return ActivationOutcome::ManualLoginRequired {
                message: outcome.message.unwrap_or_else(|| MANUAL_LOGIN_MESSAGE.to_string()),
            };
        }

        let user = outcome.user.unwrap_or_default();
        let plan = user
            .subscription_type
            .clone()
            .filter(|t| SubscriptionType::from_str(t).is_some())
            .unwrap_or_else(|| SubscriptionType::Yearly.as_str().to_string());
        let subscription_id = user
            .subscription_id
            .clone()
            .unwrap_or_else(|| format!("stripe-{}", user.id));

        if let Err(e) = self.entitlement.activate_premium(&plan, &subscription_id).await {
            tracing::warn!(error = %e, "Premium activation after payment failed");
            return ActivationOutcome::Failed {
                message: e.to_string(),
            };
        }

        let record = self.entitlement.check_premium_status().await;
        self.cleanup_pending_registration().await;

        tracing::info!(premium = record.is_premium, "Payment activation complete");
        ActivationOutcome::Activated(record)
    }

    // ==================== Diagnostics ====================

    /// Never mutates storage. Unreadable keys count as absent.
    pub async fn check_user_sync_status(&self) -> SyncStatus {
        let present = |key: &'static str| async move {
            matches!(self.storage.get(key).await, Ok(Some(_)))
        };
        let flag = |key: &'static str| async move {
            self.storage.get_flag(key).await.unwrap_or(false)
        };

        SyncStatus {
            has_user_data: present(keys::USER_DATA).await,
            has_auth_token: present(keys::AUTH_TOKEN).await,
            has_refresh_token: present(keys::REFRESH_TOKEN).await,
            is_logged_in: flag(keys::IS_LOGGED_IN).await,
            explicit_connection: flag(keys::EXPLICIT_CONNECTION).await,
        }
    }

    async fn write_pending(&self, registration: &PendingRegistration) -> Result<()> {
        let json = serde_json::to_string(registration)?;
        self.storage.set(keys::PENDING_REGISTRATION, &json).await
    }
}

impl std::fmt::Debug for PaymentReconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PaymentReconciler")
            .field("timings", &self.timings)
            .finish()
    }
}
