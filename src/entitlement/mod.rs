//! Entitlement store: the single answer to "is this device premium".
//!
//! Three sources compete: the cached [`EntitlementRecord`], the `user_data`
//! snapshot written at login / post-payment sync, and the server, which is
//! authoritative but slow. Loading prefers `user_data` when it grants premium,
//! falls back to the cache, and fails closed to a free record on any corrupt
//! value. Background checks (local expiry, server re-verification, explicit
//! connection audit) all funnel into the same idempotent deactivation.

pub mod features;

use std::sync::{Arc, Mutex, RwLock};

use chrono::{DateTime, Duration, Utc};

use crate::api::{normalize, AccountApi};
use crate::bridge::{NativeBridge, NoopBridge};
use crate::clock::{Clock, SystemClock};
use crate::config::Timings;
use crate::error::{Result, SyncError};
use crate::models::{
    vip_expiry, EntitlementRecord, PremiumPurchase, SubscriptionType, UserRecord,
};
use crate::notify::{Notifier, Toast};
use crate::scheduler::TaskSet;
use crate::storage::{keys, StorageAdapter};

/// Premium within this window of its expiry gets an "expiring soon" notice.
const EXPIRY_WARNING_WINDOW_DAYS: i64 = 7;

/// Outcome of a local expiry check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpiryCheck {
    /// Nothing cached, not premium, VIP, or no expiry date
    NotApplicable,
    Active,
    ExpiringSoon { days_left: i64 },
    /// The record was deactivated
    Expired,
}

/// Outcome of a server token re-verification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReverifyOutcome {
    /// Preconditions not met (pending registration, no explicit connection, ...)
    Skipped,
    Valid,
    /// Server rejected the token; tokens were removed and premium deactivated
    Rejected,
    /// Transient failure, nothing changed
    Failed,
}

/// Where [`EntitlementStore::check_existing_premium`] found an active subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PremiumSource {
    LocalCache,
    Account,
    PurchaseHistory,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExistingPremium {
    pub has_active_premium: bool,
    pub source: Option<PremiumSource>,
    pub expiry_date: Option<DateTime<Utc>>,
    pub subscription_type: Option<SubscriptionType>,
    /// The caller must send the user through login before the subscription
    /// can be used on this device.
    pub requires_login: bool,
}

impl ExistingPremium {
    fn none() -> Self {
        Self::default()
    }

    fn found(
        source: PremiumSource,
        expiry_date: Option<DateTime<Utc>>,
        subscription_type: Option<SubscriptionType>,
    ) -> Self {
        Self {
            has_active_premium: true,
            source: Some(source),
            expiry_date,
            subscription_type,
            requires_login: source == PremiumSource::PurchaseHistory,
        }
    }
}

#[derive(Debug)]
struct State {
    user: EntitlementRecord,
    loading: bool,
}

pub struct EntitlementStore {
    storage: Arc<dyn StorageAdapter>,
    api: Arc<dyn AccountApi>,
    notifier: Arc<dyn Notifier>,
    bridge: Arc<dyn NativeBridge>,
    clock: Arc<dyn Clock>,
    timings: Timings,
    state: RwLock<State>,
    tasks: Mutex<TaskSet>,
}

impl EntitlementStore {
    pub fn new(
        storage: Arc<dyn StorageAdapter>,
        api: Arc<dyn AccountApi>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            storage,
            api,
            notifier,
            bridge: Arc::new(NoopBridge),
            clock: Arc::new(SystemClock),
            timings: Timings::default(),
            state: RwLock::new(State {
                user: EntitlementRecord::default(),
                loading: true,
            }),
            tasks: Mutex::new(TaskSet::new()),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_bridge(mut self, bridge: Arc<dyn NativeBridge>) -> Self {
        self.bridge = bridge;
        self
    }

    pub fn with_timings(mut self, timings: Timings) -> Self {
        self.timings = timings;
        self
    }

    // ==================== Lifecycle ====================

    /// Initial load, then the background checks. Calling `start` again
    /// restarts the checks.
    pub async fn start(self: &Arc<Self>) {
        self.check_premium_status().await;

        let t = self.timings;
        let Ok(mut tasks) = self.tasks.lock() else {
            tracing::error!("Entitlement task set lock poisoned, background checks not started");
            return;
        };
        tasks.stop();

        tasks.spawn_periodic(
            "expiry_check",
            Arc::downgrade(self),
            t.expiry_check_delay,
            t.expiry_check_period,
            |store: Arc<Self>| async move {
                store.check_local_expiry().await;
            },
        );
        tasks.spawn_periodic(
            "server_reverify",
            Arc::downgrade(self),
            t.reverify_delay,
            t.reverify_period,
            |store: Arc<Self>| async move {
                store.reverify_session().await;
            },
        );
        tasks.spawn_periodic(
            "connection_audit",
            Arc::downgrade(self),
            t.connection_audit_delay,
            t.connection_audit_period,
            |store: Arc<Self>| async move {
                store.audit_explicit_connection().await;
            },
        );

        tracing::info!("Entitlement background checks started");
    }

    /// Cancel every background check. Must be called on teardown so no
    /// stale timer writes to storage afterwards.
    pub fn stop(&self) {
        if let Ok(mut tasks) = self.tasks.lock() {
            tasks.stop();
        }
    }

    pub fn running_checks(&self) -> usize {
        self.tasks.lock().map(|t| t.len()).unwrap_or(0)
    }

    // ==================== Queries ====================

    pub fn user(&self) -> EntitlementRecord {
        self.state
            .read()
            .map(|s| s.user.clone())
            .unwrap_or_default()
    }

    pub fn is_loading(&self) -> bool {
        self.state.read().map(|s| s.loading).unwrap_or(false)
    }

    pub fn is_premium(&self) -> bool {
        self.state.read().map(|s| s.user.is_premium).unwrap_or(false)
    }

    /// True iff premium and the feature is part of the subscription.
    pub fn has_feature(&self, feature: &str) -> bool {
        self.state
            .read()
            .map(|s| s.user.has_feature(feature))
            .unwrap_or(false)
    }

    /// Premium users may use everything; free users everything but the
    /// premium-only list.
    pub fn can_use_feature(&self, feature: &str) -> bool {
        features::can_use_feature(self.is_premium(), feature)
    }

    // ==================== Load ====================

    /// Recompute the entitlement from storage. Never fails: any corrupt
    /// value yields the free record.
    pub async fn check_premium_status(&self) -> EntitlementRecord {
        self.set_loading(true);

        let record = match self.load().await {
            Ok(record) => record,
            Err(e) => {
                tracing::warn!(error = %e, "Entitlement load failed, falling back to free");
                EntitlementRecord::default()
            }
        };

        self.replace_state(record.clone(), false);
        record
    }

    async fn load(&self) -> Result<EntitlementRecord> {
        if self.check_local_expiry().await == ExpiryCheck::Expired {
            return Ok(self.user());
        }

        self.push_token_to_native().await;

        if let Some(user) = self.read_user().await? {
            if user.grants_premium() {
                let record = self.record_from_user(&user);
                self.persist(&record).await?;
                tracing::debug!(vip = record.is_vip, "Entitlement loaded from user_data");
                return Ok(record);
            }
        }

        let Some(cached) = self.read_cached().await? else {
            return Ok(EntitlementRecord::default());
        };

        // A recorded purchase alone is enough, even if the flag drifted
        let is_premium = cached.is_premium || cached.has_purchased_premium;
        let has_purchased_premium = cached.has_purchased_premium || is_premium;

        Ok(EntitlementRecord {
            is_premium,
            has_purchased_premium,
            ..cached
        })
    }

    fn record_from_user(&self, user: &UserRecord) -> EntitlementRecord {
        let now = self.clock.now();
        let previous = self.user();

        let (expiry_date, features) = if user.is_vip {
            (Some(vip_expiry()), features::vip_feature_set())
        } else {
            (user.premium_expiry, features::premium_feature_set())
        };

        EntitlementRecord {
            is_premium: true,
            subscription_type: user
                .subscription_type
                .as_deref()
                .and_then(SubscriptionType::from_str),
            subscription_id: user.subscription_id.clone(),
            expiry_date,
            features,
            has_purchased_premium: true,
            premium_activated_at: previous.premium_activated_at.or(Some(now)),
            is_vip: user.is_vip,
            vip_reason: user.vip_reason.clone(),
            vip_granted_by: user.vip_granted_by.clone(),
            vip_granted_at: user.vip_granted_at,
        }
    }

    /// Best effort: native widgets and the adhan service call the API with
    /// the session token.
    async fn push_token_to_native(&self) {
        match self.storage.get(keys::AUTH_TOKEN).await {
            Ok(Some(token)) => {
                if let Err(e) = self.bridge.push_auth_token(&token) {
                    tracing::warn!(error = %e, "Failed to push auth token to native modules");
                }
            }
            Ok(None) => {}
            Err(e) => tracing::warn!(error = %e, "Failed to read auth token for native modules"),
        }
    }

    // ==================== Activation ====================

    /// Activate a paid subscription starting now.
    ///
    /// Fails on an unknown plan or an empty subscription id, and when the
    /// record cannot be persisted.
    pub async fn activate_premium(
        &self,
        plan: &str,
        subscription_id: &str,
    ) -> Result<EntitlementRecord> {
        let plan = SubscriptionType::parse(plan)?;
        if subscription_id.trim().is_empty() {
            return Err(SyncError::Validation("subscription id is required".into()));
        }

        let now = self.clock.now();
        let mut record = self.user();
        record.is_premium = true;
        record.has_purchased_premium = true;
        record.premium_activated_at = Some(now);
        record.subscription_type = Some(plan);
        record.subscription_id = Some(subscription_id.to_string());
        record.expiry_date = Some(now + plan.duration());
        record.features.extend(features::premium_feature_set());

        self.persist(&record).await?;
        self.replace_state(record.clone(), false);

        tracing::info!(plan = %plan, "Premium activated");
        Ok(record)
    }

    /// Log the user in locally with an account fetched by a login flow and
    /// reload the entitlement from it.
    pub async fn activate_premium_after_login(&self, user: &UserRecord) -> EntitlementRecord {
        match serde_json::to_string(user) {
            Ok(json) => {
                if let Err(e) = self.storage.set(keys::USER_DATA, &json).await {
                    tracing::warn!(error = %e, "Failed to persist user record after login");
                }
            }
            Err(e) => tracing::warn!(error = %e, "Failed to serialize user record after login"),
        }

        self.check_premium_status().await
    }

    // ==================== Deactivation ====================

    /// Revert to the free record, keeping `has_purchased_premium`. Never
    /// fails and is safe to run concurrently.
    pub async fn deactivate_premium(&self) {
        self.deactivate_with(false).await;
    }

    async fn deactivate_with(&self, purchased_hint: bool) {
        let cached_purchase = match self.read_cached().await {
            Ok(Some(cached)) => cached.has_purchased_premium,
            Ok(None) => false,
            Err(e) => {
                tracing::warn!(error = %e, "Cached entitlement unreadable during deactivation");
                false
            }
        };

        let has_purchased = purchased_hint || cached_purchase || self.user().has_purchased_premium;
        let record = EntitlementRecord::deactivated(has_purchased);

        if let Err(e) = self.persist(&record).await {
            tracing::warn!(error = %e, "Failed to persist deactivated entitlement");
        }
        self.replace_state(record, false);

        tracing::info!("Premium deactivated");
    }

    /// Wipe the session and premium caches, then deactivate.
    pub async fn force_logout(&self) {
        let purchased = self.user().has_purchased_premium
            || matches!(self.read_cached().await, Ok(Some(c)) if c.has_purchased_premium);

        let session_keys = [keys::USER_DATA, keys::AUTH_TOKEN, keys::REFRESH_TOKEN];
        for key in session_keys.iter().chain(keys::PREMIUM_CACHES) {
            if let Err(e) = self.storage.remove(key).await {
                tracing::warn!(key = %key, error = %e, "Failed to remove key during forced logout");
            }
        }

        self.deactivate_with(purchased).await;
        tracing::info!("Forced logout complete");
    }

    // ==================== Background checks ====================

    /// Deactivate a lapsed subscription, or warn when it is about to lapse.
    pub async fn check_local_expiry(&self) -> ExpiryCheck {
        let cached = match self.read_cached().await {
            Ok(Some(cached)) => cached,
            Ok(None) => return ExpiryCheck::NotApplicable,
            Err(e) => {
                tracing::debug!(error = %e, "Skipping expiry check, cached entitlement unreadable");
                return ExpiryCheck::NotApplicable;
            }
        };

        if cached.is_vip || !cached.is_premium || cached.expiry_date.is_none() {
            return ExpiryCheck::NotApplicable;
        }

        let now = self.clock.now();
        if cached.is_expired_at(now) {
            self.deactivate_premium().await;
            self.notifier.notify(Toast::error(
                "Premium expired",
                "Your premium subscription has expired. Renew it to keep premium features.",
            ));
            return ExpiryCheck::Expired;
        }

        match cached.remaining_at(now) {
            Some(left) if left <= Duration::days(EXPIRY_WARNING_WINDOW_DAYS) => {
                let days_left = left.num_days().max(1);
                self.notifier.notify(Toast::info(
                    "Premium expiring soon",
                    format!("Your premium subscription expires in {} day(s).", days_left),
                ));
                ExpiryCheck::ExpiringSoon { days_left }
            }
            _ => ExpiryCheck::Active,
        }
    }

    /// Ask the server whether the session token is still valid.
    ///
    /// Only an explicit rejection deactivates; network failures change nothing.
    pub async fn reverify_session(&self) -> ReverifyOutcome {
        match self.reverify_preconditions().await {
            Ok(true) => {}
            Ok(false) => return ReverifyOutcome::Skipped,
            Err(e) => {
                tracing::warn!(error = %e, "Could not read session state for re-verification");
                return ReverifyOutcome::Skipped;
            }
        }

        match self.api.verify_auth().await {
            Ok(response) if response.success => {
                tracing::debug!("Session token still valid");
                ReverifyOutcome::Valid
            }
            Ok(response) => {
                tracing::info!(
                    reason = %response.message_or("token rejected"),
                    "Server rejected session token"
                );
                for key in [keys::AUTH_TOKEN, keys::REFRESH_TOKEN] {
                    if let Err(e) = self.storage.remove(key).await {
                        tracing::warn!(key = %key, error = %e, "Failed to remove rejected token");
                    }
                }
                self.deactivate_premium().await;
                self.notifier.notify(Toast::error(
                    "Session expired",
                    "Your session has expired. Please log in again.",
                ));
                ReverifyOutcome::Rejected
            }
            Err(e) => {
                tracing::warn!(error = %e, "Session re-verification failed, keeping entitlement");
                ReverifyOutcome::Failed
            }
        }
    }

    async fn reverify_preconditions(&self) -> Result<bool> {
        if self.storage.get(keys::PENDING_REGISTRATION).await?.is_some() {
            tracing::debug!("Pending registration present, skipping re-verification");
            return Ok(false);
        }
        Ok(self.storage.get_flag(keys::EXPLICIT_CONNECTION).await?
            && self.storage.get(keys::USER_DATA).await?.is_some()
            && self.storage.get(keys::AUTH_TOKEN).await?.is_some())
    }

    /// Deactivate when there is no explicitly connected account. Returns
    /// whether a deactivation ran.
    pub async fn audit_explicit_connection(&self) -> bool {
        let connected = async {
            Ok::<_, SyncError>(
                self.storage.get_flag(keys::EXPLICIT_CONNECTION).await?
                    && self.storage.get(keys::USER_DATA).await?.is_some(),
            )
        }
        .await
        .unwrap_or_else(|e| {
            tracing::warn!(error = %e, "Could not read connection state, treating as disconnected");
            false
        });

        if connected {
            return false;
        }

        tracing::debug!("No explicit connection, deactivating premium");
        self.deactivate_premium().await;
        true
    }

    /// Connection audit followed by a full reload.
    pub async fn force_check_connection(&self) -> bool {
        self.audit_explicit_connection().await;
        self.check_premium_status().await.is_premium
    }

    // ==================== Existing subscription probe ====================

    /// Look for an active subscription: the local cache, then the account
    /// (only once the cached expiry has passed), then the purchase history.
    /// Errors count as "not found here".
    pub async fn check_existing_premium(&self) -> ExistingPremium {
        let now = self.clock.now();

        let lapsed_locally = match self.read_cached().await {
            Ok(Some(cached)) if cached.is_premium && (cached.is_vip || matches!(cached.expiry_date, Some(exp) if exp > now)) => {
                return ExistingPremium::found(
                    PremiumSource::LocalCache,
                    cached.expiry_date,
                    cached.subscription_type,
                );
            }
            Ok(Some(cached)) => matches!(cached.expiry_date, Some(exp) if exp <= now),
            Ok(None) => false,
            Err(e) => {
                tracing::debug!(error = %e, "Cached entitlement unreadable");
                false
            }
        };

        let account = if lapsed_locally {
            Some(self.api.get_user().await)
        } else {
            None
        };

        match account {
            None => tracing::debug!("No lapsed local subscription, skipping account lookup"),
            Some(Ok(response)) if response.success => {
                if let Some(raw) = normalize::extract_user(&response) {
                    let user = UserRecord::from_api(raw, now);
                    let expiry = if user.is_vip { Some(vip_expiry()) } else { user.premium_expiry };
                    if user.grants_premium() && matches!(expiry, Some(exp) if exp > now) {
                        return ExistingPremium::found(
                            PremiumSource::Account,
                            expiry,
                            user.subscription_type.as_deref().and_then(SubscriptionType::from_str),
                        );
                    }
                }
            }
            Some(Ok(_)) => {}
            Some(Err(e)) if e.is_not_found() => tracing::debug!("No account for this session"),
            Some(Err(e)) => tracing::warn!(error = %e, "Account lookup failed"),
        }

        match self.api.get_premium_purchases().await {
            Ok(response) if response.success => {
                let purchases: Vec<PremiumPurchase> = response
                    .data
                    .and_then(|d| serde_json::from_value(d).ok())
                    .unwrap_or_default();

                if let Some(best) = purchases
                    .into_iter()
                    .filter(|p| p.is_active_at(now))
                    .max_by_key(|p| p.expiry_date)
                {
                    return ExistingPremium::found(
                        PremiumSource::PurchaseHistory,
                        best.expiry_date,
                        best.subscription_type.as_deref().and_then(SubscriptionType::from_str),
                    );
                }
            }
            Ok(_) => {}
            Err(e) => tracing::warn!(error = %e, "Purchase history lookup failed"),
        }

        ExistingPremium::none()
    }

    // ==================== Internal Helpers ====================

    async fn read_cached(&self) -> Result<Option<EntitlementRecord>> {
        match self.storage.get(keys::PREMIUM_USER).await? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    async fn read_user(&self) -> Result<Option<UserRecord>> {
        match self.storage.get(keys::USER_DATA).await? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    async fn persist(&self, record: &EntitlementRecord) -> Result<()> {
        let json = serde_json::to_string(record)?;
        self.storage.set(keys::PREMIUM_USER, &json).await
    }

    fn set_loading(&self, loading: bool) {
        if let Ok(mut state) = self.state.write() {
            state.loading = loading;
        }
    }

    fn replace_state(&self, user: EntitlementRecord, loading: bool) {
        if let Ok(mut state) = self.state.write() {
            state.user = user;
            state.loading = loading;
        }
    }
}

impl std::fmt::Debug for EntitlementStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntitlementStore")
            .field("user", &self.user())
            .field("timings", &self.timings)
            .finish()
    }
}
