//! Test utilities and fixtures for adhan-sync integration tests

#![allow(dead_code)]

use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use serde_json::{json, Value};

pub use adhan_sync::api::{AccountApi, ApiEnvelope, Credentials};
pub use adhan_sync::backup::BackupCoordinator;
pub use adhan_sync::clock::ManualClock;
pub use adhan_sync::cloud::MemoryCloud;
pub use adhan_sync::config::Timings;
pub use adhan_sync::entitlement::EntitlementStore;
pub use adhan_sync::error::{Result, SyncError};
pub use adhan_sync::models::*;
pub use adhan_sync::notify::{MemoryNotifier, ToastKind};
pub use adhan_sync::payments::PaymentReconciler;
pub use adhan_sync::storage::{keys, MemoryStorage, StorageAdapter};

/// Fixed "now" for every test clock
pub fn test_now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()
}

// ============================================================================
// Account API mock
// ============================================================================

/// A scripted answer from the account API.
#[derive(Debug, Clone)]
pub enum Reply {
    Envelope(ApiEnvelope),
    Status(u16, String),
    Network,
}

impl Reply {
    pub fn ok(data: Value) -> Self {
        Reply::Envelope(ApiEnvelope::ok(data))
    }

    pub fn failure(message: &str) -> Self {
        Reply::Envelope(ApiEnvelope::failure(message))
    }

    fn into_result(self) -> Result<ApiEnvelope> {
        match self {
            Reply::Envelope(envelope) => Ok(envelope),
            Reply::Status(status, message) => Err(SyncError::api(status, message)),
            Reply::Network => Err(SyncError::network("connection refused")),
        }
    }
}

#[derive(Debug)]
struct Endpoint {
    queue: VecDeque<Reply>,
    fallback: Reply,
    calls: usize,
}

impl Endpoint {
    fn new(fallback: Reply) -> Self {
        Self {
            queue: VecDeque::new(),
            fallback,
            calls: 0,
        }
    }

    fn next(&mut self) -> Result<ApiEnvelope> {
        self.calls += 1;
        self.queue
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone())
            .into_result()
    }
}

/// Account API with per-endpoint scripted replies and call counters.
///
/// Each endpoint answers queued replies first, then its fallback.
#[derive(Debug)]
pub struct MockAccountApi {
    user: Mutex<Endpoint>,
    verify: Mutex<Endpoint>,
    login: Mutex<Endpoint>,
    purchases: Mutex<Endpoint>,
    logins: Mutex<Vec<Credentials>>,
}

impl Default for MockAccountApi {
    fn default() -> Self {
        Self::new()
    }
}

impl MockAccountApi {
    pub fn new() -> Self {
        Self {
            user: Mutex::new(Endpoint::new(Reply::Status(404, "User not found".into()))),
            verify: Mutex::new(Endpoint::new(Reply::ok(json!({"valid": true})))),
            login: Mutex::new(Endpoint::new(Reply::failure("Invalid credentials"))),
            purchases: Mutex::new(Endpoint::new(Reply::ok(json!([])))),
            logins: Mutex::new(Vec::new()),
        }
    }

    pub fn set_user(&self, reply: Reply) {
        self.user.lock().unwrap().fallback = reply;
    }

    pub fn set_verify(&self, reply: Reply) {
        self.verify.lock().unwrap().fallback = reply;
    }

    pub fn set_login(&self, reply: Reply) {
        self.login.lock().unwrap().fallback = reply;
    }

    pub fn push_login(&self, reply: Reply) {
        self.login.lock().unwrap().queue.push_back(reply);
    }

    pub fn set_purchases(&self, reply: Reply) {
        self.purchases.lock().unwrap().fallback = reply;
    }

    pub fn user_calls(&self) -> usize {
        self.user.lock().unwrap().calls
    }

    pub fn verify_calls(&self) -> usize {
        self.verify.lock().unwrap().calls
    }

    pub fn login_calls(&self) -> usize {
        self.login.lock().unwrap().calls
    }

    pub fn purchase_calls(&self) -> usize {
        self.purchases.lock().unwrap().calls
    }

    pub fn logins(&self) -> Vec<Credentials> {
        self.logins.lock().unwrap().clone()
    }
}

#[async_trait]
impl AccountApi for MockAccountApi {
    async fn get_user(&self) -> Result<ApiEnvelope> {
        self.user.lock().unwrap().next()
    }

    async fn verify_auth(&self) -> Result<ApiEnvelope> {
        self.verify.lock().unwrap().next()
    }

    async fn login_with_credentials(&self, credentials: &Credentials) -> Result<ApiEnvelope> {
        self.logins.lock().unwrap().push(credentials.clone());
        self.login.lock().unwrap().next()
    }

    async fn get_premium_purchases(&self) -> Result<ApiEnvelope> {
        self.purchases.lock().unwrap().next()
    }
}

/// A successful login answer in the nested `data.user` shape.
pub fn login_success(user: Value, token: &str, refresh: &str) -> Reply {
    Reply::ok(json!({
        "user": user,
        "token": token,
        "refresh_token": refresh,
    }))
}

pub fn paid_account_json() -> Value {
    json!({
        "id": 42,
        "email": "u@t.com",
        "first_name": "Elyes",
        "premium_status": 1,
        "subscription_type": "monthly",
        "subscription_id": "sub_123",
        "premium_expiry": "2024-07-01T12:00:00Z",
        "stripe_customer_id": "cus_123",
        "device_id": "abc"
    })
}

// ============================================================================
// Storage that fails on demand
// ============================================================================

/// Memory storage whose operations fail for selected keys, or for everything.
#[derive(Debug, Default)]
pub struct FailingStorage {
    inner: MemoryStorage,
    failing_keys: Mutex<HashSet<String>>,
    fail_all: AtomicBool,
}

impl FailingStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_key(&self, key: &str) {
        self.failing_keys.lock().unwrap().insert(key.to_string());
    }

    pub fn fail_everything(&self) {
        self.fail_all.store(true, Ordering::SeqCst);
    }

    pub fn heal(&self) {
        self.fail_all.store(false, Ordering::SeqCst);
        self.failing_keys.lock().unwrap().clear();
    }

    fn check(&self, key: &str) -> Result<()> {
        if self.fail_all.load(Ordering::SeqCst) || self.failing_keys.lock().unwrap().contains(key) {
            return Err(SyncError::storage(format!("simulated failure for {}", key)));
        }
        Ok(())
    }
}

#[async_trait]
impl StorageAdapter for FailingStorage {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        self.check(key)?;
        self.inner.get(key).await
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        self.check(key)?;
        self.inner.set(key, value).await
    }

    async fn remove(&self, key: &str) -> Result<()> {
        self.check(key)?;
        self.inner.remove(key).await
    }

    async fn clear(&self) -> Result<()> {
        self.check("*")?;
        self.inner.clear().await
    }
}

// ============================================================================
// Harness
// ============================================================================

/// Every collaborator the services need, wired to in-memory fakes.
pub struct Harness {
    pub storage: Arc<FailingStorage>,
    pub api: Arc<MockAccountApi>,
    pub notifier: Arc<MemoryNotifier>,
    pub clock: Arc<ManualClock>,
    pub cloud: Arc<MemoryCloud>,
}

impl Default for Harness {
    fn default() -> Self {
        Self::new()
    }
}

impl Harness {
    pub fn new() -> Self {
        Self {
            storage: Arc::new(FailingStorage::new()),
            api: Arc::new(MockAccountApi::new()),
            notifier: Arc::new(MemoryNotifier::new()),
            clock: Arc::new(ManualClock::new(test_now())),
            cloud: Arc::new(MemoryCloud::new()),
        }
    }

    pub fn entitlement(&self) -> Arc<EntitlementStore> {
        Arc::new(
            EntitlementStore::new(self.storage.clone(), self.api.clone(), self.notifier.clone())
                .with_clock(self.clock.clone())
                .with_timings(Timings::immediate()),
        )
    }

    pub fn reconciler(&self, entitlement: &Arc<EntitlementStore>) -> PaymentReconciler {
        PaymentReconciler::new(self.storage.clone(), self.api.clone(), entitlement.clone())
            .with_clock(self.clock.clone())
            .with_timings(Timings::immediate())
    }

    pub fn backup(&self, entitlement: &Arc<EntitlementStore>) -> Arc<BackupCoordinator> {
        Arc::new(
            BackupCoordinator::new(
                self.storage.clone(),
                self.cloud.clone(),
                self.cloud.clone(),
                entitlement.clone(),
                self.notifier.clone(),
            )
            .with_clock(self.clock.clone())
            .with_timings(Timings::immediate())
            .with_device("android", "test"),
        )
    }

    pub async fn seed(&self, key: &str, value: &str) {
        self.storage.set(key, value).await.unwrap();
    }

    pub async fn read(&self, key: &str) -> Option<String> {
        self.storage.get(key).await.unwrap()
    }

    pub async fn seed_record(&self, record: &EntitlementRecord) {
        self.seed(keys::PREMIUM_USER, &serde_json::to_string(record).unwrap())
            .await;
    }

    pub async fn cached_record(&self) -> Option<EntitlementRecord> {
        self.read(keys::PREMIUM_USER)
            .await
            .map(|raw| serde_json::from_str(&raw).unwrap())
    }

    /// An active monthly subscription expiring `days` from now.
    pub fn premium_record(&self, days: i64) -> EntitlementRecord {
        EntitlementRecord {
            is_premium: true,
            subscription_type: Some(SubscriptionType::Monthly),
            subscription_id: Some("sub_123".into()),
            expiry_date: Some(test_now() + chrono::Duration::days(days)),
            has_purchased_premium: true,
            premium_activated_at: Some(test_now()),
            ..Default::default()
        }
    }

    /// A connected session whose user record grants premium.
    pub async fn seed_connected_premium_user(&self) {
        let user = UserRecord::from_api(&paid_account_json(), test_now());
        self.seed(keys::USER_DATA, &serde_json::to_string(&user).unwrap())
            .await;
        self.seed(keys::AUTH_TOKEN, "tok").await;
        self.seed(keys::REFRESH_TOKEN, "ref").await;
        self.seed(keys::EXPLICIT_CONNECTION, "true").await;
    }

    pub async fn seed_pending_registration(&self) -> PendingRegistration {
        let mut registration = PendingRegistration::new("u@t.com", "hunter2");
        registration.user_first_name = Some("Elyes".into());
        registration.subscription_type = Some(SubscriptionType::Monthly);
        self.seed(
            keys::PENDING_REGISTRATION,
            &serde_json::to_string(&registration).unwrap(),
        )
        .await;
        registration
    }
}
