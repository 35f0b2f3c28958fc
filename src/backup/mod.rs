//! Cloud backup and restore of favorites and a few settings.
//!
//! The whole snapshot is replaced on every backup; conflicts are resolved by
//! comparing `lastBackupTime` and offering a restore when the cloud copy is
//! newer. Backing up requires premium and an anonymous cloud identity.
//!
//! `is_syncing` is advisory: it is exposed to the UI but nothing here waits
//! on it, so overlapping backup and restore calls race.

pub mod partition;

use std::sync::{Arc, Mutex, RwLock};

use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::clock::{Clock, SystemClock};
use crate::cloud::{CloudAuth, DocumentStore, Identity};
use crate::config::Timings;
use crate::entitlement::EntitlementStore;
use crate::error::{Result, SyncError};
use crate::models::{
    BackupSessionState, BackupSettings, BackupSnapshot, BackupStatus, DeviceInfo,
};
use crate::notify::{Notifier, Toast};
use crate::scheduler::TaskSet;
use crate::storage::{flag_value, keys, StorageAdapter};

const AUTO_BACKUP_TASK: &str = "auto_backup";

#[derive(Debug, Default)]
struct Session {
    state: BackupSessionState,
    identity: Option<Identity>,
}

pub struct BackupCoordinator {
    storage: Arc<dyn StorageAdapter>,
    auth: Arc<dyn CloudAuth>,
    documents: Arc<dyn DocumentStore>,
    entitlement: Arc<EntitlementStore>,
    notifier: Arc<dyn Notifier>,
    clock: Arc<dyn Clock>,
    timings: Timings,
    device: DeviceInfo,
    session: RwLock<Session>,
    tasks: Mutex<TaskSet>,
}

impl BackupCoordinator {
    pub fn new(
        storage: Arc<dyn StorageAdapter>,
        auth: Arc<dyn CloudAuth>,
        documents: Arc<dyn DocumentStore>,
        entitlement: Arc<EntitlementStore>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            storage,
            auth,
            documents,
            entitlement,
            notifier,
            clock: Arc::new(SystemClock),
            timings: Timings::default(),
            device: DeviceInfo {
                platform: std::env::consts::OS.to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
            },
            session: RwLock::new(Session::default()),
            tasks: Mutex::new(TaskSet::new()),
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

    pub fn with_device(mut self, platform: impl Into<String>, version: impl Into<String>) -> Self {
        self.device = DeviceInfo {
            platform: platform.into(),
            version: version.into(),
        };
        self
    }

    // ==================== Lifecycle ====================

    /// Restore local bookkeeping, follow the auth state, and resume auto
    /// backup if it was enabled.
    pub async fn start(self: &Arc<Self>) {
        let last_backup_time = match self.storage.get(keys::LAST_BACKUP_TIME).await {
            Ok(raw) => raw.as_deref().and_then(parse_time),
            Err(e) => {
                tracing::warn!(error = %e, "Could not read last backup time");
                None
            }
        };
        let auto_enabled = self
            .storage
            .get_flag(keys::AUTO_BACKUP_ENABLED)
            .await
            .unwrap_or_else(|e| {
                tracing::warn!(error = %e, "Could not read auto backup flag");
                false
            });

        self.update(|s| {
            s.state.last_backup_time = last_backup_time;
            s.state.is_auto_backup_enabled = auto_enabled;
        });

        let mut rx = self.auth.subscribe();
        let current = rx.borrow_and_update().clone();
        self.apply_auth_state(current);

        let weak = Arc::downgrade(self);
        let Ok(mut tasks) = self.tasks.lock() else {
            tracing::error!("Backup task set lock poisoned, not starting");
            return;
        };
        tasks.stop();
        tasks.spawn("auth_observer", async move {
            while rx.changed().await.is_ok() {
                let identity = rx.borrow_and_update().clone();
                let Some(this) = weak.upgrade() else {
                    break;
                };
                this.apply_auth_state(identity);
            }
        });
        drop(tasks);

        if auto_enabled {
            self.start_auto_backup_timer();
        }

        tracing::info!(auto_backup = auto_enabled, "Backup coordinator started");
    }

    pub fn stop(&self) {
        if let Ok(mut tasks) = self.tasks.lock() {
            tasks.stop();
        }
    }

    fn start_auto_backup_timer(self: &Arc<Self>) {
        let Ok(mut tasks) = self.tasks.lock() else {
            return;
        };
        if tasks.is_running(AUTO_BACKUP_TASK) {
            return;
        }

        let period = self.timings.auto_backup_period;
        tasks.spawn_periodic(
            AUTO_BACKUP_TASK,
            Arc::downgrade(self),
            period,
            period,
            |this: Arc<Self>| async move {
                let state = this.state();
                if state.is_auto_backup_enabled && state.is_signed_in && this.entitlement.is_premium() {
                    this.run_backup(false).await;
                }
            },
        );
    }

    pub fn auto_backup_running(&self) -> bool {
        self.tasks
            .lock()
            .map(|t| t.is_running(AUTO_BACKUP_TASK))
            .unwrap_or(false)
    }

    // ==================== Queries ====================

    pub fn state(&self) -> BackupSessionState {
        self.session
            .read()
            .map(|s| s.state.clone())
            .unwrap_or_default()
    }

    pub fn is_signed_in(&self) -> bool {
        self.state().is_signed_in
    }

    pub fn user_email(&self) -> Option<String> {
        self.state().user_email
    }

    pub fn last_backup_time(&self) -> Option<DateTime<Utc>> {
        self.state().last_backup_time
    }

    pub fn is_syncing(&self) -> bool {
        self.state().is_syncing
    }

    pub fn backup_status(&self) -> BackupStatus {
        self.state().backup_status
    }

    pub fn is_auto_backup_enabled(&self) -> bool {
        self.state().is_auto_backup_enabled
    }

    pub fn has_cloud_data(&self) -> bool {
        self.state().has_cloud_data
    }

    pub fn show_restore_dialog(&self) -> bool {
        self.state().show_restore_dialog
    }

    // ==================== Auth ====================

    pub async fn sign_in_anonymously(&self) -> bool {
        if !self.entitlement.is_premium() {
            self.notifier.notify(Toast::error(
                "Premium required",
                "Cloud backup is a premium feature.",
            ));
            return false;
        }

        match self.auth.sign_in_anonymously().await {
            Ok(identity) => {
                tracing::info!("Signed in to cloud backup");
                self.apply_auth_state(Some(identity));
                self.check_cloud_data().await;
                true
            }
            Err(e) => {
                tracing::warn!(error = %e, "Anonymous sign-in failed");
                self.notifier.notify(Toast::error(
                    "Sign-in failed",
                    "Could not connect to cloud backup. Please try again.",
                ));
                false
            }
        }
    }

    pub async fn sign_out(&self) -> bool {
        if let Err(e) = self.auth.sign_out().await {
            tracing::warn!(error = %e, "Cloud sign-out failed");
            self.notifier.notify(Toast::error("Sign-out failed", e.to_string()));
            return false;
        }

        let latest = self.auth.subscribe().borrow().clone();
        self.apply_auth_state(latest);
        self.notifier.notify(Toast::info(
            "Signed out",
            "You are signed out of cloud backup.",
        ));
        true
    }

    fn apply_auth_state(&self, identity: Option<Identity>) {
        self.update(|s| {
            match &identity {
                Some(id) => {
                    s.state.is_signed_in = true;
                    s.state.user_email = Some(id.display_email());
                }
                None => {
                    s.state.is_signed_in = false;
                    s.state.user_email = None;
                    s.state.has_cloud_data = false;
                    s.state.show_restore_dialog = false;
                }
            }
            s.identity = identity;
        });
    }

    /// Flag a restore offer when the cloud copy is newer than the last
    /// local backup, or when this device never backed up.
    async fn check_cloud_data(&self) {
        let Some(uid) = self.current_uid() else {
            return;
        };

        let document = match self.documents.get(&uid).await {
            Ok(document) => document.filter(is_present),
            Err(e) => {
                tracing::warn!(error = %e, "Cloud presence check failed");
                return;
            }
        };

        let Some(document) = document else {
            self.update(|s| s.state.has_cloud_data = false);
            return;
        };

        let remote = document
            .get("lastBackupTime")
            .and_then(Value::as_str)
            .and_then(parse_time);

        self.update(|s| {
            let newer = match (remote, s.state.last_backup_time) {
                (Some(remote), Some(local)) => remote > local,
                (_, None) => true,
                (None, Some(_)) => false,
            };
            s.state.has_cloud_data = true;
            s.state.show_restore_dialog = newer;
        });
    }

    // ==================== Backup ====================

    pub async fn backup_data(&self) -> bool {
        if !self.check_preconditions("back up") {
            return false;
        }
        self.run_backup(true).await
    }

    async fn run_backup(&self, announce: bool) -> bool {
        let Some(uid) = self.current_uid() else {
            return false;
        };

        self.begin_sync();
        let result = self.write_snapshot(&uid).await;

        match result {
            Ok(time) => {
                self.update(|s| {
                    s.state.is_syncing = false;
                    s.state.backup_status = BackupStatus::Success;
                    s.state.last_backup_time = Some(time);
                });
                tracing::info!("Backup complete");
                if announce {
                    self.notifier.notify(Toast::success(
                        "Backup complete",
                        "Your favorites are saved to the cloud.",
                    ));
                }
                true
            }
            Err(e) => {
                self.update(|s| {
                    s.state.is_syncing = false;
                    s.state.backup_status = BackupStatus::Error;
                });
                tracing::warn!(error = %e, "Backup failed");
                self.notifier.notify(Toast::error("Backup failed", e.to_string()));
                false
            }
        }
    }

    async fn write_snapshot(&self, uid: &str) -> Result<DateTime<Utc>> {
        let favorites = match self.storage.get(keys::FAVORITES).await? {
            Some(raw) => partition::parse_favorites(&raw)?,
            None => Vec::new(),
        };

        let settings = BackupSettings {
            user_first_name: self.storage.get(keys::USER_FIRST_NAME).await?,
            custom_settings: self
                .storage
                .get(keys::CUSTOM_SETTINGS)
                .await?
                .map(Value::String),
        };

        let now = self.clock.now();
        let snapshot = BackupSnapshot {
            favorites: partition::partition(favorites),
            settings,
            last_backup_time: Some(now),
            device_info: self.device.clone(),
        };

        self.documents.set(uid, serde_json::to_value(&snapshot)?).await?;
        self.storage
            .set(keys::LAST_BACKUP_TIME, &now.to_rfc3339())
            .await?;

        Ok(now)
    }

    // ==================== Restore ====================

    /// Overwrite local favorites (and any settings present in the snapshot)
    /// from the cloud. A missing backup is reported, not an error.
    pub async fn restore_data(&self) -> bool {
        if !self.check_preconditions("restore") {
            return false;
        }
        let Some(uid) = self.current_uid() else {
            return false;
        };

        self.begin_sync();
        let result = self.read_snapshot(&uid).await;

        match result {
            Ok(true) => {
                self.update(|s| {
                    s.state.is_syncing = false;
                    s.state.backup_status = BackupStatus::Success;
                    s.state.show_restore_dialog = false;
                });
                tracing::info!("Restore complete");
                self.notifier.notify(Toast::success(
                    "Restore complete",
                    "Your favorites were restored from the cloud.",
                ));
                true
            }
            Ok(false) => {
                self.update(|s| {
                    s.state.is_syncing = false;
                    s.state.backup_status = BackupStatus::Idle;
                });
                self.notifier.notify(Toast::info(
                    "No backup found",
                    "There is no cloud backup for this account yet.",
                ));
                false
            }
            Err(e) => {
                self.update(|s| {
                    s.state.is_syncing = false;
                    s.state.backup_status = BackupStatus::Error;
                });
                tracing::warn!(error = %e, "Restore failed");
                self.notifier.notify(Toast::error("Restore failed", e.to_string()));
                false
            }
        }
    }

    async fn read_snapshot(&self, uid: &str) -> Result<bool> {
        let Some(document) = self.documents.get(uid).await?.filter(is_present) else {
            return Ok(false);
        };

        if document.get("favorites").map_or(true, Value::is_null) {
            return Err(SyncError::CorruptBackup("backup has no favorites".into()));
        }
        let snapshot: BackupSnapshot = serde_json::from_value(document)
            .map_err(|e| SyncError::CorruptBackup(e.to_string()))?;

        let favorites = partition::flatten(snapshot.favorites);
        self.storage
            .set(keys::FAVORITES, &serde_json::to_string(&favorites)?)
            .await?;

        if let Some(name) = &snapshot.settings.user_first_name {
            self.storage.set(keys::USER_FIRST_NAME, name).await?;
        }
        if let Some(custom) = &snapshot.settings.custom_settings {
            // Settings written as parsed JSON are stored back as JSON text.
            let raw = match custom {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            self.storage.set(keys::CUSTOM_SETTINGS, &raw).await?;
        }
        if let Some(time) = snapshot.last_backup_time {
            self.storage
                .set(keys::LAST_BACKUP_TIME, &time.to_rfc3339())
                .await?;
            self.update(|s| s.state.last_backup_time = Some(time));
        }

        tracing::debug!(count = favorites.len(), "Favorites restored");
        Ok(true)
    }

    // ==================== Auto backup & housekeeping ====================

    /// Persist the auto backup flag. Enabling backs up once right away when
    /// possible and starts the timer; disabling leaves the timer to `stop`.
    pub async fn enable_auto_backup(self: &Arc<Self>, enabled: bool) -> bool {
        if let Err(e) = self
            .storage
            .set(keys::AUTO_BACKUP_ENABLED, flag_value(enabled))
            .await
        {
            tracing::warn!(error = %e, "Failed to persist auto backup flag");
            self.notifier.notify(Toast::error("Auto backup", e.to_string()));
            return false;
        }
        self.update(|s| s.state.is_auto_backup_enabled = enabled);

        if enabled {
            if self.entitlement.is_premium() && self.is_signed_in() {
                self.run_backup(false).await;
            }
            self.start_auto_backup_timer();
        }

        tracing::info!(enabled, "Auto backup toggled");
        true
    }

    pub fn dismiss_restore_dialog(&self) {
        self.update(|s| s.state.show_restore_dialog = false);
    }

    /// Forget local backup bookkeeping. Used on full app logout.
    pub async fn reset_local_backup_state(&self) {
        for key in [keys::LAST_BACKUP_TIME, keys::AUTO_BACKUP_ENABLED] {
            if let Err(e) = self.storage.remove(key).await {
                tracing::warn!(key = %key, error = %e, "Failed to remove backup key");
            }
        }
        self.update(|s| {
            s.state.last_backup_time = None;
            s.state.is_auto_backup_enabled = false;
            s.state.backup_status = BackupStatus::Idle;
            s.state.has_cloud_data = false;
            s.state.show_restore_dialog = false;
        });
    }

    // ==================== Internal Helpers ====================

    fn check_preconditions(&self, action: &str) -> bool {
        if !self.entitlement.is_premium() {
            self.notifier.notify(Toast::error(
                "Premium required",
                format!("You need premium to {} your data.", action),
            ));
            return false;
        }
        if !self.is_signed_in() {
            self.notifier.notify(Toast::error(
                "Not signed in",
                format!("Sign in to cloud backup to {} your data.", action),
            ));
            return false;
        }
        true
    }

    fn begin_sync(&self) {
        self.update(|s| {
            s.state.is_syncing = true;
            s.state.backup_status = BackupStatus::Syncing;
        });
    }

    fn current_uid(&self) -> Option<String> {
        self.session
            .read()
            .ok()
            .and_then(|s| s.identity.as_ref().map(|i| i.uid.clone()))
    }

    fn update(&self, f: impl FnOnce(&mut Session)) {
        if let Ok(mut session) = self.session.write() {
            f(&mut session);
        }
    }
}

impl std::fmt::Debug for BackupCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackupCoordinator")
            .field("state", &self.state())
            .field("device", &self.device)
            .finish()
    }
}

fn is_present(document: &Value) -> bool {
    match document {
        Value::Null => false,
        Value::Object(map) => !map.is_empty(),
        _ => true,
    }
}

fn parse_time(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|d| d.with_timezone(&Utc))
        .ok()
}
