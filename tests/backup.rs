//! Cloud backup coordinator: gating, backup/restore, restore offers,
//! auto backup and auth state.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};

mod common;
use common::*;

use adhan_sync::cloud::CloudAuth;

async fn premium_store(h: &Harness) -> Arc<EntitlementStore> {
    let store = h.entitlement();
    store.activate_premium("yearly", "sub_1").await.unwrap();
    store
}

/// Premium and signed in to the cloud.
async fn ready(h: &Harness) -> (Arc<EntitlementStore>, Arc<BackupCoordinator>) {
    let store = premium_store(h).await;
    let backup = h.backup(&store);
    assert!(backup.sign_in_anonymously().await);
    (store, backup)
}

fn uid(h: &Harness) -> String {
    h.cloud.current_identity().unwrap().uid
}

async fn local_favorites(h: &Harness) -> Vec<FavoriteItem> {
    h.read(keys::FAVORITES)
        .await
        .map(|raw| serde_json::from_str(&raw).unwrap())
        .unwrap_or_default()
}

/// Favorites as canonical JSON strings, order-insensitive.
fn sorted(items: &[FavoriteItem]) -> Vec<String> {
    let mut entries: Vec<_> = items
        .iter()
        .map(|i| serde_json::to_string(i).unwrap())
        .collect();
    entries.sort();
    entries
}

/// Back up the seeded favorites, wipe them locally, restore.
async fn round_trip(h: &Harness, backup: &BackupCoordinator) -> Vec<FavoriteItem> {
    assert!(backup.backup_data().await);
    h.seed(keys::FAVORITES, "[]").await;
    assert!(backup.restore_data().await);
    local_favorites(h).await
}

// ============================================================================
// Gating
// ============================================================================

#[tokio::test]
async fn test_free_user_cannot_sign_in_or_back_up() {
    let h = Harness::new();
    let store = h.entitlement();
    let backup = h.backup(&store);
    h.seed(keys::FAVORITES, r#"[{"type":"dhikr","id":"d1"}]"#).await;

    assert!(!backup.sign_in_anonymously().await);
    assert!(!backup.backup_data().await);

    assert_eq!(h.cloud.sign_in_count(), 0);
    assert_eq!(h.cloud.write_count(), 0);
    assert_eq!(h.cloud.read_count(), 0);
    assert!(h.read(keys::LAST_BACKUP_TIME).await.is_none());
    assert!(h.notifier.contains_title("Premium required"));
    assert!(!backup.is_signed_in());
}

#[tokio::test]
async fn test_backup_after_losing_premium_writes_nothing() {
    let h = Harness::new();
    let (store, backup) = ready(&h).await;
    store.deactivate_premium().await;

    assert!(!backup.backup_data().await);
    assert!(!backup.restore_data().await);

    assert_eq!(h.cloud.write_count(), 0);
    assert!(h.read(keys::LAST_BACKUP_TIME).await.is_none());
    assert_eq!(backup.backup_status(), BackupStatus::Idle);
}

#[tokio::test]
async fn test_backup_requires_sign_in() {
    let h = Harness::new();
    let store = premium_store(&h).await;
    let backup = h.backup(&store);

    assert!(!backup.backup_data().await);
    assert!(h.notifier.contains_title("Not signed in"));
    assert_eq!(h.cloud.write_count(), 0);
}

// ============================================================================
// Sign in / out
// ============================================================================

#[tokio::test]
async fn test_anonymous_sign_in_labels_email() {
    let h = Harness::new();
    let (_store, backup) = ready(&h).await;

    let email = backup.user_email().unwrap();
    assert!(email.starts_with("Anonyme-"));
    assert_eq!(email.len(), "Anonyme-".len() + 8);
    assert!(backup.is_signed_in());
    assert!(!backup.has_cloud_data());
}

#[tokio::test]
async fn test_sign_out_clears_session_but_not_local_data() {
    let h = Harness::new();
    let (_store, backup) = ready(&h).await;
    assert!(backup.backup_data().await);

    assert!(backup.sign_out().await);

    assert!(!backup.is_signed_in());
    assert_eq!(backup.user_email(), None);
    assert!(h.notifier.contains_title("Signed out"));
    assert!(h.read(keys::LAST_BACKUP_TIME).await.is_some());
}

#[tokio::test(start_paused = true)]
async fn test_coordinator_follows_external_auth_changes() {
    let h = Harness::new();
    let store = premium_store(&h).await;
    let backup = h.backup(&store);
    backup.start().await;
    assert!(!backup.is_signed_in());

    h.cloud.sign_in_anonymously().await.unwrap();
    tokio::time::sleep(Duration::from_millis(1)).await;
    assert!(backup.is_signed_in());

    h.cloud.sign_out().await.unwrap();
    tokio::time::sleep(Duration::from_millis(1)).await;
    assert!(!backup.is_signed_in());

    backup.stop();
}

// ============================================================================
// Backup
// ============================================================================

#[tokio::test]
async fn test_backup_writes_snapshot_and_records_time() {
    let h = Harness::new();
    h.seed(keys::USER_DATA, r#"{"email":"u@t.com","device_id":"abc"}"#).await;
    h.seed(keys::FAVORITES, r#"[{"type":"dhikr","id":"d1"}]"#).await;
    let (_store, backup) = ready(&h).await;

    assert!(backup.backup_data().await);

    let recorded = h.read(keys::LAST_BACKUP_TIME).await.expect("last backup time");
    assert_eq!(recorded, test_now().to_rfc3339());
    assert_eq!(backup.last_backup_time(), Some(test_now()));
    assert_eq!(backup.backup_status(), BackupStatus::Success);
    assert!(!backup.is_syncing());

    let document = h.cloud.document(&uid(&h)).unwrap();
    assert_eq!(document["favorites"]["dhikr"][0]["id"], "d1");
    assert_eq!(document["deviceInfo"]["platform"], "android");
    assert_eq!(document["settings"], json!({}));
}

#[tokio::test]
async fn test_backup_partitions_favorites_and_settings() {
    let h = Harness::new();
    h.seed(
        keys::FAVORITES,
        &json!([
            {"type": "dhikr", "id": "d1", "category": "Evening dua"},
            {"type": "quran_verse", "id": "v1", "surah": 2},
            {"type": "hadith", "id": "h1"},
            {"type": "asmaulhusna", "id": "a1"},
            {"type": "podcast", "id": "p1"}
        ])
        .to_string(),
    )
    .await;
    h.seed(keys::USER_FIRST_NAME, "Elyes").await;
    h.seed(keys::CUSTOM_SETTINGS, r#"{"theme":"dark"}"#).await;
    let (_store, backup) = ready(&h).await;

    assert!(backup.backup_data().await);

    let document = h.cloud.document(&uid(&h)).unwrap();
    let favorites = &document["favorites"];
    assert_eq!(favorites["dhikr"].as_array().unwrap().len(), 1);
    assert_eq!(favorites["duas"][0]["id"], "d1");
    assert_eq!(favorites["verses"][0]["surah"], 2);
    assert_eq!(favorites["hadiths"][0]["id"], "h1");
    assert_eq!(favorites["asmaulhusna"][0]["id"], "a1");
    assert_eq!(favorites["other"][0]["id"], "p1");
    assert_eq!(document["settings"]["userFirstName"], "Elyes");
    assert_eq!(document["settings"]["customSettings"], r#"{"theme":"dark"}"#);
}

#[tokio::test]
async fn test_backup_failure_sets_error_status() {
    let h = Harness::new();
    h.seed(keys::FAVORITES, "definitely not json").await;
    let (_store, backup) = ready(&h).await;

    assert!(!backup.backup_data().await);

    assert_eq!(backup.backup_status(), BackupStatus::Error);
    assert!(!backup.is_syncing());
    assert!(h.notifier.contains_title("Backup failed"));
    assert_eq!(h.cloud.write_count(), 0);
    assert!(h.read(keys::LAST_BACKUP_TIME).await.is_none());
}

// ============================================================================
// Restore
// ============================================================================

#[tokio::test]
async fn test_restore_without_backup_is_informational() {
    let h = Harness::new();
    h.seed(keys::FAVORITES, r#"[{"type":"hadith","id":"h1"}]"#).await;
    let (_store, backup) = ready(&h).await;

    assert!(!backup.restore_data().await);

    assert!(h.notifier.contains_title("No backup found"));
    assert_eq!(h.notifier.count(ToastKind::Error), 0);
    assert_eq!(local_favorites(&h).await.len(), 1);
    assert!(!backup.is_syncing());
}

#[tokio::test]
async fn test_restore_overwrites_favorites_and_name() {
    let h = Harness::new();
    h.seed(keys::FAVORITES, r#"[{"type":"hadith","id":"old"}]"#).await;
    let (_store, backup) = ready(&h).await;
    h.cloud.put_document(
        &uid(&h),
        json!({
            "favorites": {"dhikr": [{"id": "x", "type": "dhikr"}]},
            "settings": {"userFirstName": "Elyes"},
            "lastBackupTime": "2024-05-20T08:00:00Z"
        }),
    );

    assert!(backup.restore_data().await);

    let favorites = local_favorites(&h).await;
    assert_eq!(favorites.len(), 1);
    assert_eq!(favorites[0].id(), Some(&json!("x")));
    assert_eq!(favorites[0].kind, "dhikr");
    assert_eq!(h.read(keys::USER_FIRST_NAME).await.as_deref(), Some("Elyes"));
    assert_eq!(
        h.read(keys::LAST_BACKUP_TIME).await.as_deref(),
        Some("2024-05-20T08:00:00+00:00")
    );
    assert!(!backup.show_restore_dialog());
    assert_eq!(backup.backup_status(), BackupStatus::Success);
}

#[tokio::test]
async fn test_restore_leaves_absent_settings_untouched() {
    let h = Harness::new();
    h.seed(keys::USER_FIRST_NAME, "Amina").await;
    h.seed(keys::CUSTOM_SETTINGS, r#"{"theme":"light"}"#).await;
    let (_store, backup) = ready(&h).await;
    h.cloud.put_document(&uid(&h), json!({"favorites": {}, "settings": {}}));

    assert!(backup.restore_data().await);

    assert_eq!(h.read(keys::USER_FIRST_NAME).await.as_deref(), Some("Amina"));
    assert_eq!(h.read(keys::CUSTOM_SETTINGS).await.as_deref(), Some(r#"{"theme":"light"}"#));
}

#[tokio::test]
async fn test_restore_rejects_document_without_favorites() {
    let h = Harness::new();
    h.seed(keys::FAVORITES, r#"[{"type":"hadith","id":"h1"}]"#).await;
    let (_store, backup) = ready(&h).await;
    h.cloud.put_document(&uid(&h), json!({"settings": {"userFirstName": "Elyes"}}));

    assert!(!backup.restore_data().await);

    assert_eq!(backup.backup_status(), BackupStatus::Error);
    assert!(h.notifier.contains_title("Restore failed"));
    assert_eq!(local_favorites(&h).await.len(), 1);
    assert!(h.read(keys::USER_FIRST_NAME).await.is_none());
}

#[tokio::test]
async fn test_backup_then_restore_round_trips_favorites() {
    let h = Harness::new();
    let original: Vec<Value> = vec![
        json!({"type": "dhikr", "id": "d1"}),
        json!({"type": "dhikr", "id": "d2", "category": "dua"}),
        json!({"type": "quran_verse", "id": "v1", "surah": 1, "ayah": 1}),
        json!({"type": "quran_verse", "id": "v2"}),
        json!({"type": "hadith", "id": "h1"}),
        json!({"type": "asmaulhusna", "id": "a1"}),
    ];
    h.seed(keys::FAVORITES, &Value::Array(original.clone()).to_string()).await;
    let (_store, backup) = ready(&h).await;
    let before = local_favorites(&h).await;

    let after = round_trip(&h, &backup).await;

    assert_eq!(sorted(&after), sorted(&before));
    let verse = after.iter().find(|f| f.id() == Some(&json!("v1"))).unwrap();
    assert_eq!(verse.fields["ayah"], 1);
}

#[tokio::test]
async fn test_round_trip_keeps_loosely_typed_favorites() {
    let h = Harness::new();
    let original = json!([
        {"type": "dhikr", "id": 17},
        {"type": "dhikr", "id": "d2"},
        {"type": "hadith", "id": "h1", "category": 3},
        {"type": "dhikr", "id": 9, "category": "Dua before sleep"},
        {"type": "dhikr", "id": 9, "category": "Dua before sleep"},
        {"type": "podcast", "id": "p1", "episode": 4},
        {"type": "quran_verse", "id": null}
    ]);
    h.seed(keys::FAVORITES, &original.to_string()).await;
    let (_store, backup) = ready(&h).await;
    let before = local_favorites(&h).await;
    assert_eq!(before.len(), 7);

    let after = round_trip(&h, &backup).await;

    assert_eq!(sorted(&after), sorted(&before));
    let document = h.cloud.document(&uid(&h)).unwrap();
    assert_eq!(document["favorites"]["duas"].as_array().unwrap().len(), 2);
    assert_eq!(document["favorites"]["other"][0]["episode"], 4);
}

#[tokio::test]
async fn test_unreadable_favorite_fails_backup() {
    let h = Harness::new();
    h.seed(keys::FAVORITES, r#"[{"type":"dhikr","id":"d1"},{"id":"no-type"}]"#).await;
    let (_store, backup) = ready(&h).await;

    assert!(!backup.backup_data().await);

    assert_eq!(backup.backup_status(), BackupStatus::Error);
    assert_eq!(h.cloud.write_count(), 0);
    assert!(h.cloud.document(&uid(&h)).is_none());
}

#[tokio::test]
async fn test_custom_settings_round_trip() {
    let h = Harness::new();
    h.seed(keys::CUSTOM_SETTINGS, r#"{"theme":"dark","fontSize":18}"#).await;
    let (_store, backup) = ready(&h).await;

    assert!(backup.backup_data().await);
    h.seed(keys::CUSTOM_SETTINGS, "{}").await;
    assert!(backup.restore_data().await);

    let restored: Value = serde_json::from_str(&h.read(keys::CUSTOM_SETTINGS).await.unwrap()).unwrap();
    assert_eq!(restored, json!({"theme": "dark", "fontSize": 18}));
}

#[tokio::test]
async fn test_custom_settings_string_round_trip() {
    let h = Harness::new();
    h.seed(keys::CUSTOM_SETTINGS, r#""dark""#).await;
    let (_store, backup) = ready(&h).await;

    assert!(backup.backup_data().await);
    h.seed(keys::CUSTOM_SETTINGS, "{}").await;
    assert!(backup.restore_data().await);

    assert_eq!(h.read(keys::CUSTOM_SETTINGS).await.as_deref(), Some(r#""dark""#));
}

#[tokio::test]
async fn test_restore_accepts_structured_custom_settings() {
    let h = Harness::new();
    let (_store, backup) = ready(&h).await;
    h.cloud.put_document(
        &uid(&h),
        json!({"favorites": {}, "settings": {"customSettings": {"theme": "dark"}}}),
    );

    assert!(backup.restore_data().await);

    assert_eq!(h.read(keys::CUSTOM_SETTINGS).await.as_deref(), Some(r#"{"theme":"dark"}"#));
}

// ============================================================================
// Restore offer
// ============================================================================

#[tokio::test]
async fn test_newer_cloud_copy_offers_restore() {
    let h = Harness::new();
    h.seed(keys::LAST_BACKUP_TIME, "2024-05-01T00:00:00Z").await;
    let store = premium_store(&h).await;
    let backup = h.backup(&store);
    backup.start().await;

    let identity = h.cloud.sign_in_anonymously().await.unwrap();
    h.cloud.put_document(
        &identity.uid,
        json!({"favorites": {}, "lastBackupTime": "2024-05-20T00:00:00Z"}),
    );

    assert!(backup.sign_in_anonymously().await);
    assert!(backup.has_cloud_data());
    assert!(backup.show_restore_dialog());

    backup.dismiss_restore_dialog();
    assert!(!backup.show_restore_dialog());
    backup.stop();
}

#[tokio::test]
async fn test_older_cloud_copy_is_not_offered() {
    let h = Harness::new();
    h.seed(keys::LAST_BACKUP_TIME, "2024-05-30T00:00:00Z").await;
    let store = premium_store(&h).await;
    let backup = h.backup(&store);
    backup.start().await;

    let identity = h.cloud.sign_in_anonymously().await.unwrap();
    h.cloud.put_document(
        &identity.uid,
        json!({"favorites": {}, "lastBackupTime": "2024-05-20T00:00:00Z"}),
    );

    assert!(backup.sign_in_anonymously().await);
    assert!(backup.has_cloud_data());
    assert!(!backup.show_restore_dialog());
    backup.stop();
}

#[tokio::test]
async fn test_fresh_device_is_offered_any_cloud_copy() {
    let h = Harness::new();
    let store = premium_store(&h).await;
    let backup = h.backup(&store);

    let identity = h.cloud.sign_in_anonymously().await.unwrap();
    h.cloud.put_document(&identity.uid, json!({"favorites": {}}));

    assert!(backup.sign_in_anonymously().await);
    assert!(backup.show_restore_dialog());
}

// ============================================================================
// Auto backup & lifecycle
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_enable_auto_backup_backs_up_immediately() {
    let h = Harness::new();
    let (_store, backup) = ready(&h).await;

    assert!(backup.enable_auto_backup(true).await);

    assert_eq!(h.read(keys::AUTO_BACKUP_ENABLED).await.as_deref(), Some("true"));
    assert!(backup.is_auto_backup_enabled());
    assert_eq!(h.cloud.write_count(), 1);
    assert!(backup.auto_backup_running());
    backup.stop();
}

#[tokio::test(start_paused = true)]
async fn test_auto_backup_runs_every_period() {
    let h = Harness::new();
    let (_store, backup) = ready(&h).await;
    backup.enable_auto_backup(true).await;

    tokio::time::sleep(Duration::from_secs(5 * 60 + 1)).await;
    assert_eq!(h.cloud.write_count(), 2);

    tokio::time::sleep(Duration::from_secs(5 * 60)).await;
    assert_eq!(h.cloud.write_count(), 3);
    backup.stop();
}

#[tokio::test(start_paused = true)]
async fn test_disabled_auto_backup_stops_writing() {
    let h = Harness::new();
    let (_store, backup) = ready(&h).await;
    backup.enable_auto_backup(true).await;

    assert!(backup.enable_auto_backup(false).await);
    assert_eq!(h.read(keys::AUTO_BACKUP_ENABLED).await.as_deref(), Some("false"));

    tokio::time::sleep(Duration::from_secs(11 * 60)).await;
    assert_eq!(h.cloud.write_count(), 1);
    backup.stop();
}

#[tokio::test(start_paused = true)]
async fn test_enable_auto_backup_while_signed_out_only_arms_timer() {
    let h = Harness::new();
    let store = premium_store(&h).await;
    let backup = h.backup(&store);

    assert!(backup.enable_auto_backup(true).await);

    assert_eq!(h.cloud.write_count(), 0);
    assert!(backup.auto_backup_running());
    backup.stop();
    assert!(!backup.auto_backup_running());
}

#[tokio::test(start_paused = true)]
async fn test_start_restores_local_bookkeeping() {
    let h = Harness::new();
    h.seed(keys::LAST_BACKUP_TIME, "2024-05-01T00:00:00Z").await;
    h.seed(keys::AUTO_BACKUP_ENABLED, "true").await;
    let store = premium_store(&h).await;
    let backup = h.backup(&store);

    backup.start().await;

    let state = backup.state();
    assert!(state.is_auto_backup_enabled);
    assert_eq!(
        state.last_backup_time.map(|t| t.to_rfc3339()).as_deref(),
        Some("2024-05-01T00:00:00+00:00")
    );
    assert!(backup.auto_backup_running());
    backup.stop();
}

#[tokio::test]
async fn test_reset_local_backup_state() {
    let h = Harness::new();
    let (_store, backup) = ready(&h).await;
    backup.enable_auto_backup(true).await;
    assert!(h.read(keys::LAST_BACKUP_TIME).await.is_some());

    backup.reset_local_backup_state().await;

    assert!(h.read(keys::LAST_BACKUP_TIME).await.is_none());
    assert!(h.read(keys::AUTO_BACKUP_ENABLED).await.is_none());
    assert_eq!(backup.last_backup_time(), None);
    assert!(!backup.is_auto_backup_enabled());
    // Still signed in; reset only touches local bookkeeping
    assert!(backup.is_signed_in());
    backup.stop();
}
