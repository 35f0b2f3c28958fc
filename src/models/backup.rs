use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Favorite type tags as stored in the local favorites list.
pub mod favorite_types {
    pub const DHIKR: &str = "dhikr";
    pub const QURAN_VERSE: &str = "quran_verse";
    pub const HADITH: &str = "hadith";
    pub const ASMAUL_HUSNA: &str = "asmaulhusna";
}

/// One saved favorite. Only the `type` tag is required; `id`, `category` and
/// every other field stay as the app wrote them, whatever their JSON type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FavoriteItem {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl FavoriteItem {
    pub fn new(id: impl Into<Value>, kind: impl Into<String>) -> Self {
        let mut fields = Map::new();
        fields.insert("id".into(), id.into());
        Self {
            kind: kind.into(),
            fields,
        }
    }

    pub fn with_category(mut self, category: impl Into<Value>) -> Self {
        self.fields.insert("category".into(), category.into());
        self
    }

    pub fn id(&self) -> Option<&Value> {
        self.fields.get("id")
    }

    /// The category when it is a string.
    pub fn category(&self) -> Option<&str> {
        self.fields.get("category").and_then(Value::as_str)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FavoriteBuckets {
    pub dhikr: Vec<FavoriteItem>,
    pub verses: Vec<FavoriteItem>,
    pub hadiths: Vec<FavoriteItem>,
    pub asmaulhusna: Vec<FavoriteItem>,
    pub duas: Vec<FavoriteItem>,
    /// Favorites whose type has no bucket of its own.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub other: Vec<FavoriteItem>,
}

/// Absent settings are omitted from the document, never written as null.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BackupSettings {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_first_name: Option<String>,
    /// The stored settings string, verbatim.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub custom_settings: Option<Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceInfo {
    pub platform: String,
    pub version: String,
}

/// Full-replace document mirrored to the cloud, keyed by account identity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupSnapshot {
    pub favorites: FavoriteBuckets,
    #[serde(default)]
    pub settings: BackupSettings,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_backup_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub device_info: DeviceInfo,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackupStatus {
    #[default]
    Idle,
    Syncing,
    Success,
    Error,
}

/// What the UI reads from the backup coordinator.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BackupSessionState {
    pub is_signed_in: bool,
    pub user_email: Option<String>,
    pub last_backup_time: Option<DateTime<Utc>>,
    pub is_syncing: bool,
    pub backup_status: BackupStatus,
    pub is_auto_backup_enabled: bool,
    pub has_cloud_data: bool,
    pub show_restore_dialog: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_favorite_keeps_unknown_fields() {
        let raw = json!({"id": "v1", "type": "quran_verse", "surah": 2, "ayah": 255});
        let item: FavoriteItem = serde_json::from_value(raw.clone()).unwrap();
        assert_eq!(item.kind, "quran_verse");
        assert_eq!(item.fields["surah"], 2);
        assert_eq!(serde_json::to_value(&item).unwrap(), raw);
    }

    #[test]
    fn test_favorite_keeps_non_string_id_and_category() {
        let raw = json!({"id": 17, "type": "hadith", "category": 3});
        let item: FavoriteItem = serde_json::from_value(raw.clone()).unwrap();
        assert_eq!(item.id(), Some(&json!(17)));
        assert_eq!(item.category(), None);
        assert_eq!(serde_json::to_value(&item).unwrap(), raw);
    }

    #[test]
    fn test_favorite_requires_type_tag() {
        assert!(serde_json::from_value::<FavoriteItem>(json!({"id": "x"})).is_err());
    }

    #[test]
    fn test_snapshot_omits_absent_settings() {
        let snapshot = BackupSnapshot {
            favorites: FavoriteBuckets::default(),
            settings: BackupSettings::default(),
            last_backup_time: None,
            device_info: DeviceInfo::default(),
        };
        let json = serde_json::to_value(&snapshot).unwrap();
        assert_eq!(json["settings"], json!({}));
        assert!(json.get("lastBackupTime").is_none());
        assert!(json["favorites"].get("other").is_none());
    }
}
