use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
};

use parking_lot::Mutex;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

use crate::{
    attribution::Attribution,
    durable::{self, Loaded},
    error::{LeadError, Result},
};

pub type UserMap = BTreeMap<String, UserRecord>;

/// Key under which a record that is not a JSON object is kept.
pub const RAW_VALUE_KEY: &str = "raw_value";

/// Last-known state of one user. Every field is optional; keys this crate
/// does not know about are kept as-is across rewrites.
///
/// Decoding is lenient per record: numeric strings are accepted for
/// `chat_id`, `0`/`1` and `"true"`/`"false"` for `lead_sent`, and a value
/// that still does not fit its field stays in `other` under its own key.
/// One odd record therefore never makes the whole directory unreadable.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct UserRecord {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chat_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub platform: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub theme: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lead_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub creative: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lead_sent: Option<bool>,
    #[serde(flatten)]
    pub other: BTreeMap<String, Value>,
}

impl<'de> Deserialize<'de> for UserRecord {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(Self::from_value(Value::deserialize(deserializer)?))
    }
}

impl UserRecord {
    pub fn from_value(value: Value) -> Self {
        match value {
            Value::Object(fields) => Self::from_fields(fields),
            Value::Null => Self::default(),
            raw => {
                let mut record = Self::default();
                record.other.insert(RAW_VALUE_KEY.to_string(), raw);
                record
            }
        }
    }

    fn from_fields(mut fields: Map<String, Value>) -> Self {
        let chat_id = take_field(&mut fields, "chat_id", as_chat_id);
        let platform = take_field(&mut fields, "platform", as_text);
        let theme = take_field(&mut fields, "theme", as_text);
        let lead_type = take_field(&mut fields, "lead_type", as_text);
        let creative = take_field(&mut fields, "creative", as_text);
        let lead_sent = take_field(&mut fields, "lead_sent", as_flag);
        Self {
            chat_id,
            platform,
            theme,
            lead_type,
            creative,
            lead_sent,
            other: fields.into_iter().collect(),
        }
    }

    pub fn attribution(&self) -> Attribution {
        Attribution {
            platform: self.platform.clone().unwrap_or_default(),
            theme: self.theme.clone().unwrap_or_default(),
            lead_type: self.lead_type.clone().unwrap_or_default(),
            creative: self.creative.clone().unwrap_or_default(),
        }
    }

    pub fn has_lead(&self) -> bool {
        self.lead_sent.unwrap_or(false)
    }
}

/// Partial update: `None` leaves the stored value alone.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UserUpdate {
    pub chat_id: Option<i64>,
    pub platform: Option<String>,
    pub theme: Option<String>,
    pub lead_type: Option<String>,
    pub creative: Option<String>,
    pub lead_sent: Option<bool>,
}

impl UserUpdate {
    /// Overwrites all four attribution fields, empty values included, so a
    /// fresh `/start` replaces the previous campaign.
    pub fn from_attribution(attribution: &Attribution) -> Self {
        Self {
            platform: Some(attribution.platform.clone()),
            theme: Some(attribution.theme.clone()),
            lead_type: Some(attribution.lead_type.clone()),
            creative: Some(attribution.creative.clone()),
            ..Self::default()
        }
    }

    pub fn lead_sent() -> Self {
        Self {
            lead_sent: Some(true),
            ..Self::default()
        }
    }

    pub fn with_chat_id(mut self, chat_id: i64) -> Self {
        self.chat_id = Some(chat_id);
        self
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    pub fn apply_to(&self, record: &mut UserRecord) {
        // A typed value replaces any undecodable one kept under the same key.
        if let Some(chat_id) = self.chat_id {
            record.other.remove("chat_id");
            record.chat_id = Some(chat_id);
        }
        if let Some(platform) = &self.platform {
            record.other.remove("platform");
            record.platform = Some(platform.clone());
        }
        if let Some(theme) = &self.theme {
            record.other.remove("theme");
            record.theme = Some(theme.clone());
        }
        if let Some(lead_type) = &self.lead_type {
            record.other.remove("lead_type");
            record.lead_type = Some(lead_type.clone());
        }
        if let Some(creative) = &self.creative {
            record.other.remove("creative");
            record.creative = Some(creative.clone());
        }
        if let Some(lead_sent) = self.lead_sent {
            record.other.remove("lead_sent");
            record.lead_sent = Some(lead_sent);
        }
    }
}

/// Removes `key` and converts it; a value that does not convert goes back
/// into `fields` untouched.
fn take_field<T>(
    fields: &mut Map<String, Value>,
    key: &str,
    convert: fn(&Value) -> Option<T>,
) -> Option<T> {
    let value = fields.remove(key)?;
    if value.is_null() {
        return None;
    }
    let converted = convert(&value);
    if converted.is_none() {
        fields.insert(key.to_string(), value);
    }
    converted
}

fn as_chat_id(value: &Value) -> Option<i64> {
    match value {
        Value::Number(number) => number.as_i64(),
        Value::String(text) => text.trim().parse().ok(),
        _ => None,
    }
}

fn as_text(value: &Value) -> Option<String> {
    match value {
        Value::String(text) => Some(text.clone()),
        Value::Number(number) => Some(number.to_string()),
        _ => None,
    }
}

fn as_flag(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(flag) => Some(*flag),
        Value::Number(number) => match number.as_i64() {
            Some(0) => Some(false),
            Some(1) => Some(true),
            _ => None,
        },
        Value::String(text) => match text.trim().to_ascii_lowercase().as_str() {
            "true" | "1" => Some(true),
            "false" | "0" | "" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

/// JSON snapshot of every known user, rewritten in full on each update.
pub struct UserDirectory {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl UserDirectory {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn load(&self) -> Loaded<UserMap> {
        durable::load(&self.path, UserMap::new())
    }

    pub fn get(&self, user_id: &str) -> UserRecord {
        self.load()
            .into_value()
            .remove(user_id)
            .unwrap_or_default()
    }

    pub fn get_or_create(&self, user_id: &str) -> Result<UserRecord> {
        let _guard = self.write_lock.lock();
        let mut users = self.load_for_write()?;
        if let Some(record) = users.get(user_id) {
            return Ok(record.clone());
        }
        debug!("creating user record for {user_id}");
        users.insert(user_id.to_string(), UserRecord::default());
        self.save(&users)?;
        Ok(UserRecord::default())
    }

    /// Reads the whole directory, applies `update` to one user (creating the
    /// record when absent) and writes the whole directory back.
    pub fn merge_update(&self, user_id: &str, update: &UserUpdate) -> Result<UserRecord> {
        if user_id.trim().is_empty() {
            return Err(LeadError::Validation("user id must not be empty".into()));
        }
        let _guard = self.write_lock.lock();
        let mut users = self.load_for_write()?;
        let record = users.entry(user_id.to_string()).or_default();
        update.apply_to(record);
        let updated = record.clone();
        self.save(&users)?;
        Ok(updated)
    }

    pub fn save(&self, users: &UserMap) -> Result<()> {
        durable::write_json_atomic(&self.path, users)
    }

    // A transient read failure must not be followed by a write, or the
    // empty fallback would replace every stored user.
    fn load_for_write(&self) -> Result<UserMap> {
        let loaded = self.load();
        if let Some(err) = loaded
            .status
            .defect(&self.path)
            .filter(LeadError::is_transient)
        {
            return Err(err);
        }
        Ok(loaded.value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::durable::LoadStatus;
    use std::fs;

    fn directory(dir: &tempfile::TempDir) -> UserDirectory {
        UserDirectory::new(dir.path().join("data").join("users.json"))
    }

    #[test]
    fn partial_merge_keeps_existing_fields() {
        let dir = tempfile::tempdir().unwrap();
        let users = directory(&dir);

        users
            .merge_update(
                "100",
                &UserUpdate::from_attribution(&Attribution::parse("yt_TH1_CL_01")).with_chat_id(100),
            )
            .unwrap();
        let updated = users.merge_update("100", &UserUpdate::lead_sent()).unwrap();

        assert_eq!(updated.platform.as_deref(), Some("yt"));
        assert_eq!(updated.theme.as_deref(), Some("TH1"));
        assert_eq!(updated.chat_id, Some(100));
        assert!(updated.has_lead());
        assert_eq!(users.get("100"), updated);
    }

    #[test]
    fn get_returns_empty_record_for_unknown_user() {
        let dir = tempfile::tempdir().unwrap();
        let users = directory(&dir);
        assert_eq!(users.get("missing"), UserRecord::default());
        assert!(!users.path().exists());
    }

    #[test]
    fn get_or_create_persists_new_user_once() {
        let dir = tempfile::tempdir().unwrap();
        let users = directory(&dir);

        users.get_or_create("5").unwrap();
        users.merge_update("5", &UserUpdate::lead_sent()).unwrap();
        let again = users.get_or_create("5").unwrap();

        assert!(again.has_lead());
        assert_eq!(users.load().value.len(), 1);
    }

    #[test]
    fn corrupt_directory_is_quarantined_and_replaced() {
        let dir = tempfile::tempdir().unwrap();
        let users = directory(&dir);
        fs::create_dir_all(users.path().parent().unwrap()).unwrap();
        fs::write(users.path(), b"{\"1\": {\"platform\": ").unwrap();

        let loaded = users.load();
        assert!(loaded.value.is_empty());
        assert!(matches!(loaded.status, LoadStatus::Corrupt { backup: Some(_), .. }));

        users.merge_update("2", &UserUpdate::lead_sent()).unwrap();
        let reloaded = users.load();
        assert_eq!(reloaded.status, LoadStatus::Parsed);
        assert!(reloaded.value.contains_key("2"));
    }

    #[test]
    fn unknown_keys_survive_rewrite() {
        let dir = tempfile::tempdir().unwrap();
        let users = directory(&dir);
        fs::create_dir_all(users.path().parent().unwrap()).unwrap();
        fs::write(
            users.path(),
            br#"{"9": {"platform": "vk", "note": "vip"}}"#,
        )
        .unwrap();

        users.merge_update("9", &UserUpdate::lead_sent()).unwrap();
        let record = users.get("9");
        assert_eq!(record.other.get("note"), Some(&Value::from("vip")));
        assert_eq!(record.platform.as_deref(), Some("vk"));
    }

    #[test]
    fn mismatched_values_do_not_drop_other_users() {
        let dir = tempfile::tempdir().unwrap();
        let users = directory(&dir);
        fs::create_dir_all(users.path().parent().unwrap()).unwrap();
        fs::write(
            users.path(),
            br#"{
                "1": {"platform": "yt", "theme": "TH1"},
                "2": {"chat_id": "12345", "platform": "vk"},
                "3": {"chat_id": [1], "lead_sent": 1, "theme": 7},
                "4": "legacy"
            }"#,
        )
        .unwrap();

        let loaded = users.load();
        assert_eq!(loaded.status, LoadStatus::Parsed);
        assert_eq!(loaded.value["2"].chat_id, Some(12345));
        assert!(loaded.value["3"].has_lead());
        assert_eq!(loaded.value["3"].theme.as_deref(), Some("7"));

        users.merge_update("5", &UserUpdate::lead_sent()).unwrap();

        let after = users.load();
        assert_eq!(after.status, LoadStatus::Parsed);
        let ids: Vec<_> = after.value.keys().map(String::as_str).collect();
        assert_eq!(ids, vec!["1", "2", "3", "4", "5"]);
        assert_eq!(after.value["1"].theme.as_deref(), Some("TH1"));
        assert_eq!(after.value["3"].other.get("chat_id"), Some(&serde_json::json!([1])));
        assert_eq!(
            after.value["4"].other.get(RAW_VALUE_KEY),
            Some(&Value::from("legacy"))
        );

        let quarantined = fs::read_dir(users.path().parent().unwrap())
            .unwrap()
            .any(|entry| {
                entry
                    .unwrap()
                    .file_name()
                    .to_string_lossy()
                    .contains(".corrupt-")
            });
        assert!(!quarantined);

        let fixed = users
            .merge_update("3", &UserUpdate::default().with_chat_id(33))
            .unwrap();
        assert_eq!(fixed.chat_id, Some(33));
        assert!(!fixed.other.contains_key("chat_id"));
        let written: Value =
            serde_json::from_str(&fs::read_to_string(users.path()).unwrap()).unwrap();
        assert_eq!(written["3"]["chat_id"], 33);
    }

    #[test]
    fn non_object_document_is_still_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let users = directory(&dir);
        fs::create_dir_all(users.path().parent().unwrap()).unwrap();
        fs::write(users.path(), b"[1, 2, 3]").unwrap();

        let loaded = users.load();
        assert!(loaded.value.is_empty());
        assert!(matches!(loaded.status, LoadStatus::Corrupt { .. }));
    }

    #[test]
    fn empty_user_id_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let users = directory(&dir);
        let err = users.merge_update(" ", &UserUpdate::lead_sent()).unwrap_err();
        assert!(matches!(err, LeadError::Validation(_)));
    }
}
