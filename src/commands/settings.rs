use crate::error::{ShadowError, ShadowResult};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::fs;
use std::path::{Path, PathBuf};

const SETTINGS_SCHEMA_VERSION: i64 = 1;

pub const ENV_REMOTE_URL: &str = "SHADOW_MIRROR_REMOTE_URL";
pub const ENV_API_KEY: &str = "SHADOW_MIRROR_API_KEY";
pub const ENV_DATA_DIR: &str = "SHADOW_MIRROR_DATA_DIR";

const DB_FILE: &str = "shadow-mirror.db";
const EXPORT_FILE: &str = "shadow-mirror-export.json";
const LOCK_FILE: &str = "shadow-mirror.lock";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteSettings {
    pub url: String,
    pub api_key: String,
    pub timeout_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GuardSettings {
    pub primary_collection: String,
    pub wipe_floor: u64,
    pub min_ratio: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetentionSettings {
    pub keep_protected: u32,
    pub window_days: u32,
    pub high_water_mark: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdentitySettings {
    pub collection: String,
    pub owner_field: String,
}

/// Process-wide configuration, built once at start-up and handed to every
/// component by reference.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShadowConfig {
    pub remote: RemoteSettings,
    pub data_dir: PathBuf,
    pub guard: GuardSettings,
    pub retention: RetentionSettings,
    pub identity: IdentitySettings,
}

impl ShadowConfig {
    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join(DB_FILE)
    }

    pub fn export_path(&self) -> PathBuf {
        self.data_dir.join(EXPORT_FILE)
    }

    pub fn lock_path(&self) -> PathBuf {
        self.data_dir.join(LOCK_FILE)
    }
}

impl Default for ShadowConfig {
    fn default() -> Self {
        Self {
            remote: RemoteSettings {
                url: String::new(),
                api_key: String::new(),
                timeout_ms: 10_000,
            },
            data_dir: PathBuf::from(".shadow-mirror"),
            guard: GuardSettings {
                primary_collection: "tasks".to_string(),
                wipe_floor: 5,
                min_ratio: 0.5,
            },
            retention: RetentionSettings {
                keep_protected: 10,
                window_days: 7,
                high_water_mark: 1000,
            },
            identity: IdentitySettings {
                collection: "profiles".to_string(),
                owner_field: "user_id".to_string(),
            },
        }
    }
}

/// Loads the settings file, if any, then applies `env` overrides.
pub fn load_config<F>(path: Option<&Path>, env: F) -> ShadowResult<ShadowConfig>
where
    F: Fn(&str) -> Option<String>,
{
    let original = match path {
        Some(path) => {
            let raw = fs::read_to_string(path).map_err(|e| {
                ShadowError::Config(format!("failed to read {}: {e}", path.display()))
            })?;
            serde_json::from_str::<Value>(&raw).map_err(|e| {
                ShadowError::Config(format!("failed to parse {}: {e}", path.display()))
            })?
        }
        None => json!({}),
    };

    let mut settings = migrate_settings(original);
    apply_env_overrides(&mut settings, env);

    let config: ShadowConfig = serde_json::from_value(settings)
        .map_err(|e| ShadowError::Config(format!("invalid settings: {e}")))?;

    if config.remote.url.is_empty() {
        return Err(ShadowError::Config(format!(
            "remote url is not set (settings remote.url or {ENV_REMOTE_URL})"
        )));
    }

    Ok(config)
}

fn apply_env_overrides<F>(settings: &mut Value, env: F)
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(url) = env(ENV_REMOTE_URL) {
        settings["remote"]["url"] = json!(url);
    }
    if let Some(key) = env(ENV_API_KEY) {
        settings["remote"]["apiKey"] = json!(key);
    }
    if let Some(dir) = env(ENV_DATA_DIR) {
        settings["dataDir"] = json!(dir);
    }
}

fn migrate_settings(input: Value) -> Value {
    let defaults = default_settings();
    let mut out = match input {
        Value::Object(map) => Value::Object(map),
        _ => Value::Object(Map::new()),
    };

    let version = out
        .get("schema_version")
        .and_then(Value::as_i64)
        .unwrap_or(0);

    if version < 1 {
        migrate_flat_remote_keys(&mut out);
    }

    deep_merge_defaults(&mut out, &defaults);
    sanitize_settings(&mut out);
    if let Some(obj) = out.as_object_mut() {
        obj.insert("schema_version".to_string(), json!(SETTINGS_SCHEMA_VERSION));
    }

    out
}

fn default_settings() -> Value {
    let mut defaults = serde_json::to_value(ShadowConfig::default()).unwrap_or_else(|_| json!({}));
    if let Some(obj) = defaults.as_object_mut() {
        obj.insert("schema_version".to_string(), json!(SETTINGS_SCHEMA_VERSION));
    }
    defaults
}

fn deep_merge_defaults(target: &mut Value, defaults: &Value) {
    let (Some(target_obj), Some(default_obj)) = (target.as_object_mut(), defaults.as_object()) else {
        return;
    };

    for (key, default_value) in default_obj {
        match target_obj.get_mut(key) {
            Some(existing) => {
                if default_value.is_object() {
                    if existing.is_object() {
                        deep_merge_defaults(existing, default_value);
                    } else {
                        *existing = default_value.clone();
                    }
                }
            }
            None => {
                target_obj.insert(key.clone(), default_value.clone());
            }
        }
    }
}

fn migrate_flat_remote_keys(settings: &mut Value) {
    let Some(obj) = settings.as_object_mut() else {
        return;
    };
    let url = obj.remove("supabaseUrl");
    let key = obj.remove("supabaseAnonKey");
    if url.is_none() && key.is_none() {
        return;
    }

    let remote = obj.entry("remote".to_string()).or_insert_with(|| json!({}));
    if let Some(remote_obj) = remote.as_object_mut() {
        if let Some(url) = url {
            remote_obj.entry("url".to_string()).or_insert(url);
        }
        if let Some(key) = key {
            remote_obj.entry("apiKey".to_string()).or_insert(key);
        }
    }
}

fn sanitize_settings(settings: &mut Value) {
    let Some(obj) = settings.as_object_mut() else {
        return;
    };

    if let Some(remote) = obj.get_mut("remote").and_then(Value::as_object_mut) {
        clamp_u64(remote, "timeoutMs", 250, 120_000, 10_000);
        ensure_string(remote, "url", "");
        ensure_string(remote, "apiKey", "");
    }

    if let Some(guard) = obj.get_mut("guard").and_then(Value::as_object_mut) {
        clamp_u64(guard, "wipeFloor", 0, 1_000_000, 5);
        clamp_f64(guard, "minRatio", 0.0, 1.0, 0.5);
        ensure_string(guard, "primaryCollection", "tasks");
    }

    if let Some(retention) = obj.get_mut("retention").and_then(Value::as_object_mut) {
        clamp_u64(retention, "keepProtected", 1, 1000, 10);
        clamp_u64(retention, "windowDays", 1, 3650, 7);
        clamp_u64(retention, "highWaterMark", 10, 1_000_000, 1000);
    }

    if let Some(identity) = obj.get_mut("identity").and_then(Value::as_object_mut) {
        ensure_string(identity, "collection", "profiles");
        ensure_string(identity, "ownerField", "user_id");
    }

    ensure_string(obj, "dataDir", ".shadow-mirror");
}

fn clamp_u64(map: &mut Map<String, Value>, key: &str, min: u64, max: u64, default: u64) {
    let raw = map.get(key).and_then(Value::as_u64).unwrap_or(default);
    map.insert(key.to_string(), json!(raw.clamp(min, max)));
}

fn clamp_f64(map: &mut Map<String, Value>, key: &str, min: f64, max: f64, default: f64) {
    let raw = map
        .get(key)
        .and_then(Value::as_f64)
        .filter(|v| v.is_finite())
        .unwrap_or(default);
    map.insert(key.to_string(), json!(raw.clamp(min, max)));
}

fn ensure_string(map: &mut Map<String, Value>, key: &str, default: &str) {
    if !map.get(key).is_some_and(Value::is_string) {
        map.insert(key.to_string(), json!(default));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_env(_: &str) -> Option<String> {
        None
    }

    #[test]
    fn defaults_fill_missing_sections() {
        let config = ShadowConfig::default();
        assert_eq!(config.guard.wipe_floor, 5);
        assert_eq!(config.guard.min_ratio, 0.5);
        assert_eq!(config.retention.keep_protected, 10);
        assert_eq!(config.retention.window_days, 7);
        assert_eq!(config.retention.high_water_mark, 1000);
        assert_eq!(config.identity.owner_field, "user_id");
    }

    #[test]
    fn migrates_flat_remote_keys_and_clamps_values() {
        let migrated = migrate_settings(json!({
            "supabaseUrl": "https://db.example.test",
            "supabaseAnonKey": "anon",
            "guard": { "minRatio": 4.0, "wipeFloor": 12 },
            "remote": { "timeoutMs": 5 }
        }));

        assert_eq!(migrated["remote"]["url"], json!("https://db.example.test"));
        assert_eq!(migrated["remote"]["apiKey"], json!("anon"));
        assert_eq!(migrated["remote"]["timeoutMs"], json!(250));
        assert_eq!(migrated["guard"]["minRatio"], json!(1.0));
        assert_eq!(migrated["guard"]["wipeFloor"], json!(12));
        assert!(migrated.get("supabaseUrl").is_none());
        assert_eq!(migrated["schema_version"], json!(SETTINGS_SCHEMA_VERSION));
    }

    #[test]
    fn env_overrides_win_over_file_values() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("shadow-mirror.json");
        fs::write(
            &path,
            r#"{ "remote": { "url": "https://file.example.test" }, "dataDir": "/var/lib/file" }"#,
        )
        .expect("write settings");

        let config = load_config(Some(&path), |key| match key {
            ENV_REMOTE_URL => Some("https://env.example.test".to_string()),
            _ => None,
        })
        .expect("load config");

        assert_eq!(config.remote.url, "https://env.example.test");
        assert_eq!(config.data_dir, PathBuf::from("/var/lib/file"));
        assert_eq!(config.db_path(), PathBuf::from("/var/lib/file/shadow-mirror.db"));
    }

    #[test]
    fn missing_remote_url_is_a_config_error() {
        let err = load_config(None, no_env).expect_err("no url");
        assert!(matches!(err, ShadowError::Config(_)));
    }
}
