//! Settings loading from configuration files.
//!
//! Loads [`Settings`] from TOML or JSON and applies environment variable
//! overrides.
//!
//! ## Loading Order
//!
//! 1. Start with default settings.
//! 2. Load from a TOML or JSON file (overriding defaults).
//! 3. Apply environment variable overrides (highest priority).
//!
//! ## Environment Variable Mapping
//!
//! | Env Var | Setting |
//! |---|---|
//! | `TESTBED_DEBUG` | `debug` |
//! | `TESTBED_LOG_LEVEL` | `log_level` |
//! | `TESTBED_BASE_URL` | `base_url` |
//! | `TESTBED_TASK_QUEUES` | `task_queues` (comma-separated) |
//! | `TESTBED_PARSE_TASK_ETA` | `parse_task_eta` |
//!
//! ## Examples
//!
//! ```rust,no_run
//! use testbed_core::settings_loader;
//!
//! let settings = settings_loader::from_toml_file_with_env("testbed.toml").unwrap();
//! ```

use std::path::Path;

use crate::error::TestbedError;
use crate::settings::Settings;

/// Loads settings from a TOML string.
///
/// Fields not present in the TOML keep their default values.
///
/// # Errors
///
/// Returns an error if the TOML is malformed or cannot be deserialized.
pub fn from_toml_str(toml_str: &str) -> Result<Settings, TestbedError> {
    // Deserialize into a generic value first so missing keys fall back to the
    // defaults after merging.
    let toml_value: toml::Value = toml::from_str(toml_str)
        .map_err(|e| TestbedError::ConfigurationError(format!("Failed to parse TOML: {e}")))?;

    merge_over_defaults(toml_to_json(toml_value), "TOML")
}

/// Loads settings from a TOML file.
///
/// # Errors
///
/// Returns an error if the file cannot be read or the TOML is malformed.
pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Settings, TestbedError> {
    let content = std::fs::read_to_string(path.as_ref()).map_err(|e| {
        TestbedError::ConfigurationError(format!(
            "Failed to read TOML file '{}': {e}",
            path.as_ref().display()
        ))
    })?;
    from_toml_str(&content)
}

/// Loads settings from a TOML file and then applies environment variable overrides.
///
/// # Errors
///
/// Returns an error if the file cannot be read or the TOML is malformed.
pub fn from_toml_file_with_env(path: impl AsRef<Path>) -> Result<Settings, TestbedError> {
    let mut settings = from_toml_file(path)?;
    apply_env_overrides(&mut settings);
    Ok(settings)
}

/// Loads settings from a JSON string.
///
/// # Errors
///
/// Returns an error if the JSON is malformed or cannot be deserialized.
pub fn from_json_str(json_str: &str) -> Result<Settings, TestbedError> {
    let json_value: serde_json::Value = serde_json::from_str(json_str)
        .map_err(|e| TestbedError::ConfigurationError(format!("Failed to parse JSON: {e}")))?;

    merge_over_defaults(json_value, "JSON")
}

/// Loads settings from just environment variables (starting from defaults).
pub fn from_env() -> Settings {
    let mut settings = Settings::default();
    apply_env_overrides(&mut settings);
    settings
}

/// Applies environment variable overrides to a settings struct.
///
/// - `TESTBED_DEBUG` -> `debug` ("true"/"1"/"yes" => true, anything else => false)
/// - `TESTBED_LOG_LEVEL` -> `log_level`
/// - `TESTBED_BASE_URL` -> `base_url`
/// - `TESTBED_TASK_QUEUES` -> `task_queues` (comma-separated)
/// - `TESTBED_PARSE_TASK_ETA` -> `parse_task_eta`
pub fn apply_env_overrides(settings: &mut Settings) {
    if let Ok(val) = std::env::var("TESTBED_DEBUG") {
        settings.debug = parse_flag(&val);
    }

    if let Ok(val) = std::env::var("TESTBED_LOG_LEVEL") {
        settings.log_level = val;
    }

    if let Ok(val) = std::env::var("TESTBED_BASE_URL") {
        settings.base_url = val;
    }

    if let Ok(val) = std::env::var("TESTBED_TASK_QUEUES") {
        settings.task_queues = val
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();
    }

    if let Ok(val) = std::env::var("TESTBED_PARSE_TASK_ETA") {
        settings.parse_task_eta = parse_flag(&val);
    }
}

// ============================================================
// Helpers
// ============================================================

fn parse_flag(val: &str) -> bool {
    matches!(val.to_lowercase().as_str(), "true" | "1" | "yes")
}

fn merge_over_defaults(
    value: serde_json::Value,
    format_name: &str,
) -> Result<Settings, TestbedError> {
    let default_json = serde_json::to_value(Settings::default()).map_err(|e| {
        TestbedError::ConfigurationError(format!("Failed to serialize default settings: {e}"))
    })?;

    let merged = merge_json(default_json, value);
    serde_json::from_value(merged).map_err(|e| {
        TestbedError::ConfigurationError(format!(
            "Failed to deserialize settings from {format_name}: {e}"
        ))
    })
}

/// Converts a TOML value to a `serde_json::Value`.
fn toml_to_json(value: toml::Value) -> serde_json::Value {
    match value {
        toml::Value::String(s) => serde_json::Value::String(s),
        toml::Value::Integer(i) => serde_json::json!(i),
        toml::Value::Float(f) => serde_json::json!(f),
        toml::Value::Boolean(b) => serde_json::Value::Bool(b),
        toml::Value::Datetime(dt) => serde_json::Value::String(dt.to_string()),
        toml::Value::Array(arr) => {
            serde_json::Value::Array(arr.into_iter().map(toml_to_json).collect())
        }
        toml::Value::Table(table) => {
            let map: serde_json::Map<String, serde_json::Value> = table
                .into_iter()
                .map(|(k, v)| (k, toml_to_json(v)))
                .collect();
            serde_json::Value::Object(map)
        }
    }
}

/// Deep-merges two JSON values. The `override_val` takes precedence.
fn merge_json(base: serde_json::Value, override_val: serde_json::Value) -> serde_json::Value {
    match (base, override_val) {
        (serde_json::Value::Object(mut base_map), serde_json::Value::Object(override_map)) => {
            for (key, override_v) in override_map {
                let merged = if let Some(base_v) = base_map.remove(&key) {
                    merge_json(base_v, override_v)
                } else {
                    override_v
                };
                base_map.insert(key, merged);
            }
            serde_json::Value::Object(base_map)
        }
        (_, override_val) => override_val,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // ── TOML loading ────────────────────────────────────────────────

    #[test]
    fn test_from_toml_str_basic() {
        let toml = r#"
            debug = false
            base_url = "http://testserver"
            parse_task_eta = true
        "#;

        let settings = from_toml_str(toml).unwrap();
        assert!(!settings.debug);
        assert_eq!(settings.base_url, "http://testserver");
        assert!(settings.parse_task_eta);
        // Defaults preserved
        assert_eq!(settings.log_level, "info");
    }

    #[test]
    fn test_from_toml_str_task_queues() {
        let toml = r#"
            task_queues = ["default", "mail", "reports"]
        "#;

        let settings = from_toml_str(toml).unwrap();
        assert_eq!(settings.task_queues.len(), 3);
        assert!(settings.task_queues.contains(&"mail".to_string()));
    }

    #[test]
    fn test_from_toml_str_extra() {
        let toml = r#"
            [extra]
            app_name = "guestbook"
        "#;

        let settings = from_toml_str(toml).unwrap();
        assert_eq!(
            settings.extra.get("app_name"),
            Some(&serde_json::json!("guestbook"))
        );
    }

    #[test]
    fn test_from_toml_str_empty() {
        let settings = from_toml_str("").unwrap();
        assert!(settings.debug);
        assert_eq!(settings.task_queues, vec!["default".to_string()]);
    }

    #[test]
    fn test_from_toml_str_invalid() {
        let result = from_toml_str("this is not = [valid toml");
        assert!(result.is_err());
    }

    // ── JSON loading ────────────────────────────────────────────────

    #[test]
    fn test_from_json_str_basic() {
        let json = r#"{"log_level": "debug", "task_queues": ["default", "mail"]}"#;
        let settings = from_json_str(json).unwrap();
        assert_eq!(settings.log_level, "debug");
        assert_eq!(settings.task_queues.len(), 2);
        assert_eq!(settings.base_url, "http://localhost");
    }

    #[test]
    fn test_from_json_str_wrong_type() {
        let result = from_json_str(r#"{"debug": "not-a-bool"}"#);
        assert!(result.is_err());
    }

    // ── File loading ────────────────────────────────────────────────

    #[test]
    fn test_from_toml_file() {
        let dir = std::env::temp_dir().join("testbed_settings_toml");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("testbed.toml");

        std::fs::write(&path, "log_level = \"warn\"\n").unwrap();

        let settings = from_toml_file(&path).unwrap();
        assert_eq!(settings.log_level, "warn");

        std::fs::remove_file(&path).ok();
        std::fs::remove_dir(&dir).ok();
    }

    #[test]
    fn test_from_toml_file_missing() {
        let result = from_toml_file("/nonexistent/path/testbed.toml");
        assert!(result.is_err());
    }

    // ── Environment variable overrides ──────────────────────────────

    #[test]
    fn test_apply_env_overrides_base_url() {
        let mut settings = Settings::default();
        std::env::set_var("TESTBED_BASE_URL", "http://example.test");
        apply_env_overrides(&mut settings);
        assert_eq!(settings.base_url, "http://example.test");
        std::env::remove_var("TESTBED_BASE_URL");
    }

    #[test]
    fn test_apply_env_overrides_task_queues() {
        let mut settings = Settings::default();
        std::env::set_var("TESTBED_TASK_QUEUES", "default, mail, ");
        apply_env_overrides(&mut settings);
        assert_eq!(
            settings.task_queues,
            vec!["default".to_string(), "mail".to_string()]
        );
        std::env::remove_var("TESTBED_TASK_QUEUES");
    }

    #[test]
    fn test_apply_env_overrides_parse_eta() {
        let mut settings = Settings::default();
        std::env::set_var("TESTBED_PARSE_TASK_ETA", "1");
        apply_env_overrides(&mut settings);
        assert!(settings.parse_task_eta);
        std::env::remove_var("TESTBED_PARSE_TASK_ETA");
    }

    #[test]
    fn test_merge_json_nested() {
        let base = serde_json::json!({"a": {"b": 1, "c": 2}, "d": 3});
        let over = serde_json::json!({"a": {"b": 10}});
        let merged = merge_json(base, over);
        assert_eq!(merged, serde_json::json!({"a": {"b": 10, "c": 2}, "d": 3}));
    }
}
