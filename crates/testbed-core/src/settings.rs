//! Settings system for testbed.
//!
//! This module provides the [`Settings`] struct, which holds the knobs the
//! sandboxes and in-memory services read. Settings are passed explicitly to
//! the constructors that need them, so parallel tests can each use their own.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// The complete set of testbed settings.
///
/// # Examples
///
/// ```
/// use testbed_core::settings::Settings;
///
/// let settings = Settings::default();
/// assert!(settings.debug);
/// assert_eq!(settings.base_url, "http://localhost");
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    // ── Core ─────────────────────────────────────────────────────────

    /// Whether debug mode is enabled. Selects pretty log output.
    pub debug: bool,

    // ── Logging ──────────────────────────────────────────────────────

    /// The log level filter (e.g. "info", "debug", "testbed=trace").
    pub log_level: String,

    // ── Web ──────────────────────────────────────────────────────────

    /// The local base address redirect targets are resolved against.
    pub base_url: String,

    // ── Task queue ───────────────────────────────────────────────────

    /// Queues created by the in-memory task queue.
    pub task_queues: Vec<String>,
    /// Whether task-queue sandboxes decode ETA strings into date and time values.
    pub parse_task_eta: bool,

    // ── Escape hatch ─────────────────────────────────────────────────

    /// Custom settings that don't fit into the above categories.
    pub extra: HashMap<String, serde_json::Value>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            debug: true,
            log_level: "info".to_string(),
            base_url: "http://localhost".to_string(),
            task_queues: vec!["default".to_string()],
            parse_task_eta: false,
            extra: HashMap::new(),
        }
    }
}
