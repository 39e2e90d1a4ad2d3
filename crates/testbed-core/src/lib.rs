//! # testbed-core
//!
//! Core types shared by the testbed crates: the error type, the settings
//! system with its file and environment loader, and tracing-based logging.
//!
//! ## Modules
//!
//! - [`error`] - Error types and result aliases
//! - [`settings`] - Testbed settings
//! - [`settings_loader`] - Loading settings from TOML, JSON, and the environment
//! - [`logging`] - Tracing subscriber setup and per-test spans

pub mod error;
pub mod logging;
pub mod settings;
pub mod settings_loader;

// Re-export the most commonly used types at the crate root.
pub use error::{TestbedError, TestbedResult};
pub use settings::Settings;
