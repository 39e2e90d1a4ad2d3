//! Core error types for testbed.
//!
//! [`TestbedError`] covers the failures the emulated services and the
//! settings loader can report. Sandboxes turn these into test failures; the
//! stubs hand them back to the code under test.

use thiserror::Error;

/// The primary error type for testbed.
#[derive(Error, Debug)]
pub enum TestbedError {
    // ── Configuration ────────────────────────────────────────────────

    /// A configuration value is missing or invalid.
    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    /// A fixture was used without a setting it requires.
    #[error("Improperly configured: {0}")]
    ImproperlyConfigured(String),

    // ── Serialization ────────────────────────────────────────────────

    /// An error occurred during serialization or deserialization.
    #[error("Serialization error: {0}")]
    SerializationError(String),

    // ── IO ───────────────────────────────────────────────────────────

    /// An I/O error occurred.
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    // ── Mail ─────────────────────────────────────────────────────────

    /// An outgoing message is missing a required field.
    #[error("Invalid mail message: {0}")]
    InvalidMessage(String),

    // ── Task queue ───────────────────────────────────────────────────

    /// The named queue is not known to the task queue.
    #[error("Unknown queue: {0}")]
    UnknownQueue(String),

    /// A task with the same name is already in the queue.
    #[error("Task already exists: {0}")]
    TaskAlreadyExists(String),

    /// A task body could not be decoded into parameters.
    #[error("Invalid task body: {0}")]
    InvalidTaskBody(String),

    /// A task ETA string does not use the `YYYY/MM/DD HH:MM:SS` format.
    #[error("Invalid task ETA: {0}")]
    InvalidEta(String),
}

/// A convenience type alias for `Result<T, TestbedError>`.
pub type TestbedResult<T> = Result<T, TestbedError>;
