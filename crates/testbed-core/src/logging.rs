//! Logging integration for testbed.
//!
//! Provides helpers for configuring [`tracing`]-based logging from
//! [`Settings`](crate::settings::Settings) and for creating per-test spans.

use crate::settings::Settings;

/// Sets up the global tracing subscriber based on the given settings.
///
/// The filter is read from `settings.log_level`. In debug mode a pretty,
/// human-readable format is used; otherwise a structured JSON format.
///
/// Safe to call from every test: only the first call installs a subscriber.
pub fn setup_logging(settings: &Settings) {
    use tracing_subscriber::fmt;
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_new(&settings.log_level).unwrap_or_else(|_| EnvFilter::new("info"));

    if settings.debug {
        fmt::Subscriber::builder()
            .with_env_filter(filter)
            .with_target(true)
            .with_thread_ids(false)
            .with_file(true)
            .with_line_number(true)
            .with_test_writer()
            .pretty()
            .try_init()
            .ok();
    } else {
        fmt::Subscriber::builder()
            .with_env_filter(filter)
            .with_target(true)
            .with_test_writer()
            .json()
            .try_init()
            .ok();
    }
}

/// Creates a tracing span for a single test.
///
/// # Examples
///
/// ```
/// use testbed_core::logging::test_span;
///
/// let span = test_span("test_sends_welcome_mail");
/// let _guard = span.enter();
/// tracing::info!("running");
/// ```
pub fn test_span(name: &str) -> tracing::Span {
    tracing::info_span!("test", name = name)
}
