//! Mail interception sandbox.
//!
//! [`MailSandbox`] registers an observer on the mail stub so every message
//! the code under test sends is captured in send order, while the stub still
//! writes its usual log line. Captured messages are queried with a
//! [`MailFilter`].
//!
//! ## Example
//!
//! ```
//! use testbed::mail::{MailFilter, MailSandbox};
//! use testbed_stubs::{MailMessage, ServiceRegistry};
//!
//! let services = ServiceRegistry::in_memory();
//! let sandbox = MailSandbox::new(&services);
//!
//! services
//!     .mail()
//!     .send(MailMessage::new("me@example.org", "you@example.org", "Hi", "Hello!"))
//!     .unwrap();
//!
//! sandbox.assert_email_sent(&MailFilter::new().to("you@example.org"));
//! sandbox.assert_email_not_sent(&MailFilter::new().subject("Bye"));
//! ```

use std::fmt;
use std::sync::{Arc, Mutex};

use testbed_stubs::{MailMessage, MailStub, ObserverId, ServiceRegistry};

use crate::base::Sandbox;

/// Criteria for selecting captured messages.
///
/// Every non-empty criterion must match. Empty strings count as omitted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MailFilter {
    to: Option<String>,
    sender: Option<String>,
    subject: Option<String>,
    body: Option<String>,
    html: Option<String>,
}

impl MailFilter {
    /// A filter matching every message.
    pub fn new() -> Self {
        Self::default()
    }

    /// Requires `address` among the primary recipients.
    #[must_use]
    pub fn to(mut self, address: impl Into<String>) -> Self {
        self.to = non_empty(address.into());
        self
    }

    /// Requires the sender to equal `address`.
    #[must_use]
    pub fn sender(mut self, address: impl Into<String>) -> Self {
        self.sender = non_empty(address.into());
        self
    }

    /// Requires the subject to equal `subject`.
    #[must_use]
    pub fn subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = non_empty(subject.into());
        self
    }

    /// Requires the plain text body to contain `fragment`.
    #[must_use]
    pub fn body(mut self, fragment: impl Into<String>) -> Self {
        self.body = non_empty(fragment.into());
        self
    }

    /// Requires the HTML body to contain `fragment`.
    #[must_use]
    pub fn html(mut self, fragment: impl Into<String>) -> Self {
        self.html = non_empty(fragment.into());
        self
    }

    /// Returns `true` if `message` satisfies every criterion.
    pub fn matches(&self, message: &MailMessage) -> bool {
        if let Some(to) = &self.to {
            if !message.to_list().iter().any(|r| r == to) {
                return false;
            }
        }
        if let Some(sender) = &self.sender {
            if message.sender != *sender {
                return false;
            }
        }
        if let Some(subject) = &self.subject {
            if message.subject != *subject {
                return false;
            }
        }
        if let Some(body) = &self.body {
            if !message.text_body().contains(body.as_str()) {
                return false;
            }
        }
        if let Some(html) = &self.html {
            if !message.html_body().contains(html.as_str()) {
                return false;
            }
        }
        true
    }

    fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

impl fmt::Display for MailFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let labelled = [
            ("To", &self.to),
            ("From", &self.sender),
            ("Subject", &self.subject),
            ("Body (contains)", &self.body),
            ("HTML Body (contains)", &self.html),
        ];
        let details: Vec<String> = labelled
            .iter()
            .filter_map(|(label, value)| value.as_ref().map(|v| format!("{label}: {v}")))
            .collect();
        f.write_str(&details.join(", "))
    }
}

fn non_empty(value: String) -> Option<String> {
    (!value.is_empty()).then_some(value)
}

fn failure_message(prefix: &str, filter: &MailFilter) -> String {
    if filter.is_empty() {
        prefix.to_string()
    } else {
        format!("{prefix} Arguments expected: {filter}")
    }
}

/// Captures outgoing mail for the duration of a test.
///
/// The observer lives on whichever mail stub the registry held at the last
/// [`set_up`](Sandbox::set_up); replacing the stub and setting up again moves
/// it to the new one.
pub struct MailSandbox {
    services: ServiceRegistry,
    sent: Arc<Mutex<Vec<MailMessage>>>,
    bound: Option<(Arc<dyn MailStub>, ObserverId)>,
}

impl MailSandbox {
    /// Binds to the registry's mail stub and starts capturing.
    pub fn new(services: &ServiceRegistry) -> Self {
        let mut sandbox = Self {
            services: services.clone(),
            sent: Arc::new(Mutex::new(Vec::new())),
            bound: None,
        };
        sandbox.set_up();
        sandbox
    }

    /// Forgets every captured message.
    pub fn clear_sent_messages(&self) {
        self.lock().clear();
    }

    /// Captured messages matching `filter`, in send order.
    pub fn get_sent_messages(&self, filter: &MailFilter) -> Vec<MailMessage> {
        self.lock()
            .iter()
            .filter(|message| filter.matches(message))
            .cloned()
            .collect()
    }

    /// # Panics
    ///
    /// Panics if no captured message matches `filter`.
    pub fn assert_email_sent(&self, filter: &MailFilter) {
        assert!(
            !self.get_sent_messages(filter).is_empty(),
            "{}",
            failure_message("Expected e-mail message sent.", filter)
        );
    }

    /// # Panics
    ///
    /// Panics if any captured message matches `filter`.
    pub fn assert_email_not_sent(&self, filter: &MailFilter) {
        assert!(
            self.get_sent_messages(filter).is_empty(),
            "{}",
            failure_message("Unexpected e-mail message sent.", filter)
        );
    }

    /// The mail stub the observer is registered on.
    pub fn stub(&self) -> Option<&Arc<dyn MailStub>> {
        self.bound.as_ref().map(|(stub, _)| stub)
    }

    fn unbind(&mut self) {
        if let Some((stub, id)) = self.bound.take() {
            stub.unregister_observer(id);
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<MailMessage>> {
        self.sent.lock().expect("MailSandbox lock poisoned")
    }
}

impl Sandbox for MailSandbox {
    fn set_up(&mut self) {
        let current = self.services.mail();
        let stale = self
            .bound
            .as_ref()
            .map_or(true, |(stub, _)| !Arc::ptr_eq(stub, &current));
        if stale {
            self.unbind();
            let sink = Arc::clone(&self.sent);
            let id = current.register_observer(Arc::new(move |message: &MailMessage| {
                sink.lock()
                    .expect("MailSandbox lock poisoned")
                    .push(message.clone());
            }));
            tracing::debug!(observer = ?id, "mail observer registered");
            self.bound = Some((current, id));
        }
        self.clear_sent_messages();
    }
}

impl Drop for MailSandbox {
    fn drop(&mut self) {
        self.unbind();
    }
}

impl fmt::Debug for MailSandbox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MailSandbox")
            .field("sent", &self.lock().len())
            .field("observer", &self.bound.as_ref().map(|(_, id)| id))
            .finish()
    }
}
