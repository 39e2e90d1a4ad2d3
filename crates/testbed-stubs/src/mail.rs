//! Outbound mail gate.
//!
//! [`MemoryMailService`] accepts messages, validates them, and runs its log
//! routine instead of delivering anything. The log routine first hands the
//! message to every registered [`MailObserver`], then writes the default log
//! line. Sandboxes register an observer to collect what a test sent.
//!
//! ## Example
//!
//! ```
//! use std::sync::{Arc, Mutex};
//! use testbed_stubs::mail::{MailMessage, MailStub, MemoryMailService};
//!
//! let service = MemoryMailService::new();
//! let seen = Arc::new(Mutex::new(Vec::new()));
//! let sink = Arc::clone(&seen);
//! service.register_observer(Arc::new(move |m: &MailMessage| {
//!     sink.lock().unwrap().push(m.subject.clone());
//! }));
//!
//! service
//!     .send(MailMessage::new("me@example.org", "you@example.org", "Hi", "Hello!"))
//!     .unwrap();
//! assert_eq!(seen.lock().unwrap().as_slice(), ["Hi"]);
//! ```

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};

use testbed_core::{TestbedError, TestbedResult};

/// An outgoing e-mail message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MailMessage {
    /// The sender address.
    pub sender: String,
    /// Primary recipients.
    pub to: Vec<String>,
    /// Carbon copy recipients.
    pub cc: Vec<String>,
    /// Blind carbon copy recipients.
    pub bcc: Vec<String>,
    /// Reply-to address.
    pub reply_to: Option<String>,
    /// The subject line.
    pub subject: String,
    /// The plain text body.
    pub body: String,
    /// The HTML body, if any.
    pub html: Option<String>,
}

impl MailMessage {
    /// Creates a message with one recipient and a plain text body.
    pub fn new(
        sender: impl Into<String>,
        to: impl Into<String>,
        subject: impl Into<String>,
        body: impl Into<String>,
    ) -> Self {
        Self {
            sender: sender.into(),
            to: vec![to.into()],
            cc: Vec::new(),
            bcc: Vec::new(),
            reply_to: None,
            subject: subject.into(),
            body: body.into(),
            html: None,
        }
    }

    /// Adds a primary recipient.
    #[must_use]
    pub fn to(mut self, address: impl Into<String>) -> Self {
        self.to.push(address.into());
        self
    }

    /// Adds a carbon copy recipient.
    #[must_use]
    pub fn cc(mut self, address: impl Into<String>) -> Self {
        self.cc.push(address.into());
        self
    }

    /// Adds a blind carbon copy recipient.
    #[must_use]
    pub fn bcc(mut self, address: impl Into<String>) -> Self {
        self.bcc.push(address.into());
        self
    }

    /// Sets the reply-to address.
    #[must_use]
    pub fn reply_to(mut self, address: impl Into<String>) -> Self {
        self.reply_to = Some(address.into());
        self
    }

    /// Sets the HTML body.
    #[must_use]
    pub fn html(mut self, html: impl Into<String>) -> Self {
        self.html = Some(html.into());
        self
    }

    /// Returns the primary recipients.
    pub fn to_list(&self) -> &[String] {
        &self.to
    }

    /// Returns the plain text body.
    pub fn text_body(&self) -> &str {
        &self.body
    }

    /// Returns the HTML body, or an empty string when there is none.
    pub fn html_body(&self) -> &str {
        self.html.as_deref().unwrap_or_default()
    }

    /// Checks the fields the mail service requires.
    pub fn validate(&self) -> TestbedResult<()> {
        if self.sender.trim().is_empty() {
            return Err(TestbedError::InvalidMessage("Missing sender".into()));
        }
        if self.to.is_empty() && self.cc.is_empty() && self.bcc.is_empty() {
            return Err(TestbedError::InvalidMessage(
                "Must specify at least one recipient".into(),
            ));
        }
        if self.subject.is_empty() {
            return Err(TestbedError::InvalidMessage("Missing subject".into()));
        }
        if self.body.is_empty() && self.html.is_none() {
            return Err(TestbedError::InvalidMessage("Missing message body".into()));
        }
        Ok(())
    }
}

/// A callback invoked with every message the mail service logs.
pub type MailObserver = Arc<dyn Fn(&MailMessage) + Send + Sync>;

/// Identifies a registered [`MailObserver`] for later removal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverId(u64);

impl fmt::Display for ObserverId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "observer-{}", self.0)
    }
}

/// The mail service.
pub trait MailStub: Send + Sync {
    /// Validates and "sends" a message: observers see it, nothing is delivered.
    fn send(&self, message: MailMessage) -> TestbedResult<()>;

    /// Registers a callback run once per sent message, in registration order.
    fn register_observer(&self, observer: MailObserver) -> ObserverId;

    /// Removes a callback. Returns `true` if it was registered.
    fn unregister_observer(&self, id: ObserverId) -> bool;

    /// Returns the number of registered callbacks.
    fn observer_count(&self) -> usize;
}

/// An in-memory [`MailStub`] that logs instead of delivering.
#[derive(Default)]
pub struct MemoryMailService {
    observers: RwLock<Vec<(ObserverId, MailObserver)>>,
    next_id: AtomicU64,
}

impl MemoryMailService {
    /// Creates a mail service with no observers.
    pub fn new() -> Self {
        Self::default()
    }

    /// The log routine: notify observers, then write the default log line.
    fn generate_log(&self, message: &MailMessage) {
        // Observers may register or unregister from inside the callback.
        let observers: Vec<MailObserver> = self
            .observers
            .read()
            .expect("mail observer lock poisoned")
            .iter()
            .map(|(_, observer)| Arc::clone(observer))
            .collect();

        for observer in &observers {
            observer(message);
        }

        tracing::info!(
            sender = %message.sender,
            to = ?message.to,
            subject = %message.subject,
            "MailService.Send"
        );
    }
}

impl MailStub for MemoryMailService {
    fn send(&self, message: MailMessage) -> TestbedResult<()> {
        message.validate()?;
        self.generate_log(&message);
        Ok(())
    }

    fn register_observer(&self, observer: MailObserver) -> ObserverId {
        let id = ObserverId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.observers
            .write()
            .expect("mail observer lock poisoned")
            .push((id, observer));
        tracing::debug!(%id, "mail observer registered");
        id
    }

    fn unregister_observer(&self, id: ObserverId) -> bool {
        let mut observers = self.observers.write().expect("mail observer lock poisoned");
        let len_before = observers.len();
        observers.retain(|(oid, _)| *oid != id);
        observers.len() < len_before
    }

    fn observer_count(&self) -> usize {
        self.observers
            .read()
            .expect("mail observer lock poisoned")
            .len()
    }
}

impl fmt::Debug for MemoryMailService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryMailService")
            .field("observers", &self.observer_count())
            .finish()
    }
}
