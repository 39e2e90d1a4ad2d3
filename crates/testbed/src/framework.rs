//! Composite fixtures.
//!
//! [`UnitTestCase`] bundles the four service sandboxes over one
//! [`ServiceRegistry`]; [`FunctionalTestCase`] adds a [`WebSandbox`] for the
//! application under test. Each sandbox stays reachable as a public field;
//! the most common helpers are also available directly on the composite.
//!
//! ## Example
//!
//! ```
//! use testbed::framework::UnitTestCase;
//! use testbed::mail::MailFilter;
//! use testbed_stubs::{MailMessage, ServiceRegistry};
//!
//! let services = ServiceRegistry::in_memory();
//! let case = UnitTestCase::new(&services);
//!
//! services
//!     .mail()
//!     .send(MailMessage::new("me@example.org", "you@example.org", "Hi", "Hello!"))
//!     .unwrap();
//! case.assert_email_sent(&MailFilter::new().to("you@example.org"));
//! case.assert_memcache_items(0);
//! ```

use axum::Router;

use testbed_core::Settings;
use testbed_stubs::{BoundQuery, MailMessage, ServiceRegistry};

use crate::base::Sandbox;
use crate::datastore::{DatastoreSandbox, QueryBudget};
use crate::mail::{MailFilter, MailSandbox};
use crate::memcache::MemcacheSandbox;
use crate::taskqueue::{QueuedTask, TaskFilter, TaskQueueSandbox};
use crate::web::WebSandbox;

/// Datastore, memcache, mail and task-queue sandboxes over one registry.
pub struct UnitTestCase {
    /// The registry the sandboxes are bound to.
    pub services: ServiceRegistry,
    /// Entity store reset and query counting.
    pub datastore: DatastoreSandbox,
    /// Cache reset and statistics.
    pub memcache: MemcacheSandbox,
    /// Outgoing mail capture.
    pub mail: MailSandbox,
    /// Queue reset and task inspection.
    pub taskqueue: TaskQueueSandbox,
}

impl UnitTestCase {
    /// Binds every sandbox to `services` and resets them.
    pub fn new(services: &ServiceRegistry) -> Self {
        Self {
            services: services.clone(),
            datastore: DatastoreSandbox::new(services),
            memcache: MemcacheSandbox::new(services),
            mail: MailSandbox::new(services),
            taskqueue: TaskQueueSandbox::new(services),
        }
    }

    /// Builds a fresh registry from `settings`, with the configured queues
    /// and ETA parsing. Also installs the test log subscriber.
    pub fn from_settings(settings: &Settings) -> Self {
        testbed_core::logging::setup_logging(settings);
        let services = ServiceRegistry::from_settings(settings);
        let mut case = Self::new(&services);
        case.taskqueue = case.taskqueue.with_eta_parsing(settings.parse_task_eta);
        case
    }

    // ── Datastore ────────────────────────────────────────────────────

    /// See [`DatastoreSandbox::clear_datastore`].
    pub fn clear_datastore(&self) {
        self.datastore.clear_datastore();
    }

    /// See [`DatastoreSandbox::query_count`].
    pub fn query_count(&self) -> usize {
        self.datastore.query_count()
    }

    /// See [`DatastoreSandbox::max_queries`].
    pub fn max_queries(&self, limit: usize) -> QueryBudget<'_> {
        self.datastore.max_queries(limit)
    }

    /// See [`DatastoreSandbox::all`].
    pub fn all(&self, kind: &str) -> BoundQuery {
        self.datastore.all(kind)
    }

    // ── Memcache ─────────────────────────────────────────────────────

    /// See [`MemcacheSandbox::clear_memcache`].
    pub fn clear_memcache(&self) {
        self.memcache.clear_memcache();
    }

    /// See [`MemcacheSandbox::assert_memcache_hits`].
    pub fn assert_memcache_hits(&self, hits: u64) {
        self.memcache.assert_memcache_hits(hits);
    }

    /// See [`MemcacheSandbox::assert_memcache_items`].
    pub fn assert_memcache_items(&self, items: u64) {
        self.memcache.assert_memcache_items(items);
    }

    // ── Mail ─────────────────────────────────────────────────────────

    /// See [`MailSandbox::clear_sent_messages`].
    pub fn clear_sent_messages(&self) {
        self.mail.clear_sent_messages();
    }

    /// See [`MailSandbox::get_sent_messages`].
    pub fn get_sent_messages(&self, filter: &MailFilter) -> Vec<MailMessage> {
        self.mail.get_sent_messages(filter)
    }

    /// See [`MailSandbox::assert_email_sent`].
    pub fn assert_email_sent(&self, filter: &MailFilter) {
        self.mail.assert_email_sent(filter);
    }

    /// See [`MailSandbox::assert_email_not_sent`].
    pub fn assert_email_not_sent(&self, filter: &MailFilter) {
        self.mail.assert_email_not_sent(filter);
    }

    // ── Task queue ───────────────────────────────────────────────────

    /// See [`TaskQueueSandbox::clear_task_queue`].
    pub fn clear_task_queue(&self) {
        self.taskqueue.clear_task_queue();
    }

    /// See [`TaskQueueSandbox::get_tasks`].
    pub fn get_tasks(&self, filter: &TaskFilter) -> Vec<QueuedTask> {
        self.taskqueue.get_tasks(filter)
    }

    /// See [`TaskQueueSandbox::assert_tasks_in_queue`].
    pub fn assert_tasks_in_queue(&self, expected: Option<usize>, filter: &TaskFilter) {
        self.taskqueue.assert_tasks_in_queue(expected, filter);
    }
}

impl Sandbox for UnitTestCase {
    fn set_up(&mut self) {
        self.datastore.set_up();
        self.memcache.set_up();
        self.mail.set_up();
        self.taskqueue.set_up();
    }
}

/// A [`UnitTestCase`] plus a [`WebSandbox`] for the application under test.
pub struct FunctionalTestCase {
    /// The service sandboxes.
    pub unit: UnitTestCase,
    /// The HTTP sandbox.
    pub web: WebSandbox,
}

impl FunctionalTestCase {
    /// Binds the service sandboxes to `services` and serves `application`.
    pub fn new(services: &ServiceRegistry, application: Router) -> Self {
        Self {
            unit: UnitTestCase::new(services),
            web: WebSandbox::new(application),
        }
    }

    /// Binds the service sandboxes to `services` with no application yet.
    pub fn without_application(services: &ServiceRegistry) -> Self {
        Self {
            unit: UnitTestCase::new(services),
            web: WebSandbox::unconfigured(),
        }
    }

    /// Builds registry, sandboxes and base URL from `settings`.
    pub fn from_settings(settings: &Settings, application: Router) -> Self {
        Self {
            unit: UnitTestCase::from_settings(settings),
            web: WebSandbox::from_settings(settings, Some(application)),
        }
    }

    /// The registry the sandboxes are bound to.
    pub fn services(&self) -> &ServiceRegistry {
        &self.unit.services
    }
}

impl Sandbox for FunctionalTestCase {
    fn set_up(&mut self) {
        self.unit.set_up();
        self.web.set_up();
    }
}

impl std::ops::Deref for FunctionalTestCase {
    type Target = UnitTestCase;

    fn deref(&self) -> &UnitTestCase {
        &self.unit
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::routing::get;
    use testbed_stubs::{CacheValue, Entity, NewTask};

    fn dirty(services: &ServiceRegistry) {
        services.datastore().put(Entity::new("Greeting"));
        services.memcache().set("k", CacheValue::from("v"), None);
        services.taskqueue().add("default", NewTask::new("/work")).unwrap();
    }

    #[test]
    fn test_unit_case_starts_clean() {
        let services = ServiceRegistry::in_memory();
        dirty(&services);

        let case = UnitTestCase::new(&services);
        assert_eq!(case.query_count(), 0);
        assert_eq!(case.all("Greeting").count(), 0);
        case.assert_memcache_items(0);
        case.assert_tasks_in_queue(Some(0), &TaskFilter::new());
        assert!(case.get_sent_messages(&MailFilter::new()).is_empty());
    }

    #[test]
    fn test_set_up_resets_every_service() {
        let services = ServiceRegistry::in_memory();
        let mut case = UnitTestCase::new(&services);
        dirty(&services);
        services
            .mail()
            .send(MailMessage::new("a@example.org", "b@example.org", "s", "b"))
            .unwrap();

        case.set_up();
        case.assert_memcache_items(0);
        case.assert_tasks_in_queue(Some(0), &TaskFilter::new());
        case.assert_email_not_sent(&MailFilter::new());
        assert_eq!(services.mail().observer_count(), 1);
    }

    #[test]
    fn test_from_settings() {
        let settings = Settings {
            task_queues: vec!["reports".into()],
            parse_task_eta: true,
            ..Settings::default()
        };
        let case = UnitTestCase::from_settings(&settings);
        case.services
            .taskqueue()
            .add("reports", NewTask::new("/build"))
            .unwrap();

        let tasks = case.get_tasks(&TaskFilter::new().queue("reports"));
        assert_eq!(tasks.len(), 1);
        assert!(tasks[0].eta_datetime.is_some());
    }

    #[tokio::test]
    async fn test_functional_case() {
        let services = ServiceRegistry::in_memory();
        let app = Router::new().route("/", get(|| async { "ok" }));
        let mut case = FunctionalTestCase::new(&services, app);

        let response = case.web.get("/").await;
        case.web.assert_ok(&response);
        case.assert_memcache_hits(0);
        case.services()
            .memcache()
            .set("seen", CacheValue::from("yes"), None);
        case.assert_memcache_items(1);
    }

    #[test]
    #[should_panic(expected = "Missing setting APPLICATION")]
    fn test_functional_case_without_application() {
        let services = ServiceRegistry::in_memory();
        let mut case = FunctionalTestCase::without_application(&services);
        case.web.app();
    }
}
