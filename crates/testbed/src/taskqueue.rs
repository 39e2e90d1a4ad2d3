//! Task-queue sandbox.
//!
//! [`TaskQueueSandbox`] flushes every queue at the start of a test and lists
//! what the code under test enqueued. Listed tasks come back as
//! [`QueuedTask`]s: the raw task plus its decoded body, the body parsed as
//! form parameters and, when enabled, the parsed ETA.
//!
//! ## Example
//!
//! ```
//! use testbed::taskqueue::{TaskFilter, TaskQueueSandbox};
//! use testbed_stubs::{NewTask, ServiceRegistry};
//!
//! let services = ServiceRegistry::in_memory();
//! let sandbox = TaskQueueSandbox::new(&services);
//!
//! services
//!     .taskqueue()
//!     .add("default", NewTask::new("/worker").param("user", "42"))
//!     .unwrap();
//!
//! let tasks = sandbox.get_tasks(&TaskFilter::new().url("/worker"));
//! assert_eq!(tasks[0].params["user"], "42");
//! sandbox.assert_tasks_in_queue(Some(1), &TaskFilter::new());
//! ```

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};

use testbed_core::{TestbedError, TestbedResult};
use testbed_stubs::{QueueInfo, ServiceRegistry, Task, TaskQueueStub};

use crate::base::Sandbox;

/// Criteria for selecting pending tasks.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskFilter {
    url: Option<String>,
    name: Option<String>,
    queue_names: Vec<String>,
}

impl TaskFilter {
    /// A filter matching every task in every queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Requires the task URL to equal `url`.
    #[must_use]
    pub fn url(mut self, url: impl Into<String>) -> Self {
        let url = url.into();
        self.url = (!url.is_empty()).then_some(url);
        self
    }

    /// Requires the task name to equal `name`.
    #[must_use]
    pub fn name(mut self, name: impl Into<String>) -> Self {
        let name = name.into();
        self.name = (!name.is_empty()).then_some(name);
        self
    }

    /// Restricts the search to `queue`. May be called more than once.
    #[must_use]
    pub fn queue(mut self, queue: impl Into<String>) -> Self {
        self.queue_names.push(queue.into());
        self
    }

    fn matches(&self, task: &Task) -> bool {
        self.url.as_ref().map_or(true, |url| task.url == *url)
            && self.name.as_ref().map_or(true, |name| task.name == *name)
    }

    fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

impl fmt::Display for TaskFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut details = Vec::new();
        if let Some(url) = &self.url {
            details.push(format!("URL: {url}"));
        }
        if let Some(name) = &self.name {
            details.push(format!("Name: {name}"));
        }
        if !self.queue_names.is_empty() {
            details.push(format!("Queues: {}", self.queue_names.join(", ")));
        }
        f.write_str(&details.join(", "))
    }
}

fn failure_message(prefix: &str, filter: &TaskFilter) -> String {
    if filter.is_empty() {
        prefix.to_string()
    } else {
        format!("{prefix} Arguments expected: {filter}")
    }
}

/// A pending task with its body decoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueuedTask {
    /// The task as the queue reports it.
    pub task: Task,
    /// The base64-decoded body.
    pub decoded_body: Vec<u8>,
    /// The decoded body read as `key=value&...` pairs.
    pub params: HashMap<String, String>,
    /// The parsed ETA, when ETA parsing is on.
    pub eta_datetime: Option<NaiveDateTime>,
    /// The date part of [`eta_datetime`](Self::eta_datetime).
    pub eta_date: Option<NaiveDate>,
    /// The time part of [`eta_datetime`](Self::eta_datetime).
    pub eta_time: Option<NaiveTime>,
}

impl QueuedTask {
    fn from_task(task: Task, parse_eta: bool) -> TestbedResult<Self> {
        let decoded_body = task.decode_body()?;
        let params = parse_task_params(&String::from_utf8_lossy(&decoded_body))?;
        let eta_datetime = if parse_eta { task.eta_datetime()? } else { None };
        Ok(Self {
            eta_date: eta_datetime.map(|eta| eta.date()),
            eta_time: eta_datetime.map(|eta| eta.time()),
            task,
            decoded_body,
            params,
            eta_datetime,
        })
    }

    /// The decoded body as text.
    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.decoded_body).into_owned()
    }
}

/// Parses a task body of `&`-joined `key=value` pairs.
///
/// The first `=` of each item separates key from value and nothing is
/// percent-decoded. An empty body has no parameters.
///
/// # Errors
///
/// Returns [`TestbedError::InvalidTaskBody`] if an item has no `=`.
pub fn parse_task_params(body: &str) -> TestbedResult<HashMap<String, String>> {
    if body.is_empty() {
        return Ok(HashMap::new());
    }
    body.split('&')
        .map(|item| {
            item.split_once('=')
                .map(|(key, value)| (key.to_string(), value.to_string()))
                .ok_or_else(|| {
                    TestbedError::InvalidTaskBody(format!("'{item}' is not a key=value pair"))
                })
        })
        .collect()
}

/// Flushes every queue between tests and inspects pending tasks.
///
/// Always acts on the task queue currently in the registry.
#[derive(Clone)]
pub struct TaskQueueSandbox {
    services: ServiceRegistry,
    parse_eta: bool,
}

impl TaskQueueSandbox {
    /// Binds to the registry's task queue and flushes it. ETA parsing is off.
    pub fn new(services: &ServiceRegistry) -> Self {
        let mut sandbox = Self {
            services: services.clone(),
            parse_eta: false,
        };
        sandbox.set_up();
        sandbox
    }

    /// Turns ETA parsing on or off.
    #[must_use]
    pub const fn with_eta_parsing(mut self, enabled: bool) -> Self {
        self.parse_eta = enabled;
        self
    }

    /// Removes every pending task from every queue.
    pub fn clear_task_queue(&self) {
        let stub = self.stub();
        for queue in stub.get_queues() {
            stub.flush_queue(&queue.name);
        }
    }

    /// Every known queue.
    pub fn get_task_queues(&self) -> Vec<QueueInfo> {
        self.stub().get_queues()
    }

    /// The names of every known queue.
    pub fn get_task_queue_names(&self) -> Vec<String> {
        self.get_task_queues().into_iter().map(|q| q.name).collect()
    }

    /// Pending tasks matching `filter`, queue by queue, oldest first.
    ///
    /// # Panics
    ///
    /// Panics if a named queue does not exist or a task body is malformed.
    pub fn get_tasks(&self, filter: &TaskFilter) -> Vec<QueuedTask> {
        self.try_get_tasks(filter)
            .unwrap_or_else(|e| panic!("Unable to list tasks: {e}"))
    }

    /// Fallible form of [`get_tasks`](Self::get_tasks).
    ///
    /// # Errors
    ///
    /// Returns the stub's error for an unknown queue, or
    /// [`TestbedError::InvalidTaskBody`] / [`TestbedError::InvalidEta`] for a
    /// task that cannot be decoded.
    pub fn try_get_tasks(&self, filter: &TaskFilter) -> TestbedResult<Vec<QueuedTask>> {
        let queue_names = if filter.queue_names.is_empty() {
            self.get_task_queue_names()
        } else {
            filter.queue_names.clone()
        };

        let stub = self.stub();
        let mut tasks = Vec::new();
        for queue_name in &queue_names {
            for task in stub.get_tasks(queue_name)? {
                if filter.matches(&task) {
                    tasks.push(QueuedTask::from_task(task, self.parse_eta)?);
                }
            }
        }
        tracing::debug!(queues = ?queue_names, found = tasks.len(), "tasks listed");
        Ok(tasks)
    }

    /// With `None`, asserts at least one task matches `filter`; with
    /// `Some(n)`, asserts exactly `n` do.
    ///
    /// # Panics
    ///
    /// Panics if the assertion does not hold.
    pub fn assert_tasks_in_queue(&self, expected: Option<usize>, filter: &TaskFilter) {
        let found = self.get_tasks(filter).len();
        match expected {
            Some(n) => assert!(
                found == n,
                "{}",
                failure_message(&format!("Expected {n} tasks in queue, found {found}."), filter)
            ),
            None => assert!(
                found > 0,
                "{}",
                failure_message("Expected a task in queue, found none.", filter)
            ),
        }
    }

    /// The task queue currently registered.
    pub fn stub(&self) -> Arc<dyn TaskQueueStub> {
        self.services.taskqueue()
    }
}

impl Sandbox for TaskQueueSandbox {
    fn set_up(&mut self) {
        self.clear_task_queue();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use testbed_core::Settings;
    use testbed_stubs::{MemoryTaskQueue, NewTask};

    fn registry_with_queues() -> ServiceRegistry {
        ServiceRegistry::from_settings(&Settings {
            task_queues: vec!["mail".into()],
            ..Settings::default()
        })
    }

    #[test]
    fn test_parse_task_params() {
        let params = parse_task_params("a=1&b=2").unwrap();
        assert_eq!(params.len(), 2);
        assert_eq!(params["a"], "1");
        assert_eq!(params["b"], "2");

        assert!(parse_task_params("").unwrap().is_empty());
        assert_eq!(parse_task_params("expr=x=y").unwrap()["expr"], "x=y");
        assert_eq!(parse_task_params("q=a%20b").unwrap()["q"], "a%20b");
        assert_eq!(parse_task_params("flag=").unwrap()["flag"], "");
    }

    #[test]
    fn test_parse_task_params_rejects_bare_items() {
        assert!(matches!(
            parse_task_params("a=1&oops"),
            Err(TestbedError::InvalidTaskBody(_))
        ));
    }

    #[test]
    fn test_set_up_flushes_every_queue() {
        let services = registry_with_queues();
        services.taskqueue().add("default", NewTask::new("/a")).unwrap();
        services.taskqueue().add("mail", NewTask::new("/b")).unwrap();

        let sandbox = TaskQueueSandbox::new(&services);
        sandbox.assert_tasks_in_queue(Some(0), &TaskFilter::new());
        assert_eq!(sandbox.get_task_queue_names(), vec!["default", "mail"]);
        assert!(sandbox
            .get_task_queues()
            .iter()
            .all(|q| q.tasks_pending == 0));
    }

    #[test]
    fn test_get_tasks_filters() {
        let services = registry_with_queues();
        let sandbox = TaskQueueSandbox::new(&services);
        let queue = services.taskqueue();
        queue
            .add("default", NewTask::new("/foo").param("a", "1").param("b", "2"))
            .unwrap();
        queue.add("default", NewTask::new("/bar")).unwrap();
        queue.add("mail", NewTask::new("/foo").name("send-digest")).unwrap();

        let foo = sandbox.get_tasks(&TaskFilter::new().url("/foo"));
        assert_eq!(foo.len(), 2);
        assert!(foo.iter().all(|t| t.task.url == "/foo"));
        assert_eq!(foo[0].params["a"], "1");
        assert_eq!(foo[0].params["b"], "2");
        assert_eq!(foo[0].body_text(), "a=1&b=2");

        let named = sandbox.get_tasks(&TaskFilter::new().name("send-digest"));
        assert_eq!(named.len(), 1);
        assert_eq!(named[0].task.queue_name, "mail");

        assert_eq!(sandbox.get_tasks(&TaskFilter::new().queue("default")).len(), 2);
        assert_eq!(
            sandbox
                .get_tasks(&TaskFilter::new().queue("mail").url("/bar"))
                .len(),
            0
        );
    }

    #[test]
    fn test_eta_fields_only_when_enabled() {
        let services = ServiceRegistry::in_memory();
        let eta = NaiveDate::from_ymd_opt(2024, 1, 2)
            .unwrap()
            .and_hms_opt(3, 4, 5)
            .unwrap();
        let sandbox = TaskQueueSandbox::new(&services);
        services
            .taskqueue()
            .add("default", NewTask::new("/later").eta(eta))
            .unwrap();

        let plain = sandbox.get_tasks(&TaskFilter::new());
        assert_eq!(plain[0].eta_datetime, None);
        assert_eq!(plain[0].task.eta.as_deref(), Some("2024/01/02 03:04:05"));

        let parsed = sandbox.clone().with_eta_parsing(true).get_tasks(&TaskFilter::new());
        assert_eq!(parsed[0].eta_datetime, Some(eta));
        assert_eq!(parsed[0].eta_date, Some(eta.date()));
        assert_eq!(parsed[0].eta_time, Some(eta.time()));
    }

    #[test]
    fn test_assert_tasks_in_queue() {
        let services = ServiceRegistry::in_memory();
        let sandbox = TaskQueueSandbox::new(&services);
        services.taskqueue().add("default", NewTask::new("/x")).unwrap();
        services.taskqueue().add("default", NewTask::new("/x")).unwrap();

        sandbox.assert_tasks_in_queue(None, &TaskFilter::new());
        sandbox.assert_tasks_in_queue(Some(2), &TaskFilter::new().url("/x"));
        sandbox.assert_tasks_in_queue(Some(0), &TaskFilter::new().url("/y"));
    }

    #[test]
    #[should_panic(expected = "Expected a task in queue, found none")]
    fn test_assert_any_task_fails_when_empty() {
        let services = ServiceRegistry::in_memory();
        TaskQueueSandbox::new(&services).assert_tasks_in_queue(None, &TaskFilter::new());
    }

    #[test]
    #[should_panic(expected = "Expected 2 tasks in queue, found 1")]
    fn test_assert_exact_count_fails() {
        let services = ServiceRegistry::in_memory();
        let sandbox = TaskQueueSandbox::new(&services);
        services.taskqueue().add("default", NewTask::new("/x")).unwrap();
        sandbox.assert_tasks_in_queue(Some(2), &TaskFilter::new());
    }

    #[test]
    #[should_panic(
        expected = "Expected 1 tasks in queue, found 0. Arguments expected: URL: /notify, Name: digest, Queues: default, mail"
    )]
    fn test_assert_count_failure_lists_filter() {
        let services = registry_with_queues();
        let sandbox = TaskQueueSandbox::new(&services);
        sandbox.assert_tasks_in_queue(
            Some(1),
            &TaskFilter::new()
                .url("/notify")
                .name("digest")
                .queue("default")
                .queue("mail"),
        );
    }

    #[test]
    #[should_panic(expected = "Expected a task in queue, found none. Arguments expected: URL: /notify")]
    fn test_assert_any_failure_lists_filter() {
        let services = ServiceRegistry::in_memory();
        TaskQueueSandbox::new(&services)
            .assert_tasks_in_queue(None, &TaskFilter::new().url("/notify"));
    }

    #[test]
    fn test_filter_display() {
        assert_eq!(TaskFilter::new().to_string(), "");
        assert_eq!(
            TaskFilter::new().queue("mail").name("n").to_string(),
            "Name: n, Queues: mail"
        );
    }

    #[test]
    fn test_set_up_flushes_replaced_queue() {
        let services = ServiceRegistry::in_memory();
        let mut sandbox = TaskQueueSandbox::new(&services);
        let replacement = Arc::new(MemoryTaskQueue::new());
        services.register_taskqueue(replacement.clone());
        replacement.add("default", NewTask::new("/x")).unwrap();
        sandbox.assert_tasks_in_queue(Some(1), &TaskFilter::new());

        sandbox.set_up();
        sandbox.assert_tasks_in_queue(Some(0), &TaskFilter::new());
        assert!(replacement.get_tasks("default").unwrap().is_empty());
    }

    #[test]
    #[should_panic(expected = "Unable to list tasks")]
    fn test_malformed_body_fails() {
        let services = ServiceRegistry::in_memory();
        let sandbox = TaskQueueSandbox::new(&services);
        services
            .taskqueue()
            .add("default", NewTask::new("/raw").payload("not-a-form"))
            .unwrap();
        sandbox.get_tasks(&TaskFilter::new());
    }

    #[test]
    fn test_unknown_queue_is_an_error() {
        let services = ServiceRegistry::in_memory();
        let sandbox = TaskQueueSandbox::new(&services);
        assert!(matches!(
            sandbox.try_get_tasks(&TaskFilter::new().queue("nope")),
            Err(TestbedError::UnknownQueue(_))
        ));
    }
}
