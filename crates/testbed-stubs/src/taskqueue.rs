//! Named push queues.
//!
//! [`MemoryTaskQueue`] holds enqueued [`Task`]s per queue name. Nothing is
//! ever executed: tests list and flush queues to check what code under test
//! scheduled. Task bodies are stored base64-encoded and ETAs as
//! `YYYY/MM/DD HH:MM:SS` strings, the shape the queue's listing call reports.
//!
//! ## Example
//!
//! ```
//! use testbed_stubs::taskqueue::{MemoryTaskQueue, NewTask, TaskQueueStub};
//!
//! let queue = MemoryTaskQueue::new();
//! let task = queue
//!     .add("default", NewTask::new("/worker").param("user", "42"))
//!     .unwrap();
//! assert_eq!(task.name, "task1");
//! assert_eq!(queue.get_tasks("default").unwrap().len(), 1);
//! ```

use std::collections::BTreeMap;
use std::sync::Mutex;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use chrono::{NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

use testbed_core::{TestbedError, TestbedResult};

/// The `strftime` format of a task's `eta` field.
pub const TASK_ETA_FORMAT: &str = "%Y/%m/%d %H:%M:%S";

/// The queue that always exists.
pub const DEFAULT_QUEUE: &str = "default";

/// A pending task as reported by the queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    /// The task name, unique within its queue.
    pub name: String,
    /// The queue holding the task.
    pub queue_name: String,
    /// The URL the task would be dispatched to.
    pub url: String,
    /// The HTTP method of the dispatch.
    pub method: String,
    /// Extra request headers.
    pub headers: Vec<(String, String)>,
    /// The request body, base64-encoded.
    pub body: String,
    /// When the task becomes runnable, formatted with [`TASK_ETA_FORMAT`].
    pub eta: Option<String>,
}

impl Task {
    /// Decodes the base64 body.
    pub fn decode_body(&self) -> TestbedResult<Vec<u8>> {
        STANDARD.decode(self.body.as_bytes()).map_err(|e| {
            TestbedError::InvalidTaskBody(format!("task '{}' body is not base64: {e}", self.name))
        })
    }

    /// Parses the `eta` field.
    pub fn eta_datetime(&self) -> TestbedResult<Option<NaiveDateTime>> {
        self.eta
            .as_deref()
            .map(|eta| {
                NaiveDateTime::parse_from_str(eta, TASK_ETA_FORMAT)
                    .map_err(|e| TestbedError::InvalidEta(format!("'{eta}': {e}")))
            })
            .transpose()
    }
}

/// A summary of one queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueInfo {
    /// The queue name.
    pub name: String,
    /// Number of tasks waiting in the queue.
    pub tasks_pending: usize,
}

/// A task to enqueue.
#[derive(Debug, Clone, Default)]
pub struct NewTask {
    url: Option<String>,
    name: Option<String>,
    method: Option<String>,
    headers: Vec<(String, String)>,
    payload: Option<Vec<u8>>,
    params: Vec<(String, String)>,
    eta: Option<NaiveDateTime>,
}

impl NewTask {
    /// Creates a task dispatched to `url`.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: Some(url.into()),
            ..Self::default()
        }
    }

    /// Creates a task dispatched to its queue's default URL.
    pub fn for_queue_url() -> Self {
        Self::default()
    }

    /// Sets the task name.
    #[must_use]
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Sets the HTTP method. Defaults to `POST`.
    #[must_use]
    pub fn method(mut self, method: impl Into<String>) -> Self {
        self.method = Some(method.into());
        self
    }

    /// Adds a request header.
    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Sets a raw payload. Takes precedence over [`param`](Self::param).
    #[must_use]
    pub fn payload(mut self, payload: impl Into<Vec<u8>>) -> Self {
        self.payload = Some(payload.into());
        self
    }

    /// Adds a form parameter; parameters are joined as `key=value&...`.
    #[must_use]
    pub fn param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.push((key.into(), value.into()));
        self
    }

    /// Sets an absolute ETA (UTC).
    #[must_use]
    pub const fn eta(mut self, eta: NaiveDateTime) -> Self {
        self.eta = Some(eta);
        self
    }

    /// Sets the ETA to now plus `seconds`.
    #[must_use]
    pub fn countdown(mut self, seconds: i64) -> Self {
        self.eta = Some(Utc::now().naive_utc() + chrono::Duration::seconds(seconds));
        self
    }

    fn body(&self) -> Vec<u8> {
        self.payload.clone().unwrap_or_else(|| {
            self.params
                .iter()
                .map(|(k, v)| format!("{k}={v}"))
                .collect::<Vec<_>>()
                .join("&")
                .into_bytes()
        })
    }
}

/// The task queue service.
pub trait TaskQueueStub: Send + Sync {
    /// Lists every known queue.
    fn get_queues(&self) -> Vec<QueueInfo>;

    /// Removes every task from a queue. Unknown names are ignored.
    fn flush_queue(&self, name: &str);

    /// Lists the pending tasks of a queue, oldest first.
    fn get_tasks(&self, queue_name: &str) -> TestbedResult<Vec<Task>>;

    /// Enqueues a task, returning it as it will be listed.
    fn add(&self, queue_name: &str, task: NewTask) -> TestbedResult<Task>;
}

#[derive(Debug, Default)]
struct QueueState {
    queues: BTreeMap<String, Vec<Task>>,
    task_counter: u64,
}

/// A thread-safe in-memory [`TaskQueueStub`].
#[derive(Debug)]
pub struct MemoryTaskQueue {
    state: Mutex<QueueState>,
}

impl Default for MemoryTaskQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryTaskQueue {
    /// Creates a task queue with only the `default` queue.
    pub fn new() -> Self {
        Self::with_queues(std::iter::empty::<String>())
    }

    /// Creates a task queue with the `default` queue plus `names`.
    pub fn with_queues<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut queues = BTreeMap::new();
        queues.insert(DEFAULT_QUEUE.to_string(), Vec::new());
        for name in names {
            queues.entry(name.into()).or_insert_with(Vec::new);
        }
        Self {
            state: Mutex::new(QueueState {
                queues,
                task_counter: 0,
            }),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, QueueState> {
        self.state.lock().expect("MemoryTaskQueue lock poisoned")
    }
}

impl TaskQueueStub for MemoryTaskQueue {
    fn get_queues(&self) -> Vec<QueueInfo> {
        self.lock()
            .queues
            .iter()
            .map(|(name, tasks)| QueueInfo {
                name: name.clone(),
                tasks_pending: tasks.len(),
            })
            .collect()
    }

    fn flush_queue(&self, name: &str) {
        if let Some(tasks) = self.lock().queues.get_mut(name) {
            tasks.clear();
            tracing::debug!(queue = name, "task queue flushed");
        }
    }

    fn get_tasks(&self, queue_name: &str) -> TestbedResult<Vec<Task>> {
        self.lock()
            .queues
            .get(queue_name)
            .cloned()
            .ok_or_else(|| TestbedError::UnknownQueue(queue_name.to_string()))
    }

    fn add(&self, queue_name: &str, task: NewTask) -> TestbedResult<Task> {
        let mut state = self.lock();
        if !state.queues.contains_key(queue_name) {
            return Err(TestbedError::UnknownQueue(queue_name.to_string()));
        }

        let name = if let Some(name) = task.name.clone() {
            name
        } else {
            state.task_counter += 1;
            format!("task{}", state.task_counter)
        };

        let tasks = state
            .queues
            .get_mut(queue_name)
            .ok_or_else(|| TestbedError::UnknownQueue(queue_name.to_string()))?;
        if tasks.iter().any(|t| t.name == name) {
            return Err(TestbedError::TaskAlreadyExists(format!("{queue_name}/{name}")));
        }

        let eta = task.eta.unwrap_or_else(|| Utc::now().naive_utc());
        let created = Task {
            url: task
                .url
                .clone()
                .unwrap_or_else(|| format!("/_ah/queue/{queue_name}")),
            method: task.method.clone().unwrap_or_else(|| "POST".to_string()),
            headers: task.headers.clone(),
            body: STANDARD.encode(task.body()),
            eta: Some(eta.format(TASK_ETA_FORMAT).to_string()),
            queue_name: queue_name.to_string(),
            name,
        };
        tasks.push(created.clone());
        tracing::debug!(queue = queue_name, task = %created.name, url = %created.url, "task enqueued");
        Ok(created)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn test_default_queue_always_exists() {
        let queue = MemoryTaskQueue::new();
        let queues = queue.get_queues();
        assert_eq!(queues.len(), 1);
        assert_eq!(queues[0].name, "default");
        assert_eq!(queues[0].tasks_pending, 0);
    }

    #[test]
    fn test_with_queues() {
        let queue = MemoryTaskQueue::with_queues(["mail", "default", "reports"]);
        let names: Vec<_> = queue.get_queues().into_iter().map(|q| q.name).collect();
        assert_eq!(names, vec!["default", "mail", "reports"]);
    }

    #[test]
    fn test_add_generates_names_and_encodes_body() {
        let queue = MemoryTaskQueue::new();
        let first = queue
            .add("default", NewTask::new("/worker").param("a", "1").param("b", "2"))
            .unwrap();
        let second = queue.add("default", NewTask::new("/worker")).unwrap();

        assert_eq!(first.name, "task1");
        assert_eq!(second.name, "task2");
        assert_eq!(first.method, "POST");
        assert_eq!(first.body, STANDARD.encode("a=1&b=2"));
        assert_eq!(first.decode_body().unwrap(), b"a=1&b=2");
        assert_eq!(second.body, "");
    }

    #[test]
    fn test_payload_wins_over_params() {
        let queue = MemoryTaskQueue::new();
        let task = queue
            .add(
                "default",
                NewTask::new("/raw").payload("raw-bytes").param("ignored", "x"),
            )
            .unwrap();
        assert_eq!(task.decode_body().unwrap(), b"raw-bytes");
    }

    #[test]
    fn test_default_url_uses_queue_name() {
        let queue = MemoryTaskQueue::with_queues(["mail"]);
        let task = queue.add("mail", NewTask::for_queue_url()).unwrap();
        assert_eq!(task.url, "/_ah/queue/mail");
    }

    #[test]
    fn test_unknown_queue() {
        let queue = MemoryTaskQueue::new();
        assert!(matches!(
            queue.add("missing", NewTask::new("/x")),
            Err(TestbedError::UnknownQueue(_))
        ));
        assert!(queue.get_tasks("missing").is_err());
    }

    #[test]
    fn test_duplicate_name_rejected() {
        let queue = MemoryTaskQueue::new();
        queue.add("default", NewTask::new("/x").name("once")).unwrap();
        let result = queue.add("default", NewTask::new("/x").name("once"));
        assert!(matches!(result, Err(TestbedError::TaskAlreadyExists(_))));
    }

    #[test]
    fn test_eta_round_trips_through_format() {
        let queue = MemoryTaskQueue::new();
        let eta = NaiveDate::from_ymd_opt(2024, 3, 9)
            .unwrap()
            .and_hms_opt(17, 5, 0)
            .unwrap();
        let task = queue.add("default", NewTask::new("/later").eta(eta)).unwrap();
        assert_eq!(task.eta.as_deref(), Some("2024/03/09 17:05:00"));
        assert_eq!(task.eta_datetime().unwrap(), Some(eta));
    }

    #[test]
    fn test_bad_eta_is_an_error() {
        let task = Task {
            name: "t".into(),
            queue_name: "default".into(),
            url: "/".into(),
            method: "POST".into(),
            headers: vec![],
            body: String::new(),
            eta: Some("tomorrow".into()),
        };
        assert!(matches!(task.eta_datetime(), Err(TestbedError::InvalidEta(_))));
    }

    #[test]
    fn test_flush_queue() {
        let queue = MemoryTaskQueue::with_queues(["mail"]);
        queue.add("default", NewTask::new("/a")).unwrap();
        queue.add("mail", NewTask::new("/b")).unwrap();

        queue.flush_queue("default");
        queue.flush_queue("unknown");
        assert!(queue.get_tasks("default").unwrap().is_empty());
        assert_eq!(queue.get_tasks("mail").unwrap().len(), 1);
    }
}
