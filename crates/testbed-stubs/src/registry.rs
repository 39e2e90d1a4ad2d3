//! Service lookup.
//!
//! [`ServiceRegistry`] is the single place code under test and sandboxes ask
//! for "the current stub for service X". Replacing a stub through one handle
//! is visible through every clone of that registry.
//!
//! ## Example
//!
//! ```
//! use testbed_stubs::registry::ServiceRegistry;
//! use testbed_stubs::memcache::CacheValue;
//!
//! let services = ServiceRegistry::in_memory();
//! services.memcache().set("k", CacheValue::from("v"), None);
//! assert_eq!(services.memcache().get_stats().items, 1);
//! ```

use std::fmt;
use std::sync::{Arc, RwLock};

use testbed_core::Settings;

use crate::datastore::{BoundQuery, DatastoreStub, MemoryDatastore, Query};
use crate::mail::{MailStub, MemoryMailService};
use crate::memcache::{MemcacheStub, MemoryMemcache};
use crate::taskqueue::{MemoryTaskQueue, TaskQueueStub};

struct Services {
    datastore: Arc<dyn DatastoreStub>,
    memcache: Arc<dyn MemcacheStub>,
    mail: Arc<dyn MailStub>,
    taskqueue: Arc<dyn TaskQueueStub>,
}

/// The set of service stubs visible to one test.
#[derive(Clone)]
pub struct ServiceRegistry {
    services: Arc<RwLock<Services>>,
}

impl Default for ServiceRegistry {
    fn default() -> Self {
        Self::in_memory()
    }
}

impl ServiceRegistry {
    /// Creates a registry backed by fresh in-memory stubs.
    pub fn in_memory() -> Self {
        Self::from_settings(&Settings::default())
    }

    /// Creates a registry backed by fresh in-memory stubs, with the task
    /// queues named in `settings.task_queues`.
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            services: Arc::new(RwLock::new(Services {
                datastore: Arc::new(MemoryDatastore::new()),
                memcache: Arc::new(MemoryMemcache::new()),
                mail: Arc::new(MemoryMailService::new()),
                taskqueue: Arc::new(MemoryTaskQueue::with_queues(
                    settings.task_queues.iter().cloned(),
                )),
            })),
        }
    }

    /// Returns the current datastore stub.
    pub fn datastore(&self) -> Arc<dyn DatastoreStub> {
        Arc::clone(&self.read().datastore)
    }

    /// Returns the current memcache stub.
    pub fn memcache(&self) -> Arc<dyn MemcacheStub> {
        Arc::clone(&self.read().memcache)
    }

    /// Returns the current mail stub.
    pub fn mail(&self) -> Arc<dyn MailStub> {
        Arc::clone(&self.read().mail)
    }

    /// Returns the current task queue stub.
    pub fn taskqueue(&self) -> Arc<dyn TaskQueueStub> {
        Arc::clone(&self.read().taskqueue)
    }

    /// Replaces the datastore stub.
    pub fn register_datastore(&self, stub: Arc<dyn DatastoreStub>) {
        self.write().datastore = stub;
        tracing::debug!(service = "datastore", "stub registered");
    }

    /// Replaces the memcache stub.
    pub fn register_memcache(&self, stub: Arc<dyn MemcacheStub>) {
        self.write().memcache = stub;
        tracing::debug!(service = "memcache", "stub registered");
    }

    /// Replaces the mail stub.
    pub fn register_mail(&self, stub: Arc<dyn MailStub>) {
        self.write().mail = stub;
        tracing::debug!(service = "mail", "stub registered");
    }

    /// Replaces the task queue stub.
    pub fn register_taskqueue(&self, stub: Arc<dyn TaskQueueStub>) {
        self.write().taskqueue = stub;
        tracing::debug!(service = "taskqueue", "stub registered");
    }

    /// A query over every entity of `kind` in the current datastore.
    pub fn all(&self, kind: &str) -> BoundQuery {
        BoundQuery::new(self.datastore(), Query::new(kind))
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Services> {
        self.services.read().expect("service registry lock poisoned")
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, Services> {
        self.services.write().expect("service registry lock poisoned")
    }
}

impl fmt::Debug for ServiceRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceRegistry").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datastore::Entity;
    use crate::mail::MailMessage;
    use crate::memcache::CacheValue;
    use crate::taskqueue::NewTask;

    #[test]
    fn test_in_memory_registry_has_default_queue() {
        let services = ServiceRegistry::in_memory();
        let names: Vec<_> = services
            .taskqueue()
            .get_queues()
            .into_iter()
            .map(|q| q.name)
            .collect();
        assert_eq!(names, vec!["default"]);
    }

    #[test]
    fn test_from_settings_creates_queues() {
        let settings = Settings {
            task_queues: vec!["mail".into(), "reports".into()],
            ..Settings::default()
        };
        let services = ServiceRegistry::from_settings(&settings);
        assert_eq!(services.taskqueue().get_queues().len(), 3);
    }

    #[test]
    fn test_clones_share_stubs() {
        let services = ServiceRegistry::in_memory();
        let other = services.clone();
        services.datastore().put(Entity::new("Greeting"));
        assert_eq!(other.all("Greeting").count(), 1);
    }

    #[test]
    fn test_register_replaces_for_every_clone() {
        let services = ServiceRegistry::in_memory();
        let other = services.clone();
        services.memcache().set("k", CacheValue::from("v"), None);

        services.register_memcache(Arc::new(MemoryMemcache::new()));
        assert_eq!(other.memcache().get_stats().items, 0);
    }

    #[test]
    fn test_each_service_is_usable() {
        let services = ServiceRegistry::in_memory();
        services
            .mail()
            .send(MailMessage::new("a@example.org", "b@example.org", "s", "b"))
            .unwrap();
        services
            .taskqueue()
            .add("default", NewTask::new("/work"))
            .unwrap();
        assert_eq!(services.taskqueue().get_tasks("default").unwrap().len(), 1);

        services.register_datastore(Arc::new(MemoryDatastore::new()));
        services.register_mail(Arc::new(MemoryMailService::new()));
        services.register_taskqueue(Arc::new(MemoryTaskQueue::new()));
        assert!(services.taskqueue().get_tasks("default").unwrap().is_empty());
    }
}
