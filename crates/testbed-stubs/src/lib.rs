//! # testbed-stubs
//!
//! In-process emulations of the hosted platform services a testbed sandbox
//! resets and inspects. Each service is a trait with an in-memory
//! implementation; [`ServiceRegistry`] hands out the current stub for each
//! service.
//!
//! ## Modules
//!
//! - [`datastore`] - Entity store with per-operation query history
//! - [`memcache`] - Cache with hit/item statistics
//! - [`mail`] - Outbound mail gate with observer registration
//! - [`taskqueue`] - Named push queues holding base64-encoded task bodies
//! - [`registry`] - Service lookup shared by sandboxes and code under test

pub mod datastore;
pub mod mail;
pub mod memcache;
pub mod registry;
pub mod taskqueue;

pub use datastore::{BoundQuery, DatastoreStub, Entity, Key, KeyId, MemoryDatastore, Query};
pub use mail::{MailMessage, MailObserver, MailStub, MemoryMailService, ObserverId};
pub use memcache::{CacheStats, CacheValue, MemcacheStub, MemoryMemcache};
pub use registry::ServiceRegistry;
pub use taskqueue::{MemoryTaskQueue, NewTask, QueueInfo, Task, TaskQueueStub, TASK_ETA_FORMAT};
