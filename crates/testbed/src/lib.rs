//! # testbed
//!
//! Per-test sandboxes over the emulated services in `testbed-stubs`, plus an
//! in-process HTTP sandbox for axum applications. Each sandbox resets the
//! shared state it owns when set up and offers assertion helpers that fail
//! the test with a descriptive message.
//!
//! ## Modules
//!
//! - [`base`] - The [`Sandbox`] trait and [`assert_length`]
//! - [`datastore`] - Entity store reset and query budgets
//! - [`memcache`] - Cache reset and statistics assertions
//! - [`mail`] - Outgoing mail capture and filtering
//! - [`taskqueue`] - Queue reset and decoded task listing
//! - [`client`] - [`TestClient`] for driving an axum `Router`
//! - [`web`] - [`WebSandbox`] and response assertions
//! - [`framework`] - [`UnitTestCase`] and [`FunctionalTestCase`] composites

pub mod base;
pub mod client;
pub mod datastore;
pub mod framework;
pub mod mail;
pub mod memcache;
pub mod taskqueue;
pub mod web;

pub use base::{assert_length, Measurable, Sandbox};
pub use client::{ExpectStatus, FormData, TestClient, TestResponse};
pub use datastore::{DatastoreSandbox, QueryBudget};
pub use framework::{FunctionalTestCase, UnitTestCase};
pub use mail::{MailFilter, MailSandbox};
pub use memcache::MemcacheSandbox;
pub use taskqueue::{parse_task_params, QueuedTask, TaskFilter, TaskQueueSandbox};
pub use web::WebSandbox;
