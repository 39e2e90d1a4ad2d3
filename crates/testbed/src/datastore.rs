//! Datastore sandbox and query counting.
//!
//! [`DatastoreSandbox`] empties the entity store at the start of each test,
//! which also zeroes the store's query history. [`DatastoreSandbox::query_count`]
//! sums that history, and [`QueryBudget`] fails the test when a scope runs
//! more queries than allowed.
//!
//! ## Example
//!
//! ```
//! use testbed::datastore::DatastoreSandbox;
//! use testbed_stubs::{Entity, ServiceRegistry};
//!
//! let services = ServiceRegistry::in_memory();
//! let sandbox = DatastoreSandbox::new(&services);
//!
//! {
//!     let _budget = sandbox.max_queries(2);
//!     services.datastore().put(Entity::new("Greeting"));
//!     assert_eq!(services.all("Greeting").count(), 1);
//! }
//! assert_eq!(sandbox.query_count(), 2);
//! ```

use std::sync::Arc;

use testbed_stubs::{BoundQuery, DatastoreStub, Query, ServiceRegistry};

use crate::base::Sandbox;

/// Keeps the entity store empty between tests and counts queries.
///
/// The stub is looked up in the registry on every call, so a datastore
/// registered after construction is the one cleared and counted.
#[derive(Clone)]
pub struct DatastoreSandbox {
    services: ServiceRegistry,
}

impl DatastoreSandbox {
    /// Binds to the registry's datastore and clears it.
    pub fn new(services: &ServiceRegistry) -> Self {
        let mut sandbox = Self {
            services: services.clone(),
        };
        sandbox.set_up();
        sandbox
    }

    /// Removes every entity. Usable mid-test; also zeroes the query count.
    pub fn clear_datastore(&self) {
        self.stub().clear();
    }

    /// The number of datastore operations run since the last clear.
    pub fn query_count(&self) -> usize {
        let total: u64 = self.stub().query_history().values().sum();
        usize::try_from(total).unwrap_or(usize::MAX)
    }

    /// Starts a measured region that fails the test if more than `limit`
    /// queries run before it ends.
    pub fn max_queries(&self, limit: usize) -> QueryBudget<'_> {
        QueryBudget::new(self, limit)
    }

    /// Runs `f` inside a [`QueryBudget`] of `limit` queries.
    ///
    /// # Panics
    ///
    /// Panics if `f` runs more than `limit` queries.
    pub fn with_max_queries<R>(&self, limit: usize, f: impl FnOnce() -> R) -> R {
        let budget = self.max_queries(limit);
        let result = f();
        budget.end();
        result
    }

    /// Asserts that exactly `expected` queries run during `f`.
    ///
    /// # Panics
    ///
    /// Panics if the number of queries does not match `expected`.
    pub fn assert_num_queries<R>(&self, expected: usize, f: impl FnOnce() -> R) -> R {
        let start = self.query_count();
        let result = f();
        let actual = self.query_count().saturating_sub(start);
        assert_eq!(
            actual, expected,
            "Expected {expected} queries, but {actual} were run"
        );
        result
    }

    /// A query over every entity of `kind`.
    pub fn all(&self, kind: &str) -> BoundQuery {
        BoundQuery::new(self.stub(), Query::new(kind))
    }

    /// The datastore currently registered.
    pub fn stub(&self) -> Arc<dyn DatastoreStub> {
        self.services.datastore()
    }
}

impl Sandbox for DatastoreSandbox {
    fn set_up(&mut self) {
        self.clear_datastore();
    }
}

/// A measured region of datastore activity.
///
/// Created by [`DatastoreSandbox::max_queries`]. The check runs once, when
/// the budget is ended explicitly or dropped, so leaving the scope early
/// still evaluates it. If the thread is already panicking the check is
/// skipped to keep the original failure.
#[must_use = "the query budget is checked when it is dropped"]
pub struct QueryBudget<'a> {
    sandbox: &'a DatastoreSandbox,
    limit: usize,
    start: usize,
    checked: bool,
}

impl<'a> QueryBudget<'a> {
    fn new(sandbox: &'a DatastoreSandbox, limit: usize) -> Self {
        Self {
            sandbox,
            limit,
            start: sandbox.query_count(),
            checked: false,
        }
    }

    /// Queries run since the budget started.
    pub fn used(&self) -> usize {
        self.sandbox.query_count().saturating_sub(self.start)
    }

    /// Ends the region and checks it.
    ///
    /// # Panics
    ///
    /// Panics if more than the allowed number of queries ran.
    pub fn end(mut self) {
        self.check();
    }

    fn check(&mut self) {
        if self.checked {
            return;
        }
        self.checked = true;
        let used = self.used();
        tracing::debug!(limit = self.limit, used, "query budget checked");
        assert!(
            used <= self.limit,
            "Too many queries run: expected {} (max) got {used}.",
            self.limit
        );
    }
}

impl Drop for QueryBudget<'_> {
    fn drop(&mut self) {
        if !std::thread::panicking() {
            self.check();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::base::assert_length;
    use testbed_stubs::{Entity, MemoryDatastore};

    #[test]
    fn test_new_clears_existing_entities() {
        let services = ServiceRegistry::in_memory();
        services.datastore().put(Entity::new("Greeting"));

        let sandbox = DatastoreSandbox::new(&services);
        assert_eq!(sandbox.query_count(), 0);
        assert_length(&sandbox.all("Greeting"), 0);
    }

    #[test]
    fn test_set_up_clears_replaced_datastore() {
        let services = ServiceRegistry::in_memory();
        let mut sandbox = DatastoreSandbox::new(&services);
        let replacement = Arc::new(MemoryDatastore::new());
        services.register_datastore(replacement.clone());
        replacement.put(Entity::new("Greeting"));
        assert_length(&sandbox.all("Greeting"), 1);

        sandbox.set_up();
        assert_eq!(replacement.len(), 0);
        assert_eq!(sandbox.query_count(), 0);
    }

    #[test]
    fn test_clear_datastore_mid_test() {
        let services = ServiceRegistry::in_memory();
        let sandbox = DatastoreSandbox::new(&services);

        services.datastore().put(Entity::new("Greeting").set("text", "hi"));
        assert_length(&sandbox.all("Greeting"), 1);

        sandbox.clear_datastore();
        assert_length(&sandbox.all("Greeting"), 0);
    }

    #[test]
    fn test_query_count_tracks_operations() {
        let services = ServiceRegistry::in_memory();
        let sandbox = DatastoreSandbox::new(&services);
        assert_eq!(sandbox.query_count(), 0);

        services.datastore().put(Entity::new("Greeting"));
        sandbox.all("Greeting").fetch();
        assert!(sandbox.query_count() >= 1);
        assert_eq!(sandbox.query_count(), 2);
    }

    #[test]
    fn test_set_up_resets_query_count() {
        let services = ServiceRegistry::in_memory();
        let mut sandbox = DatastoreSandbox::new(&services);
        services.datastore().put(Entity::new("Greeting"));

        sandbox.set_up();
        assert_eq!(sandbox.query_count(), 0);
    }

    #[test]
    fn test_budget_within_limit() {
        let services = ServiceRegistry::in_memory();
        let sandbox = DatastoreSandbox::new(&services);

        let budget = sandbox.max_queries(2);
        services.datastore().put(Entity::new("Greeting"));
        assert_eq!(budget.used(), 1);
        budget.end();
    }

    #[test]
    fn test_budget_only_counts_its_region() {
        let services = ServiceRegistry::in_memory();
        let sandbox = DatastoreSandbox::new(&services);
        services.datastore().put(Entity::new("Greeting"));
        services.datastore().put(Entity::new("Greeting"));

        sandbox.with_max_queries(1, || {
            sandbox.all("Greeting").count();
        });
    }

    #[test]
    #[should_panic(expected = "Too many queries run: expected 1 (max) got 2.")]
    fn test_budget_exceeded_on_drop() {
        let services = ServiceRegistry::in_memory();
        let sandbox = DatastoreSandbox::new(&services);

        let _budget = sandbox.max_queries(1);
        services.datastore().put(Entity::new("Greeting"));
        services.datastore().put(Entity::new("Greeting"));
    }

    #[test]
    #[should_panic(expected = "Too many queries run: expected 0 (max) got 1.")]
    fn test_budget_exceeded_with_closure() {
        let services = ServiceRegistry::in_memory();
        let sandbox = DatastoreSandbox::new(&services);

        sandbox.with_max_queries(0, || {
            services.datastore().put(Entity::new("Greeting"));
        });
    }

    #[test]
    #[should_panic(expected = "original failure")]
    fn test_budget_does_not_mask_panics() {
        let services = ServiceRegistry::in_memory();
        let sandbox = DatastoreSandbox::new(&services);

        let _budget = sandbox.max_queries(0);
        services.datastore().put(Entity::new("Greeting"));
        panic!("original failure");
    }

    #[test]
    fn test_assert_num_queries_passes() {
        let services = ServiceRegistry::in_memory();
        let sandbox = DatastoreSandbox::new(&services);

        let key = sandbox.assert_num_queries(1, || services.datastore().put(Entity::new("Note")));
        assert!(key.is_complete());
    }

    #[test]
    #[should_panic(expected = "Expected 3 queries, but 1 were run")]
    fn test_assert_num_queries_fails() {
        let services = ServiceRegistry::in_memory();
        let sandbox = DatastoreSandbox::new(&services);

        sandbox.assert_num_queries(3, || {
            services.datastore().put(Entity::new("Note"));
        });
    }
}
