//! In-memory entity store.
//!
//! [`MemoryDatastore`] stores [`Entity`] values by [`Key`] and keeps a
//! per-operation history of how many calls were made since the last
//! [`clear`](DatastoreStub::clear). Sandboxes sum that history to count the
//! queries a test issued.
//!
//! ## Example
//!
//! ```
//! use testbed_stubs::datastore::{DatastoreStub, Entity, MemoryDatastore, Query};
//!
//! let store = MemoryDatastore::new();
//! store.put(Entity::new("Greeting").set("author", "ada"));
//!
//! let found = store.run_query(&Query::new("Greeting").filter("author", "ada"));
//! assert_eq!(found.len(), 1);
//! ```

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};

/// History label for [`DatastoreStub::put`].
pub const OP_PUT: &str = "Put";
/// History label for [`DatastoreStub::get`].
pub const OP_GET: &str = "Get";
/// History label for [`DatastoreStub::delete`].
pub const OP_DELETE: &str = "Delete";
/// History label for [`DatastoreStub::run_query`].
pub const OP_RUN_QUERY: &str = "RunQuery";
/// History label for [`DatastoreStub::count`].
pub const OP_COUNT: &str = "Count";

/// The identifying part of a [`Key`].
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum KeyId {
    /// A numeric id, allocated by the store for incomplete keys.
    Id(i64),
    /// An application-chosen key name.
    Name(String),
}

/// An entity key: a kind plus an optional id.
///
/// A key without an id is *incomplete*; [`DatastoreStub::put`] allocates one.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Key {
    /// The entity kind (the model name).
    pub kind: String,
    /// The id or name, `None` until the entity is stored.
    pub id: Option<KeyId>,
}

impl Key {
    /// Creates an incomplete key of the given kind.
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            id: None,
        }
    }

    /// Creates a key with a numeric id.
    pub fn with_id(kind: impl Into<String>, id: i64) -> Self {
        Self {
            kind: kind.into(),
            id: Some(KeyId::Id(id)),
        }
    }

    /// Creates a key with a name.
    pub fn with_name(kind: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            id: Some(KeyId::Name(name.into())),
        }
    }

    /// Returns `true` if the key has an id or name.
    pub const fn is_complete(&self) -> bool {
        self.id.is_some()
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.id {
            Some(KeyId::Id(id)) => write!(f, "{}({id})", self.kind),
            Some(KeyId::Name(name)) => write!(f, "{}('{name}')", self.kind),
            None => write!(f, "{}(<incomplete>)", self.kind),
        }
    }
}

/// A stored record: a key and a bag of JSON-valued properties.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    /// The entity key.
    pub key: Key,
    /// Property values by name.
    pub properties: BTreeMap<String, serde_json::Value>,
}

impl Entity {
    /// Creates an entity with an incomplete key of the given kind.
    pub fn new(kind: impl Into<String>) -> Self {
        Self::with_key(Key::new(kind))
    }

    /// Creates an entity with the given key.
    pub const fn with_key(key: Key) -> Self {
        Self {
            key,
            properties: BTreeMap::new(),
        }
    }

    /// Sets a property, returning the entity for chaining.
    #[must_use]
    pub fn set(mut self, name: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.properties.insert(name.into(), value.into());
        self
    }

    /// Returns a property value.
    pub fn get(&self, name: &str) -> Option<&serde_json::Value> {
        self.properties.get(name)
    }

    /// Returns the entity kind.
    pub fn kind(&self) -> &str {
        &self.key.kind
    }
}

/// A kind query with equality filters.
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    /// The kind to query.
    pub kind: String,
    /// `(property, value)` pairs that must all match.
    pub filters: Vec<(String, serde_json::Value)>,
}

impl Query {
    /// Creates a query over every entity of `kind`.
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            filters: Vec::new(),
        }
    }

    /// Adds an equality filter.
    #[must_use]
    pub fn filter(mut self, property: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.filters.push((property.into(), value.into()));
        self
    }

    /// Returns `true` if the entity satisfies this query.
    pub fn matches(&self, entity: &Entity) -> bool {
        entity.key.kind == self.kind
            && self
                .filters
                .iter()
                .all(|(name, value)| entity.get(name) == Some(value))
    }
}

/// The entity store service.
///
/// Implementations record every call in their query history, keyed by the
/// `OP_*` labels.
pub trait DatastoreStub: Send + Sync {
    /// Stores an entity, allocating an id for an incomplete key. Returns the
    /// complete key.
    fn put(&self, entity: Entity) -> Key;

    /// Fetches an entity by key.
    fn get(&self, key: &Key) -> Option<Entity>;

    /// Deletes an entity. Returns `true` if it existed.
    fn delete(&self, key: &Key) -> bool;

    /// Runs a query, returning matches ordered by key.
    fn run_query(&self, query: &Query) -> Vec<Entity>;

    /// Counts the entities matching a query.
    fn count(&self, query: &Query) -> usize;

    /// Administrative reset: removes every entity and empties the history.
    fn clear(&self);

    /// Returns the number of calls per operation kind since the last clear.
    fn query_history(&self) -> HashMap<String, u64>;
}

#[derive(Debug, Default)]
struct DatastoreState {
    entities: BTreeMap<Key, Entity>,
    next_id: i64,
    history: HashMap<String, u64>,
}

impl DatastoreState {
    fn record(&mut self, op: &str) {
        *self.history.entry(op.to_string()).or_insert(0) += 1;
    }
}

/// A thread-safe in-memory [`DatastoreStub`].
#[derive(Debug, Default)]
pub struct MemoryDatastore {
    state: Mutex<DatastoreState>,
}

impl MemoryDatastore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of stored entities without touching the history.
    pub fn len(&self) -> usize {
        self.lock().entities.len()
    }

    /// Returns `true` if nothing is stored.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, DatastoreState> {
        self.state.lock().expect("MemoryDatastore lock poisoned")
    }
}

impl DatastoreStub for MemoryDatastore {
    fn put(&self, mut entity: Entity) -> Key {
        let mut state = self.lock();
        state.record(OP_PUT);
        match entity.key.id {
            None => {
                state.next_id += 1;
                entity.key.id = Some(KeyId::Id(state.next_id));
            }
            // Allocated ids never collide with explicitly chosen ones.
            Some(KeyId::Id(id)) => state.next_id = state.next_id.max(id),
            Some(KeyId::Name(_)) => {}
        }
        let key = entity.key.clone();
        state.entities.insert(key.clone(), entity);
        key
    }

    fn get(&self, key: &Key) -> Option<Entity> {
        let mut state = self.lock();
        state.record(OP_GET);
        state.entities.get(key).cloned()
    }

    fn delete(&self, key: &Key) -> bool {
        let mut state = self.lock();
        state.record(OP_DELETE);
        state.entities.remove(key).is_some()
    }

    fn run_query(&self, query: &Query) -> Vec<Entity> {
        let mut state = self.lock();
        state.record(OP_RUN_QUERY);
        state
            .entities
            .values()
            .filter(|e| query.matches(e))
            .cloned()
            .collect()
    }

    fn count(&self, query: &Query) -> usize {
        let mut state = self.lock();
        state.record(OP_COUNT);
        state.entities.values().filter(|e| query.matches(e)).count()
    }

    fn clear(&self) {
        let mut state = self.lock();
        *state = DatastoreState::default();
        tracing::debug!("datastore cleared");
    }

    fn query_history(&self) -> HashMap<String, u64> {
        self.lock().history.clone()
    }
}

/// A query bound to the store it runs against.
///
/// This is what a model's `all()` returns: nothing runs until
/// [`fetch`](Self::fetch) or [`count`](Self::count) is called.
#[derive(Clone)]
pub struct BoundQuery {
    stub: Arc<dyn DatastoreStub>,
    query: Query,
}

impl BoundQuery {
    /// Binds a query to a store.
    pub fn new(stub: Arc<dyn DatastoreStub>, query: Query) -> Self {
        Self { stub, query }
    }

    /// Adds an equality filter.
    #[must_use]
    pub fn filter(mut self, property: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.query = self.query.filter(property, value);
        self
    }

    /// Runs the query.
    pub fn fetch(&self) -> Vec<Entity> {
        self.stub.run_query(&self.query)
    }

    /// Counts the matching entities with a single count query.
    pub fn count(&self) -> usize {
        self.stub.count(&self.query)
    }

    /// Returns the underlying query.
    pub const fn query(&self) -> &Query {
        &self.query
    }
}

impl fmt::Debug for BoundQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BoundQuery")
            .field("query", &self.query)
            .finish_non_exhaustive()
    }
}
