//! Room store capability
//!
//! A keyed document store with live subscriptions and atomic multi-document
//! batches. Documents live at slash-separated paths (`rooms/r1/players/u1`);
//! a collection is a document path without its last segment.

mod memory;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use tokio::sync::watch;

pub use memory::MemoryStore;

/// Result type for store operations
pub type StoreResult<T> = Result<T, StoreError>;

/// Raw document body
pub type Document = serde_json::Map<String, Value>;

/// Errors that can occur during store operations
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("document not found: {0}")]
    NotFound(DocPath),

    #[error("document already exists: {0}")]
    AlreadyExists(DocPath),

    #[error("field `{field}` of {path} is not a list")]
    NotAList { path: DocPath, field: String },

    #[error("failed to encode document")]
    Encode(#[source] serde_json::Error),

    #[error("failed to decode {path}")]
    Decode {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Path of a single document
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DocPath(String);

impl DocPath {
    pub fn new(path: impl Into<String>) -> Self {
        Self(path.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Last path segment
    pub fn id(&self) -> &str {
        self.0.rsplit('/').next().unwrap_or(&self.0)
    }

    /// Collection containing this document (empty for top-level documents)
    pub fn parent(&self) -> CollectionPath {
        match self.0.rfind('/') {
            Some(idx) => CollectionPath(self.0[..idx].to_string()),
            None => CollectionPath(String::new()),
        }
    }

    /// Sub-collection nested under this document
    pub fn collection(&self, name: &str) -> CollectionPath {
        CollectionPath(format!("{}/{}", self.0, name))
    }
}

impl fmt::Display for DocPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Path of a collection of documents
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CollectionPath(String);

impl CollectionPath {
    pub fn new(path: impl Into<String>) -> Self {
        Self(path.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn doc(&self, id: &str) -> DocPath {
        DocPath(format!("{}/{}", self.0, id))
    }
}

impl fmt::Display for CollectionPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Value written to a single field
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Value(Value),
    /// Replaced by the store clock (epoch millis) when the write is applied
    ServerTimestamp,
    /// Appended to the existing list atomically; duplicates are kept
    Append(Vec<Value>),
}

/// Set of top-level fields carried by a write
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Fields(BTreeMap<String, FieldValue>);

impl Fields {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn value(mut self, key: &str, value: Value) -> Self {
        self.0.insert(key.to_string(), FieldValue::Value(value));
        self
    }

    pub fn server_timestamp(mut self, key: &str) -> Self {
        self.0.insert(key.to_string(), FieldValue::ServerTimestamp);
        self
    }

    pub fn append(mut self, key: &str, values: Vec<Value>) -> Self {
        self.0.insert(key.to_string(), FieldValue::Append(values));
        self
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &FieldValue)> {
        self.0.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// A single write inside a batch
#[derive(Debug, Clone, PartialEq)]
pub enum Write {
    /// Fails with `AlreadyExists` if the document is present
    Create { path: DocPath, fields: Fields },
    /// Replaces the whole document
    Set { path: DocPath, fields: Fields },
    /// Creates the document or merges the given top-level fields into it
    Merge { path: DocPath, fields: Fields },
    /// Fails with `NotFound` if the document is absent
    Update { path: DocPath, fields: Fields },
    /// Deleting an absent document is not an error
    Delete { path: DocPath },
}

impl Write {
    pub fn path(&self) -> &DocPath {
        match self {
            Write::Create { path, .. }
            | Write::Set { path, .. }
            | Write::Merge { path, .. }
            | Write::Update { path, .. }
            | Write::Delete { path } => path,
        }
    }
}

/// Ordered list of writes applied all-or-nothing
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WriteBatch {
    writes: Vec<Write>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create(mut self, path: DocPath, fields: Fields) -> Self {
        self.writes.push(Write::Create { path, fields });
        self
    }

    pub fn set(mut self, path: DocPath, fields: Fields) -> Self {
        self.writes.push(Write::Set { path, fields });
        self
    }

    pub fn merge(mut self, path: DocPath, fields: Fields) -> Self {
        self.writes.push(Write::Merge { path, fields });
        self
    }

    pub fn update(mut self, path: DocPath, fields: Fields) -> Self {
        self.writes.push(Write::Update { path, fields });
        self
    }

    pub fn delete(mut self, path: DocPath) -> Self {
        self.writes.push(Write::Delete { path });
        self
    }

    pub fn len(&self) -> usize {
        self.writes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.writes.is_empty()
    }

    pub fn into_writes(self) -> Vec<Write> {
        self.writes
    }
}

/// Query over one collection, optionally ordered ascending by a field
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Query {
    pub collection: CollectionPath,
    pub order_by: Option<String>,
}

impl Query {
    pub fn collection(collection: CollectionPath) -> Self {
        Self {
            collection,
            order_by: None,
        }
    }

    pub fn order_by(mut self, field: &str) -> Self {
        self.order_by = Some(field.to_string());
        self
    }
}

/// Stored document as observed by a reader
#[derive(Debug, Clone, PartialEq)]
pub struct DocumentSnapshot {
    pub path: DocPath,
    pub data: Document,
    /// Store-assigned insertion sequence, fixed when the document is created
    pub seq: u64,
}

impl DocumentSnapshot {
    pub fn id(&self) -> &str {
        self.path.id()
    }

    pub fn decode<T: DeserializeOwned>(&self) -> StoreResult<T> {
        serde_json::from_value(Value::Object(self.data.clone())).map_err(|source| {
            StoreError::Decode {
                path: self.path.to_string(),
                source,
            }
        })
    }
}

/// Trait that all room store backends must implement
#[async_trait]
pub trait RoomStore: Send + Sync {
    /// Read one document
    async fn get(&self, path: &DocPath) -> StoreResult<Option<DocumentSnapshot>>;

    /// Read all documents of a collection
    async fn query(&self, query: &Query) -> StoreResult<Vec<DocumentSnapshot>>;

    /// Apply a batch atomically
    async fn commit(&self, batch: WriteBatch) -> StoreResult<()>;

    /// Live view of a single document, refreshed after every write touching it
    async fn watch_document(&self, path: &DocPath) -> watch::Receiver<Option<DocumentSnapshot>>;

    /// Live view of a query, refreshed after every write to the collection
    async fn watch_query(&self, query: &Query) -> watch::Receiver<Vec<DocumentSnapshot>>;

    async fn set(&self, path: &DocPath, fields: Fields) -> StoreResult<()> {
        self.commit(WriteBatch::new().set(path.clone(), fields))
            .await
    }

    async fn merge(&self, path: &DocPath, fields: Fields) -> StoreResult<()> {
        self.commit(WriteBatch::new().merge(path.clone(), fields))
            .await
    }

    async fn update(&self, path: &DocPath, fields: Fields) -> StoreResult<()> {
        self.commit(WriteBatch::new().update(path.clone(), fields))
            .await
    }

    async fn delete(&self, path: &DocPath) -> StoreResult<()> {
        self.commit(WriteBatch::new().delete(path.clone())).await
    }
}
