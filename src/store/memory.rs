use super::{
    DocPath, Document, DocumentSnapshot, FieldValue, Fields, Query, RoomStore, StoreError,
    StoreResult, Write, WriteBatch,
};
use async_trait::async_trait;
use serde_json::Value;
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex, RwLock};

/// In-process document store
///
/// Watchers are refreshed after every committed batch. With a non-zero
/// propagation delay the refresh is delivered late and reflects whatever the
/// store holds at delivery time, which mimics a hosted store's eventual
/// fan-out to other clients.
#[derive(Clone)]
pub struct MemoryStore {
    inner: Arc<Inner>,
}

struct Inner {
    docs: RwLock<BTreeMap<DocPath, DocumentSnapshot>>,
    next_seq: AtomicU64,
    doc_watchers: Mutex<HashMap<DocPath, watch::Sender<Option<DocumentSnapshot>>>>,
    query_watchers: Mutex<HashMap<Query, watch::Sender<Vec<DocumentSnapshot>>>>,
    propagation_delay: Duration,
    available: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::with_propagation_delay(Duration::ZERO)
    }

    pub fn with_propagation_delay(propagation_delay: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                docs: RwLock::new(BTreeMap::new()),
                next_seq: AtomicU64::new(1),
                doc_watchers: Mutex::new(HashMap::new()),
                query_watchers: Mutex::new(HashMap::new()),
                propagation_delay,
                available: AtomicBool::new(true),
            }),
        }
    }

    /// Toggle write availability; while unavailable every commit fails
    pub fn set_available(&self, available: bool) {
        self.inner
            .available
            .store(available, std::sync::atomic::Ordering::SeqCst);
    }

    pub fn is_available(&self) -> bool {
        self.inner
            .available
            .load(std::sync::atomic::Ordering::SeqCst)
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.docs.read().await.is_empty()
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl Inner {
    fn allocate_seq(&self) -> u64 {
        self.next_seq
            .fetch_add(1, std::sync::atomic::Ordering::SeqCst)
    }

    /// Push fresh values to every watcher interested in the touched paths
    ///
    /// Lock order is always a watcher map first, then `docs`, matching
    /// `watch_document` and `watch_query`.
    async fn publish(&self, touched: &[DocPath]) {
        {
            let mut watchers = self.doc_watchers.lock().await;
            watchers.retain(|_, tx| !tx.is_closed());
            let docs = self.docs.read().await;
            for path in touched {
                if let Some(tx) = watchers.get(path) {
                    let current = docs.get(path).cloned();
                    tx.send_if_modified(|value| replace_if_changed(value, current));
                }
            }
        }

        let mut watchers = self.query_watchers.lock().await;
        watchers.retain(|_, tx| !tx.is_closed());
        let docs = self.docs.read().await;
        for (query, tx) in watchers.iter() {
            if touched.iter().any(|p| p.parent() == query.collection) {
                let current = run_query(&docs, query);
                tx.send_if_modified(|value| replace_if_changed(value, current));
            }
        }
    }
}

fn replace_if_changed<T: PartialEq>(slot: &mut T, next: T) -> bool {
    if *slot == next {
        false
    } else {
        *slot = next;
        true
    }
}

#[async_trait]
impl RoomStore for MemoryStore {
    async fn get(&self, path: &DocPath) -> StoreResult<Option<DocumentSnapshot>> {
        Ok(self.inner.docs.read().await.get(path).cloned())
    }

    async fn query(&self, query: &Query) -> StoreResult<Vec<DocumentSnapshot>> {
        Ok(run_query(&*self.inner.docs.read().await, query))
    }

    async fn commit(&self, batch: WriteBatch) -> StoreResult<()> {
        if !self.is_available() {
            return Err(StoreError::Unavailable(
                "writes are currently rejected".to_string(),
            ));
        }
        if batch.is_empty() {
            return Ok(());
        }

        let now = chrono::Utc::now().timestamp_millis();
        let touched = {
            let mut docs = self.inner.docs.write().await;

            // Stage every write first so a failure leaves the store untouched
            let mut staged: BTreeMap<DocPath, Option<DocumentSnapshot>> = BTreeMap::new();
            for write in batch.into_writes() {
                let path = write.path().clone();
                let current = match staged.get(&path) {
                    Some(pending) => pending.clone(),
                    None => docs.get(&path).cloned(),
                };
                let next = apply_write(&self.inner, current, write, now)?;
                staged.insert(path, next);
            }

            let touched: Vec<DocPath> = staged.keys().cloned().collect();
            for (path, doc) in staged {
                match doc {
                    Some(doc) => {
                        docs.insert(path, doc);
                    }
                    None => {
                        docs.remove(&path);
                    }
                }
            }
            touched
        };

        let delay = self.inner.propagation_delay;
        if delay.is_zero() {
            self.inner.publish(&touched).await;
        } else {
            let inner = self.inner.clone();
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                inner.publish(&touched).await;
            });
        }

        Ok(())
    }

    async fn watch_document(&self, path: &DocPath) -> watch::Receiver<Option<DocumentSnapshot>> {
        let mut watchers = self.inner.doc_watchers.lock().await;
        if let Some(tx) = watchers.get(path) {
            if !tx.is_closed() {
                return tx.subscribe();
            }
        }

        let current = self.inner.docs.read().await.get(path).cloned();
        let (tx, rx) = watch::channel(current);
        watchers.insert(path.clone(), tx);
        rx
    }

    async fn watch_query(&self, query: &Query) -> watch::Receiver<Vec<DocumentSnapshot>> {
        let mut watchers = self.inner.query_watchers.lock().await;
        if let Some(tx) = watchers.get(query) {
            if !tx.is_closed() {
                return tx.subscribe();
            }
        }

        let current = run_query(&*self.inner.docs.read().await, query);
        let (tx, rx) = watch::channel(current);
        watchers.insert(query.clone(), tx);
        rx
    }
}

/// Compute the document that results from one write
fn apply_write(
    inner: &Inner,
    current: Option<DocumentSnapshot>,
    write: Write,
    now: i64,
) -> StoreResult<Option<DocumentSnapshot>> {
    match write {
        Write::Create { path, fields } => {
            if current.is_some() {
                return Err(StoreError::AlreadyExists(path));
            }
            let data = apply_fields(&path, Document::new(), &fields, now)?;
            Ok(Some(DocumentSnapshot {
                path,
                data,
                seq: inner.allocate_seq(),
            }))
        }
        Write::Set { path, fields } => {
            let seq = current
                .as_ref()
                .map(|d| d.seq)
                .unwrap_or_else(|| inner.allocate_seq());
            let data = apply_fields(&path, Document::new(), &fields, now)?;
            Ok(Some(DocumentSnapshot { path, data, seq }))
        }
        Write::Merge { path, fields } => {
            let (base, seq) = match current {
                Some(doc) => (doc.data, doc.seq),
                None => (Document::new(), inner.allocate_seq()),
            };
            let data = apply_fields(&path, base, &fields, now)?;
            Ok(Some(DocumentSnapshot { path, data, seq }))
        }
        Write::Update { path, fields } => {
            let Some(doc) = current else {
                return Err(StoreError::NotFound(path));
            };
            let data = apply_fields(&path, doc.data, &fields, now)?;
            Ok(Some(DocumentSnapshot {
                path,
                data,
                seq: doc.seq,
            }))
        }
        Write::Delete { .. } => Ok(None),
    }
}

fn apply_fields(
    path: &DocPath,
    mut data: Document,
    fields: &Fields,
    now: i64,
) -> StoreResult<Document> {
    for (key, value) in fields.iter() {
        match value {
            FieldValue::Value(v) => {
                data.insert(key.clone(), v.clone());
            }
            FieldValue::ServerTimestamp => {
                data.insert(key.clone(), Value::from(now));
            }
            FieldValue::Append(values) => match data.get_mut(key) {
                Some(Value::Array(list)) => list.extend(values.iter().cloned()),
                None | Some(Value::Null) => {
                    data.insert(key.clone(), Value::Array(values.clone()));
                }
                Some(_) => {
                    return Err(StoreError::NotAList {
                        path: path.clone(),
                        field: key.clone(),
                    })
                }
            },
        }
    }
    Ok(data)
}

fn run_query(docs: &BTreeMap<DocPath, DocumentSnapshot>, query: &Query) -> Vec<DocumentSnapshot> {
    let mut result: Vec<DocumentSnapshot> = docs
        .values()
        .filter(|doc| doc.path.parent() == query.collection)
        .cloned()
        .collect();

    match &query.order_by {
        Some(field) => result.sort_by(|a, b| {
            compare_field(a.data.get(field), b.data.get(field)).then(a.seq.cmp(&b.seq))
        }),
        None => result.sort_by_key(|doc| doc.seq),
    }
    result
}

/// Missing and null sort first, then booleans, numbers, strings
fn compare_field(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    fn rank(v: Option<&Value>) -> u8 {
        match v {
            None | Some(Value::Null) => 0,
            Some(Value::Bool(_)) => 1,
            Some(Value::Number(_)) => 2,
            Some(Value::String(_)) => 3,
            Some(_) => 4,
        }
    }

    match (a, b) {
        (Some(Value::Bool(x)), Some(Value::Bool(y))) => x.cmp(y),
        (Some(Value::Number(x)), Some(Value::Number(y))) => {
            let x = x.as_f64().unwrap_or(0.0);
            let y = y.as_f64().unwrap_or(0.0);
            x.partial_cmp(&y).unwrap_or(Ordering::Equal)
        }
        (Some(Value::String(x)), Some(Value::String(y))) => x.cmp(y),
        _ => rank(a).cmp(&rank(b)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::CollectionPath;
    use serde_json::json;

    fn players() -> CollectionPath {
        CollectionPath::new("rooms/r1/players")
    }

    #[tokio::test]
    async fn test_merge_preserves_unspecified_fields() {
        let store = MemoryStore::new();
        let path = players().doc("u1");

        store
            .merge(
                &path,
                Fields::new()
                    .value("name", json!("Alice"))
                    .value("vote", json!("5")),
            )
            .await
            .unwrap();
        store
            .merge(&path, Fields::new().value("name", json!("Alicia")))
            .await
            .unwrap();

        let doc = store.get(&path).await.unwrap().unwrap();
        assert_eq!(doc.data["name"], "Alicia");
        assert_eq!(doc.data["vote"], "5");
    }

    #[tokio::test]
    async fn test_update_missing_document_fails() {
        let store = MemoryStore::new();
        let result = store
            .update(&players().doc("ghost"), Fields::new().value("vote", json!("3")))
            .await;

        assert!(matches!(result, Err(StoreError::NotFound(_))));
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_create_rejects_existing_document() {
        let store = MemoryStore::new();
        let path = DocPath::new("rooms/r1");

        store
            .commit(WriteBatch::new().create(path.clone(), Fields::new().value("adminId", json!("a"))))
            .await
            .unwrap();
        let second = store
            .commit(WriteBatch::new().create(path.clone(), Fields::new().value("adminId", json!("b"))))
            .await;

        assert!(matches!(second, Err(StoreError::AlreadyExists(_))));
        let doc = store.get(&path).await.unwrap().unwrap();
        assert_eq!(doc.data["adminId"], "a");
    }

    #[tokio::test]
    async fn test_failed_batch_applies_nothing() {
        let store = MemoryStore::new();
        let batch = WriteBatch::new()
            .set(players().doc("u1"), Fields::new().value("name", json!("Alice")))
            .update(players().doc("missing"), Fields::new().value("vote", Value::Null));

        assert!(store.commit(batch).await.is_err());
        assert!(store.get(&players().doc("u1")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_delete_absent_document_is_ok() {
        let store = MemoryStore::new();
        assert!(store.delete(&players().doc("nobody")).await.is_ok());
    }

    #[tokio::test]
    async fn test_append_is_cumulative() {
        let store = MemoryStore::new();
        let path = DocPath::new("rooms/r1/chat/m1");
        store
            .set(&path, Fields::new().value("reactions", json!([])))
            .await
            .unwrap();

        for emoji in ["😺", "😺", "🐟"] {
            store
                .update(
                    &path,
                    Fields::new().append("reactions", vec![json!({"sender": "Bob", "emoji": emoji})]),
                )
                .await
                .unwrap();
        }

        let doc = store.get(&path).await.unwrap().unwrap();
        assert_eq!(doc.data["reactions"].as_array().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_append_to_scalar_fails() {
        let store = MemoryStore::new();
        let path = DocPath::new("rooms/r1/chat/m1");
        store
            .set(&path, Fields::new().value("reactions", json!("oops")))
            .await
            .unwrap();

        let result = store
            .update(&path, Fields::new().append("reactions", vec![json!(1)]))
            .await;
        assert!(matches!(result, Err(StoreError::NotAList { .. })));
    }

    #[tokio::test]
    async fn test_query_orders_by_field_then_insertion() {
        let store = MemoryStore::new();
        let chat = CollectionPath::new("rooms/r1/chat");
        store.set(&chat.doc("c"), Fields::new().value("timestamp", json!(20))).await.unwrap();
        store.set(&chat.doc("a"), Fields::new().value("timestamp", json!(10))).await.unwrap();
        store.set(&chat.doc("b"), Fields::new().value("timestamp", json!(10))).await.unwrap();
        store
            .set(&DocPath::new("rooms/r1/chat/a/nested/x"), Fields::new())
            .await
            .unwrap();

        let docs = store
            .query(&Query::collection(chat).order_by("timestamp"))
            .await
            .unwrap();
        let ids: Vec<_> = docs.iter().map(|d| d.id().to_string()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn test_server_timestamp_is_filled() {
        let store = MemoryStore::new();
        let path = DocPath::new("rooms/r1");
        store
            .set(&path, Fields::new().server_timestamp("createdAt"))
            .await
            .unwrap();

        let doc = store.get(&path).await.unwrap().unwrap();
        assert!(doc.data["createdAt"].as_i64().unwrap() > 0);
    }

    #[tokio::test]
    async fn test_unavailable_store_rejects_writes() {
        let store = MemoryStore::new();
        store.set_available(false);

        let result = store.set(&DocPath::new("rooms/r1"), Fields::new()).await;
        assert!(matches!(result, Err(StoreError::Unavailable(_))));

        store.set_available(true);
        assert!(store.set(&DocPath::new("rooms/r1"), Fields::new()).await.is_ok());
    }

    #[tokio::test]
    async fn test_watch_query_sees_batch_at_once() {
        let store = MemoryStore::new();
        let query = Query::collection(players());
        let mut rx = store.watch_query(&query).await;
        assert!(rx.borrow_and_update().is_empty());

        store
            .commit(
                WriteBatch::new()
                    .set(players().doc("u1"), Fields::new())
                    .set(players().doc("u2"), Fields::new()),
            )
            .await
            .unwrap();

        rx.changed().await.unwrap();
        assert_eq!(rx.borrow_and_update().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_propagation_delay_defers_watchers() {
        let store = MemoryStore::with_propagation_delay(Duration::from_millis(200));
        let path = players().doc("u1");
        let rx = store.watch_document(&path).await;

        store.set(&path, Fields::new()).await.unwrap();

        // Reads see the write immediately, watchers only after the delay
        assert!(store.get(&path).await.unwrap().is_some());
        assert!(rx.borrow().is_none());

        tokio::time::sleep(Duration::from_millis(250)).await;
        assert!(rx.borrow().is_some());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_writes_and_new_watchers_make_progress() {
        let store = MemoryStore::new();
        let mut tasks = Vec::new();

        for writer in 0..2 {
            let store = store.clone();
            tasks.push(tokio::spawn(async move {
                for i in 0..500 {
                    let path = players().doc(&format!("u{}", i % 5));
                    store
                        .set(&path, Fields::new().value("writer", json!(writer)))
                        .await
                        .unwrap();
                }
            }));
        }
        for _ in 0..2 {
            let store = store.clone();
            tasks.push(tokio::spawn(async move {
                for i in 0..500 {
                    let query = Query::collection(players());
                    let _players = store.watch_query(&query).await;
                    let _doc = store.watch_document(&players().doc(&format!("u{}", i % 5))).await;
                }
            }));
        }

        let all = futures::future::join_all(tasks);
        let results = tokio::time::timeout(Duration::from_secs(20), all)
            .await
            .expect("writers and watchers stalled");
        assert!(results.iter().all(|r| r.is_ok()));
        assert_eq!(
            store.query(&Query::collection(players())).await.unwrap().len(),
            5
        );
    }
}
