//! Keyed async data.
//!
//! An [`AsyncDataCache`] maps operation keys to entries that remember the
//! last result of a fetch. Callers asking for an existing key share its
//! entry instead of fetching again.
//!
//! An entry only ever holds results fetched with its own variables. A view
//! whose variables come from a getter moves to the entry of the current
//! variables each time it fetches.

use crate::context::OperationContext;
use crate::error::{ClientError, ClientResult, ErrorCode, ResultExt};
use crate::key::OperationKey;
use dashmap::DashMap;
use futures_util::future::BoxFuture;
use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::fmt;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{watch, Mutex};
use tracing::debug;

/// Produces one fetch of an entry.
pub type Thunk = Arc<dyn Fn() -> BoxFuture<'static, ClientResult<Value>> + Send + Sync>;

/// Reads the current variables and returns their key with a fetch bound to
/// them.
pub type Resolver = Arc<dyn Fn() -> ClientResult<(OperationKey, Thunk)> + Send + Sync>;

/// Where an entry is in its fetch cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AsyncStatus {
    /// Never fetched, or cleared.
    Idle,
    Pending,
    Success,
    Error,
}

/// The published state of an entry.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AsyncSnapshot {
    pub status: AsyncStatus,
    pub data: Option<Value>,
    pub error: Option<ClientError>,
}

impl AsyncSnapshot {
    fn idle() -> Self {
        Self {
            status: AsyncStatus::Idle,
            data: None,
            error: None,
        }
    }
}

/// Options of [`AsyncDataCache::get_or_create`].
#[derive(Debug, Clone, Default)]
pub struct AsyncDataOptions {
    /// Leave a new entry idle until `execute` is called.
    pub lazy: bool,
    /// Context override for the operation's requests.
    pub context: Option<OperationContext>,
}

impl AsyncDataOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lazy(mut self, lazy: bool) -> Self {
        self.lazy = lazy;
        self
    }

    pub fn context(mut self, context: OperationContext) -> Self {
        self.context = Some(context);
        self
    }
}

/// One cached fetch.
pub struct AsyncEntry {
    key: OperationKey,
    thunk: Thunk,
    tx: watch::Sender<AsyncSnapshot>,
    run_lock: Mutex<()>,
    runs: AtomicU64,
}

impl AsyncEntry {
    fn new(key: OperationKey, thunk: Thunk) -> Self {
        let (tx, _) = watch::channel(AsyncSnapshot::idle());
        Self {
            key,
            thunk,
            tx,
            run_lock: Mutex::new(()),
            runs: AtomicU64::new(0),
        }
    }

    pub fn key(&self) -> &OperationKey {
        &self.key
    }

    pub fn snapshot(&self) -> AsyncSnapshot {
        self.tx.borrow().clone()
    }

    pub fn watch(&self) -> watch::Receiver<AsyncSnapshot> {
        self.tx.subscribe()
    }

    /// Runs the thunk and stores its outcome.
    ///
    /// A call that had to wait for a fetch already in flight returns that
    /// fetch's outcome instead of starting another.
    pub async fn run(&self) -> ClientResult<Value> {
        let observed = self.runs.load(Ordering::Acquire);
        let _guard = self.run_lock.lock().await;
        if self.runs.load(Ordering::Acquire) != observed {
            debug!(key = %self.key, "joined a fetch already in flight");
            return self.outcome();
        }

        self.tx.send_modify(|snapshot| snapshot.status = AsyncStatus::Pending);
        let result = (self.thunk)().await;
        self.tx.send_modify(|snapshot| match &result {
            Ok(data) => {
                snapshot.status = AsyncStatus::Success;
                snapshot.data = Some(data.clone());
                snapshot.error = None;
            }
            Err(err) => {
                snapshot.status = AsyncStatus::Error;
                snapshot.error = Some(err.clone());
            }
        });
        self.runs.fetch_add(1, Ordering::Release);
        debug!(key = %self.key, ok = result.is_ok(), "fetch finished");
        result
    }

    /// Resets the entry to idle, dropping data and error.
    pub fn clear(&self) {
        self.tx.send_replace(AsyncSnapshot::idle());
    }

    fn outcome(&self) -> ClientResult<Value> {
        let snapshot = self.tx.borrow();
        if let Some(err) = &snapshot.error {
            return Err(err.clone());
        }
        snapshot.data.clone().ok_or_else(ClientError::no_data)
    }
}

impl fmt::Debug for AsyncEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AsyncEntry")
            .field("key", &self.key)
            .field("status", &self.tx.borrow().status)
            .finish()
    }
}

/// Key → entry map. Clones share entries.
#[derive(Debug, Clone, Default)]
pub struct AsyncDataCache {
    entries: Arc<DashMap<OperationKey, Arc<AsyncEntry>>>,
}

impl AsyncDataCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the entry for `key`, creating it around `thunk` when absent.
    ///
    /// An existing entry keeps its own thunk. A non-lazy entry that has
    /// never been fetched is fetched before this returns.
    pub async fn get_or_create(
        &self,
        key: OperationKey,
        thunk: Thunk,
        options: &AsyncDataOptions,
    ) -> Arc<AsyncEntry> {
        let entry = self.entry(key, thunk);

        if !options.lazy && entry.snapshot().status == AsyncStatus::Idle {
            // The outcome is recorded on the entry.
            let _ = entry.run().await;
        }
        entry
    }

    /// Like [`get_or_create`](Self::get_or_create), without fetching.
    pub fn entry(&self, key: OperationKey, thunk: Thunk) -> Arc<AsyncEntry> {
        Arc::clone(
            self.entries
                .entry(key.clone())
                .or_insert_with(|| Arc::new(AsyncEntry::new(key, thunk)))
                .value(),
        )
    }

    pub fn get(&self, key: &OperationKey) -> Option<Arc<AsyncEntry>> {
        self.entries.get(key).map(|entry| Arc::clone(entry.value()))
    }

    pub fn remove(&self, key: &OperationKey) -> Option<Arc<AsyncEntry>> {
        self.entries.remove(key).map(|(_, entry)| entry)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// A typed view over a cache entry.
///
/// A view created with a [`Resolver`] re-reads its variables on every
/// fetch and follows them to the matching entry. Reads report the entry of
/// the last fetch.
pub struct AsyncData<T> {
    current: Arc<RwLock<Arc<AsyncEntry>>>,
    rebind: Option<Rebind>,
    _marker: PhantomData<fn() -> T>,
}

#[derive(Clone)]
struct Rebind {
    cache: AsyncDataCache,
    resolve: Resolver,
}

impl<T> AsyncData<T> {
    /// A view pinned to one entry.
    pub fn new(entry: Arc<AsyncEntry>) -> Self {
        Self {
            current: Arc::new(RwLock::new(entry)),
            rebind: None,
            _marker: PhantomData,
        }
    }

    /// A view that re-resolves its entry in `cache` before each fetch.
    pub fn with_resolver(entry: Arc<AsyncEntry>, cache: AsyncDataCache, resolve: Resolver) -> Self {
        Self {
            current: Arc::new(RwLock::new(entry)),
            rebind: Some(Rebind { cache, resolve }),
            _marker: PhantomData,
        }
    }

    /// The entry reads currently come from.
    pub fn entry(&self) -> Arc<AsyncEntry> {
        Arc::clone(&self.current.read())
    }

    pub fn key(&self) -> OperationKey {
        self.entry().key().clone()
    }

    /// The raw JSON data of the last successful fetch.
    pub fn data_value(&self) -> Option<Value> {
        self.entry().snapshot().data
    }

    pub fn error(&self) -> Option<ClientError> {
        self.entry().snapshot().error
    }

    pub fn status(&self) -> AsyncStatus {
        self.entry().snapshot().status
    }

    pub fn pending(&self) -> bool {
        self.status() == AsyncStatus::Pending
    }

    pub fn clear(&self) {
        self.entry().clear();
    }

    pub fn watch(&self) -> watch::Receiver<AsyncSnapshot> {
        self.entry().watch()
    }

    /// Picks the entry the next fetch writes to.
    fn resolve_entry(&self) -> ClientResult<Arc<AsyncEntry>> {
        let Some(rebind) = &self.rebind else {
            return Ok(self.entry());
        };
        let (key, thunk) = (rebind.resolve)()?;
        let entry = rebind.cache.entry(key, thunk);
        let previous = std::mem::replace(&mut *self.current.write(), Arc::clone(&entry));
        if previous.key() != entry.key() {
            debug!(from = %previous.key(), to = %entry.key(), "variables changed; switching entries");
        }
        Ok(entry)
    }
}

impl<T: DeserializeOwned> AsyncData<T> {
    /// The last successful fetch, decoded.
    pub fn data(&self) -> ClientResult<Option<T>> {
        self.data_value().map(decode).transpose()
    }

    /// Fetches again, with the current variables.
    pub async fn refresh(&self) -> ClientResult<T> {
        let entry = self.resolve_entry()?;
        decode(entry.run().await?)
    }

    /// Fetches. The trigger for lazy entries.
    pub async fn execute(&self) -> ClientResult<T> {
        self.refresh().await
    }
}

impl<T> Clone for AsyncData<T> {
    fn clone(&self) -> Self {
        Self {
            current: Arc::clone(&self.current),
            rebind: self.rebind.clone(),
            _marker: PhantomData,
        }
    }
}

impl<T> fmt::Debug for AsyncData<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("AsyncData").field(&self.entry()).finish()
    }
}

pub(crate) fn decode<T: DeserializeOwned>(value: Value) -> ClientResult<T> {
    serde_json::from_value(value).map_client_err(ErrorCode::DeserializeError)
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::FutureExt;
    use gqf_syntax::parse;
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    fn key(name: &str) -> OperationKey {
        OperationKey::new(&parse(&format!("query {name} {{ a }}")).unwrap(), &json!({}))
    }

    fn counting_thunk(calls: Arc<AtomicUsize>) -> Thunk {
        Arc::new(move || {
            let calls = Arc::clone(&calls);
            async move {
                let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                tokio::time::sleep(Duration::from_millis(10)).await;
                Ok::<_, ClientError>(json!({ "n": n }))
            }
            .boxed()
        })
    }

    #[tokio::test]
    async fn test_eager_entry_fetches_once() {
        let cache = AsyncDataCache::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let options = AsyncDataOptions::new();

        let first = cache
            .get_or_create(key("A"), counting_thunk(Arc::clone(&calls)), &options)
            .await;
        let second = cache
            .get_or_create(key("A"), counting_thunk(Arc::clone(&calls)), &options)
            .await;

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        let data: AsyncData<Value> = AsyncData::new(first);
        assert_eq!(data.status(), AsyncStatus::Success);
        assert_eq!(data.data().unwrap(), Some(json!({ "n": 1 })));
    }

    #[tokio::test]
    async fn test_lazy_entry_waits_for_execute() {
        let cache = AsyncDataCache::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let entry = cache
            .get_or_create(
                key("Lazy"),
                counting_thunk(Arc::clone(&calls)),
                &AsyncDataOptions::new().lazy(true),
            )
            .await;

        let data: AsyncData<Value> = AsyncData::new(entry);
        assert_eq!(data.status(), AsyncStatus::Idle);
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        assert_eq!(data.execute().await.unwrap(), json!({ "n": 1 }));
        assert_eq!(data.status(), AsyncStatus::Success);
    }

    #[tokio::test]
    async fn test_concurrent_refreshes_coalesce() {
        let cache = AsyncDataCache::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let entry = cache
            .get_or_create(
                key("C"),
                counting_thunk(Arc::clone(&calls)),
                &AsyncDataOptions::new().lazy(true),
            )
            .await;
        let data: AsyncData<Value> = AsyncData::new(entry);

        let (a, b) = tokio::join!(data.refresh(), data.refresh());
        assert_eq!(a.unwrap(), b.unwrap());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_resolver_moves_view_between_entries() {
        let cache = AsyncDataCache::new();
        let page = Arc::new(AtomicUsize::new(1));
        let source = Arc::clone(&page);
        let resolve: Resolver = Arc::new(move || -> ClientResult<(OperationKey, Thunk)> {
            let page = source.load(Ordering::SeqCst);
            let key = OperationKey::new(&parse("query P { a }").unwrap(), &json!({ "page": page }));
            let thunk: Thunk = Arc::new(move || async move { Ok::<_, ClientError>(json!({ "page": page })) }.boxed());
            Ok((key, thunk))
        });

        let (key, thunk) = resolve().unwrap();
        let entry = cache.get_or_create(key, thunk, &AsyncDataOptions::new()).await;
        let first_key = entry.key().clone();
        let data: AsyncData<Value> = AsyncData::with_resolver(entry, cache.clone(), resolve);

        page.store(2, Ordering::SeqCst);
        assert_eq!(data.refresh().await.unwrap(), json!({ "page": 2 }));
        assert_ne!(data.key(), first_key);
        assert_eq!(cache.len(), 2);
        assert_eq!(
            cache.get(&first_key).unwrap().snapshot().data,
            Some(json!({ "page": 1 }))
        );
    }

    #[tokio::test]
    async fn test_error_keeps_previous_data() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&attempts);
        let thunk: Thunk = Arc::new(move || {
            let n = counter.fetch_add(1, Ordering::SeqCst);
            async move {
                if n == 0 {
                    Ok(json!("first"))
                } else {
                    Err(ClientError::network("offline"))
                }
            }
            .boxed()
        });

        let cache = AsyncDataCache::new();
        let entry = cache.get_or_create(key("E"), thunk, &AsyncDataOptions::new()).await;
        let data: AsyncData<String> = AsyncData::new(entry);

        let err = data.refresh().await.unwrap_err();
        assert_eq!(err.code, ErrorCode::NetworkError);
        assert_eq!(data.status(), AsyncStatus::Error);
        assert_eq!(data.data().unwrap().as_deref(), Some("first"));

        data.clear();
        assert_eq!(data.status(), AsyncStatus::Idle);
        assert!(data.data_value().is_none());
        assert!(data.error().is_none());
    }
}
