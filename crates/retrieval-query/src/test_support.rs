//! Fault-injecting store used by unit tests.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use retrieval_core::{
    CollectionInfo, CollectionSchema, FusionQuery, Point, QueryVector, Result, RetrievalError,
    ScoredPoint, ScrollPage, ScrollRequest, VectorStore,
};
use retrieval_store::SqliteStore;

#[derive(Default)]
pub(crate) struct Faults {
    pub fused: AtomicBool,
    pub dense_search: AtomicBool,
    pub sparse_search: AtomicBool,
    pub scroll: AtomicBool,
    pub list: AtomicBool,
    pub delete_points: AtomicBool,
    pub delete_collection: AtomicBool,
    /// Creating a collection with this name fails.
    pub create_named: Mutex<Option<String>>,
}

/// In-memory SQLite store with switchable failures and call counters.
pub(crate) struct FaultyStore {
    inner: SqliteStore,
    pub faults: Faults,
    pub creates: AtomicU64,
    pub deletes: AtomicU64,
    pub fused_calls: AtomicU64,
    pub search_calls: AtomicU64,
    pub sparse_search_calls: AtomicU64,
}

impl FaultyStore {
    pub fn new() -> Self {
        Self {
            inner: SqliteStore::open_memory().expect("in-memory store"),
            faults: Faults::default(),
            creates: AtomicU64::new(0),
            deletes: AtomicU64::new(0),
            fused_calls: AtomicU64::new(0),
            search_calls: AtomicU64::new(0),
            sparse_search_calls: AtomicU64::new(0),
        }
    }

    pub fn reset_counters(&self) {
        for counter in [
            &self.creates,
            &self.deletes,
            &self.fused_calls,
            &self.search_calls,
            &self.sparse_search_calls,
        ] {
            counter.store(0, Ordering::SeqCst);
        }
    }

    fn check(flag: &AtomicBool, what: &str) -> Result<()> {
        if flag.load(Ordering::SeqCst) {
            Err(RetrievalError::store(format!("injected {what} failure")))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl VectorStore for FaultyStore {
    async fn create_collection(&self, name: &str, schema: &CollectionSchema) -> Result<()> {
        self.creates.fetch_add(1, Ordering::SeqCst);
        let blocked = self.faults.create_named.lock().unwrap().as_deref() == Some(name);
        if blocked {
            return Err(RetrievalError::store(format!("injected create failure for {name}")));
        }
        self.inner.create_collection(name, schema).await
    }

    async fn get_collection(&self, name: &str) -> Result<Option<CollectionInfo>> {
        self.inner.get_collection(name).await
    }

    async fn list_collections(&self) -> Result<Vec<CollectionInfo>> {
        Self::check(&self.faults.list, "list")?;
        self.inner.list_collections().await
    }

    async fn delete_collection(&self, name: &str) -> Result<()> {
        self.deletes.fetch_add(1, Ordering::SeqCst);
        Self::check(&self.faults.delete_collection, "delete collection")?;
        self.inner.delete_collection(name).await
    }

    async fn upsert(&self, collection: &str, points: &[Point]) -> Result<()> {
        self.inner.upsert(collection, points).await
    }

    async fn scroll(&self, collection: &str, request: &ScrollRequest) -> Result<ScrollPage> {
        Self::check(&self.faults.scroll, "scroll")?;
        self.inner.scroll(collection, request).await
    }

    async fn retrieve(&self, collection: &str, ids: &[String]) -> Result<Vec<Point>> {
        self.inner.retrieve(collection, ids).await
    }

    async fn delete_points(&self, collection: &str, ids: &[String]) -> Result<u64> {
        Self::check(&self.faults.delete_points, "delete points")?;
        self.inner.delete_points(collection, ids).await
    }

    async fn search(
        &self,
        collection: &str,
        query: &QueryVector,
        limit: usize,
    ) -> Result<Vec<ScoredPoint>> {
        self.search_calls.fetch_add(1, Ordering::SeqCst);
        match query {
            QueryVector::Dense(_) => Self::check(&self.faults.dense_search, "dense search")?,
            QueryVector::Sparse(_) => {
                self.sparse_search_calls.fetch_add(1, Ordering::SeqCst);
                Self::check(&self.faults.sparse_search, "sparse search")?
            }
        }
        self.inner.search(collection, query, limit).await
    }

    async fn query_fused(&self, collection: &str, query: &FusionQuery) -> Result<Vec<ScoredPoint>> {
        self.fused_calls.fetch_add(1, Ordering::SeqCst);
        Self::check(&self.faults.fused, "fused query")?;
        self.inner.query_fused(collection, query).await
    }
}
