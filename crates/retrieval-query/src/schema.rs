//! Collection schema verification and dense-only to hybrid migration.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, error, info, warn};

use retrieval_core::{
    CollectionInfo, CollectionSchema, Result, RetrievalError, ScrollRequest, VectorStore,
};

/// Owns the schema state of one collection.
///
/// The first call to [`ensure_hybrid_compatible`](Self::ensure_hybrid_compatible)
/// checks the collection under a lock and migrates it when it lacks the
/// sparse field. Later calls read two flags and never touch the lock.
/// A failed check or migration disables hybrid search for the lifetime of
/// the manager.
pub struct CollectionSchemaManager<S> {
    store: Arc<S>,
    collection: String,
    target: CollectionSchema,
    page_size: usize,
    lock: Mutex<()>,
    checked: AtomicBool,
    hybrid_enabled: AtomicBool,
    migrations: AtomicU64,
}

impl<S> CollectionSchemaManager<S>
where
    S: VectorStore,
{
    /// Create a manager for `collection`. A target schema without a sparse
    /// field means the engine runs dense-only and nothing is ever migrated.
    pub fn new(store: Arc<S>, collection: &str, target: CollectionSchema, page_size: usize) -> Self {
        let hybrid = target.sparse_vector.is_some();
        Self {
            store,
            collection: collection.to_string(),
            target,
            page_size: page_size.max(1),
            lock: Mutex::new(()),
            checked: AtomicBool::new(false),
            hybrid_enabled: AtomicBool::new(hybrid),
            migrations: AtomicU64::new(0),
        }
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    /// Schema new collections are created with.
    pub fn target_schema(&self) -> &CollectionSchema {
        &self.target
    }

    /// Whether hybrid search is currently enabled.
    pub fn hybrid_enabled(&self) -> bool {
        self.hybrid_enabled.load(Ordering::Acquire)
    }

    /// Number of migrations this manager has executed.
    pub fn migration_count(&self) -> u64 {
        self.migrations.load(Ordering::Acquire)
    }

    /// Serialize a writer against schema checks and migrations.
    pub async fn lock_for_ingest(&self) -> MutexGuard<'_, ()> {
        self.lock.lock().await
    }

    /// Forget the last check so the next call verifies the collection
    /// again. Call with the ingest lock held, after replacing the
    /// collection.
    pub fn invalidate(&self) {
        self.hybrid_enabled
            .store(self.target.sparse_vector.is_some(), Ordering::Release);
        self.checked.store(false, Ordering::Release);
    }

    /// Make sure the collection can serve hybrid queries.
    ///
    /// Returns whether hybrid search is enabled afterwards. Safe to call
    /// from any number of concurrent tasks; the check runs once.
    pub async fn ensure_hybrid_compatible(&self) -> bool {
        if self.checked.load(Ordering::Acquire) {
            return self.hybrid_enabled();
        }

        let _guard = self.lock.lock().await;
        if self.checked.load(Ordering::Acquire) {
            return self.hybrid_enabled();
        }

        let enabled = match self.target.sparse_vector.as_deref() {
            None => false,
            Some(sparse_name) => match self.verify(sparse_name).await {
                Ok(()) => true,
                Err(e) => {
                    error!(
                        "Hybrid schema check failed for '{}', using dense-only search: {}",
                        self.collection, e
                    );
                    false
                }
            },
        };

        self.hybrid_enabled.store(enabled, Ordering::Release);
        self.checked.store(true, Ordering::Release);
        enabled
    }

    async fn verify(&self, sparse_name: &str) -> Result<()> {
        match self.store.get_collection(&self.collection).await? {
            None => {
                self.store
                    .create_collection(&self.collection, &self.target)
                    .await?;
                info!("Created hybrid collection '{}'", self.collection);
                Ok(())
            }
            Some(info) if info.schema.has_sparse(sparse_name) => {
                debug!("Collection '{}' already supports hybrid search", self.collection);
                Ok(())
            }
            Some(info) => self.migrate(info).await,
        }
    }

    async fn migrate(&self, info: CollectionInfo) -> Result<()> {
        warn!(
            "Collection '{}' has no '{}' sparse field, migrating to the hybrid schema",
            self.collection,
            self.target.sparse_vector.as_deref().unwrap_or_default()
        );

        if info.points_count == 0 {
            self.recreate()
                .await
                .map_err(|e| RetrievalError::migration(format!("recreate failed: {e}")))?;
            self.migrations.fetch_add(1, Ordering::AcqRel);
            info!("Recreated empty collection '{}' with hybrid schema", self.collection);
            return Ok(());
        }

        let backup = format!("{}_backup_{}", self.collection, unix_secs());
        self.store
            .create_collection(&backup, &info.schema)
            .await
            .map_err(|e| RetrievalError::migration(format!("backup creation failed: {e}")))?;

        match self.copy_and_recreate(&backup).await {
            Ok(copied) => {
                self.migrations.fetch_add(1, Ordering::AcqRel);
                warn!(
                    "Migrated '{}' to hybrid schema; {} points kept in backup '{}'. \
                     Re-ingest documents to enable sparse search",
                    self.collection, copied, backup
                );
                Ok(())
            }
            Err(e) => {
                self.cleanup_backup(&backup).await;
                Err(RetrievalError::migration(format!(
                    "migration of '{}' failed: {e}",
                    self.collection
                )))
            }
        }
    }

    async fn copy_and_recreate(&self, backup: &str) -> Result<u64> {
        let mut offset = 0;
        let mut copied = 0u64;

        loop {
            let request = ScrollRequest {
                filter: None,
                limit: self.page_size,
                offset,
                with_vectors: true,
            };
            let page = self.store.scroll(&self.collection, &request).await?;
            if !page.points.is_empty() {
                self.store.upsert(backup, &page.points).await?;
                copied += page.points.len() as u64;
                debug!("Copied {} points into '{}'", copied, backup);
            }
            match page.next_offset {
                Some(next) => offset = next,
                None => break,
            }
        }

        self.recreate().await?;
        Ok(copied)
    }

    async fn recreate(&self) -> Result<()> {
        self.store.delete_collection(&self.collection).await?;
        self.store
            .create_collection(&self.collection, &self.target)
            .await
    }

    /// Drop a partial backup, unless the original is already gone and the
    /// backup holds the only copy of the data.
    async fn cleanup_backup(&self, backup: &str) {
        match self.store.get_collection(&self.collection).await {
            Ok(Some(_)) => {
                if let Err(e) = self.store.delete_collection(backup).await {
                    warn!("Failed to remove partial backup '{}': {}", backup, e);
                }
            }
            Ok(None) => error!(
                "Collection '{}' was deleted during migration; data remains in '{}'",
                self.collection, backup
            ),
            Err(e) => warn!("Keeping backup '{}', cannot inspect original: {}", backup, e),
        }
    }
}

pub(crate) fn unix_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    use retrieval_core::{Distance, Payload, Point, SchemaState};

    use crate::test_support::FaultyStore;

    const COLLECTION: &str = "documents";

    fn manager(store: Arc<FaultyStore>) -> Arc<CollectionSchemaManager<FaultyStore>> {
        Arc::new(CollectionSchemaManager::new(
            store,
            COLLECTION,
            CollectionSchema::hybrid(4, Distance::Cosine, "keywords"),
            2,
        ))
    }

    fn dense_point(id: &str) -> Point {
        Point {
            id: id.to_string(),
            vector: vec![1.0, 0.0, 0.0, 0.0],
            sparse: None,
            payload: Payload {
                content: format!("fragment {id}"),
                ..Default::default()
            },
        }
    }

    async fn dense_only_collection(points: usize) -> Arc<FaultyStore> {
        let store = Arc::new(FaultyStore::new());
        store
            .create_collection(COLLECTION, &CollectionSchema::dense_only(4, Distance::Cosine))
            .await
            .unwrap();
        let points: Vec<Point> = (0..points).map(|i| dense_point(&format!("p{i}"))).collect();
        store.upsert(COLLECTION, &points).await.unwrap();
        store.reset_counters();
        store
    }

    #[tokio::test]
    async fn test_creates_missing_collection() {
        let store = Arc::new(FaultyStore::new());
        let manager = manager(store.clone());

        assert!(manager.ensure_hybrid_compatible().await);
        let info = store.get_collection(COLLECTION).await.unwrap();
        assert_eq!(SchemaState::of(info.as_ref()), SchemaState::Hybrid);
        assert_eq!(manager.migration_count(), 0);
    }

    #[tokio::test]
    async fn test_existing_hybrid_collection_untouched() {
        let store = Arc::new(FaultyStore::new());
        store
            .create_collection(COLLECTION, &CollectionSchema::hybrid(4, Distance::Cosine, "keywords"))
            .await
            .unwrap();
        store.reset_counters();

        let manager = manager(store.clone());
        assert!(manager.ensure_hybrid_compatible().await);
        assert_eq!(store.creates.load(Ordering::SeqCst), 0);
        assert_eq!(store.deletes.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_checks_migrate_once() {
        let store = dense_only_collection(0).await;
        let manager = manager(store.clone());

        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let manager = manager.clone();
                tokio::spawn(async move { manager.ensure_hybrid_compatible().await })
            })
            .collect();
        for task in tasks {
            assert!(task.await.unwrap());
        }

        assert_eq!(manager.migration_count(), 1);
        assert_eq!(store.deletes.load(Ordering::SeqCst), 1);
        assert_eq!(store.creates.load(Ordering::SeqCst), 1);

        let info = store.get_collection(COLLECTION).await.unwrap().unwrap();
        assert_eq!(info.schema.state(), SchemaState::Hybrid);
        assert_eq!(info.points_count, 0);
    }

    #[tokio::test]
    async fn test_migration_preserves_points_in_backup() {
        let store = dense_only_collection(5).await;
        let manager = manager(store.clone());

        assert!(manager.ensure_hybrid_compatible().await);

        let collections = store.list_collections().await.unwrap();
        let backup = collections
            .iter()
            .find(|c| c.name.starts_with("documents_backup_"))
            .expect("backup collection");
        assert_eq!(backup.points_count, 5);
        assert_eq!(backup.schema.state(), SchemaState::DenseOnly);

        let original = store.get_collection(COLLECTION).await.unwrap().unwrap();
        assert_eq!(original.schema.state(), SchemaState::Hybrid);
        assert_eq!(original.points_count, 0);

        // Vectors survive the copy
        let copied = store
            .retrieve(&backup.name, &["p3".to_string()])
            .await
            .unwrap();
        assert_eq!(copied[0].vector, vec![1.0, 0.0, 0.0, 0.0]);
    }

    #[tokio::test]
    async fn test_failed_migration_disables_hybrid() {
        let store = dense_only_collection(3).await;
        store.faults.scroll.store(true, Ordering::SeqCst);
        let manager = manager(store.clone());

        assert!(!manager.ensure_hybrid_compatible().await);
        assert!(!manager.hybrid_enabled());
        assert_eq!(manager.migration_count(), 0);

        // Original intact, partial backup removed
        let collections = store.list_collections().await.unwrap();
        assert_eq!(collections.len(), 1);
        assert_eq!(collections[0].schema.state(), SchemaState::DenseOnly);
        assert_eq!(collections[0].points_count, 3);

        // No retry once checked
        store.faults.scroll.store(false, Ordering::SeqCst);
        assert!(!manager.ensure_hybrid_compatible().await);
        assert_eq!(manager.migration_count(), 0);
    }

    #[tokio::test]
    async fn test_backup_kept_when_original_is_gone() {
        let store = dense_only_collection(3).await;
        *store.faults.create_named.lock().unwrap() = Some(COLLECTION.to_string());
        let manager = manager(store.clone());

        assert!(!manager.ensure_hybrid_compatible().await);
        assert_eq!(manager.migration_count(), 0);

        // Deleted before the failed create, so the backup holds the data
        assert!(store.get_collection(COLLECTION).await.unwrap().is_none());
        let collections = store.list_collections().await.unwrap();
        assert_eq!(collections.len(), 1);
        assert!(collections[0].name.starts_with("documents_backup_"));
        assert_eq!(collections[0].points_count, 3);
    }

    #[tokio::test]
    async fn test_invalidate_rechecks_collection() {
        let store = dense_only_collection(3).await;
        store.faults.scroll.store(true, Ordering::SeqCst);
        let manager = manager(store.clone());
        assert!(!manager.ensure_hybrid_compatible().await);

        store.faults.scroll.store(false, Ordering::SeqCst);
        manager.invalidate();
        assert!(manager.ensure_hybrid_compatible().await);
        assert_eq!(manager.migration_count(), 1);
    }

    #[tokio::test]
    async fn test_dense_only_target_never_migrates() {
        let store = dense_only_collection(1).await;
        let manager = CollectionSchemaManager::new(
            store.clone(),
            COLLECTION,
            CollectionSchema::dense_only(4, Distance::Cosine),
            2,
        );

        assert!(!manager.ensure_hybrid_compatible().await);
        assert_eq!(store.creates.load(Ordering::SeqCst), 0);
    }
}
