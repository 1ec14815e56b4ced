//! SQLite-based vector store implementation.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use rusqlite::{params, Connection, OpenFlags, OptionalExtension};
use tracing::{debug, info};

use retrieval_core::{
    CollectionInfo, CollectionSchema, DenseVectorParams, Distance, FusionQuery, NamedSparseVector,
    Payload, Point, QueryVector, Result, RetrievalError, ScoredPoint, ScrollPage, ScrollRequest,
    SparseVector, VectorStore,
};

use crate::schema::SCHEMA;

/// RRF constant used by fused queries. A point ranked first by one prefetch
/// scores 0.5, and first in both scores 1.0.
const FUSION_RRF_K: f32 = 2.0;

/// SQLite-based store implementation.
///
/// Uses a blocking Mutex for thread-safe access and runs SQLite operations
/// on the blocking thread pool via `spawn_blocking`. Similarity is computed
/// by a full scan of the collection.
pub struct SqliteStore {
    /// Connection wrapped in blocking Mutex.
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Open or create a database at the given path.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .map_err(|e| RetrievalError::store(format!("Failed to open database: {}", e)))?;

        Self::init(conn, path)
    }

    /// Open an in-memory database (for testing).
    pub fn open_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(|e| {
            RetrievalError::store(format!("Failed to open in-memory database: {}", e))
        })?;

        Self::init(conn, Path::new(":memory:"))
    }

    /// Initialize the store with a connection.
    fn init(conn: Connection, path: &Path) -> Result<Self> {
        Self::configure_connection(&conn)?;

        conn.execute_batch(SCHEMA)
            .map_err(|e| RetrievalError::store(format!("Failed to initialize schema: {}", e)))?;

        info!("Vector store opened at {:?}", path);

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Configure SQLite connection for optimal performance.
    fn configure_connection(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            r#"
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA cache_size = -64000;
            PRAGMA busy_timeout = 30000;
            PRAGMA temp_store = MEMORY;
            PRAGMA foreign_keys = ON;
            "#,
        )
        .map_err(|e| RetrievalError::store(format!("Failed to configure connection: {}", e)))?;

        Ok(())
    }

    /// Run a blocking operation on the connection off the async executor.
    async fn with_conn<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&mut Connection) -> Result<R> + Send + 'static,
        R: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut conn = conn
                .lock()
                .map_err(|e| RetrievalError::store(e.to_string()))?;
            f(&mut conn)
        })
        .await
        .map_err(|e| RetrievalError::internal(format!("Store task failed: {}", e)))?
    }
}

#[async_trait]
impl VectorStore for SqliteStore {
    // Collection operations

    async fn create_collection(&self, name: &str, schema: &CollectionSchema) -> Result<()> {
        if schema.dense.size == 0 {
            return Err(RetrievalError::invalid_argument(
                "dense vector size must be positive",
            ));
        }

        let name = name.to_string();
        let schema = schema.clone();
        self.with_conn(move |conn| {
            conn.execute(
                r#"
                INSERT INTO collections (name, dense_size, distance, sparse_name, created_at)
                VALUES (?1, ?2, ?3, ?4, ?5)
                "#,
                params![
                    name,
                    schema.dense.size as i64,
                    schema.dense.distance.as_str(),
                    schema.sparse_vector,
                    now_millis() as i64,
                ],
            )
            .map_err(|e| {
                if e.to_string().contains("UNIQUE constraint") {
                    RetrievalError::CollectionExists { name: name.clone() }
                } else {
                    RetrievalError::store(format!("Failed to create collection: {}", e))
                }
            })?;

            debug!("Created collection: {} ({:?})", name, schema.state());
            Ok(())
        })
        .await
    }

    async fn get_collection(&self, name: &str) -> Result<Option<CollectionInfo>> {
        let name = name.to_string();
        self.with_conn(move |conn| {
            let mut stmt = conn
                .prepare(
                    r#"
                    SELECT c.name, c.dense_size, c.distance, c.sparse_name, c.created_at,
                           (SELECT COUNT(*) FROM points p WHERE p.collection = c.name)
                    FROM collections c WHERE c.name = ?1
                    "#,
                )
                .map_err(|e| RetrievalError::store(e.to_string()))?;

            let row = stmt
                .query_row(params![name], Self::row_to_collection)
                .optional()
                .map_err(|e| RetrievalError::store(e.to_string()))?;

            row.map(collection_from_row).transpose()
        })
        .await
    }

    async fn list_collections(&self) -> Result<Vec<CollectionInfo>> {
        self.with_conn(|conn| {
            let mut stmt = conn
                .prepare(
                    r#"
                    SELECT c.name, c.dense_size, c.distance, c.sparse_name, c.created_at,
                           (SELECT COUNT(*) FROM points p WHERE p.collection = c.name)
                    FROM collections c ORDER BY c.name
                    "#,
                )
                .map_err(|e| RetrievalError::store(e.to_string()))?;

            let rows = stmt
                .query_map([], Self::row_to_collection)
                .map_err(|e| RetrievalError::store(e.to_string()))?
                .collect::<std::result::Result<Vec<_>, _>>()
                .map_err(|e| RetrievalError::store(e.to_string()))?;

            rows.into_iter().map(collection_from_row).collect()
        })
        .await
    }

    async fn delete_collection(&self, name: &str) -> Result<()> {
        let name = name.to_string();
        self.with_conn(move |conn| {
            // Points are deleted by CASCADE
            let deleted = conn
                .execute("DELETE FROM collections WHERE name = ?1", params![name])
                .map_err(|e| RetrievalError::store(e.to_string()))?;

            if deleted == 0 {
                return Err(RetrievalError::CollectionNotFound { name });
            }

            debug!("Deleted collection: {}", name);
            Ok(())
        })
        .await
    }

    // Point operations

    async fn upsert(&self, collection: &str, points: &[Point]) -> Result<()> {
        if points.is_empty() {
            return Ok(());
        }

        let collection = collection.to_string();
        let points: Vec<Point> = points.to_vec();

        self.with_conn(move |conn| {
            let schema = require_schema(conn, &collection)?;

            for point in &points {
                if point.vector.len() != schema.dense.size {
                    return Err(RetrievalError::invalid_argument(format!(
                        "point {} has dimension {}, collection {} expects {}",
                        point.id,
                        point.vector.len(),
                        collection,
                        schema.dense.size
                    )));
                }
                if let Some(sparse) = &point.sparse {
                    if !schema.has_sparse(&sparse.name) {
                        return Err(RetrievalError::invalid_argument(format!(
                            "collection {} has no sparse vector named {}",
                            collection, sparse.name
                        )));
                    }
                }
            }

            let tx = conn
                .transaction()
                .map_err(|e| RetrievalError::store(e.to_string()))?;

            {
                let mut stmt = tx
                    .prepare(
                        r#"
                        INSERT INTO points (collection, id, dense, sparse, content, metadata)
                        VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                        ON CONFLICT(collection, id) DO UPDATE SET
                            dense = excluded.dense,
                            sparse = excluded.sparse,
                            content = excluded.content,
                            metadata = excluded.metadata
                        "#,
                    )
                    .map_err(|e| RetrievalError::store(e.to_string()))?;

                for point in &points {
                    let sparse = point
                        .sparse
                        .as_ref()
                        .map(|s| serde_json::to_string(&s.vector))
                        .transpose()?;
                    let metadata = serde_json::to_string(&point.payload.metadata)?;

                    stmt.execute(params![
                        collection,
                        point.id,
                        vec_to_bytes(&point.vector),
                        sparse,
                        point.payload.content,
                        metadata,
                    ])
                    .map_err(|e| RetrievalError::store(format!("Failed to upsert point: {}", e)))?;
                }
            }

            tx.commit()
                .map_err(|e| RetrievalError::store(e.to_string()))?;

            debug!("Upserted {} points into {}", points.len(), collection);
            Ok(())
        })
        .await
    }

    async fn scroll(&self, collection: &str, request: &ScrollRequest) -> Result<ScrollPage> {
        let collection = collection.to_string();
        let request = request.clone();

        self.with_conn(move |conn| {
            let schema = require_schema(conn, &collection)?;
            let points = load_points(
                conn,
                &collection,
                schema.sparse_vector.as_deref(),
                request.with_vectors,
            )?;

            let mut matching = points
                .into_iter()
                .filter(|p| {
                    request
                        .filter
                        .as_ref()
                        .map_or(true, |f| f.matches(&p.payload))
                })
                .skip(request.offset as usize);

            let page: Vec<Point> = matching.by_ref().take(request.limit).collect();
            let next_offset = matching
                .next()
                .map(|_| request.offset + page.len() as u64);

            Ok(ScrollPage {
                points: page,
                next_offset,
            })
        })
        .await
    }

    async fn retrieve(&self, collection: &str, ids: &[String]) -> Result<Vec<Point>> {
        let collection = collection.to_string();
        let ids: Vec<String> = ids.to_vec();

        self.with_conn(move |conn| {
            let schema = require_schema(conn, &collection)?;
            let sparse_name = schema.sparse_vector.as_deref();

            let mut stmt = conn
                .prepare(
                    r#"
                    SELECT id, dense, sparse, content, metadata
                    FROM points WHERE collection = ?1 AND id = ?2
                    "#,
                )
                .map_err(|e| RetrievalError::store(e.to_string()))?;

            let mut points = Vec::with_capacity(ids.len());
            for id in &ids {
                let point = stmt
                    .query_row(params![collection, id], |row| {
                        row_to_point(row, sparse_name, true)
                    })
                    .optional()
                    .map_err(|e| RetrievalError::store(e.to_string()))?;
                points.extend(point);
            }

            Ok(points)
        })
        .await
    }

    async fn delete_points(&self, collection: &str, ids: &[String]) -> Result<u64> {
        let collection = collection.to_string();
        let ids: Vec<String> = ids.to_vec();

        self.with_conn(move |conn| {
            require_schema(conn, &collection)?;

            let tx = conn
                .transaction()
                .map_err(|e| RetrievalError::store(e.to_string()))?;

            let mut deleted = 0u64;
            for id in &ids {
                deleted += tx
                    .execute(
                        "DELETE FROM points WHERE collection = ?1 AND id = ?2",
                        params![collection, id],
                    )
                    .map_err(|e| RetrievalError::store(e.to_string()))?
                    as u64;
            }

            tx.commit()
                .map_err(|e| RetrievalError::store(e.to_string()))?;

            debug!("Deleted {} points from {}", deleted, collection);
            Ok(deleted)
        })
        .await
    }

    // Search operations

    async fn search(
        &self,
        collection: &str,
        query: &QueryVector,
        limit: usize,
    ) -> Result<Vec<ScoredPoint>> {
        let collection = collection.to_string();
        let query = query.clone();

        self.with_conn(move |conn| search_points(conn, &collection, &query, limit))
            .await
    }

    async fn query_fused(&self, collection: &str, query: &FusionQuery) -> Result<Vec<ScoredPoint>> {
        if query.prefetch.is_empty() {
            return Err(RetrievalError::invalid_argument(
                "fused query needs at least one prefetch",
            ));
        }

        let collection = collection.to_string();
        let query = query.clone();

        self.with_conn(move |conn| {
            let mut order: HashMap<String, usize> = HashMap::new();
            let mut fused: Vec<ScoredPoint> = Vec::new();

            for prefetch in &query.prefetch {
                let hits = search_points(conn, &collection, &prefetch.query, prefetch.limit)?;
                for (rank, hit) in hits.into_iter().enumerate() {
                    let contribution = 1.0 / (FUSION_RRF_K + rank as f32);
                    match order.get(&hit.id) {
                        Some(&idx) => fused[idx].score += contribution,
                        None => {
                            order.insert(hit.id.clone(), fused.len());
                            fused.push(ScoredPoint {
                                score: contribution,
                                ..hit
                            });
                        }
                    }
                }
            }

            if let Some(threshold) = query.score_threshold {
                fused.retain(|p| p.score >= threshold);
            }

            fused.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(Ordering::Equal));
            fused.truncate(query.limit);

            debug!(
                "Fused query on {} returned {} points",
                collection,
                fused.len()
            );
            Ok(fused)
        })
        .await
    }
}

// Helper methods
impl SqliteStore {
    /// Read the raw collection columns.
    fn row_to_collection(row: &rusqlite::Row<'_>) -> rusqlite::Result<CollectionRow> {
        Ok(CollectionRow {
            name: row.get(0)?,
            dense_size: row.get(1)?,
            distance: row.get(2)?,
            sparse_name: row.get(3)?,
            created_at: row.get(4)?,
            points_count: row.get(5)?,
        })
    }
}

struct CollectionRow {
    name: String,
    dense_size: i64,
    distance: String,
    sparse_name: Option<String>,
    created_at: i64,
    points_count: i64,
}

fn collection_from_row(row: CollectionRow) -> Result<CollectionInfo> {
    let distance = Distance::from_name(&row.distance)
        .ok_or_else(|| RetrievalError::store(format!("Unknown distance: {}", row.distance)))?;

    Ok(CollectionInfo {
        name: row.name,
        schema: CollectionSchema {
            dense: DenseVectorParams {
                size: row.dense_size as usize,
                distance,
            },
            sparse_vector: row.sparse_name,
        },
        points_count: row.points_count as u64,
        created_at: row.created_at as u64,
    })
}

/// Load a collection's schema, failing when it does not exist.
fn require_schema(conn: &Connection, collection: &str) -> Result<CollectionSchema> {
    let row = conn
        .query_row(
            r#"
            SELECT name, dense_size, distance, sparse_name, created_at, 0
            FROM collections WHERE name = ?1
            "#,
            params![collection],
            SqliteStore::row_to_collection,
        )
        .optional()
        .map_err(|e| RetrievalError::store(e.to_string()))?
        .ok_or_else(|| RetrievalError::CollectionNotFound {
            name: collection.to_string(),
        })?;

    Ok(collection_from_row(row)?.schema)
}

/// Load every point of a collection in insertion order.
fn load_points(
    conn: &Connection,
    collection: &str,
    sparse_name: Option<&str>,
    with_vectors: bool,
) -> Result<Vec<Point>> {
    let mut stmt = conn
        .prepare(
            r#"
            SELECT id, dense, sparse, content, metadata
            FROM points WHERE collection = ?1 ORDER BY seq
            "#,
        )
        .map_err(|e| RetrievalError::store(e.to_string()))?;

    let points = stmt
        .query_map(params![collection], |row| {
            row_to_point(row, sparse_name, with_vectors)
        })
        .map_err(|e| RetrievalError::store(e.to_string()))?
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| RetrievalError::store(e.to_string()))?;

    Ok(points)
}

/// Convert a row to a Point.
fn row_to_point(
    row: &rusqlite::Row<'_>,
    sparse_name: Option<&str>,
    with_vectors: bool,
) -> rusqlite::Result<Point> {
    let metadata_str: String = row.get(4)?;

    let (vector, sparse) = if with_vectors {
        let dense_bytes: Vec<u8> = row.get(1)?;
        let sparse_str: Option<String> = row.get(2)?;
        let sparse = match (sparse_name, sparse_str) {
            (Some(name), Some(s)) => Some(NamedSparseVector {
                name: name.to_string(),
                vector: parse_json::<SparseVector>(2, &s)?,
            }),
            _ => None,
        };
        (bytes_to_vec(&dense_bytes), sparse)
    } else {
        (Vec::new(), None)
    };

    Ok(Point {
        id: row.get(0)?,
        vector,
        sparse,
        payload: Payload {
            content: row.get(3)?,
            metadata: parse_json(4, &metadata_str)?,
        },
    })
}

/// Decode a JSON column, reporting corrupt values as conversion failures.
fn parse_json<T: serde::de::DeserializeOwned>(column: usize, text: &str) -> rusqlite::Result<T> {
    serde_json::from_str(text).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(column, rusqlite::types::Type::Text, Box::new(e))
    })
}

/// Score every point of a collection against one query vector.
fn search_points(
    conn: &Connection,
    collection: &str,
    query: &QueryVector,
    limit: usize,
) -> Result<Vec<ScoredPoint>> {
    let schema = require_schema(conn, collection)?;

    let mut scored: Vec<ScoredPoint> = match query {
        QueryVector::Dense(vector) => {
            if vector.len() != schema.dense.size {
                return Err(RetrievalError::invalid_argument(format!(
                    "query has dimension {}, collection {} expects {}",
                    vector.len(),
                    collection,
                    schema.dense.size
                )));
            }

            load_points(conn, collection, schema.sparse_vector.as_deref(), true)?
                .into_iter()
                .map(|p| ScoredPoint {
                    score: similarity(schema.dense.distance, vector, &p.vector),
                    id: p.id,
                    payload: p.payload,
                })
                .collect()
        }
        QueryVector::Sparse(named) => {
            if !schema.has_sparse(&named.name) {
                return Err(RetrievalError::invalid_argument(format!(
                    "collection {} has no sparse vector named {}",
                    collection, named.name
                )));
            }

            load_points(conn, collection, schema.sparse_vector.as_deref(), true)?
                .into_iter()
                .filter_map(|p| {
                    let score = p.sparse.as_ref()?.vector.dot(&named.vector);
                    if score == 0.0 {
                        return None;
                    }
                    Some(ScoredPoint {
                        id: p.id,
                        score,
                        payload: p.payload,
                    })
                })
                .collect()
        }
    };

    scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(Ordering::Equal));
    scored.truncate(limit);
    Ok(scored)
}

fn similarity(distance: Distance, a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    match distance {
        Distance::Dot => dot,
        Distance::Cosine => {
            let norm_a = a.iter().map(|x| x * x).sum::<f32>().sqrt();
            let norm_b = b.iter().map(|x| x * x).sum::<f32>().sqrt();
            if norm_a == 0.0 || norm_b == 0.0 {
                0.0
            } else {
                dot / (norm_a * norm_b)
            }
        }
    }
}

/// Convert f32 vector to bytes (little-endian).
fn vec_to_bytes(v: &[f32]) -> Vec<u8> {
    v.iter().flat_map(|f| f.to_le_bytes()).collect()
}

/// Convert little-endian bytes back to an f32 vector.
fn bytes_to_vec(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect()
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
