//! Core domain types for the retrieval engine.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;

/// Ordered key/value metadata attached to a point and to search results.
pub type Metadata = Map<String, Value>;

/// Dense vector distance metric.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Distance {
    Cosine,
    Dot,
}

impl Distance {
    /// Parse a distance name as stored by the vector store.
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_lowercase().as_str() {
            "cosine" => Some(Self::Cosine),
            "dot" => Some(Self::Dot),
            _ => None,
        }
    }

    /// Name used when persisting the schema.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Cosine => "cosine",
            Self::Dot => "dot",
        }
    }
}

impl std::fmt::Display for Distance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Parameters of the default (unnamed) dense vector field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DenseVectorParams {
    /// Vector dimensionality.
    pub size: usize,

    /// Similarity metric.
    pub distance: Distance,
}

/// Vector schema of a collection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionSchema {
    /// The default (unnamed) dense vector field.
    pub dense: DenseVectorParams,

    /// Name of the sparse vector field, if any.
    pub sparse_vector: Option<String>,
}

impl CollectionSchema {
    /// A schema with only the default dense field.
    pub fn dense_only(size: usize, distance: Distance) -> Self {
        Self {
            dense: DenseVectorParams { size, distance },
            sparse_vector: None,
        }
    }

    /// A schema with the default dense field plus a named sparse field.
    pub fn hybrid(size: usize, distance: Distance, sparse_name: &str) -> Self {
        Self {
            dense: DenseVectorParams { size, distance },
            sparse_vector: Some(sparse_name.to_string()),
        }
    }

    /// Schema state of an existing collection with this schema.
    pub fn state(&self) -> SchemaState {
        if self.sparse_vector.is_some() {
            SchemaState::Hybrid
        } else {
            SchemaState::DenseOnly
        }
    }

    /// Whether the schema carries a sparse field with the given name.
    pub fn has_sparse(&self, name: &str) -> bool {
        self.sparse_vector.as_deref() == Some(name)
    }
}

/// Lifecycle state of the engine's collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SchemaState {
    Uninitialized,
    DenseOnly,
    Hybrid,
}

impl SchemaState {
    /// State derived from a collection lookup (`None` = does not exist).
    pub fn of(info: Option<&CollectionInfo>) -> Self {
        info.map(|i| i.schema.state())
            .unwrap_or(SchemaState::Uninitialized)
    }
}

/// Description of a collection as reported by the store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectionInfo {
    /// Collection name.
    pub name: String,

    /// Vector schema.
    pub schema: CollectionSchema,

    /// Number of stored points.
    pub points_count: u64,

    /// Creation timestamp (Unix millis).
    pub created_at: u64,
}

/// Sparse vector as parallel index/value arrays.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SparseVector {
    pub indices: Vec<u32>,
    pub values: Vec<f32>,
}

impl SparseVector {
    /// Create a sparse vector, checking that both arrays have the same length.
    pub fn new(indices: Vec<u32>, values: Vec<f32>) -> crate::Result<Self> {
        if indices.len() != values.len() {
            return Err(crate::RetrievalError::invalid_argument(format!(
                "sparse vector has {} indices but {} values",
                indices.len(),
                values.len()
            )));
        }
        Ok(Self { indices, values })
    }

    /// Number of non-zero entries.
    pub fn len(&self) -> usize {
        self.indices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    /// Dot product over shared indices.
    pub fn dot(&self, other: &SparseVector) -> f32 {
        let (small, large) = if self.len() <= other.len() {
            (self, other)
        } else {
            (other, self)
        };

        let lookup: HashMap<u32, f32> = small
            .indices
            .iter()
            .copied()
            .zip(small.values.iter().copied())
            .collect();

        large
            .indices
            .iter()
            .zip(large.values.iter())
            .filter_map(|(idx, v)| lookup.get(idx).map(|w| w * v))
            .sum()
    }
}

/// Sparse vector bound to a named sparse field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NamedSparseVector {
    pub name: String,
    pub vector: SparseVector,
}

/// Point payload: the fragment text and its metadata.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Payload {
    /// Fragment text.
    pub content: String,

    /// Source file, chunk index, file hash, content hash, ...
    #[serde(default)]
    pub metadata: Metadata,
}

/// A stored point.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Point {
    /// Store-assigned key.
    pub id: String,

    /// Default dense vector (empty when read without vectors).
    #[serde(default)]
    pub vector: Vec<f32>,

    /// Optional named sparse vector.
    #[serde(default)]
    pub sparse: Option<NamedSparseVector>,

    /// Payload.
    pub payload: Payload,
}

/// A point returned by a similarity query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredPoint {
    pub id: String,
    pub score: f32,
    pub payload: Payload,
}

/// Query vector for a single-vector search.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryVector {
    /// Search the default dense field.
    Dense(Vec<f32>),

    /// Search a named sparse field.
    Sparse(NamedSparseVector),
}

/// One branch of a prefetch + fusion query.
#[derive(Debug, Clone, PartialEq)]
pub struct Prefetch {
    pub query: QueryVector,
    pub limit: usize,
}

/// Multi-vector query whose prefetch branches are fused with RRF by the store.
#[derive(Debug, Clone, PartialEq)]
pub struct FusionQuery {
    /// Candidate branches.
    pub prefetch: Vec<Prefetch>,

    /// Maximum number of fused results.
    pub limit: usize,

    /// Minimum fused score.
    pub score_threshold: Option<f32>,
}

/// Exact-match filter on a metadata key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetadataFilter {
    pub key: String,
    pub value: Value,
}

impl MetadataFilter {
    pub fn new(key: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }

    /// Check whether a payload satisfies the filter.
    pub fn matches(&self, payload: &Payload) -> bool {
        payload.metadata.get(&self.key) == Some(&self.value)
    }
}

/// Paginated scroll request.
#[derive(Debug, Clone, Default)]
pub struct ScrollRequest {
    pub filter: Option<MetadataFilter>,
    pub limit: usize,
    pub offset: u64,
    pub with_vectors: bool,
}

/// One page of a scroll.
#[derive(Debug, Clone, Default)]
pub struct ScrollPage {
    pub points: Vec<Point>,

    /// Offset of the next page, `None` when exhausted.
    pub next_offset: Option<u64>,
}

/// A ranked content fragment.
///
/// `score` semantics depend on the pipeline stage that produced it (raw
/// similarity, normalized similarity, RRF score or rerank relevance); scores
/// are only comparable within one stage's output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    /// Store point id.
    pub id: String,

    /// Fragment text.
    pub content: String,

    /// Stage-dependent relevance score (higher is better).
    pub score: f32,

    /// Point metadata plus pipeline annotations.
    #[serde(default)]
    pub metadata: Metadata,
}

impl SearchResult {
    /// Create a result without metadata.
    pub fn new(id: impl Into<String>, content: impl Into<String>, score: f32) -> Self {
        Self {
            id: id.into(),
            content: content.into(),
            score,
            metadata: Metadata::new(),
        }
    }

    /// Add a metadata entry.
    pub fn with_metadata(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.to_string(), value.into());
        self
    }
}

impl From<ScoredPoint> for SearchResult {
    fn from(point: ScoredPoint) -> Self {
        Self {
            id: point.id,
            content: point.payload.content,
            score: point.score,
            metadata: point.payload.metadata,
        }
    }
}

/// A candidate handed to a reranking provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RerankDocument {
    /// Position in the caller's result list.
    pub index: usize,

    /// Text to score.
    pub text: String,
}

/// A provider's relevance judgement for one candidate.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RerankScore {
    /// Position in the caller's result list.
    pub index: usize,

    /// Relevance score.
    pub relevance_score: f32,
}

/// Outcome of a provider call.
#[derive(Debug, Clone, PartialEq)]
pub enum Ranking {
    /// Ranked subset, in provider order.
    Scored(Vec<RerankScore>),

    /// The provider answered but produced nothing usable; keep the
    /// pre-rerank ordering.
    KeepOriginal,
}

/// One query produced by the expansion engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExpansionCandidate {
    /// Expanded query text.
    pub query: String,

    /// Any extra fields the expander returns (intent, weight, ...).
    #[serde(flatten)]
    pub extra: Metadata,
}

/// Output of the query expansion engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExpandedQuery {
    /// Query the expansion was generated from.
    pub original_query: String,

    /// Expanded queries, best first.
    pub expanded_queries: Vec<ExpansionCandidate>,
}

/// Raw fragment handed to indexing.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChunkInput {
    pub content: String,

    #[serde(default)]
    pub metadata: Metadata,
}

/// Fragment with its embeddings, ready to upsert.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbeddedChunk {
    pub content: String,
    pub metadata: Metadata,
    pub dense: Vec<f32>,
    pub sparse: Option<SparseVector>,
}

/// One source document as listed from the collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentSummary {
    /// Id of the first point seen for this document.
    pub id: String,
    pub filename: String,
    pub file_type: String,
    pub file_size: u64,
    pub upload_date: f64,
    pub chunk_count: u64,
}

/// A page of the document listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentPage {
    pub documents: Vec<DocumentSummary>,
    pub total_count: u64,
    pub page: usize,
    pub page_size: usize,
    pub has_next: bool,
}

/// Detailed view of the engine's collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectionDetails {
    pub name: String,
    pub state: SchemaState,
    pub dense_size: usize,
    pub distance: Distance,
    pub sparse_vector: Option<String>,
    pub points_count: u64,

    /// Estimated dense vector storage in MiB (four bytes per dimension).
    pub size_mb: f64,

    /// Creation timestamp (Unix millis), `None` when the collection is missing.
    pub created_at: Option<u64>,
}

impl CollectionDetails {
    /// Describe an existing collection.
    pub fn from_info(info: CollectionInfo) -> Self {
        let bytes = info.points_count as f64 * info.schema.dense.size as f64 * 4.0;
        let size_mb = (bytes / (1024.0 * 1024.0) * 100.0).round() / 100.0;
        Self {
            name: info.name,
            state: info.schema.state(),
            dense_size: info.schema.dense.size,
            distance: info.schema.dense.distance,
            sparse_vector: info.schema.sparse_vector,
            points_count: info.points_count,
            size_mb,
            created_at: Some(info.created_at),
        }
    }

    /// Describe a collection that does not exist yet.
    pub fn missing(name: &str, schema: &CollectionSchema) -> Self {
        Self {
            name: name.to_string(),
            state: SchemaState::Uninitialized,
            dense_size: schema.dense.size,
            distance: schema.dense.distance,
            sparse_vector: None,
            points_count: 0,
            size_mb: 0.0,
            created_at: None,
        }
    }
}

/// One point's payload captured by a metadata backup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetadataBackup {
    pub id: String,
    pub payload: Payload,

    /// Unix seconds.
    pub backup_timestamp: u64,
}

/// Snapshot of in-memory counters and collection facts.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RetrievalStats {
    pub total_searches: u64,
    pub hybrid_searches: u64,
    pub native_fusion_searches: u64,
    pub manual_fusion_searches: u64,
    pub dense_only_searches: u64,
    pub query_expansions: u64,
    pub rerank_requests: u64,
    pub collection_name: String,
    pub points_count: u64,
    pub hybrid_search_enabled: bool,
    pub sparse_embedder_available: bool,
    pub dense_weight: f32,
    pub sparse_weight: f32,
    pub reranking_enabled: bool,
    pub available_rerankers: Vec<String>,
}
