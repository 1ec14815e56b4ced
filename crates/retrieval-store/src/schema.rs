//! Database schema definitions.

/// Main schema SQL for initializing the database.
pub const SCHEMA: &str = r#"
-- Collections table
CREATE TABLE IF NOT EXISTS collections (
    name TEXT PRIMARY KEY,
    dense_size INTEGER NOT NULL,
    distance TEXT NOT NULL,
    sparse_name TEXT,
    created_at INTEGER NOT NULL
);

-- Points table, seq gives a stable scroll order
CREATE TABLE IF NOT EXISTS points (
    seq INTEGER PRIMARY KEY AUTOINCREMENT,
    collection TEXT NOT NULL REFERENCES collections(name) ON DELETE CASCADE,
    id TEXT NOT NULL,
    dense BLOB NOT NULL,
    sparse TEXT,
    content TEXT NOT NULL,
    metadata TEXT NOT NULL DEFAULT '{}',
    UNIQUE(collection, id)
);

CREATE INDEX IF NOT EXISTS idx_points_collection ON points(collection, seq);
"#;

/// Schema version for migrations.
pub const SCHEMA_VERSION: u32 = 1;
