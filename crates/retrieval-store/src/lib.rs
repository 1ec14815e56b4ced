//! retrieval-store - Embedded vector store over SQLite
//!
//! This crate provides persistent storage for collections of points (a dense
//! vector, an optional named sparse vector and a JSON payload) with
//! single-vector similarity search, prefetch + RRF fused queries and
//! paginated scrolling.

mod schema;
mod sqlite;

pub use sqlite::SqliteStore;

// Re-export schema for testing/migrations
pub use schema::{SCHEMA, SCHEMA_VERSION};
