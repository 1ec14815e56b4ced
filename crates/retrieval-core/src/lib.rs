//! retrieval-core - Core types and traits for the hybrid retrieval engine
//!
//! This crate provides the data model, the capability traits for every
//! external collaborator (vector store, embedders, query expansion,
//! rerankers), error handling and configuration shared by the rest of the
//! workspace.

pub mod config;
pub mod error;
pub mod traits;
pub mod types;

pub use config::*;
pub use error::{Result, RetrievalError};
pub use traits::*;
pub use types::*;
