// Persistent vector database core
//
// Multi-tenant collections of documents, semantic chunks, and dense-vector
// embeddings over a durable region store, with a semantic ingestion
// pipeline, adaptive exact/approximate cosine search, and a bounded LRU
// vector cache. Embedding generation is an external port.

pub mod api;
pub mod cache;
pub mod clients;
pub mod config;
pub mod constants;
pub mod domain;
pub mod error;
pub mod repositories;
pub mod services;

// Re-export commonly used types
pub use api::{ValidationReport, VectorDb};
pub use cache::CacheStats;
pub use clients::{EmbeddingProvider, HttpEmbeddingClient, ProviderError};
pub use config::Config;
pub use error::{Result, VecBaseError};
