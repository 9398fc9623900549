//! Core services: chunking, ingestion, search, and collection management

pub mod chunking;
pub mod collections;
pub mod ingestion;
pub mod search;

pub use collections::CollectionManager;
pub use ingestion::Ingestor;
