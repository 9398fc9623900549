//! Outbound ports and their adapters

pub mod embedding;

pub use embedding::{EmbeddingProvider, HttpEmbeddingClient, ProviderError};
