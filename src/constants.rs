//! Resource caps enforced by public operations
//!
//! Exceeding any of these returns `InvalidInput` or `ResourceExhausted`
//! without mutating state.

/// Maximum size of a single document's content, in characters.
pub const MAX_DOCUMENT_SIZE: usize = 10 * 1024 * 1024;

/// Maximum number of chunk texts sent to the embedding provider per call.
pub const MAX_BATCH_SIZE: usize = 50;

/// Maximum dimensionality accepted for any stored vector.
pub const MAX_EMBEDDING_DIMENSIONS: usize = 65_536;

/// Aggregate memory ceiling for the vector cache, in bytes.
pub const CACHE_MEMORY_LIMIT: u64 = 100 * 1024 * 1024;

/// Maximum number of collections held in the vector cache.
pub const CACHE_MAX_ENTRIES: usize = 1000;

/// Cache entry time-to-live, in seconds.
pub const CACHE_TTL_SECS: u64 = 24 * 60 * 60;

/// Hard cap on `k` for any search request; larger values are clamped.
pub const MAX_K_FOR_SEARCH: usize = 100;

/// Default `k` when a search request leaves it unset.
pub const DEFAULT_K: usize = 10;

/// Corpus size at which search switches from exact scan to the centroid index.
pub const APPROX_SEARCH_THRESHOLD: usize = 1000;

/// Cluster over-probing multiplier for approximate search.
pub const DEFAULT_CANDIDATE_FACTOR: f32 = 2.0;

/// Maximum length of a collection identifier.
pub const MAX_COLLECTION_ID_LEN: usize = 64;

/// Default target chunk size, in characters.
pub const DEFAULT_CHUNK_SIZE: u32 = 512;

/// Default overlap between adjacent chunks, in characters.
pub const DEFAULT_CHUNK_OVERLAP: u32 = 64;

/// Fixed per-vector bookkeeping overhead assumed by cache byte accounting.
pub const VECTOR_OVERHEAD_BYTES: u64 = 128;

/// Identifier prefixes refused for collection ids.
pub const RESERVED_ID_PREFIXES: [&str; 3] = ["__", "admin", "system"];
