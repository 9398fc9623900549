//! Core domain types for the vector database
//!
//! Identifiers are opaque ASCII-safe strings. Chunk and vector ids are
//! derived from the owning document id so that rebuilding an index from
//! chunks yields stable ids.

use crate::constants::{
    DEFAULT_CHUNK_OVERLAP, DEFAULT_CHUNK_SIZE, MAX_COLLECTION_ID_LEN, MAX_EMBEDDING_DIMENSIONS,
    RESERVED_ID_PREFIXES,
};
use crate::error::{Result, VecBaseError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Identifier of a collection (1-64 chars of `[A-Za-z0-9_-]`).
pub type CollectionId = String;

/// Identifier of a document within a collection.
pub type DocumentId = String;

/// Identifier of a chunk, derived as `<document_id>:c:<position>`.
pub type ChunkId = String;

/// Identifier of a vector, derived as `<document_id>:v:<position>`.
pub type VectorId = String;

/// An opaque caller identity.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Principal(pub String);

impl Principal {
    pub fn new(id: impl Into<String>) -> Self {
        Principal(id.into())
    }
}

impl std::fmt::Display for Principal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Admin authority of a caller over a collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AdminLevel {
    /// The single principal allowed to manage the admin set and delete
    /// the collection.
    Genesis,
    /// A regular admin: may ingest, embed, and update settings.
    Admin,
    /// No authority.
    None,
}

/// Per-collection configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectionSettings {
    /// Model name forwarded to the embedding provider (opaque to the core).
    pub embedding_model: String,

    /// Target chunk size in characters.
    pub chunk_size: u32,

    /// Characters of overlap between adjacent chunks; must be `< chunk_size`.
    pub chunk_overlap: u32,

    /// Optional cap on the number of documents in the collection.
    pub max_documents: Option<u32>,

    /// Whether `add_document` should also run the embed phase.
    pub auto_embed: bool,

    /// Endpoint override forwarded to the embedding provider (opaque).
    pub proxy_url: String,
}

impl Default for CollectionSettings {
    fn default() -> Self {
        Self {
            embedding_model: "nomic-embed-text".to_string(),
            chunk_size: DEFAULT_CHUNK_SIZE,
            chunk_overlap: DEFAULT_CHUNK_OVERLAP,
            max_documents: None,
            auto_embed: true,
            proxy_url: String::new(),
        }
    }
}

impl CollectionSettings {
    /// Validate internal consistency of the settings.
    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 {
            return Err(VecBaseError::invalid("chunk_size", "must be positive"));
        }
        if self.chunk_overlap >= self.chunk_size {
            return Err(VecBaseError::invalid(
                "chunk_overlap",
                format!(
                    "overlap {} must be smaller than chunk size {}",
                    self.chunk_overlap, self.chunk_size
                ),
            ));
        }
        if self.embedding_model.is_empty() {
            return Err(VecBaseError::invalid("embedding_model", "must not be empty"));
        }
        Ok(())
    }
}

/// A logical namespace holding documents, chunks, and vectors
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Collection {
    pub id: CollectionId,
    pub name: String,
    pub description: Option<String>,

    /// Monotonic nanosecond timestamps.
    pub created_at: u64,
    pub updated_at: u64,

    /// The single principal with full authority; not duplicated in `admins`.
    pub genesis_admin: Principal,

    /// Regular admins. Genesis authority is derived from `genesis_admin`.
    pub admins: BTreeSet<Principal>,

    pub settings: CollectionSettings,
}

impl Collection {
    /// Create a new collection owned by `genesis` with the given settings.
    pub fn new(
        id: CollectionId,
        name: String,
        description: Option<String>,
        genesis: Principal,
        settings: CollectionSettings,
    ) -> Self {
        let now = now_nanos();
        Self {
            id,
            name,
            description,
            created_at: now,
            updated_at: now,
            genesis_admin: genesis,
            admins: BTreeSet::new(),
            settings,
        }
    }

    /// True when `principal` is the genesis admin or a regular admin.
    pub fn is_admin(&self, principal: &Principal) -> bool {
        self.genesis_admin == *principal || self.admins.contains(principal)
    }

    /// Admin authority of `principal` over this collection.
    pub fn admin_level(&self, principal: &Principal) -> AdminLevel {
        if self.genesis_admin == *principal {
            AdminLevel::Genesis
        } else if self.admins.contains(principal) {
            AdminLevel::Admin
        } else {
            AdminLevel::None
        }
    }

    /// All admins including genesis, genesis first.
    pub fn all_admins(&self) -> Vec<Principal> {
        let mut out = Vec::with_capacity(self.admins.len() + 1);
        out.push(self.genesis_admin.clone());
        for admin in &self.admins {
            if *admin != self.genesis_admin {
                out.push(admin.clone());
            }
        }
        out
    }
}

/// Content format of an ingested document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ContentType {
    PlainText,
    Markdown,
    Html,
    Pdf,
    Other(String),
}

impl Default for ContentType {
    fn default() -> Self {
        ContentType::PlainText
    }
}

/// Metadata describing an ingested document
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentMetadata {
    pub id: DocumentId,
    pub collection_id: CollectionId,
    pub title: String,
    pub content_type: ContentType,
    pub source_url: Option<String>,
    pub author: Option<String>,
    pub tags: Option<Vec<String>>,

    /// Nanosecond timestamp of ingestion.
    pub timestamp: u64,

    /// Original content length in characters.
    pub size: u64,

    /// Count of chunks stored for this document.
    pub total_chunks: u32,

    /// True iff every chunk has a vector under the collection's current model.
    pub is_embedded: bool,

    /// Lowercase hex SHA-256 of the content.
    pub checksum: String,
}

/// A contiguous span of a document used as the unit of embedding and retrieval
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SemanticChunk {
    pub id: ChunkId,
    pub document_id: DocumentId,
    pub text: String,

    /// Zero-indexed, strictly increasing by 1 within a document.
    pub position: u32,

    /// Character offsets into the original content, `start < end`.
    pub char_start: u64,
    pub char_end: u64,

    /// Approximate token count (for reference).
    pub token_count: Option<u32>,
}

/// A dense embedding of a chunk, with precomputed L2 norm
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Vector {
    pub id: VectorId,
    pub document_id: DocumentId,
    pub chunk_id: ChunkId,
    pub embedding: Vec<f32>,

    /// Precomputed L2 norm; always `> 0` for stored vectors.
    pub norm: f32,

    /// Model that produced the embedding.
    pub model: String,

    pub created_at: u64,
}

impl Vector {
    /// Build a vector for `chunk` at `position` of `document_id`, validating
    /// the embedding and precomputing its norm.
    pub fn from_embedding(
        document_id: &str,
        position: u32,
        model: &str,
        embedding: Vec<f32>,
    ) -> Result<Self> {
        let norm = validate_embedding(&embedding)?;
        Ok(Self {
            id: vector_id(document_id, position),
            document_id: document_id.to_string(),
            chunk_id: chunk_id(document_id, position),
            embedding,
            norm,
            model: model.to_string(),
            created_at: now_nanos(),
        })
    }
}

/// A single search hit, optionally enriched with document/chunk context.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchMatch {
    pub document_id: DocumentId,
    pub chunk_id: ChunkId,
    pub score: f32,
    pub document_title: Option<String>,
    pub chunk_text: Option<String>,
}

/// A collection together with counts from the secondary indexes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectionWithStats {
    pub collection: Collection,
    pub document_count: u64,
    pub vector_count: u64,
}

/// Request to create a collection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateCollectionRequest {
    pub id: CollectionId,
    pub name: String,
    pub description: Option<String>,

    /// Defaults apply when absent.
    pub settings: Option<CollectionSettings>,
}

/// Request to ingest a document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddDocumentRequest {
    pub collection_id: CollectionId,
    pub title: String,
    pub content: String,
    pub content_type: Option<ContentType>,
    pub source_url: Option<String>,
    pub author: Option<String>,
    pub tags: Option<Vec<String>>,
}

/// Request for a similarity search.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchRequest {
    pub collection_id: CollectionId,

    /// Query text, embedded through the collection's model.
    pub query: String,

    /// Defaults to 10, capped at 100.
    pub k: Option<usize>,

    pub min_score: Option<f32>,

    /// Restrict matches to these documents.
    pub filter: Option<Vec<DocumentId>>,

    /// Opt out of the centroid index regardless of corpus size.
    pub use_approximate: Option<bool>,

    /// Overrides the collection's `proxy_url` when non-empty.
    pub proxy_url: Option<String>,
}

// ============================================================================
// Identifier derivation and validation
// ============================================================================

/// Derive the chunk id for `position` of `document_id`.
pub fn chunk_id(document_id: &str, position: u32) -> ChunkId {
    format!("{document_id}:c:{position}")
}

/// Derive the vector id for `position` of `document_id`.
pub fn vector_id(document_id: &str, position: u32) -> VectorId {
    format!("{document_id}:v:{position}")
}

/// Generate a fresh document id: a short human-readable prefix from the
/// sanitized title plus a random 64-bit hex suffix.
pub fn new_document_id(title: &str) -> DocumentId {
    let prefix: String = title
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .take(4)
        .collect::<String>()
        .to_lowercase();
    let prefix = if prefix.is_empty() { "doc".to_string() } else { prefix };
    let suffix: u64 = rand::random();
    format!("{prefix}_{suffix:016x}")
}

/// Validate the shape of a collection id.
pub fn validate_collection_id(id: &str) -> Result<()> {
    if id.is_empty() || id.len() > MAX_COLLECTION_ID_LEN {
        return Err(VecBaseError::invalid(
            "collection_id",
            format!("must be 1-{MAX_COLLECTION_ID_LEN} characters"),
        ));
    }
    if !id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    {
        return Err(VecBaseError::invalid(
            "collection_id",
            "only [A-Za-z0-9_-] is allowed",
        ));
    }
    for prefix in RESERVED_ID_PREFIXES {
        if id.starts_with(prefix) {
            return Err(VecBaseError::invalid(
                "collection_id",
                format!("prefix '{prefix}' is reserved"),
            ));
        }
    }
    Ok(())
}

/// Validate an embedding and return its L2 norm.
///
/// Rejects empty or oversized embeddings, non-finite components, and zero
/// norms.
pub fn validate_embedding(embedding: &[f32]) -> Result<f32> {
    if embedding.is_empty() {
        return Err(VecBaseError::invalid("embedding", "must not be empty"));
    }
    if embedding.len() > MAX_EMBEDDING_DIMENSIONS {
        return Err(VecBaseError::invalid(
            "embedding",
            format!(
                "dimension {} exceeds the maximum of {MAX_EMBEDDING_DIMENSIONS}",
                embedding.len()
            ),
        ));
    }
    if embedding.iter().any(|x| !x.is_finite()) {
        return Err(VecBaseError::invalid(
            "embedding",
            "all components must be finite",
        ));
    }
    let norm = l2_norm(embedding);
    if !(norm > 0.0 && norm.is_finite()) {
        return Err(VecBaseError::invalid("embedding", "norm must be positive"));
    }
    Ok(norm)
}

/// L2 norm of a vector.
pub fn l2_norm(v: &[f32]) -> f32 {
    v.iter().map(|x| x * x).sum::<f32>().sqrt()
}

/// Lowercase hex SHA-256 of `content`.
pub fn checksum_hex(content: &str) -> String {
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Current wall-clock time in nanoseconds since the Unix epoch.
pub fn now_nanos() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or_default()
}
