//! Durable store: typed logical regions over an ordered byte keyspace
//!
//! Each region is an ordered map from byte keys to binary-encoded records,
//! backed by a dedicated SQLite table with a BLOB primary key. SQLite
//! compares BLOBs bytewise, so range scans over an encoded prefix enumerate
//! a collection's entries in ascending key order. Every compound operation
//! runs inside a single transaction: it commits all of its writes or none.

use crate::domain::{
    Collection, DocumentId, DocumentMetadata, SemanticChunk, Vector, VectorId,
};
use crate::error::{Result, VecBaseError};
use crate::repositories::keys::{composite_key, composite_prefix, prefix_upper_bound};
use rusqlite::{params, Connection, OptionalExtension};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{debug, info};

/// Logical regions of the durable store, with fixed integer ids.
///
/// Region ids and the composite-key encoding form the binary compatibility
/// contract for upgrades: a new build must read existing regions without
/// migration when the logical schema is unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Region {
    /// CollectionId -> Collection
    Collections = 0,
    /// (CollectionId, DocumentId) -> DocumentRecord
    Documents = 1,
    /// ChunkId -> SemanticChunk
    Chunks = 2,
    /// VectorId -> Vector
    Vectors = 3,
    /// (CollectionId, VectorId) -> DocumentId
    VectorIndex = 4,
    /// ChunkId -> DocumentId
    ChunkIndex = 5,
    /// (CollectionId, DocumentId) -> ()
    DocumentIndex = 6,
}

impl Region {
    const ALL: [Region; 7] = [
        Region::Collections,
        Region::Documents,
        Region::Chunks,
        Region::Vectors,
        Region::VectorIndex,
        Region::ChunkIndex,
        Region::DocumentIndex,
    ];

    fn table(self) -> &'static str {
        match self {
            Region::Collections => "region_0_collections",
            Region::Documents => "region_1_documents",
            Region::Chunks => "region_2_chunks",
            Region::Vectors => "region_3_vectors",
            Region::VectorIndex => "region_4_vector_index",
            Region::ChunkIndex => "region_5_chunk_index",
            Region::DocumentIndex => "region_6_document_index",
        }
    }
}

/// Region-1 value: document metadata plus the original content, kept
/// together so `get_document_content` returns input byte-identical.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct DocumentRecord {
    meta: DocumentMetadata,
    content: String,
}

/// The durable store owns all persisted bytes.
pub struct DurableStore {
    conn: Connection,
}

impl DurableStore {
    /// Open (or create) a durable store at `path`.
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        info!("Opening durable store at: {:?}", path.as_ref());

        if let Some(parent) = path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;

        let store = Self { conn };
        store.init_schema()?;

        Ok(store)
    }

    /// Create an in-memory store (useful for testing).
    pub fn in_memory() -> Result<Self> {
        debug!("Creating in-memory durable store");

        let conn = Connection::open_in_memory()?;
        let store = Self { conn };
        store.init_schema()?;

        Ok(store)
    }

    fn init_schema(&self) -> Result<()> {
        for region in Region::ALL {
            self.conn.execute(
                &format!(
                    "CREATE TABLE IF NOT EXISTS {} (
                        key BLOB PRIMARY KEY,
                        value BLOB NOT NULL
                    ) WITHOUT ROWID",
                    region.table()
                ),
                [],
            )?;
        }
        Ok(())
    }

    // ========================================================================
    // Raw region operations
    // ========================================================================

    /// Insert or overwrite `key` in `region`.
    pub fn put_raw(&mut self, region: Region, key: &[u8], value: &[u8]) -> Result<()> {
        raw_put(&self.conn, region, key, value)
    }

    /// Fetch the value stored under `key`, if any.
    pub fn get_raw(&self, region: Region, key: &[u8]) -> Result<Option<Vec<u8>>> {
        raw_get(&self.conn, region, key)
    }

    /// Remove `key` from `region`; removing an absent key is a no-op.
    pub fn delete_raw(&mut self, region: Region, key: &[u8]) -> Result<()> {
        raw_delete(&self.conn, region, key)
    }

    /// All `(key, value)` pairs whose key starts with `prefix`, ascending.
    pub fn scan_prefix(&self, region: Region, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        raw_scan_prefix(&self.conn, region, prefix)
    }

    /// Number of keys starting with `prefix`.
    pub fn count_prefix(&self, region: Region, prefix: &[u8]) -> Result<u64> {
        raw_count_prefix(&self.conn, region, prefix)
    }

    // ========================================================================
    // Collection records
    // ========================================================================

    /// Insert a new collection; fails with `AlreadyExists` when the id is taken.
    pub fn insert_collection(&mut self, collection: &Collection) -> Result<()> {
        if self.get_raw(Region::Collections, collection.id.as_bytes())?.is_some() {
            return Err(VecBaseError::AlreadyExists(format!(
                "collection '{}'",
                collection.id
            )));
        }
        let value = encode(collection)?;
        self.put_raw(Region::Collections, collection.id.as_bytes(), &value)
    }

    /// Overwrite an existing collection record.
    pub fn put_collection(&mut self, collection: &Collection) -> Result<()> {
        let value = encode(collection)?;
        self.put_raw(Region::Collections, collection.id.as_bytes(), &value)
    }

    pub fn get_collection(&self, id: &str) -> Result<Option<Collection>> {
        match self.get_raw(Region::Collections, id.as_bytes())? {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

    /// All collections in ascending id order.
    pub fn list_collections(&self) -> Result<Vec<Collection>> {
        self.scan_prefix(Region::Collections, &[])?
            .into_iter()
            .map(|(_, v)| decode(&v))
            .collect()
    }

    // ========================================================================
    // Document records
    // ========================================================================

    /// Commit a document's metadata, content, chunks, and index entries in
    /// one transaction.
    pub fn insert_document(
        &mut self,
        meta: &DocumentMetadata,
        content: &str,
        chunks: &[SemanticChunk],
    ) -> Result<()> {
        debug!(
            "Inserting document {} with {} chunks into {}",
            meta.id,
            chunks.len(),
            meta.collection_id
        );

        let record = DocumentRecord {
            meta: meta.clone(),
            content: content.to_string(),
        };
        let doc_key = composite_key(&[meta.collection_id.as_bytes(), meta.id.as_bytes()]);
        let doc_value = encode(&record)?;
        let index_key = doc_key.clone();

        let tx = self.conn.transaction()?;
        raw_put(&tx, Region::Documents, &doc_key, &doc_value)?;
        raw_put(&tx, Region::DocumentIndex, &index_key, &[])?;
        for chunk in chunks {
            raw_put(&tx, Region::Chunks, chunk.id.as_bytes(), &encode(chunk)?)?;
            raw_put(
                &tx,
                Region::ChunkIndex,
                chunk.id.as_bytes(),
                &encode(&chunk.document_id)?,
            )?;
        }
        tx.commit()?;

        Ok(())
    }

    pub fn get_document(&self, collection_id: &str, document_id: &str) -> Result<Option<DocumentMetadata>> {
        Ok(self.get_document_record(collection_id, document_id)?.map(|r| r.meta))
    }

    pub fn get_document_content(
        &self,
        collection_id: &str,
        document_id: &str,
    ) -> Result<Option<String>> {
        Ok(self
            .get_document_record(collection_id, document_id)?
            .map(|r| r.content))
    }

    fn get_document_record(
        &self,
        collection_id: &str,
        document_id: &str,
    ) -> Result<Option<DocumentRecord>> {
        let key = composite_key(&[collection_id.as_bytes(), document_id.as_bytes()]);
        match self.get_raw(Region::Documents, &key)? {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Overwrite a document's metadata, preserving its stored content.
    pub fn update_document_metadata(&mut self, meta: &DocumentMetadata) -> Result<()> {
        let record = self
            .get_document_record(&meta.collection_id, &meta.id)?
            .ok_or_else(|| VecBaseError::not_found(format!("document '{}'", meta.id)))?;

        let updated = DocumentRecord {
            meta: meta.clone(),
            content: record.content,
        };
        let key = composite_key(&[meta.collection_id.as_bytes(), meta.id.as_bytes()]);
        let value = encode(&updated)?;
        self.put_raw(Region::Documents, &key, &value)
    }

    /// Documents of a collection in ascending document-id order.
    pub fn list_documents(&self, collection_id: &str) -> Result<Vec<DocumentMetadata>> {
        let prefix = composite_prefix(&[collection_id.as_bytes()]);
        self.scan_prefix(Region::Documents, &prefix)?
            .into_iter()
            .map(|(_, v)| decode::<DocumentRecord>(&v).map(|r| r.meta))
            .collect()
    }

    pub fn document_count(&self, collection_id: &str) -> Result<u64> {
        let prefix = composite_prefix(&[collection_id.as_bytes()]);
        self.count_prefix(Region::DocumentIndex, &prefix)
    }

    /// Remove a document with its chunks, vectors, and index entries in one
    /// transaction. Returns false when the document does not exist.
    pub fn delete_document(&mut self, collection_id: &str, document_id: &str) -> Result<bool> {
        let doc_key = composite_key(&[collection_id.as_bytes(), document_id.as_bytes()]);
        if self.get_raw(Region::Documents, &doc_key)?.is_none() {
            return Ok(false);
        }

        let chunk_prefix = format!("{document_id}:c:");
        let vector_prefix = format!("{document_id}:v:");

        let tx = self.conn.transaction()?;
        for (vid_key, _) in raw_scan_prefix(&tx, Region::Vectors, vector_prefix.as_bytes())? {
            let index_key = composite_key(&[collection_id.as_bytes(), &vid_key]);
            raw_delete(&tx, Region::VectorIndex, &index_key)?;
        }
        raw_delete_prefix(&tx, Region::Vectors, vector_prefix.as_bytes())?;
        raw_delete_prefix(&tx, Region::Chunks, chunk_prefix.as_bytes())?;
        raw_delete_prefix(&tx, Region::ChunkIndex, chunk_prefix.as_bytes())?;
        raw_delete(&tx, Region::DocumentIndex, &doc_key)?;
        raw_delete(&tx, Region::Documents, &doc_key)?;
        tx.commit()?;

        info!("Deleted document {} from {}", document_id, collection_id);
        Ok(true)
    }

    // ========================================================================
    // Chunk records
    // ========================================================================

    pub fn get_chunk(&self, id: &str) -> Result<Option<SemanticChunk>> {
        match self.get_raw(Region::Chunks, id.as_bytes())? {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

    /// All chunks of a document, ordered by position.
    pub fn chunks_for_document(&self, document_id: &str) -> Result<Vec<SemanticChunk>> {
        let prefix = format!("{document_id}:c:");
        let mut chunks: Vec<SemanticChunk> = self
            .scan_prefix(Region::Chunks, prefix.as_bytes())?
            .into_iter()
            .map(|(_, v)| decode(&v))
            .collect::<Result<_>>()?;
        chunks.sort_by_key(|c| c.position);
        Ok(chunks)
    }

    /// Resolve the owning document of a chunk via the chunk index.
    pub fn document_id_for_chunk(&self, chunk_id: &str) -> Result<Option<DocumentId>> {
        match self.get_raw(Region::ChunkIndex, chunk_id.as_bytes())? {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

    // ========================================================================
    // Vector records
    // ========================================================================

    /// Write a batch of vectors and their index entries in one transaction.
    pub fn insert_vectors(&mut self, collection_id: &str, vectors: &[Vector]) -> Result<()> {
        let tx = self.conn.transaction()?;
        for vector in vectors {
            raw_put(&tx, Region::Vectors, vector.id.as_bytes(), &encode(vector)?)?;
            let index_key = composite_key(&[collection_id.as_bytes(), vector.id.as_bytes()]);
            raw_put(&tx, Region::VectorIndex, &index_key, &encode(&vector.document_id)?)?;
        }
        tx.commit()?;
        Ok(())
    }

    /// Remove the listed vectors and their index entries in one transaction.
    pub fn delete_vectors(&mut self, collection_id: &str, vector_ids: &[VectorId]) -> Result<()> {
        let tx = self.conn.transaction()?;
        for vid in vector_ids {
            raw_delete(&tx, Region::Vectors, vid.as_bytes())?;
            let index_key = composite_key(&[collection_id.as_bytes(), vid.as_bytes()]);
            raw_delete(&tx, Region::VectorIndex, &index_key)?;
        }
        tx.commit()?;
        Ok(())
    }

    pub fn get_vector(&self, id: &str) -> Result<Option<Vector>> {
        match self.get_raw(Region::Vectors, id.as_bytes())? {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

    /// All vectors of a document, ordered by position.
    pub fn vectors_for_document(&self, document_id: &str) -> Result<Vec<Vector>> {
        let prefix = format!("{document_id}:v:");
        let mut vectors: Vec<Vector> = self
            .scan_prefix(Region::Vectors, prefix.as_bytes())?
            .into_iter()
            .map(|(_, v)| decode(&v))
            .collect::<Result<_>>()?;
        vectors.sort_by_key(position_of);
        Ok(vectors)
    }

    /// Load every vector of a collection via the vector index.
    pub fn load_collection_vectors(&self, collection_id: &str) -> Result<Vec<Vector>> {
        let prefix = composite_prefix(&[collection_id.as_bytes()]);
        let entries = self.scan_prefix(Region::VectorIndex, &prefix)?;

        let mut vectors = Vec::with_capacity(entries.len());
        for (key, _) in entries {
            let vid = index_second_component(&key)?;
            match self.get_raw(Region::Vectors, &vid)? {
                Some(bytes) => vectors.push(decode(&bytes)?),
                None => {
                    return Err(VecBaseError::CorruptState(format!(
                        "vector index entry without vector in '{collection_id}'"
                    )))
                }
            }
        }
        Ok(vectors)
    }

    pub fn vector_count(&self, collection_id: &str) -> Result<u64> {
        let prefix = composite_prefix(&[collection_id.as_bytes()]);
        self.count_prefix(Region::VectorIndex, &prefix)
    }

    /// Dimensionality established by the collection's first stored vector.
    pub fn established_dimension(&self, collection_id: &str) -> Result<Option<usize>> {
        let prefix = composite_prefix(&[collection_id.as_bytes()]);
        let bound = prefix_upper_bound(&prefix);

        let first_key: Option<Vec<u8>> = match bound {
            Some(hi) => self
                .conn
                .query_row(
                    &format!(
                        "SELECT key FROM {} WHERE key >= ?1 AND key < ?2 ORDER BY key LIMIT 1",
                        Region::VectorIndex.table()
                    ),
                    params![prefix, hi],
                    |row| row.get(0),
                )
                .optional()?,
            None => self
                .conn
                .query_row(
                    &format!(
                        "SELECT key FROM {} WHERE key >= ?1 ORDER BY key LIMIT 1",
                        Region::VectorIndex.table()
                    ),
                    params![prefix],
                    |row| row.get(0),
                )
                .optional()?,
        };

        match first_key {
            Some(key) => {
                let vid = index_second_component(&key)?;
                match self.get_raw(Region::Vectors, &vid)? {
                    Some(bytes) => {
                        let vector: Vector = decode(&bytes)?;
                        Ok(Some(vector.embedding.len()))
                    }
                    None => Ok(None),
                }
            }
            None => Ok(None),
        }
    }

    /// Remove every vector of a document. Returns the number removed.
    pub fn delete_document_vectors(&mut self, collection_id: &str, document_id: &str) -> Result<u64> {
        let prefix = format!("{document_id}:v:");

        let tx = self.conn.transaction()?;
        let entries = raw_scan_prefix(&tx, Region::Vectors, prefix.as_bytes())?;
        let removed = entries.len() as u64;
        for (vid_key, _) in entries {
            let index_key = composite_key(&[collection_id.as_bytes(), &vid_key]);
            raw_delete(&tx, Region::VectorIndex, &index_key)?;
            raw_delete(&tx, Region::Vectors, &vid_key)?;
        }
        tx.commit()?;

        Ok(removed)
    }

    // ========================================================================
    // Cascades
    // ========================================================================

    /// Remove a collection and everything it owns in one transaction.
    pub fn delete_collection_cascade(&mut self, collection_id: &str) -> Result<()> {
        let doc_prefix = composite_prefix(&[collection_id.as_bytes()]);

        let tx = self.conn.transaction()?;
        let documents = raw_scan_prefix(&tx, Region::DocumentIndex, &doc_prefix)?;
        for (key, _) in documents {
            let did = index_second_component(&key)?;
            let did = String::from_utf8(did).map_err(|_| {
                VecBaseError::CorruptState("non-UTF-8 document id in index".to_string())
            })?;
            raw_delete_prefix(&tx, Region::Chunks, format!("{did}:c:").as_bytes())?;
            raw_delete_prefix(&tx, Region::ChunkIndex, format!("{did}:c:").as_bytes())?;
            raw_delete_prefix(&tx, Region::Vectors, format!("{did}:v:").as_bytes())?;
        }
        raw_delete_prefix(&tx, Region::VectorIndex, &doc_prefix)?;
        raw_delete_prefix(&tx, Region::DocumentIndex, &doc_prefix)?;
        raw_delete_prefix(&tx, Region::Documents, &doc_prefix)?;
        raw_delete(&tx, Region::Collections, collection_id.as_bytes())?;
        tx.commit()?;

        info!("Deleted collection {} and all owned records", collection_id);
        Ok(())
    }
}

// ============================================================================
// Connection-level helpers (shared by direct calls and transactions)
// ============================================================================

fn raw_put(conn: &Connection, region: Region, key: &[u8], value: &[u8]) -> Result<()> {
    conn.execute(
        &format!(
            "INSERT OR REPLACE INTO {} (key, value) VALUES (?1, ?2)",
            region.table()
        ),
        params![key, value],
    )
    .map_err(map_write_err)?;
    Ok(())
}

fn raw_get(conn: &Connection, region: Region, key: &[u8]) -> Result<Option<Vec<u8>>> {
    let value = conn
        .query_row(
            &format!("SELECT value FROM {} WHERE key = ?1", region.table()),
            params![key],
            |row| row.get(0),
        )
        .optional()?;
    Ok(value)
}

fn raw_delete(conn: &Connection, region: Region, key: &[u8]) -> Result<()> {
    conn.execute(
        &format!("DELETE FROM {} WHERE key = ?1", region.table()),
        params![key],
    )?;
    Ok(())
}

fn raw_delete_prefix(conn: &Connection, region: Region, prefix: &[u8]) -> Result<()> {
    match prefix_upper_bound(prefix) {
        Some(hi) => {
            conn.execute(
                &format!(
                    "DELETE FROM {} WHERE key >= ?1 AND key < ?2",
                    region.table()
                ),
                params![prefix, hi],
            )?;
        }
        None => {
            conn.execute(
                &format!("DELETE FROM {} WHERE key >= ?1", region.table()),
                params![prefix],
            )?;
        }
    }
    Ok(())
}

fn raw_scan_prefix(
    conn: &Connection,
    region: Region,
    prefix: &[u8],
) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
    let rows = match prefix_upper_bound(prefix) {
        Some(hi) => {
            let mut stmt = conn.prepare(&format!(
                "SELECT key, value FROM {} WHERE key >= ?1 AND key < ?2 ORDER BY key",
                region.table()
            ))?;
            let rows = stmt
                .query_map(params![prefix, hi], |row| Ok((row.get(0)?, row.get(1)?)))?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            rows
        }
        None => {
            let mut stmt = conn.prepare(&format!(
                "SELECT key, value FROM {} WHERE key >= ?1 ORDER BY key",
                region.table()
            ))?;
            let rows = stmt
                .query_map(params![prefix], |row| Ok((row.get(0)?, row.get(1)?)))?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            rows
        }
    };
    Ok(rows)
}

fn raw_count_prefix(conn: &Connection, region: Region, prefix: &[u8]) -> Result<u64> {
    let count: i64 = match prefix_upper_bound(prefix) {
        Some(hi) => conn.query_row(
            &format!(
                "SELECT COUNT(*) FROM {} WHERE key >= ?1 AND key < ?2",
                region.table()
            ),
            params![prefix, hi],
            |row| row.get(0),
        )?,
        None => conn.query_row(
            &format!("SELECT COUNT(*) FROM {} WHERE key >= ?1", region.table()),
            params![prefix],
            |row| row.get(0),
        )?,
    };
    Ok(count as u64)
}

/// Second component of a two-part composite index key.
fn index_second_component(key: &[u8]) -> Result<Vec<u8>> {
    let parts = crate::repositories::keys::split_composite(key)
        .ok_or_else(|| VecBaseError::CorruptState("malformed composite index key".to_string()))?;
    parts
        .into_iter()
        .nth(1)
        .ok_or_else(|| VecBaseError::CorruptState("index key missing second component".to_string()))
}

fn position_of(vector: &Vector) -> u32 {
    vector
        .id
        .rsplit(':')
        .next()
        .and_then(|p| p.parse().ok())
        .unwrap_or(u32::MAX)
}

fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    Ok(rmp_serde::to_vec(value)?)
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    Ok(rmp_serde::from_slice(bytes)?)
}

/// A full store surfaces as `ResourceExhausted` rather than a plain
/// database error.
fn map_write_err(e: rusqlite::Error) -> VecBaseError {
    if let rusqlite::Error::SqliteFailure(err, _) = &e {
        if err.code == rusqlite::ErrorCode::DiskFull {
            return VecBaseError::ResourceExhausted("store capacity".to_string());
        }
    }
    VecBaseError::Database(e)
}
