//! Document ingestion pipeline
//!
//! Commits a document and its chunks in one transaction, then runs the
//! embed phase: batched calls to the embedding provider, per-vector
//! validation, and full rollback of already-written vectors on any failure.
//! The document and its chunks survive a failed embed so callers can retry
//! with `embed_existing_document`.

use crate::cache::VectorCache;
use crate::clients::{EmbeddingProvider, ProviderError};
use crate::constants::{MAX_BATCH_SIZE, MAX_DOCUMENT_SIZE};
use crate::domain::{
    checksum_hex, new_document_id, now_nanos, AddDocumentRequest, Collection, CollectionId,
    ContentType, DocumentId, DocumentMetadata, SemanticChunk, Vector, VectorId,
};
use crate::error::{Result, VecBaseError};
use crate::repositories::DurableStore;
use crate::services::chunking::chunk_document;
use tracing::{debug, info, warn};
use unicode_segmentation::UnicodeSegmentation;

/// Documents with an embed phase currently running, keyed by
/// `(collection_id, document_id)`. Membership is test-and-set atomic under
/// the single-threaded scheduler.
pub type InFlightSet = std::collections::HashSet<(CollectionId, DocumentId)>;

/// Per-operation ingestion pipeline over the store, cache, and embedding port.
pub struct Ingestor<'a> {
    store: &'a mut DurableStore,
    cache: &'a mut VectorCache,
    embedder: &'a dyn EmbeddingProvider,
    in_flight: &'a mut InFlightSet,
}

impl<'a> Ingestor<'a> {
    pub fn new(
        store: &'a mut DurableStore,
        cache: &'a mut VectorCache,
        embedder: &'a dyn EmbeddingProvider,
        in_flight: &'a mut InFlightSet,
    ) -> Self {
        Self {
            store,
            cache,
            embedder,
            in_flight,
        }
    }

    /// Store a document and its chunks without embedding.
    pub fn add_document(
        &mut self,
        collection: &Collection,
        req: &AddDocumentRequest,
    ) -> Result<DocumentMetadata> {
        if req.content.len() > MAX_DOCUMENT_SIZE {
            return Err(VecBaseError::ResourceExhausted(format!(
                "document exceeds {MAX_DOCUMENT_SIZE} bytes"
            )));
        }
        if req.title.trim().is_empty() {
            return Err(VecBaseError::invalid("title", "must not be empty"));
        }
        if let Some(cap) = collection.settings.max_documents {
            let current = self.store.document_count(&collection.id)?;
            if current >= cap as u64 {
                return Err(VecBaseError::ResourceExhausted(format!(
                    "collection document cap of {cap}"
                )));
            }
        }

        let document_id = new_document_id(&req.title);
        let size = req.content.graphemes(true).count() as u64;
        let chunks = chunk_document(
            &req.content,
            &document_id,
            collection.settings.chunk_size,
            collection.settings.chunk_overlap,
        );

        let meta = DocumentMetadata {
            id: document_id,
            collection_id: collection.id.clone(),
            title: req.title.clone(),
            content_type: req.content_type.clone().unwrap_or(ContentType::PlainText),
            source_url: req.source_url.clone(),
            author: req.author.clone(),
            tags: req.tags.clone(),
            timestamp: now_nanos(),
            size,
            total_chunks: chunks.len() as u32,
            is_embedded: false,
            checksum: checksum_hex(&req.content),
        };

        self.store.insert_document(&meta, &req.content, &chunks)?;
        self.cache.invalidate(&collection.id);

        info!(
            "Added document {} ({} chunks) to {}",
            meta.id,
            chunks.len(),
            collection.id
        );
        Ok(meta)
    }

    /// Store a document, then embed every chunk. On embed failure the
    /// document and chunks remain with `is_embedded = false`.
    pub async fn add_document_and_embed(
        &mut self,
        collection: &Collection,
        req: &AddDocumentRequest,
        proxy_url: &str,
    ) -> Result<DocumentMetadata> {
        let meta = self.add_document(collection, req)?;
        let chunks = self.store.chunks_for_document(&meta.id)?;
        self.embed_chunks(collection, meta, &chunks, proxy_url).await
    }

    /// Embed (or re-embed) an already-stored document. Existing vectors are
    /// removed first, so a successful run always reflects the collection's
    /// current model.
    pub async fn embed_existing_document(
        &mut self,
        collection: &Collection,
        document_id: &str,
        proxy_url: &str,
    ) -> Result<DocumentMetadata> {
        let mut meta = self
            .store
            .get_document(&collection.id, document_id)?
            .ok_or_else(|| VecBaseError::not_found(format!("document '{document_id}'")))?;

        let removed = self
            .store
            .delete_document_vectors(&collection.id, document_id)?;
        if removed > 0 {
            debug!("Removed {} stale vectors from {}", removed, document_id);
            meta.is_embedded = false;
            self.store.update_document_metadata(&meta)?;
            self.cache.invalidate(&collection.id);
        }

        let chunks = self.store.chunks_for_document(document_id)?;
        self.embed_chunks(collection, meta, &chunks, proxy_url).await
    }

    /// The embed phase proper, guarded by the in-progress set.
    async fn embed_chunks(
        &mut self,
        collection: &Collection,
        meta: DocumentMetadata,
        chunks: &[SemanticChunk],
        proxy_url: &str,
    ) -> Result<DocumentMetadata> {
        let guard_key = (collection.id.clone(), meta.id.clone());
        if !self.in_flight.insert(guard_key.clone()) {
            return Err(VecBaseError::AlreadyInProgress);
        }

        let result = self
            .embed_chunks_inner(collection, meta, chunks, proxy_url)
            .await;
        self.in_flight.remove(&guard_key);
        result
    }

    async fn embed_chunks_inner(
        &mut self,
        collection: &Collection,
        mut meta: DocumentMetadata,
        chunks: &[SemanticChunk],
        proxy_url: &str,
    ) -> Result<DocumentMetadata> {
        if chunks.is_empty() {
            // Vacuously embedded: there is nothing to vectorize.
            meta.is_embedded = true;
            self.store.update_document_metadata(&meta)?;
            self.cache.invalidate(&collection.id);
            return Ok(meta);
        }

        let mut established_dim = self.store.established_dimension(&collection.id)?;
        let batch_size = batch_size_for(meta.size, chunks.len());
        let model = &collection.settings.embedding_model;

        debug!(
            "Embedding {} chunks of {} in batches of {}",
            chunks.len(),
            meta.id,
            batch_size
        );

        let mut written: Vec<VectorId> = Vec::with_capacity(chunks.len());

        for (batch_index, batch) in chunks.chunks(batch_size).enumerate() {
            let texts: Vec<String> = batch.iter().map(|c| c.text.clone()).collect();

            let embeddings = match self.embedder.embed(&texts, model, proxy_url).await {
                Ok(embeddings) => embeddings,
                Err(e) => {
                    warn!(
                        "Embedding batch {} of {} failed: {}",
                        batch_index, meta.id, e
                    );
                    self.rollback(&collection.id, &written)?;
                    return Err(VecBaseError::Embedding(e));
                }
            };

            if embeddings.len() != batch.len() {
                self.rollback(&collection.id, &written)?;
                return Err(VecBaseError::Embedding(ProviderError::InvalidResponse(
                    format!(
                        "batch {batch_index}: expected {} embeddings but got {}",
                        batch.len(),
                        embeddings.len()
                    ),
                )));
            }

            let mut batch_vectors = Vec::with_capacity(batch.len());
            for (chunk, embedding) in batch.iter().zip(embeddings) {
                let dim = embedding.len();
                if let Some(expected) = established_dim {
                    if dim != expected {
                        self.rollback(&collection.id, &written)?;
                        return Err(VecBaseError::invalid(
                            "embedding",
                            format!(
                                "dimension {dim} does not match the collection's dimension {expected}"
                            ),
                        ));
                    }
                }

                let vector =
                    match Vector::from_embedding(&meta.id, chunk.position, model, embedding) {
                        Ok(vector) => vector,
                        Err(e) => {
                            self.rollback(&collection.id, &written)?;
                            return Err(e);
                        }
                    };
                established_dim.get_or_insert(dim);
                batch_vectors.push(vector);
            }

            self.store.insert_vectors(&collection.id, &batch_vectors)?;
            written.extend(batch_vectors.into_iter().map(|v| v.id));
        }

        meta.is_embedded = true;
        self.store.update_document_metadata(&meta)?;
        self.cache.invalidate(&collection.id);

        info!(
            "Embedded document {} ({} vectors) in {}",
            meta.id,
            written.len(),
            collection.id
        );
        Ok(meta)
    }

    /// Delete every vector written so far; the document itself stays.
    fn rollback(&mut self, collection_id: &str, written: &[VectorId]) -> Result<()> {
        if !written.is_empty() {
            warn!(
                "Rolling back {} vectors in {}",
                written.len(),
                collection_id
            );
            self.store.delete_vectors(collection_id, written)?;
        }
        self.cache.invalidate(collection_id);
        Ok(())
    }
}

/// Batch size scaled to average chunk length: long chunks go in small
/// batches to keep provider payloads bounded.
fn batch_size_for(content_chars: u64, chunk_count: usize) -> usize {
    let avg = content_chars / chunk_count.max(1) as u64;
    let size = if avg > 1000 {
        3
    } else if avg > 500 {
        5
    } else {
        10
    };
    size.min(MAX_BATCH_SIZE)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CacheConfig;
    use crate::domain::{CollectionSettings, Principal};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Deterministic bag-of-words embedder with optional failure injection.
    struct MockEmbedder {
        dim: usize,
        fail_on_call: Option<usize>,
        calls: AtomicUsize,
    }

    impl MockEmbedder {
        fn new(dim: usize) -> Self {
            Self {
                dim,
                fail_on_call: None,
                calls: AtomicUsize::new(0),
            }
        }

        fn failing_on(dim: usize, call: usize) -> Self {
            Self {
                dim,
                fail_on_call: Some(call),
                calls: AtomicUsize::new(0),
            }
        }

        fn hash_embed(&self, text: &str) -> Vec<f32> {
            let mut v = vec![0.0f32; self.dim];
            for token in text.split_whitespace() {
                let mut h: u64 = 0xcbf29ce484222325;
                for b in token.to_lowercase().bytes() {
                    h ^= b as u64;
                    h = h.wrapping_mul(0x100000001b3);
                }
                v[(h % self.dim as u64) as usize] += 1.0;
            }
            if v.iter().all(|x| *x == 0.0) {
                v[0] = 1.0;
            }
            v
        }
    }

    #[async_trait]
    impl EmbeddingProvider for MockEmbedder {
        async fn embed(
            &self,
            texts: &[String],
            _model: &str,
            _proxy_url: &str,
        ) -> std::result::Result<Vec<Vec<f32>>, ProviderError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_on_call == Some(call) {
                return Err(ProviderError::Transport("injected failure".to_string()));
            }
            Ok(texts.iter().map(|t| self.hash_embed(t)).collect())
        }
    }

    fn collection_with(settings: CollectionSettings) -> Collection {
        Collection::new(
            "c1".to_string(),
            "Test".to_string(),
            None,
            Principal::new("alice"),
            settings,
        )
    }

    fn request(content: &str) -> AddDocumentRequest {
        AddDocumentRequest {
            collection_id: "c1".to_string(),
            title: "Test Document".to_string(),
            content: content.to_string(),
            content_type: None,
            source_url: None,
            author: None,
            tags: None,
        }
    }

    fn fixtures() -> (DurableStore, VectorCache, InFlightSet) {
        let mut store = DurableStore::in_memory().unwrap();
        let coll = collection_with(CollectionSettings {
            chunk_size: 32,
            chunk_overlap: 4,
            ..CollectionSettings::default()
        });
        store.insert_collection(&coll).unwrap();
        (
            store,
            VectorCache::new(CacheConfig::default()),
            InFlightSet::new(),
        )
    }

    fn stored_collection(store: &DurableStore) -> Collection {
        store.get_collection("c1").unwrap().unwrap()
    }

    #[test]
    fn test_batch_size_scaling() {
        assert_eq!(batch_size_for(100, 10), 10); // avg 10
        assert_eq!(batch_size_for(6000, 10), 5); // avg 600
        assert_eq!(batch_size_for(20_000, 10), 3); // avg 2000
        assert_eq!(batch_size_for(0, 0), 10);
    }

    #[tokio::test]
    async fn test_add_document_and_embed_happy_path() {
        let (mut store, mut cache, mut in_flight) = fixtures();
        let embedder = MockEmbedder::new(16);
        let coll = stored_collection(&store);

        let content = "The quick brown fox jumps over the lazy dog. ".repeat(8);
        let meta = {
            let mut ingestor = Ingestor::new(&mut store, &mut cache, &embedder, &mut in_flight);
            ingestor
                .add_document_and_embed(&coll, &request(&content), "")
                .await
                .unwrap()
        };

        assert!(meta.is_embedded);
        assert!(meta.total_chunks > 1);
        assert_eq!(meta.checksum, checksum_hex(&content));

        let vectors = store.vectors_for_document(&meta.id).unwrap();
        assert_eq!(vectors.len(), meta.total_chunks as usize);
        for (i, vector) in vectors.iter().enumerate() {
            assert_eq!(vector.id, format!("{}:v:{}", meta.id, i));
            assert_eq!(vector.chunk_id, format!("{}:c:{}", meta.id, i));
            assert!(vector.norm > 0.0);
        }

        let stored = store.get_document("c1", &meta.id).unwrap().unwrap();
        assert!(stored.is_embedded);
    }

    #[tokio::test]
    async fn test_rollback_on_batch_failure() {
        let (mut store, mut cache, mut in_flight) = fixtures();
        let coll = stored_collection(&store);

        // Seed one vector so the collection has an established dimension.
        let seed = {
            let embedder = MockEmbedder::new(16);
            let mut ingestor = Ingestor::new(&mut store, &mut cache, &embedder, &mut in_flight);
            ingestor
                .add_document_and_embed(&coll, &request("seed content here"), "")
                .await
                .unwrap()
        };
        let before = store.vector_count("c1").unwrap();
        assert!(before > 0);

        // Enough content for several batches; the second provider call fails.
        let embedder = MockEmbedder::failing_on(16, 1);
        let content = "Lorem ipsum dolor sit amet consectetur. ".repeat(40);
        let err = {
            let mut ingestor = Ingestor::new(&mut store, &mut cache, &embedder, &mut in_flight);
            ingestor
                .add_document_and_embed(&coll, &request(&content), "")
                .await
                .unwrap_err()
        };
        assert!(matches!(err, VecBaseError::Embedding(_)));

        // The failed document keeps its chunks but has zero vectors.
        let docs = store.list_documents("c1").unwrap();
        let failed = docs.iter().find(|d| d.id != seed.id).unwrap();
        assert!(!failed.is_embedded);
        assert!(failed.total_chunks > 0);
        assert!(store.vectors_for_document(&failed.id).unwrap().is_empty());

        // The pre-existing vectors are untouched.
        assert_eq!(store.vector_count("c1").unwrap(), before);

        // Retry succeeds.
        let embedder = MockEmbedder::new(16);
        let retried = {
            let mut ingestor = Ingestor::new(&mut store, &mut cache, &embedder, &mut in_flight);
            ingestor
                .embed_existing_document(&coll, &failed.id, "")
                .await
                .unwrap()
        };
        assert!(retried.is_embedded);
        assert_eq!(
            store.vectors_for_document(&failed.id).unwrap().len(),
            failed.total_chunks as usize
        );
    }

    #[tokio::test]
    async fn test_dimension_mismatch_rolls_back() {
        let (mut store, mut cache, mut in_flight) = fixtures();
        let coll = stored_collection(&store);

        {
            let embedder = MockEmbedder::new(16);
            let mut ingestor = Ingestor::new(&mut store, &mut cache, &embedder, &mut in_flight);
            ingestor
                .add_document_and_embed(&coll, &request("establishes dimension"), "")
                .await
                .unwrap();
        }

        // A provider suddenly returning a different dimension must be refused.
        let embedder = MockEmbedder::new(8);
        let err = {
            let mut ingestor = Ingestor::new(&mut store, &mut cache, &embedder, &mut in_flight);
            ingestor
                .add_document_and_embed(&coll, &request("wrong dimension content"), "")
                .await
                .unwrap_err()
        };
        assert!(matches!(err, VecBaseError::InvalidInput { .. }));

        let docs = store.list_documents("c1").unwrap();
        let failed = docs.iter().find(|d| !d.is_embedded).unwrap();
        assert!(store.vectors_for_document(&failed.id).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_in_flight_guard_rejects_concurrent_embed() {
        let (mut store, mut cache, mut in_flight) = fixtures();
        let coll = stored_collection(&store);
        let embedder = MockEmbedder::new(16);

        let meta = {
            let mut ingestor = Ingestor::new(&mut store, &mut cache, &embedder, &mut in_flight);
            ingestor.add_document(&coll, &request("some content")).unwrap()
        };

        in_flight.insert(("c1".to_string(), meta.id.clone()));
        let err = {
            let mut ingestor = Ingestor::new(&mut store, &mut cache, &embedder, &mut in_flight);
            ingestor
                .embed_existing_document(&coll, &meta.id, "")
                .await
                .unwrap_err()
        };
        assert!(matches!(err, VecBaseError::AlreadyInProgress));

        // Clearing the guard lets the embed proceed.
        in_flight.remove(&("c1".to_string(), meta.id.clone()));
        let mut ingestor = Ingestor::new(&mut store, &mut cache, &embedder, &mut in_flight);
        assert!(ingestor
            .embed_existing_document(&coll, &meta.id, "")
            .await
            .unwrap()
            .is_embedded);
        assert!(in_flight.is_empty());
    }

    #[tokio::test]
    async fn test_guard_cleared_after_failure() {
        let (mut store, mut cache, mut in_flight) = fixtures();
        let coll = stored_collection(&store);
        let embedder = MockEmbedder::failing_on(16, 0);

        let err = {
            let mut ingestor = Ingestor::new(&mut store, &mut cache, &embedder, &mut in_flight);
            ingestor
                .add_document_and_embed(&coll, &request("will fail"), "")
                .await
                .unwrap_err()
        };
        assert!(matches!(err, VecBaseError::Embedding(_)));
        assert!(in_flight.is_empty());
    }

    #[tokio::test]
    async fn test_reembed_replaces_vectors() {
        let (mut store, mut cache, mut in_flight) = fixtures();
        let coll = stored_collection(&store);
        let embedder = MockEmbedder::new(16);

        let meta = {
            let mut ingestor = Ingestor::new(&mut store, &mut cache, &embedder, &mut in_flight);
            ingestor
                .add_document_and_embed(&coll, &request("original text content"), "")
                .await
                .unwrap()
        };
        let count = store.vectors_for_document(&meta.id).unwrap().len();

        let mut ingestor = Ingestor::new(&mut store, &mut cache, &embedder, &mut in_flight);
        let again = ingestor
            .embed_existing_document(&coll, &meta.id, "")
            .await
            .unwrap();
        assert!(again.is_embedded);
        assert_eq!(store.vectors_for_document(&meta.id).unwrap().len(), count);
    }

    #[test]
    fn test_document_size_cap() {
        let (mut store, mut cache, mut in_flight) = fixtures();
        let coll = stored_collection(&store);
        let embedder = MockEmbedder::new(16);
        let mut ingestor = Ingestor::new(&mut store, &mut cache, &embedder, &mut in_flight);

        let mut req = request("x");
        req.content = "x".repeat(MAX_DOCUMENT_SIZE + 1);
        assert!(matches!(
            ingestor.add_document(&coll, &req).unwrap_err(),
            VecBaseError::ResourceExhausted(_)
        ));
    }

    #[test]
    fn test_max_documents_cap() {
        let mut store = DurableStore::in_memory().unwrap();
        let coll = collection_with(CollectionSettings {
            max_documents: Some(1),
            ..CollectionSettings::default()
        });
        store.insert_collection(&coll).unwrap();
        let mut cache = VectorCache::new(CacheConfig::default());
        let mut in_flight = InFlightSet::new();
        let embedder = MockEmbedder::new(16);
        let mut ingestor = Ingestor::new(&mut store, &mut cache, &embedder, &mut in_flight);

        ingestor.add_document(&coll, &request("first")).unwrap();
        assert!(matches!(
            ingestor.add_document(&coll, &request("second")).unwrap_err(),
            VecBaseError::ResourceExhausted(_)
        ));
    }
}
