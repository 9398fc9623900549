//! Public API façade
//!
//! `VectorDb` owns the durable store, the vector cache, the embedding port,
//! and the embed-in-progress set. Public operations validate input, check
//! authorization, orchestrate the services, and enrich results. Methods take
//! `&mut self`: the runtime is single-threaded cooperative, with suspension
//! only at embedding-port awaits.

use crate::cache::{CacheStats, VectorCache};
use crate::clients::{EmbeddingProvider, HttpEmbeddingClient};
use crate::config::Config;
use crate::constants::{DEFAULT_K, MAX_K_FOR_SEARCH};
use crate::domain::{
    l2_norm, AddDocumentRequest, AdminLevel, Collection, CollectionWithStats,
    CreateCollectionRequest, DocumentId, DocumentMetadata, Principal, SearchMatch, SearchRequest,
    SemanticChunk, Vector, VectorId,
};
use crate::error::{Result, VecBaseError};
use crate::repositories::DurableStore;
use crate::services::ingestion::InFlightSet;
use crate::services::search::{self, CentroidIndex, ScoredVector};
use crate::services::{CollectionManager, Ingestor};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info};

/// Outcome of a vector validation pass.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ValidationReport {
    pub checked: u64,
    pub invalid: Vec<VectorId>,
    pub repaired: u64,
    pub documents_updated: u64,
}

/// The persistent vector database core.
pub struct VectorDb {
    store: DurableStore,
    cache: VectorCache,
    embedder: Arc<dyn EmbeddingProvider>,
    in_flight: InFlightSet,
    config: Config,
}

impl VectorDb {
    /// Open the database at the configured path with the HTTP embedding
    /// client.
    pub fn open(config: Config) -> Result<Self> {
        let embedder = HttpEmbeddingClient::new(
            config.embedding.base_url.clone(),
            config.embedding.timeout_seconds,
        )
        .map_err(|e| VecBaseError::Config(e.to_string()))?;
        Self::with_embedder(config, Arc::new(embedder))
    }

    /// Open the database at the configured path with a caller-supplied
    /// embedding provider.
    pub fn with_embedder(config: Config, embedder: Arc<dyn EmbeddingProvider>) -> Result<Self> {
        let store = DurableStore::new(&config.database.path)?;
        Ok(Self::assemble(store, config, embedder))
    }

    /// An in-memory database (useful for testing).
    pub fn in_memory(config: Config, embedder: Arc<dyn EmbeddingProvider>) -> Result<Self> {
        let store = DurableStore::in_memory()?;
        Ok(Self::assemble(store, config, embedder))
    }

    fn assemble(store: DurableStore, config: Config, embedder: Arc<dyn EmbeddingProvider>) -> Self {
        let cache = VectorCache::new(config.cache.clone());
        Self {
            store,
            cache,
            embedder,
            in_flight: InFlightSet::new(),
            config,
        }
    }

    // ========================================================================
    // Collection operations
    // ========================================================================

    pub fn create_collection(
        &mut self,
        caller: &Principal,
        req: &CreateCollectionRequest,
    ) -> Result<Collection> {
        CollectionManager::new(&mut self.store, &mut self.cache).create_collection(caller, req)
    }

    pub fn get_collection(&mut self, collection_id: &str) -> Result<Collection> {
        CollectionManager::new(&mut self.store, &mut self.cache).get(collection_id)
    }

    pub fn list_collections(&mut self) -> Result<Vec<Collection>> {
        CollectionManager::new(&mut self.store, &mut self.cache).list()
    }

    pub fn get_collection_with_stats(&mut self, collection_id: &str) -> Result<CollectionWithStats> {
        CollectionManager::new(&mut self.store, &mut self.cache).get_with_stats(collection_id)
    }

    pub fn list_collections_with_stats(&mut self) -> Result<Vec<CollectionWithStats>> {
        CollectionManager::new(&mut self.store, &mut self.cache).list_with_stats()
    }

    pub fn update_collection_metadata(
        &mut self,
        caller: &Principal,
        collection_id: &str,
        name: Option<String>,
        description: Option<String>,
    ) -> Result<Collection> {
        CollectionManager::new(&mut self.store, &mut self.cache)
            .update_metadata(caller, collection_id, name, description)
    }

    pub fn update_collection_settings(
        &mut self,
        caller: &Principal,
        collection_id: &str,
        settings: crate::domain::CollectionSettings,
    ) -> Result<Collection> {
        CollectionManager::new(&mut self.store, &mut self.cache)
            .update_settings(caller, collection_id, settings)
    }

    pub fn delete_collection(&mut self, caller: &Principal, collection_id: &str) -> Result<()> {
        CollectionManager::new(&mut self.store, &mut self.cache)
            .delete_collection(caller, collection_id)
    }

    // ========================================================================
    // Admin operations
    // ========================================================================

    pub fn add_collection_admin(
        &mut self,
        caller: &Principal,
        collection_id: &str,
        principal: &Principal,
    ) -> Result<Collection> {
        CollectionManager::new(&mut self.store, &mut self.cache)
            .add_admin(caller, collection_id, principal)
    }

    pub fn remove_collection_admin(
        &mut self,
        caller: &Principal,
        collection_id: &str,
        principal: &Principal,
    ) -> Result<Collection> {
        CollectionManager::new(&mut self.store, &mut self.cache)
            .remove_admin(caller, collection_id, principal)
    }

    pub fn transfer_genesis_admin(
        &mut self,
        caller: &Principal,
        collection_id: &str,
        new_genesis: &Principal,
    ) -> Result<Collection> {
        CollectionManager::new(&mut self.store, &mut self.cache)
            .transfer_genesis_admin(caller, collection_id, new_genesis)
    }

    pub fn is_collection_admin(&mut self, collection_id: &str, principal: &Principal) -> Result<bool> {
        Ok(self.get_collection(collection_id)?.is_admin(principal))
    }

    pub fn get_my_admin_level(&mut self, caller: &Principal, collection_id: &str) -> Result<AdminLevel> {
        Ok(self.get_collection(collection_id)?.admin_level(caller))
    }

    pub fn list_collection_admins(&mut self, collection_id: &str) -> Result<Vec<Principal>> {
        Ok(self.get_collection(collection_id)?.all_admins())
    }

    pub fn get_genesis_admin(&mut self, collection_id: &str) -> Result<Principal> {
        Ok(self.get_collection(collection_id)?.genesis_admin)
    }

    // ========================================================================
    // Document operations
    // ========================================================================

    /// Ingest a document. Embeds immediately when the collection has
    /// `auto_embed` set, using the collection's own proxy URL.
    pub async fn add_document(
        &mut self,
        caller: &Principal,
        req: &AddDocumentRequest,
    ) -> Result<DocumentMetadata> {
        let collection = self.require_admin(&req.collection_id, caller)?;
        let embedder = Arc::clone(&self.embedder);
        let mut ingestor = Ingestor::new(
            &mut self.store,
            &mut self.cache,
            embedder.as_ref(),
            &mut self.in_flight,
        );
        if collection.settings.auto_embed {
            let proxy = collection.settings.proxy_url.clone();
            ingestor.add_document_and_embed(&collection, req, &proxy).await
        } else {
            ingestor.add_document(&collection, req)
        }
    }

    /// Ingest a document and embed every chunk, or roll the vectors back.
    pub async fn add_document_and_embed(
        &mut self,
        caller: &Principal,
        req: &AddDocumentRequest,
        proxy_url: &str,
    ) -> Result<DocumentMetadata> {
        let collection = self.require_admin(&req.collection_id, caller)?;
        let proxy = self.effective_proxy(&collection, proxy_url);
        let embedder = Arc::clone(&self.embedder);
        Ingestor::new(
            &mut self.store,
            &mut self.cache,
            embedder.as_ref(),
            &mut self.in_flight,
        )
        .add_document_and_embed(&collection, req, &proxy)
        .await
    }

    /// Run (or re-run) the embed phase for a stored document.
    pub async fn embed_existing_document(
        &mut self,
        caller: &Principal,
        collection_id: &str,
        document_id: &str,
    ) -> Result<DocumentMetadata> {
        let collection = self.require_admin(collection_id, caller)?;
        let proxy = collection.settings.proxy_url.clone();
        let embedder = Arc::clone(&self.embedder);
        Ingestor::new(
            &mut self.store,
            &mut self.cache,
            embedder.as_ref(),
            &mut self.in_flight,
        )
        .embed_existing_document(&collection, document_id, &proxy)
        .await
    }

    pub fn get_document(&mut self, collection_id: &str, document_id: &str) -> Result<DocumentMetadata> {
        self.store
            .get_document(collection_id, document_id)?
            .ok_or_else(|| VecBaseError::not_found(format!("document '{document_id}'")))
    }

    /// The original content, byte-identical to what was ingested.
    pub fn get_document_content(&mut self, collection_id: &str, document_id: &str) -> Result<String> {
        self.store
            .get_document_content(collection_id, document_id)?
            .ok_or_else(|| VecBaseError::not_found(format!("document '{document_id}'")))
    }

    pub fn get_document_chunks(&mut self, document_id: &str) -> Result<Vec<SemanticChunk>> {
        self.store.chunks_for_document(document_id)
    }

    pub fn list_documents(&mut self, collection_id: &str) -> Result<Vec<DocumentMetadata>> {
        self.get_collection(collection_id)?;
        self.store.list_documents(collection_id)
    }

    pub fn delete_document(
        &mut self,
        caller: &Principal,
        collection_id: &str,
        document_id: &str,
    ) -> Result<()> {
        self.require_admin(collection_id, caller)?;
        if !self.store.delete_document(collection_id, document_id)? {
            return Err(VecBaseError::not_found(format!("document '{document_id}'")));
        }
        self.cache.invalidate(collection_id);
        Ok(())
    }

    /// Remove a document's vectors, leaving the document and chunks behind.
    pub fn delete_document_vectors(
        &mut self,
        caller: &Principal,
        collection_id: &str,
        document_id: &str,
    ) -> Result<u64> {
        self.require_admin(collection_id, caller)?;
        let mut meta = self.get_document(collection_id, document_id)?;

        let removed = self.store.delete_document_vectors(collection_id, document_id)?;
        if meta.is_embedded {
            meta.is_embedded = false;
            self.store.update_document_metadata(&meta)?;
        }
        self.cache.invalidate(collection_id);
        Ok(removed)
    }

    // ========================================================================
    // Search operations
    // ========================================================================

    /// Top-k similarity search for a text query.
    pub async fn search(&mut self, req: &SearchRequest) -> Result<Vec<SearchMatch>> {
        let collection = self.get_collection(&req.collection_id)?;
        let k = clamp_k(req.k);
        if k == 0 {
            return Ok(Vec::new());
        }

        let proxy = self.effective_proxy(&collection, req.proxy_url.as_deref().unwrap_or(""));
        let query = self.embed_query(&req.query, &collection.settings.embedding_model, &proxy).await?;

        let filter = req.filter.as_ref().map(|ids| ids.iter().cloned().collect::<HashSet<_>>());
        let scored = self.run_search(
            &collection.id,
            &query,
            k,
            req.min_score,
            filter.as_ref(),
            req.use_approximate.unwrap_or(true),
        )?;
        self.enrich(&collection.id, scored)
    }

    /// `search` restricted to an explicit document set.
    pub async fn search_filtered(&mut self, req: &SearchRequest) -> Result<Vec<SearchMatch>> {
        if req.filter.as_ref().map_or(true, |f| f.is_empty()) {
            return Err(VecBaseError::invalid(
                "filter",
                "search_filtered requires a non-empty document filter",
            ));
        }
        self.search(req).await
    }

    /// Documents most similar to a stored document, scored by their best
    /// chunk against the source's mean vector.
    pub fn find_similar_documents(
        &mut self,
        collection_id: &str,
        source_document_id: &str,
        k: Option<usize>,
        min_score: Option<f32>,
    ) -> Result<Vec<SearchMatch>> {
        let collection = self.get_collection(collection_id)?;
        let k = clamp_k(k);
        if k == 0 {
            return Ok(Vec::new());
        }

        self.get_document(collection_id, source_document_id)?;
        let source_vectors = self.store.vectors_for_document(source_document_id)?;
        if source_vectors.is_empty() {
            return Err(VecBaseError::not_found(format!(
                "vectors for document '{source_document_id}'"
            )));
        }

        // Mean of the source's unit vectors, renormalized.
        let dim = source_vectors[0].embedding.len();
        let mut query = vec![0.0f32; dim];
        for vector in &source_vectors {
            for (q, x) in query.iter_mut().zip(vector.embedding.iter()) {
                *q += x / vector.norm;
            }
        }
        let norm = l2_norm(&query);
        if !(norm > 0.0) {
            return Err(VecBaseError::CorruptState(format!(
                "degenerate mean vector for document '{source_document_id}'"
            )));
        }
        for q in query.iter_mut() {
            *q /= norm;
        }

        let vectors = self.collection_vectors(&collection.id)?;
        let scored = search::search_exact(&query, &vectors, vectors.len(), min_score, None)?;

        // Best chunk per document, source excluded.
        let mut best: Vec<ScoredVector> = Vec::new();
        let mut seen: HashSet<DocumentId> = HashSet::new();
        for hit in scored {
            if hit.document_id == source_document_id {
                continue;
            }
            if seen.insert(hit.document_id.clone()) {
                best.push(hit);
                if best.len() == k {
                    break;
                }
            }
        }
        self.enrich(&collection.id, best)
    }

    /// Run several text queries against one collection with a single
    /// embedding call.
    pub async fn batch_similarity_search(
        &mut self,
        collection_id: &str,
        queries: &[String],
        k: Option<usize>,
        min_score: Option<f32>,
    ) -> Result<Vec<Vec<SearchMatch>>> {
        let collection = self.get_collection(collection_id)?;
        let k = clamp_k(k);
        if queries.is_empty() || k == 0 {
            return Ok(vec![Vec::new(); queries.len()]);
        }

        let proxy = collection.settings.proxy_url.clone();
        let embeddings = self
            .embedder
            .embed(queries, &collection.settings.embedding_model, &proxy)
            .await
            .map_err(VecBaseError::Embedding)?;

        let mut results = Vec::with_capacity(embeddings.len());
        for query in &embeddings {
            let scored = self.run_search(&collection.id, query, k, min_score, None, true)?;
            results.push(self.enrich(&collection.id, scored)?);
        }
        Ok(results)
    }

    /// Score `texts` against `query` without persisting anything. Shares
    /// the embedding port and the exact scorer with the durable path.
    pub async fn demo_vector_similarity(
        &mut self,
        texts: &[String],
        query: &str,
        proxy_url: &str,
        k: Option<usize>,
        min_score: Option<f32>,
    ) -> Result<Vec<SearchMatch>> {
        if texts.is_empty() {
            return Err(VecBaseError::invalid("texts", "must not be empty"));
        }
        let k = clamp_k(k);
        if k == 0 {
            return Ok(Vec::new());
        }

        let model = self.config.embedding.default_model.clone();
        let mut inputs: Vec<String> = texts.to_vec();
        inputs.push(query.to_string());
        let mut embeddings = self
            .embedder
            .embed(&inputs, &model, proxy_url)
            .await
            .map_err(VecBaseError::Embedding)?;

        let query_embedding = embeddings
            .pop()
            .ok_or_else(|| VecBaseError::CorruptState("provider returned no vectors".to_string()))?;

        let vectors: Vec<Vector> = embeddings
            .into_iter()
            .enumerate()
            .map(|(i, e)| Vector::from_embedding("demo", i as u32, &model, e))
            .collect::<Result<_>>()?;

        let scored = search::search_exact(&query_embedding, &vectors, k, min_score, None)?;
        Ok(scored
            .into_iter()
            .map(|hit| {
                let text = position_from_id(&hit.chunk_id)
                    .and_then(|p| texts.get(p as usize))
                    .cloned();
                SearchMatch {
                    document_id: hit.document_id,
                    chunk_id: hit.chunk_id,
                    score: hit.score,
                    document_title: None,
                    chunk_text: text,
                }
            })
            .collect())
    }

    // ========================================================================
    // Maintenance operations
    // ========================================================================

    pub fn clear_cache(&mut self) {
        self.cache.clear();
        info!("Cleared vector cache");
    }

    /// Drop expired cache entries. Returns the number removed.
    pub fn cleanup_cache(&mut self) -> usize {
        self.cache.cleanup()
    }

    pub fn get_cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    pub fn invalidate_collection_cache(&mut self, collection_id: &str) {
        self.cache.invalidate(collection_id);
    }

    /// Check every stored vector of a collection against the invariants:
    /// consistent dimensionality, finite components, accurate norm, and a
    /// live owning chunk. With `repair`, offending vectors are deleted and
    /// document embedded-flags recomputed (admin-only).
    pub fn validate_collection_vectors(
        &mut self,
        caller: &Principal,
        collection_id: &str,
        repair: bool,
    ) -> Result<ValidationReport> {
        let collection = if repair {
            self.require_admin(collection_id, caller)?
        } else {
            self.get_collection(collection_id)?
        };

        let vectors = self.store.load_collection_vectors(collection_id)?;
        let expected_dim = vectors.first().map(|v| v.embedding.len());

        let mut report = ValidationReport {
            checked: vectors.len() as u64,
            ..ValidationReport::default()
        };

        for vector in &vectors {
            if !vector_is_valid(vector, expected_dim)
                || self.store.get_chunk(&vector.chunk_id)?.is_none()
            {
                report.invalid.push(vector.id.clone());
            }
        }

        if repair && !report.invalid.is_empty() {
            self.store.delete_vectors(collection_id, &report.invalid)?;
            report.repaired = report.invalid.len() as u64;
            self.cache.invalidate(collection_id);
        }

        if repair {
            report.documents_updated = self.recompute_embedded_flags(&collection)?;
        }

        Ok(report)
    }

    /// Re-derive `is_embedded` for every document of a collection.
    fn recompute_embedded_flags(&mut self, collection: &Collection) -> Result<u64> {
        let mut updated = 0;
        for mut meta in self.store.list_documents(&collection.id)? {
            let vectors = self.store.vectors_for_document(&meta.id)?;
            let embedded = meta.total_chunks as usize == vectors.len()
                && vectors
                    .iter()
                    .all(|v| v.model == collection.settings.embedding_model);
            if meta.is_embedded != embedded {
                meta.is_embedded = embedded;
                self.store.update_document_metadata(&meta)?;
                updated += 1;
            }
        }
        if updated > 0 {
            self.cache.invalidate(&collection.id);
        }
        Ok(updated)
    }

    // ========================================================================
    // Internals
    // ========================================================================

    fn require_admin(&mut self, collection_id: &str, caller: &Principal) -> Result<Collection> {
        let collection = self.get_collection(collection_id)?;
        if !collection.is_admin(caller) {
            return Err(VecBaseError::NotAuthorized);
        }
        Ok(collection)
    }

    /// Request-level proxy overrides the collection setting.
    fn effective_proxy(&self, collection: &Collection, request_proxy: &str) -> String {
        if !request_proxy.is_empty() {
            request_proxy.to_string()
        } else {
            collection.settings.proxy_url.clone()
        }
    }

    async fn embed_query(&mut self, query: &str, model: &str, proxy: &str) -> Result<Vec<f32>> {
        let mut embeddings = self
            .embedder
            .embed(&[query.to_string()], model, proxy)
            .await
            .map_err(VecBaseError::Embedding)?;
        embeddings
            .pop()
            .ok_or_else(|| VecBaseError::CorruptState("provider returned no vectors".to_string()))
    }

    /// Cached vectors for a collection, loading from the store on a miss.
    fn collection_vectors(&mut self, collection_id: &str) -> Result<Arc<Vec<Vector>>> {
        if let Some(vectors) = self.cache.get(collection_id) {
            return Ok(vectors);
        }

        let loaded = Arc::new(self.store.load_collection_vectors(collection_id)?);
        if !loaded.is_empty() {
            // A refused insert (oversized entry) falls back to direct reads.
            self.cache.insert_shared(collection_id, Arc::clone(&loaded));
        }
        Ok(loaded)
    }

    /// Adaptive exact/approximate top-k over a collection's vectors.
    fn run_search(
        &mut self,
        collection_id: &str,
        query: &[f32],
        k: usize,
        min_score: Option<f32>,
        filter: Option<&HashSet<DocumentId>>,
        use_approximate: bool,
    ) -> Result<Vec<ScoredVector>> {
        let vectors = self.collection_vectors(collection_id)?;
        if vectors.is_empty() {
            return Err(VecBaseError::not_found(format!(
                "vectors in collection '{collection_id}'"
            )));
        }

        let approximate =
            use_approximate && vectors.len() >= self.config.search.approximate_threshold;
        if !approximate {
            return search::search_exact(query, &vectors, k, min_score, filter);
        }

        let index = match self.cache.get_index(collection_id) {
            Some(index) if index.indexed() == vectors.len() => index,
            _ => {
                let built = Arc::new(CentroidIndex::build(&vectors));
                self.cache.attach_index(collection_id, Arc::clone(&built));
                built
            }
        };
        debug!(
            "Approximate search over {} vectors in {}",
            vectors.len(),
            collection_id
        );
        search::search_approx(
            query,
            &vectors,
            &index,
            k,
            min_score,
            filter,
            self.config.search.candidate_factor,
        )
    }

    /// Attach document titles and chunk texts to scored hits.
    fn enrich(&mut self, collection_id: &str, scored: Vec<ScoredVector>) -> Result<Vec<SearchMatch>> {
        let mut titles: HashMap<DocumentId, Option<String>> = HashMap::new();

        scored
            .into_iter()
            .map(|hit| {
                let title = titles
                    .entry(hit.document_id.clone())
                    .or_insert_with(|| {
                        self.store
                            .get_document(collection_id, &hit.document_id)
                            .ok()
                            .flatten()
                            .map(|d| d.title)
                    })
                    .clone();
                let text = self.store.get_chunk(&hit.chunk_id)?.map(|c| c.text);
                Ok(SearchMatch {
                    document_id: hit.document_id,
                    chunk_id: hit.chunk_id,
                    score: hit.score,
                    document_title: title,
                    chunk_text: text,
                })
            })
            .collect()
    }
}

fn clamp_k(k: Option<usize>) -> usize {
    k.unwrap_or(DEFAULT_K).min(MAX_K_FOR_SEARCH)
}

fn position_from_id(chunk_id: &str) -> Option<u32> {
    chunk_id.rsplit(':').next()?.parse().ok()
}

fn vector_is_valid(vector: &Vector, expected_dim: Option<usize>) -> bool {
    if expected_dim.is_some_and(|d| vector.embedding.len() != d) {
        return false;
    }
    if vector.embedding.is_empty() || vector.embedding.iter().any(|x| !x.is_finite()) {
        return false;
    }
    let norm = l2_norm(&vector.embedding);
    if !(norm > 0.0) || !vector.norm.is_finite() || vector.norm <= 0.0 {
        return false;
    }
    (norm - vector.norm).abs() <= 1e-6 * norm.max(1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clients::ProviderError;
    use crate::domain::ContentType;
    use async_trait::async_trait;

    /// Deterministic bag-of-words embedder for façade tests.
    struct MockEmbedder {
        dim: usize,
    }

    impl MockEmbedder {
        fn hash_embed(&self, text: &str) -> Vec<f32> {
            let mut v = vec![0.0f32; self.dim];
            for token in text.split_whitespace() {
                let cleaned: String = token
                    .to_lowercase()
                    .chars()
                    .filter(|c| c.is_alphanumeric())
                    .collect();
                if cleaned.is_empty() {
                    continue;
                }
                let mut h: u64 = 0xcbf29ce484222325;
                for b in cleaned.bytes() {
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
            Ok(texts.iter().map(|t| self.hash_embed(t)).collect())
        }
    }

    fn db() -> VectorDb {
        VectorDb::in_memory(Config::default(), Arc::new(MockEmbedder { dim: 64 })).unwrap()
    }

    fn alice() -> Principal {
        Principal::new("alice")
    }

    fn create_req(id: &str) -> CreateCollectionRequest {
        CreateCollectionRequest {
            id: id.to_string(),
            name: format!("Collection {id}"),
            description: None,
            settings: None,
        }
    }

    fn doc_req(cid: &str, title: &str, content: &str) -> AddDocumentRequest {
        AddDocumentRequest {
            collection_id: cid.to_string(),
            title: title.to_string(),
            content: content.to_string(),
            content_type: Some(ContentType::PlainText),
            source_url: None,
            author: None,
            tags: None,
        }
    }

    #[tokio::test]
    async fn test_ingest_then_search() {
        let mut db = db();
        db.create_collection(&alice(), &create_req("kb")).unwrap();

        for (title, content) in [
            ("Pizza", "Pizza is a delicious Italian food with cheese and tomatoes"),
            ("Soccer", "Soccer is the most popular sport in the world"),
            ("JavaScript", "JavaScript is a programming language for web development"),
        ] {
            let meta = db
                .add_document_and_embed(&alice(), &doc_req("kb", title, content), "")
                .await
                .unwrap();
            assert!(meta.is_embedded);
        }

        let req = SearchRequest {
            collection_id: "kb".to_string(),
            query: "Which sport is most popular?".to_string(),
            k: Some(1),
            min_score: None,
            filter: None,
            use_approximate: None,
            proxy_url: None,
        };
        let matches = db.search(&req).await.unwrap();

        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].document_title.as_deref(), Some("Soccer"));
        assert!(matches[0].chunk_text.as_deref().unwrap().contains("popular sport"));
    }

    #[tokio::test]
    async fn test_search_unknown_collection() {
        let mut db = db();
        let req = SearchRequest {
            collection_id: "missing".to_string(),
            query: "anything".to_string(),
            k: None,
            min_score: None,
            filter: None,
            use_approximate: None,
            proxy_url: None,
        };
        assert!(matches!(
            db.search(&req).await.unwrap_err(),
            VecBaseError::NotFound(_)
        ));
    }

    #[tokio::test]
    async fn test_search_empty_collection_is_an_error() {
        let mut db = db();
        db.create_collection(&alice(), &create_req("empty")).unwrap();

        let req = SearchRequest {
            collection_id: "empty".to_string(),
            query: "anything".to_string(),
            k: None,
            min_score: None,
            filter: None,
            use_approximate: None,
            proxy_url: None,
        };
        assert!(matches!(
            db.search(&req).await.unwrap_err(),
            VecBaseError::NotFound(_)
        ));
    }

    #[tokio::test]
    async fn test_search_k_zero_returns_empty() {
        let mut db = db();
        db.create_collection(&alice(), &create_req("kb")).unwrap();
        db.add_document_and_embed(&alice(), &doc_req("kb", "Doc", "some text here"), "")
            .await
            .unwrap();

        let req = SearchRequest {
            collection_id: "kb".to_string(),
            query: "text".to_string(),
            k: Some(0),
            min_score: None,
            filter: None,
            use_approximate: None,
            proxy_url: None,
        };
        assert!(db.search(&req).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_search_filtered_requires_filter() {
        let mut db = db();
        db.create_collection(&alice(), &create_req("kb")).unwrap();
        let meta = db
            .add_document_and_embed(&alice(), &doc_req("kb", "Doc", "alpha beta gamma"), "")
            .await
            .unwrap();
        db.add_document_and_embed(&alice(), &doc_req("kb", "Other", "delta epsilon zeta"), "")
            .await
            .unwrap();

        let mut req = SearchRequest {
            collection_id: "kb".to_string(),
            query: "alpha delta".to_string(),
            k: Some(10),
            min_score: None,
            filter: None,
            use_approximate: None,
            proxy_url: None,
        };
        assert!(db.search_filtered(&req).await.is_err());

        req.filter = Some(vec![meta.id.clone()]);
        let matches = db.search_filtered(&req).await.unwrap();
        assert!(!matches.is_empty());
        assert!(matches.iter().all(|m| m.document_id == meta.id));
    }

    #[tokio::test]
    async fn test_document_roundtrip_and_chunk_ids() {
        let mut db = db();
        db.create_collection(&alice(), &create_req("kb")).unwrap();

        let content = "First sentence here. Second sentence follows. ".repeat(30);
        let meta = db
            .add_document_and_embed(&alice(), &doc_req("kb", "Long Doc", &content), "")
            .await
            .unwrap();

        assert_eq!(db.get_document_content("kb", &meta.id).unwrap(), content);

        let chunks = db.get_document_chunks(&meta.id).unwrap();
        assert_eq!(chunks.len(), meta.total_chunks as usize);
        for (i, chunk) in chunks.iter().enumerate() {
            assert_eq!(chunk.id, format!("{}:c:{}", meta.id, i));
        }

        // Every chunk has exactly one vector with the derived id.
        let listed = db.list_documents("kb").unwrap();
        assert_eq!(listed.len(), 1);
        assert!(listed[0].is_embedded);
    }

    #[tokio::test]
    async fn test_delete_document_removes_everything() {
        let mut db = db();
        db.create_collection(&alice(), &create_req("kb")).unwrap();
        let meta = db
            .add_document_and_embed(&alice(), &doc_req("kb", "Doc", "text to be deleted soon"), "")
            .await
            .unwrap();

        db.delete_document(&alice(), "kb", &meta.id).unwrap();

        assert!(db.get_document("kb", &meta.id).is_err());
        assert!(db.get_document_chunks(&meta.id).unwrap().is_empty());
        assert_eq!(db.get_collection_with_stats("kb").unwrap().vector_count, 0);

        assert!(matches!(
            db.delete_document(&alice(), "kb", &meta.id),
            Err(VecBaseError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_delete_document_vectors_clears_embedded_flag() {
        let mut db = db();
        db.create_collection(&alice(), &create_req("kb")).unwrap();
        let meta = db
            .add_document_and_embed(&alice(), &doc_req("kb", "Doc", "some embedded content"), "")
            .await
            .unwrap();

        let removed = db.delete_document_vectors(&alice(), "kb", &meta.id).unwrap();
        assert!(removed > 0);

        let after = db.get_document("kb", &meta.id).unwrap();
        assert!(!after.is_embedded);

        // Re-embedding restores the invariant.
        let again = db
            .embed_existing_document(&alice(), "kb", &meta.id)
            .await
            .unwrap();
        assert!(again.is_embedded);
    }

    #[tokio::test]
    async fn test_non_admin_cannot_ingest_or_delete() {
        let mut db = db();
        db.create_collection(&alice(), &create_req("kb")).unwrap();
        let mallory = Principal::new("mallory");

        assert!(matches!(
            db.add_document_and_embed(&mallory, &doc_req("kb", "Doc", "nope"), "")
                .await
                .unwrap_err(),
            VecBaseError::NotAuthorized
        ));
        assert!(matches!(
            db.delete_collection(&mallory, "kb").unwrap_err(),
            VecBaseError::NotAuthorized
        ));
    }

    #[tokio::test]
    async fn test_admin_queries() {
        let mut db = db();
        let bob = Principal::new("bob");
        db.create_collection(&alice(), &create_req("kb")).unwrap();
        db.add_collection_admin(&alice(), "kb", &bob).unwrap();

        assert!(db.is_collection_admin("kb", &bob).unwrap());
        assert_eq!(db.get_my_admin_level(&alice(), "kb").unwrap(), AdminLevel::Genesis);
        assert_eq!(db.get_my_admin_level(&bob, "kb").unwrap(), AdminLevel::Admin);
        assert_eq!(db.get_genesis_admin("kb").unwrap(), alice());
        assert_eq!(db.list_collection_admins("kb").unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_find_similar_documents() {
        let mut db = db();
        db.create_collection(&alice(), &create_req("kb")).unwrap();

        let pizza = db
            .add_document_and_embed(
                &alice(),
                &doc_req("kb", "Pizza", "cheese tomato basil dough oven pizza"),
                "",
            )
            .await
            .unwrap();
        db.add_document_and_embed(
            &alice(),
            &doc_req("kb", "Pasta", "cheese tomato basil pasta noodles sauce"),
            "",
        )
        .await
        .unwrap();
        db.add_document_and_embed(
            &alice(),
            &doc_req("kb", "Rust", "borrow checker compiler lifetimes traits"),
            "",
        )
        .await
        .unwrap();

        let similar = db
            .find_similar_documents("kb", &pizza.id, Some(2), None)
            .unwrap();

        assert!(!similar.is_empty());
        // The source document never appears in its own results.
        assert!(similar.iter().all(|m| m.document_id != pizza.id));
        assert_eq!(similar[0].document_title.as_deref(), Some("Pasta"));
    }

    #[tokio::test]
    async fn test_batch_similarity_search() {
        let mut db = db();
        db.create_collection(&alice(), &create_req("kb")).unwrap();
        db.add_document_and_embed(&alice(), &doc_req("kb", "Food", "pizza pasta cheese"), "")
            .await
            .unwrap();
        db.add_document_and_embed(&alice(), &doc_req("kb", "Code", "rust compiler traits"), "")
            .await
            .unwrap();

        let queries = vec!["pizza cheese".to_string(), "rust traits".to_string()];
        let results = db
            .batch_similarity_search("kb", &queries, Some(1), None)
            .await
            .unwrap();

        assert_eq!(results.len(), 2);
        assert_eq!(results[0][0].document_title.as_deref(), Some("Food"));
        assert_eq!(results[1][0].document_title.as_deref(), Some("Code"));
    }

    #[tokio::test]
    async fn test_demo_vector_similarity_persists_nothing() {
        let mut db = db();
        let texts = vec![
            "the cat sat on the mat".to_string(),
            "stock markets fell sharply".to_string(),
        ];
        let matches = db
            .demo_vector_similarity(&texts, "cat on a mat", "", Some(2), None)
            .await
            .unwrap();

        assert_eq!(matches.len(), 2);
        assert_eq!(matches[0].chunk_text.as_deref(), Some("the cat sat on the mat"));
        assert!(db.list_collections().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_cache_fill_and_invalidation() {
        let mut db = db();
        db.create_collection(&alice(), &create_req("kb")).unwrap();
        db.add_document_and_embed(&alice(), &doc_req("kb", "Doc", "cached content words"), "")
            .await
            .unwrap();

        let req = SearchRequest {
            collection_id: "kb".to_string(),
            query: "cached".to_string(),
            k: Some(5),
            min_score: None,
            filter: None,
            use_approximate: None,
            proxy_url: None,
        };

        db.search(&req).await.unwrap();
        let stats = db.get_cache_stats();
        assert_eq!(stats.entries, 1);
        assert_eq!(stats.misses, 1);

        db.search(&req).await.unwrap();
        assert_eq!(db.get_cache_stats().hits, 1);

        // A write invalidates; the next search misses again.
        db.add_document_and_embed(&alice(), &doc_req("kb", "Doc2", "more cached words"), "")
            .await
            .unwrap();
        assert_eq!(db.get_cache_stats().entries, 0);

        db.search(&req).await.unwrap();
        assert_eq!(db.get_cache_stats().misses, 2);

        db.clear_cache();
        assert_eq!(db.get_cache_stats().entries, 0);
    }

    #[tokio::test]
    async fn test_validate_collection_vectors() {
        let mut db = db();
        db.create_collection(&alice(), &create_req("kb")).unwrap();
        let meta = db
            .add_document_and_embed(&alice(), &doc_req("kb", "Doc", "valid vectors here"), "")
            .await
            .unwrap();

        let report = db
            .validate_collection_vectors(&alice(), "kb", false)
            .unwrap();
        assert_eq!(report.checked as usize, meta.total_chunks as usize);
        assert!(report.invalid.is_empty());

        // Repair pass on a healthy collection changes nothing.
        let report = db.validate_collection_vectors(&alice(), "kb", true).unwrap();
        assert_eq!(report.repaired, 0);
        assert_eq!(report.documents_updated, 0);
    }
}
