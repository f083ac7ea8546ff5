use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use extract::{EntityExtractor, ExtractionConfig, LlmClient, LlmError, Relationship};
use index::{
    EmbeddingCache, EmbeddingCacheConfig, EmbeddingProvider, GraphQuery, GraphSearchConfig, GraphStore,
    InMemoryGraphStore, InMemoryVectorIndex, IndexError, IndexResult, SearchHit, StoredEmbedding, VectorIndex,
};
use ingest::Chunk;
use query::{
    CandidateSource, EmbeddingCosine, Reranker, RetrievalConfig, RetrievalError, RetrievalOrchestrator, ScoreError,
    ScoringStrategy,
};

// Test doubles

struct TableEmbedder {
    table: HashMap<String, Vec<f32>>,
    available: bool,
    calls: AtomicUsize,
}

impl TableEmbedder {
    fn new(entries: &[(&str, Vec<f32>)]) -> Arc<Self> {
        Arc::new(Self {
            table: entries.iter().map(|(k, v)| (k.to_string(), v.clone())).collect(),
            available: true,
            calls: AtomicUsize::new(0),
        })
    }

    fn unavailable() -> Arc<Self> {
        Arc::new(Self {
            table: HashMap::new(),
            available: false,
            calls: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl EmbeddingProvider for TableEmbedder {
    async fn embed(&self, text: &str) -> IndexResult<Vec<f32>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.available {
            return Err(IndexError::EmbeddingUnavailable("connection refused".into()));
        }
        Ok(self.table.get(text).cloned().unwrap_or_else(|| vec![0.0, 0.0, 1.0]))
    }
}

struct DownVectorIndex;

#[async_trait]
impl VectorIndex for DownVectorIndex {
    async fn search(&self, _query_vector: &[f32], _top_k: usize) -> IndexResult<Vec<SearchHit>> {
        Err(IndexError::StoreUnavailable("qdrant: connection refused".into()))
    }

    async fn fetch_chunks(&self, _chunk_ids: &[String]) -> IndexResult<Vec<Chunk>> {
        Err(IndexError::StoreUnavailable("qdrant: connection refused".into()))
    }
}

struct DownGraphStore;

#[async_trait]
impl GraphStore for DownGraphStore {
    async fn find_related(&self, _query: &GraphQuery, _max_hops: usize) -> IndexResult<Vec<Relationship>> {
        Err(IndexError::StoreUnavailable("neo4j: connection refused".into()))
    }
}

/// Delays every call to the wrapped store.
struct SlowVectorIndex {
    inner: InMemoryVectorIndex,
    delay: Duration,
}

#[async_trait]
impl VectorIndex for SlowVectorIndex {
    async fn search(&self, query_vector: &[f32], top_k: usize) -> IndexResult<Vec<SearchHit>> {
        tokio::time::sleep(self.delay).await;
        self.inner.search(query_vector, top_k).await
    }

    async fn fetch_chunks(&self, chunk_ids: &[String]) -> IndexResult<Vec<Chunk>> {
        self.inner.fetch_chunks(chunk_ids).await
    }
}

struct SlowGraphStore {
    delay: Duration,
}

#[async_trait]
impl GraphStore for SlowGraphStore {
    async fn find_related(&self, _query: &GraphQuery, _max_hops: usize) -> IndexResult<Vec<Relationship>> {
        tokio::time::sleep(self.delay).await;
        Ok(Vec::new())
    }
}

struct BrokenCrossEncoder {
    calls: AtomicUsize,
}

#[async_trait]
impl ScoringStrategy for BrokenCrossEncoder {
    fn name(&self) -> &str {
        "cross_encoder"
    }

    async fn score(&self, _query: &str, _chunks: &[Chunk]) -> Result<Vec<f32>, ScoreError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(ScoreError::Unavailable("model not loaded".into()))
    }
}

/// Always answers with the same completion.
struct FixedLlm(&'static str);

#[async_trait]
impl LlmClient for FixedLlm {
    async fn complete(&self, _prompt: &str, _timeout: Duration) -> Result<String, LlmError> {
        Ok(self.0.to_string())
    }
}

// Fixtures

fn chunk(id: &str, text: &str) -> Chunk {
    Chunk::with_id(id, "doc-1", text, (0, text.len()))
}

/// Unit vector at cosine `similarity` from `[1, 0, 0]`.
fn at_similarity(similarity: f32) -> Vec<f32> {
    vec![similarity, (1.0 - similarity * similarity).sqrt(), 0.0]
}

fn climate_index() -> InMemoryVectorIndex {
    let index = InMemoryVectorIndex::new();
    index.insert(
        chunk("c1", "The new climate policy caps emissions."),
        StoredEmbedding::RawFloatArray(at_similarity(0.9)),
    );
    index.insert(
        chunk("c2", "Policy makers debated the climate bill."),
        StoredEmbedding::RawFloatArray(at_similarity(0.8)),
    );
    index.insert(
        chunk("c3", "Recipes for sourdough bread."),
        StoredEmbedding::RawFloatArray(vec![0.0, 0.0, 1.0]),
    );
    index
}

fn people_graph() -> InMemoryGraphStore {
    let graph = InMemoryGraphStore::new(GraphSearchConfig::default());
    graph.insert_extraction(&extract::ExtractionResult {
        entities: Vec::new(),
        relationships: vec![Relationship {
            entity1: "Alice".into(),
            entity2: "Bob".into(),
            relation_type: "works_with".into(),
            confidence: None,
            evidence_chunk_id: "c7".into(),
        }],
        status: extract::ExtractionStatus::Succeeded,
        debug: extract::ExtractionDebug::default(),
    });
    graph
}

fn cache_over(embedder: Arc<TableEmbedder>) -> Arc<EmbeddingCache> {
    Arc::new(EmbeddingCache::new(embedder, EmbeddingCacheConfig::default()))
}

fn orchestrator(
    cache: Arc<EmbeddingCache>,
    vectors: Arc<dyn VectorIndex>,
    graph: Arc<dyn GraphStore>,
    strategies: Vec<Arc<dyn ScoringStrategy>>,
    config: RetrievalConfig,
) -> RetrievalOrchestrator {
    RetrievalOrchestrator::new(cache, vectors, graph, Reranker::new(strategies), config)
}

fn climate_embedder() -> Arc<TableEmbedder> {
    TableEmbedder::new(&[("climate policy", vec![1.0, 0.0, 0.0])])
}

// Scenarios

#[tokio::test]
async fn test_climate_policy_vector_only_context() {
    let cache = cache_over(climate_embedder());
    let orchestrator = orchestrator(
        cache.clone(),
        Arc::new(climate_index()),
        Arc::new(people_graph()),
        vec![Arc::new(EmbeddingCosine::new(cache))],
        RetrievalConfig::default(),
    );

    let context = orchestrator.retrieve_context("climate policy", 2, 5).await.unwrap();

    assert_eq!(context.chunk_ids(), vec!["c1", "c2"]);
    assert!(context.graph_facts.is_empty());
    assert!(context.scores[0].reranked_score > context.scores[1].reranked_score);
    assert!(context.scores.iter().all(|s| s.source == CandidateSource::Vector));
    assert_eq!(context.diagnostics.scoring_stage.as_deref(), Some("embedding_cosine"));
    assert!(context.diagnostics.degraded.is_empty());
}

#[tokio::test]
async fn test_query_embedding_is_cached_across_stages() {
    let embedder = climate_embedder();
    let cache = cache_over(embedder.clone());
    let orchestrator = orchestrator(
        cache.clone(),
        Arc::new(climate_index()),
        Arc::new(InMemoryGraphStore::new(GraphSearchConfig::default())),
        vec![Arc::new(EmbeddingCosine::new(cache.clone()))],
        RetrievalConfig::default(),
    );

    orchestrator.retrieve("climate policy").await.unwrap();
    orchestrator.retrieve("climate policy").await.unwrap();

    assert_eq!(embedder.calls.load(Ordering::SeqCst), 1);
    assert!(cache.stats().hits >= 3);
}

#[tokio::test]
async fn test_top_k_rerank_truncates() {
    let cache = cache_over(climate_embedder());
    let orchestrator = orchestrator(
        cache.clone(),
        Arc::new(climate_index()),
        Arc::new(InMemoryGraphStore::new(GraphSearchConfig::default())),
        vec![Arc::new(EmbeddingCosine::new(cache))],
        RetrievalConfig::default(),
    );

    let context = orchestrator.retrieve_context("climate policy", 10, 1).await.unwrap();

    assert_eq!(context.chunk_ids(), vec!["c1"]);
    assert_eq!(context.scores.len(), 1);
}

#[tokio::test]
async fn test_graph_only_when_embedding_unavailable() {
    let index = InMemoryVectorIndex::new();
    index.insert(
        chunk("c7", "Alice works with Bob."),
        StoredEmbedding::RawFloatArray(vec![0.3, 0.3, 0.3]),
    );
    let cache = cache_over(TableEmbedder::unavailable());
    let orchestrator = orchestrator(
        cache.clone(),
        Arc::new(index),
        Arc::new(people_graph()),
        vec![Arc::new(EmbeddingCosine::new(cache))],
        RetrievalConfig::default(),
    );

    let context = orchestrator
        .retrieve_context("Who does Alice work with?", 5, 5)
        .await
        .unwrap();

    assert_eq!(context.chunk_ids(), vec!["c7"]);
    assert_eq!(context.scores[0].source, CandidateSource::Graph);
    assert_eq!(context.graph_facts.len(), 1);
    assert_eq!(context.graph_facts[0].relation_type, "works_with");
    assert!(context.diagnostics.scoring_stage.is_none());
    assert!(context.diagnostics.degraded.iter().any(|d| d.starts_with("embed query")));
    assert!(context.diagnostics.degraded.iter().any(|d| d.starts_with("rerank")));
}

#[tokio::test]
async fn test_cross_encoder_failure_falls_back_to_embedding_stage() {
    let cache = cache_over(climate_embedder());
    let broken = Arc::new(BrokenCrossEncoder {
        calls: AtomicUsize::new(0),
    });
    let orchestrator = orchestrator(
        cache.clone(),
        Arc::new(climate_index()),
        Arc::new(InMemoryGraphStore::new(GraphSearchConfig::default())),
        vec![broken.clone(), Arc::new(EmbeddingCosine::new(cache))],
        RetrievalConfig::default(),
    );

    let context = orchestrator.retrieve_context("climate policy", 2, 5).await.unwrap();

    assert_eq!(broken.calls.load(Ordering::SeqCst), 1);
    assert_eq!(context.diagnostics.scoring_stage.as_deref(), Some("embedding_cosine"));
    assert_eq!(context.diagnostics.skipped_stages.len(), 1);
    assert!(context.diagnostics.skipped_stages[0].starts_with("cross_encoder"));
    assert_eq!(context.chunk_ids(), vec!["c1", "c2"]);
    assert!(context.scores.iter().all(|s| s.reranked_score.is_finite()));
}

#[tokio::test]
async fn test_equal_scores_are_ordered_reproducibly() {
    let index = InMemoryVectorIndex::new();
    for id in ["c2", "c1"] {
        index.insert(
            chunk(id, "identical text"),
            StoredEmbedding::RawFloatArray(at_similarity(0.7)),
        );
    }
    let cache = cache_over(climate_embedder());
    let orchestrator = orchestrator(
        cache.clone(),
        Arc::new(index),
        Arc::new(InMemoryGraphStore::new(GraphSearchConfig::default())),
        vec![Arc::new(EmbeddingCosine::new(cache))],
        RetrievalConfig::default(),
    );

    for _ in 0..3 {
        let context = orchestrator.retrieve_context("climate policy", 5, 5).await.unwrap();
        assert_eq!(context.chunk_ids(), vec!["c1", "c2"]);
        assert_eq!(context.scores[0].reranked_score, context.scores[1].reranked_score);
    }
}

#[tokio::test]
async fn test_graph_facts_pull_in_evidence_chunks() {
    let index = climate_index();
    index.insert(
        chunk("c7", "Alice works with Bob on climate policy."),
        StoredEmbedding::RawFloatArray(at_similarity(0.3)),
    );

    // Extract the graph from the evidence chunk itself
    let extractor = EntityExtractor::new(
        Arc::new(FixedLlm(
            r#"[{"entity1": {"name": "Alice", "type": "PERSON"}, "entity2": {"name": "Climate Policy", "type": "CONCEPT"}, "relationship": "works on"}]"#,
        )),
        ExtractionConfig::default(),
    );
    let graph = InMemoryGraphStore::new(GraphSearchConfig::default());
    let evidence = chunk("c7", "Alice works with Bob on climate policy.");
    graph.insert_extraction(&extractor.extract_chunk(&evidence).await);

    let cache = cache_over(climate_embedder());
    let orchestrator = orchestrator(
        cache.clone(),
        Arc::new(index),
        Arc::new(graph),
        vec![Arc::new(EmbeddingCosine::new(cache))],
        RetrievalConfig::default(),
    );

    let context = orchestrator.retrieve_context("climate policy", 2, 5).await.unwrap();

    assert_eq!(context.graph_facts.len(), 1);
    assert_eq!(context.graph_facts[0].relation_type, "works_on");
    assert_eq!(context.graph_facts[0].evidence_chunk_id, "c7");
    assert_eq!(context.chunk_ids(), vec!["c1", "c2", "c7"]);
    let c7 = context.scores.iter().find(|s| s.chunk_id == "c7").unwrap();
    assert_eq!(c7.source, CandidateSource::Graph);
    assert_eq!(c7.vector_rank, None);
}

#[tokio::test]
async fn test_both_stores_down_is_an_error() {
    let cache = cache_over(climate_embedder());
    let orchestrator = orchestrator(
        cache.clone(),
        Arc::new(DownVectorIndex),
        Arc::new(DownGraphStore),
        vec![Arc::new(EmbeddingCosine::new(cache))],
        RetrievalConfig::default(),
    );

    let err = orchestrator.retrieve("climate policy").await.unwrap_err();
    assert!(matches!(err, RetrievalError::StoreUnavailable(_)));
}

#[tokio::test]
async fn test_vector_store_down_degrades_to_graph() {
    let cache = cache_over(climate_embedder());
    let orchestrator = orchestrator(
        cache.clone(),
        Arc::new(DownVectorIndex),
        Arc::new(people_graph()),
        vec![Arc::new(EmbeddingCosine::new(cache))],
        RetrievalConfig::default(),
    );

    let context = orchestrator.retrieve("What about Alice?").await.unwrap();

    assert!(context.chunks.is_empty());
    assert_eq!(context.graph_facts.len(), 1);
    assert!(context.diagnostics.degraded.iter().any(|d| d.starts_with("vector search")));
}

#[tokio::test]
async fn test_empty_index_and_graph_give_empty_context() {
    let cache = cache_over(climate_embedder());
    let orchestrator = orchestrator(
        cache.clone(),
        Arc::new(InMemoryVectorIndex::new()),
        Arc::new(InMemoryGraphStore::new(GraphSearchConfig::default())),
        vec![Arc::new(EmbeddingCosine::new(cache))],
        RetrievalConfig::default(),
    );

    let context = orchestrator.retrieve("climate policy").await.unwrap();
    assert!(context.is_empty());

    let blank = orchestrator.retrieve("   ").await.unwrap();
    assert!(blank.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_deadline_during_vector_search_returns_empty_context() {
    let cache = cache_over(climate_embedder());
    let orchestrator = orchestrator(
        cache.clone(),
        Arc::new(SlowVectorIndex {
            inner: climate_index(),
            delay: Duration::from_secs(5),
        }),
        Arc::new(InMemoryGraphStore::new(GraphSearchConfig::default())),
        vec![Arc::new(EmbeddingCosine::new(cache))],
        RetrievalConfig {
            deadline_secs: Some(1),
            ..RetrievalConfig::default()
        },
    );

    let started = tokio::time::Instant::now();
    let context = orchestrator.retrieve("climate policy").await.unwrap();

    assert!(context.diagnostics.deadline_exceeded);
    assert!(context.chunks.is_empty());
    assert!(started.elapsed() < Duration::from_secs(2));
}

#[tokio::test(start_paused = true)]
async fn test_deadline_during_graph_keeps_vector_candidates() {
    let cache = cache_over(climate_embedder());
    let orchestrator = orchestrator(
        cache.clone(),
        Arc::new(climate_index()),
        Arc::new(SlowGraphStore {
            delay: Duration::from_secs(30),
        }),
        vec![Arc::new(EmbeddingCosine::new(cache))],
        RetrievalConfig {
            deadline_secs: Some(2),
            ..RetrievalConfig::default()
        },
    );

    let context = orchestrator.retrieve_context("climate policy", 2, 5).await.unwrap();

    assert!(context.diagnostics.deadline_exceeded);
    assert_eq!(context.chunk_ids(), vec!["c1", "c2"]);
    assert!(context.diagnostics.scoring_stage.is_none());
}
