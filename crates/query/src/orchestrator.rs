use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;

use extract::{Relationship, content_words, normalize_name};
use futures::future::join;
use index::{EmbeddingCache, GraphQuery, GraphStore, IndexError, SearchHit, VectorIndex, cosine_similarity};
use ingest::Chunk;
use tokio::time::{Instant, timeout_at};
use tracing::{debug, info, instrument, warn};

use crate::config::RetrievalConfig;
use crate::context::{CandidateSource, ContextSet, RetrievalDiagnostics};
use crate::error::RetrievalError;
use crate::rerank::{Candidate, Reranked, Reranker, rank_by_raw_similarity};

/// Terms from a query worth matching against graph entity names: the whole
/// query, then adjacent content-word pairs, then single content words.
pub fn query_terms(query: &str) -> Vec<String> {
    let normalized = normalize_name(query);
    let words = content_words(&normalized);

    let mut terms = Vec::new();
    let mut push = |term: String| {
        if !term.is_empty() && !terms.contains(&term) {
            terms.push(term);
        }
    };

    push(normalized);
    for pair in words.windows(2) {
        push(pair.join(" "));
    }
    for word in words {
        push(word);
    }
    terms
}

/// Await `fut` unless the deadline passes first.
async fn within<T>(deadline: Option<Instant>, fut: impl Future<Output = T>) -> Option<T> {
    match deadline {
        Some(at) => timeout_at(at, fut).await.ok(),
        None => Some(fut.await),
    }
}

/// Candidate assembly state carried through the pipeline, so a deadline can
/// cut it short and still hand back what was gathered.
#[derive(Default)]
struct Progress {
    candidates: Vec<Candidate>,
    graph_facts: Vec<Relationship>,
    diagnostics: RetrievalDiagnostics,
    vector_ok: bool,
    graph_ok: bool,
    embedding_error: Option<IndexError>,
    store_error: Option<IndexError>,
}

impl Progress {
    fn degrade(&mut self, step: &str, err: &IndexError) {
        warn!(step, error = %err, "Retrieval step failed, degrading");
        self.diagnostics.degraded.push(format!("{step}: {err}"));
    }

    fn deadline_hit(&mut self, step: &str) {
        warn!(step, "Retrieval deadline exceeded, returning best context so far");
        self.diagnostics.deadline_exceeded = true;
    }
}

/// Vector search plus graph expansion, reranked into one [`ContextSet`].
pub struct RetrievalOrchestrator {
    embeddings: Arc<EmbeddingCache>,
    vectors: Arc<dyn VectorIndex>,
    graph: Arc<dyn GraphStore>,
    reranker: Reranker,
    config: RetrievalConfig,
}

impl RetrievalOrchestrator {
    pub fn new(
        embeddings: Arc<EmbeddingCache>,
        vectors: Arc<dyn VectorIndex>,
        graph: Arc<dyn GraphStore>,
        reranker: Reranker,
        config: RetrievalConfig,
    ) -> Self {
        Self {
            embeddings,
            vectors,
            graph,
            reranker,
            config,
        }
    }

    pub fn config(&self) -> &RetrievalConfig {
        &self.config
    }

    /// [`retrieve_context`](Self::retrieve_context) with the configured `top_k` values.
    pub async fn retrieve(&self, query: &str) -> Result<ContextSet, RetrievalError> {
        self.retrieve_context(query, self.config.top_k, self.config.top_k_rerank)
            .await
    }

    /// Empty results are a valid outcome. An error is returned only when
    /// neither the vector store nor the graph store could be queried.
    #[instrument(skip_all, fields(query_len = query.len(), top_k = top_k, top_k_rerank = top_k_rerank))]
    pub async fn retrieve_context(
        &self,
        query: &str,
        top_k: usize,
        top_k_rerank: usize,
    ) -> Result<ContextSet, RetrievalError> {
        let query = query.trim();
        if query.is_empty() || top_k == 0 || top_k_rerank == 0 {
            return Ok(ContextSet::default());
        }

        let deadline = self.config.deadline().map(|d| Instant::now() + d);
        let mut progress = Progress::default();

        if !self.gather(query, top_k, deadline, &mut progress).await {
            // Cut short by the deadline; rank whatever was gathered
            let reranked = rank_by_raw_similarity(std::mem::take(&mut progress.candidates));
            return Ok(finish(reranked, progress, top_k_rerank));
        }

        if !progress.vector_ok && !progress.graph_ok {
            return Err(match (progress.embedding_error, progress.store_error) {
                (Some(err), _) | (None, Some(err)) => err.into(),
                (None, None) => RetrievalError::StoreUnavailable("no store answered".into()),
            });
        }

        let candidates = std::mem::take(&mut progress.candidates);
        if candidates.is_empty() {
            info!("No candidates for query");
            return Ok(finish(Reranked::default(), progress, top_k_rerank));
        }

        let reranked = match within(deadline, self.reranker.rerank(query, candidates.clone())).await {
            Some(Ok(reranked)) => reranked,
            Some(Err(err)) => {
                warn!(error = %err, "Reranking failed, ordering by retrieval similarity");
                progress.diagnostics.degraded.push(format!("rerank: {err}"));
                rank_by_raw_similarity(candidates)
            }
            None => {
                progress.deadline_hit("rerank");
                rank_by_raw_similarity(candidates)
            }
        };

        Ok(finish(reranked, progress, top_k_rerank))
    }

    /// Fill `progress` with vector and graph candidates. Returns `false` if
    /// the deadline cut gathering short.
    async fn gather(&self, query: &str, top_k: usize, deadline: Option<Instant>, progress: &mut Progress) -> bool {
        // Embed the query
        let query_vector = match within(deadline, self.embeddings.get_or_compute(query)).await {
            None => {
                progress.deadline_hit("embed");
                return false;
            }
            Some(Ok(vector)) => Some(vector),
            Some(Err(err)) => {
                progress.degrade("embed query", &err);
                progress.embedding_error = Some(err);
                None
            }
        };

        // Vector search
        let mut hits: Vec<SearchHit> = Vec::new();
        if let Some(vector) = &query_vector {
            match within(deadline, self.vectors.search(vector, top_k)).await {
                None => {
                    progress.deadline_hit("vector search");
                    return false;
                }
                Some(Ok(found)) => {
                    progress.vector_ok = true;
                    hits = found;
                }
                Some(Err(err)) => {
                    progress.degrade("vector search", &err);
                    progress.store_error = Some(err);
                }
            }
        }
        debug!(hits = hits.len(), "Vector search done");

        if !hits.is_empty() {
            let ids: Vec<String> = hits.iter().map(|h| h.chunk_id.clone()).collect();
            match within(deadline, self.vectors.fetch_chunks(&ids)).await {
                None => {
                    progress.deadline_hit("fetch chunks");
                    return false;
                }
                Some(Ok(chunks)) => {
                    for (rank, hit) in hits.iter().enumerate() {
                        if let Some(chunk) = chunks.iter().find(|c| c.id == hit.chunk_id) {
                            progress.candidates.push(Candidate {
                                chunk: chunk.clone(),
                                raw_similarity: hit.similarity,
                                source: CandidateSource::Vector,
                                vector_rank: Some(rank),
                            });
                        }
                    }
                }
                Some(Err(err)) => {
                    progress.degrade("fetch chunks", &err);
                    progress.vector_ok = false;
                    progress.store_error = Some(err);
                }
            }
        }

        // Graph: entities cited by the strongest hits, plus names in the query
        let seeds: Vec<String> = hits
            .iter()
            .filter(|h| h.similarity >= self.config.graph.chunk_threshold)
            .take(self.config.graph_seed_chunks)
            .map(|h| h.chunk_id.clone())
            .collect();
        let by_chunk = (!seeds.is_empty()).then(|| GraphQuery::ChunkIds(seeds));
        let by_name = GraphQuery::EntityNames(query_terms(query));
        let max_hops = self.config.graph.max_hops;

        let lookups = join(
            async {
                match &by_chunk {
                    Some(q) => Some(self.graph.find_related(q, max_hops).await),
                    None => None,
                }
            },
            self.graph.find_related(&by_name, max_hops),
        );
        let (from_chunks, from_names) = match within(deadline, lookups).await {
            None => {
                progress.deadline_hit("graph");
                return false;
            }
            Some(results) => results,
        };

        for result in [from_chunks, Some(from_names)].into_iter().flatten() {
            match result {
                Ok(facts) => {
                    progress.graph_ok = true;
                    for fact in facts {
                        if !progress.graph_facts.contains(&fact) {
                            progress.graph_facts.push(fact);
                        }
                    }
                }
                Err(err) => {
                    progress.degrade("graph lookup", &err);
                    progress.store_error.get_or_insert(err);
                }
            }
        }
        progress.graph_facts.truncate(self.config.graph.max_facts);
        debug!(facts = progress.graph_facts.len(), "Graph lookup done");

        // Evidence chunks behind graph facts that vector search missed
        let known: HashSet<String> = progress.candidates.iter().map(|c| c.chunk.id.clone()).collect();
        let mut evidence: Vec<String> = Vec::new();
        for fact in &progress.graph_facts {
            let id = &fact.evidence_chunk_id;
            if !id.is_empty() && !known.contains(id) && !evidence.contains(id) {
                evidence.push(id.clone());
            }
        }
        if evidence.is_empty() {
            return true;
        }

        match within(deadline, self.vectors.fetch_chunks(&evidence)).await {
            None => {
                progress.deadline_hit("fetch graph evidence");
                return false;
            }
            Some(Ok(chunks)) => {
                for chunk in chunks {
                    let raw_similarity = graph_similarity(query_vector.as_deref(), &chunk);
                    progress.candidates.push(Candidate {
                        chunk,
                        raw_similarity,
                        source: CandidateSource::Graph,
                        vector_rank: None,
                    });
                }
            }
            Some(Err(err)) => progress.degrade("fetch graph evidence", &err),
        }
        true
    }
}

fn graph_similarity(query_vector: Option<&[f32]>, chunk: &Chunk) -> f32 {
    match (query_vector, chunk.embedding()) {
        (Some(q), Some(e)) => cosine_similarity(q, e),
        _ => 0.0,
    }
}

fn finish(reranked: Reranked, progress: Progress, top_k_rerank: usize) -> ContextSet {
    let Reranked {
        stage,
        skipped,
        mut chunks,
        mut scores,
    } = reranked;
    chunks.truncate(top_k_rerank);
    scores.truncate(top_k_rerank);

    let mut diagnostics = progress.diagnostics;
    diagnostics.scoring_stage = stage;
    diagnostics.skipped_stages = skipped;

    info!(
        chunks = chunks.len(),
        graph_facts = progress.graph_facts.len(),
        stage = diagnostics.scoring_stage.as_deref().unwrap_or("none"),
        degraded = diagnostics.degraded.len(),
        deadline_exceeded = diagnostics.deadline_exceeded,
        "Context assembled"
    );

    ContextSet {
        chunks,
        scores,
        graph_facts: progress.graph_facts,
        diagnostics,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use index::{EmbeddingCacheConfig, GraphSearchConfig, InMemoryGraphStore, InMemoryVectorIndex, OllamaEmbeddingClient};
    use std::sync::Mutex;

    /// Records `name=value` for every field set when a span is created.
    #[derive(Clone, Default)]
    struct SpanFields(Arc<Mutex<Vec<String>>>);

    impl<S: tracing::Subscriber> tracing_subscriber::Layer<S> for SpanFields {
        fn on_new_span(
            &self,
            attrs: &tracing::span::Attributes<'_>,
            _id: &tracing::span::Id,
            _ctx: tracing_subscriber::layer::Context<'_, S>,
        ) {
            struct Visitor<'a>(&'a mut Vec<String>);
            impl tracing::field::Visit for Visitor<'_> {
                fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn std::fmt::Debug) {
                    self.0.push(format!("{}={:?}", field.name(), value));
                }
            }
            attrs.record(&mut Visitor(&mut self.0.lock().unwrap()));
        }
    }

    #[test]
    fn test_query_terms() {
        assert_eq!(
            query_terms("Climate policy"),
            vec!["climate policy", "climate", "policy"]
        );
        assert_eq!(
            query_terms("Who does Alice work with?"),
            vec!["who does alice work with", "alice work", "alice", "work"]
        );
        assert!(query_terms("   ").is_empty());
    }

    #[tokio::test]
    async fn test_span_records_top_k_values() {
        use tracing_subscriber::layer::SubscriberExt;

        let fields = SpanFields::default();
        let subscriber = tracing_subscriber::registry().with(fields.clone());
        let _guard = tracing::subscriber::set_default(subscriber);

        let embedder = OllamaEmbeddingClient::new("http://127.0.0.1:9".into(), "unused".into());
        let orchestrator = RetrievalOrchestrator::new(
            Arc::new(EmbeddingCache::new(Arc::new(embedder), EmbeddingCacheConfig::default())),
            Arc::new(InMemoryVectorIndex::new()),
            Arc::new(InMemoryGraphStore::new(GraphSearchConfig::default())),
            Reranker::new(Vec::new()),
            RetrievalConfig::default(),
        );

        let context = orchestrator.retrieve_context("   ", 7, 3).await.unwrap();

        assert!(context.is_empty());
        let recorded = fields.0.lock().unwrap().clone();
        assert!(recorded.contains(&"top_k=7".to_string()));
        assert!(recorded.contains(&"top_k_rerank=3".to_string()));
    }
}
