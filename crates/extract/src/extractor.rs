use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use ingest::{Chunk, content_hash};
use tokio::time::{sleep, timeout};
use tracing::{debug, info, instrument, warn};

use crate::cache::ResponseCache;
use crate::config::ExtractionConfig;
use crate::error::{ExtractionFailure, FailureKind};
use crate::llm::LlmClient;
use crate::normalizer::{normalize_name, normalize_relation_type};
use crate::prompt::build_extraction_prompt;
use crate::recovery::{RecoveryLayer, recover_json};
use crate::response::{ProposedEndpoint, ProposedExtraction, interpret};
use crate::schema::{Entity, EntityType, ExtractionDebug, ExtractionResult, ExtractionStatus, Relationship};

/// States of a single extraction call.
#[derive(Debug)]
enum State {
    CacheCheck,
    Attempt(u32),
    ParseResponse { attempt: u32, raw: String },
    Validate { proposed: ProposedExtraction, layer: RecoveryLayer },
    Succeeded(ExtractionResult),
    Failed,
}

pub struct EntityExtractor {
    llm: Arc<dyn LlmClient>,
    cache: ResponseCache,
    config: ExtractionConfig,
}

impl EntityExtractor {
    pub fn new(llm: Arc<dyn LlmClient>, config: ExtractionConfig) -> Self {
        Self {
            llm,
            cache: ResponseCache::new(config.cache_max_entries),
            config,
        }
    }

    pub fn config(&self) -> &ExtractionConfig {
        &self.config
    }

    /// Extract entities and relationships from `text`. Never fails: an
    /// extraction that exhausts its retries yields an empty result with
    /// `status == Failed` and the attempt history in `debug`.
    pub async fn extract(&self, text: &str) -> ExtractionResult {
        match self.try_extract(text).await {
            Ok(result) => result,
            Err(failure) => {
                warn!(
                    attempts = failure.debug.attempts,
                    errors = ?failure.debug.errors,
                    "Extraction failed, returning empty result"
                );
                ExtractionResult::failed(failure.debug)
            }
        }
    }

    /// Extract from a chunk; relationships cite the chunk as evidence.
    pub async fn extract_chunk(&self, chunk: &Chunk) -> ExtractionResult {
        self.extract(&chunk.text).await.with_evidence(&chunk.id)
    }

    pub async fn try_extract(&self, text: &str) -> Result<ExtractionResult, ExtractionFailure> {
        self.try_extract_with(text, self.config.max_retries, self.config.retry_delay())
            .await
    }

    /// Run the extraction state machine with an explicit retry policy.
    #[instrument(skip_all, fields(text_len = text.len(), max_retries = max_retries))]
    pub async fn try_extract_with(
        &self,
        text: &str,
        max_retries: u32,
        retry_delay: Duration,
    ) -> Result<ExtractionResult, ExtractionFailure> {
        let max_attempts = max_retries.max(1);
        let key = content_hash(text);
        let prompt = build_extraction_prompt(text);
        let mut debug = ExtractionDebug::default();
        let mut state = State::CacheCheck;

        loop {
            state = match state {
                State::CacheCheck => match self.cached(&key) {
                    Some(mut hit) => {
                        debug!(key = %key, "Extraction cache hit");
                        hit.debug = ExtractionDebug {
                            cache_hit: true,
                            ..ExtractionDebug::default()
                        };
                        return Ok(hit);
                    }
                    None => State::Attempt(1),
                },

                State::Attempt(n) => {
                    debug.attempts = n;
                    let attempt_timeout = self.config.attempt_timeout();
                    match timeout(attempt_timeout, self.llm.complete(&prompt, attempt_timeout)).await {
                        Ok(Ok(raw)) => State::ParseResponse { attempt: n, raw },
                        Ok(Err(err)) => {
                            debug.errors.push(format!("attempt {n}: {err}"));
                            self.next_after_failure(n, max_attempts, retry_delay, &debug).await
                        }
                        Err(_) => {
                            debug.errors.push(format!(
                                "attempt {n}: timed out after {}ms",
                                attempt_timeout.as_millis()
                            ));
                            self.next_after_failure(n, max_attempts, retry_delay, &debug).await
                        }
                    }
                }

                State::ParseResponse { attempt, raw } => {
                    let parsed = recover_json(&raw)
                        .ok_or_else(|| "no recoverable JSON in response".to_string())
                        .and_then(|(value, layer)| interpret(&value).map(|p| (p, layer)));
                    match parsed {
                        Ok((proposed, layer)) => State::Validate { proposed, layer },
                        Err(reason) => {
                            debug.errors.push(format!("attempt {attempt}: {reason}"));
                            self.next_after_failure(attempt, max_attempts, retry_delay, &debug)
                                .await
                        }
                    }
                }

                State::Validate { proposed, layer } => {
                    debug.recovery = Some(layer);
                    let (entities, relationships) = self.validate(proposed, &key);
                    State::Succeeded(ExtractionResult {
                        entities,
                        relationships,
                        status: ExtractionStatus::Succeeded,
                        debug: debug.clone(),
                    })
                }

                State::Succeeded(result) => {
                    if self.config.cache_enabled {
                        self.cache.insert(key, result.clone());
                    }
                    if debug.attempts > 1 {
                        let attempts = debug.attempts;
                        info!(attempts, "Extraction succeeded after retries");
                    }
                    return Ok(result);
                }

                State::Failed => {
                    return Err(ExtractionFailure {
                        kind: FailureKind::RetriesExhausted,
                        debug,
                    });
                }
            };
        }
    }

    fn cached(&self, key: &str) -> Option<ExtractionResult> {
        if !self.config.cache_enabled {
            return None;
        }
        self.cache.get(key)
    }

    /// Linear backoff: attempt `n` failing waits `retry_delay * n`.
    async fn next_after_failure(
        &self,
        attempt: u32,
        max_attempts: u32,
        retry_delay: Duration,
        debug: &ExtractionDebug,
    ) -> State {
        if attempt >= max_attempts {
            warn!(attempts = attempt, "Extraction failed after max retries");
            return State::Failed;
        }

        let backoff = retry_delay * attempt;
        let last_error = debug.errors.last().map(String::as_str).unwrap_or_default();
        warn!(
            attempt,
            max_attempts,
            backoff_ms = backoff.as_millis() as u64,
            error = last_error,
            "Extraction attempt failed, retrying"
        );
        sleep(backoff).await;
        State::Attempt(attempt + 1)
    }

    /// Drop nameless entities and relationships missing an endpoint; resolve
    /// id references; assign canonical ids. Only names that normalize
    /// identically are merged, and nothing carries over between calls.
    fn validate(&self, proposed: ProposedExtraction, evidence_key: &str) -> (Vec<Entity>, Vec<Relationship>) {
        let mut entities: Vec<Entity> = Vec::new();
        let mut by_canonical: HashMap<String, usize> = HashMap::new();
        let mut by_id: HashMap<String, usize> = HashMap::new();

        for candidate in proposed.entities {
            let Some(index) = self.admit_entity(
                &mut entities,
                &mut by_canonical,
                &candidate.name,
                candidate.label.as_deref(),
            ) else {
                continue;
            };
            if let Some(id) = candidate.id {
                by_id.insert(id.trim().to_string(), index);
            }
        }

        let mut relationships: Vec<Relationship> = Vec::new();
        for candidate in proposed.relationships {
            let source = self.resolve_endpoint(&candidate.source, &mut entities, &mut by_canonical, &by_id);
            let target = self.resolve_endpoint(&candidate.target, &mut entities, &mut by_canonical, &by_id);
            let (Some(source), Some(target)) = (source, target) else {
                debug!(
                    source = %candidate.source.reference,
                    target = %candidate.target.reference,
                    "Dropping relationship with unresolved endpoint"
                );
                continue;
            };

            let relationship = Relationship {
                entity1: entities[source].name.clone(),
                entity2: entities[target].name.clone(),
                relation_type: normalize_relation_type(&candidate.relation),
                confidence: candidate.confidence,
                evidence_chunk_id: evidence_key.to_string(),
            };
            let duplicate = relationships.iter().any(|r| {
                r.entity1 == relationship.entity1
                    && r.entity2 == relationship.entity2
                    && r.relation_type == relationship.relation_type
            });
            if !duplicate {
                relationships.push(relationship);
            }
        }

        (entities, relationships)
    }

    fn admit_entity(
        &self,
        entities: &mut Vec<Entity>,
        by_canonical: &mut HashMap<String, usize>,
        name: &str,
        label: Option<&str>,
    ) -> Option<usize> {
        let name = name.trim();
        if name.is_empty() {
            return None;
        }

        // Punctuation-only names are kept but get no canonical id
        let canonical = Some(normalize_name(name)).filter(|c| !c.is_empty());
        if let Some(&index) = canonical.as_ref().and_then(|c| by_canonical.get(c)) {
            return Some(index);
        }

        let entity_type = label.map(EntityType::parse_lenient).unwrap_or(EntityType::Other);
        entities.push(Entity {
            name: name.to_string(),
            entity_type,
            canonical_id: canonical.clone(),
        });
        let index = entities.len() - 1;
        if let Some(canonical) = canonical {
            by_canonical.insert(canonical, index);
        }
        Some(index)
    }

    fn resolve_endpoint(
        &self,
        endpoint: &ProposedEndpoint,
        entities: &mut Vec<Entity>,
        by_canonical: &mut HashMap<String, usize>,
        by_id: &HashMap<String, usize>,
    ) -> Option<usize> {
        let reference = endpoint.reference.trim();
        if reference.is_empty() {
            return None;
        }
        if let Some(&index) = by_id.get(reference) {
            return Some(index);
        }
        let canonical = normalize_name(reference);
        if let Some(&index) = by_canonical.get(&canonical) {
            return Some(index);
        }
        if endpoint.declares_entity {
            return self.admit_entity(entities, by_canonical, reference, endpoint.label.as_deref());
        }
        None
    }

    pub fn clear_cache(&self) {
        self.cache.clear();
    }

    pub fn cache_len(&self) -> usize {
        self.cache.len()
    }
}
