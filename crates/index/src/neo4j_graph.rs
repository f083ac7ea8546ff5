use std::collections::{HashMap, HashSet};

use anyhow::{Context, Result};
use async_trait::async_trait;
use extract::{Relationship, content_words, name_similarity, normalize_name};
use neo4rs::{Graph, Query};
use tracing::{debug, info};

use crate::error::{IndexError, IndexResult};
use crate::graph::{GraphQuery, GraphSearchConfig, GraphStore, order_facts};

/// Upper bound on fuzzy-match candidates pulled per lookup.
const CANDIDATE_LIMIT: i64 = 200;

/// Graph lookups against Neo4j.
///
/// Expects `(:Entity {id, name, type})` nodes joined by
/// `[:RELATION {type, evidence, confidence}]` edges, where `id` is the
/// normalized name and `evidence` the id of the chunk the edge came from.
pub struct Neo4jGraphStore {
    graph: Graph,
    config: GraphSearchConfig,
}

impl Neo4jGraphStore {
    pub fn new(graph: Graph, config: GraphSearchConfig) -> Self {
        Self { graph, config }
    }

    pub async fn connect(uri: &str, user: &str, password: &str, config: GraphSearchConfig) -> Result<Self> {
        let graph = Graph::new(uri, user, password)
            .await
            .with_context(|| format!("Failed to connect to Neo4j at {uri}"))?;
        Ok(Self::new(graph, config))
    }

    /// Create the lookup indexes if they are missing.
    pub async fn init_schema(&self) -> Result<()> {
        let query = Query::new(
            "CREATE INDEX entity_id_index IF NOT EXISTS FOR (e:Entity) ON (e.id)".to_string(),
        );
        self.graph
            .run(query)
            .await
            .context("Failed to create index on Entity.id")?;

        let query = Query::new(
            "CREATE INDEX entity_name_index IF NOT EXISTS FOR (e:Entity) ON (e.name)".to_string(),
        );
        self.graph
            .run(query)
            .await
            .context("Failed to create index on Entity.name")?;

        info!("Neo4j indexes ready");
        Ok(())
    }

    /// Entity ids whose names fuzzily match one of `names`.
    async fn match_names(&self, names: &[String]) -> Result<HashSet<String>> {
        let (terms, words) = candidate_terms(names);
        if terms.is_empty() {
            return Ok(HashSet::new());
        }

        // Exact names first, then prefix matches, then shorter names, so the
        // best candidates survive the limit on large graphs
        let query = Query::new(
            r#"
            MATCH (e:Entity)
            WITH e, toLower(e.name) AS lname
            WHERE lname IN $terms OR any(w IN $words WHERE lname CONTAINS w)
            RETURN e.id AS id, e.name AS name
            ORDER BY
                CASE
                    WHEN lname IN $terms OR e.id IN $terms THEN 0
                    WHEN any(w IN $words WHERE lname STARTS WITH w) THEN 1
                    ELSE 2
                END,
                size(lname)
            LIMIT $limit
            "#
            .to_string(),
        )
        .param("terms", terms)
        .param("words", words)
        .param("limit", CANDIDATE_LIMIT);

        let mut result = self.graph.execute(query).await?;
        let mut matched = HashSet::new();

        while let Some(row) = result.next().await? {
            let (Ok(id), Ok(name)) = (row.get::<String>("id"), row.get::<String>("name")) else {
                continue;
            };
            let best = names
                .iter()
                .map(|term| name_similarity(term, &name))
                .fold(0.0f32, f32::max);
            if best >= self.config.entity_threshold {
                debug!(entity = %name, score = best, "Graph entity match");
                matched.insert(id);
            }
        }

        Ok(matched)
    }

    /// Entity ids on either end of an edge cited by one of `chunk_ids`.
    async fn match_chunks(&self, chunk_ids: &[String]) -> Result<HashSet<String>> {
        let query = Query::new(
            r#"
            MATCH (e:Entity)-[r:RELATION]-(:Entity)
            WHERE r.evidence IN $chunk_ids
            RETURN DISTINCT e.id AS id
            "#
            .to_string(),
        )
        .param("chunk_ids", chunk_ids.to_vec());

        let mut result = self.graph.execute(query).await?;
        let mut matched = HashSet::new();
        while let Some(row) = result.next().await? {
            if let Ok(id) = row.get::<String>("id") {
                matched.insert(id);
            }
        }
        Ok(matched)
    }

    /// Breadth-first expansion; returns each reached id with its distance
    /// from the seeds.
    async fn expand_graph(&self, seeds: HashSet<String>, hops: usize) -> Result<HashMap<String, usize>> {
        let mut levels: HashMap<String, usize> = seeds.iter().map(|id| (id.clone(), 0)).collect();
        let mut frontier: Vec<String> = seeds.into_iter().collect();

        for level in 1..=hops {
            if frontier.is_empty() {
                break;
            }

            let query = Query::new(
                r#"
                MATCH (e:Entity)-[r:RELATION]-(neighbor:Entity)
                WHERE e.id IN $entity_ids
                RETURN DISTINCT neighbor.id as neighbor_id
                "#
                .to_string(),
            )
            .param("entity_ids", std::mem::take(&mut frontier));

            let mut result = self.graph.execute(query).await?;

            while let Some(row) = result.next().await? {
                if let Ok(neighbor_id) = row.get::<String>("neighbor_id") {
                    if !levels.contains_key(&neighbor_id) {
                        levels.insert(neighbor_id.clone(), level);
                        frontier.push(neighbor_id);
                    }
                }
            }
        }

        Ok(levels)
    }

    /// Edges touching `levels`, tagged with the hop at which they were reached.
    async fn get_relations(&self, levels: &HashMap<String, usize>, max_hops: usize) -> Result<Vec<(usize, Relationship)>> {
        let entity_list: Vec<String> = levels.keys().cloned().collect();
        let query = Query::new(
            r#"
            MATCH (source:Entity)-[r:RELATION]->(target:Entity)
            WHERE source.id IN $entity_ids OR target.id IN $entity_ids
            RETURN source.id AS source_id, source.name AS source,
                   target.id AS target_id, target.name AS target,
                   r.type AS relation, r.evidence AS evidence, r.confidence AS confidence
            "#
            .to_string(),
        )
        .param("entity_ids", entity_list);

        let mut result = self.graph.execute(query).await?;
        let mut facts = Vec::new();

        while let Some(row) = result.next().await? {
            let source_id: String = row.get("source_id")?;
            let target_id: String = row.get("target_id")?;
            let hop = match (levels.get(&source_id), levels.get(&target_id)) {
                (Some(a), Some(b)) => a.min(b) + 1,
                (Some(level), None) | (None, Some(level)) => level + 1,
                (None, None) => continue,
            };
            if hop > max_hops {
                continue;
            }

            facts.push((
                hop,
                Relationship {
                    entity1: row.get("source")?,
                    entity2: row.get("target")?,
                    relation_type: row.get("relation").unwrap_or_else(|_| "related_to".to_string()),
                    confidence: row.get::<f64>("confidence").ok().map(|c| c as f32),
                    evidence_chunk_id: row.get("evidence").unwrap_or_default(),
                },
            ));
        }

        Ok(facts)
    }

    async fn find_related_inner(&self, query: &GraphQuery, max_hops: usize) -> Result<Vec<Relationship>> {
        let seeds = match query {
            GraphQuery::EntityNames(names) => self.match_names(names).await?,
            GraphQuery::ChunkIds(chunk_ids) => self.match_chunks(chunk_ids).await?,
        };
        if seeds.is_empty() {
            debug!(?query, "No graph entities matched");
            return Ok(Vec::new());
        }

        let levels = self.expand_graph(seeds, max_hops - 1).await?;
        let mut facts = self.get_relations(&levels, max_hops).await?;

        order_facts(&mut facts);
        facts.dedup_by(|(_, a), (_, b)| a == b);
        facts.truncate(self.config.max_facts);
        Ok(facts.into_iter().map(|(_, r)| r).collect())
    }
}

/// Normalized lookup terms plus the content words used for `CONTAINS`
/// candidate matching. Stopwords and very short words never become
/// candidates on their own.
fn candidate_terms(names: &[String]) -> (Vec<String>, Vec<String>) {
    let mut terms: Vec<String> = Vec::new();
    let mut words: Vec<String> = Vec::new();
    for name in names {
        let term = normalize_name(name);
        if term.is_empty() {
            continue;
        }
        for word in content_words(&term) {
            if !words.contains(&word) {
                words.push(word);
            }
        }
        if !terms.contains(&term) {
            terms.push(term);
        }
    }
    (terms, words)
}

#[async_trait]
impl GraphStore for Neo4jGraphStore {
    async fn find_related(&self, query: &GraphQuery, max_hops: usize) -> IndexResult<Vec<Relationship>> {
        if query.is_empty() {
            return Ok(Vec::new());
        }
        self.find_related_inner(query, max_hops.max(1))
            .await
            .map_err(IndexError::store)
    }
}
