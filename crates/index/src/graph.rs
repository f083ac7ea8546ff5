use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::RwLock;

use async_trait::async_trait;
use extract::{EntityType, ExtractionResult, Relationship, name_similarity, normalize_name};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{IndexError, IndexResult};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GraphSearchConfig {
    /// Minimum fuzzy similarity for a query term to match a graph entity.
    pub entity_threshold: f32,
    /// Minimum vector similarity for a retrieved chunk to seed graph lookup.
    pub chunk_threshold: f32,
    pub max_hops: usize,
    pub max_facts: usize,
}

impl Default for GraphSearchConfig {
    fn default() -> Self {
        Self {
            entity_threshold: 0.85,
            chunk_threshold: 0.5,
            max_hops: 1,
            max_facts: 50,
        }
    }
}

/// Where a graph lookup starts from.
#[derive(Debug, Clone, PartialEq)]
pub enum GraphQuery {
    /// Free-form names, fuzzily matched against entity names.
    EntityNames(Vec<String>),
    /// Entities cited by relationships whose evidence is one of these chunks.
    ChunkIds(Vec<String>),
}

impl GraphQuery {
    pub fn is_empty(&self) -> bool {
        match self {
            GraphQuery::EntityNames(v) | GraphQuery::ChunkIds(v) => v.is_empty(),
        }
    }
}

/// A persisted entity/relationship graph.
#[async_trait]
pub trait GraphStore: Send + Sync {
    /// Relationships within `max_hops` of the matched entities. No match is
    /// an empty result, not an error. `max_hops` below 1 is treated as 1.
    async fn find_related(&self, query: &GraphQuery, max_hops: usize) -> IndexResult<Vec<Relationship>>;
}

/// Closest hop first, then by `(entity1, relation_type, entity2)`.
pub(crate) fn order_facts(facts: &mut [(usize, Relationship)]) {
    facts.sort_by(|(hop_a, a), (hop_b, b)| {
        hop_a
            .cmp(hop_b)
            .then_with(|| a.entity1.cmp(&b.entity1))
            .then_with(|| a.relation_type.cmp(&b.relation_type))
            .then_with(|| a.entity2.cmp(&b.entity2))
    });
}

#[derive(Debug, Clone)]
struct EntityNode {
    name: String,
    entity_type: EntityType,
}

#[derive(Default)]
struct GraphData {
    /// Keyed by normalized name
    entities: BTreeMap<String, EntityNode>,
    relationships: Vec<Relationship>,
}

/// Graph held in process memory.
pub struct InMemoryGraphStore {
    data: RwLock<GraphData>,
    config: GraphSearchConfig,
}

impl InMemoryGraphStore {
    pub fn new(config: GraphSearchConfig) -> Self {
        Self {
            data: RwLock::new(GraphData::default()),
            config,
        }
    }

    /// Commit an extraction's entities and relationships.
    pub fn insert_extraction(&self, extraction: &ExtractionResult) {
        let mut data = self.data.write().unwrap_or_else(|e| e.into_inner());
        for entity in &extraction.entities {
            data.entities
                .entry(normalize_name(&entity.name))
                .or_insert_with(|| EntityNode {
                    name: entity.name.clone(),
                    entity_type: entity.entity_type,
                });
        }
        for relationship in &extraction.relationships {
            for endpoint in [&relationship.entity1, &relationship.entity2] {
                data.entities
                    .entry(normalize_name(endpoint))
                    .or_insert_with(|| EntityNode {
                        name: endpoint.clone(),
                        entity_type: EntityType::Other,
                    });
            }
            let exists = data.relationships.iter().any(|r| {
                r.entity1 == relationship.entity1
                    && r.entity2 == relationship.entity2
                    && r.relation_type == relationship.relation_type
                    && r.evidence_chunk_id == relationship.evidence_chunk_id
            });
            if !exists {
                data.relationships.push(relationship.clone());
            }
        }
    }

    pub fn entity_count(&self) -> usize {
        self.data.read().unwrap_or_else(|e| e.into_inner()).entities.len()
    }

    pub fn relationship_count(&self) -> usize {
        self.data.read().unwrap_or_else(|e| e.into_inner()).relationships.len()
    }

    pub fn entity_type(&self, name: &str) -> Option<EntityType> {
        let data = self.data.read().unwrap_or_else(|e| e.into_inner());
        data.entities.get(&normalize_name(name)).map(|n| n.entity_type)
    }

    fn seeds(&self, data: &GraphData, query: &GraphQuery) -> BTreeSet<String> {
        match query {
            GraphQuery::EntityNames(names) => {
                let mut seeds = BTreeSet::new();
                for term in names {
                    for (key, node) in &data.entities {
                        let score = name_similarity(term, &node.name);
                        if score >= self.config.entity_threshold {
                            debug!(term = %term, entity = %node.name, score, "Graph entity match");
                            seeds.insert(key.clone());
                        }
                    }
                }
                seeds
            }
            GraphQuery::ChunkIds(chunk_ids) => data
                .relationships
                .iter()
                .filter(|r| chunk_ids.contains(&r.evidence_chunk_id))
                .flat_map(|r| [normalize_name(&r.entity1), normalize_name(&r.entity2)])
                .collect(),
        }
    }
}

#[async_trait]
impl GraphStore for InMemoryGraphStore {
    async fn find_related(&self, query: &GraphQuery, max_hops: usize) -> IndexResult<Vec<Relationship>> {
        if query.is_empty() {
            return Ok(Vec::new());
        }
        let data = self
            .data
            .read()
            .map_err(|_| IndexError::StoreUnavailable("graph lock poisoned".into()))?;

        let seeds = self.seeds(&data, query);
        if seeds.is_empty() {
            debug!(?query, "No graph entities matched");
            return Ok(Vec::new());
        }

        let mut visited: HashSet<String> = seeds.iter().cloned().collect();
        let mut frontier = seeds;
        let mut taken: HashSet<usize> = HashSet::new();
        let mut facts: Vec<(usize, Relationship)> = Vec::new();

        for hop in 1..=max_hops.max(1) {
            let mut next = BTreeSet::new();
            for (index, relationship) in data.relationships.iter().enumerate() {
                if taken.contains(&index) {
                    continue;
                }
                let a = normalize_name(&relationship.entity1);
                let b = normalize_name(&relationship.entity2);
                if !frontier.contains(&a) && !frontier.contains(&b) {
                    continue;
                }
                taken.insert(index);
                facts.push((hop, relationship.clone()));
                for endpoint in [a, b] {
                    if visited.insert(endpoint.clone()) {
                        next.insert(endpoint);
                    }
                }
            }
            if next.is_empty() {
                break;
            }
            frontier = next;
        }

        order_facts(&mut facts);
        facts.truncate(self.config.max_facts);
        Ok(facts.into_iter().map(|(_, r)| r).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use extract::{Entity, ExtractionDebug, ExtractionStatus};

    fn relationship(a: &str, b: &str, relation: &str, chunk: &str) -> Relationship {
        Relationship {
            entity1: a.into(),
            entity2: b.into(),
            relation_type: relation.into(),
            confidence: None,
            evidence_chunk_id: chunk.into(),
        }
    }

    fn store(config: GraphSearchConfig) -> InMemoryGraphStore {
        let store = InMemoryGraphStore::new(config);
        store.insert_extraction(&ExtractionResult {
            entities: vec![
                Entity::new("Alice", EntityType::Person),
                Entity::new("Bob", EntityType::Person),
            ],
            relationships: vec![
                relationship("Alice", "Bob", "works_with", "c1"),
                relationship("Bob", "Acme Corp", "employed_by", "c2"),
                relationship("Acme Corp", "Berlin", "located_in", "c3"),
            ],
            status: ExtractionStatus::Succeeded,
            debug: ExtractionDebug::default(),
        });
        store
    }

    fn triples(facts: &[Relationship]) -> Vec<(&str, &str, &str)> {
        facts
            .iter()
            .map(|r| (r.entity1.as_str(), r.relation_type.as_str(), r.entity2.as_str()))
            .collect()
    }

    #[tokio::test]
    async fn test_one_hop_from_fuzzy_name() {
        let store = store(GraphSearchConfig::default());

        let facts = store
            .find_related(&GraphQuery::EntityNames(vec!["alice.".into()]), 1)
            .await
            .unwrap();

        assert_eq!(triples(&facts), vec![("Alice", "works_with", "Bob")]);
        assert_eq!(store.entity_type("Acme Corp"), Some(EntityType::Other));
    }

    #[tokio::test]
    async fn test_hops_expand_outward_in_order() {
        let store = store(GraphSearchConfig::default());

        let facts = store
            .find_related(&GraphQuery::EntityNames(vec!["Alice".into()]), 3)
            .await
            .unwrap();

        assert_eq!(
            triples(&facts),
            vec![
                ("Alice", "works_with", "Bob"),
                ("Bob", "employed_by", "Acme Corp"),
                ("Acme Corp", "located_in", "Berlin"),
            ]
        );
    }

    #[tokio::test]
    async fn test_below_threshold_is_empty_not_error() {
        let store = store(GraphSearchConfig::default());

        let facts = store
            .find_related(&GraphQuery::EntityNames(vec!["climate policy".into()]), 2)
            .await
            .unwrap();

        assert!(facts.is_empty());
    }

    #[tokio::test]
    async fn test_threshold_is_tunable() {
        let strict = store(GraphSearchConfig::default());
        let loose = store(GraphSearchConfig {
            entity_threshold: 0.5,
            ..GraphSearchConfig::default()
        });
        let query = GraphQuery::EntityNames(vec!["Acme".into()]);

        assert!(strict.find_related(&query, 1).await.unwrap().is_empty());
        assert_eq!(loose.find_related(&query, 1).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_chunk_seeds_and_zero_hops() {
        let store = store(GraphSearchConfig::default());

        let facts = store
            .find_related(&GraphQuery::ChunkIds(vec!["c3".into()]), 0)
            .await
            .unwrap();

        assert_eq!(
            triples(&facts),
            vec![
                ("Acme Corp", "located_in", "Berlin"),
                ("Bob", "employed_by", "Acme Corp"),
            ]
        );
    }

    #[tokio::test]
    async fn test_max_facts_caps_output() {
        let store = store(GraphSearchConfig {
            max_facts: 1,
            ..GraphSearchConfig::default()
        });

        let facts = store
            .find_related(&GraphQuery::EntityNames(vec!["Bob".into()]), 2)
            .await
            .unwrap();

        assert_eq!(triples(&facts), vec![("Alice", "works_with", "Bob")]);
    }
}
