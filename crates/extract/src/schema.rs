use serde::{Deserialize, Serialize};
use std::fmt;

use crate::recovery::RecoveryLayer;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum EntityType {
    Person,
    Organization,
    Location,
    Concept,
    Technology,
    Event,
    Other,
}

impl EntityType {
    /// Map whatever label the LLM produced onto the known vocabulary.
    pub fn parse_lenient(label: &str) -> Self {
        let label = label.trim().to_ascii_uppercase().replace([' ', '-'], "_");
        match label.as_str() {
            "PERSON" | "PEOPLE" | "HUMAN" | "INDIVIDUAL" | "PER" => Self::Person,
            "ORGANIZATION" | "ORGANISATION" | "ORG" | "COMPANY" | "INSTITUTION" | "AGENCY" => {
                Self::Organization
            }
            "LOCATION" | "LOC" | "PLACE" | "GPE" | "COUNTRY" | "CITY" | "REGION" => Self::Location,
            "CONCEPT" | "IDEA" | "TOPIC" | "POLICY" | "THEORY" => Self::Concept,
            "TECHNOLOGY" | "TECH" | "PRODUCT" | "TOOL" | "SOFTWARE" => Self::Technology,
            "EVENT" => Self::Event,
            _ => Self::Other,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Person => "PERSON",
            Self::Organization => "ORGANIZATION",
            Self::Location => "LOCATION",
            Self::Concept => "CONCEPT",
            Self::Technology => "TECHNOLOGY",
            Self::Event => "EVENT",
            Self::Other => "OTHER",
        }
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    pub name: String,
    #[serde(rename = "type")]
    pub entity_type: EntityType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub canonical_id: Option<String>,
}

impl Entity {
    pub fn new(name: impl Into<String>, entity_type: EntityType) -> Self {
        Self {
            name: name.into(),
            entity_type,
            canonical_id: None,
        }
    }
}

/// An edge between two entities, referenced by display name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Relationship {
    pub entity1: String,
    pub entity2: String,
    pub relation_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f32>,
    pub evidence_chunk_id: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExtractionStatus {
    Succeeded,
    Failed,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExtractionDebug {
    pub attempts: u32,
    pub cache_hit: bool,
    pub errors: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recovery: Option<RecoveryLayer>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractionResult {
    pub entities: Vec<Entity>,
    pub relationships: Vec<Relationship>,
    pub status: ExtractionStatus,
    pub debug: ExtractionDebug,
}

impl ExtractionResult {
    /// Empty-but-valid result for an extraction that exhausted its retries.
    pub fn failed(debug: ExtractionDebug) -> Self {
        Self {
            entities: Vec::new(),
            relationships: Vec::new(),
            status: ExtractionStatus::Failed,
            debug,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == ExtractionStatus::Succeeded
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty() && self.relationships.is_empty()
    }

    /// Point every relationship at the chunk this result is reported for.
    pub fn with_evidence(mut self, chunk_id: &str) -> Self {
        for relationship in &mut self.relationships {
            relationship.evidence_chunk_id = chunk_id.to_string();
        }
        self
    }
}
