//! Interpretation of recovered JSON into proposed entities and relationships.
//!
//! Three shapes are accepted: an array of relationship triples, an array of
//! bare entities, or an object with `entities` and `relations` /
//! `relationships` arrays whose endpoints reference entities by id or name.

use serde_json::{Map, Value};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProposedEntity {
    pub id: Option<String>,
    pub name: String,
    pub label: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProposedEndpoint {
    pub reference: String,
    pub label: Option<String>,
    /// The endpoint is itself an entity declaration rather than a reference
    /// into the entity list.
    pub declares_entity: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProposedRelationship {
    pub source: ProposedEndpoint,
    pub target: ProposedEndpoint,
    pub relation: String,
    pub confidence: Option<f32>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProposedExtraction {
    pub entities: Vec<ProposedEntity>,
    pub relationships: Vec<ProposedRelationship>,
}

const SOURCE_KEYS: &[&str] = &["entity1", "source", "head", "subject", "from"];
const TARGET_KEYS: &[&str] = &["entity2", "target", "tail", "object", "to"];
const RELATION_KEYS: &[&str] = &["relationship", "relation", "relation_type", "predicate", "type"];
const NAME_KEYS: &[&str] = &["name", "entity", "text", "id"];
const LABEL_KEYS: &[&str] = &["type", "entity_type", "label", "category"];

pub fn interpret(value: &Value) -> Result<ProposedExtraction, String> {
    match value {
        Value::Array(items) => Ok(interpret_items(items)),
        Value::Object(map) => interpret_object(map),
        other => Err(format!("expected a JSON array or object, got {}", kind(other))),
    }
}

fn interpret_object(map: &Map<String, Value>) -> Result<ProposedExtraction, String> {
    let entities = map.get("entities").and_then(Value::as_array);
    let relations = ["relationships", "relations", "edges"]
        .iter()
        .find_map(|key| map.get(*key).and_then(Value::as_array));

    if entities.is_none() && relations.is_none() {
        // A single triple or entity returned without the surrounding array
        if is_triple(map) || lookup_str(map, NAME_KEYS).is_some() {
            return Ok(interpret_items(std::slice::from_ref(&Value::Object(map.clone()))));
        }
        return Err("object has neither entities nor relationships".to_string());
    }

    let mut proposed = ProposedExtraction::default();
    for item in entities.into_iter().flatten() {
        if let Some(entity) = item.as_object().and_then(entity_from) {
            proposed.entities.push(entity);
        }
    }
    for item in relations.into_iter().flatten() {
        if let Some(relationship) = item.as_object().and_then(|m| relationship_from(m, false)) {
            proposed.relationships.push(relationship);
        }
    }
    Ok(proposed)
}

fn interpret_items(items: &[Value]) -> ProposedExtraction {
    let mut proposed = ProposedExtraction::default();
    for item in items {
        let Some(map) = item.as_object() else {
            continue;
        };
        if is_triple(map) {
            if let Some(relationship) = relationship_from(map, true) {
                proposed.relationships.push(relationship);
            }
        } else if let Some(entity) = entity_from(map) {
            proposed.entities.push(entity);
        }
    }
    proposed
}

fn is_triple(map: &Map<String, Value>) -> bool {
    SOURCE_KEYS.iter().any(|k| map.contains_key(*k)) && TARGET_KEYS.iter().any(|k| map.contains_key(*k))
}

fn entity_from(map: &Map<String, Value>) -> Option<ProposedEntity> {
    let name = ["name", "entity", "text"]
        .iter()
        .find_map(|k| map.get(*k).and_then(Value::as_str))?;
    Some(ProposedEntity {
        id: map.get("id").and_then(scalar_string),
        name: name.to_string(),
        label: lookup_str(map, LABEL_KEYS),
    })
}

fn relationship_from(map: &Map<String, Value>, endpoints_declare: bool) -> Option<ProposedRelationship> {
    let source = endpoint_from(SOURCE_KEYS.iter().find_map(|k| map.get(*k))?, endpoints_declare)?;
    let target = endpoint_from(TARGET_KEYS.iter().find_map(|k| map.get(*k))?, endpoints_declare)?;
    let relation = lookup_str(map, RELATION_KEYS).unwrap_or_default();
    let confidence = ["confidence", "score", "weight"]
        .iter()
        .find_map(|k| map.get(*k).and_then(Value::as_f64))
        .map(|c| c as f32)
        .filter(|c| c.is_finite())
        .map(|c| c.clamp(0.0, 1.0));

    Some(ProposedRelationship {
        source,
        target,
        relation,
        confidence,
    })
}

fn endpoint_from(value: &Value, declares_entity: bool) -> Option<ProposedEndpoint> {
    match value {
        Value::Object(map) => Some(ProposedEndpoint {
            reference: lookup_str(map, NAME_KEYS)?,
            label: lookup_str(map, LABEL_KEYS),
            declares_entity: true,
        }),
        other => Some(ProposedEndpoint {
            reference: scalar_string(other)?,
            label: None,
            declares_entity,
        }),
    }
}

fn lookup_str(map: &Map<String, Value>, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|k| map.get(*k).and_then(Value::as_str)).map(str::to_string)
}

fn scalar_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
