pub fn build_extraction_prompt(chunk_text: &str) -> String {
    format!(
        r#"Extract entities and relationships from the following text.

INSTRUCTIONS:
1. Identify key entities (people, organizations, concepts, technologies, locations, events)
2. Extract relationships between pairs of those entities
3. Output ONLY a valid JSON array, nothing else
4. Use the exact schema below

SCHEMA:
[
  {{
    "entity1": {{"name": "EntityName", "type": "PERSON|ORGANIZATION|LOCATION|CONCEPT|TECHNOLOGY|EVENT"}},
    "entity2": {{"name": "EntityName", "type": "PERSON|ORGANIZATION|LOCATION|CONCEPT|TECHNOLOGY|EVENT"}},
    "relationship": "relationship_type",
    "confidence": 0.0
  }}
]

RULES:
- Entity types must be one of: PERSON, ORGANIZATION, LOCATION, CONCEPT, TECHNOLOGY, EVENT
- Relationship types are short snake_case verbs: "works_with", "uses", "affects", "manages", "contains", etc.
- Confidence is a number between 0 and 1
- An entity with no relationship may be listed on its own as {{"name": "EntityName", "type": "..."}}
- If the text mentions no entities, output []
- Output ONLY the JSON array, no markdown, no explanations

TEXT:
{}

JSON OUTPUT:"#,
        chunk_text
    )
}
