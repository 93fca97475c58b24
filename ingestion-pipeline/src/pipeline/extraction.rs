use common::{error::AppError, storage::types::knowledge_entity::DEFAULT_ENTITY_TYPE};
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::debug;

/// One entity record of an extraction response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExtractedEntity {
    pub name: String,
    pub description: String,
    pub entity_type: String,
    pub relations: Vec<ExtractedRelation>,
}

/// Outgoing relation of an [`ExtractedEntity`]; the source is the entity itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExtractedRelation {
    pub relation_type: String,
    pub target: String,
}

/// Shape of the `type` field as the model produced it.
enum RawEntityType<'a> {
    List(&'a [Value]),
    Text(&'a str),
    Missing,
    Other(&'a Value),
}

impl<'a> RawEntityType<'a> {
    fn classify(value: Option<&'a Value>) -> Self {
        match value {
            None | Some(Value::Null) => RawEntityType::Missing,
            Some(Value::Array(items)) => RawEntityType::List(items),
            Some(Value::String(text)) => RawEntityType::Text(text),
            Some(other) => RawEntityType::Other(other),
        }
    }

    fn resolve(self) -> String {
        match self {
            RawEntityType::List(items) => match items.first() {
                Some(Value::String(first)) => first.clone(),
                Some(first) => first.to_string(),
                None => DEFAULT_ENTITY_TYPE.to_string(),
            },
            RawEntityType::Text(text) => text.to_string(),
            RawEntityType::Missing => DEFAULT_ENTITY_TYPE.to_string(),
            RawEntityType::Other(value) => value.to_string(),
        }
    }
}

/// Parses the loosely structured extraction output into entity records.
///
/// Accepts a bare JSON array (optionally fenced in Markdown) or an object that
/// wraps the array under `entities` or `knowledge_entities`. Records without a
/// usable name are skipped; anything that is not JSON of one of those shapes
/// is an [`AppError::LLMParsing`].
pub fn parse_extraction_response(raw: &str) -> Result<Vec<ExtractedEntity>, AppError> {
    let body = strip_code_fences(raw);
    let value: Value = serde_json::from_str(body).map_err(|err| {
        AppError::LLMParsing(format!("extraction response is not valid JSON: {err}"))
    })?;

    let records = match &value {
        Value::Array(items) => items,
        Value::Object(map) => ["entities", "knowledge_entities"]
            .iter()
            .find_map(|key| map.get(*key).and_then(Value::as_array))
            .ok_or_else(|| {
                AppError::LLMParsing(
                    "extraction response object has no entities array".to_string(),
                )
            })?,
        _ => {
            return Err(AppError::LLMParsing(
                "extraction response must be a JSON array of entities".to_string(),
            ))
        }
    };

    let mut entities = Vec::with_capacity(records.len());
    for (idx, record) in records.iter().enumerate() {
        match record.as_object().and_then(parse_entity) {
            Some(entity) => entities.push(entity),
            None => debug!(index = idx, "skipping extraction record without a name"),
        }
    }

    Ok(entities)
}

fn parse_entity(record: &Map<String, Value>) -> Option<ExtractedEntity> {
    let name = record.get("name")?.as_str()?.trim();
    if name.is_empty() {
        return None;
    }

    let description = first_field(record, &["desc", "description"])
        .and_then(Value::as_str)
        .unwrap_or_default()
        .trim()
        .to_string();

    let entity_type =
        RawEntityType::classify(first_field(record, &["type", "entity_type"])).resolve();

    let relations = match record.get("relations") {
        Some(Value::Array(items)) => items.iter().filter_map(parse_relation).collect(),
        _ => Vec::new(),
    };

    Some(ExtractedEntity {
        name: name.to_string(),
        description,
        entity_type,
        relations,
    })
}

fn parse_relation(value: &Value) -> Option<ExtractedRelation> {
    let relation = value.as_object()?;
    let relation_type = relation.get("type")?.as_str()?.trim();
    let target = relation.get("target")?.as_str()?.trim();
    if relation_type.is_empty() || target.is_empty() {
        return None;
    }

    Some(ExtractedRelation {
        relation_type: relation_type.to_string(),
        target: target.to_string(),
    })
}

fn first_field<'a>(record: &'a Map<String, Value>, keys: &[&str]) -> Option<&'a Value> {
    keys.iter().find_map(|key| record.get(*key))
}

fn strip_code_fences(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // Drop the info string (```json) together with the opening fence
    let rest = match rest.split_once('\n') {
        Some((_, body)) => body,
        None => rest.trim_start_matches(|c: char| c.is_ascii_alphanumeric()),
    };
    rest.trim_end().strip_suffix("```").unwrap_or(rest).trim()
}
