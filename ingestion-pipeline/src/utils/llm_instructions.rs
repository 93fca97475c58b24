pub static EXTRACTION_SYSTEM_MESSAGE: &str = r#"You extract a knowledge graph from text.
Return a JSON array and nothing else. Each element describes one entity:
{"name": string, "desc": string, "type": string, "relations": [{"type": string, "target": string}]}
- "name" is the entity's canonical name as written in the text.
- "desc" is a short description based only on the text.
- "type" is a short category such as Person, Organization, Place, Concept or Event.
- "relations" lists directed relations from this entity to other entities named in the text; "type" is an UPPER_SNAKE_CASE label and "target" is the other entity's name.
Do not wrap the array in an object and do not add commentary."#;

/// Builds the user turn for one chunk.
pub fn extraction_user_message(chunk_text: &str, language_hint: Option<&str>) -> String {
    let language = match language_hint {
        Some(language) if !language.trim().is_empty() => {
            format!("Write names, descriptions and relation labels in {}.", language.trim())
        }
        _ => "Write names and descriptions in the language of the text.".to_string(),
    };

    format!("{language}\nText:\n{chunk_text}")
}
