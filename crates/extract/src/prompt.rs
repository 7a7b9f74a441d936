use crate::schema::Schema;

pub fn build_extraction_prompt(schema: &Schema, chunk_text: &str, examples: Option<&str>) -> String {
    let schema_json = serde_json::to_string_pretty(&schema.to_definition())
        .unwrap_or_else(|_| "{}".to_string());

    let examples = match examples {
        Some(examples) if !examples.trim().is_empty() => {
            format!("\nEXAMPLES:\n{}\n", examples.trim())
        }
        _ => String::new(),
    };

    format!(
        r#"You are a top-tier algorithm designed for extracting information in structured formats to build a knowledge graph.
Extract the entities (nodes) and specify their type from the following text.
Also extract the relationships between these nodes.

INSTRUCTIONS:
1. Only use node labels listed under "entities" in the schema
2. Only use relationship types listed under "relations" in the schema
3. A relationship is only allowed if [start label, type, end label] appears under "triples"
4. Output ONLY valid JSON, nothing else

SCHEMA:
{schema_json}

OUTPUT FORMAT:
{{
  "nodes": [
    {{"id": "0", "label": "EntityLabel", "properties": {{"name": "entity name"}}}}
  ],
  "relationships": [
    {{"type": "RELATION_TYPE", "start_node_id": "0", "end_node_id": "1", "properties": {{"details": "description of the relationship"}}}}
  ]
}}

RULES:
- Assign a unique ID (string) to each node, and reuse it to define relationships
- Every relationship must reference node IDs defined in "nodes"
- Do not return any additional information other than the JSON
- Output ONLY the JSON object, no markdown, no explanations
{examples}
TEXT:
{chunk_text}

JSON OUTPUT:"#
    )
}

pub fn build_retry_prompt(invalid_json: &str) -> String {
    format!(
        r#"The following JSON is invalid:

{}

Fix this JSON. Output only valid JSON with no markdown formatting, no code blocks, no explanations. Just the raw JSON object."#,
        invalid_json
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prompt_embeds_schema_and_text() {
        let schema = Schema::learning_default().unwrap();
        let prompt = build_extraction_prompt(&schema, "Ferris is a crab.", Some("text: ... output: ..."));

        assert!(prompt.contains("PREREQUISITE_OF"));
        assert!(prompt.contains("Ferris is a crab."));
        assert!(prompt.contains("EXAMPLES:"));
    }

    #[test]
    fn test_prompt_without_examples() {
        let schema = Schema::learning_default().unwrap();
        let prompt = build_extraction_prompt(&schema, "text", Some("   "));
        assert!(!prompt.contains("EXAMPLES:"));
    }
}
