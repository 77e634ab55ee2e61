//! Prompt templates for the three-phase ontology generation pipeline (§4.4).

use nlsql_core::{Message, SchemaSnapshot};

const SYSTEM_PREAMBLE: &str = "You are a database analyst. You only describe the schema you are given. \
Never invent a table or column name that is not listed below. Respond with JSON only, no prose, no \
markdown code fences.";

fn schema_listing(schema: &SchemaSnapshot) -> String {
    let mut out = String::new();
    for table in &schema.tables {
        out.push_str(&format!("- {}(", table.table_name));
        let cols: Vec<String> = table
            .columns
            .iter()
            .map(|c| format!("{} {}", c.name, c.data_type))
            .collect();
        out.push_str(&cols.join(", "));
        out.push_str(")\n");
        for fk in &table.foreign_keys {
            out.push_str(&format!(
                "  fk: {}.{} -> {}.{}\n",
                table.table_name, fk.column, fk.ref_table, fk.ref_column
            ));
        }
    }
    out
}

/// Phase 1: concept extraction. Response must be a JSON array matching
/// `Concept` field-for-field: `name`, `description`, `tables`, `synonyms`.
pub fn concept_extraction_messages(schema: &SchemaSnapshot, max_concepts: usize) -> Vec<Message> {
    vec![
        Message::system(SYSTEM_PREAMBLE),
        Message::user(format!(
            "Tables:\n{}\n\
            Identify at most {max_concepts} business concepts (domain nouns) this schema represents. \
            Every table in `tables` must be one of the table names above. \
            Respond with a JSON array of objects: \
            {{\"name\": string, \"description\": string, \"tables\": [string], \"synonyms\": [string]}}.",
            schema_listing(schema)
        )),
    ]
}

/// Phase 2: property mapping. Response must be a JSON array matching
/// `Property` field-for-field: `concept`, `property_name`, `table`,
/// `column`, `semantic_meaning`, `confidence`.
pub fn property_mapping_messages(schema: &SchemaSnapshot, concepts_json: &str) -> Vec<Message> {
    vec![
        Message::system(SYSTEM_PREAMBLE),
        Message::user(format!(
            "Tables:\n{}\nConcepts:\n{concepts_json}\n\
            For each concept, map its meaningful columns to a compound, lowercase `property_name` \
            (e.g. \"vendorname\" for a vendor's name column). Every `table` and `column` pair must \
            exist in the tables listed above, and every `concept` must be one of the concept names \
            above. Respond with a JSON array of objects: \
            {{\"concept\": string, \"property_name\": string, \"table\": string, \"column\": string, \
            \"semantic_meaning\": string, \"confidence\": number between 0 and 1}}.",
            schema_listing(schema)
        )),
    ]
}

/// Phase 3: relationship extraction. Response must be a JSON array matching
/// `Relationship` field-for-field: `from_concept`, `to_concept`,
/// `type` (one of `References`, `BelongsTo`, `HasMany`, `AssociatedWith`),
/// `via_table`, `confidence`.
pub fn relationship_extraction_messages(schema: &SchemaSnapshot, concepts_json: &str) -> Vec<Message> {
    vec![
        Message::system(SYSTEM_PREAMBLE),
        Message::user(format!(
            "Tables:\n{}\nConcepts:\n{concepts_json}\n\
            Using the foreign keys above, describe how these concepts relate to each other. \
            `from_concept` and `to_concept` must each be one of the concept names above, and \
            `via_table`, if present, must be one of the table names above. Respond with a JSON \
            array of objects: {{\"from_concept\": string, \"to_concept\": string, \
            \"type\": \"References\" | \"BelongsTo\" | \"HasMany\" | \"AssociatedWith\", \
            \"via_table\": string | null, \"confidence\": number between 0 and 1}}.",
            schema_listing(schema)
        )),
    ]
}
