//! `OntologyStore`: static/dynamic ontology lifecycle and natural-language
//! resolution (§3, §4.4). Generation is LLM-driven; resolution is pure and
//! synchronous so the state machine can call it on every turn without an
//! LLM round trip.

use crate::error::OntologyError;
use crate::persistence;
use crate::prompts;
use nlsql_core::traits::CompletionParams;
use nlsql_core::{ColumnHint, Concept, LlmProvider, Ontology, Relationship, ResolutionResult, SchemaSnapshot};
use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Concept count the dynamic generator is capped at unless the caller
/// overrides it via [`OntologyStore::with_max_concepts`].
pub const DEFAULT_MAX_CONCEPTS: usize = 20;

pub struct OntologyStore {
    llm: Arc<dyn LlmProvider>,
    max_concepts: usize,
    cache: RwLock<std::collections::HashMap<String, Ontology>>,
}

impl OntologyStore {
    pub fn new(llm: Arc<dyn LlmProvider>) -> Self {
        Self {
            llm,
            max_concepts: DEFAULT_MAX_CONCEPTS,
            cache: RwLock::new(std::collections::HashMap::new()),
        }
    }

    pub fn with_max_concepts(mut self, max_concepts: usize) -> Self {
        self.max_concepts = max_concepts;
        self
    }

    /// Loads a statically authored ontology from disk and seeds the cache
    /// for `connection_id` with it, bypassing LLM generation entirely (§4.4).
    pub async fn load_static(&self, connection_id: &str, path: &Path) -> Result<Ontology, OntologyError> {
        let ontology = persistence::load_yaml(path)?;
        self.cache.write().await.insert(connection_id.to_string(), ontology.clone());
        Ok(ontology)
    }

    /// Returns the cached ontology for `connection_id` if its fingerprint
    /// still matches `schema`, otherwise regenerates it via the three-phase
    /// LLM pipeline and caches the result (§4.4).
    pub async fn get_or_generate(
        &self,
        connection_id: &str,
        schema: &SchemaSnapshot,
    ) -> Result<Ontology, OntologyError> {
        let fingerprint = schema.fingerprint();
        {
            let cache = self.cache.read().await;
            if let Some(existing) = cache.get(connection_id) {
                if existing.schema_fingerprint == fingerprint {
                    return Ok(existing.clone());
                }
            }
        }

        log::info!("regenerating ontology for connection {connection_id}: schema fingerprint changed");
        let ontology = self.generate(schema).await?;
        self.cache.write().await.insert(connection_id.to_string(), ontology.clone());
        Ok(ontology)
    }

    pub async fn persist(&self, ontology: &Ontology, database: &str, host: &str, port: u16, dir: &Path) -> Result<(), OntologyError> {
        let stem = persistence::filename_stem(database, host, port, ontology.generated_at);
        persistence::save_yaml(ontology, &dir.join(format!("{stem}.yml")))?;
        persistence::save_owl(ontology, &dir.join(format!("{stem}.owl")))?;
        Ok(())
    }

    /// Three-phase LLM pipeline: concept extraction, then property mapping,
    /// then relationship extraction, each constrained to the tables and
    /// columns actually present in `schema` (§4.4). Anything the model
    /// invents outside that boundary is discarded rather than surfaced.
    async fn generate(&self, schema: &SchemaSnapshot) -> Result<Ontology, OntologyError> {
        let params = CompletionParams { max_tokens: 2048, ..Default::default() };

        let phase1 = prompts::concept_extraction_messages(schema, self.max_concepts);
        let raw_concepts = self
            .llm
            .complete_json(&phase1, &params, "a JSON array of Concept objects")
            .await?;
        let mut concepts: Vec<Concept> = serde_json::from_value(raw_concepts)
            .map_err(|e| OntologyError::MalformedResponse(format!("concept extraction: {e}")))?;

        concepts.retain_mut(|concept| {
            concept.tables.retain(|t| schema_has_table(schema, t));
            !concept.tables.is_empty()
        });
        if concepts.len() > self.max_concepts {
            log::warn!(
                "dropping {} generated concepts beyond the cap of {}",
                concepts.len() - self.max_concepts,
                self.max_concepts
            );
            concepts.truncate(self.max_concepts);
        }
        let concept_names: HashSet<String> = concepts.iter().map(|c| c.name.clone()).collect();

        let concepts_json = serde_json::to_string(&concepts)?;

        let phase2 = prompts::property_mapping_messages(schema, &concepts_json);
        let raw_properties = self
            .llm
            .complete_json(&phase2, &params, "a JSON array of Property objects")
            .await?;
        let mut properties: Vec<_> = serde_json::from_value(raw_properties)
            .map_err(|e| OntologyError::MalformedResponse(format!("property mapping: {e}")))?;
        properties.retain(|p: &nlsql_core::Property| {
            concept_names.contains(&p.concept) && schema_has_column(schema, &p.table, &p.column)
        });

        let phase3 = prompts::relationship_extraction_messages(schema, &concepts_json);
        let raw_relationships = self
            .llm
            .complete_json(&phase3, &params, "a JSON array of Relationship objects")
            .await?;
        let mut relationships: Vec<Relationship> = serde_json::from_value(raw_relationships)
            .map_err(|e| OntologyError::MalformedResponse(format!("relationship extraction: {e}")))?;
        relationships.retain(|r| {
            concept_names.contains(&r.from_concept)
                && concept_names.contains(&r.to_concept)
                && r.via_table
                    .as_ref()
                    .map(|t| schema_has_table(schema, t))
                    .unwrap_or(true)
        });

        Ok(Ontology {
            concepts,
            properties,
            relationships,
            generated_at: chrono::Utc::now(),
            schema_fingerprint: schema.fingerprint(),
        })
    }

    /// Scores how well `question` matches `ontology`'s concepts and
    /// properties (§4.4): a property matches if the question contains its
    /// full `property_name`, its `property_name` contains the whole
    /// question, any question word longer than three characters is a
    /// substring of it, or a synonym of its owning concept appears in the
    /// question. Every resulting hint names a `(table, column)` that still
    /// exists in `schema`.
    pub fn resolve(ontology: &Ontology, question: &str, schema: &SchemaSnapshot) -> ResolutionResult {
        let question_lower = question.to_lowercase();
        let words: Vec<&str> = question_lower.split_whitespace().collect();

        let mut concept_matched = false;
        for concept in &ontology.concepts {
            let name_hit = question_lower.contains(&concept.name.to_lowercase());
            let synonym_hit = concept
                .synonyms
                .iter()
                .any(|s| question_lower.contains(&s.to_lowercase()));
            if name_hit || synonym_hit {
                concept_matched = true;
                break;
            }
        }

        let mut hints = Vec::new();
        let mut property_matched = false;
        let mut matched_confidences = Vec::new();

        for property in &ontology.properties {
            let property_lower = property.property_name.to_lowercase();

            let question_contains_property = question_lower.contains(&property_lower);
            let property_contains_question =
                !question_lower.is_empty() && property_lower.contains(&question_lower);
            let question_word_in_property = words.iter().any(|w| w.len() > 3 && property_lower.contains(w));
            let synonym_extends_match = ontology
                .concept(&property.concept)
                .map(|c| c.synonyms.iter().any(|s| question_lower.contains(&s.to_lowercase())))
                .unwrap_or(false);

            let matched = question_contains_property
                || property_contains_question
                || question_word_in_property
                || synonym_extends_match;

            if !matched {
                continue;
            }
            if !schema_has_column(schema, &property.table, &property.column) {
                continue;
            }

            property_matched = true;
            matched_confidences.push(property.confidence);
            hints.push(ColumnHint {
                table: property.table.clone(),
                column: property.column.clone(),
                concept: property.concept.clone(),
                property: property.property_name.clone(),
                confidence: property.confidence,
            });
        }

        let mean_property_confidence = if matched_confidences.is_empty() {
            0.0
        } else {
            matched_confidences.iter().sum::<f32>() / matched_confidences.len() as f32
        };

        let mut confidence = 0.5;
        if concept_matched {
            confidence += 0.2;
        }
        if property_matched {
            confidence += 0.15;
        }
        confidence += 0.15 * mean_property_confidence;
        let confidence = confidence.clamp(0.0, 0.99);

        let reasoning = if hints.is_empty() {
            "no concept or property names from the ontology appeared in the question".to_string()
        } else {
            format!(
                "matched {} column hint(s) via concept/property name overlap with the question",
                hints.len()
            )
        };

        ResolutionResult { hints, reasoning, confidence }
    }
}

fn schema_has_table(schema: &SchemaSnapshot, table: &str) -> bool {
    schema.tables.iter().any(|t| t.table_name.eq_ignore_ascii_case(table))
}

fn schema_has_column(schema: &SchemaSnapshot, table: &str, column: &str) -> bool {
    schema
        .tables
        .iter()
        .find(|t| t.table_name.eq_ignore_ascii_case(table))
        .map(|t| t.columns.iter().any(|c| c.name.eq_ignore_ascii_case(column)))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use nlsql_test_support::fixtures::{sample_ontology, sample_schema};
    use nlsql_test_support::FakeLlmProvider;

    #[tokio::test]
    async fn get_or_generate_discards_concepts_and_properties_outside_the_schema() {
        let schema = sample_schema();

        let concepts_json = r#"[
            {"name": "customer", "description": "a buyer", "tables": ["customers"], "synonyms": ["buyer"]},
            {"name": "invoice", "description": "hallucinated table", "tables": ["invoices"], "synonyms": []}
        ]"#;
        let properties_json = r#"[
            {"concept": "customer", "property_name": "customername", "table": "customers", "column": "name", "semantic_meaning": "full name", "confidence": 0.9},
            {"concept": "customer", "property_name": "customerloyalty", "table": "customers", "column": "loyalty_tier", "semantic_meaning": "hallucinated column", "confidence": 0.9},
            {"concept": "invoice", "property_name": "invoicetotal", "table": "invoices", "column": "total", "semantic_meaning": "dropped concept", "confidence": 0.9}
        ]"#;
        let relationships_json = r#"[
            {"from_concept": "customer", "to_concept": "invoice", "type": "HasMany", "via_table": "orders", "confidence": 0.8}
        ]"#;

        let llm = Arc::new(
            FakeLlmProvider::new()
                .with_response(concepts_json)
                .with_response(properties_json)
                .with_response(relationships_json),
        );
        let store = OntologyStore::new(llm);

        let ontology = store.get_or_generate("app_localhost_5432", &schema).await.unwrap();

        assert_eq!(ontology.concepts.len(), 1);
        assert_eq!(ontology.concepts[0].name, "customer");
        assert_eq!(ontology.properties.len(), 1);
        assert_eq!(ontology.properties[0].column, "name");
        assert!(ontology.relationships.is_empty());
        assert_eq!(ontology.schema_fingerprint, schema.fingerprint());
    }

    #[tokio::test]
    async fn get_or_generate_returns_cached_ontology_when_fingerprint_is_unchanged() {
        let schema = sample_schema();
        let concepts_json = r#"[{"name": "customer", "description": "a buyer", "tables": ["customers"], "synonyms": []}]"#;

        let llm = Arc::new(
            FakeLlmProvider::new()
                .with_response(concepts_json)
                .with_response("[]")
                .with_response("[]"),
        );
        let store = OntologyStore::new(llm);

        let first = store.get_or_generate("app_localhost_5432", &schema).await.unwrap();
        let second = store.get_or_generate("app_localhost_5432", &schema).await.unwrap();

        assert_eq!(first.generated_at, second.generated_at);
    }

    #[test]
    fn resolve_matches_property_name_contained_in_question() {
        let schema = sample_schema();
        let ontology = sample_ontology(schema.fingerprint());

        let result = OntologyStore::resolve(&ontology, "what is the customer name", &schema);

        assert_eq!(result.hints.len(), 1);
        assert_eq!(result.hints[0].table, "customers");
        assert_eq!(result.hints[0].column, "name");
        assert!(result.confidence > 0.5);
    }

    #[test]
    fn resolve_matches_via_concept_synonym() {
        let schema = sample_schema();
        let ontology = sample_ontology(schema.fingerprint());

        let result = OntologyStore::resolve(&ontology, "list every buyer's name", &schema);

        assert_eq!(result.hints.len(), 1);
        assert_eq!(result.hints[0].concept, "customer");
    }

    #[test]
    fn resolve_returns_no_hints_for_unrelated_question() {
        let schema = sample_schema();
        let ontology = sample_ontology(schema.fingerprint());

        let result = OntologyStore::resolve(&ontology, "what's the weather like", &schema);

        assert!(result.hints.is_empty());
        assert!((result.confidence - 0.5).abs() < f32::EPSILON);
    }

    #[test]
    fn resolve_never_emits_a_hint_for_a_dropped_column() {
        let schema = sample_schema();
        let mut ontology = sample_ontology(schema.fingerprint());
        ontology.properties.push(nlsql_core::Property {
            concept: "customer".to_string(),
            property_name: "loyaltytier".to_string(),
            table: "customers".to_string(),
            column: "loyalty_tier".to_string(),
            semantic_meaning: "no longer a real column".to_string(),
            confidence: 0.8,
        });

        let result = OntologyStore::resolve(&ontology, "what loyaltytier is this customer", &schema);

        assert!(result.hints.iter().all(|h| h.column != "loyalty_tier"));
    }
}
