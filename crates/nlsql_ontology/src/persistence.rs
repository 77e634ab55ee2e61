//! On-disk ontology persistence: YAML (via `serde_yaml`) for round-tripping,
//! and a hand-rolled RDF/XML (OWL) writer for interop with external tooling
//! that expects `owl:Class`/`owl:DatatypeProperty` declarations (§4.4).

use crate::error::OntologyError;
use chrono::{DateTime, Utc};
use nlsql_core::Ontology;
use std::fs;
use std::path::Path;

/// `{database}_{host}_{port}_ontology_{timestamp}` filename stem, shared by
/// both the `.yml` and `.owl` writers.
pub fn filename_stem(database: &str, host: &str, port: u16, timestamp: DateTime<Utc>) -> String {
    format!(
        "{database}_{host}_{port}_ontology_{}",
        timestamp.format("%Y%m%dT%H%M%SZ")
    )
}

pub fn save_yaml(ontology: &Ontology, path: &Path) -> Result<(), OntologyError> {
    let yaml = serde_yaml::to_string(ontology)?;
    fs::write(path, yaml)?;
    Ok(())
}

pub fn load_yaml(path: &Path) -> Result<Ontology, OntologyError> {
    let contents = fs::read_to_string(path)?;
    let ontology = serde_yaml::from_str(&contents)?;
    Ok(ontology)
}

/// Writes an OWL ontology as RDF/XML: one `owl:Class` per concept, one
/// `owl:DatatypeProperty` per property (domain = its concept's class, backed
/// by an `rdfs:comment` carrying the `(table, column)` it resolves to), and
/// one `owl:ObjectProperty` per relationship.
pub fn save_owl(ontology: &Ontology, path: &Path) -> Result<(), OntologyError> {
    let mut xml = String::new();
    xml.push_str("<?xml version=\"1.0\"?>\n");
    xml.push_str("<rdf:RDF xmlns:rdf=\"http://www.w3.org/1999/02/22-rdf-syntax-ns#\"\n");
    xml.push_str("         xmlns:rdfs=\"http://www.w3.org/2000/01/rdf-schema#\"\n");
    xml.push_str("         xmlns:owl=\"http://www.w3.org/2002/07/owl#\"\n");
    xml.push_str("         xmlns:nlsql=\"urn:nlsql:ontology#\">\n\n");

    for concept in &ontology.concepts {
        xml.push_str(&format!(
            "  <owl:Class rdf:about=\"urn:nlsql:ontology#{}\">\n",
            xml_escape(&concept.name)
        ));
        xml.push_str(&format!(
            "    <rdfs:comment>{}</rdfs:comment>\n",
            xml_escape(&concept.description)
        ));
        for table in &concept.tables {
            xml.push_str(&format!(
                "    <nlsql:mapsToTable>{}</nlsql:mapsToTable>\n",
                xml_escape(table)
            ));
        }
        for synonym in &concept.synonyms {
            xml.push_str(&format!(
                "    <nlsql:synonym>{}</nlsql:synonym>\n",
                xml_escape(synonym)
            ));
        }
        xml.push_str("  </owl:Class>\n\n");
    }

    for property in &ontology.properties {
        xml.push_str(&format!(
            "  <owl:DatatypeProperty rdf:about=\"urn:nlsql:ontology#{}\">\n",
            xml_escape(&property.property_name)
        ));
        xml.push_str(&format!(
            "    <rdfs:domain rdf:resource=\"urn:nlsql:ontology#{}\"/>\n",
            xml_escape(&property.concept)
        ));
        xml.push_str(&format!(
            "    <nlsql:mapsToColumn>{}.{}</nlsql:mapsToColumn>\n",
            xml_escape(&property.table),
            xml_escape(&property.column)
        ));
        xml.push_str(&format!(
            "    <rdfs:comment>{}</rdfs:comment>\n",
            xml_escape(&property.semantic_meaning)
        ));
        xml.push_str(&format!(
            "    <nlsql:confidence>{:.2}</nlsql:confidence>\n",
            property.confidence
        ));
        xml.push_str("  </owl:DatatypeProperty>\n\n");
    }

    for relationship in &ontology.relationships {
        let predicate = format!(
            "{}_{}_{}",
            relationship.from_concept, relationship.to_concept, relationship_suffix(relationship)
        );
        xml.push_str(&format!(
            "  <owl:ObjectProperty rdf:about=\"urn:nlsql:ontology#{}\">\n",
            xml_escape(&predicate)
        ));
        xml.push_str(&format!(
            "    <rdfs:domain rdf:resource=\"urn:nlsql:ontology#{}\"/>\n",
            xml_escape(&relationship.from_concept)
        ));
        xml.push_str(&format!(
            "    <rdfs:range rdf:resource=\"urn:nlsql:ontology#{}\"/>\n",
            xml_escape(&relationship.to_concept)
        ));
        if let Some(via) = &relationship.via_table {
            xml.push_str(&format!(
                "    <nlsql:viaTable>{}</nlsql:viaTable>\n",
                xml_escape(via)
            ));
        }
        xml.push_str(&format!(
            "    <nlsql:confidence>{:.2}</nlsql:confidence>\n",
            relationship.confidence
        ));
        xml.push_str("  </owl:ObjectProperty>\n\n");
    }

    xml.push_str("</rdf:RDF>\n");
    fs::write(path, xml)?;
    Ok(())
}

fn relationship_suffix(relationship: &nlsql_core::Relationship) -> &'static str {
    use nlsql_core::ontology_model::RelationshipType;
    match relationship.relationship_type {
        RelationshipType::References => "references",
        RelationshipType::BelongsTo => "belongsTo",
        RelationshipType::HasMany => "hasMany",
        RelationshipType::AssociatedWith => "associatedWith",
    }
}

fn xml_escape(input: &str) -> String {
    input
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}
