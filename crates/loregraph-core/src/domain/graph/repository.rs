//! Repository trait for graph document persistence
//!
//! One document per project, written with optimistic concurrency, plus an
//! inverted index over entity attributes so "which projects mention X" does
//! not scan whole documents.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::document::GraphDocument;
use super::entity::normalize_name;
use crate::error::Result;

/// Optimistic concurrency token for a stored document
///
/// A write succeeds only if the stored `version` and `last_updated` still
/// match the token the writer read. `revision` is the graph's own mutation
/// counter at the time the document was written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionToken {
    pub version: i64,
    pub last_updated: DateTime<Utc>,
    pub revision: u64,
}

/// A document together with the token it was read at
#[derive(Debug, Clone)]
pub struct StoredGraph {
    pub document: GraphDocument,
    pub token: VersionToken,
}

/// One hit from the attribute index
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributeMatch {
    pub project_id: String,
    pub entity_id: String,
    pub attribute: String,
    pub value: String,
}

/// Indexed attribute names
pub mod attributes {
    /// Normalised entity name
    pub const NAME: &str = "name";
    /// Entity type
    pub const TYPE: &str = "type";
    /// Prefix for scalar properties, e.g. `property:species`
    pub const PROPERTY_PREFIX: &str = "property:";
}

/// Normalise a lookup value the same way index entries are written
pub fn normalize_attribute_value(value: &str) -> String {
    normalize_name(value)
}

/// Attribute index rows for a document: `(entity_id, attribute, value)`
///
/// Names, types and scalar properties are indexed. Values are normalised
/// so lookups are case-insensitive.
pub fn index_entries(document: &GraphDocument) -> Vec<(String, String, String)> {
    let mut entries = Vec::new();
    for entity in &document.nodes {
        entries.push((
            entity.id.clone(),
            attributes::NAME.to_string(),
            entity.normalized_name(),
        ));
        entries.push((
            entity.id.clone(),
            attributes::TYPE.to_string(),
            entity.entity_type.as_str().to_string(),
        ));
        for (key, value) in &entity.properties {
            let scalar = match value {
                serde_json::Value::String(s) => s.clone(),
                serde_json::Value::Number(n) => n.to_string(),
                serde_json::Value::Bool(b) => b.to_string(),
                _ => continue,
            };
            entries.push((
                entity.id.clone(),
                format!("{}{}", attributes::PROPERTY_PREFIX, key),
                normalize_attribute_value(&scalar),
            ));
        }
    }
    entries
}

/// Repository trait for graph documents
#[async_trait]
pub trait GraphDocumentRepository: Send + Sync {
    // ========== Document Operations ==========

    /// Load a project's document and its version token
    async fn load(&self, project_id: &str) -> Result<Option<StoredGraph>>;

    /// Read only the version token
    async fn current_version(&self, project_id: &str) -> Result<Option<VersionToken>>;

    /// Write a document
    ///
    /// `expected` is the token read before the write, or `None` when the
    /// document must not exist yet. Fails with `Error::Conflict` and leaves
    /// the stored document untouched when the token is stale.
    async fn save(
        &self,
        document: &GraphDocument,
        expected: Option<&VersionToken>,
    ) -> Result<VersionToken>;

    /// Delete a project's document and index entries
    async fn delete(&self, project_id: &str) -> Result<bool>;

    /// List ids of projects with a stored document
    async fn list_projects(&self) -> Result<Vec<String>>;

    // ========== Index Operations ==========

    /// Find entities across projects by an indexed attribute
    async fn find_by_attribute(&self, attribute: &str, value: &str) -> Result<Vec<AttributeMatch>>;
}
