//! Self-describing serialized form of a project's graph
//!
//! A [`GraphDocument`] is what the persistence layer stores: one document per
//! project holding metadata, every node and every edge.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::entity::Entity;
use super::relationship::Relationship;

/// Current document layout version
pub const SCHEMA_VERSION: u32 = 1;

/// Bookkeeping owned by the graph store and recomputed on every mutation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphMetadata {
    /// Project this graph belongs to
    pub project_id: String,
    /// Number of entities
    pub entity_count: usize,
    /// Number of relationships
    pub relationship_count: usize,
    /// Time of the last mutation
    pub last_updated: DateTime<Utc>,
    /// Layout version of the document
    pub schema_version: u32,
    /// Monotonic mutation counter for this graph
    #[serde(default)]
    pub revision: u64,
}

impl GraphMetadata {
    /// Metadata for an empty graph
    pub fn new(project_id: impl Into<String>) -> Self {
        Self {
            project_id: project_id.into(),
            entity_count: 0,
            relationship_count: 0,
            last_updated: Utc::now(),
            schema_version: SCHEMA_VERSION,
            revision: 0,
        }
    }
}

/// Full graph snapshot: `{metadata, nodes, edges}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphDocument {
    pub metadata: GraphMetadata,
    pub nodes: Vec<Entity>,
    pub edges: Vec<Relationship>,
}

impl GraphDocument {
    /// An empty document for a project
    pub fn empty(project_id: impl Into<String>) -> Self {
        Self {
            metadata: GraphMetadata::new(project_id),
            nodes: Vec::new(),
            edges: Vec::new(),
        }
    }

    /// Project id shortcut
    pub fn project_id(&self) -> &str {
        &self.metadata.project_id
    }

    /// Serialize to pretty JSON
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    /// Parse from JSON
    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }
}
