//! Relationship types for the narrative knowledge graph
//!
//! Relationships are typed, directed edges between two entities of the same
//! project. Several relationships may exist between the same ordered pair,
//! even with the same type: every extraction contributes its own edge.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::entity::Properties;
use crate::error::{Error, Result};

/// A directed edge between two entities
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Relationship {
    /// Unique identifier within the project
    pub id: String,
    /// Id of the source entity
    pub source: String,
    /// Id of the target entity
    pub target: String,
    /// Relationship kind from the open vocabulary, in snake_case
    #[serde(rename = "type")]
    pub relationship_type: String,
    /// Free-form attributes
    #[serde(default)]
    pub properties: Properties,
    /// Scenes this relationship was extracted from
    #[serde(default)]
    pub source_scenes: Vec<String>,
    /// Number of mentions backing this edge
    #[serde(default = "default_mentions")]
    pub mention_count: u64,
    /// When the relationship was created
    pub created_at: DateTime<Utc>,
}

fn default_mentions() -> u64 {
    1
}

impl Relationship {
    /// Create a new relationship with a fresh id
    pub fn new(
        source: impl Into<String>,
        target: impl Into<String>,
        relationship_type: impl AsRef<str>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            source: source.into(),
            target: target.into(),
            relationship_type: normalize_relationship_type(relationship_type.as_ref()),
            properties: Properties::new(),
            source_scenes: Vec::new(),
            mention_count: 1,
            created_at: Utc::now(),
        }
    }

    /// Use a caller-supplied id
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    /// Set a property
    pub fn with_property(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.properties.insert(key.into(), value);
        self
    }

    /// Record the scene this relationship came from
    pub fn with_source_scene(mut self, scene_id: impl Into<String>) -> Self {
        let scene_id = scene_id.into();
        if !self.source_scenes.contains(&scene_id) {
            self.source_scenes.push(scene_id);
        }
        self
    }

    /// Set the mention count
    pub fn with_mentions(mut self, mention_count: u64) -> Self {
        self.mention_count = mention_count;
        self
    }

    /// Edge weight derived from mention frequency: `1 + ln(mentions)`
    pub fn weight(&self) -> f64 {
        1.0 + (self.mention_count.max(1) as f64).ln()
    }

    /// True when source and target are the same entity
    pub fn is_self_loop(&self) -> bool {
        self.source == self.target
    }

    /// The endpoint opposite `entity_id`, if this edge touches it
    pub fn other_end(&self, entity_id: &str) -> Option<&str> {
        if self.source == entity_id {
            Some(&self.target)
        } else if self.target == entity_id {
            Some(&self.source)
        } else {
            None
        }
    }

    /// Check the relationship is well-formed
    pub fn validate(&self) -> Result<()> {
        if self.id.trim().is_empty() {
            return Err(Error::Validation(
                "relationship id must not be empty".to_string(),
            ));
        }
        if self.relationship_type.is_empty() {
            return Err(Error::Validation(
                "relationship type must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

/// Normalise a relationship type to snake_case
///
/// `"Located In"`, `"located-in"` and `"locatedIn"` all become `"located_in"`.
pub fn normalize_relationship_type(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut prev_lower = false;
    let mut pending_sep = false;

    for c in raw.trim().chars() {
        if c.is_alphanumeric() {
            if (pending_sep || (c.is_uppercase() && prev_lower)) && !out.is_empty() {
                out.push('_');
            }
            pending_sep = false;
            prev_lower = c.is_lowercase() || c.is_ascii_digit();
            out.extend(c.to_lowercase());
        } else {
            pending_sep = true;
            prev_lower = false;
        }
    }
    out
}
