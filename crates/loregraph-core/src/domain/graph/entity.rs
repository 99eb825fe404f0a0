//! Entity types for the narrative knowledge graph
//!
//! Entities are the nodes of a project's graph: characters, locations,
//! objects and the other narrative elements extracted from scenes.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Error, Result};

/// Maximum length of an entity name, in characters
pub const MAX_NAME_LEN: usize = 256;

/// Free-form attribute map attached to entities and relationships
pub type Properties = BTreeMap<String, serde_json::Value>;

/// A node in the knowledge graph
///
/// `id` is immutable once created and is the join key for every
/// relationship. `name` may be edited. `importance` is never stored; it is
/// derived on read from `mention_count` and the entity's degree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    /// Unique identifier within the project
    pub id: String,
    /// Display name
    pub name: String,
    /// Kind of narrative element
    #[serde(rename = "type")]
    pub entity_type: EntityType,
    /// Free-form attributes
    #[serde(default)]
    pub properties: Properties,
    /// Scenes this entity was extracted from, in first-seen order
    #[serde(default)]
    pub source_scenes: Vec<String>,
    /// Number of mentions across all extraction passes
    #[serde(default)]
    pub mention_count: u64,
    /// When the entity was created
    pub created_at: DateTime<Utc>,
    /// When the entity was last changed
    pub updated_at: DateTime<Utc>,
}

impl Entity {
    /// Create a new entity with a fresh id and a single mention
    pub fn new(name: impl Into<String>, entity_type: EntityType) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            name: name.into(),
            entity_type,
            properties: Properties::new(),
            source_scenes: Vec::new(),
            mention_count: 1,
            created_at: now,
            updated_at: now,
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

    /// Record the scene this entity came from
    pub fn with_source_scene(mut self, scene_id: impl Into<String>) -> Self {
        self.add_source_scene(scene_id);
        self
    }

    /// Set the mention count
    pub fn with_mentions(mut self, mention_count: u64) -> Self {
        self.mention_count = mention_count;
        self
    }

    /// Append a scene id unless already present
    pub fn add_source_scene(&mut self, scene_id: impl Into<String>) {
        let scene_id = scene_id.into();
        if !self.source_scenes.contains(&scene_id) {
            self.source_scenes.push(scene_id);
        }
    }

    /// Lowercased, whitespace-collapsed name used for identity matching
    pub fn normalized_name(&self) -> String {
        normalize_name(&self.name)
    }

    /// Check the entity is well-formed, trimming the name in place
    pub fn validate(&mut self) -> Result<()> {
        self.name = validate_name(&self.name)?;
        if self.id.trim().is_empty() {
            return Err(Error::Validation("entity id must not be empty".to_string()));
        }
        Ok(())
    }
}

/// Trim a name and check its length
pub fn validate_name(name: &str) -> Result<String> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(Error::Validation("entity name must not be empty".to_string()));
    }
    if trimmed.chars().count() > MAX_NAME_LEN {
        return Err(Error::Validation(format!(
            "entity name exceeds {} characters",
            MAX_NAME_LEN
        )));
    }
    Ok(trimmed.to_string())
}

/// Lowercase a name and collapse internal whitespace
pub fn normalize_name(name: &str) -> String {
    name.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Kinds of narrative entities
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    /// A person or other acting being
    Character,
    /// A place, real or imagined
    Location,
    /// A physical item
    Object,
    /// An abstract idea
    Concept,
    /// Something that happens
    Event,
    /// A group, faction or institution
    Organization,
    /// A recurring motif
    Theme,
}

impl EntityType {
    /// Get the string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Character => "character",
            Self::Location => "location",
            Self::Object => "object",
            Self::Concept => "concept",
            Self::Event => "event",
            Self::Organization => "organization",
            Self::Theme => "theme",
        }
    }

    /// Parse from string, accepting common synonyms
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "character" | "person" | "per" | "people" => Some(Self::Character),
            "location" | "place" | "loc" | "gpe" | "setting" => Some(Self::Location),
            "object" | "item" | "artifact" | "thing" => Some(Self::Object),
            "concept" | "idea" => Some(Self::Concept),
            "event" => Some(Self::Event),
            "organization" | "organisation" | "org" | "faction" | "group" => {
                Some(Self::Organization)
            }
            "theme" | "motif" => Some(Self::Theme),
            _ => None,
        }
    }

    /// Get all entity types
    pub fn all() -> &'static [EntityType] {
        &[
            Self::Character,
            Self::Location,
            Self::Object,
            Self::Concept,
            Self::Event,
            Self::Organization,
            Self::Theme,
        ]
    }
}

impl std::fmt::Display for EntityType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Changes to apply to an existing entity
///
/// `None` fields are left untouched. `properties` are merged over the
/// existing map, then `remove_properties` are dropped.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EntityUpdate {
    pub name: Option<String>,
    pub entity_type: Option<EntityType>,
    #[serde(default)]
    pub properties: Option<Properties>,
    #[serde(default)]
    pub remove_properties: Vec<String>,
}

impl EntityUpdate {
    /// Rename the entity
    pub fn rename(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Default::default()
        }
    }

    /// Change the entity type
    pub fn with_type(mut self, entity_type: EntityType) -> Self {
        self.entity_type = Some(entity_type);
        self
    }

    /// Set or overwrite one property
    pub fn with_property(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.properties
            .get_or_insert_with(Properties::new)
            .insert(key.into(), value);
        self
    }

    /// Remove one property
    pub fn without_property(mut self, key: impl Into<String>) -> Self {
        self.remove_properties.push(key.into());
        self
    }

    /// True when the update would change nothing
    pub fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.entity_type.is_none()
            && self.properties.as_ref().is_none_or(|p| p.is_empty())
            && self.remove_properties.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_entity_creation() {
        let entity = Entity::new("Mickey", EntityType::Character)
            .with_property("species", json!("mouse"))
            .with_source_scene("scene-1")
            .with_source_scene("scene-1");

        assert!(!entity.id.is_empty());
        assert_eq!(entity.mention_count, 1);
        assert_eq!(entity.source_scenes, vec!["scene-1"]);
        assert_eq!(entity.properties["species"], json!("mouse"));
    }

    #[test]
    fn test_validate_trims_name() {
        let mut entity = Entity::new("  Mars  ", EntityType::Location);
        entity.validate().unwrap();
        assert_eq!(entity.name, "Mars");
    }

    #[test]
    fn test_validate_rejects_bad_names() {
        let mut empty = Entity::new("   ", EntityType::Theme);
        assert!(matches!(empty.validate(), Err(Error::Validation(_))));

        let mut long = Entity::new("x".repeat(MAX_NAME_LEN + 1), EntityType::Object);
        assert!(matches!(long.validate(), Err(Error::Validation(_))));
    }

    #[test]
    fn test_normalized_name() {
        let entity = Entity::new("Captain   Nemo", EntityType::Character);
        assert_eq!(entity.normalized_name(), "captain nemo");
    }

    #[test]
    fn test_entity_type_parse() {
        assert_eq!(EntityType::parse("PERSON"), Some(EntityType::Character));
        assert_eq!(EntityType::parse("gpe"), Some(EntityType::Location));
        assert_eq!(EntityType::parse("org"), Some(EntityType::Organization));
        assert_eq!(EntityType::parse("theme"), Some(EntityType::Theme));
        assert_eq!(EntityType::parse("spaceship"), None);

        for entity_type in EntityType::all() {
            assert_eq!(EntityType::parse(entity_type.as_str()), Some(*entity_type));
        }
    }

    #[test]
    fn test_entity_serializes_type_field() {
        let entity = Entity::new("Mars", EntityType::Location);
        let value = serde_json::to_value(&entity).unwrap();
        assert_eq!(value["type"], json!("location"));
    }

    #[test]
    fn test_update_is_empty() {
        assert!(EntityUpdate::default().is_empty());
        assert!(!EntityUpdate::rename("Mick").is_empty());
        assert!(!EntityUpdate::default().without_property("age").is_empty());
    }
}
