//! Entity identity resolution
//!
//! Decides when an incoming entity is "the same" as one already in the
//! graph and how the two are merged. The graph store only talks to the
//! [`EntityResolver`] trait, so a smarter resolver (aliases, embeddings,
//! user-confirmed merges) can replace [`NameTypeResolver`] without touching
//! the store.

use chrono::Utc;

use super::entity::Entity;

/// Pluggable identity and merge policy for entities
pub trait EntityResolver: Send + Sync + std::fmt::Debug {
    /// Identity key; two entities with equal keys are merged
    fn key(&self, entity: &Entity) -> String;

    /// Fold `incoming` into `existing`. `existing.id` must not change.
    fn merge(&self, existing: &mut Entity, incoming: Entity);
}

/// Case-insensitive name plus type equality
///
/// Merging unions `source_scenes` (existing order first), sums
/// `mention_count` and overlays `properties` with incoming values winning.
#[derive(Debug, Clone, Copy, Default)]
pub struct NameTypeResolver;

impl EntityResolver for NameTypeResolver {
    fn key(&self, entity: &Entity) -> String {
        format!("{}:{}", entity.entity_type.as_str(), entity.normalized_name())
    }

    fn merge(&self, existing: &mut Entity, incoming: Entity) {
        for scene in incoming.source_scenes {
            existing.add_source_scene(scene);
        }
        existing.mention_count = existing.mention_count.saturating_add(incoming.mention_count);
        existing.properties.extend(incoming.properties);
        existing.updated_at = Utc::now();
    }
}
