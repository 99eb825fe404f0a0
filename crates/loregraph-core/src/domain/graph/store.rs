//! Arena-backed graph store for a single project
//!
//! Entities and relationships live in flat slot vectors indexed by id.
//! Relationships hold entity ids, never references, so the structure has no
//! ownership cycles and serializes directly. Every mutation either fully
//! applies or returns an error without touching the graph.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::analytics::{self, CentralityMeasure, RankedEntity};
use super::community::{self, CommunityDetection};
use super::document::{GraphDocument, GraphMetadata};
use super::entity::{Entity, EntityType, EntityUpdate, Properties, normalize_name, validate_name};
use super::relationship::{Relationship, normalize_relationship_type};
use super::resolver::{EntityResolver, NameTypeResolver};
use crate::config::GraphConfig;
use crate::error::{Error, Result};

/// Tombstones tolerated before slot vectors are compacted
const COMPACT_THRESHOLD: usize = 64;

/// Which relationship types the store accepts
#[derive(Debug, Clone, Default)]
pub struct RelationshipTypePolicy {
    allowed: Option<HashSet<String>>,
}

impl RelationshipTypePolicy {
    /// Accept any non-empty type
    pub fn open() -> Self {
        Self { allowed: None }
    }

    /// Accept only the listed types
    pub fn restricted<I, S>(types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            allowed: Some(
                types
                    .into_iter()
                    .map(|t| normalize_relationship_type(t.as_ref()))
                    .filter(|t| !t.is_empty())
                    .collect(),
            ),
        }
    }

    /// Build from the `[graph]` config section
    pub fn from_config(config: &GraphConfig) -> Self {
        if config.allow_unknown_relationship_types {
            Self::open()
        } else {
            Self::restricted(&config.relationship_types)
        }
    }

    /// Normalise `raw` and check it is allowed
    pub fn check(&self, raw: &str) -> Result<String> {
        let normalized = normalize_relationship_type(raw);
        if normalized.is_empty() {
            return Err(Error::Validation(
                "relationship type must not be empty".to_string(),
            ));
        }
        match &self.allowed {
            Some(allowed) if !allowed.contains(&normalized) => Err(Error::Validation(format!(
                "relationship type '{}' is not in the allowed vocabulary",
                normalized
            ))),
            _ => Ok(normalized),
        }
    }
}

/// Predicate used by [`KnowledgeGraph::query_entities`]
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EntityFilter {
    /// Accepted types; empty means all
    #[serde(default)]
    pub entity_types: Vec<EntityType>,
    /// Minimum mention count
    #[serde(default)]
    pub min_mentions: Option<u64>,
    /// Case-insensitive substring of the name
    #[serde(default)]
    pub name_contains: Option<String>,
}

impl EntityFilter {
    /// Match everything
    pub fn all() -> Self {
        Self::default()
    }

    /// Restrict to one more entity type
    pub fn with_type(mut self, entity_type: EntityType) -> Self {
        self.entity_types.push(entity_type);
        self
    }

    /// Require at least `min` mentions
    pub fn with_min_mentions(mut self, min: u64) -> Self {
        self.min_mentions = Some(min);
        self
    }

    /// Require the name to contain `needle`
    pub fn with_name_containing(mut self, needle: impl Into<String>) -> Self {
        self.name_contains = Some(needle.into());
        self
    }

    /// Check one entity
    pub fn matches(&self, entity: &Entity) -> bool {
        if !self.entity_types.is_empty() && !self.entity_types.contains(&entity.entity_type) {
            return false;
        }
        if let Some(min) = self.min_mentions {
            if entity.mention_count < min {
                return false;
            }
        }
        match &self.name_contains {
            Some(needle) => entity.name.to_lowercase().contains(&needle.to_lowercase()),
            None => true,
        }
    }
}

/// Lazy, restartable scan over entities matching a filter
///
/// Yields in insertion order. Cloning the query, or calling
/// [`EntityQuery::restart`], starts a fresh pass over the same snapshot.
#[derive(Debug, Clone)]
pub struct EntityQuery<'a> {
    graph: &'a KnowledgeGraph,
    filter: EntityFilter,
    position: usize,
}

impl<'a> EntityQuery<'a> {
    /// Rewind to the first entity
    pub fn restart(&mut self) {
        self.position = 0;
    }
}

impl<'a> Iterator for EntityQuery<'a> {
    type Item = &'a Entity;

    fn next(&mut self) -> Option<Self::Item> {
        let graph = self.graph;
        while self.position < graph.entities.len() {
            let slot = self.position;
            self.position += 1;
            if let Some(entity) = &graph.entities[slot] {
                if self.filter.matches(entity) {
                    return Some(entity);
                }
            }
        }
        None
    }
}

/// An entity with its derived metrics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityView {
    #[serde(flatten)]
    pub entity: Entity,
    pub importance: f64,
    pub in_degree: usize,
    pub out_degree: usize,
}

/// Entity reached by a bounded traversal
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectedEntity {
    pub entity: Entity,
    /// Hops from the start entity; the start itself is at distance 0
    pub distance: usize,
}

/// Shortest path between two entities
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphPath {
    /// Entity ids from source to target, inclusive
    pub entity_ids: Vec<String>,
    /// Relationship ids, one per hop
    pub relationship_ids: Vec<String>,
}

impl GraphPath {
    /// Number of edges traversed
    pub fn hops(&self) -> usize {
        self.relationship_ids.len()
    }
}

/// Result of [`KnowledgeGraph::add_entity`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityInsert {
    /// Id of the stored entity (the existing id when merged)
    pub id: String,
    /// True when merged into an existing entity
    pub merged: bool,
}

/// Result of [`KnowledgeGraph::delete_entity`]
#[derive(Debug, Clone, Serialize)]
pub struct DeletedEntity {
    pub entity: Entity,
    /// Incident relationships removed with it
    pub relationships: Vec<Relationship>,
}

/// Relationship proposed by name rather than id
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchRelationship {
    pub source_name: String,
    pub target_name: String,
    pub relationship_type: String,
    #[serde(default)]
    pub properties: Properties,
    #[serde(default)]
    pub source_scene: Option<String>,
}

/// A set of mutations applied as one unit
#[derive(Debug, Clone, Default)]
pub struct GraphBatch {
    pub entities: Vec<Entity>,
    pub relationships: Vec<BatchRelationship>,
}

/// What a batch changed
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AppliedBatch {
    /// Ids of entities created by this batch
    pub created_entities: Vec<String>,
    /// Ids of existing entities the batch merged into
    pub merged_entities: Vec<String>,
    /// Ids of relationships created by this batch
    pub relationships: Vec<String>,
    /// Proposed relationships that were dropped, with the reason
    pub skipped_relationships: Vec<String>,
}

/// Paged listing request
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GraphQuery {
    #[serde(flatten)]
    pub filter: EntityFilter,
    #[serde(default)]
    pub offset: usize,
    /// Page size; `None` returns everything after `offset`
    #[serde(default)]
    pub limit: Option<usize>,
}

/// One page of the graph: nodes plus the edges among them
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphPage {
    pub nodes: Vec<EntityView>,
    pub edges: Vec<Relationship>,
    /// Number of entities matching the filter across all pages
    pub total: usize,
    pub offset: usize,
    pub limit: Option<usize>,
}

/// In-memory directed multigraph for one project
#[derive(Debug, Clone)]
pub struct KnowledgeGraph {
    metadata: GraphMetadata,
    entities: Vec<Option<Entity>>,
    entity_slots: HashMap<String, usize>,
    /// Resolver key -> entity id
    identity: HashMap<String, String>,
    /// Normalised name -> entity ids in insertion order
    names: HashMap<String, Vec<String>>,
    relationships: Vec<Option<Relationship>>,
    relationship_slots: HashMap<String, usize>,
    /// Entity id -> incident relationship slots in insertion order
    incident: HashMap<String, Vec<usize>>,
    resolver: Arc<dyn EntityResolver>,
    relationship_types: RelationshipTypePolicy,
    community_seed: u64,
}

impl KnowledgeGraph {
    /// Create an empty graph
    pub fn new(project_id: impl Into<String>) -> Self {
        Self {
            metadata: GraphMetadata::new(project_id),
            entities: Vec::new(),
            entity_slots: HashMap::new(),
            identity: HashMap::new(),
            names: HashMap::new(),
            relationships: Vec::new(),
            relationship_slots: HashMap::new(),
            incident: HashMap::new(),
            resolver: Arc::new(NameTypeResolver),
            relationship_types: RelationshipTypePolicy::open(),
            community_seed: 42,
        }
    }

    /// Apply the `[graph]` config section
    pub fn with_config(self, config: &GraphConfig) -> Self {
        self.with_relationship_policy(RelationshipTypePolicy::from_config(config))
            .with_community_seed(config.community_seed)
    }

    /// Replace the identity resolver and rebuild the identity index
    pub fn with_resolver(mut self, resolver: Arc<dyn EntityResolver>) -> Self {
        self.resolver = resolver;
        self.identity.clear();
        for entity in self.entities.iter().flatten() {
            self.identity
                .entry(self.resolver.key(entity))
                .or_insert_with(|| entity.id.clone());
        }
        self
    }

    /// Set the relationship vocabulary policy
    pub fn with_relationship_policy(mut self, policy: RelationshipTypePolicy) -> Self {
        self.relationship_types = policy;
        self
    }

    /// Seed used by community detection
    pub fn with_community_seed(mut self, seed: u64) -> Self {
        self.community_seed = seed;
        self
    }

    // ========== Accessors ==========

    /// Project this graph belongs to
    pub fn project_id(&self) -> &str {
        &self.metadata.project_id
    }

    /// Current metadata
    pub fn metadata(&self) -> &GraphMetadata {
        &self.metadata
    }

    /// Mutation counter
    pub fn revision(&self) -> u64 {
        self.metadata.revision
    }

    /// Number of entities
    pub fn entity_count(&self) -> usize {
        self.entity_slots.len()
    }

    /// Number of relationships
    pub fn relationship_count(&self) -> usize {
        self.relationship_slots.len()
    }

    /// True when the graph has no entities
    pub fn is_empty(&self) -> bool {
        self.entity_slots.is_empty()
    }

    /// Seed used by community detection
    pub fn community_seed(&self) -> u64 {
        self.community_seed
    }

    /// Look up an entity by id
    pub fn get_entity(&self, id: &str) -> Option<&Entity> {
        self.entity_slots
            .get(id)
            .and_then(|&slot| self.entities[slot].as_ref())
    }

    /// Look up a relationship by id
    pub fn get_relationship(&self, id: &str) -> Option<&Relationship> {
        self.relationship_slots
            .get(id)
            .and_then(|&slot| self.relationships[slot].as_ref())
    }

    /// All entities in insertion order
    pub fn entities(&self) -> impl Iterator<Item = &Entity> {
        self.entities.iter().flatten()
    }

    /// All relationships in insertion order
    pub fn relationships(&self) -> impl Iterator<Item = &Relationship> {
        self.relationships.iter().flatten()
    }

    /// Entities whose name matches case-insensitively, oldest first
    pub fn find_by_name(&self, name: &str) -> Vec<&Entity> {
        self.names
            .get(&normalize_name(name))
            .map(|ids| ids.iter().filter_map(|id| self.get_entity(id)).collect())
            .unwrap_or_default()
    }

    /// Resolve an id, or failing that the oldest entity with that name
    pub fn lookup(&self, id_or_name: &str) -> Option<&Entity> {
        self.get_entity(id_or_name)
            .or_else(|| self.find_by_name(id_or_name).into_iter().next())
    }

    /// Relationships touching `entity_id`, in insertion order
    pub fn incident_relationships<'a>(
        &'a self,
        entity_id: &str,
    ) -> impl Iterator<Item = &'a Relationship> + use<'a> {
        self.incident
            .get(entity_id)
            .into_iter()
            .flatten()
            .filter_map(|&slot| self.relationships[slot].as_ref())
    }

    /// Relationships leaving `entity_id`
    pub fn outgoing<'a>(&'a self, entity_id: &'a str) -> impl Iterator<Item = &'a Relationship> + 'a {
        self.incident_relationships(entity_id)
            .filter(move |r| r.source == entity_id)
    }

    /// Relationships entering `entity_id`
    pub fn incoming<'a>(&'a self, entity_id: &'a str) -> impl Iterator<Item = &'a Relationship> + 'a {
        self.incident_relationships(entity_id)
            .filter(move |r| r.target == entity_id)
    }

    /// Number of relationships entering `entity_id`
    pub fn in_degree(&self, entity_id: &str) -> usize {
        self.incoming(entity_id).count()
    }

    /// Number of relationships leaving `entity_id`
    pub fn out_degree(&self, entity_id: &str) -> usize {
        self.outgoing(entity_id).count()
    }

    /// `ln(1 + mentions) + 0.5 * in_degree + 0.5 * out_degree`, computed on read
    pub fn importance(&self, entity_id: &str) -> f64 {
        match self.get_entity(entity_id) {
            Some(entity) => importance_score(
                entity.mention_count,
                self.in_degree(entity_id),
                self.out_degree(entity_id),
            ),
            None => 0.0,
        }
    }

    /// Attach derived metrics to an entity
    pub fn view(&self, entity: &Entity) -> EntityView {
        let in_degree = self.in_degree(&entity.id);
        let out_degree = self.out_degree(&entity.id);
        EntityView {
            entity: entity.clone(),
            importance: importance_score(entity.mention_count, in_degree, out_degree),
            in_degree,
            out_degree,
        }
    }

    // ========== Mutations ==========

    /// Insert an entity, merging it into an existing one with the same identity
    pub fn add_entity(&mut self, mut entity: Entity) -> Result<EntityInsert> {
        entity.validate()?;
        let key = self.resolver.key(&entity);

        if let Some(existing_id) = self.identity.get(&key).cloned() {
            let slot = self.entity_slots[&existing_id];
            if let Some(existing) = self.entities[slot].as_mut() {
                self.resolver.merge(existing, entity);
            }
            self.touch();
            debug!(project_id = %self.project_id(), entity_id = %existing_id, "Merged entity");
            return Ok(EntityInsert {
                id: existing_id,
                merged: true,
            });
        }

        if self.entity_slots.contains_key(&entity.id) {
            return Err(Error::Validation(format!(
                "entity id '{}' is already used by a different entity",
                entity.id
            )));
        }

        let id = entity.id.clone();
        self.insert_entity_raw(entity);
        self.touch();
        debug!(project_id = %self.project_id(), entity_id = %id, "Added entity");
        Ok(EntityInsert { id, merged: false })
    }

    /// Insert a relationship; both endpoints must already exist
    pub fn add_relationship(&mut self, mut relationship: Relationship) -> Result<String> {
        relationship.relationship_type = self
            .relationship_types
            .check(&relationship.relationship_type)?;
        relationship.validate()?;

        for endpoint in [&relationship.source, &relationship.target] {
            if !self.entity_slots.contains_key(endpoint.as_str()) {
                return Err(Error::Reference(format!(
                    "entity '{}' is not in project '{}'",
                    endpoint,
                    self.project_id()
                )));
            }
        }
        if self.relationship_slots.contains_key(&relationship.id) {
            return Err(Error::Validation(format!(
                "relationship id '{}' already exists",
                relationship.id
            )));
        }

        let id = relationship.id.clone();
        self.insert_relationship_raw(relationship);
        self.touch();
        debug!(project_id = %self.project_id(), relationship_id = %id, "Added relationship");
        Ok(id)
    }

    /// Apply extracted entities then relationships as one unit
    ///
    /// Everything is validated before the first mutation, so an error leaves
    /// the graph untouched. Relationships whose endpoints cannot be resolved
    /// by name, or whose type is not allowed, are skipped and reported.
    pub fn apply_batch(&mut self, batch: GraphBatch) -> Result<AppliedBatch> {
        let mut applied = AppliedBatch::default();

        // Validate entities and map batch names to identity keys
        let mut entities = Vec::with_capacity(batch.entities.len());
        let mut batch_names: HashMap<String, String> = HashMap::new();
        let mut batch_ids: HashMap<String, String> = HashMap::new();
        for mut entity in batch.entities {
            entity.validate()?;
            let key = self.resolver.key(&entity);
            if !self.identity.contains_key(&key) && self.entity_slots.contains_key(&entity.id) {
                return Err(Error::Validation(format!(
                    "entity id '{}' is already used by a different entity",
                    entity.id
                )));
            }
            if let Some(other_key) = batch_ids.get(&entity.id) {
                if *other_key != key {
                    return Err(Error::Validation(format!(
                        "entity id '{}' appears twice in one batch",
                        entity.id
                    )));
                }
            }
            batch_ids.insert(entity.id.clone(), key.clone());
            batch_names
                .entry(entity.normalized_name())
                .or_insert_with(|| key.clone());
            entities.push(entity);
        }

        // Resolve relationship types and endpoints before mutating
        enum Endpoint {
            Batch(String),
            Existing(String),
        }
        let resolve = |graph: &Self, name: &str| -> Option<Endpoint> {
            let normalized = normalize_name(name);
            if let Some(key) = batch_names.get(&normalized) {
                return Some(Endpoint::Batch(key.clone()));
            }
            graph
                .lookup(name)
                .map(|entity| Endpoint::Existing(entity.id.clone()))
        };
        let mut pending = Vec::with_capacity(batch.relationships.len());
        for proposed in batch.relationships {
            let relationship_type = match self.relationship_types.check(&proposed.relationship_type)
            {
                Ok(t) => t,
                Err(err) => {
                    applied.skipped_relationships.push(err.to_string());
                    continue;
                }
            };
            let (Some(source), Some(target)) = (
                resolve(self, &proposed.source_name),
                resolve(self, &proposed.target_name),
            ) else {
                applied.skipped_relationships.push(format!(
                    "unresolved endpoint in '{}' -[{}]-> '{}'",
                    proposed.source_name, relationship_type, proposed.target_name
                ));
                continue;
            };
            pending.push((source, target, relationship_type, proposed));
        }

        // Apply: entities first so every relationship endpoint exists
        let mut seen = HashSet::new();
        for entity in entities {
            let insert = self.add_entity(entity)?;
            if !seen.insert(insert.id.clone()) {
                continue;
            }
            if insert.merged {
                applied.merged_entities.push(insert.id);
            } else {
                applied.created_entities.push(insert.id);
            }
        }

        let endpoint_id = |graph: &Self, endpoint: &Endpoint| -> Option<String> {
            match endpoint {
                Endpoint::Batch(key) => graph.identity.get(key).cloned(),
                Endpoint::Existing(id) => Some(id.clone()),
            }
        };
        for (source, target, relationship_type, proposed) in pending {
            let (Some(source_id), Some(target_id)) =
                (endpoint_id(self, &source), endpoint_id(self, &target))
            else {
                continue;
            };
            let mut relationship = Relationship::new(source_id, target_id, &relationship_type);
            relationship.properties = proposed.properties;
            if let Some(scene) = proposed.source_scene {
                relationship = relationship.with_source_scene(scene);
            }
            let id = relationship.id.clone();
            self.insert_relationship_raw(relationship);
            applied.relationships.push(id);
        }
        if !applied.relationships.is_empty() {
            self.touch();
        }

        Ok(applied)
    }

    /// Edit an entity in place; its id never changes
    pub fn update_entity(&mut self, id: &str, update: EntityUpdate) -> Result<Entity> {
        let slot = *self
            .entity_slots
            .get(id)
            .ok_or_else(|| Error::entity_not_found(id))?;
        let current = self.entities[slot]
            .clone()
            .ok_or_else(|| Error::entity_not_found(id))?;

        let mut updated = current.clone();
        if let Some(name) = &update.name {
            updated.name = validate_name(name)?;
        }
        if let Some(entity_type) = update.entity_type {
            updated.entity_type = entity_type;
        }
        if let Some(properties) = update.properties {
            updated.properties.extend(properties);
        }
        for key in &update.remove_properties {
            updated.properties.remove(key);
        }

        let old_key = self.resolver.key(&current);
        let new_key = self.resolver.key(&updated);
        if old_key != new_key {
            if let Some(owner) = self.identity.get(&new_key) {
                if owner != id {
                    return Err(Error::Validation(format!(
                        "another {} named '{}' already exists",
                        updated.entity_type, updated.name
                    )));
                }
            }
            if self.identity.get(&old_key).is_some_and(|owner| owner == id) {
                self.identity.remove(&old_key);
            }
            self.identity.insert(new_key, id.to_string());
        }

        let old_name = current.normalized_name();
        let new_name = updated.normalized_name();
        if old_name != new_name {
            self.unindex_name(&old_name, id);
            self.names.entry(new_name).or_default().push(id.to_string());
        }

        updated.updated_at = Utc::now();
        self.entities[slot] = Some(updated.clone());
        self.touch();
        debug!(project_id = %self.project_id(), entity_id = %id, "Updated entity");
        Ok(updated)
    }

    /// Remove an entity and every relationship touching it
    pub fn delete_entity(&mut self, id: &str) -> Result<DeletedEntity> {
        let slot = self
            .entity_slots
            .remove(id)
            .ok_or_else(|| Error::entity_not_found(id))?;
        let entity = self.entities[slot]
            .take()
            .ok_or_else(|| Error::entity_not_found(id))?;

        let key = self.resolver.key(&entity);
        if self.identity.get(&key).is_some_and(|owner| owner == id) {
            self.identity.remove(&key);
        }
        self.unindex_name(&entity.normalized_name(), id);

        let mut removed = Vec::new();
        for rel_slot in self.incident.remove(id).unwrap_or_default() {
            let Some(relationship) = self.relationships[rel_slot].take() else {
                continue;
            };
            self.relationship_slots.remove(&relationship.id);
            if let Some(other) = relationship.other_end(id) {
                if let Some(slots) = self.incident.get_mut(other) {
                    slots.retain(|s| *s != rel_slot);
                }
            }
            removed.push(relationship);
        }

        self.touch();
        self.maybe_compact();
        debug!(
            project_id = %self.project_id(),
            entity_id = %id,
            cascaded = removed.len(),
            "Deleted entity"
        );
        Ok(DeletedEntity {
            entity,
            relationships: removed,
        })
    }

    /// Remove one relationship
    pub fn delete_relationship(&mut self, id: &str) -> Result<Relationship> {
        let slot = self
            .relationship_slots
            .remove(id)
            .ok_or_else(|| Error::relationship_not_found(id))?;
        let relationship = self.relationships[slot]
            .take()
            .ok_or_else(|| Error::relationship_not_found(id))?;

        for endpoint in [&relationship.source, &relationship.target] {
            if let Some(slots) = self.incident.get_mut(endpoint.as_str()) {
                slots.retain(|s| *s != slot);
            }
        }

        self.touch();
        self.maybe_compact();
        debug!(project_id = %self.project_id(), relationship_id = %id, "Deleted relationship");
        Ok(relationship)
    }

    // ========== Queries ==========

    /// Lazily scan entities matching `filter`
    pub fn query_entities(&self, filter: EntityFilter) -> EntityQuery<'_> {
        EntityQuery {
            graph: self,
            filter,
            position: 0,
        }
    }

    /// One page of matching entities and the edges among them
    pub fn page(&self, query: &GraphQuery) -> GraphPage {
        let total = self.query_entities(query.filter.clone()).count();
        let limit = query.limit.unwrap_or(usize::MAX);
        let nodes: Vec<EntityView> = self
            .query_entities(query.filter.clone())
            .skip(query.offset)
            .take(limit)
            .map(|entity| self.view(entity))
            .collect();

        let on_page: HashSet<&str> = nodes.iter().map(|n| n.entity.id.as_str()).collect();
        let edges = self
            .relationships()
            .filter(|r| on_page.contains(r.source.as_str()) && on_page.contains(r.target.as_str()))
            .cloned()
            .collect();

        GraphPage {
            nodes,
            edges,
            total,
            offset: query.offset,
            limit: query.limit,
        }
    }

    /// Breadth-first traversal ignoring edge direction
    ///
    /// Returns the start entity at distance 0 followed by every entity within
    /// `max_hops` (unbounded when `None`), in discovery order.
    pub fn get_connected_entities(
        &self,
        entity_id: &str,
        max_hops: Option<usize>,
    ) -> Result<Vec<ConnectedEntity>> {
        let start = self
            .get_entity(entity_id)
            .ok_or_else(|| Error::entity_not_found(entity_id))?;
        let max_hops = max_hops.unwrap_or(usize::MAX);

        let mut visited: HashSet<&str> = HashSet::new();
        let mut queue: VecDeque<(&str, usize)> = VecDeque::new();
        let mut found = vec![ConnectedEntity {
            entity: start.clone(),
            distance: 0,
        }];
        visited.insert(start.id.as_str());
        queue.push_back((start.id.as_str(), 0));

        while let Some((current, distance)) = queue.pop_front() {
            if distance >= max_hops {
                continue;
            }
            for relationship in self.incident_relationships(current) {
                let Some(next) = relationship.other_end(current) else {
                    continue;
                };
                if !visited.insert(next) {
                    continue;
                }
                if let Some(entity) = self.get_entity(next) {
                    found.push(ConnectedEntity {
                        entity: entity.clone(),
                        distance: distance + 1,
                    });
                    queue.push_back((entity.id.as_str(), distance + 1));
                }
            }
        }

        Ok(found)
    }

    /// Shortest path by hop count, ignoring edge direction
    ///
    /// Ties go to the relationship inserted first among those examined.
    pub fn find_path(&self, source_id: &str, target_id: &str) -> Result<GraphPath> {
        let source = self
            .get_entity(source_id)
            .ok_or_else(|| Error::entity_not_found(source_id))?;
        let target = self
            .get_entity(target_id)
            .ok_or_else(|| Error::entity_not_found(target_id))?;

        if source.id == target.id {
            return Ok(GraphPath {
                entity_ids: vec![source.id.clone()],
                relationship_ids: Vec::new(),
            });
        }

        // child -> (parent, relationship id)
        let mut parents: HashMap<&str, (&str, &str)> = HashMap::new();
        let mut visited: HashSet<&str> = HashSet::new();
        let mut queue: VecDeque<&str> = VecDeque::new();
        visited.insert(source.id.as_str());
        queue.push_back(source.id.as_str());

        'search: while let Some(current) = queue.pop_front() {
            for relationship in self.incident_relationships(current) {
                let Some(next) = relationship.other_end(current) else {
                    continue;
                };
                if !visited.insert(next) {
                    continue;
                }
                parents.insert(next, (current, relationship.id.as_str()));
                if next == target.id {
                    break 'search;
                }
                queue.push_back(next);
            }
        }

        if !parents.contains_key(target.id.as_str()) {
            return Err(Error::PathNotFound(source.id.clone(), target.id.clone()));
        }

        let mut entity_ids = vec![target.id.clone()];
        let mut relationship_ids = Vec::new();
        let mut cursor = target.id.as_str();
        while let Some(&(parent, relationship_id)) = parents.get(cursor) {
            relationship_ids.push(relationship_id.to_string());
            entity_ids.push(parent.to_string());
            cursor = parent;
        }
        entity_ids.reverse();
        relationship_ids.reverse();

        Ok(GraphPath {
            entity_ids,
            relationship_ids,
        })
    }

    /// Top `top_k` entities by degree-weighted centrality
    pub fn get_central_entities(&self, top_k: usize) -> Vec<RankedEntity> {
        analytics::central_entities(self, CentralityMeasure::Degree, top_k)
    }

    /// Top `top_k` entities by the chosen centrality measure
    pub fn get_central_entities_by(
        &self,
        top_k: usize,
        measure: CentralityMeasure,
    ) -> Vec<RankedEntity> {
        analytics::central_entities(self, measure, top_k)
    }

    /// Partition entities into communities with the graph's seed
    pub fn get_communities(&self) -> CommunityDetection {
        community::detect_communities(self, self.community_seed)
    }

    // ========== Serialization ==========

    /// Encode the full graph as a document
    pub fn to_serializable(&self) -> GraphDocument {
        GraphDocument {
            metadata: self.metadata.clone(),
            nodes: self.entities().cloned().collect(),
            edges: self.relationships().cloned().collect(),
        }
    }

    /// Decode a document, preserving ids, order and metadata
    pub fn from_serializable(doc: GraphDocument) -> Result<Self> {
        let mut graph = Self::new(doc.metadata.project_id.clone());

        for entity in doc.nodes {
            if graph.entity_slots.contains_key(&entity.id) {
                return Err(Error::Validation(format!(
                    "duplicate entity id '{}' in document",
                    entity.id
                )));
            }
            graph.insert_entity_raw(entity);
        }
        for relationship in doc.edges {
            if graph.relationship_slots.contains_key(&relationship.id) {
                return Err(Error::Validation(format!(
                    "duplicate relationship id '{}' in document",
                    relationship.id
                )));
            }
            for endpoint in [&relationship.source, &relationship.target] {
                if !graph.entity_slots.contains_key(endpoint.as_str()) {
                    return Err(Error::Reference(format!(
                        "relationship '{}' points at missing entity '{}'",
                        relationship.id, endpoint
                    )));
                }
            }
            graph.insert_relationship_raw(relationship);
        }

        graph.metadata = doc.metadata;
        graph.metadata.entity_count = graph.entity_count();
        graph.metadata.relationship_count = graph.relationship_count();
        Ok(graph)
    }

    // ========== Internals ==========

    fn insert_entity_raw(&mut self, entity: Entity) {
        let slot = self.entities.len();
        self.entity_slots.insert(entity.id.clone(), slot);
        self.identity
            .entry(self.resolver.key(&entity))
            .or_insert_with(|| entity.id.clone());
        self.names
            .entry(entity.normalized_name())
            .or_default()
            .push(entity.id.clone());
        self.incident.entry(entity.id.clone()).or_default();
        self.entities.push(Some(entity));
    }

    fn insert_relationship_raw(&mut self, relationship: Relationship) {
        let slot = self.relationships.len();
        self.relationship_slots.insert(relationship.id.clone(), slot);
        self.incident
            .entry(relationship.source.clone())
            .or_default()
            .push(slot);
        if !relationship.is_self_loop() {
            self.incident
                .entry(relationship.target.clone())
                .or_default()
                .push(slot);
        }
        self.relationships.push(Some(relationship));
    }

    fn unindex_name(&mut self, normalized: &str, id: &str) {
        if let Some(ids) = self.names.get_mut(normalized) {
            ids.retain(|existing| existing != id);
            if ids.is_empty() {
                self.names.remove(normalized);
            }
        }
    }

    fn touch(&mut self) {
        self.metadata.entity_count = self.entity_count();
        self.metadata.relationship_count = self.relationship_count();
        self.metadata.last_updated = Utc::now();
        self.metadata.revision += 1;
    }

    fn maybe_compact(&mut self) {
        let dead_entities = self.entities.len() - self.entity_slots.len();
        let dead_relationships = self.relationships.len() - self.relationship_slots.len();
        let dead = dead_entities + dead_relationships;
        if dead < COMPACT_THRESHOLD || dead * 2 < self.entities.len() + self.relationships.len() {
            return;
        }

        let entities: Vec<Entity> = self.entities.drain(..).flatten().collect();
        let relationships: Vec<Relationship> = self.relationships.drain(..).flatten().collect();
        self.entity_slots.clear();
        self.identity.clear();
        self.names.clear();
        self.relationship_slots.clear();
        self.incident.clear();
        for entity in entities {
            self.insert_entity_raw(entity);
        }
        for relationship in relationships {
            self.insert_relationship_raw(relationship);
        }
        debug!(project_id = %self.project_id(), reclaimed = dead, "Compacted graph slots");
    }
}

/// Importance formula shared by views and centrality
pub fn importance_score(mention_count: u64, in_degree: usize, out_degree: usize) -> f64 {
    (1.0 + mention_count as f64).ln() + 0.5 * in_degree as f64 + 0.5 * out_degree as f64
}
