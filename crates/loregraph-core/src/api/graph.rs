//! Graph queries and mutations
//!
//! Reads take the project's read lock for the duration of one query.
//! Mutations take the write lock only for the in-memory change; persisting
//! and publishing happen after it is released.

use serde::{Deserialize, Serialize};
use tracing::info;

use super::{Caller, LoregraphService};
use crate::domain::events::GraphEvent;
use crate::domain::graph::{
    AttributeMatch, CentralityMeasure, CommunityDetection, ConnectedEntity, DeletedEntity, Entity,
    EntityFilter, EntityUpdate, EntityView, GraphPage, GraphPath, GraphQuery, GraphStats,
    KnowledgeGraph, RankedEntity, Relationship, attributes, statistics,
};
use crate::error::{Error, Result};

/// One entity with its relationships and neighbourhood
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityDetail {
    pub entity: EntityView,
    /// Incident relationships in insertion order
    pub relationships: Vec<Relationship>,
    /// Entities within the requested hop count, nearest first
    pub connected: Vec<ConnectedEntity>,
}

/// A shortest path with its entities and relationships resolved
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathView {
    pub path: GraphPath,
    pub entities: Vec<Entity>,
    pub relationships: Vec<Relationship>,
}

impl PathView {
    fn resolve(graph: &KnowledgeGraph, path: GraphPath) -> Self {
        let entities = path
            .entity_ids
            .iter()
            .filter_map(|id| graph.get_entity(id).cloned())
            .collect();
        let relationships = path
            .relationship_ids
            .iter()
            .filter_map(|id| graph.get_relationship(id).cloned())
            .collect();
        Self {
            path,
            entities,
            relationships,
        }
    }

    /// `Mickey -[located_in]-> Mars` style rendering
    pub fn describe(&self) -> String {
        let mut out = String::new();
        for (i, entity) in self.entities.iter().enumerate() {
            if i > 0 {
                let rel = &self.relationships[i - 1];
                let previous = &self.entities[i - 1].id;
                if rel.source == *previous {
                    out.push_str(&format!(" -[{}]-> ", rel.relationship_type));
                } else {
                    out.push_str(&format!(" <-[{}]- ", rel.relationship_type));
                }
            }
            out.push_str(&entity.name);
        }
        out
    }
}

fn resolve_id(graph: &KnowledgeGraph, id_or_name: &str) -> Result<String> {
    graph
        .lookup(id_or_name)
        .map(|e| e.id.clone())
        .ok_or_else(|| Error::entity_not_found(id_or_name))
}

impl LoregraphService {
    // ========== Queries ==========

    /// One page of the graph, filtered by type, mentions and name
    pub async fn get_graph(&self, caller: &Caller, query: &GraphQuery) -> Result<GraphPage> {
        let project_id = self.authorize(caller).await?;
        let handle = self.registry.load_existing(project_id).await?;
        let graph = handle.read().await;
        Ok(graph.page(query))
    }

    /// Every entity matching `filter`, with derived metrics
    pub async fn query_entities(
        &self,
        caller: &Caller,
        filter: EntityFilter,
    ) -> Result<Vec<EntityView>> {
        let project_id = self.authorize(caller).await?;
        let handle = self.registry.load_existing(project_id).await?;
        let graph = handle.read().await;
        Ok(graph
            .query_entities(filter)
            .map(|entity| graph.view(entity))
            .collect())
    }

    /// An entity by id or name, plus everything within `max_hops`
    pub async fn get_entity(
        &self,
        caller: &Caller,
        id_or_name: &str,
        max_hops: usize,
    ) -> Result<EntityDetail> {
        let project_id = self.authorize(caller).await?;
        let handle = self.registry.load_existing(project_id).await?;
        let graph = handle.read().await;

        let id = resolve_id(&graph, id_or_name)?;
        let entity = graph
            .get_entity(&id)
            .ok_or_else(|| Error::entity_not_found(&id))?;
        let mut connected = graph.get_connected_entities(&id, Some(max_hops))?;
        connected.retain(|c| c.distance > 0);

        Ok(EntityDetail {
            entity: graph.view(entity),
            relationships: graph.incident_relationships(&id).cloned().collect(),
            connected,
        })
    }

    /// Shortest path between two entities, by id or name
    pub async fn find_path(&self, caller: &Caller, from: &str, to: &str) -> Result<PathView> {
        let project_id = self.authorize(caller).await?;
        let handle = self.registry.load_existing(project_id).await?;
        let graph = handle.read().await;

        let source = resolve_id(&graph, from)?;
        let target = resolve_id(&graph, to)?;
        let path = graph.find_path(&source, &target)?;
        Ok(PathView::resolve(&graph, path))
    }

    /// Top `top_k` entities by centrality
    pub async fn central_entities(
        &self,
        caller: &Caller,
        top_k: usize,
        measure: CentralityMeasure,
    ) -> Result<Vec<RankedEntity>> {
        let project_id = self.authorize(caller).await?;
        let handle = self.registry.load_existing(project_id).await?;
        let graph = handle.read().await;
        Ok(graph.get_central_entities_by(top_k, measure))
    }

    /// Community partition of the project graph
    pub async fn communities(&self, caller: &Caller) -> Result<CommunityDetection> {
        let project_id = self.authorize(caller).await?;
        let handle = self.registry.load_existing(project_id).await?;
        let graph = handle.read().await;
        Ok(graph.get_communities())
    }

    /// Aggregate statistics
    pub async fn stats(&self, caller: &Caller) -> Result<GraphStats> {
        let project_id = self.authorize(caller).await?;
        let handle = self.registry.load_existing(project_id).await?;
        let graph = handle.read().await;
        Ok(statistics(&graph))
    }

    /// Projects holding an entity with this name, limited to those the
    /// caller may read
    pub async fn search_by_name(&self, caller: &Caller, name: &str) -> Result<Vec<AttributeMatch>> {
        self.search(caller, attributes::NAME, name).await
    }

    /// Attribute index lookup across projects, limited to those the caller
    /// may read
    pub async fn search(
        &self,
        caller: &Caller,
        attribute: &str,
        value: &str,
    ) -> Result<Vec<AttributeMatch>> {
        let matches = self
            .registry
            .repository()
            .find_by_attribute(attribute, value)
            .await?;

        let mut visible = Vec::with_capacity(matches.len());
        for hit in matches {
            if self.access.authorize(caller, &hit.project_id).await.is_ok() {
                visible.push(hit);
            }
        }
        Ok(visible)
    }

    // ========== Mutations ==========

    /// Add one entity, merging with an existing one of the same identity
    pub async fn add_entity(&self, caller: &Caller, entity: Entity) -> Result<Entity> {
        let project_id = self.authorize(caller).await?;
        let handle = self.registry.load_or_create(project_id).await?;

        let (stored, event) = {
            let mut graph = handle.write().await;
            let inserted = graph.add_entity(entity)?;
            let stored = graph
                .get_entity(&inserted.id)
                .cloned()
                .ok_or_else(|| Error::entity_not_found(&inserted.id))?;
            let event = if inserted.merged {
                GraphEvent::entity_updated(project_id, &stored)
            } else {
                GraphEvent::entity_added(project_id, &stored, None)
            };
            (stored, event)
        };

        self.commit(project_id, vec![event]).await?;
        Ok(stored)
    }

    /// Add one relationship between existing entities
    pub async fn add_relationship(
        &self,
        caller: &Caller,
        relationship: Relationship,
    ) -> Result<Relationship> {
        let project_id = self.authorize(caller).await?;
        let handle = self.registry.load_or_create(project_id).await?;

        let stored = {
            let mut graph = handle.write().await;
            let id = graph.add_relationship(relationship)?;
            graph
                .get_relationship(&id)
                .cloned()
                .ok_or_else(|| Error::relationship_not_found(&id))?
        };

        self.commit(
            project_id,
            vec![GraphEvent::relationship_added(project_id, &stored, None)],
        )
        .await?;
        Ok(stored)
    }

    /// Edit an entity's name, type or properties; its id never changes
    pub async fn update_entity(
        &self,
        caller: &Caller,
        entity_id: &str,
        update: EntityUpdate,
    ) -> Result<Entity> {
        let project_id = self.authorize(caller).await?;
        let handle = self.registry.load_existing(project_id).await?;

        let updated = {
            let mut graph = handle.write().await;
            graph.update_entity(entity_id, update)?
        };
        info!(project_id = %project_id, entity_id = %entity_id, "Entity updated");

        self.commit(
            project_id,
            vec![GraphEvent::entity_updated(project_id, &updated)],
        )
        .await?;
        Ok(updated)
    }

    /// Delete an entity and every relationship touching it
    pub async fn delete_entity(&self, caller: &Caller, entity_id: &str) -> Result<DeletedEntity> {
        let project_id = self.authorize(caller).await?;
        let handle = self.registry.load_existing(project_id).await?;

        let deleted = {
            let mut graph = handle.write().await;
            graph.delete_entity(entity_id)?
        };
        info!(
            project_id = %project_id,
            entity_id = %entity_id,
            relationships = deleted.relationships.len(),
            "Entity deleted"
        );

        let mut events: Vec<GraphEvent> = deleted
            .relationships
            .iter()
            .map(|r| GraphEvent::relationship_deleted(project_id, &r.id))
            .collect();
        events.push(GraphEvent::entity_deleted(
            project_id,
            &deleted.entity.id,
            deleted.relationships.iter().map(|r| r.id.clone()).collect(),
        ));

        self.commit(project_id, events).await?;
        Ok(deleted)
    }

    /// Delete one relationship
    pub async fn delete_relationship(
        &self,
        caller: &Caller,
        relationship_id: &str,
    ) -> Result<Relationship> {
        let project_id = self.authorize(caller).await?;
        let handle = self.registry.load_existing(project_id).await?;

        let removed = {
            let mut graph = handle.write().await;
            graph.delete_relationship(relationship_id)?
        };
        info!(project_id = %project_id, relationship_id = %relationship_id, "Relationship deleted");

        self.commit(
            project_id,
            vec![GraphEvent::relationship_deleted(project_id, &removed.id)],
        )
        .await?;
        Ok(removed)
    }
}
