//! Export formats
//!
//! - **Interchange**: node-link JSON that general graph tools read, with a
//!   matching importer
//! - **Narrative markdown**: a readable digest grouped by entity type
//! - **Raw document**: the persisted `{metadata, nodes, edges}` JSON

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::info;

use super::{Caller, LoregraphService};
use crate::config::GraphConfig;
use crate::domain::events::GraphEvent;
use crate::domain::graph::{
    AppliedBatch, Entity, EntityType, GraphMetadata, KnowledgeGraph, Properties, Relationship,
    statistics,
};
use crate::error::{Error, Result};

/// Export format selector
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExportFormat {
    #[default]
    Interchange,
    NarrativeMarkdown,
    RawDocument,
}

impl ExportFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Interchange => "interchange",
            Self::NarrativeMarkdown => "narrative_markdown",
            Self::RawDocument => "raw_document",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "interchange" | "json" | "node_link" => Some(Self::Interchange),
            "narrative_markdown" | "markdown" | "md" => Some(Self::NarrativeMarkdown),
            "raw_document" | "raw" | "document" => Some(Self::RawDocument),
            _ => None,
        }
    }

    /// Conventional file extension
    pub fn extension(&self) -> &'static str {
        match self {
            Self::NarrativeMarkdown => "md",
            Self::Interchange | Self::RawDocument => "json",
        }
    }
}

impl std::fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Node-link graph
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InterchangeGraph {
    pub directed: bool,
    pub multigraph: bool,
    pub graph: GraphMetadata,
    pub nodes: Vec<InterchangeNode>,
    pub links: Vec<InterchangeLink>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InterchangeNode {
    pub id: String,
    pub label: String,
    #[serde(rename = "type")]
    pub entity_type: EntityType,
    #[serde(default)]
    pub mention_count: u64,
    /// Derived; ignored on import
    #[serde(default)]
    pub importance: f64,
    #[serde(default)]
    pub source_scenes: Vec<String>,
    #[serde(default)]
    pub properties: Properties,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InterchangeLink {
    pub source: String,
    pub target: String,
    /// Relationship id, distinguishing parallel edges
    pub key: String,
    #[serde(rename = "type")]
    pub relationship_type: String,
    #[serde(default)]
    pub mention_count: u64,
    /// Derived; ignored on import
    #[serde(default)]
    pub weight: f64,
    #[serde(default)]
    pub source_scenes: Vec<String>,
    #[serde(default)]
    pub properties: Properties,
}

/// Encode a graph as node-link JSON
pub fn to_interchange(graph: &KnowledgeGraph) -> InterchangeGraph {
    let nodes = graph
        .entities()
        .map(|entity| InterchangeNode {
            id: entity.id.clone(),
            label: entity.name.clone(),
            entity_type: entity.entity_type,
            mention_count: entity.mention_count,
            importance: graph.importance(&entity.id),
            source_scenes: entity.source_scenes.clone(),
            properties: entity.properties.clone(),
        })
        .collect();
    let links = graph
        .relationships()
        .map(|rel| InterchangeLink {
            source: rel.source.clone(),
            target: rel.target.clone(),
            key: rel.id.clone(),
            relationship_type: rel.relationship_type.clone(),
            mention_count: rel.mention_count,
            weight: rel.weight(),
            source_scenes: rel.source_scenes.clone(),
            properties: rel.properties.clone(),
        })
        .collect();

    InterchangeGraph {
        directed: true,
        multigraph: true,
        graph: graph.metadata().clone(),
        nodes,
        links,
    }
}

/// Build a fresh graph from node-link JSON
pub fn import_interchange(
    project_id: &str,
    interchange: &InterchangeGraph,
    config: &GraphConfig,
) -> Result<KnowledgeGraph> {
    let mut graph = KnowledgeGraph::new(project_id).with_config(config);
    import_into(&mut graph, interchange)?;
    Ok(graph)
}

/// Add node-link JSON to an existing graph
///
/// Nodes go through the normal merge rule, so a node matching an existing
/// entity folds into it. Links are re-pointed at the surviving ids. Any
/// error leaves `graph` partially updated; callers stage on a copy.
fn import_into(graph: &mut KnowledgeGraph, interchange: &InterchangeGraph) -> Result<AppliedBatch> {
    let mut applied = AppliedBatch::default();
    let mut ids: HashMap<&str, String> = HashMap::with_capacity(interchange.nodes.len());

    for node in &interchange.nodes {
        let mut entity = Entity::new(&node.label, node.entity_type)
            .with_id(&node.id)
            .with_mentions(node.mention_count);
        entity.properties = node.properties.clone();
        for scene in &node.source_scenes {
            entity.add_source_scene(scene);
        }

        let inserted = graph.add_entity(entity)?;
        if inserted.merged {
            applied.merged_entities.push(inserted.id.clone());
        } else {
            applied.created_entities.push(inserted.id.clone());
        }
        ids.insert(node.id.as_str(), inserted.id);
    }

    for link in &interchange.links {
        let endpoint = |raw: &str| {
            ids.get(raw).cloned().ok_or_else(|| {
                Error::Reference(format!("link '{}' points at unknown node '{}'", link.key, raw))
            })
        };
        let mut relationship =
            Relationship::new(endpoint(&link.source)?, endpoint(&link.target)?, &link.relationship_type)
                .with_mentions(link.mention_count.max(1));
        if graph.get_relationship(&link.key).is_none() && !link.key.trim().is_empty() {
            relationship = relationship.with_id(&link.key);
        }
        relationship.properties = link.properties.clone();
        relationship.source_scenes = link.source_scenes.clone();

        applied.relationships.push(graph.add_relationship(relationship)?);
    }

    Ok(applied)
}

fn section_title(entity_type: EntityType) -> &'static str {
    match entity_type {
        EntityType::Character => "Characters",
        EntityType::Location => "Locations",
        EntityType::Object => "Objects",
        EntityType::Concept => "Concepts",
        EntityType::Event => "Events",
        EntityType::Organization => "Organizations",
        EntityType::Theme => "Themes",
    }
}

fn render_value(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Human-readable digest of a graph
pub fn to_narrative_markdown(graph: &KnowledgeGraph) -> String {
    let stats = statistics(graph);
    let mut out = String::new();

    out.push_str(&format!("# Story Graph: {}\n\n", graph.project_id()));
    out.push_str(&format!("- Entities: {}\n", stats.entity_count));
    out.push_str(&format!("- Relationships: {}\n", stats.relationship_count));
    out.push_str(&format!(
        "- Connected components: {}\n",
        stats.connected_components
    ));
    out.push_str(&format!(
        "- Last updated: {}\n",
        stats.last_updated.format("%Y-%m-%d %H:%M:%S UTC")
    ));

    for &entity_type in EntityType::all() {
        let mut members: Vec<(&Entity, f64)> = graph
            .entities()
            .filter(|e| e.entity_type == entity_type)
            .map(|e| (e, graph.importance(&e.id)))
            .collect();
        if members.is_empty() {
            continue;
        }
        members.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.name.cmp(&b.0.name))
        });

        out.push_str(&format!("\n## {}\n", section_title(entity_type)));
        for (entity, importance) in members {
            out.push_str(&format!("\n### {}\n\n", entity.name));
            out.push_str(&format!(
                "_Mentions: {}, importance: {:.2}_\n\n",
                entity.mention_count, importance
            ));
            for (key, value) in &entity.properties {
                out.push_str(&format!("- **{}**: {}\n", key, render_value(value)));
            }
            if !entity.source_scenes.is_empty() {
                out.push_str(&format!("- **Scenes**: {}\n", entity.source_scenes.join(", ")));
            }

            let outgoing: Vec<String> = graph
                .outgoing(&entity.id)
                .filter_map(|rel| {
                    graph
                        .get_entity(&rel.target)
                        .map(|target| format!("  - {} {}", rel.relationship_type, target.name))
                })
                .collect();
            if !outgoing.is_empty() {
                out.push_str("- **Relationships**:\n");
                for line in outgoing {
                    out.push_str(&line);
                    out.push('\n');
                }
            }
        }
    }

    out
}

impl LoregraphService {
    /// Render the project graph in `format`
    pub async fn export(&self, caller: &Caller, format: ExportFormat) -> Result<String> {
        let project_id = self.authorize(caller).await?;
        let handle = self.registry.load_existing(project_id).await?;
        let graph = handle.read().await;

        let rendered = match format {
            ExportFormat::Interchange => serde_json::to_string_pretty(&to_interchange(&graph))?,
            ExportFormat::NarrativeMarkdown => to_narrative_markdown(&graph),
            ExportFormat::RawDocument => graph.to_serializable().to_json()?,
        };
        Ok(rendered)
    }

    /// Merge node-link JSON into the project graph as one unit
    pub async fn import(
        &self,
        caller: &Caller,
        interchange: &InterchangeGraph,
    ) -> Result<AppliedBatch> {
        let project_id = self.authorize(caller).await?;
        let handle = self.registry.load_or_create(project_id).await?;

        let (applied, events) = {
            let mut graph = handle.write().await;
            let mut staged = graph.clone();
            let applied = import_into(&mut staged, interchange)?;
            *graph = staged;

            let mut events = Vec::new();
            for id in &applied.created_entities {
                if let Some(entity) = graph.get_entity(id) {
                    events.push(GraphEvent::entity_added(project_id, entity, None));
                }
            }
            for id in &applied.merged_entities {
                if let Some(entity) = graph.get_entity(id) {
                    events.push(GraphEvent::entity_updated(project_id, entity));
                }
            }
            for id in &applied.relationships {
                if let Some(rel) = graph.get_relationship(id) {
                    events.push(GraphEvent::relationship_added(project_id, rel, None));
                }
            }
            (applied, events)
        };

        info!(
            project_id = %project_id,
            created = applied.created_entities.len(),
            merged = applied.merged_entities.len(),
            relationships = applied.relationships.len(),
            "Imported interchange graph"
        );
        self.commit(project_id, events).await?;
        Ok(applied)
    }
}
