//! Graph analytics: centrality ranking and aggregate statistics
//!
//! All metrics are computed on demand from the raw counts held by the
//! store. Nothing here is persisted.
//!
//! - [`CentralityMeasure::Degree`]: weighted degree normalised by `n - 1`,
//!   blended evenly with normalised importance
//! - [`CentralityMeasure::Eigenvector`]: power iteration over the undirected
//!   weighted projection

use std::collections::{BTreeMap, HashMap, VecDeque};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::entity::EntityType;
use super::store::{EntityView, KnowledgeGraph};

const POWER_ITERATIONS: usize = 100;
const POWER_TOLERANCE: f64 = 1e-9;
const MOST_MENTIONED: usize = 5;

/// Centrality algorithm selector
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CentralityMeasure {
    #[default]
    Degree,
    Eigenvector,
}

impl CentralityMeasure {
    /// Get the string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Degree => "degree",
            Self::Eigenvector => "eigenvector",
        }
    }

    /// Parse from string
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "degree" => Some(Self::Degree),
            "eigenvector" | "eigen" => Some(Self::Eigenvector),
            _ => None,
        }
    }
}

/// An entity with its centrality score
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RankedEntity {
    pub entity: EntityView,
    pub score: f64,
}

/// Undirected weighted projection of a project graph
///
/// Parallel edges are summed; self-loops are dropped.
#[derive(Debug, Clone)]
pub struct WeightedAdjacency {
    pub ids: Vec<String>,
    pub neighbors: Vec<Vec<(usize, f64)>>,
}

impl WeightedAdjacency {
    /// Build from a graph, nodes in insertion order
    pub fn from_graph(graph: &KnowledgeGraph) -> Self {
        let ids: Vec<String> = graph.entities().map(|e| e.id.clone()).collect();
        let index: HashMap<&str, usize> = ids
            .iter()
            .enumerate()
            .map(|(i, id)| (id.as_str(), i))
            .collect();

        let mut sums: Vec<BTreeMap<usize, f64>> = vec![BTreeMap::new(); ids.len()];
        for relationship in graph.relationships() {
            if relationship.is_self_loop() {
                continue;
            }
            let (Some(&a), Some(&b)) = (
                index.get(relationship.source.as_str()),
                index.get(relationship.target.as_str()),
            ) else {
                continue;
            };
            let weight = relationship.weight();
            *sums[a].entry(b).or_default() += weight;
            *sums[b].entry(a).or_default() += weight;
        }

        let neighbors = sums.into_iter().map(|m| m.into_iter().collect()).collect();
        Self { ids, neighbors }
    }

    /// Number of nodes
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    /// True when there are no nodes
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Weighted degree of every node
    pub fn strengths(&self) -> Vec<f64> {
        self.neighbors
            .iter()
            .map(|n| n.iter().map(|(_, w)| w).sum())
            .collect()
    }

    /// Connected components as lists of node indices
    pub fn components(&self) -> Vec<Vec<usize>> {
        let mut seen = vec![false; self.len()];
        let mut components = Vec::new();
        for start in 0..self.len() {
            if seen[start] {
                continue;
            }
            seen[start] = true;
            let mut component = vec![start];
            let mut queue = VecDeque::from([start]);
            while let Some(node) = queue.pop_front() {
                for &(next, _) in &self.neighbors[node] {
                    if !seen[next] {
                        seen[next] = true;
                        component.push(next);
                        queue.push_back(next);
                    }
                }
            }
            components.push(component);
        }
        components
    }
}

/// Score every entity with `measure`
pub fn centrality(graph: &KnowledgeGraph, measure: CentralityMeasure) -> Vec<(String, f64)> {
    let adjacency = WeightedAdjacency::from_graph(graph);
    let scores = match measure {
        CentralityMeasure::Degree => degree_scores(graph, &adjacency),
        CentralityMeasure::Eigenvector => eigenvector_scores(&adjacency),
    };
    adjacency.ids.into_iter().zip(scores).collect()
}

/// Top `top_k` entities by `measure`, ties broken by id
pub fn central_entities(
    graph: &KnowledgeGraph,
    measure: CentralityMeasure,
    top_k: usize,
) -> Vec<RankedEntity> {
    let mut scored = centrality(graph, measure);
    scored.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0)));

    scored
        .into_iter()
        .take(top_k)
        .filter_map(|(id, score)| {
            graph.get_entity(&id).map(|entity| RankedEntity {
                entity: graph.view(entity),
                score,
            })
        })
        .collect()
}

fn degree_scores(graph: &KnowledgeGraph, adjacency: &WeightedAdjacency) -> Vec<f64> {
    let n = adjacency.len();
    if n == 0 {
        return Vec::new();
    }
    let denominator = (n.saturating_sub(1)).max(1) as f64;
    let importance: Vec<f64> = adjacency
        .ids
        .iter()
        .map(|id| graph.importance(id))
        .collect();
    let max_importance = importance.iter().cloned().fold(0.0_f64, f64::max);

    adjacency
        .strengths()
        .into_iter()
        .zip(importance)
        .map(|(strength, importance)| {
            let share = if max_importance > 0.0 {
                importance / max_importance
            } else {
                0.0
            };
            0.5 * (strength / denominator) + 0.5 * share
        })
        .collect()
}

fn eigenvector_scores(adjacency: &WeightedAdjacency) -> Vec<f64> {
    let n = adjacency.len();
    if n == 0 {
        return Vec::new();
    }

    let mut scores = vec![1.0 / (n as f64).sqrt(); n];
    for _ in 0..POWER_ITERATIONS {
        // Shift by the identity so bipartite graphs converge
        let mut next = scores.clone();
        for (node, neighbors) in adjacency.neighbors.iter().enumerate() {
            for &(other, weight) in neighbors {
                next[node] += weight * scores[other];
            }
        }
        let norm = next.iter().map(|v| v * v).sum::<f64>().sqrt();
        if norm == 0.0 {
            break;
        }
        next.iter_mut().for_each(|v| *v /= norm);

        let delta: f64 = next
            .iter()
            .zip(&scores)
            .map(|(a, b)| (a - b).abs())
            .sum();
        scores = next;
        if delta < POWER_TOLERANCE {
            break;
        }
    }
    scores
}

/// Summary of one frequently mentioned entity
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MentionSummary {
    pub id: String,
    pub name: String,
    pub entity_type: EntityType,
    pub mention_count: u64,
}

/// Aggregate statistics for one project graph
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphStats {
    pub project_id: String,
    pub entity_count: usize,
    pub relationship_count: usize,
    pub entities_by_type: BTreeMap<String, usize>,
    pub relationships_by_type: BTreeMap<String, usize>,
    /// Mean number of incident relationships per entity
    pub average_degree: f64,
    /// Relationships over ordered entity pairs
    pub density: f64,
    pub connected_components: usize,
    pub most_mentioned: Vec<MentionSummary>,
    pub last_updated: DateTime<Utc>,
}

/// Compute statistics for a graph
pub fn statistics(graph: &KnowledgeGraph) -> GraphStats {
    let n = graph.entity_count();
    let m = graph.relationship_count();

    let mut entities_by_type = BTreeMap::new();
    for entity in graph.entities() {
        *entities_by_type
            .entry(entity.entity_type.as_str().to_string())
            .or_insert(0) += 1;
    }
    let mut relationships_by_type = BTreeMap::new();
    for relationship in graph.relationships() {
        *relationships_by_type
            .entry(relationship.relationship_type.clone())
            .or_insert(0) += 1;
    }

    let mut by_mentions: Vec<_> = graph.entities().collect();
    by_mentions.sort_by(|a, b| {
        b.mention_count
            .cmp(&a.mention_count)
            .then_with(|| a.name.cmp(&b.name))
    });
    let most_mentioned = by_mentions
        .into_iter()
        .take(MOST_MENTIONED)
        .map(|e| MentionSummary {
            id: e.id.clone(),
            name: e.name.clone(),
            entity_type: e.entity_type,
            mention_count: e.mention_count,
        })
        .collect();

    GraphStats {
        project_id: graph.project_id().to_string(),
        entity_count: n,
        relationship_count: m,
        entities_by_type,
        relationships_by_type,
        average_degree: if n == 0 { 0.0 } else { 2.0 * m as f64 / n as f64 },
        density: if n < 2 {
            0.0
        } else {
            m as f64 / (n as f64 * (n as f64 - 1.0))
        },
        connected_components: WeightedAdjacency::from_graph(graph).components().len(),
        most_mentioned,
        last_updated: graph.metadata().last_updated,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::graph::{Entity, Relationship};

    fn star() -> KnowledgeGraph {
        let mut graph = KnowledgeGraph::new("p");
        for (id, name) in [("hub", "Hub"), ("a", "A"), ("b", "B"), ("c", "C"), ("x", "X")] {
            graph
                .add_entity(Entity::new(name, EntityType::Character).with_id(id))
                .unwrap();
        }
        for leaf in ["a", "b", "c"] {
            graph
                .add_relationship(Relationship::new("hub", leaf, "knows"))
                .unwrap();
        }
        graph
    }

    #[test]
    fn test_degree_centrality_ranks_hub_first() {
        let graph = star();
        let top = central_entities(&graph, CentralityMeasure::Degree, 2);
        assert_eq!(top.len(), 2);
        assert_eq!(top[0].entity.entity.id, "hub");
        assert!(top[0].score > top[1].score);
    }

    #[test]
    fn test_eigenvector_centrality_ranks_hub_first() {
        let graph = star();
        let top = central_entities(&graph, CentralityMeasure::Eigenvector, 5);
        assert_eq!(top[0].entity.entity.id, "hub");
        // Leaves tie and are ordered by id
        assert_eq!(top[1].entity.entity.id, "a");
        assert_eq!(top[2].entity.entity.id, "b");
        assert_eq!(top[4].entity.entity.id, "x");
    }

    #[test]
    fn test_centrality_on_empty_graph() {
        let graph = KnowledgeGraph::new("empty");
        assert!(central_entities(&graph, CentralityMeasure::Degree, 3).is_empty());
        assert!(central_entities(&graph, CentralityMeasure::Eigenvector, 3).is_empty());
    }

    #[test]
    fn test_statistics() {
        let mut graph = star();
        graph
            .add_entity(Entity::new("hub", EntityType::Character).with_mentions(4))
            .unwrap();

        let stats = statistics(&graph);
        assert_eq!(stats.entity_count, 5);
        assert_eq!(stats.relationship_count, 3);
        assert_eq!(stats.entities_by_type["character"], 5);
        assert_eq!(stats.relationships_by_type["knows"], 3);
        assert_eq!(stats.connected_components, 2);
        assert!((stats.average_degree - 1.2).abs() < 1e-9);
        assert!((stats.density - 0.15).abs() < 1e-9);
        assert_eq!(stats.most_mentioned[0].id, "hub");
        assert_eq!(stats.most_mentioned[0].mention_count, 5);
    }

    #[test]
    fn test_measure_parse() {
        assert_eq!(CentralityMeasure::parse("Degree"), Some(CentralityMeasure::Degree));
        assert_eq!(CentralityMeasure::parse("eigen"), Some(CentralityMeasure::Eigenvector));
        assert_eq!(CentralityMeasure::parse("pagerank"), None);
    }
}
