//! Community detection by modularity maximisation
//!
//! Louvain-style local moving over the undirected weighted projection of the
//! graph, followed by a refinement step that splits any community whose
//! members are not connected to each other.
//!
//! ## Modularity
//!
//! Q = Σc [ in_c / 2m - (tot_c / 2m)² ]
//!
//! Where:
//! - in_c = twice the weight of edges inside community c
//! - tot_c = sum of weighted degrees of members of c
//! - m = total edge weight
//!
//! Node visiting order is shuffled with a seeded RNG, so results are stable
//! for a fixed seed and may differ between seeds when gains tie.

use std::collections::{BTreeMap, HashMap, VecDeque};

use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};

use super::analytics::WeightedAdjacency;
use super::store::KnowledgeGraph;

const MAX_PASSES: usize = 100;
const MIN_GAIN: f64 = 1e-12;
const LABEL_MEMBERS: usize = 3;

/// A cluster of densely connected entities
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Community {
    /// Zero-based id, largest community first
    pub id: usize,
    /// Member entity ids
    pub members: Vec<String>,
    pub size: usize,
    /// Names of the most important members
    pub label: String,
}

/// Partition of a graph into communities
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommunityDetection {
    pub communities: Vec<Community>,
    pub modularity: f64,
    pub seed: u64,
}

impl CommunityDetection {
    /// Community containing `entity_id`
    pub fn community_of(&self, entity_id: &str) -> Option<&Community> {
        self.communities
            .iter()
            .find(|c| c.members.iter().any(|m| m == entity_id))
    }
}

/// Partition `graph` using `seed` for the visiting order
pub fn detect_communities(graph: &KnowledgeGraph, seed: u64) -> CommunityDetection {
    let adjacency = WeightedAdjacency::from_graph(graph);
    let assignment = assign(&adjacency, seed);
    let modularity = modularity(&adjacency, &assignment);

    let mut groups: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
    for (node, &community) in assignment.iter().enumerate() {
        groups.entry(community).or_default().push(node);
    }

    let mut communities: Vec<Community> = groups
        .into_values()
        .map(|nodes| {
            let mut members: Vec<String> =
                nodes.iter().map(|&i| adjacency.ids[i].clone()).collect();
            members.sort();

            let mut by_importance: Vec<(&str, f64)> = members
                .iter()
                .map(|id| (id.as_str(), graph.importance(id)))
                .collect();
            by_importance.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(b.0)));
            let label = by_importance
                .iter()
                .take(LABEL_MEMBERS)
                .filter_map(|(id, _)| graph.get_entity(id).map(|e| e.name.clone()))
                .collect::<Vec<_>>()
                .join(", ");

            Community {
                id: 0,
                size: members.len(),
                members,
                label,
            }
        })
        .collect();

    communities.sort_by(|a, b| b.size.cmp(&a.size).then_with(|| a.members.cmp(&b.members)));
    for (id, community) in communities.iter_mut().enumerate() {
        community.id = id;
    }

    CommunityDetection {
        communities,
        modularity,
        seed,
    }
}

/// Community index per node
fn assign(adjacency: &WeightedAdjacency, seed: u64) -> Vec<usize> {
    let n = adjacency.len();
    let mut communities: Vec<usize> = (0..n).collect();
    let strengths = adjacency.strengths();
    let two_m: f64 = strengths.iter().sum();
    if n == 0 || two_m == 0.0 {
        return communities;
    }

    let mut totals = strengths.clone();
    let mut rng = StdRng::seed_from_u64(seed);
    let mut order: Vec<usize> = (0..n).collect();

    for _pass in 0..MAX_PASSES {
        order.shuffle(&mut rng);
        let mut improved = false;

        for &node in &order {
            let current = communities[node];
            let k = strengths[node];

            let mut links: BTreeMap<usize, f64> = BTreeMap::new();
            for &(other, weight) in &adjacency.neighbors[node] {
                *links.entry(communities[other]).or_default() += weight;
            }

            // Take the node out, then find the best place to put it back
            totals[current] -= k;
            let gain = |community: usize, weight: f64| weight - totals[community] * k / two_m;
            let mut best = current;
            let mut best_gain = gain(current, links.get(&current).copied().unwrap_or(0.0));
            for (&community, &weight) in &links {
                let candidate = gain(community, weight);
                if candidate > best_gain + MIN_GAIN {
                    best = community;
                    best_gain = candidate;
                }
            }
            totals[best] += k;

            if best != current {
                communities[node] = best;
                improved = true;
            }
        }

        if !improved {
            break;
        }
    }

    refine(adjacency, &mut communities);
    renumber(&communities)
}

/// Split communities whose members are not internally connected
fn refine(adjacency: &WeightedAdjacency, communities: &mut [usize]) {
    let n = communities.len();
    let mut next_id = n;
    let mut seen = vec![false; n];

    for start in 0..n {
        if seen[start] {
            continue;
        }
        let community = communities[start];
        let mut component = vec![start];
        let mut queue = VecDeque::from([start]);
        seen[start] = true;
        while let Some(node) = queue.pop_front() {
            for &(other, _) in &adjacency.neighbors[node] {
                if !seen[other] && communities[other] == community {
                    seen[other] = true;
                    component.push(other);
                    queue.push_back(other);
                }
            }
        }

        let whole = communities.iter().filter(|&&c| c == community).count();
        if component.len() < whole {
            for node in component {
                communities[node] = next_id;
            }
            next_id += 1;
        }
    }
}

/// Map community ids onto 0..k in first-seen order
fn renumber(communities: &[usize]) -> Vec<usize> {
    let mut mapping: HashMap<usize, usize> = HashMap::new();
    communities
        .iter()
        .map(|&c| {
            let next = mapping.len();
            *mapping.entry(c).or_insert(next)
        })
        .collect()
}

/// Modularity of an assignment
fn modularity(adjacency: &WeightedAdjacency, communities: &[usize]) -> f64 {
    let strengths = adjacency.strengths();
    let two_m: f64 = strengths.iter().sum();
    if two_m == 0.0 {
        return 0.0;
    }

    let mut inside: HashMap<usize, f64> = HashMap::new();
    let mut totals: HashMap<usize, f64> = HashMap::new();
    for (node, neighbors) in adjacency.neighbors.iter().enumerate() {
        let community = communities[node];
        *totals.entry(community).or_default() += strengths[node];
        for &(other, weight) in neighbors {
            if communities[other] == community {
                *inside.entry(community).or_default() += weight;
            }
        }
    }

    totals
        .iter()
        .map(|(community, total)| {
            let internal = inside.get(community).copied().unwrap_or(0.0);
            internal / two_m - (total / two_m).powi(2)
        })
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::graph::{Entity, EntityType, Relationship};

    /// Two triangles joined by a single bridge edge
    fn barbell() -> KnowledgeGraph {
        let mut graph = KnowledgeGraph::new("p");
        for id in ["a1", "a2", "a3", "b1", "b2", "b3"] {
            graph
                .add_entity(Entity::new(id.to_uppercase(), EntityType::Character).with_id(id))
                .unwrap();
        }
        for (s, t) in [
            ("a1", "a2"),
            ("a2", "a3"),
            ("a3", "a1"),
            ("b1", "b2"),
            ("b2", "b3"),
            ("b3", "b1"),
            ("a1", "b1"),
        ] {
            graph.add_relationship(Relationship::new(s, t, "knows")).unwrap();
        }
        graph
    }

    #[test]
    fn test_barbell_splits_into_two_communities() {
        let graph = barbell();
        let detection = detect_communities(&graph, 42);

        assert_eq!(detection.communities.len(), 2);
        assert!(detection.modularity > 0.3);
        let a = detection.community_of("a2").unwrap();
        let b = detection.community_of("b2").unwrap();
        assert_ne!(a.id, b.id);
        assert_eq!(a.members, vec!["a1", "a2", "a3"]);
        assert_eq!(b.size, 3);
        assert!(a.label.contains("A1"));
    }

    #[test]
    fn test_same_seed_is_stable() {
        let graph = barbell();
        let first = detect_communities(&graph, 7);
        let second = detect_communities(&graph, 7);
        assert_eq!(first.communities, second.communities);
        assert_eq!(first.seed, 7);
    }

    #[test]
    fn test_isolated_entities_are_singletons() {
        let mut graph = KnowledgeGraph::new("p");
        graph
            .add_entity(Entity::new("Solo", EntityType::Theme))
            .unwrap();
        graph
            .add_entity(Entity::new("Alone", EntityType::Theme))
            .unwrap();

        let detection = detect_communities(&graph, 42);
        assert_eq!(detection.communities.len(), 2);
        assert!(detection.communities.iter().all(|c| c.size == 1));
        assert_eq!(detection.modularity, 0.0);
    }

    #[test]
    fn test_empty_graph() {
        let graph = KnowledgeGraph::new("p");
        let detection = detect_communities(&graph, 42);
        assert!(detection.communities.is_empty());
    }

    #[test]
    fn test_renumber_is_contiguous() {
        assert_eq!(renumber(&[7, 3, 7, 9]), vec![0, 1, 0, 2]);
    }
}
