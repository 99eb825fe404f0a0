//! Graph store tests

use serde_json::json;

use crate::config::GraphConfig;
use crate::domain::graph::{
    BatchRelationship, Entity, EntityFilter, EntityType, EntityUpdate, GraphBatch, GraphDocument,
    GraphQuery, KnowledgeGraph, Relationship, RelationshipTypePolicy,
};
use crate::error::Error;

fn character(name: &str) -> Entity {
    Entity::new(name, EntityType::Character)
}

/// a - b - c, d isolated
fn chain() -> KnowledgeGraph {
    let mut graph = KnowledgeGraph::new("chain");
    for id in ["a", "b", "c", "d"] {
        graph
            .add_entity(character(&id.to_uppercase()).with_id(id))
            .unwrap();
    }
    graph
        .add_relationship(Relationship::new("a", "b", "knows").with_id("ab"))
        .unwrap();
    graph
        .add_relationship(Relationship::new("c", "b", "knows").with_id("cb"))
        .unwrap();
    graph
}

mod merge {
    use super::*;

    #[test]
    fn test_same_name_and_type_merge_in_either_order() {
        for flip in [false, true] {
            let mut graph = KnowledgeGraph::new("p");
            let first = character("Mickey")
                .with_id("m1")
                .with_mentions(2)
                .with_source_scene("s1");
            let second = character("  mickey ")
                .with_id("m2")
                .with_mentions(3)
                .with_source_scene("s2")
                .with_source_scene("s1");
            let (x, y) = if flip { (second, first) } else { (first, second) };

            let a = graph.add_entity(x).unwrap();
            let b = graph.add_entity(y).unwrap();

            assert!(!a.merged);
            assert!(b.merged);
            assert_eq!(a.id, b.id);
            assert_eq!(graph.entity_count(), 1);

            let merged = graph.get_entity(&a.id).unwrap();
            assert_eq!(merged.mention_count, 5);
            let mut scenes = merged.source_scenes.clone();
            scenes.sort();
            assert_eq!(scenes, vec!["s1", "s2"]);
        }
    }

    #[test]
    fn test_merge_keeps_existing_id_and_new_properties_win() {
        let mut graph = KnowledgeGraph::new("p");
        graph
            .add_entity(
                character("Mickey")
                    .with_id("first")
                    .with_property("mood", json!("calm"))
                    .with_property("species", json!("mouse")),
            )
            .unwrap();
        graph
            .add_entity(
                character("MICKEY")
                    .with_id("second")
                    .with_property("mood", json!("angry")),
            )
            .unwrap();

        let entity = graph.get_entity("first").unwrap();
        assert_eq!(entity.properties["mood"], json!("angry"));
        assert_eq!(entity.properties["species"], json!("mouse"));
        assert!(graph.get_entity("second").is_none());
    }

    #[test]
    fn test_same_name_different_type_stays_separate() {
        let mut graph = KnowledgeGraph::new("p");
        graph.add_entity(character("Mars")).unwrap();
        graph
            .add_entity(Entity::new("Mars", EntityType::Location))
            .unwrap();
        assert_eq!(graph.entity_count(), 2);
        assert_eq!(graph.find_by_name("mars").len(), 2);
    }

    #[test]
    fn test_reused_id_for_different_entity_is_rejected() {
        let mut graph = KnowledgeGraph::new("p");
        graph.add_entity(character("Mickey").with_id("x")).unwrap();
        let err = graph.add_entity(character("Minnie").with_id("x")).unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }
}

mod relationships {
    use super::*;

    #[test]
    fn test_missing_endpoint_is_reference_error() {
        let mut graph = chain();
        let before = graph.revision();

        let err = graph
            .add_relationship(Relationship::new("a", "ghost", "knows"))
            .unwrap_err();
        assert!(matches!(err, Error::Reference(_)));
        let err = graph
            .add_relationship(Relationship::new("ghost", "a", "knows"))
            .unwrap_err();
        assert!(matches!(err, Error::Reference(_)));

        assert_eq!(graph.relationship_count(), 2);
        assert_eq!(graph.revision(), before);
    }

    #[test]
    fn test_parallel_edges_are_kept() {
        let mut graph = chain();
        graph
            .add_relationship(Relationship::new("a", "b", "knows"))
            .unwrap();
        graph
            .add_relationship(Relationship::new("a", "b", "conflicts_with"))
            .unwrap();
        assert_eq!(graph.out_degree("a"), 3);
        assert_eq!(graph.in_degree("b"), 4);
    }

    #[test]
    fn test_types_are_normalised_and_policy_enforced() {
        let mut graph = chain().with_relationship_policy(RelationshipTypePolicy::restricted([
            "knows",
            "located_in",
        ]));

        let id = graph
            .add_relationship(Relationship::new("a", "d", "Located In"))
            .unwrap();
        assert_eq!(graph.get_relationship(&id).unwrap().relationship_type, "located_in");

        let err = graph
            .add_relationship(Relationship::new("a", "d", "teleports_to"))
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[test]
    fn test_self_loop_is_allowed() {
        let mut graph = chain();
        graph
            .add_relationship(Relationship::new("a", "a", "conflicts_with"))
            .unwrap();
        assert_eq!(graph.in_degree("a"), 1);
        assert_eq!(graph.out_degree("a"), 2);
    }
}

mod batches {
    use super::*;

    fn proposed(source: &str, target: &str, kind: &str) -> BatchRelationship {
        BatchRelationship {
            source_name: source.to_string(),
            target_name: target.to_string(),
            relationship_type: kind.to_string(),
            properties: Default::default(),
            source_scene: Some("s9".to_string()),
        }
    }

    #[test]
    fn test_batch_resolves_names_against_batch_and_graph() {
        let mut graph = chain();
        let batch = GraphBatch {
            entities: vec![
                Entity::new("Mars", EntityType::Location),
                character("a").with_source_scene("s9"),
            ],
            relationships: vec![
                proposed("A", "Mars", "located_in"),
                proposed("D", "mars", "located_in"),
                proposed("Nobody", "Mars", "knows"),
            ],
        };

        let applied = graph.apply_batch(batch).unwrap();
        assert_eq!(applied.created_entities.len(), 1);
        assert_eq!(applied.merged_entities, vec!["a".to_string()]);
        assert_eq!(applied.relationships.len(), 2);
        assert_eq!(applied.skipped_relationships.len(), 1);

        let mars = graph.find_by_name("Mars")[0].id.clone();
        assert_eq!(graph.in_degree(&mars), 2);
        let rel = graph.get_relationship(&applied.relationships[0]).unwrap();
        assert_eq!(rel.source_scenes, vec!["s9"]);
    }

    #[test]
    fn test_invalid_entity_leaves_graph_untouched() {
        let mut graph = chain();
        let before = graph.to_serializable();

        let batch = GraphBatch {
            entities: vec![character("Fine"), character("   ")],
            relationships: vec![proposed("A", "Fine", "knows")],
        };
        assert!(graph.apply_batch(batch).is_err());
        assert_eq!(graph.to_serializable(), before);
    }
}

mod queries {
    use super::*;

    #[test]
    fn test_query_is_lazy_and_restartable() {
        let mut graph = chain();
        graph
            .add_entity(Entity::new("Mars", EntityType::Location).with_mentions(4))
            .unwrap();

        let mut query = graph.query_entities(EntityFilter::all().with_type(EntityType::Character));
        let first: Vec<String> = query.by_ref().map(|e| e.id.clone()).collect();
        assert_eq!(first, vec!["a", "b", "c", "d"]);
        assert!(query.next().is_none());

        query.restart();
        assert_eq!(query.count(), 4);

        let busy: Vec<_> = graph
            .query_entities(EntityFilter::all().with_min_mentions(2))
            .collect();
        assert_eq!(busy.len(), 1);
        assert_eq!(busy[0].name, "Mars");

        let named: Vec<_> = graph
            .query_entities(EntityFilter::all().with_name_containing("ar"))
            .collect();
        assert_eq!(named.len(), 1);
    }

    #[test]
    fn test_paging_returns_edges_among_page_nodes() {
        let graph = chain();

        let page = graph.page(&GraphQuery {
            filter: EntityFilter::all(),
            offset: 0,
            limit: Some(2),
        });
        assert_eq!(page.total, 4);
        assert_eq!(page.nodes.len(), 2);
        assert_eq!(page.edges.len(), 1);
        assert_eq!(page.edges[0].id, "ab");

        let rest = graph.page(&GraphQuery {
            filter: EntityFilter::all(),
            offset: 2,
            limit: None,
        });
        assert_eq!(rest.nodes.len(), 2);
        assert!(rest.edges.is_empty());
    }

    #[test]
    fn test_connected_entities_are_bounded_by_hops() {
        let graph = chain();

        let one = graph.get_connected_entities("a", Some(1)).unwrap();
        let ids: Vec<(&str, usize)> = one.iter().map(|c| (c.entity.id.as_str(), c.distance)).collect();
        assert_eq!(ids, vec![("a", 0), ("b", 1)]);

        let all = graph.get_connected_entities("a", None).unwrap();
        assert_eq!(all.len(), 3);
        assert_eq!(all.last().unwrap().entity.id, "c");
        assert_eq!(all.last().unwrap().distance, 2);

        assert!(graph.get_connected_entities("ghost", None).unwrap_err().is_not_found());
    }

    #[test]
    fn test_path_exists_iff_connected() {
        let graph = chain();
        let ids = ["a", "b", "c", "d"];

        for from in ids {
            let reachable: Vec<String> = graph
                .get_connected_entities(from, None)
                .unwrap()
                .into_iter()
                .map(|c| c.entity.id)
                .collect();
            for to in ids {
                let path = graph.find_path(from, to);
                if reachable.iter().any(|id| id == to) {
                    let path = path.unwrap();
                    assert_eq!(path.entity_ids.first().map(String::as_str), Some(from));
                    assert_eq!(path.entity_ids.last().map(String::as_str), Some(to));
                } else {
                    assert!(matches!(path, Err(Error::PathNotFound(..))));
                }
            }
        }

        let path = graph.find_path("a", "c").unwrap();
        assert_eq!(path.hops(), 2);
        assert_eq!(path.relationship_ids, vec!["ab", "cb"]);
    }

    #[test]
    fn test_path_prefers_first_inserted_relationship() {
        let mut graph = chain();
        graph
            .add_relationship(Relationship::new("a", "b", "loves").with_id("ab2"))
            .unwrap();
        let path = graph.find_path("a", "b").unwrap();
        assert_eq!(path.relationship_ids, vec!["ab"]);
    }

    #[test]
    fn test_importance_is_derived_from_counts() {
        let graph = chain();
        let b = graph.importance("b");
        let expected = (2.0f64).ln() + 0.5 * 2.0;
        assert!((b - expected).abs() < 1e-9);
        assert_eq!(graph.importance("ghost"), 0.0);
    }
}

mod mutations {
    use super::*;

    #[test]
    fn test_update_keeps_id_and_reindexes_name() {
        let mut graph = chain();
        let updated = graph
            .update_entity(
                "a",
                EntityUpdate::rename("Alpha").with_property("age", json!(30)),
            )
            .unwrap();

        assert_eq!(updated.id, "a");
        assert_eq!(updated.name, "Alpha");
        assert_eq!(graph.lookup("alpha").unwrap().id, "a");
        assert!(graph.find_by_name("A").is_empty());
        assert_eq!(graph.find_path("a", "b").unwrap().hops(), 1);
    }

    #[test]
    fn test_update_collision_is_validation_error() {
        let mut graph = chain();
        let before = graph.to_serializable();

        let err = graph
            .update_entity("a", EntityUpdate::rename("b"))
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
        assert_eq!(graph.to_serializable(), before);

        // Same name with another type is a different identity
        graph
            .update_entity("a", EntityUpdate::rename("B").with_type(EntityType::Location))
            .unwrap();
    }

    #[test]
    fn test_delete_entity_cascades() {
        let mut graph = chain();
        let deleted = graph.delete_entity("b").unwrap();

        assert_eq!(deleted.entity.id, "b");
        assert_eq!(deleted.relationships.len(), 2);
        assert_eq!(graph.relationship_count(), 0);
        assert_eq!(graph.out_degree("a"), 0);
        assert!(graph.delete_entity("b").unwrap_err().is_not_found());

        // The identity is free again
        let again = graph.add_entity(character("B")).unwrap();
        assert!(!again.merged);
    }

    #[test]
    fn test_delete_relationship() {
        let mut graph = chain();
        let removed = graph.delete_relationship("ab").unwrap();
        assert_eq!(removed.source, "a");
        assert!(graph.find_path("a", "b").is_err());
        assert!(graph.delete_relationship("ab").unwrap_err().is_not_found());
    }

    #[test]
    fn test_many_deletes_compact_without_losing_data() {
        let mut graph = KnowledgeGraph::new("p");
        let hub = graph.add_entity(character("Hub")).unwrap().id;
        let mut spokes = Vec::new();
        for i in 0..100 {
            let id = graph.add_entity(character(&format!("Spoke {}", i))).unwrap().id;
            graph
                .add_relationship(Relationship::new(&hub, &id, "knows"))
                .unwrap();
            spokes.push(id);
        }
        for id in spokes.iter().take(90) {
            graph.delete_entity(id).unwrap();
        }

        assert_eq!(graph.entity_count(), 11);
        assert_eq!(graph.out_degree(&hub), 10);
        assert_eq!(graph.lookup("spoke 95").unwrap().id, spokes[95]);
        assert_eq!(graph.find_path(&hub, &spokes[99]).unwrap().hops(), 1);
    }

    #[test]
    fn test_metadata_tracks_mutations() {
        let mut graph = chain();
        let revision = graph.revision();
        assert_eq!(graph.metadata().entity_count, 4);
        assert_eq!(graph.metadata().relationship_count, 2);

        graph.delete_relationship("ab").unwrap();
        assert_eq!(graph.metadata().relationship_count, 1);
        assert!(graph.revision() > revision);
    }
}

mod serialization {
    use super::*;

    #[test]
    fn test_round_trip_is_lossless() {
        let mut graph = chain();
        graph
            .update_entity(
                "a",
                EntityUpdate::default()
                    .with_property("nested", json!({"x": [1, 2, {"y": null}]})),
            )
            .unwrap();
        let doc = graph.to_serializable();

        let json = doc.to_json().unwrap();
        let parsed = GraphDocument::from_json(&json).unwrap();
        let restored = KnowledgeGraph::from_serializable(parsed).unwrap();

        assert_eq!(restored.to_serializable(), doc);
        assert_eq!(
            KnowledgeGraph::from_serializable(doc.clone())
                .unwrap()
                .to_serializable(),
            doc
        );
    }

    #[test]
    fn test_restored_graph_keeps_merge_identity() {
        let restored = KnowledgeGraph::from_serializable(chain().to_serializable())
            .unwrap()
            .with_config(&GraphConfig::default());
        let mut graph = restored;
        let insert = graph.add_entity(character("a")).unwrap();
        assert!(insert.merged);
        assert_eq!(insert.id, "a");
    }

    #[test]
    fn test_dangling_edge_in_document_is_rejected() {
        let mut doc = chain().to_serializable();
        doc.edges[0].target = "ghost".to_string();
        let err = KnowledgeGraph::from_serializable(doc).unwrap_err();
        assert!(matches!(err, Error::Reference(_)));
    }

    #[test]
    fn test_document_shape() {
        let value = serde_json::to_value(chain().to_serializable()).unwrap();
        assert_eq!(value["metadata"]["project_id"], json!("chain"));
        assert_eq!(value["metadata"]["entity_count"], json!(4));
        assert_eq!(value["nodes"][0]["type"], json!("character"));
        assert_eq!(value["edges"][0]["source"], json!("a"));
        assert!(value["nodes"][0].get("importance").is_none());
    }
}
