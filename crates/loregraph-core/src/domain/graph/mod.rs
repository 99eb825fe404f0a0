//! Narrative knowledge graph
//!
//! One directed multigraph per project, holding typed entities and typed
//! relationships extracted from scenes.
//!
//! # Architecture
//!
//! - **Entities** ([`Entity`]): characters, locations, objects and other
//!   narrative elements, merged by the pluggable [`EntityResolver`]
//! - **Relationships** ([`Relationship`]): directed edges from an open
//!   vocabulary of types, checked by [`RelationshipTypePolicy`]
//! - **Store** ([`KnowledgeGraph`]): arena of entities and relationships with
//!   traversal, path finding, centrality and community queries
//! - **Registry** ([`GraphRegistry`]): per-project locks and lazy loading
//! - **Persistence** ([`GraphDocumentRepository`]): versioned documents plus
//!   an attribute index
//!
//! # Example
//!
//! ```
//! use loregraph_core::domain::graph::{Entity, EntityType, KnowledgeGraph, Relationship};
//!
//! let mut graph = KnowledgeGraph::new("demo");
//! let mickey = graph.add_entity(Entity::new("Mickey", EntityType::Character)).unwrap();
//! let mars = graph.add_entity(Entity::new("Mars", EntityType::Location)).unwrap();
//! graph
//!     .add_relationship(Relationship::new(&mickey.id, &mars.id, "located_in"))
//!     .unwrap();
//!
//! let path = graph.find_path(&mickey.id, &mars.id).unwrap();
//! assert_eq!(path.hops(), 1);
//! ```

pub mod analytics;
pub mod community;
pub mod document;
pub mod entity;
pub mod registry;
pub mod relationship;
pub mod repository;
pub mod resolver;
pub mod store;

pub use analytics::{CentralityMeasure, GraphStats, MentionSummary, RankedEntity, statistics};
pub use community::{Community, CommunityDetection};
pub use document::{GraphDocument, GraphMetadata, SCHEMA_VERSION};
pub use entity::{Entity, EntityType, EntityUpdate, MAX_NAME_LEN, Properties, normalize_name};
pub use registry::{GraphHandle, GraphRegistry, PersistOutcome};
pub use relationship::{Relationship, normalize_relationship_type};
pub use repository::{
    AttributeMatch, GraphDocumentRepository, StoredGraph, VersionToken, attributes,
};
pub use resolver::{EntityResolver, NameTypeResolver};
pub use store::{
    AppliedBatch, BatchRelationship, ConnectedEntity, DeletedEntity, EntityFilter, EntityInsert,
    EntityQuery, EntityView, GraphBatch, GraphPage, GraphPath, GraphQuery, KnowledgeGraph,
    RelationshipTypePolicy, importance_score,
};
