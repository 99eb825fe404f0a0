//! Loregraph Core Library
//!
//! This crate provides the core functionality for Loregraph, including:
//! - Per-project narrative knowledge graphs (merge, paths, centrality, communities)
//! - Entity and relationship extraction (remote language model or local NER)
//! - Asynchronous extraction jobs with cancellation and cost tracking
//! - Versioned graph persistence with an attribute index (SQLite)
//! - Real-time delta events per project
//! - Export to node-link JSON and narrative markdown

pub mod api;
pub mod config;
pub mod cost;
pub mod domain;
pub mod error;
pub mod infrastructure;
pub mod llm;
pub mod storage;

pub use api::{Caller, LoregraphService, ProjectAccess};
pub use error::{Error, Result};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::api::{Caller, ExportFormat, LoregraphService};
    pub use crate::config::Config;
    pub use crate::domain::events::GraphEvent;
    pub use crate::domain::extraction::{ExtractionJob, ExtractorKind, JobStatus};
    pub use crate::domain::graph::{Entity, EntityType, KnowledgeGraph, Relationship};
    pub use crate::error::{Error, Result};
}

#[cfg(test)]
mod config_tests;
#[cfg(test)]
mod error_tests;
#[cfg(test)]
mod graph_tests;
