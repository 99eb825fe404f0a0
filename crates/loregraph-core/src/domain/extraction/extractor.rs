//! The extraction capability shared by every strategy

use async_trait::async_trait;

use super::job::ExtractorKind;
use crate::cost::TokenUsage;
use crate::domain::graph::{BatchRelationship, Entity, GraphBatch};
use crate::error::Result;

/// Token usage of the completion call behind an extraction
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractionUsage {
    pub model: String,
    pub tokens: TokenUsage,
}

/// Candidate entities and relationships proposed for one scene
///
/// Relationships refer to their endpoints by name; the graph resolves them
/// against the candidates first and the existing graph second.
#[derive(Debug, Clone, Default)]
pub struct ExtractionOutput {
    pub entities: Vec<Entity>,
    pub relationships: Vec<BatchRelationship>,
    /// Present when the strategy made a billable call
    pub usage: Option<ExtractionUsage>,
}

impl ExtractionOutput {
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty() && self.relationships.is_empty()
    }

    /// The mutations this output proposes
    pub fn into_batch(self) -> GraphBatch {
        GraphBatch {
            entities: self.entities,
            relationships: self.relationships,
        }
    }
}

/// Converts scene text into candidate graph data
///
/// Implementations never touch the graph; the job manager applies their
/// output.
#[async_trait]
pub trait Extractor: Send + Sync {
    fn kind(&self) -> ExtractorKind;

    async fn extract(&self, scene_text: &str, scene_id: &str) -> Result<ExtractionOutput>;
}
