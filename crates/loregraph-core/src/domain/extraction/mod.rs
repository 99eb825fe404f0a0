//! Scene extraction
//!
//! Two interchangeable strategies turn scene text into candidate graph data:
//!
//! - [`LlmExtractor`]: remote language model, high quality, billed per token
//! - [`NerExtractor`]: local recognizer over typed spans, fast and free
//!
//! Extractors are pure with respect to the graph. The [`JobManager`] runs
//! them as tracked jobs and is the only component that applies their output.

pub mod extractor;
pub mod job;
pub mod llm;
pub mod manager;
pub mod ner;
pub mod repository;

pub use extractor::{ExtractionOutput, ExtractionUsage, Extractor};
pub use job::{CANCELLED_REASON, ExtractionJob, ExtractorKind, JobStatus};
pub use llm::LlmExtractor;
pub use manager::JobManager;
pub use ner::{NerExtractor, PatternRecognizer, Span, SpanRecognizer, entity_type_for_label};
pub use repository::{JobCostSummary, JobFilter, JobRepository};
