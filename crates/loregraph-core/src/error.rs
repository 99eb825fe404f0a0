//! Error types for Loregraph

use thiserror::Error;

/// Result type alias using Loregraph's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Loregraph error types with helpful messages and suggestions
#[derive(Error, Debug)]
pub enum Error {
    // Graph errors (E001-E099)
    #[error("Reference error: {0}")]
    Reference(String),

    #[error("{kind} '{id}' not found.")]
    NotFound { kind: &'static str, id: String },

    #[error("No path from '{0}' to '{1}'.")]
    PathNotFound(String, String),

    #[error("Invalid input: {0}")]
    Validation(String),

    // Extraction errors (E100-E199)
    #[error("Could not parse extraction response: {0}")]
    ExtractionParse(String),

    #[error("Extraction timed out after {0} seconds")]
    ExtractionTimeout(u64),

    #[error("Job cancelled: {0}")]
    JobCancelled(String),

    // Network errors (E200-E299)
    #[error("Network error: {0}. Check your internet connection.")]
    NetworkError(#[from] reqwest::Error),

    #[error("LLM API error: {0}. Check that LOREGRAPH_API_KEY is set.")]
    LLMError(String),

    #[error("Rate limited. Waiting {0} seconds before retry.")]
    RateLimited(u64),

    // Persistence errors (E300-E399)
    #[error("The graph for project '{0}' was changed by another writer. Please retry.")]
    Conflict(String),

    #[error("Database error: {0}")]
    DatabaseError(#[from] sqlx::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // Access errors (E400-E499)
    #[error("Caller '{0}' may not access project '{1}'.")]
    Forbidden(String, String),

    // Config errors (E600-E699)
    #[error("Configuration error: {0}")]
    ConfigError(String),

    // Generic errors
    #[error("{0}")]
    Other(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Shorthand for a `NotFound` error on an entity
    pub fn entity_not_found(id: impl Into<String>) -> Self {
        Self::NotFound {
            kind: "Entity",
            id: id.into(),
        }
    }

    /// Shorthand for a `NotFound` error on a relationship
    pub fn relationship_not_found(id: impl Into<String>) -> Self {
        Self::NotFound {
            kind: "Relationship",
            id: id.into(),
        }
    }

    /// Shorthand for a `NotFound` error on an extraction job
    pub fn job_not_found(id: impl Into<String>) -> Self {
        Self::NotFound {
            kind: "Job",
            id: id.into(),
        }
    }

    /// Shorthand for a `NotFound` error on a scene
    pub fn scene_not_found(id: impl Into<String>) -> Self {
        Self::NotFound {
            kind: "Scene",
            id: id.into(),
        }
    }

    /// True for both missing records and missing paths
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. } | Self::PathNotFound(..))
    }

    /// Get error code for this error type
    pub fn code(&self) -> &'static str {
        match self {
            Self::Reference(_) => "E001",
            Self::NotFound { .. } => "E002",
            Self::PathNotFound(..) => "E003",
            Self::Validation(_) => "E004",
            Self::ExtractionParse(_) => "E100",
            Self::ExtractionTimeout(_) => "E101",
            Self::JobCancelled(_) => "E102",
            Self::NetworkError(_) => "E200",
            Self::LLMError(_) => "E201",
            Self::RateLimited(_) => "E202",
            Self::Conflict(_) => "E300",
            Self::DatabaseError(_) => "E301",
            Self::Serialization(_) => "E302",
            Self::Forbidden(..) => "E400",
            Self::ConfigError(_) => "E600",
            Self::Other(_) | Self::Io(_) => "E9999",
        }
    }

    /// Get suggestion for how to fix this error
    pub fn suggestion(&self) -> Option<String> {
        match self {
            Self::NotFound { kind: "Entity", .. } => {
                Some("loregraph entities <project>".to_string())
            }
            Self::NotFound { kind: "Job", .. } => Some("loregraph jobs <project>".to_string()),
            Self::ExtractionParse(_) => {
                Some("Resubmit the scene or use the local extractor (--extractor ner)".to_string())
            }
            Self::ExtractionTimeout(_) => {
                Some("loregraph config set extraction.job_timeout_secs <seconds>".to_string())
            }
            Self::NetworkError(_) => Some("Check internet connection".to_string()),
            Self::LLMError(_) => Some("export LOREGRAPH_API_KEY=<key>".to_string()),
            Self::Conflict(_) => Some("Re-read the graph and retry the write".to_string()),
            Self::ConfigError(_) => Some("loregraph config list".to_string()),
            _ => None,
        }
    }
}
