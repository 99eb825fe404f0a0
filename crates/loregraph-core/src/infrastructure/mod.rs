//! Infrastructure layer
//!
//! SQLite implementations of the domain repository traits.

mod graph;
mod jobs;

pub use graph::SqliteGraphDocumentRepository;
pub use jobs::SqliteJobRepository;
