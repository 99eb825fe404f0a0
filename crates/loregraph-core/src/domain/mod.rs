//! Domain layer
//!
//! Graph model, extraction pipeline and live update events.

pub mod events;
pub mod extraction;
pub mod graph;
pub mod scene;
