//! Real-time graph delta events
//!
//! Every project has a many-subscriber push channel. Subscribers receive
//! every event published after they connect. Delivery is best effort:
//! publishing never blocks, nothing is buffered for absent subscribers, and
//! a subscriber that falls behind skips the events it missed.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use futures_core::Stream;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::domain::extraction::ExtractorKind;
use crate::domain::graph::{AppliedBatch, Entity, EntityType, Relationship};

/// Default per-project channel capacity
pub const DEFAULT_CHANNEL_CAPACITY: usize = 256;

/// A change to one project's graph or extraction jobs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event_type", rename_all = "snake_case")]
pub enum GraphEvent {
    /// A new entity was added
    EntityAdded {
        project_id: String,
        entity_id: String,
        name: String,
        entity_type: EntityType,
        job_id: Option<String>,
        timestamp: DateTime<Utc>,
    },
    /// A new relationship was added
    RelationshipAdded {
        project_id: String,
        relationship_id: String,
        source: String,
        target: String,
        relationship_type: String,
        job_id: Option<String>,
        timestamp: DateTime<Utc>,
    },
    /// An entity was edited or merged with new mentions
    EntityUpdated {
        project_id: String,
        entity_id: String,
        name: String,
        timestamp: DateTime<Utc>,
    },
    /// An entity and its incident relationships were removed
    EntityDeleted {
        project_id: String,
        entity_id: String,
        removed_relationships: Vec<String>,
        timestamp: DateTime<Utc>,
    },
    /// A relationship was removed
    RelationshipDeleted {
        project_id: String,
        relationship_id: String,
        timestamp: DateTime<Utc>,
    },
    /// An extraction job began running
    JobStarted {
        project_id: String,
        job_id: String,
        scene_id: String,
        extractor: ExtractorKind,
        timestamp: DateTime<Utc>,
    },
    /// An extraction job applied its results
    JobCompleted {
        project_id: String,
        job_id: String,
        scene_id: String,
        added_entities: Vec<String>,
        merged_entities: Vec<String>,
        added_relationships: Vec<String>,
        cost: f64,
        timestamp: DateTime<Utc>,
    },
    /// An extraction job failed or was cancelled
    JobFailed {
        project_id: String,
        job_id: String,
        scene_id: String,
        error: String,
        cancelled: bool,
        timestamp: DateTime<Utc>,
    },
}

impl GraphEvent {
    /// Event for a newly added entity
    pub fn entity_added(project_id: &str, entity: &Entity, job_id: Option<&str>) -> Self {
        Self::EntityAdded {
            project_id: project_id.to_string(),
            entity_id: entity.id.clone(),
            name: entity.name.clone(),
            entity_type: entity.entity_type,
            job_id: job_id.map(str::to_string),
            timestamp: Utc::now(),
        }
    }

    /// Event for a newly added relationship
    pub fn relationship_added(
        project_id: &str,
        relationship: &Relationship,
        job_id: Option<&str>,
    ) -> Self {
        Self::RelationshipAdded {
            project_id: project_id.to_string(),
            relationship_id: relationship.id.clone(),
            source: relationship.source.clone(),
            target: relationship.target.clone(),
            relationship_type: relationship.relationship_type.clone(),
            job_id: job_id.map(str::to_string),
            timestamp: Utc::now(),
        }
    }

    /// Event for an edited entity
    pub fn entity_updated(project_id: &str, entity: &Entity) -> Self {
        Self::EntityUpdated {
            project_id: project_id.to_string(),
            entity_id: entity.id.clone(),
            name: entity.name.clone(),
            timestamp: Utc::now(),
        }
    }

    /// Event for a deleted entity
    pub fn entity_deleted(
        project_id: &str,
        entity_id: &str,
        removed_relationships: Vec<String>,
    ) -> Self {
        Self::EntityDeleted {
            project_id: project_id.to_string(),
            entity_id: entity_id.to_string(),
            removed_relationships,
            timestamp: Utc::now(),
        }
    }

    /// Event for a deleted relationship
    pub fn relationship_deleted(project_id: &str, relationship_id: &str) -> Self {
        Self::RelationshipDeleted {
            project_id: project_id.to_string(),
            relationship_id: relationship_id.to_string(),
            timestamp: Utc::now(),
        }
    }

    /// Event for a job entering `running`
    pub fn job_started(
        project_id: &str,
        job_id: &str,
        scene_id: &str,
        extractor: ExtractorKind,
    ) -> Self {
        Self::JobStarted {
            project_id: project_id.to_string(),
            job_id: job_id.to_string(),
            scene_id: scene_id.to_string(),
            extractor,
            timestamp: Utc::now(),
        }
    }

    /// Event for a job entering `completed`
    pub fn job_completed(
        project_id: &str,
        job_id: &str,
        scene_id: &str,
        applied: &AppliedBatch,
        cost: f64,
    ) -> Self {
        Self::JobCompleted {
            project_id: project_id.to_string(),
            job_id: job_id.to_string(),
            scene_id: scene_id.to_string(),
            added_entities: applied.created_entities.clone(),
            merged_entities: applied.merged_entities.clone(),
            added_relationships: applied.relationships.clone(),
            cost,
            timestamp: Utc::now(),
        }
    }

    /// Event for a job entering `failed`
    pub fn job_failed(
        project_id: &str,
        job_id: &str,
        scene_id: &str,
        error: impl Into<String>,
        cancelled: bool,
    ) -> Self {
        Self::JobFailed {
            project_id: project_id.to_string(),
            job_id: job_id.to_string(),
            scene_id: scene_id.to_string(),
            error: error.into(),
            cancelled,
            timestamp: Utc::now(),
        }
    }

    /// Project the event belongs to
    pub fn project_id(&self) -> &str {
        match self {
            Self::EntityAdded { project_id, .. }
            | Self::RelationshipAdded { project_id, .. }
            | Self::EntityUpdated { project_id, .. }
            | Self::EntityDeleted { project_id, .. }
            | Self::RelationshipDeleted { project_id, .. }
            | Self::JobStarted { project_id, .. }
            | Self::JobCompleted { project_id, .. }
            | Self::JobFailed { project_id, .. } => project_id,
        }
    }

    /// Get the timestamp of the event
    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            Self::EntityAdded { timestamp, .. }
            | Self::RelationshipAdded { timestamp, .. }
            | Self::EntityUpdated { timestamp, .. }
            | Self::EntityDeleted { timestamp, .. }
            | Self::RelationshipDeleted { timestamp, .. }
            | Self::JobStarted { timestamp, .. }
            | Self::JobCompleted { timestamp, .. }
            | Self::JobFailed { timestamp, .. } => *timestamp,
        }
    }

    /// Get the event type name
    pub fn event_type_name(&self) -> &'static str {
        match self {
            Self::EntityAdded { .. } => "entity_added",
            Self::RelationshipAdded { .. } => "relationship_added",
            Self::EntityUpdated { .. } => "entity_updated",
            Self::EntityDeleted { .. } => "entity_deleted",
            Self::RelationshipDeleted { .. } => "relationship_deleted",
            Self::JobStarted { .. } => "job_started",
            Self::JobCompleted { .. } => "job_completed",
            Self::JobFailed { .. } => "job_failed",
        }
    }
}

/// Per-project broadcast channels
#[derive(Debug)]
pub struct UpdateChannel {
    senders: DashMap<String, broadcast::Sender<GraphEvent>>,
    capacity: usize,
}

impl Default for UpdateChannel {
    fn default() -> Self {
        Self::new(DEFAULT_CHANNEL_CAPACITY)
    }
}

impl UpdateChannel {
    /// Create channels that buffer up to `capacity` events per project
    pub fn new(capacity: usize) -> Self {
        Self {
            senders: DashMap::new(),
            capacity: capacity.max(1),
        }
    }

    /// Receive every event for `project_id` published from now on
    pub fn subscribe(&self, project_id: &str) -> Subscription {
        let receiver = self
            .senders
            .entry(project_id.to_string())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .subscribe();
        debug!(project_id = %project_id, "Subscriber connected");
        Subscription {
            project_id: project_id.to_string(),
            receiver,
        }
    }

    /// Fire-and-forget publish; returns how many subscribers were reached
    pub fn publish(&self, event: GraphEvent) -> usize {
        let project_id = event.project_id().to_string();
        let delivered = match self.senders.get(&project_id) {
            Some(sender) => sender.send(event).unwrap_or(0),
            None => 0,
        };
        if delivered == 0 {
            self.senders
                .remove_if(&project_id, |_, sender| sender.receiver_count() == 0);
        }
        delivered
    }

    /// Publish several events in order
    pub fn publish_all(&self, events: impl IntoIterator<Item = GraphEvent>) -> usize {
        events.into_iter().map(|event| self.publish(event)).sum()
    }

    /// Number of live subscribers for a project
    pub fn subscriber_count(&self, project_id: &str) -> usize {
        self.senders
            .get(project_id)
            .map(|sender| sender.receiver_count())
            .unwrap_or(0)
    }

    /// Drop a project's channel, ending every subscription to it
    pub fn close(&self, project_id: &str) -> bool {
        self.senders.remove(project_id).is_some()
    }
}

/// One subscriber's view of a project channel
#[derive(Debug)]
pub struct Subscription {
    project_id: String,
    receiver: broadcast::Receiver<GraphEvent>,
}

impl Subscription {
    /// Project this subscription follows
    pub fn project_id(&self) -> &str {
        &self.project_id
    }

    /// Wait for the next event; `None` once the channel is closed
    pub async fn recv(&mut self) -> Option<GraphEvent> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(project_id = %self.project_id, skipped, "Subscriber lagged, events dropped");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Next event if one is already queued
    pub fn try_recv(&mut self) -> Option<GraphEvent> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) => return Some(event),
                Err(broadcast::error::TryRecvError::Lagged(skipped)) => {
                    warn!(project_id = %self.project_id, skipped, "Subscriber lagged, events dropped");
                }
                Err(_) => return None,
            }
        }
    }

    /// Turn the subscription into an async stream of events
    pub fn into_stream(mut self) -> impl Stream<Item = GraphEvent> + Send {
        async_stream::stream! {
            while let Some(event) = self.recv().await {
                yield event;
            }
        }
    }
}
