use dashmap::DashSet;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info};

use super::types::{AssignmentChange, AssignmentEvent, StreamPartId};

/// Stream parts this broker is responsible for, kept current from the diff feed.
#[derive(Default)]
pub struct StreamPartAssignments {
    parts: DashSet<StreamPartId>,
}

impl StreamPartAssignments {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Consumes the feed until its sender side is dropped.
    pub fn start(self: Arc<Self>, mut feed: mpsc::Receiver<AssignmentEvent>) {
        tokio::spawn(async move {
            while let Some(event) = feed.recv().await {
                self.apply(&event);
            }
            debug!("Assignment feed closed");
        });
    }

    pub fn apply(&self, event: &AssignmentEvent) {
        match event.change {
            AssignmentChange::Added => {
                if self.parts.insert(event.stream_part.clone()) {
                    info!("Assigned {}", event.stream_part);
                }
            }
            AssignmentChange::Removed => {
                if self.parts.remove(&event.stream_part).is_some() {
                    info!("Unassigned {}", event.stream_part);
                }
            }
        }
    }

    pub fn has_stream_part(&self, stream_part: &StreamPartId) -> bool {
        self.parts.contains(stream_part)
    }

    pub fn stream_parts(&self) -> Vec<StreamPartId> {
        let mut parts: Vec<StreamPartId> = self.parts.iter().map(|p| p.key().clone()).collect();
        parts.sort();
        parts
    }
}
