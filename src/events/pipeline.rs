//! Ordered event-processing pipeline.
//!
//! Stages run strictly in list order; a stage may transform the event, pass
//! it through, or drop it by returning `None`, in which case later stages do
//! not run and nothing is broadcast. The list is assembled once at
//! construction and never mutated afterwards, so concurrent reads need no
//! locking; dispatch itself is serialized by the connection loop.

use crate::events::event::Event;

pub trait PipelineStage: Send {
    /// Stable name for logging.
    fn name(&self) -> &'static str;

    /// Transform, pass through, or drop (`None`) an event.
    fn handle(&self, event: Event) -> Option<Event>;
}

pub struct EventPipeline {
    stages: Vec<Box<dyn PipelineStage>>,
}

impl EventPipeline {
    pub fn new(stages: Vec<Box<dyn PipelineStage>>) -> Self {
        Self { stages }
    }

    pub fn empty() -> Self {
        Self { stages: Vec::new() }
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Run `event` through every stage in order.
    pub fn process(&self, event: Event) -> Option<Event> {
        let mut current = event;
        for stage in &self.stages {
            match stage.handle(current) {
                Some(next) => current = next,
                None => {
                    tracing::trace!(stage = stage.name(), "event dropped by pipeline stage");
                    return None;
                }
            }
        }
        Some(current)
    }
}
