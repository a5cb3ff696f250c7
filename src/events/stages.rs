//! Standard pipeline stages.
//!
//! Order matters: `StorageStage` must precede `ReadStateStage` (the unread
//! counter is derived from what storage recorded), and `TypingCleanupStage`
//! must precede `TypingAggregateStage` (self-authored typing noise must
//! never reach aggregate state). `standard_stages` encodes that order.

use std::collections::BTreeSet;
use std::sync::Arc;

use crate::events::event::{Event, UserId};
use crate::events::pipeline::PipelineStage;
use crate::storage::StateStore;

/// Resolver for the currently authenticated user, if any. A closure rather
/// than a value because the logged-in user can change over the client's life.
pub type CurrentUser = Arc<dyn Fn() -> Option<UserId> + Send + Sync>;

/// Persists message and read activity into the state store.
pub struct StorageStage {
    store: Arc<dyn StateStore>,
}

impl StorageStage {
    pub fn new(store: Arc<dyn StateStore>) -> Self {
        Self { store }
    }
}

impl PipelineStage for StorageStage {
    fn name(&self) -> &'static str {
        "storage"
    }

    fn handle(&self, event: Event) -> Option<Event> {
        match &event {
            Event::MessageNew {
                channel_id,
                message_id,
                user_id,
                ..
            } => self.store.record_message(channel_id, message_id, user_id),
            Event::MessageRead {
                channel_id,
                user_id,
            } => self.store.record_read(channel_id, user_id),
            _ => {}
        }
        Some(event)
    }
}

/// Drops typing start/stop events authored by excluded users (the current
/// user's own typing echoes back from the server and must not reach the
/// aggregate stage or subscribers).
pub struct TypingCleanupStage {
    excluded: Arc<dyn Fn() -> BTreeSet<UserId> + Send + Sync>,
}

impl TypingCleanupStage {
    pub fn new(excluded: Arc<dyn Fn() -> BTreeSet<UserId> + Send + Sync>) -> Self {
        Self { excluded }
    }

    pub fn excluding_current_user(current_user: CurrentUser) -> Self {
        Self::new(Arc::new(move || current_user().into_iter().collect()))
    }
}

impl PipelineStage for TypingCleanupStage {
    fn name(&self) -> &'static str {
        "typing-cleanup"
    }

    fn handle(&self, event: Event) -> Option<Event> {
        match &event {
            Event::TypingStart { user_id, .. } | Event::TypingStop { user_id, .. } => {
                if (self.excluded)().contains(user_id) {
                    return None;
                }
                Some(event)
            }
            _ => Some(event),
        }
    }
}

/// Annotates new messages with the current user's unread counter derived
/// from the store. Runs after `StorageStage` so the counter includes the
/// message being processed.
pub struct ReadStateStage {
    store: Arc<dyn StateStore>,
    current_user: CurrentUser,
}

impl ReadStateStage {
    pub fn new(store: Arc<dyn StateStore>, current_user: CurrentUser) -> Self {
        Self {
            store,
            current_user,
        }
    }
}

impl PipelineStage for ReadStateStage {
    fn name(&self) -> &'static str {
        "read-state"
    }

    fn handle(&self, event: Event) -> Option<Event> {
        match event {
            Event::MessageNew {
                channel_id,
                message_id,
                user_id,
                text,
                ..
            } => {
                let unread_count = (self.current_user)()
                    .map(|me| self.store.unread_count(&channel_id, &me));
                Some(Event::MessageNew {
                    channel_id,
                    message_id,
                    user_id,
                    text,
                    unread_count,
                })
            }
            other => Some(other),
        }
    }
}

/// Maintains per-channel "who is typing" state in the store. Runs after
/// `TypingCleanupStage`.
pub struct TypingAggregateStage {
    store: Arc<dyn StateStore>,
}

impl TypingAggregateStage {
    pub fn new(store: Arc<dyn StateStore>) -> Self {
        Self { store }
    }
}

impl PipelineStage for TypingAggregateStage {
    fn name(&self) -> &'static str {
        "typing-aggregate"
    }

    fn handle(&self, event: Event) -> Option<Event> {
        match &event {
            Event::TypingStart {
                channel_id,
                user_id,
            } => self.store.set_typing(channel_id, user_id, true),
            Event::TypingStop {
                channel_id,
                user_id,
            } => self.store.set_typing(channel_id, user_id, false),
            _ => {}
        }
        Some(event)
    }
}

/// The standard stage list in its required order.
pub fn standard_stages(
    store: Arc<dyn StateStore>,
    current_user: CurrentUser,
) -> Vec<Box<dyn PipelineStage>> {
    vec![
        Box::new(StorageStage::new(Arc::clone(&store))),
        Box::new(TypingCleanupStage::excluding_current_user(Arc::clone(
            &current_user,
        ))),
        Box::new(ReadStateStage::new(Arc::clone(&store), current_user)),
        Box::new(TypingAggregateStage::new(store)),
    ]
}
