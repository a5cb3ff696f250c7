//! Event decoding, dispatch, and fan-out.

pub mod broadcast;
pub mod decoder;
pub mod event;
pub mod pipeline;
pub mod stages;

pub use broadcast::{EventBroadcaster, EventSubscription, StateSubscription, StateUpdates};
pub use decoder::{EventDecoder, JsonEventDecoder};
pub use event::{ChannelId, ConnectionId, Event, MessageId, UserId};
pub use pipeline::{EventPipeline, PipelineStage};
