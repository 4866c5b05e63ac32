//! Stateless pub-sub hooks.
//!
//! Engine components publish events after their transactions commit; subscribers run on their own tasks so that slow
//! follow-up work (marketplace calls, backfills) never holds a lock or a connection of the publisher.
mod channel;
mod event_types;
mod hooks;

pub use channel::{EventHandler, EventProducer, Handler};
pub use event_types::*;
pub use hooks::{EventHandlers, EventHooks, EventProducers};
