//! Per-series actor concurrency.
//!
//! Every series is owned by exactly one [`SeriesActor`] with a bounded
//! [`Mailbox`]. Requesters enqueue messages carrying a [`ResponseSlot`] and
//! block on the slot; a fixed [`ActorPool`] of worker threads drains
//! mailboxes across all alive actors, processing one message per actor at a
//! time.

pub mod mailbox;
pub mod pool;
pub mod response_slot;
mod series_actor;

use std::sync::Arc;

pub use mailbox::{Mailbox, DEFAULT_MAILBOX_CAPACITY};
pub use pool::ActorPool;
pub use response_slot::{ActorError, ActorReply, ResponseSlot};
pub use series_actor::{SeriesActor, SeriesStore};

/// A message enqueued to a series actor. The slot is completed exactly once
/// when the message is dispatched.
pub enum ActorMessage {
    Append {
        ts: i64,
        value: f64,
        reply: Arc<ResponseSlot>,
    },
    QueryPoint {
        ts: i64,
        reply: Arc<ResponseSlot>,
    },
}
