//! One-shot synchronous reply channel.

use std::sync::{Condvar, Mutex};

use thiserror::Error;

/// Errors an actor can report through a slot.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActorError {
    #[error("timestamp out of order")]
    OutOfOrder,

    #[error("out of memory")]
    OutOfMemory,

    #[error("internal actor error")]
    Internal,
}

/// What an actor writes into a slot: a bare acknowledgement, a value, or an
/// error.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ActorReply {
    Ok,
    Value(f64),
    Err(ActorError),
}

enum SlotState {
    Waiting,
    Ready(ActorReply),
    Consumed,
}

/// A one-shot reply slot: `waiting -> ready -> consumed`.
///
/// The requester allocates the slot, sends it with the message, and blocks in
/// [`wait`](ResponseSlot::wait) until the actor calls
/// [`complete`](ResponseSlot::complete). Waiting on an already-consumed slot
/// is a programming error and panics.
pub struct ResponseSlot {
    state: Mutex<SlotState>,
    ready: Condvar,
}

impl ResponseSlot {
    pub fn new() -> Self {
        ResponseSlot {
            state: Mutex::new(SlotState::Waiting),
            ready: Condvar::new(),
        }
    }

    /// Stores the reply and wakes the waiter. Completing a slot twice is a
    /// programming error and panics.
    pub fn complete(&self, reply: ActorReply) {
        let mut state = self.state.lock().expect("slot lock poisoned");
        match *state {
            SlotState::Waiting => {
                *state = SlotState::Ready(reply);
                self.ready.notify_one();
            }
            _ => panic!("response slot completed twice"),
        }
    }

    /// Blocks until the reply arrives, then consumes it. `Ok` maps to
    /// `Ok(None)`, `Value(x)` to `Ok(Some(x))`, `Err(e)` to `Err(e)`.
    pub fn wait(&self) -> Result<Option<f64>, ActorError> {
        let mut state = self.state.lock().expect("slot lock poisoned");
        loop {
            match *state {
                SlotState::Waiting => {
                    state = self.ready.wait(state).expect("slot lock poisoned");
                }
                SlotState::Ready(reply) => {
                    *state = SlotState::Consumed;
                    return match reply {
                        ActorReply::Ok => Ok(None),
                        ActorReply::Value(v) => Ok(Some(v)),
                        ActorReply::Err(e) => Err(e),
                    };
                }
                SlotState::Consumed => panic!("response slot consumed twice"),
            }
        }
    }

    /// Non-blocking readiness check.
    pub fn is_ready(&self) -> bool {
        matches!(
            *self.state.lock().expect("slot lock poisoned"),
            SlotState::Ready(_)
        )
    }
}

impl Default for ResponseSlot {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn complete_then_wait() {
        let slot = ResponseSlot::new();
        assert!(!slot.is_ready());
        slot.complete(ActorReply::Value(1.5));
        assert!(slot.is_ready());
        assert_eq!(slot.wait(), Ok(Some(1.5)));
    }

    #[test]
    fn wait_blocks_until_completed() {
        let slot = Arc::new(ResponseSlot::new());
        let completer = Arc::clone(&slot);
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            completer.complete(ActorReply::Ok);
        });
        assert_eq!(slot.wait(), Ok(None));
        handle.join().unwrap();
    }

    #[test]
    fn errors_pass_through() {
        let slot = ResponseSlot::new();
        slot.complete(ActorReply::Err(ActorError::OutOfOrder));
        assert_eq!(slot.wait(), Err(ActorError::OutOfOrder));
    }

    #[test]
    #[should_panic(expected = "consumed twice")]
    fn double_consume_panics() {
        let slot = ResponseSlot::new();
        slot.complete(ActorReply::Ok);
        let _ = slot.wait();
        let _ = slot.wait();
    }

    #[test]
    #[should_panic(expected = "completed twice")]
    fn double_complete_panics() {
        let slot = ResponseSlot::new();
        slot.complete(ActorReply::Ok);
        slot.complete(ActorReply::Ok);
    }
}
