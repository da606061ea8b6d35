//! Bounded FIFO mailbox for actor messages.

use crossbeam::channel::{bounded, Receiver, Sender};

use crate::actor::ActorMessage;
use crate::stats::MailboxStats;

/// Default mailbox capacity.
pub const DEFAULT_MAILBOX_CAPACITY: usize = 1024;

/// A bounded multi-producer, single-consumer message queue.
///
/// Producers never block: a full mailbox rejects the message and bumps
/// `send_failures`. FIFO order is preserved per producer; the actor's
/// processing gate guarantees a single consumer.
pub struct Mailbox {
    tx: Sender<ActorMessage>,
    rx: Receiver<ActorMessage>,
    stats: MailboxStats,
}

impl Mailbox {
    pub fn with_capacity(capacity: usize) -> Self {
        let (tx, rx) = bounded(capacity.max(1));
        Mailbox {
            tx,
            rx,
            stats: MailboxStats::new(),
        }
    }

    /// Enqueues a message. Returns `false` when the mailbox is full.
    pub fn try_send(&self, msg: ActorMessage) -> bool {
        use std::sync::atomic::Ordering;
        match self.tx.try_send(msg) {
            Ok(()) => {
                self.stats.messages_sent.fetch_add(1, Ordering::Relaxed);
                true
            }
            Err(_) => {
                self.stats.send_failures.fetch_add(1, Ordering::Relaxed);
                false
            }
        }
    }

    /// Dequeues the oldest message, if any.
    pub fn try_recv(&self) -> Option<ActorMessage> {
        use std::sync::atomic::Ordering;
        match self.rx.try_recv() {
            Ok(msg) => {
                self.stats.messages_received.fetch_add(1, Ordering::Relaxed);
                Some(msg)
            }
            Err(_) => None,
        }
    }

    pub fn queue_depth(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    pub fn stats(&self) -> &MailboxStats {
        &self.stats
    }
}

impl Default for Mailbox {
    fn default() -> Self {
        Mailbox::with_capacity(DEFAULT_MAILBOX_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actor::response_slot::ResponseSlot;
    use std::sync::Arc;

    fn append_msg(ts: i64) -> ActorMessage {
        ActorMessage::Append {
            ts,
            value: 0.0,
            reply: Arc::new(ResponseSlot::new()),
        }
    }

    #[test]
    fn fifo_order_single_producer() {
        let mailbox = Mailbox::with_capacity(8);
        for ts in 0..5 {
            assert!(mailbox.try_send(append_msg(ts)));
        }
        assert_eq!(mailbox.queue_depth(), 5);
        for expect in 0..5 {
            match mailbox.try_recv() {
                Some(ActorMessage::Append { ts, .. }) => assert_eq!(ts, expect),
                other => panic!("unexpected message: {:?}", other.is_some()),
            }
        }
        assert!(mailbox.is_empty());
        assert!(mailbox.try_recv().is_none());
    }

    #[test]
    fn full_mailbox_rejects_and_counts() {
        let mailbox = Mailbox::with_capacity(2);
        assert!(mailbox.try_send(append_msg(1)));
        assert!(mailbox.try_send(append_msg(2)));
        assert!(!mailbox.try_send(append_msg(3)));
        assert!(!mailbox.try_send(append_msg(4)));

        assert_eq!(mailbox.stats().get_messages_sent(), 2);
        assert_eq!(mailbox.stats().get_send_failures(), 2);
        assert_eq!(mailbox.queue_depth(), 2);

        // Draining frees a slot for the next send.
        assert!(mailbox.try_recv().is_some());
        assert!(mailbox.try_send(append_msg(5)));
        assert_eq!(mailbox.stats().get_messages_received(), 1);
    }
}
