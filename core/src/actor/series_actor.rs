//! The actor owning one series and its mailbox.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use crate::actor::mailbox::Mailbox;
use crate::actor::response_slot::{ActorError, ActorReply};
use crate::actor::ActorMessage;
use crate::storage::file_segment::FileSegment;
use crate::storage::series::Series;
use crate::storage::{Label, StorageError};

/// The storage behind an actor: an in-memory series or a single file-backed
/// segment.
pub enum SeriesStore {
    Memory(Series<f64>),
    File(FileSegment<f64>),
}

impl SeriesStore {
    fn append(&mut self, ts: i64, value: f64) -> Result<(), StorageError> {
        match self {
            SeriesStore::Memory(series) => series.append(ts, value),
            SeriesStore::File(segment) => segment.append(ts, value),
        }
    }

    fn at(&self, ts: i64) -> Option<f64> {
        match self {
            SeriesStore::Memory(series) => series.at(ts),
            SeriesStore::File(segment) => segment.at(ts),
        }
    }

    pub fn count(&self) -> usize {
        match self {
            SeriesStore::Memory(series) => series.count(),
            SeriesStore::File(segment) => segment.count(),
        }
    }
}

/// A single-consumer owner of one series.
///
/// The `processing` flag is a compare-and-set gate: whichever worker wins it
/// drains at most one message, so actor state is only ever touched by one
/// thread at a time. `stop` flips `alive` and then waits out any in-flight
/// dispatch before the actor may be dropped.
pub struct SeriesActor {
    label: Label,
    mailbox: Mailbox,
    // The processing gate keeps this lock uncontended; it exists so the
    // store can be mutated through a shared reference.
    store: Mutex<SeriesStore>,
    alive: AtomicBool,
    processing: AtomicBool,
}

impl SeriesActor {
    /// Creates an actor over a fresh in-memory series.
    pub fn in_memory(
        label: Label,
        segment_capacity: usize,
        max_segments: usize,
        mailbox_capacity: usize,
    ) -> Result<Self, StorageError> {
        let series = Series::new(label, segment_capacity, max_segments)?;
        Ok(Self::with_store(
            label,
            SeriesStore::Memory(series),
            mailbox_capacity,
        ))
    }

    /// Creates an actor over a fresh file-backed segment in `data_dir`.
    pub fn file_backed(
        label: Label,
        data_dir: &Path,
        capacity: usize,
        mailbox_capacity: usize,
    ) -> Result<Self, StorageError> {
        let path = data_dir.join(label.file_name());
        let segment = FileSegment::create(path, capacity)?;
        Ok(Self::with_store(
            label,
            SeriesStore::File(segment),
            mailbox_capacity,
        ))
    }

    /// Wraps an already-opened store, e.g. a segment discovered at startup.
    pub fn with_store(label: Label, store: SeriesStore, mailbox_capacity: usize) -> Self {
        SeriesActor {
            label,
            mailbox: Mailbox::with_capacity(mailbox_capacity),
            store: Mutex::new(store),
            alive: AtomicBool::new(true),
            processing: AtomicBool::new(false),
        }
    }

    pub fn label(&self) -> &Label {
        &self.label
    }

    pub fn mailbox(&self) -> &Mailbox {
        &self.mailbox
    }

    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }

    /// Observations currently stored.
    pub fn count(&self) -> usize {
        self.store.lock().expect("actor store lock poisoned").count()
    }

    /// Tries to process one message. Returns `true` if a message was
    /// dispatched, `false` if the mailbox was empty or another worker holds
    /// the processing gate.
    pub fn process_one(&self) -> bool {
        if !self.is_alive() {
            return false;
        }
        if self
            .processing
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            return false;
        }
        let processed = match self.mailbox.try_recv() {
            Some(msg) => {
                self.dispatch(msg);
                true
            }
            None => false,
        };
        self.processing.store(false, Ordering::Release);
        processed
    }

    /// Marks the actor dead and waits for any in-flight dispatch to finish.
    /// After `stop` returns no worker can observe the actor again.
    pub fn stop(&self) {
        self.alive.store(false, Ordering::Release);
        while self.processing.load(Ordering::Acquire) {
            std::hint::spin_loop();
        }
    }

    /// Fails every message still queued after a stop, so no requester is
    /// left blocked on its slot.
    pub fn reject_pending(&self) {
        while let Some(msg) = self.mailbox.try_recv() {
            let (ActorMessage::Append { reply, .. } | ActorMessage::QueryPoint { reply, .. }) =
                msg;
            reply.complete(ActorReply::Err(ActorError::Internal));
        }
    }

    fn dispatch(&self, msg: ActorMessage) {
        let mut store = self.store.lock().expect("actor store lock poisoned");
        match msg {
            ActorMessage::Append { ts, value, reply } => {
                let outcome = match store.append(ts, value) {
                    Ok(()) => ActorReply::Ok,
                    Err(StorageError::OutOfOrder) => ActorReply::Err(ActorError::OutOfOrder),
                    Err(err) => {
                        log::debug!("append to '{}' failed: {}", self.label, err);
                        ActorReply::Err(ActorError::OutOfMemory)
                    }
                };
                reply.complete(outcome);
            }
            ActorMessage::QueryPoint { ts, reply } => {
                let outcome = match store.at(ts) {
                    Some(value) => ActorReply::Value(value),
                    None => ActorReply::Ok,
                };
                reply.complete(outcome);
            }
        }
    }
}
