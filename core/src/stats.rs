//! Statistics tracking for mailboxes, the worker pool and the server.
//!
//! All counters are monotonic atomics; readers see an eventually consistent
//! snapshot.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::protocol::OpCode;

/// Per-mailbox counters.
#[derive(Default)]
pub struct MailboxStats {
    /// Messages accepted by `try_send`.
    pub messages_sent: AtomicU64,

    /// Messages handed out by `try_recv`.
    pub messages_received: AtomicU64,

    /// `try_send` calls rejected because the mailbox was full.
    pub send_failures: AtomicU64,
}

impl MailboxStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_messages_sent(&self) -> u64 {
        self.messages_sent.load(Ordering::Relaxed)
    }

    pub fn get_messages_received(&self) -> u64 {
        self.messages_received.load(Ordering::Relaxed)
    }

    pub fn get_send_failures(&self) -> u64 {
        self.send_failures.load(Ordering::Relaxed)
    }
}

impl fmt::Display for MailboxStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "sent: {}, received: {}, send failures: {}",
            self.get_messages_sent(),
            self.get_messages_received(),
            self.get_send_failures(),
        )
    }
}

/// Worker-pool counters.
#[derive(Default)]
pub struct PoolStats {
    /// Messages dispatched by workers across all actors.
    pub messages_processed: AtomicU64,

    /// Full passes over the actor table.
    pub worker_iterations: AtomicU64,

    /// Passes that processed nothing and backed off.
    pub worker_idle_iterations: AtomicU64,
}

impl PoolStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_messages_processed(&self) -> u64 {
        self.messages_processed.load(Ordering::Relaxed)
    }

    pub fn get_worker_iterations(&self) -> u64 {
        self.worker_iterations.load(Ordering::Relaxed)
    }

    pub fn get_worker_idle_iterations(&self) -> u64 {
        self.worker_idle_iterations.load(Ordering::Relaxed)
    }
}

impl fmt::Display for PoolStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "processed: {}, iterations: {}, idle iterations: {}",
            self.get_messages_processed(),
            self.get_worker_iterations(),
            self.get_worker_idle_iterations(),
        )
    }
}

/// Server-wide counters, shared by every connection handler.
#[derive(Default)]
pub struct ServerStats {
    pub connections_accepted: AtomicU64,
    pub connections_closed: AtomicU64,

    /// Frames rejected by the header codec.
    pub decode_errors: AtomicU64,

    /// Failed CONNECT attempts.
    pub auth_failures: AtomicU64,

    // Request counters by opcode group.
    pub requests_control: AtomicU64,
    pub requests_series: AtomicU64,
    pub requests_append: AtomicU64,
    pub requests_query: AtomicU64,
    pub requests_lens: AtomicU64,
}

impl ServerStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bumps the request counter for `opcode`.
    pub fn record_request(&self, opcode: OpCode) {
        let counter = match opcode {
            OpCode::Connect | OpCode::Disconnect | OpCode::Ping | OpCode::Pong => {
                &self.requests_control
            }
            OpCode::CreateSeries | OpCode::DropSeries => &self.requests_series,
            OpCode::Append => &self.requests_append,
            OpCode::QueryPoint => &self.requests_query,
            OpCode::CreateLens
            | OpCode::DropLens
            | OpCode::QueryLens
            | OpCode::ComposeLens
            | OpCode::ListLenses => &self.requests_lens,
            // Response opcodes never arrive as requests; count them with
            // control traffic if a client sends one anyway.
            OpCode::Ok | OpCode::Err => &self.requests_control,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

impl fmt::Display for ServerStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "connections: {} accepted / {} closed, decode errors: {}, auth failures: {}, \
             requests: {} control, {} series, {} append, {} query, {} lens",
            self.connections_accepted.load(Ordering::Relaxed),
            self.connections_closed.load(Ordering::Relaxed),
            self.decode_errors.load(Ordering::Relaxed),
            self.auth_failures.load(Ordering::Relaxed),
            self.requests_control.load(Ordering::Relaxed),
            self.requests_series.load(Ordering::Relaxed),
            self.requests_append.load(Ordering::Relaxed),
            self.requests_query.load(Ordering::Relaxed),
            self.requests_lens.load(Ordering::Relaxed),
        )
    }
}
