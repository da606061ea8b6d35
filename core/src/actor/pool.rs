//! Fixed-size worker pool draining actor mailboxes.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::catalog::Routing;
use crate::stats::PoolStats;

/// Idle backoff between passes that processed nothing.
const IDLE_SLEEP: Duration = Duration::from_micros(1);

/// A fixed set of worker threads that repeatedly sweep every alive actor in
/// the routing table, processing at most one message per actor per pass.
///
/// Workers share the routing table through an `Arc`, so the table never moves
/// underneath them; the pool must still be shut down before the catalog
/// deinitialises its actors.
pub struct ActorPool {
    workers: Vec<JoinHandle<()>>,
    shutdown: Arc<AtomicBool>,
    stats: Arc<PoolStats>,
}

impl ActorPool {
    /// Spawns `size` workers (`0` derives the count from available CPU
    /// parallelism) over the shared routing table.
    pub fn start(size: usize, routing: Arc<Routing>) -> ActorPool {
        let size = if size == 0 {
            thread::available_parallelism().map_or(1, |n| n.get())
        } else {
            size
        };
        let shutdown = Arc::new(AtomicBool::new(false));
        let stats = Arc::new(PoolStats::new());

        let mut workers = Vec::with_capacity(size);
        for worker_id in 0..size {
            let routing = Arc::clone(&routing);
            let shutdown = Arc::clone(&shutdown);
            let stats = Arc::clone(&stats);
            let handle = thread::Builder::new()
                .name(format!("tau-worker-{}", worker_id))
                .spawn(move || worker_loop(&routing, &shutdown, &stats))
                .expect("failed to spawn pool worker");
            workers.push(handle);
        }
        log::info!("actor pool started with {} workers", size);

        ActorPool {
            workers,
            shutdown,
            stats,
        }
    }

    pub fn size(&self) -> usize {
        self.workers.len()
    }

    pub fn stats(&self) -> &PoolStats {
        &self.stats
    }

    /// Flags shutdown and joins every worker.
    pub fn shutdown(&mut self) {
        if self.workers.is_empty() {
            return;
        }
        self.shutdown.store(true, Ordering::Release);
        for handle in self.workers.drain(..) {
            if let Err(e) = handle.join() {
                log::error!("pool worker panicked: {:?}", e);
            }
        }
        log::info!("actor pool stopped ({})", self.stats);
    }
}

impl Drop for ActorPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn worker_loop(routing: &Routing, shutdown: &AtomicBool, stats: &PoolStats) {
    while !shutdown.load(Ordering::Acquire) {
        let processed = routing.drain_pass();
        stats.worker_iterations.fetch_add(1, Ordering::Relaxed);
        if processed == 0 {
            stats.worker_idle_iterations.fetch_add(1, Ordering::Relaxed);
            thread::sleep(IDLE_SLEEP);
        } else {
            stats.messages_processed.fetch_add(processed, Ordering::Relaxed);
        }
    }
}
