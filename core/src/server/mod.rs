//! TCP listener and connection lifecycle.
//!
//! The server binds one IPv4 endpoint and spawns a detached handler thread
//! per accepted connection. Accept errors are logged and the loop continues;
//! a shutdown flag (typically flipped by a termination handler) ends the
//! loop, after which dropping the catalog drains the worker pool and stops
//! every actor.

mod handler;
pub mod session;

use std::io;
use std::net::{SocketAddr, TcpListener};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};

pub use handler::Handler;
pub use session::Session;

use crate::catalog::Catalog;
use crate::config::RuntimeConfig;
use crate::stats::ServerStats;
use crate::storage::LABEL_LEN;

/// Poll interval for the shutdown flag while the listener is idle.
const ACCEPT_POLL: Duration = Duration::from_millis(50);

/// A bound, not-yet-running server.
pub struct Server {
    listener: TcpListener,
    local_addr: SocketAddr,
    catalog: Arc<Catalog>,
    stats: Arc<ServerStats>,
    token: [u8; LABEL_LEN],
}

impl Server {
    /// Binds the configured endpoint. Fails fast when the address is in use
    /// or not bindable; the caller decides whether that is fatal.
    pub fn bind(config: &RuntimeConfig, catalog: Arc<Catalog>) -> Result<Server> {
        let endpoint = format!("{}:{}", config.server.address, config.server.port);
        let listener = TcpListener::bind(&endpoint)
            .with_context(|| format!("failed to bind {}", endpoint))?;
        let local_addr = listener.local_addr().context("listener has no local address")?;
        log::info!("listening on {}", local_addr);

        Ok(Server {
            listener,
            local_addr,
            catalog,
            stats: Arc::new(ServerStats::new()),
            token: config.server.token(),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn stats(&self) -> &Arc<ServerStats> {
        &self.stats
    }

    /// Accepts connections until `shutdown` is set, spawning one handler
    /// thread per connection.
    pub fn run(&self, shutdown: &AtomicBool) -> Result<()> {
        self.listener
            .set_nonblocking(true)
            .context("failed to make listener non-blocking")?;

        let mut connection_id = 0u64;
        while !shutdown.load(Ordering::Acquire) {
            match self.listener.accept() {
                Ok((stream, peer)) => {
                    // Handlers block on socket reads; the accept loop alone
                    // stays non-blocking.
                    if let Err(e) = stream.set_nonblocking(false) {
                        log::warn!("dropping connection from {}: {}", peer, e);
                        continue;
                    }
                    self.stats
                        .connections_accepted
                        .fetch_add(1, Ordering::Relaxed);

                    let catalog = Arc::clone(&self.catalog);
                    let stats = Arc::clone(&self.stats);
                    let token = self.token;
                    let spawned = thread::Builder::new()
                        .name(format!("tau-conn-{}", connection_id))
                        .spawn(move || {
                            let handler =
                                Handler::new(&catalog, &stats, token, Session::new(peer));
                            handler.handle(stream);
                        });
                    if let Err(e) = spawned {
                        log::error!("failed to spawn handler for {}: {}", peer, e);
                    }
                    connection_id += 1;
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    thread::sleep(ACCEPT_POLL);
                }
                Err(e) => {
                    log::warn!("accept failed: {}", e);
                }
            }
        }

        log::info!("listener stopped ({})", self.stats);
        Ok(())
    }
}
