//! A single-node temporal database.
//!
//! Tau stores typed time series as partial functions from a signed 64-bit
//! timestamp to a fixed-size value and serves them over a length-prefixed
//! binary TCP protocol. The engine is built from a small set of layers:
//!
//! - [`storage`]: fixed-capacity columnar segments, in memory or backed by a
//!   checksummed memory-mapped file, chained into labelled series.
//! - [`lens`]: lazy, zero-copy pure transforms over series, composable and
//!   nameable at the protocol layer.
//! - [`actor`]: one actor per series with a bounded mailbox, drained by a
//!   fixed pool of worker threads; requesters block on one-shot response
//!   slots.
//! - [`catalog`]: the label-indexed routing table owning every actor and
//!   lens expression, including `.tau` segment discovery at startup.
//! - [`protocol`] and [`server`]: the 10-byte frame codec, per-connection
//!   session/auth state and the thread-per-connection listener.
//!
//! A minimal embedded use looks like:
//!
//! ```rust
//! use tau_core::catalog::Catalog;
//! use tau_core::config::default_config;
//! use tau_core::storage::Label;
//!
//! let catalog = Catalog::open(default_config()).unwrap();
//! let label = Label::from_name("temperature_c").unwrap();
//! catalog.create_series(label).unwrap();
//! catalog.append(label, 1000, 22.5).unwrap();
//! assert_eq!(catalog.query_point(label, 1000).unwrap(), Some(22.5));
//! ```

pub mod actor;
pub mod catalog;
pub mod config;
pub mod lens;
pub mod protocol;
pub mod server;
pub mod stats;
pub mod storage;

pub use self::catalog::Catalog;
pub use self::config::RuntimeConfig;
pub use self::server::Server;
pub use self::storage::{Label, TimeDomain};
