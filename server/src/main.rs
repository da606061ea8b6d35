//! The Tau server binary.
//!
//! Takes no flags: reads `tau.toml` from the working directory when present,
//! otherwise runs on the built-in defaults. Logging is configured through
//! `RUST_LOG`. The process runs until terminated; SIGINT/SIGTERM trigger a
//! clean shutdown that drains the worker pool and stops every actor.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::Result;

use tau_core::catalog::Catalog;
use tau_core::config::{default_config, load_config};
use tau_core::server::Server;

const CONFIG_PATH: &str = "tau.toml";

fn main() -> Result<()> {
    env_logger::init();

    let config = if Path::new(CONFIG_PATH).exists() {
        log::info!("loading configuration from {}", CONFIG_PATH);
        load_config(CONFIG_PATH)?
    } else {
        default_config()
    };

    let mut catalog = Catalog::open(config.clone())?;
    catalog.start_workers();
    let catalog = Arc::new(catalog);

    let server = Server::bind(&config, Arc::clone(&catalog))?;

    let shutdown = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&shutdown);
    ctrlc::set_handler(move || {
        log::info!("termination signal received");
        flag.store(true, Ordering::Release);
    })?;

    server.run(&shutdown)?;
    log::info!("shut down cleanly");
    Ok(())
}
