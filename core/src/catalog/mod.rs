//! Label-indexed routing and lifecycle.
//!
//! The catalog owns every actor and every lens expression. A single
//! reader/writer lock protects the two routing maps (and only the maps:
//! it is never held while waiting on a response slot). Topology changes
//! take the lock exclusively; request routing takes it shared, clones the
//! actor handle, and releases before the synchronous wait.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use hashlink::LinkedHashMap;
use thiserror::Error;

use crate::actor::{
    ActorError, ActorMessage, ActorPool, ResponseSlot, SeriesActor, SeriesStore,
};
use crate::config::{Backend, RuntimeConfig};
use crate::lens::{LensExpr, Transform};
use crate::storage::file_segment::FileSegment;
use crate::storage::{Label, StorageError};

/// Upper bound on in-memory segments chained behind one series.
const MAX_SEGMENTS_PER_SERIES: usize = 1024;

/// Upper bound on lens source chains. Only reachable by re-creating a
/// dropped lens into a loop; treated as not found rather than recursed.
const MAX_LENS_DEPTH: usize = 32;

/// Errors surfaced by catalog operations.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum CatalogError {
    #[error("catalog full")]
    CatalogFull,

    #[error("series already exists")]
    SeriesAlreadyExists,

    #[error("series not found")]
    SeriesNotFound,

    #[error("lens already exists")]
    LensAlreadyExists,

    #[error("lens not found")]
    LensNotFound,

    #[error("timestamp out of order")]
    OutOfOrder,

    #[error("out of memory")]
    OutOfMemory,

    #[error("internal error")]
    Internal,
}

pub(crate) struct Tables {
    pub actors: LinkedHashMap<Label, Arc<SeriesActor>>,
    pub lenses: LinkedHashMap<Label, LensExpr>,
}

/// The shared routing table: both maps behind one reader/writer lock.
/// Workers hold this through an `Arc` for the lifetime of the pool.
pub struct Routing {
    tables: RwLock<Tables>,
}

impl Routing {
    pub fn new() -> Self {
        Routing {
            tables: RwLock::new(Tables {
                actors: LinkedHashMap::new(),
                lenses: LinkedHashMap::new(),
            }),
        }
    }

    pub(crate) fn read(&self) -> RwLockReadGuard<'_, Tables> {
        self.tables.read().expect("routing lock poisoned")
    }

    pub(crate) fn write(&self) -> RwLockWriteGuard<'_, Tables> {
        self.tables.write().expect("routing lock poisoned")
    }

    /// One worker pass: offer every alive actor the chance to process one
    /// message. Returns how many messages were processed.
    pub fn drain_pass(&self) -> u64 {
        let tables = self.read();
        let mut processed = 0;
        for actor in tables.actors.values() {
            if actor.is_alive() && actor.process_one() {
                processed += 1;
            }
        }
        processed
    }

    /// Registers an actor directly, bypassing catalog bookkeeping. Protocol
    /// traffic goes through [`Catalog::create_series`].
    pub fn insert_actor(&self, label: Label, actor: Arc<SeriesActor>) {
        self.write().actors.insert(label, actor);
    }
}

impl Default for Routing {
    fn default() -> Self {
        Routing::new()
    }
}

/// The label-routed owner of all actors and lens expressions.
pub struct Catalog {
    routing: Arc<Routing>,
    pool: Option<ActorPool>,
    config: RuntimeConfig,
    data_dir: Option<PathBuf>,
}

impl Catalog {
    /// Builds a catalog from the runtime configuration. With the file
    /// backend this creates the data directory if needed and re-opens every
    /// `.tau` segment found there; corrupt or unreadable files are logged
    /// and skipped. The worker pool is not started yet; see
    /// [`start_workers`](Catalog::start_workers).
    pub fn open(config: RuntimeConfig) -> anyhow::Result<Catalog> {
        let routing = Arc::new(Routing::new());
        let data_dir = match config.storage.default_backend {
            Backend::File => {
                let dir = PathBuf::from(&config.storage.data_dir);
                fs::create_dir_all(&dir)?;
                Some(dir)
            }
            Backend::Segment => None,
        };

        let catalog = Catalog {
            routing,
            pool: None,
            config,
            data_dir,
        };
        if let Some(dir) = catalog.data_dir.clone() {
            catalog.discover(&dir)?;
        }
        Ok(catalog)
    }

    /// Starts the background worker pool. Until this is called, requests
    /// self-drain on the caller's thread.
    pub fn start_workers(&mut self) {
        if self.pool.is_none() {
            self.pool = Some(ActorPool::start(
                self.config.server.actor_pool_size,
                Arc::clone(&self.routing),
            ));
        }
    }

    /// Stops the pool and every actor. Idempotent; also run on drop.
    pub fn shutdown(&mut self) {
        if let Some(mut pool) = self.pool.take() {
            pool.shutdown();
        }
        let actors: Vec<Arc<SeriesActor>> = {
            let mut tables = self.write();
            let drained = tables.actors.values().cloned().collect();
            tables.actors.clear();
            tables.lenses.clear();
            drained
        };
        for actor in &actors {
            actor.stop();
            actor.reject_pending();
        }
        if !actors.is_empty() {
            log::info!("catalog stopped {} actors", actors.len());
        }
    }

    pub fn routing(&self) -> &Arc<Routing> {
        &self.routing
    }

    pub fn series_count(&self) -> usize {
        self.read().actors.len()
    }

    /// Creates a new empty series behind `label`.
    pub fn create_series(&self, label: Label) -> Result<(), CatalogError> {
        let mut tables = self.write();
        if tables.actors.len() >= self.config.server.catalog_capacity {
            return Err(CatalogError::CatalogFull);
        }
        if tables.actors.contains_key(&label) {
            return Err(CatalogError::SeriesAlreadyExists);
        }

        let actor = self.build_actor(label).map_err(|err| {
            log::error!("failed to create series '{}': {}", label, err);
            match err {
                StorageError::Io(_) => CatalogError::Internal,
                _ => CatalogError::OutOfMemory,
            }
        })?;
        tables.actors.insert(label, Arc::new(actor));
        log::debug!("created series '{}'", label);
        Ok(())
    }

    /// Removes a series: unroutes it, stops its actor, and deletes its
    /// backing file when one exists.
    pub fn drop_series(&self, label: Label) -> Result<(), CatalogError> {
        let actor = self
            .write()
            .actors
            .remove(&label)
            .ok_or(CatalogError::SeriesNotFound)?;
        actor.stop();
        actor.reject_pending();

        if let Some(dir) = &self.data_dir {
            let path = dir.join(label.file_name());
            match fs::remove_file(&path) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => log::warn!("failed to delete {}: {}", path.display(), e),
            }
        }
        log::debug!("dropped series '{}'", label);
        Ok(())
    }

    /// Appends one observation to the labelled series.
    pub fn append(&self, label: Label, ts: i64, value: f64) -> Result<(), CatalogError> {
        self.request(label, |reply| ActorMessage::Append { ts, value, reply })
            .map(|_| ())
    }

    /// Looks up the value stored at exactly `ts`.
    pub fn query_point(&self, label: Label, ts: i64) -> Result<Option<f64>, CatalogError> {
        self.request(label, |reply| ActorMessage::QueryPoint { ts, reply })
    }

    /// Registers a lens over an existing series or lens.
    pub fn create_lens(
        &self,
        label: Label,
        source: Label,
        transform: Transform,
    ) -> Result<(), CatalogError> {
        let mut tables = self.write();
        if tables.lenses.contains_key(&label) {
            return Err(CatalogError::LensAlreadyExists);
        }
        if tables.actors.contains_key(&label) {
            return Err(CatalogError::SeriesAlreadyExists);
        }
        if !tables.actors.contains_key(&source) && !tables.lenses.contains_key(&source) {
            return Err(CatalogError::SeriesNotFound);
        }
        tables.lenses.insert(
            label,
            LensExpr {
                label,
                source,
                transform,
            },
        );
        log::debug!("created lens '{}' over '{}'", label, source);
        Ok(())
    }

    pub fn drop_lens(&self, label: Label) -> Result<(), CatalogError> {
        self.write()
            .lenses
            .remove(&label)
            .map(|_| ())
            .ok_or(CatalogError::LensNotFound)
    }

    /// Registers `new` as the composition of two existing lenses: it reads
    /// through `first` and then applies `second`'s transform.
    pub fn compose_lens(
        &self,
        new: Label,
        first: Label,
        second: Label,
    ) -> Result<(), CatalogError> {
        let mut tables = self.write();
        if tables.lenses.contains_key(&new) {
            return Err(CatalogError::LensAlreadyExists);
        }
        if tables.actors.contains_key(&new) {
            return Err(CatalogError::SeriesAlreadyExists);
        }
        if !tables.lenses.contains_key(&first) {
            return Err(CatalogError::LensNotFound);
        }
        let transform = match tables.lenses.get(&second) {
            Some(expr) => expr.transform,
            None => return Err(CatalogError::LensNotFound),
        };
        tables.lenses.insert(
            new,
            LensExpr {
                label: new,
                source: first,
                transform,
            },
        );
        Ok(())
    }

    /// Evaluates a lens at `ts`: resolves the source chain down to a series
    /// actor, queries the point, and applies the transforms source-first.
    /// Absence propagates untouched.
    pub fn query_lens(&self, label: Label, ts: i64) -> Result<Option<f64>, CatalogError> {
        let (actor_label, transforms) = {
            let tables = self.read();
            // The queried label itself must be a lens, even if a series
            // shares the name.
            let Some(expr) = tables.lenses.get(&label) else {
                return Err(CatalogError::LensNotFound);
            };
            let mut transforms = vec![expr.transform];
            let mut current = expr.source;
            loop {
                if let Some(expr) = tables.lenses.get(&current) {
                    if transforms.len() >= MAX_LENS_DEPTH {
                        return Err(CatalogError::LensNotFound);
                    }
                    transforms.push(expr.transform);
                    current = expr.source;
                } else if tables.actors.contains_key(&current) {
                    break;
                } else {
                    // Dangling source: the series behind the lens was
                    // dropped.
                    return Err(CatalogError::SeriesNotFound);
                }
            }
            (current, transforms)
        };

        let value = self.query_point(actor_label, ts)?;
        Ok(value.map(|v| {
            transforms
                .iter()
                .rev()
                .fold(v, |acc, transform| transform.apply(acc))
        }))
    }

    /// All lens labels in creation order.
    pub fn list_lenses(&self) -> Vec<Label> {
        self.read().lenses.keys().copied().collect()
    }

    /// Routes one message to the labelled actor and waits for the reply.
    /// The routing lock is only held for the lookup.
    fn request(
        &self,
        label: Label,
        build: impl FnOnce(Arc<ResponseSlot>) -> ActorMessage,
    ) -> Result<Option<f64>, CatalogError> {
        let actor = self
            .read()
            .actors
            .get(&label)
            .cloned()
            .ok_or(CatalogError::SeriesNotFound)?;

        let slot = Arc::new(ResponseSlot::new());
        if !actor.mailbox().try_send(build(Arc::clone(&slot))) {
            return Err(CatalogError::OutOfMemory);
        }

        // Without a worker pool the caller drains the mailbox itself.
        if self.pool.is_none() {
            while !slot.is_ready() {
                if !actor.process_one() {
                    std::hint::spin_loop();
                }
            }
        }

        slot.wait().map_err(|err| match err {
            ActorError::OutOfOrder => CatalogError::OutOfOrder,
            _ => CatalogError::OutOfMemory,
        })
    }

    fn build_actor(&self, label: Label) -> Result<SeriesActor, StorageError> {
        let storage = &self.config.storage;
        let mailbox_capacity = self.config.server.mailbox_capacity;
        match &self.data_dir {
            Some(dir) => SeriesActor::file_backed(
                label,
                dir,
                storage.segment_capacity_default,
                mailbox_capacity,
            ),
            None => SeriesActor::in_memory(
                label,
                storage.segment_capacity_default,
                MAX_SEGMENTS_PER_SERIES,
                mailbox_capacity,
            ),
        }
    }

    /// Scans `dir` for `.tau` segments and adopts each as an actor.
    fn discover(&self, dir: &Path) -> anyhow::Result<()> {
        let mut adopted = 0usize;
        for entry in fs::read_dir(dir)? {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    log::warn!("skipping unreadable directory entry: {}", e);
                    continue;
                }
            };
            let path = entry.path();
            if !path.is_file() || path.extension().and_then(|e| e.to_str()) != Some("tau") {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                log::warn!("skipping {}: non-UTF-8 name", path.display());
                continue;
            };
            let label = match Label::from_name(stem) {
                Ok(label) => label,
                Err(e) => {
                    log::warn!("skipping {}: {}", path.display(), e);
                    continue;
                }
            };
            let segment = match FileSegment::<f64>::open(&path) {
                Ok(segment) => segment,
                Err(e) => {
                    log::warn!("skipping {}: {}", path.display(), e);
                    continue;
                }
            };

            let mut tables = self.write();
            if tables.actors.len() >= self.config.server.catalog_capacity {
                log::warn!("catalog full, not adopting {}", path.display());
                break;
            }
            let actor = SeriesActor::with_store(
                label,
                SeriesStore::File(segment),
                self.config.server.mailbox_capacity,
            );
            tables.actors.insert(label, Arc::new(actor));
            adopted += 1;
        }
        if adopted > 0 {
            log::info!("adopted {} segment(s) from {}", adopted, dir.display());
        }
        Ok(())
    }

    fn read(&self) -> RwLockReadGuard<'_, Tables> {
        self.routing.read()
    }

    fn write(&self) -> RwLockWriteGuard<'_, Tables> {
        self.routing.write()
    }
}

impl Drop for Catalog {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::default_config;

    fn label(name: &str) -> Label {
        Label::from_name(name).unwrap()
    }

    fn memory_catalog() -> Catalog {
        Catalog::open(default_config()).unwrap()
    }

    fn file_catalog(dir: &Path) -> Catalog {
        let mut config = default_config();
        config.storage.default_backend = Backend::File;
        config.storage.data_dir = dir.display().to_string();
        config.storage.segment_capacity_default = 64;
        Catalog::open(config).unwrap()
    }

    #[test]
    fn create_append_query() {
        let catalog = memory_catalog();
        catalog.create_series(label("temperature_c")).unwrap();
        catalog.append(label("temperature_c"), 1000, 22.5).unwrap();

        assert_eq!(
            catalog.query_point(label("temperature_c"), 1000),
            Ok(Some(22.5))
        );
        assert_eq!(catalog.query_point(label("temperature_c"), 9999), Ok(None));
    }

    #[test]
    fn duplicate_and_missing_series() {
        let catalog = memory_catalog();
        catalog.create_series(label("a")).unwrap();
        assert_eq!(
            catalog.create_series(label("a")),
            Err(CatalogError::SeriesAlreadyExists)
        );
        assert_eq!(
            catalog.append(label("missing"), 1, 1.0),
            Err(CatalogError::SeriesNotFound)
        );
        assert_eq!(
            catalog.drop_series(label("missing")),
            Err(CatalogError::SeriesNotFound)
        );
    }

    #[test]
    fn out_of_order_leaves_series_untouched() {
        let catalog = memory_catalog();
        catalog.create_series(label("s")).unwrap();
        catalog.append(label("s"), 2000, 23.1).unwrap();

        assert_eq!(
            catalog.append(label("s"), 1500, 1.0),
            Err(CatalogError::OutOfOrder)
        );
        assert_eq!(catalog.query_point(label("s"), 1500), Ok(None));
        assert_eq!(catalog.query_point(label("s"), 2000), Ok(Some(23.1)));
    }

    #[test]
    fn catalog_capacity_cap() {
        let mut config = default_config();
        config.server.catalog_capacity = 2;
        let catalog = Catalog::open(config).unwrap();
        catalog.create_series(label("a")).unwrap();
        catalog.create_series(label("b")).unwrap();
        assert_eq!(
            catalog.create_series(label("c")),
            Err(CatalogError::CatalogFull)
        );
        // Dropping frees a slot.
        catalog.drop_series(label("a")).unwrap();
        catalog.create_series(label("c")).unwrap();
    }

    #[test]
    fn lens_create_query_drop() {
        let catalog = memory_catalog();
        catalog.create_series(label("altitude_m")).unwrap();
        catalog.append(label("altitude_m"), 100, 1500.0).unwrap();
        catalog
            .create_lens(label("altitude_ft"), label("altitude_m"), Transform::MetersToFeet)
            .unwrap();

        let value = catalog.query_lens(label("altitude_ft"), 100).unwrap();
        assert!((value.unwrap() - 4921.26).abs() < 1e-9);
        assert_eq!(catalog.query_lens(label("altitude_ft"), 101), Ok(None));

        catalog.drop_lens(label("altitude_ft")).unwrap();
        assert_eq!(
            catalog.query_lens(label("altitude_ft"), 100),
            Err(CatalogError::LensNotFound)
        );
    }

    #[test]
    fn query_lens_rejects_plain_series() {
        let catalog = memory_catalog();
        catalog.create_series(label("s")).unwrap();
        catalog.append(label("s"), 1, 1.0).unwrap();
        assert_eq!(
            catalog.query_lens(label("s"), 1),
            Err(CatalogError::LensNotFound)
        );
    }

    #[test]
    fn lens_requires_existing_source() {
        let catalog = memory_catalog();
        assert_eq!(
            catalog.create_lens(label("l"), label("missing"), Transform::Identity),
            Err(CatalogError::SeriesNotFound)
        );
    }

    #[test]
    fn lens_over_lens_composes() {
        let catalog = memory_catalog();
        catalog.create_series(label("celsius")).unwrap();
        catalog.append(label("celsius"), 1, 100.0).unwrap();
        catalog
            .create_lens(label("kelvin"), label("celsius"), Transform::CelsiusToKelvin)
            .unwrap();
        // A lens whose source is another lens.
        catalog
            .create_lens(label("kelvin_id"), label("kelvin"), Transform::Identity)
            .unwrap();

        assert_eq!(catalog.query_lens(label("kelvin"), 1), Ok(Some(373.15)));
        assert_eq!(catalog.query_lens(label("kelvin_id"), 1), Ok(Some(373.15)));
    }

    #[test]
    fn compose_requires_both_lenses() {
        let catalog = memory_catalog();
        catalog.create_series(label("c")).unwrap();
        catalog
            .create_lens(label("f"), label("c"), Transform::CelsiusToFahrenheit)
            .unwrap();

        assert_eq!(
            catalog.compose_lens(label("x"), label("f"), label("missing")),
            Err(CatalogError::LensNotFound)
        );
        assert_eq!(
            catalog.compose_lens(label("x"), label("missing"), label("f")),
            Err(CatalogError::LensNotFound)
        );

        catalog
            .create_lens(label("id"), label("c"), Transform::Identity)
            .unwrap();
        catalog.compose_lens(label("x"), label("f"), label("id")).unwrap();

        catalog.append(label("c"), 1, 0.0).unwrap();
        assert_eq!(catalog.query_lens(label("x"), 1), Ok(Some(32.0)));
    }

    #[test]
    fn list_lenses_in_creation_order() {
        let catalog = memory_catalog();
        catalog.create_series(label("s")).unwrap();
        for name in ["l1", "l2", "l3"] {
            catalog
                .create_lens(label(name), label("s"), Transform::Identity)
                .unwrap();
        }
        let labels = catalog.list_lenses();
        assert_eq!(labels, vec![label("l1"), label("l2"), label("l3")]);
    }

    #[test]
    fn file_backend_round_trips_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let catalog = file_catalog(dir.path());
            catalog.create_series(label("durable")).unwrap();
            for (ts, v) in [(10, 1.5), (20, 2.5), (30, 3.5)] {
                catalog.append(label("durable"), ts, v).unwrap();
            }
        }

        let catalog = file_catalog(dir.path());
        assert_eq!(catalog.series_count(), 1);
        for (ts, v) in [(10, 1.5), (20, 2.5), (30, 3.5)] {
            assert_eq!(catalog.query_point(label("durable"), ts), Ok(Some(v)));
        }
        assert_eq!(catalog.query_point(label("durable"), 15), Ok(None));
    }

    #[test]
    fn discovery_skips_corrupt_segments() {
        let dir = tempfile::tempdir().unwrap();
        {
            let catalog = file_catalog(dir.path());
            catalog.create_series(label("good")).unwrap();
            catalog.append(label("good"), 1, 1.0).unwrap();
        }
        // A file that is too short to be a segment.
        std::fs::write(dir.path().join("bad.tau"), b"not a segment").unwrap();
        // Unrelated files are ignored outright.
        std::fs::write(dir.path().join("notes.txt"), b"hello").unwrap();

        let catalog = file_catalog(dir.path());
        assert_eq!(catalog.series_count(), 1);
        assert_eq!(catalog.query_point(label("good"), 1), Ok(Some(1.0)));
    }

    #[test]
    fn drop_series_deletes_backing_file() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = file_catalog(dir.path());
        catalog.create_series(label("gone")).unwrap();
        let path = dir.path().join("gone.tau");
        assert!(path.exists());

        catalog.drop_series(label("gone")).unwrap();
        assert!(!path.exists());
    }

    #[test]
    fn workers_drain_requests() {
        let mut catalog = memory_catalog();
        catalog.start_workers();
        catalog.create_series(label("pooled")).unwrap();
        for ts in 0..100 {
            catalog.append(label("pooled"), ts, ts as f64).unwrap();
        }
        assert_eq!(catalog.query_point(label("pooled"), 42), Ok(Some(42.0)));
    }

    #[test]
    fn cross_series_parallel_appends() {
        use std::thread;

        let mut catalog = memory_catalog();
        catalog.start_workers();
        let catalog = Arc::new(catalog);

        let mut handles = Vec::new();
        for i in 0..8 {
            let catalog = Arc::clone(&catalog);
            handles.push(thread::spawn(move || {
                let name = format!("series_{}", i);
                let l = Label::from_name(&name).unwrap();
                catalog.create_series(l).unwrap();
                for ts in 0..1000i64 {
                    catalog.append(l, ts, (ts + i) as f64).unwrap();
                }
                assert_eq!(catalog.query_point(l, 500), Ok(Some((500 + i) as f64)));
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }
    }
}
