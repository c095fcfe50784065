//! Locate, bootstrap, run, repeat.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::context::GroupCache;
use crate::error::{Error, Result};
use crate::loot::ItemCatalog;
use crate::memory::ReadMemory;
use crate::session::Session;
use crate::shutdown::ShutdownSignal;
use crate::snapshot::{SnapshotCell, WorldSnapshot};
use crate::world::{WorldLocator, WorldRoot};

/// Pause after a failed bootstrap before locating again.
const BOOTSTRAP_RETRY: Duration = Duration::from_secs(1);

/// Owns everything that outlives a single session.
pub struct Engine {
    config: Config,
    catalog: ItemCatalog,
    snapshot: Arc<SnapshotCell>,
    group_cache: Mutex<GroupCache>,
}

impl Engine {
    pub fn new(config: Config, catalog: ItemCatalog) -> Self {
        Self {
            config,
            catalog,
            snapshot: Arc::new(SnapshotCell::new()),
            group_cache: Mutex::new(GroupCache::new()),
        }
    }

    /// Seed the cross-session group cache, e.g. from a previous run.
    pub fn with_group_cache(self, cache: GroupCache) -> Self {
        *self.group_cache.lock() = cache;
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Shared handle consumers poll for the latest snapshot.
    pub fn snapshot_cell(&self) -> Arc<SnapshotCell> {
        Arc::clone(&self.snapshot)
    }

    pub fn snapshot(&self) -> Arc<WorldSnapshot> {
        self.snapshot.load()
    }

    pub fn group_cache(&self) -> GroupCache {
        self.group_cache.lock().clone()
    }

    /// Locate the world once without bootstrapping a session.
    pub fn locate<R: ReadMemory + ?Sized>(
        &self,
        reader: &R,
        shutdown: &Arc<ShutdownSignal>,
    ) -> Result<WorldRoot> {
        self.config.validate()?;
        WorldLocator::new(&self.config.layout, &self.config.locator).locate(reader, shutdown)
    }

    /// Run sessions back to back until `shutdown` fires.
    ///
    /// An ended session publishes an idle snapshot and the locator starts
    /// over. Only configuration errors are returned.
    pub fn run<R: ReadMemory + ?Sized>(&self, reader: &R, shutdown: &Arc<ShutdownSignal>) -> Result<()> {
        self.config.validate()?;
        let locator = WorldLocator::new(&self.config.layout, &self.config.locator);
        info!(
            "Engine starting (layout {:?}, {} catalog items)",
            self.config.layout.version,
            self.catalog.len()
        );

        while !shutdown.is_shutdown() {
            self.snapshot.set_idle();
            let root = match locator.locate_blocking(reader, shutdown) {
                Ok(root) => root,
                Err(Error::Cancelled) => break,
                Err(e) => {
                    error!("Locator failed: {}", e);
                    shutdown.wait(BOOTSTRAP_RETRY);
                    continue;
                }
            };

            let cache = self.group_cache.lock().clone();
            let session = match Session::bootstrap(
                reader,
                &self.config,
                &self.catalog,
                &self.snapshot,
                root,
                &cache,
                shutdown,
            ) {
                Ok(session) => session,
                Err(e) => {
                    warn!("Session bootstrap failed: {}", e);
                    shutdown.wait(BOOTSTRAP_RETRY);
                    continue;
                }
            };

            let result = session.run();
            session.export_groups(&mut self.group_cache.lock());
            match result {
                Ok(()) => {}
                Err(Error::SessionEnded) => info!("Waiting for the next world"),
                Err(e) => warn!("Session stopped with error: {}", e),
            }
        }

        self.snapshot.set_idle();
        info!("Engine stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixture::WorldFixture;

    #[test]
    fn test_run_rejects_invalid_config() {
        let engine = Engine::new(Config::default(), ItemCatalog::default());
        let shutdown = Arc::new(ShutdownSignal::new());
        let image = crate::memory::MemoryImage::new();
        assert!(matches!(
            engine.run(&image, &shutdown),
            Err(Error::InvalidLayout(_))
        ));
    }

    #[test]
    fn test_run_returns_when_cancelled_while_idle() {
        let fixture = WorldFixture::new("woods");
        fixture.end_session();
        let engine = Engine::new(fixture.config(), fixture.catalog());
        let shutdown = Arc::new(ShutdownSignal::new());
        let image = fixture.image();

        std::thread::scope(|s| {
            let handle = s.spawn(|| engine.run(&*image, &shutdown));
            std::thread::sleep(Duration::from_millis(30));
            shutdown.trigger();
            handle.join().unwrap().unwrap();
        });
        assert!(!engine.snapshot().is_active());
    }

    #[test]
    fn test_locate_once() {
        let fixture = WorldFixture::new("shoreline");
        let engine = Engine::new(fixture.config(), fixture.catalog());
        let root = engine
            .locate(&*fixture.image(), &Arc::new(ShutdownSignal::new()))
            .unwrap();
        assert_eq!(root.address, fixture.world());
        assert_eq!(root.map_id, "shoreline");
    }
}
