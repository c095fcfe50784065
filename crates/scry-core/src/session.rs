//! One activity session: the polling workers bound to a located world root.
//!
//! | Worker         | Default | Work                                             |
//! |----------------|---------|--------------------------------------------------|
//! | `registration` | 100 ms  | validity check, registry diff, vehicle operator   |
//! | `realtime`     | 8 ms    | rotation and position of every active entity      |
//! | `validation`   | 1 s     | transform self-healing                            |
//! | `slow`         | 250 ms  | loot pipeline, grouping, snapshot publishing      |
//!
//! A worker error ends only that iteration, except for session-terminal
//! errors, which trigger the session's shutdown signal so every worker
//! winds down and [`Session::run`] returns.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::context::{GroupCache, SessionContext};
use crate::error::{Error, Result};
use crate::grouping::refresh_groups;
use crate::loot::{ItemCatalog, LootIndex};
use crate::memory::unity::read_class_name;
use crate::memory::{ReadMemory, ReadMemoryExt, ScatterRound};
use crate::registry::EntityRegistry;
use crate::retry::{FixedDelay, RetryStrategy};
use crate::shutdown::ShutdownSignal;
use crate::snapshot::{SessionState, SnapshotCell, WorldSnapshot};
use crate::world::WorldRoot;

pub struct Session<'a, R: ReadMemory + ?Sized> {
    reader: &'a R,
    config: &'a Config,
    catalog: &'a ItemCatalog,
    snapshot: &'a SnapshotCell,
    root: WorldRoot,
    registry: EntityRegistry,
    loot: LootIndex,
    ctx: SessionContext,
    shutdown: Arc<ShutdownSignal>,
    activity_started: AtomicBool,
    terminal: Mutex<Option<Error>>,
}

impl<'a, R: ReadMemory + ?Sized> Session<'a, R> {
    /// Build the session state for `root`.
    ///
    /// `shutdown` is the caller's signal; the session works under a child of
    /// it, so ending the session never cancels the caller.
    pub fn bootstrap(
        reader: &'a R,
        config: &'a Config,
        catalog: &'a ItemCatalog,
        snapshot: &'a SnapshotCell,
        root: WorldRoot,
        group_cache: &GroupCache,
        shutdown: &Arc<ShutdownSignal>,
    ) -> Result<Self> {
        let registry = EntityRegistry::new(reader, root.address, &config.layout)?;
        let count = registry.player_count(reader, &config.layout)?;
        if count == 0 {
            return Err(Error::validation("registered player list is empty"));
        }
        let raid_id = registry.local().raid_id().unwrap_or_default().to_string();
        let ctx = SessionContext::with_group_cache(raid_id, group_cache);

        let session = Self {
            reader,
            config,
            catalog,
            snapshot,
            loot: LootIndex::new(root.address),
            root,
            registry,
            ctx,
            shutdown: shutdown.child(),
            activity_started: AtomicBool::new(false),
            terminal: Mutex::new(None),
        };
        if session.check_activity() == Some(true) {
            info!("Activity had already started");
            session.activity_started.store(true, Ordering::Relaxed);
        }
        info!(
            "Session started on {} ({} players, raid {:?})",
            session.root,
            count,
            session.ctx.raid_id()
        );
        Ok(session)
    }

    pub fn root(&self) -> &WorldRoot {
        &self.root
    }

    pub fn registry(&self) -> &EntityRegistry {
        &self.registry
    }

    pub fn loot(&self) -> &LootIndex {
        &self.loot
    }

    pub fn context(&self) -> &SessionContext {
        &self.ctx
    }

    pub fn shutdown_signal(&self) -> &Arc<ShutdownSignal> {
        &self.shutdown
    }

    pub fn activity_started(&self) -> bool {
        self.activity_started.load(Ordering::Relaxed)
    }

    /// Carry this session's groups over to the next one.
    pub fn export_groups(&self, cache: &mut GroupCache) {
        self.ctx.export_groups(cache);
    }

    /// Run the four workers until the session ends or is cancelled.
    ///
    /// Returns `Err(SessionEnded)` when the world went away, `Ok(())` when
    /// the caller's signal stopped the session.
    pub fn run(&self) -> Result<()> {
        let intervals = self.config.intervals;
        thread::scope(|s| {
            self.spawn(s, "registration", intervals.registration(), move || {
                self.poll_registration()
            });
            self.spawn(s, "realtime", intervals.realtime(), move || {
                self.poll_realtime();
                Ok(())
            });
            self.spawn(s, "validation", intervals.validation(), move || {
                self.poll_validation();
                Ok(())
            });
            self.spawn(s, "slow", intervals.loot(), move || self.poll_slow());
        });

        match self.terminal.lock().take() {
            Some(Error::Cancelled) | None => {
                info!("Session on {} stopped", self.root);
                Ok(())
            }
            Some(e) => {
                info!("Session on {} ended: {}", self.root, e);
                Err(e)
            }
        }
    }

    fn spawn<'scope, F>(
        &'scope self,
        scope: &'scope thread::Scope<'scope, '_>,
        name: &str,
        interval: Duration,
        work: F,
    ) where
        F: Fn() -> Result<()> + Send + 'scope,
        R: 'scope,
    {
        let spawned = thread::Builder::new()
            .name(format!("scry-{}", name))
            .spawn_scoped(scope, move || self.worker_loop(interval, work));
        if let Err(e) = spawned {
            error!("Failed to spawn {} worker: {}", name, e);
            self.end(Error::Io(e));
        }
    }

    fn worker_loop<F: Fn() -> Result<()>>(&self, interval: Duration, work: F) {
        let name = thread::current().name().unwrap_or("worker").to_string();
        debug!("{} started", name);
        while !self.shutdown.is_shutdown() {
            match work() {
                Ok(()) => {}
                Err(e) if e.is_terminal() => {
                    self.end(e);
                    break;
                }
                Err(e) => warn!("{}: {}", name, e),
            }
            if self.shutdown.wait(interval) {
                break;
            }
        }
        debug!("{} stopped", name);
    }

    /// Record the first terminal error and stop every worker.
    fn end(&self, error: Error) {
        {
            let mut terminal = self.terminal.lock();
            if terminal.is_none() {
                *terminal = Some(error);
            }
        }
        self.shutdown.trigger();
    }

    /// Run every worker's work once, in worker order.
    pub fn tick(&self) -> Result<()> {
        self.poll_registration()?;
        self.poll_realtime();
        self.poll_validation();
        self.poll_slow()
    }

    fn is_valid(&self) -> bool {
        let layout = &self.config.layout;
        let main_player = self
            .reader
            .read_ptr(self.root.address.offset(layout.world.main_player));
        if main_player.ok() != Some(self.registry.local().base()) {
            return false;
        }
        self.registry
            .player_count(self.reader, layout)
            .is_ok_and(|count| count > 0)
    }

    /// Fail with `SessionEnded` unless the world still looks alive within
    /// the configured retries.
    pub fn ensure_valid(&self) -> Result<()> {
        let retry = FixedDelay::new(self.config.session.valid_retries, self.config.session.valid_delay());
        match retry.run(&self.shutdown, |_| self.is_valid().then_some(())) {
            Some(()) => Ok(()),
            None if self.shutdown.is_shutdown() => Err(Error::Cancelled),
            None => Err(Error::SessionEnded),
        }
    }

    fn poll_registration(&self) -> Result<()> {
        self.ensure_valid()?;
        let layout = &self.config.layout;
        if let Err(e) = self
            .registry
            .refresh(self.reader, layout, &self.config.roles, &self.ctx)
        {
            warn!("Registry poll failed: {}", e);
            return Ok(());
        }
        if self.config.features.has_vehicle(&self.root.map_id) {
            match self.registry.try_allocate_vehicle_operator(self.reader, layout) {
                Ok(_) => {}
                Err(e) => debug!("No vehicle operator: {}", e),
            }
        }
        Ok(())
    }

    fn poll_realtime(&self) {
        let entities = self.registry.snapshot();
        let mut round = ScatterRound::new();
        for entity in &entities {
            entity.on_realtime_refresh(&mut round, self.reader, &self.config.layout);
        }
        round.execute(self.reader);
    }

    fn poll_validation(&self) {
        let entities = self.registry.snapshot();
        let mut round = ScatterRound::new();
        for entity in &entities {
            entity.on_validate_transform(&mut round, self.reader, &self.config.layout);
        }
        round.execute(self.reader);
    }

    fn poll_slow(&self) -> Result<()> {
        match self.loot.refresh(
            self.reader,
            &self.config.layout,
            &self.config.loot,
            self.catalog,
            &self.ctx,
            &self.registry,
            &self.shutdown,
        ) {
            Ok(_) => {}
            Err(Error::Cancelled) => return Err(Error::Cancelled),
            Err(e) => warn!("Loot poll failed: {}", e),
        }
        self.refresh_equipment();

        if !self.activity_started() {
            self.update_groups();
            if self.check_activity() == Some(true) {
                info!("Activity has started on {}", self.root.map_id);
                self.activity_started.store(true, Ordering::Relaxed);
            }
        }
        self.publish();
        Ok(())
    }

    /// Re-read the gear of every living network view.
    fn refresh_equipment(&self) {
        let layout = &self.config.layout;
        if !self.config.features.equipment || !layout.has_equipment() {
            return;
        }
        let refreshed = self
            .registry
            .snapshot()
            .iter()
            .filter(|e| e.refresh_equipment(self.reader, layout, self.catalog))
            .count();
        debug!("Equipment refreshed for {} entities", refreshed);
    }

    fn update_groups(&self) {
        let features = &self.config.features;
        let local_is_pmc = self
            .registry
            .local()
            .side()
            .is_some_and(|side| side.is_pmc());
        if !features.auto_groups || !local_is_pmc {
            return;
        }
        refresh_groups(
            &self.registry,
            &self.ctx,
            features.group_distance,
            features.group_policy,
        );
    }

    /// Whether the local player has left the pre-activity state, judged by
    /// the class of its hands controller. `None` if the class is unreadable
    /// or implausible.
    fn check_activity(&self) -> Option<bool> {
        let layout = &self.config.layout;
        let session = &self.config.session;
        let local = self.registry.local().base();
        let hands = self
            .reader
            .read_ptr(local.offset(layout.player.hands_controller))
            .ok()?;
        let class = read_class_name(self.reader, hands, &layout.object.class_name_chain).ok()?;
        if !class.contains(&session.hands_marker) {
            debug!("Unexpected hands controller class {:?}", class);
            return None;
        }
        Some(class != session.idle_hands_class)
    }

    /// Assemble and publish a snapshot of the current state.
    pub fn publish(&self) {
        let local = self.registry.local();
        let entities = self
            .registry
            .snapshot()
            .iter()
            .filter(|e| !e.is_local())
            .map(|e| e.view())
            .collect();
        let loot = self
            .loot
            .filtered(&self.config.loot.filter, &self.ctx)
            .iter()
            .map(|l| {
                let mut view = l.view();
                view.carrying_important = view
                    .owner
                    .and_then(|owner| self.registry.get(owner))
                    .is_some_and(|owner| owner.carrying_important_loot());
                view
            })
            .collect();
        self.snapshot.publish(WorldSnapshot {
            state: SessionState::Active,
            sequence: 0,
            map_id: Some(self.root.map_id.clone()),
            raid_id: Some(self.ctx.raid_id().to_string()),
            activity_started: self.activity_started(),
            local: Some(local.view()),
            entities,
            loot,
            groups: self.ctx.groups().iter().map(|(k, v)| (*k, *v)).collect(),
        });
    }
}
