//! Racing search for the world root in the object manager's node list.
//!
//! Three strategies run concurrently against the same list:
//!
//! | Strategy   | Start                | Step   | Ends                       |
//! |------------|----------------------|--------|----------------------------|
//! | `Shallow`  | first node, re-read  | `next` | never (bounded per pass)   |
//! | `Forward`  | first node           | `next` | at the last node           |
//! | `Backward` | last node            | `prev` | at the first node          |
//!
//! The first strategy to produce a validated root wins and cancels the
//! others. The list may be mutated while it is walked, so the walkers treat
//! every read failure as the end of their own attempt only. Once both
//! bounded walks have exhausted, the outcome rests on the shallow strategy.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender, bounded};
use strum::{Display, IntoStaticStr};
use tracing::{debug, info, warn};

use super::WorldRoot;
use crate::config::LocatorConfig;
use crate::error::{Error, Result};
use crate::memory::unity::{ListNode, NAME_MAX};
use crate::memory::{Address, Layout, ReadMemory, ReadMemoryExt};
use crate::shutdown::ShutdownSignal;

const MAP_ID_MAX: usize = 128;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, IntoStaticStr)]
#[strum(serialize_all = "snake_case")]
pub enum Strategy {
    Shallow,
    Forward,
    Backward,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    Next,
    Prev,
}

/// Ends of the active list, read once per bounded walk.
#[derive(Debug, Clone, Copy)]
struct ListEnds {
    first_addr: Address,
    first: ListNode,
    last_addr: Address,
    last: ListNode,
}

pub struct WorldLocator<'a> {
    layout: &'a Layout,
    config: &'a LocatorConfig,
}

impl<'a> WorldLocator<'a> {
    pub fn new(layout: &'a Layout, config: &'a LocatorConfig) -> Self {
        Self { layout, config }
    }

    /// Run one race.
    ///
    /// Returns `WorldNotFound` only once every strategy has given up, which
    /// requires `max_passes` to be set; `Cancelled` if `shutdown` fires.
    pub fn locate<R: ReadMemory + ?Sized>(
        &self,
        reader: &R,
        shutdown: &Arc<ShutdownSignal>,
    ) -> Result<WorldRoot> {
        let race = shutdown.child();
        let (tx, rx) = bounded::<(Strategy, Option<WorldRoot>)>(3);

        let outcome = thread::scope(|s| {
            for strategy in [Strategy::Shallow, Strategy::Forward, Strategy::Backward] {
                let worker_tx: Sender<_> = tx.clone();
                let race = &race;
                let spawned = thread::Builder::new()
                    .name(format!("locate-{}", strategy))
                    .spawn_scoped(s, move || {
                        let found = match strategy {
                            Strategy::Shallow => self.shallow(reader, race),
                            Strategy::Forward => self.walk(reader, Direction::Next, race),
                            Strategy::Backward => self.walk(reader, Direction::Prev, race),
                        };
                        let _ = worker_tx.send((strategy, found));
                    });
                if let Err(e) = spawned {
                    warn!("Failed to spawn {} locator: {}", strategy, e);
                    let _ = tx.send((strategy, None));
                }
            }
            drop(tx);
            let outcome = Self::collect(&rx);
            // stop the losers before the scope joins them
            race.trigger();
            outcome
        });

        match outcome {
            Some((strategy, root)) => {
                info!("Found world root {} via {} search", root, strategy);
                Ok(root)
            }
            None if shutdown.is_shutdown() => Err(Error::Cancelled),
            None => Err(Error::WorldNotFound),
        }
    }

    fn collect(rx: &Receiver<(Strategy, Option<WorldRoot>)>) -> Option<(Strategy, WorldRoot)> {
        for (strategy, found) in rx.iter() {
            match found {
                Some(root) => return Some((strategy, root)),
                None => debug!("{} search finished without a result", strategy),
            }
        }
        None
    }

    /// Race until a root is found, pausing between attempts.
    pub fn locate_blocking<R: ReadMemory + ?Sized>(
        &self,
        reader: &R,
        shutdown: &Arc<ShutdownSignal>,
    ) -> Result<WorldRoot> {
        let interval = Duration::from_millis(self.config.retry_interval_ms);
        loop {
            match self.locate(reader, shutdown) {
                Ok(root) => return Ok(root),
                Err(Error::Cancelled) => return Err(Error::Cancelled),
                Err(e) => debug!("World root not available yet: {}", e),
            }
            if shutdown.wait(interval) {
                return Err(Error::Cancelled);
            }
        }
    }

    fn object_manager<R: ReadMemory + ?Sized>(&self, reader: &R) -> Result<Address> {
        Ok(reader.read_ptr(Address(self.layout.world.object_manager))?)
    }

    fn read_ends<R: ReadMemory + ?Sized>(&self, reader: &R) -> Result<ListEnds> {
        let gom = self.object_manager(reader)?;
        let first_addr = reader.read_ptr(gom.offset(self.layout.world.active_nodes))?;
        let last_addr = reader.read_ptr(gom.offset(self.layout.world.last_active_node))?;
        let first: ListNode = reader.read_value(first_addr)?;
        let last: ListNode = reader.read_value(last_addr)?;
        first.object().validate()?;
        first.next().validate()?;
        last.object().validate()?;
        last.prev().validate()?;
        Ok(ListEnds {
            first_addr,
            first,
            last_addr,
            last,
        })
    }

    fn shallow<R: ReadMemory + ?Sized>(&self, reader: &R, race: &ShutdownSignal) -> Option<WorldRoot> {
        let interval = Duration::from_millis(self.config.pass_interval_ms);
        let mut pass = 0u32;
        loop {
            if race.is_shutdown() {
                return None;
            }
            if let Some(root) = self.shallow_pass(reader, race) {
                return Some(root);
            }
            pass += 1;
            if self.config.max_passes.is_some_and(|max| pass >= max) {
                return None;
            }
            if race.wait(interval) {
                return None;
            }
        }
    }

    fn shallow_pass<R: ReadMemory + ?Sized>(&self, reader: &R, race: &ShutdownSignal) -> Option<WorldRoot> {
        let gom = self.object_manager(reader).ok()?;
        let first = reader.read_ptr(gom.offset(self.layout.world.active_nodes)).ok()?;
        let mut current = first;
        for _ in 0..self.config.max_depth {
            if race.is_shutdown() {
                return None;
            }
            let node: ListNode = reader.read_value(current).ok()?;
            if let Some(root) = self.check_node(reader, &node) {
                return Some(root);
            }
            current = node.next();
            if !current.is_valid() || current == first {
                return None;
            }
        }
        None
    }

    fn walk<R: ReadMemory + ?Sized>(
        &self,
        reader: &R,
        direction: Direction,
        race: &ShutdownSignal,
    ) -> Option<WorldRoot> {
        let ends = match self.read_ends(reader) {
            Ok(ends) => ends,
            Err(e) => {
                debug!("Cannot read active list ends: {}", e);
                return None;
            }
        };
        let (mut node, stop) = match direction {
            Direction::Next => (ends.first, ends.last),
            Direction::Prev => (ends.last, ends.first),
        };
        for _ in 0..self.config.max_depth {
            if race.is_shutdown() {
                return None;
            }
            if let Some(root) = self.check_node(reader, &node) {
                return Some(root);
            }
            if node.object == stop.object {
                return None;
            }
            let next = match direction {
                Direction::Next => node.next(),
                Direction::Prev => node.prev(),
            };
            let wrapped = match direction {
                Direction::Next => next == ends.first_addr,
                Direction::Prev => next == ends.last_addr,
            };
            if wrapped {
                return None;
            }
            node = reader.read_value(next.validate().ok()?).ok()?;
        }
        None
    }

    /// Cheap name check, then full validation of a matching node.
    fn check_node<R: ReadMemory + ?Sized>(&self, reader: &R, node: &ListNode) -> Option<WorldRoot> {
        let object = node.object().validate().ok()?;
        let name = reader
            .read_ptr(object.offset(self.layout.object.game_object_name))
            .and_then(|p| reader.read_utf8(p, NAME_MAX))
            .ok()?;
        if !name.eq_ignore_ascii_case(&self.config.target_name) {
            return None;
        }
        match self.parse_world(reader, object) {
            Ok(root) => Some(root),
            Err(e) => {
                debug!("Node {} named {:?} rejected: {}", object, name, e);
                None
            }
        }
    }

    fn parse_world<R: ReadMemory + ?Sized>(&self, reader: &R, object: Address) -> Result<WorldRoot> {
        let address = reader.read_ptr_chain(object, &self.layout.world.root_chain)?;
        let map_id = self.read_map_id(reader, address)?;
        if !self.config.is_known_map(&map_id) {
            return Err(Error::validation(format!("unknown map id {:?}", map_id)));
        }
        Ok(WorldRoot { address, map_id })
    }

    /// Map id of the world, falling back to the local player's location when
    /// the world has none.
    fn read_map_id<R: ReadMemory + ?Sized>(&self, reader: &R, world: Address) -> Result<String> {
        let w = &self.layout.world;
        let raw = reader.read_u64(world.offset(w.location_id))?;
        let id_ptr = if raw == 0 {
            let player = reader.read_ptr(world.offset(w.main_player))?;
            reader.read_ptr(player.offset(self.layout.player.location))?
        } else {
            Address(raw).validate()?
        };
        Ok(reader.read_unity_string(id_ptr, MAP_ID_MAX)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixture::WorldFixture;
    use std::time::Instant;

    fn config(fixture: &WorldFixture) -> LocatorConfig {
        LocatorConfig {
            max_passes: Some(3),
            pass_interval_ms: 1,
            ..fixture.config().locator
        }
    }

    #[test]
    fn test_finds_world_and_map() {
        let fixture = WorldFixture::new("woods");
        let layout = fixture.layout();
        let config = config(&fixture);
        let shutdown = Arc::new(ShutdownSignal::new());

        let root = WorldLocator::new(&layout, &config)
            .locate(&*fixture.image(), &shutdown)
            .unwrap();
        assert_eq!(root.address, fixture.world());
        assert_eq!(root.map_id, "woods");
        // the race's own cancellation must not leak into the caller
        assert!(!shutdown.is_shutdown());
    }

    #[test]
    fn test_offline_location_fallback() {
        let fixture = WorldFixture::new("lighthouse");
        fixture.clear_world_location();
        let layout = fixture.layout();
        let config = config(&fixture);

        let root = WorldLocator::new(&layout, &config)
            .locate(&*fixture.image(), &Arc::new(ShutdownSignal::new()))
            .unwrap();
        assert_eq!(root.map_id, "lighthouse");
    }

    #[test]
    fn test_unknown_map_is_not_found() {
        let fixture = WorldFixture::new("woods");
        let layout = fixture.layout();
        let mut config = config(&fixture);
        config.maps = vec!["bigmap".to_string()];

        let err = WorldLocator::new(&layout, &config)
            .locate(&*fixture.image(), &Arc::new(ShutdownSignal::new()))
            .unwrap_err();
        assert!(matches!(err, Error::WorldNotFound));
    }

    #[test]
    fn test_broken_list_ends_leave_shallow_search() {
        let fixture = WorldFixture::new("woods");
        let layout = fixture.layout();
        let config = config(&fixture);
        let image = fixture.image();
        // a null `prev` on the last node disqualifies both bounded walks
        let last = fixture.last_node();
        image.write_u64(last, 0);

        let root = WorldLocator::new(&layout, &config)
            .locate(&*image, &Arc::new(ShutdownSignal::new()))
            .unwrap();
        assert_eq!(root.address, fixture.world());
    }

    #[test]
    fn test_shutdown_cancels_unbounded_search() {
        let fixture = WorldFixture::new("woods");
        fixture.end_session();
        let layout = fixture.layout();
        let config = LocatorConfig {
            max_passes: None,
            ..config(&fixture)
        };
        let shutdown = Arc::new(ShutdownSignal::new());
        let trigger = Arc::clone(&shutdown);
        let started = Instant::now();

        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            trigger.trigger();
        });
        let err = WorldLocator::new(&layout, &config)
            .locate(&*fixture.image(), &shutdown)
            .unwrap_err();
        handle.join().unwrap();
        assert!(matches!(err, Error::Cancelled));
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn test_locate_blocking_waits_for_world() {
        let fixture = Arc::new(WorldFixture::new("woods"));
        fixture.end_session();
        let layout = fixture.layout();
        let config = LocatorConfig {
            retry_interval_ms: 5,
            ..config(&fixture)
        };
        let restore = Arc::clone(&fixture);
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(40));
            restore.restart_session();
        });

        let root = WorldLocator::new(&layout, &config)
            .locate_blocking(&*fixture.image(), &Arc::new(ShutdownSignal::new()))
            .unwrap();
        handle.join().unwrap();
        assert_eq!(root.address, fixture.world());
    }
}
