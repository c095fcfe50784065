//! Canonical set of entities for one session.

use std::collections::HashSet;
use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tracing::{debug, info, warn};

use crate::context::SessionContext;
use crate::entity::{AiRoles, Entity, allocate, allocate_local, vehicle_operator};
use crate::error::{Error, Result};
use crate::memory::unity::{read_list_count, read_pointer_list};
use crate::memory::{Address, Layout, ReadMemory, ReadMemoryExt, ScatterRound};

/// Upper bound on the registered-player list.
pub const MAX_PLAYERS: usize = 256;

/// Outcome of one registry poll.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RefreshStats {
    pub listed: usize,
    pub allocated: usize,
    pub failed: usize,
}

/// Address → entity map diffed against the remote player list every poll.
///
/// Entities are never removed during a session: an address that leaves the
/// list keeps its entity in the dead or exfiltrated state, and an address
/// that comes back reuses it.
#[derive(Debug)]
pub struct EntityRegistry {
    world: Address,
    local: Arc<Entity>,
    entities: DashMap<Address, Arc<Entity>>,
}

impl EntityRegistry {
    /// Create the registry with the local player pre-allocated.
    pub fn new<R: ReadMemory + ?Sized>(reader: &R, world: Address, layout: &Layout) -> Result<Self> {
        let local_base = reader.read_ptr(world.offset(layout.world.main_player))?;
        let local = Arc::new(allocate_local(reader, local_base, layout)?);
        let entities = DashMap::new();
        entities.insert(local_base, Arc::clone(&local));
        info!("Registry created, local player at {}", local_base);
        Ok(Self {
            world,
            local,
            entities,
        })
    }

    pub fn world(&self) -> Address {
        self.world
    }

    pub fn local(&self) -> &Arc<Entity> {
        &self.local
    }

    pub fn get(&self, base: Address) -> Option<Arc<Entity>> {
        self.entities.get(&base).map(|e| Arc::clone(e.value()))
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// All entities, ordered by base address.
    pub fn snapshot(&self) -> Vec<Arc<Entity>> {
        let mut entities: Vec<_> = self.entities.iter().map(|e| Arc::clone(e.value())).collect();
        entities.sort_by_key(|e| e.base());
        entities
    }

    fn list_address<R: ReadMemory + ?Sized>(&self, reader: &R, layout: &Layout) -> Result<Address> {
        Ok(reader.read_ptr(self.world.offset(layout.world.registered_players))?)
    }

    /// Current remote player list.
    pub fn read_list<R: ReadMemory + ?Sized>(&self, reader: &R, layout: &Layout) -> Result<Vec<Address>> {
        let list = self.list_address(reader, layout)?;
        Ok(read_pointer_list(reader, list, MAX_PLAYERS)?)
    }

    /// Remote list length, rejected unless it is in `0..=MAX_PLAYERS`.
    pub fn player_count<R: ReadMemory + ?Sized>(&self, reader: &R, layout: &Layout) -> Result<usize> {
        let list = self.list_address(reader, layout)?;
        let count = read_list_count(reader, list)?;
        if !(0..=MAX_PLAYERS as i32).contains(&count) {
            return Err(Error::validation(format!("player count {} out of range", count)));
        }
        Ok(count as usize)
    }

    /// Race-safe get-or-create keyed by base address.
    pub fn get_or_allocate<R: ReadMemory + ?Sized>(
        &self,
        reader: &R,
        base: Address,
        layout: &Layout,
        roles: &AiRoles,
        ctx: &SessionContext,
    ) -> Result<Arc<Entity>> {
        if let Some(existing) = self.get(base) {
            return Ok(existing);
        }
        // allocation reads remote memory; no shard lock is held across it
        let entity = Arc::new(allocate(reader, base, layout, roles, ctx)?);
        match self.entities.entry(base) {
            // lost the race; the other allocation wins
            Entry::Occupied(entry) => Ok(Arc::clone(entry.get())),
            Entry::Vacant(entry) => {
                info!("New entity {} at {}", entity.name(), base);
                entry.insert(Arc::clone(&entity));
                Ok(entity)
            }
        }
    }

    /// One registration poll: allocate new addresses, then refresh every
    /// entity's lifecycle in a single scatter round.
    ///
    /// A failed list read aborts the poll before anything is mutated.
    pub fn refresh<R: ReadMemory + ?Sized>(
        &self,
        reader: &R,
        layout: &Layout,
        roles: &AiRoles,
        ctx: &SessionContext,
    ) -> Result<RefreshStats> {
        let list = self.read_list(reader, layout)?;
        let present: HashSet<Address> = list.iter().copied().collect();
        let mut stats = RefreshStats {
            listed: list.len(),
            ..Default::default()
        };

        for &base in &list {
            if base == self.local.base() || self.entities.contains_key(&base) {
                continue;
            }
            match self.get_or_allocate(reader, base, layout, roles, ctx) {
                Ok(_) => stats.allocated += 1,
                Err(e) => {
                    warn!("Failed to allocate entity at {}: {}", base, e);
                    stats.failed += 1;
                }
            }
        }

        let entities = self.snapshot();
        let mut round = ScatterRound::new();
        for entity in &entities {
            entity.on_registration_refresh(&mut round, present.contains(&entity.base()), layout);
        }
        round.execute(reader);

        debug!(
            "Registry poll: {} listed, {} new, {} failed",
            stats.listed, stats.allocated, stats.failed
        );
        Ok(stats)
    }

    /// Dead entity whose corpse is `corpse`.
    pub fn dead_with_corpse(&self, corpse: Address) -> Option<Arc<Entity>> {
        self.entities
            .iter()
            .find(|e| e.value().lifecycle().corpse() == Some(corpse))
            .map(|e| Arc::clone(e.value()))
    }

    /// Swap the vehicle operator's entry for a vehicle-positioned entity.
    ///
    /// Only an already-registered operator is swapped; `Ok(None)` means there
    /// is nothing to do this poll.
    pub fn try_allocate_vehicle_operator<R: ReadMemory + ?Sized>(
        &self,
        reader: &R,
        layout: &Layout,
    ) -> Result<Option<Arc<Entity>>> {
        if !layout.has_vehicle() {
            return Ok(None);
        }
        let controller = reader.read_ptr(self.world.offset(layout.world.vehicle_controller))?;
        let view = reader.read_ptr_chain(controller, &layout.vehicle.view_chain)?;
        let operator = reader.read_ptr_chain(view, &layout.vehicle.operator_chain)?;

        match self.entities.entry(operator) {
            Entry::Occupied(mut entry) => {
                if entry.get().is_vehicle_operator() {
                    return Ok(Some(Arc::clone(entry.get())));
                }
                let entity = Arc::new(vehicle_operator(operator, view, layout));
                info!("Vehicle operator at {} (view {})", operator, view);
                entry.insert(Arc::clone(&entity));
                Ok(Some(entity))
            }
            Entry::Vacant(_) => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::{EntityKind, Lifecycle};
    use crate::fixture::{ObservedSpec, WorldFixture};
    use crate::error::ReadError;
    use crate::math::Vec3;
    use crate::memory::MemoryImage;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn registry(fixture: &WorldFixture) -> EntityRegistry {
        EntityRegistry::new(&*fixture.image(), fixture.world(), &fixture.layout()).unwrap()
    }

    #[test]
    fn test_new_preallocates_local() {
        let fixture = WorldFixture::new("bigmap");
        let registry = registry(&fixture);
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.local().base(), fixture.local_player());
        assert_eq!(registry.player_count(&*fixture.image(), &fixture.layout()).unwrap(), 1);
    }

    #[test]
    fn test_refresh_allocates_and_skips_failures() {
        let fixture = WorldFixture::new("bigmap");
        let good = fixture.add_observed(ObservedSpec::pmc(1, Vec3::new(1.0, 0.0, 0.0)));
        let bad = fixture.add_observed(ObservedSpec::pmc(2, Vec3::new(2.0, 0.0, 0.0)));
        let image = fixture.image();
        let layout = fixture.layout();
        image.write_value(bad.offset(layout.observed.side), 9i32);

        let registry = registry(&fixture);
        let stats = registry
            .refresh(&*image, &layout, &AiRoles::default(), &fixture.context())
            .unwrap();
        assert_eq!(stats.listed, 3);
        assert_eq!(stats.allocated, 1);
        assert_eq!(stats.failed, 1);
        assert!(registry.get(good).is_some());
        assert!(registry.get(bad).is_none());

        // retried on the next poll without special-casing
        image.write_value(bad.offset(layout.observed.side), 2i32);
        let stats = registry
            .refresh(&*image, &layout, &AiRoles::default(), &fixture.context())
            .unwrap();
        assert_eq!(stats.allocated, 1);
        assert!(registry.get(bad).is_some());
    }

    #[test]
    fn test_failed_list_read_mutates_nothing() {
        let fixture = WorldFixture::new("bigmap");
        fixture.add_observed(ObservedSpec::pmc(1, Vec3::ZERO));
        let image = fixture.image();
        let layout = fixture.layout();
        let registry = registry(&fixture);

        image.write_u64(fixture.world().offset(layout.world.registered_players), 0);
        assert!(registry.refresh(&*image, &layout, &AiRoles::default(), &fixture.context()).is_err());
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.local().lifecycle(), Lifecycle::Alive);
    }

    #[test]
    fn test_concurrent_allocation_is_idempotent() {
        let fixture = WorldFixture::new("bigmap");
        let base = fixture.add_observed(ObservedSpec::pmc(3, Vec3::ZERO));
        let image = fixture.image();
        let layout = fixture.layout();
        let ctx = fixture.context();
        let roles = AiRoles::default();
        let registry = registry(&fixture);

        let results: Vec<Arc<Entity>> = std::thread::scope(|s| {
            let handles: Vec<_> = (0..8)
                .map(|_| s.spawn(|| registry.get_or_allocate(&*image, base, &layout, &roles, &ctx).unwrap()))
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        assert_eq!(registry.len(), 2);
        assert!(results.iter().all(|e| Arc::ptr_eq(e, &results[0])));
    }

    /// Reader that looks the entity up in the registry on every read.
    struct RegistryAwareReader<'a> {
        inner: &'a MemoryImage,
        registry: &'a EntityRegistry,
        base: Address,
        lookups: AtomicUsize,
    }

    impl ReadMemory for RegistryAwareReader<'_> {
        fn read_bytes(&self, address: Address, len: usize) -> std::result::Result<Vec<u8>, ReadError> {
            // blocks forever if the caller holds the shard lock for `base`
            if self.registry.get(self.base).is_none() {
                self.lookups.fetch_add(1, Ordering::Relaxed);
            }
            self.inner.read_bytes(address, len)
        }
    }

    #[test]
    fn test_allocation_reads_without_holding_the_map_lock() {
        let fixture = WorldFixture::new("bigmap");
        let base = fixture.add_observed(ObservedSpec::pmc(6, Vec3::ZERO));
        let image = fixture.image();
        let layout = fixture.layout();
        let registry = registry(&fixture);
        let reader = RegistryAwareReader {
            inner: &*image,
            registry: &registry,
            base,
            lookups: AtomicUsize::new(0),
        };

        let entity = registry
            .get_or_allocate(&reader, base, &layout, &AiRoles::default(), &fixture.context())
            .unwrap();
        assert!(reader.lookups.load(Ordering::Relaxed) > 0);
        assert!(Arc::ptr_eq(&entity, &registry.get(base).unwrap()));
    }

    #[test]
    fn test_dead_with_corpse_lookup() {
        let fixture = WorldFixture::new("bigmap");
        let base = fixture.add_observed(ObservedSpec::pmc(4, Vec3::ZERO));
        let image = fixture.image();
        let layout = fixture.layout();
        let registry = registry(&fixture);
        let ctx = fixture.context();
        registry.refresh(&*image, &layout, &AiRoles::default(), &ctx).unwrap();

        let corpse = fixture.kill(base);
        registry.refresh(&*image, &layout, &AiRoles::default(), &ctx).unwrap();
        let dead = registry.dead_with_corpse(corpse).unwrap();
        assert_eq!(dead.base(), base);
        assert!(registry.dead_with_corpse(Address(0x7000_0000)).is_none());
    }

    #[test]
    fn test_vehicle_operator_swap() {
        let fixture = WorldFixture::new("bigmap");
        let operator = fixture.add_observed(ObservedSpec::ai("BtrOperator", Vec3::ZERO));
        fixture.add_vehicle(operator, Vec3::new(50.0, 1.0, 50.0));
        let image = fixture.image();
        let layout = fixture.layout();
        let registry = registry(&fixture);

        assert!(registry.try_allocate_vehicle_operator(&*image, &layout).unwrap().is_none());
        registry.refresh(&*image, &layout, &AiRoles::default(), &fixture.context()).unwrap();
        let vehicle = registry.try_allocate_vehicle_operator(&*image, &layout).unwrap().unwrap();
        assert_eq!(vehicle.kind(), EntityKind::Vehicle);
        assert!(registry.get(operator).unwrap().is_vehicle_operator());

        let mut round = ScatterRound::new();
        vehicle.on_realtime_refresh(&mut round, &*image, &layout);
        round.execute(&*image);
        assert_eq!(vehicle.position(), Vec3::new(50.0, 1.0, 50.0));
    }
}
