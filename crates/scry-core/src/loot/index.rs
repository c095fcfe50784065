//! Multi-round discovery and classification of loot objects.
//!
//! New loot addresses go through four dependent scatter rounds:
//!
//! 1. behaviour pointer and first class-name hop
//! 2. interactive object, game object and second class-name hop
//! 3. class-name string, component list and object-name pointer
//! 4. object-name string and transform pointer
//!
//! Objects that survive all four rounds are classified once the whole map
//! has executed. Classification issues its own synchronous sub-reads.

use std::cell::RefCell;
use std::collections::HashSet;
use std::sync::Arc;

use dashmap::{DashMap, DashSet};
use tracing::{debug, info};

use super::{ItemCatalog, LootEntity, LootFilter, LootKind};
use crate::config::LootConfig;
use crate::context::SessionContext;
use crate::entity::Transform;
use crate::error::{Error, Result};
use crate::memory::unity::{COMPONENT_TRANSFORM, NAME_MAX, read_pointer_list};
use crate::memory::{Address, Layout, ReadMemory, ReadMemoryExt, ScatterMap, ScatterRound};
use crate::registry::EntityRegistry;
use crate::shutdown::ShutdownSignal;

const STRING_MAX: usize = 128;

/// Outcome of one loot poll.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LootRefreshStats {
    pub listed: usize,
    pub removed: usize,
    pub resolved: usize,
    pub added: usize,
    pub skipped: usize,
}

/// Everything the four rounds resolve for one object.
#[derive(Debug, Clone)]
struct LootParams {
    base: Address,
    interactive: Address,
    class_name: String,
    object_name: String,
    transform_internal: Address,
}

/// Classified loot keyed by base address, plus the set of addresses known
/// to carry a skip marker.
#[derive(Debug)]
pub struct LootIndex {
    world: Address,
    entries: DashMap<Address, Arc<LootEntity>>,
    skipped: DashSet<Address>,
}

impl LootIndex {
    pub fn new(world: Address) -> Self {
        Self {
            world,
            entries: DashMap::new(),
            skipped: DashSet::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, base: Address) -> Option<Arc<LootEntity>> {
        self.entries.get(&base).map(|e| Arc::clone(e.value()))
    }

    pub fn is_skipped(&self, base: Address) -> bool {
        self.skipped.contains(&base)
    }

    /// All classified loot, ordered by base address.
    pub fn snapshot(&self) -> Vec<Arc<LootEntity>> {
        let mut loot: Vec<_> = self.entries.iter().map(|e| Arc::clone(e.value())).collect();
        loot.sort_by_key(|l| l.base());
        loot
    }

    pub fn filtered(&self, filter: &LootFilter, ctx: &SessionContext) -> Vec<Arc<LootEntity>> {
        filter.apply(self.snapshot(), ctx)
    }

    /// One loot poll: drop vanished entries, resolve new addresses, then
    /// re-link corpses to dead entities.
    #[allow(clippy::too_many_arguments)]
    pub fn refresh<R: ReadMemory + ?Sized>(
        &self,
        reader: &R,
        layout: &Layout,
        rules: &LootConfig,
        catalog: &ItemCatalog,
        ctx: &SessionContext,
        registry: &EntityRegistry,
        shutdown: &ShutdownSignal,
    ) -> Result<LootRefreshStats> {
        let list = reader.read_ptr(self.world.offset(layout.world.loot_list))?;
        let addresses = read_pointer_list(reader, list, rules.max_loot)?;
        let present: HashSet<Address> = addresses.iter().copied().collect();

        let before = self.entries.len();
        self.entries.retain(|base, _| present.contains(base));
        self.skipped.retain(|base| present.contains(base));
        let mut stats = LootRefreshStats {
            listed: addresses.len(),
            removed: before - self.entries.len(),
            ..Default::default()
        };

        let resolved: RefCell<Vec<LootParams>> = RefCell::new(Vec::new());
        let classified: RefCell<(usize, usize)> = RefCell::new((0, 0));
        let mut map = ScatterMap::new();
        for &base in &addresses {
            if shutdown.is_shutdown() {
                return Err(Error::Cancelled);
            }
            if self.entries.contains_key(&base) || self.skipped.contains(&base) {
                continue;
            }
            schedule(map.first_round(), base, layout, &resolved);
        }
        map.on_complete(|| {
            for params in resolved.borrow_mut().drain(..) {
                if shutdown.is_shutdown() {
                    return;
                }
                let base = params.base;
                let mut counts = classified.borrow_mut();
                counts.0 += 1;
                if self.is_marked_skip(&params, rules) {
                    debug!("Skipping {} ({})", base, params.object_name);
                    self.skipped.insert(base);
                    counts.1 += 1;
                    continue;
                }
                match self.classify(reader, layout, rules, catalog, ctx, &params) {
                    Ok(Some(loot)) => {
                        self.entries.insert(base, Arc::new(loot));
                    }
                    Ok(None) => {}
                    Err(e) => debug!("Loot {} ({}) not indexed: {}", base, params.class_name, e),
                }
            }
        });
        map.execute(reader);
        if shutdown.is_shutdown() {
            return Err(Error::Cancelled);
        }

        let (resolved_count, skipped_count) = classified.into_inner();
        stats.resolved = resolved_count;
        stats.skipped = skipped_count;
        stats.added = self.entries.len() + stats.removed - before;

        self.sync_corpses(registry);
        debug!(
            "Loot poll: {} listed, {} removed, {} resolved, {} added, {} skipped",
            stats.listed, stats.removed, stats.resolved, stats.added, stats.skipped
        );
        Ok(stats)
    }

    fn is_marked_skip(&self, params: &LootParams, rules: &LootConfig) -> bool {
        let name = params.object_name.to_lowercase();
        rules
            .skip_markers
            .iter()
            .any(|m| name.contains(&m.to_lowercase()))
    }

    fn classify<R: ReadMemory + ?Sized>(
        &self,
        reader: &R,
        layout: &Layout,
        rules: &LootConfig,
        catalog: &ItemCatalog,
        ctx: &SessionContext,
        p: &LootParams,
    ) -> Result<Option<LootEntity>> {
        let class = p.class_name.as_str();
        let is_corpse = class
            .to_lowercase()
            .contains(&rules.corpse_class.to_lowercase());
        let is_container = class.eq_ignore_ascii_case(&rules.container_class);
        let is_item = class.eq_ignore_ascii_case(&rules.item_class);
        if !(is_corpse || is_container || is_item) {
            return Ok(None);
        }

        let position = Transform::new(reader, p.transform_internal, &layout.transform)?.read_position(reader)?;

        let kind = if is_corpse {
            LootKind::Corpse {
                corpse: p.interactive,
            }
        } else if is_container {
            if p.object_name.eq_ignore_ascii_case(&rules.airdrop_name) {
                LootKind::Airdrop
            } else {
                let owner = reader.read_ptr(p.interactive.offset(layout.loot.container_owner))?;
                let root = reader.read_ptr(owner.offset(layout.loot.owner_root_item))?;
                let id = read_template_id(reader, layout, root)?.1;
                let name = catalog
                    .container(&id)
                    .map(|c| c.name.clone())
                    .unwrap_or_else(|| "Container".to_string());
                LootKind::Container { id, name }
            }
        } else {
            let item = reader.read_ptr(p.interactive.offset(layout.loot.item))?;
            let (template, id) = read_template_id(reader, layout, item)?;
            let quest = reader.read_bool(template.offset(layout.item.quest_flag))?;
            if quest {
                if ctx.quest_item_logged(&id) {
                    return Ok(None);
                }
                let short = reader
                    .read_ptr(template.offset(layout.item.short_name))
                    .and_then(|s| reader.read_unity_string(s, STRING_MAX))?;
                let short = if short.is_ascii() { short } else { id_suffix(&id).to_string() };
                // recorded only once nothing else can fail
                ctx.first_quest_sighting(&id);
                info!("Quest item {} ({})", short, id);
                LootKind::Item {
                    name: format!("Q_{}", short),
                    id,
                    value: 0,
                    important: false,
                    quest: true,
                }
            } else {
                let Some(entry) = catalog.item(&id) else {
                    return Ok(None);
                };
                LootKind::Item {
                    id,
                    name: entry.display_name().to_string(),
                    value: entry.value,
                    important: entry.important,
                    quest: false,
                }
            }
        };
        Ok(Some(LootEntity::new(p.base, kind, position)))
    }

    /// Link each corpse to the dead entity whose corpse field points at it.
    ///
    /// Entities whose corpse has no loot entry this poll lose their link.
    fn sync_corpses(&self, registry: &EntityRegistry) {
        let mut linked = HashSet::new();
        for entry in self.entries.iter() {
            let loot = entry.value();
            let LootKind::Corpse { corpse } = loot.kind() else {
                continue;
            };
            match registry.dead_with_corpse(*corpse) {
                Some(entity) => {
                    loot.set_owner(Some(entity.base()));
                    entity.set_loot_link(Some(loot.base()));
                    linked.insert(entity.base());
                }
                None => loot.set_owner(None),
            }
        }
        for entity in registry.snapshot() {
            if entity.loot_link().is_some() && !linked.contains(&entity.base()) {
                debug!("{} lost its corpse loot", entity.name());
                entity.set_loot_link(None);
            }
        }
    }
}

/// Queue the four-round resolution of one loot object.
fn schedule<'a>(
    round1: &mut ScatterRound<'a>,
    base: Address,
    layout: &'a Layout,
    resolved: &'a RefCell<Vec<LootParams>>,
) {
    let o = &layout.object;
    let behaviour_field = base.offset(o.mono_behaviour);
    let class_hop = base.offset(o.class_name_chain[0]);
    round1.prepare_ptr(behaviour_field);
    round1.prepare_ptr(class_hop);
    round1.on_complete(move |r1, round2| {
        let (Some(behaviour), Some(c1)) = (r1.ptr(behaviour_field), r1.ptr(class_hop)) else {
            return;
        };
        let interactive_field = behaviour.offset(o.component_object_class);
        let game_object_field = behaviour.offset(o.component_game_object);
        let class_name_field = c1.offset(o.class_name_chain[1]);
        round2.prepare_ptr(interactive_field);
        round2.prepare_ptr(game_object_field);
        round2.prepare_ptr(class_name_field);
        round2.on_complete(move |r2, round3| {
            let (Some(interactive), Some(game_object), Some(class_name_ptr)) = (
                r2.ptr(interactive_field),
                r2.ptr(game_object_field),
                r2.ptr(class_name_field),
            ) else {
                return;
            };
            let components_field = game_object.offset(o.game_object_components);
            let name_field = game_object.offset(o.game_object_name);
            round3.prepare_bytes(class_name_ptr, NAME_MAX);
            round3.prepare_ptr(components_field);
            round3.prepare_ptr(name_field);
            round3.on_complete(move |r3, round4| {
                let (Some(class_name), Some(components), Some(name_ptr)) = (
                    r3.utf8(class_name_ptr, NAME_MAX),
                    r3.ptr(components_field),
                    r3.ptr(name_field),
                ) else {
                    return;
                };
                let transform_field = components.offset(COMPONENT_TRANSFORM);
                round4.prepare_bytes(name_ptr, NAME_MAX);
                round4.prepare_ptr(transform_field);
                round4.on_complete(move |r4, _| {
                    let (Some(object_name), Some(transform_internal)) =
                        (r4.utf8(name_ptr, NAME_MAX), r4.ptr(transform_field))
                    else {
                        return;
                    };
                    resolved.borrow_mut().push(LootParams {
                        base,
                        interactive,
                        class_name,
                        object_name,
                        transform_internal,
                    });
                });
            });
        });
    });
}

/// Template address and id string of an inventory item.
pub(crate) fn read_template_id<R: ReadMemory + ?Sized>(
    reader: &R,
    layout: &Layout,
    item: Address,
) -> Result<(Address, String)> {
    let template = reader.read_ptr(item.offset(layout.item.template))?;
    let id_ptr = reader.read_ptr(template.offset(layout.item.template_id))?;
    let id = reader.read_unity_string(id_ptr, STRING_MAX)?;
    if id.is_empty() {
        return Err(Error::validation("empty template id"));
    }
    Ok((template, id))
}

/// Last eight characters of an id, used when a short name is unusable.
fn id_suffix(id: &str) -> &str {
    let len = id.chars().count();
    if len <= 8 {
        return id;
    }
    let start = id.char_indices().nth(len - 8).map(|(i, _)| i).unwrap_or(0);
    &id[start..]
}
