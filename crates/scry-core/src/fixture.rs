//! Synthetic target worlds built in a [`MemoryImage`].
//!
//! A [`WorldFixture`] lays out an object manager, a world root, the local
//! player and any number of observed players and loot objects using
//! [`fixture_layout`]. Every mutator takes `&self`, so a fixture can be
//! changed while a session is polling it.
//!
//! Each object owns one [`WorldFixture::OBJECT_SPAN`]-sized block: the
//! object itself at the start, followed by fixed-size chunks for the
//! structures it points to.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use crate::config::Config;
use crate::context::SessionContext;
use crate::entity::{HealthStatus, OBSERVED_PLAYER_CLASS, Side};
use crate::error::Result;
use crate::loot::{CatalogContainer, CatalogItem, ItemCatalog};
use crate::math::{Quat, Vec2, Vec3};
use crate::memory::layout::{
    EquipmentOffsets, ItemOffsets, LootOffsets, ObjectOffsets, ObservedOffsets, PlayerOffsets,
    TransformOffsets, VehicleOffsets, WorldOffsets,
};
use crate::memory::unity::{ARRAY_FIRST_ELEMENT, ARRAY_LENGTH, COMPONENT_TRANSFORM, ListNode, TrsX};
use crate::memory::{Address, Layout, MemoryImage, ReadMemoryExt};

const OBJECT_MANAGER_SLOT: u64 = 0x10000;
const HEAP_START: u64 = 0x100_0000;
const OBJECT_HEADER: u64 = 0x400;
const CHUNK: u64 = 0x100;
const LIST_ARRAY_SPAN: u64 = 0x10000;

const LOCAL_CLASS: &str = "LocalPlayer";
const CORPSE_CLASS: &str = "ObservedCorpse";
const CONTAINER_CLASS: &str = "LootableContainer";
const ITEM_CLASS: &str = "ObservedLootItem";
const IDLE_HANDS: &str = "ClientEmptyHandsController";
const ACTIVE_HANDS: &str = "ClientFirearmController";
const WORLD_NODE: &str = "GameWorld";

/// Offset table used by every fixture.
pub fn fixture_layout() -> Layout {
    Layout {
        version: "fixture".to_string(),
        world: WorldOffsets {
            object_manager: OBJECT_MANAGER_SLOT,
            active_nodes: 0x10,
            last_active_node: 0x18,
            root_chain: vec![0x30, 0x28],
            location_id: 0x100,
            main_player: 0x108,
            registered_players: 0x110,
            loot_list: 0x118,
            vehicle_controller: 0x120,
        },
        object: ObjectOffsets {
            game_object_name: 0x60,
            game_object_components: 0x38,
            mono_behaviour: 0x20,
            component_object_class: 0x40,
            component_game_object: 0x48,
            class_name_chain: vec![0x0, 0x50],
        },
        transform: TransformOffsets {
            hierarchy: 0x38,
            index: 0x40,
            vertices: 0x18,
            indices: 0x20,
        },
        player: PlayerOffsets {
            movement_context: 0x80,
            movement_player: 0x10,
            rotation: 0x28,
            corpse: 0x300,
            location: 0x310,
            raid_id: 0x318,
            profile: 0x320,
            info: 0x18,
            side: 0x20,
            hands_controller: 0x328,
            transform_chain: vec![0x340, 0x18],
        },
        observed: ObservedOffsets {
            controller: 0x90,
            controller_view: 0x18,
            health_controller: 0x28,
            health_player: 0x10,
            health_corpse: 0x18,
            health_status: 0x20,
            movement_chain: vec![0x30, 0x18],
            rotation: 0x24,
            voice: 0xA0,
            id: 0xA8,
            side: 0xAC,
            is_ai: 0xB0,
            transform_chain: vec![0xB8, 0x18],
        },
        vehicle: VehicleOffsets {
            view_chain: vec![0x10],
            operator_chain: vec![0x20, 0x30],
            position: 0x40,
        },
        loot: LootOffsets {
            item: 0x58,
            container_owner: 0x60,
            owner_root_item: 0x18,
        },
        item: ItemOffsets {
            template: 0x20,
            template_id: 0x10,
            short_name: 0x18,
            quest_flag: 0x28,
        },
        equipment: EquipmentOffsets {
            slots_chain: vec![0xC0, 0x10],
            slot_id: 0x10,
            slot_item: 0x18,
        },
    }
}

/// Description of an observed player to place in a fixture.
#[derive(Debug, Clone, PartialEq)]
pub struct ObservedSpec {
    pub id: i32,
    pub side: Side,
    pub ai: bool,
    pub voice: Option<String>,
    pub position: Vec3,
    pub rotation: Vec2,
    pub health: HealthStatus,
}

impl ObservedSpec {
    /// Human player; USEC unless changed with [`ObservedSpec::side`].
    pub fn pmc(id: i32, position: Vec3) -> Self {
        Self {
            id,
            side: Side::Usec,
            ai: false,
            voice: None,
            position,
            rotation: Vec2::new(90.0, 0.0),
            health: HealthStatus::Healthy,
        }
    }

    /// AI-controlled player identified by its voice line.
    pub fn ai(voice: &str, position: Vec3) -> Self {
        Self {
            id: 0,
            side: Side::Savage,
            ai: true,
            voice: Some(voice.to_string()),
            ..Self::pmc(0, position)
        }
    }

    pub fn side(mut self, side: Side) -> Self {
        self.side = side;
        self
    }

    pub fn rotation(mut self, rotation: Vec2) -> Self {
        self.rotation = rotation;
        self
    }

    pub fn health(mut self, health: HealthStatus) -> Self {
        self.health = health;
        self
    }
}

/// Mutable addresses of one placed player.
#[derive(Debug, Clone, Copy)]
struct PlayerParts {
    corpse_field: Address,
    rotation_field: Address,
    hierarchy: Address,
    vertices: Address,
    position: Vec3,
    relocations: u64,
}

#[derive(Debug)]
struct FixtureState {
    next: u64,
    classes: HashMap<String, Address>,
    players: Vec<Address>,
    loot: Vec<Address>,
    parts: HashMap<Address, PlayerParts>,
    slots: HashMap<Address, Vec<(String, Address)>>,
}

/// Files written by [`WorldFixture::save`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FixturePaths {
    pub image: PathBuf,
    pub config: PathBuf,
    pub catalog: PathBuf,
}

pub struct WorldFixture {
    image: Arc<MemoryImage>,
    layout: Layout,
    map_id: String,
    raid_id: String,
    world: Address,
    local: Address,
    world_object: Address,
    last_node: Address,
    players_list: (Address, Address),
    loot_list: (Address, Address),
    state: Mutex<FixtureState>,
}

impl std::fmt::Debug for WorldFixture {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorldFixture")
            .field("map_id", &self.map_id)
            .field("world", &self.world)
            .field("local", &self.local)
            .finish_non_exhaustive()
    }
}

fn chunk(base: Address, n: u64) -> Address {
    base.offset(OBJECT_HEADER + n * CHUNK)
}

impl WorldFixture {
    /// Size of the block each placed object owns.
    pub const OBJECT_SPAN: u64 = 0x2000;
    /// Catalogued, important item.
    pub const LEDX_ID: &'static str = "5c0530ee86f774697952d952";
    /// Catalogued container.
    pub const DUFFLE_ID: &'static str = "578f87a3245977356274f2cb";
    /// Catalogued, unimportant gear.
    pub const HELMET_ID: &'static str = "5aa7e276e5b5b000171d0647";

    /// Build a world on `map_id` holding only the local player.
    pub fn new(map_id: &str) -> Self {
        let image = Arc::new(MemoryImage::new());
        let layout = fixture_layout();
        let mut state = FixtureState {
            next: HEAP_START,
            classes: HashMap::new(),
            players: Vec::new(),
            loot: Vec::new(),
            parts: HashMap::new(),
            slots: HashMap::new(),
        };
        let raid_id = format!("raid-{}", map_id);

        let world = Self::alloc(&mut state, Self::OBJECT_SPAN);
        let world_object = Self::alloc(&mut state, Self::OBJECT_SPAN);
        let gom = Self::alloc(&mut state, Self::OBJECT_SPAN);
        let players_array = Self::alloc(&mut state, LIST_ARRAY_SPAN);
        let loot_array = Self::alloc(&mut state, LIST_ARRAY_SPAN);
        let local = Self::alloc(&mut state, Self::OBJECT_SPAN);

        let mut fixture = Self {
            image,
            layout,
            map_id: map_id.to_string(),
            raid_id,
            world,
            local,
            world_object,
            last_node: Address::NULL,
            players_list: (chunk(world, 1), players_array),
            loot_list: (chunk(world, 2), loot_array),
            state: Mutex::new(state),
        };
        fixture.build_world(gom);
        fixture.build_local(Vec3::new(0.5, 0.0, 0.5));
        fixture
    }

    fn alloc(state: &mut FixtureState, size: u64) -> Address {
        let address = Address(state.next);
        state.next += size;
        address
    }

    fn class(&self, state: &mut FixtureState, name: &str) -> Address {
        if let Some(&klass) = state.classes.get(name) {
            return klass;
        }
        let klass = Self::alloc(state, CHUNK * 2);
        self.image.write_u64(
            klass.offset(self.layout.object.class_name_chain[1]),
            klass.offset(CHUNK).raw(),
        );
        self.image.write_utf8(klass.offset(CHUNK), name);
        state.classes.insert(name.to_string(), klass);
        klass
    }

    fn set_class(&self, state: &mut FixtureState, object: Address, name: &str) {
        let klass = self.class(state, name);
        self.image
            .write_u64(object.offset(self.layout.object.class_name_chain[0]), klass.raw());
    }

    fn write_ptr(&self, field: Address, target: Address) {
        self.image.write_u64(field, target.raw());
    }

    fn write_transform(&self, internal: Address, hierarchy: Address, vertices: Address, indices: Address, position: Vec3) {
        let t = &self.layout.transform;
        self.write_ptr(internal.offset(t.hierarchy), hierarchy);
        self.image.write_value(internal.offset(t.index), 0i32);
        self.write_ptr(hierarchy.offset(t.vertices), vertices);
        self.write_ptr(hierarchy.offset(t.indices), indices);
        self.image.write_value(indices, -1i32);
        self.write_vertex(vertices, position);
    }

    fn write_vertex(&self, vertices: Address, position: Vec3) {
        self.image
            .write_value(vertices, TrsX::new(position, Quat::IDENTITY, Vec3::new(1.0, 1.0, 1.0)));
    }

    /// Object manager with three nodes; the world node sits in the middle.
    fn build_world(&mut self, gom: Address) {
        let w = self.layout.world.clone();
        let o = self.layout.object.clone();
        self.write_ptr(Address(w.object_manager), gom);

        let mut state = self.state.lock();
        let camera = Self::alloc(&mut state, Self::OBJECT_SPAN);
        let sun = Self::alloc(&mut state, Self::OBJECT_SPAN);
        drop(state);

        for (object, name) in [(camera, "Main Camera"), (self.world_object, WORLD_NODE), (sun, "Sun")] {
            self.write_ptr(object.offset(o.game_object_name), chunk(object, 0));
            self.image.write_utf8(chunk(object, 0), name);
        }
        self.write_ptr(self.world_object.offset(w.root_chain[0]), chunk(self.world_object, 1));
        self.write_ptr(chunk(self.world_object, 1).offset(w.root_chain[1]), self.world);

        let nodes = [chunk(gom, 0), chunk(gom, 1), chunk(gom, 2)];
        let objects = [camera, self.world_object, sun];
        for i in 0..nodes.len() {
            let node = ListNode {
                prev: nodes[(i + nodes.len() - 1) % nodes.len()].raw(),
                next: nodes[(i + 1) % nodes.len()].raw(),
                object: objects[i].raw(),
            };
            self.image.write_value(nodes[i], node);
        }
        self.write_ptr(gom.offset(w.active_nodes), nodes[0]);
        self.write_ptr(gom.offset(w.last_active_node), nodes[2]);
        self.last_node = nodes[2];

        self.write_ptr(self.world.offset(w.location_id), chunk(self.world, 0));
        self.image.write_unity_string(chunk(self.world, 0), &self.map_id);
        self.write_ptr(self.world.offset(w.registered_players), self.players_list.0);
        self.write_ptr(self.world.offset(w.loot_list), self.loot_list.0);
        self.image
            .write_pointer_list(self.loot_list.0, self.loot_list.1, &[]);
    }

    fn build_local(&self, position: Vec3) {
        let base = self.local;
        let p = &self.layout.player;
        let mut state = self.state.lock();
        self.set_class(&mut state, base, LOCAL_CLASS);

        let movement = chunk(base, 0);
        self.write_ptr(base.offset(p.movement_context), movement);
        self.write_ptr(movement.offset(p.movement_player), base);
        let rotation_field = movement.offset(p.rotation);
        self.image.write_value(rotation_field, Vec2::new(0.0, 0.0));

        let (profile, info) = (chunk(base, 1), chunk(base, 2));
        self.write_ptr(base.offset(p.profile), profile);
        self.write_ptr(profile.offset(p.info), info);
        self.image.write_value(info.offset(p.side), Side::Usec as i32);

        let (hop, internal) = (chunk(base, 3), chunk(base, 4));
        let (hierarchy, vertices, indices) = (chunk(base, 5), chunk(base, 6), chunk(base, 7));
        self.write_ptr(base.offset(p.transform_chain[0]), hop);
        self.write_ptr(hop.offset(p.transform_chain[1]), internal);
        self.write_transform(internal, hierarchy, vertices, indices, position);

        self.write_ptr(base.offset(p.raid_id), chunk(base, 8));
        self.image.write_unity_string(chunk(base, 8), &self.raid_id);
        self.write_ptr(base.offset(p.location), chunk(base, 9));
        self.image.write_unity_string(chunk(base, 9), &self.map_id);

        let hands = chunk(base, 10);
        self.write_ptr(base.offset(p.hands_controller), hands);
        self.set_class(&mut state, hands, IDLE_HANDS);

        self.write_ptr(self.world.offset(self.layout.world.main_player), base);
        state.parts.insert(
            base,
            PlayerParts {
                corpse_field: base.offset(p.corpse),
                rotation_field,
                hierarchy,
                vertices,
                position,
                relocations: 0,
            },
        );
        state.players.push(base);
        self.write_players(&state);
    }

    fn write_players(&self, state: &FixtureState) {
        self.image
            .write_pointer_list(self.players_list.0, self.players_list.1, &state.players);
    }

    fn write_loot(&self, state: &FixtureState) {
        self.image
            .write_pointer_list(self.loot_list.0, self.loot_list.1, &state.loot);
    }

    pub fn image(&self) -> Arc<MemoryImage> {
        Arc::clone(&self.image)
    }

    pub fn layout(&self) -> Layout {
        self.layout.clone()
    }

    pub fn world(&self) -> Address {
        self.world
    }

    pub fn local_player(&self) -> Address {
        self.local
    }

    pub fn map_id(&self) -> &str {
        &self.map_id
    }

    pub fn raid_id(&self) -> &str {
        &self.raid_id
    }

    /// Last node of the object manager's active list.
    pub fn last_node(&self) -> Address {
        self.last_node
    }

    /// Fresh session context for this world's raid.
    pub fn context(&self) -> SessionContext {
        SessionContext::new(self.raid_id.clone())
    }

    pub fn catalog(&self) -> ItemCatalog {
        ItemCatalog::new(
            vec![
                CatalogItem {
                    id: Self::LEDX_ID.to_string(),
                    name: "LEDX Skin Transilluminator".to_string(),
                    short_name: "LEDX".to_string(),
                    value: 950_000,
                    important: true,
                },
                CatalogItem {
                    id: Self::HELMET_ID.to_string(),
                    name: "Altyn bulletproof helmet".to_string(),
                    short_name: "Altyn".to_string(),
                    value: 40_000,
                    important: false,
                },
            ],
            vec![CatalogContainer {
                id: Self::DUFFLE_ID.to_string(),
                name: "Duffle bag".to_string(),
            }],
        )
    }

    /// Default configuration with the fixture layout and this map known.
    pub fn config(&self) -> Config {
        let mut config = Config {
            layout: self.layout(),
            ..Default::default()
        };
        if !config.locator.is_known_map(&self.map_id) {
            config.locator.maps.push(self.map_id.clone());
        }
        config
    }

    /// Place an observed player and register it.
    pub fn add_observed(&self, spec: ObservedSpec) -> Address {
        let o = &self.layout.observed;
        let mut state = self.state.lock();
        let base = Self::alloc(&mut state, Self::OBJECT_SPAN);
        self.set_class(&mut state, base, OBSERVED_PLAYER_CLASS);

        let (controller, health) = (chunk(base, 0), chunk(base, 1));
        self.write_ptr(base.offset(o.controller), controller);
        self.write_ptr(controller.offset(o.controller_view), base);
        self.write_ptr(controller.offset(o.health_controller), health);
        self.write_ptr(health.offset(o.health_player), base);
        self.image
            .write_value(health.offset(o.health_status), spec.health.tag());

        let (hop, movement) = (chunk(base, 2), chunk(base, 3));
        self.write_ptr(controller.offset(o.movement_chain[0]), hop);
        self.write_ptr(hop.offset(o.movement_chain[1]), movement);
        let rotation_field = movement.offset(o.rotation);
        self.image.write_value(rotation_field, spec.rotation);

        let (hop, internal) = (chunk(base, 4), chunk(base, 5));
        let (hierarchy, vertices, indices) = (chunk(base, 6), chunk(base, 7), chunk(base, 8));
        self.write_ptr(base.offset(o.transform_chain[0]), hop);
        self.write_ptr(hop.offset(o.transform_chain[1]), internal);
        self.write_transform(internal, hierarchy, vertices, indices, spec.position);

        if let Some(voice) = &spec.voice {
            self.write_ptr(base.offset(o.voice), chunk(base, 9));
            self.image.write_unity_string(chunk(base, 9), voice);
        }
        self.image.write_value(base.offset(o.id), spec.id);
        self.image.write_value(base.offset(o.side), spec.side as i32);
        self.image.write_value(base.offset(o.is_ai), u8::from(spec.ai));

        let e = &self.layout.equipment;
        let (inventory, slots) = (chunk(base, 10), chunk(base, 11));
        self.write_ptr(base.offset(e.slots_chain[0]), inventory);
        self.write_ptr(inventory.offset(e.slots_chain[1]), slots);
        self.image.write_value(slots.offset(ARRAY_LENGTH), 0i32);

        state.parts.insert(
            base,
            PlayerParts {
                corpse_field: health.offset(o.health_corpse),
                rotation_field,
                hierarchy,
                vertices,
                position: spec.position,
                relocations: 0,
            },
        );
        state.players.push(base);
        self.write_players(&state);
        debug!("Fixture player {} at {}", spec.id, base);
        base
    }

    /// Lay out a loot object; returns `(base, interactive)`.
    fn place_loot(&self, state: &mut FixtureState, class: &str, name: &str, position: Vec3) -> (Address, Address) {
        let o = &self.layout.object;
        let base = Self::alloc(state, Self::OBJECT_SPAN);
        self.set_class(state, base, class);

        let (behaviour, interactive, game_object) = (chunk(base, 0), chunk(base, 1), chunk(base, 2));
        self.write_ptr(base.offset(o.mono_behaviour), behaviour);
        self.write_ptr(behaviour.offset(o.component_object_class), interactive);
        self.write_ptr(behaviour.offset(o.component_game_object), game_object);

        let (components, internal) = (chunk(base, 3), chunk(base, 4));
        self.write_ptr(game_object.offset(o.game_object_components), components);
        self.write_ptr(components.offset(COMPONENT_TRANSFORM), internal);
        self.write_transform(internal, chunk(base, 5), chunk(base, 6), chunk(base, 7), position);

        self.write_ptr(game_object.offset(o.game_object_name), chunk(base, 8));
        self.image.write_utf8(chunk(base, 8), name);
        (base, interactive)
    }

    /// Item with its template; `item` is the chunk holding the item object.
    fn write_item(&self, base: Address, item: Address, template_id: &str, short_name: &str, quest: bool) {
        let i = &self.layout.item;
        let template = chunk(base, 10);
        self.write_ptr(item.offset(i.template), template);
        self.write_ptr(template.offset(i.template_id), chunk(base, 11));
        self.image.write_unity_string(chunk(base, 11), template_id);
        self.write_ptr(template.offset(i.short_name), chunk(base, 12));
        self.image.write_unity_string(chunk(base, 12), short_name);
        self.image.write_value(template.offset(i.quest_flag), u8::from(quest));
    }

    /// Template object behind a loot item or container placed by this fixture.
    pub fn template_of(&self, loot: Address) -> Address {
        chunk(loot, 10)
    }

    pub fn add_loot_item(&self, template_id: &str, quest: bool, position: Vec3) -> Address {
        let mut state = self.state.lock();
        let (base, interactive) = self.place_loot(&mut state, ITEM_CLASS, "loot_item", position);
        let item = chunk(base, 9);
        self.write_ptr(interactive.offset(self.layout.loot.item), item);
        let short = if quest { "Folder" } else { "Item" };
        self.write_item(base, item, template_id, short, quest);
        state.loot.push(base);
        self.write_loot(&state);
        base
    }

    pub fn add_container(&self, template_id: &str, position: Vec3) -> Address {
        let l = &self.layout.loot;
        let mut state = self.state.lock();
        let (base, interactive) = self.place_loot(&mut state, CONTAINER_CLASS, "container", position);
        let (owner, root) = (chunk(base, 13), chunk(base, 9));
        self.write_ptr(interactive.offset(l.container_owner), owner);
        self.write_ptr(owner.offset(l.owner_root_item), root);
        self.write_item(base, root, template_id, "", false);
        state.loot.push(base);
        self.write_loot(&state);
        base
    }

    pub fn add_airdrop(&self, position: Vec3) -> Address {
        let mut state = self.state.lock();
        let (base, _) = self.place_loot(&mut state, CONTAINER_CLASS, "loot_collider", position);
        state.loot.push(base);
        self.write_loot(&state);
        base
    }

    /// Loot-list object with an arbitrary name and a container class.
    pub fn add_script_object(&self, name: &str, position: Vec3) -> Address {
        let mut state = self.state.lock();
        let (base, _) = self.place_loot(&mut state, CONTAINER_CLASS, name, position);
        state.loot.push(base);
        self.write_loot(&state);
        base
    }

    pub fn remove_loot(&self, base: Address) {
        let mut state = self.state.lock();
        state.loot.retain(|l| *l != base);
        self.write_loot(&state);
    }

    /// Put `operator` in a vehicle at `position`.
    pub fn add_vehicle(&self, operator: Address, position: Vec3) {
        let v = &self.layout.vehicle;
        let mut state = self.state.lock();
        let controller = Self::alloc(&mut state, Self::OBJECT_SPAN);
        let (view, hop) = (chunk(controller, 0), chunk(controller, 1));
        self.write_ptr(
            self.world.offset(self.layout.world.vehicle_controller),
            controller,
        );
        self.write_ptr(controller.offset(v.view_chain[0]), view);
        self.write_ptr(view.offset(v.operator_chain[0]), hop);
        self.write_ptr(hop.offset(v.operator_chain[1]), operator);
        self.image.write_value(view.offset(v.position), position);
    }

    /// Put an item with `template_id` into a gear slot of an observed
    /// player, adding the slot if it does not exist yet.
    pub fn equip(&self, base: Address, slot: &str, template_id: &str) {
        let (e, i) = (&self.layout.equipment, &self.layout.item);
        let mut state = self.state.lock();
        let existing = state
            .slots
            .get(&base)
            .and_then(|slots| slots.iter().find(|(name, _)| name == slot))
            .map(|(_, address)| *address);
        let object = match existing {
            Some(object) => object,
            None => {
                let object = Self::alloc(&mut state, Self::OBJECT_SPAN);
                self.write_ptr(object.offset(e.slot_id), chunk(object, 0));
                self.image.write_unity_string(chunk(object, 0), slot);
                let slots = state.slots.entry(base).or_default();
                slots.push((slot.to_string(), object));
                self.write_slots(base, slots);
                object
            }
        };
        let (item, template, id) = (chunk(object, 1), chunk(object, 2), chunk(object, 3));
        self.write_ptr(item.offset(i.template), template);
        self.write_ptr(template.offset(i.template_id), id);
        self.image.write_unity_string(id, template_id);
        self.write_ptr(object.offset(e.slot_item), item);
    }

    /// Empty a gear slot; the slot itself stays.
    pub fn unequip(&self, base: Address, slot: &str) {
        let state = self.state.lock();
        let object = state
            .slots
            .get(&base)
            .and_then(|slots| slots.iter().find(|(name, _)| name == slot));
        if let Some((_, object)) = object {
            self.image
                .write_u64(object.offset(self.layout.equipment.slot_item), 0);
        }
    }

    fn write_slots(&self, base: Address, slots: &[(String, Address)]) {
        let array = chunk(base, 11);
        let payload: Vec<u8> = slots
            .iter()
            .flat_map(|(_, object)| object.raw().to_le_bytes())
            .collect();
        self.image
            .write_value(array.offset(ARRAY_LENGTH), slots.len() as i32);
        self.image
            .write_bytes(array.offset(ARRAY_FIRST_ELEMENT), &payload);
    }

    fn parts(&self, base: Address) -> PlayerParts {
        self.state.lock().parts[&base]
    }

    /// Remove a player from the registered list and leave a corpse.
    ///
    /// Returns the corpse address written into the player's corpse field.
    pub fn kill(&self, base: Address) -> Address {
        let parts = self.parts(base);
        let mut state = self.state.lock();
        state.players.retain(|p| *p != base);
        self.write_players(&state);

        let (loot, corpse) = self.place_loot(&mut state, CORPSE_CLASS, "corpse", parts.position);
        self.write_ptr(parts.corpse_field, corpse);
        state.loot.push(loot);
        self.write_loot(&state);
        debug!("Fixture player {} killed, corpse {}", base, corpse);
        corpse
    }

    /// Remove a player from the registered list without a corpse.
    pub fn exfil(&self, base: Address) {
        let mut state = self.state.lock();
        state.players.retain(|p| *p != base);
        self.write_players(&state);
    }

    /// Put a removed player back into the registered list.
    pub fn restore_player(&self, base: Address) {
        let mut state = self.state.lock();
        if !state.players.contains(&base) {
            state.players.push(base);
        }
        self.write_players(&state);
    }

    /// Current value of a player's corpse field.
    pub fn corpse_of(&self, base: Address) -> Address {
        let field = self.parts(base).corpse_field;
        Address(self.image.read_u64(field).unwrap_or(0))
    }

    pub fn move_player(&self, base: Address, position: Vec3) {
        let mut state = self.state.lock();
        if let Some(parts) = state.parts.get_mut(&base) {
            parts.position = position;
            self.write_vertex(parts.vertices, position);
        }
    }

    pub fn set_rotation(&self, base: Address, rotation: Vec2) {
        let field = self.parts(base).rotation_field;
        self.image.write_value(field, rotation);
    }

    /// Move a player's vertex array, as the target does when it reallocates
    /// a transform hierarchy. The old array keeps its stale contents.
    pub fn relocate_vertices(&self, base: Address) {
        let mut state = self.state.lock();
        let Some(parts) = state.parts.get_mut(&base) else {
            return;
        };
        parts.relocations += 1;
        let vertices = chunk(base, 20 + parts.relocations % 4);
        parts.vertices = vertices;
        self.write_vertex(vertices, parts.position);
        self.write_ptr(parts.hierarchy.offset(self.layout.transform.vertices), vertices);
    }

    /// Switch the local player's hands controller to an active one.
    pub fn start_activity(&self) {
        let hands = chunk(self.local, 10);
        let mut state = self.state.lock();
        self.set_class(&mut state, hands, ACTIVE_HANDS);
    }

    /// Make the world carry no location id, forcing the local-player fallback.
    pub fn clear_world_location(&self) {
        self.image
            .write_u64(self.world.offset(self.layout.world.location_id), 0);
    }

    /// Tear the world down the way the target does when activity ends.
    pub fn end_session(&self) {
        self.image
            .write_u64(self.world.offset(self.layout.world.main_player), 0);
        self.image.write_utf8(chunk(self.world_object, 0), "Disposed");
    }

    /// Undo [`WorldFixture::end_session`].
    pub fn restart_session(&self) {
        self.write_ptr(
            self.world.offset(self.layout.world.main_player),
            self.local,
        );
        self.image.write_utf8(chunk(self.world_object, 0), WORLD_NODE);
    }

    /// Write image, config and catalog files into `dir`.
    pub fn save(&self, dir: &Path) -> Result<FixturePaths> {
        let paths = FixturePaths {
            image: dir.join("image.json"),
            config: dir.join("scry.toml"),
            catalog: dir.join("items.json"),
        };
        self.image.save(&paths.image)?;
        self.catalog().save(&paths.catalog)?;
        let config = Config {
            catalog: Some(paths.catalog.clone()),
            ..self.config()
        };
        config.save(&paths.config)?;
        Ok(paths)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::ReadMemory;
    use crate::memory::unity::{read_class_name, read_pointer_list};
    use tempfile::TempDir;

    #[test]
    fn test_world_lists_local_player() {
        let fixture = WorldFixture::new("woods");
        let image = fixture.image();
        let layout = fixture.layout();
        let list = image
            .read_ptr(fixture.world().offset(layout.world.registered_players))
            .unwrap();
        assert_eq!(read_pointer_list(&*image, list, 16).unwrap(), vec![fixture.local_player()]);
        let class = read_class_name(&*image, fixture.local_player(), &layout.object.class_name_chain).unwrap();
        assert_eq!(class, LOCAL_CLASS);
    }

    #[test]
    fn test_objects_do_not_overlap() {
        let fixture = WorldFixture::new("woods");
        let a = fixture.add_observed(ObservedSpec::pmc(1, Vec3::ZERO));
        let b = fixture.add_loot_item(WorldFixture::LEDX_ID, false, Vec3::ZERO);
        assert!(b.raw() >= a.raw() + WorldFixture::OBJECT_SPAN);
    }

    #[test]
    fn test_kill_writes_corpse_field() {
        let fixture = WorldFixture::new("woods");
        let base = fixture.add_observed(ObservedSpec::pmc(1, Vec3::new(1.0, 0.0, 1.0)));
        assert!(fixture.corpse_of(base).is_null());
        let corpse = fixture.kill(base);
        assert_eq!(fixture.corpse_of(base), corpse);
    }

    #[test]
    fn test_save_writes_loadable_files() {
        let dir = TempDir::new().unwrap();
        let fixture = WorldFixture::new("woods");
        let paths = fixture.save(dir.path()).unwrap();

        let image = MemoryImage::load(&paths.image).unwrap();
        let main_player = fixture.world().offset(fixture.layout().world.main_player);
        let world_ptr = image.read_bytes(main_player, 8).unwrap();
        assert_eq!(world_ptr, fixture.local_player().raw().to_le_bytes());
        let config = Config::load(&paths.config).unwrap();
        config.validate().unwrap();
        assert_eq!(ItemCatalog::load(&paths.catalog).unwrap().len(), 2);
    }
}
