//! Reconstructed actors and their per-poll capabilities.
//!
//! An [`Entity`] is created once per base address and then mutated only
//! through atomics, each field category owned by exactly one polling loop:
//!
//! | field                  | writer                 |
//! |------------------------|------------------------|
//! | lifecycle, loot link   | registration loop      |
//! | rotation, position     | realtime loop          |
//! | transform              | realtime + validation  |
//! | group, health          | slow loop / registration |
//! | equipment              | slow loop              |

mod alloc;
mod equipment;
mod lifecycle;
mod roles;
mod transform;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU8, AtomicU64, Ordering};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString, FromRepr, IntoStaticStr};
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::loot::ItemCatalog;
use crate::math::{Vec2, Vec3, normalize_angle};
use crate::memory::unity::TrsX;
use crate::memory::{Address, Layout, ReadMemory, ReadMemoryExt, ScatterRound, decode_array};

pub(crate) use alloc::{allocate, allocate_local, vehicle_operator};
pub use alloc::{CLIENT_PLAYER_CLASSES, OBSERVED_PLAYER_CLASS};
pub use equipment::{Equipment, MAX_SLOT_ATTEMPTS, SKIPPED_SLOTS};
use equipment::EquipmentCell;
pub use lifecycle::Lifecycle;
pub(crate) use lifecycle::LifecycleCell;
pub use roles::{AiRole, AiRoles, RolePattern};
pub use transform::{MAX_TRANSFORM_INDEX, Transform};

/// Group id of an entity that belongs to no group.
pub const GROUP_SOLO: i32 = -1;
/// Group id shared by the local player's squad.
pub const GROUP_SQUAD: i32 = -100;

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    EnumString,
    IntoStaticStr,
    Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum EntityKind {
    Local,
    Teammate,
    Pmc,
    PlayerScav,
    AiScav,
    AiRaider,
    AiBoss,
    Vehicle,
}

impl EntityKind {
    pub fn is_human(&self) -> bool {
        matches!(
            self,
            Self::Local | Self::Teammate | Self::Pmc | Self::PlayerScav
        )
    }

    pub fn is_ai(&self) -> bool {
        !self.is_human()
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, FromRepr, IntoStaticStr, Display,
)]
#[repr(i32)]
pub enum Side {
    Usec = 1,
    Bear = 2,
    Savage = 4,
}

impl Side {
    pub fn from_raw(raw: i32) -> Option<Self> {
        Self::from_repr(raw)
    }

    pub fn is_pmc(&self) -> bool {
        matches!(self, Self::Usec | Self::Bear)
    }
}

/// Coarse health reported by the network view.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, FromRepr, IntoStaticStr, Display,
)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum HealthStatus {
    Healthy = 1,
    Injured = 2,
    BadlyInjured = 3,
    Dying = 4,
}

impl HealthStatus {
    const HEALTHY_TAG: u32 = 1024;
    const INJURED_TAG: u32 = 2048;
    const BADLY_INJURED_TAG: u32 = 4096;
    const DYING_TAG: u32 = 8192;

    /// Decode the tag bitfield; the most severe flag wins.
    pub fn from_tag(tag: u32) -> Option<Self> {
        if tag & Self::DYING_TAG != 0 {
            Some(Self::Dying)
        } else if tag & Self::BADLY_INJURED_TAG != 0 {
            Some(Self::BadlyInjured)
        } else if tag & Self::INJURED_TAG != 0 {
            Some(Self::Injured)
        } else if tag & Self::HEALTHY_TAG != 0 {
            Some(Self::Healthy)
        } else {
            None
        }
    }

    /// Single-flag tag encoding this status.
    pub fn tag(self) -> u32 {
        match self {
            Self::Healthy => Self::HEALTHY_TAG,
            Self::Injured => Self::INJURED_TAG,
            Self::BadlyInjured => Self::BADLY_INJURED_TAG,
            Self::Dying => Self::DYING_TAG,
        }
    }
}

/// How an observed entity is wired in the target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Display)]
#[serde(rename_all = "snake_case")]
pub enum ObservedFlavor {
    /// Fully simulated client-side player object (offline AI).
    Client,
    /// Network view of a remote player or server-side AI.
    Network,
}

/// Per-variant data that does not change after allocation.
#[derive(Debug, Clone)]
pub enum EntityVariant {
    Local {
        raid_id: String,
    },
    Observed {
        flavor: ObservedFlavor,
        /// Health controller, network views only.
        health_controller: Option<Address>,
        voice: Option<String>,
    },
    VehicleOperator {
        view: Address,
        position_field: Address,
    },
}

/// Fixed identity of a freshly allocated entity.
#[derive(Debug)]
pub(crate) struct EntityParts {
    pub base: Address,
    pub variant: EntityVariant,
    pub name: String,
    pub kind: EntityKind,
    pub side: Option<Side>,
    pub id: Option<i32>,
    pub corpse_field: Address,
    pub rotation_field: Address,
    pub rotation: Vec2,
    pub transform: Option<Transform>,
    pub position: Vec3,
    pub group: i32,
    pub teammate: bool,
    pub focused: bool,
}

pub struct Entity {
    base: Address,
    variant: EntityVariant,
    name: String,
    kind: EntityKind,
    side: Option<Side>,
    id: Option<i32>,
    corpse_field: Address,
    rotation_field: Address,
    lifecycle: LifecycleCell,
    rotation: AtomicU64,
    position: RwLock<Vec3>,
    transform: Option<RwLock<Arc<Transform>>>,
    group: AtomicI32,
    teammate: AtomicBool,
    focused: AtomicBool,
    error: AtomicBool,
    health: AtomicU8,
    loot_link: AtomicU64,
    equipment: EquipmentCell,
}

impl Entity {
    pub(crate) fn from_parts(parts: EntityParts) -> Self {
        Self {
            base: parts.base,
            variant: parts.variant,
            name: parts.name,
            kind: parts.kind,
            side: parts.side,
            id: parts.id,
            corpse_field: parts.corpse_field,
            rotation_field: parts.rotation_field,
            lifecycle: LifecycleCell::alive(),
            rotation: AtomicU64::new(parts.rotation.to_bits()),
            position: RwLock::new(parts.position),
            transform: parts.transform.map(|t| RwLock::new(Arc::new(t))),
            group: AtomicI32::new(parts.group),
            teammate: AtomicBool::new(parts.teammate),
            focused: AtomicBool::new(parts.focused),
            error: AtomicBool::new(false),
            health: AtomicU8::new(0),
            loot_link: AtomicU64::new(0),
            equipment: EquipmentCell::default(),
        }
    }

    pub fn base(&self) -> Address {
        self.base
    }

    pub fn variant(&self) -> &EntityVariant {
        &self.variant
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Category, with teammates reported as such.
    pub fn kind(&self) -> EntityKind {
        if self.kind == EntityKind::Pmc && self.is_teammate() {
            EntityKind::Teammate
        } else {
            self.kind
        }
    }

    pub fn side(&self) -> Option<Side> {
        self.side
    }

    pub fn id(&self) -> Option<i32> {
        self.id
    }

    pub fn is_local(&self) -> bool {
        matches!(self.variant, EntityVariant::Local { .. })
    }

    pub fn is_vehicle_operator(&self) -> bool {
        matches!(self.variant, EntityVariant::VehicleOperator { .. })
    }

    pub fn is_human(&self) -> bool {
        self.kind.is_human()
    }

    pub fn raid_id(&self) -> Option<&str> {
        match &self.variant {
            EntityVariant::Local { raid_id } => Some(raid_id),
            _ => None,
        }
    }

    pub fn lifecycle(&self) -> Lifecycle {
        self.lifecycle.load()
    }

    pub fn is_active(&self) -> bool {
        self.lifecycle().is_active()
    }

    pub fn rotation(&self) -> Vec2 {
        Vec2::from_bits(self.rotation.load(Ordering::Relaxed))
    }

    pub fn position(&self) -> Vec3 {
        *self.position.read()
    }

    /// Current transform; `None` for entities positioned without one.
    pub fn transform(&self) -> Option<Arc<Transform>> {
        self.transform.as_ref().map(|t| Arc::clone(&t.read()))
    }

    pub fn group(&self) -> i32 {
        self.group.load(Ordering::Relaxed)
    }

    pub fn set_group(&self, group: i32) {
        self.group.store(group, Ordering::Relaxed);
    }

    pub fn is_teammate(&self) -> bool {
        self.teammate.load(Ordering::Relaxed)
    }

    pub fn set_teammate(&self, teammate: bool) {
        self.teammate.store(teammate, Ordering::Relaxed);
    }

    pub fn is_focused(&self) -> bool {
        self.focused.load(Ordering::Relaxed)
    }

    pub fn set_focused(&self, focused: bool) {
        self.focused.store(focused, Ordering::Relaxed);
    }

    pub fn has_error(&self) -> bool {
        self.error.load(Ordering::Relaxed)
    }

    pub fn health(&self) -> Option<HealthStatus> {
        HealthStatus::from_repr(self.health.load(Ordering::Relaxed))
    }

    /// Corpse loot object currently linked to this entity.
    pub fn loot_link(&self) -> Option<Address> {
        let raw = self.loot_link.load(Ordering::Acquire);
        (raw != 0).then_some(Address(raw))
    }

    pub(crate) fn set_loot_link(&self, corpse: Option<Address>) {
        let raw = corpse.map(Address::raw).unwrap_or(0);
        self.loot_link.store(raw, Ordering::Release);
    }

    /// Gear as of the last slow poll. Dead entities keep what they had.
    pub fn equipment(&self) -> Equipment {
        self.equipment.load()
    }

    pub fn carrying_important_loot(&self) -> bool {
        self.equipment.is_important()
    }

    /// Re-read the gear of a living network view.
    ///
    /// Returns `false` when there was nothing to read: other variants,
    /// inactive entities, or slots that could not be resolved.
    pub fn refresh_equipment<R: ReadMemory + ?Sized>(
        &self,
        reader: &R,
        layout: &Layout,
        catalog: &ItemCatalog,
    ) -> bool {
        let EntityVariant::Observed {
            flavor: ObservedFlavor::Network,
            ..
        } = self.variant
        else {
            return false;
        };
        if !self.is_active() {
            return false;
        }
        let is_pmc = self.side.is_some_and(|side| side.is_pmc());
        self.equipment.refresh(reader, self.base, layout, catalog, is_pmc)
    }

    /// Mark alive without a poll, used when an entity is (re)allocated.
    pub(crate) fn mark_alive(&self) {
        self.lifecycle.set_alive();
    }

    /// Queue the lifecycle transition for one registry poll.
    ///
    /// Present entities become alive immediately. An entity that was alive
    /// and is now absent gets its corpse field read: a readable corpse makes
    /// it dead, anything else makes it exfiltrated.
    pub fn on_registration_refresh<'a>(
        &'a self,
        round: &mut ScatterRound<'a>,
        present: bool,
        layout: &'a Layout,
    ) {
        if present {
            if !self.lifecycle().is_alive() {
                info!("{} is back in the world", self.name);
            }
            self.lifecycle.set_alive();
            self.set_loot_link(None);
            if let EntityVariant::Observed {
                health_controller: Some(hc),
                ..
            } = &self.variant
            {
                let status = hc.offset(layout.observed.health_status);
                round.prepare_value::<u32>(status);
                round.on_complete(move |r, _| {
                    if let Some(health) = r.value::<u32>(status).and_then(HealthStatus::from_tag) {
                        self.health.store(health as u8, Ordering::Relaxed);
                    }
                });
            }
            return;
        }

        if !self.lifecycle().is_alive() {
            return;
        }
        if !self.corpse_field.is_valid() {
            info!("{} has left the world", self.name);
            self.lifecycle.set_exfiltrated();
            return;
        }
        let field = self.corpse_field;
        round.prepare_ptr(field);
        round.on_complete(move |r, _| match r.ptr(field) {
            Some(corpse) => {
                info!("{} died (corpse {})", self.name, corpse);
                self.lifecycle.set_dead(corpse);
            }
            None => {
                info!("{} exfiltrated", self.name);
                self.lifecycle.set_exfiltrated();
            }
        });
    }

    /// Queue the rotation and position reads for one realtime tick.
    ///
    /// Both reads land in the same round, so they describe the same remote
    /// instant. Inactive entities are skipped.
    pub fn on_realtime_refresh<'a, R: ReadMemory + ?Sized>(
        &'a self,
        round: &mut ScatterRound<'a>,
        reader: &'a R,
        layout: &'a Layout,
    ) {
        if !self.is_active() {
            return;
        }

        if let EntityVariant::VehicleOperator { position_field, .. } = self.variant {
            round.prepare_value::<Vec3>(position_field);
            round.on_complete(move |r, _| {
                let position = r.value::<Vec3>(position_field).filter(|p| p.is_normal());
                if let Some(position) = position {
                    *self.position.write() = position;
                }
                self.error.store(position.is_none(), Ordering::Relaxed);
            });
            return;
        }

        let Some(transform) = self.transform() else {
            return;
        };
        let rotation_field = self.rotation_field;
        let vertices = transform.vertices();
        let count = transform.count();
        round.prepare_value::<Vec2>(rotation_field);
        round.prepare_array::<TrsX>(vertices, count);
        round.on_complete(move |r, _| {
            let rotation_ok = match r.value::<Vec2>(rotation_field).and_then(validate_rotation) {
                Some(rotation) => {
                    self.rotation.store(rotation.to_bits(), Ordering::Relaxed);
                    true
                }
                None => false,
            };

            let len = std::mem::size_of::<TrsX>() * count;
            let position_ok = match r.bytes(vertices, len) {
                Some(bytes) => {
                    let position = decode_array::<TrsX>(vertices, bytes, count)
                        .map_err(Into::into)
                        .and_then(|nodes| transform.compute_position(&nodes));
                    match position {
                        Ok(position) => {
                            *self.position.write() = position;
                            true
                        }
                        Err(e) => {
                            debug!("{}: transform decode failed: {}", self.name, e);
                            self.rebuild_transform(reader, layout)
                        }
                    }
                }
                None => false,
            };

            self.error
                .store(!rotation_ok || !position_ok, Ordering::Relaxed);
        });
    }

    /// Queue a two-round check that the cached vertex array has not moved.
    ///
    /// Round one reads the hierarchy pointer, round two the vertex pointer
    /// behind it. A mismatch replaces the transform.
    pub fn on_validate_transform<'a, R: ReadMemory + ?Sized>(
        &'a self,
        round: &mut ScatterRound<'a>,
        reader: &'a R,
        layout: &'a Layout,
    ) {
        if !self.is_active() {
            return;
        }
        let Some(transform) = self.transform() else {
            return;
        };
        let hierarchy_field = transform.internal().offset(layout.transform.hierarchy);
        round.prepare_ptr(hierarchy_field);
        round.on_complete(move |r1, round2| {
            let Some(hierarchy) = r1.ptr(hierarchy_field) else {
                return;
            };
            let vertices_field = hierarchy.offset(layout.transform.vertices);
            round2.prepare_ptr(vertices_field);
            round2.on_complete(move |r2, _| {
                let Some(vertices) = r2.ptr(vertices_field) else {
                    return;
                };
                if vertices != transform.vertices() {
                    warn!(
                        "{}: vertex array moved {} -> {}, rebuilding transform",
                        self.name,
                        transform.vertices(),
                        vertices
                    );
                    self.rebuild_transform(reader, layout);
                }
            });
        });
    }

    /// Replace the transform with one rebuilt from the base address.
    pub(crate) fn rebuild_transform<R: ReadMemory + ?Sized>(&self, reader: &R, layout: &Layout) -> bool {
        let Some(slot) = &self.transform else {
            return false;
        };
        match self.build_transform(reader, layout) {
            Ok(transform) => {
                *slot.write() = Arc::new(transform);
                debug!("{}: transform rebuilt", self.name);
                true
            }
            Err(e) => {
                warn!("{}: transform rebuild failed: {}", self.name, e);
                self.error.store(true, Ordering::Relaxed);
                false
            }
        }
    }

    fn build_transform<R: ReadMemory + ?Sized>(&self, reader: &R, layout: &Layout) -> Result<Transform> {
        let chain = match &self.variant {
            EntityVariant::Observed {
                flavor: ObservedFlavor::Network,
                ..
            } => &layout.observed.transform_chain,
            _ => &layout.player.transform_chain,
        };
        let internal = reader.read_ptr_chain(self.base, chain)?;
        Transform::new(reader, internal, &layout.transform)
    }

    /// Point-in-time copy for publishing.
    pub fn view(&self) -> EntityView {
        EntityView {
            base: self.base,
            name: self.name.clone(),
            kind: self.kind(),
            side: self.side,
            id: self.id,
            lifecycle: self.lifecycle(),
            position: self.position(),
            rotation: self.rotation(),
            group: self.group(),
            focused: self.is_focused(),
            error: self.has_error(),
            health: self.health(),
            loot_link: self.loot_link(),
            equipment: self.equipment(),
        }
    }
}

impl std::fmt::Debug for Entity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Entity")
            .field("base", &self.base)
            .field("name", &self.name)
            .field("kind", &self.kind())
            .field("lifecycle", &self.lifecycle())
            .finish()
    }
}

/// Serializable copy of an entity's observable state.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EntityView {
    pub base: Address,
    pub name: String,
    pub kind: EntityKind,
    pub side: Option<Side>,
    pub id: Option<i32>,
    pub lifecycle: Lifecycle,
    pub position: Vec3,
    pub rotation: Vec2,
    pub group: i32,
    pub focused: bool,
    pub error: bool,
    pub health: Option<HealthStatus>,
    pub loot_link: Option<Address>,
    pub equipment: Equipment,
}

/// Normalize the yaw of a raw (yaw, pitch) pair, then bounds-check it.
///
/// Yaw may wind past a full turn between reads; only the normalized value
/// has to land in `[0, 360]`. Pitch is never normalized.
pub fn validate_rotation(raw: Vec2) -> Option<Vec2> {
    if !raw.is_finite() {
        return None;
    }
    let yaw = normalize_angle(raw.x);
    if !(0.0..=360.0).contains(&yaw) || raw.y.abs() > 90.0 {
        return None;
    }
    Some(Vec2::new(yaw, raw.y))
}

/// Read and validate a rotation field at allocation time.
///
/// Stricter than [`validate_rotation`]: a raw yaw beyond one turn means the
/// field offset is wrong, so the entity is rejected.
pub(crate) fn read_rotation<R: ReadMemory + ?Sized>(reader: &R, field: Address) -> Result<Vec2> {
    let raw = reader.read_value::<Vec2>(field)?;
    let in_range = raw.x.abs() <= 360.0 && raw.y.abs() <= 90.0;
    in_range
        .then(|| validate_rotation(raw))
        .flatten()
        .ok_or_else(|| {
            crate::error::Error::validation(format!("rotation ({}, {}) out of range", raw.x, raw.y))
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixture::{ObservedSpec, WorldFixture};
    use crate::math::Quat;
    use crate::memory::ScatterRound;

    #[test]
    fn test_validate_rotation() {
        assert_eq!(
            validate_rotation(Vec2::new(-90.0, 10.0)),
            Some(Vec2::new(270.0, 10.0))
        );
        assert_eq!(validate_rotation(Vec2::new(361.0, 0.0)), Some(Vec2::new(1.0, 0.0)));
        assert_eq!(validate_rotation(Vec2::new(720.0, 10.0)), Some(Vec2::new(0.0, 10.0)));
        assert_eq!(validate_rotation(Vec2::new(-400.0, 0.0)), Some(Vec2::new(320.0, 0.0)));
        assert_eq!(validate_rotation(Vec2::new(0.0, -91.0)), None);
        assert_eq!(validate_rotation(Vec2::new(f32::NAN, 0.0)), None);
    }

    #[test]
    fn test_health_precedence() {
        assert_eq!(HealthStatus::from_tag(1024), Some(HealthStatus::Healthy));
        assert_eq!(HealthStatus::from_tag(1024 | 8192), Some(HealthStatus::Dying));
        assert_eq!(HealthStatus::from_tag(2048 | 4096), Some(HealthStatus::BadlyInjured));
        assert_eq!(HealthStatus::from_tag(0), None);
    }

    #[test]
    fn test_side_from_raw() {
        assert_eq!(Side::from_raw(2), Some(Side::Bear));
        assert_eq!(Side::from_raw(3), None);
        assert!(!Side::Savage.is_pmc());
    }

    #[test]
    fn test_kind_serializes_snake_case() {
        assert_eq!(EntityKind::PlayerScav.to_string(), "player_scav");
        assert_eq!(
            serde_json::to_string(&EntityKind::AiBoss).unwrap(),
            "\"ai_boss\""
        );
    }

    #[test]
    fn test_absent_entity_with_corpse_dies() {
        let fixture = WorldFixture::new("factory4_day");
        let base = fixture.add_observed(ObservedSpec::pmc(7, Vec3::new(5.0, 0.0, 5.0)));
        let image = fixture.image();
        let layout = fixture.layout();
        let entity = allocate(&*image, base, &layout, &AiRoles::default(), &fixture.context()).unwrap();

        fixture.kill(base);
        let mut round = ScatterRound::new();
        entity.on_registration_refresh(&mut round, false, &layout);
        round.execute(&*image);

        let corpse = entity.lifecycle().corpse().expect("dead entity keeps its corpse");
        assert_eq!(corpse, fixture.corpse_of(base));
    }

    #[test]
    fn test_absent_entity_without_corpse_exfiltrates() {
        let fixture = WorldFixture::new("factory4_day");
        let base = fixture.add_observed(ObservedSpec::pmc(8, Vec3::new(1.0, 0.0, 1.0)));
        let image = fixture.image();
        let layout = fixture.layout();
        let entity = allocate(&*image, base, &layout, &AiRoles::default(), &fixture.context()).unwrap();

        let mut round = ScatterRound::new();
        entity.on_registration_refresh(&mut round, false, &layout);
        round.execute(&*image);
        assert_eq!(entity.lifecycle(), Lifecycle::Exfiltrated);

        // terminal until the address reappears
        let mut round = ScatterRound::new();
        entity.on_registration_refresh(&mut round, false, &layout);
        assert!(round.is_empty());

        let mut round = ScatterRound::new();
        entity.on_registration_refresh(&mut round, true, &layout);
        round.execute(&*image);
        assert_eq!(entity.lifecycle(), Lifecycle::Alive);
    }

    #[test]
    fn test_realtime_refresh_updates_position_and_rotation() {
        let fixture = WorldFixture::new("factory4_day");
        let base = fixture.add_observed(ObservedSpec::pmc(9, Vec3::new(3.0, 1.0, 4.0)));
        let image = fixture.image();
        let layout = fixture.layout();
        let entity = allocate(&*image, base, &layout, &AiRoles::default(), &fixture.context()).unwrap();

        fixture.move_player(base, Vec3::new(10.0, 2.0, -6.0));
        fixture.set_rotation(base, Vec2::new(-45.0, 12.0));
        let mut round = ScatterRound::new();
        entity.on_realtime_refresh(&mut round, &*image, &layout);
        round.execute(&*image);

        assert_eq!(entity.position(), Vec3::new(10.0, 2.0, -6.0));
        assert_eq!(entity.rotation(), Vec2::new(315.0, 12.0));
        assert!(!entity.has_error());
    }

    #[test]
    fn test_invalid_rotation_keeps_previous_value() {
        let fixture = WorldFixture::new("factory4_day");
        let base = fixture.add_observed(ObservedSpec::pmc(10, Vec3::new(3.0, 1.0, 4.0)));
        let image = fixture.image();
        let layout = fixture.layout();
        let entity = allocate(&*image, base, &layout, &AiRoles::default(), &fixture.context()).unwrap();
        let before = entity.rotation();

        fixture.set_rotation(base, Vec2::new(0.0, 120.0));
        let mut round = ScatterRound::new();
        entity.on_realtime_refresh(&mut round, &*image, &layout);
        round.execute(&*image);

        assert_eq!(entity.rotation(), before);
        assert!(entity.has_error());
    }

    #[test]
    fn test_wound_up_yaw_is_normalized_on_refresh() {
        let fixture = WorldFixture::new("factory4_day");
        let base = fixture.add_observed(ObservedSpec::pmc(12, Vec3::new(3.0, 1.0, 4.0)));
        let image = fixture.image();
        let layout = fixture.layout();
        let entity = allocate(&*image, base, &layout, &AiRoles::default(), &fixture.context()).unwrap();

        fixture.set_rotation(base, Vec2::new(720.0, 5.0));
        let mut round = ScatterRound::new();
        entity.on_realtime_refresh(&mut round, &*image, &layout);
        round.execute(&*image);

        assert_eq!(entity.rotation(), Vec2::new(0.0, 5.0));
        assert!(!entity.has_error());
    }

    #[test]
    fn test_allocation_rejects_wound_up_yaw() {
        let fixture = WorldFixture::new("factory4_day");
        let base = fixture.add_observed(ObservedSpec::pmc(13, Vec3::new(3.0, 1.0, 4.0)));
        fixture.set_rotation(base, Vec2::new(720.0, 5.0));
        let image = fixture.image();
        let layout = fixture.layout();
        assert!(allocate(&*image, base, &layout, &AiRoles::default(), &fixture.context()).is_err());
    }

    #[test]
    fn test_decode_failure_with_successful_rebuild_is_not_an_error() {
        let fixture = WorldFixture::new("factory4_day");
        let base = fixture.add_observed(ObservedSpec::pmc(14, Vec3::new(3.0, 1.0, 4.0)));
        let image = fixture.image();
        let layout = fixture.layout();
        let entity = allocate(&*image, base, &layout, &AiRoles::default(), &fixture.context()).unwrap();
        let stale = entity.transform().unwrap().vertices();

        // the target reallocated the hierarchy and reused the old array
        fixture.relocate_vertices(base);
        let nan = Vec3::new(f32::NAN, 0.0, 0.0);
        image.write_value(stale, TrsX::new(nan, Quat::IDENTITY, Vec3::new(1.0, 1.0, 1.0)));

        let mut round = ScatterRound::new();
        entity.on_realtime_refresh(&mut round, &*image, &layout);
        round.execute(&*image);

        assert_ne!(entity.transform().unwrap().vertices(), stale);
        assert!(!entity.has_error());
    }

    #[test]
    fn test_dead_entity_keeps_last_equipment() {
        let fixture = WorldFixture::new("factory4_day");
        let base = fixture.add_observed(ObservedSpec::pmc(15, Vec3::new(3.0, 1.0, 4.0)));
        fixture.equip(base, "Backpack", WorldFixture::LEDX_ID);
        let image = fixture.image();
        let layout = fixture.layout();
        let catalog = fixture.catalog();
        let entity = allocate(&*image, base, &layout, &AiRoles::default(), &fixture.context()).unwrap();
        assert!(entity.refresh_equipment(&*image, &layout, &catalog));
        assert!(entity.carrying_important_loot());

        fixture.kill(base);
        fixture.unequip(base, "Backpack");
        let mut round = ScatterRound::new();
        entity.on_registration_refresh(&mut round, false, &layout);
        round.execute(&*image);

        assert!(!entity.refresh_equipment(&*image, &layout, &catalog));
        assert!(entity.carrying_important_loot());
        assert_eq!(entity.view().equipment.value, 950_000);
    }

    #[test]
    fn test_validation_rebuilds_moved_transform() {
        let fixture = WorldFixture::new("factory4_day");
        let base = fixture.add_observed(ObservedSpec::pmc(11, Vec3::new(3.0, 1.0, 4.0)));
        let image = fixture.image();
        let layout = fixture.layout();
        let entity = allocate(&*image, base, &layout, &AiRoles::default(), &fixture.context()).unwrap();
        let original = entity.transform().unwrap().vertices();

        fixture.relocate_vertices(base);
        let mut round = ScatterRound::new();
        entity.on_validate_transform(&mut round, &*image, &layout);
        let stats = round.execute(&*image);

        assert_eq!(stats.rounds, 2);
        assert_ne!(entity.transform().unwrap().vertices(), original);
    }
}
