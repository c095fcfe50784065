//! Entity construction from a base address.
//!
//! Allocation reads everything an entity needs up front and fails as a whole
//! if any load-bearing field is missing or inconsistent. The registry logs
//! the failure and retries on the next poll.

use tracing::debug;

use super::{
    AiRoles, EntityKind, EntityParts, EntityVariant, GROUP_SOLO, GROUP_SQUAD, ObservedFlavor, Side,
    Transform, read_rotation,
};
use super::Entity;
use crate::context::SessionContext;
use crate::error::{Error, Result};
use crate::math::{Vec2, Vec3};
use crate::memory::unity::read_class_name;
use crate::memory::{Address, Layout, ReadMemory, ReadMemoryExt};

/// Class name of a network-observed player view.
pub const OBSERVED_PLAYER_CLASS: &str = "ObservedPlayerView";
/// Class names of fully simulated, client-side players.
pub const CLIENT_PLAYER_CLASSES: [&str; 2] = ["ClientPlayer", "LocalPlayer"];

const STRING_MAX: usize = 128;

fn is_client_class(class: &str) -> bool {
    CLIENT_PLAYER_CLASSES
        .iter()
        .any(|c| c.eq_ignore_ascii_case(class))
}

/// Allocate the local player, the one entity created before the first poll.
pub(crate) fn allocate_local<R: ReadMemory + ?Sized>(
    reader: &R,
    base: Address,
    layout: &Layout,
) -> Result<Entity> {
    let base = base.validate()?;
    let class = read_class_name(reader, base, &layout.object.class_name_chain)?;
    if !is_client_class(&class) {
        return Err(Error::validation(format!(
            "local player at {} has class {:?}",
            base, class
        )));
    }

    let raid_id = reader
        .read_ptr(base.offset(layout.player.raid_id))
        .and_then(|s| reader.read_unity_string(s, STRING_MAX))
        .unwrap_or_default();
    let client = read_client_fields(reader, base, layout)?;
    debug!("Local player at {} ({}, raid {:?})", base, client.side, raid_id);

    Ok(Entity::from_parts(EntityParts {
        base,
        variant: EntityVariant::Local { raid_id },
        name: "Local".to_string(),
        kind: EntityKind::Local,
        side: Some(client.side),
        id: None,
        corpse_field: client.corpse_field,
        rotation_field: client.rotation_field,
        rotation: client.rotation,
        position: client.transform.read_position(reader).unwrap_or(Vec3::ZERO),
        transform: Some(client.transform),
        group: GROUP_SQUAD,
        teammate: false,
        focused: false,
    }))
}

/// Allocate a non-local entity, choosing the variant from its class name.
pub(crate) fn allocate<R: ReadMemory + ?Sized>(
    reader: &R,
    base: Address,
    layout: &Layout,
    roles: &AiRoles,
    ctx: &SessionContext,
) -> Result<Entity> {
    let base = base.validate()?;
    let class = read_class_name(reader, base, &layout.object.class_name_chain)?;
    if class.eq_ignore_ascii_case(OBSERVED_PLAYER_CLASS) {
        allocate_network(reader, base, layout, roles, ctx)
    } else if is_client_class(&class) {
        allocate_client(reader, base, layout)
    } else {
        Err(Error::validation(format!(
            "unknown player class {:?} at {}",
            class, base
        )))
    }
}

/// Fields shared by every client-side player object.
struct ClientFields {
    side: Side,
    corpse_field: Address,
    rotation_field: Address,
    rotation: Vec2,
    transform: Transform,
}

fn read_client_fields<R: ReadMemory + ?Sized>(
    reader: &R,
    base: Address,
    layout: &Layout,
) -> Result<ClientFields> {
    let p = &layout.player;
    let profile = reader.read_ptr(base.offset(p.profile))?;
    let info = reader.read_ptr(profile.offset(p.info))?;
    let raw_side = reader.read_i32(info.offset(p.side))?;
    let side = Side::from_raw(raw_side)
        .ok_or_else(|| Error::validation(format!("unknown side {}", raw_side)))?;

    let movement = reader.read_ptr(base.offset(p.movement_context))?;
    let owner = reader.read_ptr(movement.offset(p.movement_player))?;
    if owner != base {
        return Err(Error::validation(format!(
            "movement context owner {} != {}",
            owner, base
        )));
    }
    let rotation_field = movement.offset(p.rotation);
    let rotation = read_rotation(reader, rotation_field)?;

    let internal = reader.read_ptr_chain(base, &p.transform_chain)?;
    let transform = Transform::new(reader, internal, &layout.transform)?;

    Ok(ClientFields {
        side,
        corpse_field: base.offset(p.corpse),
        rotation_field,
        rotation,
        transform,
    })
}

fn allocate_client<R: ReadMemory + ?Sized>(reader: &R, base: Address, layout: &Layout) -> Result<Entity> {
    let client = read_client_fields(reader, base, layout)?;
    Ok(Entity::from_parts(EntityParts {
        base,
        variant: EntityVariant::Observed {
            flavor: ObservedFlavor::Client,
            health_controller: None,
            voice: None,
        },
        name: "AI".to_string(),
        kind: EntityKind::AiScav,
        side: Some(client.side),
        id: None,
        corpse_field: client.corpse_field,
        rotation_field: client.rotation_field,
        rotation: client.rotation,
        position: client.transform.read_position(reader).unwrap_or(Vec3::ZERO),
        transform: Some(client.transform),
        group: GROUP_SOLO,
        teammate: false,
        focused: false,
    }))
}

fn allocate_network<R: ReadMemory + ?Sized>(
    reader: &R,
    base: Address,
    layout: &Layout,
    roles: &AiRoles,
    ctx: &SessionContext,
) -> Result<Entity> {
    let o = &layout.observed;
    let controller = reader.read_ptr(base.offset(o.controller))?;
    let view = reader.read_ptr(controller.offset(o.controller_view))?;
    if view != base {
        return Err(Error::validation(format!(
            "controller {} points at {}, expected {}",
            controller, view, base
        )));
    }
    let health_controller = reader.read_ptr(controller.offset(o.health_controller))?;
    let health_owner = reader.read_ptr(health_controller.offset(o.health_player))?;
    if health_owner != base {
        return Err(Error::validation(format!(
            "health controller {} belongs to {}",
            health_controller, health_owner
        )));
    }

    let movement = reader.read_ptr_chain(controller, &o.movement_chain)?;
    let rotation_field = movement.offset(o.rotation);
    let rotation = read_rotation(reader, rotation_field)?;

    let internal = reader.read_ptr_chain(base, &o.transform_chain)?;
    let transform = Transform::new(reader, internal, &layout.transform)?;

    let is_ai = reader.read_bool(base.offset(o.is_ai))?;
    let id = reader.read_i32(base.offset(o.id))?;
    let raw_side = reader.read_i32(base.offset(o.side))?;
    let side = Side::from_raw(raw_side)
        .ok_or_else(|| Error::validation(format!("unknown side {}", raw_side)))?;
    let voice = reader
        .read_ptr(base.offset(o.voice))
        .and_then(|s| reader.read_unity_string(s, STRING_MAX))
        .ok();

    let (name, kind) = if is_ai {
        let role = roles.resolve(voice.as_deref().unwrap_or_default());
        (role.name, role.kind)
    } else if side == Side::Savage {
        (format!("PScav{}", id), EntityKind::PlayerScav)
    } else {
        (format!("{}{}", side, id), EntityKind::Pmc)
    };

    let human_pmc = !is_ai && side.is_pmc();
    let group = if human_pmc {
        ctx.group_of(id).unwrap_or(GROUP_SOLO)
    } else {
        GROUP_SOLO
    };
    let teammate = human_pmc && (ctx.is_teammate(id) || group == GROUP_SQUAD);

    debug!("Allocated {} ({}) at {}", name, kind, base);
    Ok(Entity::from_parts(EntityParts {
        base,
        variant: EntityVariant::Observed {
            flavor: ObservedFlavor::Network,
            health_controller: Some(health_controller),
            voice,
        },
        name,
        kind,
        side: Some(side),
        id: Some(id),
        corpse_field: health_controller.offset(o.health_corpse),
        rotation_field,
        rotation,
        position: transform.read_position(reader).unwrap_or(Vec3::ZERO),
        transform: Some(transform),
        group,
        teammate,
        focused: ctx.is_focused(id),
    }))
}

/// Vehicle operator entity positioned through the vehicle view.
pub(crate) fn vehicle_operator(base: Address, view: Address, layout: &Layout) -> Entity {
    Entity::from_parts(EntityParts {
        base,
        variant: EntityVariant::VehicleOperator {
            view,
            position_field: view.offset(layout.vehicle.position),
        },
        name: "Vehicle".to_string(),
        kind: EntityKind::Vehicle,
        side: None,
        id: None,
        corpse_field: Address::NULL,
        rotation_field: Address::NULL,
        rotation: Vec2::default(),
        position: Vec3::ZERO,
        transform: None,
        group: GROUP_SOLO,
        teammate: false,
        focused: false,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixture::{ObservedSpec, WorldFixture};

    #[test]
    fn test_pmc_naming_and_group_restore() {
        let fixture = WorldFixture::new("bigmap");
        let base = fixture.add_observed(ObservedSpec::pmc(42, Vec3::new(1.0, 0.0, 1.0)).side(Side::Bear));
        let ctx = fixture.context();
        ctx.replace_groups([(42, 3)].into_iter().collect());

        let entity = allocate(&*fixture.image(), base, &fixture.layout(), &AiRoles::default(), &ctx).unwrap();
        assert_eq!(entity.name(), "Bear42");
        assert_eq!(entity.kind(), EntityKind::Pmc);
        assert_eq!(entity.group(), 3);
        assert_eq!(entity.position(), Vec3::new(1.0, 0.0, 1.0));
    }

    #[test]
    fn test_player_scav_and_ai_naming() {
        let fixture = WorldFixture::new("bigmap");
        let scav = fixture.add_observed(ObservedSpec::pmc(5, Vec3::ZERO).side(Side::Savage));
        let boss = fixture.add_observed(ObservedSpec::ai("BossKilla", Vec3::new(2.0, 0.0, 0.0)));
        let image = fixture.image();
        let layout = fixture.layout();
        let ctx = fixture.context();

        let scav = allocate(&*image, scav, &layout, &AiRoles::default(), &ctx).unwrap();
        assert_eq!(scav.name(), "PScav5");
        assert_eq!(scav.kind(), EntityKind::PlayerScav);

        let boss = allocate(&*image, boss, &layout, &AiRoles::default(), &ctx).unwrap();
        assert_eq!(boss.name(), "Boss");
        assert_eq!(boss.kind(), EntityKind::AiBoss);
        assert_eq!(boss.group(), GROUP_SOLO);
    }

    #[test]
    fn test_broken_back_pointer_fails_allocation() {
        let fixture = WorldFixture::new("bigmap");
        let base = fixture.add_observed(ObservedSpec::pmc(1, Vec3::ZERO));
        let image = fixture.image();
        let layout = fixture.layout();
        let controller = image.read_ptr(base.offset(layout.observed.controller)).unwrap();
        image.write_u64(controller.offset(layout.observed.controller_view), 0x7777_0000);

        let err = allocate(&*image, base, &layout, &AiRoles::default(), &fixture.context()).unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[test]
    fn test_unknown_class_fails_allocation() {
        let fixture = WorldFixture::new("bigmap");
        let container = fixture.add_container("5d6d2bb386f774785b07a77a", Vec3::ZERO);
        let err = allocate(
            &*fixture.image(),
            container,
            &fixture.layout(),
            &AiRoles::default(),
            &fixture.context(),
        )
        .unwrap_err();
        assert!(err.to_string().contains("unknown player class"));
    }

    #[test]
    fn test_local_player() {
        let fixture = WorldFixture::new("bigmap");
        let local = allocate_local(&*fixture.image(), fixture.local_player(), &fixture.layout()).unwrap();
        assert!(local.is_local());
        assert_eq!(local.group(), GROUP_SQUAD);
        assert_eq!(local.raid_id(), Some(fixture.raid_id()));
    }
}
