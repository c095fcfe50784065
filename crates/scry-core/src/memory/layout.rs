//! Offset table describing where fields live inside target objects.
//!
//! Offsets are build-specific and loaded at runtime (usually from the
//! `[layout]` table of the config file). The default table is all zeros and
//! fails [`Layout::validate`], so nothing is read until a real table is
//! supplied.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Layout {
    /// Free-form build identifier, logged at startup.
    pub version: String,
    pub world: WorldOffsets,
    pub object: ObjectOffsets,
    pub transform: TransformOffsets,
    pub player: PlayerOffsets,
    pub observed: ObservedOffsets,
    pub vehicle: VehicleOffsets,
    pub loot: LootOffsets,
    pub item: ItemOffsets,
    pub equipment: EquipmentOffsets,
}

/// Object manager and world root.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorldOffsets {
    /// Absolute address of the pointer to the object manager.
    pub object_manager: u64,
    /// Object manager: first node of the active list.
    pub active_nodes: u64,
    /// Object manager: last node of the active list.
    pub last_active_node: u64,
    /// Pointer chain from a list node's object to the world root.
    pub root_chain: Vec<u64>,
    pub location_id: u64,
    pub main_player: u64,
    pub registered_players: u64,
    pub loot_list: u64,
    pub vehicle_controller: u64,
}

/// Generic game-object / component / class-name plumbing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ObjectOffsets {
    /// Game object: pointer to its name string.
    pub game_object_name: u64,
    /// Game object: pointer to its component list.
    pub game_object_components: u64,
    /// Object base: pointer to the owning behaviour component.
    pub mono_behaviour: u64,
    /// Component: pointer to the scripting object.
    pub component_object_class: u64,
    /// Component: pointer to the owning game object.
    pub component_game_object: u64,
    /// Two-hop chain from an object to its class-name string.
    pub class_name_chain: Vec<u64>,
}

/// Native transform access.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransformOffsets {
    pub hierarchy: u64,
    pub index: u64,
    pub vertices: u64,
    pub indices: u64,
}

/// Client-side player objects (the local player and offline AI).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlayerOffsets {
    pub movement_context: u64,
    /// Movement context: back-pointer to the player.
    pub movement_player: u64,
    /// Movement context: view angles.
    pub rotation: u64,
    pub corpse: u64,
    /// Player: location id string, used when the world has none.
    pub location: u64,
    pub raid_id: u64,
    pub profile: u64,
    /// Profile: player info.
    pub info: u64,
    /// Player info: side.
    pub side: u64,
    pub hands_controller: u64,
    pub transform_chain: Vec<u64>,
}

/// Network-observed player views.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ObservedOffsets {
    pub controller: u64,
    /// Controller: back-pointer to the view.
    pub controller_view: u64,
    pub health_controller: u64,
    /// Health controller: back-pointer to the view.
    pub health_player: u64,
    pub health_corpse: u64,
    pub health_status: u64,
    /// Chain from the controller to the movement state context.
    pub movement_chain: Vec<u64>,
    pub rotation: u64,
    pub voice: u64,
    pub id: u64,
    pub side: u64,
    pub is_ai: u64,
    pub transform_chain: Vec<u64>,
}

/// Vehicle operator discovery.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VehicleOffsets {
    /// Chain from the vehicle controller to the vehicle view.
    pub view_chain: Vec<u64>,
    /// Chain from the vehicle view to the operator's player view.
    pub operator_chain: Vec<u64>,
    /// Vehicle view: last known position vector.
    pub position: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LootOffsets {
    /// Loose item: pointer to the inventory item.
    pub item: u64,
    /// Container: pointer to the item owner.
    pub container_owner: u64,
    /// Item owner: pointer to the root item.
    pub owner_root_item: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ItemOffsets {
    pub template: u64,
    /// Template: pointer to the id string.
    pub template_id: u64,
    pub short_name: u64,
    pub quest_flag: u64,
}

/// Gear slots of network-observed players.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EquipmentOffsets {
    /// Chain from the player view to the managed array of slots.
    pub slots_chain: Vec<u64>,
    /// Slot: pointer to the slot name string.
    pub slot_id: u64,
    /// Slot: pointer to the contained item, null when empty.
    pub slot_item: u64,
}

impl Layout {
    pub fn is_valid(&self) -> bool {
        self.validate().is_ok()
    }

    /// Reject a table whose load-bearing offsets are still unset.
    pub fn validate(&self) -> Result<()> {
        let required = [
            ("world.object_manager", self.world.object_manager),
            ("world.main_player", self.world.main_player),
            ("world.registered_players", self.world.registered_players),
            ("world.loot_list", self.world.loot_list),
            ("object.game_object_name", self.object.game_object_name),
            ("object.mono_behaviour", self.object.mono_behaviour),
            ("transform.hierarchy", self.transform.hierarchy),
            ("transform.vertices", self.transform.vertices),
            ("transform.indices", self.transform.indices),
            ("player.corpse", self.player.corpse),
            ("player.movement_context", self.player.movement_context),
            ("observed.controller", self.observed.controller),
            ("observed.health_controller", self.observed.health_controller),
        ];
        if let Some((name, _)) = required.iter().find(|(_, value)| *value == 0) {
            return Err(Error::InvalidLayout(format!("{} is not set", name)));
        }

        let chains = [
            ("world.root_chain", &self.world.root_chain),
            ("object.class_name_chain", &self.object.class_name_chain),
            ("player.transform_chain", &self.player.transform_chain),
            ("observed.transform_chain", &self.observed.transform_chain),
            ("observed.movement_chain", &self.observed.movement_chain),
        ];
        if let Some((name, _)) = chains.iter().find(|(_, chain)| chain.is_empty()) {
            return Err(Error::InvalidLayout(format!("{} is empty", name)));
        }
        if self.object.class_name_chain.len() != 2 {
            return Err(Error::InvalidLayout(format!(
                "object.class_name_chain must have 2 hops, got {}",
                self.object.class_name_chain.len()
            )));
        }
        Ok(())
    }

    /// Whether vehicle operators can be discovered with this table.
    pub fn has_vehicle(&self) -> bool {
        self.world.vehicle_controller != 0
            && !self.vehicle.view_chain.is_empty()
            && !self.vehicle.operator_chain.is_empty()
    }

    /// Whether observed players' gear can be read with this table.
    pub fn has_equipment(&self) -> bool {
        !self.equipment.slots_chain.is_empty() && self.equipment.slot_item != 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixture::fixture_layout;

    #[test]
    fn test_default_layout_is_invalid() {
        let layout = Layout::default();
        assert!(!layout.is_valid());
        assert!(matches!(layout.validate(), Err(Error::InvalidLayout(_))));
    }

    #[test]
    fn test_fixture_layout_is_valid() {
        let layout = fixture_layout();
        layout.validate().unwrap();
        assert!(layout.has_vehicle());
        assert!(layout.has_equipment());
        assert!(!Layout::default().has_equipment());
    }

    #[test]
    fn test_class_name_chain_must_have_two_hops() {
        let mut layout = fixture_layout();
        layout.object.class_name_chain.push(0x10);
        let err = layout.validate().unwrap_err();
        assert!(err.to_string().contains("class_name_chain"));
    }

    #[test]
    fn test_toml_roundtrip_keeps_chains() {
        let layout = fixture_layout();
        let text = toml::to_string(&layout).unwrap();
        let parsed: Layout = toml::from_str(&text).unwrap();
        assert_eq!(parsed, layout);
    }

    #[test]
    fn test_partial_toml_defaults_missing_tables() {
        let parsed: Layout = toml::from_str(
            r#"
            version = "test"
            [world]
            main_player = 0x40
            "#,
        )
        .unwrap();
        assert_eq!(parsed.world.main_player, 0x40);
        assert_eq!(parsed.transform, TransformOffsets::default());
    }
}
