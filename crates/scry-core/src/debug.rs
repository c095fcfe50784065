//! Inspection helpers for checking a layout against a target.
//!
//! [`StatusInfo::collect`] walks the same path a session would, but stops at
//! the first failure and reports how far it got instead of retrying.

use std::sync::Arc;

use serde::Serialize;

use crate::config::Config;
use crate::entity::EntityView;
use crate::memory::unity::read_pointer_list;
use crate::memory::{Address, ReadMemory, ReadMemoryExt};
use crate::registry::EntityRegistry;
use crate::shutdown::ShutdownSignal;
use crate::world::WorldLocator;

#[derive(Debug, Clone, Default, Serialize)]
pub struct StatusInfo {
    pub layout_version: String,
    pub layout_valid: bool,
    pub world: Option<Address>,
    pub map_id: Option<String>,
    pub local: Option<EntityView>,
    pub registered_players: Option<usize>,
    pub loot_objects: Option<usize>,
    /// First failure, if any step failed.
    pub error: Option<String>,
}

impl StatusInfo {
    /// Run one bounded locator race and read the lists behind the result.
    pub fn collect<R: ReadMemory + ?Sized>(reader: &R, config: &Config) -> Self {
        let mut status = StatusInfo {
            layout_version: config.layout.version.clone(),
            layout_valid: config.layout.is_valid(),
            ..Default::default()
        };
        if let Err(e) = config.validate() {
            status.error = Some(e.to_string());
            return status;
        }

        let mut locator_config = config.locator.clone();
        locator_config.max_passes.get_or_insert(1);
        let shutdown = Arc::new(ShutdownSignal::new());
        let root = match WorldLocator::new(&config.layout, &locator_config).locate(reader, &shutdown) {
            Ok(root) => root,
            Err(e) => {
                status.error = Some(e.to_string());
                return status;
            }
        };
        status.world = Some(root.address);
        status.map_id = Some(root.map_id.clone());

        let layout = &config.layout;
        let registry = match EntityRegistry::new(reader, root.address, layout) {
            Ok(registry) => registry,
            Err(e) => {
                status.error = Some(e.to_string());
                return status;
            }
        };
        status.local = Some(registry.local().view());

        match registry.player_count(reader, layout) {
            Ok(count) => status.registered_players = Some(count),
            Err(e) => status.error = Some(e.to_string()),
        }

        let loot = reader
            .read_ptr(root.address.offset(layout.world.loot_list))
            .and_then(|list| read_pointer_list(reader, list, config.loot.max_loot));
        match loot {
            Ok(items) => status.loot_objects = Some(items.len()),
            Err(e) => {
                status.error.get_or_insert(e.to_string());
            }
        }
        status
    }

    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixture::{ObservedSpec, WorldFixture};
    use crate::math::Vec3;

    #[test]
    fn test_collect_reports_world_contents() {
        let fixture = WorldFixture::new("bigmap");
        fixture.add_observed(ObservedSpec::pmc(7, Vec3::new(40.0, 0.0, 2.0)));
        fixture.add_loot_item(WorldFixture::LEDX_ID, false, Vec3::new(1.0, 0.0, 1.0));

        let status = StatusInfo::collect(&*fixture.image(), &fixture.config());
        assert!(status.is_ok(), "{:?}", status.error);
        assert_eq!(status.world, Some(fixture.world()));
        assert_eq!(status.map_id.as_deref(), Some("bigmap"));
        assert_eq!(status.registered_players, Some(2));
        assert_eq!(status.loot_objects, Some(1));
        assert_eq!(status.local.unwrap().base, fixture.local_player());
    }

    #[test]
    fn test_collect_stops_at_missing_world() {
        let fixture = WorldFixture::new("bigmap");
        fixture.end_session();
        let status = StatusInfo::collect(&*fixture.image(), &fixture.config());
        assert!(status.layout_valid);
        assert!(status.world.is_none());
        assert!(!status.is_ok());
    }

    #[test]
    fn test_collect_rejects_empty_layout() {
        let status = StatusInfo::collect(&crate::memory::MemoryImage::new(), &Config::default());
        assert!(!status.layout_valid);
        assert!(status.error.is_some());
    }
}
