//! TOML configuration.
//!
//! Every table is optional; a missing file or table falls back to defaults.
//! The `[layout]` table has no usable default and must be supplied before a
//! session can start.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::entity::AiRoles;
use crate::error::{Error, Result};
use crate::grouping::{DEFAULT_GROUP_DISTANCE, GroupIdPolicy};
use crate::loot::LootFilter;
use crate::memory::Layout;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// JSON item catalog; no catalog means only quest items and containers
    /// are named.
    pub catalog: Option<PathBuf>,
    pub intervals: Intervals,
    pub features: Features,
    pub locator: LocatorConfig,
    pub session: SessionConfig,
    pub loot: LootConfig,
    pub roles: AiRoles,
    pub layout: Layout,
}

/// Worker sleep intervals in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Intervals {
    pub registration_ms: u64,
    pub realtime_ms: u64,
    pub validation_ms: u64,
    pub loot_ms: u64,
}

impl Default for Intervals {
    fn default() -> Self {
        Self {
            registration_ms: 100,
            realtime_ms: 8,
            validation_ms: 1000,
            loot_ms: 250,
        }
    }
}

impl Intervals {
    pub fn registration(&self) -> Duration {
        Duration::from_millis(self.registration_ms)
    }

    pub fn realtime(&self) -> Duration {
        Duration::from_millis(self.realtime_ms)
    }

    pub fn validation(&self) -> Duration {
        Duration::from_millis(self.validation_ms)
    }

    pub fn loot(&self) -> Duration {
        Duration::from_millis(self.loot_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Features {
    /// Cluster human players into groups before activity starts.
    pub auto_groups: bool,
    pub group_policy: GroupIdPolicy,
    pub group_distance: f32,
    /// Maps on which a vehicle operator may exist.
    pub vehicle_maps: Vec<String>,
    /// Value the gear of observed players on every slow poll.
    pub equipment: bool,
}

impl Default for Features {
    fn default() -> Self {
        Self {
            auto_groups: true,
            group_policy: GroupIdPolicy::default(),
            group_distance: DEFAULT_GROUP_DISTANCE,
            vehicle_maps: vec!["tarkovstreets".to_string(), "woods".to_string()],
            equipment: true,
        }
    }
}

impl Features {
    pub fn has_vehicle(&self, map_id: &str) -> bool {
        self.vehicle_maps.iter().any(|m| m.eq_ignore_ascii_case(map_id))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LocatorConfig {
    /// Object name of the world root's list node.
    pub target_name: String,
    /// Nodes visited per shallow pass.
    pub max_depth: usize,
    /// Stop the shallow strategy after this many passes.
    pub max_passes: Option<u32>,
    /// Pause between shallow passes.
    pub pass_interval_ms: u64,
    /// Pause between whole locate attempts in `locate_blocking`.
    pub retry_interval_ms: u64,
    /// Known map ids; a world whose id is not listed is rejected.
    pub maps: Vec<String>,
}

impl Default for LocatorConfig {
    fn default() -> Self {
        let maps = [
            "factory4_day",
            "factory4_night",
            "bigmap",
            "woods",
            "shoreline",
            "interchange",
            "rezervbase",
            "laboratory",
            "lighthouse",
            "tarkovstreets",
            "sandbox",
            "sandbox_high",
        ];
        Self {
            target_name: "GameWorld".to_string(),
            max_depth: 10_000,
            max_passes: None,
            pass_interval_ms: 10,
            retry_interval_ms: 1000,
            maps: maps.iter().map(|m| m.to_string()).collect(),
        }
    }
}

impl LocatorConfig {
    pub fn is_known_map(&self, map_id: &str) -> bool {
        self.maps.iter().any(|m| m == map_id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Attempts of the session-validity check before the session ends.
    pub valid_retries: u32,
    pub valid_delay_ms: u64,
    /// Substring every hands-controller class name carries.
    pub hands_marker: String,
    /// Hands-controller class of a player that has not started yet.
    pub idle_hands_class: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            valid_retries: 5,
            valid_delay_ms: 50,
            hands_marker: "Controller".to_string(),
            idle_hands_class: "ClientEmptyHandsController".to_string(),
        }
    }
}

impl SessionConfig {
    pub fn valid_delay(&self) -> Duration {
        Duration::from_millis(self.valid_delay_ms)
    }
}

/// Loot classification rules.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LootConfig {
    /// Class names containing this are corpses.
    pub corpse_class: String,
    pub container_class: String,
    pub item_class: String,
    /// Object name of a container that is an airdrop.
    pub airdrop_name: String,
    /// Objects whose name contains any marker are never indexed.
    pub skip_markers: Vec<String>,
    pub max_loot: usize,
    pub filter: LootFilter,
}

impl Default for LootConfig {
    fn default() -> Self {
        Self {
            corpse_class: "Corpse".to_string(),
            container_class: "LootableContainer".to_string(),
            item_class: "ObservedLootItem".to_string(),
            airdrop_name: "loot_collider".to_string(),
            skip_markers: vec!["script".to_string()],
            max_loot: 4096,
            filter: LootFilter::default(),
        }
    }
}

impl Config {
    /// Parse a TOML document.
    pub fn from_toml(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }

    /// Load from `path`, falling back to defaults when the file is missing.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!("Config file {} not found, using defaults", path.display());
                return Ok(Self::default());
            }
            Err(e) => return Err(e.into()),
        };
        let config = Self::from_toml(&content)?;
        info!("Loaded config from {}", path.display());
        debug!("Layout version: {:?}", config.layout.version);
        Ok(config)
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self).map_err(|e| Error::Config(e.to_string()))?;
        std::fs::write(path.as_ref(), content)?;
        Ok(())
    }

    /// Check everything a session depends on.
    pub fn validate(&self) -> Result<()> {
        self.layout.validate()?;
        let i = &self.intervals;
        if [i.registration_ms, i.realtime_ms, i.validation_ms, i.loot_ms].contains(&0) {
            return Err(Error::Config("intervals must be non-zero".to_string()));
        }
        if self.locator.target_name.is_empty() {
            return Err(Error::Config("locator.target_name is empty".to_string()));
        }
        if self.locator.max_depth == 0 {
            return Err(Error::Config("locator.max_depth must be non-zero".to_string()));
        }
        if !(self.features.group_distance.is_finite() && self.features.group_distance > 0.0) {
            return Err(Error::Config(format!(
                "features.group_distance {} is not a positive distance",
                self.features.group_distance
            )));
        }
        if self.session.valid_retries == 0 {
            return Err(Error::Config("session.valid_retries must be at least 1".to_string()));
        }
        Ok(())
    }
}
