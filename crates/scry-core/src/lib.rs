//! # scry-core
//!
//! Reconstructs a typed, consistent view of a running process's object graph
//! from outside the process, through batched reads of its address space.
//!
//! This crate provides:
//! - Batched scatter reads with multi-round continuations
//! - A racing locator for the world root object
//! - Player entities with lifecycle tracking and self-healing transforms
//! - Gear valuation of observed players
//! - A multi-round loot discovery pipeline
//! - Proximity grouping of players
//! - A polling session and an engine that re-bootstraps it
//!
//! The crate never writes to the target. Offsets come from a runtime
//! [`Layout`] loaded with the [`Config`].
//!
//! ## Feature Flags
//!
//! - `debug-tools`: Enables [`debug::StatusInfo`] for checking a layout
//!   against a target. Intended for the CLI and development.

pub mod config;
pub mod context;
#[cfg(feature = "debug-tools")]
pub mod debug;
pub mod engine;
pub mod entity;
pub mod error;
pub mod fixture;
pub mod grouping;
pub mod loot;
pub mod math;
pub mod memory;
pub mod registry;
pub mod retry;
pub mod session;
pub mod shutdown;
pub mod snapshot;
pub mod world;

pub use config::{Config, Features, Intervals, LocatorConfig, LootConfig, SessionConfig};
pub use context::{GroupCache, GroupMap, SessionContext};
pub use engine::Engine;
pub use entity::{
    AiRoles, Entity, EntityKind, EntityView, Equipment, GROUP_SOLO, GROUP_SQUAD, HealthStatus,
    Lifecycle, Side,
};
pub use error::{Error, ReadError, Result};
pub use grouping::{GroupAssignment, GroupIdPolicy, GroupNode, cluster, refresh_groups};
pub use loot::{ItemCatalog, LootEntity, LootFilter, LootIndex, LootKind, LootView};
pub use math::{Vec2, Vec3};
pub use memory::{Address, Layout, MemoryImage, ReadMemory, ReadMemoryExt, ScatterMap, ScatterRound};
pub use registry::EntityRegistry;
pub use retry::{FixedDelay, RetryStrategy};
pub use session::Session;
pub use shutdown::ShutdownSignal;
pub use snapshot::{SessionState, SnapshotCell, WorldSnapshot};
pub use world::{WorldLocator, WorldRoot};

// Debug utilities (requires debug-tools feature)
#[cfg(feature = "debug-tools")]
pub use debug::StatusInfo;
