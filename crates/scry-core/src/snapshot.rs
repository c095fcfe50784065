//! Read-only view published to consumers.
//!
//! Workers never hand out their live structures. After each slow poll the
//! session assembles a [`WorldSnapshot`] and swaps it into the
//! [`SnapshotCell`]; readers clone the `Arc` and see one consistent state.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::Serialize;

use crate::entity::EntityView;
use crate::loot::LootView;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// No world root is known.
    #[default]
    Idle,
    Active,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct WorldSnapshot {
    pub state: SessionState,
    /// Monotonic per cell; bumps on every publish.
    pub sequence: u64,
    pub map_id: Option<String>,
    pub raid_id: Option<String>,
    pub activity_started: bool,
    pub local: Option<EntityView>,
    pub entities: Vec<EntityView>,
    /// Loot after filtering and ordering.
    pub loot: Vec<LootView>,
    /// Player id → group id.
    pub groups: BTreeMap<i32, i32>,
}

impl WorldSnapshot {
    pub fn is_active(&self) -> bool {
        self.state == SessionState::Active
    }

    pub fn entity(&self, name: &str) -> Option<&EntityView> {
        self.entities.iter().find(|e| e.name == name)
    }
}

#[derive(Debug, Default)]
pub struct SnapshotCell {
    inner: RwLock<Arc<WorldSnapshot>>,
}

impl SnapshotCell {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn load(&self) -> Arc<WorldSnapshot> {
        Arc::clone(&self.inner.read())
    }

    /// Replace the published snapshot, stamping the next sequence number.
    pub fn publish(&self, mut snapshot: WorldSnapshot) {
        let mut guard = self.inner.write();
        snapshot.sequence = guard.sequence + 1;
        *guard = Arc::new(snapshot);
    }

    /// Publish an empty idle snapshot.
    pub fn set_idle(&self) {
        self.publish(WorldSnapshot::default());
    }
}
