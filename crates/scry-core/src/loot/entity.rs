use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

use crate::math::Vec3;
use crate::memory::Address;

/// What a loot object turned out to be.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LootKind {
    Item {
        id: String,
        name: String,
        value: i64,
        important: bool,
        quest: bool,
    },
    Container {
        id: String,
        name: String,
    },
    /// `corpse` is the interactive object a dead entity's corpse field
    /// points at.
    Corpse {
        corpse: Address,
    },
    Airdrop,
}

/// One classified loot object. Never mutated after classification except
/// for the corpse owner, which is re-resolved every poll.
#[derive(Debug)]
pub struct LootEntity {
    base: Address,
    kind: LootKind,
    position: Vec3,
    owner: AtomicU64,
}

impl LootEntity {
    pub fn new(base: Address, kind: LootKind, position: Vec3) -> Self {
        Self {
            base,
            kind,
            position,
            owner: AtomicU64::new(0),
        }
    }

    pub fn base(&self) -> Address {
        self.base
    }

    pub fn kind(&self) -> &LootKind {
        &self.kind
    }

    pub fn position(&self) -> Vec3 {
        self.position
    }

    pub fn name(&self) -> &str {
        match &self.kind {
            LootKind::Item { name, .. } | LootKind::Container { name, .. } => name,
            LootKind::Corpse { .. } => "Corpse",
            LootKind::Airdrop => "Airdrop",
        }
    }

    pub fn value(&self) -> i64 {
        match self.kind {
            LootKind::Item { value, .. } => value,
            _ => 0,
        }
    }

    pub fn is_important(&self) -> bool {
        matches!(self.kind, LootKind::Item { important: true, .. })
    }

    pub fn is_quest(&self) -> bool {
        matches!(self.kind, LootKind::Item { quest: true, .. })
    }

    pub fn item_id(&self) -> Option<&str> {
        match &self.kind {
            LootKind::Item { id, .. } | LootKind::Container { id, .. } => Some(id),
            _ => None,
        }
    }

    /// Base address of the dead entity this corpse belongs to.
    pub fn owner(&self) -> Option<Address> {
        let raw = self.owner.load(Ordering::Acquire);
        (raw != 0).then_some(Address(raw))
    }

    pub(crate) fn set_owner(&self, owner: Option<Address>) {
        self.owner
            .store(owner.map(Address::raw).unwrap_or(0), Ordering::Release);
    }

    pub fn view(&self) -> LootView {
        LootView {
            base: self.base,
            label: self.name().to_string(),
            kind: self.kind.clone(),
            position: self.position,
            owner: self.owner(),
            carrying_important: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LootView {
    pub base: Address,
    pub label: String,
    #[serde(flatten)]
    pub kind: LootKind,
    pub position: Vec3,
    pub owner: Option<Address>,
    /// Corpses only: the owner's last known gear included an important item.
    pub carrying_important: bool,
}
