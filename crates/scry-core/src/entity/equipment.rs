//! Gear carried by network-observed players.
//!
//! Slot addresses are resolved once per entity (retried a few times if the
//! inventory is not wired up yet); the contents of each slot are re-read on
//! every slow poll.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};

use parking_lot::RwLock;
use serde::Serialize;
use tracing::{debug, warn};

use crate::error::Result;
use crate::loot::{ItemCatalog, read_template_id};
use crate::memory::unity::{NAME_MAX, read_pointer_array};
use crate::memory::{Address, Layout, ReadMemory, ReadMemoryExt};

/// Slots that never hold anything worth valuing.
pub const SKIPPED_SLOTS: [&str; 5] = ["Dogtag", "Compass", "ArmBand", "Eyewear", "Pockets"];
/// Melee slot, ignored for PMCs whose knife is never lootable.
const PMC_SKIPPED_SLOT: &str = "Scabbard";
/// Slot-resolution attempts before an entity's gear is given up on.
pub const MAX_SLOT_ATTEMPTS: u8 = 3;
const MAX_SLOTS: usize = 32;

/// Catalogued gear currently equipped, keyed by slot name.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Equipment {
    pub value: i64,
    pub important: bool,
    pub items: BTreeMap<String, String>,
}

#[derive(Debug, Default)]
pub(crate) struct EquipmentCell {
    slots: RwLock<Option<Arc<[(String, Address)]>>>,
    attempts: AtomicU8,
    current: RwLock<Equipment>,
}

impl EquipmentCell {
    pub fn load(&self) -> Equipment {
        self.current.read().clone()
    }

    pub fn is_important(&self) -> bool {
        self.current.read().important
    }

    /// Resolved slots, reading them if this has not succeeded yet.
    fn slots<R: ReadMemory + ?Sized>(
        &self,
        reader: &R,
        base: Address,
        layout: &Layout,
        is_pmc: bool,
    ) -> Option<Arc<[(String, Address)]>> {
        if let Some(slots) = self.slots.read().as_ref() {
            return Some(Arc::clone(slots));
        }
        let attempt = self.attempts.load(Ordering::Relaxed);
        if attempt >= MAX_SLOT_ATTEMPTS {
            return None;
        }
        self.attempts.store(attempt + 1, Ordering::Relaxed);
        match read_slots(reader, base, layout, is_pmc) {
            Ok(slots) => {
                let slots: Arc<[(String, Address)]> = slots.into();
                *self.slots.write() = Some(Arc::clone(&slots));
                Some(slots)
            }
            Err(e) => {
                warn!("Equipment slots of {} unreadable (attempt {}): {}", base, attempt + 1, e);
                None
            }
        }
    }

    /// Re-read every slot's item and replace the published gear.
    ///
    /// A slot whose item cannot be read, or is not catalogued, is left out.
    /// Returns `false` if the slots themselves are not available.
    pub fn refresh<R: ReadMemory + ?Sized>(
        &self,
        reader: &R,
        base: Address,
        layout: &Layout,
        catalog: &ItemCatalog,
        is_pmc: bool,
    ) -> bool {
        let Some(slots) = self.slots(reader, base, layout, is_pmc) else {
            return false;
        };
        let mut equipment = Equipment::default();
        for (slot, address) in slots.iter() {
            let item = match read_slot_item(reader, layout, *address) {
                Ok(Some(id)) => catalog.item(&id),
                Ok(None) => None,
                Err(e) => {
                    debug!("Slot {} of {}: {}", slot, base, e);
                    None
                }
            };
            if let Some(item) = item {
                equipment.value += item.value;
                equipment.important |= item.important;
                equipment.items.insert(slot.clone(), item.display_name().to_string());
            }
        }
        *self.current.write() = equipment;
        true
    }
}

fn read_slots<R: ReadMemory + ?Sized>(
    reader: &R,
    base: Address,
    layout: &Layout,
    is_pmc: bool,
) -> Result<Vec<(String, Address)>> {
    let e = &layout.equipment;
    let array = reader.read_ptr_chain(base, &e.slots_chain)?;
    let mut slots = Vec::new();
    for slot in read_pointer_array(reader, array, MAX_SLOTS)? {
        let name_ptr = reader.read_ptr(slot.offset(e.slot_id))?;
        let name = reader.read_unity_string(name_ptr, NAME_MAX * 2)?;
        let skipped = SKIPPED_SLOTS.iter().any(|s| s.eq_ignore_ascii_case(&name))
            || (is_pmc && name.eq_ignore_ascii_case(PMC_SKIPPED_SLOT));
        if !skipped {
            slots.push((name, slot));
        }
    }
    Ok(slots)
}

/// Template id of the item in a slot, `None` for an empty slot.
fn read_slot_item<R: ReadMemory + ?Sized>(reader: &R, layout: &Layout, slot: Address) -> Result<Option<String>> {
    let item = Address(reader.read_u64(slot.offset(layout.equipment.slot_item))?);
    if item.is_null() {
        return Ok(None);
    }
    Ok(Some(read_template_id(reader, layout, item)?.1))
}
