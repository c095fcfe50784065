use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

use crate::memory::Address;

const ALIVE: u64 = 0;
const EXFILTRATED: u64 = 1;

/// Presence state of an entity.
///
/// A dead entity always carries its corpse address; the other two states
/// carry none.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum Lifecycle {
    Alive,
    Dead { corpse: Address },
    Exfiltrated,
}

impl Lifecycle {
    #[inline]
    pub fn is_alive(self) -> bool {
        matches!(self, Lifecycle::Alive)
    }

    /// Present in the remote list. Only living entities are.
    #[inline]
    pub fn is_active(self) -> bool {
        self.is_alive()
    }

    #[inline]
    pub fn corpse(self) -> Option<Address> {
        match self {
            Lifecycle::Dead { corpse } => Some(corpse),
            _ => None,
        }
    }

    fn encode(self) -> u64 {
        match self {
            Lifecycle::Alive => ALIVE,
            Lifecycle::Exfiltrated => EXFILTRATED,
            Lifecycle::Dead { corpse } => corpse.raw(),
        }
    }

    fn decode(raw: u64) -> Self {
        match raw {
            ALIVE => Lifecycle::Alive,
            EXFILTRATED => Lifecycle::Exfiltrated,
            corpse => Lifecycle::Dead {
                corpse: Address(corpse),
            },
        }
    }
}

/// Lock-free lifecycle storage: the whole state is one word, so readers
/// never observe a dead entity without its corpse.
#[derive(Debug)]
pub(crate) struct LifecycleCell(AtomicU64);

impl LifecycleCell {
    pub(crate) fn alive() -> Self {
        Self(AtomicU64::new(ALIVE))
    }

    pub(crate) fn load(&self) -> Lifecycle {
        Lifecycle::decode(self.0.load(Ordering::Acquire))
    }

    pub(crate) fn store(&self, state: Lifecycle) {
        self.0.store(state.encode(), Ordering::Release);
    }

    pub(crate) fn set_alive(&self) {
        self.store(Lifecycle::Alive);
    }

    /// Record death. A corpse that is not a valid address is treated as no
    /// corpse at all.
    pub(crate) fn set_dead(&self, corpse: Address) {
        if corpse.is_valid() {
            self.store(Lifecycle::Dead { corpse });
        } else {
            self.store(Lifecycle::Exfiltrated);
        }
    }

    pub(crate) fn set_exfiltrated(&self) {
        self.store(Lifecycle::Exfiltrated);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_transitions() {
        let cell = LifecycleCell::alive();
        assert_eq!(cell.load(), Lifecycle::Alive);

        cell.set_dead(Address(0x5_0000));
        assert_eq!(
            cell.load(),
            Lifecycle::Dead {
                corpse: Address(0x5_0000)
            }
        );

        cell.set_alive();
        assert!(cell.load().is_active());

        cell.set_exfiltrated();
        assert_eq!(cell.load(), Lifecycle::Exfiltrated);
        assert_eq!(cell.load().corpse(), None);
    }

    #[test]
    fn test_dead_with_null_corpse_is_exfiltrated() {
        let cell = LifecycleCell::alive();
        cell.set_dead(Address::NULL);
        assert_eq!(cell.load(), Lifecycle::Exfiltrated);
        cell.set_dead(Address(1));
        assert_eq!(cell.load(), Lifecycle::Exfiltrated);
    }

    proptest! {
        #[test]
        fn test_every_word_decodes_to_a_consistent_state(raw in any::<u64>()) {
            let state = Lifecycle::decode(raw);
            match state {
                Lifecycle::Dead { corpse } => prop_assert!(!corpse.is_null()),
                Lifecycle::Alive | Lifecycle::Exfiltrated => prop_assert!(state.corpse().is_none()),
            }
        }
    }
}
