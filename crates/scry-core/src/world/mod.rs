//! Discovery of the world root.

mod locator;

use serde::Serialize;

use crate::memory::Address;

pub use locator::{Strategy, WorldLocator};

/// Root object of one activity session and the map it runs on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WorldRoot {
    pub address: Address,
    pub map_id: String,
}

impl std::fmt::Display for WorldRoot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} @ {}", self.map_id, self.address)
    }
}
