//! World loot: discovery pipeline, catalog and published view.

mod catalog;
mod entity;
mod filter;
mod index;

pub use catalog::{CatalogContainer, CatalogItem, ItemCatalog};
pub use entity::{LootEntity, LootKind, LootView};
pub use filter::LootFilter;
pub(crate) use index::read_template_id;
pub use index::{LootIndex, LootRefreshStats};
