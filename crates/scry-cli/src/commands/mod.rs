//! CLI command implementations.

pub mod check_config;
pub mod fixture;
pub mod locate;
pub mod run;
pub mod status;

use std::path::Path;

use anyhow::{Context, Result};
use scry_core::{Config, ItemCatalog, MemoryImage};
use tracing::{info, warn};

/// Load the configuration and the catalog it names.
///
/// A missing catalog is not fatal; loot then carries only what the image
/// itself names.
pub fn load_config(path: &Path) -> Result<(Config, ItemCatalog)> {
    let config = Config::load(path).with_context(|| format!("loading {}", path.display()))?;
    let catalog = match &config.catalog {
        Some(catalog_path) => match ItemCatalog::load(catalog_path) {
            Ok(catalog) => {
                info!("Loaded {} catalog items from {}", catalog.len(), catalog_path.display());
                catalog
            }
            Err(e) => {
                warn!("Failed to load catalog {}: {}", catalog_path.display(), e);
                ItemCatalog::default()
            }
        },
        None => ItemCatalog::default(),
    };
    Ok((config, catalog))
}

pub fn load_image(path: &Path) -> Result<MemoryImage> {
    MemoryImage::load(path).with_context(|| format!("loading image {}", path.display()))
}
