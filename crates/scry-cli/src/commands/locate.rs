//! Locate command implementation.

use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use scry_core::{Engine, ShutdownSignal};
use tracing::info;

/// Run one locator race and print the world root.
pub fn run(config_path: &Path, image_path: &Path) -> Result<()> {
    let (config, catalog) = super::load_config(config_path)?;
    let image = super::load_image(image_path)?;

    let shutdown = Arc::new(ShutdownSignal::new());
    let shutdown_ctrlc = Arc::clone(&shutdown);
    ctrlc::set_handler(move || {
        info!("Received shutdown signal, stopping...");
        shutdown_ctrlc.trigger();
    })?;

    let engine = Engine::new(config, catalog);
    let root = engine.locate(&image, &shutdown)?;
    println!("World: {}", root.address);
    println!("Map:   {}", root.map_id);
    Ok(())
}
