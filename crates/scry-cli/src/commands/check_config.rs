//! Check-config command implementation.

use std::path::Path;

use anyhow::Result;

/// Load and validate the configuration, printing what a session would use.
pub fn run(config_path: &Path) -> Result<()> {
    let (config, catalog) = super::load_config(config_path)?;

    println!("Config: {}", config_path.display());
    println!("  Layout version: {}", config.layout.version);
    println!(
        "  Intervals: registration {}ms, realtime {}ms, validation {}ms, loot {}ms",
        config.intervals.registration_ms,
        config.intervals.realtime_ms,
        config.intervals.validation_ms,
        config.intervals.loot_ms
    );
    println!(
        "  Groups: {} ({:?}, {}m)",
        if config.features.auto_groups { "auto" } else { "off" },
        config.features.group_policy,
        config.features.group_distance
    );
    println!("  Known maps: {}", config.locator.maps.join(", "));
    println!("  Catalog items: {}", catalog.len());

    config.validate()?;
    println!("OK");
    Ok(())
}
