//! Fixture command implementation.

use std::path::Path;

use anyhow::{Context, Result};
use scry_core::Vec3;
use scry_core::fixture::{ObservedSpec, WorldFixture};

/// Build a synthetic world and write it into `output`.
pub fn run(output: &Path, map: &str, players: u32) -> Result<()> {
    std::fs::create_dir_all(output).with_context(|| format!("creating {}", output.display()))?;

    let fixture = WorldFixture::new(map);
    for i in 0..players {
        // pairs standing together, pairs far apart from each other
        let offset = (i / 2) as f32 * 60.0 + (i % 2) as f32 * 3.0;
        let position = Vec3::new(20.0 + offset, 0.0, 10.0);
        let player = fixture.add_observed(ObservedSpec::pmc(i as i32 + 1, position));
        fixture.equip(player, "Headwear", WorldFixture::HELMET_ID);
        if i == 0 {
            fixture.equip(player, "Backpack", WorldFixture::LEDX_ID);
        }
    }
    fixture.add_observed(ObservedSpec::ai("scav", Vec3::new(-40.0, 0.0, -40.0)));
    fixture.add_loot_item(WorldFixture::LEDX_ID, false, Vec3::new(5.0, 0.0, 5.0));
    fixture.add_container(WorldFixture::DUFFLE_ID, Vec3::new(8.0, 0.0, 2.0));
    fixture.add_airdrop(Vec3::new(100.0, 0.0, 100.0));

    let paths = fixture.save(output)?;
    println!("Image:   {}", paths.image.display());
    println!("Config:  {}", paths.config.display());
    println!("Catalog: {}", paths.catalog.display());
    println!();
    println!(
        "Try: scry --config {} run --image {}",
        paths.config.display(),
        paths.image.display()
    );
    Ok(())
}
