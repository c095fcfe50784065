//! Status command implementation.

use std::path::Path;

use anyhow::Result;
use scry_core::StatusInfo;

pub fn run(config_path: &Path, image_path: &Path) -> Result<()> {
    let (config, _) = super::load_config(config_path)?;
    let image = super::load_image(image_path)?;

    let status = StatusInfo::collect(&image, &config);
    println!("{}", serde_json::to_string_pretty(&status)?);
    if let Some(error) = &status.error {
        anyhow::bail!("status check failed: {}", error);
    }
    Ok(())
}
