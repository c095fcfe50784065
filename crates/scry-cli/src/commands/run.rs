//! Main engine mode.

use std::path::Path;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::Result;
use scry_core::{Engine, ShutdownSignal, WorldSnapshot};
use tracing::{error, info};

/// Run the engine against an image until Ctrl+C.
pub fn run(config_path: &Path, image_path: &Path, json: bool, every: u64) -> Result<()> {
    // Setup graceful shutdown handler
    let shutdown = Arc::new(ShutdownSignal::new());
    let shutdown_ctrlc = Arc::clone(&shutdown);
    ctrlc::set_handler(move || {
        info!("Received shutdown signal, stopping...");
        shutdown_ctrlc.trigger();
    })?;

    info!("scry {}", env!("CARGO_PKG_VERSION"));
    let (config, catalog) = super::load_config(config_path)?;
    let image = super::load_image(image_path)?;
    let engine = Engine::new(config, catalog);
    let cell = engine.snapshot_cell();
    let interval = Duration::from_secs(every.max(1));

    println!("Waiting for a world... (Press Ctrl+C to quit)");
    thread::scope(|s| -> Result<()> {
        let printer = thread::Builder::new()
            .name("scry-printer".to_string())
            .spawn_scoped(s, || {
                let mut last = 0;
                while !shutdown.wait(interval) {
                    let snapshot = cell.load();
                    if snapshot.sequence == last {
                        continue;
                    }
                    last = snapshot.sequence;
                    if json {
                        match serde_json::to_string(&*snapshot) {
                            Ok(line) => println!("{}", line),
                            Err(e) => error!("Failed to serialize snapshot: {}", e),
                        }
                    } else {
                        print_summary(&snapshot);
                    }
                }
            })?;

        let result = engine.run(&image, &shutdown);
        shutdown.trigger();
        let _ = printer.join();
        result?;
        Ok(())
    })?;

    info!("Stopped");
    Ok(())
}

fn print_summary(snapshot: &WorldSnapshot) {
    if !snapshot.is_active() {
        println!("[{}] idle", snapshot.sequence);
        return;
    }
    println!(
        "[{}] {} raid={} started={} players={} loot={}",
        snapshot.sequence,
        snapshot.map_id.as_deref().unwrap_or("?"),
        snapshot.raid_id.as_deref().unwrap_or("?"),
        snapshot.activity_started,
        snapshot.entities.len(),
        snapshot.loot.len()
    );
    for entity in &snapshot.entities {
        let distance = snapshot
            .local
            .as_ref()
            .map(|local| local.position.distance(entity.position))
            .unwrap_or(0.0);
        let important = if entity.equipment.important { "!" } else { "" };
        println!(
            "  {:<12} {:<10} group={:<5} {:>7.1}m value={}{} {:?}",
            entity.name,
            entity.kind.to_string(),
            entity.group,
            distance,
            entity.equipment.value,
            important,
            entity.lifecycle
        );
    }
    for loot in snapshot.loot.iter().take(10) {
        let important = if loot.carrying_important { " !" } else { "" };
        println!("  * {}{} @ {}", loot.label, important, loot.base);
    }
}
