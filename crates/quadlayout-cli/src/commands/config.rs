//! Config command implementation.
//!
//! Shows the effective engine configuration.

use anyhow::Result;
use quadlayout::EngineConfig;

use crate::config::ENV_VARS;

/// Print the effective configuration, as a table or as JSON.
pub fn show(config: &EngineConfig, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(config)?);
        return Ok(());
    }

    println!("quadlayout Engine Configuration");
    println!("{:-<40}", "");
    println!("World Extent:        {}", config.world_extent);
    println!("Workers:             {}", config.worker_count);
    println!(
        "Tree Depth:          {} ({} x {} leaves of {:.2})",
        config.max_depth,
        config.edge_cell_count(),
        config.edge_cell_count(),
        config.leaf_cell_size()
    );
    println!("Tick Interval:       {} ms", config.tick_interval_ms);
    println!(
        "Fixed Step:          {}",
        config
            .fixed_dt
            .map(|dt| dt.to_string())
            .unwrap_or_else(|| "(wall clock)".to_string())
    );
    println!("Recompute Interval:  {} steps", config.recompute_interval);
    println!();
    let f = &config.forces;
    println!("Repulsion:           {}", f.repulsion);
    println!("Attraction:          {}", f.attraction);
    println!("Ideal Length:        {}", f.ideal_length);
    println!("Gravity:             {}", f.gravity);
    println!("Damping:             {}", f.damping);
    println!("Theta:               {}", f.theta);

    println!("\nEnvironment overrides:");
    for (var, field) in ENV_VARS {
        println!("  {var:<22} {field}");
    }
    Ok(())
}
