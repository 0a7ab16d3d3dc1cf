//! Run command implementation.
//!
//! Loads graph definitions, lets the threaded engine lay them out and writes
//! the resulting positions back.

use std::path::PathBuf;
use std::time::Instant;

use anyhow::{Context, Result};
use quadlayout::{
    read_definitions, write_definitions, EngineConfig, LayoutEngine, LayoutState, LayoutStats,
    Technique,
};
use tracing::info;

/// Steps waited between settle checks.
const CHECK_EVERY: u64 = 10;

#[derive(Debug, Clone)]
pub struct RunOptions {
    pub input: PathBuf,
    pub output: Option<PathBuf>,
    pub steps: u64,
    pub until_settled: bool,
    pub technique: Technique,
    pub force_random: bool,
    pub json: bool,
}

/// Lay out `options.input` and write the result.
pub fn execute(config: EngineConfig, options: &RunOptions) -> Result<LayoutStats> {
    let definitions = read_definitions(&options.input)
        .with_context(|| format!("Failed to read {}", options.input.display()))?;

    let engine = LayoutEngine::new(config).context("Failed to start layout engine")?;
    engine.set_technique(options.technique);
    engine.load(&definitions, options.force_random);
    engine.activate_layout();

    let start = Instant::now();
    let first = engine.stats().step;
    loop {
        let done = engine.stats().step - first;
        if done >= options.steps {
            break;
        }
        engine.wait_for_steps(CHECK_EVERY.min(options.steps - done));
        if options.until_settled && engine.stats().state == LayoutState::Settled {
            break;
        }
    }
    engine.deactivate_layout();
    // Let a step that started while active finish before saving.
    engine.wait_for_steps(1);

    let stats = engine.stats();
    let result = engine.save();
    info!(
        steps = stats.step - first,
        energy = stats.energy,
        elapsed_ms = start.elapsed().as_millis() as u64,
        "layout_run_complete"
    );

    let output = options.output.as_ref().unwrap_or(&options.input);
    write_definitions(output, &result)
        .with_context(|| format!("Failed to write {}", output.display()))?;

    if options.json {
        println!("{}", serde_json::to_string_pretty(&stats)?);
    } else {
        println!(
            "Laid out {} nodes in {} steps ({}), energy {:.3}, wrote {}",
            stats.body_count,
            stats.step - first,
            stats.technique,
            stats.energy,
            output.display()
        );
    }
    Ok(stats)
}
