//! CLI configuration management.
//!
//! The engine configuration is layered: built-in defaults, then an optional
//! JSON config file, then `QLAYOUT_*` environment variables (a `.env` file is
//! honoured), then command-line flags applied by the caller.

use std::path::Path;
use std::str::FromStr;

use anyhow::{Context, Result};
use quadlayout::EngineConfig;

/// Environment variables read by [`load`], with the field each one sets.
pub const ENV_VARS: &[(&str, &str)] = &[
    ("QLAYOUT_WORLD_EXTENT", "world_extent"),
    ("QLAYOUT_WORKERS", "worker_count"),
    ("QLAYOUT_MAX_DEPTH", "max_depth"),
    ("QLAYOUT_TICK_MS", "tick_interval_ms"),
    ("QLAYOUT_FIXED_DT", "fixed_dt"),
    ("QLAYOUT_THETA", "forces.theta"),
    ("QLAYOUT_REPULSION", "forces.repulsion"),
    ("QLAYOUT_ATTRACTION", "forces.attraction"),
];

/// Load the engine configuration from defaults, `file` and the environment.
pub fn load(file: Option<&Path>) -> Result<EngineConfig> {
    // Load .env file if present (silently ignore if missing)
    let _ = dotenvy::dotenv();

    let mut config = match file {
        Some(path) => read_file(path)?,
        None => EngineConfig::default(),
    };
    apply_env(&mut config, |key| std::env::var(key).ok())?;
    Ok(config)
}

fn read_file(path: &Path) -> Result<EngineConfig> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config from {}", path.display()))?;
    serde_json::from_str(&contents)
        .with_context(|| format!("Failed to parse config file {}", path.display()))
}

/// Override fields from environment variables resolved through `lookup`.
pub fn apply_env<F>(config: &mut EngineConfig, lookup: F) -> Result<()>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(v) = parse_var(&lookup, "QLAYOUT_WORLD_EXTENT")? {
        config.world_extent = v;
    }
    if let Some(v) = parse_var(&lookup, "QLAYOUT_WORKERS")? {
        config.worker_count = v;
    }
    if let Some(v) = parse_var(&lookup, "QLAYOUT_MAX_DEPTH")? {
        config.max_depth = v;
    }
    if let Some(v) = parse_var(&lookup, "QLAYOUT_TICK_MS")? {
        config.tick_interval_ms = v;
    }
    if let Some(v) = parse_var(&lookup, "QLAYOUT_FIXED_DT")? {
        config.fixed_dt = Some(v);
    }
    if let Some(v) = parse_var(&lookup, "QLAYOUT_THETA")? {
        config.forces.theta = v;
    }
    if let Some(v) = parse_var(&lookup, "QLAYOUT_REPULSION")? {
        config.forces.repulsion = v;
    }
    if let Some(v) = parse_var(&lookup, "QLAYOUT_ATTRACTION")? {
        config.forces.attraction = v;
    }
    Ok(())
}

fn parse_var<T, F>(lookup: &F, key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .with_context(|| format!("Invalid value for {key}: {raw:?}")),
    }
}
