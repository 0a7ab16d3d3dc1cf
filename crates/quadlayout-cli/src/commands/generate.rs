//! Generate command implementation.
//!
//! Produces synthetic graph definitions for trying out layouts.

use std::path::Path;

use anyhow::{Context, Result};
use clap::ValueEnum;
use quadlayout::{write_definitions, NodeDefinition};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Graph families the generator knows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Shape {
    /// Cycle laid out on a circle.
    Ring,
    /// Square lattice with 4-neighborhood edges.
    Grid,
    /// Unpositioned nodes with random edges.
    Random,
}

/// Cycle of `count` nodes on a circle of `radius`.
pub fn ring(count: u64, radius: f32) -> Vec<NodeDefinition> {
    (0..count)
        .map(|i| {
            let angle = i as f32 / count as f32 * std::f32::consts::TAU;
            let mut neighbors = Vec::new();
            if count > 1 {
                neighbors.push((i + 1) % count);
            }
            NodeDefinition::new(i)
                .at(radius * angle.cos(), radius * angle.sin())
                .with_neighbors(neighbors)
        })
        .collect()
}

/// Roughly square lattice holding `count` nodes, `spacing` apart and centered
/// on the origin.
pub fn grid(count: u64, spacing: f32) -> Vec<NodeDefinition> {
    let side = (count as f64).sqrt().ceil().max(1.0) as u64;
    let offset = (side - 1) as f32 * spacing / 2.0;
    (0..count)
        .map(|i| {
            let (col, row) = (i % side, i / side);
            let mut neighbors = Vec::new();
            if col > 0 {
                neighbors.push(i - 1);
            }
            if row > 0 {
                neighbors.push(i - side);
            }
            NodeDefinition::new(i)
                .at(
                    col as f32 * spacing - offset,
                    row as f32 * spacing - offset,
                )
                .with_neighbors(neighbors)
        })
        .collect()
}

/// `count` unpositioned nodes, each linked to up to `degree` earlier nodes.
pub fn random(count: u64, degree: usize, rng: &mut impl Rng) -> Vec<NodeDefinition> {
    (0..count)
        .map(|i| {
            let neighbors: Vec<u64> = if i == 0 {
                Vec::new()
            } else {
                (0..degree).map(|_| rng.random_range(0..i)).collect()
            };
            NodeDefinition::new(i).with_neighbors(neighbors)
        })
        .collect()
}

/// Build the requested graph and write it to `output` (or stdout).
pub fn execute(
    shape: Shape,
    nodes: u64,
    spacing: f32,
    degree: usize,
    seed: Option<u64>,
    output: Option<&Path>,
) -> Result<()> {
    let definitions = match shape {
        Shape::Ring => {
            // Circumference of roughly `spacing` per node.
            let radius = spacing * nodes.max(1) as f32 / std::f32::consts::TAU;
            ring(nodes, radius)
        }
        Shape::Grid => grid(nodes, spacing),
        Shape::Random => {
            let mut rng = match seed {
                Some(seed) => StdRng::seed_from_u64(seed),
                None => StdRng::from_os_rng(),
            };
            random(nodes, degree, &mut rng)
        }
    };
    tracing::info!(?shape, nodes = definitions.len(), "graph_generated");

    match output {
        Some(path) => {
            write_definitions(path, &definitions)
                .with_context(|| format!("Failed to write {}", path.display()))?;
            println!("Wrote {} nodes to {}", definitions.len(), path.display());
        }
        None => println!("{}", serde_json::to_string_pretty(&definitions)?),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use quadlayout::NodeId;

    #[test]
    fn test_ring_links_each_node_to_the_next() {
        let defs = ring(5, 100.0);
        assert_eq!(defs.len(), 5);
        assert_eq!(defs[4].neighbors, vec![NodeId(0)]);
        for def in &defs {
            let p = def.position.unwrap();
            assert!((p.length() - 100.0).abs() < 1e-3);
        }
        assert!(ring(1, 10.0)[0].neighbors.is_empty());
    }

    #[test]
    fn test_grid_is_centered_lattice() {
        let defs = grid(9, 10.0);
        assert_eq!(defs[0].position.unwrap().x, -10.0);
        assert_eq!(defs[8].position.unwrap().y, 10.0);
        // Center node links left and up.
        assert_eq!(defs[4].neighbors, vec![NodeId(3), NodeId(1)]);
    }

    #[test]
    fn test_random_is_seeded_and_unpositioned() {
        let a = random(50, 2, &mut StdRng::seed_from_u64(7));
        let b = random(50, 2, &mut StdRng::seed_from_u64(7));
        assert_eq!(a, b);
        assert!(a.iter().all(|d| d.position.is_none()));
        assert!(a[10].neighbors.iter().all(|n| n.0 < 10));
    }
}
