//! Large graph benchmark (9000 nodes) comparing repulsion techniques.
//!
//! Run with: cargo run --example large_graph --release

use std::time::Instant;

use quadlayout::{EngineConfig, NodeDefinition, Simulation, Technique};

fn main() {
    tracing_subscriber::fmt::init();

    let node_count = 9000u64;
    let iterations = 50;

    println!("=== Quad-tree Layout Benchmark ===");
    println!("Graph: {} nodes", node_count);
    println!();

    // Path plus pseudo-random chords, spread in a spiral.
    let definitions: Vec<NodeDefinition> = (0..node_count)
        .map(|i| {
            let angle = i as f32 * 0.1;
            let radius = 200.0 + i as f32 * 0.3;
            let mut neighbors = vec![(i * 31 + 7) % node_count];
            if i > 0 {
                neighbors.push(i - 1);
            }
            NodeDefinition::new(i)
                .at(
                    radius * angle.cos() + (i as f32 * 13.37).sin() * 100.0,
                    radius * angle.sin() + (i as f32 * 7.13).cos() * 100.0,
                )
                .with_neighbors(neighbors)
        })
        .collect();

    let config = EngineConfig::large();
    println!(
        "Workers: {}, tree depth: {}, theta: {}",
        config.worker_count, config.max_depth, config.forces.theta
    );
    println!();

    // BruteForce is O(n²); skip it at this size.
    for technique in [Technique::NoRepulse, Technique::Fuzzy, Technique::Quad] {
        let mut simulation = Simulation::new(config.clone()).expect("Failed to build simulation");
        simulation.load(&definitions, false);
        simulation.set_technique(technique);
        simulation.set_active(true);

        // Warm up
        for _ in 0..3 {
            simulation.step(Vec::new(), 0.016);
        }

        let start = Instant::now();
        let mut energy = 0.0;
        for _ in 0..iterations {
            energy = simulation.step(Vec::new(), 0.016).energy;
        }
        let elapsed = start.elapsed();
        let ms_per_step = elapsed.as_secs_f64() * 1000.0 / iterations as f64;

        println!(
            "  {:<11} {:8.2} ms/step   energy {:12.1}",
            technique.as_str(),
            ms_per_step,
            energy
        );
    }
}
