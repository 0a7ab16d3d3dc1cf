//! Simple example driving the threaded layout engine.
//!
//! Run with: cargo run --example simple_layout

use std::time::Instant;

use quadlayout::{EngineConfig, LayoutEngine, NodeDefinition, NodeId, Rect, Vec2};

fn main() {
    tracing_subscriber::fmt::init();

    let node_count = 500u64;
    println!("Creating path graph with {} nodes and shortcuts...", node_count);

    // Spiral start, each node linked to the previous one plus a few chords.
    let definitions: Vec<NodeDefinition> = (0..node_count)
        .map(|i| {
            let angle = i as f32 * 0.1;
            let radius = 50.0 + i as f32 * 0.5;
            let mut neighbors = Vec::new();
            if i > 0 {
                neighbors.push(i - 1);
            }
            if i % 25 == 0 {
                neighbors.push((i * 31 + 7) % node_count);
            }
            NodeDefinition::new(i)
                .at(radius * angle.cos(), radius * angle.sin())
                .with_neighbors(neighbors)
        })
        .collect();

    let config = EngineConfig {
        world_extent: 4000.0,
        ..Default::default()
    };
    let engine = LayoutEngine::new(config).expect("Failed to start layout engine");
    engine.load(&definitions, false);
    engine.activate_layout();

    let start = Instant::now();
    for round in 0..10 {
        engine.wait_for_steps(20);
        let stats = engine.stats();
        println!(
            "Step {:4}: energy = {:10.2}, time scale = {:.3}, state = {:?}",
            stats.step, stats.energy, stats.time_scale, stats.state
        );
        if round == 4 {
            // Drag a node and ask what sits under the cursor.
            engine.move_node(NodeId(0), 200.0, 0.0);
            engine.intersect_nodes(0.0, 0.0);
        }
    }
    engine.deactivate_layout();
    println!("\nRan for {:.2?}", start.elapsed());

    engine.set_viewport(Rect::new(Vec2::new(-200.0, -200.0), Vec2::new(200.0, 200.0)));
    engine.wait_for_steps(2);
    println!("Visible in the central viewport: {}", engine.visible_nodes().len());
    println!("Under the cursor: {:?}", engine.intersecting_nodes());

    println!("\nFinal positions (first 5 nodes):");
    for node in engine.save().iter().take(5) {
        if let Some(p) = node.position {
            println!("  Node {}: ({:.2}, {:.2})", node.id.0, p.x, p.y);
        }
    }
}
