//! End-to-end tests for the threaded engine.

use std::sync::Arc;
use std::thread;

use quadlayout::{
    EngineConfig, LayoutEngine, LayoutError, LayoutState, NodeDefinition, NodeId, Rect,
    Technique, Vec2,
};

fn config() -> EngineConfig {
    EngineConfig {
        world_extent: 1000.0,
        worker_count: 2,
        max_depth: 4,
        tick_interval_ms: 1,
        fixed_dt: Some(0.016),
        ..Default::default()
    }
}

fn engine() -> LayoutEngine {
    LayoutEngine::new(config()).unwrap()
}

fn square(side: f32) -> Vec<NodeDefinition> {
    vec![
        NodeDefinition::new(1).at(0.0, 0.0).with_neighbors([2, 4]),
        NodeDefinition::new(2).at(side, 0.0).with_neighbors([1, 3]),
        NodeDefinition::new(3).at(side, side).with_neighbors([2, 4]),
        NodeDefinition::new(4).at(0.0, side).with_neighbors([3, 1]),
    ]
}

fn position_of(engine: &LayoutEngine, id: u64) -> Option<Vec2> {
    engine
        .save()
        .into_iter()
        .find(|d| d.id == NodeId(id))
        .and_then(|d| d.position)
}

#[test]
fn rejects_bad_construction() {
    let zero_extent = EngineConfig {
        world_extent: 0.0,
        ..config()
    };
    assert!(matches!(
        LayoutEngine::new(zero_extent),
        Err(LayoutError::InvalidExtent(_))
    ));

    let no_workers = EngineConfig {
        worker_count: 0,
        ..config()
    };
    assert!(matches!(
        LayoutEngine::new(no_workers),
        Err(LayoutError::InvalidWorkerCount(0))
    ));
}

#[test]
fn save_after_load_round_trips() {
    let engine = engine();
    let defs = square(40.0);
    engine.load(&defs, false);
    assert_eq!(engine.save(), defs);
    assert_eq!(engine.stats().state, LayoutState::Paused);
    assert_eq!(engine.visible_nodes().len(), 4);
}

#[test]
fn mutations_apply_asynchronously() {
    let engine = engine();
    engine.add_node(NodeId(1), 10.0, 10.0, 5.0);
    engine.add_node(NodeId(2), -200.0, 300.0, 5.0);
    engine.add_node(NodeId(1), 99.0, 99.0, 5.0);
    engine.move_node(NodeId(2), 50.0, -50.0);
    engine.delete_node(NodeId(77));
    engine.wait_for_steps(2);

    assert_eq!(engine.save().len(), 2);
    assert_eq!(position_of(&engine, 1), Some(Vec2::new(10.0, 10.0)));
    assert_eq!(position_of(&engine, 2), Some(Vec2::new(-150.0, 250.0)));

    engine.connect_nodes(NodeId(1), NodeId(2));
    engine.wait_for_steps(2);
    let saved = engine.save();
    assert_eq!(saved[0].neighbors, vec![NodeId(2)]);

    engine.disconnect_nodes(NodeId(1), NodeId(2));
    engine.delete_node(NodeId(1));
    engine.wait_for_steps(2);
    let saved = engine.save();
    assert_eq!(saved.len(), 1);
    assert!(saved[0].neighbors.is_empty());
    engine.check_invariants().unwrap();
}

#[test]
fn point_query_is_published() {
    let engine = engine();
    engine.load(
        &[
            NodeDefinition::new(1).at(0.0, 0.0).with_hit_radius(5.0),
            NodeDefinition::new(2).at(100.0, 100.0).with_hit_radius(5.0),
        ],
        false,
    );

    engine.intersect_nodes(2.0, 2.0);
    engine.wait_for_steps(2);
    let hits = engine.intersecting_nodes();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].id, NodeId(1));

    engine.intersect_nodes(50.0, 50.0);
    engine.wait_for_steps(2);
    assert!(engine.intersecting_nodes().is_empty());
}

#[test]
fn load_and_reset_clear_previous_query_answers() {
    let engine = engine();
    let graph = [NodeDefinition::new(1).at(0.0, 0.0).with_hit_radius(5.0)];
    engine.load(&graph, false);
    engine.intersect_nodes(1.0, 1.0);
    engine.wait_for_steps(2);
    assert_eq!(engine.intersecting_nodes().len(), 1);

    engine.load(&square(10.0), false);
    assert!(engine.intersecting_nodes().is_empty());

    engine.load(&graph, false);
    engine.intersect_nodes(1.0, 1.0);
    engine.wait_for_steps(2);
    assert_eq!(engine.intersecting_nodes().len(), 1);

    engine.reset();
    engine.wait_for_steps(2);
    assert!(engine.intersecting_nodes().is_empty());
}

#[test]
fn active_layout_moves_bodies() {
    let engine = engine();
    engine.load(&square(1.0), false);
    engine.activate_layout();
    assert!(engine.is_active());
    engine.wait_for_steps(10);

    let stats = engine.stats();
    assert!(stats.step >= 10);
    assert!(matches!(
        stats.state,
        LayoutState::Running | LayoutState::Settled
    ));
    assert_ne!(position_of(&engine, 1), Some(Vec2::ZERO));
    engine.check_invariants().unwrap();
}

#[test]
fn deactivation_keeps_positions_modulo_mutations() {
    let engine = engine();
    engine.load(&square(60.0), false);
    engine.activate_layout();
    engine.wait_for_steps(10);

    engine.deactivate_layout();
    // The step in flight may still have been active.
    engine.wait_for_steps(2);
    let before = engine.save();

    engine.move_node(NodeId(1), 10.0, 0.0);
    engine.add_node(NodeId(9), 5.0, 5.0, 2.0);
    engine.delete_node(NodeId(3));
    engine.wait_for_steps(5);
    let after = engine.save();
    engine.activate_layout();

    for def in &before {
        let now = after.iter().find(|d| d.id == def.id).map(|d| d.position);
        match def.id.0 {
            1 => {
                let p = def.position.unwrap() + Vec2::new(10.0, 0.0);
                assert_eq!(now, Some(Some(p)));
            }
            3 => assert_eq!(now, None),
            _ => assert_eq!(now, Some(def.position)),
        }
    }
    let added = after.iter().find(|d| d.id == NodeId(9)).and_then(|d| d.position);
    assert_eq!(added, Some(Vec2::new(5.0, 5.0)));
}

#[test]
fn viewport_limits_visible_nodes() {
    let engine = engine();
    engine.load(
        &[
            NodeDefinition::new(1).at(-400.0, -400.0),
            NodeDefinition::new(2).at(400.0, 400.0),
        ],
        false,
    );
    assert_eq!(engine.viewport(), engine.world());

    let viewport = Rect::new(Vec2::new(300.0, 300.0), Vec2::new(450.0, 450.0));
    engine.set_viewport(viewport);
    assert_eq!(engine.viewport(), viewport);
    engine.wait_for_steps(2);

    let visible = engine.visible_nodes();
    assert_eq!(visible.len(), 1);
    assert_eq!(visible[0].id, NodeId(2));
}

#[test]
fn technique_switch_applies_to_later_steps() {
    let engine = engine();
    assert_eq!(engine.technique(), Technique::Quad);
    engine.set_technique(Technique::Fuzzy);
    engine.wait_for_steps(2);
    assert_eq!(engine.stats().technique, Technique::Fuzzy);
}

#[test]
fn reset_empties_the_layout() {
    let engine = engine();
    engine.load(&square(10.0), false);
    engine.reset();
    engine.wait_for_steps(2);
    assert!(engine.save().is_empty());
    assert_eq!(engine.stats().state, LayoutState::Empty);
    assert!(engine.visible_nodes().is_empty());
}

#[test]
fn concurrent_callers_are_all_applied() {
    let engine = Arc::new(engine());
    engine.activate_layout();

    let handles: Vec<_> = (0..4u64)
        .map(|t| {
            let engine = Arc::clone(&engine);
            thread::spawn(move || {
                for i in 0..100u64 {
                    let id = t * 1000 + i;
                    engine.add_node(NodeId(id), (i as f32) * 4.0 - 200.0, t as f32 * 50.0, 3.0);
                    if i % 10 == 0 {
                        engine.move_node(NodeId(id), 1.0, 1.0);
                    }
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    engine.wait_for_steps(3);
    assert_eq!(engine.save().len(), 400);
    assert_eq!(engine.stats().body_count, 400);
    engine.check_invariants().unwrap();
}
