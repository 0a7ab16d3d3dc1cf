//! Force model and integration.
//!
//! Every technique shares the same attraction (springs along declared edges),
//! center gravity and integrator; they differ only in how repulsion between
//! bodies is approximated.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::body::{Body, BodyTable, Kinematics, NodeId, StepInputs};
use crate::config::ForceParams;
use crate::geometry::{Rect, Vec2};
use crate::tree::{NodeIndex, SpatialTree};

/// Repulsion approximation used by a simulation step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Technique {
    /// Springs only.
    NoRepulse,
    /// Exact pairwise repulsion, O(n²).
    BruteForce,
    /// Barnes-Hut walk over the quad-tree, roughly O(n log n).
    #[default]
    Quad,
    /// Whole graph as one point mass plus exact neighbor terms, O(n).
    Fuzzy,
}

impl Technique {
    pub const ALL: [Technique; 4] = [
        Technique::NoRepulse,
        Technique::BruteForce,
        Technique::Quad,
        Technique::Fuzzy,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Technique::NoRepulse => "no_repulse",
            Technique::BruteForce => "brute_force",
            Technique::Quad => "quad",
            Technique::Fuzzy => "fuzzy",
        }
    }

    pub(crate) fn to_u8(self) -> u8 {
        self as u8
    }

    pub(crate) fn from_u8(value: u8) -> Self {
        match value {
            0 => Technique::NoRepulse,
            1 => Technique::BruteForce,
            3 => Technique::Fuzzy,
            _ => Technique::Quad,
        }
    }
}

impl fmt::Display for Technique {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Technique {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace('-', "_").as_str() {
            "no_repulse" | "none" => Ok(Technique::NoRepulse),
            "brute_force" | "brute" => Ok(Technique::BruteForce),
            "quad" | "barnes_hut" => Ok(Technique::Quad),
            "fuzzy" => Ok(Technique::Fuzzy),
            other => Err(format!(
                "unknown technique `{other}` (expected no_repulse, brute_force, quad or fuzzy)"
            )),
        }
    }
}

/// Read-only view a worker needs to evaluate forces on one body.
pub struct ForceContext<'a> {
    pub bodies: &'a BodyTable,
    pub tree: &'a SpatialTree,
    pub params: &'a ForceParams,
    pub technique: Technique,
}

impl ForceContext<'_> {
    /// Net force on `body` given its current state and Pre-phase inputs.
    pub fn net_force(&self, body: &Body, state: &Kinematics, inputs: &StepInputs) -> Vec2 {
        let p = state.position;
        let mut force = Vec2::ZERO;

        for &(neighbor, _) in &inputs.neighbors {
            force += spring(self.params, p, neighbor);
        }
        // World is centered on the origin.
        force -= p * self.params.gravity;

        force += match self.technique {
            Technique::NoRepulse => Vec2::ZERO,
            Technique::BruteForce => self.brute_force(body.id(), p, body.mass()),
            Technique::Quad => self.quad(body.id(), p, body.mass()),
            Technique::Fuzzy => self.fuzzy(p, body.mass(), inputs),
        };
        force
    }

    fn brute_force(&self, id: NodeId, p: Vec2, mass: f32) -> Vec2 {
        let mut force = Vec2::ZERO;
        for other in self.bodies.iter() {
            if other.id() == id {
                continue;
            }
            force += repulsion_pair(
                self.params,
                id,
                p,
                mass,
                other.id(),
                other.position(),
                other.mass(),
            );
        }
        force
    }

    fn quad(&self, id: NodeId, p: Vec2, mass: f32) -> Vec2 {
        let theta = self.params.theta;
        let mut force = Vec2::ZERO;
        let mut stack = vec![NodeIndex::ROOT];

        while let Some(index) = stack.pop() {
            let node = self.tree.node(index);
            debug_assert!(!node.is_dirty(), "aggregate of {index:?} read before recompute");
            if node.count() == 0 {
                continue;
            }

            let area = node.area();
            if !area.contains(p) {
                let dist = node.center_of_mass().distance(p);
                if dist > 0.0 && area.width() / dist < theta {
                    force += repulsion(self.params, p, mass, node.center_of_mass(), node.mass());
                    continue;
                }
            }

            match node.children() {
                Some(children) => stack.extend(children),
                None => {
                    for other in node.attached() {
                        if *other == id {
                            continue;
                        }
                        if let Some(b) = self.bodies.get(*other) {
                            force += repulsion_pair(
                                self.params,
                                id,
                                p,
                                mass,
                                b.id(),
                                b.position(),
                                b.mass(),
                            );
                        }
                    }
                }
            }
        }
        force
    }

    fn fuzzy(&self, p: Vec2, mass: f32, inputs: &StepInputs) -> Vec2 {
        let root = self.tree.root();
        debug_assert!(!root.is_dirty(), "root aggregate read before recompute");

        let mut force = Vec2::ZERO;
        let rest_mass = root.mass() - mass;
        if rest_mass > f32::EPSILON {
            let rest_center = (root.center_of_mass() * root.mass() - p * mass) / rest_mass;
            force += repulsion(self.params, p, mass, rest_center, rest_mass);
        }
        for (neighbor, neighbor_mass) in &inputs.neighbors {
            force += repulsion(self.params, p, mass, *neighbor, *neighbor_mass);
        }
        force
    }
}

/// Inverse-square push of `p` away from a point mass at `source`.
pub fn repulsion(
    params: &ForceParams,
    p: Vec2,
    mass: f32,
    source: Vec2,
    source_mass: f32,
) -> Vec2 {
    let delta = p - source;
    let len_sq = delta.length_squared();
    if len_sq == 0.0 {
        return Vec2::ZERO;
    }
    let dist_sq = len_sq.max(params.min_distance * params.min_distance);
    let magnitude = params.repulsion * mass * source_mass / dist_sq;
    delta * (magnitude / len_sq.sqrt())
}

/// Repulsion between two bodies; coincident bodies are split along x by id
/// order so they can separate.
fn repulsion_pair(
    params: &ForceParams,
    id: NodeId,
    p: Vec2,
    mass: f32,
    other: NodeId,
    q: Vec2,
    other_mass: f32,
) -> Vec2 {
    if p == q {
        let min_sq = params.min_distance * params.min_distance;
        let magnitude = params.repulsion * mass * other_mass / min_sq;
        let sign = if id < other { -1.0 } else { 1.0 };
        return Vec2::new(sign * magnitude, 0.0);
    }
    repulsion(params, p, mass, q, other_mass)
}

/// Spring pull of `p` toward (or push away from) `neighbor` around the rest length.
pub fn spring(params: &ForceParams, p: Vec2, neighbor: Vec2) -> Vec2 {
    let delta = neighbor - p;
    let dist = delta.length();
    if dist <= f32::EPSILON {
        return Vec2::ZERO;
    }
    let magnitude = params.attraction * (dist - params.ideal_length);
    delta * (magnitude / dist)
}

/// Semi-implicit Euler step (unit mass), clamped to the world.
pub fn integrate(
    params: &ForceParams,
    state: &Kinematics,
    force: Vec2,
    dt: f32,
    world: &Rect,
) -> Kinematics {
    let mut velocity =
        ((state.velocity + force * dt) * params.damping).clamp_length(params.max_speed);
    if !velocity.is_finite() {
        velocity = Vec2::ZERO;
    }

    let mut position = state.position + velocity * dt;
    if !position.is_finite() {
        position = state.position;
    }
    let clamped = world.clamp(position);
    if clamped.x != position.x {
        velocity.x = 0.0;
    }
    if clamped.y != position.y {
        velocity.y = 0.0;
    }

    Kinematics {
        position: clamped,
        velocity,
        energy: state.energy,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> ForceParams {
        ForceParams {
            gravity: 0.0,
            ..Default::default()
        }
    }

    #[test]
    fn test_technique_round_trips_through_u8_and_str() {
        for t in Technique::ALL {
            assert_eq!(Technique::from_u8(t.to_u8()), t);
            assert_eq!(t.as_str().parse::<Technique>().unwrap(), t);
        }
        assert_eq!("brute-force".parse::<Technique>().unwrap(), Technique::BruteForce);
        assert!("warp".parse::<Technique>().is_err());
    }

    #[test]
    fn test_repulsion_points_away_and_decays() {
        let p = params();
        let near = repulsion(&p, Vec2::new(10.0, 0.0), 1.0, Vec2::ZERO, 1.0);
        let far = repulsion(&p, Vec2::new(20.0, 0.0), 1.0, Vec2::ZERO, 1.0);
        assert!(near.x > 0.0 && near.y == 0.0);
        assert!((near.x / far.x - 4.0).abs() < 1e-3);
    }

    #[test]
    fn test_repulsion_softened_near_zero() {
        let p = params();
        let close = repulsion(&p, Vec2::new(0.001, 0.0), 1.0, Vec2::ZERO, 1.0);
        let cap = p.repulsion / (p.min_distance * p.min_distance);
        assert!(close.x <= cap * 1.0001);
        assert_eq!(repulsion(&p, Vec2::ZERO, 1.0, Vec2::ZERO, 1.0), Vec2::ZERO);
    }

    #[test]
    fn test_spring_rest_length() {
        let p = params();
        let at_rest = spring(&p, Vec2::ZERO, Vec2::new(p.ideal_length, 0.0));
        assert!(at_rest.length() < 1e-4);
        let stretched = spring(&p, Vec2::ZERO, Vec2::new(p.ideal_length * 2.0, 0.0));
        assert!(stretched.x > 0.0);
        let compressed = spring(&p, Vec2::ZERO, Vec2::new(p.ideal_length / 2.0, 0.0));
        assert!(compressed.x < 0.0);
    }

    #[test]
    fn test_integrate_is_semi_implicit() {
        let p = ForceParams {
            damping: 1.0,
            ..params()
        };
        let world = Rect::centered_square(1000.0);
        let state = Kinematics::at_rest(Vec2::ZERO);
        let next = integrate(&p, &state, Vec2::new(10.0, 0.0), 0.5, &world);
        // v = 0 + 10 * 0.5 = 5; x = 0 + 5 * 0.5 = 2.5
        assert_eq!(next.velocity, Vec2::new(5.0, 0.0));
        assert_eq!(next.position, Vec2::new(2.5, 0.0));
    }

    #[test]
    fn test_integrate_clamps_to_world() {
        let p = params();
        let world = Rect::centered_square(100.0);
        let state = Kinematics {
            position: Vec2::new(49.0, 0.0),
            velocity: Vec2::new(400.0, 1.0),
            energy: 0.0,
        };
        let next = integrate(&p, &state, Vec2::ZERO, 1.0, &world);
        assert!(world.contains(next.position));
        assert_eq!(next.velocity.x, 0.0);
        assert!(next.velocity.length() <= p.max_speed);
    }

    #[test]
    fn test_integrate_limits_speed() {
        let p = params();
        let world = Rect::centered_square(1e6);
        let state = Kinematics::at_rest(Vec2::ZERO);
        let next = integrate(&p, &state, Vec2::new(1e9, 0.0), 1.0, &world);
        assert!(next.velocity.length() <= p.max_speed * 1.0001);
    }
}
