//! Mutation requests queued by callers and applied by the simulation thread.

use crate::body::NodeId;
use crate::geometry::Vec2;

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// Drop every body and rebuild the tree.
    Reset,
    Add {
        id: NodeId,
        position: Vec2,
        hit_radius: f32,
    },
    Delete {
        id: NodeId,
    },
    /// Translate a body by `delta`.
    Move {
        id: NodeId,
        delta: Vec2,
    },
    Connect {
        a: NodeId,
        b: NodeId,
    },
    Disconnect {
        a: NodeId,
        b: NodeId,
    },
    /// Point query answered against the tree after the step's mutations.
    Intersect {
        point: Vec2,
    },
}

impl Command {
    /// Event name used in logs.
    pub fn name(&self) -> &'static str {
        match self {
            Command::Reset => "reset",
            Command::Add { .. } => "add",
            Command::Delete { .. } => "delete",
            Command::Move { .. } => "move",
            Command::Connect { .. } => "connect",
            Command::Disconnect { .. } => "disconnect",
            Command::Intersect { .. } => "intersect",
        }
    }

    /// Reason the command cannot be applied, if any.
    pub fn malformed(&self) -> Option<&'static str> {
        match self {
            Command::Add {
                position,
                hit_radius,
                ..
            } => {
                if !position.is_finite() {
                    Some("non-finite position")
                } else if !hit_radius.is_finite() || *hit_radius < 0.0 {
                    Some("hit radius must be a non-negative number")
                } else {
                    None
                }
            }
            Command::Move { delta, .. } if !delta.is_finite() => Some("non-finite offset"),
            Command::Intersect { point } if !point.is_finite() => Some("non-finite query point"),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_malformed_commands() {
        let bad = [
            Command::Add {
                id: NodeId(1),
                position: Vec2::new(f32::NAN, 0.0),
                hit_radius: 1.0,
            },
            Command::Add {
                id: NodeId(1),
                position: Vec2::ZERO,
                hit_radius: -1.0,
            },
            Command::Move {
                id: NodeId(1),
                delta: Vec2::new(0.0, f32::INFINITY),
            },
            Command::Intersect {
                point: Vec2::new(f32::NAN, f32::NAN),
            },
        ];
        for command in bad {
            assert!(command.malformed().is_some(), "{command:?}");
        }

        let good = [
            Command::Reset,
            Command::Add {
                id: NodeId(1),
                position: Vec2::new(1.0, 2.0),
                hit_radius: 0.0,
            },
            Command::Delete { id: NodeId(9) },
            Command::Connect {
                a: NodeId(1),
                b: NodeId(2),
            },
        ];
        for command in good {
            assert!(command.malformed().is_none(), "{command:?}");
        }
    }
}
