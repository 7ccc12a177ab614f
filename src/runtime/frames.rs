//! Coordinate-frame store and relation resolution.
//!
//! Relations are directed edges `(target, source) -> Pose` meaning "the pose
//! of `target` expressed in `source`". A query for an unknown pair is
//! answered by searching for a path through known relations, inverting edges
//! traversed backwards, and composing the poses along the way.

use std::collections::{HashMap, HashSet, VecDeque};

use crate::interpreter::pose::Pose;
use crate::runtime::error::{ExecError, ExecErrorKind};

/// Reserved frame name for a controller's base.
pub const ROBOT_FRAME: &str = "robot";
/// Reserved frame name for a controller's flange.
pub const FLANGE_FRAME: &str = "flange";

/// The known frame relations of one execution.
#[derive(Debug, Clone, Default)]
pub struct FrameStore {
    relations: HashMap<(String, String), Pose>,
}

impl FrameStore {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `[target | source] = pose`, replacing any previous relation for
    /// the pair.
    pub fn set_relation(&mut self, target: &str, source: &str, pose: Pose) {
        self.relations
            .insert((target.to_string(), source.to_string()), pose);
    }

    /// Resolve `[target | source]`, directly or along a composed path.
    pub fn get_relation(&self, target: &str, source: &str) -> Result<Pose, ExecError> {
        if target == source {
            return Ok(Pose::identity());
        }
        if let Some(pose) = self.relations.get(&(target.to_string(), source.to_string())) {
            return Ok(*pose);
        }
        self.search(target, source).ok_or_else(|| {
            ExecError::new(ExecErrorKind::FrameResolution {
                target: target.to_string(),
                source_frame: source.to_string(),
            })
        })
    }

    /// Resolve in a copy of the store with one extra relation installed.
    /// Used to anchor `move [t | s] to p` without mutating the live store.
    pub fn get_relation_with(
        &self,
        extra: (&str, &str, Pose),
        target: &str,
        source: &str,
    ) -> Result<Pose, ExecError> {
        let mut copy = self.clone();
        copy.set_relation(extra.0, extra.1, extra.2);
        copy.get_relation(target, source)
    }

    // Breadth-first search from `source` towards `target`, accumulating the
    // composed pose. Edges are unweighted so the first path found is a
    // shortest one.
    fn search(&self, target: &str, source: &str) -> Option<Pose> {
        let mut adjacency: HashMap<&str, Vec<(&str, Pose)>> = HashMap::new();
        for ((t, s), pose) in &self.relations {
            // Edge source -> target carries the relation pose, the reverse
            // edge carries its inverse.
            adjacency.entry(s.as_str()).or_default().push((t.as_str(), *pose));
            adjacency
                .entry(t.as_str())
                .or_default()
                .push((s.as_str(), pose.inverse()));
        }
        let mut visited: HashSet<&str> = HashSet::new();
        let mut queue: VecDeque<(&str, Pose)> = VecDeque::new();
        visited.insert(source);
        queue.push_back((source, Pose::identity()));
        while let Some((frame, accumulated)) = queue.pop_front() {
            if frame == target {
                return Some(accumulated);
            }
            if let Some(neighbors) = adjacency.get(frame) {
                for (next, edge) in neighbors {
                    if visited.insert(next) {
                        // Walking source -> ... -> target composes edge poses
                        // outermost-first.
                        queue.push_back((next, accumulated.compose(edge)));
                    }
                }
            }
        }
        None
    }
}
