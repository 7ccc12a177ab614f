//! The deferred action queue.
//!
//! `move` statements never contact the planner directly. They resolve their
//! target and capture the active motion settings immediately, then append an
//! [`Action`] to the executing branch's queue. The queue drains as one batch
//! at a `sync` barrier, at branch close, at program end, or when it grows
//! past the configured pipeline threshold.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::interpreter::pose::Pose;
use crate::interpreter::value::Value;
use crate::runtime::error::{ExecError, ExecErrorKind};

/// Hard cap on queued motions per branch.
pub const QUEUE_HARD_LIMIT: usize = 10_000;

/// How a motion connects the previous pose to its target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum MotionKind {
    /// Joint-interpolated point-to-point motion.
    PointToPoint,
    /// Straight line in Cartesian space.
    Line,
    /// Circular arc through an intermediate pose.
    Arc {
        /// The via pose the arc passes through.
        via: Pose,
    },
}

/// One motion intent, immutable once queued.
///
/// Target, tool frame, velocity, and blending are all resolved at `move`
/// time; later modifier changes do not affect already-queued actions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Action {
    /// Connector kind.
    pub kind: MotionKind,
    /// Resolved target pose.
    pub target: Pose,
    /// Tool center point in effect when the motion was queued.
    pub tcp: Option<String>,
    /// Velocity in effect when the motion was queued.
    pub velocity: Option<f64>,
    /// Blending radius in effect when the motion was queued, passed to the
    /// planner unchanged.
    pub blending: Option<f64>,
}

/// An entry in a branch's queue.
#[derive(Debug, Clone)]
pub enum QueuedItem {
    /// A motion for the planner.
    Motion(Action),
    /// A deferred host-function invocation, resolved at the next flush.
    HostCall {
        /// Registered host-function name.
        name: String,
        /// Arguments captured at call time.
        args: Vec<Value>,
    },
    /// A deferred device write, resolved at the next flush.
    DeviceWrite {
        /// Device identifier.
        device: String,
        /// Key on the device.
        key: String,
        /// Value captured at statement time.
        value: Value,
    },
}

/// Per-branch queue of deferred work.
#[derive(Debug, Default)]
pub struct ActionQueue {
    items: Vec<QueuedItem>,
    motion_count: usize,
}

impl ActionQueue {
    /// Empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of queued motions (host calls and writes not counted).
    pub fn motion_count(&self) -> usize {
        self.motion_count
    }

    /// Whether anything is queued.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Append a motion.
    ///
    /// Changing the tool frame between motions of one unsynced sequence is
    /// rejected: the planner receives a batch as a single trajectory and
    /// cannot switch tools mid-path.
    pub fn push_motion(&mut self, action: Action) -> Result<(), ExecError> {
        if self.motion_count >= QUEUE_HARD_LIMIT {
            return Err(ExecError::new(ExecErrorKind::QueueLimit {
                limit: QUEUE_HARD_LIMIT,
            }));
        }
        if let Some(previous) = self.last_motion() {
            if previous.tcp != action.tcp {
                return Err(ExecError::type_error(
                    "tool center point changed within one motion sequence; sync first",
                ));
            }
        }
        self.items.push(QueuedItem::Motion(action));
        self.motion_count += 1;
        Ok(())
    }

    /// Append a deferred host call.
    pub fn push_host_call(&mut self, name: impl Into<String>, args: Vec<Value>) {
        self.items.push(QueuedItem::HostCall {
            name: name.into(),
            args,
        });
    }

    /// Append a deferred device write.
    pub fn push_device_write(
        &mut self,
        device: impl Into<String>,
        key: impl Into<String>,
        value: Value,
    ) {
        self.items.push(QueuedItem::DeviceWrite {
            device: device.into(),
            key: key.into(),
            value,
        });
    }

    /// Whether the queue has reached the pipeline threshold and should be
    /// flushed before the next statement.
    pub fn wants_flush(&self, threshold: usize) -> bool {
        threshold > 0 && self.motion_count >= threshold
    }

    /// Drain all queued items in order.
    pub fn drain(&mut self) -> Vec<QueuedItem> {
        debug!(motions = self.motion_count, items = self.items.len(), "draining action queue");
        self.motion_count = 0;
        std::mem::take(&mut self.items)
    }

    fn last_motion(&self) -> Option<&Action> {
        self.items.iter().rev().find_map(|item| match item {
            QueuedItem::Motion(action) => Some(action),
            _ => None,
        })
    }
}
