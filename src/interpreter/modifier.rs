//! Dynamic motion modifiers: velocity, blending, and tool frame.
//!
//! Modifiers are not environment variables. Each branch carries an explicit
//! stack of override frames; `with velocity(...), blending(...):` pushes a
//! frame on entry, and every exit path (normal completion, `return`, `break`,
//! error unwind) restores the stack by truncating to the depth recorded at
//! entry.

use serde::{Deserialize, Serialize};

use crate::interpreter::value::Value;
use crate::runtime::error::ExecError;

/// One set of overrides pushed by a `with` block or a `move ... with` suffix.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModifierFrame {
    /// Motion velocity override.
    pub velocity: Option<f64>,
    /// Blending radius override.
    pub blending: Option<f64>,
    /// Tool center point override.
    pub tcp: Option<String>,
}

impl ModifierFrame {
    /// Set one modifier by name, as written in source.
    pub fn set(&mut self, name: &str, value: &Value) -> Result<(), ExecError> {
        match name {
            "velocity" => self.velocity = Some(value.as_number()?),
            "blending" => self.blending = Some(value.as_number()?),
            "tcp" => {
                self.tcp = Some(match value {
                    Value::Frame(name) => name.clone(),
                    other => other.as_str()?.to_string(),
                })
            }
            other => {
                return Err(ExecError::type_error(format!(
                    "unknown motion modifier '{other}'"
                )))
            }
        }
        Ok(())
    }
}

/// The values in effect for the next queued motion.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MotionSettings {
    /// Effective velocity, if any override is active.
    pub velocity: Option<f64>,
    /// Effective blending radius; passes through to the planner unchanged.
    pub blending: Option<f64>,
    /// Effective tool center point.
    pub tcp: Option<String>,
}

/// Per-branch stack of modifier frames.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModifierStack {
    frames: Vec<ModifierFrame>,
}

impl ModifierStack {
    /// Empty stack.
    pub fn new() -> Self {
        Self::default()
    }

    /// Stack seeded with the effective values of another stack. Used when a
    /// branch forks: the child starts from the parent's current settings but
    /// cannot pop the parent's frames.
    pub fn seeded_from(parent: &ModifierStack) -> Self {
        let settings = parent.settings();
        let mut stack = Self::new();
        stack.frames.push(ModifierFrame {
            velocity: settings.velocity,
            blending: settings.blending,
            tcp: settings.tcp,
        });
        stack
    }

    /// Current depth; pass the result to [`ModifierStack::truncate`] on exit.
    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    /// Push one override frame.
    pub fn push(&mut self, frame: ModifierFrame) {
        self.frames.push(frame);
    }

    /// Restore the stack to a previously recorded depth. Safe to call on any
    /// exit path; truncating to the current depth is a no-op.
    pub fn truncate(&mut self, depth: usize) {
        self.frames.truncate(depth);
    }

    /// Resolve the effective settings: the innermost frame that sets a field
    /// wins, per field.
    pub fn settings(&self) -> MotionSettings {
        let mut settings = MotionSettings::default();
        for frame in self.frames.iter().rev() {
            if settings.velocity.is_none() {
                settings.velocity = frame.velocity;
            }
            if settings.blending.is_none() {
                settings.blending = frame.blending;
            }
            if settings.tcp.is_none() {
                settings.tcp = frame.tcp.clone();
            }
        }
        settings
    }
}
