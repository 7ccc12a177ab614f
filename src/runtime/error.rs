//! Error types for program execution and motion planning.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::interpreter::ast::TextRange;

/// Errors surfaced by a [`MotionPlanner`](crate::runtime::planner::MotionPlanner)
/// implementation.
#[derive(Debug, Clone, Error, Serialize, Deserialize)]
pub enum PlannerError {
    /// A motion request could not be planned or executed.
    #[error("planning failed for controller '{controller}': {reason}")]
    Motion {
        /// Controller the request was addressed to.
        controller: String,
        /// Planner-provided description of the failure.
        reason: String,
    },

    /// A device read, write, or call failed.
    #[error("device '{device}' error: {reason}")]
    Device {
        /// Device identifier.
        device: String,
        /// Description of the failure.
        reason: String,
    },

    /// The named controller is not known to the planner.
    #[error("unknown controller '{0}'")]
    UnknownController(String),
}

/// The category of an execution failure.
///
/// `Planning` is the only kind catchable by a `sync ... except:` handler;
/// every other kind aborts the program.
#[derive(Debug, Clone, Error, Serialize, Deserialize)]
pub enum ExecErrorKind {
    /// A name was read before any binding existed for it.
    #[error("name '{0}' is not defined")]
    NameNotFound(String),

    /// Arity mismatch in a call or destructuring assignment.
    #[error("binding error: {0}")]
    Binding(String),

    /// An operation was applied to values of the wrong type.
    #[error("type error: {0}")]
    Type(String),

    /// No relation (direct or composed) connects a frame pair.
    #[error("no path between frames '{target}' and '{source_frame}'")]
    FrameResolution {
        /// Target frame name.
        target: String,
        /// Source frame name.
        source_frame: String,
    },

    /// A motion statement could not be attributed to a single controller.
    #[error("cannot determine the robot for this motion: {0}")]
    WrongRobotContext(String),

    /// The motion planner rejected a flush. Catchable by `sync ... except:`.
    #[error("planning failed: {reason}")]
    Planning {
        /// Summary of the planner failure.
        reason: String,
    },

    /// A `raise` statement in the program.
    #[error("{0}")]
    UserRaised(String),

    /// Two sibling branches wrote the same identifier before joining.
    #[error("conflicting writes to '{name}' in concurrent branches")]
    JoinConflict {
        /// The identifier both branches wrote.
        name: String,
    },

    /// The per-branch action queue exceeded its hard limit.
    #[error("action queue limit of {limit} exceeded")]
    QueueLimit {
        /// The configured hard limit.
        limit: usize,
    },

    /// Function calls nested past the configured depth limit.
    #[error("call stack exceeded {limit} frames")]
    CallStackOverflow {
        /// The configured depth limit.
        limit: usize,
    },

    /// A `do` block or `sync` appeared inside an already-running branch.
    #[error("nested robot context: {0}")]
    NestedSync(String),

    /// An internal invariant was violated. Indicates a runtime bug.
    #[error("internal error: {0}")]
    Internal(String),
}

/// An execution failure with an optional source location.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecError {
    /// What went wrong.
    pub kind: ExecErrorKind,
    /// Where in the source text it went wrong, when known.
    pub location: Option<TextRange>,
}

impl ExecError {
    /// Wrap a kind with no location.
    pub fn new(kind: ExecErrorKind) -> Self {
        Self {
            kind,
            location: None,
        }
    }

    /// Attach a location if none is set yet. The innermost location wins, so
    /// re-wrapping while unwinding keeps the original site.
    pub fn at(mut self, location: TextRange) -> Self {
        if self.location.is_none() {
            self.location = Some(location);
        }
        self
    }

    /// Shorthand for a [`ExecErrorKind::Type`] error.
    pub fn type_error(message: impl Into<String>) -> Self {
        Self::new(ExecErrorKind::Type(message.into()))
    }

    /// Shorthand for a [`ExecErrorKind::Binding`] error.
    pub fn binding(message: impl Into<String>) -> Self {
        Self::new(ExecErrorKind::Binding(message.into()))
    }

    /// Shorthand for a [`ExecErrorKind::NameNotFound`] error.
    pub fn name_not_found(name: impl Into<String>) -> Self {
        Self::new(ExecErrorKind::NameNotFound(name.into()))
    }

    /// Shorthand for a [`ExecErrorKind::Internal`] error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ExecErrorKind::Internal(message.into()))
    }

    /// Whether a `sync ... except:` handler may catch this error.
    pub fn is_catchable(&self) -> bool {
        matches!(self.kind, ExecErrorKind::Planning { .. })
    }
}

impl std::fmt::Display for ExecError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.location {
            Some(range) => write!(
                f,
                "At line {} column {}: {}",
                range.start.line, range.start.column, self.kind
            ),
            None => write!(f, "{}", self.kind),
        }
    }
}

impl std::error::Error for ExecError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.kind)
    }
}

impl From<ExecErrorKind> for ExecError {
    fn from(kind: ExecErrorKind) -> Self {
        Self::new(kind)
    }
}

impl From<PlannerError> for ExecError {
    fn from(err: PlannerError) -> Self {
        Self::new(ExecErrorKind::Planning {
            reason: err.to_string(),
        })
    }
}
