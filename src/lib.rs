//! Kinescript – a deferred-dispatch runtime for a multi-robot motion
//! scripting language
//!
//! This crate implements the execution engine behind the language:
//! - Tree-walking async evaluator over a serde-deserializable syntax tree
//! - Deferred motion queue: `move` statements capture their settings and
//!   batch to the planner at `sync` barriers
//! - Pose and coordinate-frame algebra (`::` composition, `~` inversion,
//!   relation-graph resolution)
//! - Concurrent `do with ... and do with ...` branches with write isolation
//!   and conflict-checked joins
//! - Interrupt monitors polled wherever a branch would block
//! - A foreign-function registry shared by builtins and host integrations
//!
//! The lexer/parser and the physical motion planner are external
//! collaborators: programs arrive as [`interpreter::ast::Program`] trees and
//! motion leaves through the [`runtime::planner::MotionPlanner`] trait.

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

/// Language core: syntax tree, values, environments, evaluator.
pub mod interpreter;

/// Execution: configuration, branches, queues, planner boundary.
pub mod runtime;

// Re-export key types for convenience
pub use interpreter::{Pose, Program, Value};
pub use runtime::{Runtime, RuntimeConfig, SimulatedPlanner};

/// Current version of the kinescript runtime
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
