//! The language core: syntax tree, values, environments, and the evaluator.

pub mod ast;
pub mod builtins;
pub mod env;
pub mod eval;
pub mod ffi;
pub mod modifier;
pub mod pose;
pub mod value;

pub use ast::{Block, Expr, Program, Stmt, TextPosition, TextRange};
pub use env::{ScopeArena, ScopeId};
pub use ffi::{FfiRegistry, HostFunction, ParamKind, Signature};
pub use modifier::{ModifierFrame, ModifierStack, MotionSettings};
pub use pose::{Pose, Vector3};
pub use value::{OpaqueObject, Record, Value};
