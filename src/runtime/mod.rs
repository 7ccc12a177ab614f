//! Program execution: configuration, the runtime entry point, and the
//! per-run execution context.

pub mod branch;
pub mod error;
pub mod frames;
pub mod interrupt;
pub mod planner;
pub mod queue;

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::interpreter::ast::Program;
use crate::interpreter::builtins;
use crate::interpreter::env::{ScopeArena, ScopeId};
use crate::interpreter::ffi::{FfiRegistry, HostFunction};
use crate::interpreter::value::Value;
use branch::Branch;
use error::{ExecError, ExecErrorKind};
use frames::FrameStore;
use planner::MotionPlanner;

pub use branch::{join_write_sets, BranchStatus};
pub use error::PlannerError;
pub use planner::{DispatchRecord, SimulatedPlanner};
pub use queue::{Action, ActionQueue, MotionKind, QueuedItem, QUEUE_HARD_LIMIT};

/// What happens to a branch after an interrupt handler finishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum InterruptPolicy {
    /// The branch continues from where the interrupt fired.
    #[default]
    Resume,
    /// The whole program stops.
    Terminate,
}

/// Tunable parameters of a program run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Controllers available to the program, pre-bound into the top-level
    /// environment under their own names.
    pub controllers: Vec<String>,
    /// Controller used by motions outside any `do with` arm. With exactly
    /// one controller configured it is implied.
    pub default_controller: Option<String>,
    /// Tool frame assumed before any `tcp(...)` call or modifier.
    pub default_tcp: Option<String>,
    /// Queue length at which a branch flushes before its next statement.
    /// Zero disables threshold flushing.
    pub pipeline_threshold: usize,
    /// Interrupt continuation policy.
    pub interrupt_policy: InterruptPolicy,
    /// Maximum function-call nesting.
    pub max_call_depth: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            controllers: Vec::new(),
            default_controller: None,
            default_tcp: None,
            pipeline_threshold: 0,
            interrupt_policy: InterruptPolicy::default(),
            max_call_depth: 64,
        }
    }
}

/// Result of a completed program run.
#[derive(Debug)]
pub struct ProgramOutcome {
    /// Top-level variable bindings at program end, sorted by name.
    pub variables: Vec<(String, Value)>,
    /// Lines produced by `print`, in order.
    pub printed: Vec<String>,
    /// Whether the run ended early through the terminate interrupt policy.
    pub terminated: bool,
}

impl ProgramOutcome {
    /// Look up a top-level variable by name.
    pub fn variable(&self, name: &str) -> Option<&Value> {
        self.variables
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v)
    }
}

/// The mutable state of one program run.
///
/// Owns the scope arena, the active branch, the frame store, and the
/// handles to the planner and the host-function registry. The evaluator in
/// [`crate::interpreter::eval`] drives it statement by statement.
pub struct ExecutionContext {
    pub(crate) arena: ScopeArena,
    pub(crate) current_scope: ScopeId,
    pub(crate) branch: Branch,
    pub(crate) planner: Arc<dyn MotionPlanner>,
    pub(crate) registry: Arc<FfiRegistry>,
    pub(crate) frames: FrameStore,
    pub(crate) config: RuntimeConfig,
    pub(crate) call_depth: usize,
    pub(crate) in_robot_context: bool,
    pub(crate) terminated: bool,
    pub(crate) polling_interrupts: bool,
    pub(crate) printed: Vec<String>,
}

impl ExecutionContext {
    /// Fresh context over a planner and registry.
    pub(crate) fn new(
        config: RuntimeConfig,
        planner: Arc<dyn MotionPlanner>,
        registry: Arc<FfiRegistry>,
    ) -> Self {
        let (mut arena, root) = ScopeArena::new();
        for controller in &config.controllers {
            arena.bind_local(root, controller, Value::Controller(controller.clone()));
        }
        let mut branch = Branch::main(root, config.default_controller.clone());
        branch.base_tcp = config.default_tcp.clone();
        Self {
            arena,
            current_scope: root,
            branch,
            planner,
            registry,
            frames: FrameStore::new(),
            config,
            call_depth: 0,
            in_robot_context: false,
            terminated: false,
            polling_interrupts: false,
            printed: Vec::new(),
        }
    }

    /// Minimal context for exercising context-free host functions in unit
    /// tests.
    #[cfg(test)]
    pub(crate) fn detached() -> Self {
        Self::new(
            RuntimeConfig::default(),
            Arc::new(SimulatedPlanner::new::<&str>(&[])),
            Arc::new(FfiRegistry::new()),
        )
    }

    /// Fork a child context for one `do with` arm.
    ///
    /// The child runs against its own clone of the scope arena and frame
    /// store with a fresh barrier scope on top, so its writes stay invisible
    /// to siblings until the join. Planner and registry handles are shared,
    /// which is how arms coordinate through device state while isolated.
    pub(crate) fn fork(&self, controller: String) -> Self {
        let mut arena = self.arena.clone();
        let fork_scope = arena.barrier_child(self.current_scope);
        let branch = Branch::fork(&self.branch, fork_scope, controller);
        tracing::debug!(branch = %branch.id, controller = ?branch.controller, "branch forked");
        Self {
            arena,
            current_scope: fork_scope,
            branch,
            planner: Arc::clone(&self.planner),
            registry: Arc::clone(&self.registry),
            frames: self.frames.clone(),
            config: self.config.clone(),
            call_depth: 0,
            in_robot_context: true,
            terminated: false,
            polling_interrupts: false,
            printed: Vec::new(),
        }
    }

    /// Set the branch's base tool frame (the `tcp` builtin).
    pub fn set_base_tcp(&mut self, name: String) {
        self.branch.base_tcp = Some(name);
    }

    /// The controller motions on the current branch are addressed to.
    pub(crate) fn motion_controller(&self) -> Result<String, ExecError> {
        if let Some(controller) = &self.branch.controller {
            return Ok(controller.clone());
        }
        if let Some(controller) = &self.config.default_controller {
            return Ok(controller.clone());
        }
        if self.config.controllers.len() == 1 {
            return Ok(self.config.controllers[0].clone());
        }
        Err(ExecError::new(ExecErrorKind::WrongRobotContext(
            "no controller bound and no default configured".into(),
        )))
    }
}

/// The program runner: pairs a configuration and a planner with a
/// host-function registry and executes programs against them.
pub struct Runtime {
    config: RuntimeConfig,
    planner: Arc<dyn MotionPlanner>,
    registry: Arc<FfiRegistry>,
}

impl Runtime {
    /// Build a runtime. The default builtin catalog is installed up front;
    /// host functions registered later may replace individual entries.
    pub fn new(config: RuntimeConfig, planner: Arc<dyn MotionPlanner>) -> Self {
        let registry = Arc::new(FfiRegistry::new());
        builtins::install(&registry);
        Self {
            config,
            planner,
            registry,
        }
    }

    /// Register a host function.
    pub fn register_host_function(&self, name: impl Into<String>, function: HostFunction) {
        self.registry.register(name, function);
    }

    /// Execute a program with the given initial top-level bindings.
    ///
    /// The queue of the main branch is flushed once more at program end, so
    /// trailing motions run even without a final `sync`.
    pub async fn run(
        &self,
        program: &Program,
        initial: HashMap<String, Value>,
    ) -> Result<ProgramOutcome, ExecError> {
        let mut ctx =
            ExecutionContext::new(self.config.clone(), Arc::clone(&self.planner), Arc::clone(&self.registry));
        for (name, value) in initial {
            ctx.arena.bind_local(ctx.current_scope, &name, value);
        }
        info!(statements = program.body.statements.len(), "starting program");
        ctx.run_program(program).await?;
        let variables = ctx
            .arena
            .local_bindings(ctx.current_scope)
            .into_iter()
            .filter(|(_, value)| !matches!(value, Value::Controller(_)))
            .collect();
        info!(terminated = ctx.terminated, "program finished");
        Ok(ProgramOutcome {
            variables,
            printed: ctx.printed,
            terminated: ctx.terminated,
        })
    }
}
