//! Branch state for concurrent robot contexts.
//!
//! Every executing body belongs to a branch: the main program runs on the
//! root branch, and each `do with <controller>:` arm forks a child. A branch
//! owns its action queue, its modifier stack, its interrupt table, and the
//! barrier scope that isolates its writes until the joining `sync`.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::interpreter::env::ScopeId;
use crate::interpreter::modifier::ModifierStack;
use crate::interpreter::pose::Pose;
use crate::interpreter::value::Value;
use crate::runtime::error::{ExecError, ExecErrorKind};
use crate::runtime::interrupt::InterruptTable;
use crate::runtime::queue::ActionQueue;

/// Lifecycle of a branch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BranchStatus {
    /// Executing statements.
    Running,
    /// Finished its body, waiting for siblings at the barrier.
    AwaitingSync,
    /// Joined successfully.
    Completed,
    /// Terminated with an error.
    Failed,
    /// Stopped by a fired interrupt; may resume per runtime policy.
    Interrupted,
}

/// One execution branch.
#[derive(Debug)]
pub struct Branch {
    /// Branch identity, used in logs.
    pub id: Uuid,
    /// Controller the branch is bound to, if any.
    pub controller: Option<String>,
    /// Innermost scope of the branch; a barrier scope for forked branches.
    pub scope: ScopeId,
    /// Dynamic motion modifiers.
    pub modifiers: ModifierStack,
    /// Base tool frame set by the `tcp` builtin, consulted when no modifier
    /// overrides it.
    pub base_tcp: Option<String>,
    /// Deferred work.
    pub queue: ActionQueue,
    /// Monitors declared on this branch.
    pub interrupts: InterruptTable,
    /// Lifecycle state.
    pub status: BranchStatus,
    /// Final pose of the last successful flush, if any.
    pub last_planned_pose: Option<Pose>,
}

impl Branch {
    /// The root branch of a program run.
    pub fn main(scope: ScopeId, controller: Option<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            controller,
            scope,
            modifiers: ModifierStack::new(),
            base_tcp: None,
            queue: ActionQueue::new(),
            interrupts: InterruptTable::new(),
            status: BranchStatus::Running,
            last_planned_pose: None,
        }
    }

    /// Fork a child branch for one `do with` arm. The child starts with the
    /// parent's effective modifier values and base tool frame, an empty
    /// queue, and its own interrupt table.
    pub fn fork(parent: &Branch, scope: ScopeId, controller: String) -> Self {
        Self {
            id: Uuid::new_v4(),
            controller: Some(controller),
            scope,
            modifiers: ModifierStack::seeded_from(&parent.modifiers),
            base_tcp: parent.base_tcp.clone(),
            queue: ActionQueue::new(),
            interrupts: InterruptTable::new(),
            status: BranchStatus::Running,
            last_planned_pose: None,
        }
    }

    /// Tool frame in effect for the next motion: modifier override first,
    /// then the branch's base tool frame.
    pub fn effective_tcp(&self) -> Option<String> {
        self.modifiers
            .settings()
            .tcp
            .or_else(|| self.base_tcp.clone())
    }
}

/// Merge the write sets of joined sibling branches.
///
/// A name written by more than one sibling is a conflict and always an
/// error; equal values do not excuse it.
pub fn join_write_sets(
    write_sets: Vec<Vec<(String, Value)>>,
) -> Result<Vec<(String, Value)>, ExecError> {
    let mut merged: Vec<(String, Value)> = Vec::new();
    for set in write_sets {
        for (name, value) in set {
            if merged.iter().any(|(existing, _)| *existing == name) {
                return Err(ExecError::new(ExecErrorKind::JoinConflict { name }));
            }
            merged.push((name, value));
        }
    }
    Ok(merged)
}
