//! Interrupt monitors.
//!
//! An `interrupt` declaration registers a named monitor: a condition
//! predicate with arguments bound at declaration time and a handler that
//! runs in the declaration scope. Monitors start inactive, are toggled by
//! `activate`/`deactivate`, and die with the call frame that declared them.
//! Conditions are polled at the points where the declaring branch would
//! otherwise block.

use std::sync::Arc;

use crate::interpreter::ast::InterruptDef;
use crate::interpreter::env::ScopeId;
use crate::interpreter::value::Value;
use crate::runtime::error::ExecError;

/// One registered interrupt monitor.
#[derive(Debug, Clone)]
pub struct InterruptRegistration {
    /// The declaration (name, condition callee, handler body).
    pub def: Arc<InterruptDef>,
    /// Condition arguments, evaluated once at declaration time.
    pub args: Vec<Value>,
    /// Scope the handler runs in.
    pub env: ScopeId,
    /// Whether the monitor is currently armed.
    pub active: bool,
    /// Call depth at declaration; the registration is dropped when that
    /// frame returns.
    pub call_depth: usize,
}

/// The monitors registered by one branch.
#[derive(Debug, Default)]
pub struct InterruptTable {
    registrations: Vec<InterruptRegistration>,
}

impl InterruptTable {
    /// Empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a monitor, replacing any same-named one. New monitors start
    /// inactive.
    pub fn declare(
        &mut self,
        def: Arc<InterruptDef>,
        args: Vec<Value>,
        env: ScopeId,
        call_depth: usize,
    ) {
        self.registrations.retain(|r| r.def.name != def.name);
        self.registrations.push(InterruptRegistration {
            def,
            args,
            env,
            active: false,
            call_depth,
        });
    }

    /// Arm or disarm a monitor by name.
    pub fn switch(&mut self, name: &str, enable: bool) -> Result<(), ExecError> {
        match self.registrations.iter_mut().find(|r| r.def.name == name) {
            Some(registration) => {
                registration.active = enable;
                Ok(())
            }
            None => Err(ExecError::name_not_found(name)),
        }
    }

    /// Disarm a monitor without failing if it is gone. Used after a fire.
    pub fn deactivate_quiet(&mut self, name: &str) {
        if let Some(registration) = self
            .registrations
            .iter_mut()
            .find(|r| r.def.name == name)
        {
            registration.active = false;
        }
    }

    /// Drop every registration declared deeper than the given call depth.
    /// Called when a call frame returns.
    pub fn retain_up_to_depth(&mut self, depth: usize) {
        self.registrations.retain(|r| r.call_depth <= depth);
    }

    /// Snapshot of the currently armed monitors.
    pub fn armed(&self) -> Vec<InterruptRegistration> {
        self.registrations
            .iter()
            .filter(|r| r.active)
            .cloned()
            .collect()
    }

    /// Whether any monitor is armed.
    pub fn any_armed(&self) -> bool {
        self.registrations.iter().any(|r| r.active)
    }
}
