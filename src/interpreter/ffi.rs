//! The foreign-function boundary: host-function registry and marshalling.
//!
//! Hosts register named functions before a program runs. Call resolution
//! consults the registry only after script-defined names, so a script
//! function may shadow a host function of the same name. Arguments are
//! checked and converted against the declared signature before the callable
//! runs.

use std::collections::HashMap;
use std::sync::Arc;

use futures::future::BoxFuture;
use parking_lot::RwLock;

use crate::interpreter::pose::{Pose, Vector3};
use crate::interpreter::value::Value;
use crate::runtime::error::ExecError;
use crate::runtime::ExecutionContext;

/// Future returned by a host callable.
pub type HostResult<'a> = BoxFuture<'a, Result<Value, ExecError>>;

/// The callable behind a registered host function. It receives the live
/// execution context, so context-sensitive builtins (`planned_pose`, `tcp`)
/// register through the same mechanism as plain host functions.
pub type NativeFn =
    Arc<dyn for<'a> Fn(&'a mut ExecutionContext, Vec<Value>) -> HostResult<'a> + Send + Sync>;

/// Declared parameter kind; arguments are converted to it before the call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamKind {
    /// A number.
    Number,
    /// A boolean; any value converts via truthiness.
    Bool,
    /// A string.
    Text,
    /// An array.
    Sequence,
    /// A record; opaque values with a field view convert to one.
    Keyed,
    /// A pose; 3-element and 6-element number arrays convert to one.
    PoseLike,
    /// Passed through unconverted.
    Any,
}

/// A host function's parameter list.
#[derive(Debug, Clone, Default)]
pub struct Signature {
    /// Fixed parameters, in order.
    pub params: Vec<ParamKind>,
    /// Kind accepted for any arguments beyond the fixed ones, or `None` for
    /// exact arity.
    pub variadic: Option<ParamKind>,
}

impl Signature {
    /// Exact-arity signature.
    pub fn exact(params: Vec<ParamKind>) -> Self {
        Self {
            params,
            variadic: None,
        }
    }

    /// Signature taking any number of unconverted arguments.
    pub fn any_args() -> Self {
        Self {
            params: Vec::new(),
            variadic: Some(ParamKind::Any),
        }
    }

    /// Check arity and convert each argument to its declared kind.
    pub fn marshal(&self, name: &str, args: Vec<Value>) -> Result<Vec<Value>, ExecError> {
        if args.len() < self.params.len()
            || (self.variadic.is_none() && args.len() > self.params.len())
        {
            return Err(ExecError::binding(format!(
                "'{name}' expects {} argument(s), got {}",
                self.params.len(),
                args.len()
            )));
        }
        args.into_iter()
            .enumerate()
            .map(|(i, arg)| {
                let kind = self
                    .params
                    .get(i)
                    .copied()
                    .or(self.variadic)
                    .unwrap_or(ParamKind::Any);
                convert(arg, kind).map_err(|err| {
                    ExecError::type_error(format!("argument {} of '{name}': {}", i + 1, err.kind))
                })
            })
            .collect()
    }
}

/// Convert one value to the declared kind.
fn convert(value: Value, kind: ParamKind) -> Result<Value, ExecError> {
    match kind {
        ParamKind::Any => Ok(value),
        ParamKind::Number => value.as_number().map(Value::Number),
        ParamKind::Bool => Ok(Value::Bool(value.is_truthy())),
        ParamKind::Text => match value {
            Value::Str(_) => Ok(value),
            Value::Frame(name) => Ok(Value::Str(name)),
            other => Err(ExecError::type_error(format!(
                "expected a string, got {}",
                other.type_name()
            ))),
        },
        ParamKind::Sequence => match value {
            Value::Array(_) => Ok(value),
            other => Err(ExecError::type_error(format!(
                "expected an array, got {}",
                other.type_name()
            ))),
        },
        ParamKind::Keyed => match value {
            Value::Record(_) => Ok(value),
            Value::Opaque(object) => object.fields().map(Value::Record).ok_or_else(|| {
                ExecError::type_error(format!(
                    "opaque value '{}' has no field view",
                    object.type_name()
                ))
            }),
            other => Err(ExecError::type_error(format!(
                "expected a record, got {}",
                other.type_name()
            ))),
        },
        ParamKind::PoseLike => pose_like(value).map(Value::Pose),
    }
}

/// Accept a pose, a 3-element position array, or a 6-element component array.
pub fn pose_like(value: Value) -> Result<Pose, ExecError> {
    match value {
        Value::Pose(pose) => Ok(pose),
        Value::Array(items) if items.len() == 3 || items.len() == 6 => {
            let numbers: Vec<f64> = items
                .iter()
                .map(Value::as_number)
                .collect::<Result<_, _>>()?;
            if numbers.len() == 3 {
                Ok(Pose::from_position(Vector3::new(
                    numbers[0], numbers[1], numbers[2],
                )))
            } else {
                let mut components = [0.0; 6];
                components.copy_from_slice(&numbers);
                Ok(Pose::from_components(components))
            }
        }
        other => Err(ExecError::type_error(format!(
            "expected a pose, got {}",
            other.type_name()
        ))),
    }
}

/// A registered host function.
#[derive(Clone)]
pub struct HostFunction {
    /// Parameter declaration, applied before the call.
    pub signature: Signature,
    /// Deferred functions invoked while motions are queued are enqueued and
    /// resolved at the next flush; the call site sees `null`.
    pub deferred: bool,
    /// The callable.
    pub callable: NativeFn,
}

impl std::fmt::Debug for HostFunction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostFunction")
            .field("signature", &self.signature)
            .field("deferred", &self.deferred)
            .finish_non_exhaustive()
    }
}

impl HostFunction {
    /// Wrap a synchronous, context-free function.
    pub fn simple<F>(signature: Signature, function: F) -> Self
    where
        F: Fn(Vec<Value>) -> Result<Value, ExecError> + Send + Sync + 'static,
    {
        let function = Arc::new(function);
        Self {
            signature,
            deferred: false,
            callable: Arc::new(move |_ctx, args| {
                let function = Arc::clone(&function);
                Box::pin(async move { function(args) })
            }),
        }
    }

    /// Wrap a callable that needs the execution context.
    pub fn with_context(signature: Signature, callable: NativeFn) -> Self {
        Self {
            signature,
            deferred: false,
            callable,
        }
    }

    /// Mark the function as deferred.
    pub fn deferred(mut self) -> Self {
        self.deferred = true;
        self
    }
}

/// Thread-safe name-to-function catalog.
#[derive(Debug, Default)]
pub struct FfiRegistry {
    functions: RwLock<HashMap<String, HostFunction>>,
}

impl FfiRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register or replace a function.
    pub fn register(&self, name: impl Into<String>, function: HostFunction) {
        self.functions.write().insert(name.into(), function);
    }

    /// Look up a function by name.
    pub fn lookup(&self, name: &str) -> Option<HostFunction> {
        self.functions.read().get(name).cloned()
    }

    /// Whether a function is registered.
    pub fn contains(&self, name: &str) -> bool {
        self.functions.read().contains_key(name)
    }
}
