//! The default builtin catalog.
//!
//! Builtins are ordinary host functions registered through the same
//! [`FfiRegistry`] that hosts use, so scripts cannot tell them apart from
//! host-provided functions and may shadow either with their own definitions.

use std::collections::HashMap;
use std::sync::Arc;

use once_cell::sync::Lazy;

use crate::interpreter::ffi::{FfiRegistry, HostFunction, ParamKind, Signature};
use crate::interpreter::value::Value;
use crate::runtime::error::ExecError;

// Unary math functions, all number -> number.
static MATH_FNS: Lazy<HashMap<&'static str, fn(f64) -> f64>> = Lazy::new(|| {
    let mut table: HashMap<&'static str, fn(f64) -> f64> = HashMap::new();
    table.insert("sin", f64::sin);
    table.insert("cos", f64::cos);
    table.insert("tan", f64::tan);
    table.insert("asin", f64::asin);
    table.insert("acos", f64::acos);
    table.insert("atan", f64::atan);
    table.insert("sqrt", f64::sqrt);
    table.insert("exp", f64::exp);
    table.insert("ln", f64::ln);
    table.insert("abs", f64::abs);
    table.insert("floor", f64::floor);
    table.insert("ceil", f64::ceil);
    table.insert("round", f64::round);
    table
});

/// Register every default builtin into a registry.
pub fn install(registry: &FfiRegistry) {
    for (name, function) in MATH_FNS.iter() {
        let function = *function;
        registry.register(
            *name,
            HostFunction::simple(Signature::exact(vec![ParamKind::Number]), move |args| {
                Ok(Value::Number(function(args[0].as_number()?)))
            }),
        );
    }

    registry.register(
        "modulo",
        HostFunction::simple(
            Signature::exact(vec![ParamKind::Number, ParamKind::Number]),
            |args| {
                let divisor = args[1].as_number()?;
                if divisor == 0.0 {
                    return Err(ExecError::type_error("modulo by zero"));
                }
                Ok(Value::Number(args[0].as_number()?.rem_euclid(divisor)))
            },
        ),
    );

    registry.register(
        "len",
        HostFunction::simple(Signature::exact(vec![ParamKind::Any]), |args| {
            let length = match &args[0] {
                Value::Array(items) => items.len(),
                Value::Str(s) => s.chars().count(),
                Value::Record(record) => record.len(),
                other => {
                    return Err(ExecError::type_error(format!(
                        "len is not defined for {}",
                        other.type_name()
                    )))
                }
            };
            Ok(Value::Number(length as f64))
        }),
    );

    registry.register(
        "reverse",
        HostFunction::simple(Signature::exact(vec![ParamKind::Sequence]), |args| {
            let mut items = args[0].as_array()?.to_vec();
            items.reverse();
            Ok(Value::Array(items))
        }),
    );

    registry.register(
        "assoc",
        HostFunction::simple(
            Signature::exact(vec![ParamKind::Any, ParamKind::Any, ParamKind::Any]),
            |mut args| {
                let value = args.pop().unwrap_or(Value::Null);
                let key = args.pop().unwrap_or(Value::Null);
                let target = args.pop().unwrap_or(Value::Null);
                assoc(target, key, value)
            },
        ),
    );

    registry.register(
        "replace",
        HostFunction::simple(
            Signature::exact(vec![ParamKind::Text, ParamKind::Text, ParamKind::Text]),
            |args| {
                Ok(Value::Str(
                    args[0].as_str()?.replace(args[1].as_str()?, args[2].as_str()?),
                ))
            },
        ),
    );

    registry.register(
        "string",
        HostFunction::simple(Signature::exact(vec![ParamKind::Any]), |args| {
            Ok(Value::Str(args[0].to_string()))
        }),
    );

    registry.register(
        "interpolate",
        HostFunction::simple(
            Signature::exact(vec![ParamKind::PoseLike, ParamKind::PoseLike, ParamKind::Any]),
            |args| {
                let start = args[0].as_pose()?;
                let end = args[1].as_pose()?;
                match &args[2] {
                    Value::Number(t) => Ok(Value::Pose(start.interpolate(&end, *t))),
                    Value::Array(params) => {
                        let poses = params
                            .iter()
                            .map(|t| Ok(Value::Pose(start.interpolate(&end, t.as_number()?))))
                            .collect::<Result<Vec<_>, ExecError>>()?;
                        Ok(Value::Array(poses))
                    }
                    other => Err(ExecError::type_error(format!(
                        "interpolation parameter must be a number or array, got {}",
                        other.type_name()
                    ))),
                }
            },
        ),
    );

    registry.register(
        "as_record",
        HostFunction::simple(Signature::exact(vec![ParamKind::Any]), |mut args| {
            match args.remove(0) {
                Value::Record(record) => Ok(Value::Record(record)),
                Value::Opaque(object) => object.fields().map(Value::Record).ok_or_else(|| {
                    ExecError::type_error(format!(
                        "opaque value '{}' has no field view",
                        object.type_name()
                    ))
                }),
                other => Err(ExecError::type_error(format!(
                    "as_record is not defined for {}",
                    other.type_name()
                ))),
            }
        }),
    );

    registry.register(
        "frame",
        HostFunction::simple(Signature::exact(vec![ParamKind::Text]), |args| {
            Ok(Value::Frame(args[0].as_str()?.to_string()))
        }),
    );

    registry.register(
        "tcp",
        HostFunction::with_context(
            Signature::exact(vec![ParamKind::Text]),
            Arc::new(|ctx, args| {
                Box::pin(async move {
                    let name = args[0].as_str()?.to_string();
                    ctx.set_base_tcp(name);
                    Ok(Value::Null)
                })
            }),
        ),
    );

    registry.register(
        "planned_pose",
        HostFunction::with_context(
            Signature::any_args(),
            Arc::new(|ctx, args| {
                Box::pin(async move {
                    let controller = match args.first() {
                        Some(Value::Controller(name)) => Some(name.clone()),
                        Some(Value::Str(name)) => Some(name.clone()),
                        Some(other) => {
                            return Err(ExecError::type_error(format!(
                                "expected a controller, got {}",
                                other.type_name()
                            )))
                        }
                        None => None,
                    };
                    let pose = ctx.planned_pose(controller.as_deref()).await?;
                    Ok(Value::Pose(pose))
                })
            }),
        ),
    );

    registry.register(
        "wait_for_io",
        HostFunction::with_context(
            Signature::exact(vec![ParamKind::Any, ParamKind::Text, ParamKind::Any]),
            Arc::new(|ctx, args| {
                Box::pin(async move {
                    let device = match &args[0] {
                        Value::Controller(name) | Value::Str(name) => name.clone(),
                        other => {
                            return Err(ExecError::type_error(format!(
                                "expected a device, got {}",
                                other.type_name()
                            )))
                        }
                    };
                    let key = args[1].as_str()?.to_string();
                    let expected = args[2].clone();
                    ctx.wait_for_io(&device, &key, &expected).await?;
                    Ok(Value::Null)
                })
            }),
        ),
    );
}

/// Functional update shared by arrays and records: returns a copy with one
/// entry replaced, the original is untouched.
fn assoc(target: Value, key: Value, value: Value) -> Result<Value, ExecError> {
    match target {
        Value::Array(items) => {
            let index = key.as_number()?;
            if index < 0.0 || index.fract() != 0.0 || index as usize >= items.len() {
                return Err(ExecError::binding(format!(
                    "index {index} out of range for array of length {}",
                    items.len()
                )));
            }
            let mut items = items;
            items[index as usize] = value;
            Ok(Value::Array(items))
        }
        Value::Record(record) => {
            let mut record = record;
            record.insert(key.as_str()?.to_string(), value);
            Ok(Value::Record(record))
        }
        other => Err(ExecError::type_error(format!(
            "assoc is not defined for {}",
            other.type_name()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interpreter::value::Record;

    fn catalog() -> FfiRegistry {
        let registry = FfiRegistry::new();
        install(&registry);
        registry
    }

    fn call(registry: &FfiRegistry, name: &str, args: Vec<Value>) -> Result<Value, ExecError> {
        let function = registry.lookup(name).unwrap();
        let args = function.signature.marshal(name, args)?;
        // Context-free builtins ignore the execution context, so unit tests
        // can call the inner closure through a dummy runtime-free path.
        futures::executor::block_on(async {
            let mut ctx = crate::runtime::ExecutionContext::detached();
            (function.callable)(&mut ctx, args).await
        })
    }

    #[test]
    fn math_functions() {
        let registry = catalog();
        let result = call(&registry, "sqrt", vec![Value::Number(9.0)]).unwrap();
        assert!(result.equals(&Value::Number(3.0)));
        let result = call(
            &registry,
            "modulo",
            vec![Value::Number(-1.0), Value::Number(3.0)],
        )
        .unwrap();
        assert!(result.equals(&Value::Number(2.0)));
    }

    #[test]
    fn len_and_reverse() {
        let registry = catalog();
        let items = Value::Array(vec![Value::Number(1.0), Value::Number(2.0)]);
        assert!(call(&registry, "len", vec![items.clone()])
            .unwrap()
            .equals(&Value::Number(2.0)));
        let reversed = call(&registry, "reverse", vec![items]).unwrap();
        assert!(reversed.as_array().unwrap()[0].equals(&Value::Number(2.0)));
    }

    #[test]
    fn assoc_returns_a_copy() {
        let registry = catalog();
        let original = Value::Array(vec![Value::Number(1.0), Value::Number(2.0)]);
        let updated = call(
            &registry,
            "assoc",
            vec![original.clone(), Value::Number(0.0), Value::Number(9.0)],
        )
        .unwrap();
        assert!(updated.as_array().unwrap()[0].equals(&Value::Number(9.0)));
        assert!(original.as_array().unwrap()[0].equals(&Value::Number(1.0)));
        assert!(call(
            &registry,
            "assoc",
            vec![original, Value::Number(5.0), Value::Number(9.0)]
        )
        .is_err());
    }

    #[test]
    fn assoc_on_records() {
        let registry = catalog();
        let mut record = Record::new();
        record.insert("a", Value::Number(1.0));
        let updated = call(
            &registry,
            "assoc",
            vec![
                Value::Record(record),
                Value::Str("b".into()),
                Value::Number(2.0),
            ],
        )
        .unwrap();
        match updated {
            Value::Record(record) => assert_eq!(record.len(), 2),
            other => panic!("expected record, got {other:?}"),
        }
    }

    #[test]
    fn interpolate_with_parameter_array() {
        let registry = catalog();
        let a = Value::Pose(crate::interpreter::pose::Pose::identity());
        let b = Value::Pose(crate::interpreter::pose::Pose::from_components([
            2.0, 0.0, 0.0, 0.0, 0.0, 0.0,
        ]));
        let params = Value::Array(vec![Value::Number(0.0), Value::Number(0.5), Value::Number(1.0)]);
        let result = call(&registry, "interpolate", vec![a, b, params]).unwrap();
        let poses = result.as_array().unwrap();
        assert_eq!(poses.len(), 3);
        match &poses[1] {
            Value::Pose(pose) => assert!((pose.position.x - 1.0).abs() < 1e-9),
            other => panic!("expected pose, got {other:?}"),
        }
    }

    #[test]
    fn replace_and_string() {
        let registry = catalog();
        let result = call(
            &registry,
            "replace",
            vec![
                Value::Str("a-b-c".into()),
                Value::Str("-".into()),
                Value::Str("+".into()),
            ],
        )
        .unwrap();
        assert!(result.equals(&Value::Str("a+b+c".into())));
        let result = call(&registry, "string", vec![Value::Number(4.0)]).unwrap();
        assert!(result.equals(&Value::Str("4".into())));
    }
}
