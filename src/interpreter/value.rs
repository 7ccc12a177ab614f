//! Runtime values and the operators defined over them.
//!
//! The value union is closed: every expression evaluates to one of the
//! variants of [`Value`]. Host integrations that need to pass richer objects
//! through scripts wrap them as [`Value::Opaque`].

use std::fmt;
use std::sync::Arc;

use crate::interpreter::ast::{BinaryOp, FunctionDef, UnaryOp};
use crate::interpreter::env::ScopeId;
use crate::interpreter::pose::Pose;
use crate::runtime::error::ExecError;

/// An insertion-ordered string-keyed map.
///
/// Key order is the order of first insertion, so `print` output and
/// serialization are deterministic.
#[derive(Debug, Clone, Default)]
pub struct Record {
    entries: Vec<(String, Value)>,
}

impl Record {
    /// Empty record.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the record has no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Look up a key.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    /// Insert or overwrite a key, keeping its original position if present.
    pub fn insert(&mut self, key: impl Into<String>, value: Value) {
        let key = key.into();
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some((_, slot)) => *slot = value,
            None => self.entries.push((key, value)),
        }
    }

    /// Iterate entries in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }
}

impl FromIterator<(String, Value)> for Record {
    fn from_iter<T: IntoIterator<Item = (String, Value)>>(iter: T) -> Self {
        let mut record = Record::new();
        for (k, v) in iter {
            record.insert(k, v);
        }
        record
    }
}

/// A script function together with its captured environment.
#[derive(Debug, Clone)]
pub struct Closure {
    /// The function definition.
    pub def: Arc<FunctionDef>,
    /// Scope the function was defined in; call frames chain to it.
    pub env: ScopeId,
}

/// Host-owned object passed through scripts without a script-level structure.
///
/// Opaque values print via [`OpaqueObject::describe`] and decompose only
/// through the `as_record` builtin, which requires [`OpaqueObject::fields`]
/// to return `Some`.
pub trait OpaqueObject: fmt::Debug + Send + Sync {
    /// Name shown in type errors and `print` output.
    fn type_name(&self) -> &str;

    /// Field view for `as_record`, or `None` if the object is not
    /// decomposable.
    fn fields(&self) -> Option<Record> {
        None
    }

    /// One-line rendering for `print`.
    fn describe(&self) -> String {
        format!("<{}>", self.type_name())
    }
}

/// A runtime value.
#[derive(Debug, Clone)]
pub enum Value {
    /// IEEE 754 double.
    Number(f64),
    /// Boolean.
    Bool(bool),
    /// UTF-8 string.
    Str(String),
    /// Sequence; mutation is rebinding-only (`assoc` returns a copy).
    Array(Vec<Value>),
    /// Insertion-ordered map.
    Record(Record),
    /// Rigid transform.
    Pose(Pose),
    /// Symbolic coordinate-frame handle.
    Frame(String),
    /// Handle to a robot controller known to the runtime.
    Controller(String),
    /// Script function plus captured environment.
    Closure(Closure),
    /// Host-owned object.
    Opaque(Arc<dyn OpaqueObject>),
    /// Absence of a value: the result of a call without `return` and of
    /// deferred host invocations. Inert under every operator.
    Null,
}

impl Value {
    /// Human-readable type name for error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Number(_) => "number",
            Value::Bool(_) => "bool",
            Value::Str(_) => "string",
            Value::Array(_) => "array",
            Value::Record(_) => "record",
            Value::Pose(_) => "pose",
            Value::Frame(_) => "frame",
            Value::Controller(_) => "controller",
            Value::Closure(_) => "function",
            Value::Opaque(_) => "opaque",
            Value::Null => "null",
        }
    }

    /// Truthiness for conditions: empty collections, zero, and `null` are
    /// false, everything else is true.
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Bool(b) => *b,
            Value::Number(n) => *n != 0.0,
            Value::Str(s) => !s.is_empty(),
            Value::Array(items) => !items.is_empty(),
            Value::Record(record) => !record.is_empty(),
            Value::Null => false,
            _ => true,
        }
    }

    /// Extract a number or fail with a type error.
    pub fn as_number(&self) -> Result<f64, ExecError> {
        match self {
            Value::Number(n) => Ok(*n),
            other => Err(ExecError::type_error(format!(
                "expected a number, got {}",
                other.type_name()
            ))),
        }
    }

    /// Extract a string slice or fail with a type error.
    pub fn as_str(&self) -> Result<&str, ExecError> {
        match self {
            Value::Str(s) => Ok(s),
            other => Err(ExecError::type_error(format!(
                "expected a string, got {}",
                other.type_name()
            ))),
        }
    }

    /// Extract an array or fail with a type error.
    pub fn as_array(&self) -> Result<&[Value], ExecError> {
        match self {
            Value::Array(items) => Ok(items),
            other => Err(ExecError::type_error(format!(
                "expected an array, got {}",
                other.type_name()
            ))),
        }
    }

    /// Extract a pose or fail with a type error.
    pub fn as_pose(&self) -> Result<Pose, ExecError> {
        match self {
            Value::Pose(pose) => Ok(*pose),
            other => Err(ExecError::type_error(format!(
                "expected a pose, got {}",
                other.type_name()
            ))),
        }
    }

    /// Structural equality; closures and opaque values compare by identity.
    pub fn equals(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Number(a), Value::Number(b)) => a == b,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Array(a), Value::Array(b)) => {
                a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.equals(y))
            }
            (Value::Record(a), Value::Record(b)) => {
                a.len() == b.len()
                    && a.iter()
                        .all(|(k, v)| b.get(k).is_some_and(|other| v.equals(other)))
            }
            (Value::Pose(a), Value::Pose(b)) => a == b,
            (Value::Frame(a), Value::Frame(b)) => a == b,
            (Value::Controller(a), Value::Controller(b)) => a == b,
            (Value::Closure(a), Value::Closure(b)) => Arc::ptr_eq(&a.def, &b.def),
            (Value::Opaque(a), Value::Opaque(b)) => Arc::ptr_eq(a, b),
            (Value::Null, Value::Null) => true,
            _ => false,
        }
    }

    /// Convert to JSON for the host boundary. Frames and controllers become
    /// their names; closures and opaque values become their printed form.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Number(n) => serde_json::json!(n),
            Value::Bool(b) => serde_json::json!(b),
            Value::Str(s) => serde_json::json!(s),
            Value::Array(items) => {
                serde_json::Value::Array(items.iter().map(Value::to_json).collect())
            }
            Value::Record(record) => serde_json::Value::Object(
                record
                    .iter()
                    .map(|(k, v)| (k.to_string(), v.to_json()))
                    .collect(),
            ),
            Value::Pose(pose) => serde_json::json!(pose.to_components()),
            Value::Frame(name) | Value::Controller(name) => serde_json::json!(name),
            Value::Closure(_) | Value::Opaque(_) => serde_json::json!(self.to_string()),
            Value::Null => serde_json::Value::Null,
        }
    }

    /// Convert from JSON at the host boundary. A 6-element number array
    /// becomes a pose; objects become records.
    pub fn from_json(json: &serde_json::Value) -> Value {
        match json {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(*b),
            serde_json::Value::Number(n) => Value::Number(n.as_f64().unwrap_or(0.0)),
            serde_json::Value::String(s) => Value::Str(s.clone()),
            serde_json::Value::Array(items) => {
                if items.len() == 6 {
                    if let Some(c) = items
                        .iter()
                        .map(|v| v.as_f64())
                        .collect::<Option<Vec<f64>>>()
                    {
                        let mut components = [0.0; 6];
                        components.copy_from_slice(&c);
                        return Value::Pose(Pose::from_components(components));
                    }
                }
                Value::Array(items.iter().map(Value::from_json).collect())
            }
            serde_json::Value::Object(map) => Value::Record(
                map.iter()
                    .map(|(k, v)| (k.clone(), Value::from_json(v)))
                    .collect(),
            ),
        }
    }
}

fn format_number(n: f64) -> String {
    if n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        format!("{n}")
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Number(n) => write!(f, "{}", format_number(*n)),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Str(s) => write!(f, "{s}"),
            Value::Array(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{item}")?;
                }
                write!(f, "]")
            }
            Value::Record(record) => {
                write!(f, "{{")?;
                for (i, (k, v)) in record.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{k}: {v}")?;
                }
                write!(f, "}}")
            }
            Value::Pose(pose) => {
                let c = pose.to_components();
                write!(
                    f,
                    "({}, {}, {}, {}, {}, {})",
                    format_number(c[0]),
                    format_number(c[1]),
                    format_number(c[2]),
                    format_number(c[3]),
                    format_number(c[4]),
                    format_number(c[5]),
                )
            }
            Value::Frame(name) => write!(f, "[{name}]"),
            Value::Controller(name) => write!(f, "{name}"),
            Value::Closure(closure) => write!(f, "<function {}>", closure.def.name),
            Value::Opaque(obj) => write!(f, "{}", obj.describe()),
            Value::Null => write!(f, "null"),
        }
    }
}

/// Apply a binary operator to two evaluated operands.
///
/// `and`/`or` are short-circuited in the evaluator and never reach this
/// function. `::` on frames needs the frame store and is likewise resolved
/// by the evaluator; here it only composes poses.
pub fn apply_binary(op: BinaryOp, lhs: &Value, rhs: &Value) -> Result<Value, ExecError> {
    use BinaryOp::*;
    match op {
        Add => match (lhs, rhs) {
            (Value::Number(a), Value::Number(b)) => Ok(Value::Number(a + b)),
            (Value::Str(a), Value::Str(b)) => Ok(Value::Str(format!("{a}{b}"))),
            (Value::Array(a), Value::Array(b)) => {
                let mut out = a.clone();
                out.extend(b.iter().cloned());
                Ok(Value::Array(out))
            }
            _ => Err(binary_type_error("+", lhs, rhs)),
        },
        Sub => Ok(Value::Number(lhs.as_number()? - rhs.as_number()?)),
        Mul => Ok(Value::Number(lhs.as_number()? * rhs.as_number()?)),
        Div => {
            let divisor = rhs.as_number()?;
            if divisor == 0.0 {
                return Err(ExecError::type_error("division by zero"));
            }
            Ok(Value::Number(lhs.as_number()? / divisor))
        }
        Compose => match (lhs, rhs) {
            (Value::Pose(a), Value::Pose(b)) => Ok(Value::Pose(a.compose(b))),
            _ => Err(binary_type_error("::", lhs, rhs)),
        },
        Eq => Ok(Value::Bool(lhs.equals(rhs))),
        Ne => Ok(Value::Bool(!lhs.equals(rhs))),
        Lt | Le | Gt | Ge => compare(op, lhs, rhs),
        And | Or => Err(ExecError::internal(
            "logical operators must be short-circuited by the evaluator",
        )),
    }
}

fn compare(op: BinaryOp, lhs: &Value, rhs: &Value) -> Result<Value, ExecError> {
    let ordering = match (lhs, rhs) {
        (Value::Number(a), Value::Number(b)) => a.partial_cmp(b),
        (Value::Str(a), Value::Str(b)) => Some(a.cmp(b)),
        _ => {
            return Err(binary_type_error(
                match op {
                    BinaryOp::Lt => "<",
                    BinaryOp::Le => "<=",
                    BinaryOp::Gt => ">",
                    _ => ">=",
                },
                lhs,
                rhs,
            ))
        }
    };
    let ordering = match ordering {
        Some(ordering) => ordering,
        None => return Ok(Value::Bool(false)),
    };
    let result = match op {
        BinaryOp::Lt => ordering.is_lt(),
        BinaryOp::Le => ordering.is_le(),
        BinaryOp::Gt => ordering.is_gt(),
        _ => ordering.is_ge(),
    };
    Ok(Value::Bool(result))
}

/// Apply a unary operator to an evaluated operand.
pub fn apply_unary(op: UnaryOp, operand: &Value) -> Result<Value, ExecError> {
    match op {
        UnaryOp::Neg => Ok(Value::Number(-operand.as_number()?)),
        UnaryOp::Not => Ok(Value::Bool(!operand.is_truthy())),
        UnaryOp::Invert => Ok(Value::Pose(operand.as_pose()?.inverse())),
    }
}

fn binary_type_error(op: &str, lhs: &Value, rhs: &Value) -> ExecError {
    ExecError::type_error(format!(
        "operator '{op}' is not defined for {} and {}",
        lhs.type_name(),
        rhs.type_name()
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_preserves_insertion_order() {
        let mut record = Record::new();
        record.insert("b", Value::Number(1.0));
        record.insert("a", Value::Number(2.0));
        record.insert("b", Value::Number(3.0));
        let keys: Vec<&str> = record.iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["b", "a"]);
        assert!(record.get("b").unwrap().equals(&Value::Number(3.0)));
    }

    #[test]
    fn record_equality_is_semantic_and_order_insensitive() {
        let mut forward = Record::new();
        forward.insert("a", Value::Number(1.0));
        forward.insert("b", Value::Number(2.0));
        let mut backward = Record::new();
        backward.insert("b", Value::Number(2.0));
        backward.insert("a", Value::Number(1.0));
        assert!(Value::Record(forward).equals(&Value::Record(backward)));
    }

    #[test]
    fn arithmetic_and_concatenation() {
        let sum = apply_binary(BinaryOp::Add, &Value::Number(2.0), &Value::Number(3.0)).unwrap();
        assert!(sum.equals(&Value::Number(5.0)));
        let joined = apply_binary(
            BinaryOp::Add,
            &Value::Str("ab".into()),
            &Value::Str("cd".into()),
        )
        .unwrap();
        assert!(joined.equals(&Value::Str("abcd".into())));
        assert!(apply_binary(BinaryOp::Add, &Value::Bool(true), &Value::Number(1.0)).is_err());
    }

    #[test]
    fn division_by_zero_is_an_error() {
        let err =
            apply_binary(BinaryOp::Div, &Value::Number(1.0), &Value::Number(0.0)).unwrap_err();
        assert!(err.to_string().contains("division by zero"));
    }

    #[test]
    fn null_is_inert() {
        assert!(apply_binary(BinaryOp::Add, &Value::Null, &Value::Number(1.0)).is_err());
        assert!(!Value::Null.is_truthy());
        assert!(Value::Null.equals(&Value::Null));
    }

    #[test]
    fn pose_composition_operator() {
        let a = Value::Pose(Pose::from_components([1.0, 0.0, 0.0, 0.0, 0.0, 0.0]));
        let b = Value::Pose(Pose::from_components([0.0, 2.0, 0.0, 0.0, 0.0, 0.0]));
        let composed = apply_binary(BinaryOp::Compose, &a, &b).unwrap();
        match composed {
            Value::Pose(pose) => {
                assert_eq!(pose.position.x, 1.0);
                assert_eq!(pose.position.y, 2.0);
            }
            other => panic!("expected pose, got {other:?}"),
        }
    }

    #[test]
    fn display_formats() {
        assert_eq!(Value::Number(4.0).to_string(), "4");
        assert_eq!(Value::Number(4.5).to_string(), "4.5");
        let record: Record = [("a".to_string(), Value::Number(1.0))].into_iter().collect();
        assert_eq!(Value::Record(record).to_string(), "{a: 1}");
        assert_eq!(
            Value::Array(vec![Value::Bool(true), Value::Str("x".into())]).to_string(),
            "[true, x]"
        );
    }

    #[test]
    fn json_round_trip_for_plain_data() {
        let value = Value::Record(
            [
                ("n".to_string(), Value::Number(1.5)),
                ("items".to_string(), Value::Array(vec![Value::Bool(false)])),
            ]
            .into_iter()
            .collect(),
        );
        let back = Value::from_json(&value.to_json());
        assert!(back.equals(&value));
    }

    #[test]
    fn six_element_json_array_becomes_a_pose() {
        let json = serde_json::json!([1.0, 2.0, 3.0, 0.0, 0.0, 0.5]);
        match Value::from_json(&json) {
            Value::Pose(pose) => assert_eq!(pose.position.z, 3.0),
            other => panic!("expected pose, got {other:?}"),
        }
    }
}
