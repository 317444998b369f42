//! Value representation
//!
//! Every value a thread can hold on its stack or in a binding. Values are
//! persisted with the thread record, so the whole type is serde-serializable.
//! Futures are ordinary values: they can be stored, passed and returned.

use crate::future::FutureId;
use crate::{VmError, VmResult};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;

/// Reference to a top-level function of the executable
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FunctionRef(pub u32);

/// A VM value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    /// Absence of a value
    Null,
    /// Boolean
    Bool(bool),
    /// 64-bit signed integer
    Int(i64),
    /// 64-bit float
    Float(#[serde(with = "float_repr")] f64),
    /// UTF-8 string
    Str(String),
    /// Ordered sequence
    List(Vec<Value>),
    /// String-keyed mapping
    Map(BTreeMap<String, Value>),
    /// Function reference
    Function(FunctionRef),
    /// Reference to a (possibly unresolved) future
    Future(FutureId),
}

impl Value {
    /// Name of the value's type, used in error messages
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Str(_) => "string",
            Value::List(_) => "list",
            Value::Map(_) => "map",
            Value::Function(_) => "function",
            Value::Future(_) => "future",
        }
    }

    /// Truthiness used by conditional jumps and `Not`
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Null => false,
            Value::Bool(b) => *b,
            Value::Int(i) => *i != 0,
            Value::Float(f) => *f != 0.0,
            Value::Str(s) => !s.is_empty(),
            Value::List(items) => !items.is_empty(),
            Value::Map(entries) => !entries.is_empty(),
            Value::Function(_) | Value::Future(_) => true,
        }
    }

    /// Future id, if this value is a future reference
    pub fn as_future(&self) -> Option<FutureId> {
        match self {
            Value::Future(id) => Some(*id),
            _ => None,
        }
    }

    /// Not a composite
    pub fn is_atom(&self) -> bool {
        !matches!(self, Value::List(_) | Value::Map(_))
    }

    /// Null, or an empty composite
    pub fn is_null(&self) -> bool {
        match self {
            Value::Null => true,
            Value::List(items) => items.is_empty(),
            Value::Map(entries) => entries.is_empty(),
            _ => false,
        }
    }

    /// Equality with numeric promotion (`1 == 1.0`)
    pub fn equals(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Int(a), Value::Float(b)) | (Value::Float(b), Value::Int(a)) => {
                (*a as f64) == *b
            }
            (Value::List(a), Value::List(b)) => {
                a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.equals(y))
            }
            _ => self == other,
        }
    }

    /// Ordering for numbers and strings
    pub fn compare(&self, other: &Value) -> VmResult<Ordering> {
        let ordering = match (self, other) {
            (Value::Int(a), Value::Int(b)) => Some(a.cmp(b)),
            (Value::Str(a), Value::Str(b)) => Some(a.cmp(b)),
            (Value::Int(a), Value::Float(b)) => (*a as f64).partial_cmp(b),
            (Value::Float(a), Value::Int(b)) => a.partial_cmp(&(*b as f64)),
            (Value::Float(a), Value::Float(b)) => a.partial_cmp(b),
            _ => {
                return Err(VmError::TypeError(format!(
                    "cannot compare {} with {}",
                    self.type_name(),
                    other.type_name()
                )))
            }
        };
        ordering.ok_or_else(|| VmError::TypeError("comparison with NaN".to_string()))
    }

    /// `a + b`: numeric addition, string and list concatenation
    pub fn add(&self, other: &Value) -> VmResult<Value> {
        match (self, other) {
            (Value::Int(a), Value::Int(b)) => Ok(Value::Int(a.wrapping_add(*b))),
            (Value::Str(a), Value::Str(b)) => Ok(Value::Str(format!("{}{}", a, b))),
            (Value::List(_), Value::List(_)) => self.concat(other),
            _ => self.float_op(other, "+", |a, b| a + b),
        }
    }

    /// `a - b`
    pub fn sub(&self, other: &Value) -> VmResult<Value> {
        match (self, other) {
            (Value::Int(a), Value::Int(b)) => Ok(Value::Int(a.wrapping_sub(*b))),
            _ => self.float_op(other, "-", |a, b| a - b),
        }
    }

    /// `a * b`
    pub fn mul(&self, other: &Value) -> VmResult<Value> {
        match (self, other) {
            (Value::Int(a), Value::Int(b)) => Ok(Value::Int(a.wrapping_mul(*b))),
            _ => self.float_op(other, "*", |a, b| a * b),
        }
    }

    /// `a / b`; integer division truncates
    pub fn div(&self, other: &Value) -> VmResult<Value> {
        match (self, other) {
            (Value::Int(_), Value::Int(0)) => Err(VmError::DivisionByZero),
            (Value::Int(a), Value::Int(b)) => Ok(Value::Int(a.wrapping_div(*b))),
            _ => self.float_op(other, "/", |a, b| a / b),
        }
    }

    /// `a % b`
    pub fn rem(&self, other: &Value) -> VmResult<Value> {
        match (self, other) {
            (Value::Int(_), Value::Int(0)) => Err(VmError::DivisionByZero),
            (Value::Int(a), Value::Int(b)) => Ok(Value::Int(a.wrapping_rem(*b))),
            _ => self.float_op(other, "%", |a, b| a % b),
        }
    }

    /// `-a`
    pub fn neg(&self) -> VmResult<Value> {
        match self {
            Value::Int(a) => Ok(Value::Int(a.wrapping_neg())),
            Value::Float(a) => Ok(Value::Float(-a)),
            _ => Err(VmError::TypeError(format!("cannot negate {}", self.type_name()))),
        }
    }

    /// `a ++ b` for lists and strings
    pub fn concat(&self, other: &Value) -> VmResult<Value> {
        match (self, other) {
            (Value::List(a), Value::List(b)) => {
                let mut items = a.clone();
                items.extend(b.iter().cloned());
                Ok(Value::List(items))
            }
            (Value::Str(a), Value::Str(b)) => Ok(Value::Str(format!("{}{}", a, b))),
            _ => Err(VmError::TypeError(format!(
                "cannot concatenate {} and {}",
                self.type_name(),
                other.type_name()
            ))),
        }
    }

    /// Length of a list, map or string
    pub fn len(&self) -> VmResult<usize> {
        match self {
            Value::List(items) => Ok(items.len()),
            Value::Map(entries) => Ok(entries.len()),
            Value::Str(s) => Ok(s.chars().count()),
            _ => Err(VmError::TypeError(format!("{} has no length", self.type_name()))),
        }
    }

    /// Map key form of a scalar
    pub fn to_key(&self) -> VmResult<String> {
        match self {
            Value::Str(s) => Ok(s.clone()),
            Value::Int(i) => Ok(i.to_string()),
            Value::Bool(b) => Ok(b.to_string()),
            _ => Err(VmError::TypeError(format!(
                "{} cannot be used as a map key",
                self.type_name()
            ))),
        }
    }

    fn float_op(&self, other: &Value, op: &str, f: impl Fn(f64, f64) -> f64) -> VmResult<Value> {
        match (self.as_f64(), other.as_f64()) {
            (Some(a), Some(b)) => Ok(Value::Float(f(a, b))),
            _ => Err(VmError::TypeError(format!(
                "unsupported operands for {}: {} and {}",
                op,
                self.type_name(),
                other.type_name()
            ))),
        }
    }

    fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int(i) => write!(f, "{}", i),
            Value::Float(x) => write!(f, "{:?}", x),
            Value::Str(s) => write!(f, "{}", s),
            Value::List(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                write!(f, "]")
            }
            Value::Map(entries) => {
                write!(f, "{{")?;
                for (i, (key, value)) in entries.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}: {}", key, value)?;
                }
                write!(f, "}}")
            }
            Value::Function(func) => write!(f, "<function #{}>", func.0),
            Value::Future(id) => write!(f, "<future {}>", id),
        }
    }
}

/// JSON has no non-finite numbers; `inf`, `-inf` and `NaN` are stored as strings
mod float_repr {
    use serde::de::{self, Unexpected, Visitor};
    use serde::{Deserializer, Serializer};
    use std::fmt;

    pub fn serialize<S: Serializer>(value: &f64, serializer: S) -> Result<S::Ok, S::Error> {
        if value.is_finite() {
            serializer.serialize_f64(*value)
        } else if value.is_nan() {
            serializer.serialize_str("NaN")
        } else if value.is_sign_positive() {
            serializer.serialize_str("inf")
        } else {
            serializer.serialize_str("-inf")
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
        deserializer.deserialize_any(FloatVisitor)
    }

    struct FloatVisitor;

    impl<'de> Visitor<'de> for FloatVisitor {
        type Value = f64;

        fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("a number, \"inf\", \"-inf\" or \"NaN\"")
        }

        fn visit_f64<E: de::Error>(self, value: f64) -> Result<f64, E> {
            Ok(value)
        }

        fn visit_i64<E: de::Error>(self, value: i64) -> Result<f64, E> {
            Ok(value as f64)
        }

        fn visit_u64<E: de::Error>(self, value: u64) -> Result<f64, E> {
            Ok(value as f64)
        }

        fn visit_str<E: de::Error>(self, value: &str) -> Result<f64, E> {
            match value {
                "inf" => Ok(f64::INFINITY),
                "-inf" => Ok(f64::NEG_INFINITY),
                "NaN" => Ok(f64::NAN),
                other => Err(E::invalid_value(Unexpected::Str(other), &self)),
            }
        }
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Int(value)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Str(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::Str(value)
    }
}
