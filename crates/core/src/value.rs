//! Argument value model
//!
//! Data sources produce rows of `ArgValue`s: an opaque payload plus the
//! `TypeInfo` describing the value's runtime type. The payload enum covers
//! the scalar shapes test arguments commonly take; anything richer rides in
//! `Value::Opaque` behind an `Arc`.

use crate::types::TypeInfo;
use once_cell::sync::Lazy;
use std::any::Any;
use std::fmt;
use std::sync::Arc;

/// Unified payload enum for test argument values
#[derive(Clone)]
pub enum Value {
    /// Absent value
    Null,
    /// Boolean
    Bool(bool),
    /// 64-bit signed integer
    Int(i64),
    /// 64-bit float
    Float(f64),
    /// UTF-8 string
    Text(String),
    /// Raw bytes
    Bytes(Vec<u8>),
    /// Ordered list of values
    List(Vec<Value>),
    /// Arbitrary shared payload (constructed fixtures, handles, ...)
    Opaque(Arc<dyn Any + Send + Sync>),
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "Null"),
            Value::Bool(b) => write!(f, "Bool({b})"),
            Value::Int(i) => write!(f, "Int({i})"),
            Value::Float(x) => write!(f, "Float({x})"),
            Value::Text(s) => write!(f, "Text({s:?})"),
            Value::Bytes(b) => write!(f, "Bytes({} bytes)", b.len()),
            Value::List(items) => f.debug_tuple("List").field(items).finish(),
            Value::Opaque(_) => write!(f, "Opaque(..)"),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Int(i) => write!(f, "{i}"),
            Value::Float(x) => write!(f, "{x}"),
            Value::Text(s) => write!(f, "\"{s}\""),
            Value::Bytes(b) => write!(f, "<{} bytes>", b.len()),
            Value::List(items) => {
                write!(f, "[")?;
                for (i, v) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{v}")?;
                }
                write!(f, "]")
            }
            Value::Opaque(_) => write!(f, "<opaque>"),
        }
    }
}

/// Well-known scalar type descriptions, shared across the run
pub mod well_known {
    use super::*;

    static INT: Lazy<Arc<TypeInfo>> = Lazy::new(|| TypeInfo::value("Int").into_arc());
    static FLOAT: Lazy<Arc<TypeInfo>> = Lazy::new(|| TypeInfo::value("Float").into_arc());
    static BOOL: Lazy<Arc<TypeInfo>> = Lazy::new(|| TypeInfo::value("Bool").into_arc());
    static TEXT: Lazy<Arc<TypeInfo>> = Lazy::new(|| TypeInfo::reference("String").into_arc());
    static BYTES: Lazy<Arc<TypeInfo>> = Lazy::new(|| TypeInfo::reference("Bytes").into_arc());

    /// The `Int` value type
    pub fn int() -> Arc<TypeInfo> {
        INT.clone()
    }

    /// The `Float` value type
    pub fn float() -> Arc<TypeInfo> {
        FLOAT.clone()
    }

    /// The `Bool` value type
    pub fn boolean() -> Arc<TypeInfo> {
        BOOL.clone()
    }

    /// The `String` reference type
    pub fn text() -> Arc<TypeInfo> {
        TEXT.clone()
    }

    /// The `Bytes` reference type
    pub fn bytes() -> Arc<TypeInfo> {
        BYTES.clone()
    }
}

/// A constructed test class instance, opaque to the core
///
/// Produced by the instance-construction collaborator and threaded through
/// to the invocation collaborator; the core never inspects it.
pub type Instance = Arc<dyn Any + Send + Sync>;

/// One test argument: a payload plus its runtime type
#[derive(Debug, Clone)]
pub struct ArgValue {
    value: Value,
    ty: Arc<TypeInfo>,
}

impl ArgValue {
    /// Pair a payload with its runtime type
    pub fn new(value: Value, ty: Arc<TypeInfo>) -> Self {
        Self { value, ty }
    }

    /// An `Int` literal
    pub fn int(v: i64) -> Self {
        Self::new(Value::Int(v), well_known::int())
    }

    /// A `Float` literal
    pub fn float(v: f64) -> Self {
        Self::new(Value::Float(v), well_known::float())
    }

    /// A `Bool` literal
    pub fn boolean(v: bool) -> Self {
        Self::new(Value::Bool(v), well_known::boolean())
    }

    /// A `String` literal
    pub fn text(v: impl Into<String>) -> Self {
        Self::new(Value::Text(v.into()), well_known::text())
    }

    /// The payload
    pub fn value(&self) -> &Value {
        &self.value
    }

    /// The runtime type of this value
    pub fn runtime_type(&self) -> &Arc<TypeInfo> {
        &self.ty
    }
}

impl fmt::Display for ArgValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.value)
    }
}
