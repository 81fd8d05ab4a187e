use std::rc::Rc;

use crate::object::ObjectRef;

/// A runtime value. F32 and F64 are distinct on purpose: arithmetic between
/// two F32 inputs stays in single precision, while anything that went through
/// a string conversion is double precision.
#[derive(Debug, Clone)]
pub enum Value {
    F32(f32),
    F64(f64),
    I32(i32),
    Str(Rc<str>),
    Bool(bool),
    Null,
    Undefined,
    Object(ObjectRef),
}

impl Value {
    pub fn string(text: impl Into<Rc<str>>) -> Value {
        Value::Str(text.into())
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::F32(_) | Value::F64(_) | Value::I32(_) => "number",
            Value::Str(_) => "string",
            Value::Bool(_) => "boolean",
            Value::Null => "null",
            Value::Undefined => "undefined",
            Value::Object(object) => {
                if object.borrow().is_function() {
                    "function"
                } else {
                    "object"
                }
            }
        }
    }

    /// Same-type comparison without any coercion (StrictEquals).
    pub fn strict_eq(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::F32(a), Value::F32(b)) => a == b,
            (Value::F64(a), Value::F64(b)) => a == b,
            (Value::I32(a), Value::I32(b)) => a == b,
            // Numbers compare across storage width but not across kind.
            (Value::F32(_) | Value::F64(_) | Value::I32(_), Value::F32(_) | Value::F64(_) | Value::I32(_)) => {
                crate::coerce::to_f64(self) == crate::coerce::to_f64(other)
            }
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Null, Value::Null) => true,
            (Value::Undefined, Value::Undefined) => true,
            (Value::Object(a), Value::Object(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }
}
