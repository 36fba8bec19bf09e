//! Response definitions
//!
//! Represents decoded server replies. A response carries at most one
//! payload variant, an error string (non-empty means the command failed
//! server-side), and optional structured attributes used by the watch
//! protocol.

use std::collections::BTreeMap;
use std::fmt;

use crate::error::{ClientError, Result};

/// The single typed payload of a response
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Nil,
    Int(i64),
    Str(String),
    Float(f64),
    Bytes(Vec<u8>),
}

impl Value {
    /// String payload, if this is the string variant
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Integer payload, if this is the integer variant
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Float payload, if this is the float variant
    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn is_nil(&self) -> bool {
        matches!(self, Value::Nil)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Nil => write!(f, "(nil)"),
            Value::Int(i) => write!(f, "{i}"),
            Value::Str(s) => write!(f, "{s}"),
            Value::Float(x) => write!(f, "{x}"),
            Value::Bytes(b) => write!(f, "({} bytes)", b.len()),
        }
    }
}

/// Nested value used inside response attributes and value lists
#[derive(Debug, Clone, PartialEq)]
pub enum AttrValue {
    Null,
    Bool(bool),
    Float(f64),
    Str(String),
    List(Vec<AttrValue>),
    Map(BTreeMap<String, AttrValue>),
}

impl AttrValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            AttrValue::Str(s) => Some(s),
            _ => None,
        }
    }
}

/// A decoded server reply
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Response {
    /// Server-side error message; empty means success. When non-empty the
    /// payload fields are meaningless and must not be interpreted.
    pub err: String,

    /// Typed payload; absent when the reply carries no value
    pub value: Option<Value>,

    /// Structured attributes (watch notifications carry the subscription
    /// fingerprint here)
    pub attrs: Option<BTreeMap<String, AttrValue>>,

    /// Ordered list of nested values
    pub list: Vec<AttrValue>,
}

impl Response {
    /// True if the server reported a failure for this command
    pub fn is_err(&self) -> bool {
        !self.err.is_empty()
    }

    /// Convert into a `Result`, mapping a non-empty error string to a
    /// command error so payloads of failed replies can never be read.
    pub fn into_result(self) -> Result<Response> {
        if self.is_err() {
            Err(ClientError::Command(self.err))
        } else {
            Ok(self)
        }
    }

    /// String payload, if present and this reply succeeded
    pub fn value_str(&self) -> Option<&str> {
        if self.is_err() {
            return None;
        }
        self.value.as_ref().and_then(Value::as_str)
    }

    /// Integer payload, if present and this reply succeeded
    pub fn value_int(&self) -> Option<i64> {
        if self.is_err() {
            return None;
        }
        self.value.as_ref().and_then(Value::as_int)
    }

    /// Top-level attribute lookup
    pub fn attr(&self, key: &str) -> Option<&AttrValue> {
        self.attrs.as_ref().and_then(|m| m.get(key))
    }
}
