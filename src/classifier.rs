// ============================================================================
// Signature classifier - method shape -> replacement policy
// ============================================================================

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::model::{MethodDescriptor, MethodRef, TypeDescriptor};

/// What a neutralized method does instead of its body
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ReplacementPolicy {
    /// Always `false`; feature probes report "unavailable"
    ReturnConstantFalse,
    /// null / zero / false / '\0' / nothing, by return type
    ReturnTypeDefault,
    /// Raise the marker error
    ThrowMarkerError,
}

impl ReplacementPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReplacementPolicy::ReturnConstantFalse => "return-false",
            ReplacementPolicy::ReturnTypeDefault => "return-default",
            ReplacementPolicy::ThrowMarkerError => "throw-marker",
        }
    }
}

impl fmt::Display for ReplacementPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Value a `ReturnTypeDefault` replacement hands back
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub enum DefaultValue {
    Null,
    Bool(bool),
    Byte(i8),
    Char(char),
    Short(i16),
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    /// void: no value at all
    Unit,
}

impl DefaultValue {
    pub fn for_type(ty: &TypeDescriptor) -> Self {
        match ty {
            TypeDescriptor::Void => DefaultValue::Unit,
            TypeDescriptor::Boolean => DefaultValue::Bool(false),
            TypeDescriptor::Byte => DefaultValue::Byte(0),
            TypeDescriptor::Char => DefaultValue::Char('\0'),
            TypeDescriptor::Short => DefaultValue::Short(0),
            TypeDescriptor::Int => DefaultValue::Int(0),
            TypeDescriptor::Long => DefaultValue::Long(0),
            TypeDescriptor::Float => DefaultValue::Float(0.0),
            TypeDescriptor::Double => DefaultValue::Double(0.0),
            TypeDescriptor::Reference(_) => DefaultValue::Null,
        }
    }
}

/// Pure policy choice
///
/// `is_entry_point` marks classes reachable from outside the hooked module;
/// only there do `build`/`create` raise instead of returning a default.
pub fn classify(
    return_type: &TypeDescriptor,
    param_count: usize,
    name: &str,
    builder_names: &[String],
    is_entry_point: bool,
) -> ReplacementPolicy {
    if param_count == 0 && return_type.is_boolean() {
        ReplacementPolicy::ReturnConstantFalse
    } else if is_entry_point && builder_names.iter().any(|b| b == name) {
        ReplacementPolicy::ThrowMarkerError
    } else {
        ReplacementPolicy::ReturnTypeDefault
    }
}

pub fn classify_method(
    method: &MethodDescriptor,
    builder_names: &[String],
    is_entry_point: bool,
) -> ReplacementPolicy {
    classify(&method.return_type, method.param_count(), &method.name, builder_names, is_entry_point)
}

// ============================================================================
// Replacement - the value handed to the host install call
// ============================================================================

/// Stateless replacement body, parameterized by the method it stands in for
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Replacement {
    pub policy: ReplacementPolicy,
    pub method: MethodRef,
    pub return_type: TypeDescriptor,
    /// Message of the marker error; only read for `ThrowMarkerError`
    pub marker_message: String,
}

/// Result of calling a neutralized method
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum Invocation {
    Returned(DefaultValue),
    Raised(String),
}

impl Replacement {
    pub fn new(method: &MethodDescriptor, policy: ReplacementPolicy, marker_message: &str) -> Self {
        Self {
            policy,
            method: method.method_ref(),
            return_type: method.return_type.clone(),
            marker_message: marker_message.to_string(),
        }
    }

    /// Behavior of the installed body; no side effect beyond the result
    pub fn invoke(&self) -> Invocation {
        match self.policy {
            ReplacementPolicy::ReturnConstantFalse => Invocation::Returned(DefaultValue::Bool(false)),
            ReplacementPolicy::ReturnTypeDefault => {
                Invocation::Returned(DefaultValue::for_type(&self.return_type))
            }
            ReplacementPolicy::ThrowMarkerError => Invocation::Raised(self.marker_message.clone()),
        }
    }
}
