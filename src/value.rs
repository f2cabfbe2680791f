//! Dynamic value representation.
//!
//! Receivers and arguments of protocol operations are [`Value`]s: a small
//! immutable dynamic type with a handful of builtin kinds plus typed
//! instances of user-defined types. Every value yields a stable [`TypeId`],
//! which is the key for all dispatch caching.
//!
//! Instances carry their [`TypeDescriptor`] directly, so the static fast
//! path resolves from the receiver alone without touching shared state.

use crate::error::DispatchResult;
use crate::type_obj::{TypeDescriptor, TypeId};
use rustc_hash::FxHashMap;
use std::sync::Arc;

// =============================================================================
// Callable Type
// =============================================================================

/// A protocol operation implementation: `(receiver, args) -> result`.
///
/// `Arc`-wrapped so caches and binding tables share it by cheap clone; a
/// reader always observes a whole callable, never a torn one.
pub type OpFn = Arc<dyn Fn(&Value, &[Value]) -> DispatchResult<Value> + Send + Sync>;

/// Wrap a closure as an [`OpFn`].
pub fn op_fn<F>(f: F) -> OpFn
where
    F: Fn(&Value, &[Value]) -> DispatchResult<Value> + Send + Sync + 'static,
{
    Arc::new(f)
}

// =============================================================================
// Value
// =============================================================================

/// A dynamically typed value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// The unit value.
    Unit,
    /// Boolean.
    Bool(bool),
    /// 64-bit signed integer.
    Int(i64),
    /// 64-bit float.
    Float(f64),
    /// Immutable string.
    Str(Arc<str>),
    /// List of values.
    List(Arc<Vec<Value>>),
    /// String-keyed map.
    Map(Arc<FxHashMap<String, Value>>),
    /// Instance of a user-defined type.
    Instance(Arc<Instance>),
}

impl Value {
    /// Build a string value.
    pub fn str(s: impl Into<Arc<str>>) -> Self {
        Value::Str(s.into())
    }

    /// Build a list value.
    pub fn list(items: impl IntoIterator<Item = Value>) -> Self {
        Value::List(Arc::new(items.into_iter().collect()))
    }

    /// Build a map value.
    pub fn map<K: Into<String>>(entries: impl IntoIterator<Item = (K, Value)>) -> Self {
        Value::Map(Arc::new(
            entries.into_iter().map(|(k, v)| (k.into(), v)).collect(),
        ))
    }

    /// Build an instance of `ty` with the given state.
    pub fn instance(ty: Arc<TypeDescriptor>, state: Value) -> Self {
        Value::Instance(Arc::new(Instance { ty, state }))
    }

    /// The runtime type id of this value.
    ///
    /// Stable across calls; the dispatch cache key.
    #[inline]
    pub fn type_id(&self) -> TypeId {
        match self {
            Value::Unit => TypeId::UNIT,
            Value::Bool(_) => TypeId::BOOL,
            Value::Int(_) => TypeId::INT,
            Value::Float(_) => TypeId::FLOAT,
            Value::Str(_) => TypeId::STR,
            Value::List(_) => TypeId::LIST,
            Value::Map(_) => TypeId::MAP,
            Value::Instance(inst) => inst.ty.type_id(),
        }
    }

    /// Printable type name, resolvable without a registry.
    pub fn type_name(&self) -> &str {
        match self {
            Value::Unit => "unit",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Str(_) => "str",
            Value::List(_) => "list",
            Value::Map(_) => "map",
            Value::Instance(inst) => inst.ty.name(),
        }
    }

    /// This value's type descriptor, if it is a typed instance.
    #[inline]
    pub fn descriptor(&self) -> Option<&Arc<TypeDescriptor>> {
        match self {
            Value::Instance(inst) => Some(&inst.ty),
            _ => None,
        }
    }

    /// Integer payload, if any.
    #[inline]
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Bool payload, if any.
    #[inline]
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// String payload, if any.
    #[inline]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    /// List payload, if any.
    #[inline]
    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(items) => Some(items),
            _ => None,
        }
    }

    /// Map payload, if any.
    #[inline]
    pub fn as_map(&self) -> Option<&FxHashMap<String, Value>> {
        match self {
            Value::Map(map) => Some(map),
            _ => None,
        }
    }

    /// Instance payload, if any.
    #[inline]
    pub fn as_instance(&self) -> Option<&Instance> {
        match self {
            Value::Instance(inst) => Some(inst),
            _ => None,
        }
    }
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Unit => write!(f, "()"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int(i) => write!(f, "{}", i),
            Value::Float(x) => write!(f, "{}", x),
            Value::Str(s) => write!(f, "{:?}", s),
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
            Value::Map(map) => write!(f, "{{map of {} entries}}", map.len()),
            Value::Instance(inst) => write!(f, "<{} instance>", inst.ty.name()),
        }
    }
}

// =============================================================================
// Instance
// =============================================================================

/// An instance of a user-defined type: descriptor plus instance state.
#[derive(Debug)]
pub struct Instance {
    /// The type this value belongs to.
    pub(crate) ty: Arc<TypeDescriptor>,
    /// Instance state; shape is up to the type's implementations.
    state: Value,
}

impl Instance {
    /// The instance's type descriptor.
    #[inline]
    pub fn ty(&self) -> &Arc<TypeDescriptor> {
        &self.ty
    }

    /// The instance's state value.
    #[inline]
    pub fn state(&self) -> &Value {
        &self.state
    }
}

impl PartialEq for Instance {
    fn eq(&self, other: &Self) -> bool {
        self.ty.type_id() == other.ty.type_id() && self.state == other.state
    }
}
