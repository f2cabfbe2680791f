//! Type identity and type descriptors.
//!
//! Every value carries a stable, hashable [`TypeId`] which is the dispatch
//! key for all protocol resolution. Builtin value kinds occupy a reserved low
//! range; user-defined types allocate ids from a process-wide counter.
//!
//! A [`TypeDescriptor`] is authored once, at type definition. Besides the
//! name and flags it holds the *static slot table*: operations the type was
//! compiled with built-in knowledge of. A static slot is resolvable from the
//! receiver alone — no registry or cache traffic — and always wins over any
//! dynamically registered binding.

use crate::error::{DispatchResult, ProtocolError};
use crate::protocol::{OpId, Protocol};
use crate::value::OpFn;
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, OnceLock};

// =============================================================================
// Type Identity
// =============================================================================

/// Stable, hashable identifier for a runtime type.
///
/// Consistent across calls for the lifetime of the process; used as the key
/// of every dispatch cache and binding table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TypeId(pub(crate) u32);

impl TypeId {
    /// The unit value.
    pub const UNIT: TypeId = TypeId(1);
    /// Booleans.
    pub const BOOL: TypeId = TypeId(2);
    /// 64-bit integers.
    pub const INT: TypeId = TypeId(3);
    /// 64-bit floats.
    pub const FLOAT: TypeId = TypeId(4);
    /// Immutable strings.
    pub const STR: TypeId = TypeId(5);
    /// Lists.
    pub const LIST: TypeId = TypeId(6);
    /// String-keyed maps.
    pub const MAP: TypeId = TypeId(7);

    /// First id handed out to user-defined types.
    pub const FIRST_USER_TYPE: u32 = 64;

    /// Raw numeric id.
    #[inline]
    pub const fn raw(self) -> u32 {
        self.0
    }

    /// Construct from a raw id.
    #[inline]
    pub const fn from_raw(raw: u32) -> Self {
        TypeId(raw)
    }

    /// Whether this id belongs to the builtin range.
    #[inline]
    pub const fn is_builtin(self) -> bool {
        self.0 < Self::FIRST_USER_TYPE
    }

    /// Name of a builtin type, if this id is one.
    pub fn builtin_name(self) -> Option<&'static str> {
        match self {
            Self::UNIT => Some("unit"),
            Self::BOOL => Some("bool"),
            Self::INT => Some("int"),
            Self::FLOAT => Some("float"),
            Self::STR => Some("str"),
            Self::LIST => Some("list"),
            Self::MAP => Some("map"),
            _ => None,
        }
    }
}

// =============================================================================
// Type Flags
// =============================================================================

bitflags::bitflags! {
    /// Flags describing a type's dispatch-relevant capabilities.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct TypeFlags: u32 {
        /// Type has at least one static protocol slot.
        ///
        /// Checked before probing the slot table so that types without any
        /// compiled-in implementations skip straight to the cache.
        const HAS_STATIC_IMPLS = 1 << 0;
    }
}

impl Default for TypeFlags {
    fn default() -> Self {
        Self::empty()
    }
}

// =============================================================================
// Type Descriptor
// =============================================================================

/// Definition-time description of a user type.
///
/// Immutable after construction: the static slot table cannot gain or lose
/// entries once the type exists, which is what makes the static fast path
/// safe to take without consulting any shared state.
pub struct TypeDescriptor {
    /// Type name, for diagnostics and error messages.
    name: Arc<str>,
    /// Unique id, allocated at definition.
    type_id: TypeId,
    /// Capability flags.
    flags: TypeFlags,
    /// Static slots: operation id → compiled-in implementation.
    statics: FxHashMap<OpId, OpFn>,
}

impl TypeDescriptor {
    /// Type name.
    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// This type's id.
    #[inline]
    pub fn type_id(&self) -> TypeId {
        self.type_id
    }

    /// Capability flags.
    #[inline]
    pub fn flags(&self) -> TypeFlags {
        self.flags
    }

    /// Compiled-in implementation of `op`, if the type declares one.
    ///
    /// The cheapest resolution path: a flag test plus one probe of a table
    /// the receiver already carries.
    #[inline]
    pub fn static_impl(&self, op: OpId) -> Option<&OpFn> {
        if self.flags.contains(TypeFlags::HAS_STATIC_IMPLS) {
            self.statics.get(&op)
        } else {
            None
        }
    }

    /// Whether the type declares a static slot for `op`.
    #[inline]
    pub fn has_static(&self, op: OpId) -> bool {
        self.static_impl(op).is_some()
    }
}

impl std::fmt::Debug for TypeDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TypeDescriptor")
            .field("name", &self.name)
            .field("type_id", &self.type_id)
            .field("flags", &self.flags)
            .field("static_slots", &self.statics.len())
            .finish()
    }
}

// =============================================================================
// Type Builder
// =============================================================================

/// Builder for [`TypeDescriptor`].
///
/// Static slots are declared here, at type definition, against an already
/// declared protocol:
///
/// ```ignore
/// let ty = TypeBuilder::new("RemoteStore")
///     .static_impl(&fs, "ls", op_fn(|recv, args| { /* ... */ }))?
///     .build(&types);
/// ```
pub struct TypeBuilder {
    name: Arc<str>,
    statics: FxHashMap<OpId, OpFn>,
    static_ops: Vec<Arc<str>>,
}

impl TypeBuilder {
    /// Start defining a type with the given name.
    pub fn new(name: impl Into<Arc<str>>) -> Self {
        Self {
            name: name.into(),
            statics: FxHashMap::default(),
            static_ops: Vec::new(),
        }
    }

    /// Declare a compiled-in implementation of `protocol`'s `operation`.
    ///
    /// Fails with [`ProtocolError::UnknownOperation`] if the protocol never
    /// declared that operation; the builder is consumed either way.
    pub fn static_impl(
        mut self,
        protocol: &Protocol,
        operation: &str,
        callable: OpFn,
    ) -> DispatchResult<Self> {
        let sig = protocol.op(operation).ok_or_else(|| ProtocolError::UnknownOperation {
            protocol: protocol.name().to_string(),
            operation: operation.to_string(),
        })?;
        self.statics.insert(sig.id(), callable);
        self.static_ops.push(sig.name_arc());
        Ok(self)
    }

    /// Finish the definition: allocate a [`TypeId`], freeze the slot table,
    /// and record the descriptor in `registry`.
    pub fn build(self, registry: &TypeRegistry) -> Arc<TypeDescriptor> {
        let mut flags = TypeFlags::empty();
        if !self.statics.is_empty() {
            flags |= TypeFlags::HAS_STATIC_IMPLS;
        }
        let descriptor = Arc::new(TypeDescriptor {
            name: self.name,
            type_id: registry.allocate_type_id(),
            flags,
            statics: self.statics,
        });
        tracing::debug!(
            type_name = %descriptor.name,
            type_id = descriptor.type_id.raw(),
            static_ops = ?self.static_ops,
            "type defined"
        );
        registry.register(descriptor.clone());
        descriptor
    }
}

// =============================================================================
// Type Registry
// =============================================================================

/// Registry of user-defined type descriptors.
///
/// Dispatch never reads this on the hot path — instances carry their own
/// descriptor — but introspection and diagnostics resolve ids to names here.
pub struct TypeRegistry {
    /// Map from TypeId to descriptor.
    types: RwLock<FxHashMap<TypeId, Arc<TypeDescriptor>>>,
    /// Counter for generating new TypeIds.
    next_id: AtomicU32,
}

impl TypeRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self {
            types: RwLock::new(FxHashMap::default()),
            next_id: AtomicU32::new(TypeId::FIRST_USER_TYPE),
        }
    }

    /// Allocate a new TypeId for a user-defined type.
    pub fn allocate_type_id(&self) -> TypeId {
        TypeId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Record a descriptor.
    pub fn register(&self, descriptor: Arc<TypeDescriptor>) {
        let mut types = self.types.write();
        types.insert(descriptor.type_id(), descriptor);
    }

    /// Look up a descriptor by id.
    #[inline]
    pub fn get(&self, type_id: TypeId) -> Option<Arc<TypeDescriptor>> {
        let types = self.types.read();
        types.get(&type_id).cloned()
    }

    /// Check if a type is registered.
    #[inline]
    pub fn contains(&self, type_id: TypeId) -> bool {
        let types = self.types.read();
        types.contains_key(&type_id)
    }

    /// Resolve a type id to a printable name.
    ///
    /// Builtin ids resolve without a registry entry; unregistered user ids
    /// render as `<type N>`.
    pub fn type_name(&self, type_id: TypeId) -> String {
        if let Some(name) = type_id.builtin_name() {
            return name.to_string();
        }
        match self.get(type_id) {
            Some(descriptor) => descriptor.name().to_string(),
            None => format!("<type {}>", type_id.raw()),
        }
    }

    /// Number of registered user types.
    pub fn len(&self) -> usize {
        let types = self.types.read();
        types.len()
    }

    /// Check if registry is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for TypeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Global Registry Access
// =============================================================================

/// Global type registry singleton.
static GLOBAL_TYPES: OnceLock<TypeRegistry> = OnceLock::new();

/// Get the process-wide type registry.
///
/// Initialized lazily on first access. Library code takes a `&TypeRegistry`
/// parameter instead of reaching for this, so tests can run against private
/// registries.
pub fn global_types() -> &'static TypeRegistry {
    GLOBAL_TYPES.get_or_init(TypeRegistry::new)
}
