//! Protocol declaration and the binding registry.
//!
//! A [`Protocol`] is a named capability set: a fixed, ordered list of
//! operation signatures plus the evolving mapping from concrete types to
//! per-operation implementations. The signature set is frozen at
//! declaration; only *implementations* are added or replaced afterwards.
//!
//! # Binding Table
//!
//! Dynamic bindings live in a sharded concurrent map keyed by
//! `(operation, type)`. Registration is last-write-wins and, after the
//! table write is visible, invalidates the affected slot in every live
//! dispatch cache registered with the protocol — so a subsequent call is
//! guaranteed to observe the new binding.
//!
//! # Thread Safety
//!
//! `lookup` is a pure read and runs fully in parallel; registrations for
//! unrelated keys contend only on their shard. Data flows one way: from
//! this table into per-operation caches, never back.

use crate::cache::DispatchCache;
use crate::dispatch::DispatchOp;
use crate::error::{DispatchResult, ProtocolError};
use crate::type_obj::TypeId;
use crate::value::OpFn;
use dashmap::DashMap;
use parking_lot::RwLock;
use rustc_hash::{FxHashMap, FxHasher};
use smallvec::SmallVec;
use std::hash::BuildHasherDefault;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock, Weak};

/// DashMap with the Fx hasher used everywhere else in the crate.
type FxDashMap<K, V> = DashMap<K, V, BuildHasherDefault<FxHasher>>;

// =============================================================================
// Operation Identity
// =============================================================================

/// Global counter for allocating unique operation ids at declaration.
static NEXT_OP_ID: AtomicU32 = AtomicU32::new(1);

/// Allocate a new unique OpId for a declared operation.
fn allocate_op_id() -> OpId {
    OpId(NEXT_OP_ID.fetch_add(1, Ordering::Relaxed))
}

/// Stable identifier for one declared protocol operation.
///
/// Allocated once at declaration; static slot tables and binding tables key
/// on it so dispatch never compares operation names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OpId(u32);

impl OpId {
    /// Raw numeric id.
    #[inline]
    pub const fn raw(self) -> u32 {
        self.0
    }

    /// Construct from a raw id.
    #[inline]
    pub const fn from_raw(raw: u32) -> Self {
        OpId(raw)
    }
}

// =============================================================================
// Arity
// =============================================================================

/// Declared arity family of an operation (argument count, receiver excluded).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arity {
    /// Exactly `n` arguments.
    Exact(u8),
    /// `n` or more arguments.
    AtLeast(u8),
}

impl Arity {
    /// Whether `count` arguments satisfy this arity family.
    #[inline]
    pub fn accepts(self, count: usize) -> bool {
        match self {
            Arity::Exact(n) => count == n as usize,
            Arity::AtLeast(n) => count >= n as usize,
        }
    }
}

impl std::fmt::Display for Arity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Arity::Exact(1) => write!(f, "exactly 1 argument"),
            Arity::Exact(n) => write!(f, "exactly {} arguments", n),
            Arity::AtLeast(1) => write!(f, "at least 1 argument"),
            Arity::AtLeast(n) => write!(f, "at least {} arguments", n),
        }
    }
}

// =============================================================================
// Operation Signature
// =============================================================================

/// One declared operation: name plus arity family.
///
/// Fixed once the protocol is declared.
#[derive(Debug, Clone)]
pub struct OpSig {
    name: Arc<str>,
    id: OpId,
    arity: Arity,
}

impl OpSig {
    /// Operation name.
    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Shared handle to the operation name.
    #[inline]
    pub(crate) fn name_arc(&self) -> Arc<str> {
        self.name.clone()
    }

    /// Stable operation id.
    #[inline]
    pub fn id(&self) -> OpId {
        self.id
    }

    /// Declared arity family.
    #[inline]
    pub fn arity(&self) -> Arity {
        self.arity
    }
}

// =============================================================================
// Protocol
// =============================================================================

/// A named, open set of operation signatures with a dynamic binding table.
///
/// Created once by [`ProtocolRegistry::declare`]; lives for the process
/// lifetime and is only ever extended with implementations.
pub struct Protocol {
    /// Protocol name.
    name: Arc<str>,
    /// Documentation text; not semantically load-bearing.
    doc: Option<Arc<str>>,
    /// Declared operations, in declaration order. Frozen.
    ops: SmallVec<[OpSig; 4]>,
    /// Dynamic bindings: (operation, type) → callable.
    table: FxDashMap<(OpId, TypeId), OpFn>,
    /// Declared default implementations, last fallback of the cold path.
    defaults: RwLock<FxHashMap<OpId, OpFn>>,
    /// Live dispatch caches to notify on re-registration.
    caches: RwLock<Vec<Weak<DispatchCache>>>,
    /// Cold lookup counter; lets tests verify cache population.
    lookups: AtomicU64,
}

impl Protocol {
    fn new(name: Arc<str>, doc: Option<Arc<str>>, ops: SmallVec<[OpSig; 4]>) -> Self {
        Self {
            name,
            doc,
            ops,
            table: FxDashMap::default(),
            defaults: RwLock::new(FxHashMap::default()),
            caches: RwLock::new(Vec::new()),
            lookups: AtomicU64::new(0),
        }
    }

    /// Protocol name.
    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Documentation text, if declared with one.
    pub fn doc(&self) -> Option<&str> {
        self.doc.as_deref()
    }

    /// Declared operation signatures, in declaration order.
    pub fn ops(&self) -> &[OpSig] {
        &self.ops
    }

    /// Signature of the named operation, if declared.
    pub fn op(&self, name: &str) -> Option<&OpSig> {
        self.ops.iter().find(|sig| &*sig.name == name)
    }

    fn op_or_err(&self, name: &str) -> DispatchResult<&OpSig> {
        self.op(name).ok_or_else(|| ProtocolError::UnknownOperation {
            protocol: self.name.to_string(),
            operation: name.to_string(),
        })
    }

    /// Whether this protocol's declared shape matches `ops`.
    ///
    /// Shape is the ordered list of (name, arity) pairs; identical shape
    /// makes redeclaration idempotent.
    fn shape_matches(&self, ops: &[(&str, Arity)]) -> bool {
        self.ops.len() == ops.len()
            && self
                .ops
                .iter()
                .zip(ops)
                .all(|(sig, (name, arity))| &*sig.name == *name && sig.arity == *arity)
    }

    // -------------------------------------------------------------------------
    // Registration
    // -------------------------------------------------------------------------

    /// Register (or replace) the dynamic binding for `(operation, type)`.
    ///
    /// Last-write-wins. After the table write, the slot for `type_id` is
    /// invalidated in every live dispatch cache for that operation, so the
    /// next call re-resolves. Fails with
    /// [`ProtocolError::UnknownOperation`] for operations outside the
    /// declared set; the table is left unchanged.
    pub fn register_binding(
        &self,
        operation: &str,
        type_id: TypeId,
        callable: OpFn,
    ) -> DispatchResult<()> {
        let sig = self.op_or_err(operation)?;
        let op_id = sig.id();

        let replaced = self.table.insert((op_id, type_id), callable).is_some();
        tracing::debug!(
            protocol = %self.name,
            operation,
            type_id = type_id.raw(),
            replaced,
            "binding registered"
        );

        // Invalidation happens-after the table write is visible, and the
        // version bump it carries defeats any in-flight cold resolution
        // that read the old binding, so a subsequent call observes the new
        // one.
        self.invalidate_caches(op_id, type_id);
        Ok(())
    }

    /// Declare a default implementation for an operation.
    ///
    /// Invoked as the last fallback of the cold path when neither a static
    /// nor a dynamic binding exists for the receiver's type.
    pub fn set_default(&self, operation: &str, callable: OpFn) -> DispatchResult<()> {
        let op_id = self.op_or_err(operation)?.id();
        self.defaults.write().insert(op_id, callable);
        tracing::debug!(protocol = %self.name, operation, "default implementation set");
        Ok(())
    }

    /// Drop the stale slot for `(op, type)` in every live cache.
    ///
    /// Dead cache handles are pruned in passing.
    fn invalidate_caches(&self, op_id: OpId, type_id: TypeId) {
        let mut caches = self.caches.write();
        caches.retain(|weak| weak.strong_count() > 0);
        for weak in caches.iter() {
            if let Some(cache) = weak.upgrade() {
                if cache.op_id() == op_id {
                    cache.invalidate_type(type_id);
                }
            }
        }
    }

    // -------------------------------------------------------------------------
    // Lookup
    // -------------------------------------------------------------------------

    /// Look up the dynamic binding for `(op, type)`.
    ///
    /// Pure read, O(1) expected; never mutates the registry. `None` means
    /// no binding exists — not itself an error, but the signal for the
    /// caller to fall back to a default or raise a dispatch failure.
    pub fn lookup(&self, op: OpId, type_id: TypeId) -> Option<OpFn> {
        self.lookups.fetch_add(1, Ordering::Relaxed);
        self.table.get(&(op, type_id)).map(|entry| entry.value().clone())
    }

    /// Declared default for an operation, if any.
    pub(crate) fn default_for(&self, op: OpId) -> Option<OpFn> {
        self.defaults.read().get(&op).cloned()
    }

    /// Whether a dynamic binding exists for `(op, type)`.
    pub(crate) fn has_binding(&self, op: OpId, type_id: TypeId) -> bool {
        self.table.contains_key(&(op, type_id))
    }

    /// Whether a default is declared for `op`.
    pub(crate) fn has_default(&self, op: OpId) -> bool {
        self.defaults.read().contains_key(&op)
    }

    /// Number of cold lookups performed so far.
    pub fn lookup_count(&self) -> u64 {
        self.lookups.load(Ordering::Relaxed)
    }

    // -------------------------------------------------------------------------
    // Dispatching Operations
    // -------------------------------------------------------------------------

    /// Materialize the dispatching callable for one declared operation.
    ///
    /// Each returned [`DispatchOp`] owns a fresh empty cache, registered
    /// here so binding replacement can invalidate it.
    pub fn operation(self: &Arc<Self>, name: &str) -> DispatchResult<DispatchOp> {
        let sig = self.op_or_err(name)?.clone();
        let cache = Arc::new(DispatchCache::new(sig.id(), sig.name_arc()));
        // Prune dead handles here as well as on registration, so a workload
        // that only ever creates and drops operations stays bounded.
        let mut caches = self.caches.write();
        caches.retain(|weak| weak.strong_count() > 0);
        caches.push(Arc::downgrade(&cache));
        drop(caches);
        Ok(DispatchOp::new(self.clone(), sig, cache))
    }

    // -------------------------------------------------------------------------
    // Introspection
    // -------------------------------------------------------------------------

    /// Types with a dynamic binding for the named operation.
    ///
    /// Diagnostic surface; not load-bearing for dispatch.
    pub fn implementors(&self, operation: &str) -> DispatchResult<Vec<TypeId>> {
        let op_id = self.op_or_err(operation)?.id();
        let mut types: Vec<TypeId> = self
            .table
            .iter()
            .filter(|entry| entry.key().0 == op_id)
            .map(|entry| entry.key().1)
            .collect();
        types.sort();
        Ok(types)
    }
}

impl std::fmt::Debug for Protocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Protocol")
            .field("name", &self.name)
            .field("ops", &self.ops.iter().map(|s| s.name()).collect::<Vec<_>>())
            .field("bindings", &self.table.len())
            .finish()
    }
}

// =============================================================================
// Protocol Registry
// =============================================================================

/// Registry of declared protocols, keyed by name.
///
/// Declaration is create-once: a protocol lives for the process lifetime
/// and is never destroyed, only extended with bindings.
pub struct ProtocolRegistry {
    protocols: RwLock<FxHashMap<Arc<str>, Arc<Protocol>>>,
}

impl ProtocolRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self {
            protocols: RwLock::new(FxHashMap::default()),
        }
    }

    /// Declare a protocol: a name plus its ordered operation signatures.
    ///
    /// Idempotent when redeclared with an identical shape (the existing
    /// protocol is returned, bindings intact); fails with
    /// [`ProtocolError::DuplicateProtocol`] when the shape differs.
    pub fn declare(&self, name: &str, ops: &[(&str, Arity)]) -> DispatchResult<Arc<Protocol>> {
        self.declare_inner(name, None, ops)
    }

    /// [`declare`](Self::declare) with documentation text attached.
    pub fn declare_with_doc(
        &self,
        name: &str,
        doc: &str,
        ops: &[(&str, Arity)],
    ) -> DispatchResult<Arc<Protocol>> {
        self.declare_inner(name, Some(doc), ops)
    }

    fn declare_inner(
        &self,
        name: &str,
        doc: Option<&str>,
        ops: &[(&str, Arity)],
    ) -> DispatchResult<Arc<Protocol>> {
        // Write lock across check-and-insert so concurrent declarations of
        // the same name cannot race past each other.
        let mut protocols = self.protocols.write();
        if let Some(existing) = protocols.get(name) {
            return if existing.shape_matches(ops) {
                Ok(existing.clone())
            } else {
                Err(ProtocolError::DuplicateProtocol {
                    name: name.to_string(),
                })
            };
        }

        let sigs: SmallVec<[OpSig; 4]> = ops
            .iter()
            .map(|(op_name, arity)| OpSig {
                name: Arc::from(*op_name),
                id: allocate_op_id(),
                arity: *arity,
            })
            .collect();
        let name: Arc<str> = Arc::from(name);
        let protocol = Arc::new(Protocol::new(
            name.clone(),
            doc.map(Arc::from),
            sigs,
        ));
        tracing::debug!(
            protocol = %name,
            ops = protocol.ops.len(),
            "protocol declared"
        );
        protocols.insert(name, protocol.clone());
        Ok(protocol)
    }

    /// Look up a declared protocol by name.
    pub fn get(&self, name: &str) -> Option<Arc<Protocol>> {
        self.protocols.read().get(name).cloned()
    }

    /// Number of declared protocols.
    pub fn len(&self) -> usize {
        self.protocols.read().len()
    }

    /// Check if registry is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for ProtocolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Global Registry Access
// =============================================================================

/// Global protocol registry singleton.
static GLOBAL_PROTOCOLS: OnceLock<ProtocolRegistry> = OnceLock::new();

/// Get the process-wide protocol registry.
///
/// Initialized lazily on first declaration; never torn down. All behavior
/// lives on [`ProtocolRegistry`] instances, so tests construct private
/// registries instead of going through this.
pub fn global_protocols() -> &'static ProtocolRegistry {
    GLOBAL_PROTOCOLS.get_or_init(ProtocolRegistry::new)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::{op_fn, Value};

    fn fs_ops() -> Vec<(&'static str, Arity)> {
        vec![("ls", Arity::Exact(1)), ("stat", Arity::Exact(1))]
    }

    fn constant(i: i64) -> OpFn {
        op_fn(move |_recv, _args| Ok(Value::Int(i)))
    }

    #[test]
    fn test_declare_and_get() {
        let registry = ProtocolRegistry::new();
        let fs = registry.declare("FileSystem", &fs_ops()).unwrap();
        assert_eq!(fs.name(), "FileSystem");
        assert_eq!(fs.ops().len(), 2);
        assert!(registry.get("FileSystem").is_some());
        assert!(registry.get("Printable").is_none());
    }

    #[test]
    fn test_redeclare_identical_is_idempotent() {
        let registry = ProtocolRegistry::new();
        let a = registry.declare("FileSystem", &fs_ops()).unwrap();
        a.register_binding("ls", TypeId::INT, constant(1)).unwrap();

        let b = registry.declare("FileSystem", &fs_ops()).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        // Bindings survive redeclaration.
        assert!(b.has_binding(b.op("ls").unwrap().id(), TypeId::INT));
    }

    #[test]
    fn test_redeclare_different_shape_fails() {
        let registry = ProtocolRegistry::new();
        registry.declare("FileSystem", &fs_ops()).unwrap();

        // Different arity.
        let err = registry
            .declare("FileSystem", &[("ls", Arity::Exact(2)), ("stat", Arity::Exact(1))])
            .unwrap_err();
        assert!(matches!(err, ProtocolError::DuplicateProtocol { .. }));

        // Different operation set.
        let err = registry
            .declare("FileSystem", &[("ls", Arity::Exact(1))])
            .unwrap_err();
        assert!(matches!(err, ProtocolError::DuplicateProtocol { .. }));
    }

    #[test]
    fn test_register_unknown_operation_leaves_table_unchanged() {
        let registry = ProtocolRegistry::new();
        let fs = registry.declare("FileSystem", &fs_ops()).unwrap();

        let err = fs
            .register_binding("chmod", TypeId::INT, constant(1))
            .unwrap_err();
        assert!(matches!(err, ProtocolError::UnknownOperation { .. }));
        assert!(fs.implementors("ls").unwrap().is_empty());
        assert!(fs.implementors("stat").unwrap().is_empty());
    }

    #[test]
    fn test_lookup_counts_and_last_write_wins() {
        let registry = ProtocolRegistry::new();
        let fs = registry.declare("FileSystem", &fs_ops()).unwrap();
        let ls = fs.op("ls").unwrap().id();

        assert!(fs.lookup(ls, TypeId::INT).is_none());
        assert_eq!(fs.lookup_count(), 1);

        fs.register_binding("ls", TypeId::INT, constant(1)).unwrap();
        fs.register_binding("ls", TypeId::INT, constant(9)).unwrap();

        let f = fs.lookup(ls, TypeId::INT).unwrap();
        assert_eq!(f(&Value::Unit, &[]).unwrap(), Value::Int(9));
        assert_eq!(fs.lookup_count(), 2);
    }

    #[test]
    fn test_implementors() {
        let registry = ProtocolRegistry::new();
        let fs = registry.declare("FileSystem", &fs_ops()).unwrap();
        fs.register_binding("ls", TypeId::INT, constant(1)).unwrap();
        fs.register_binding("ls", TypeId::STR, constant(2)).unwrap();
        fs.register_binding("stat", TypeId::MAP, constant(3)).unwrap();

        assert_eq!(fs.implementors("ls").unwrap(), vec![TypeId::INT, TypeId::STR]);
        assert_eq!(fs.implementors("stat").unwrap(), vec![TypeId::MAP]);
    }

    #[test]
    fn test_dead_cache_handles_pruned() {
        let registry = ProtocolRegistry::new();
        let fs = registry.declare("FileSystem", &fs_ops()).unwrap();

        // Repeatedly creating and dropping operations must not accumulate
        // dead weak handles.
        for _ in 0..64 {
            let _ = fs.operation("ls").unwrap();
        }
        let live = fs.operation("ls").unwrap();
        assert_eq!(fs.caches.read().len(), 1);

        // Registration prunes too.
        drop(live);
        fs.register_binding("ls", TypeId::INT, constant(1)).unwrap();
        assert!(fs.caches.read().is_empty());
    }

    #[test]
    fn test_arity_families() {
        assert!(Arity::Exact(1).accepts(1));
        assert!(!Arity::Exact(1).accepts(0));
        assert!(Arity::AtLeast(1).accepts(3));
        assert!(!Arity::AtLeast(2).accepts(1));
    }

    #[test]
    fn test_doc_text() {
        let registry = ProtocolRegistry::new();
        let fs = registry
            .declare_with_doc("FileSystem", "Hierarchical path listing.", &fs_ops())
            .unwrap();
        assert_eq!(fs.doc(), Some("Hierarchical path listing."));
    }
}
