//! Dispatching operations: per-operation callables with tiered resolution.
//!
//! One [`DispatchOp`] exists per protocol operation. Invocation resolves
//! the receiver's implementation in strict order:
//!
//! 1. **Static slot** — compiled into the receiver's type descriptor;
//!    resolvable from the receiver alone. Never touches the cache: the
//!    static path is always preferred and always consistent, so a cache
//!    entry for it would be redundant and must never be consulted.
//! 2. **Dispatch cache** — type-keyed memo of prior cold resolutions.
//! 3. **Cold path** — registry lookup; on hit the cache is populated.
//! 4. **Default** — the protocol's declared fallback, if any; otherwise
//!    [`ProtocolError::NoImplementation`]. Failures are never cached.
//!
//! The caller cannot tell which tier resolved the call; only latency
//! differs.

use crate::cache::DispatchCache;
use crate::error::{DispatchResult, ProtocolError};
use crate::protocol::{Arity, OpSig, Protocol};
use crate::type_obj::TypeId;
use crate::value::Value;
use std::sync::Arc;

/// The callable object for one protocol operation.
///
/// Cheap to clone conceptually but deliberately not `Clone`: each instance
/// owns its cache, and the cache registers itself with the protocol for
/// invalidation. Obtain one via [`Protocol::operation`].
pub struct DispatchOp {
    /// The protocol this operation belongs to.
    protocol: Arc<Protocol>,
    /// This operation's signature.
    sig: OpSig,
    /// Type-keyed memo of cold resolutions.
    cache: Arc<DispatchCache>,
}

impl DispatchOp {
    pub(crate) fn new(protocol: Arc<Protocol>, sig: OpSig, cache: Arc<DispatchCache>) -> Self {
        Self {
            protocol,
            sig,
            cache,
        }
    }

    /// Operation name.
    #[inline]
    pub fn name(&self) -> &str {
        self.sig.name()
    }

    /// Declared arity family.
    #[inline]
    pub fn arity(&self) -> Arity {
        self.sig.arity()
    }

    /// The owning protocol.
    #[inline]
    pub fn protocol(&self) -> &Arc<Protocol> {
        &self.protocol
    }

    // -------------------------------------------------------------------------
    // Invocation
    // -------------------------------------------------------------------------

    /// Invoke this operation on `receiver` with `args`.
    ///
    /// Resolution order is static slot, then cache, then cold lookup, then
    /// default; see the module docs. Repeated calls with no intervening
    /// registration always run the same callable.
    pub fn invoke(&self, receiver: &Value, args: &[Value]) -> DispatchResult<Value> {
        if !self.sig.arity().accepts(args.len()) {
            return Err(ProtocolError::ArityMismatch {
                operation: self.sig.name().to_string(),
                expected: self.sig.arity(),
                actual: args.len(),
            });
        }

        // Static fast path: the receiver's own descriptor. No cache traffic.
        if let Some(descriptor) = receiver.descriptor() {
            if let Some(callable) = descriptor.static_impl(self.sig.id()) {
                return callable(receiver, args);
            }
        }

        let type_id = receiver.type_id();

        // Cache hit: reuse the previously resolved callable.
        if let Some(callable) = self.cache.get(type_id) {
            return callable(receiver, args);
        }

        // Cold path: consult the registry, then populate the cache. The
        // version snapshot is taken before the registry read; if a
        // registration invalidates this cache in between, the insert is
        // dropped and the next call re-resolves against the new binding.
        let version = self.cache.version();
        if let Some(callable) = self.protocol.lookup(self.sig.id(), type_id) {
            tracing::trace!(
                protocol = %self.protocol.name(),
                operation = %self.sig.name(),
                type_name = receiver.type_name(),
                "cold resolution cached"
            );
            self.cache.insert_if_current(type_id, callable.clone(), version);
            return callable(receiver, args);
        }

        // Declared default, if any. Failures never populate the cache.
        if let Some(callable) = self.protocol.default_for(self.sig.id()) {
            return callable(receiver, args);
        }

        Err(ProtocolError::NoImplementation {
            operation: self.sig.name().to_string(),
            type_name: receiver.type_name().to_string(),
        })
    }

    // -------------------------------------------------------------------------
    // Introspection (diagnostic only)
    // -------------------------------------------------------------------------

    /// Whether invoking on `receiver` would currently resolve.
    ///
    /// Checks every tier: static slot, cache, registry, default.
    pub fn resolves(&self, receiver: &Value) -> bool {
        if let Some(descriptor) = receiver.descriptor() {
            if descriptor.has_static(self.sig.id()) {
                return true;
            }
        }
        self.resolves_type(receiver.type_id())
    }

    /// Whether a bare type id would currently resolve.
    ///
    /// Static slots live on descriptors, not ids, so this covers only the
    /// cache, registry, and default tiers.
    pub fn resolves_type(&self, type_id: TypeId) -> bool {
        self.cache.contains(type_id)
            || self.protocol.has_binding(self.sig.id(), type_id)
            || self.protocol.has_default(self.sig.id())
    }

    /// Number of cached resolutions.
    pub fn cache_len(&self) -> usize {
        self.cache.len()
    }

    /// Types currently held in the cache.
    pub fn cache_snapshot(&self) -> Vec<TypeId> {
        self.cache.snapshot()
    }

    /// Cache statistics: (hits, misses, invalidations).
    pub fn cache_stats(&self) -> (u64, u64, u64) {
        self.cache.stats()
    }

    /// Drop every cached resolution.
    ///
    /// Dispatch results are unaffected; only latency changes.
    pub fn clear_cache(&self) {
        self.cache.clear();
    }
}

impl std::fmt::Debug for DispatchOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DispatchOp")
            .field("protocol", &self.protocol.name())
            .field("operation", &self.sig.name())
            .field("cached_types", &self.cache.len())
            .finish()
    }
}
