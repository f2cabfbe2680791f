//! Per-operation dispatch cache.
//!
//! Each dispatching operation owns one [`DispatchCache`]: a type-keyed memo
//! of callables resolved on the cold path. The cache is an optimization
//! layer only — clearing it at any point must never change a dispatch
//! result, only its latency.
//!
//! # Invalidation
//!
//! The cache must be invalidated for a type whenever a new dynamic binding
//! is registered for that `(operation, type)` pair, since the later
//! registration changes which callable is correct. Invalidation is per exact
//! type key; there is no cascade.
//!
//! Staleness is version-based: every invalidation bumps the cache version,
//! and a cold resolution only lands via [`insert_if_current`] when the
//! version it snapshotted before the registry read is still current. A
//! registration that overlaps an in-flight cold resolution therefore either
//! beats the insert (version changed, insert dropped) or loses to it
//! (entry removed afterwards) — either way the next call re-resolves and
//! observes the new binding.
//!
//! [`insert_if_current`]: DispatchCache::insert_if_current
//!
//! # Thread Safety
//!
//! `RwLock` over the entry table for concurrent reads with exclusive writes;
//! hit/miss/invalidation counters are relaxed atomics. Two threads racing on
//! a cold miss may both insert; last-write-wins is fine because both resolved
//! against the same registry state.

use crate::protocol::OpId;
use crate::type_obj::TypeId;
use crate::value::OpFn;
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Type-keyed memo of resolved dynamic bindings for one operation.
pub struct DispatchCache {
    /// Operation this cache serves.
    op: OpId,
    /// Operation name, for diagnostics.
    op_name: Arc<str>,
    /// The entry table.
    entries: RwLock<FxHashMap<TypeId, OpFn>>,
    /// Cache hit counter.
    hits: AtomicU64,
    /// Cache miss counter.
    misses: AtomicU64,
    /// Invalidation counter (tracks binding replacements).
    invalidations: AtomicU64,
    /// Version, bumped on every invalidation; guards in-flight insertions.
    version: AtomicU64,
}

impl DispatchCache {
    /// Create an empty cache for the given operation.
    pub(crate) fn new(op: OpId, op_name: Arc<str>) -> Self {
        Self {
            op,
            op_name,
            entries: RwLock::new(FxHashMap::default()),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            invalidations: AtomicU64::new(0),
            version: AtomicU64::new(0),
        }
    }

    /// Operation this cache belongs to.
    #[inline]
    pub(crate) fn op_id(&self) -> OpId {
        self.op
    }

    /// Look up the cached callable for a type.
    ///
    /// Returns a clone of the `Arc`'d callable on hit so the caller can
    /// invoke it after the read lock is released.
    #[inline]
    pub fn get(&self, type_id: TypeId) -> Option<OpFn> {
        let entries = self.entries.read();
        let result = entries.get(&type_id).cloned();
        if result.is_some() {
            self.hits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
        }
        result
    }

    /// Check for an entry without touching the hit/miss counters.
    ///
    /// Introspection path; dispatch always goes through [`get`](Self::get).
    #[inline]
    pub(crate) fn contains(&self, type_id: TypeId) -> bool {
        self.entries.read().contains_key(&type_id)
    }

    /// Current cache version.
    ///
    /// The cold path snapshots this *before* its registry read; the insert
    /// is honored only while the version is unchanged.
    #[inline]
    pub(crate) fn version(&self) -> u64 {
        self.version.load(Ordering::Acquire)
    }

    /// Insert a resolved callable for a type, unless the cache was
    /// invalidated since `snapshot` was taken.
    ///
    /// Only the cold path calls this; the static fast path never touches
    /// the cache. Returns whether the entry landed. Dropping the insert is
    /// the safe side of the race: the slot stays empty and the next call
    /// re-resolves against the current registry state.
    pub(crate) fn insert_if_current(
        &self,
        type_id: TypeId,
        callable: OpFn,
        snapshot: u64,
    ) -> bool {
        let mut entries = self.entries.write();
        if self.version.load(Ordering::Acquire) != snapshot {
            return false;
        }
        entries.insert(type_id, callable);
        true
    }

    /// Drop the entry for one exact type.
    ///
    /// Called when a new binding is registered for `(op, type)`; the next
    /// invocation re-resolves instead of reusing the stale callable. The
    /// version bump happens under the write lock so an in-flight cold
    /// resolution that already read the old binding cannot land after us.
    pub(crate) fn invalidate_type(&self, type_id: TypeId) {
        let mut entries = self.entries.write();
        self.version.fetch_add(1, Ordering::Release);
        entries.remove(&type_id);
        self.invalidations.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(
            op = %self.op_name,
            type_id = type_id.raw(),
            "cache slot invalidated"
        );
    }

    /// Drop every entry.
    pub fn clear(&self) {
        let mut entries = self.entries.write();
        self.version.fetch_add(1, Ordering::Release);
        entries.clear();
        self.invalidations.fetch_add(1, Ordering::Relaxed);
    }

    /// Current cache size (number of entries).
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Check if cache is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Types currently cached, for tooling and debugging.
    pub fn snapshot(&self) -> Vec<TypeId> {
        let entries = self.entries.read();
        let mut types: Vec<TypeId> = entries.keys().copied().collect();
        types.sort();
        types
    }

    /// Cache statistics: (hits, misses, invalidations).
    pub fn stats(&self) -> (u64, u64, u64) {
        (
            self.hits.load(Ordering::Relaxed),
            self.misses.load(Ordering::Relaxed),
            self.invalidations.load(Ordering::Relaxed),
        )
    }

    /// Hit rate as a percentage; 0.0 before any lookup.
    pub fn hit_rate(&self) -> f64 {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;
        if total == 0 {
            0.0
        } else {
            (hits as f64 / total as f64) * 100.0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::{op_fn, Value};

    fn cache() -> DispatchCache {
        DispatchCache::new(OpId::from_raw(1), "ls".into())
    }

    fn constant(i: i64) -> OpFn {
        op_fn(move |_recv, _args| Ok(Value::Int(i)))
    }

    /// Insert against the current version; must always land.
    fn put(cache: &DispatchCache, type_id: TypeId, callable: OpFn) {
        assert!(cache.insert_if_current(type_id, callable, cache.version()));
    }

    #[test]
    fn test_miss_on_empty() {
        let cache = cache();
        assert!(cache.get(TypeId::INT).is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn test_hit_after_insert() {
        let cache = cache();
        put(&cache, TypeId::INT, constant(1));

        let f = cache.get(TypeId::INT).unwrap();
        assert_eq!(f(&Value::Unit, &[]).unwrap(), Value::Int(1));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_different_types_different_entries() {
        let cache = cache();
        put(&cache, TypeId::INT, constant(1));
        put(&cache, TypeId::STR, constant(2));

        let a = cache.get(TypeId::INT).unwrap()(&Value::Unit, &[]).unwrap();
        let b = cache.get(TypeId::STR).unwrap()(&Value::Unit, &[]).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_invalidate_exact_type_only() {
        let cache = cache();
        put(&cache, TypeId::INT, constant(1));
        put(&cache, TypeId::STR, constant(2));

        cache.invalidate_type(TypeId::INT);

        assert!(cache.get(TypeId::INT).is_none());
        assert!(cache.get(TypeId::STR).is_some());
        assert_eq!(cache.snapshot(), vec![TypeId::STR]);
    }

    #[test]
    fn test_last_write_wins() {
        let cache = cache();
        put(&cache, TypeId::INT, constant(1));
        put(&cache, TypeId::INT, constant(9));

        let f = cache.get(TypeId::INT).unwrap();
        assert_eq!(f(&Value::Unit, &[]).unwrap(), Value::Int(9));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_clear() {
        let cache = cache();
        put(&cache, TypeId::INT, constant(1));
        put(&cache, TypeId::STR, constant(2));
        assert!(!cache.is_empty());

        cache.clear();
        assert!(cache.is_empty());
    }

    #[test]
    fn test_stale_snapshot_insert_is_dropped() {
        let cache = cache();
        let snapshot = cache.version();

        // Invalidation between snapshot and insert wins.
        cache.invalidate_type(TypeId::INT);
        assert!(!cache.insert_if_current(TypeId::INT, constant(1), snapshot));
        assert!(cache.is_empty());

        // A fresh snapshot lands normally.
        put(&cache, TypeId::INT, constant(2));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_clear_bumps_version() {
        let cache = cache();
        let snapshot = cache.version();
        cache.clear();
        assert!(!cache.insert_if_current(TypeId::INT, constant(1), snapshot));
        assert!(cache.is_empty());
    }

    #[test]
    fn test_stats_and_hit_rate() {
        let cache = cache();
        assert_eq!(cache.stats(), (0, 0, 0));
        assert_eq!(cache.hit_rate(), 0.0);

        cache.get(TypeId::INT);
        let (hits, misses, _) = cache.stats();
        assert_eq!((hits, misses), (0, 1));

        put(&cache, TypeId::INT, constant(1));
        cache.get(TypeId::INT);
        let (hits, misses, _) = cache.stats();
        assert_eq!((hits, misses), (1, 1));
        assert!((cache.hit_rate() - 50.0).abs() < 0.1);

        cache.invalidate_type(TypeId::INT);
        let (_, _, invalidations) = cache.stats();
        assert_eq!(invalidations, 1);
    }
}
