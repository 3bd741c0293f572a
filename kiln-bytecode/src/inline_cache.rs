//! Per-call-site method caches

use kiln_core::{MethodFn, TypeKey};
use parking_lot::RwLock;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Receiver types remembered by a single call site
pub const MAX_CACHE_ENTRIES: usize = 4;

struct LookupEntry {
    receiver: TypeKey,
    method: MethodFn,
    hit_count: AtomicU64,
}

/// Small polymorphic inline cache
///
/// Maps receiver types to the method resolved for them. When full, the
/// least used entry is evicted.
#[derive(Default)]
pub struct InlineCache {
    entries: RwLock<Vec<LookupEntry>>,
}

impl InlineCache {
    /// Create an empty cache
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up a cached method
    ///
    /// Hits only take the read lock, so VMs sharing a code object do not
    /// serialize on a warm site.
    pub fn lookup(&self, receiver: TypeKey) -> Option<MethodFn> {
        let entries = self.entries.read();
        let entry = entries.iter().find(|e| e.receiver == receiver)?;
        entry.hit_count.fetch_add(1, Ordering::Relaxed);
        Some(entry.method.clone())
    }

    /// Remember the method resolved for `receiver`
    pub fn update(&self, receiver: TypeKey, method: MethodFn) {
        let mut entries = self.entries.write();
        if let Some(entry) = entries.iter_mut().find(|e| e.receiver == receiver) {
            entry.method = method;
            *entry.hit_count.get_mut() += 1;
            return;
        }
        // Counts the miss that resolved it, so the newest entry is not the first evicted
        let fresh = LookupEntry {
            receiver,
            method,
            hit_count: AtomicU64::new(1),
        };
        if entries.len() < MAX_CACHE_ENTRIES {
            entries.push(fresh);
        } else if let Some(min_idx) = entries
            .iter()
            .enumerate()
            .min_by_key(|(_, e)| e.hit_count.load(Ordering::Relaxed))
            .map(|(i, _)| i)
        {
            entries[min_idx] = fresh;
        }
    }

    /// Number of receiver types currently cached
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Whether nothing has been cached yet
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Forget every cached method
    pub fn clear(&self) {
        self.entries.write().clear();
    }
}

/// A method call site: the method name, its argument count and its cache
pub struct MethodSite {
    /// Method name
    pub name: Arc<str>,
    /// Number of arguments excluding the receiver
    pub arity: u32,
    /// Resolution cache
    pub cache: InlineCache,
}

impl MethodSite {
    /// Create a call site with an empty cache
    pub fn new(name: Arc<str>, arity: u32) -> Self {
        Self {
            name,
            arity,
            cache: InlineCache::new(),
        }
    }
}

impl fmt::Debug for MethodSite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MethodSite")
            .field("name", &self.name)
            .field("arity", &self.arity)
            .field("cached", &self.cache.len())
            .finish()
    }
}
