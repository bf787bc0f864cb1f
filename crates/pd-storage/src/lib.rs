//! Session storage namespaces and their aliases.
//!
//! A namespace identifies the `sessionStorage` area a browsing session reads
//! and writes. Prerenders never write into the creator's namespace directly:
//! they receive an alias that shares the parent's identity for matching
//! purposes while logging which render processes touched it, so the two can
//! be reconciled when the prerender is swapped in.

use parking_lot::Mutex;
use pd_core::ChildId;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::sync::atomic::AtomicI64;
use std::sync::atomic::Ordering;

/// Identifier of a session storage namespace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NamespaceId(pub i64);

/// A session storage namespace shared between browsing sessions.
#[derive(Debug)]
pub struct SessionStorageNamespace {
    id: NamespaceId,
    alias_of: Option<NamespaceId>,
    allocator: Arc<NamespaceAllocator>,
    transaction_log: Mutex<BTreeSet<ChildId>>,
}

impl SessionStorageNamespace {
    pub fn id(&self) -> NamespaceId {
        self.id
    }

    /// The namespace this one aliases, if it was created by [`Self::create_alias`].
    pub fn alias_of(&self) -> Option<NamespaceId> {
        self.alias_of
    }

    /// Creates an alias namespace backed by the same storage.
    pub fn create_alias(&self) -> Arc<SessionStorageNamespace> {
        Arc::new(SessionStorageNamespace {
            id: self.allocator.next_id(),
            alias_of: Some(self.alias_of.unwrap_or(self.id)),
            allocator: Arc::clone(&self.allocator),
            transaction_log: Mutex::new(BTreeSet::new()),
        })
    }

    pub fn add_transaction_log_process_id(&self, child_id: ChildId) {
        self.transaction_log.lock().insert(child_id);
    }

    pub fn remove_transaction_log_process_id(&self, child_id: ChildId) {
        self.transaction_log.lock().remove(&child_id);
    }

    pub fn is_logging_transactions_for(&self, child_id: ChildId) -> bool {
        self.transaction_log.lock().contains(&child_id)
    }
}

static NEXT_NAMESPACE_ID: AtomicI64 = AtomicI64::new(1);

/// Hands out namespaces whose identifiers are unique across the process,
/// whichever allocator created them.
#[derive(Debug, Default)]
pub struct NamespaceAllocator {
    _private: (),
}

impl NamespaceAllocator {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Creates a fresh top-level namespace.
    pub fn create(self: &Arc<Self>) -> Arc<SessionStorageNamespace> {
        Arc::new(SessionStorageNamespace {
            id: self.next_id(),
            alias_of: None,
            allocator: Arc::clone(self),
            transaction_log: Mutex::new(BTreeSet::new()),
        })
    }

    fn next_id(&self) -> NamespaceId {
        NamespaceId(NEXT_NAMESPACE_ID.fetch_add(1, Ordering::Relaxed))
    }
}

#[cfg(test)]
mod tests {
    use super::NamespaceAllocator;
    use pd_core::ChildId;

    #[test]
    fn namespaces_get_distinct_ids() {
        let allocator = NamespaceAllocator::new();
        let first = allocator.create();
        let second = allocator.create();
        assert_ne!(first.id(), second.id());
        assert!(second.id() > first.id());
        assert_eq!(first.alias_of(), None);
    }

    #[test]
    fn separate_allocators_never_share_ids() {
        let tab_a = NamespaceAllocator::new().create();
        let tab_b = NamespaceAllocator::new().create();
        let alias = tab_a.create_alias();
        assert_ne!(tab_a.id(), tab_b.id());
        assert_ne!(alias.id(), tab_b.id());
        assert_ne!(alias.alias_of(), Some(tab_b.id()));
    }

    #[test]
    fn alias_points_at_root_namespace() {
        let allocator = NamespaceAllocator::new();
        let root = allocator.create();
        let alias = root.create_alias();
        let nested = alias.create_alias();
        assert_ne!(alias.id(), root.id());
        assert_eq!(alias.alias_of(), Some(root.id()));
        assert_eq!(nested.alias_of(), Some(root.id()));
    }

    #[test]
    fn transaction_log_tracks_process_ids() {
        let allocator = NamespaceAllocator::new();
        let alias = allocator.create().create_alias();
        alias.add_transaction_log_process_id(ChildId(4));
        assert!(alias.is_logging_transactions_for(ChildId(4)));
        alias.remove_transaction_log_process_id(ChildId(4));
        assert!(!alias.is_logging_transactions_for(ChildId(4)));
    }
}
