//! Stub managers, stublets, and method tables
//!
//! One stub manager per exported object; one stublet per interface it
//! exposes. A stublet routes inbound calls through an explicit array of
//! handler functions indexed by method number — the method number is
//! range-checked against the table, never trusted as an index.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use bytes::Bytes;

use crate::types::{CallHeader, Iid, Ipid, Result};

/// Future returned by a method handler.
pub type CallFuture = Pin<Box<dyn Future<Output = Result<Bytes>> + Send>>;

/// One entry of a dispatch table. Receives the decoded call context and
/// the argument bytes that follow the frame header.
pub type MethodHandler = Arc<dyn Fn(CallContext, Bytes) -> CallFuture + Send + Sync>;

/// Context handed to every dispatched method.
#[derive(Clone, Debug)]
pub struct CallContext {
    pub header: CallHeader,
    pub ipid: Ipid,
    pub opnum: u16,
}

/// An interface's dispatch surface: handlers indexed by method number.
///
/// The `Arc<MethodTable>` handed to `add_interface` is the runtime analog
/// of an interface pointer: its pointer identity feeds IPID derivation, so
/// an object must hand out the *same* `Arc` every time it is asked for the
/// same interface.
pub struct MethodTable {
    methods: Vec<MethodHandler>,
}

impl MethodTable {
    pub fn new() -> Self {
        Self {
            methods: Vec::new(),
        }
    }

    /// Builder-style: append the handler for the next method number.
    pub fn method<F>(mut self, handler: F) -> Self
    where
        F: Fn(CallContext, Bytes) -> CallFuture + Send + Sync + 'static,
    {
        self.methods.push(Arc::new(handler));
        self
    }

    pub fn len(&self) -> usize {
        self.methods.len()
    }

    pub fn is_empty(&self) -> bool {
        self.methods.is_empty()
    }

    pub fn get(&self, opnum: u16) -> Option<MethodHandler> {
        self.methods.get(opnum as usize).cloned()
    }
}

impl Default for MethodTable {
    fn default() -> Self {
        Self::new()
    }
}

/// Behavior contract for an object that can be exported.
///
/// The coordinator queries each requested interface independently through
/// [`interface_table`](Self::interface_table); returning `None` fails that
/// one interface without affecting its siblings.
pub trait ServerObject: Send + Sync {
    /// Interfaces this object is willing to expose.
    fn interfaces(&self) -> Vec<Iid>;

    /// The dispatch table for one interface, or `None` if unsupported.
    /// Must return the same `Arc` for the same IID on every call.
    fn interface_table(&self, iid: &Iid) -> Option<Arc<MethodTable>>;
}

/// Pre-built interface map for [`ServerObject`] implementations.
///
/// Building the map once up front keeps table pointer identity stable
/// across calls, which the IPID derivation depends on.
pub struct InterfaceSet {
    tables: HashMap<Iid, Arc<MethodTable>>,
}

impl InterfaceSet {
    pub fn new() -> Self {
        Self {
            tables: HashMap::new(),
        }
    }

    pub fn insert(&mut self, iid: Iid, table: MethodTable) {
        self.tables.insert(iid, Arc::new(table));
    }

    pub fn iids(&self) -> Vec<Iid> {
        self.tables.keys().copied().collect()
    }

    pub fn get(&self, iid: &Iid) -> Option<Arc<MethodTable>> {
        self.tables.get(iid).cloned()
    }
}

impl Default for InterfaceSet {
    fn default() -> Self {
        Self::new()
    }
}

/// Server-side state for one exposed interface of one object.
pub struct Stublet {
    pub ipid: Ipid,
    /// IID the interface is currently exposed as. `Iid::BASE` marks a bare
    /// registration whose dispatch surface is not yet unlocked.
    pub iid: Iid,
    pub table: Arc<MethodTable>,
    /// Remote references held against this interface.
    pub remote_refs: u32,
}

impl Stublet {
    pub fn new(ipid: Ipid, iid: Iid, table: Arc<MethodTable>, remote_refs: u32) -> Self {
        Self {
            ipid,
            iid,
            table,
            remote_refs,
        }
    }

    /// A bare stublet was registered under the base identity interface
    /// only; it routes no methods until upgraded.
    pub fn is_bare(&self) -> bool {
        self.iid.is_base()
    }

    /// Methods reachable through this stublet.
    pub fn method_count(&self) -> usize {
        if self.is_bare() {
            0
        } else {
            self.table.len()
        }
    }
}

/// Per-object dispatch state: the stublets keyed by IPID with a parallel
/// IID lookup, plus the single strong reference to the object itself.
pub struct StubManager {
    pub object: Arc<dyn ServerObject>,
    stublets: HashMap<Ipid, Stublet>,
    by_iid: HashMap<Iid, Ipid>,
}

impl StubManager {
    pub fn new(object: Arc<dyn ServerObject>) -> Self {
        Self {
            object,
            stublets: HashMap::new(),
            by_iid: HashMap::new(),
        }
    }

    pub fn stublet(&self, ipid: &Ipid) -> Option<&Stublet> {
        self.stublets.get(ipid)
    }

    pub fn stublet_mut(&mut self, ipid: &Ipid) -> Option<&mut Stublet> {
        self.stublets.get_mut(ipid)
    }

    pub fn ipid_for_iid(&self, iid: &Iid) -> Option<Ipid> {
        self.by_iid.get(iid).copied()
    }

    pub fn ipids(&self) -> Vec<Ipid> {
        self.stublets.keys().copied().collect()
    }

    /// Insert a fresh stublet or fold `refs` into the existing one. An
    /// existing bare stublet upgrades in place when re-registered under a
    /// concrete IID, carrying its accumulated count forward.
    pub fn add_stublet(
        &mut self,
        ipid: Ipid,
        iid: Iid,
        table: Arc<MethodTable>,
        refs: u32,
    ) -> &Stublet {
        match self.stublets.entry(ipid) {
            std::collections::hash_map::Entry::Occupied(mut occupied) => {
                let stublet = occupied.get_mut();
                stublet.remote_refs = stublet.remote_refs.saturating_add(refs);
                if stublet.is_bare() && !iid.is_base() {
                    self.by_iid.remove(&stublet.iid);
                    stublet.iid = iid;
                    stublet.table = table;
                    self.by_iid.insert(iid, ipid);
                }
                occupied.into_mut()
            }
            std::collections::hash_map::Entry::Vacant(vacant) => {
                self.by_iid.insert(iid, ipid);
                vacant.insert(Stublet::new(ipid, iid, table, refs))
            }
        }
    }

    /// Sum of every stublet's remote count; the manager lives while this
    /// is non-zero.
    pub fn total_remote_refs(&self) -> u64 {
        self.stublets.values().map(|s| u64::from(s.remote_refs)).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Oid;

    fn noop_table(methods: usize) -> MethodTable {
        let mut table = MethodTable::new();
        for _ in 0..methods {
            table = table.method(|_ctx, args| Box::pin(async move { Ok(args) }));
        }
        table
    }

    struct Fixture;

    impl ServerObject for Fixture {
        fn interfaces(&self) -> Vec<Iid> {
            vec![]
        }
        fn interface_table(&self, _iid: &Iid) -> Option<Arc<MethodTable>> {
            None
        }
    }

    #[test]
    fn test_method_table_range() {
        let table = noop_table(3);
        assert!(table.get(0).is_some());
        assert!(table.get(2).is_some());
        assert!(table.get(3).is_none());
    }

    #[test]
    fn test_bare_stublet_upgrade_carries_refs() {
        let mut manager = StubManager::new(Arc::new(Fixture));
        let table = Arc::new(noop_table(2));
        let oid = Oid::new(9);
        let ipid = Ipid::derive(Arc::as_ptr(&table) as *const () as usize as u64, oid);

        manager.add_stublet(ipid, Iid::BASE, table.clone(), 3);
        assert!(manager.stublet(&ipid).unwrap().is_bare());
        assert_eq!(manager.stublet(&ipid).unwrap().method_count(), 0);

        let concrete = Iid::from_u128(0x77);
        manager.add_stublet(ipid, concrete, table, 2);
        let stublet = manager.stublet(&ipid).unwrap();
        assert!(!stublet.is_bare());
        assert_eq!(stublet.remote_refs, 5);
        assert_eq!(stublet.method_count(), 2);
        assert_eq!(manager.ipid_for_iid(&concrete), Some(ipid));
        assert_eq!(manager.ipid_for_iid(&Iid::BASE), None);
    }

    #[test]
    fn test_total_refs_aggregates_stublets() {
        let mut manager = StubManager::new(Arc::new(Fixture));
        let oid = Oid::new(4);
        let t1 = Arc::new(noop_table(1));
        let t2 = Arc::new(noop_table(1));
        let ipid1 = Ipid::derive(Arc::as_ptr(&t1) as *const () as usize as u64, oid);
        let ipid2 = Ipid::derive(Arc::as_ptr(&t2) as *const () as usize as u64, oid);
        manager.add_stublet(ipid1, Iid::from_u128(1), t1, 3);
        manager.add_stublet(ipid2, Iid::from_u128(2), t2, 4);
        assert_eq!(manager.total_remote_refs(), 7);
    }
}
