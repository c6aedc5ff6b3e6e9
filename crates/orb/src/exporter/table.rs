//! Export table
//!
//! The per-process record of every object exposed to remote callers. One
//! mutex guards the whole table; every operation is a single lookup+mutate
//! critical section and nothing is held across an await.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::types::{Clsid, Iid, Ipid, Oid, OidAllocator, OrbError, Result};

use super::stub::{MethodHandler, MethodTable, ServerObject, StubManager};

/// One exported object.
pub struct ObjectEntry {
    pub oid: Oid,
    pub clsid: Clsid,
    pub manager: StubManager,
    /// Lease countdown; reset to the full timeout by every ping that
    /// names this OID, decremented by the sweeper tick.
    pub lease_remaining: Duration,
    /// Entries flagged here outlive any ping silence.
    pub never_expires: bool,
    ptr_key: usize,
}

struct TableInner {
    entries: HashMap<Oid, ObjectEntry>,
    /// Dedup key: object pointer identity → its OID.
    by_ptr: HashMap<usize, Oid>,
    /// Dispatch routing: IPID → owning OID.
    by_ipid: HashMap<Ipid, Oid>,
}

/// Thread-safe table of exported objects.
pub struct ObjectTable {
    inner: Mutex<TableInner>,
    /// Full lease granted on export and on every ping.
    lease_timeout: Duration,
}

fn object_ptr_key(object: &Arc<dyn ServerObject>) -> usize {
    Arc::as_ptr(object) as *const () as usize
}

fn table_ptr_key(table: &Arc<MethodTable>) -> u64 {
    Arc::as_ptr(table) as *const () as usize as u64
}

impl ObjectTable {
    pub fn new(lease_timeout: Duration) -> Self {
        Self {
            inner: Mutex::new(TableInner {
                entries: HashMap::new(),
                by_ptr: HashMap::new(),
                by_ipid: HashMap::new(),
            }),
            lease_timeout,
        }
    }

    pub fn lease_timeout(&self) -> Duration {
        self.lease_timeout
    }

    /// Register an object, allocating its OID on first export. Repeat
    /// registrations of the same underlying object return the existing
    /// entry's OID.
    pub fn register(
        &self,
        object: Arc<dyn ServerObject>,
        clsid: Clsid,
        oids: &OidAllocator,
    ) -> Oid {
        let key = object_ptr_key(&object);
        let mut inner = self.inner.lock().unwrap();
        if let Some(existing) = inner.by_ptr.get(&key) {
            return *existing;
        }
        let oid = oids.allocate();
        inner.by_ptr.insert(key, oid);
        inner.entries.insert(
            oid,
            ObjectEntry {
                oid,
                clsid,
                manager: StubManager::new(object),
                lease_remaining: self.lease_timeout,
                never_expires: false,
                ptr_key: key,
            },
        );
        tracing::debug!(%oid, %clsid, "object registered");
        oid
    }

    /// Expose one interface of a registered object. The IPID derives from
    /// the table's pointer identity and the OID, so re-adding the same
    /// interface pointer returns the same IPID and folds the new
    /// references into the existing stublet.
    pub fn add_interface(
        &self,
        oid: Oid,
        iid: Iid,
        table: Arc<MethodTable>,
        refs: u32,
    ) -> Result<Ipid> {
        let ipid = Ipid::derive(table_ptr_key(&table), oid);
        let mut inner = self.inner.lock().unwrap();
        let entry = inner
            .entries
            .get_mut(&oid)
            .ok_or(OrbError::ObjectNotFound(oid))?;
        entry.manager.add_stublet(ipid, iid, table, refs);
        inner.by_ipid.insert(ipid, oid);
        Ok(ipid)
    }

    /// Resolve a dispatch target: the stublet's table (the strong
    /// interface reference that keeps the object alive through the call)
    /// and the handler for `opnum`.
    pub fn dispatch(&self, ipid: Ipid, opnum: u16) -> Result<(Arc<MethodTable>, MethodHandler)> {
        let inner = self.inner.lock().unwrap();
        let oid = *inner
            .by_ipid
            .get(&ipid)
            .ok_or(OrbError::InterfaceNotFound(ipid))?;
        let entry = inner
            .entries
            .get(&oid)
            .ok_or(OrbError::InterfaceNotFound(ipid))?;
        let stublet = entry
            .manager
            .stublet(&ipid)
            .ok_or(OrbError::InterfaceNotFound(ipid))?;
        let count = stublet.method_count();
        let handler = if (opnum as usize) < count {
            stublet.table.get(opnum)
        } else {
            None
        };
        match handler {
            Some(handler) => Ok((stublet.table.clone(), handler)),
            None => Err(OrbError::MethodOutOfRange { opnum, count }),
        }
    }

    /// Add remote references to one interface; returns the object's new
    /// aggregate count.
    pub fn add_ref(&self, ipid: Ipid, count: u32) -> Result<u64> {
        let mut inner = self.inner.lock().unwrap();
        let oid = *inner
            .by_ipid
            .get(&ipid)
            .ok_or(OrbError::InterfaceNotFound(ipid))?;
        let entry = inner
            .entries
            .get_mut(&oid)
            .ok_or(OrbError::InterfaceNotFound(ipid))?;
        let stublet = entry
            .manager
            .stublet_mut(&ipid)
            .ok_or(OrbError::InterfaceNotFound(ipid))?;
        stublet.remote_refs = stublet.remote_refs.saturating_add(count);
        Ok(entry.manager.total_remote_refs())
    }

    /// Release remote references from one interface; returns the object's
    /// remaining aggregate count. The release that drives the aggregate to
    /// zero destroys the entry — exactly that one, exactly once.
    pub fn release(&self, ipid: Ipid, count: u32) -> Result<u64> {
        let mut inner = self.inner.lock().unwrap();
        let oid = *inner
            .by_ipid
            .get(&ipid)
            .ok_or(OrbError::InterfaceNotFound(ipid))?;
        let entry = inner
            .entries
            .get_mut(&oid)
            .ok_or(OrbError::InterfaceNotFound(ipid))?;
        let stublet = entry
            .manager
            .stublet_mut(&ipid)
            .ok_or(OrbError::InterfaceNotFound(ipid))?;
        stublet.remote_refs = stublet.remote_refs.saturating_sub(count);
        let remaining = entry.manager.total_remote_refs();
        if remaining == 0 {
            Self::destroy_locked(&mut inner, oid);
            tracing::debug!(%oid, "all remote references released, object unregistered");
        }
        Ok(remaining)
    }

    /// Find the IPID an interface is already exposed under, if any.
    pub fn find_by_iid(&self, oid: Oid, iid: &Iid) -> Option<Ipid> {
        let inner = self.inner.lock().unwrap();
        inner.entries.get(&oid)?.manager.ipid_for_iid(iid)
    }

    /// The OID an IPID routes to.
    pub fn oid_of(&self, ipid: Ipid) -> Result<Oid> {
        let inner = self.inner.lock().unwrap();
        inner
            .by_ipid
            .get(&ipid)
            .copied()
            .ok_or(OrbError::InterfaceNotFound(ipid))
    }

    /// Query one interface anchored at a known IPID: reuse the exposed
    /// stublet or pull a fresh table from the object. Fails fast with
    /// no-such-interface and no side effects when the object refuses.
    pub fn query_interface(&self, anchor: Ipid, iid: Iid, refs: u32) -> Result<(Oid, Ipid)> {
        let mut inner = self.inner.lock().unwrap();
        let oid = *inner
            .by_ipid
            .get(&anchor)
            .ok_or(OrbError::InterfaceNotFound(anchor))?;
        let entry = inner
            .entries
            .get_mut(&oid)
            .ok_or(OrbError::InterfaceNotFound(anchor))?;

        if let Some(existing) = entry.manager.ipid_for_iid(&iid) {
            if let Some(stublet) = entry.manager.stublet_mut(&existing) {
                stublet.remote_refs = stublet.remote_refs.saturating_add(refs);
            }
            return Ok((oid, existing));
        }

        let table = entry
            .manager
            .object
            .interface_table(&iid)
            .ok_or(OrbError::NoSuchInterface(iid))?;
        let ipid = Ipid::derive(table_ptr_key(&table), oid);
        entry.manager.add_stublet(ipid, iid, table, refs);
        inner.by_ipid.insert(ipid, oid);
        Ok((oid, ipid))
    }

    /// Drop an entry outright, remote references notwithstanding.
    pub fn unregister(&self, oid: Oid) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        if !inner.entries.contains_key(&oid) {
            return Err(OrbError::ObjectNotFound(oid));
        }
        Self::destroy_locked(&mut inner, oid);
        Ok(())
    }

    /// Reset an object's lease to the full timeout.
    pub fn touch(&self, oid: Oid) -> bool {
        let mut inner = self.inner.lock().unwrap();
        match inner.entries.get_mut(&oid) {
            Some(entry) => {
                entry.lease_remaining = self.lease_timeout;
                true
            }
            None => false,
        }
    }

    /// Exempt or re-enrol an object in lease expiry.
    pub fn set_never_expires(&self, oid: Oid, flag: bool) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        let entry = inner
            .entries
            .get_mut(&oid)
            .ok_or(OrbError::ObjectNotFound(oid))?;
        entry.never_expires = flag;
        Ok(())
    }

    /// Advance every lease countdown by `elapsed`; entries that reach
    /// zero (and are not pinned) are destroyed and reported.
    pub fn tick(&self, elapsed: Duration) -> Vec<Oid> {
        let mut inner = self.inner.lock().unwrap();
        let mut expired = Vec::new();
        for entry in inner.entries.values_mut() {
            if entry.never_expires {
                continue;
            }
            entry.lease_remaining = entry.lease_remaining.saturating_sub(elapsed);
            if entry.lease_remaining.is_zero() {
                expired.push(entry.oid);
            }
        }
        for oid in &expired {
            Self::destroy_locked(&mut inner, *oid);
        }
        expired
    }

    /// Remaining lease of an object, for inspection.
    pub fn lease_remaining(&self, oid: Oid) -> Option<Duration> {
        let inner = self.inner.lock().unwrap();
        inner.entries.get(&oid).map(|e| e.lease_remaining)
    }

    /// Number of interfaces currently exposed by an object.
    pub fn interface_count(&self, oid: Oid) -> Option<usize> {
        let inner = self.inner.lock().unwrap();
        inner.entries.get(&oid).map(|e| e.manager.ipids().len())
    }

    pub fn contains(&self, oid: Oid) -> bool {
        let inner = self.inner.lock().unwrap();
        inner.entries.contains_key(&oid)
    }

    pub fn len(&self) -> usize {
        let inner = self.inner.lock().unwrap();
        inner.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The stublet's exposed IID, for reply records.
    pub fn iid_of(&self, ipid: Ipid) -> Result<Iid> {
        let inner = self.inner.lock().unwrap();
        let oid = *inner
            .by_ipid
            .get(&ipid)
            .ok_or(OrbError::InterfaceNotFound(ipid))?;
        let entry = inner
            .entries
            .get(&oid)
            .ok_or(OrbError::InterfaceNotFound(ipid))?;
        entry
            .manager
            .stublet(&ipid)
            .map(|s| s.iid)
            .ok_or(OrbError::InterfaceNotFound(ipid))
    }

    fn destroy_locked(inner: &mut TableInner, oid: Oid) {
        if let Some(entry) = inner.entries.remove(&oid) {
            inner.by_ptr.remove(&entry.ptr_key);
            for ipid in entry.manager.ipids() {
                inner.by_ipid.remove(&ipid);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exporter::stub::InterfaceSet;

    const IID_A: Iid = Iid::from_u128(0xA);
    const IID_B: Iid = Iid::from_u128(0xB);

    struct TestObject {
        set: InterfaceSet,
    }

    impl TestObject {
        fn new(iids: &[Iid]) -> Arc<Self> {
            let mut set = InterfaceSet::new();
            for iid in iids {
                let table = MethodTable::new()
                    .method(|_ctx, args| Box::pin(async move { Ok(args) }));
                set.insert(*iid, table);
            }
            Arc::new(Self { set })
        }
    }

    impl ServerObject for TestObject {
        fn interfaces(&self) -> Vec<Iid> {
            self.set.iids()
        }
        fn interface_table(&self, iid: &Iid) -> Option<Arc<MethodTable>> {
            self.set.get(iid)
        }
    }

    fn table() -> (ObjectTable, OidAllocator) {
        (ObjectTable::new(Duration::from_secs(6)), OidAllocator::new())
    }

    #[test]
    fn test_register_is_idempotent_per_object() {
        let (table, oids) = table();
        let object = TestObject::new(&[IID_A]);
        let a = table.register(object.clone(), Clsid::from_u128(1), &oids);
        let b = table.register(object.clone(), Clsid::from_u128(1), &oids);
        assert_eq!(a, b);

        let other = TestObject::new(&[IID_A]);
        let c = table.register(other, Clsid::from_u128(1), &oids);
        assert_ne!(a, c);
    }

    #[test]
    fn test_same_pointer_same_ipid() {
        let (table, oids) = table();
        let object = TestObject::new(&[IID_A]);
        let oid = table.register(object.clone(), Clsid::from_u128(1), &oids);
        let t = object.interface_table(&IID_A).unwrap();
        let ipid1 = table.add_interface(oid, IID_A, t.clone(), 1).unwrap();
        let ipid2 = table.add_interface(oid, IID_A, t, 2).unwrap();
        assert_eq!(ipid1, ipid2);
    }

    #[test]
    fn test_refcount_closure_destroys_once() {
        let (table, oids) = table();
        let object = TestObject::new(&[IID_A, IID_B]);
        let oid = table.register(object.clone(), Clsid::from_u128(1), &oids);
        let ipid_a = table
            .add_interface(oid, IID_A, object.interface_table(&IID_A).unwrap(), 3)
            .unwrap();
        let ipid_b = table
            .add_interface(oid, IID_B, object.interface_table(&IID_B).unwrap(), 2)
            .unwrap();

        assert_eq!(table.release(ipid_a, 3).unwrap(), 2);
        assert!(table.contains(oid));

        // Driving the aggregate to zero destroys the entry.
        assert_eq!(table.release(ipid_b, 2).unwrap(), 0);
        assert!(!table.contains(oid));

        // Nothing left to release a second time.
        assert!(matches!(
            table.release(ipid_b, 1),
            Err(OrbError::InterfaceNotFound(_))
        ));
    }

    #[test]
    fn test_dispatch_range_check() {
        let (table, oids) = table();
        let object = TestObject::new(&[IID_A]);
        let oid = table.register(object.clone(), Clsid::from_u128(1), &oids);
        let ipid = table
            .add_interface(oid, IID_A, object.interface_table(&IID_A).unwrap(), 1)
            .unwrap();

        assert!(table.dispatch(ipid, 0).is_ok());
        assert!(matches!(
            table.dispatch(ipid, 1),
            Err(OrbError::MethodOutOfRange { opnum: 1, count: 1 })
        ));
        let bogus = Ipid::derive(0xBAD, Oid::new(999));
        assert!(matches!(
            table.dispatch(bogus, 0),
            Err(OrbError::InterfaceNotFound(_))
        ));
    }

    #[test]
    fn test_query_interface_reuses_and_creates() {
        let (table, oids) = table();
        let object = TestObject::new(&[IID_A, IID_B]);
        let oid = table.register(object.clone(), Clsid::from_u128(1), &oids);
        let anchor = table
            .add_interface(oid, IID_A, object.interface_table(&IID_A).unwrap(), 1)
            .unwrap();

        let (_, ipid_b) = table.query_interface(anchor, IID_B, 5).unwrap();
        let (_, again) = table.query_interface(anchor, IID_B, 5).unwrap();
        assert_eq!(ipid_b, again);

        let missing = Iid::from_u128(0xDEAD);
        assert!(matches!(
            table.query_interface(anchor, missing, 1),
            Err(OrbError::NoSuchInterface(_))
        ));
    }

    #[test]
    fn test_lease_tick_expires_and_ping_resets() {
        let (table, oids) = table();
        let object = TestObject::new(&[IID_A]);
        let oid = table.register(object.clone(), Clsid::from_u128(1), &oids);

        // Three 2-second ticks run the 6-second lease out.
        table.tick(Duration::from_secs(2));
        table.tick(Duration::from_secs(2));
        assert!(table.contains(oid));
        let expired = table.tick(Duration::from_secs(2));
        assert_eq!(expired, vec![oid]);
        assert!(!table.contains(oid));

        // A ping mid-way resets the countdown to the full timeout.
        let object = TestObject::new(&[IID_A]);
        let oid = table.register(object, Clsid::from_u128(1), &oids);
        table.tick(Duration::from_secs(4));
        assert!(table.touch(oid));
        assert_eq!(table.lease_remaining(oid), Some(Duration::from_secs(6)));
        table.tick(Duration::from_secs(4));
        assert!(table.contains(oid));
    }

    #[test]
    fn test_never_expires_survives_ticks() {
        let (table, oids) = table();
        let object = TestObject::new(&[IID_A]);
        let oid = table.register(object, Clsid::from_u128(1), &oids);
        table.set_never_expires(oid, true).unwrap();
        table.tick(Duration::from_secs(60));
        assert!(table.contains(oid));
    }
}
