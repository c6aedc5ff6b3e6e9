//! Object exporter
//!
//! The server-side runtime component: the export table of everything this
//! process exposes, the stub managers that dispatch into it, and the
//! lease/ping machinery that reclaims entries when their clients go quiet.

pub mod lease;
pub mod stub;
pub mod table;

use std::sync::Arc;
use std::time::Duration;

use crate::types::{
    Clsid, DualStringArray, Iid, Ipid, Oid, OidAllocator, Oxid, RefRecord, Result, SetId, StdRef,
};

pub use lease::PingSetRegistry;
pub use stub::{
    CallContext, CallFuture, InterfaceSet, MethodHandler, MethodTable, ServerObject, StubManager,
    Stublet,
};
pub use table::{ObjectEntry, ObjectTable};

/// Default lease renewal period granted to ping clients.
pub const DEFAULT_PING_PERIOD: Duration = Duration::from_secs(120);

/// Missed periods before an unpinged object is reclaimed.
pub const DEFAULT_PING_TIMEOUT_PERIODS: u32 = 3;

/// The per-process exporter: identity, address, and export table.
pub struct Exporter {
    oxid: Oxid,
    bindings: DualStringArray,
    oids: OidAllocator,
    table: ObjectTable,
    pings: PingSetRegistry,
}

impl Exporter {
    /// Create an exporter reachable at `bindings`. The OXID seeds from
    /// the primary network address.
    pub fn new(bindings: DualStringArray, lease_timeout: Duration) -> Self {
        let oxid = Oxid::seeded(bindings.primary_addr().unwrap_or("unbound"));
        Self {
            oxid,
            bindings,
            oids: OidAllocator::new(),
            table: ObjectTable::new(lease_timeout),
            pings: PingSetRegistry::new(lease_timeout),
        }
    }

    pub fn oxid(&self) -> Oxid {
        self.oxid
    }

    pub fn bindings(&self) -> &DualStringArray {
        &self.bindings
    }

    pub fn table(&self) -> &ObjectTable {
        &self.table
    }

    /// Register an object (idempotent per underlying object).
    pub fn register(&self, object: Arc<dyn ServerObject>, clsid: Clsid) -> Oid {
        self.table.register(object, clsid, &self.oids)
    }

    /// Expose one interface of a registered object.
    pub fn add_interface(
        &self,
        oid: Oid,
        iid: Iid,
        table: Arc<MethodTable>,
        refs: u32,
    ) -> Result<Ipid> {
        self.table.add_interface(oid, iid, table, refs)
    }

    /// Register an object and export one interface in a single step,
    /// yielding the reference record the client will consume.
    pub fn export(
        &self,
        object: Arc<dyn ServerObject>,
        clsid: Clsid,
        iid: Iid,
        refs: u32,
    ) -> Result<RefRecord> {
        let oid = self.register(object.clone(), clsid);
        let table = object
            .interface_table(&iid)
            .ok_or(crate::types::OrbError::NoSuchInterface(iid))?;
        let ipid = self.add_interface(oid, iid, table, refs)?;
        Ok(self.record_for(oid, ipid, iid, refs))
    }

    /// Build the reference record for an exposed interface.
    pub fn record_for(&self, oid: Oid, ipid: Ipid, iid: Iid, refs: u32) -> RefRecord {
        RefRecord::new(
            iid,
            StdRef::new(self.oxid, oid, ipid, refs),
            self.bindings.clone(),
        )
    }

    /// Query an interface anchored at a known IPID and build its record.
    pub fn query_interface(&self, anchor: Ipid, iid: Iid, refs: u32) -> Result<RefRecord> {
        let (oid, ipid) = self.table.query_interface(anchor, iid, refs)?;
        Ok(self.record_for(oid, ipid, iid, refs))
    }

    /// Delta ping: renews every member of the named set.
    pub fn complex_ping(
        &self,
        session: u64,
        set_id: SetId,
        sequence: u16,
        add: &[Oid],
        del: &[Oid],
    ) -> Result<SetId> {
        let (actual, members) = self.pings.complex_ping(session, set_id, sequence, add, del)?;
        for oid in members {
            self.table.touch(oid);
        }
        Ok(actual)
    }

    /// Liveness ping: renews every member of the named set.
    pub fn simple_ping(&self, session: u64, set_id: SetId) -> Result<()> {
        for oid in self.pings.simple_ping(session, set_id)? {
            self.table.touch(oid);
        }
        Ok(())
    }

    /// One sweeper tick: advance lease countdowns, reclaim expired
    /// objects and stale ping sets.
    pub fn sweep(&self, elapsed: Duration) -> Vec<Oid> {
        let stale_sets = self.pings.tick(elapsed);
        for set in stale_sets {
            tracing::debug!(%set, "ping set went silent, discarded");
        }
        let expired = self.table.tick(elapsed);
        for oid in &expired {
            tracing::info!(%oid, "lease expired, object unregistered");
        }
        expired
    }

    /// Forget the ping sets of a closed transport session.
    pub fn drop_session(&self, session: u64) {
        let dropped = self.pings.drop_session(session);
        if dropped > 0 {
            tracing::debug!(session, dropped, "transport session ping sets dropped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::OrbError;
    use bytes::Bytes;

    const IID_X: Iid = Iid::from_u128(0x10);

    struct Echo {
        set: InterfaceSet,
    }

    impl Echo {
        fn new() -> Arc<Self> {
            let mut set = InterfaceSet::new();
            set.insert(
                IID_X,
                MethodTable::new()
                    .method(|_ctx, args| Box::pin(async move { Ok(args) })),
            );
            Arc::new(Self { set })
        }
    }

    impl ServerObject for Echo {
        fn interfaces(&self) -> Vec<Iid> {
            self.set.iids()
        }
        fn interface_table(&self, iid: &Iid) -> Option<Arc<MethodTable>> {
            self.set.get(iid)
        }
    }

    fn exporter() -> Exporter {
        Exporter::new(
            DualStringArray::with_tcp("127.0.0.1:4100"),
            Duration::from_secs(6),
        )
    }

    #[test]
    fn test_export_builds_record() {
        let exp = exporter();
        let record = exp
            .export(Echo::new(), Clsid::from_u128(1), IID_X, 5)
            .unwrap();
        assert_eq!(record.iid, IID_X);
        assert_eq!(record.std.oxid, exp.oxid());
        assert_eq!(record.std.public_refs, 5);
        assert!(exp.table().contains(record.std.oid));
    }

    #[test]
    fn test_export_unsupported_interface_fails() {
        let exp = exporter();
        let err = exp
            .export(Echo::new(), Clsid::from_u128(1), Iid::from_u128(0xFF), 1)
            .unwrap_err();
        assert!(matches!(err, OrbError::NoSuchInterface(_)));
    }

    #[test]
    fn test_ping_renews_members() {
        let exp = exporter();
        let record = exp
            .export(Echo::new(), Clsid::from_u128(1), IID_X, 1)
            .unwrap();
        let oid = record.std.oid;

        let set = exp
            .complex_ping(1, SetId::NONE, 1, &[oid], &[])
            .unwrap();

        exp.sweep(Duration::from_secs(4));
        exp.simple_ping(1, set).unwrap();
        exp.sweep(Duration::from_secs(4));
        assert!(exp.table().contains(oid));

        // Two silent sweeps on a 6-second lease run it out.
        exp.sweep(Duration::from_secs(4));
        exp.sweep(Duration::from_secs(4));
        assert!(!exp.table().contains(oid));
    }

    #[tokio::test]
    async fn test_dispatch_through_exported_interface() {
        let exp = exporter();
        let record = exp
            .export(Echo::new(), Clsid::from_u128(1), IID_X, 1)
            .unwrap();
        let (_table, handler) = exp.table().dispatch(record.std.ipid, 0).unwrap();
        let ctx = CallContext {
            header: crate::types::CallHeader::new(),
            ipid: record.std.ipid,
            opnum: 0,
        };
        let out = handler(ctx, Bytes::from_static(b"ping")).await.unwrap();
        assert_eq!(out, Bytes::from_static(b"ping"));
    }
}
