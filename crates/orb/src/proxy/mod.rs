//! Client-side surrogates
//!
//! A proxy stands in for one remote object; a facelet stands in for one
//! interface obtained on it. The apartment is the process-local dedup
//! scope: at most one proxy exists per (OXID, OID) inside it.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use orb_ndr::{ByteOrder, MarshalStream, Phase, UnmarshalStream};

use crate::coordinator::{PingTracker, ResolverCache};
use crate::remref::{RefChange, RemRefClient};
use crate::transport::Channel;
use crate::types::{
    wire_status, CallHeader, DualStringArray, Iid, Ipid, Oid, OrbError, Oxid, RefRecord,
    ReplyHeader, Result, StdRef,
};

/// References requested per remote add-ref round trip.
pub const REF_BATCH: u32 = 5;

/// Budget level that triggers replenishment before a draw.
pub const REF_LOW_WATER: u32 = 2;

/// Interface delegate: forwards calls for one interface of one remote
/// object and manages its replenishable remote-reference budget.
pub struct Facelet {
    iid: Iid,
    ipid: Ipid,
    oid: Oid,
    oxid: Oxid,
    resolver: DualStringArray,
    channel: Arc<dyn Channel>,
    budget: Mutex<u32>,
}

impl Facelet {
    fn new(
        iid: Iid,
        ipid: Ipid,
        oid: Oid,
        oxid: Oxid,
        resolver: DualStringArray,
        channel: Arc<dyn Channel>,
        budget: u32,
    ) -> Self {
        Self {
            iid,
            ipid,
            oid,
            oxid,
            resolver,
            channel,
            budget: Mutex::new(budget),
        }
    }

    pub fn iid(&self) -> Iid {
        self.iid
    }

    pub fn ipid(&self) -> Ipid {
        self.ipid
    }

    pub fn oid(&self) -> Oid {
        self.oid
    }

    pub fn oxid(&self) -> Oxid {
        self.oxid
    }

    pub fn budget(&self) -> u32 {
        *self.budget.lock().unwrap()
    }

    fn add_budget(&self, refs: u32) {
        let mut budget = self.budget.lock().unwrap();
        *budget = budget.saturating_add(refs);
    }

    /// Invoke a method on the remote interface: frame header plus
    /// argument bytes out, status-checked payload back.
    pub async fn invoke(&self, opnum: u16, args: Bytes) -> Result<Bytes> {
        let mut s = MarshalStream::new(Phase::OutboundRequest);
        CallHeader::new().encode(&mut s)?;
        s.put_slice(&args)?;

        let reply = self
            .channel
            .invoke(self.iid, Some(self.ipid), opnum, s.finish())
            .await?;

        let mut r = UnmarshalStream::new(reply, ByteOrder::native(), Phase::InboundReply);
        let _header = ReplyHeader::decode(&mut r)?;
        let status = r.get_u32()?;
        match status {
            wire_status::OK => {
                let rest = r.remaining();
                Ok(r.take_bytes(rest)?)
            }
            wire_status::INVALID_IDENTIFIER => Err(OrbError::InterfaceNotFound(self.ipid)),
            other => Err(OrbError::from_wire_status(other)),
        }
    }

    /// Re-export this interface to a third party: draw one unit from the
    /// budget — topping it up by a remote add-ref batch first if the draw
    /// would leave it too low — and emit a fresh reference record bound
    /// to the cached exporter address.
    pub async fn marshal(&self) -> Result<RefRecord> {
        let needs_refill = {
            let budget = self.budget.lock().unwrap();
            *budget < REF_LOW_WATER
        };
        if needs_refill {
            RemRefClient::new(self.channel.clone())
                .add_ref(vec![RefChange::new(self.ipid, REF_BATCH)])
                .await?;
            self.add_budget(REF_BATCH);
        }

        {
            let mut budget = self.budget.lock().unwrap();
            debug_assert!(*budget >= 1);
            *budget = budget.saturating_sub(1);
        }

        Ok(RefRecord::new(
            self.iid,
            StdRef::new(self.oxid, self.oid, self.ipid, 1),
            self.resolver.clone(),
        ))
    }
}

/// Surrogate for one remote object.
pub struct Proxy {
    oxid: Oxid,
    oid: Oid,
    channel: Arc<dyn Channel>,
    resolver: DualStringArray,
    facelets: Mutex<HashMap<Ipid, Arc<Facelet>>>,
    local_refs: AtomicU32,
}

impl Proxy {
    fn new(
        oxid: Oxid,
        oid: Oid,
        channel: Arc<dyn Channel>,
        resolver: DualStringArray,
    ) -> Self {
        Self {
            oxid,
            oid,
            channel,
            resolver,
            facelets: Mutex::new(HashMap::new()),
            local_refs: AtomicU32::new(1),
        }
    }

    pub fn oxid(&self) -> Oxid {
        self.oxid
    }

    pub fn oid(&self) -> Oid {
        self.oid
    }

    pub fn local_refs(&self) -> u32 {
        self.local_refs.load(Ordering::SeqCst)
    }

    pub fn facelet_count(&self) -> usize {
        self.facelets.lock().unwrap().len()
    }

    fn add_local_ref(&self) {
        self.local_refs.fetch_add(1, Ordering::SeqCst);
    }

    /// Attach (or extend) the facelet for one interface.
    pub fn facelet_add(&self, iid: Iid, ipid: Ipid, refs: u32) -> Arc<Facelet> {
        let mut facelets = self.facelets.lock().unwrap();
        if let Some(existing) = facelets.get(&ipid) {
            existing.add_budget(refs);
            return existing.clone();
        }
        let facelet = Arc::new(Facelet::new(
            iid,
            ipid,
            self.oid,
            self.oxid,
            self.resolver.clone(),
            self.channel.clone(),
            refs,
        ));
        facelets.insert(ipid, facelet.clone());
        facelet
    }

    /// The facelet already holding an interface, if any.
    pub fn find_facelet(&self, iid: &Iid) -> Option<Arc<Facelet>> {
        let facelets = self.facelets.lock().unwrap();
        facelets.values().find(|f| f.iid == *iid).cloned()
    }

    fn any_ipid(&self) -> Option<Ipid> {
        let facelets = self.facelets.lock().unwrap();
        facelets.keys().next().copied()
    }

    /// Obtain an interface on this proxy: existing facelets first, then
    /// one remote query-interface call anchored at any known IPID.
    pub async fn query_interface(&self, iid: Iid) -> Result<Arc<Facelet>> {
        if let Some(facelet) = self.find_facelet(&iid) {
            return Ok(facelet);
        }
        let anchor = self
            .any_ipid()
            .ok_or(OrbError::ObjectNotFound(self.oid))?;
        let std = RemRefClient::new(self.channel.clone())
            .query_single(anchor, iid, REF_BATCH)
            .await?
            .ok_or(OrbError::NoSuchInterface(iid))?;
        Ok(self.facelet_add(iid, std.ipid, std.public_refs))
    }

    /// Drain every facelet's budget into one aggregated release batch.
    fn drain_for_release(&self) -> Vec<RefChange> {
        let mut facelets = self.facelets.lock().unwrap();
        let changes = facelets
            .values()
            .filter_map(|f| {
                let mut budget = f.budget.lock().unwrap();
                let refs = *budget;
                *budget = 0;
                (refs > 0).then_some(RefChange::new(f.ipid, refs))
            })
            .collect();
        facelets.clear();
        changes
    }
}

/// The process-local dedup scope for proxies.
pub struct Apartment {
    proxies: Mutex<HashMap<(Oxid, Oid), Arc<Proxy>>>,
    resolver: Arc<ResolverCache>,
    pings: Arc<PingTracker>,
}

impl Apartment {
    pub fn new(resolver: Arc<ResolverCache>, pings: Arc<PingTracker>) -> Self {
        Self {
            proxies: Mutex::new(HashMap::new()),
            resolver,
            pings,
        }
    }

    pub fn proxy_count(&self) -> usize {
        self.proxies.lock().unwrap().len()
    }

    pub fn get(&self, oxid: Oxid, oid: Oid) -> Option<Arc<Proxy>> {
        self.proxies.lock().unwrap().get(&(oxid, oid)).cloned()
    }

    /// Consume a reference record: reuse the (OXID, OID) proxy if the
    /// apartment already holds it, otherwise build one — resolving the
    /// exporter's address and enrolling the OID with the distributed GC —
    /// then attach the record's interface as a facelet.
    pub async fn unmarshal_reference(&self, record: &RefRecord) -> Result<Arc<Facelet>> {
        let key = (record.std.oxid, record.std.oid);

        let existing = self.proxies.lock().unwrap().get(&key).cloned();
        let proxy = match existing {
            Some(proxy) => {
                proxy.add_local_ref();
                proxy
            }
            None => {
                let channel = self
                    .resolver
                    .channel_for(record.std.oxid, &record.resolver)
                    .await?;
                let fresh = Arc::new(Proxy::new(
                    record.std.oxid,
                    record.std.oid,
                    channel.clone(),
                    record.resolver.clone(),
                ));
                let proxy = {
                    let mut proxies = self.proxies.lock().unwrap();
                    // A racing unmarshal may have beaten us here; the
                    // apartment invariant wins over our fresh instance.
                    match proxies.get(&key) {
                        Some(winner) => {
                            winner.add_local_ref();
                            winner.clone()
                        }
                        None => {
                            proxies.insert(key, fresh.clone());
                            fresh
                        }
                    }
                };
                if record.std.requires_pinging() {
                    self.pings.enrol(record.std.oxid, record.std.oid, channel);
                }
                proxy
            }
        };

        Ok(proxy.facelet_add(record.iid, record.std.ipid, record.std.public_refs))
    }

    /// Drop one local reference to a proxy. The drop that reaches zero
    /// tears the proxy down: one aggregated remote release covering every
    /// facelet's remaining budget, then deregistration from the apartment
    /// table and the distributed GC.
    pub async fn release(&self, proxy: &Arc<Proxy>) -> Result<()> {
        let prev = proxy
            .local_refs
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |v| v.checked_sub(1))
            .map_err(|_| OrbError::ObjectNotFound(proxy.oid))?;
        if prev > 1 {
            return Ok(());
        }

        self.proxies
            .lock()
            .unwrap()
            .remove(&(proxy.oxid, proxy.oid));
        self.pings.withdraw(proxy.oxid, proxy.oid);

        let changes = proxy.drain_for_release();
        if !changes.is_empty() {
            if let Err(e) = RemRefClient::new(proxy.channel.clone()).release(changes).await {
                tracing::warn!(oxid = %proxy.oxid, oid = %proxy.oid, error = %e,
                    "aggregated release failed; exporter lease will reclaim");
            }
        }
        Ok(())
    }
}
