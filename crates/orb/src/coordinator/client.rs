//! Coordinator client, resolver cache, and the client half of the ping
//! protocol
//!
//! The ping tracker groups the OIDs a process holds proxies for, per
//! remote exporter, into one set each, and renews them with a delta ping
//! when membership changed or a simple ping otherwise.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use orb_ndr::Phase;

use crate::transport::{Channel, Connector};
use crate::types::{
    wire_status, Clsid, DualStringArray, Iid, Oid, OrbError, Oxid, RefRecord, Result, SetId,
};

use super::protocol::{
    activation_mode, opnum, reader, ActivateReply, ActivateRequest, AliveReply,
    ComplexPingReply, ComplexPingRequest, PingReply, ResolveReply, ResolveRequest,
    SimplePingRequest, COORDINATOR_IID,
};

/// Aggregate activation verdict.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ActivationVerdict {
    /// Every requested interface was exported.
    Success,
    /// At least one interface was exported, at least one failed.
    Partial,
}

/// A successful (possibly partial) activation.
#[derive(Clone, Debug)]
pub struct ActivationOutcome {
    pub verdict: ActivationVerdict,
    pub oxid: Oxid,
    pub bindings: DualStringArray,
    /// One slot per requested interface, in request order; failed slots
    /// are `None`.
    pub records: Vec<Option<RefRecord>>,
}

/// Client half of the coordinator interface, bound to one exporter.
pub struct CoordinatorClient {
    channel: Arc<dyn Channel>,
}

impl CoordinatorClient {
    pub fn new(channel: Arc<dyn Channel>) -> Self {
        Self { channel }
    }

    /// Liveness probe.
    pub async fn alive(&self) -> Result<bool> {
        let reply_bytes = self
            .channel
            .invoke(COORDINATOR_IID, None, opnum::ALIVE, bytes::Bytes::new())
            .await?;
        let reply = AliveReply::decode(&mut reader(reply_bytes, Phase::InboundReply))?;
        Ok(reply.status == wire_status::OK)
    }

    /// Resolve an exporter id to its bindings.
    pub async fn resolve(&self, oxid: Oxid) -> Result<DualStringArray> {
        let request = ResolveRequest::new(oxid);
        let reply_bytes = self
            .channel
            .invoke(COORDINATOR_IID, None, opnum::RESOLVE, request.encode()?)
            .await?;
        let reply = ResolveReply::decode(&mut reader(reply_bytes, Phase::InboundReply))?;
        if reply.status == wire_status::OK {
            Ok(reply.bindings)
        } else if reply.status == wire_status::INVALID_IDENTIFIER {
            Err(OrbError::ExporterNotFound(oxid))
        } else {
            Err(OrbError::from_wire_status(reply.status))
        }
    }

    /// Activate a class instance.
    pub async fn activate(&self, clsid: Clsid, iids: Vec<Iid>) -> Result<ActivationOutcome> {
        self.activate_mode(clsid, activation_mode::INSTANCE, iids).await
    }

    /// Fetch the class factory instead of an instance.
    pub async fn get_class_object(&self, clsid: Clsid, iids: Vec<Iid>) -> Result<ActivationOutcome> {
        self.activate_mode(clsid, activation_mode::CLASS_OBJECT, iids).await
    }

    async fn activate_mode(
        &self,
        clsid: Clsid,
        mode: u32,
        iids: Vec<Iid>,
    ) -> Result<ActivationOutcome> {
        let request = ActivateRequest::new(clsid, mode, iids);
        let reply_bytes = self
            .channel
            .invoke(COORDINATOR_IID, None, opnum::ACTIVATE, request.encode()?)
            .await?;
        let reply = ActivateReply::decode(&mut reader(reply_bytes, Phase::InboundReply))?;

        let verdict = match reply.status {
            wire_status::OK => ActivationVerdict::Success,
            wire_status::PARTIAL => ActivationVerdict::Partial,
            wire_status::NO_INTERFACE => return Err(OrbError::NotSupported),
            wire_status::ACCESS_DENIED => return Err(OrbError::AccessDenied),
            wire_status::CLASS_NOT_REGISTERED => {
                return Err(OrbError::ClassNotRegistered(clsid))
            }
            other => return Err(OrbError::from_wire_status(other)),
        };

        Ok(ActivationOutcome {
            verdict,
            oxid: reply.oxid,
            bindings: reply.bindings,
            records: reply.results.into_iter().map(|r| r.record).collect(),
        })
    }

    /// Renew a set without modifying it.
    pub async fn simple_ping(&self, set_id: SetId) -> Result<()> {
        let request = SimplePingRequest::new(set_id);
        let reply_bytes = self
            .channel
            .invoke(COORDINATOR_IID, None, opnum::SIMPLE_PING, request.encode()?)
            .await?;
        let reply = PingReply::decode(&mut reader(reply_bytes, Phase::InboundReply))?;
        if reply.status == wire_status::OK {
            Ok(())
        } else {
            Err(OrbError::SetNotFound(set_id))
        }
    }

    /// Delta ping; returns the (possibly freshly allocated) set id.
    pub async fn complex_ping(
        &self,
        set_id: SetId,
        sequence: u16,
        add: Vec<Oid>,
        del: Vec<Oid>,
    ) -> Result<SetId> {
        let request = ComplexPingRequest::new(set_id, sequence, add, del);
        let reply_bytes = self
            .channel
            .invoke(COORDINATOR_IID, None, opnum::COMPLEX_PING, request.encode()?)
            .await?;
        let reply = ComplexPingReply::decode(&mut reader(reply_bytes, Phase::InboundReply))?;
        if reply.status == wire_status::OK {
            Ok(reply.set_id)
        } else {
            Err(OrbError::from_wire_status(reply.status))
        }
    }
}

/// Cache of resolved, connected exporter channels.
///
/// The cached channel doubles as the cached address resolution: a proxy
/// asks once per OXID and every later unmarshal of the same exporter
/// reuses the connection.
pub struct ResolverCache {
    connector: Arc<dyn Connector>,
    channels: Mutex<HashMap<Oxid, Arc<dyn Channel>>>,
}

impl ResolverCache {
    pub fn new(connector: Arc<dyn Connector>) -> Self {
        Self {
            connector,
            channels: Mutex::new(HashMap::new()),
        }
    }

    /// Channel to `oxid`, using the record's resolver addresses as the
    /// hint on first contact.
    pub async fn channel_for(
        &self,
        oxid: Oxid,
        hint: &DualStringArray,
    ) -> Result<Arc<dyn Channel>> {
        if let Some(channel) = self.channels.lock().unwrap().get(&oxid) {
            return Ok(channel.clone());
        }
        let addr = hint
            .primary_addr()
            .ok_or(OrbError::ExporterNotFound(oxid))?
            .to_string();
        // Connect outside the lock; a racing second resolve just wins or
        // loses the insert below.
        let channel = self.connector.connect(&addr).await?;
        self.channels
            .lock()
            .unwrap()
            .entry(oxid)
            .or_insert_with(|| channel.clone());
        Ok(channel)
    }

    /// Resolve a foreign OXID through an already-connected coordinator,
    /// then connect and cache.
    pub async fn resolve_via(
        &self,
        via: &Arc<dyn Channel>,
        oxid: Oxid,
    ) -> Result<Arc<dyn Channel>> {
        if let Some(channel) = self.channels.lock().unwrap().get(&oxid) {
            return Ok(channel.clone());
        }
        let bindings = CoordinatorClient::new(via.clone()).resolve(oxid).await?;
        self.channel_for(oxid, &bindings).await
    }

    /// Pre-populate the cache with an already-connected channel.
    pub fn seed(&self, oxid: Oxid, channel: Arc<dyn Channel>) {
        self.channels.lock().unwrap().entry(oxid).or_insert(channel);
    }

    /// Drop one cached channel (e.g. after transport failure).
    pub fn evict(&self, oxid: Oxid) {
        self.channels.lock().unwrap().remove(&oxid);
    }
}

struct ExporterPings {
    set_id: SetId,
    sequence: u16,
    members: HashSet<Oid>,
    pending_add: Vec<Oid>,
    pending_del: Vec<Oid>,
    channel: Arc<dyn Channel>,
}

/// Client half of the distributed GC: one ping set per remote exporter.
pub struct PingTracker {
    exporters: Mutex<HashMap<Oxid, ExporterPings>>,
}

impl PingTracker {
    pub fn new() -> Self {
        Self {
            exporters: Mutex::new(HashMap::new()),
        }
    }

    /// Start renewing `oid` on its exporter's set.
    pub fn enrol(&self, oxid: Oxid, oid: Oid, channel: Arc<dyn Channel>) {
        let mut exporters = self.exporters.lock().unwrap();
        let entry = exporters.entry(oxid).or_insert_with(|| ExporterPings {
            set_id: SetId::NONE,
            sequence: 0,
            members: HashSet::new(),
            pending_add: Vec::new(),
            pending_del: Vec::new(),
            channel,
        });
        if entry.members.insert(oid) {
            entry.pending_add.push(oid);
        }
    }

    /// Stop renewing `oid`; the delta travels with the next ping.
    pub fn withdraw(&self, oxid: Oxid, oid: Oid) {
        let mut exporters = self.exporters.lock().unwrap();
        if let Some(entry) = exporters.get_mut(&oxid) {
            if entry.members.remove(&oid) {
                entry.pending_del.push(oid);
                entry.pending_add.retain(|o| *o != oid);
            }
            if entry.members.is_empty() && entry.pending_del.is_empty() {
                exporters.remove(&oxid);
            }
        }
    }

    /// Current members of an exporter's set (tests, introspection).
    pub fn members(&self, oxid: Oxid) -> Vec<Oid> {
        let exporters = self.exporters.lock().unwrap();
        exporters
            .get(&oxid)
            .map(|e| e.members.iter().copied().collect())
            .unwrap_or_default()
    }

    /// One renewal pass over every tracked exporter: a delta ping where
    /// membership changed, a simple ping otherwise. Failures are logged
    /// and left for the next pass — a missed ping is what lease expiry
    /// exists for.
    pub async fn ping_all(&self) {
        // Snapshot work under the lock, run the round trips outside it.
        struct Job {
            oxid: Oxid,
            set_id: SetId,
            sequence: u16,
            add: Vec<Oid>,
            del: Vec<Oid>,
            channel: Arc<dyn Channel>,
        }

        let jobs: Vec<Job> = {
            let mut exporters = self.exporters.lock().unwrap();
            exporters
                .iter_mut()
                .map(|(oxid, entry)| {
                    let dirty = !entry.pending_add.is_empty() || !entry.pending_del.is_empty();
                    let sequence = if dirty {
                        entry.sequence = entry.sequence.wrapping_add(1).max(1);
                        entry.sequence
                    } else {
                        entry.sequence
                    };
                    Job {
                        oxid: *oxid,
                        set_id: entry.set_id,
                        sequence,
                        add: std::mem::take(&mut entry.pending_add),
                        del: std::mem::take(&mut entry.pending_del),
                        channel: entry.channel.clone(),
                    }
                })
                .collect()
        };

        for job in jobs {
            let client = CoordinatorClient::new(job.channel);
            let dirty = !job.add.is_empty() || !job.del.is_empty();
            let result = if dirty || job.set_id.is_none() {
                client
                    .complex_ping(job.set_id, job.sequence, job.add.clone(), job.del.clone())
                    .await
                    .map(Some)
            } else {
                client.simple_ping(job.set_id).await.map(|_| None)
            };

            let mut exporters = self.exporters.lock().unwrap();
            match result {
                Ok(Some(set_id)) => {
                    if let Some(entry) = exporters.get_mut(&job.oxid) {
                        entry.set_id = set_id;
                    }
                }
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(oxid = %job.oxid, error = %e, "ping failed");
                    // Re-queue the deltas for the next pass.
                    if let Some(entry) = exporters.get_mut(&job.oxid) {
                        entry.pending_add.extend(job.add);
                        entry.pending_del.extend(job.del);
                    }
                }
            }
        }
    }
}

impl Default for PingTracker {
    fn default() -> Self {
        Self::new()
    }
}
