//! Coordinator wire protocol
//!
//! Activation, exporter address resolution, liveness probing, and the two
//! ping shapes of the distributed garbage collector.

use bytes::Bytes;
use orb_ndr::{ByteOrder, MarshalStream, NdrError, Phase, Result as NdrResult, UnmarshalStream};

use crate::types::{
    CallHeader, Clsid, DualStringArray, Iid, Oid, Oxid, ProtocolVersion, RefRecord, ReplyHeader,
    Result, SetId, MAX_BATCH,
};

/// Interface id of the coordinator service.
pub const COORDINATOR_IID: Iid = Iid::from_u128(0x99FC_FEC4_5260_101B_BBCB_00AA_0021_347A);

/// Operation numbers.
pub mod opnum {
    pub const RESOLVE: u16 = 0;
    pub const SIMPLE_PING: u16 = 1;
    pub const COMPLEX_PING: u16 = 2;
    pub const ALIVE: u16 = 3;
    pub const ACTIVATE: u16 = 4;
}

/// Activation shapes.
pub mod activation_mode {
    /// Instantiate the class and export the instance.
    pub const INSTANCE: u32 = 0;
    /// Export the class factory itself.
    pub const CLASS_OBJECT: u32 = 1;
}

fn check_batch(count: usize) -> NdrResult<usize> {
    if count > MAX_BATCH {
        return Err(NdrError::CountLimitExceeded {
            requested: count,
            limit: MAX_BATCH,
        });
    }
    Ok(count)
}

/// Resolve an exporter id to its bindings.
#[derive(Clone, Debug)]
pub struct ResolveRequest {
    pub header: CallHeader,
    pub oxid: Oxid,
}

impl ResolveRequest {
    pub fn new(oxid: Oxid) -> Self {
        Self {
            header: CallHeader::new(),
            oxid,
        }
    }

    pub fn encode(&self) -> NdrResult<Bytes> {
        let mut s = MarshalStream::new(Phase::OutboundRequest);
        self.header.encode(&mut s)?;
        self.oxid.encode(&mut s)?;
        Ok(s.finish())
    }

    pub fn decode(s: &mut UnmarshalStream) -> NdrResult<Self> {
        Ok(Self {
            header: CallHeader::decode(s)?,
            oxid: Oxid::decode(s)?,
        })
    }
}

/// Reply to [`ResolveRequest`].
#[derive(Clone, Debug)]
pub struct ResolveReply {
    pub header: ReplyHeader,
    pub bindings: DualStringArray,
    pub status: u32,
}

impl ResolveReply {
    pub fn new(bindings: DualStringArray, status: u32) -> Self {
        Self {
            header: ReplyHeader::new(),
            bindings,
            status,
        }
    }

    pub fn encode(&self) -> NdrResult<Bytes> {
        let mut s = MarshalStream::new(Phase::OutboundReply);
        self.header.encode(&mut s)?;
        self.bindings.encode(&mut s)?;
        s.put_u32(self.status)?;
        Ok(s.finish())
    }

    pub fn decode(s: &mut UnmarshalStream) -> NdrResult<Self> {
        Ok(Self {
            header: ReplyHeader::decode(s)?,
            bindings: DualStringArray::decode(s)?,
            status: s.get_u32()?,
        })
    }
}

/// Renew a ping set without modifying it.
#[derive(Clone, Debug)]
pub struct SimplePingRequest {
    pub header: CallHeader,
    pub set_id: SetId,
}

impl SimplePingRequest {
    pub fn new(set_id: SetId) -> Self {
        Self {
            header: CallHeader::new(),
            set_id,
        }
    }

    pub fn encode(&self) -> NdrResult<Bytes> {
        let mut s = MarshalStream::new(Phase::OutboundRequest);
        self.header.encode(&mut s)?;
        self.set_id.encode(&mut s)?;
        Ok(s.finish())
    }

    pub fn decode(s: &mut UnmarshalStream) -> NdrResult<Self> {
        Ok(Self {
            header: CallHeader::decode(s)?,
            set_id: SetId::decode(s)?,
        })
    }
}

/// Status-only ping reply.
#[derive(Clone, Debug)]
pub struct PingReply {
    pub header: ReplyHeader,
    pub status: u32,
}

impl PingReply {
    pub fn new(status: u32) -> Self {
        Self {
            header: ReplyHeader::new(),
            status,
        }
    }

    pub fn encode(&self) -> NdrResult<Bytes> {
        let mut s = MarshalStream::new(Phase::OutboundReply);
        self.header.encode(&mut s)?;
        s.put_u32(self.status)?;
        Ok(s.finish())
    }

    pub fn decode(s: &mut UnmarshalStream) -> NdrResult<Self> {
        Ok(Self {
            header: ReplyHeader::decode(s)?,
            status: s.get_u32()?,
        })
    }
}

/// Delta ping: add and remove OIDs from a set, creating it on first use.
#[derive(Clone, Debug)]
pub struct ComplexPingRequest {
    pub header: CallHeader,
    /// Zero requests allocation of a fresh set.
    pub set_id: SetId,
    pub sequence: u16,
    pub add: Vec<Oid>,
    pub del: Vec<Oid>,
}

impl ComplexPingRequest {
    pub fn new(set_id: SetId, sequence: u16, add: Vec<Oid>, del: Vec<Oid>) -> Self {
        Self {
            header: CallHeader::new(),
            set_id,
            sequence,
            add,
            del,
        }
    }

    pub fn encode(&self) -> NdrResult<Bytes> {
        let mut s = MarshalStream::new(Phase::OutboundRequest);
        self.header.encode(&mut s)?;
        self.set_id.encode(&mut s)?;
        s.put_u16(self.sequence)?;
        s.put_u16(self.add.len() as u16)?;
        s.put_u16(self.del.len() as u16)?;
        s.put_u16(0)?; // pad
        for oid in &self.add {
            oid.encode(&mut s)?;
        }
        for oid in &self.del {
            oid.encode(&mut s)?;
        }
        Ok(s.finish())
    }

    pub fn decode(s: &mut UnmarshalStream) -> NdrResult<Self> {
        let header = CallHeader::decode(s)?;
        let set_id = SetId::decode(s)?;
        let sequence = s.get_u16()?;
        let add_count = check_batch(s.get_u16()? as usize)?;
        let del_count = check_batch(s.get_u16()? as usize)?;
        let _pad = s.get_u16()?;
        let mut add = Vec::with_capacity(add_count);
        for _ in 0..add_count {
            add.push(Oid::decode(s)?);
        }
        let mut del = Vec::with_capacity(del_count);
        for _ in 0..del_count {
            del.push(Oid::decode(s)?);
        }
        Ok(Self {
            header,
            set_id,
            sequence,
            add,
            del,
        })
    }
}

/// Reply to [`ComplexPingRequest`]; carries the (possibly fresh) set id.
#[derive(Clone, Debug)]
pub struct ComplexPingReply {
    pub header: ReplyHeader,
    pub set_id: SetId,
    pub status: u32,
}

impl ComplexPingReply {
    pub fn new(set_id: SetId, status: u32) -> Self {
        Self {
            header: ReplyHeader::new(),
            set_id,
            status,
        }
    }

    pub fn encode(&self) -> NdrResult<Bytes> {
        let mut s = MarshalStream::new(Phase::OutboundReply);
        self.header.encode(&mut s)?;
        self.set_id.encode(&mut s)?;
        s.put_u32(self.status)?;
        Ok(s.finish())
    }

    pub fn decode(s: &mut UnmarshalStream) -> NdrResult<Self> {
        Ok(Self {
            header: ReplyHeader::decode(s)?,
            set_id: SetId::decode(s)?,
            status: s.get_u32()?,
        })
    }
}

/// Liveness reply: protocol version and status.
#[derive(Clone, Debug)]
pub struct AliveReply {
    pub header: ReplyHeader,
    pub version: ProtocolVersion,
    pub status: u32,
}

impl AliveReply {
    pub fn new() -> Self {
        Self {
            header: ReplyHeader::new(),
            version: ProtocolVersion::CURRENT,
            status: 0,
        }
    }

    pub fn encode(&self) -> NdrResult<Bytes> {
        let mut s = MarshalStream::new(Phase::OutboundReply);
        self.header.encode(&mut s)?;
        self.version.encode(&mut s)?;
        s.put_u32(self.status)?;
        Ok(s.finish())
    }

    pub fn decode(s: &mut UnmarshalStream) -> NdrResult<Self> {
        Ok(Self {
            header: ReplyHeader::decode(s)?,
            version: ProtocolVersion::decode(s)?,
            status: s.get_u32()?,
        })
    }
}

impl Default for AliveReply {
    fn default() -> Self {
        Self::new()
    }
}

/// Activate a class: instantiate (or fetch its factory) and export the
/// requested interfaces.
#[derive(Clone, Debug)]
pub struct ActivateRequest {
    pub header: CallHeader,
    pub clsid: Clsid,
    pub mode: u32,
    pub iids: Vec<Iid>,
}

impl ActivateRequest {
    pub fn new(clsid: Clsid, mode: u32, iids: Vec<Iid>) -> Self {
        Self {
            header: CallHeader::new(),
            clsid,
            mode,
            iids,
        }
    }

    pub fn encode(&self) -> NdrResult<Bytes> {
        let mut s = MarshalStream::new(Phase::OutboundRequest);
        self.header.encode(&mut s)?;
        self.clsid.encode(&mut s)?;
        s.put_u32(self.mode)?;
        s.put_u16(self.iids.len() as u16)?;
        s.put_u16(0)?; // pad
        for iid in &self.iids {
            iid.encode(&mut s)?;
        }
        Ok(s.finish())
    }

    pub fn decode(s: &mut UnmarshalStream) -> NdrResult<Self> {
        let header = CallHeader::decode(s)?;
        let clsid = Clsid::decode(s)?;
        let mode = s.get_u32()?;
        let count = check_batch(s.get_u16()? as usize)?;
        let _pad = s.get_u16()?;
        let mut iids = Vec::with_capacity(count);
        for _ in 0..count {
            iids.push(Iid::decode(s)?);
        }
        Ok(Self {
            header,
            clsid,
            mode,
            iids,
        })
    }
}

/// Outcome of one requested interface: a reference record on success, a
/// status code (and a null slot) on failure.
#[derive(Clone, Debug)]
pub struct ActivationResult {
    pub status: u32,
    pub record: Option<RefRecord>,
}

impl ActivationResult {
    pub fn success(record: RefRecord) -> Self {
        Self {
            status: 0,
            record: Some(record),
        }
    }

    pub fn failure(status: u32) -> Self {
        Self {
            status,
            record: None,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == 0 && self.record.is_some()
    }

    fn encode(&self, s: &mut MarshalStream) -> NdrResult<()> {
        s.put_u32(self.status)?;
        match &self.record {
            Some(record) => {
                s.put_u32(1)?;
                record.encode(s)
            }
            None => s.put_u32(0),
        }
    }

    fn decode(s: &mut UnmarshalStream) -> Result<Self> {
        let status = s.get_u32()?;
        let present = s.get_u32()?;
        let record = if present != 0 {
            Some(RefRecord::decode(s)?)
        } else {
            None
        };
        Ok(Self { status, record })
    }
}

/// Reply to [`ActivateRequest`].
#[derive(Clone, Debug)]
pub struct ActivateReply {
    pub header: ReplyHeader,
    pub oxid: Oxid,
    pub bindings: DualStringArray,
    /// One slot per requested interface, in request order.
    pub results: Vec<ActivationResult>,
    /// Aggregate verdict: success, partial-success, or a failure code.
    pub status: u32,
}

impl ActivateReply {
    pub fn new(
        oxid: Oxid,
        bindings: DualStringArray,
        results: Vec<ActivationResult>,
        status: u32,
    ) -> Self {
        Self {
            header: ReplyHeader::new(),
            oxid,
            bindings,
            results,
            status,
        }
    }

    pub fn failure(status: u32) -> Self {
        Self::new(Oxid::default(), DualStringArray::new(), Vec::new(), status)
    }

    pub fn encode(&self) -> NdrResult<Bytes> {
        let mut s = MarshalStream::new(Phase::OutboundReply);
        self.header.encode(&mut s)?;
        self.oxid.encode(&mut s)?;
        self.bindings.encode(&mut s)?;
        s.put_u32(self.results.len() as u32)?;
        for result in &self.results {
            result.encode(&mut s)?;
        }
        s.put_u32(self.status)?;
        Ok(s.finish())
    }

    pub fn decode(s: &mut UnmarshalStream) -> Result<Self> {
        let header = ReplyHeader::decode(s)?;
        let oxid = Oxid::decode(s)?;
        let bindings = DualStringArray::decode(s)?;
        let count = check_batch(s.get_u32()? as usize)?;
        let mut results = Vec::with_capacity(count);
        for _ in 0..count {
            results.push(ActivationResult::decode(s)?);
        }
        let status = s.get_u32()?;
        Ok(Self {
            header,
            oxid,
            bindings,
            results,
            status,
        })
    }
}

/// Decode helper for services and tests.
pub fn reader(bytes: Bytes, phase: Phase) -> UnmarshalStream {
    UnmarshalStream::new(bytes, ByteOrder::native(), phase)
}
