//! Remote reference-counting wire protocol
//!
//! Batch-shaped request/reply messages for querying interfaces on an
//! exported object and for moving remote reference counts. Every request
//! opens with the call frame header.

use bytes::Bytes;
use orb_ndr::{ByteOrder, MarshalStream, Phase, Result as NdrResult, UnmarshalStream};

use crate::types::{CallHeader, Iid, Ipid, ReplyHeader, StdRef, MAX_BATCH};

/// Interface id of the remote reference-counting service.
pub const REMREF_IID: Iid = Iid::from_u128(0x0000_0131_0000_0000_C000_0000_0000_0046);

/// Operation numbers.
pub mod opnum {
    pub const QUERY_INTERFACE: u16 = 0;
    pub const ADD_REF: u16 = 1;
    pub const RELEASE: u16 = 2;
}

fn check_batch(count: usize) -> NdrResult<usize> {
    if count > MAX_BATCH {
        return Err(orb_ndr::NdrError::CountLimitExceeded {
            requested: count,
            limit: MAX_BATCH,
        });
    }
    Ok(count)
}

/// Query one or more interfaces, anchored at a known IPID.
#[derive(Clone, Debug)]
pub struct QueryInterfaceRequest {
    pub header: CallHeader,
    /// Routing anchor: any IPID already exposed by the target object.
    pub anchor: Ipid,
    /// Public references requested for each interface that succeeds.
    pub refs: u32,
    pub iids: Vec<Iid>,
}

impl QueryInterfaceRequest {
    pub fn new(anchor: Ipid, iids: Vec<Iid>, refs: u32) -> Self {
        Self {
            header: CallHeader::new(),
            anchor,
            refs,
            iids,
        }
    }

    pub fn encode(&self) -> NdrResult<Bytes> {
        let mut s = MarshalStream::new(Phase::OutboundRequest);
        self.header.encode(&mut s)?;
        self.anchor.encode(&mut s)?;
        s.put_u32(self.refs)?;
        s.put_u16(self.iids.len() as u16)?;
        s.put_u16(0)?; // pad
        for iid in &self.iids {
            iid.encode(&mut s)?;
        }
        Ok(s.finish())
    }

    pub fn decode(s: &mut UnmarshalStream) -> NdrResult<Self> {
        let header = CallHeader::decode(s)?;
        let anchor = Ipid::decode(s)?;
        let refs = s.get_u32()?;
        let count = check_batch(s.get_u16()? as usize)?;
        let _pad = s.get_u16()?;
        let mut iids = Vec::with_capacity(count);
        for _ in 0..count {
            iids.push(Iid::decode(s)?);
        }
        Ok(Self {
            header,
            anchor,
            refs,
            iids,
        })
    }
}

/// Outcome for one queried interface.
#[derive(Clone, Debug)]
pub struct QiResult {
    pub status: u32,
    pub std: Option<StdRef>,
}

impl QiResult {
    pub fn success(std: StdRef) -> Self {
        Self {
            status: 0,
            std: Some(std),
        }
    }

    pub fn failure(status: u32) -> Self {
        Self { status, std: None }
    }

    pub fn is_success(&self) -> bool {
        self.status == 0 && self.std.is_some()
    }

    fn encode(&self, s: &mut MarshalStream) -> NdrResult<()> {
        s.put_u32(self.status)?;
        match &self.std {
            Some(std) => {
                s.put_u32(1)?;
                std.encode(s)
            }
            None => s.put_u32(0),
        }
    }

    fn decode(s: &mut UnmarshalStream) -> NdrResult<Self> {
        let status = s.get_u32()?;
        let present = s.get_u32()?;
        let std = if present != 0 {
            Some(StdRef::decode(s)?)
        } else {
            None
        };
        Ok(Self { status, std })
    }
}

/// Reply to [`QueryInterfaceRequest`]; one result per requested IID, in
/// request order, plus the aggregate verdict.
#[derive(Clone, Debug)]
pub struct QueryInterfaceReply {
    pub header: ReplyHeader,
    pub results: Vec<QiResult>,
    pub status: u32,
}

impl QueryInterfaceReply {
    pub fn new(results: Vec<QiResult>, status: u32) -> Self {
        Self {
            header: ReplyHeader::new(),
            results,
            status,
        }
    }

    pub fn encode(&self) -> NdrResult<Bytes> {
        let mut s = MarshalStream::new(Phase::OutboundReply);
        self.header.encode(&mut s)?;
        s.put_u32(self.results.len() as u32)?;
        for result in &self.results {
            result.encode(&mut s)?;
        }
        s.put_u32(self.status)?;
        Ok(s.finish())
    }

    pub fn decode(s: &mut UnmarshalStream) -> NdrResult<Self> {
        let header = ReplyHeader::decode(s)?;
        let count = check_batch(s.get_u32()? as usize)?;
        let mut results = Vec::with_capacity(count);
        for _ in 0..count {
            results.push(QiResult::decode(s)?);
        }
        let status = s.get_u32()?;
        Ok(Self {
            header,
            results,
            status,
        })
    }
}

/// One reference-count movement against one interface.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RefChange {
    pub ipid: Ipid,
    pub refs: u32,
}

impl RefChange {
    pub fn new(ipid: Ipid, refs: u32) -> Self {
        Self { ipid, refs }
    }

    fn encode(&self, s: &mut MarshalStream) -> NdrResult<()> {
        self.ipid.encode(s)?;
        s.put_u32(self.refs)
    }

    fn decode(s: &mut UnmarshalStream) -> NdrResult<Self> {
        Ok(Self {
            ipid: Ipid::decode(s)?,
            refs: s.get_u32()?,
        })
    }
}

/// Add remote references to a batch of interfaces.
#[derive(Clone, Debug)]
pub struct AddRefRequest {
    pub header: CallHeader,
    pub changes: Vec<RefChange>,
}

impl AddRefRequest {
    pub fn new(changes: Vec<RefChange>) -> Self {
        Self {
            header: CallHeader::new(),
            changes,
        }
    }

    pub fn encode(&self) -> NdrResult<Bytes> {
        let mut s = MarshalStream::new(Phase::OutboundRequest);
        self.header.encode(&mut s)?;
        encode_changes(&self.changes, &mut s)?;
        Ok(s.finish())
    }

    pub fn decode(s: &mut UnmarshalStream) -> NdrResult<Self> {
        let header = CallHeader::decode(s)?;
        let changes = decode_changes(s)?;
        Ok(Self { header, changes })
    }
}

/// Per-entry statuses for an add-ref batch.
#[derive(Clone, Debug)]
pub struct AddRefReply {
    pub header: ReplyHeader,
    pub results: Vec<u32>,
    pub status: u32,
}

impl AddRefReply {
    pub fn new(results: Vec<u32>, status: u32) -> Self {
        Self {
            header: ReplyHeader::new(),
            results,
            status,
        }
    }

    pub fn encode(&self) -> NdrResult<Bytes> {
        let mut s = MarshalStream::new(Phase::OutboundReply);
        self.header.encode(&mut s)?;
        s.put_u32(self.results.len() as u32)?;
        for status in &self.results {
            s.put_u32(*status)?;
        }
        s.put_u32(self.status)?;
        Ok(s.finish())
    }

    pub fn decode(s: &mut UnmarshalStream) -> NdrResult<Self> {
        let header = ReplyHeader::decode(s)?;
        let count = check_batch(s.get_u32()? as usize)?;
        let mut results = Vec::with_capacity(count);
        for _ in 0..count {
            results.push(s.get_u32()?);
        }
        let status = s.get_u32()?;
        Ok(Self {
            header,
            results,
            status,
        })
    }
}

/// Release remote references from a batch of interfaces. A proxy tearing
/// down sends exactly one of these covering every facelet it holds.
#[derive(Clone, Debug)]
pub struct ReleaseRequest {
    pub header: CallHeader,
    pub changes: Vec<RefChange>,
}

impl ReleaseRequest {
    pub fn new(changes: Vec<RefChange>) -> Self {
        Self {
            header: CallHeader::new(),
            changes,
        }
    }

    pub fn encode(&self) -> NdrResult<Bytes> {
        let mut s = MarshalStream::new(Phase::OutboundRequest);
        self.header.encode(&mut s)?;
        encode_changes(&self.changes, &mut s)?;
        Ok(s.finish())
    }

    pub fn decode(s: &mut UnmarshalStream) -> NdrResult<Self> {
        let header = CallHeader::decode(s)?;
        let changes = decode_changes(s)?;
        Ok(Self { header, changes })
    }
}

/// Reply to a release batch.
#[derive(Clone, Debug)]
pub struct ReleaseReply {
    pub header: ReplyHeader,
    pub status: u32,
}

impl ReleaseReply {
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
        let header = ReplyHeader::decode(s)?;
        let status = s.get_u32()?;
        Ok(Self { header, status })
    }
}

fn encode_changes(changes: &[RefChange], s: &mut MarshalStream) -> NdrResult<()> {
    s.put_u16(changes.len() as u16)?;
    s.put_u16(0)?; // pad
    for change in changes {
        change.encode(s)?;
    }
    Ok(())
}

fn decode_changes(s: &mut UnmarshalStream) -> NdrResult<Vec<RefChange>> {
    let count = check_batch(s.get_u16()? as usize)?;
    let _pad = s.get_u16()?;
    let mut changes = Vec::with_capacity(count);
    for _ in 0..count {
        changes.push(RefChange::decode(s)?);
    }
    Ok(changes)
}

/// Decode helper for tests and services.
pub fn reader(bytes: Bytes, phase: Phase) -> UnmarshalStream {
    UnmarshalStream::new(bytes, ByteOrder::native(), phase)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Oid, Oxid};

    #[test]
    fn test_query_interface_roundtrip() {
        let anchor = Ipid::derive(1, Oid::new(1));
        let request =
            QueryInterfaceRequest::new(anchor, vec![Iid::from_u128(1), Iid::from_u128(2)], 5);
        let bytes = request.encode().unwrap();
        let decoded =
            QueryInterfaceRequest::decode(&mut reader(bytes, Phase::InboundRequest)).unwrap();
        assert_eq!(decoded.anchor, anchor);
        assert_eq!(decoded.refs, 5);
        assert_eq!(decoded.iids, request.iids);
    }

    #[test]
    fn test_qi_reply_mixed_results() {
        let oid = Oid::new(3);
        let reply = QueryInterfaceReply::new(
            vec![
                QiResult::success(StdRef::new(Oxid::new(1), oid, Ipid::derive(9, oid), 5)),
                QiResult::failure(0x8000_4002),
            ],
            0x0008_0012,
        );
        let bytes = reply.encode().unwrap();
        let decoded = QueryInterfaceReply::decode(&mut reader(bytes, Phase::InboundReply)).unwrap();
        assert_eq!(decoded.results.len(), 2);
        assert!(decoded.results[0].is_success());
        assert!(!decoded.results[1].is_success());
        assert_eq!(decoded.status, 0x0008_0012);
    }

    #[test]
    fn test_ref_change_batches_roundtrip() {
        let changes = vec![
            RefChange::new(Ipid::derive(1, Oid::new(1)), 5),
            RefChange::new(Ipid::derive(2, Oid::new(1)), 3),
        ];
        let request = AddRefRequest::new(changes.clone());
        let decoded =
            AddRefRequest::decode(&mut reader(request.encode().unwrap(), Phase::InboundRequest))
                .unwrap();
        assert_eq!(decoded.changes, changes);

        let release = ReleaseRequest::new(changes.clone());
        let decoded =
            ReleaseRequest::decode(&mut reader(release.encode().unwrap(), Phase::InboundRequest))
                .unwrap();
        assert_eq!(decoded.changes, changes);
    }
}
