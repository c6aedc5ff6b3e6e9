//! Remote reference-counting client

use std::sync::Arc;

use orb_ndr::Phase;

use crate::transport::Channel;
use crate::types::{wire_status, Iid, Ipid, OrbError, Result, StdRef};

use super::protocol::{
    opnum, reader, AddRefReply, AddRefRequest, QiResult, QueryInterfaceReply,
    QueryInterfaceRequest, RefChange, ReleaseReply, ReleaseRequest, REMREF_IID,
};

/// Client half of the remote reference-counting interface, bound to one
/// exporter's channel.
pub struct RemRefClient {
    channel: Arc<dyn Channel>,
}

impl RemRefClient {
    pub fn new(channel: Arc<dyn Channel>) -> Self {
        Self { channel }
    }

    /// Query a batch of interfaces anchored at a known IPID. Returns one
    /// result per IID, in request order; individual failures do not fail
    /// the call.
    pub async fn query_interface(
        &self,
        anchor: Ipid,
        iids: Vec<Iid>,
        refs: u32,
    ) -> Result<Vec<QiResult>> {
        let request = QueryInterfaceRequest::new(anchor, iids, refs);
        let reply_bytes = self
            .channel
            .invoke(REMREF_IID, None, opnum::QUERY_INTERFACE, request.encode()?)
            .await?;
        let reply = QueryInterfaceReply::decode(&mut reader(reply_bytes, Phase::InboundReply))?;
        Ok(reply.results)
    }

    /// Query a single interface; `None` when the object refuses it.
    pub async fn query_single(
        &self,
        anchor: Ipid,
        iid: Iid,
        refs: u32,
    ) -> Result<Option<StdRef>> {
        let mut results = self.query_interface(anchor, vec![iid], refs).await?;
        Ok(results.pop().and_then(|r| r.std))
    }

    /// Add remote references in one batch.
    pub async fn add_ref(&self, changes: Vec<RefChange>) -> Result<()> {
        let request = AddRefRequest::new(changes);
        let reply_bytes = self
            .channel
            .invoke(REMREF_IID, None, opnum::ADD_REF, request.encode()?)
            .await?;
        let reply = AddRefReply::decode(&mut reader(reply_bytes, Phase::InboundReply))?;
        if reply.status == wire_status::OK {
            Ok(())
        } else {
            Err(OrbError::InvalidFrame(format!(
                "add-ref batch failed with status 0x{:08x}",
                reply.status
            )))
        }
    }

    /// Release remote references in one batch.
    pub async fn release(&self, changes: Vec<RefChange>) -> Result<()> {
        let request = ReleaseRequest::new(changes);
        let reply_bytes = self
            .channel
            .invoke(REMREF_IID, None, opnum::RELEASE, request.encode()?)
            .await?;
        let reply = ReleaseReply::decode(&mut reader(reply_bytes, Phase::InboundReply))?;
        if reply.status == wire_status::OK {
            Ok(())
        } else {
            Err(OrbError::InvalidFrame(format!(
                "release batch failed with status 0x{:08x}",
                reply.status
            )))
        }
    }
}
