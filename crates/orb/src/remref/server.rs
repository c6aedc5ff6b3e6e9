//! Remote reference-counting service
//!
//! Applies query-interface and reference-count batches to the export
//! table. Batches never abort on the first failure: every element is
//! processed and the reply carries per-element statuses plus the
//! aggregate verdict.

use std::sync::Arc;

use bytes::Bytes;
use orb_ndr::Phase;

use crate::exporter::Exporter;
use crate::types::{wire_status, OrbError, Result};

use super::protocol::{
    opnum, reader, AddRefReply, AddRefRequest, QiResult, QueryInterfaceReply,
    QueryInterfaceRequest, ReleaseReply, ReleaseRequest,
};

/// Aggregate verdict over a batch of per-element statuses.
pub fn batch_status(results: &[u32]) -> u32 {
    let failed = results.iter().filter(|&&s| s != wire_status::OK).count();
    if results.is_empty() || failed == results.len() {
        wire_status::NO_INTERFACE
    } else if failed > 0 {
        wire_status::PARTIAL
    } else {
        wire_status::OK
    }
}

/// Server half of the remote reference-counting interface.
pub struct RemRefService {
    exporter: Arc<Exporter>,
}

impl RemRefService {
    pub fn new(exporter: Arc<Exporter>) -> Self {
        Self { exporter }
    }

    /// Route one inbound operation.
    pub fn handle(&self, op: u16, input: Bytes) -> Result<Bytes> {
        match op {
            opnum::QUERY_INTERFACE => self.handle_query_interface(input),
            opnum::ADD_REF => self.handle_add_ref(input),
            opnum::RELEASE => self.handle_release(input),
            other => Err(OrbError::MethodOutOfRange {
                opnum: other,
                count: 3,
            }),
        }
    }

    fn handle_query_interface(&self, input: Bytes) -> Result<Bytes> {
        let request = QueryInterfaceRequest::decode(&mut reader(input, Phase::InboundRequest))?;

        let mut results = Vec::with_capacity(request.iids.len());
        for iid in &request.iids {
            match self.exporter.query_interface(request.anchor, *iid, request.refs) {
                Ok(record) => results.push(QiResult::success(record.std)),
                Err(e) => {
                    tracing::debug!(%iid, error = %e, "query interface refused");
                    results.push(QiResult::failure(e.to_wire_status()));
                }
            }
        }

        let statuses: Vec<u32> = results.iter().map(|r| r.status).collect();
        let reply = QueryInterfaceReply::new(results, batch_status(&statuses));
        Ok(reply.encode()?)
    }

    fn handle_add_ref(&self, input: Bytes) -> Result<Bytes> {
        let request = AddRefRequest::decode(&mut reader(input, Phase::InboundRequest))?;

        let mut results = Vec::with_capacity(request.changes.len());
        for change in &request.changes {
            match self.exporter.table().add_ref(change.ipid, change.refs) {
                Ok(_) => results.push(wire_status::OK),
                Err(e) => results.push(e.to_wire_status()),
            }
        }

        let status = if results.iter().all(|&s| s == wire_status::OK) {
            wire_status::OK
        } else {
            batch_status(&results)
        };
        Ok(AddRefReply::new(results, status).encode()?)
    }

    fn handle_release(&self, input: Bytes) -> Result<Bytes> {
        let request = ReleaseRequest::decode(&mut reader(input, Phase::InboundRequest))?;

        for change in &request.changes {
            if let Err(e) = self.exporter.table().release(change.ipid, change.refs) {
                tracing::warn!(ipid = %change.ipid, refs = change.refs, error = %e,
                    "release against unknown interface");
            }
        }

        Ok(ReleaseReply::new(wire_status::OK).encode()?)
    }
}
