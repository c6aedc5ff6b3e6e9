//! Inbound call dispatch
//!
//! The single sink the transport hands every decoded request frame to.
//! Well-known interface ids route to the coordinator and the remote
//! reference-counting service; everything else routes by IPID through the
//! export table to a stublet's method table.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use orb_ndr::{ByteOrder, MarshalStream, Phase, UnmarshalStream};

use crate::coordinator::{CoordinatorService, COORDINATOR_IID};
use crate::exporter::{CallContext, Exporter};
use crate::registry::ClassRegistry;
use crate::remref::{RemRefService, REMREF_IID};
use crate::transport::{InboundHandler, PeerInfo};
use crate::types::{wire_status, CallHeader, Iid, Ipid, OrbError, ReplyHeader, Result};

/// Routes inbound calls to their services and stublets.
pub struct Dispatcher {
    exporter: Arc<Exporter>,
    coordinator: CoordinatorService,
    remref: RemRefService,
}

impl Dispatcher {
    pub fn new(exporter: Arc<Exporter>, registry: Arc<dyn ClassRegistry>) -> Self {
        Self {
            coordinator: CoordinatorService::new(exporter.clone(), registry),
            remref: RemRefService::new(exporter.clone()),
            exporter,
        }
    }

    /// Dispatch one object call: frame header off, stublet handler in,
    /// reply frame back. Dispatch failures travel as status codes in an
    /// otherwise well-formed reply.
    async fn handle_object_call(
        &self,
        ipid: Ipid,
        opnum: u16,
        input: Bytes,
    ) -> Result<Bytes> {
        let mut r = UnmarshalStream::new(input, ByteOrder::native(), Phase::InboundRequest);
        let header = CallHeader::decode(&mut r)?;
        let rest = r.remaining();
        let args = r.take_bytes(rest)?;

        // The returned table is the strong interface reference: the
        // object cannot be torn down under the running handler.
        match self.exporter.table().dispatch(ipid, opnum) {
            Ok((_table, handler)) => {
                let ctx = CallContext {
                    header,
                    ipid,
                    opnum,
                };
                match handler(ctx, args).await {
                    Ok(payload) => encode_reply(wire_status::OK, &payload),
                    Err(e) => {
                        tracing::debug!(%ipid, opnum, error = %e, "method handler failed");
                        encode_reply(e.to_wire_status(), &[])
                    }
                }
            }
            Err(e) => {
                tracing::debug!(%ipid, opnum, error = %e, "dispatch refused");
                encode_reply(e.to_wire_status(), &[])
            }
        }
    }
}

fn encode_reply(status: u32, payload: &[u8]) -> Result<Bytes> {
    let mut s = MarshalStream::new(Phase::OutboundReply);
    ReplyHeader::new().encode(&mut s)?;
    s.put_u32(status)?;
    s.put_slice(payload)?;
    Ok(s.finish())
}

#[async_trait]
impl InboundHandler for Dispatcher {
    async fn handle(
        &self,
        peer: PeerInfo,
        iid: Iid,
        ipid: Option<Ipid>,
        opnum: u16,
        input: Bytes,
    ) -> Result<Bytes> {
        if iid == COORDINATOR_IID {
            return self.coordinator.handle(peer, opnum, input);
        }
        if iid == REMREF_IID {
            return self.remref.handle(opnum, input);
        }
        let ipid = ipid.ok_or_else(|| {
            OrbError::InvalidFrame("object call without an IPID routing key".into())
        })?;
        self.handle_object_call(ipid, opnum, input).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exporter::{InterfaceSet, MethodTable, ServerObject};
    use crate::registry::InProcRegistry;
    use crate::types::{Clsid, DualStringArray};
    use std::time::Duration;

    const IID_ECHO: Iid = Iid::from_u128(0xE0);

    struct Echo {
        set: InterfaceSet,
    }

    impl Echo {
        fn new() -> Arc<Self> {
            let mut set = InterfaceSet::new();
            set.insert(
                IID_ECHO,
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

    fn fixture() -> (Dispatcher, Ipid) {
        let exporter = Arc::new(Exporter::new(
            DualStringArray::with_tcp("127.0.0.1:4100"),
            Duration::from_secs(60),
        ));
        let record = exporter
            .export(Echo::new(), Clsid::from_u128(1), IID_ECHO, 1)
            .unwrap();
        let registry = Arc::new(InProcRegistry::new());
        (Dispatcher::new(exporter, registry), record.std.ipid)
    }

    fn request(args: &[u8]) -> Bytes {
        let mut s = MarshalStream::new(Phase::OutboundRequest);
        CallHeader::new().encode(&mut s).unwrap();
        s.put_slice(args).unwrap();
        s.finish()
    }

    fn parse_reply(bytes: Bytes) -> (u32, Bytes) {
        let mut r = UnmarshalStream::new(bytes, ByteOrder::native(), Phase::InboundReply);
        let _header = ReplyHeader::decode(&mut r).unwrap();
        let status = r.get_u32().unwrap();
        let rest = r.remaining();
        (status, r.take_bytes(rest).unwrap())
    }

    fn peer() -> PeerInfo {
        PeerInfo {
            authenticated: true,
            session: 1,
        }
    }

    #[tokio::test]
    async fn test_object_call_roundtrip() {
        let (dispatcher, ipid) = fixture();
        let reply = dispatcher
            .handle(peer(), IID_ECHO, Some(ipid), 0, request(b"payload"))
            .await
            .unwrap();
        let (status, payload) = parse_reply(reply);
        assert_eq!(status, wire_status::OK);
        assert_eq!(payload, Bytes::from_static(b"payload"));
    }

    #[tokio::test]
    async fn test_unknown_ipid_is_invalid_identifier() {
        let (dispatcher, _) = fixture();
        let bogus = Ipid::derive(0xBAD, crate::types::Oid::new(77));
        let reply = dispatcher
            .handle(peer(), IID_ECHO, Some(bogus), 0, request(b""))
            .await
            .unwrap();
        let (status, _) = parse_reply(reply);
        assert_eq!(status, wire_status::INVALID_IDENTIFIER);
    }

    #[tokio::test]
    async fn test_method_out_of_range() {
        let (dispatcher, ipid) = fixture();
        let reply = dispatcher
            .handle(peer(), IID_ECHO, Some(ipid), 9, request(b""))
            .await
            .unwrap();
        let (status, _) = parse_reply(reply);
        assert_eq!(status, wire_status::OPNUM_OUT_OF_RANGE);
    }

    #[tokio::test]
    async fn test_missing_ipid_rejected() {
        let (dispatcher, _) = fixture();
        let result = dispatcher
            .handle(peer(), IID_ECHO, None, 0, request(b""))
            .await;
        assert!(matches!(result, Err(OrbError::InvalidFrame(_))));
    }
}
