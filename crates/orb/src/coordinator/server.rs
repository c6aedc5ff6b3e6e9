//! Coordinator service
//!
//! Creates objects on request, resolves this exporter's address, and
//! feeds the ping protocol into the export table's lease countdowns.

use std::sync::Arc;

use bytes::Bytes;
use orb_ndr::Phase;

use crate::exporter::Exporter;
use crate::registry::ClassRegistry;
use crate::remref::batch_status;
use crate::transport::PeerInfo;
use crate::types::{wire_status, OrbError, Result};

use super::protocol::{
    activation_mode, opnum, reader, ActivateReply, ActivateRequest, ActivationResult, AliveReply,
    ComplexPingReply, ComplexPingRequest, PingReply, ResolveReply, ResolveRequest,
    SimplePingRequest,
};

/// Server half of the coordinator interface.
pub struct CoordinatorService {
    exporter: Arc<Exporter>,
    registry: Arc<dyn ClassRegistry>,
}

impl CoordinatorService {
    pub fn new(exporter: Arc<Exporter>, registry: Arc<dyn ClassRegistry>) -> Self {
        Self { exporter, registry }
    }

    /// Route one inbound operation.
    pub fn handle(&self, peer: PeerInfo, op: u16, input: Bytes) -> Result<Bytes> {
        match op {
            opnum::RESOLVE => self.handle_resolve(input),
            opnum::SIMPLE_PING => self.handle_simple_ping(peer, input),
            opnum::COMPLEX_PING => self.handle_complex_ping(peer, input),
            opnum::ALIVE => Ok(AliveReply::new().encode()?),
            opnum::ACTIVATE => self.handle_activate(peer, input),
            other => Err(OrbError::MethodOutOfRange {
                opnum: other,
                count: 5,
            }),
        }
    }

    fn handle_resolve(&self, input: Bytes) -> Result<Bytes> {
        let request = ResolveRequest::decode(&mut reader(input, Phase::InboundRequest))?;
        let reply = if request.oxid == self.exporter.oxid() {
            ResolveReply::new(self.exporter.bindings().clone(), wire_status::OK)
        } else {
            tracing::debug!(oxid = %request.oxid, "resolve for foreign exporter refused");
            ResolveReply::new(Default::default(), wire_status::INVALID_IDENTIFIER)
        };
        Ok(reply.encode()?)
    }

    fn handle_simple_ping(&self, peer: PeerInfo, input: Bytes) -> Result<Bytes> {
        let request = SimplePingRequest::decode(&mut reader(input, Phase::InboundRequest))?;
        let status = match self.exporter.simple_ping(peer.session, request.set_id) {
            Ok(()) => wire_status::OK,
            Err(e) => e.to_wire_status(),
        };
        Ok(PingReply::new(status).encode()?)
    }

    fn handle_complex_ping(&self, peer: PeerInfo, input: Bytes) -> Result<Bytes> {
        let request = ComplexPingRequest::decode(&mut reader(input, Phase::InboundRequest))?;
        let reply = match self.exporter.complex_ping(
            peer.session,
            request.set_id,
            request.sequence,
            &request.add,
            &request.del,
        ) {
            Ok(set_id) => ComplexPingReply::new(set_id, wire_status::OK),
            Err(e) => ComplexPingReply::new(request.set_id, e.to_wire_status()),
        };
        Ok(reply.encode()?)
    }

    /// Activation: authenticate, instantiate, then query every requested
    /// interface independently — one failed interface never aborts its
    /// siblings, and the reply's aggregate status reports success,
    /// partial-success, or not-supported.
    fn handle_activate(&self, peer: PeerInfo, input: Bytes) -> Result<Bytes> {
        let request = ActivateRequest::decode(&mut reader(input, Phase::InboundRequest))?;

        if !peer.authenticated {
            tracing::warn!(clsid = %request.clsid, "activation refused: channel unauthenticated");
            return Ok(ActivateReply::failure(wire_status::ACCESS_DENIED).encode()?);
        }

        let factory = match self.registry.lookup(&request.clsid) {
            Some(factory) => factory,
            None => {
                return Ok(
                    ActivateReply::failure(wire_status::CLASS_NOT_REGISTERED).encode()?
                )
            }
        };

        let object = match request.mode {
            activation_mode::CLASS_OBJECT => match factory.class_object() {
                Some(object) => object,
                None => {
                    return Ok(
                        ActivateReply::failure(wire_status::CLASS_NOT_REGISTERED).encode()?
                    )
                }
            },
            _ => factory.create_instance(),
        };

        let oid = self.exporter.register(object.clone(), request.clsid);

        let mut results = Vec::with_capacity(request.iids.len());
        for iid in &request.iids {
            match object.interface_table(iid) {
                Some(table) => match self.exporter.add_interface(oid, *iid, table, 1) {
                    Ok(ipid) => {
                        let record = self.exporter.record_for(oid, ipid, *iid, 1);
                        results.push(ActivationResult::success(record));
                    }
                    Err(e) => results.push(ActivationResult::failure(e.to_wire_status())),
                },
                None => results.push(ActivationResult::failure(wire_status::NO_INTERFACE)),
            }
        }

        let statuses: Vec<u32> = results.iter().map(|r| r.status).collect();
        let status = batch_status(&statuses);
        if status == wire_status::NO_INTERFACE
            && self.exporter.table().interface_count(oid) == Some(0)
        {
            // Nothing was exported; a bare registration must not linger.
            let _ = self.exporter.table().unregister(oid);
        }

        tracing::debug!(clsid = %request.clsid, %oid, status, "activation completed");
        let reply = ActivateReply::new(
            self.exporter.oxid(),
            self.exporter.bindings().clone(),
            results,
            status,
        );
        Ok(reply.encode()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exporter::{InterfaceSet, MethodTable, ServerObject};
    use crate::registry::InProcRegistry;
    use crate::types::{Clsid, DualStringArray, Iid, SetId};
    use std::time::Duration;

    const IID_1: Iid = Iid::from_u128(1);
    const IID_2: Iid = Iid::from_u128(2);
    const IID_3: Iid = Iid::from_u128(3);
    const CLSID: Clsid = Clsid::from_u128(0x100);

    struct Widget {
        set: InterfaceSet,
    }

    impl Widget {
        fn new() -> Arc<Self> {
            // Supports interfaces 1 and 3, not 2.
            let mut set = InterfaceSet::new();
            for iid in [IID_1, IID_3] {
                set.insert(
                    iid,
                    MethodTable::new()
                        .method(|_ctx, args| Box::pin(async move { Ok(args) })),
                );
            }
            Arc::new(Self { set })
        }
    }

    impl ServerObject for Widget {
        fn interfaces(&self) -> Vec<Iid> {
            self.set.iids()
        }
        fn interface_table(&self, iid: &Iid) -> Option<Arc<MethodTable>> {
            self.set.get(iid)
        }
    }

    fn service() -> (CoordinatorService, Arc<Exporter>) {
        let exporter = Arc::new(Exporter::new(
            DualStringArray::with_tcp("127.0.0.1:4100"),
            Duration::from_secs(60),
        ));
        let registry = Arc::new(InProcRegistry::new());
        registry.register_fn(CLSID, || Widget::new());
        (
            CoordinatorService::new(exporter.clone(), registry),
            exporter,
        )
    }

    fn peer() -> PeerInfo {
        PeerInfo {
            authenticated: true,
            session: 1,
        }
    }

    #[test]
    fn test_partial_activation() {
        let (service, _) = service();
        let request = ActivateRequest::new(
            CLSID,
            activation_mode::INSTANCE,
            vec![IID_1, IID_2, IID_3],
        );
        let reply_bytes = service
            .handle(peer(), opnum::ACTIVATE, request.encode().unwrap())
            .unwrap();
        let reply =
            ActivateReply::decode(&mut reader(reply_bytes, Phase::InboundReply)).unwrap();

        assert_eq!(reply.status, wire_status::PARTIAL);
        assert!(reply.results[0].is_success());
        assert_eq!(reply.results[1].status, wire_status::NO_INTERFACE);
        assert!(reply.results[1].record.is_none());
        assert!(reply.results[2].is_success());
    }

    #[test]
    fn test_activation_all_failed_is_not_supported() {
        let (service, exporter) = service();
        let request = ActivateRequest::new(
            CLSID,
            activation_mode::INSTANCE,
            vec![Iid::from_u128(0xAA), Iid::from_u128(0xBB)],
        );
        let reply_bytes = service
            .handle(peer(), opnum::ACTIVATE, request.encode().unwrap())
            .unwrap();
        let reply =
            ActivateReply::decode(&mut reader(reply_bytes, Phase::InboundReply)).unwrap();
        assert_eq!(reply.status, wire_status::NO_INTERFACE);
        // The bare registration was rolled back.
        assert!(exporter.table().is_empty());
    }

    #[test]
    fn test_activation_requires_authentication() {
        let (service, _) = service();
        let request = ActivateRequest::new(CLSID, activation_mode::INSTANCE, vec![IID_1]);
        let unauthenticated = PeerInfo {
            authenticated: false,
            session: 1,
        };
        let reply_bytes = service
            .handle(unauthenticated, opnum::ACTIVATE, request.encode().unwrap())
            .unwrap();
        let reply =
            ActivateReply::decode(&mut reader(reply_bytes, Phase::InboundReply)).unwrap();
        assert_eq!(reply.status, wire_status::ACCESS_DENIED);
        assert!(reply.results.is_empty());
    }

    #[test]
    fn test_unknown_class() {
        let (service, _) = service();
        let request = ActivateRequest::new(
            Clsid::from_u128(0xFFFF),
            activation_mode::INSTANCE,
            vec![IID_1],
        );
        let reply_bytes = service
            .handle(peer(), opnum::ACTIVATE, request.encode().unwrap())
            .unwrap();
        let reply =
            ActivateReply::decode(&mut reader(reply_bytes, Phase::InboundReply)).unwrap();
        assert_eq!(reply.status, wire_status::CLASS_NOT_REGISTERED);
    }

    #[test]
    fn test_resolve_local_and_foreign() {
        let (service, exporter) = service();
        let request = ResolveRequest::new(exporter.oxid());
        let reply_bytes = service
            .handle(peer(), opnum::RESOLVE, request.encode().unwrap())
            .unwrap();
        let reply = ResolveReply::decode(&mut reader(reply_bytes, Phase::InboundReply)).unwrap();
        assert_eq!(reply.status, wire_status::OK);
        assert_eq!(reply.bindings.primary_addr(), Some("127.0.0.1:4100"));

        let request = ResolveRequest::new(crate::types::Oxid::new(0xBAD));
        let reply_bytes = service
            .handle(peer(), opnum::RESOLVE, request.encode().unwrap())
            .unwrap();
        let reply = ResolveReply::decode(&mut reader(reply_bytes, Phase::InboundReply)).unwrap();
        assert_eq!(reply.status, wire_status::INVALID_IDENTIFIER);
    }

    #[test]
    fn test_ping_flow() {
        let (service, exporter) = service();
        let record = exporter
            .export(Widget::new(), CLSID, IID_1, 1)
            .unwrap();

        let request =
            ComplexPingRequest::new(SetId::NONE, 1, vec![record.std.oid], vec![]);
        let reply_bytes = service
            .handle(peer(), opnum::COMPLEX_PING, request.encode().unwrap())
            .unwrap();
        let reply =
            ComplexPingReply::decode(&mut reader(reply_bytes, Phase::InboundReply)).unwrap();
        assert_eq!(reply.status, wire_status::OK);
        assert!(!reply.set_id.is_none());

        let request = SimplePingRequest::new(reply.set_id);
        let reply_bytes = service
            .handle(peer(), opnum::SIMPLE_PING, request.encode().unwrap())
            .unwrap();
        let ping = PingReply::decode(&mut reader(reply_bytes, Phase::InboundReply)).unwrap();
        assert_eq!(ping.status, wire_status::OK);

        // A different session must not renew through the same set.
        let other = PeerInfo {
            authenticated: true,
            session: 2,
        };
        let request = SimplePingRequest::new(reply.set_id);
        let reply_bytes = service
            .handle(other, opnum::SIMPLE_PING, request.encode().unwrap())
            .unwrap();
        let ping = PingReply::decode(&mut reader(reply_bytes, Phase::InboundReply)).unwrap();
        assert_eq!(ping.status, wire_status::INVALID_IDENTIFIER);
    }
}
