//! In-process loopback transport
//!
//! Pairs clients and servers inside one process without sockets. Each
//! inbound call still runs on its own tokio task, so the worker-pool
//! dispatch contract holds, and each connect yields a fresh transport
//! session — which is what scopes ping sets in tests and demos.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use bytes::Bytes;

use crate::types::{Iid, Ipid, OrbError, Result};

use super::{Channel, Connector, InboundHandler, PeerInfo};

/// Registry of named in-process endpoints.
pub struct LoopbackHub {
    endpoints: RwLock<HashMap<String, Arc<dyn InboundHandler>>>,
    next_session: AtomicU64,
}

impl LoopbackHub {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            endpoints: RwLock::new(HashMap::new()),
            next_session: AtomicU64::new(1),
        })
    }

    /// Expose a handler under an address.
    pub fn bind(&self, addr: impl Into<String>, handler: Arc<dyn InboundHandler>) {
        let addr = addr.into();
        tracing::debug!(%addr, "loopback endpoint bound");
        self.endpoints.write().unwrap().insert(addr, handler);
    }

    pub fn unbind(&self, addr: &str) {
        self.endpoints.write().unwrap().remove(addr);
    }

    fn lookup(&self, addr: &str) -> Option<Arc<dyn InboundHandler>> {
        self.endpoints.read().unwrap().get(addr).cloned()
    }

    fn allocate_session(&self) -> u64 {
        self.next_session.fetch_add(1, Ordering::Relaxed)
    }
}

/// Connector half of the loopback transport.
pub struct LoopbackConnector {
    hub: Arc<LoopbackHub>,
    authenticated: bool,
}

impl LoopbackConnector {
    pub fn new(hub: Arc<LoopbackHub>) -> Self {
        Self {
            hub,
            authenticated: true,
        }
    }

    /// A connector whose channels fail authentication; activation must
    /// refuse them.
    pub fn unauthenticated(hub: Arc<LoopbackHub>) -> Self {
        Self {
            hub,
            authenticated: false,
        }
    }
}

#[async_trait]
impl Connector for LoopbackConnector {
    async fn connect(&self, addr: &str) -> Result<Arc<dyn Channel>> {
        let handler = self
            .hub
            .lookup(addr)
            .ok_or_else(|| OrbError::Transport(format!("no endpoint bound at {addr}")))?;
        Ok(Arc::new(LoopbackChannel {
            handler,
            peer: PeerInfo {
                authenticated: self.authenticated,
                session: self.hub.allocate_session(),
            },
        }))
    }
}

/// One connected loopback channel.
pub struct LoopbackChannel {
    handler: Arc<dyn InboundHandler>,
    peer: PeerInfo,
}

#[async_trait]
impl Channel for LoopbackChannel {
    fn is_authenticated(&self) -> bool {
        self.peer.authenticated
    }

    fn session(&self) -> u64 {
        self.peer.session
    }

    async fn invoke(
        &self,
        iid: Iid,
        ipid: Option<Ipid>,
        opnum: u16,
        input: Bytes,
    ) -> Result<Bytes> {
        let handler = self.handler.clone();
        let peer = self.peer;
        // Serve the call from the worker pool, like a real listener would.
        tokio::spawn(async move { handler.handle(peer, iid, ipid, opnum, input).await })
            .await
            .map_err(|e| OrbError::Transport(format!("inbound worker failed: {e}")))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct EchoHandler;

    #[async_trait]
    impl InboundHandler for EchoHandler {
        async fn handle(
            &self,
            _peer: PeerInfo,
            _iid: Iid,
            _ipid: Option<Ipid>,
            _opnum: u16,
            input: Bytes,
        ) -> Result<Bytes> {
            Ok(input)
        }
    }

    #[tokio::test]
    async fn test_connect_and_invoke() {
        let hub = LoopbackHub::new();
        hub.bind("node-a", Arc::new(EchoHandler));

        let connector = LoopbackConnector::new(hub);
        let channel = connector.connect("node-a").await.unwrap();
        let out = channel
            .invoke(Iid::from_u128(1), None, 0, Bytes::from_static(b"hi"))
            .await
            .unwrap();
        assert_eq!(out, Bytes::from_static(b"hi"));
    }

    #[tokio::test]
    async fn test_unknown_endpoint_is_transport_failure() {
        let hub = LoopbackHub::new();
        let connector = LoopbackConnector::new(hub);
        assert!(matches!(
            connector.connect("nowhere").await,
            Err(OrbError::Transport(_))
        ));
    }

    #[tokio::test]
    async fn test_each_connect_is_a_new_session() {
        let hub = LoopbackHub::new();
        hub.bind("node-a", Arc::new(EchoHandler));
        let connector = LoopbackConnector::new(hub);
        let a = connector.connect("node-a").await.unwrap();
        let b = connector.connect("node-a").await.unwrap();
        assert_ne!(a.session(), b.session());
    }

    #[tokio::test]
    async fn test_unauthenticated_flag_travels() {
        let hub = LoopbackHub::new();
        hub.bind("node-a", Arc::new(EchoHandler));
        let connector = LoopbackConnector::unauthenticated(hub);
        let channel = connector.connect("node-a").await.unwrap();
        assert!(!channel.is_authenticated());
    }
}
