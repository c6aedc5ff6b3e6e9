//! Transport seam
//!
//! The reliable byte-stream transport is an external collaborator; the
//! runtime sees it only through these traits. A channel's `invoke` is the
//! one operation that may block for a transport-limited duration — it is
//! never retried internally, and its failure surfaces as the distinct
//! transport-failure error kind so the caller can decide what to do.

pub mod loopback;

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;

use crate::types::{Iid, Ipid, Result};

/// Identity of the peer on the far side of an inbound channel.
#[derive(Clone, Copy, Debug)]
pub struct PeerInfo {
    /// Did the channel pass authentication when it was established?
    pub authenticated: bool,
    /// Transport session the channel belongs to; ping sets are scoped to
    /// this value.
    pub session: u64,
}

/// A connected, request/reply channel to one remote endpoint.
#[async_trait]
pub trait Channel: Send + Sync {
    /// Whether this side of the channel authenticated successfully.
    fn is_authenticated(&self) -> bool;

    /// Session identifier of this channel.
    fn session(&self) -> u64;

    /// One round trip: deliver a request frame for `(iid, ipid, opnum)`
    /// and wait for the reply frame.
    async fn invoke(
        &self,
        iid: Iid,
        ipid: Option<Ipid>,
        opnum: u16,
        input: Bytes,
    ) -> Result<Bytes>;
}

/// Establishes channels from string addresses.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, addr: &str) -> Result<Arc<dyn Channel>>;
}

/// Server-side sink for inbound calls. The transport hands every decoded
/// request frame here, one worker task per call.
#[async_trait]
pub trait InboundHandler: Send + Sync {
    async fn handle(
        &self,
        peer: PeerInfo,
        iid: Iid,
        ipid: Option<Ipid>,
        opnum: u16,
        input: Bytes,
    ) -> Result<Bytes>;
}
