//! Distributed-object RPC runtime
//!
//! Remote method invocation, wire marshaling, and cross-machine reference
//! counting for networked object servers.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     runtime (this crate)                    │
//! ├──────────────────────┬───────────────────┬──────────────────┤
//! │  Exporter            │  Proxy layer      │  Coordinator     │
//! │  - object table      │  - apartment      │  - activation    │
//! │  - stub managers     │  - proxies        │  - OXID resolve  │
//! │  - lease GC          │  - facelets       │  - ping protocol │
//! ├──────────────────────┴───────────────────┴──────────────────┤
//! │            marshaling engine (orb-ndr crate)                │
//! ├─────────────────────────────────────────────────────────────┤
//! │          transport seam (Channel / Connector traits)        │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Key concepts
//!
//! - **OXID**: identifies an exporting process; seeded from its address
//! - **OID**: identifies an object within an exporter
//! - **IPID**: identifies one interface on one object; the routing key
//! - **Stub manager / stublet**: server-side dispatch for an object / one
//!   of its interfaces
//! - **Proxy / facelet**: client-side surrogate for an object / one of
//!   its interfaces
//! - **Ping set**: group of OIDs whose leases renew together; an object
//!   whose lease runs out is reclaimed even if its client never released
//!   it

pub mod client;
pub mod coordinator;
pub mod dispatch;
pub mod exporter;
pub mod proxy;
pub mod registry;
pub mod remref;
pub mod server;
pub mod transport;
pub mod types;

pub use client::{OrbClient, OrbClientConfig};
pub use coordinator::{ActivationOutcome, ActivationVerdict, CoordinatorClient};
pub use dispatch::Dispatcher;
pub use exporter::{
    CallContext, CallFuture, Exporter, InterfaceSet, MethodTable, ServerObject,
    DEFAULT_PING_PERIOD, DEFAULT_PING_TIMEOUT_PERIODS,
};
pub use proxy::{Apartment, Facelet, Proxy, REF_BATCH, REF_LOW_WATER};
pub use registry::{ClassFactory, ClassRegistry, InProcRegistry};
pub use server::{OrbServer, OrbServerConfig};
pub use transport::{Channel, Connector, InboundHandler, PeerInfo};
pub use types::{
    wire_status, CallHeader, Clsid, DualStringArray, Iid, Ipid, Oid, OrbError, Oxid, RefRecord,
    ReplyHeader, Result, SetId, StdRef, StringBinding,
};
