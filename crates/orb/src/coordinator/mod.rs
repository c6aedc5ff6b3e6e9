//! Coordinator
//!
//! Object activation, exporter address resolution, and the ping protocol
//! of the distributed garbage collector — the service, its client, and
//! the wire messages between them.

pub mod client;
pub mod protocol;
pub mod server;

pub use client::{
    ActivationOutcome, ActivationVerdict, CoordinatorClient, PingTracker, ResolverCache,
};
pub use protocol::{activation_mode, opnum, ActivateReply, ActivateRequest, COORDINATOR_IID};
pub use server::CoordinatorService;
