//! Remote reference counting
//!
//! The wire interface through which a client moves reference counts on a
//! remote exporter and queries additional interfaces on an object it
//! already holds.

pub mod client;
pub mod protocol;
pub mod server;

pub use client::RemRefClient;
pub use protocol::{opnum, QiResult, QueryInterfaceReply, QueryInterfaceRequest, RefChange, REMREF_IID};
pub use server::{batch_status, RemRefService};
