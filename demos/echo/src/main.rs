//! Echo demo
//!
//! Hosts an echo class, activates it through the coordinator, invokes it
//! through a facelet, re-marshals the reference to a second apartment,
//! and then lets the lease expire to show the distributed GC reclaiming
//! the object. Everything runs over the in-process loopback transport.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use clap::Parser;
use orb::exporter::{InterfaceSet, MethodTable, ServerObject};
use orb::transport::loopback::{LoopbackConnector, LoopbackHub};
use orb::{Clsid, Iid, OrbClient, OrbClientConfig, OrbServer, OrbServerConfig, StringBinding};
use orb_ndr::{marshal, unmarshal, ByteOrder, MarshalStream, Phase, TypeDesc, UnmarshalStream, Value};

const CLSID_ECHO: Clsid = Clsid::from_u128(0xEC40_0001);
const IID_ECHO: Iid = Iid::from_u128(0xEC40_0002);

#[derive(Parser, Debug)]
#[command(name = "echo-demo", about = "Distributed-object runtime walkthrough")]
struct Args {
    /// Message to bounce off the exported object
    #[arg(short, long, default_value = "hello, broker")]
    message: String,

    /// Lease renewal period in milliseconds
    #[arg(long, default_value_t = 200)]
    ping_period_ms: u64,

    /// Release cleanly instead of letting the lease lapse at the end
    #[arg(long)]
    skip_expiry: bool,
}

struct EchoObject {
    set: InterfaceSet,
}

impl EchoObject {
    fn new() -> Arc<Self> {
        let mut set = InterfaceSet::new();
        set.insert(
            IID_ECHO,
            MethodTable::new().method(|_ctx, args: Bytes| {
                Box::pin(async move {
                    let mut r =
                        UnmarshalStream::new(args, ByteOrder::native(), Phase::InboundRequest);
                    let value = unmarshal(&TypeDesc::CString, &mut r)?;
                    let text = match value {
                        Value::Str(text) => text,
                        _ => String::new(),
                    };
                    let mut s = MarshalStream::new(Phase::OutboundReply);
                    marshal(&TypeDesc::CString, &Value::Str(text.to_uppercase()), &mut s)?;
                    Ok(s.finish())
                })
            }),
        );
        Arc::new(Self { set })
    }
}

impl ServerObject for EchoObject {
    fn interfaces(&self) -> Vec<Iid> {
        self.set.iids()
    }
    fn interface_table(&self, iid: &Iid) -> Option<Arc<MethodTable>> {
        self.set.get(iid)
    }
}

fn encode_message(text: &str) -> Bytes {
    let mut s = MarshalStream::new(Phase::OutboundRequest);
    marshal(&TypeDesc::CString, &Value::Str(text.to_string()), &mut s)
        .expect("message fits the default stream limit");
    s.finish()
}

fn decode_message(bytes: Bytes) -> String {
    let mut r = UnmarshalStream::new(bytes, ByteOrder::native(), Phase::InboundReply);
    match unmarshal(&TypeDesc::CString, &mut r) {
        Ok(Value::Str(text)) => text,
        _ => String::from("<malformed reply>"),
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let args = Args::parse();
    let ping_period = Duration::from_millis(args.ping_period_ms);

    // Server side: host the echo class.
    let hub = LoopbackHub::new();
    let mut config = OrbServerConfig::new(StringBinding::loopback("echo-host"));
    config.ping_period = ping_period;
    config.sweep_interval = ping_period / 2;
    let server = OrbServer::new(config);
    server.register_class_fn(CLSID_ECHO, || EchoObject::new());
    server.attach(&hub);
    server.start();
    tracing::info!(oxid = %server.oxid(), "echo class hosted");

    // Client side: activate and call.
    let client = OrbClient::with_config(
        Arc::new(LoopbackConnector::new(hub.clone())),
        OrbClientConfig {
            ping_interval: ping_period,
            auto_ping: true,
        },
    );
    let (outcome, facelets) = client
        .activate("echo-host", CLSID_ECHO, vec![IID_ECHO])
        .await?;
    tracing::info!(oxid = %outcome.oxid, verdict = ?outcome.verdict, "activated");

    let echo = facelets[0].clone().expect("echo interface was exported");
    let reply = echo.invoke(0, encode_message(&args.message)).await?;
    tracing::info!(request = %args.message, reply = %decode_message(reply), "remote call");

    // Re-marshal the held reference into a second apartment, drawing on
    // the facelet's reference budget.
    let record = echo.marshal().await?;
    let sibling = OrbClient::new(Arc::new(LoopbackConnector::new(hub.clone())));
    let echo_b = sibling.apartment().unmarshal_reference(&record).await?;
    let reply = echo_b.invoke(0, encode_message("second apartment")).await?;
    tracing::info!(reply = %decode_message(reply), budget = echo.budget(), "re-marshaled call");

    if args.skip_expiry {
        client.release(&echo).await?;
    } else {
        // Stop renewing and watch the lease run out.
        client.shutdown();
        sibling.shutdown();
        let silence = ping_period * 5;
        tracing::info!(?silence, "going silent; waiting for the lease to lapse");
        tokio::time::sleep(silence).await;
        match echo.invoke(0, encode_message("anyone home?")).await {
            Err(e) => tracing::info!(error = %e, "object reclaimed by the distributed GC"),
            Ok(_) => tracing::warn!("object unexpectedly still alive"),
        }
    }

    server.shutdown();
    Ok(())
}
