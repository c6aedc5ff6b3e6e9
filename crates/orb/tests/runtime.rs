//! End-to-end runtime tests over the loopback transport

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use orb::exporter::{InterfaceSet, MethodTable, ServerObject};
use orb::transport::loopback::{LoopbackConnector, LoopbackHub};
use orb::{
    ActivationVerdict, Clsid, Iid, OrbClient, OrbClientConfig, OrbError, OrbServer,
    OrbServerConfig, StringBinding,
};
use orb_ndr::{
    marshal, unmarshal, ByteOrder, MarshalStream, Phase, PrimKind, TypeDesc, UnmarshalStream,
    Value,
};

const CLSID_CALC: Clsid = Clsid::from_u128(0xCA1C);
const IID_CALC: Iid = Iid::from_u128(0x0C01);
const IID_STATS: Iid = Iid::from_u128(0x0C02);
const IID_MISSING: Iid = Iid::from_u128(0x0CFF);

fn pair_desc() -> TypeDesc {
    TypeDesc::Struct(vec![
        TypeDesc::Prim(PrimKind::I32),
        TypeDesc::Prim(PrimKind::I32),
    ])
}

fn encode_pair(a: i32, b: i32) -> Bytes {
    let mut s = MarshalStream::new(Phase::OutboundRequest);
    marshal(
        &pair_desc(),
        &Value::Struct(vec![Value::I32(a), Value::I32(b)]),
        &mut s,
    )
    .unwrap();
    s.finish()
}

fn decode_i32(bytes: Bytes) -> i32 {
    let mut r = UnmarshalStream::new(bytes, ByteOrder::native(), Phase::InboundReply);
    match unmarshal(&TypeDesc::Prim(PrimKind::I32), &mut r).unwrap() {
        Value::I32(v) => v,
        other => panic!("unexpected reply value {other:?}"),
    }
}

/// Calculator object: IID_CALC method 0 adds an i32 pair, IID_STATS
/// method 0 reports a constant.
struct Calc {
    set: InterfaceSet,
}

impl Calc {
    fn new() -> Arc<Self> {
        let mut set = InterfaceSet::new();
        set.insert(
            IID_CALC,
            MethodTable::new().method(|_ctx, args: Bytes| {
                Box::pin(async move {
                    let mut r =
                        UnmarshalStream::new(args, ByteOrder::native(), Phase::InboundRequest);
                    let value = unmarshal(
                        &TypeDesc::Struct(vec![
                            TypeDesc::Prim(PrimKind::I32),
                            TypeDesc::Prim(PrimKind::I32),
                        ]),
                        &mut r,
                    )?;
                    let (a, b) = match value {
                        Value::Struct(fields) => match (&fields[0], &fields[1]) {
                            (Value::I32(a), Value::I32(b)) => (*a, *b),
                            _ => unreachable!("descriptor guarantees i32 fields"),
                        },
                        _ => unreachable!("descriptor guarantees a struct"),
                    };
                    let mut s = MarshalStream::new(Phase::OutboundReply);
                    marshal(&TypeDesc::Prim(PrimKind::I32), &Value::I32(a + b), &mut s)?;
                    Ok(s.finish())
                })
            }),
        );
        set.insert(
            IID_STATS,
            MethodTable::new().method(|_ctx, _args| {
                Box::pin(async move {
                    let mut s = MarshalStream::new(Phase::OutboundReply);
                    marshal(&TypeDesc::Prim(PrimKind::I32), &Value::I32(42), &mut s)?;
                    Ok(s.finish())
                })
            }),
        );
        Arc::new(Self { set })
    }
}

impl ServerObject for Calc {
    fn interfaces(&self) -> Vec<Iid> {
        self.set.iids()
    }
    fn interface_table(&self, iid: &Iid) -> Option<Arc<MethodTable>> {
        self.set.get(iid)
    }
}

struct Fixture {
    hub: Arc<LoopbackHub>,
    server: OrbServer,
}

impl Fixture {
    fn new(addr: &str) -> Self {
        Self::with_lease(addr, Duration::from_secs(60), Duration::from_secs(30))
    }

    fn with_lease(addr: &str, ping_period: Duration, sweep: Duration) -> Self {
        let hub = LoopbackHub::new();
        let mut config = OrbServerConfig::new(StringBinding::loopback(addr));
        config.ping_period = ping_period;
        config.ping_timeout_periods = 3;
        config.sweep_interval = sweep;
        let server = OrbServer::new(config);
        server.register_class_fn(CLSID_CALC, || Calc::new());
        server.attach(&hub);
        Fixture { hub, server }
    }

    fn client(&self) -> OrbClient {
        let connector = Arc::new(LoopbackConnector::new(self.hub.clone()));
        OrbClient::with_config(
            connector,
            OrbClientConfig {
                ping_interval: Duration::from_secs(60),
                auto_ping: false,
            },
        )
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn activate_invoke_query_release() {
    let fixture = Fixture::new("calc-host");
    let client = fixture.client();

    let (outcome, facelets) = client
        .activate("calc-host", CLSID_CALC, vec![IID_CALC])
        .await
        .unwrap();
    assert_eq!(outcome.verdict, ActivationVerdict::Success);

    let calc = facelets[0].clone().unwrap();
    let reply = calc.invoke(0, encode_pair(20, 22)).await.unwrap();
    assert_eq!(decode_i32(reply), 42);

    // Second interface comes through a remote query-interface call.
    let stats = client.query_interface(&calc, IID_STATS).await.unwrap();
    let reply = stats.invoke(0, Bytes::new()).await.unwrap();
    assert_eq!(decode_i32(reply), 42);

    // An unsupported interface fails that query alone.
    let missing = client.query_interface(&calc, IID_MISSING).await;
    assert!(matches!(missing, Err(OrbError::NoSuchInterface(_))));

    // Releasing the one local reference tears the proxy down and drives
    // the server-side aggregate to zero.
    client.release(&calc).await.unwrap();
    assert_eq!(client.apartment().proxy_count(), 0);
    assert!(fixture.server.exporter().table().is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn partial_activation_yields_null_slot() {
    let fixture = Fixture::new("calc-partial");
    let client = fixture.client();

    let (outcome, facelets) = client
        .activate("calc-partial", CLSID_CALC, vec![IID_CALC, IID_MISSING, IID_STATS])
        .await
        .unwrap();

    assert_eq!(outcome.verdict, ActivationVerdict::Partial);
    assert!(facelets[0].is_some());
    assert!(facelets[1].is_none());
    assert!(facelets[2].is_some());
}

#[tokio::test(flavor = "multi_thread")]
async fn all_failed_activation_is_not_supported() {
    let fixture = Fixture::new("calc-none");
    let client = fixture.client();

    let result = client
        .activate("calc-none", CLSID_CALC, vec![IID_MISSING])
        .await;
    assert!(matches!(result, Err(OrbError::NotSupported)));
    assert_eq!(client.apartment().proxy_count(), 0);
    assert!(fixture.server.exporter().table().is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn unauthenticated_activation_is_access_denied() {
    let fixture = Fixture::new("calc-auth");
    let connector = Arc::new(LoopbackConnector::unauthenticated(fixture.hub.clone()));
    let client = OrbClient::new(connector);

    let result = client.activate("calc-auth", CLSID_CALC, vec![IID_CALC]).await;
    assert!(matches!(result, Err(OrbError::AccessDenied)));
}

#[tokio::test(flavor = "multi_thread")]
async fn proxy_dedup_one_proxy_two_facelets() {
    let fixture = Fixture::new("calc-dedup");
    let client = fixture.client();

    // Two records with the same (OXID, OID) but different IPIDs.
    let (_, facelets) = client
        .activate("calc-dedup", CLSID_CALC, vec![IID_CALC, IID_STATS])
        .await
        .unwrap();

    let a = facelets[0].clone().unwrap();
    let b = facelets[1].clone().unwrap();
    assert_ne!(a.ipid(), b.ipid());
    assert_eq!(a.oid(), b.oid());

    assert_eq!(client.apartment().proxy_count(), 1);
    let proxy = client.apartment().get(a.oxid(), a.oid()).unwrap();
    assert_eq!(proxy.facelet_count(), 2);
    assert_eq!(proxy.local_refs(), 2);
}

#[tokio::test(flavor = "multi_thread")]
async fn budget_batching_replenishes_below_low_water() {
    let fixture = Fixture::new("calc-budget");
    let client = fixture.client();

    let (_, facelets) = client
        .activate("calc-budget", CLSID_CALC, vec![IID_CALC])
        .await
        .unwrap();
    let calc = facelets[0].clone().unwrap();

    // Activation granted one reference; the first re-marshal must first
    // top the budget up by a batch of five.
    assert_eq!(calc.budget(), 1);
    let record = calc.marshal().await.unwrap();
    assert_eq!(record.std.ipid, calc.ipid());
    assert_eq!(calc.budget(), 5);

    // Draws stay local until the budget would sink below the low-water
    // mark again.
    calc.marshal().await.unwrap();
    assert_eq!(calc.budget(), 4);
    calc.marshal().await.unwrap();
    assert_eq!(calc.budget(), 3);
    calc.marshal().await.unwrap();
    assert_eq!(calc.budget(), 2);
    calc.marshal().await.unwrap();
    assert_eq!(calc.budget(), 1);
    calc.marshal().await.unwrap();
    assert_eq!(calc.budget(), 5);
}

#[tokio::test(flavor = "multi_thread")]
async fn remarshaled_record_extends_sibling_apartment() {
    let fixture = Fixture::new("calc-remarshal");
    let client_a = fixture.client();
    let client_b = fixture.client();

    let (_, facelets) = client_a
        .activate("calc-remarshal", CLSID_CALC, vec![IID_CALC])
        .await
        .unwrap();
    let calc_a = facelets[0].clone().unwrap();

    // Hand the re-exported record to a second apartment; it builds its
    // own proxy against the same exporter.
    let record = calc_a.marshal().await.unwrap();
    let calc_b = client_b.apartment().unmarshal_reference(&record).await.unwrap();
    assert_eq!(calc_b.ipid(), calc_a.ipid());

    let reply = calc_b.invoke(0, encode_pair(2, 3)).await.unwrap();
    assert_eq!(decode_i32(reply), 5);
}

#[tokio::test(flavor = "multi_thread")]
async fn lease_expiry_reclaims_unpinged_object() {
    let fixture = Fixture::with_lease(
        "calc-lease",
        Duration::from_millis(100),
        Duration::from_millis(50),
    );
    fixture.server.start();
    let client = fixture.client();

    let (_, facelets) = client
        .activate("calc-lease", CLSID_CALC, vec![IID_CALC])
        .await
        .unwrap();
    let calc = facelets[0].clone().unwrap();

    // Keep the lease alive across several renewal passes.
    for _ in 0..4 {
        tokio::time::sleep(Duration::from_millis(100)).await;
        client.ping_now().await;
    }
    assert!(calc.invoke(0, encode_pair(1, 1)).await.is_ok());

    // Go silent: the 300 ms lease runs out and the object is torn down
    // under the non-responsive client.
    tokio::time::sleep(Duration::from_millis(700)).await;
    assert!(fixture.server.exporter().table().is_empty());

    let err = calc.invoke(0, encode_pair(1, 1)).await.unwrap_err();
    assert!(matches!(err, OrbError::InterfaceNotFound(_)));

    fixture.server.shutdown();
}

#[tokio::test(flavor = "multi_thread")]
async fn pinned_object_survives_silence() {
    let fixture = Fixture::with_lease(
        "calc-pinned",
        Duration::from_millis(100),
        Duration::from_millis(50),
    );
    fixture.server.start();

    let record = fixture
        .server
        .export_object(Calc::new(), CLSID_CALC, IID_CALC, 1)
        .unwrap();
    fixture.server.pin_object(record.std.oid).unwrap();

    tokio::time::sleep(Duration::from_millis(700)).await;
    assert!(fixture.server.exporter().table().contains(record.std.oid));

    fixture.server.shutdown();
}
