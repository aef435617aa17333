//! End-to-end tests for the filtering resolver.
//!
//! Each test stands up the full stack on ephemeral ports: scriptable stub
//! upstreams, the in-memory threat store and decision cache, the
//! classifier, the forwarder, and the UDP server. Queries go over real
//! sockets.

use metrics_lock::MetricsGuard;
use sentra_cache::{DecisionCache, MemoryCache};
use sentra_classify::Classifier;
use sentra_metrics::metrics;
use sentra_proto::{Message, Name, Question, ResponseCode};
use sentra_resolver::Forwarder;
use sentra_server::{FilterHandler, QueryLogSink, UdpServer};
use sentra_store::{MemoryStore, QueryDecision, ThreatEntry, ThreatStore, ThreatType};
use std::net::{Ipv4Addr, SocketAddr};
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;

/// Serializes tests that assert on the global metrics registry.
mod metrics_lock {
    use std::sync::{Mutex, MutexGuard, OnceLock};

    static METRICS_LOCK: OnceLock<Mutex<()>> = OnceLock::new();

    pub struct MetricsGuard(#[allow(dead_code)] MutexGuard<'static, ()>);

    impl MetricsGuard {
        pub fn acquire() -> Self {
            let lock = METRICS_LOCK.get_or_init(|| Mutex::new(()));
            Self(lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner()))
        }
    }
}

/// Behavior of one stub upstream.
#[derive(Clone, Copy)]
enum UpstreamScript {
    /// Answer every A query with this address.
    AnswerA(Ipv4Addr),
    /// Reply NXDOMAIN.
    NxDomain,
    /// Never reply.
    Silent,
}

/// Binds a scripted upstream; returns its address and a hit counter.
async fn stub_upstream(script: UpstreamScript) -> (SocketAddr, Arc<AtomicU64>) {
    let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let addr = socket.local_addr().unwrap();
    let hits = Arc::new(AtomicU64::new(0));
    let hits_inner = Arc::clone(&hits);

    tokio::spawn(async move {
        let mut buf = vec![0u8; 65535];
        loop {
            let Ok((len, src)) = socket.recv_from(&mut buf).await else {
                return;
            };
            hits_inner.fetch_add(1, Ordering::Relaxed);

            let Ok(query) = Message::parse(&buf[..len]) else {
                continue;
            };

            let response = match script {
                UpstreamScript::Silent => continue,
                UpstreamScript::NxDomain => {
                    let mut r = Message::response_from(&query);
                    r.set_rcode(ResponseCode::NXDomain);
                    r
                }
                UpstreamScript::AnswerA(ip) => {
                    let mut r = Message::response_from(&query);
                    let name = query.questions()[0].qname.clone();
                    r.add_answer(sentra_proto::ResourceRecord::a(name, 300, ip));
                    r
                }
            };
            let _ = socket.send_to(&response.to_wire(), src).await;
        }
    });

    (addr, hits)
}

struct TestStack {
    server: Arc<UdpServer>,
    store: Arc<MemoryStore>,
    cache: Arc<MemoryCache>,
}

impl TestStack {
    /// Builds the resolver over the given upstream scripts and threat
    /// rows, serving on an ephemeral port.
    async fn start(
        scripts: &[UpstreamScript],
        threats: &[(&str, ThreatType, f64)],
    ) -> (Self, Vec<Arc<AtomicU64>>) {
        let mut upstreams = Vec::new();
        let mut counters = Vec::new();
        for &script in scripts {
            let (addr, hits) = stub_upstream(script).await;
            upstreams.push(addr);
            counters.push(hits);
        }

        let store = Arc::new(MemoryStore::new());
        let batch: Vec<ThreatEntry> = threats
            .iter()
            .map(|(d, t, c)| ThreatEntry::new(*d, *t, *c, "test"))
            .collect();
        store.bulk_upsert(&batch).await.unwrap();

        let cache = Arc::new(MemoryCache::new());
        let classifier = Classifier::new(store.clone(), cache.clone());
        // Short per-attempt timeout keeps the failover tests fast; the
        // production default is five seconds.
        let forwarder = Arc::new(Forwarder::new(&upstreams, Duration::from_millis(150)));
        let log_sink = QueryLogSink::spawn(store.clone(), 256);
        let handler = Arc::new(FilterHandler::new(classifier, forwarder, log_sink));

        let server = Arc::new(
            UdpServer::bind("127.0.0.1:0".parse().unwrap(), handler)
                .await
                .unwrap(),
        );
        let serving = Arc::clone(&server);
        tokio::spawn(async move { serving.run().await });

        (
            Self {
                server,
                store,
                cache,
            },
            counters,
        )
    }

    /// Sends a query and returns the parsed response.
    async fn query(&self, message: &Message) -> Message {
        let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        client.connect(self.server.local_addr()).await.unwrap();
        client.send(&message.to_wire()).await.unwrap();

        let mut buf = vec![0u8; 65535];
        let len = tokio::time::timeout(Duration::from_secs(2), client.recv(&mut buf))
            .await
            .expect("response within deadline")
            .unwrap();
        Message::parse(&buf[..len]).unwrap()
    }
}

fn a_query(domain: &str) -> Message {
    Message::query(Question::a(Name::from_str(domain).unwrap()))
}

#[tokio::test]
async fn cached_block_answers_nxdomain_without_upstream() {
    let _guard = MetricsGuard::acquire();
    let (stack, counters) =
        TestStack::start(&[UpstreamScript::AnswerA(Ipv4Addr::new(1, 2, 3, 4))], &[]).await;

    stack
        .cache
        .set("domain:ads.example", "blocked", Duration::from_secs(3600))
        .await
        .unwrap();

    let blocked_before = metrics().blocked_total();
    let hits_before = metrics().cache_hits();

    let response = stack.query(&a_query("ads.example")).await;

    assert_eq!(response.rcode(), ResponseCode::NXDomain);
    assert!(response.answers().is_empty());
    assert_eq!(counters[0].load(Ordering::Relaxed), 0, "no upstream call");
    assert!(metrics().blocked_total() > blocked_before);
    assert!(metrics().cache_hits() > hits_before);
}

#[tokio::test]
async fn table_block_with_parent_escalation_caches_original_name() {
    let (stack, counters) = TestStack::start(
        &[UpstreamScript::AnswerA(Ipv4Addr::new(1, 2, 3, 4))],
        &[("doubleclick.net", ThreatType::Ads, 0.90)],
    )
    .await;

    let response = stack.query(&a_query("tracker.cdn.doubleclick.net")).await;

    assert_eq!(response.rcode(), ResponseCode::NXDomain);
    assert!(response.answers().is_empty());
    assert_eq!(counters[0].load(Ordering::Relaxed), 0);

    let cached = stack
        .cache
        .get("domain:tracker.cdn.doubleclick.net")
        .await
        .unwrap();
    assert_eq!(cached.as_deref(), Some("blocked"));
}

#[tokio::test]
async fn allow_path_forwards_and_caches_allowed() {
    let (stack, _) = TestStack::start(
        &[UpstreamScript::AnswerA(Ipv4Addr::new(93, 184, 216, 34))],
        &[],
    )
    .await;

    let response = stack.query(&a_query("example.com")).await;

    assert_eq!(response.rcode(), ResponseCode::NoError);
    assert_eq!(response.answers().len(), 1);
    assert_eq!(
        response.answers()[0].rdata().as_a(),
        Some(Ipv4Addr::new(93, 184, 216, 34))
    );

    let cached = stack.cache.get("domain:example.com").await.unwrap();
    assert_eq!(cached.as_deref(), Some("allowed"));
}

#[tokio::test]
async fn upstream_failover_succeeds_without_error_count() {
    let _guard = MetricsGuard::acquire();
    let (stack, counters) = TestStack::start(
        &[
            UpstreamScript::Silent,
            UpstreamScript::AnswerA(Ipv4Addr::new(10, 9, 8, 7)),
        ],
        &[],
    )
    .await;

    let errors_before = metrics().errors_total();

    let response = stack.query(&a_query("failover.example")).await;

    assert_eq!(response.rcode(), ResponseCode::NoError);
    assert_eq!(
        response.answers()[0].rdata().as_a(),
        Some(Ipv4Addr::new(10, 9, 8, 7))
    );
    assert_eq!(counters[0].load(Ordering::Relaxed), 1, "first upstream tried");
    assert_eq!(counters[1].load(Ordering::Relaxed), 1, "second upstream answered");
    // The query as a whole succeeded.
    assert_eq!(metrics().errors_total(), errors_before);
}

#[tokio::test]
async fn all_upstreams_failing_yields_servfail() {
    let _guard = MetricsGuard::acquire();
    let (stack, _) =
        TestStack::start(&[UpstreamScript::Silent, UpstreamScript::Silent], &[]).await;

    let errors_before = metrics().errors_total();

    let response = stack.query(&a_query("dead.example")).await;

    assert_eq!(response.rcode(), ResponseCode::ServFail);
    assert!(response.answers().is_empty());
    assert!(metrics().errors_total() > errors_before);

    // The failure is logged with the error decision. (The classifier had
    // already cached "allowed" before forwarding was attempted; the
    // forwarding failure itself writes nothing to the cache.)
    tokio::time::sleep(Duration::from_millis(50)).await;
    let logs = stack.store.logged_queries();
    assert!(logs
        .iter()
        .any(|r| r.domain == "dead.example" && r.decision == QueryDecision::Error));
}

#[tokio::test]
async fn feed_merge_keeps_max_confidence() {
    use sentra_feeds::FeedFormat;

    let store = MemoryStore::new();

    // Two feeds report the same domain with different confidences.
    let adblock_entries = FeedFormat::AdblockFilter.parse("||evil.example^\n", "easylist");
    let urlhaus_body = r#"[{"id":"7","url":"http://evil.example/x","url_status":"online",
        "host":"evil.example","date_added":"2024-04-01 00:00:00",
        "threat":"malware_download","tags":[],"payload_type":"exe"}]"#;
    let urlhaus_entries = FeedFormat::UrlhausJson.parse(urlhaus_body, "urlhaus");

    assert!((adblock_entries[0].confidence - 0.80).abs() < f64::EPSILON);
    assert!((urlhaus_entries[0].confidence - 0.90).abs() < f64::EPSILON);

    store.bulk_upsert(&adblock_entries).await.unwrap();
    store.bulk_upsert(&urlhaus_entries).await.unwrap();

    let hit = store.lookup_active("evil.example").await.unwrap().unwrap();
    assert!((hit.confidence - 0.90).abs() < f64::EPSILON);

    // Re-running the same ingestion changes nothing.
    store.bulk_upsert(&adblock_entries).await.unwrap();
    store.bulk_upsert(&urlhaus_entries).await.unwrap();
    assert_eq!(store.len(), 1);
    let hit = store.lookup_active("evil.example").await.unwrap().unwrap();
    assert!((hit.confidence - 0.90).abs() < f64::EPSILON);
}

#[tokio::test]
async fn blocked_response_preserves_id_and_question_bytes() {
    let (stack, _) = TestStack::start(
        &[UpstreamScript::AnswerA(Ipv4Addr::new(1, 2, 3, 4))],
        &[("blocked.example", ThreatType::Malware, 0.95)],
    )
    .await;

    let mut query = a_query("blocked.example");
    query.set_id(0xBEEF);
    let query_wire = query.to_wire();

    let response = stack.query(&query).await;
    assert_eq!(response.id(), 0xBEEF);
    assert_eq!(response.rcode(), ResponseCode::NXDomain);

    let response_wire = response.to_wire();
    let q_len = query.questions()[0].wire_len();
    // Question section is byte-for-byte the query's (both uncompressed,
    // both directly after the 12-byte header).
    assert_eq!(&query_wire[12..12 + q_len], &response_wire[12..12 + q_len]);
}

#[tokio::test]
async fn empty_question_list_round_trips_with_preserved_id() {
    let (stack, counters) =
        TestStack::start(&[UpstreamScript::AnswerA(Ipv4Addr::new(1, 2, 3, 4))], &[]).await;

    let mut query = Message::new(sentra_proto::Header::new(0x0451));
    query.header_mut().set_recursion_desired(true);

    let response = stack.query(&query).await;

    assert_eq!(response.id(), 0x0451);
    assert_eq!(response.rcode(), ResponseCode::NoError);
    assert!(response.answers().is_empty());
    assert_eq!(counters[0].load(Ordering::Relaxed), 0);
}

#[tokio::test]
async fn cached_allow_skips_the_threat_table_and_upstream_answers() {
    let (stack, counters) = TestStack::start(
        &[UpstreamScript::AnswerA(Ipv4Addr::new(203, 0, 113, 5))],
        // The table would block this name, but the cache wins.
        &[("pinned.example", ThreatType::Malware, 0.99)],
    )
    .await;

    stack
        .cache
        .set("domain:pinned.example", "allowed", Duration::from_secs(1800))
        .await
        .unwrap();

    let response = stack.query(&a_query("pinned.example")).await;

    assert_eq!(response.rcode(), ResponseCode::NoError);
    assert_eq!(response.answers().len(), 1);
    assert_eq!(counters[0].load(Ordering::Relaxed), 1);
}

#[tokio::test]
async fn upstream_nxdomain_is_propagated() {
    let (stack, counters) = TestStack::start(
        &[
            UpstreamScript::NxDomain,
            UpstreamScript::AnswerA(Ipv4Addr::new(4, 4, 4, 4)),
        ],
        &[],
    )
    .await;

    let response = stack.query(&a_query("nosuch.example")).await;

    assert_eq!(response.rcode(), ResponseCode::NXDomain);
    assert!(response.answers().is_empty());
    assert_eq!(counters[0].load(Ordering::Relaxed), 1);
    assert_eq!(
        counters[1].load(Ordering::Relaxed),
        0,
        "NXDOMAIN must not fall through to the next upstream"
    );
}

#[tokio::test]
async fn repeated_subdomain_queries_hit_the_cache() {
    let (stack, counters) = TestStack::start(
        &[UpstreamScript::AnswerA(Ipv4Addr::new(1, 2, 3, 4))],
        &[("ads-network.example", ThreatType::Ads, 0.85)],
    )
    .await;

    let first = stack.query(&a_query("a.b.ads-network.example")).await;
    let second = stack.query(&a_query("a.b.ads-network.example")).await;

    assert_eq!(first.rcode(), ResponseCode::NXDomain);
    assert_eq!(second.rcode(), ResponseCode::NXDomain);
    assert_eq!(counters[0].load(Ordering::Relaxed), 0);

    // Both verdicts logged, the second one from cache.
    tokio::time::sleep(Duration::from_millis(50)).await;
    let blocked_logs: Vec<_> = stack
        .store
        .logged_queries()
        .into_iter()
        .filter(|r| r.decision == QueryDecision::Blocked)
        .collect();
    assert_eq!(blocked_logs.len(), 2);
    assert_eq!(blocked_logs[1].threat_type.as_deref(), Some("cached"));
}
