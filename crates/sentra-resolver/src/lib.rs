//! # Sentra upstream forwarder
//!
//! Sends client questions to the configured upstream resolvers over UDP,
//! in order, with a per-attempt timeout. This resolver never recurses from
//! the roots; public recursive resolvers do the heavy lifting.

#![warn(missing_docs)]
#![warn(clippy::all)]

use async_trait::async_trait;
use sentra_proto::{Message, Question, ResourceRecord};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::net::UdpSocket;
use tokio::time::timeout;
use tracing::{debug, trace};

/// Forwarding error.
#[derive(Error, Debug)]
pub enum ResolveError {
    /// No reply within the per-attempt timeout.
    #[error("upstream timed out")]
    Timeout,

    /// Every configured upstream failed.
    #[error("all upstream servers failed")]
    AllUpstreamsFailed,

    /// Socket-level failure.
    #[error("network error: {0}")]
    Network(#[from] std::io::Error),

    /// Upstream sent something unusable.
    #[error("protocol error: {0}")]
    Protocol(String),
}

/// Result type for forwarding operations.
pub type Result<T> = std::result::Result<T, ResolveError>;

/// A terminal forwarding outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ForwardOutcome {
    /// An upstream answered with NOERROR and at least one record.
    Answer(Vec<ResourceRecord>),

    /// An upstream authoritatively reported the name as nonexistent.
    /// Propagated as-is; later upstreams are not consulted.
    NxDomain,
}

/// The forwarding seam the DNS handler talks through.
#[async_trait]
pub trait Forward: Send + Sync {
    /// Resolves one question through the upstreams.
    async fn forward(&self, question: &Question) -> Result<ForwardOutcome>;
}

/// One upstream resolver with health bookkeeping.
#[derive(Debug)]
pub struct Upstream {
    address: SocketAddr,
    successes: AtomicU64,
    failures: AtomicU64,
    /// Exponential moving average, microseconds.
    latency_us: AtomicU64,
}

impl Upstream {
    /// Creates an upstream for `address`.
    pub fn new(address: SocketAddr) -> Self {
        Self {
            address,
            successes: AtomicU64::new(0),
            failures: AtomicU64::new(0),
            latency_us: AtomicU64::new(0),
        }
    }

    /// Returns the upstream address.
    pub fn address(&self) -> SocketAddr {
        self.address
    }

    /// Records a successful exchange.
    pub fn record_success(&self, latency: Duration) {
        self.successes.fetch_add(1, Ordering::Relaxed);

        let sample = latency.as_micros() as u64;
        let current = self.latency_us.load(Ordering::Relaxed);
        let updated = if current == 0 {
            sample
        } else {
            (current * 7 + sample) / 8
        };
        self.latency_us.store(updated, Ordering::Relaxed);
    }

    /// Records a failed exchange.
    pub fn record_failure(&self) {
        self.failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Returns the smoothed latency.
    pub fn average_latency(&self) -> Duration {
        Duration::from_micros(self.latency_us.load(Ordering::Relaxed))
    }

    /// Returns the success rate over all exchanges, 1.0 when untried.
    pub fn success_rate(&self) -> f64 {
        let ok = self.successes.load(Ordering::Relaxed);
        let total = ok + self.failures.load(Ordering::Relaxed);
        if total == 0 {
            1.0
        } else {
            ok as f64 / total as f64
        }
    }
}

/// Sequential-failover forwarder.
///
/// Upstreams are tried strictly in configured order. Parallel fan-out
/// would waste upstream quota and complicate rcode reconciliation for no
/// benefit when the upstreams are healthy public resolvers.
pub struct Forwarder {
    upstreams: Vec<Arc<Upstream>>,
    attempt_timeout: Duration,
}

impl Forwarder {
    /// Creates a forwarder over `addresses` with the given per-attempt
    /// timeout.
    pub fn new(addresses: &[SocketAddr], attempt_timeout: Duration) -> Self {
        Self {
            upstreams: addresses
                .iter()
                .map(|&a| Arc::new(Upstream::new(a)))
                .collect(),
            attempt_timeout,
        }
    }

    /// Returns the configured upstreams.
    pub fn upstreams(&self) -> &[Arc<Upstream>] {
        &self.upstreams
    }

    /// One UDP exchange with one upstream.
    async fn exchange(&self, upstream: &Upstream, query: &Message) -> Result<Message> {
        let socket = UdpSocket::bind("0.0.0.0:0").await?;
        socket.connect(upstream.address()).await?;

        let wire = query.to_wire();
        socket.send(&wire).await?;

        let mut buf = vec![0u8; 65535];
        let len = timeout(self.attempt_timeout, socket.recv(&mut buf))
            .await
            .map_err(|_| ResolveError::Timeout)??;

        let response =
            Message::parse(&buf[..len]).map_err(|e| ResolveError::Protocol(e.to_string()))?;

        if response.id() != query.id() {
            return Err(ResolveError::Protocol("response ID mismatch".into()));
        }

        Ok(response)
    }
}

#[async_trait]
impl Forward for Forwarder {
    async fn forward(&self, question: &Question) -> Result<ForwardOutcome> {
        let query = Message::query(question.clone());

        for upstream in &self.upstreams {
            let start = Instant::now();
            debug!(upstream = %upstream.address(), question = %question, "forwarding query");

            match self.exchange(upstream, &query).await {
                Ok(response) => {
                    upstream.record_success(start.elapsed());

                    if response.rcode().is_success() && !response.answers().is_empty() {
                        return Ok(ForwardOutcome::Answer(response.answers().to_vec()));
                    }
                    if response.rcode().is_nxdomain() {
                        // A definitive "does not exist" must not be masked
                        // by a stale fallback from a later upstream.
                        return Ok(ForwardOutcome::NxDomain);
                    }

                    trace!(
                        upstream = %upstream.address(),
                        rcode = %response.rcode(),
                        answers = response.answers().len(),
                        "unusable upstream response, trying next"
                    );
                }
                Err(e) => {
                    upstream.record_failure();
                    debug!(upstream = %upstream.address(), error = %e, "upstream attempt failed");
                }
            }
        }

        Err(ResolveError::AllUpstreamsFailed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sentra_proto::{Name, ResponseCode};
    use std::net::Ipv4Addr;
    use std::str::FromStr;

    /// Binds a stub upstream that answers each query by calling `reply`.
    /// Returns its address and a counter of queries received.
    async fn stub_upstream<F>(reply: F) -> (SocketAddr, Arc<AtomicU64>)
    where
        F: Fn(&Message) -> Option<Message> + Send + 'static,
    {
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
                let query = Message::parse(&buf[..len]).unwrap();
                if let Some(response) = reply(&query) {
                    let _ = socket.send_to(&response.to_wire(), src).await;
                }
            }
        });
        (addr, hits)
    }

    fn answer_a(query: &Message, addr: Ipv4Addr) -> Message {
        let mut response = Message::response_from(query);
        let name = query.questions()[0].qname.clone();
        response.add_answer(ResourceRecord::a(name, 300, addr));
        response
    }

    #[tokio::test]
    async fn test_first_upstream_answers() {
        let (up, _) = stub_upstream(|q| Some(answer_a(q, Ipv4Addr::new(93, 184, 216, 34)))).await;
        let forwarder = Forwarder::new(&[up], Duration::from_secs(1));

        let question = Question::a(Name::from_str("example.com").unwrap());
        let outcome = forwarder.forward(&question).await.unwrap();

        match outcome {
            ForwardOutcome::Answer(records) => {
                assert_eq!(records.len(), 1);
                assert_eq!(
                    records[0].rdata().as_a(),
                    Some(Ipv4Addr::new(93, 184, 216, 34))
                );
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert_eq!(forwarder.upstreams()[0].success_rate(), 1.0);
    }

    #[tokio::test]
    async fn test_failover_to_second_upstream() {
        // First upstream never replies; second answers.
        let (dead, _) = stub_upstream(|_| None).await;
        let (live, _) = stub_upstream(|q| Some(answer_a(q, Ipv4Addr::new(10, 0, 0, 7)))).await;
        let forwarder = Forwarder::new(&[dead, live], Duration::from_millis(100));

        let question = Question::a(Name::from_str("example.org").unwrap());
        let outcome = forwarder.forward(&question).await.unwrap();
        assert!(matches!(outcome, ForwardOutcome::Answer(_)));
        assert!(forwarder.upstreams()[0].success_rate() < 1.0);
    }

    #[tokio::test]
    async fn test_nxdomain_short_circuits() {
        let (nx, _) = stub_upstream(|q| {
            let mut response = Message::response_from(q);
            response.set_rcode(ResponseCode::NXDomain);
            Some(response)
        })
        .await;
        // Would answer if consulted; must not be.
        let (live, live_hits) = stub_upstream(|q| Some(answer_a(q, Ipv4Addr::new(10, 0, 0, 9)))).await;
        let forwarder = Forwarder::new(&[nx, live], Duration::from_millis(200));

        let question = Question::a(Name::from_str("nosuch.example").unwrap());
        let outcome = forwarder.forward(&question).await.unwrap();
        assert_eq!(outcome, ForwardOutcome::NxDomain);
        assert_eq!(live_hits.load(Ordering::Relaxed), 0);
    }

    #[tokio::test]
    async fn test_empty_noerror_falls_through() {
        // NOERROR with zero answers is not a usable result; the next
        // upstream gets its turn.
        let (empty, _) = stub_upstream(|q| Some(Message::response_from(q))).await;
        let (live, _) = stub_upstream(|q| Some(answer_a(q, Ipv4Addr::new(10, 0, 0, 11)))).await;
        let forwarder = Forwarder::new(&[empty, live], Duration::from_millis(200));

        let question = Question::a(Name::from_str("example.net").unwrap());
        let outcome = forwarder.forward(&question).await.unwrap();
        assert!(matches!(outcome, ForwardOutcome::Answer(_)));
    }

    #[tokio::test]
    async fn test_all_upstreams_fail() {
        let (dead1, _) = stub_upstream(|_| None).await;
        let (dead2, _) = stub_upstream(|_| None).await;
        let forwarder = Forwarder::new(&[dead1, dead2], Duration::from_millis(50));

        let question = Question::a(Name::from_str("example.com").unwrap());
        let err = forwarder.forward(&question).await.unwrap_err();
        assert!(matches!(err, ResolveError::AllUpstreamsFailed));
    }
}
