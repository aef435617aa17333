//! UDP listener.

use crate::handler::{max_udp_response_size, QueryContext, QueryHandler};
use crate::{Result, ServerError};
use bytes::Bytes;
use sentra_proto::Message;
use socket2::{Domain, Socket, Type as SocketType};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::UdpSocket;
use tokio::sync::broadcast;
use tracing::{debug, error, info, trace, warn};

/// UDP DNS server.
///
/// Owns the socket and every in-flight handler task. `ready` flips on at
/// bind and off at the start of shutdown, backing the external health
/// endpoint's readiness probe.
pub struct UdpServer {
    socket: Arc<UdpSocket>,
    handler: Arc<dyn QueryHandler>,
    local_addr: SocketAddr,
    ready: Arc<AtomicBool>,
    in_flight: Arc<AtomicU64>,
    shutdown_tx: broadcast::Sender<()>,
}

impl UdpServer {
    /// Binds the server to `addr`. Failure here is fatal to the daemon.
    pub async fn bind(addr: SocketAddr, handler: Arc<dyn QueryHandler>) -> Result<Self> {
        let domain = if addr.is_ipv4() {
            Domain::IPV4
        } else {
            Domain::IPV6
        };

        let socket = Socket::new(domain, SocketType::DGRAM, None)?;
        socket.set_reuse_address(true)?;
        #[cfg(unix)]
        socket.set_reuse_port(true)?;
        socket.set_nonblocking(true)?;
        socket.bind(&addr.into())?;

        let std_socket: std::net::UdpSocket = socket.into();
        let socket = UdpSocket::from_std(std_socket)?;
        let local_addr = socket.local_addr()?;

        let (shutdown_tx, _) = broadcast::channel(1);

        info!(address = %local_addr, "DNS server listening");

        Ok(Self {
            socket: Arc::new(socket),
            handler,
            local_addr,
            ready: Arc::new(AtomicBool::new(true)),
            in_flight: Arc::new(AtomicU64::new(0)),
            shutdown_tx,
        })
    }

    /// Returns the bound address.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Readiness predicate for the external health endpoint: true from
    /// successful bind until shutdown is requested.
    pub fn ready(&self) -> bool {
        self.ready.load(Ordering::Relaxed)
    }

    /// Number of handler tasks currently running.
    pub fn in_flight(&self) -> u64 {
        self.in_flight.load(Ordering::Relaxed)
    }

    /// Serves until shutdown is requested.
    pub async fn run(&self) -> Result<()> {
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let mut buf = vec![0u8; 65535];

        loop {
            tokio::select! {
                received = self.socket.recv_from(&mut buf) => {
                    match received {
                        Ok((len, src)) => {
                            let data = Bytes::copy_from_slice(&buf[..len]);
                            self.dispatch(data, src);
                        }
                        Err(e) => {
                            error!(error = %e, "error receiving UDP packet");
                        }
                    }
                }
                _ = shutdown_rx.recv() => {
                    debug!("listener stopping");
                    return Ok(());
                }
            }
        }
    }

    /// Spawns the handler task for one datagram.
    fn dispatch(&self, data: Bytes, src: SocketAddr) {
        let socket = Arc::clone(&self.socket);
        let handler = Arc::clone(&self.handler);
        let in_flight = Arc::clone(&self.in_flight);

        in_flight.fetch_add(1, Ordering::Relaxed);
        tokio::spawn(async move {
            if let Err(e) = process_datagram(socket, handler, data, src).await {
                debug!(error = %e, client = %src, "error processing query");
            }
            in_flight.fetch_sub(1, Ordering::Relaxed);
        });
    }

    /// Stops accepting queries and waits for in-flight handlers, up to
    /// `deadline`. Handlers still running at the deadline are abandoned.
    pub async fn shutdown(&self, deadline: Duration) {
        self.ready.store(false, Ordering::Relaxed);
        let _ = self.shutdown_tx.send(());

        let give_up_at = Instant::now() + deadline;
        while self.in_flight.load(Ordering::Relaxed) > 0 {
            if Instant::now() >= give_up_at {
                warn!(
                    abandoned = self.in_flight.load(Ordering::Relaxed),
                    "shutdown deadline exceeded, abandoning in-flight handlers"
                );
                return;
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }

        info!("all in-flight handlers drained");
    }
}

async fn process_datagram(
    socket: Arc<UdpSocket>,
    handler: Arc<dyn QueryHandler>,
    data: Bytes,
    src: SocketAddr,
) -> Result<()> {
    // Malformed datagrams are dropped silently; answering garbage only
    // invites reflection abuse.
    let query = match Message::parse(&data) {
        Ok(msg) => msg,
        Err(e) => {
            trace!(error = %e, client = %src, "dropping malformed query");
            return Ok(());
        }
    };

    let max_size = max_udp_response_size(&query);
    let context = QueryContext::new(src);
    let mut response = handler.handle(query, context).await;

    let mut wire = response.to_wire();
    if wire.len() > max_size {
        response.truncate_to(max_size);
        wire = response.to_wire();
    }

    socket.send_to(&wire, src).await.map_err(ServerError::Io)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use sentra_proto::{Name, Question, ResponseCode};
    use std::str::FromStr;

    struct RefusedHandler;

    #[async_trait]
    impl QueryHandler for RefusedHandler {
        async fn handle(&self, query: Message, _context: QueryContext) -> Message {
            let mut response = Message::response_from(&query);
            response.set_rcode(ResponseCode::Refused);
            response
        }
    }

    #[tokio::test]
    async fn test_bind_ephemeral() {
        let server = UdpServer::bind("127.0.0.1:0".parse().unwrap(), Arc::new(RefusedHandler))
            .await
            .unwrap();

        assert!(server.local_addr().port() > 0);
        assert!(server.ready());
        assert_eq!(server.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_shutdown_flips_readiness() {
        let server = UdpServer::bind("127.0.0.1:0".parse().unwrap(), Arc::new(RefusedHandler))
            .await
            .unwrap();

        server.shutdown(Duration::from_millis(100)).await;
        assert!(!server.ready());
    }

    #[tokio::test]
    async fn test_serves_and_answers() {
        let server = Arc::new(
            UdpServer::bind("127.0.0.1:0".parse().unwrap(), Arc::new(RefusedHandler))
                .await
                .unwrap(),
        );
        let addr = server.local_addr();

        let serving = Arc::clone(&server);
        tokio::spawn(async move { serving.run().await });

        let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        client.connect(addr).await.unwrap();

        let query = Message::query(Question::a(Name::from_str("example.com").unwrap()));
        client.send(&query.to_wire()).await.unwrap();

        let mut buf = vec![0u8; 512];
        let len = tokio::time::timeout(Duration::from_secs(1), client.recv(&mut buf))
            .await
            .unwrap()
            .unwrap();

        let response = Message::parse(&buf[..len]).unwrap();
        assert_eq!(response.id(), query.id());
        assert_eq!(response.rcode(), ResponseCode::Refused);

        server.shutdown(Duration::from_millis(200)).await;
    }

    #[tokio::test]
    async fn test_malformed_datagram_is_dropped() {
        let server = Arc::new(
            UdpServer::bind("127.0.0.1:0".parse().unwrap(), Arc::new(RefusedHandler))
                .await
                .unwrap(),
        );
        let addr = server.local_addr();
        let serving = Arc::clone(&server);
        tokio::spawn(async move { serving.run().await });

        let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        client.connect(addr).await.unwrap();
        client.send(&[0xFF, 0x01, 0x02]).await.unwrap();

        let mut buf = vec![0u8; 512];
        let reply = tokio::time::timeout(Duration::from_millis(200), client.recv(&mut buf)).await;
        assert!(reply.is_err(), "no response expected for garbage");
    }
}
