//! Write and read proxies
//!
//! Per ROUTING_MODEL.md §6:
//! - The write proxy forwards every accepted connection to the current
//!   write target; with no write target the connection is refused and
//!   closed, never queued
//! - The read proxy picks a replica per connection and forwards; with no
//!   read targets the connection is refused
//! - Backend selection happens once, at accept time, from the snapshot
//!   current at that moment; established connections are never re-routed
//!
//! Forwarding is plain byte copying in both directions; the proxies know
//! nothing about the engine's wire protocol.

use std::sync::Arc;

use tokio::io::copy_bidirectional;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;

use crate::observability::{Logger, MetricsRegistry};
use crate::routing::{
    pick_write, ConnectionCounts, ConnectionGuard, NodeRef, ReadDispatcher, RoutingState,
};

/// Forwards client connections to the single write target.
pub struct WriteProxy {
    routing_rx: watch::Receiver<Arc<RoutingState>>,
    metrics: Arc<MetricsRegistry>,
}

impl WriteProxy {
    pub fn new(
        routing_rx: watch::Receiver<Arc<RoutingState>>,
        metrics: Arc<MetricsRegistry>,
    ) -> Self {
        Self {
            routing_rx,
            metrics,
        }
    }

    /// Accept loop. Runs until the listener's task is dropped.
    pub async fn run(self, listener: TcpListener) {
        loop {
            let (client, peer) = match listener.accept().await {
                Ok(accepted) => accepted,
                Err(err) => {
                    let message = err.to_string();
                    Logger::warn("WRITE_ACCEPT_FAILED", &[("error", message.as_str())]);
                    continue;
                }
            };

            let target = match pick_write(&self.routing_rx.borrow()) {
                Ok(target) => target,
                Err(err) => {
                    // Refuse by closing: the client retries, and by then a
                    // write target may exist again.
                    self.metrics.increment_writes_rejected();
                    let peer = peer.to_string();
                    let reason = err.to_string();
                    Logger::warn(
                        "WRITE_REFUSED",
                        &[("peer", peer.as_str()), ("reason", reason.as_str())],
                    );
                    continue;
                }
            };

            self.metrics.increment_writes_dispatched();
            tokio::spawn(forward(client, target, None));
        }
    }
}

/// Forwards client connections to a chosen replica.
pub struct ReadProxy {
    routing_rx: watch::Receiver<Arc<RoutingState>>,
    dispatcher: ReadDispatcher,
    counts: Arc<ConnectionCounts>,
    metrics: Arc<MetricsRegistry>,
}

impl ReadProxy {
    pub fn new(
        routing_rx: watch::Receiver<Arc<RoutingState>>,
        metrics: Arc<MetricsRegistry>,
    ) -> Self {
        let counts = Arc::new(ConnectionCounts::new());
        Self {
            routing_rx,
            dispatcher: ReadDispatcher::with_counts(Arc::clone(&counts)),
            counts,
            metrics,
        }
    }

    /// Accept loop. Runs until the listener's task is dropped.
    pub async fn run(self, listener: TcpListener) {
        loop {
            let (client, peer) = match listener.accept().await {
                Ok(accepted) => accepted,
                Err(err) => {
                    let message = err.to_string();
                    Logger::warn("READ_ACCEPT_FAILED", &[("error", message.as_str())]);
                    continue;
                }
            };

            let target = match self.dispatcher.pick_read(&self.routing_rx.borrow()) {
                Ok(target) => target,
                Err(err) => {
                    self.metrics.increment_reads_rejected();
                    let peer = peer.to_string();
                    let reason = err.to_string();
                    Logger::warn(
                        "READ_REFUSED",
                        &[("peer", peer.as_str()), ("reason", reason.as_str())],
                    );
                    continue;
                }
            };

            self.metrics.increment_reads_dispatched();
            // The guard keeps the least-connections count honest for the
            // lifetime of the forwarded connection.
            let guard = self.counts.acquire(target.id);
            tokio::spawn(forward(client, target, Some(guard)));
        }
    }
}

/// Copy bytes both ways until either side closes.
async fn forward(mut client: TcpStream, target: NodeRef, _guard: Option<ConnectionGuard>) {
    let mut backend = match TcpStream::connect(&target.address).await {
        Ok(stream) => stream,
        Err(err) => {
            let address = target.address.clone();
            let message = err.to_string();
            Logger::warn(
                "BACKEND_CONNECT_FAILED",
                &[("backend", address.as_str()), ("error", message.as_str())],
            );
            return;
        }
    };

    // Errors here are ordinary connection teardown; nothing to escalate.
    let _ = copy_bidirectional(&mut client, &mut backend).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::NodeId;
    use chrono::Utc;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    async fn echo_backend() -> (String, tokio::task::JoinHandle<()>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap().to_string();
        let handle = tokio::spawn(async move {
            loop {
                let (mut stream, _) = match listener.accept().await {
                    Ok(accepted) => accepted,
                    Err(_) => return,
                };
                tokio::spawn(async move {
                    let mut buffer = [0u8; 1024];
                    loop {
                        match stream.read(&mut buffer).await {
                            Ok(0) | Err(_) => return,
                            Ok(n) => {
                                if stream.write_all(&buffer[..n]).await.is_err() {
                                    return;
                                }
                            }
                        }
                    }
                });
            }
        });
        (address, handle)
    }

    fn state_with(write: Option<NodeRef>, reads: Vec<NodeRef>) -> Arc<RoutingState> {
        Arc::new(RoutingState {
            write_target: write,
            read_targets: reads,
            cycle: 1,
            computed_at: Utc::now(),
        })
    }

    #[tokio::test]
    async fn test_write_proxy_forwards_to_primary() {
        let (backend_addr, _backend) = echo_backend().await;
        let target = NodeRef {
            id: NodeId::new(),
            address: backend_addr,
        };
        let (_tx, rx) = watch::channel(state_with(Some(target), vec![]));
        let metrics = Arc::new(MetricsRegistry::new());

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let proxy_addr = listener.local_addr().unwrap();
        let proxy = WriteProxy::new(rx, Arc::clone(&metrics));
        let _server = tokio::spawn(proxy.run(listener));

        let mut client = TcpStream::connect(proxy_addr).await.unwrap();
        client.write_all(b"insert").await.unwrap();
        let mut reply = [0u8; 6];
        client.read_exact(&mut reply).await.unwrap();
        assert_eq!(&reply, b"insert");
        assert_eq!(metrics.snapshot().writes_dispatched, 1);
    }

    #[tokio::test]
    async fn test_write_proxy_refuses_without_primary() {
        let (_tx, rx) = watch::channel(state_with(None, vec![]));
        let metrics = Arc::new(MetricsRegistry::new());

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let proxy_addr = listener.local_addr().unwrap();
        let proxy = WriteProxy::new(rx, Arc::clone(&metrics));
        let _server = tokio::spawn(proxy.run(listener));

        let mut client = TcpStream::connect(proxy_addr).await.unwrap();
        // The proxy closes immediately: EOF or reset, never data
        let mut buffer = [0u8; 1];
        match client.read(&mut buffer).await {
            Ok(0) | Err(_) => {}
            Ok(n) => panic!("unexpected {} bytes from refused connection", n),
        }
        assert_eq!(metrics.snapshot().writes_rejected, 1);
        assert_eq!(metrics.snapshot().writes_dispatched, 0);
    }

    #[tokio::test]
    async fn test_read_proxy_forwards_to_replica() {
        let (backend_addr, _backend) = echo_backend().await;
        let target = NodeRef {
            id: NodeId::new(),
            address: backend_addr,
        };
        let (_tx, rx) = watch::channel(state_with(None, vec![target]));
        let metrics = Arc::new(MetricsRegistry::new());

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let proxy_addr = listener.local_addr().unwrap();
        let proxy = ReadProxy::new(rx, Arc::clone(&metrics));
        let _server = tokio::spawn(proxy.run(listener));

        let mut client = TcpStream::connect(proxy_addr).await.unwrap();
        client.write_all(b"select").await.unwrap();
        let mut reply = [0u8; 6];
        client.read_exact(&mut reply).await.unwrap();
        assert_eq!(&reply, b"select");
        assert_eq!(metrics.snapshot().reads_dispatched, 1);
    }

    #[tokio::test]
    async fn test_read_proxy_refuses_without_replicas() {
        let (_tx, rx) = watch::channel(state_with(None, vec![]));
        let metrics = Arc::new(MetricsRegistry::new());

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let proxy_addr = listener.local_addr().unwrap();
        let proxy = ReadProxy::new(rx, Arc::clone(&metrics));
        let _server = tokio::spawn(proxy.run(listener));

        let mut client = TcpStream::connect(proxy_addr).await.unwrap();
        let mut buffer = [0u8; 1];
        match client.read(&mut buffer).await {
            Ok(0) | Err(_) => {}
            Ok(n) => panic!("unexpected {} bytes from refused connection", n),
        }
        assert_eq!(metrics.snapshot().reads_rejected, 1);
    }

    #[tokio::test]
    async fn test_snapshot_change_redirects_new_connections() {
        let (first_addr, _first) = echo_backend().await;
        let (second_addr, _second) = echo_backend().await;
        let first = NodeRef {
            id: NodeId::new(),
            address: first_addr,
        };
        let second = NodeRef {
            id: NodeId::new(),
            address: second_addr.clone(),
        };

        let (tx, rx) = watch::channel(state_with(Some(first), vec![]));
        let metrics = Arc::new(MetricsRegistry::new());
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let proxy_addr = listener.local_addr().unwrap();
        let _server = tokio::spawn(WriteProxy::new(rx, metrics).run(listener));

        let mut client = TcpStream::connect(proxy_addr).await.unwrap();
        client.write_all(b"a").await.unwrap();
        let mut reply = [0u8; 1];
        client.read_exact(&mut reply).await.unwrap();

        // A new snapshot affects only connections accepted after it
        tx.send_replace(state_with(Some(second), vec![]));
        let mut late = TcpStream::connect(proxy_addr).await.unwrap();
        late.write_all(b"b").await.unwrap();
        late.read_exact(&mut reply).await.unwrap();
        assert_eq!(&reply, b"b");
    }
}
