//! HTTP health-endpoint probe
//!
//! Every node exposes a tiny health service:
//! - `GET /primary` → 200 if the node is primary and healthy, else 503
//! - `GET /replica` → 200 if the node is a streaming replica, else 503
//!
//! The probe needs only the status line, so it speaks minimal HTTP/1.0 over a
//! raw TCP connection (the same shape as an haproxy httpchk). The whole probe,
//! both endpoint checks included, runs under one timeout; on expiry the node
//! classifies exactly like a refused connection.

use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;

use crate::node::Node;

use super::{ObservedRole, ProbeResult, RoleProbe};

/// Default port of the per-node health service.
pub const DEFAULT_HEALTH_PORT: u16 = 8008;

/// Probe that consults a node's HTTP health endpoints.
#[derive(Debug, Clone)]
pub struct HttpRoleProbe {
    /// Port the health service listens on, on every node
    health_port: u16,

    /// Budget for one complete probe
    probe_timeout: Duration,
}

impl HttpRoleProbe {
    /// Create a probe with the given per-probe timeout.
    pub fn new(probe_timeout: Duration) -> Self {
        Self {
            health_port: DEFAULT_HEALTH_PORT,
            probe_timeout,
        }
    }

    /// Override the health service port.
    pub fn with_health_port(mut self, health_port: u16) -> Self {
        self.health_port = health_port;
        self
    }

    /// Health service address for a node.
    ///
    /// The node record carries the engine address; the health service lives
    /// on the same host at a fixed port.
    fn health_addr(&self, node: &Node) -> Option<String> {
        let host = node.address.rsplit_once(':').map(|(h, _)| h)?;
        Some(format!("{}:{}", host, self.health_port))
    }

    /// Issue one `GET <path>` and report whether the status line was 200.
    async fn check(addr: &str, path: &str) -> std::io::Result<bool> {
        let mut stream = TcpStream::connect(addr).await?;
        let request = format!("GET {} HTTP/1.0\r\n\r\n", path);
        stream.write_all(request.as_bytes()).await?;

        // The status line fits comfortably in one read; anything beyond the
        // status code is ignored.
        let mut buf = [0u8; 64];
        let n = stream.read(&mut buf).await?;
        let line = String::from_utf8_lossy(&buf[..n]);
        Ok(status_code(&line) == Some(200))
    }

    async fn classify(&self, addr: &str) -> ObservedRole {
        if let Ok(true) = Self::check(addr, "/primary").await {
            return ObservedRole::Primary;
        }
        if let Ok(true) = Self::check(addr, "/replica").await {
            return ObservedRole::Replica;
        }
        ObservedRole::Unknown
    }
}

impl RoleProbe for HttpRoleProbe {
    async fn probe(&self, node: &Node) -> ProbeResult {
        let addr = match self.health_addr(node) {
            Some(addr) => addr,
            None => return ProbeResult::unreachable(node.id),
        };

        match timeout(self.probe_timeout, self.classify(&addr)).await {
            Ok(ObservedRole::Unknown) | Err(_) => ProbeResult::unreachable(node.id),
            Ok(role) => ProbeResult::observed(node.id, role),
        }
    }
}

/// Extract the status code from an HTTP status line.
fn status_code(line: &str) -> Option<u16> {
    let mut parts = line.split_whitespace();
    let version = parts.next()?;
    if !version.starts_with("HTTP/") {
        return None;
    }
    parts.next()?.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::Node;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    #[test]
    fn test_status_code_parsing() {
        assert_eq!(status_code("HTTP/1.0 200 OK\r\n"), Some(200));
        assert_eq!(status_code("HTTP/1.1 503 Service Unavailable\r\n"), Some(503));
        assert_eq!(status_code("garbage"), None);
        assert_eq!(status_code(""), None);
    }

    #[test]
    fn test_health_addr_uses_fixed_port() {
        let probe = HttpRoleProbe::new(Duration::from_millis(100)).with_health_port(9900);
        let node = Node::replica("10.0.1.2:5432");
        assert_eq!(probe.health_addr(&node), Some("10.0.1.2:9900".to_string()));
    }

    #[test]
    fn test_health_addr_requires_port_in_address() {
        let probe = HttpRoleProbe::new(Duration::from_millis(100));
        let node = Node::replica("not-an-addr");
        assert_eq!(probe.health_addr(&node), None);
    }

    /// Serve canned status lines for /primary and /replica on an ephemeral port.
    async fn health_stub(primary_ok: bool, replica_ok: bool) -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            loop {
                let (mut socket, _) = match listener.accept().await {
                    Ok(conn) => conn,
                    Err(_) => return,
                };
                let (primary_ok, replica_ok) = (primary_ok, replica_ok);
                tokio::spawn(async move {
                    let mut buf = [0u8; 256];
                    let n = socket.read(&mut buf).await.unwrap_or(0);
                    let request = String::from_utf8_lossy(&buf[..n]).to_string();
                    let ok = if request.starts_with("GET /primary") {
                        primary_ok
                    } else if request.starts_with("GET /replica") {
                        replica_ok
                    } else {
                        false
                    };
                    let status = if ok {
                        "HTTP/1.0 200 OK\r\n\r\n"
                    } else {
                        "HTTP/1.0 503 Service Unavailable\r\n\r\n"
                    };
                    let _ = socket.write_all(status.as_bytes()).await;
                });
            }
        });
        port
    }

    #[tokio::test]
    async fn test_probe_observes_primary() {
        let port = health_stub(true, false).await;
        let probe = HttpRoleProbe::new(Duration::from_secs(1)).with_health_port(port);
        let node = Node::primary("127.0.0.1:5432");

        let result = probe.probe(&node).await;
        assert!(result.healthy);
        assert_eq!(result.observed_role, ObservedRole::Primary);
    }

    #[tokio::test]
    async fn test_probe_observes_replica() {
        let port = health_stub(false, true).await;
        let probe = HttpRoleProbe::new(Duration::from_secs(1)).with_health_port(port);
        let node = Node::replica("127.0.0.1:5432");

        let result = probe.probe(&node).await;
        assert!(result.healthy);
        assert_eq!(result.observed_role, ObservedRole::Replica);
    }

    #[tokio::test]
    async fn test_probe_classifies_double_503_as_unreachable() {
        let port = health_stub(false, false).await;
        let probe = HttpRoleProbe::new(Duration::from_secs(1)).with_health_port(port);
        let node = Node::replica("127.0.0.1:5432");

        let result = probe.probe(&node).await;
        assert!(!result.healthy);
        assert_eq!(result.observed_role, ObservedRole::Unknown);
    }

    #[tokio::test]
    async fn test_probe_classifies_refused_connection_as_unreachable() {
        // Bind-then-drop guarantees nothing listens on the port.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let probe = HttpRoleProbe::new(Duration::from_secs(1)).with_health_port(port);
        let node = Node::primary("127.0.0.1:5432");

        let result = probe.probe(&node).await;
        assert!(!result.healthy);
        assert_eq!(result.observed_role, ObservedRole::Unknown);
    }
}
