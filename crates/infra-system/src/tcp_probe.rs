// Reachability probe over plain TCP
use async_trait::async_trait;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::debug;

use driftsync_core::domain::ServiceSpec;
use driftsync_core::port::{Reachability, ReachabilityProbe};

/// Cheaper probe: only checks that the ssh port accepts a connection
///
/// Does not authenticate, so key problems surface at sync time instead.
#[derive(Debug, Default, Clone, Copy)]
pub struct TcpReachabilityProbe;

impl TcpReachabilityProbe {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ReachabilityProbe for TcpReachabilityProbe {
    async fn check(&self, spec: &ServiceSpec) -> Reachability {
        let addr = format!("{}:{}", spec.remote.host, spec.remote.port);
        let limit = Duration::from_secs(spec.supervision.connect_timeout_secs);

        match timeout(limit, TcpStream::connect(&addr)).await {
            Ok(Ok(_stream)) => Reachability::Reachable,
            Ok(Err(e)) => {
                debug!(service = %spec.name, addr = %addr, error = %e, "TCP probe failed");
                Reachability::Unreachable(format!("{}: {}", addr, e))
            }
            Err(_) => Reachability::Unreachable(format!(
                "{}: connect timed out after {}s",
                addr, spec.supervision.connect_timeout_secs
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use driftsync_core::domain::RemoteEndpoint;
    use tokio::net::TcpListener;

    fn spec(port: u16) -> ServiceSpec {
        let mut remote = RemoteEndpoint::new("127.0.0.1");
        remote.port = port;
        let mut spec = ServiceSpec::new("web", "/tmp/web", remote, "/srv/web");
        spec.supervision.connect_timeout_secs = 1;
        spec
    }

    #[tokio::test]
    async fn test_open_port_is_reachable() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let answer = TcpReachabilityProbe::new().check(&spec(port)).await;
        assert_eq!(answer, Reachability::Reachable);
    }

    #[tokio::test]
    async fn test_closed_port_is_unreachable() {
        // Bind then drop to get a port nobody listens on
        let port = {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap().port()
        };

        let answer = TcpReachabilityProbe::new().check(&spec(port)).await;
        assert!(matches!(answer, Reachability::Unreachable(reason) if reason.starts_with("127.0.0.1:")));
    }
}
