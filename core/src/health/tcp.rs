//! Loopback TCP readiness probe

use super::{HealthError, Probe};
use async_trait::async_trait;
use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::trace;

/// Passes once a server accepts connections on a loopback port
///
/// Each attempt opens a connection and drops it straight away.
#[derive(Debug, Clone, Copy)]
pub struct TcpProbe {
    addr: SocketAddr,
    attempt_timeout: Duration,
}

impl TcpProbe {
    /// Probe `127.0.0.1:<port>`, giving each connect `attempt_timeout`
    pub fn localhost(port: u16, attempt_timeout: Duration) -> Self {
        Self {
            addr: SocketAddr::from((Ipv4Addr::LOCALHOST, port)),
            attempt_timeout,
        }
    }

    /// Port being probed
    #[must_use]
    pub fn port(&self) -> u16 {
        self.addr.port()
    }
}

#[async_trait]
impl Probe for TcpProbe {
    async fn check(&self) -> Result<(), HealthError> {
        match timeout(self.attempt_timeout, TcpStream::connect(self.addr)).await {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(e)) => {
                trace!("Port {} not accepting yet: {}", self.port(), e);
                Err(HealthError::Tcp(e))
            }
            Err(_) => Err(HealthError::Timeout(self.attempt_timeout)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_passes_while_listening() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind");
        let port = listener.local_addr().expect("addr").port();

        let probe = TcpProbe::localhost(port, Duration::from_secs(1));
        assert_eq!(probe.port(), port);
        probe.check().await.expect("listener accepts");
    }

    #[tokio::test]
    async fn test_refused_once_listener_is_gone() {
        let port = std::net::TcpListener::bind("127.0.0.1:0")
            .and_then(|l| l.local_addr())
            .expect("bind")
            .port();

        let err = TcpProbe::localhost(port, Duration::from_secs(1))
            .check()
            .await
            .expect_err("nothing listens");
        assert!(matches!(err, HealthError::Tcp(_)), "{err:?}");
    }
}
