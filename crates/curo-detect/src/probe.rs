//! Status probe seams and the HTTP probe implementation.
//!
//! The detector only sees `ProbeStatus`; where the status comes from is
//! behind the `StatusProbe` / `LbStatusSource` traits so that node-agent
//! and load-balancer integrations stay external to this crate.

use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use curo_state::NodeRecord;

/// Result of a single status check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeStatus {
    /// The node reported itself healthy.
    Healthy,
    /// The node reported itself unhealthy.
    Unhealthy,
    /// The check could not be completed (connect error, timeout). Not
    /// evidence of node failure on its own.
    Inconclusive,
}

/// Source of node status for `NODE_STATUS_POLLING`.
#[async_trait]
pub trait StatusProbe: Send + Sync {
    async fn check(&self, node: &NodeRecord) -> ProbeStatus;
}

/// Source of member health for `LB_STATUS_POLLING`.
///
/// Implementations wrap a concrete load-balancer API; none ships here.
#[async_trait]
pub trait LbStatusSource: Send + Sync {
    async fn member_health(&self, node: &NodeRecord) -> ProbeStatus;
}

/// HTTP status probe against a node agent endpoint.
#[derive(Debug, Clone)]
pub struct HttpStatusProbe {
    path: String,
    timeout: Duration,
}

impl HttpStatusProbe {
    pub fn new(path: impl Into<String>, timeout: Duration) -> Self {
        Self {
            path: path.into(),
            timeout,
        }
    }
}

impl Default for HttpStatusProbe {
    fn default() -> Self {
        Self::new("/healthz", Duration::from_secs(2))
    }
}

#[async_trait]
impl StatusProbe for HttpStatusProbe {
    async fn check(&self, node: &NodeRecord) -> ProbeStatus {
        http_probe(&node.address, &self.path, self.timeout).await
    }
}

/// Perform an HTTP status probe against an endpoint.
///
/// Returns `Healthy` if the response is 2xx, `Unhealthy` for non-2xx,
/// or `Inconclusive` if the connection fails or times out.
pub async fn http_probe(address: &str, path: &str, timeout: Duration) -> ProbeStatus {
    let uri = format!("http://{address}{path}");

    let result = tokio::time::timeout(timeout, async {
        let stream = match tokio::net::TcpStream::connect(address).await {
            Ok(s) => s,
            Err(e) => {
                debug!(error = %e, %uri, "status probe connection failed");
                return ProbeStatus::Inconclusive;
            }
        };

        let io = hyper_util::rt::TokioIo::new(stream);
        let (mut sender, conn) = match hyper::client::conn::http1::handshake(io).await {
            Ok(pair) => pair,
            Err(e) => {
                debug!(error = %e, %uri, "status probe handshake failed");
                return ProbeStatus::Inconclusive;
            }
        };

        // Drive the connection in the background.
        tokio::spawn(async move {
            let _ = conn.await;
        });

        let req = http::Request::builder()
            .method("GET")
            .uri(&uri)
            .header("host", address)
            .header("user-agent", "curo-detect/0.1")
            .body(http_body_util::Empty::<bytes::Bytes>::new())
            .unwrap();

        match sender.send_request(req).await {
            Ok(resp) => {
                if resp.status().is_success() {
                    ProbeStatus::Healthy
                } else {
                    debug!(status = %resp.status(), %uri, "status probe non-2xx");
                    ProbeStatus::Unhealthy
                }
            }
            Err(e) => {
                debug!(error = %e, %uri, "status probe request failed");
                ProbeStatus::Inconclusive
            }
        }
    })
    .await;

    match result {
        Ok(status) => status,
        Err(_) => {
            debug!(%uri, "status probe timed out");
            ProbeStatus::Inconclusive
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn probe_to_closed_port_is_inconclusive() {
        // Nothing listens on port 1; a connect failure is transient
        // evidence, not an unhealthy verdict.
        let status = http_probe("127.0.0.1:1", "/healthz", Duration::from_millis(100)).await;
        assert_eq!(status, ProbeStatus::Inconclusive);
    }

    #[tokio::test]
    async fn http_status_probe_uses_node_address() {
        let node = NodeRecord {
            id: "n1".to_string(),
            cluster_id: "c1".to_string(),
            address: "127.0.0.1:1".to_string(),
            status: curo_state::NodeStatus::Active,
            health: curo_state::HealthState::Unknown,
            recovery_count: 0,
            last_checked_at: 0,
            updated_at: 0,
        };
        let probe = HttpStatusProbe::new("/healthz", Duration::from_millis(100));
        assert_eq!(probe.check(&node).await, ProbeStatus::Inconclusive);
    }
}
