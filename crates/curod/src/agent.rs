//! HTTP action runner — drives node agents over HTTP.
//!
//! Recovery actions are posted to the node agent's action endpoint:
//! `POST http://{address}/actions/{reboot|rebuild|recreate}`. A 2xx
//! response means the agent accepted and completed the action; 409
//! means "busy, try again"; anything else is a failure.

use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use curo_policy::ActionName;
use curo_recover::{ActionOutcome, ActionRunner};
use curo_state::NodeRecord;

/// Executes recovery actions by calling node agents over HTTP.
#[derive(Debug, Clone)]
pub struct HttpActionRunner {
    timeout: Duration,
}

impl HttpActionRunner {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

#[async_trait]
impl ActionRunner for HttpActionRunner {
    async fn execute(&self, node: &NodeRecord, action: ActionName) -> ActionOutcome {
        let path = match action {
            ActionName::Reboot => "/actions/reboot",
            ActionName::Rebuild => "/actions/rebuild",
            ActionName::Recreate => "/actions/recreate",
        };
        post_action(&node.address, path, self.timeout).await
    }
}

/// POST to a node agent endpoint and map the response to an outcome.
async fn post_action(address: &str, path: &str, timeout: Duration) -> ActionOutcome {
    let uri = format!("http://{address}{path}");

    let result = tokio::time::timeout(timeout, async {
        let stream = match tokio::net::TcpStream::connect(address).await {
            Ok(s) => s,
            Err(e) => {
                debug!(error = %e, %uri, "action request connection failed");
                return ActionOutcome::Error(format!("connect to {address} failed: {e}"));
            }
        };

        let io = hyper_util::rt::TokioIo::new(stream);
        let (mut sender, conn) = match hyper::client::conn::http1::handshake(io).await {
            Ok(pair) => pair,
            Err(e) => {
                return ActionOutcome::Error(format!("handshake with {address} failed: {e}"));
            }
        };

        tokio::spawn(async move {
            let _ = conn.await;
        });

        let req = http::Request::builder()
            .method("POST")
            .uri(&uri)
            .header("host", address)
            .header("user-agent", "curod/0.1")
            .body(http_body_util::Empty::<bytes::Bytes>::new())
            .unwrap();

        match sender.send_request(req).await {
            Ok(resp) => outcome_for_status(resp.status()),
            Err(e) => ActionOutcome::Error(format!("request to {uri} failed: {e}")),
        }
    })
    .await;

    match result {
        Ok(outcome) => outcome,
        Err(_) => {
            debug!(%uri, "action request timed out");
            ActionOutcome::Timeout
        }
    }
}

/// Map an agent response status to an action outcome.
fn outcome_for_status(status: http::StatusCode) -> ActionOutcome {
    if status.is_success() {
        ActionOutcome::Ok
    } else if status == http::StatusCode::CONFLICT {
        ActionOutcome::Retry("agent busy".to_string())
    } else {
        ActionOutcome::Error(format!("agent returned {status}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_mapping() {
        assert_eq!(outcome_for_status(http::StatusCode::OK), ActionOutcome::Ok);
        assert_eq!(
            outcome_for_status(http::StatusCode::ACCEPTED),
            ActionOutcome::Ok
        );
        assert!(matches!(
            outcome_for_status(http::StatusCode::CONFLICT),
            ActionOutcome::Retry(_)
        ));
        assert!(matches!(
            outcome_for_status(http::StatusCode::INTERNAL_SERVER_ERROR),
            ActionOutcome::Error(_)
        ));
        assert!(matches!(
            outcome_for_status(http::StatusCode::NOT_FOUND),
            ActionOutcome::Error(_)
        ));
    }

    #[tokio::test]
    async fn unreachable_agent_is_an_error() {
        let outcome = post_action("127.0.0.1:1", "/actions/reboot", Duration::from_millis(100)).await;
        assert!(matches!(outcome, ActionOutcome::Error(_)));
    }
}
