//! Lifecycle event intake — HTTP endpoint feeding the detector.
//!
//! External platforms push node lifecycle notifications as JSON to
//! `POST /events`; the handler forwards them into the detector's event
//! channel. Only started for LIFECYCLE_EVENTS policies.

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info};

use curo_detect::LifecycleEvent;

/// Accept connections and forward posted events until shutdown.
pub async fn serve_events(
    listener: TcpListener,
    tx: mpsc::Sender<LifecycleEvent>,
    mut shutdown: watch::Receiver<bool>,
) -> anyhow::Result<()> {
    info!(addr = %listener.local_addr()?, "lifecycle event intake listening");

    loop {
        tokio::select! {
            accepted = listener.accept() => {
                let (stream, peer) = match accepted {
                    Ok(pair) => pair,
                    Err(e) => {
                        error!(error = %e, "event intake accept failed");
                        continue;
                    }
                };
                let tx = tx.clone();
                tokio::spawn(async move {
                    let io = TokioIo::new(stream);
                    let service = service_fn(move |req| handle(req, tx.clone()));
                    if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                        debug!(error = %e, %peer, "event connection error");
                    }
                });
            }
            _ = shutdown.changed() => {
                info!("event intake shutting down");
                break;
            }
        }
    }

    Ok(())
}

async fn handle(
    req: Request<Incoming>,
    tx: mpsc::Sender<LifecycleEvent>,
) -> Result<Response<Full<Bytes>>, std::convert::Infallible> {
    Ok(route(req, tx).await)
}

async fn route(req: Request<Incoming>, tx: mpsc::Sender<LifecycleEvent>) -> Response<Full<Bytes>> {
    if req.method() != hyper::Method::POST || req.uri().path() != "/events" {
        return respond(StatusCode::NOT_FOUND, "not found");
    }

    let body = match req.into_body().collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(e) => return respond(StatusCode::BAD_REQUEST, &format!("unreadable body: {e}")),
    };

    let mut event: LifecycleEvent = match serde_json::from_slice(&body) {
        Ok(event) => event,
        Err(e) => {
            debug!(error = %e, "rejected malformed lifecycle event");
            return respond(StatusCode::BAD_REQUEST, &format!("invalid event: {e}"));
        }
    };
    if event.at == 0 {
        event.at = epoch_secs();
    }

    match tx.send(event).await {
        Ok(()) => respond(StatusCode::ACCEPTED, "accepted"),
        Err(_) => respond(StatusCode::SERVICE_UNAVAILABLE, "detector not running"),
    }
}

fn respond(status: StatusCode, body: &str) -> Response<Full<Bytes>> {
    Response::builder()
        .status(status)
        .header("content-type", "text/plain")
        .body(Full::new(Bytes::from(body.to_string())))
        .unwrap()
}

fn epoch_secs() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
