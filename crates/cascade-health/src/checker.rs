//! Liveness probe for the local collector.
//!
//! Issues a plain `GET` against the collector's health extension. Only a
//! `200 OK` counts as healthy.

use std::future::Future;
use std::time::Duration;

use http::StatusCode;
use tracing::debug;

/// Result of a single liveness probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeResult {
    /// The status endpoint answered 200.
    Healthy,
    /// The status endpoint answered with any other status.
    Unhealthy,
    /// The probe could not complete (connect, handshake, timeout).
    Failed,
}

/// A liveness check the prober can run on each tick.
pub trait LivenessCheck: Send + Sync + 'static {
    fn check(&self) -> impl Future<Output = ProbeResult> + Send;

    /// Human-readable probe target for logs.
    fn target(&self) -> String;
}

/// HTTP `GET http://<host>:<port><path>` liveness check.
#[derive(Debug, Clone)]
pub struct HttpStatusCheck {
    address: String,
    path: String,
    timeout: Duration,
}

impl HttpStatusCheck {
    pub fn new(host: &str, port: u16, path: &str, timeout: Duration) -> Self {
        let host = if host.contains(':') && !host.starts_with('[') {
            format!("[{host}]")
        } else {
            host.to_string()
        };
        let path = if path.starts_with('/') {
            path.to_string()
        } else {
            format!("/{path}")
        };
        Self {
            address: format!("{host}:{port}"),
            path,
            timeout,
        }
    }

    pub fn uri(&self) -> String {
        format!("http://{}{}", self.address, self.path)
    }

    async fn get_status(&self) -> ProbeResult {
        let uri = self.uri();

        let stream = match tokio::net::TcpStream::connect(self.address.as_str()).await {
            Ok(s) => s,
            Err(e) => {
                debug!(error = %e, %uri, "status probe connection failed");
                return ProbeResult::Failed;
            }
        };

        let io = hyper_util::rt::TokioIo::new(stream);
        let (mut sender, conn) = match hyper::client::conn::http1::handshake(io).await {
            Ok(pair) => pair,
            Err(e) => {
                debug!(error = %e, %uri, "status probe handshake failed");
                return ProbeResult::Failed;
            }
        };

        tokio::spawn(async move {
            let _ = conn.await;
        });

        let req = match http::Request::builder()
            .method(http::Method::GET)
            .uri(uri.as_str())
            .header(http::header::HOST, self.address.as_str())
            .header(http::header::USER_AGENT, "cascade-health/0.1")
            .body(http_body_util::Empty::<bytes::Bytes>::new())
        {
            Ok(req) => req,
            Err(e) => {
                debug!(error = %e, %uri, "status probe request invalid");
                return ProbeResult::Failed;
            }
        };

        match sender.send_request(req).await {
            Ok(resp) if resp.status() == StatusCode::OK => ProbeResult::Healthy,
            Ok(resp) => {
                debug!(status = %resp.status(), %uri, "status probe not OK");
                ProbeResult::Unhealthy
            }
            Err(e) => {
                debug!(error = %e, %uri, "status probe request failed");
                ProbeResult::Failed
            }
        }
    }
}

impl LivenessCheck for HttpStatusCheck {
    async fn check(&self) -> ProbeResult {
        match tokio::time::timeout(self.timeout, self.get_status()).await {
            Ok(result) => result,
            Err(_) => {
                debug!(uri = %self.uri(), "status probe timed out");
                ProbeResult::Failed
            }
        }
    }

    fn target(&self) -> String {
        self.uri()
    }
}
