//! Endpoint prober.

use std::time::Duration;

use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::trace;

use crate::config::Endpoint;

/// Bound on a single connect attempt (probe or dial).
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(2);

/// Check whether `endpoint` currently accepts TCP connections.
///
/// The probe connection is dropped immediately and never reused. Connection
/// failures of any kind (refused, timed out, unreachable, unresolvable) are
/// ordinary `false` outcomes, not errors.
pub async fn probe(endpoint: &Endpoint) -> bool {
    let attempt = TcpStream::connect((endpoint.host.as_str(), endpoint.port));
    match timeout(CONNECT_TIMEOUT, attempt).await {
        Ok(Ok(_stream)) => {
            trace!(endpoint = %endpoint, "probe: accepting");
            true
        }
        Ok(Err(e)) => {
            trace!(endpoint = %endpoint, error = %e, "probe: not accepting");
            false
        }
        Err(_) => {
            trace!(endpoint = %endpoint, "probe: timed out");
            false
        }
    }
}
