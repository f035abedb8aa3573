//! Per-connection bidirectional byte pump.
//!
//! A `ConnectionPair` is one accepted inbound leg plus the outbound leg it
//! is relayed to. It runs exactly two pump directions; each owns its halves
//! and a fixed buffer reused for every read/write cycle. Whichever
//! direction finishes first (clean end-of-stream or I/O error) tears the
//! whole pair down: a relay is meaningless with only one leg alive.

use std::io;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, warn};

use super::stream::RelayStream;

/// Fixed per-direction relay buffer size.
pub const RELAY_BUFFER_SIZE: usize = 4096;

/// The two legs of one proxied connection.
pub struct ConnectionPair {
    client: RelayStream,
    upstream: RelayStream,
}

impl ConnectionPair {
    /// Pair an accepted leg with the dialed leg.
    pub fn new(client: RelayStream, upstream: RelayStream) -> Self {
        Self { client, upstream }
    }

    /// Relay bytes in both directions until either direction ends, then
    /// tear both legs down.
    ///
    /// Teardown is implicit and best-effort: dropping both streams closes
    /// the underlying sockets, which also cancels the surviving direction's
    /// in-flight I/O.
    pub async fn run(self) {
        let (client_read, client_write) = tokio::io::split(self.client);
        let (upstream_read, upstream_write) = tokio::io::split(self.upstream);

        let inbound = pump_direction(client_read, upstream_write);
        let outbound = pump_direction(upstream_read, client_write);
        tokio::pin!(inbound, outbound);

        let (direction, result) = tokio::select! {
            r = &mut inbound => ("client->upstream", r),
            r = &mut outbound => ("upstream->client", r),
        };

        match result {
            Ok(bytes) => {
                debug!(direction, bytes, "relay direction closed; tearing down pair")
            }
            Err(e) => {
                warn!(direction, error = %e, "relay direction failed; tearing down pair")
            }
        }
    }
}

/// One pump direction: read up to the buffer length from `source`, write
/// exactly the bytes read to `dest`, repeat. Reads and writes strictly
/// alternate; the buffer is reused for the life of the direction.
///
/// Returns the number of bytes forwarded on clean end-of-stream.
async fn pump_direction<R, W>(mut source: R, mut dest: W) -> io::Result<u64>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buf = [0u8; RELAY_BUFFER_SIZE];
    let mut total = 0u64;
    loop {
        let n = source.read(&mut buf).await?;
        if n == 0 {
            return Ok(total);
        }
        dest.write_all(&buf[..n]).await?;
        dest.flush().await?;
        total += n as u64;
    }
}
