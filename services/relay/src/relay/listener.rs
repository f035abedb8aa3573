//! Accept loop.
//!
//! Binds the listener for the current relay mode, pairs every accepted
//! connection with an outbound dial of the opposite endpoint, applies the
//! TLS role transforms, and runs the pumps. Per-connection failures are
//! contained; accept failures abort the loop and are retried by the mode
//! controller on its next cycle.

use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;
use tokio::time::timeout;
use tracing::{debug, error, info_span, warn, Instrument};

use crate::config::Endpoint;

use super::probe::CONNECT_TIMEOUT;
use super::pump::ConnectionPair;
use super::stream::StreamWrap;

/// A bound relay listener.
pub struct RelayListener {
    listener: TcpListener,
    local_addr: SocketAddr,
}

impl RelayListener {
    /// Resolve `endpoint` and bind.
    ///
    /// Resolution falls back from DNS lookup to a direct IP parse to the
    /// unspecified address, logging each fallback.
    pub async fn bind(endpoint: &Endpoint) -> io::Result<Self> {
        let addr = resolve_listen_addr(endpoint).await;
        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;
        Ok(Self {
            listener,
            local_addr,
        })
    }

    /// The address this listener is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Accept connections until shut down or an accept failure.
    ///
    /// Each accepted connection gets its own task: dial the opposite
    /// endpoint, apply the transforms (TLS handshakes happen here), run the
    /// pair. A failure there is logged and never stops the loop.
    pub async fn run(
        self,
        dial: Endpoint,
        listen_wrap: StreamWrap,
        dial_wrap: StreamWrap,
        mut shutdown_rx: oneshot::Receiver<()>,
    ) {
        loop {
            tokio::select! {
                accepted = self.listener.accept() => {
                    match accepted {
                        Ok((stream, peer_addr)) => {
                            let dial = dial.clone();
                            let listen_wrap = listen_wrap.clone();
                            let dial_wrap = dial_wrap.clone();
                            tokio::spawn(
                                async move {
                                    if let Err(e) =
                                        handle_connection(stream, dial, listen_wrap, dial_wrap)
                                            .await
                                    {
                                        warn!(error = %e, "connection failed");
                                    }
                                }
                                .instrument(info_span!("connection", peer = %peer_addr)),
                            );
                        }
                        Err(e) => {
                            error!(listen = %self.local_addr, error = %e, "accept failed; stopping relay listener");
                            break;
                        }
                    }
                }
                _ = &mut shutdown_rx => {
                    debug!(listen = %self.local_addr, "relay listener stopped");
                    break;
                }
            }
        }
    }
}

async fn handle_connection(
    stream: TcpStream,
    dial: Endpoint,
    listen_wrap: StreamWrap,
    dial_wrap: StreamWrap,
) -> io::Result<()> {
    let connect = TcpStream::connect((dial.host.as_str(), dial.port));
    let upstream = match timeout(CONNECT_TIMEOUT, connect).await {
        Ok(result) => result?,
        Err(_) => {
            return Err(io::Error::new(
                io::ErrorKind::TimedOut,
                format!("connect to {dial} timed out"),
            ))
        }
    };
    debug!(dial = %dial, "dialed opposite endpoint");

    let client = listen_wrap.wrap(stream).await?;
    let upstream = dial_wrap.wrap(upstream).await?;

    ConnectionPair::new(client, upstream).run().await;
    Ok(())
}

/// Resolve the listen address: DNS lookup, then direct IP parse, then the
/// unspecified address.
async fn resolve_listen_addr(endpoint: &Endpoint) -> SocketAddr {
    match tokio::net::lookup_host((endpoint.host.as_str(), endpoint.port)).await {
        Ok(mut addrs) => {
            if let Some(addr) = addrs.next() {
                return addr;
            }
            debug!(host = %endpoint.host, "lookup returned no addresses");
        }
        Err(e) => {
            debug!(host = %endpoint.host, error = %e, "lookup failed");
        }
    }
    match endpoint.host.parse::<IpAddr>() {
        Ok(ip) => SocketAddr::new(ip, endpoint.port),
        Err(_) => {
            warn!(
                host = %endpoint.host,
                "could not resolve listen host; binding the unspecified address"
            );
            SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), endpoint.port)
        }
    }
}
