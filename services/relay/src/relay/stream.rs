//! Relay stream abstraction.
//!
//! A relayed leg is either plain TCP or TLS in one of the two roles. The
//! `RelayStream` enum lets the pump work with both legs generically; the
//! TLS variants are boxed to keep the enum small.

use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use rustls::pki_types::ServerName;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;
use tokio_rustls::client::TlsStream as ClientTlsStream;
use tokio_rustls::server::TlsStream as ServerTlsStream;
use tokio_rustls::{TlsAcceptor, TlsConnector};

/// One leg of a relayed connection.
pub enum RelayStream {
    /// Plain TCP.
    Plain(TcpStream),
    /// TLS, server role (the relay terminated the handshake).
    ServerTls(Box<ServerTlsStream<TcpStream>>),
    /// TLS, client role (the relay initiated the handshake).
    ClientTls(Box<ClientTlsStream<TcpStream>>),
}

impl AsyncRead for RelayStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Self::Plain(s) => Pin::new(s).poll_read(cx, buf),
            Self::ServerTls(s) => Pin::new(s).poll_read(cx, buf),
            Self::ClientTls(s) => Pin::new(s).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for RelayStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            Self::Plain(s) => Pin::new(s).poll_write(cx, buf),
            Self::ServerTls(s) => Pin::new(s).poll_write(cx, buf),
            Self::ClientTls(s) => Pin::new(s).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Self::Plain(s) => Pin::new(s).poll_flush(cx),
            Self::ServerTls(s) => Pin::new(s).poll_flush(cx),
            Self::ClientTls(s) => Pin::new(s).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Self::Plain(s) => Pin::new(s).poll_shutdown(cx),
            Self::ServerTls(s) => Pin::new(s).poll_shutdown(cx),
            Self::ClientTls(s) => Pin::new(s).poll_shutdown(cx),
        }
    }
}

/// Transform applied to a raw accepted or dialed stream to produce the leg
/// the pump runs over: passthrough, or a TLS handshake in either role.
#[derive(Clone)]
pub enum StreamWrap {
    /// No transformation.
    Passthrough,
    /// TLS server handshake with the managed certificate.
    TlsServer(TlsAcceptor),
    /// TLS client handshake toward the dialed endpoint.
    TlsClient {
        connector: TlsConnector,
        server_name: ServerName<'static>,
    },
}

impl StreamWrap {
    /// Apply the transform. For the TLS variants this is where the
    /// handshake happens; a handshake failure fails the connection.
    pub async fn wrap(&self, stream: TcpStream) -> io::Result<RelayStream> {
        match self {
            Self::Passthrough => Ok(RelayStream::Plain(stream)),
            Self::TlsServer(acceptor) => Ok(RelayStream::ServerTls(Box::new(
                acceptor.accept(stream).await?,
            ))),
            Self::TlsClient {
                connector,
                server_name,
            } => Ok(RelayStream::ClientTls(Box::new(
                connector.connect(server_name.clone(), stream).await?,
            ))),
        }
    }
}
