//! sslpivot — transparent TLS termination relay.
//!
//! Sits between a plaintext endpoint and a TLS endpoint, probes both every
//! cycle, and relays in whichever direction is free: terminate TLS in front
//! of a plaintext service, or strip TLS in front of a plaintext client.
//! Self-signed certificates are issued on demand and persisted across
//! restarts.

pub mod config;
pub mod relay;
pub mod tls;

pub use config::{Config, Endpoint, DEFAULT_PROBE_INTERVAL};
pub use relay::{
    probe, ConnectionPair, ModeController, RelayListener, RelayMode, RelayStream, StreamWrap,
    CONNECT_TIMEOUT, RELAY_BUFFER_SIZE,
};
pub use tls::{
    dial_connector, server_acceptor, CertManager, CertStore, ServerIdentity, TlsError,
    TlsVerifyMode, CERT_VALIDITY,
};
