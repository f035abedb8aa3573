//! Mode controller.
//!
//! The top-level control loop: probe both endpoints, pick the relay mode,
//! run the accept loop for that mode, and re-evaluate on a fixed interval.
//! The loop never exits; everything above connection granularity is retried
//! on the next cycle.

use anyhow::Result;
use rustls::pki_types::ServerName;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use crate::config::{Config, Endpoint};
use crate::tls::{dial_connector, server_acceptor, CertManager, CertStore, TlsVerifyMode};

use super::listener::RelayListener;
use super::probe::probe;
use super::stream::StreamWrap;

/// Which side the relay is currently listening on, if any.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayMode {
    /// Both endpoints are bound by other processes; relay nothing.
    BothBound,
    /// Listen on the plaintext endpoint, dial the TLS endpoint as a TLS
    /// client.
    ListenPlainDialTls,
    /// Listen on the TLS endpoint as a TLS server, dial the plaintext
    /// endpoint.
    ListenTlsDialPlain,
    /// Neither endpoint is bound; relay nothing.
    NeitherBound,
}

impl RelayMode {
    /// Select the mode for one pair of probe results.
    pub fn from_probes(tls_bound: bool, plain_bound: bool) -> Self {
        match (tls_bound, plain_bound) {
            (true, true) => Self::BothBound,
            (true, false) => Self::ListenPlainDialTls,
            (false, true) => Self::ListenTlsDialPlain,
            (false, false) => Self::NeitherBound,
        }
    }
}

struct ActiveRelay {
    mode: RelayMode,
    shutdown: oneshot::Sender<()>,
    handle: JoinHandle<()>,
}

/// The top-level relay state machine.
pub struct ModeController {
    tls: Endpoint,
    plain: Endpoint,
    probe_interval: std::time::Duration,
    verify_mode: TlsVerifyMode,
    certs: CertManager,
    last_announced: Option<RelayMode>,
    active: Option<ActiveRelay>,
}

impl ModeController {
    pub fn new(config: Config) -> Self {
        Self {
            tls: config.tls_endpoint,
            plain: config.plain_endpoint,
            probe_interval: config.probe_interval,
            verify_mode: config.verify_mode,
            certs: CertManager::new(CertStore::new(config.cert_dir)),
            last_announced: None,
            active: None,
        }
    }

    /// Run the control loop. Never returns under normal operation.
    pub async fn run(mut self) -> Result<()> {
        loop {
            self.tick().await;
            sleep(self.probe_interval).await;
        }
    }

    /// One control cycle.
    async fn tick(&mut self) {
        if !self.check_active().await {
            return;
        }

        let tls_bound = probe(&self.tls).await;
        let plain_bound = probe(&self.plain).await;
        let mode = RelayMode::from_probes(tls_bound, plain_bound);
        self.announce(mode);

        match mode {
            RelayMode::BothBound | RelayMode::NeitherBound => {}
            RelayMode::ListenPlainDialTls => self.start_plain_listener().await,
            RelayMode::ListenTlsDialPlain => self.start_tls_listener().await,
        }
    }

    /// Re-check an active relay. Returns true when the cycle should fall
    /// through to a full re-probe.
    ///
    /// While a relay is active it occupies one of the two ports itself, so
    /// only the dialed endpoint is probed; probing the listen endpoint
    /// would observe the relay, not the external service.
    async fn check_active(&mut self) -> bool {
        let Some(active) = &self.active else {
            return true;
        };
        if active.handle.is_finished() {
            debug!("relay listener exited; re-evaluating");
            self.active = None;
            return true;
        }

        let dial = match active.mode {
            RelayMode::ListenPlainDialTls => self.tls.clone(),
            _ => self.plain.clone(),
        };
        if probe(&dial).await {
            return false;
        }

        info!(endpoint = %dial, "dial endpoint no longer reachable; stopping relay");
        self.stop_active().await;
        true
    }

    async fn stop_active(&mut self) {
        if let Some(active) = self.active.take() {
            let _ = active.shutdown.send(());
            let _ = active.handle.await;
        }
    }

    /// Record a transition. Returns true when the mode actually changed.
    fn transition(&mut self, mode: RelayMode) -> bool {
        if self.last_announced == Some(mode) {
            return false;
        }
        self.last_announced = Some(mode);
        true
    }

    /// Log a mode transition, once per change.
    fn announce(&mut self, mode: RelayMode) {
        if !self.transition(mode) {
            return;
        }
        match mode {
            RelayMode::BothBound => {
                warn!(tls = %self.tls, plain = %self.plain, "both endpoints are bound; relaying nothing")
            }
            RelayMode::ListenPlainDialTls => {
                info!(listen = %self.plain, dial = %self.tls, "listening on the plain endpoint and dialing the TLS endpoint")
            }
            RelayMode::ListenTlsDialPlain => {
                info!(listen = %self.tls, dial = %self.plain, "listening on the TLS endpoint and dialing the plain endpoint")
            }
            RelayMode::NeitherBound => {
                warn!(tls = %self.tls, plain = %self.plain, "neither endpoint is bound")
            }
        }
    }

    /// Listen on the plaintext endpoint, dialing the TLS endpoint with a
    /// TLS client handshake.
    async fn start_plain_listener(&mut self) {
        let connector = match dial_connector(self.verify_mode, self.certs.store()) {
            Ok(connector) => connector,
            Err(e) => {
                error!(error = %e, "dial TLS configuration failed; skipping this cycle");
                return;
            }
        };
        let server_name = match ServerName::try_from(self.tls.host.clone()) {
            Ok(name) => name,
            Err(e) => {
                error!(host = %self.tls.host, error = %e, "invalid TLS server name; skipping this cycle");
                return;
            }
        };
        self.start_relay(
            RelayMode::ListenPlainDialTls,
            self.plain.clone(),
            self.tls.clone(),
            StreamWrap::Passthrough,
            StreamWrap::TlsClient {
                connector,
                server_name,
            },
        )
        .await;
    }

    /// Listen on the TLS endpoint with the managed certificate, dialing the
    /// plaintext endpoint passthrough.
    async fn start_tls_listener(&mut self) {
        let identity = match self.certs.obtain(&self.tls.host) {
            Ok(identity) => identity,
            Err(e) => {
                error!(identity = %self.tls.host, error = %e, "certificate unavailable; skipping this cycle");
                return;
            }
        };
        let acceptor = match server_acceptor(identity) {
            Ok(acceptor) => acceptor,
            Err(e) => {
                error!(error = %e, "server TLS configuration failed; skipping this cycle");
                return;
            }
        };
        self.start_relay(
            RelayMode::ListenTlsDialPlain,
            self.tls.clone(),
            self.plain.clone(),
            StreamWrap::TlsServer(acceptor),
            StreamWrap::Passthrough,
        )
        .await;
    }

    async fn start_relay(
        &mut self,
        mode: RelayMode,
        listen: Endpoint,
        dial: Endpoint,
        listen_wrap: StreamWrap,
        dial_wrap: StreamWrap,
    ) {
        let listener = match RelayListener::bind(&listen).await {
            Ok(listener) => listener,
            Err(e) => {
                error!(listen = %listen, error = %e, "failed to bind relay listener");
                return;
            }
        };
        debug!(listen = %listener.local_addr(), dial = %dial, "relay listener bound");

        let (shutdown, shutdown_rx) = oneshot::channel();
        let handle = tokio::spawn(listener.run(dial, listen_wrap, dial_wrap, shutdown_rx));
        self.active = Some(ActiveRelay {
            mode,
            shutdown,
            handle,
        });
    }
}
