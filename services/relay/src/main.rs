//! sslpivot relay binary.
//!
//! Takes the TLS-facing and plaintext-facing endpoints as four positional
//! values (or from the sidecar `<executable>.txt` file), then runs the mode
//! controller until the process is stopped.

use anyhow::Result;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use sslpivot_relay::{Config, ModeController};

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::load()?;

    // Initialize tracing (prefer RUST_LOG, fallback to SSLPIVOT_LOG_LEVEL)
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| config.log_level.clone().into()))
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    rustls::crypto::ring::default_provider()
        .install_default()
        .ok();

    info!(
        tls = %config.tls_endpoint,
        plain = %config.plain_endpoint,
        probe_interval_ms = config.probe_interval.as_millis() as u64,
        verify_mode = %config.verify_mode,
        cert_dir = %config.cert_dir.display(),
        "starting sslpivot"
    );

    ModeController::new(config).run().await
}
