//! Startup configuration.
//!
//! The relay takes exactly four positional values: the TLS-facing host and
//! port, and the plaintext-facing host and port. They come from the command
//! line, or, when the process is started with no arguments, from a sidecar
//! text file named `<executable>.txt` next to the executable (one value per
//! line). Everything else is env-driven.

use std::env;
use std::fmt;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;

use crate::tls::TlsVerifyMode;

/// Default control-loop interval between probe cycles.
pub const DEFAULT_PROBE_INTERVAL: Duration = Duration::from_secs(10);

/// A fixed host/port pair the relay probes, listens on, or dials.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    /// Host name or IP address.
    pub host: String,
    /// TCP port (1-65535).
    pub port: u16,
}

impl Endpoint {
    /// Create a new endpoint.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

#[derive(Debug, Parser)]
#[command(
    name = "sslpivot",
    about = "Transparent TLS termination relay between a TLS endpoint and a plaintext endpoint"
)]
struct Cli {
    /// Host or IP address of the TLS-facing endpoint.
    tls_host: String,

    /// Port of the TLS-facing endpoint.
    #[arg(value_parser = clap::value_parser!(u16).range(1..))]
    tls_port: u16,

    /// Host or IP address of the plaintext-facing endpoint.
    plain_host: String,

    /// Port of the plaintext-facing endpoint.
    #[arg(value_parser = clap::value_parser!(u16).range(1..))]
    plain_port: u16,
}

/// Relay configuration (positional values + env knobs).
#[derive(Debug, Clone)]
pub struct Config {
    /// The TLS-facing endpoint.
    pub tls_endpoint: Endpoint,

    /// The plaintext-facing endpoint.
    pub plain_endpoint: Endpoint,

    /// Interval between mode-controller probe cycles.
    pub probe_interval: Duration,

    /// Directory holding persisted certificate / key PEM pairs.
    pub cert_dir: PathBuf,

    /// How the dial-side TLS handshake verifies the remote certificate.
    pub verify_mode: TlsVerifyMode,

    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,
}

impl Config {
    /// Load configuration from the command line, falling back to the sidecar
    /// file when no arguments were given.
    pub fn load() -> Result<Self> {
        let cli = if env::args_os().len() > 1 {
            Cli::parse()
        } else {
            let path = sidecar_path()?;
            let content = fs::read_to_string(&path).with_context(|| {
                format!(
                    "no arguments given and no sidecar config at {}",
                    path.display()
                )
            })?;
            cli_from_sidecar(&content)
                .with_context(|| format!("invalid sidecar config {}", path.display()))?
        };
        Self::from_cli(cli)
    }

    /// Construct a configuration with default knobs, for embedding and tests.
    pub fn new(tls_endpoint: Endpoint, plain_endpoint: Endpoint, cert_dir: PathBuf) -> Self {
        Self {
            tls_endpoint,
            plain_endpoint,
            probe_interval: DEFAULT_PROBE_INTERVAL,
            cert_dir,
            verify_mode: TlsVerifyMode::AcceptAny,
            log_level: "info".to_string(),
        }
    }

    fn from_cli(cli: Cli) -> Result<Self> {
        let probe_interval_ms: u64 = env::var("SSLPIVOT_PROBE_INTERVAL_MS")
            .ok()
            .map(|v| v.parse())
            .transpose()
            .context("SSLPIVOT_PROBE_INTERVAL_MS must be an integer (milliseconds).")?
            .unwrap_or(DEFAULT_PROBE_INTERVAL.as_millis() as u64);
        let probe_interval = Duration::from_millis(probe_interval_ms.max(50));

        let cert_dir = match env::var("SSLPIVOT_CERT_DIR") {
            Ok(dir) => PathBuf::from(dir),
            Err(_) => default_cert_dir()?,
        };

        let verify_mode = env::var("SSLPIVOT_TLS_VERIFY")
            .ok()
            .map(|v| v.parse())
            .transpose()
            .map_err(anyhow::Error::msg)
            .context("SSLPIVOT_TLS_VERIFY must be `accept-any` or `trust-store`.")?
            .unwrap_or(TlsVerifyMode::AcceptAny);

        let log_level = env::var("SSLPIVOT_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

        Ok(Self {
            tls_endpoint: Endpoint::new(cli.tls_host, cli.tls_port),
            plain_endpoint: Endpoint::new(cli.plain_host, cli.plain_port),
            probe_interval,
            cert_dir,
            verify_mode,
            log_level,
        })
    }
}

/// Parse the four positional values from sidecar file content, one per line.
fn cli_from_sidecar(content: &str) -> Result<Cli, clap::Error> {
    let argv = std::iter::once("sslpivot").chain(
        content
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty()),
    );
    Cli::try_parse_from(argv)
}

fn sidecar_path() -> Result<PathBuf> {
    let exe = env::current_exe().context("could not determine the executable path")?;
    let name = exe
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .context("executable path has no file name")?;
    Ok(exe.with_file_name(format!("{name}.txt")))
}

fn default_cert_dir() -> Result<PathBuf> {
    let dirs = directories::ProjectDirs::from("", "", "sslpivot")
        .context("could not determine a data directory for the certificate store")?;
    Ok(dirs.data_dir().join("certs"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_positional_args_parse() {
        let cli = Cli::try_parse_from(["sslpivot", "10.0.0.1", "8443", "10.0.0.1", "8080"]).unwrap();
        assert_eq!(cli.tls_host, "10.0.0.1");
        assert_eq!(cli.tls_port, 8443);
        assert_eq!(cli.plain_host, "10.0.0.1");
        assert_eq!(cli.plain_port, 8080);
    }

    #[test]
    fn test_port_zero_rejected() {
        let result = Cli::try_parse_from(["sslpivot", "10.0.0.1", "0", "10.0.0.1", "8080"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_port_out_of_range_rejected() {
        let result = Cli::try_parse_from(["sslpivot", "10.0.0.1", "65536", "10.0.0.1", "8080"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_missing_values_rejected() {
        let result = Cli::try_parse_from(["sslpivot", "10.0.0.1", "8443"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_non_numeric_port_rejected() {
        let result = Cli::try_parse_from(["sslpivot", "10.0.0.1", "https", "10.0.0.1", "8080"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_sidecar_lines_parse() {
        let cli = cli_from_sidecar("example.com\n443\n\n  localhost  \n8080\n").unwrap();
        assert_eq!(cli.tls_host, "example.com");
        assert_eq!(cli.tls_port, 443);
        assert_eq!(cli.plain_host, "localhost");
        assert_eq!(cli.plain_port, 8080);
    }

    #[test]
    fn test_sidecar_missing_lines_rejected() {
        assert!(cli_from_sidecar("example.com\n443\n").is_err());
    }

    #[test]
    fn test_endpoint_display() {
        assert_eq!(Endpoint::new("10.0.0.1", 8443).to_string(), "10.0.0.1:8443");
    }
}
