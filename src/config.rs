//! Process configuration
//!
//! Settings are read once at start-up and never change afterwards. Sources,
//! lowest to highest precedence:
//!
//! 1. Built-in defaults
//! 2. A TOML file passed with `--config`
//! 3. Environment variables (`WSRELAY_*`, `RUST_LOG`, `OTEL_EXPORTER_OTLP_ENDPOINT`)
//! 4. Command-line flags
//!
//! clap resolves 3 and 4 together; anything still unset falls through to the
//! file and then to the defaults.
//!
//! ```toml
//! http_port = 8000
//! tcp_port = 5555
//! bind = "0.0.0.0"
//! redact_diagnostics = true
//! ```

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};

use clap::Parser;
use serde::Deserialize;
use wsrelay_core::{DiagnosticMode, Error, ObservabilityConfig, Result};

/// Default port for the index page
pub const DEFAULT_HTTP_PORT: u16 = 8000;

/// Default port for the backend socket
pub const DEFAULT_TCP_PORT: u16 = 5555;

/// Default log filter
pub const DEFAULT_LOG_LEVEL: &str = "info";

/// Command-line interface of the `wsrelay` binary
#[derive(Debug, Clone, Default, Parser)]
#[command(
    name = "wsrelay",
    version,
    about = "Relay browser WebSocket calls to named operations"
)]
pub struct Cli {
    /// TOML configuration file
    #[arg(long, env = "WSRELAY_CONFIG", value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Port serving the index page [default: 8000]
    #[arg(long, env = "WSRELAY_HTTP_PORT")]
    pub http_port: Option<u16>,

    /// Port of the WebSocket client gateway [default: http-port + 1]
    #[arg(long, env = "WSRELAY_WS_PORT")]
    pub ws_port: Option<u16>,

    /// Port of the backend socket [default: 5555]
    #[arg(long, env = "WSRELAY_TCP_PORT")]
    pub tcp_port: Option<u16>,

    /// Address for the index page and the gateway [default: 0.0.0.0]
    #[arg(long, env = "WSRELAY_BIND")]
    pub bind: Option<IpAddr>,

    /// Address for the backend socket [default: 127.0.0.1]
    #[arg(long, env = "WSRELAY_BACKEND_BIND")]
    pub backend_bind: Option<IpAddr>,

    /// Index page template; `{{port}}` becomes the gateway port
    #[arg(long, env = "WSRELAY_INDEX", value_name = "FILE")]
    pub index: Option<PathBuf>,

    /// Directory served under /static/
    #[arg(long, env = "WSRELAY_STATIC_DIR", value_name = "DIR")]
    pub static_dir: Option<PathBuf>,

    /// Send only the failure category in error replies
    #[arg(
        long,
        env = "WSRELAY_REDACT_DIAGNOSTICS",
        num_args = 0..=1,
        default_missing_value = "true",
        value_name = "BOOL"
    )]
    pub redact_diagnostics: Option<bool>,

    /// Log filter (trace, debug, info, warn, error, or EnvFilter directives)
    #[arg(long, env = "RUST_LOG")]
    pub log_level: Option<String>,

    /// Write logs as JSON lines [default: true]
    #[arg(
        long,
        env = "WSRELAY_JSON_LOGS",
        num_args = 0..=1,
        default_missing_value = "true",
        value_name = "BOOL"
    )]
    pub json_logs: Option<bool>,

    /// OTLP gRPC endpoint for traces and metrics
    #[arg(long, env = "OTEL_EXPORTER_OTLP_ENDPOINT", value_name = "URL")]
    pub otlp_endpoint: Option<String>,
}

/// Contents of a `--config` file; every key is optional
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    pub http_port: Option<u16>,
    pub ws_port: Option<u16>,
    pub tcp_port: Option<u16>,
    pub bind: Option<IpAddr>,
    pub backend_bind: Option<IpAddr>,
    pub index: Option<PathBuf>,
    pub static_dir: Option<PathBuf>,
    pub redact_diagnostics: Option<bool>,
    pub log_level: Option<String>,
    pub json_logs: Option<bool>,
    pub otlp_endpoint: Option<String>,
}

impl FileConfig {
    /// Read and parse a TOML configuration file
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("cannot read {}: {}", path.display(), e)))?;
        Self::parse(&text).map_err(|e| match e {
            Error::Config(msg) => Error::Config(format!("{}: {}", path.display(), msg)),
            other => other,
        })
    }

    /// Parse TOML configuration text
    pub fn parse(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| Error::Config(e.to_string()))
    }
}

/// Fully resolved settings
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub http_port: u16,
    pub ws_port: u16,
    pub tcp_port: u16,
    pub bind: IpAddr,
    pub backend_bind: IpAddr,
    pub index: Option<PathBuf>,
    pub static_dir: Option<PathBuf>,
    pub diagnostics: DiagnosticMode,
    pub log_level: String,
    pub json_logs: bool,
    pub otlp_endpoint: Option<String>,
}

impl Settings {
    /// Resolve settings from parsed flags, loading `--config` if given
    pub fn resolve(cli: Cli) -> Result<Self> {
        let file = match cli.config.as_deref() {
            Some(path) => FileConfig::load(path)?,
            None => FileConfig::default(),
        };
        Self::from_parts(cli, file)
    }

    /// Merge flags over file values over defaults, then validate
    pub fn from_parts(cli: Cli, file: FileConfig) -> Result<Self> {
        let http_port = cli.http_port.or(file.http_port).unwrap_or(DEFAULT_HTTP_PORT);
        let ws_port = match cli.ws_port.or(file.ws_port) {
            Some(port) => port,
            None => http_port.checked_add(1).ok_or_else(|| {
                Error::Config(format!(
                    "http_port {} leaves no room for a default ws_port; set ws_port",
                    http_port
                ))
            })?,
        };

        let redact = cli
            .redact_diagnostics
            .or(file.redact_diagnostics)
            .unwrap_or(false);

        let settings = Self {
            http_port,
            ws_port,
            tcp_port: cli.tcp_port.or(file.tcp_port).unwrap_or(DEFAULT_TCP_PORT),
            bind: cli
                .bind
                .or(file.bind)
                .unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED)),
            backend_bind: cli
                .backend_bind
                .or(file.backend_bind)
                .unwrap_or(IpAddr::V4(Ipv4Addr::LOCALHOST)),
            index: cli.index.or(file.index),
            static_dir: cli.static_dir.or(file.static_dir),
            diagnostics: if redact {
                DiagnosticMode::Redacted
            } else {
                DiagnosticMode::Full
            },
            log_level: cli
                .log_level
                .or(file.log_level)
                .filter(|level| !level.is_empty())
                .unwrap_or_else(|| DEFAULT_LOG_LEVEL.to_string()),
            json_logs: cli.json_logs.or(file.json_logs).unwrap_or(true),
            otlp_endpoint: cli
                .otlp_endpoint
                .or(file.otlp_endpoint)
                .filter(|endpoint| !endpoint.is_empty()),
        };

        settings.validate()?;
        Ok(settings)
    }

    /// Reject port assignments that would collide at bind time
    ///
    /// Port 0 asks the OS for a free port and never collides.
    pub fn validate(&self) -> Result<()> {
        let listeners = [
            ("http_port", self.bind, self.http_port),
            ("ws_port", self.bind, self.ws_port),
            ("tcp_port", self.backend_bind, self.tcp_port),
        ];

        for (i, (name_a, ip_a, port_a)) in listeners.iter().enumerate() {
            for (name_b, ip_b, port_b) in listeners.iter().skip(i + 1) {
                if *port_a != 0 && port_a == port_b && addresses_overlap(*ip_a, *ip_b) {
                    return Err(Error::Config(format!(
                        "{} and {} are both {}",
                        name_a, name_b, port_a
                    )));
                }
            }
        }

        if let Some(ref dir) = self.static_dir {
            if !dir.is_dir() {
                return Err(Error::Config(format!(
                    "static_dir {} is not a directory",
                    dir.display()
                )));
            }
        }

        Ok(())
    }

    /// Where the client gateway listens
    pub fn gateway_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind, self.ws_port)
    }

    /// Where the backend socket listens
    pub fn backend_addr(&self) -> SocketAddr {
        SocketAddr::new(self.backend_bind, self.tcp_port)
    }

    /// Where the index page is served
    pub fn http_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind, self.http_port)
    }

    /// Read the configured index template, if any
    pub fn load_index_template(&self) -> Result<Option<String>> {
        match self.index {
            Some(ref path) => std::fs::read_to_string(path).map(Some).map_err(|e| {
                Error::Config(format!("cannot read index {}: {}", path.display(), e))
            }),
            None => Ok(None),
        }
    }

    /// Logging and telemetry settings for `init_observability`
    pub fn observability_config(&self) -> ObservabilityConfig {
        let mut config = ObservabilityConfig::new("wsrelay")
            .with_version(env!("CARGO_PKG_VERSION"))
            .with_log_level(self.log_level.clone())
            .with_json_logs(self.json_logs)
            .with_traces(false)
            .with_metrics(false);
        config.otlp_endpoint = None;

        match self.otlp_endpoint {
            Some(ref endpoint) => config.with_endpoint(endpoint.clone()),
            None => config,
        }
    }
}

fn addresses_overlap(a: IpAddr, b: IpAddr) -> bool {
    a == b || a.is_unspecified() || b.is_unspecified()
}
