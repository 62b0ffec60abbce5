//! Daemon-level configuration: CLI flags, optional TOML config file, and
//! the merge between them (spec §6 "CLI and environment").
//!
//! Grounded on the teacher's `cosmic-ext-rdp-broker::config` (a
//! `#[serde(default)]` struct loaded from TOML with `Default` filling in
//! production values) and `cosmic-ext-rdp-broker::main::Cli` (`clap::Parser`
//! with a `-c/--config` path). CLI flags always win over file values when
//! both are present; see [`Config::merge_cli`].

use std::net::IpAddr;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Parser;
use serde::{Deserialize, Serialize};

use vdp_core::config::CoreConfig;

/// Default TCP listen port (spec §6).
pub const DEFAULT_PORT: u16 = 4822;

#[derive(Parser, Debug)]
#[command(name = "vdpd", version, about = "Display-protocol proxy daemon")]
pub struct Cli {
    /// Optional TOML config file; CLI flags below override its values.
    #[arg(short = 'c', long = "config")]
    pub config: Option<PathBuf>,

    /// TCP listen port.
    #[arg(short = 'l', long = "listen-port")]
    pub listen_port: Option<u16>,

    /// Bind address.
    #[arg(short = 'b', long = "bind-address")]
    pub bind_address: Option<IpAddr>,

    /// Path to write the daemon's PID to.
    #[arg(short = 'p', long = "pidfile")]
    pub pidfile: Option<PathBuf>,

    /// Log level: debug | info | warning | error.
    #[arg(short = 'L', long = "log-level")]
    pub log_level: Option<LogLevel>,

    /// Stay in the foreground instead of daemonizing.
    #[arg(short = 'f', long = "foreground")]
    pub foreground: bool,

    /// TLS certificate (PEM). Requires `-K`.
    #[arg(short = 'C', long = "cert")]
    pub cert: Option<PathBuf>,

    /// TLS private key (PEM). Requires `-C`.
    #[arg(short = 'K', long = "key")]
    pub key: Option<PathBuf>,

    /// Run with TLS using a freshly generated self-signed certificate.
    /// Ignored if `-C`/`-K` are given.
    #[arg(long = "tls")]
    pub tls: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warning,
    Error,
}

impl LogLevel {
    /// The `tracing`/`EnvFilter` directive this level maps to. `warning`
    /// is the display-protocol's historical spelling; `tracing` itself
    /// spells the level `warn`.
    pub fn as_filter_directive(self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warning => "warn",
            LogLevel::Error => "error",
        }
    }
}

impl Default for LogLevel {
    fn default() -> Self {
        LogLevel::Info
    }
}

/// The merged, effective configuration the daemon runs with.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub bind_address: IpAddr,
    pub listen_port: u16,
    pub pidfile: Option<PathBuf>,
    pub log_level: LogLevel,
    pub foreground: bool,
    pub cert: Option<PathBuf>,
    pub key: Option<PathBuf>,
    pub tls: bool,
    pub core: CoreConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_address: IpAddr::from([0, 0, 0, 0]),
            listen_port: DEFAULT_PORT,
            pidfile: None,
            log_level: LogLevel::default(),
            foreground: false,
            cert: None,
            key: None,
            tls: false,
            core: CoreConfig::default(),
        }
    }
}

impl Config {
    /// Load the base configuration from `path` if given (erroring if it
    /// does not parse), falling back to defaults if no path was given.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;
        let config: Config = toml::from_str(&contents)
            .with_context(|| format!("failed to parse config file: {}", path.display()))?;
        Ok(config)
    }

    /// Overlay CLI flags on top of a loaded (or default) configuration.
    /// Every `Some` field on `cli` wins; `None` leaves the file/default
    /// value untouched.
    pub fn merge_cli(mut self, cli: &Cli) -> Self {
        if let Some(port) = cli.listen_port {
            self.listen_port = port;
        }
        if let Some(addr) = cli.bind_address {
            self.bind_address = addr;
        }
        if cli.pidfile.is_some() {
            self.pidfile = cli.pidfile.clone();
        }
        if let Some(level) = cli.log_level {
            self.log_level = level;
        }
        if cli.foreground {
            self.foreground = true;
        }
        if cli.cert.is_some() {
            self.cert = cli.cert.clone();
        }
        if cli.key.is_some() {
            self.key = cli.key.clone();
        }
        if cli.tls {
            self.tls = true;
        }
        self
    }

    /// `true` iff TLS should be used: either a cert/key pair was given, or
    /// `-C`/`-K` are both absent but `--tls` asks for an ad-hoc self-signed
    /// certificate. Plain TCP is still the default.
    pub fn tls_enabled(&self) -> bool {
        self.cert.is_some() || self.tls
    }

    /// Validate the cert/key pairing: one without the other is a misuse
    /// error the daemon should exit non-zero on (spec §6, "Exit non-zero
    /// on misuse").
    pub fn validate(&self) -> Result<()> {
        if self.cert.is_some() != self.key.is_some() {
            anyhow::bail!("-C/--cert and -K/--key must both be set to enable TLS, or neither");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_port_matches_spec() {
        assert_eq!(Config::default().listen_port, DEFAULT_PORT);
    }

    #[test]
    fn cli_flags_override_defaults() {
        let cli = Cli {
            config: None,
            listen_port: Some(9000),
            bind_address: None,
            pidfile: None,
            log_level: Some(LogLevel::Debug),
            foreground: true,
            cert: None,
            key: None,
            tls: false,
        };
        let config = Config::default().merge_cli(&cli);
        assert_eq!(config.listen_port, 9000);
        assert_eq!(config.log_level, LogLevel::Debug);
        assert!(config.foreground);
    }

    #[test]
    fn mismatched_tls_flags_fail_validation() {
        let mut config = Config::default();
        config.cert = Some(PathBuf::from("cert.pem"));
        assert!(config.validate().is_err());
    }

    #[test]
    fn matched_tls_flags_pass_validation_and_enable_tls() {
        let mut config = Config::default();
        config.cert = Some(PathBuf::from("cert.pem"));
        config.key = Some(PathBuf::from("key.pem"));
        assert!(config.validate().is_ok());
        assert!(config.tls_enabled());
    }

    #[test]
    fn deserializes_partial_toml_with_defaults() {
        let config: Config = toml::from_str("listen_port = 5900").unwrap();
        assert_eq!(config.listen_port, 5900);
        assert_eq!(config.bind_address, IpAddr::from([0, 0, 0, 0]));
    }
}
