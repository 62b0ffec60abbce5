//! `vdpd`: the display-protocol proxy daemon binary. Parses CLI flags and
//! an optional TOML config file, sets up logging/TLS, then runs the
//! accept loop and a periodic idle-session reaper.
//!
//! Grounded on the teacher's `cosmic-ext-rdp-broker::main` (`clap::Parser`
//! CLI, `tracing_subscriber::fmt().with_env_filter(...)`, a `tokio::spawn`
//! background cleanup task, and a `tokio::select!` between the main loop
//! and a signal-driven shutdown future).

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;

use vdp_core::registry::SessionRegistry;
use vdp_daemon::config::{Cli, Config};
use vdp_daemon::listener::NullDriverLoader;
use vdp_daemon::{listener, pidfile, tls};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = Config::load(cli.config.as_deref())
        .context("failed to load configuration")?
        .merge_cli(&cli);
    config.validate().context("invalid configuration")?;

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(config.log_level.as_filter_directive())),
        )
        .init();

    tracing::info!(
        bind = %config.bind_address,
        port = config.listen_port,
        tls = config.tls_enabled(),
        foreground = config.foreground,
        "starting vdpd"
    );

    if let Some(path) = &config.pidfile {
        pidfile::write(path).with_context(|| format!("failed to write pidfile {}", path.display()))?;
    }

    let tls_acceptor = match (&config.cert, &config.key) {
        (Some(cert), Some(key)) => {
            Some(tls::load_from_files(cert, key).context("failed to load TLS certificate/key")?)
        }
        (None, None) if config.tls => {
            Some(tls::generate_self_signed(config.bind_address).context("failed to generate self-signed certificate")?)
        }
        (None, None) => None,
        _ => unreachable!("validate() rejects a lone cert or key"),
    };

    let registry = Arc::new(SessionRegistry::new());
    let loader = Arc::new(NullDriverLoader);
    let bind = std::net::SocketAddr::new(config.bind_address, config.listen_port);

    let reaper_registry = registry.clone();
    let reap_interval = config.core.idle_reap_interval();
    tokio::spawn(async move {
        idle_reap_task(reaper_registry, reap_interval).await;
    });

    let shutdown = async {
        let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to register SIGTERM handler");
        tokio::select! {
            _ = tokio::signal::ctrl_c() => tracing::info!("received SIGINT, shutting down"),
            _ = sigterm.recv() => tracing::info!("received SIGTERM, shutting down"),
        }
    };

    let handshake_timeout = config.core.handshake_timeout();
    tokio::select! {
        result = listener::run(bind, tls_acceptor, registry, loader, handshake_timeout, 1024, 768) => {
            result.context("listener failed")?;
        }
        () = shutdown => {
            tracing::info!("vdpd stopped");
        }
    }

    if let Some(path) = &config.pidfile {
        let _ = pidfile::remove(path);
    }

    Ok(())
}

/// Periodically sweep the session registry for stopped, empty sessions
/// (spec §4.I is silent on when this runs; this mirrors the teacher's
/// `idle_cleanup_task` cadence of a dedicated background `tokio::spawn`
/// with its own interval, separate from per-session bookkeeping).
async fn idle_reap_task(registry: Arc<SessionRegistry>, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);
    loop {
        ticker.tick().await;
        let reaped = registry.reap_idle().await;
        if !reaped.is_empty() {
            tracing::debug!(count = reaped.len(), "reaped idle sessions");
        }
    }
}
