//! The accept loop and connection router (spec §4.J): wrap each socket in
//! TLS if configured, read one `select`, then either join an existing
//! session or create a new one via the driver loader.
//!
//! Grounded on the teacher's `cosmic-ext-rdp-broker::broker::run`/
//! `handle_connection` (`TcpListener::accept` + `tokio::spawn` per
//! connection, each failure logged and contained to that connection).
//! This implements the single-process flavor from spec §9's redesign
//! flag: one tokio task per session (the frame loop) plus one task per
//! connected user (the handshake, then the input loop), no Unix-socket
//! FD-passing to a child process.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::net::{TcpListener, TcpStream};
use tokio_rustls::TlsAcceptor;

use vdp_core::codec;
use vdp_core::driver::Driver;
use vdp_core::error::Error;
use vdp_core::ids::is_session_id;
use vdp_core::registry::SessionRegistry;
use vdp_core::session::Session;

use crate::handshake;
use crate::input_loop;

/// Constructs a fresh [`Driver`] for a protocol name from a `select`
/// instruction that did not match an existing session id. The daemon's
/// `main` wires this to a concrete loader (today: always
/// [`vdp_driver_null::NullDriver`], since no real RDP/VNC/SSH backend
/// ships in this reference binary); production deployments would load a
/// backend-specific driver per protocol name here.
pub trait DriverLoader: Send + Sync {
    fn load(&self, protocol: &str) -> Result<(Vec<String>, Box<dyn Driver>)>;
}

/// Bind the listening socket without starting to accept connections yet.
/// Split out from [`run`] so a caller (tests, mainly -- see
/// `crates/vdp-daemon/tests/`) can discover the actual bound address
/// before the accept loop starts, e.g. after binding to port 0.
pub async fn bind(addr: SocketAddr) -> Result<TcpListener> {
    TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind to {addr}"))
}

/// Run the accept loop forever, spawning one task per connection.
pub async fn run(
    bind_addr: SocketAddr,
    tls: Option<TlsAcceptor>,
    registry: Arc<SessionRegistry>,
    loader: Arc<dyn DriverLoader>,
    handshake_timeout: Duration,
    default_width: i32,
    default_height: i32,
) -> Result<()> {
    let listener = bind(bind_addr).await?;
    serve(listener, tls, registry, loader, handshake_timeout, default_width, default_height).await
}

/// Accept connections forever on an already-bound `listener`, spawning one
/// task per connection. See [`run`] for the bind-then-serve convenience
/// wrapper `main.rs` uses.
pub async fn serve(
    listener: TcpListener,
    tls: Option<TlsAcceptor>,
    registry: Arc<SessionRegistry>,
    loader: Arc<dyn DriverLoader>,
    handshake_timeout: Duration,
    default_width: i32,
    default_height: i32,
) -> Result<()> {
    let local_addr = listener.local_addr().context("failed to read bound local address")?;
    tracing::info!(bind = %local_addr, tls = tls.is_some(), "listening for viewer connections");

    loop {
        let (stream, peer_addr) = listener.accept().await.context("failed to accept connection")?;
        let registry = registry.clone();
        let loader = loader.clone();
        let tls = tls.clone();

        tokio::spawn(async move {
            if let Err(err) = handle_connection(
                stream,
                peer_addr,
                tls,
                &registry,
                loader.as_ref(),
                handshake_timeout,
                default_width,
                default_height,
            )
            .await
            {
                tracing::warn!(%peer_addr, %err, "connection handling failed");
            }
        });
    }
}

async fn handle_connection(
    stream: TcpStream,
    peer_addr: SocketAddr,
    tls: Option<TlsAcceptor>,
    registry: &SessionRegistry,
    loader: &dyn DriverLoader,
    handshake_timeout: Duration,
    default_width: i32,
    default_height: i32,
) -> Result<()> {
    let _ = stream.set_nodelay(true);

    match tls {
        Some(acceptor) => {
            let stream = acceptor
                .accept(stream)
                .await
                .context("TLS handshake failed")?;
            route(stream, peer_addr, registry, loader, handshake_timeout, default_width, default_height).await
        }
        None => route(stream, peer_addr, registry, loader, handshake_timeout, default_width, default_height).await,
    }
}

async fn route<S>(
    mut stream: S,
    peer_addr: SocketAddr,
    registry: &SessionRegistry,
    loader: &dyn DriverLoader,
    handshake_timeout: Duration,
    default_width: i32,
    default_height: i32,
) -> Result<()>
where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin + Send + 'static,
{
    let select = codec::expect(&mut stream, handshake_timeout, "select")
        .await
        .context("failed to read `select`")?;
    if select.args.len() != 1 {
        anyhow::bail!("`select` expects exactly one argument");
    }
    let identifier = select
        .arg_str(0)
        .ok_or_else(|| anyhow::anyhow!("`select` argument is not valid text"))?
        .into_owned();

    if is_session_id(&identifier) {
        let session = registry
            .get(&identifier)
            .await
            .ok_or_else(|| anyhow::anyhow!("no such session: {identifier}"))?;

        tracing::info!(%peer_addr, session = %identifier, "joining existing session");
        let (user, reader) = handshake::run(&session, stream, handshake_timeout, false)
            .await
            .context("join handshake failed")?;
        session
            .display
            .dup(user.transport.as_ref())
            .await
            .context("failed to synchronize joining viewer")?;
        input_loop::run(session.clone(), user, reader, handshake_timeout).await;
        maybe_retire(&session, registry).await;
    } else {
        let (args, driver) = loader
            .load(&identifier)
            .with_context(|| format!("no driver for protocol `{identifier}`"))?;
        let session = Session::new(args, driver, default_width, default_height);

        registry
            .add(session.clone())
            .await
            .map_err(|e| anyhow::anyhow!(e))
            .context("failed to register new session")?;

        tracing::info!(%peer_addr, session = %session.id, protocol = %identifier, "created new session");

        tokio::spawn({
            let session = session.clone();
            async move {
                vdp_core::frame::run_frame_loop(&session).await;
            }
        });

        let (user, reader) = match handshake::run(&session, stream, handshake_timeout, true).await {
            Ok(result) => result,
            Err(err) => {
                session.stop();
                registry.remove(&session.id).await;
                return Err(anyhow::anyhow!(err)).context("owner handshake failed");
            }
        };
        input_loop::run(session.clone(), user, reader, handshake_timeout).await;
        maybe_retire(&session, registry).await;
    }

    Ok(())
}

/// Clean up a session once its user list has gone empty: stop it, let the
/// driver free its resources, and remove it from the registry (spec §4.H,
/// "when the user list becomes empty, the session transitions to
/// Stopping").
pub async fn maybe_retire(session: &Arc<Session>, registry: &SessionRegistry) {
    if session.user_count().await > 0 {
        return;
    }
    session.stop();
    if let Err(err) = session.driver().free(session).await {
        tracing::warn!(session = %session.id, %err, "driver cleanup failed");
    }
    registry.remove(&session.id).await;
    tracing::info!(session = %session.id, "session retired: last user left");
}

/// Map a protocol-name `select` to the reference null driver. This is the
/// only [`DriverLoader`] this reference binary ships -- every `select
/// <anything-not-a-session-id>` gets the same static fill, since no real
/// RDP/VNC/SSH backend lives in this crate (spec §1, out of scope).
pub struct NullDriverLoader;

impl DriverLoader for NullDriverLoader {
    fn load(&self, _protocol: &str) -> Result<(Vec<String>, Box<dyn Driver>)> {
        Ok((Vec::new(), Box::new(vdp_driver_null::NullDriver::new())))
    }
}

/// Classify an I/O-level handshake/session error into the wire status
/// code a viewer should see before its socket closes (spec §7,
/// "the viewer always receives an `error` instruction before the socket
/// closes").
pub fn status_for(err: &Error) -> u16 {
    err.status_code()
}
