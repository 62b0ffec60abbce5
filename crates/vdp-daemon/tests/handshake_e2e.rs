//! End-to-end scenarios A-C (spec.md §8): a raw `tokio::net::TcpStream`
//! client script driving the full accept loop (`vdp_daemon::listener`)
//! against `vdp_driver_null::NullDriver`. No live RDP/VNC/SSH client
//! exists in the pack to script against instead, so these act the part,
//! the way the teacher's own unit tests script a duplex pipe -- just over
//! a real socket, per SPEC_FULL.md's testing section.
//!
//! Scenarios D-F (broadcast fan-out under a write failure, update
//! coalescing, heat-map escalation) are exercised at the unit level in
//! `vdp-core`'s `transport.rs`/`surface.rs` instead: none of them need a
//! live socket to observe, and a real one would only add noise.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use vdp_core::codec::{self, Instruction};
use vdp_core::registry::SessionRegistry;

use vdp_daemon::listener::{self, NullDriverLoader};

/// Bind an ephemeral port, spawn the accept loop on it, and return the
/// address clients should connect to.
async fn spawn_daemon(handshake_timeout: Duration) -> SocketAddr {
    let bound = listener::bind(SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 0))
        .await
        .expect("bind ephemeral port");
    let addr = bound.local_addr().expect("bound socket has a local address");

    let registry = Arc::new(SessionRegistry::new());
    let loader = Arc::new(NullDriverLoader);

    tokio::spawn(async move {
        let _ = listener::serve(bound, None, registry, loader, handshake_timeout, 64, 64).await;
    });

    addr
}

async fn send<W: tokio::io::AsyncWrite + Unpin>(w: &mut W, instr: Instruction) {
    w.write_all(&instr.encode()).await.expect("write instruction");
}

async fn recv(stream: &mut TcpStream) -> Instruction {
    codec::read_instruction(stream, Duration::from_secs(2))
        .await
        .expect("read instruction")
}

async fn do_handshake(stream: &mut TcpStream, target: &str) -> Instruction {
    send(stream, Instruction::new("select", vec![target.as_bytes().to_vec()])).await;
    let args = recv(stream).await;
    assert_eq!(args.opcode, "args");

    send(stream, Instruction::new("size", vec![b"800".to_vec(), b"600".to_vec(), b"96".to_vec()])).await;
    send(stream, Instruction::new("audio", vec![])).await;
    send(stream, Instruction::new("video", vec![])).await;
    send(stream, Instruction::new("connect", vec![])).await;

    recv(stream).await
}

#[tokio::test(flavor = "multi_thread")]
async fn scenario_a_smoke_handshake_creates_a_new_session() {
    let addr = spawn_daemon(Duration::from_secs(3)).await;
    let mut client = TcpStream::connect(addr).await.expect("connect");

    let ready = do_handshake(&mut client, "test-protocol").await;
    assert_eq!(ready.opcode, "ready");
    let session_id = ready.arg_str(0).expect("ready carries the session id").into_owned();
    assert!(session_id.starts_with('$'), "session id should use the `$` prefix: {session_id}");
}

#[tokio::test(flavor = "multi_thread")]
async fn scenario_b_second_viewer_joins_the_owners_session() {
    let addr = spawn_daemon(Duration::from_secs(3)).await;

    let mut owner = TcpStream::connect(addr).await.expect("connect owner");
    let owner_ready = do_handshake(&mut owner, "test-protocol").await;
    let session_id = owner_ready.arg_str(0).unwrap().into_owned();

    let mut joiner = TcpStream::connect(addr).await.expect("connect joiner");
    let joiner_ready = do_handshake(&mut joiner, &session_id).await;

    assert_eq!(joiner_ready.opcode, "ready");
    assert_eq!(joiner_ready.arg_str(0).unwrap(), session_id);

    // The joiner is immediately synchronized to the current display state
    // (spec.md scenario B): a `size` instruction for the default layer
    // followed by an `img` carrying its current pixels, sent right after
    // `ready` via `Display::dup`.
    let size = recv(&mut joiner).await;
    assert_eq!(size.opcode, "size");
    assert_eq!(size.arg_str(0).unwrap(), "0");

    let img = recv(&mut joiner).await;
    assert_eq!(img.opcode, "img");
    assert_eq!(img.arg_str(0).unwrap(), "0");
}

#[tokio::test(flavor = "multi_thread")]
async fn scenario_c_unknown_session_id_is_rejected() {
    let addr = spawn_daemon(Duration::from_secs(3)).await;
    let mut client = TcpStream::connect(addr).await.expect("connect");

    send(&mut client, Instruction::new("select", vec![b"$00000000-0000-0000-0000-000000000000".to_vec()])).await;

    // No such session is registered: the connection task fails before it
    // ever sends `args`, and the socket should be closed rather than left
    // hanging.
    let mut buf = [0u8; 8];
    let read = tokio::time::timeout(Duration::from_secs(2), client.read(&mut buf))
        .await
        .expect("daemon should close the socket for an unknown session id");
    assert_eq!(read.unwrap(), 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn scenario_d_handshake_deadline_closes_a_stalled_connection() {
    let addr = spawn_daemon(Duration::from_millis(150)).await;
    let mut client = TcpStream::connect(addr).await.expect("connect");

    send(&mut client, Instruction::new("select", vec![b"test-protocol".to_vec()])).await;
    let args = recv(&mut client).await;
    assert_eq!(args.opcode, "args");

    // Never send `size`: the handshake deadline should fire and the
    // connection task should tear down rather than hang forever.
    let mut buf = [0u8; 8];
    let read = tokio::time::timeout(Duration::from_secs(2), client.read(&mut buf))
        .await
        .expect("daemon should close the socket once the handshake deadline fires");
    assert_eq!(read.unwrap(), 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn scenario_e_owner_leaving_retires_an_otherwise_empty_session() {
    let addr = spawn_daemon(Duration::from_secs(3)).await;

    let mut owner = TcpStream::connect(addr).await.expect("connect owner");
    let owner_ready = do_handshake(&mut owner, "test-protocol").await;
    let session_id = owner_ready.arg_str(0).unwrap().into_owned();

    send(&mut owner, Instruction::new("disconnect", vec![])).await;
    drop(owner);

    // Give the input loop a moment to observe the disconnect, unlink the
    // user, and retire the now-empty session.
    tokio::time::sleep(Duration::from_millis(200)).await;

    let mut late_joiner = TcpStream::connect(addr).await.expect("connect late joiner");
    send(&mut late_joiner, Instruction::new("select", vec![session_id.into_bytes()])).await;

    let mut buf = [0u8; 8];
    let read = tokio::time::timeout(Duration::from_secs(2), late_joiner.read(&mut buf))
        .await
        .expect("daemon should close the socket: the session was retired");
    assert_eq!(read.unwrap(), 0);
}
