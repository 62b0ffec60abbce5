//! Library half of the `vdpd` binary: CLI/config handling, TLS setup, the
//! viewer handshake, the per-user input loop, and the listener/router.
//!
//! Split out from `main.rs` so integration tests (`tests/`) can drive a
//! real [`listener::run`] accept loop end-to-end against
//! [`vdp_driver_null::NullDriver`], the way spec scenarios A-F call for,
//! without a live RDP/VNC/SSH client to script against.

pub mod config;
pub mod handshake;
pub mod input_loop;
pub mod listener;
pub mod pidfile;
pub mod tls;
