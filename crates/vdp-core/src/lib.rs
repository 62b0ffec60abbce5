//! Core protocol, display model, and session machinery for the
//! display-protocol proxy daemon.
//!
//! This crate has no knowledge of TCP listeners, TLS, CLI flags, or
//! configuration files -- those live in the `vdp-daemon` binary crate. It
//! owns everything downstream of an accepted, already-wrapped connection:
//! the instruction codec (wire framing), rectangle algebra, the per-layer
//! surface/display model, the session and user lifecycle, the session
//! registry, the frame-pacing loop, and the `Driver` trait that a protocol
//! backend (RDP/VNC/SSH, or a test fixture) implements.

pub mod codec;
pub mod config;
pub mod display;
pub mod driver;
pub mod error;
pub mod frame;
pub mod ids;
pub mod pool;
pub mod rect;
pub mod registry;
pub mod session;
pub mod surface;
pub mod transport;
pub mod user;

pub use error::{Error, Result};
