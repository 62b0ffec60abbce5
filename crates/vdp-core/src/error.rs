//! Classified error kinds shared across the codec, handshake, session, and
//! driver layers (spec §7).
//!
//! Callers decide how to recover: the listener discards a connection on a
//! handshake error, a driver input handler may log a [`Error::Resource`]
//! and continue, an [`Error::Upstream`] transitions the owning session to
//! `Stopping`. Log messages built from these errors are for operators only
//! and are never sent to a viewer verbatim -- see `status_code`/`wire_message`.

/// A classified failure. Every fallible operation in `vdp-core` returns
/// `Result<T, Error>`.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Instruction syntax violated while parsing the wire format.
    #[error("malformed instruction: {0}")]
    Malformed(String),

    /// A handshake step expected one opcode but received another.
    #[error("expected opcode `{expected}`, got `{actual}`")]
    UnexpectedOpcode { expected: String, actual: String },

    /// No progress was made within the applicable deadline.
    #[error("timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// Any malformed/unexpected/timeout failure during the join handshake.
    #[error("handshake failed: {0}")]
    HandshakeFailed(String),

    /// The upstream driver refused to initialize a new session.
    #[error("driver failed to initialize session: {0}")]
    DriverInit(String),

    /// The upstream driver rejected a joining viewer.
    #[error("driver rejected viewer: {0}")]
    DriverJoin(String),

    /// The upstream connection was lost or reported an error.
    #[error("upstream error: {0}")]
    Upstream(String),

    /// A bounded resource (stream/object table, free FD, memory) is exhausted.
    #[error("resource exhausted: {0}")]
    Resource(String),

    /// An invariant the implementation relies on was violated.
    #[error("internal invariant violated: {0}")]
    Internal(String),
}

impl Error {
    /// The small non-negative status code shared with upstream drivers
    /// (spec §6). These numeric values must not change: existing viewers
    /// interpret them directly.
    pub fn status_code(&self) -> u16 {
        match self {
            Error::Malformed(_)
            | Error::UnexpectedOpcode { .. }
            | Error::HandshakeFailed(_) => 0x0300,
            Error::Timeout(_) => 0x0201,
            Error::DriverInit(_) | Error::DriverJoin(_) => 0x0300,
            Error::Upstream(_) => 0x0308,
            Error::Resource(_) => 0x0300,
            Error::Internal(_) => 0x0300,
        }
    }

    /// Status code for a successful operation, for symmetry with
    /// `status_code` at call sites that build protocol `error` instructions.
    pub const SUCCESS: u16 = 0x0000;
    pub const CLIENT_TIMEOUT: u16 = 0x0201;
    pub const SERVER_ERROR: u16 = 0x0300;
    pub const UPSTREAM_ERROR: u16 = 0x0308;

    /// The message sent to the client on the wire. Deliberately generic:
    /// internal detail (the `Display` impl above) is for logs only.
    pub fn wire_message(&self) -> &'static str {
        match self {
            Error::Timeout(_) => "Aborted. Connection timed out.",
            Error::Upstream(_) => "Aborted. See logs.",
            _ => "Aborted. See logs.",
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
