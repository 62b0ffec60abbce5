//! The `Driver` trait: the boundary between this crate's session/transport
//! machinery and a protocol- or backend-specific pixel source (spec §4.L).
//!
//! Modeled on the capture/input split the teacher crate uses to keep a
//! concrete backend (X11, a remote framebuffer, a test pattern) out of the
//! session plumbing: a `Driver` is handed a [`crate::session::Session`] to
//! draw into and a stream of per-user input events to consume, and it owns
//! no transport code of its own.

use async_trait::async_trait;

use crate::codec::Instruction;
use crate::error::Result;
use crate::session::Session;

/// A key or mouse event delivered from one user's input loop.
#[derive(Debug, Clone)]
pub enum InputEvent {
    Mouse { x: i32, y: i32, button_mask: u32 },
    Key { keysym: i32, pressed: bool },
    Size { width: u32, height: u32 },
    Clipboard(Vec<u8>),
}

/// Backend that owns a session's pixel content and consumes its input.
///
/// Implementations are `Send + Sync` because the frame-pacing loop and
/// every user's input-loop task call into the same `Driver` instance
/// concurrently; internal mutability is the implementation's
/// responsibility (spec §5, "Surface" lock discipline applies equally to
/// driver-owned state).
#[async_trait]
pub trait Driver: Send + Sync {
    /// The protocol-specific argument list this driver advertises for a new
    /// session (echoed back to the handshake's `args` instruction).
    fn args(&self) -> Vec<String> {
        Vec::new()
    }

    /// Called once when a user successfully joins the session this driver
    /// backs. `session` is a borrow of the owning session so the driver can
    /// read display state (e.g. to send a full `dup` of the current frame).
    /// `argv` is the user's `connect` instruction arguments, positionally
    /// matched against whatever `args()` advertised (spec §4.L).
    async fn join(&self, session: &Session, user_id: &str, owner: bool, argv: &[String]) -> Result<()>;

    /// Called when a user disconnects or explicitly leaves.
    async fn leave(&self, session: &Session, user_id: &str) -> Result<()>;

    /// Deliver one input event from `user_id`.
    async fn input(&self, session: &Session, user_id: &str, event: InputEvent) -> Result<()>;

    /// Deliver a raw instruction the session plumbing does not itself
    /// interpret (driver-specific extensions negotiated out of band).
    async fn handle_instruction(&self, session: &Session, user_id: &str, instr: &Instruction) -> Result<()>;

    /// Called once per frame-loop tick (spec §4.K step 3): dispatch any
    /// upstream events ready right now (drawing, cursor, clipboard) into
    /// `session`'s display. Returns the number of events processed, or an
    /// `Err(Error::Upstream(..))` on a fatal upstream disconnect -- the
    /// frame loop treats that as session-ending (spec §4.K, "upstream
    /// disconnect ... terminates the session").
    async fn handle_messages(&self, session: &Session) -> Result<u32>;

    /// Release any resources this driver holds for `session`. Called once,
    /// after the session has moved to `SessionState::Stopping` and every
    /// user has left.
    async fn free(&self, session: &Session) -> Result<()>;
}
