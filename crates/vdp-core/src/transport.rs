//! The `Transport` capability: a polymorphic replacement for the original
//! inheritance-style socket with function-pointer handlers (spec §9's first
//! redesign flag).
//!
//! `Transport::Raw`/`Transport::Tls` wrap a single viewer's connection.
//! `Transport::Broadcast` fans a single logical write out to every user
//! currently attached to a session under one lock acquisition, so drawing
//! code can emit one instruction while the transport duplicates it to every
//! viewer (spec §4.D).

use std::sync::Arc;

use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex as AsyncMutex;

use crate::codec::Instruction;
use crate::error::{Error, Result};
use crate::session::Session;

/// Serializes writes to a single underlying async writer so that a
/// multi-field instruction is never interleaved with another on the same
/// socket (spec §5, "Ordering guarantees").
pub struct UserTransport<W> {
    inner: AsyncMutex<W>,
}

impl<W> UserTransport<W>
where
    W: AsyncWrite + Unpin + Send,
{
    pub fn new(writer: W) -> Self {
        Self {
            inner: AsyncMutex::new(writer),
        }
    }

    /// Write and flush one instruction atomically with respect to other
    /// callers of this method on the same transport.
    pub async fn write_instruction(&self, instr: &Instruction) -> Result<()> {
        let bytes = instr.encode();
        let mut guard = self.inner.lock().await;
        guard
            .write_all(&bytes)
            .await
            .map_err(|e| Error::Upstream(format!("write error: {e}")))?;
        guard
            .flush()
            .await
            .map_err(|e| Error::Upstream(format!("flush error: {e}")))
    }

    /// Hold the per-socket lock across a caller-supplied closure so several
    /// writes can be emitted as one atomic unit (`instruction_begin`/
    /// `instruction_end` in spec terms).
    pub async fn with_locked_writer<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut W) -> std::result::Result<T, std::io::Error>,
    {
        let mut guard = self.inner.lock().await;
        f(&mut guard).map_err(|e| Error::Upstream(format!("write error: {e}")))
    }
}

/// The broadcast socket: writing to it fans the write out to every user of
/// `session` under a single read-lock acquisition on the user list.
///
/// `read` is unsupported: a broadcast has no single logical sender to read
/// from.
pub struct BroadcastTransport {
    session: std::sync::Weak<Session>,
}

impl BroadcastTransport {
    pub fn new(session: std::sync::Weak<Session>) -> Self {
        Self { session }
    }

    /// Fan `instr` out to every connected user, in list order, under one
    /// read-lock acquisition. A per-user write failure marks that user
    /// inactive (so the session reaps it) but never aborts delivery to the
    /// others, and this method always returns `Ok(())` once the read-lock is
    /// acquired -- broadcast delivery failures are per-viewer, not
    /// session-fatal (spec §4.D, testable property §8.10).
    pub async fn write_instruction(&self, instr: &Instruction) -> Result<()> {
        let Some(session) = self.session.upgrade() else {
            // Session already torn down; nothing to broadcast to.
            return Ok(());
        };

        let users = session.users.read().await;
        for user in users.iter() {
            if !user.is_active() {
                continue;
            }
            if user.transport.emit(instr).await.is_err() {
                user.mark_inactive();
            }
        }
        Ok(())
    }

    /// Broadcast is write-only; reading from it is an internal-error
    /// condition, never a client-observable one.
    pub fn read(&self) -> Result<()> {
        Err(Error::Internal("broadcast transport does not support read".into()))
    }
}

/// Shared by anything that can hand a single logical instruction stream off
/// to a sink (a direct viewer socket, or the session's broadcast fan-out).
#[async_trait::async_trait]
pub trait InstructionSink: Send + Sync {
    async fn emit(&self, instr: &Instruction) -> Result<()>;
}

#[async_trait::async_trait]
impl<W> InstructionSink for UserTransport<W>
where
    W: AsyncWrite + Unpin + Send,
{
    async fn emit(&self, instr: &Instruction) -> Result<()> {
        self.write_instruction(instr).await
    }
}

#[async_trait::async_trait]
impl InstructionSink for BroadcastTransport {
    async fn emit(&self, instr: &Instruction) -> Result<()> {
        self.write_instruction(instr).await
    }
}

/// Wraps either a concrete per-user sink or a shared broadcast sink so
/// [`crate::surface::Surface`] can flush through whichever it was built
/// with, per spec §4.E's "reference to the broadcast socket it flushes
/// through".
#[derive(Clone)]
pub enum FlushTarget {
    Broadcast(Arc<BroadcastTransport>),
}

impl FlushTarget {
    pub async fn emit(&self, instr: &Instruction) -> Result<()> {
        match self {
            FlushTarget::Broadcast(b) => b.write_instruction(instr).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::duplex;

    #[tokio::test]
    async fn user_transport_serializes_concurrent_writers() {
        let (a, mut b) = duplex(4096);
        let transport = Arc::new(UserTransport::new(a));

        let t1 = transport.clone();
        let t2 = transport.clone();

        let h1 = tokio::spawn(async move {
            t1.write_instruction(&Instruction::new("a", vec![])).await
        });
        let h2 = tokio::spawn(async move {
            t2.write_instruction(&Instruction::new("b", vec![])).await
        });

        h1.await.unwrap().unwrap();
        h2.await.unwrap().unwrap();

        let mut buf = vec![0u8; 64];
        use tokio::io::AsyncReadExt;
        let n = b.read(&mut buf).await.unwrap();
        let s = String::from_utf8_lossy(&buf[..n]);
        // Both complete instructions must appear, never interleaved.
        assert!(s.contains("1.a;") || s.contains("1.b;"));
    }
}
