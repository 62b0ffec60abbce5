//! A reference `Driver` (spec §4.L) with no real upstream: a single solid
//! color fill and no input handling, analogous to the teacher's
//! `StaticDisplay`/`StaticInputHandler` "blue screen" fixture
//! (`cosmic-rdp-server::server::StaticDisplay`).
//!
//! Used both as the daemon's fallback driver when no real RDP/VNC/SSH
//! backend is configured for a protocol name, and as the fixture driver
//! for `vdp-daemon`'s integration tests.

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use vdp_core::codec::Instruction;
use vdp_core::driver::{Driver, InputEvent};
use vdp_core::error::Result;
use vdp_core::session::Session;

/// Fill color in packed `0xRRGGBB`, matching the teacher fixture's blue
/// screen (`BLUE_BGRA` in `cosmic-rdp-server::server`).
pub const FILL_COLOR: u32 = 0x1144CC;

/// A driver that paints its session's default layer a solid color once
/// and otherwise produces no upstream activity.
pub struct NullDriver {
    painted: AtomicBool,
}

impl NullDriver {
    pub fn new() -> Self {
        Self {
            painted: AtomicBool::new(false),
        }
    }
}

impl Default for NullDriver {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Driver for NullDriver {
    fn args(&self) -> Vec<String> {
        Vec::new()
    }

    /// Paint the fill color once, the first time any user joins. Later
    /// joiners are synchronized by the caller via `Display::dup`, not by
    /// re-painting here.
    async fn join(&self, session: &Session, _user_id: &str, _owner: bool, _argv: &[String]) -> Result<()> {
        if self.painted.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let bounds = {
            let mut surface = session.display.default_layer().await;
            let bounds = surface.bounds();
            surface.rect(0, 0, bounds.width, bounds.height, FILL_COLOR);
            bounds
        };
        tracing::debug!(session = %session.id, width = bounds.width, height = bounds.height, "painted fill");
        Ok(())
    }

    async fn leave(&self, _session: &Session, _user_id: &str) -> Result<()> {
        Ok(())
    }

    async fn input(&self, _session: &Session, user_id: &str, event: InputEvent) -> Result<()> {
        tracing::trace!(%user_id, ?event, "input ignored by null driver");
        Ok(())
    }

    async fn handle_instruction(&self, _session: &Session, _user_id: &str, _instr: &Instruction) -> Result<()> {
        Ok(())
    }

    /// The static fixture never produces spontaneous upstream events.
    async fn handle_messages(&self, _session: &Session) -> Result<u32> {
        Ok(0)
    }

    async fn free(&self, _session: &Session) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_session() -> std::sync::Arc<Session> {
        Session::new(vec![], Box::new(NullDriver::new()), 32, 32)
    }

    #[tokio::test]
    async fn join_paints_the_default_layer_exactly_once() {
        let session = test_session();
        let driver = NullDriver::new();

        driver.join(&session, "@a", true, &[]).await.unwrap();
        {
            let mut surface = session.display.default_layer().await;
            assert!(surface.is_dirty());
            let regions = surface.drain_for_flush();
            assert_eq!(regions.len(), 1);
        }

        // A second join does not re-paint (no new dirty region produced).
        driver.join(&session, "@b", false, &[]).await.unwrap();
        let surface = session.display.default_layer().await;
        assert!(!surface.is_dirty());
    }

    #[tokio::test]
    async fn handle_messages_is_a_no_op() {
        let session = test_session();
        let driver = NullDriver::new();
        assert_eq!(driver.handle_messages(&session).await.unwrap(), 0);
    }
}
