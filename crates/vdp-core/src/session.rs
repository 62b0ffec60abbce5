//! A shared session: one display plus the users currently viewing it
//! (spec §4.H).

use std::sync::{Arc, Mutex as SyncMutex};

use tokio::sync::RwLock;

use crate::codec::Instruction;
use crate::display::Display;
use crate::driver::Driver;
use crate::error::{Error, Result};
use crate::ids::random_id;
use crate::pool::IndexPool;
use crate::transport::BroadcastTransport;
use crate::user::{now_ms, User};

/// A session's lifecycle state. Sessions move from `Running` to `Stopping`
/// once the owning driver signals completion or every user has left; no
/// session ever moves back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Running,
    Stopping,
}

/// A shared desktop: one display, the users currently attached to it, and
/// the driver that owns its pixel content.
///
/// `buffer_id_pool`/`layer_id_pool` are guarded by `std::sync::Mutex`
/// rather than the async kind: allocation is a handful of arithmetic
/// operations that never holds across an `.await` point (spec §5).
pub struct Session {
    /// 128-bit random id, formatted and prefixed with `$`.
    pub id: String,
    state: SyncMutex<SessionState>,
    pub users: RwLock<Vec<Arc<User>>>,
    pub display: Display,
    buffer_id_pool: SyncMutex<IndexPool>,
    layer_id_pool: SyncMutex<IndexPool>,
    /// The protocol-specific argument list advertised by `args` during the
    /// handshake of the user who created this session.
    pub args: Vec<String>,
    driver: Box<dyn Driver>,
    last_sent_timestamp: SyncMutex<i64>,
    /// The most recent resize requested by the session's first viewer,
    /// applied by the frame loop between iterations (spec §4.K step 3).
    pending_resize: SyncMutex<Option<(i32, i32)>>,
}

impl Session {
    pub fn new(args: Vec<String>, driver: Box<dyn Driver>, default_width: i32, default_height: i32) -> Arc<Self> {
        Arc::new_cyclic(|weak: &std::sync::Weak<Session>| Self {
            id: random_id('$'),
            state: SyncMutex::new(SessionState::Running),
            users: RwLock::new(Vec::new()),
            display: Display::new(default_width, default_height, BroadcastTransport::new(weak.clone())),
            buffer_id_pool: SyncMutex::new(IndexPool::new()),
            layer_id_pool: SyncMutex::new(IndexPool::new()),
            args,
            driver,
            last_sent_timestamp: SyncMutex::new(now_ms()),
            pending_resize: SyncMutex::new(None),
        })
    }

    pub fn driver(&self) -> &dyn Driver {
        self.driver.as_ref()
    }

    pub fn state(&self) -> SessionState {
        *self.state.lock().expect("session state mutex poisoned")
    }

    pub fn stop(&self) {
        *self.state.lock().expect("session state mutex poisoned") = SessionState::Stopping;
    }

    pub fn is_running(&self) -> bool {
        self.state() == SessionState::Running
    }

    pub fn alloc_layer_id(&self) -> i32 {
        self.layer_id_pool
            .lock()
            .expect("layer id pool mutex poisoned")
            .next() as i32
            + 1
    }

    pub fn free_layer_id(&self, id: i32) {
        self.layer_id_pool
            .lock()
            .expect("layer id pool mutex poisoned")
            .free((id - 1) as u32);
    }

    pub fn alloc_buffer_id(&self) -> i32 {
        -(self
            .buffer_id_pool
            .lock()
            .expect("buffer id pool mutex poisoned")
            .next() as i32
            + 1)
    }

    pub fn free_buffer_id(&self, id: i32) {
        self.buffer_id_pool
            .lock()
            .expect("buffer id pool mutex poisoned")
            .free((-id - 1) as u32);
    }

    /// Attach `user` to this session.
    pub async fn join(&self, user: Arc<User>) {
        self.users.write().await.push(user);
    }

    /// Detach `user` (by id) from this session, returning `true` if it was
    /// present. Does not tear the session down even if the list becomes
    /// empty -- that decision belongs to whichever task drives this
    /// session's lifecycle (spec §4.H, "no implicit owner-leaves-means-end
    /// rule").
    pub async fn leave(&self, user_id: &str) -> bool {
        let mut users = self.users.write().await;
        let before = users.len();
        users.retain(|u| u.id != user_id);
        users.len() != before
    }

    /// Apply `f` to every currently-active user, in join order, under one
    /// read-lock acquisition.
    pub async fn foreach_user<F>(&self, mut f: F)
    where
        F: FnMut(&Arc<User>),
    {
        let users = self.users.read().await;
        for user in users.iter().filter(|u| u.is_active()) {
            f(user);
        }
    }

    pub async fn user_count(&self) -> usize {
        self.users.read().await.iter().filter(|u| u.is_active()).count()
    }

    /// The largest `processing_lag` reported by any active user, used by
    /// the frame-pacing loop to decide whether to skip a frame (spec §4.K).
    pub async fn processing_lag(&self) -> i64 {
        let users = self.users.read().await;
        users
            .iter()
            .filter(|u| u.is_active())
            .map(|u| u.processing_lag())
            .max()
            .unwrap_or(0)
    }

    /// Broadcast a `sync` instruction carrying the current server
    /// timestamp and record it as this session's `last_sent_timestamp`.
    pub async fn end_frame(&self) -> Result<()> {
        let ts = now_ms();
        *self.last_sent_timestamp.lock().expect("timestamp mutex poisoned") = ts;
        self.display
            .flush_target()
            .emit(&Instruction::new("sync", vec![ts.to_string().into_bytes()]))
            .await
    }

    pub fn last_sent_timestamp(&self) -> i64 {
        *self.last_sent_timestamp.lock().expect("timestamp mutex poisoned")
    }

    /// Record a resize request from the session's first viewer, to be
    /// applied by the frame loop on its next tick (spec §4.K step 3).
    pub fn request_resize(&self, width: i32, height: i32) {
        *self.pending_resize.lock().expect("resize mutex poisoned") = Some((width, height));
    }

    /// Take and clear the most recently requested resize, if any.
    pub fn take_pending_resize(&self) -> Option<(i32, i32)> {
        self.pending_resize.lock().expect("resize mutex poisoned").take()
    }
}

/// Tracks which active user, if any, currently "owns" the session -- the
/// first user to join with `owner: true` in their handshake. Used to
/// enforce the single-owner invariant (spec §4.G, "at most one owner").
pub async fn has_owner(session: &Session) -> bool {
    session.users.read().await.iter().any(|u| u.is_active() && u.owner)
}

/// Fails if `user.owner` is set and another active owner already exists.
pub async fn enforce_single_owner(session: &Session, user: &User) -> Result<()> {
    if user.owner && has_owner(session).await {
        return Err(Error::HandshakeFailed(
            "session already has an owner".to_string(),
        ));
    }
    Ok(())
}
