//! One viewer: socket, id, negotiated capabilities, and the fixed-size
//! stream/object tables it is allowed to allocate (spec §4.G).

use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use tokio::sync::Mutex as AsyncMutex;

use crate::error::{Error, Result};
use crate::ids::random_id;
use crate::pool::IndexPool;
use crate::session::Session;
use crate::transport::InstructionSink;

/// Upper bound on a user's input/output stream slots and named-object
/// handles (spec §3, "two fixed-size arrays ... length MAX_STREAMS").
pub const MAX_STREAMS: usize = 64;
pub const MAX_OBJECTS: usize = 64;

/// Sentinel id stored in a closed stream slot.
const CLOSED: i32 = -1;

/// A single allocated stream or object slot.
#[derive(Debug, Clone, Copy, Default)]
struct Slot {
    id: i32,
}

impl Slot {
    fn closed() -> Self {
        Self { id: CLOSED }
    }

    fn is_open(&self) -> bool {
        self.id != CLOSED
    }
}

/// Negotiated per-user capabilities from the handshake (spec §4.G step 2).
#[derive(Debug, Clone, Default)]
pub struct UserInfo {
    pub optimal_width: u32,
    pub optimal_height: u32,
    pub optimal_dpi: u32,
    pub audio_mimetypes: Vec<String>,
    pub video_mimetypes: Vec<String>,
    /// Defaults to `[image/png, image/jpeg]` if the client's handshake
    /// omits the `image` step (spec §9 Open Question, resolved as optional).
    pub image_mimetypes: Vec<String>,
}

impl UserInfo {
    pub fn default_image_mimetypes() -> Vec<String> {
        vec!["image/png".to_string(), "image/jpeg".to_string()]
    }

    /// True iff any of the user's image mimetypes equals `image/webp`.
    pub fn supports_webp(&self) -> bool {
        self.image_mimetypes.iter().any(|m| m == "image/webp")
    }
}

/// A per-user stream or object table. Streams hand the client an id of
/// `index * 2` (even numbers reserved for user-level streams, odd numbers
/// reserved for client-level streams); objects hand out the raw index.
pub struct SlotTable {
    slots: Vec<Slot>,
    free: IndexPool,
    encode_as_stream: bool,
}

impl SlotTable {
    fn new(capacity: usize, encode_as_stream: bool) -> Self {
        Self {
            slots: vec![Slot::closed(); capacity],
            free: IndexPool::new(),
            encode_as_stream,
        }
    }

    /// Allocate a slot, returning the client-visible id. Fails with
    /// [`Error::Resource`] once the table is full rather than growing.
    pub fn alloc(&mut self) -> Result<i32> {
        if self.free.active() as usize >= self.slots.len() {
            return Err(Error::Resource("stream/object table exhausted".into()));
        }
        let index = self.free.next() as usize;
        self.slots[index] = Slot { id: index as i32 };
        let client_id = if self.encode_as_stream {
            (index as i32) * 2
        } else {
            index as i32
        };
        Ok(client_id)
    }

    /// Release a previously allocated slot, given its client-visible id.
    pub fn free_slot(&mut self, client_id: i32) {
        let index = if self.encode_as_stream {
            client_id / 2
        } else {
            client_id
        } as usize;
        if index < self.slots.len() && self.slots[index].is_open() {
            self.slots[index] = Slot::closed();
            self.free.free(index as u32);
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }
}

/// Optional per-user event handlers a driver may install. Each is invoked
/// from the user's own input-loop task, never concurrently with another
/// handler on the same user (spec §4.G dispatch table).
#[derive(Default)]
pub struct UserHandlers {
    pub mouse: Option<Box<dyn Fn(i32, i32, u32) + Send + Sync>>,
    pub key: Option<Box<dyn Fn(i32, bool) + Send + Sync>>,
    pub size: Option<Box<dyn Fn(u32, u32, u32) + Send + Sync>>,
    pub clipboard: Option<Box<dyn Fn(&[u8]) + Send + Sync>>,
    pub pipe: Option<Box<dyn Fn(i32, &str) + Send + Sync>>,
    pub file: Option<Box<dyn Fn(i32, &str) + Send + Sync>>,
    pub ack: Option<Box<dyn Fn(i32, u16) + Send + Sync>>,
    pub blob: Option<Box<dyn Fn(i32, &[u8]) + Send + Sync>>,
    pub end: Option<Box<dyn Fn(i32) + Send + Sync>>,
    pub leave: Option<Box<dyn Fn() + Send + Sync>>,
}

/// One connected viewer.
pub struct User {
    /// 128-bit random id, formatted and prefixed with `@`.
    pub id: String,
    pub session: std::sync::Weak<Session>,
    pub transport: Arc<dyn InstructionSink>,
    pub owner: bool,
    active: AtomicBool,
    pub info: UserInfo,
    pub streams_in: AsyncMutex<SlotTable>,
    pub streams_out: AsyncMutex<SlotTable>,
    pub objects: AsyncMutex<SlotTable>,
    last_received_timestamp: AtomicI64,
    last_sent_timestamp: AtomicI64,
    last_frame_duration: AtomicI64,
    processing_lag: AtomicI64,
    pub handlers: UserHandlers,
}

impl User {
    pub fn new(
        session: std::sync::Weak<Session>,
        transport: Arc<dyn InstructionSink>,
        owner: bool,
        info: UserInfo,
        handlers: UserHandlers,
    ) -> Self {
        Self {
            id: random_id('@'),
            session,
            transport,
            owner,
            active: AtomicBool::new(true),
            info,
            streams_in: AsyncMutex::new(SlotTable::new(MAX_STREAMS, true)),
            streams_out: AsyncMutex::new(SlotTable::new(MAX_STREAMS, true)),
            objects: AsyncMutex::new(SlotTable::new(MAX_OBJECTS, false)),
            last_received_timestamp: AtomicI64::new(now_ms()),
            last_sent_timestamp: AtomicI64::new(now_ms()),
            last_frame_duration: AtomicI64::new(0),
            processing_lag: AtomicI64::new(0),
            handlers,
        }
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Stop this user: gates the input loop and the broadcast fan-out off.
    pub fn mark_inactive(&self) {
        self.active.store(false, Ordering::Release);
    }

    pub fn record_received(&self) {
        self.last_received_timestamp.store(now_ms(), Ordering::Relaxed);
    }

    pub fn last_received_timestamp(&self) -> i64 {
        self.last_received_timestamp.load(Ordering::Relaxed)
    }

    pub fn last_sent_timestamp(&self) -> i64 {
        self.last_sent_timestamp.load(Ordering::Relaxed)
    }

    /// Record a client `sync` acknowledgement: the difference between the
    /// client's timestamp and the server's most recent `sync` becomes the
    /// user's processing lag and last frame duration.
    pub fn record_sync_ack(&self, server_sync_ts: i64) {
        let now = now_ms();
        let lag = (now - server_sync_ts).max(0);
        self.processing_lag.store(lag, Ordering::Relaxed);
        let previous_sent = self.last_sent_timestamp.swap(now, Ordering::Relaxed);
        self.last_frame_duration
            .store((now - previous_sent).max(0), Ordering::Relaxed);
    }

    pub fn processing_lag(&self) -> i64 {
        self.processing_lag.load(Ordering::Relaxed)
    }

    pub fn last_frame_duration(&self) -> i64 {
        self.last_frame_duration.load(Ordering::Relaxed)
    }
}

pub fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}
