//! The collection of surfaces that make up one session's shared desktop
//! (spec §4.F): a non-freeable default layer, a shared cursor, and two
//! sparse slot arrays for dynamically allocated layers and buffers.

use std::sync::Arc;

use tokio::sync::Mutex as AsyncMutex;

use crate::codec::Instruction;
use crate::error::{Error, Result};
use crate::surface::{EmittedRegion, RegionFormat, Surface};
use crate::transport::{BroadcastTransport, FlushTarget};

/// Layer 0 always exists and can never be freed (spec §4.F).
pub const DEFAULT_LAYER: i32 = 0;

/// The shared pointer image and position, last moved by whichever user's
/// input most recently updated it.
#[derive(Default)]
pub struct Cursor {
    pub image: Option<Vec<u8>>,
    pub width: i32,
    pub height: i32,
    pub hotspot_x: i32,
    pub hotspot_y: i32,
    pub x: i32,
    pub y: i32,
    pub last_mover: Option<String>,
}

/// One session's full set of drawable surfaces.
///
/// `layers`/`buffers` are sparse `Vec<Option<Surface>>` arrays indexed by
/// `id.abs() - 1` (buffers use negative ids; see
/// [`crate::session::Session::alloc_buffer_id`]). They grow by doubling
/// with zero-filled slots, mirroring the session id pools' "smallest free
/// index first" allocation order rather than ever shrinking.
pub struct Display {
    default_layer: AsyncMutex<Surface>,
    layers: AsyncMutex<Vec<Option<Surface>>>,
    buffers: AsyncMutex<Vec<Option<Surface>>>,
    pub cursor: AsyncMutex<Cursor>,
    flush_target: FlushTarget,
}

impl Display {
    pub fn new(width: i32, height: i32, broadcast: BroadcastTransport) -> Self {
        let flush_target = FlushTarget::Broadcast(Arc::new(broadcast));
        let mut default_layer = Surface::new(DEFAULT_LAYER, width, height);
        default_layer.flush_target = Some(flush_target.clone());

        Self {
            default_layer: AsyncMutex::new(default_layer),
            layers: AsyncMutex::new(Vec::new()),
            buffers: AsyncMutex::new(Vec::new()),
            cursor: AsyncMutex::new(Cursor::default()),
            flush_target,
        }
    }

    pub fn flush_target(&self) -> &FlushTarget {
        &self.flush_target
    }

    pub async fn default_layer(&self) -> tokio::sync::MutexGuard<'_, Surface> {
        self.default_layer.lock().await
    }

    /// Insert a freshly allocated layer surface at `id` (1-based, growing
    /// the slot array by doubling if needed).
    pub async fn alloc_layer(&self, id: i32, width: i32, height: i32) -> Result<()> {
        if id <= DEFAULT_LAYER {
            return Err(Error::Malformed(format!("layer id {id} is not allocatable")));
        }
        let mut surface = Surface::new(id, width, height);
        surface.flush_target = Some(self.flush_target.clone());
        insert_slot(&mut *self.layers.lock().await, (id - 1) as usize, surface)
    }

    pub async fn free_layer(&self, id: i32) -> Result<()> {
        if id <= DEFAULT_LAYER {
            return Err(Error::Malformed(format!("layer {id} cannot be freed")));
        }
        remove_slot(&mut *self.layers.lock().await, (id - 1) as usize)
    }

    /// Insert a freshly allocated off-screen buffer surface at `id`
    /// (negative; `(-id - 1)` is its slot index).
    pub async fn alloc_buffer(&self, id: i32, width: i32, height: i32) -> Result<()> {
        if id >= 0 {
            return Err(Error::Malformed(format!("buffer id {id} is not allocatable")));
        }
        let mut surface = Surface::new(id, width, height);
        surface.flush_target = Some(self.flush_target.clone());
        insert_slot(&mut *self.buffers.lock().await, (-id - 1) as usize, surface)
    }

    pub async fn free_buffer(&self, id: i32) -> Result<()> {
        if id >= 0 {
            return Err(Error::Malformed(format!("buffer id {id} cannot be freed")));
        }
        remove_slot(&mut *self.buffers.lock().await, (-id - 1) as usize)
    }

    /// Apply `f` to the surface identified by `id` (0 for the default
    /// layer, positive for an allocated layer, negative for a buffer).
    pub async fn with_surface<F, T>(&self, id: i32, f: F) -> Result<T>
    where
        F: FnOnce(&mut Surface) -> T,
    {
        if id == DEFAULT_LAYER {
            return Ok(f(&mut self.default_layer.lock().await));
        }
        if id > 0 {
            let mut layers = self.layers.lock().await;
            let slot = layers
                .get_mut((id - 1) as usize)
                .and_then(|s| s.as_mut())
                .ok_or_else(|| Error::Malformed(format!("no such layer {id}")))?;
            return Ok(f(slot));
        }
        let mut buffers = self.buffers.lock().await;
        let slot = buffers
            .get_mut((-id - 1) as usize)
            .and_then(|s| s.as_mut())
            .ok_or_else(|| Error::Malformed(format!("no such buffer {id}")))?;
        Ok(f(slot))
    }

    /// Flush the default surface only, emitting one `img` instruction per
    /// resulting region through the broadcast transport (spec §4.F, used at
    /// `end_frame`). Allocated layers and buffers each carry their own
    /// `flush_target` (set in `alloc_layer`/`alloc_buffer`) so driver code
    /// that draws into them can drain and emit immediately rather than
    /// waiting on the periodic default-layer flush.
    pub async fn flush(&self) -> Result<()> {
        let mut default_layer = self.default_layer.lock().await;
        emit_regions(&self.flush_target, default_layer.layer, default_layer.drain_for_flush()).await
    }

    /// Resize the default layer and broadcast the resulting `size`
    /// instruction (spec §4.K step 3, "apply display-resize requests from
    /// the first viewer between iterations").
    pub async fn resize_default_layer(&self, width: i32, height: i32) -> Result<()> {
        {
            let mut default_layer = self.default_layer.lock().await;
            default_layer.resize(width, height);
        }
        self.flush_target
            .emit(&Instruction::new(
                "size",
                vec![
                    DEFAULT_LAYER.to_string().into_bytes(),
                    width.to_string().into_bytes(),
                    height.to_string().into_bytes(),
                ],
            ))
            .await
    }

    /// Send the full current content of every on-screen surface to a single
    /// newly-joined user's transport (spec §4.F, "duplicate the display").
    pub async fn dup(&self, sink: &dyn crate::transport::InstructionSink) -> Result<()> {
        {
            let default_layer = self.default_layer.lock().await;
            dup_surface(sink, &default_layer).await?;
        }
        let layers = self.layers.lock().await;
        for slot in layers.iter().flatten() {
            dup_surface(sink, slot).await?;
        }
        Ok(())
    }
}

async fn dup_surface(sink: &dyn crate::transport::InstructionSink, surface: &Surface) -> Result<()> {
    let bounds = surface.bounds();
    if bounds.is_empty() {
        return Ok(());
    }
    sink.emit(&Instruction::new(
        "size",
        vec![
            surface.layer.to_string().into_bytes(),
            bounds.width.to_string().into_bytes(),
            bounds.height.to_string().into_bytes(),
        ],
    ))
    .await?;
    sink.emit(&Instruction::new(
        "img",
        vec![
            surface.layer.to_string().into_bytes(),
            "image/png".to_string().into_bytes(),
            0.to_string().into_bytes(),
            0.to_string().into_bytes(),
            surface.pixels().to_vec(),
        ],
    ))
    .await
}

async fn emit_regions(target: &FlushTarget, layer: i32, regions: Vec<EmittedRegion>) -> Result<()> {
    for region in regions {
        let mimetype = match region.format {
            RegionFormat::Lossless => "image/png",
            RegionFormat::Lossy => "image/jpeg",
        };
        target
            .emit(&Instruction::new(
                "img",
                vec![
                    layer.to_string().into_bytes(),
                    mimetype.to_string().into_bytes(),
                    region.rect.x.to_string().into_bytes(),
                    region.rect.y.to_string().into_bytes(),
                    region.pixels,
                ],
            ))
            .await?;
    }
    Ok(())
}

fn insert_slot(slots: &mut Vec<Option<Surface>>, index: usize, surface: Surface) -> Result<()> {
    if index >= slots.len() {
        let new_len = (slots.len().max(1) * 2).max(index + 1);
        slots.resize_with(new_len, || None);
    }
    slots[index] = Some(surface);
    Ok(())
}

fn remove_slot(slots: &mut [Option<Surface>], index: usize) -> Result<()> {
    match slots.get_mut(index) {
        Some(slot @ Some(_)) => {
            *slot = None;
            Ok(())
        }
        _ => Err(Error::Malformed(format!("no such surface at slot {index}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Weak;

    fn test_display() -> Display {
        Display::new(640, 480, BroadcastTransport::new(Weak::new()))
    }

    #[tokio::test]
    async fn default_layer_exists_and_is_not_freeable_via_free_layer() {
        let display = test_display();
        assert!(display.free_layer(DEFAULT_LAYER).await.is_err());
    }

    #[tokio::test]
    async fn alloc_and_free_layer_round_trips() {
        let display = test_display();
        display.alloc_layer(1, 100, 100).await.unwrap();
        display.with_surface(1, |s| assert_eq!(s.width(), 100)).await.unwrap();
        display.free_layer(1).await.unwrap();
        assert!(display.with_surface(1, |_| ()).await.is_err());
    }

    #[tokio::test]
    async fn alloc_and_free_buffer_round_trips() {
        let display = test_display();
        display.alloc_buffer(-1, 50, 50).await.unwrap();
        display.with_surface(-1, |s| assert_eq!(s.width(), 50)).await.unwrap();
        display.free_buffer(-1).await.unwrap();
        assert!(display.with_surface(-1, |_| ()).await.is_err());
    }

    #[tokio::test]
    async fn layer_slots_grow_by_doubling() {
        let display = test_display();
        display.alloc_layer(10, 1, 1).await.unwrap();
        let layers = display.layers.lock().await;
        assert!(layers.len() >= 10);
    }

    #[tokio::test]
    async fn resize_default_layer_changes_bounds() {
        let display = test_display();
        display.resize_default_layer(320, 240).await.unwrap();
        let default_layer = display.default_layer().await;
        assert_eq!(default_layer.width(), 320);
        assert_eq!(default_layer.height(), 240);
    }

    #[tokio::test]
    async fn flush_does_not_touch_allocated_layers() {
        let display = test_display();
        display.alloc_layer(1, 10, 10).await.unwrap();
        display.with_surface(1, |s| s.rect(0, 0, 5, 5, 0xff0000)).await.unwrap();

        display.flush().await.unwrap();

        display
            .with_surface(1, |s| assert!(s.is_dirty(), "flush must not drain non-default layers"))
            .await
            .unwrap();
    }
}
