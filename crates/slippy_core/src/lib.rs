//! Wires the tile store, PNG decoder, worker pool, and both cache
//! façades (spec §2, §6) into the single object the render thread and
//! the tile picker actually talk to. Nothing in this crate knows about
//! windowing, cameras, or GPU backends beyond the opaque handle type
//! the caller supplies to [`TileDeliveryPipeline::lookup_texture`].

use std::fmt;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use tile_address::TileAddress;
use tile_cache::{Bitmap, BitmapCache, Texture, TextureCache};
use tile_codec::decode_tile;
use tile_store::{FsTileStore, TileLayout};

/// Tuning knobs for a [`TileDeliveryPipeline`]. spec.md prescribes no
/// on-disk configuration format for the core; this is a plain struct
/// with a `Default` impl, the knobs themselves made first-class typed
/// fields rather than a TOML/env surface this crate would have to own.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub root: PathBuf,
    pub layout: TileLayout,
    pub bitmap_capacity: usize,
    pub texture_capacity: usize,
    pub num_workers: usize,
    pub queue_capacity: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        PipelineConfig {
            root: PathBuf::new(),
            layout: TileLayout::default(),
            bitmap_capacity: 512,
            texture_capacity: 512,
            num_workers: 4,
            queue_capacity: 64,
        }
    }
}

#[derive(Debug)]
pub enum PipelineCreateError {
    RootNotADirectory(PathBuf),
    ZeroCapacity,
}

impl fmt::Display for PipelineCreateError {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PipelineCreateError::RootNotADirectory(path) => {
                write!(formatter, "tile store root {path:?} is not a directory")
            }
            PipelineCreateError::ZeroCapacity => write!(
                formatter,
                "cache capacity and worker pool sizing must be at least 1"
            ),
        }
    }
}

impl std::error::Error for PipelineCreateError {}

/// The one object the (out-of-scope) render thread and tile picker
/// talk to, per spec §6. Generic over `H`, the GPU texture handle type:
/// this crate never names a concrete graphics backend, it only ever
/// hands `H` back to whichever `upload` closure the caller passed in.
pub struct TileDeliveryPipeline<H: Clone> {
    bitmaps: BitmapCache,
    textures: Mutex<TextureCache<H>>,
}

impl<H: Clone> TileDeliveryPipeline<H> {
    pub fn new(config: PipelineConfig) -> Result<Self, PipelineCreateError> {
        if !config.root.as_os_str().is_empty() && !config.root.is_dir() {
            return Err(PipelineCreateError::RootNotADirectory(config.root));
        }
        if config.bitmap_capacity == 0
            || config.texture_capacity == 0
            || config.num_workers == 0
            || config.queue_capacity == 0
        {
            return Err(PipelineCreateError::ZeroCapacity);
        }

        let store = FsTileStore::new(config.root.clone(), config.layout.clone());
        let fetch = move |addr: TileAddress| -> Option<Bitmap> {
            let bytes = match store.open(addr) {
                Ok(bytes) => bytes,
                Err(err) => {
                    log::debug!("slippy_core: store miss for {addr:?}: {err}");
                    return None;
                }
            };
            match decode_tile(&bytes) {
                Ok(pixels) => Some(Arc::from(pixels)),
                Err(err) => {
                    log::debug!("slippy_core: decode failed for {addr:?}: {err}");
                    None
                }
            }
        };

        let bitmaps = BitmapCache::new(
            config.bitmap_capacity,
            config.num_workers,
            config.queue_capacity,
            fetch,
        );
        let textures = Mutex::new(TextureCache::new(config.texture_capacity));

        Ok(TileDeliveryPipeline { bitmaps, textures })
    }

    /// spec §4.D.3's `lookup_bitmap`, surfaced for callers that only
    /// need decoded pixels (a software rasterizer, a test, or a texture
    /// upload that happens outside `lookup_texture`).
    pub fn lookup_bitmap(&self, addr: TileAddress) -> (Option<Bitmap>, TileAddress) {
        self.bitmaps.lookup(addr)
    }

    /// spec §4.D.4's texture-cache resolution walk. Never blocks on
    /// I/O; `upload` runs only when a strictly better-matching bitmap
    /// than whatever texture is cached has actually been found, with
    /// the bitmap cache's mutex held for just long enough to hand the
    /// chosen bitmap to `upload` (see
    /// `tile_cache::texture::TextureCache::lookup`).
    ///
    /// Intended for the render thread only; the internal mutex is
    /// uncontended in practice since nothing else touches the texture
    /// cache, but keeps the API ergonomic (`&self`, not `&mut self`).
    pub fn lookup_texture(
        &self,
        addr: TileAddress,
        upload: impl FnOnce(&Bitmap) -> H,
    ) -> (Option<Texture<H>>, TileAddress) {
        self.textures
            .lock()
            .expect("texture cache lock poisoned")
            .lookup(addr, &self.bitmaps, upload)
    }

    /// Registers the edge-triggered "a tile finished loading, repaint"
    /// callback invoked from a worker thread after it inserts a real
    /// bitmap (spec §6's notify-repaint contract). Spurious calls are
    /// harmless; the render loop decides what to do with them.
    pub fn set_repaint_notifier(&self, notifier: impl Fn() + Send + Sync + 'static) {
        self.bitmaps.set_repaint_notifier(notifier);
    }
}
