//! The texture-cache resolution walk: spec §4.D.4. Runs on the render
//! thread only, never blocks on I/O, and reuses the bitmap cache's
//! mutex to prevent a bitmap from being evicted mid-upload.

use tile_address::TileAddress;

use crate::bitmap::{Bitmap, BitmapCache};
use crate::core::Cache;

/// A GPU-resident copy of a bitmap. Generic over the handle type so this
/// crate stays free of any particular graphics backend; `slippy_core`
/// (or whatever embeds it) supplies a concrete `H`.
#[derive(Debug, Clone)]
pub struct Texture<H: Clone> {
    pub handle: H,
    pub corners: TileCorners,
}

/// The tile's corners in a normalized [0,1] plane projection. Real
/// camera/sphere math is out of scope here; this is a deterministic
/// stand-in any renderer can remap.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TileCorners {
    pub min: [f32; 2],
    pub max: [f32; 2],
}

impl TileCorners {
    pub fn for_address(addr: TileAddress) -> Self {
        let width = addr.grid_width() as f32;
        TileCorners {
            min: [addr.x as f32 / width, addr.y as f32 / width],
            max: [(addr.x + 1) as f32 / width, (addr.y + 1) as f32 / width],
        }
    }
}

pub struct TextureCache<H: Clone> {
    cache: Cache<Texture<H>>,
}

impl<H: Clone> TextureCache<H> {
    pub fn new(capacity: usize) -> Self {
        TextureCache { cache: Cache::new(capacity) }
    }

    pub fn used(&self) -> usize {
        self.cache.used()
    }

    /// For a visible tile address `addr`: prefer an exact-or-better
    /// bitmap over whatever texture is already cached, uploading and
    /// inserting a fresh texture when the bitmap is strictly the better
    /// match (steps 2-3 run under the bitmap cache's mutex so the
    /// bitmap cannot be evicted mid-upload); otherwise return whatever
    /// texture search already found.
    pub fn lookup(
        &mut self,
        addr: TileAddress,
        bitmap_cache: &BitmapCache,
        upload: impl FnOnce(&Bitmap) -> H,
    ) -> (Option<Texture<H>>, TileAddress) {
        let (texture, texture_out) = self.cache.search(addr);

        let mut bitmap_guard = bitmap_cache.raw_cache().lock().expect("bitmap cache lock poisoned");
        let (bitmap, bitmap_out) = BitmapCache::best_real_locked(&mut bitmap_guard, addr);

        let bitmap_is_better = match (&bitmap, &texture) {
            (Some(_), None) => true,
            (Some(_), Some(_)) => bitmap_out.z > texture_out.z,
            (None, _) => false,
        };

        if bitmap_is_better {
            let bitmap = bitmap.expect("bitmap_is_better implies a bitmap was found");
            let handle = upload(&bitmap);
            let fresh = Texture { handle, corners: TileCorners::for_address(bitmap_out) };
            self.cache.insert(bitmap_out, fresh.clone());
            drop(bitmap_guard);
            return (Some(fresh), bitmap_out);
        }

        drop(bitmap_guard);
        (texture, texture_out)
    }
}
