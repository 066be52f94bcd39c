//! A bounded, zoom-aware cache keyed by tile address, specialized twice:
//! a bitmap cache fed by worker threads, and a texture cache consulted
//! and filled only from the render thread.

pub mod bitmap;
pub mod core;
pub mod texture;

pub use bitmap::{BitmapCache, Bitmap, Entry};
pub use core::Cache;
pub use texture::{TextureCache, Texture, TileCorners};
