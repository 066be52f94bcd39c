//! Resolves a tile address to a readable byte stream of PNG data from a
//! local directory tree. Performs no caching and no decoding of its own.

use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tile_address::TileAddress;

/// The on-disk path template used to turn an address into a file path.
///
/// `Zxy` is the standard slippy-map layout (`{root}/{z}/{x}/{y}.{ext}`).
/// `ZoomFromMax` mirrors the layout seen in `diskcache.c`'s
/// `t13s<level>z0/<x>/<y>` scheme, where the stored directory name counts
/// down from a configured maximum zoom rather than up from zero.
#[derive(Debug, Clone)]
pub enum TileLayout {
    Zxy { extension: &'static str },
    ZoomFromMax { max_zoom: u8, prefix: &'static str },
}

impl Default for TileLayout {
    fn default() -> Self {
        TileLayout::Zxy { extension: "png" }
    }
}

impl TileLayout {
    fn path(&self, root: &Path, addr: TileAddress) -> PathBuf {
        match *self {
            TileLayout::Zxy { extension } => root
                .join(addr.z.to_string())
                .join(addr.x.to_string())
                .join(format!("{}.{extension}", addr.y)),
            TileLayout::ZoomFromMax { max_zoom, prefix } => {
                let level = max_zoom.saturating_sub(addr.z);
                root.join(format!("{prefix}{level}z0"))
                    .join(addr.x.to_string())
                    .join(addr.y.to_string())
            }
        }
    }
}

#[derive(Debug)]
pub enum TileStoreError {
    OutOfRange,
    NotFound,
    Io(io::Error),
}

impl fmt::Display for TileStoreError {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TileStoreError::OutOfRange => write!(formatter, "tile address out of range"),
            TileStoreError::NotFound => write!(formatter, "tile not present in store"),
            TileStoreError::Io(err) => write!(formatter, "tile store I/O error: {err}"),
        }
    }
}

impl std::error::Error for TileStoreError {}

/// A local-filesystem-backed tile store. `open` is a pure function of
/// (address, root, layout): deterministic, and side-effect-free beyond
/// opening a readable file.
#[derive(Debug, Clone)]
pub struct FsTileStore {
    root: PathBuf,
    layout: TileLayout,
}

impl FsTileStore {
    pub fn new(root: impl Into<PathBuf>, layout: TileLayout) -> Self {
        FsTileStore {
            root: root.into(),
            layout,
        }
    }

    /// Opens the backing bytes for `addr`. Address-range failures, missing
    /// files, and I/O errors are all distinguished here; callers upstream
    /// collapse them all to "no bitmap produced" per the pipeline's
    /// failure semantics.
    pub fn open(&self, addr: TileAddress) -> Result<Vec<u8>, TileStoreError> {
        if !addr.is_in_range() {
            return Err(TileStoreError::OutOfRange);
        }
        let path = self.layout.path(&self.root, addr);
        match fs::read(&path) {
            Ok(bytes) => Ok(bytes),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Err(TileStoreError::NotFound),
            Err(err) => Err(TileStoreError::Io(err)),
        }
    }
}
