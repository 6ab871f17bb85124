use std::fmt::{Display, Formatter};
use std::sync::Arc;

use super::{CompressedTile, ConstTile, Tile};

/// Identifies an open view of a [`TiledBitmap`](super::TiledBitmap).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ViewId(pub(crate) u64);

impl Display for ViewId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "view#{}", self.0)
    }
}

/// Notified about the lifecycle of a [`CompressedTile`].
pub trait TileInitialisationObserver: Send + Sync {
    /// Called once, when the observer is registered.
    fn tile_created(&self, tile: &Arc<CompressedTile>);

    /// Called when the tile's data is complete: filled from the source, or fully reduced.
    fn tile_finished(&self, tile: &Arc<CompressedTile>);
}

/// Notified when the data of a tile becomes resident or changes.
pub trait TileLoadingObserver: Send + Sync {
    fn tile_loaded(&self, tile: &Arc<ConstTile>);
}

/// Produces the pixels of a bitmap, one row of tiles at a time.
pub trait SourcePresentation: Send + Sync {
    /// Writes `line_count` lines starting at image line `start_line` into `tiles`.
    ///
    /// `tiles[0]` is tile column `first_tile`; every tile is `tile_width` pixels wide, and
    /// line `start_line + k` goes to row `k` of each tile.
    fn fill_tiles(
        &self,
        start_line: u32,
        line_count: u32,
        tile_width: u32,
        first_tile: u32,
        tiles: &[Arc<Tile>],
    );

    /// Called after the last row was filled.
    fn done(&self) {}
}

/// A display of the bitmap.
pub trait ViewInterface: Send + Sync {
    /// Requests a redraw. May be called from any thread.
    fn invalidate(&self);
}

/// Receives the progress of loading a bitmap.
pub trait ProgressInterface: Send + Sync {
    fn set_idle(&self);
    fn set_waiting(&self, progress: f64);
    fn set_working(&self, progress: f64);
    fn set_finished(&self);
}
