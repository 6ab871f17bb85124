//! Pixel operations of a pyramid layer.
//!
//! Every layer of a [`TiledBitmap`](crate::bitmap::TiledBitmap) is paired with a
//! [`LayerOperations`] implementation that knows its pixel format: how to turn raw tile
//! bytes into something drawable, how to draw it, and how to reduce 8x8 tiles into one
//! tile of the next layer.

use std::any::Any;
use std::fmt::Debug;
use std::sync::Arc;

use tessera_tile_utils::Rect;

use crate::bitmap::{ConstTile, Tile, TileStatus};

mod grey;
pub use grey::GreyOperations;

mod surface;
pub use surface::{Argb, Surface, argb, grey};

/// Whatever a [`LayerOperations`] implementation precomputes for drawing a tile.
pub type RenderCache = Arc<dyn Any + Send + Sync>;

/// Drawn for tiles without data yet.
pub const UNINITIALIZED_COLOR: Argb = argb(255, 255, 127);
/// Drawn for tiles whose data is not resident.
pub const UNLOADED_COLOR: Argb = argb(127, 255, 127);
/// Drawn for resident tiles whose render cache is not ready.
pub const LOADED_COLOR: Argb = argb(255, 127, 127);
/// Drawn outside the bitmap.
pub const OUT_OF_BOUNDS_COLOR: Argb = argb(191, 191, 255);

/// The placeholder colour of a tile in state `status`.
#[must_use]
pub fn state_color(status: TileStatus) -> Argb {
    match status {
        TileStatus::Uninitialized => UNINITIALIZED_COLOR,
        TileStatus::Unloaded => UNLOADED_COLOR,
        TileStatus::Loaded => LOADED_COLOR,
        TileStatus::OutOfBounds => OUT_OF_BOUNDS_COLOR,
    }
}

/// Format specific operations of one pyramid layer.
pub trait LayerOperations: Send + Sync + Debug {
    /// Bits per pixel of the tiles of this layer.
    fn bpp(&self) -> u32;

    /// Precomputes the zoom level 0 rendering of `tile`.
    fn cache(&self, tile: &ConstTile) -> RenderCache;

    /// Derives the rendering for `zoom` from the one produced by [`cache`](Self::cache).
    fn cache_zoom(&self, tile: &ConstTile, zoom: i32, base: &RenderCache) -> RenderCache;

    /// Draws `tile_area` of `tile` (tile pixels) into `view_area` (surface pixels) using `cache`.
    fn draw(
        &self,
        surface: &mut Surface,
        tile: &ConstTile,
        tile_area: Rect,
        view_area: Rect,
        zoom: i32,
        cache: &RenderCache,
    );

    /// Draws a placeholder for a tile that cannot be drawn yet.
    fn draw_state(&self, surface: &mut Surface, status: TileStatus, view_area: Rect) {
        surface.fill_rect(view_area, state_color(status));
    }

    /// Reduces `source` 8:1 into block `(x, y)` of `target`.
    fn reduce(&self, target: &Tile, source: &ConstTile, x: u32, y: u32);

    /// Sum of the raw sample values of `tile` within `area` (tile pixels).
    fn sum_samples(&self, tile: &ConstTile, area: Rect) -> u64;
}
