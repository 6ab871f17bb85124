//! The tiled pyramid.
//!
//! A [`TiledBitmap`] owns one [`Layer`] per pyramid depth. Layer 0 is filled row by row
//! from a [`SourcePresentation`]; every finished tile is handed to the
//! [`LayerCoordinator`] of the tile above it, which reduces it into its 8x8 block and
//! passes the target on once all of its sources are in.
//!
//! Views draw through per-tile [`TileViewState`]s that compute render caches in the
//! background, and are told to redraw when one becomes ready.

mod coordinator;
mod interfaces;
mod layer;
mod progress;
mod tile;
mod tiled_bitmap;
mod view_data;
mod view_state;

pub use coordinator::LayerCoordinator;
pub use interfaces::{
    ProgressInterface, SourcePresentation, TileInitialisationObserver, TileLoadingObserver,
    ViewId, ViewInterface,
};
pub use layer::Layer;
pub use progress::LoadProgress;
pub use tile::{CompressedTile, ConstTile, Tile, TileStatus};
pub use tiled_bitmap::{LayerSpec, LoadHandle, LoadOutcome, TiledBitmap};
pub use view_data::TiledBitmapViewData;
pub use view_state::{TileViewState, ViewState};
