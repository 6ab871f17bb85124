#![doc = include_str!("../README.md")]

use std::fmt::{Display, Formatter};

mod decoders;
pub use decoders::*;

mod rectangle;
pub use rectangle::{Rect, TileRange};

mod samples;
pub use samples::*;

/// Default edge length of a square tile, in pixels.
pub const TILESIZE: u32 = 4096;

/// Linear reduction factor between two consecutive pyramid layers.
pub const REDUCTION: u32 = 8;

/// Number of zoom steps (powers of two) covered by one pyramid layer.
pub const ZOOM_STEPS_PER_LAYER: i32 = 3;

/// Highest zoom level a view may be drawn at; one bitmap pixel then covers 16×16 view pixels.
pub const MAX_ZOOM: i32 = 4;

/// Tile edge lengths must be a multiple of this, so a reduced 1-bpp block stays byte aligned.
pub const TILESIZE_GRANULARITY: u32 = REDUCTION * 8;

/// Identifies one tile of the pyramid.
///
/// `x` and `y` are signed so requests outside a layer can be expressed;
/// such requests resolve to the layer's out-of-bounds tile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TileCoord {
    pub depth: u32,
    pub x: i32,
    pub y: i32,
}

impl TileCoord {
    #[must_use]
    pub fn new(depth: u32, x: i32, y: i32) -> Self {
        Self { depth, x, y }
    }
}

impl Display for TileCoord {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}/{}", self.depth, self.x, self.y)
    }
}

/// Number of tiles of edge `tile_size` needed to cover `len` pixels.
///
/// ```
/// # use tessera_tile_utils::tile_count;
/// assert_eq!(tile_count(4096, 4096), 1);
/// assert_eq!(tile_count(4097, 4096), 2);
/// ```
#[must_use]
pub fn tile_count(len: u32, tile_size: u32) -> u32 {
    len.div_ceil(tile_size)
}

/// Size in pixels of the next pyramid layer along one axis.
#[must_use]
pub fn reduced_len(len: u32) -> u32 {
    len.div_ceil(REDUCTION)
}

/// Size of the pixel data of one tile, in bytes.
#[must_use]
pub fn tile_bytes(tile_size: u32, bpp: u32) -> usize {
    let edge = tile_size as usize;
    edge * edge * bpp as usize / 8
}

/// Checks that `tile_size` is usable as a tile edge.
#[must_use]
pub fn is_valid_tile_size(tile_size: u32) -> bool {
    tile_size > 0 && tile_size.is_multiple_of(TILESIZE_GRANULARITY)
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case(1, 1)]
    #[case(4096, 1)]
    #[case(4097, 2)]
    #[case(10_000, 3)]
    #[case(12_288, 3)]
    fn counts_tiles(#[case] len: u32, #[case] expected: u32) {
        assert_eq!(tile_count(len, TILESIZE), expected);
    }

    #[test]
    fn reduces_layers_rounding_up() {
        assert_eq!(reduced_len(10_000), 1250);
        assert_eq!(reduced_len(9), 2);
        assert_eq!(reduced_len(8), 1);
        assert_eq!(tile_count(reduced_len(3 * TILESIZE), TILESIZE), 1);
    }

    #[test]
    fn tile_bytes_per_depth() {
        assert_eq!(tile_bytes(TILESIZE, 8), 16 * 1024 * 1024);
        assert_eq!(tile_bytes(TILESIZE, 1), 2 * 1024 * 1024);
        assert_eq!(tile_bytes(64, 24), 64 * 64 * 3);
    }

    #[rstest]
    #[case(TILESIZE, true)]
    #[case(64, true)]
    #[case(128, true)]
    #[case(0, false)]
    #[case(32, false)]
    #[case(100, false)]
    fn validates_tile_size(#[case] size: u32, #[case] valid: bool) {
        assert_eq!(is_valid_tile_size(size), valid);
    }

    #[test]
    fn displays_coord() {
        assert_eq!(TileCoord::new(2, 3, -1).to_string(), "2/3/-1");
    }
}
