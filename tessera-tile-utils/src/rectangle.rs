//! Rectangles in pixel space and in tile-index space.
//!
//! [`Rect`] describes an area of pixels (in a layer, or on a draw surface),
//! [`TileRange`] an inclusive block of tile indices within one pyramid layer.

use std::fmt::{Display, Formatter};

/// Largest edge coordinate [`Rect::zoomed`] produces, so `right()` and `bottom()` cannot overflow.
const EDGE_LIMIT: i64 = (1 << 30) - 1;

/// A rectangular area of pixels. Edges are half-open: `x..x + width`.
///
/// # Examples
///
/// ```
/// # use tessera_tile_utils::Rect;
/// let a = Rect::new(0, 0, 100, 100);
/// let b = Rect::new(50, 50, 100, 100);
/// assert_eq!(a.intersection(&b), Rect::new(50, 50, 50, 50));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Rect {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

impl Rect {
    #[must_use]
    pub fn new(x: i32, y: i32, width: i32, height: i32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// A rectangle anchored at the origin.
    #[must_use]
    pub fn from_size(width: u32, height: u32) -> Self {
        Self::new(0, 0, width as i32, height as i32)
    }

    #[must_use]
    pub fn right(&self) -> i32 {
        self.x + self.width
    }

    #[must_use]
    pub fn bottom(&self) -> i32 {
        self.y + self.height
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.width <= 0 || self.height <= 0
    }

    /// Number of pixels covered, zero for empty rectangles.
    #[must_use]
    pub fn area(&self) -> u64 {
        if self.is_empty() {
            0
        } else {
            u64::from(self.width.unsigned_abs()) * u64::from(self.height.unsigned_abs())
        }
    }

    /// The common part of both rectangles. Empty (zero sized) if they do not overlap.
    #[must_use]
    pub fn intersection(&self, other: &Self) -> Self {
        let x = self.x.max(other.x);
        let y = self.y.max(other.y);
        let right = self.right().min(other.right());
        let bottom = self.bottom().min(other.bottom());
        if right <= x || bottom <= y {
            Self::new(x, y, 0, 0)
        } else {
            Self::new(x, y, right - x, bottom - y)
        }
    }

    /// Checks that `other` lies entirely within `self`.
    ///
    /// An empty `other` is always contained.
    #[must_use]
    pub fn contains(&self, other: &Self) -> bool {
        other.is_empty()
            || (self.x <= other.x
                && self.y <= other.y
                && self.right() >= other.right()
                && self.bottom() >= other.bottom())
    }

    #[must_use]
    pub fn translated(&self, dx: i32, dy: i32) -> Self {
        Self::new(self.x + dx, self.y + dy, self.width, self.height)
    }

    /// Scales the rectangle by `2^zoom`.
    ///
    /// For negative zoom levels, the origin is rounded down and the far edge up,
    /// so the result always covers the scaled area. Edges saturate at `±(2^30 - 1)`.
    ///
    /// ```
    /// # use tessera_tile_utils::Rect;
    /// assert_eq!(Rect::new(1, 2, 3, 4).zoomed(1), Rect::new(2, 4, 6, 8));
    /// assert_eq!(Rect::new(1, 2, 15, 6).zoomed(-3), Rect::new(0, 0, 2, 1));
    /// ```
    #[must_use]
    pub fn zoomed(&self, zoom: i32) -> Self {
        let (left, top) = (i64::from(self.x), i64::from(self.y));
        let edges = [left, top, left + i64::from(self.width), top + i64::from(self.height)];
        let [left, top, right, bottom] = if zoom >= 0 {
            // Any non-zero edge shifted by 30 is already past the limit.
            let shift = zoom.unsigned_abs().min(30);
            edges.map(|v| (v << shift).clamp(-EDGE_LIMIT, EDGE_LIMIT))
        } else {
            let divider = 1_i64 << zoom.unsigned_abs().min(32);
            let [left, top, right, bottom] = edges;
            let ceil = |v: i64| v.div_euclid(divider) + i64::from(v.rem_euclid(divider) != 0);
            [left.div_euclid(divider), top.div_euclid(divider), ceil(right), ceil(bottom)]
        };
        Self::new(
            left as i32,
            top as i32,
            (right - left) as i32,
            (bottom - top) as i32,
        )
    }

    /// Returns up to 4 non-overlapping rectangles covering the parts of `self`
    /// that lie outside `other`.
    ///
    /// The parts are: left, right (full height), top and bottom (clamped to the
    /// horizontal extent of `other`).
    ///
    /// ```
    /// # use tessera_tile_utils::Rect;
    /// let view = Rect::new(-10, 0, 30, 10);
    /// let layer = Rect::new(0, 0, 10, 10);
    /// let outside: Vec<_> = view.subtract(&layer).into_iter().flatten().collect();
    /// assert_eq!(outside, vec![Rect::new(-10, 0, 10, 10), Rect::new(10, 0, 10, 10)]);
    /// ```
    #[must_use]
    pub fn subtract(&self, other: &Self) -> [Option<Self>; 4] {
        let mut result = [None, None, None, None];
        if self.is_empty() {
            return result;
        }
        let inner = self.intersection(other);
        if inner.is_empty() {
            result[0] = Some(*self);
            return result;
        }
        if self.x < inner.x {
            result[0] = Some(Self::new(self.x, self.y, inner.x - self.x, self.height));
        }
        if self.right() > inner.right() {
            result[1] = Some(Self::new(
                inner.right(),
                self.y,
                self.right() - inner.right(),
                self.height,
            ));
        }
        if self.y < inner.y {
            result[2] = Some(Self::new(inner.x, self.y, inner.width, inner.y - self.y));
        }
        if self.bottom() > inner.bottom() {
            result[3] = Some(Self::new(
                inner.x,
                inner.bottom(),
                inner.width,
                self.bottom() - inner.bottom(),
            ));
        }
        result
    }
}

impl Display for Rect {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}+{}+{}", self.width, self.height, self.x, self.y)
    }
}

/// An inclusive block of tile indices within one pyramid layer.
///
/// # Examples
///
/// ```
/// # use tessera_tile_utils::TileRange;
/// let range = TileRange::new(0, 0, 0, 2, 1);
/// assert_eq!(range.size(), 6);
/// assert_eq!(range.iter().next(), Some((0, 0)));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TileRange {
    /// The pyramid depth of the tiles
    pub depth: u32,
    /// The minimum X index (inclusive)
    pub min_x: i32,
    /// The minimum Y index (inclusive)
    pub min_y: i32,
    /// The maximum X index (inclusive)
    pub max_x: i32,
    /// The maximum Y index (inclusive)
    pub max_y: i32,
}

impl TileRange {
    /// Creates a new `TileRange`.
    ///
    /// # Panics
    ///
    /// Panics if `min_x > max_x` or `min_y > max_y`.
    #[must_use]
    pub fn new(depth: u32, min_x: i32, min_y: i32, max_x: i32, max_y: i32) -> Self {
        assert!(min_x <= max_x);
        assert!(min_y <= max_y);
        Self {
            depth,
            min_x,
            min_y,
            max_x,
            max_y,
        }
    }

    /// The tiles of edge `tile_size` touched by the pixel area `area`.
    ///
    /// Returns `None` for an empty area.
    ///
    /// ```
    /// # use tessera_tile_utils::{Rect, TileRange};
    /// let range = TileRange::covering(1, &Rect::new(-1, 64, 130, 1), 64).unwrap();
    /// assert_eq!(range, TileRange::new(1, -1, 1, 2, 1));
    /// ```
    #[must_use]
    pub fn covering(depth: u32, area: &Rect, tile_size: u32) -> Option<Self> {
        if area.is_empty() {
            return None;
        }
        let ts = tile_size as i32;
        Some(Self::new(
            depth,
            area.x.div_euclid(ts),
            area.y.div_euclid(ts),
            (area.right() - 1).div_euclid(ts),
            (area.bottom() - 1).div_euclid(ts),
        ))
    }

    /// Checks that every tile of `other` is part of `self`.
    #[must_use]
    pub fn contains(&self, other: &Self) -> bool {
        self.depth == other.depth
            && self.min_x <= other.min_x
            && self.min_y <= other.min_y
            && self.max_x >= other.max_x
            && self.max_y >= other.max_y
    }

    /// Checks if two ranges overlap.
    #[must_use]
    pub fn is_overlapping(&self, other: &Self) -> bool {
        self.depth == other.depth
            && self.min_x <= other.max_x
            && self.max_x >= other.min_x
            && self.min_y <= other.max_y
            && self.max_y >= other.min_y
    }

    /// Total number of tiles contained in this range.
    #[must_use]
    pub fn size(&self) -> u64 {
        u64::from((self.max_x - self.min_x + 1).unsigned_abs())
            * u64::from((self.max_y - self.min_y + 1).unsigned_abs())
    }

    /// Iterates the `(x, y)` indices row by row.
    pub fn iter(&self) -> impl Iterator<Item = (i32, i32)> + use<> {
        let (min_x, max_x) = (self.min_x, self.max_x);
        (self.min_y..=self.max_y).flat_map(move |y| (min_x..=max_x).map(move |x| (x, y)))
    }
}

impl Display for TileRange {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}: ({},{}) - ({},{})",
            self.depth, self.min_x, self.min_y, self.max_x, self.max_y
        )
    }
}
