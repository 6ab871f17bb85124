use std::fmt::{Debug, Formatter};

use itertools::iproduct;
use tessera_tile_utils::Rect;

/// A pixel in `0xAARRGGBB` layout.
pub type Argb = u32;

/// An opaque colour from its channels.
#[must_use]
pub const fn argb(r: u8, g: u8, b: u8) -> Argb {
    0xFF00_0000 | (r as u32) << 16 | (g as u32) << 8 | b as u32
}

/// An opaque grey of intensity `v`.
#[must_use]
pub const fn grey(v: u8) -> Argb {
    argb(v, v, v)
}

/// An in-memory ARGB32 image, used both as draw target and as render cache.
#[derive(Clone, PartialEq, Eq)]
pub struct Surface {
    width: u32,
    height: u32,
    pixels: Vec<Argb>,
}

impl Surface {
    /// A fully transparent surface.
    #[must_use]
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            pixels: vec![0; width as usize * height as usize],
        }
    }

    #[must_use]
    pub fn width(&self) -> u32 {
        self.width
    }

    #[must_use]
    pub fn height(&self) -> u32 {
        self.height
    }

    #[must_use]
    pub fn rect(&self) -> Rect {
        Rect::from_size(self.width, self.height)
    }

    #[must_use]
    pub fn pixels(&self) -> &[Argb] {
        &self.pixels
    }

    /// # Panics
    ///
    /// If `(x, y)` lies outside the surface.
    #[must_use]
    pub fn pixel(&self, x: u32, y: u32) -> Argb {
        assert!(x < self.width && y < self.height, "pixel ({x}, {y}) out of range");
        self.pixels[y as usize * self.width as usize + x as usize]
    }

    pub fn set_pixel(&mut self, x: u32, y: u32, color: Argb) {
        assert!(x < self.width && y < self.height, "pixel ({x}, {y}) out of range");
        self.pixels[y as usize * self.width as usize + x as usize] = color;
    }

    /// Mutable access to one row.
    pub fn row_mut(&mut self, y: u32) -> &mut [Argb] {
        let w = self.width as usize;
        let start = y as usize * w;
        &mut self.pixels[start..start + w]
    }

    /// Paints `area`, clipped to the surface.
    pub fn fill_rect(&mut self, area: Rect, color: Argb) {
        let area = area.intersection(&self.rect());
        if area.is_empty() {
            return;
        }
        let w = self.width as usize;
        for y in area.y..area.bottom() {
            let start = y as usize * w + area.x as usize;
            self.pixels[start..start + area.width as usize].fill(color);
        }
    }

    /// Copies `source_area` of `source` onto `dest_area`, scaling with nearest neighbour sampling.
    ///
    /// Parts falling outside either surface are skipped.
    pub fn blit_scaled(&mut self, source: &Surface, source_area: Rect, dest_area: Rect) {
        if source_area.is_empty() || dest_area.is_empty() {
            return;
        }
        let visible = dest_area.intersection(&self.rect());
        let w = self.width as usize;
        let sw = source.width as usize;
        for dy in visible.y..visible.bottom() {
            let sy = source_area.y
                + ((i64::from(dy - dest_area.y) * i64::from(source_area.height))
                    / i64::from(dest_area.height)) as i32;
            if sy < 0 || sy >= source.height as i32 {
                continue;
            }
            for dx in visible.x..visible.right() {
                let sx = source_area.x
                    + ((i64::from(dx - dest_area.x) * i64::from(source_area.width))
                        / i64::from(dest_area.width)) as i32;
                if sx < 0 || sx >= source.width as i32 {
                    continue;
                }
                self.pixels[dy as usize * w + dx as usize] =
                    source.pixels[sy as usize * sw + sx as usize];
            }
        }
    }

    /// Shrinks the surface by `divider` along both axes, averaging each channel over the box.
    #[must_use]
    pub fn downscaled(&self, divider: u32) -> Surface {
        let divider = divider.max(1);
        let mut result = Surface::new(self.width / divider, self.height / divider);
        let d = divider as usize;
        let count = (d * d) as u32;
        let stride = self.width as usize;
        for (ty, tx) in iproduct!(0..result.height as usize, 0..result.width as usize) {
            let mut sums = [0_u32; 4];
            for (y, x) in iproduct!(ty * d..(ty + 1) * d, tx * d..(tx + 1) * d) {
                let p = self.pixels[y * stride + x];
                for (i, sum) in sums.iter_mut().enumerate() {
                    *sum += (p >> (24 - 8 * i)) & 0xFF;
                }
            }
            result.pixels[ty * result.width as usize + tx] = sums
                .iter()
                .fold(0, |acc, sum| (acc << 8) | (sum / count));
        }
        result
    }

    /// Converts to straight RGBA bytes, e.g. for PNG encoding.
    #[must_use]
    pub fn to_rgba8(&self) -> Vec<u8> {
        self.pixels
            .iter()
            .flat_map(|p| {
                let [a, r, g, b] = p.to_be_bytes();
                [r, g, b, a]
            })
            .collect()
    }
}

impl Debug for Surface {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Surface")
            .field("width", &self.width)
            .field("height", &self.height)
            .finish_non_exhaustive()
    }
}
