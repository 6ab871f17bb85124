use std::sync::Arc;

use tessera_tile_utils::{REDUCTION, Rect, SampleIterator, max_sample, set_sample, to_u8};

use super::{Argb, LayerOperations, RenderCache, Surface, grey};
use crate::bitmap::{ConstTile, Tile, TileStatus};
use crate::{TesseraCoreError, TesseraCoreResult};

/// Grey-scale tiles of 1, 2, 4 or 8 bits per pixel.
///
/// Reduction always produces intensities in `0..=255`, scaled to the bit depth of the
/// target tile, so the usual layer spec is `[GreyOperations::new(bpp), GreyOperations::new(8)]`.
#[derive(Debug, Clone)]
pub struct GreyOperations {
    bpp: u32,
    colormap: Vec<Argb>,
}

impl GreyOperations {
    pub fn new(bpp: u32) -> TesseraCoreResult<Self> {
        if !matches!(bpp, 1 | 2 | 4 | 8) {
            return Err(TesseraCoreError::UnsupportedBpp(bpp));
        }
        let colormap = (0..=max_sample(bpp))
            .map(|v| grey(to_u8(v, bpp)))
            .collect();
        Ok(Self { bpp, colormap })
    }

    /// Draws sample 0 as white instead of black.
    #[must_use]
    pub fn inverted(mut self) -> Self {
        self.colormap.reverse();
        self
    }

    #[must_use]
    pub fn colormap(&self) -> &[Argb] {
        &self.colormap
    }

    /// Sum of the `0..=255` intensities of the 8x8 block starting at sample `(x, y)`.
    fn block_sum(&self, data: &[u8], stride: usize, x: u32, y: u32) -> u32 {
        (y..y + REDUCTION)
            .map(|row| {
                let row = &data[row as usize * stride..][..stride];
                SampleIterator::new(row, self.bpp, x as usize, REDUCTION as usize)
                    .map(|v| u32::from(to_u8(v, self.bpp)))
                    .sum::<u32>()
            })
            .sum()
    }
}

impl LayerOperations for GreyOperations {
    fn bpp(&self) -> u32 {
        self.bpp
    }

    fn cache(&self, tile: &ConstTile) -> RenderCache {
        let size = tile.size();
        let stride = tile.stride();
        let data = tile.data();
        let mut surface = Surface::new(size, size);
        for y in 0..size {
            let row = &data[y as usize * stride..][..stride];
            let samples = SampleIterator::new(row, self.bpp, 0, size as usize);
            for (pixel, v) in surface.row_mut(y).iter_mut().zip(samples) {
                *pixel = self.colormap[v as usize];
            }
        }
        Arc::new(surface)
    }

    fn cache_zoom(&self, tile: &ConstTile, zoom: i32, base: &RenderCache) -> RenderCache {
        if zoom >= 0 {
            return Arc::clone(base);
        }
        match base.downcast_ref::<Surface>() {
            Some(surface) => Arc::new(surface.downscaled(1 << zoom.unsigned_abs().min(31))),
            None => self.cache_zoom(tile, zoom, &self.cache(tile)),
        }
    }

    fn draw(
        &self,
        surface: &mut Surface,
        _tile: &ConstTile,
        tile_area: Rect,
        view_area: Rect,
        zoom: i32,
        cache: &RenderCache,
    ) {
        let Some(cached) = cache.downcast_ref::<Surface>() else {
            self.draw_state(surface, TileStatus::Loaded, view_area);
            return;
        };
        let source_area = if zoom < 0 {
            tile_area.zoomed(zoom)
        } else {
            tile_area
        };
        surface.blit_scaled(cached, source_area, view_area);
    }

    fn reduce(&self, target: &Tile, source: &ConstTile, x: u32, y: u32) {
        let block = source.size() / REDUCTION;
        let source_stride = source.stride();
        let target_bpp = target.bpp();
        let target_stride = target.stride();
        let target_max = max_sample(target_bpp);
        let source_data = source.data();
        let mut target_data = target.data_mut();

        for ty in 0..block {
            let start = (y * block + ty) as usize * target_stride;
            let row = &mut target_data[start..start + target_stride];
            for tx in 0..block {
                let sum = self.block_sum(&source_data, source_stride, tx * REDUCTION, ty * REDUCTION);
                let average = sum / (REDUCTION * REDUCTION);
                set_sample(row, (x * block + tx) as usize, target_bpp, average * target_max / 255);
            }
        }
    }

    fn sum_samples(&self, tile: &ConstTile, area: Rect) -> u64 {
        let area = area.intersection(&Rect::from_size(tile.size(), tile.size()));
        if area.is_empty() {
            return 0;
        }
        let stride = tile.stride();
        let data = tile.data();
        (area.y..area.bottom())
            .map(|y| {
                let row = &data[y as usize * stride..][..stride];
                SampleIterator::new(row, self.bpp, area.x as usize, area.width as usize)
                    .map(u64::from)
                    .sum::<u64>()
            })
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use rstest::rstest;
    use tessera_tile_utils::{TileCoord, get_sample};

    use super::*;
    use crate::bitmap::CompressedTile;
    use crate::scheduler::{SchedulerContext, ThreadPool};
    use crate::storage::BlobStore;

    const SIZE: u32 = 64;

    fn idle_context() -> SchedulerContext {
        SchedulerContext::with_pools(
            ThreadPool::new("cpu", 0).unwrap(),
            ThreadPool::new("seq", 0).unwrap(),
            ThreadPool::new("reaper", 0).unwrap(),
        )
    }

    fn tile(bpp: u32, fill: impl Fn(&mut [u8])) -> Arc<CompressedTile> {
        let tile = CompressedTile::new(
            TileCoord::new(0, 0, 0),
            bpp,
            SIZE,
            &BlobStore::default(),
            &idle_context(),
        );
        let data = tile.initialize().unwrap();
        fill(&mut data.data_mut());
        tile
    }

    #[rstest]
    #[case(1)]
    #[case(2)]
    #[case(4)]
    #[case(8)]
    fn colormap_spans_black_to_white(#[case] bpp: u32) {
        let ops = GreyOperations::new(bpp).unwrap();
        assert_eq!(ops.colormap().len(), 1 << bpp);
        assert_eq!(ops.colormap()[0], grey(0));
        assert_eq!(*ops.colormap().last().unwrap(), grey(255));
    }

    #[rstest]
    #[case(0)]
    #[case(3)]
    #[case(16)]
    fn unsupported_depths(#[case] bpp: u32) {
        assert!(matches!(
            GreyOperations::new(bpp),
            Err(TesseraCoreError::UnsupportedBpp(b)) if b == bpp
        ));
    }

    #[test]
    fn cache_follows_samples() {
        let tile = tile(1, |data| data[0] = 0b1000_0000);
        let data = tile.get_const_tile_sync().unwrap();
        let ops = GreyOperations::new(1).unwrap();
        let cache = ops.cache(&data);
        let surface = cache.downcast_ref::<Surface>().unwrap();
        assert_eq!(surface.pixel(0, 0), grey(255));
        assert_eq!(surface.pixel(1, 0), grey(0));

        let inverted = GreyOperations::new(1).unwrap().inverted().cache(&data);
        assert_eq!(inverted.downcast_ref::<Surface>().unwrap().pixel(0, 0), grey(0));
    }

    #[test]
    fn zoomed_cache_shrinks() {
        let tile = tile(8, |data| data.fill(100));
        let data = tile.get_const_tile_sync().unwrap();
        let ops = GreyOperations::new(8).unwrap();
        let base = ops.cache(&data);
        assert!(Arc::ptr_eq(&ops.cache_zoom(&data, 1, &base), &base));
        let zoomed = ops.cache_zoom(&data, -2, &base);
        let surface = zoomed.downcast_ref::<Surface>().unwrap();
        assert_eq!(surface.width(), SIZE / 4);
        assert_eq!(surface.pixel(3, 3), grey(100));
    }

    #[test]
    fn reduce_averages_blocks() {
        // Left half of every row set: each 8x8 block in the left half is fully white.
        let source = tile(1, |data| {
            for row in data.chunks_mut((SIZE / 8) as usize) {
                row[..4].fill(0xFF);
            }
        });
        let target = tile(8, |_| {});
        let ops = GreyOperations::new(1).unwrap();
        ops.reduce(
            &target.get_tile_sync().unwrap(),
            &source.get_const_tile_sync().unwrap(),
            1,
            2,
        );
        let data = target.get_const_tile_sync().unwrap();
        let bytes = data.data();
        let stride = SIZE as usize;
        let block = (SIZE / 8) as usize;
        assert_eq!(bytes[2 * block * stride + block], 255);
        assert_eq!(bytes[2 * block * stride + block + block / 2 - 1], 255);
        assert_eq!(bytes[2 * block * stride + block + block / 2], 0);
        assert_eq!(bytes[0], 0);
    }

    #[test]
    fn reduce_half_grey() {
        // Alternating bits average to 255 * 32 / 64.
        let source = tile(1, |data| data.fill(0b1010_1010));
        let target = tile(8, |_| {});
        GreyOperations::new(1).unwrap().reduce(
            &target.get_tile_sync().unwrap(),
            &source.get_const_tile_sync().unwrap(),
            0,
            0,
        );
        let data = target.get_const_tile_sync().unwrap();
        assert_eq!(get_sample(&data.data(), 0, 8), 127);
    }

    #[test]
    fn sums_clip_to_tile() {
        let tile = tile(4, |data| data.fill(0x11));
        let data = tile.get_const_tile_sync().unwrap();
        let ops = GreyOperations::new(4).unwrap();
        assert_eq!(ops.sum_samples(&data, Rect::new(0, 0, 2, 3)), 6);
        assert_eq!(ops.sum_samples(&data, Rect::new(60, 60, 10, 10)), 16);
        assert_eq!(ops.sum_samples(&data, Rect::new(-5, 0, 2, 2)), 0);
    }

    #[test]
    fn draw_blits_cache() {
        let tile = tile(8, |data| data.fill(42));
        let data = tile.get_const_tile_sync().unwrap();
        let ops = GreyOperations::new(8).unwrap();
        let cache = ops.cache(&data);
        let mut surface = Surface::new(8, 8);
        ops.draw(&mut surface, &data, Rect::new(0, 0, 4, 4), Rect::new(0, 0, 8, 8), 1, &cache);
        assert_eq!(surface.pixel(7, 7), grey(42));

        let empty: RenderCache = Arc::new(());
        let mut surface = Surface::new(2, 2);
        let view = surface.rect();
        ops.draw(&mut surface, &data, Rect::new(0, 0, 2, 2), view, 0, &empty);
        assert_eq!(surface.pixel(0, 0), crate::ops::LOADED_COLOR);
    }
}
