use std::fmt::{Debug, Formatter};
use std::sync::Arc;

use tessera_tile_utils::{TileCoord, tile_count};
use tracing::{debug, trace};

use super::interfaces::{SourcePresentation, TileInitialisationObserver, ViewId};
use super::tile::{CompressedTile, Tile};
use crate::registry::Registration;
use crate::scheduler::{DATAFETCH_PRIO, QueueJumper, REDUCE_PRIO, SchedulerContext, ThreadPool, WeakQueue};
use crate::storage::BlobStore;

/// All tiles of one pyramid depth, row-major.
pub struct Layer {
    depth: u32,
    width: u32,
    height: u32,
    bpp: u32,
    tile_size: u32,
    tiles: Vec<Vec<Arc<CompressedTile>>>,
    out_of_bounds: Arc<CompressedTile>,
    out_of_bounds_line: Vec<Arc<CompressedTile>>,
    _registrations: Vec<Registration>,
}

impl Layer {
    /// Creates the tiles of a `width` x `height` layer. `observer`, if given, is registered
    /// as init observer of every tile.
    #[must_use]
    #[expect(clippy::too_many_arguments)]
    pub fn new(
        ctx: &SchedulerContext,
        store: &BlobStore,
        depth: u32,
        width: u32,
        height: u32,
        bpp: u32,
        tile_size: u32,
        observer: Option<&Arc<dyn TileInitialisationObserver>>,
    ) -> Arc<Self> {
        let horizontal = tile_count(width, tile_size);
        let vertical = tile_count(height, tile_size);
        let tiles: Vec<Vec<_>> = (0..vertical as i32)
            .map(|j| {
                (0..horizontal as i32)
                    .map(|i| CompressedTile::new(TileCoord::new(depth, i, j), bpp, tile_size, store, ctx))
                    .collect()
            })
            .collect();
        let registrations = observer
            .map(|observer| {
                tiles
                    .iter()
                    .flatten()
                    .map(|tile| tile.register_init_observer(observer))
                    .collect()
            })
            .unwrap_or_default();
        let out_of_bounds = CompressedTile::out_of_bounds(depth, bpp, tile_size, store, ctx);
        let out_of_bounds_line = vec![Arc::clone(&out_of_bounds); horizontal as usize];
        debug!("Created layer {depth}: {width}x{height} pixels, {horizontal}x{vertical} tiles");

        Arc::new(Self {
            depth,
            width,
            height,
            bpp,
            tile_size,
            tiles,
            out_of_bounds,
            out_of_bounds_line,
            _registrations: registrations,
        })
    }

    #[must_use]
    pub fn depth(&self) -> u32 {
        self.depth
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
    pub fn bpp(&self) -> u32 {
        self.bpp
    }

    #[must_use]
    pub fn tile_size(&self) -> u32 {
        self.tile_size
    }

    #[must_use]
    pub fn horizontal_tile_count(&self) -> u32 {
        self.out_of_bounds_line.len() as u32
    }

    #[must_use]
    pub fn vertical_tile_count(&self) -> u32 {
        self.tiles.len() as u32
    }

    /// The tile at column `i`, row `j`, or the out-of-bounds tile.
    #[must_use]
    pub fn get_tile(&self, i: i32, j: i32) -> &Arc<CompressedTile> {
        usize::try_from(j)
            .ok()
            .and_then(|j| self.tiles.get(j))
            .and_then(|line| line.get(usize::try_from(i).ok()?))
            .unwrap_or(&self.out_of_bounds)
    }

    /// Row `j` of tiles, or a row of out-of-bounds tiles of the same length.
    #[must_use]
    pub fn get_tile_line(&self, j: i32) -> &[Arc<CompressedTile>] {
        usize::try_from(j)
            .ok()
            .and_then(|j| self.tiles.get(j))
            .map_or(&self.out_of_bounds_line, |line| line)
    }

    /// Forgets the per-view state of every tile for `view`.
    pub fn close(&self, view: ViewId) {
        for tile in self.tiles.iter().flatten() {
            tile.close(view);
        }
    }

    /// Fills the layer from `source`, one row of tiles per job on `pool`.
    ///
    /// Every row is followed by the reductions it triggers before the next row is
    /// fetched. `on_done` runs after the last row, unless `queue` dies first.
    pub fn fetch_data(
        self: &Arc<Self>,
        source: Arc<dyn SourcePresentation>,
        pool: &ThreadPool,
        queue: WeakQueue,
        on_done: impl Fn() + Send + Sync + 'static,
    ) {
        let fetcher = DataFetcher {
            layer: Arc::clone(self),
            source,
            row: 0,
            pool: pool.clone(),
            queue: queue.clone(),
            on_done: Arc::new(on_done),
        };
        pool.schedule(move || fetcher.run(), DATAFETCH_PRIO, queue);
    }
}

impl Debug for Layer {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Layer")
            .field("depth", &self.depth)
            .field("width", &self.width)
            .field("height", &self.height)
            .field("bpp", &self.bpp)
            .field("horizontal", &self.horizontal_tile_count())
            .field("vertical", &self.vertical_tile_count())
            .finish_non_exhaustive()
    }
}

#[derive(Clone)]
struct DataFetcher {
    layer: Arc<Layer>,
    source: Arc<dyn SourcePresentation>,
    row: u32,
    pool: ThreadPool,
    queue: WeakQueue,
    on_done: Arc<dyn Fn() + Send + Sync>,
}

impl DataFetcher {
    fn run(mut self) {
        // Reserve a slot behind the reductions this row will trigger.
        let jumper = QueueJumper::new();
        self.pool
            .schedule_jumper(&jumper, REDUCE_PRIO, self.queue.clone());

        let tile_size = self.layer.tile_size;
        let line = self.layer.get_tile_line(self.row as i32);
        let tiles: Vec<Arc<Tile>> = line
            .iter()
            .map(|tile| {
                tile.initialize()
                    .or_else(|| tile.get_tile_sync())
                    .expect("layer tiles are never out of bounds")
            })
            .collect();
        let start = self.row * tile_size;
        let count = tile_size.min(self.layer.height - start);
        trace!("Fetching lines {start}..{} of layer {}", start + count, self.layer.depth);
        self.source.fill_tiles(start, count, tile_size, 0, &tiles);
        // Pages stay resident until every tile of the row has been reported.
        for tile in line {
            tile.report_finished();
        }
        drop(tiles);

        self.row += 1;
        if self.row < self.layer.vertical_tile_count() {
            let next = self.clone();
            if !jumper.set_work(move || next.run()) {
                let pool = self.pool.clone();
                let queue = self.queue.clone();
                pool.schedule(move || self.run(), DATAFETCH_PRIO, queue);
            }
        } else {
            debug!("Fetched all {} rows of layer {}", self.row, self.layer.depth);
            self.source.done();
            (self.on_done)();
        }
    }
}
