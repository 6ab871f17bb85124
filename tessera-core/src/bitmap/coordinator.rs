use std::fmt::{Debug, Formatter};
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::{debug, trace};

use super::tile::{CompressedTile, Tile};
use crate::ops::LayerOperations;
use crate::scheduler::{REDUCE_PRIO, ThreadPool, WeakQueue};

struct Progress {
    sources: usize,
    unfinished: usize,
    /// Keeps the target resident between reductions.
    target: Option<Arc<Tile>>,
}

/// Reduces up to 8x8 source tiles into one tile of the next layer.
///
/// Each source tile is linked to exactly one coordinator. When a source reports being
/// finished, a reduction job is scheduled; once every source is reduced, the target
/// reports being finished in turn, which feeds the coordinator above it.
pub struct LayerCoordinator {
    target: Arc<CompressedTile>,
    ops: Arc<dyn LayerOperations>,
    pool: ThreadPool,
    queue: WeakQueue,
    progress: Mutex<Progress>,
}

impl LayerCoordinator {
    /// A coordinator for `target`, reducing with `ops` (the source layer's operations)
    /// on `pool` while `queue` is alive.
    #[must_use]
    pub fn new(
        target: Arc<CompressedTile>,
        ops: Arc<dyn LayerOperations>,
        pool: &ThreadPool,
        queue: WeakQueue,
    ) -> Arc<Self> {
        Arc::new(Self {
            target,
            ops,
            pool: pool.clone(),
            queue,
            progress: Mutex::new(Progress {
                sources: 0,
                unfinished: 0,
                target: None,
            }),
        })
    }

    fn lock(&self) -> MutexGuard<'_, Progress> {
        self.progress.lock().expect("coordinator lock poisoned")
    }

    /// Registers `tile` as the source for block `(x, y)` of the target.
    pub fn add_source_tile(self: &Arc<Self>, x: u32, y: u32, tile: &Arc<CompressedTile>) {
        {
            let mut progress = self.lock();
            progress.sources += 1;
            progress.unfinished += 1;
        }
        tile.set_downstream(self, x, y);
    }

    #[must_use]
    pub fn target(&self) -> &Arc<CompressedTile> {
        &self.target
    }

    #[must_use]
    pub fn source_count(&self) -> usize {
        self.lock().sources
    }

    /// Number of sources not reduced yet.
    #[must_use]
    pub fn unfinished(&self) -> usize {
        self.lock().unfinished
    }

    pub(crate) fn source_finished(self: &Arc<Self>, source: Arc<CompressedTile>, x: u32, y: u32) {
        let coordinator = Arc::clone(self);
        self.pool.schedule(
            move || coordinator.reduce(&source, x, y),
            REDUCE_PRIO,
            self.queue.clone(),
        );
    }

    fn writable_target(&self) -> Arc<Tile> {
        if let Some(tile) = &self.lock().target {
            return Arc::clone(tile);
        }
        let tile = self
            .target
            .initialize()
            .or_else(|| self.target.get_tile_sync())
            .expect("coordinator target is never out of bounds");
        Arc::clone(self.lock().target.get_or_insert(tile))
    }

    fn reduce(&self, source: &CompressedTile, x: u32, y: u32) {
        let target = self.writable_target();
        let data = source
            .get_const_tile_sync()
            .expect("a finished source tile has data");
        self.ops.reduce(&target, &data, x, y);
        trace!("Reduced {} into {}", source.coord(), self.target.coord());
        drop(data);
        drop(target);

        let finished = {
            let mut progress = self.lock();
            assert!(
                progress.unfinished > 0,
                "more sources of {} finished than were added",
                self.target.coord()
            );
            progress.unfinished -= 1;
            (progress.unfinished == 0).then(|| progress.target.take())
        };
        if let Some(target) = finished {
            drop(target);
            debug!("All sources of tile {} reduced", self.target.coord());
            self.target.report_finished();
        }
    }
}

impl Debug for LayerCoordinator {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let progress = self.lock();
        f.debug_struct("LayerCoordinator")
            .field("target", &self.target.coord())
            .field("sources", &progress.sources)
            .field("unfinished", &progress.unfinished)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use tessera_tile_utils::{Rect, TileCoord};

    use super::*;
    use crate::bitmap::{ConstTile, TileInitialisationObserver, TileStatus};
    use crate::ops::{RenderCache, Surface};
    use crate::scheduler::{Queue, SchedulerContext};
    use crate::storage::BlobStore;

    /// Marks byte `y * 8 + x` of the target for every reduced source.
    #[derive(Debug, Default)]
    struct MarkingOps {
        reductions: AtomicUsize,
    }

    impl LayerOperations for MarkingOps {
        fn bpp(&self) -> u32 {
            8
        }

        fn cache(&self, _: &ConstTile) -> RenderCache {
            Arc::new(())
        }

        fn cache_zoom(&self, _: &ConstTile, _: i32, base: &RenderCache) -> RenderCache {
            Arc::clone(base)
        }

        fn draw(&self, _: &mut Surface, _: &ConstTile, _: Rect, _: Rect, _: i32, _: &RenderCache) {}

        fn reduce(&self, target: &Tile, _: &ConstTile, x: u32, y: u32) {
            target.data_mut()[(y * 8 + x) as usize] += 1;
            self.reductions.fetch_add(1, Ordering::SeqCst);
        }

        fn sum_samples(&self, _: &ConstTile, _: Rect) -> u64 {
            0
        }
    }

    #[derive(Default)]
    struct Finished(AtomicUsize);

    impl TileInitialisationObserver for Finished {
        fn tile_created(&self, _: &Arc<CompressedTile>) {}

        fn tile_finished(&self, _: &Arc<CompressedTile>) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn target_finishes_exactly_once() {
        let ctx = SchedulerContext::new(&crate::config::SchedulerConfig {
            cpu_threads: std::num::NonZeroUsize::new(4),
        })
        .unwrap();
        let store = BlobStore::default();
        let queue = Queue::create();
        let ops = Arc::new(MarkingOps::default());
        let target = CompressedTile::new(TileCoord::new(1, 0, 0), 8, 64, &store, &ctx);
        let finished = Arc::new(Finished::default());
        let observer: Arc<dyn TileInitialisationObserver> = finished.clone();
        let _registration = target.register_init_observer(&observer);

        let coordinator = LayerCoordinator::new(
            Arc::clone(&target),
            ops.clone(),
            ctx.cpu_bound(),
            queue.weak(),
        );
        let sources: Vec<_> = (0..64)
            .map(|i| {
                let tile = CompressedTile::new(TileCoord::new(0, i % 8, i / 8), 8, 64, &store, &ctx);
                coordinator.add_source_tile((i % 8) as u32, (i / 8) as u32, &tile);
                tile
            })
            .collect();
        assert_eq!(coordinator.source_count(), 64);
        assert_eq!(target.status(), TileStatus::Uninitialized);

        for i in 0..64 {
            let source = &sources[i * 37 % 64];
            drop(source.initialize());
            source.report_finished();
        }

        for _ in 0..500 {
            if finished.0.load(Ordering::SeqCst) > 0 {
                break;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(finished.0.load(Ordering::SeqCst), 1);
        assert_eq!(ops.reductions.load(Ordering::SeqCst), 64);
        assert_eq!(coordinator.unfinished(), 0);
        let data = target.get_const_tile_sync().unwrap();
        assert!(data.data()[..64].iter().all(|b| *b == 1));
        assert!(data.data()[64..].iter().all(|b| *b == 0));
    }

    #[test]
    fn dead_queue_stops_reduction() {
        let ctx = SchedulerContext::new(&crate::config::SchedulerConfig::default()).unwrap();
        let store = BlobStore::default();
        let queue = Queue::create();
        let ops = Arc::new(MarkingOps::default());
        let target = CompressedTile::new(TileCoord::new(1, 0, 0), 8, 64, &store, &ctx);
        let coordinator = LayerCoordinator::new(Arc::clone(&target), ops.clone(), ctx.cpu_bound(), queue.weak());
        let source = CompressedTile::new(TileCoord::new(0, 0, 0), 8, 64, &store, &ctx);
        coordinator.add_source_tile(0, 0, &source);
        assert!(Arc::ptr_eq(&source.downstream().unwrap().0, &coordinator));

        drop(queue);
        drop(source.initialize());
        source.report_finished();
        std::thread::sleep(Duration::from_millis(50));
        assert_eq!(ops.reductions.load(Ordering::SeqCst), 0);
        assert_eq!(coordinator.unfinished(), 1);
        assert_eq!(target.status(), TileStatus::Uninitialized);
    }
}
