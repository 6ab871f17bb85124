use std::collections::HashMap;
use std::fmt::{Debug, Formatter};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use tessera_tile_utils::{TileCoord, TileRange};

use super::interfaces::{TileLoadingObserver, ViewId, ViewInterface};
use super::layer::Layer;
use super::tile::ConstTile;
use super::view_state::{TileViewState, ViewState};
use crate::ops::LayerOperations;
use crate::registry::Registration;

/// Keeps a tile's view state alive while it is needed. Releasing it drops the caches.
struct Lease {
    state: Arc<TileViewState>,
    _registration: Registration,
}

impl Drop for Lease {
    fn drop(&mut self) {
        self.state.clear();
    }
}

struct Needed {
    range: Option<TileRange>,
    zoom: i32,
    leases: HashMap<TileCoord, Lease>,
}

/// What one view of a bitmap currently needs.
pub struct TiledBitmapViewData {
    id: ViewId,
    view: Arc<dyn ViewInterface>,
    needed: Mutex<Needed>,
    redraw_pending: AtomicBool,
}

impl TiledBitmapViewData {
    pub(crate) fn new(id: ViewId, view: Arc<dyn ViewInterface>) -> Arc<Self> {
        Arc::new(Self {
            id,
            view,
            needed: Mutex::new(Needed {
                range: None,
                zoom: 0,
                leases: HashMap::new(),
            }),
            redraw_pending: AtomicBool::new(false),
        })
    }

    fn lock(&self) -> MutexGuard<'_, Needed> {
        self.needed.lock().expect("view data lock poisoned")
    }

    #[must_use]
    pub fn id(&self) -> ViewId {
        self.id
    }

    /// The tiles requested by the last [`set_needed_tiles`](Self::set_needed_tiles) that changed anything.
    #[must_use]
    pub fn needed_range(&self) -> Option<TileRange> {
        self.lock().range
    }

    /// Number of tiles this view keeps caches for.
    #[must_use]
    pub fn lease_count(&self) -> usize {
        self.lock().leases.len()
    }

    /// Checks that tiles were requested and all their caches are ready to draw.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        let needed = self.lock();
        needed.range.is_some()
            && needed
                .leases
                .values()
                .all(|lease| lease.state.state() == ViewState::Done)
    }

    /// Requests caches at `zoom` for the tiles of `range` in `layer`, releasing all others.
    ///
    /// Nothing changes if the zoom level is the same and `range` lies within the tiles
    /// already requested.
    pub fn set_needed_tiles(
        self: &Arc<Self>,
        layer: &Layer,
        range: TileRange,
        ops: &Arc<dyn LayerOperations>,
        zoom: i32,
    ) {
        let released = {
            let mut needed = self.lock();
            if needed.zoom == zoom && needed.range.is_some_and(|r| r.contains(&range)) {
                return;
            }
            let observer: Arc<dyn TileLoadingObserver> = self.clone();
            let mut previous = std::mem::take(&mut needed.leases);
            for (i, j) in range.iter() {
                let tile = layer.get_tile(i, j);
                let coord = TileCoord::new(range.depth, i, j);
                if tile.coord() != coord {
                    continue;
                }
                let lease = previous.remove(&coord).unwrap_or_else(|| {
                    let state = tile.view_state(self.id);
                    let registration = state.register_observer(&observer);
                    Lease {
                        state,
                        _registration: registration,
                    }
                });
                lease.state.set_zoom(ops, zoom);
                needed.leases.insert(coord, lease);
            }
            needed.range = Some(range);
            needed.zoom = zoom;
            previous
        };
        drop(released);
    }

    /// Releases every tile.
    pub fn clear(&self) {
        let released = {
            let mut needed = self.lock();
            needed.range = None;
            std::mem::take(&mut needed.leases)
        };
        drop(released);
    }

    /// Allows the next ready tile to invalidate the view again.
    pub fn redraw_started(&self) {
        self.redraw_pending.store(false, Ordering::SeqCst);
    }
}

impl TileLoadingObserver for TiledBitmapViewData {
    fn tile_loaded(&self, _tile: &Arc<ConstTile>) {
        if !self.redraw_pending.swap(true, Ordering::SeqCst) {
            self.view.invalidate();
        }
    }
}

impl Debug for TiledBitmapViewData {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let needed = self.lock();
        f.debug_struct("TiledBitmapViewData")
            .field("id", &self.id)
            .field("range", &needed.range)
            .field("zoom", &needed.zoom)
            .field("leases", &needed.leases.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use super::*;
    use crate::bitmap::{CompressedTile, Tile, ViewState};
    use crate::ops::GreyOperations;
    use crate::scheduler::{SchedulerContext, ThreadPool};
    use crate::storage::BlobStore;

    #[derive(Default)]
    struct Invalidations(AtomicUsize);

    impl ViewInterface for Invalidations {
        fn invalidate(&self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn setup() -> (Arc<Layer>, Arc<TiledBitmapViewData>, Arc<Invalidations>) {
        let ctx = SchedulerContext::with_pools(
            ThreadPool::new("cpu", 0).unwrap(),
            ThreadPool::new("seq", 0).unwrap(),
            ThreadPool::new("reaper", 1).unwrap(),
        );
        let layer = Layer::new(&ctx, &BlobStore::default(), 0, 256, 256, 8, 64, None);
        let view = Arc::new(Invalidations::default());
        let data = TiledBitmapViewData::new(ViewId(0), view.clone());
        (layer, data, view)
    }

    fn ops() -> Arc<dyn LayerOperations> {
        Arc::new(GreyOperations::new(8).unwrap())
    }

    #[test]
    fn leases_follow_the_window() {
        let (layer, data, _) = setup();
        let ops = ops();
        data.set_needed_tiles(&layer, TileRange::new(0, 0, 0, 1, 1), &ops, 0);
        assert_eq!(data.lease_count(), 4);
        let kept = layer.get_tile(1, 1).view_state(ViewId(0));
        assert_eq!(kept.desired_state(), ViewState::Done);

        // A smaller window at the same zoom keeps everything.
        data.set_needed_tiles(&layer, TileRange::new(0, 1, 1, 1, 1), &ops, 0);
        assert_eq!(data.lease_count(), 4);

        let released = layer.get_tile(0, 0).view_state(ViewId(0));
        data.set_needed_tiles(&layer, TileRange::new(0, 1, 1, 2, 2), &ops, 0);
        assert_eq!(data.lease_count(), 4);
        assert_eq!(released.desired_state(), ViewState::Loaded);
        assert_eq!(kept.desired_state(), ViewState::Done);
        assert_eq!(data.needed_range(), Some(TileRange::new(0, 1, 1, 2, 2)));
    }

    #[test]
    fn out_of_layer_positions_are_skipped() {
        let (layer, data, _) = setup();
        data.set_needed_tiles(&layer, TileRange::new(0, -1, -1, 0, 0), &ops(), -1);
        assert_eq!(data.lease_count(), 1);
        data.clear();
        assert_eq!(data.lease_count(), 0);
        assert_eq!(data.needed_range(), None);
    }

    #[test]
    fn one_invalidation_per_redraw() {
        let (_, data, view) = setup();
        let ctx = SchedulerContext::with_pools(
            ThreadPool::new("cpu", 0).unwrap(),
            ThreadPool::new("seq", 0).unwrap(),
            ThreadPool::new("reaper", 0).unwrap(),
        );
        let tile = CompressedTile::new(TileCoord::new(0, 0, 0), 8, 64, &BlobStore::default(), &ctx);
        let _writable: Option<Arc<Tile>> = tile.initialize();
        let loaded = tile.get_const_tile_sync().unwrap();
        data.tile_loaded(&loaded);
        data.tile_loaded(&loaded);
        assert_eq!(view.0.load(Ordering::SeqCst), 1);
        data.redraw_started();
        data.tile_loaded(&loaded);
        assert_eq!(view.0.load(Ordering::SeqCst), 2);
    }
}
