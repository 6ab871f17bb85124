use std::fmt::{Debug, Formatter};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, RwLockReadGuard, RwLockWriteGuard, Weak};

use dashmap::DashMap;
use tessera_tile_utils::{TileCoord, stride, tile_bytes};
use tracing::trace;

use super::coordinator::LayerCoordinator;
use super::interfaces::{TileInitialisationObserver, TileLoadingObserver, ViewId};
use super::view_state::TileViewState;
use crate::registry::{Registration, Registry};
use crate::scheduler::{LOAD_PRIO, Queue, SchedulerContext};
use crate::storage::{Blob, BlobStore, ConstPage, Page};

/// What a tile can show right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TileStatus {
    /// No data was written yet.
    Uninitialized,
    /// Data exists but is not resident.
    Unloaded,
    /// Data is resident.
    Loaded,
    /// The tile lies outside its layer.
    OutOfBounds,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Uninitialized,
    Normal,
    OutOfBounds,
    LoadingSync,
    LoadingAsync,
}

struct StateSlot {
    state: State,
    load_queue: Weak<Queue>,
}

impl StateSlot {
    /// An asynchronous load whose queue died was cancelled.
    fn cleanup(&mut self) {
        if self.state == State::LoadingAsync && self.load_queue.strong_count() == 0 {
            self.state = State::Normal;
        }
    }
}

#[derive(Default)]
struct DataSlot {
    tile: Weak<Tile>,
    const_tile: Weak<ConstTile>,
}

struct Downstream {
    coordinator: Weak<LayerCoordinator>,
    x: u32,
    y: u32,
}

/// Writable pixels of a tile, row-major with [`Tile::stride`] bytes per row.
pub struct Tile {
    coord: TileCoord,
    size: u32,
    bpp: u32,
    page: Arc<Page>,
}

impl Tile {
    #[must_use]
    pub fn coord(&self) -> TileCoord {
        self.coord
    }

    /// Edge length in pixels.
    #[must_use]
    pub fn size(&self) -> u32 {
        self.size
    }

    #[must_use]
    pub fn bpp(&self) -> u32 {
        self.bpp
    }

    #[must_use]
    pub fn stride(&self) -> usize {
        stride(self.size, self.bpp)
    }

    pub fn data(&self) -> RwLockReadGuard<'_, Vec<u8>> {
        self.page.read()
    }

    pub fn data_mut(&self) -> RwLockWriteGuard<'_, Vec<u8>> {
        self.page.write()
    }
}

impl Debug for Tile {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tile")
            .field("coord", &self.coord)
            .field("size", &self.size)
            .field("bpp", &self.bpp)
            .finish_non_exhaustive()
    }
}

/// Read-only pixels of a tile.
pub struct ConstTile {
    coord: TileCoord,
    size: u32,
    bpp: u32,
    page: ConstPage,
}

impl ConstTile {
    #[must_use]
    pub fn coord(&self) -> TileCoord {
        self.coord
    }

    #[must_use]
    pub fn size(&self) -> u32 {
        self.size
    }

    #[must_use]
    pub fn bpp(&self) -> u32 {
        self.bpp
    }

    #[must_use]
    pub fn stride(&self) -> usize {
        stride(self.size, self.bpp)
    }

    pub fn data(&self) -> RwLockReadGuard<'_, Vec<u8>> {
        self.page.read()
    }
}

impl Debug for ConstTile {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConstTile")
            .field("coord", &self.coord)
            .field("size", &self.size)
            .field("bpp", &self.bpp)
            .finish_non_exhaustive()
    }
}

/// One tile of the pyramid, compressed while nobody looks at it.
///
/// A tile starts out uninitialised and owns no memory. [`CompressedTile::initialize`]
/// gives it zero-filled data; from then on its pixels can be loaded synchronously with
/// [`CompressedTile::get_tile_sync`] and [`CompressedTile::get_const_tile_sync`], or in
/// the background by registering a [`TileLoadingObserver`].
pub struct CompressedTile {
    coord: TileCoord,
    size: u32,
    bpp: u32,
    blob: Arc<Blob>,
    ctx: SchedulerContext,
    state: Mutex<StateSlot>,
    data: Mutex<DataSlot>,
    init_observers: Registry<dyn TileInitialisationObserver>,
    load_observers: Registry<dyn TileLoadingObserver>,
    view_states: DashMap<ViewId, Weak<TileViewState>>,
    downstream: OnceLock<Downstream>,
}

impl CompressedTile {
    #[must_use]
    pub fn new(
        coord: TileCoord,
        bpp: u32,
        size: u32,
        store: &BlobStore,
        ctx: &SchedulerContext,
    ) -> Arc<Self> {
        Self::with_state(coord, bpp, size, store.allocate(tile_bytes(size, bpp)), ctx, State::Uninitialized)
    }

    /// The shared placeholder for all positions outside a layer of depth `depth`.
    #[must_use]
    pub fn out_of_bounds(
        depth: u32,
        bpp: u32,
        size: u32,
        store: &BlobStore,
        ctx: &SchedulerContext,
    ) -> Arc<Self> {
        Self::with_state(
            TileCoord::new(depth, -1, -1),
            bpp,
            size,
            store.allocate(0),
            ctx,
            State::OutOfBounds,
        )
    }

    fn with_state(
        coord: TileCoord,
        bpp: u32,
        size: u32,
        blob: Arc<Blob>,
        ctx: &SchedulerContext,
        state: State,
    ) -> Arc<Self> {
        Arc::new(Self {
            coord,
            size,
            bpp,
            blob,
            ctx: ctx.clone(),
            state: Mutex::new(StateSlot {
                state,
                load_queue: Weak::new(),
            }),
            data: Mutex::default(),
            init_observers: Registry::new(),
            load_observers: Registry::new(),
            view_states: DashMap::new(),
            downstream: OnceLock::new(),
        })
    }

    #[must_use]
    pub fn coord(&self) -> TileCoord {
        self.coord
    }

    #[must_use]
    pub fn size(&self) -> u32 {
        self.size
    }

    #[must_use]
    pub fn bpp(&self) -> u32 {
        self.bpp
    }

    fn lock_state(&self) -> MutexGuard<'_, StateSlot> {
        self.state.lock().expect("tile state lock poisoned")
    }

    fn lock_data(&self) -> MutexGuard<'_, DataSlot> {
        self.data.lock().expect("tile data lock poisoned")
    }

    fn has_data(&self) -> bool {
        !matches!(
            self.lock_state().state,
            State::Uninitialized | State::OutOfBounds
        )
    }

    #[must_use]
    pub fn status(&self) -> TileStatus {
        let state = self.lock_state().state;
        match state {
            State::Uninitialized => TileStatus::Uninitialized,
            State::OutOfBounds => TileStatus::OutOfBounds,
            _ if self.get_const_tile_async().is_some() => TileStatus::Loaded,
            _ => TileStatus::Unloaded,
        }
    }

    /// Gives the tile zero-filled data.
    ///
    /// Only the call that actually initialises the tile gets it back; all others,
    /// including any call on an out-of-bounds tile, return `None`.
    pub fn initialize(&self) -> Option<Arc<Tile>> {
        let page = {
            let mut slot = self.lock_state();
            if slot.state != State::Uninitialized {
                return None;
            }
            slot.state = State::Normal;
            self.blob.initialize(0)
        };
        trace!("Initialized tile {}", self.coord);
        Some(self.writable(page))
    }

    fn writable(&self, page: Arc<Page>) -> Arc<Tile> {
        let mut data = self.lock_data();
        if let Some(tile) = data.tile.upgrade() {
            return tile;
        }
        let tile = Arc::new(Tile {
            coord: self.coord,
            size: self.size,
            bpp: self.bpp,
            page,
        });
        data.tile = Arc::downgrade(&tile);
        tile
    }

    /// Writable data of an initialised tile, loading it if needed.
    pub fn get_tile_sync(&self) -> Option<Arc<Tile>> {
        if let Some(tile) = self.lock_data().tile.upgrade() {
            return Some(tile);
        }
        if !self.has_data() {
            return None;
        }
        Some(self.writable(self.blob.get()))
    }

    /// Read-only data of an initialised tile, loading it if needed.
    pub fn get_const_tile_sync(&self) -> Option<Arc<ConstTile>> {
        if let Some(tile) = self.get_const_tile_async() {
            return Some(tile);
        }
        if !self.has_data() {
            return None;
        }
        Some(self.do_load())
    }

    /// Read-only data if it is resident. Never loads.
    #[must_use]
    pub fn get_const_tile_async(&self) -> Option<Arc<ConstTile>> {
        self.lock_data().const_tile.upgrade()
    }

    /// Makes the const tile resident. The flag tells whether this call loaded it.
    fn load(&self) -> (Arc<ConstTile>, bool) {
        {
            let mut slot = self.lock_state();
            slot.cleanup();
            slot.state = State::LoadingSync;
        }
        let result = {
            let mut data = self.lock_data();
            match data.const_tile.upgrade() {
                Some(tile) => (tile, false),
                None => {
                    let tile = Arc::new(ConstTile {
                        coord: self.coord,
                        size: self.size,
                        bpp: self.bpp,
                        page: self.blob.get_const(),
                    });
                    data.const_tile = Arc::downgrade(&tile);
                    (tile, true)
                }
            }
        };
        self.lock_state().state = State::Normal;
        result
    }

    fn do_load(&self) -> Arc<ConstTile> {
        let (tile, loaded) = self.load();
        if loaded {
            trace!("Loaded tile {}", self.coord);
            self.notify_loaded(&tile);
        }
        tile
    }

    fn notify_loaded(&self, tile: &Arc<ConstTile>) {
        for observer in self.load_observers.snapshot() {
            observer.tile_loaded(tile);
        }
    }

    /// Announces that the data of this tile is complete.
    ///
    /// Init observers get `tile_finished`, load observers the final data, and the
    /// downstream coordinator, if any, schedules the reduction of this tile.
    ///
    /// # Panics
    ///
    /// If the tile was never initialised.
    pub fn report_finished(self: &Arc<Self>) {
        assert!(
            self.has_data(),
            "tile {} finished without being initialized",
            self.coord
        );
        let (tile, _) = self.load();
        for observer in self.init_observers.snapshot() {
            observer.tile_finished(self);
        }
        self.notify_loaded(&tile);
        if let Some(downstream) = self.downstream.get()
            && let Some(coordinator) = downstream.coordinator.upgrade()
        {
            coordinator.source_finished(Arc::clone(self), downstream.x, downstream.y);
        }
    }

    /// Subscribes to `tile_created` (fired right away) and `tile_finished`.
    pub fn register_init_observer(
        self: &Arc<Self>,
        observer: &Arc<dyn TileInitialisationObserver>,
    ) -> Registration {
        let registration = self.init_observers.register(observer);
        observer.tile_created(self);
        registration
    }

    /// Subscribes to data updates of this tile.
    ///
    /// If the data is resident, `observer` is notified right away. Otherwise a background
    /// load is started, which stays scheduled only while a registration that asked for
    /// it is alive.
    pub fn register_load_observer(
        self: &Arc<Self>,
        observer: &Arc<dyn TileLoadingObserver>,
    ) -> Registration {
        let mut registration = self.load_observers.register(observer);
        if let Some(tile) = self.get_const_tile_async() {
            observer.tile_loaded(&tile);
            return registration;
        }

        let mut slot = self.lock_state();
        slot.cleanup();
        match slot.state {
            State::Normal => {
                let queue = self.ctx.async_queue();
                slot.state = State::LoadingAsync;
                slot.load_queue = Arc::downgrade(&queue);
                let tile = Arc::clone(self);
                self.ctx.cpu_bound().schedule(
                    move || {
                        tile.do_load();
                    },
                    LOAD_PRIO,
                    queue.weak(),
                );
                trace!("Scheduled load of tile {}", self.coord);
                registration.attach(queue);
            }
            State::LoadingAsync => {
                if let Some(queue) = slot.load_queue.upgrade() {
                    registration.attach(queue);
                }
            }
            State::Uninitialized | State::OutOfBounds | State::LoadingSync => {}
        }
        drop(slot);
        registration
    }

    /// The state of this tile in view `view`, created on first use.
    pub fn view_state(self: &Arc<Self>, view: ViewId) -> Arc<TileViewState> {
        let mut entry = self.view_states.entry(view).or_default();
        if let Some(state) = entry.upgrade() {
            return state;
        }
        let state = TileViewState::new(self, &self.ctx);
        *entry = Arc::downgrade(&state);
        state
    }

    /// Forgets the state of this tile in view `view`.
    pub fn close(&self, view: ViewId) {
        self.view_states.remove(&view);
    }

    /// Links this tile to the coordinator that reduces it into block `(x, y)` of its target.
    ///
    /// # Panics
    ///
    /// If the tile already has a downstream coordinator.
    pub fn set_downstream(&self, coordinator: &Arc<LayerCoordinator>, x: u32, y: u32) {
        let linked = self.downstream.set(Downstream {
            coordinator: Arc::downgrade(coordinator),
            x,
            y,
        });
        assert!(
            linked.is_ok(),
            "tile {} already has a downstream coordinator",
            self.coord
        );
    }

    /// The coordinator this tile feeds and its block offset there.
    #[must_use]
    pub fn downstream(&self) -> Option<(Arc<LayerCoordinator>, u32, u32)> {
        let downstream = self.downstream.get()?;
        Some((downstream.coordinator.upgrade()?, downstream.x, downstream.y))
    }
}

impl Debug for CompressedTile {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompressedTile")
            .field("coord", &self.coord)
            .field("status", &self.status())
            .finish_non_exhaustive()
    }
}
