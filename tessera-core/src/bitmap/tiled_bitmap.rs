use std::fmt::{Debug, Formatter};
use std::ops::RangeInclusive;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use flume::{RecvError, RecvTimeoutError};
use tessera_tile_utils::{
    MAX_ZOOM, REDUCTION, Rect, TileRange, ZOOM_STEPS_PER_LAYER, is_valid_tile_size, reduced_len,
};
use tracing::{debug, info, warn};

use super::coordinator::LayerCoordinator;
use super::interfaces::{
    ProgressInterface, SourcePresentation, TileInitialisationObserver, ViewId, ViewInterface,
};
use super::layer::Layer;
use super::progress::{LoadProgress, LoadSignal};
use super::tile::TileStatus;
use super::view_data::TiledBitmapViewData;
use crate::config::PyramidConfig;
use crate::ops::{LayerOperations, Surface};
use crate::scheduler::{PRIO_NORMAL, Queue, SchedulerContext, ThreadPool, WeakQueue};
use crate::storage::BlobStore;
use crate::{TesseraCoreError, TesseraCoreResult};

/// Operations per layer, starting at depth 0. The last entry applies to all higher layers.
pub type LayerSpec = Vec<Arc<dyn LayerOperations>>;

/// How a load ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadOutcome {
    /// Every tile of the pyramid is finished.
    Completed,
    Cancelled,
}

/// A running load started by [`TiledBitmap::set_source`]. Dropping it cancels the load.
pub struct LoadHandle {
    queue: Option<Arc<Queue>>,
    signal: flume::Sender<LoadSignal>,
    outcome: flume::Receiver<LoadOutcome>,
    result: OnceLock<LoadOutcome>,
    progress: Arc<LoadProgress>,
}

impl LoadHandle {
    fn received(&self, outcome: Result<LoadOutcome, RecvTimeoutError>) -> Option<LoadOutcome> {
        match outcome {
            Ok(outcome) => Some(*self.result.get_or_init(|| outcome)),
            Err(RecvTimeoutError::Disconnected) => {
                Some(*self.result.get_or_init(|| LoadOutcome::Cancelled))
            }
            Err(RecvTimeoutError::Timeout) => None,
        }
    }

    /// Blocks until the load has ended.
    pub fn wait(&self) -> LoadOutcome {
        if let Some(outcome) = self.result.get() {
            return *outcome;
        }
        let outcome = self
            .outcome
            .recv()
            .map_err(|RecvError::Disconnected| RecvTimeoutError::Disconnected);
        self.received(outcome).unwrap_or(LoadOutcome::Cancelled)
    }

    /// Blocks until the load has ended or `timeout` has passed.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<LoadOutcome> {
        if let Some(outcome) = self.result.get() {
            return Some(*outcome);
        }
        self.received(self.outcome.recv_timeout(timeout))
    }

    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.wait_timeout(Duration::ZERO).is_some()
    }

    /// Stops the load. Tiles finished so far keep their data.
    pub fn cancel(self) {}
}

impl Drop for LoadHandle {
    fn drop(&mut self) {
        let completed = self.result.get() == Some(&LoadOutcome::Completed)
            || self.outcome.try_recv() == Ok(LoadOutcome::Completed)
            || self.progress.is_complete();
        if !completed {
            debug!("Cancelling load");
            let _ = self.signal.send(LoadSignal::Cancelled);
            self.progress.set_idle();
        }
        drop(self.queue.take());
    }
}

impl Debug for LoadHandle {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoadHandle")
            .field("result", &self.result.get())
            .finish_non_exhaustive()
    }
}

/// Picks the layer to draw `zoom` from and the zoom level remaining within that layer.
fn select_layer(layer_count: usize, zoom: i32) -> (usize, i32) {
    let mut depth = 0;
    let mut zoom = zoom;
    while zoom <= -ZOOM_STEPS_PER_LAYER && depth + 1 < layer_count {
        depth += 1;
        zoom += ZOOM_STEPS_PER_LAYER;
    }
    (depth, zoom)
}

/// Links every tile of `source` to the coordinator of the `target` tile it is reduced into.
fn connect(
    source: &Layer,
    ops: &Arc<dyn LayerOperations>,
    target: &Layer,
    pool: &ThreadPool,
    queue: &WeakQueue,
) -> Vec<Arc<LayerCoordinator>> {
    let mut coordinators = Vec::new();
    let mut row: Vec<Arc<LayerCoordinator>> = Vec::new();
    for j in 0..source.vertical_tile_count() {
        if j % REDUCTION == 0 {
            row = target
                .get_tile_line((j / REDUCTION) as i32)
                .iter()
                .map(|tile| {
                    LayerCoordinator::new(Arc::clone(tile), Arc::clone(ops), pool, queue.clone())
                })
                .collect();
            coordinators.extend(row.iter().cloned());
        }
        for (i, tile) in source.get_tile_line(j as i32).iter().enumerate() {
            let i = i as u32;
            row[(i / REDUCTION) as usize].add_source_tile(i % REDUCTION, j % REDUCTION, tile);
        }
    }
    coordinators
}

/// A bitmap of arbitrary size, stored as a pyramid of compressed tiles.
pub struct TiledBitmap {
    width: u32,
    height: u32,
    tile_size: u32,
    ctx: SchedulerContext,
    spec: LayerSpec,
    layers: Vec<Arc<Layer>>,
    coordinators: Vec<Arc<LayerCoordinator>>,
    progress: Arc<LoadProgress>,
    /// Owns all reduction work.
    _build_queue: Arc<Queue>,
    load: Mutex<Option<flume::Sender<LoadSignal>>>,
    views: DashMap<ViewId, Arc<TiledBitmapViewData>>,
    next_view: AtomicU64,
}

impl TiledBitmap {
    /// Creates the empty pyramid of a `width` x `height` bitmap.
    ///
    /// Layers are added, each 8 times smaller than the previous one, until one fits
    /// in a single tile.
    pub fn new(
        ctx: &SchedulerContext,
        store: &BlobStore,
        config: &PyramidConfig,
        width: u32,
        height: u32,
        spec: LayerSpec,
        progress: Option<Arc<dyn ProgressInterface>>,
    ) -> TesseraCoreResult<Arc<Self>> {
        if width == 0 || height == 0 {
            return Err(TesseraCoreError::InvalidDimensions { width, height });
        }
        let tile_size = config.tile_size();
        if !is_valid_tile_size(tile_size) {
            return Err(TesseraCoreError::InvalidTileSize(tile_size));
        }
        let last = spec
            .len()
            .checked_sub(1)
            .ok_or(TesseraCoreError::EmptyLayerSpec)?;
        if let Some(ops) = spec
            .iter()
            .find(|ops| !matches!(ops.bpp(), 1 | 2 | 4 | 8 | 16 | 24 | 32))
        {
            return Err(TesseraCoreError::UnsupportedBpp(ops.bpp()));
        }

        let progress = Arc::new(LoadProgress::new(progress));
        let observer: Arc<dyn TileInitialisationObserver> = progress.clone();
        let build_queue = ctx.async_queue();
        let mut layers: Vec<Arc<Layer>> = Vec::new();
        let mut coordinators = Vec::new();
        let (mut w, mut h) = (width, height);
        loop {
            let depth = layers.len();
            let ops = &spec[depth.min(last)];
            let layer = Layer::new(
                ctx,
                store,
                depth as u32,
                w,
                h,
                ops.bpp(),
                tile_size,
                Some(&observer),
            );
            if let Some(previous) = layers.last() {
                coordinators.extend(connect(
                    previous,
                    &spec[(depth - 1).min(last)],
                    &layer,
                    ctx.cpu_bound(),
                    &build_queue.weak(),
                ));
            }
            layers.push(layer);
            if w.max(h) <= tile_size {
                break;
            }
            w = reduced_len(w);
            h = reduced_len(h);
        }
        info!(
            "Created pyramid for a {width}x{height} bitmap: {} layers, {} tiles",
            layers.len(),
            progress.total()
        );

        Ok(Arc::new(Self {
            width,
            height,
            tile_size,
            ctx: ctx.clone(),
            spec,
            layers,
            coordinators,
            progress,
            _build_queue: build_queue,
            load: Mutex::default(),
            views: DashMap::new(),
            next_view: AtomicU64::new(0),
        }))
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
    pub fn tile_size(&self) -> u32 {
        self.tile_size
    }

    #[must_use]
    pub fn layer_count(&self) -> usize {
        self.layers.len()
    }

    #[must_use]
    pub fn layer(&self, depth: usize) -> Option<&Arc<Layer>> {
        self.layers.get(depth)
    }

    /// The operations used for the layer at `depth`.
    #[must_use]
    pub fn operations(&self, depth: usize) -> &Arc<dyn LayerOperations> {
        &self.spec[depth.min(self.spec.len() - 1)]
    }

    /// Zoom levels [`TiledBitmap::redraw`] supports. At the lowest one, a tile of the
    /// deepest layer covers at most two view pixels.
    #[must_use]
    pub fn zoom_range(&self) -> RangeInclusive<i32> {
        let depth = ZOOM_STEPS_PER_LAYER * (self.layers.len() as i32 - 1);
        -(depth + self.tile_size.ilog2() as i32)..=MAX_ZOOM
    }

    #[must_use]
    pub fn coordinators(&self) -> &[Arc<LayerCoordinator>] {
        &self.coordinators
    }

    #[must_use]
    pub fn progress(&self) -> &Arc<LoadProgress> {
        &self.progress
    }

    /// Starts filling the pyramid from `source`.
    ///
    /// The load runs on the sequential pool. It is cancelled when the returned handle is
    /// dropped, or when the bitmap is.
    pub fn set_source(&self, source: Arc<dyn SourcePresentation>) -> TesseraCoreResult<LoadHandle> {
        let (signal, signals) = flume::unbounded();
        {
            let mut load = self.load.lock().expect("load lock poisoned");
            if load.is_some() {
                return Err(TesseraCoreError::SourceAlreadySet);
            }
            *load = Some(signal.clone());
        }
        self.progress.listen(signal.clone());
        self.progress.set_waiting();

        let (outcome_tx, outcome) = flume::bounded(1);
        let queue = self.ctx.async_queue();
        let fetch_queue = queue.weak();
        let layer = Arc::clone(&self.layers[0]);
        let pool = self.ctx.cpu_bound().clone();
        self.ctx.sequential().schedule(
            move || {
                info!("Loading {}x{} bitmap", layer.width(), layer.height());
                let start = Instant::now();
                layer.fetch_data(source, &pool, fetch_queue, || {
                    debug!("All source rows fetched");
                });
                let result = match signals.recv() {
                    Ok(LoadSignal::Finished) => {
                        info!("Loaded bitmap in {:.1?}", start.elapsed());
                        LoadOutcome::Completed
                    }
                    Ok(LoadSignal::Cancelled) | Err(_) => {
                        info!("Load cancelled after {:.1?}", start.elapsed());
                        LoadOutcome::Cancelled
                    }
                };
                let _ = outcome_tx.send(result);
            },
            PRIO_NORMAL,
            queue.weak(),
        );

        Ok(LoadHandle {
            queue: Some(queue),
            signal,
            outcome,
            result: OnceLock::new(),
            progress: Arc::clone(&self.progress),
        })
    }

    /// Registers a view. It is invalidated whenever tiles it needs become drawable.
    pub fn open(&self, view: Arc<dyn ViewInterface>) -> ViewId {
        let id = ViewId(self.next_view.fetch_add(1, Ordering::Relaxed));
        self.views.insert(id, TiledBitmapViewData::new(id, view));
        debug!("Opened {id}");
        id
    }

    /// Forgets a view and releases its caches.
    pub fn close(&self, view: ViewId) {
        if let Some((_, data)) = self.views.remove(&view) {
            data.clear();
        }
        for layer in &self.layers {
            layer.close(view);
        }
        debug!("Closed {view}");
    }

    #[must_use]
    pub fn view_data(&self, view: ViewId) -> Option<Arc<TiledBitmapViewData>> {
        self.views.get(&view).map(|data| Arc::clone(data.value()))
    }

    /// Draws `presentation_area` (bitmap pixels) at `zoom` onto `surface`.
    ///
    /// At zoom level `z` one bitmap pixel covers `2^z` surface pixels along each axis.
    /// `zoom` is clamped to [`TiledBitmap::zoom_range`]. Tiles whose caches are not ready
    /// are drawn as placeholders; the view is invalidated once they are.
    pub fn redraw(&self, view: ViewId, surface: &mut Surface, presentation_area: Rect, zoom: i32) {
        let Some(view_data) = self.view_data(view) else {
            warn!("Ignoring redraw of unknown {view}");
            return;
        };
        view_data.redraw_started();
        let zoom = {
            let range = self.zoom_range();
            zoom.clamp(*range.start(), *range.end())
        };

        let (depth, layer_zoom) = select_layer(self.layers.len(), zoom);
        let layer = &self.layers[depth];
        let ops = self.operations(depth);
        let scale = ZOOM_STEPS_PER_LAYER * depth as i32;
        let to_view = |area: Rect| {
            area.translated(-presentation_area.x, -presentation_area.y)
                .zoomed(zoom)
        };

        let bitmap = Rect::from_size(self.width, self.height);
        for outside in presentation_area.subtract(&bitmap).into_iter().flatten() {
            ops.draw_state(surface, TileStatus::OutOfBounds, to_view(outside));
        }

        let visible = presentation_area
            .zoomed(-scale)
            .intersection(&Rect::from_size(layer.width(), layer.height()));
        let Some(range) = TileRange::covering(depth as u32, &visible, self.tile_size) else {
            view_data.clear();
            return;
        };
        view_data.set_needed_tiles(layer, range, ops, layer_zoom);

        let ts = self.tile_size as i32;
        for (i, j) in range.iter() {
            let tile = layer.get_tile(i, j);
            let tile_rect = Rect::new(i * ts, j * ts, ts, ts);
            let part = tile_rect.intersection(&visible);
            let tile_area = part.translated(-tile_rect.x, -tile_rect.y);
            let view_area = to_view(part.zoomed(scale));
            let cache = tile.view_state(view).cache_result();
            match (tile.get_const_tile_async(), cache) {
                (Some(data), Some(cache)) => {
                    ops.draw(surface, &data, tile_area, view_area, layer_zoom, &cache);
                }
                _ => ops.draw_state(surface, tile.status(), view_area),
            }
        }
    }

    /// Average raw sample value of the full resolution pixels in `area`.
    ///
    /// Only tiles with data count. Returns `None` if there are none.
    #[must_use]
    pub fn pixel_average(&self, area: Rect) -> Option<f64> {
        let area = area.intersection(&Rect::from_size(self.width, self.height));
        let range = TileRange::covering(0, &area, self.tile_size)?;
        let layer = &self.layers[0];
        let ops = self.operations(0);
        let ts = self.tile_size as i32;
        let mut sum = 0_u64;
        let mut count = 0_u64;
        for (i, j) in range.iter() {
            let Some(data) = layer.get_tile(i, j).get_const_tile_sync() else {
                continue;
            };
            let part = Rect::new(i * ts, j * ts, ts, ts)
                .intersection(&area)
                .translated(-i * ts, -j * ts);
            sum += ops.sum_samples(&data, part);
            count += part.area();
        }
        (count > 0).then(|| sum as f64 / count as f64)
    }
}

impl Drop for TiledBitmap {
    fn drop(&mut self) {
        if let Some(signal) = self.load.get_mut().ok().and_then(Option::take) {
            let _ = signal.send(LoadSignal::Cancelled);
        }
    }
}

impl Debug for TiledBitmap {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TiledBitmap")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("tile_size", &self.tile_size)
            .field("layers", &self.layers.len())
            .field("progress", &self.progress)
            .finish_non_exhaustive()
    }
}
