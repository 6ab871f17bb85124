use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use approx::assert_relative_eq;
use pretty_assertions::assert_eq;
use tessera_core::bitmap::{
    Layer, LoadOutcome, ProgressInterface, SourcePresentation, Tile, TileStatus, TiledBitmap,
    ViewInterface,
};
use tessera_core::config::{PyramidConfig, SchedulerConfig};
use tessera_core::ops::{
    GreyOperations, LayerOperations, OUT_OF_BOUNDS_COLOR, Surface, UNLOADED_COLOR, grey,
};
use tessera_core::scheduler::{Queue, SchedulerContext, ThreadPool};
use tessera_core::TesseraCoreError;
use tessera_core::storage::BlobStore;
use tessera_tile_utils::{Rect, TILESIZE, get_sample, set_sample};

const TIMEOUT: Duration = Duration::from_secs(30);

/// An 8 bpp image: 200 left of `split`, 40 right of it.
struct Split {
    width: u32,
    split: u32,
    rows: AtomicUsize,
}

impl SourcePresentation for Split {
    fn fill_tiles(&self, _start: u32, lines: u32, tile_width: u32, first: u32, tiles: &[Arc<Tile>]) {
        for (k, tile) in tiles.iter().enumerate() {
            let stride = tile.stride();
            let mut data = tile.data_mut();
            let left = (first + k as u32) * tile_width;
            for row in 0..lines as usize {
                for c in 0..tile_width {
                    let x = left + c;
                    if x < self.width {
                        data[row * stride + c as usize] = if x < self.split { 200 } else { 40 };
                    }
                }
            }
        }
        self.rows.fetch_add(1, Ordering::SeqCst);
    }
}

/// A 1 bpp checkerboard of 1 pixel squares, with (0, 0) set.
struct Checkerboard {
    width: u32,
}

impl SourcePresentation for Checkerboard {
    fn fill_tiles(&self, start: u32, lines: u32, tile_width: u32, first: u32, tiles: &[Arc<Tile>]) {
        for (k, tile) in tiles.iter().enumerate() {
            let stride = tile.stride();
            let mut data = tile.data_mut();
            let left = (first + k as u32) * tile_width;
            for row in 0..lines {
                let y = start + row;
                let line = &mut data[row as usize * stride..][..stride];
                for c in (0..tile_width).filter(|c| left + c < self.width) {
                    set_sample(line, c as usize, 1, u32::from((left + c + y) % 2 == 0));
                }
            }
        }
    }
}

/// Never returns from a fill until released.
struct Gate(flume::Receiver<()>);

impl SourcePresentation for Gate {
    fn fill_tiles(&self, _: u32, _: u32, _: u32, _: u32, _: &[Arc<Tile>]) {
        let _ = self.0.recv();
    }
}

#[derive(Default)]
struct Recorder(Mutex<Vec<String>>);

impl ProgressInterface for Recorder {
    fn set_idle(&self) {
        self.0.lock().unwrap().push("idle".to_string());
    }
    fn set_waiting(&self, progress: f64) {
        self.0.lock().unwrap().push(format!("waiting {progress:.2}"));
    }
    fn set_working(&self, _: f64) {}
    fn set_finished(&self) {
        self.0.lock().unwrap().push("finished".to_string());
    }
}

struct View(flume::Sender<()>);

impl ViewInterface for View {
    fn invalidate(&self) {
        let _ = self.0.send(());
    }
}

fn context() -> SchedulerContext {
    SchedulerContext::new(&SchedulerConfig::default()).unwrap()
}

fn grey_spec(bpp: u32) -> Vec<Arc<dyn LayerOperations>> {
    vec![
        Arc::new(GreyOperations::new(bpp).unwrap()),
        Arc::new(GreyOperations::new(8).unwrap()),
    ]
}

fn small(ctx: &SchedulerContext, width: u32, height: u32, bpp: u32) -> Arc<TiledBitmap> {
    TiledBitmap::new(
        ctx,
        &BlobStore::default(),
        &PyramidConfig::with_tile_size(64),
        width,
        height,
        grey_spec(bpp),
        None,
    )
    .unwrap()
}

fn sample(bitmap: &TiledBitmap, depth: usize, x: u32, y: u32) -> u32 {
    let layer = bitmap.layer(depth).unwrap();
    let ts = layer.tile_size();
    let tile = layer.get_tile((x / ts) as i32, (y / ts) as i32);
    let data = tile.get_const_tile_sync().unwrap();
    let stride = data.stride();
    let row = &data.data()[((y % ts) as usize) * stride..][..stride];
    get_sample(row, (x % ts) as usize, layer.bpp())
}

#[test]
fn gigapixel_geometry() {
    let ctx = SchedulerContext::with_pools(
        ThreadPool::new("cpu", 0).unwrap(),
        ThreadPool::new("seq", 0).unwrap(),
        ThreadPool::new("reaper", 0).unwrap(),
    );
    let bitmap = TiledBitmap::new(
        &ctx,
        &BlobStore::default(),
        &PyramidConfig::default(),
        10_000,
        10_000,
        grey_spec(1),
        None,
    )
    .unwrap();

    assert_eq!(bitmap.layer_count(), 2);
    let base = bitmap.layer(0).unwrap();
    assert_eq!((base.horizontal_tile_count(), base.vertical_tile_count()), (3, 3));
    let top = bitmap.layer(1).unwrap();
    assert_eq!((top.width(), top.height()), (1250, 1250));
    assert_eq!(bitmap.coordinators().len(), 1);
    assert_eq!(bitmap.coordinators()[0].source_count(), 9);
    assert_eq!(bitmap.progress().total(), 10);
    assert!(Arc::ptr_eq(bitmap.coordinators()[0].target(), top.get_tile(0, 0)));
}

#[test]
fn load_builds_every_layer() {
    let ctx = context();
    let recorder = Arc::new(Recorder::default());
    let interface: Arc<dyn ProgressInterface> = recorder.clone();
    let bitmap = TiledBitmap::new(
        &ctx,
        &BlobStore::default(),
        &PyramidConfig::with_tile_size(64),
        600,
        300,
        grey_spec(8),
        Some(interface),
    )
    .unwrap();
    assert_eq!(bitmap.layer_count(), 3);
    assert_eq!(bitmap.progress().total(), 50 + 2 + 1);

    let source = Arc::new(Split {
        width: 600,
        split: 320,
        rows: AtomicUsize::new(0),
    });
    let load = bitmap.set_source(source.clone()).unwrap();
    assert_eq!(load.wait_timeout(TIMEOUT), Some(LoadOutcome::Completed));
    assert!(load.is_finished());
    assert_eq!(source.rows.load(Ordering::SeqCst), 5);
    assert!(bitmap.progress().is_complete());
    assert_relative_eq!(bitmap.progress().fraction(), 1.0);

    assert_eq!(sample(&bitmap, 0, 0, 0), 200);
    assert_eq!(sample(&bitmap, 0, 599, 299), 40);
    assert_eq!(sample(&bitmap, 1, 39, 10), 200);
    assert_eq!(sample(&bitmap, 1, 40, 10), 40);
    assert_eq!(sample(&bitmap, 2, 0, 0), 200);
    assert_eq!(sample(&bitmap, 2, 5, 0), 40);
    drop(load);

    let events = recorder.0.lock().unwrap().clone();
    assert_eq!(events, vec!["waiting 0.00".to_string(), "finished".to_string()]);
}

#[test]
fn one_source_per_bitmap() {
    let ctx = context();
    let bitmap = small(&ctx, 64, 64, 8);
    let (_release, gate) = flume::unbounded();
    let _load = bitmap.set_source(Arc::new(Gate(gate.clone()))).unwrap();
    assert!(matches!(
        bitmap.set_source(Arc::new(Gate(gate))),
        Err(TesseraCoreError::SourceAlreadySet)
    ));
}

#[test]
fn dropping_the_handle_cancels() {
    let ctx = context();
    let recorder = Arc::new(Recorder::default());
    let interface: Arc<dyn ProgressInterface> = recorder.clone();
    let bitmap = TiledBitmap::new(
        &ctx,
        &BlobStore::default(),
        &PyramidConfig::with_tile_size(64),
        64,
        640,
        grey_spec(8),
        Some(interface),
    )
    .unwrap();
    let (release, gate) = flume::unbounded();
    let load = bitmap.set_source(Arc::new(Gate(gate))).unwrap();
    assert_eq!(load.wait_timeout(Duration::from_millis(50)), None);
    drop(load);
    drop(release);

    // Rows after the blocked one are never fetched.
    std::thread::sleep(Duration::from_millis(200));
    assert!(bitmap.progress().finished() <= 1);
    assert!(!bitmap.progress().is_complete());
    assert_eq!(recorder.0.lock().unwrap().last().map(String::as_str), Some("idle"));
}

#[test]
fn pipette_averages_loaded_pixels() {
    let ctx = context();
    let bitmap = small(&ctx, 200, 100, 1);
    assert_eq!(bitmap.pixel_average(Rect::new(0, 0, 10, 10)), None);

    let load = bitmap.set_source(Arc::new(Checkerboard { width: 200 })).unwrap();
    assert_eq!(load.wait_timeout(TIMEOUT), Some(LoadOutcome::Completed));

    assert_relative_eq!(bitmap.pixel_average(Rect::new(0, 0, 1, 1)).unwrap(), 1.0);
    assert_relative_eq!(bitmap.pixel_average(Rect::new(1, 0, 1, 1)).unwrap(), 0.0);
    assert_relative_eq!(bitmap.pixel_average(Rect::new(60, 60, 10, 10)).unwrap(), 0.5);
    // Clipped to the bitmap.
    assert_relative_eq!(bitmap.pixel_average(Rect::new(198, 98, 50, 50)).unwrap(), 0.5);
    assert_eq!(bitmap.pixel_average(Rect::new(300, 0, 10, 10)), None);
}

#[test]
fn redraw_fills_in_once_caches_are_ready() {
    let ctx = context();
    let bitmap = small(&ctx, 100, 64, 1);
    let load = bitmap.set_source(Arc::new(Checkerboard { width: 100 })).unwrap();
    assert_eq!(load.wait_timeout(TIMEOUT), Some(LoadOutcome::Completed));

    let (tx, invalidated) = flume::unbounded();
    let view = bitmap.open(Arc::new(View(tx)));
    let mut surface = Surface::new(128, 64);
    let area = Rect::new(0, 0, 128, 64);

    let deadline = Instant::now() + TIMEOUT;
    loop {
        bitmap.redraw(view, &mut surface, area, 0);
        if surface.pixel(0, 0) == grey(255) && surface.pixel(99, 0) == grey(0) {
            break;
        }
        assert!(Instant::now() < deadline, "caches never became ready");
        let _ = invalidated.recv_timeout(Duration::from_millis(100));
    }
    assert_eq!(surface.pixel(1, 0), grey(0));
    assert_eq!(surface.pixel(1, 1), grey(255));
    assert_eq!(surface.pixel(100, 10), OUT_OF_BOUNDS_COLOR);
    assert_eq!(surface.pixel(127, 63), OUT_OF_BOUNDS_COLOR);
    assert_eq!(bitmap.view_data(view).unwrap().lease_count(), 2);

    bitmap.close(view);
    assert!(bitmap.view_data(view).is_none());
}

#[test]
fn unloaded_tiles_draw_placeholders() {
    let ctx = SchedulerContext::with_pools(
        ThreadPool::new("cpu", 0).unwrap(),
        ThreadPool::new("seq", 0).unwrap(),
        ThreadPool::new("reaper", 1).unwrap(),
    );
    let bitmap = small(&ctx, 64, 64, 8);
    let tile = bitmap.layer(0).unwrap().get_tile(0, 0);
    drop(tile.initialize());
    assert_eq!(tile.status(), TileStatus::Unloaded);

    let (tx, _invalidated) = flume::unbounded();
    let view = bitmap.open(Arc::new(View(tx)));
    let mut surface = Surface::new(32, 32);
    bitmap.redraw(view, &mut surface, Rect::new(32, 32, 32, 32), 0);
    assert_eq!(surface.pixel(0, 0), UNLOADED_COLOR);
    assert_eq!(surface.pixel(31, 31), UNLOADED_COLOR);

    // One bitmap pixel per 2x2 block, the right half lies outside.
    let mut surface = Surface::new(32, 32);
    bitmap.redraw(view, &mut surface, Rect::new(48, 0, 16, 16), 1);
    assert_eq!(surface.pixel(31, 0), UNLOADED_COLOR);
    let mut surface = Surface::new(32, 32);
    bitmap.redraw(view, &mut surface, Rect::new(56, 0, 16, 16), 1);
    assert_eq!(surface.pixel(15, 0), UNLOADED_COLOR);
    assert_eq!(surface.pixel(16, 0), OUT_OF_BOUNDS_COLOR);
}

#[test]
fn full_size_tile_caches_its_samples() {
    let ctx = context();
    let tile_size = PyramidConfig::default().tile_size();
    assert_eq!(tile_size, TILESIZE);
    let layer = Layer::new(&ctx, &BlobStore::default(), 0, 4096, 4096, 1, tile_size, None);
    let queue = Queue::create();
    let (tx, rx) = flume::bounded(1);
    layer.fetch_data(Arc::new(Checkerboard { width: 4096 }), ctx.cpu_bound(), queue.weak(), move || {
        let _ = tx.send(());
    });
    rx.recv_timeout(TIMEOUT).unwrap();

    let data = layer.get_tile(0, 0).get_const_tile_sync().unwrap();
    let first_row = &data.data()[..data.stride()];
    assert_eq!(get_sample(first_row, 0, 1), 1);
    assert_eq!(get_sample(first_row, 1, 1), 0);

    let cache = GreyOperations::new(1).unwrap().cache(&data);
    let surface = cache.downcast_ref::<Surface>().unwrap();
    assert_eq!((surface.width(), surface.height()), (4096, 4096));
    assert_eq!(surface.pixel(0, 0), grey(255));
    assert_eq!(surface.pixel(1, 0), grey(0));
    assert_eq!(surface.pixel(4095, 4095), grey(255));
}
