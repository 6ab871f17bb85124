//! Rendering viewports of a loaded bitmap into PNG files.

use std::fs::File;
use std::io::BufWriter;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tessera_core::bitmap::{TiledBitmap, ViewInterface};
use tessera_core::ops::Surface;
use tessera_tile_utils::Rect;
use tracing::{debug, info, warn};

use crate::{TesseraError, TesseraResult};

/// Forwards invalidations to the render loop.
struct Invalidations(flume::Sender<()>);

impl ViewInterface for Invalidations {
    fn invalidate(&self) {
        let _ = self.0.send(());
    }
}

/// Draws `viewport` (bitmap pixels) at `zoom` and waits until every visible tile is drawn
/// from its caches, or until `timeout` has passed.
pub fn render(bitmap: &TiledBitmap, viewport: Rect, zoom: i32, timeout: Duration) -> Surface {
    let range = bitmap.zoom_range();
    let zoom = if range.contains(&zoom) {
        zoom
    } else {
        let clamped = zoom.clamp(*range.start(), *range.end());
        warn!("Zoom level {zoom} is out of range {range:?}, rendering at {clamped}");
        clamped
    };
    let area = viewport.zoomed(zoom);
    let mut surface = Surface::new(area.width.max(1) as u32, area.height.max(1) as u32);

    let (tx, invalidated) = flume::unbounded();
    let view = bitmap.open(Arc::new(Invalidations(tx)));
    let deadline = Instant::now() + timeout;
    let mut passes = 0;
    loop {
        let complete = bitmap
            .view_data(view)
            .is_some_and(|data| data.is_complete());
        bitmap.redraw(view, &mut surface, viewport, zoom);
        passes += 1;
        if complete {
            break;
        }
        if Instant::now() >= deadline {
            warn!("Rendering timed out, some tiles are drawn as placeholders");
            break;
        }
        let _ = invalidated.recv_timeout(Duration::from_millis(100));
    }
    bitmap.close(view);
    debug!("Rendered {viewport} at zoom {zoom} in {passes} passes");
    surface
}

/// Writes `surface` as an 8 bit RGBA PNG.
pub fn write_png(surface: &Surface, path: &Path) -> TesseraResult<()> {
    let file = File::create(path).map_err(|e| TesseraError::OutputError(e, path.to_path_buf()))?;
    let mut encoder = png::Encoder::new(BufWriter::new(file), surface.width(), surface.height());
    encoder.set_color(png::ColorType::Rgba);
    encoder.set_depth(png::BitDepth::Eight);
    let mut writer = encoder
        .write_header()
        .map_err(|e| TesseraError::PngWriteError(e, path.to_path_buf()))?;
    writer
        .write_image_data(&surface.to_rgba8())
        .map_err(|e| TesseraError::PngWriteError(e, path.to_path_buf()))?;
    writer
        .finish()
        .map_err(|e| TesseraError::PngWriteError(e, path.to_path_buf()))?;
    info!(
        "Wrote {}x{} image to {}",
        surface.width(),
        surface.height(),
        path.display()
    );
    Ok(())
}
