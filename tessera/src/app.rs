//! Building a pyramid from the command line settings.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tessera_core::bitmap::{LayerSpec, LoadOutcome, ProgressInterface, TiledBitmap};
use tessera_core::ops::{GreyOperations, LayerOperations};
use tessera_core::scheduler::SchedulerContext;
use tessera_core::storage::{BlobStore, StoreStats};
use tracing::info;

use crate::config::Config;
use crate::source::Source;
use crate::{TesseraError, TesseraResult};

/// A fully built pyramid.
#[derive(Debug)]
pub struct Loaded {
    pub bitmap: Arc<TiledBitmap>,
    pub store: BlobStore,
    pub elapsed: Duration,
}

impl Loaded {
    #[must_use]
    pub fn stats(&self) -> StoreStats {
        self.store.stats()
    }
}

/// Grey operations for the full resolution layer, 8 bpp for all reduced ones.
pub fn layer_spec(bpp: u32, invert: bool) -> TesseraResult<LayerSpec> {
    let make = |bpp| -> TesseraResult<Arc<dyn LayerOperations>> {
        let ops = GreyOperations::new(bpp)?;
        Ok(Arc::new(if invert { ops.inverted() } else { ops }))
    };
    Ok(vec![make(bpp)?, make(8)?])
}

/// Streams `source` through a new pyramid and waits until every layer is built.
pub fn build_pyramid(
    config: &Config,
    source: &Source,
    invert: bool,
    progress: Option<Arc<dyn ProgressInterface>>,
) -> TesseraResult<Loaded> {
    let ctx = SchedulerContext::new(&config.scheduler)?;
    let store = BlobStore::new(&config.storage);
    let info = source.info();
    let bitmap = TiledBitmap::new(
        &ctx,
        &store,
        &config.pyramid,
        info.width,
        info.height,
        layer_spec(info.bpp, invert)?,
        progress,
    )?;

    let started = Instant::now();
    let load = bitmap.set_source(source.presentation())?;
    let outcome = load.wait();
    let elapsed = started.elapsed();
    if let Some(e) = source.take_error() {
        return Err(e);
    }
    if outcome == LoadOutcome::Cancelled {
        return Err(TesseraError::LoadCancelled);
    }
    info!(
        "Built {} layers of {} tiles in {elapsed:.2?}",
        bitmap.layer_count(),
        bitmap.progress().total()
    );
    Ok(Loaded {
        bitmap,
        store,
        elapsed,
    })
}
