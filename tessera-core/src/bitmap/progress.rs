use std::fmt::{Debug, Formatter};
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::info;

use super::interfaces::{ProgressInterface, TileInitialisationObserver};
use super::tile::CompressedTile;

/// Wakes up a pending load.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum LoadSignal {
    Finished,
    Cancelled,
}

#[derive(Debug, Default, Clone, Copy)]
struct Counts {
    total: usize,
    finished: usize,
}

/// Counts finished tiles of a pyramid and forwards the ratio to a [`ProgressInterface`].
pub struct LoadProgress {
    counts: Mutex<Counts>,
    interface: Option<Arc<dyn ProgressInterface>>,
    /// Finished count last forwarded to `interface`. Held while forwarding, so reports stay ordered.
    reported: Mutex<usize>,
    listener: Mutex<Option<flume::Sender<LoadSignal>>>,
}

impl LoadProgress {
    pub(crate) fn new(interface: Option<Arc<dyn ProgressInterface>>) -> Self {
        Self {
            counts: Mutex::default(),
            interface,
            reported: Mutex::default(),
            listener: Mutex::default(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Counts> {
        self.counts.lock().expect("progress lock poisoned")
    }

    /// Number of tiles in the pyramid.
    #[must_use]
    pub fn total(&self) -> usize {
        self.lock().total
    }

    #[must_use]
    pub fn finished(&self) -> usize {
        self.lock().finished
    }

    /// Finished share of all tiles, in `0.0..=1.0`.
    #[must_use]
    pub fn fraction(&self) -> f64 {
        let counts = *self.lock();
        if counts.total == 0 {
            0.0
        } else {
            counts.finished as f64 / counts.total as f64
        }
    }

    #[must_use]
    pub fn is_complete(&self) -> bool {
        let counts = *self.lock();
        counts.total > 0 && counts.finished == counts.total
    }

    /// Sends [`LoadSignal::Finished`] to `listener` once every tile is finished.
    pub(crate) fn listen(&self, listener: flume::Sender<LoadSignal>) {
        *self.listener.lock().expect("progress lock poisoned") = Some(listener);
    }

    pub(crate) fn set_waiting(&self) {
        if let Some(interface) = &self.interface {
            interface.set_waiting(self.fraction());
        }
    }

    pub(crate) fn set_idle(&self) {
        if let Some(interface) = &self.interface {
            interface.set_idle();
        }
    }
}

impl TileInitialisationObserver for LoadProgress {
    fn tile_created(&self, _tile: &Arc<CompressedTile>) {
        self.lock().total += 1;
    }

    fn tile_finished(&self, _tile: &Arc<CompressedTile>) {
        let counts = {
            let mut counts = self.lock();
            counts.finished += 1;
            assert!(
                counts.finished <= counts.total,
                "{} tiles finished, but only {} exist",
                counts.finished,
                counts.total
            );
            *counts
        };
        if let Some(interface) = &self.interface {
            let mut reported = self.reported.lock().expect("progress lock poisoned");
            if counts.finished > *reported {
                *reported = counts.finished;
                interface.set_working(counts.finished as f64 / counts.total as f64);
            }
        }
        if counts.finished < counts.total {
            return;
        }

        info!("All {} tiles of the pyramid are finished", counts.total);
        if let Some(interface) = &self.interface {
            interface.set_finished();
        }
        if let Some(listener) = self.listener.lock().expect("progress lock poisoned").take() {
            let _ = listener.send(LoadSignal::Finished);
        }
    }
}

impl Debug for LoadProgress {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let counts = *self.lock();
        f.debug_struct("LoadProgress")
            .field("total", &counts.total)
            .field("finished", &counts.finished)
            .finish_non_exhaustive()
    }
}
