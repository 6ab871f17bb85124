use std::fmt::{Debug, Formatter};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use tessera_tile_utils::TileCoord;
use tracing::trace;

use super::interfaces::TileLoadingObserver;
use super::tile::{CompressedTile, ConstTile};
use crate::ops::{LayerOperations, RenderCache};
use crate::registry::{Registration, Registry};
use crate::scheduler::{LOAD_PRIO, Queue, SchedulerContext, WeakQueue};

/// Progress of a tile towards being drawable in one view. The order is meaningful.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ViewState {
    /// The tile data is not resident yet.
    Init,
    Loaded,
    ComputingBase,
    BaseComputed,
    ComputingZoom,
    ZoomComputed,
    /// The zoom cache is ready and observers were told.
    Done,
}

enum Step {
    ComputeBase {
        ops: Arc<dyn LayerOperations>,
        tile: Arc<ConstTile>,
    },
    ComputeZoom {
        ops: Arc<dyn LayerOperations>,
        tile: Arc<ConstTile>,
        zoom: i32,
        base: RenderCache,
    },
    ReportDone {
        tile: Arc<ConstTile>,
    },
}

struct Machine {
    state: ViewState,
    desired: ViewState,
    zoom: i32,
    ops: Option<Arc<dyn LayerOperations>>,
    tile: Option<Arc<ConstTile>>,
    base: Option<RenderCache>,
    zoomed: Option<RenderCache>,
    queue: Option<Arc<Queue>>,
    current: Option<WeakQueue>,
}

impl Machine {
    /// Claims the next step towards `desired`, moving into the matching `Computing*` state.
    fn next_step(&mut self) -> Option<Step> {
        if self.state >= self.desired {
            return None;
        }
        let tile = self.tile.clone()?;
        match self.state {
            ViewState::Loaded => {
                let ops = self.ops.clone()?;
                self.state = ViewState::ComputingBase;
                Some(Step::ComputeBase { ops, tile })
            }
            ViewState::BaseComputed => {
                let ops = self.ops.clone()?;
                let base = self.base.clone()?;
                self.state = ViewState::ComputingZoom;
                Some(Step::ComputeZoom {
                    ops,
                    tile,
                    zoom: self.zoom,
                    base,
                })
            }
            ViewState::ZoomComputed => {
                self.state = ViewState::Done;
                Some(Step::ReportDone { tile })
            }
            ViewState::Init
            | ViewState::ComputingBase
            | ViewState::ComputingZoom
            | ViewState::Done => None,
        }
    }

    fn is_current(&self, queue: &WeakQueue) -> bool {
        self.current.as_ref().is_some_and(|c| c.same_queue(queue))
    }

    /// Abandons the work in flight. The returned queue must be dropped outside the lock.
    fn cancel(&mut self) -> Option<Arc<Queue>> {
        self.current = None;
        self.queue.take()
    }

    fn needs_work(&self) -> bool {
        self.state >= ViewState::Loaded
            && self.desired > self.state
            && self.queue.is_none()
            && self.tile.is_some()
            && self.ops.is_some()
    }
}

/// The render caches of one tile in one view.
///
/// Caches are computed in the background, one step per iteration of a job on the
/// CPU-bound pool: the zoom level 0 base cache first, then the cache for the current
/// zoom. Observers are told once both are ready.
pub struct TileViewState {
    coord: TileCoord,
    ctx: SchedulerContext,
    machine: Mutex<Machine>,
    observers: Registry<dyn TileLoadingObserver>,
    parent_registration: Mutex<Option<Registration>>,
    me: Weak<TileViewState>,
}

impl TileViewState {
    pub(crate) fn new(parent: &Arc<CompressedTile>, ctx: &SchedulerContext) -> Arc<Self> {
        let state = Arc::new_cyclic(|me| Self {
            coord: parent.coord(),
            ctx: ctx.clone(),
            machine: Mutex::new(Machine {
                state: ViewState::Init,
                desired: ViewState::Loaded,
                zoom: 0,
                ops: None,
                tile: None,
                base: None,
                zoomed: None,
                queue: None,
                current: None,
            }),
            observers: Registry::new(),
            parent_registration: Mutex::default(),
            me: me.clone(),
        });
        let observer: Arc<dyn TileLoadingObserver> = state.clone();
        let registration = parent.register_load_observer(&observer);
        *state
            .parent_registration
            .lock()
            .expect("view state lock poisoned") = Some(registration);
        state
    }

    fn lock(&self) -> MutexGuard<'_, Machine> {
        self.machine.lock().expect("view state lock poisoned")
    }

    #[must_use]
    pub fn coord(&self) -> TileCoord {
        self.coord
    }

    #[must_use]
    pub fn state(&self) -> ViewState {
        self.lock().state
    }

    #[must_use]
    pub fn desired_state(&self) -> ViewState {
        self.lock().desired
    }

    #[must_use]
    pub fn zoom(&self) -> i32 {
        self.lock().zoom
    }

    /// The cache for the current zoom level, once computed.
    #[must_use]
    pub fn cache_result(&self) -> Option<RenderCache> {
        let machine = self.lock();
        if machine.state >= ViewState::ZoomComputed {
            machine.zoomed.clone()
        } else {
            None
        }
    }

    /// Subscribes to "caches ready" notifications.
    pub fn register_observer(&self, observer: &Arc<dyn TileLoadingObserver>) -> Registration {
        self.observers.register(observer)
    }

    /// Requests caches for drawing at `zoom` with `ops`.
    ///
    /// A new zoom level only invalidates the zoom cache; the base cache is kept.
    pub fn set_zoom(&self, ops: &Arc<dyn LayerOperations>, zoom: i32) {
        let abandoned = {
            let mut machine = self.lock();
            let changed = machine.zoom != zoom || machine.ops.is_none();
            machine.ops = Some(Arc::clone(ops));
            machine.zoom = zoom;
            machine.desired = ViewState::Done;
            let abandoned = if changed && machine.state >= ViewState::BaseComputed {
                machine.zoomed = None;
                machine.state = ViewState::BaseComputed;
                machine.cancel()
            } else {
                None
            };
            self.kick(&mut machine);
            abandoned
        };
        drop(abandoned);
    }

    /// Drops all caches and pending work. Raw data, if resident, is kept.
    pub fn clear(&self) {
        let abandoned = {
            let mut machine = self.lock();
            machine.base = None;
            machine.zoomed = None;
            machine.desired = ViewState::Loaded;
            machine.state = machine.state.min(ViewState::Loaded);
            machine.cancel()
        };
        drop(abandoned);
    }

    fn kick(&self, machine: &mut Machine) {
        if !machine.needs_work() {
            return;
        }
        let Some(me) = self.me.upgrade() else {
            return;
        };
        let queue = self.ctx.async_queue();
        let job_queue = queue.weak();
        machine.current = Some(queue.weak());
        self.ctx.cpu_bound().schedule(
            move || me.process(&job_queue),
            LOAD_PRIO,
            queue.weak(),
        );
        machine.queue = Some(queue);
    }

    fn process(&self, queue: &WeakQueue) {
        loop {
            let step = {
                let mut machine = self.lock();
                if !machine.is_current(queue) {
                    return;
                }
                match machine.next_step() {
                    Some(step) => step,
                    None => {
                        let finished = machine.cancel();
                        self.kick(&mut machine);
                        drop(machine);
                        drop(finished);
                        return;
                    }
                }
            };
            match step {
                Step::ComputeBase { ops, tile } => {
                    let base = ops.cache(&tile);
                    let mut machine = self.lock();
                    if machine.is_current(queue) {
                        machine.base = Some(base);
                        machine.state = ViewState::BaseComputed;
                    }
                }
                Step::ComputeZoom {
                    ops,
                    tile,
                    zoom,
                    base,
                } => {
                    let zoomed = ops.cache_zoom(&tile, zoom, &base);
                    let mut machine = self.lock();
                    if machine.is_current(queue) {
                        machine.zoomed = Some(zoomed);
                        machine.state = ViewState::ZoomComputed;
                    }
                }
                Step::ReportDone { tile } => {
                    trace!("Caches of tile {} ready", self.coord);
                    for observer in self.observers.snapshot() {
                        observer.tile_loaded(&tile);
                    }
                }
            }
        }
    }
}

impl TileLoadingObserver for TileViewState {
    fn tile_loaded(&self, tile: &Arc<ConstTile>) {
        let abandoned = {
            let mut machine = self.lock();
            machine.tile = Some(Arc::clone(tile));
            let abandoned = if machine.state > ViewState::Loaded {
                machine.base = None;
                machine.zoomed = None;
                machine.cancel()
            } else {
                None
            };
            machine.state = ViewState::Loaded;
            self.kick(&mut machine);
            abandoned
        };
        drop(abandoned);
    }
}

impl Debug for TileViewState {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let machine = self.lock();
        f.debug_struct("TileViewState")
            .field("coord", &self.coord)
            .field("state", &machine.state)
            .field("desired", &machine.desired)
            .field("zoom", &machine.zoom)
            .finish_non_exhaustive()
    }
}
