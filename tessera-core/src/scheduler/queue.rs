use std::fmt::{Debug, Formatter};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};

use tracing::trace;

use super::{PRIO_HIGHEST, ThreadPool};

#[derive(Debug, Default)]
struct Counters {
    running: usize,
    dead: bool,
}

/// Liveness flag and in-flight counter shared by a [`Queue`] and its weak handles.
#[derive(Debug, Default)]
struct QueueState {
    counters: Mutex<Counters>,
    drained: Condvar,
}

impl QueueState {
    fn lock(&self) -> MutexGuard<'_, Counters> {
        self.counters.lock().expect("queue lock poisoned")
    }

    fn kill(&self) {
        self.lock().dead = true;
    }

    fn wait_drained(&self) {
        let mut counters = self.lock();
        while counters.running > 0 {
            counters = self.drained.wait(counters).expect("queue lock poisoned");
        }
    }
}

/// Marks one job of a queue as running until dropped.
pub(super) struct RunningJob(Arc<QueueState>);

impl Drop for RunningJob {
    fn drop(&mut self) {
        let mut counters = self.0.lock();
        counters.running -= 1;
        if counters.running == 0 {
            self.0.drained.notify_all();
        }
    }
}

/// A cancellable group of jobs.
///
/// Jobs scheduled against a queue run only while at least one `Arc<Queue>` exists.
/// Dropping the last one discards all jobs that have not started yet and waits
/// until the running ones have finished. Queues made with [`Queue::create_async`]
/// do that wait on the reaper pool, so a job may drop its own queue.
pub struct Queue {
    state: Arc<QueueState>,
    reaper: Option<ThreadPool>,
}

impl Queue {
    /// A queue whose drop blocks until its running jobs are done.
    #[must_use]
    pub fn create() -> Arc<Self> {
        Arc::new(Self {
            state: Arc::default(),
            reaper: None,
        })
    }

    /// A queue whose drop returns immediately; draining happens on `reaper`.
    #[must_use]
    pub fn create_async(reaper: &ThreadPool) -> Arc<Self> {
        Arc::new(Self {
            state: Arc::default(),
            reaper: Some(reaper.clone()),
        })
    }

    #[must_use]
    pub fn weak(&self) -> WeakQueue {
        WeakQueue(Arc::clone(&self.state))
    }

    /// Number of jobs of this queue executing right now.
    #[must_use]
    pub fn running_jobs(&self) -> usize {
        self.state.lock().running
    }
}

impl Drop for Queue {
    fn drop(&mut self) {
        self.state.kill();
        match self.reaper.take() {
            Some(reaper) => {
                let state = Arc::clone(&self.state);
                reaper.schedule_default(
                    move || {
                        state.wait_drained();
                        trace!("Cancelled queue drained");
                    },
                    PRIO_HIGHEST,
                );
            }
            None => self.state.wait_drained(),
        }
    }
}

impl Debug for Queue {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Queue")
            .field("running", &self.running_jobs())
            .field("async_drop", &self.reaper.is_some())
            .finish()
    }
}

/// A non-owning handle to a [`Queue`].
///
/// Scheduling against a dead queue is allowed; the job is dropped instead of run.
#[derive(Clone, Debug)]
pub struct WeakQueue(Arc<QueueState>);

impl WeakQueue {
    /// A queue that never dies, for jobs nobody needs to cancel.
    pub(super) fn detached() -> Self {
        Self(Arc::default())
    }

    #[must_use]
    pub fn is_alive(&self) -> bool {
        !self.0.lock().dead
    }

    /// Registers a job start, unless the queue is dead.
    pub(super) fn start_job(&self) -> Option<RunningJob> {
        let mut counters = self.0.lock();
        if counters.dead {
            None
        } else {
            counters.running += 1;
            Some(RunningJob(Arc::clone(&self.0)))
        }
    }

    /// Checks that both handles refer to the same queue.
    #[must_use]
    pub fn same_queue(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl PartialEq for WeakQueue {
    fn eq(&self, other: &Self) -> bool {
        self.same_queue(other)
    }
}
