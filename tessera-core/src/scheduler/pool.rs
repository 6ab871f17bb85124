use std::collections::{BTreeMap, VecDeque};
use std::fmt::{Debug, Formatter};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::process;
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};

use tracing::{debug, error, trace};

use super::{Priority, QueueJumper, Task, WeakQueue};
use crate::{TesseraCoreError, TesseraCoreResult};

struct Job {
    task: Task,
    queue: WeakQueue,
}

#[derive(Default)]
struct Jobs {
    by_priority: BTreeMap<Priority, VecDeque<Job>>,
    shutting_down: bool,
}

impl Jobs {
    fn push(&mut self, priority: Priority, job: Job) {
        self.by_priority.entry(priority).or_default().push_back(job);
    }

    /// Head of the highest non-empty priority.
    fn pop(&mut self) -> Option<Job> {
        let mut bucket = self.by_priority.last_entry()?;
        let job = bucket.get_mut().pop_front();
        if bucket.get().is_empty() {
            bucket.remove();
        }
        job
    }

    fn len(&self) -> usize {
        self.by_priority.values().map(VecDeque::len).sum()
    }
}

struct Shared {
    name: String,
    jobs: Mutex<Jobs>,
    available: Condvar,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Jobs> {
        self.jobs.lock().expect("job list lock poisoned")
    }

    fn work(&self) {
        loop {
            let job = {
                let mut jobs = self.lock();
                loop {
                    if jobs.shutting_down {
                        return;
                    }
                    if let Some(job) = jobs.pop() {
                        break job;
                    }
                    jobs = self.available.wait(jobs).expect("job list lock poisoned");
                }
            };
            match job.queue.start_job() {
                Some(_running) => {
                    // A job that panicked would leave whoever waits on it blocked forever.
                    if catch_unwind(AssertUnwindSafe(job.task)).is_err() {
                        error!("{}: a job panicked, aborting", self.name);
                        process::abort();
                    }
                }
                None => trace!("{}: skipping job of a cancelled queue", self.name),
            }
        }
    }
}

struct Inner {
    shared: Arc<Shared>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    default_queue: WeakQueue,
}

impl Drop for Inner {
    fn drop(&mut self) {
        let discarded = {
            let mut jobs = self.shared.lock();
            jobs.shutting_down = true;
            std::mem::take(&mut jobs.by_priority)
        };
        self.shared.available.notify_all();
        if !discarded.is_empty() {
            debug!(
                "{}: discarding {} pending jobs on shutdown",
                self.shared.name,
                discarded.values().map(VecDeque::len).sum::<usize>()
            );
        }
        drop(discarded);

        let me = thread::current().id();
        let workers = std::mem::take(&mut *self.workers.lock().expect("worker list lock poisoned"));
        for worker in workers {
            // The last handle may be released by one of our own jobs.
            if worker.thread().id() != me {
                let _ = worker.join();
            }
        }
    }
}

/// A fixed set of worker threads taking jobs in priority order.
///
/// Cloning is cheap and shares the pool. When the last clone is dropped, pending
/// jobs are discarded and the workers are joined.
#[derive(Clone)]
pub struct ThreadPool(Arc<Inner>);

impl ThreadPool {
    /// Creates a pool named `name` with `workers` threads.
    ///
    /// A pool without workers only queues jobs; see [`ThreadPool::add_workers`].
    pub fn new(name: impl Into<String>, workers: usize) -> TesseraCoreResult<Self> {
        let pool = Self(Arc::new(Inner {
            shared: Arc::new(Shared {
                name: name.into(),
                jobs: Mutex::default(),
                available: Condvar::new(),
            }),
            workers: Mutex::default(),
            default_queue: WeakQueue::detached(),
        }));
        pool.add_workers(workers)?;
        Ok(pool)
    }

    /// Starts `count` additional worker threads.
    pub fn add_workers(&self, count: usize) -> TesseraCoreResult<()> {
        let mut workers = self.0.workers.lock().expect("worker list lock poisoned");
        for _ in 0..count {
            let shared = Arc::clone(&self.0.shared);
            let name = format!("{}-{}", shared.name, workers.len());
            let handle = thread::Builder::new()
                .name(name)
                .spawn(move || shared.work())
                .map_err(|e| TesseraCoreError::ThreadSpawnError(e, self.0.shared.name.clone()))?;
            workers.push(handle);
        }
        debug!("{}: running {} workers", self.0.shared.name, workers.len());
        Ok(())
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.0.shared.name
    }

    #[must_use]
    pub fn worker_count(&self) -> usize {
        self.0.workers.lock().expect("worker list lock poisoned").len()
    }

    /// Number of queued jobs that have not been picked up yet.
    #[must_use]
    pub fn pending_jobs(&self) -> usize {
        self.0.shared.lock().len()
    }

    /// Queues `job` at `priority`. It runs only if `queue` is still alive when its turn comes.
    pub fn schedule<F>(&self, job: F, priority: Priority, queue: WeakQueue)
    where
        F: FnOnce() + Send + 'static,
    {
        self.0.shared.lock().push(
            priority,
            Job {
                task: Box::new(job),
                queue,
            },
        );
        self.0.shared.available.notify_one();
    }

    /// Queues `job` on the pool's own queue, which lives as long as the pool.
    pub fn schedule_default<F>(&self, job: F, priority: Priority)
    where
        F: FnOnce() + Send + 'static,
    {
        self.schedule(job, priority, self.0.default_queue.clone());
    }

    /// Queues `job` and returns a channel delivering its result.
    ///
    /// The channel disconnects without a value if the job is discarded.
    pub fn schedule_with_result<F, R>(
        &self,
        job: F,
        priority: Priority,
        queue: WeakQueue,
    ) -> flume::Receiver<R>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        let (tx, rx) = flume::bounded(1);
        self.schedule(
            move || {
                let _ = tx.send(job());
            },
            priority,
            queue,
        );
        rx
    }

    /// Reserves a slot for `jumper`. Work given to it before the slot comes up runs there.
    pub fn schedule_jumper(&self, jumper: &Arc<QueueJumper>, priority: Priority, queue: WeakQueue) {
        let jumper = Arc::clone(jumper);
        self.schedule(move || jumper.run(), priority, queue);
    }
}

impl Debug for ThreadPool {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThreadPool")
            .field("name", &self.name())
            .field("workers", &self.worker_count())
            .field("pending", &self.pending_jobs())
            .finish()
    }
}
