use std::fmt::{Debug, Formatter};
use std::sync::{Arc, Mutex, MutexGuard};

use super::Task;

struct Slot {
    in_queue: bool,
    work: Option<Task>,
}

/// A reserved slot in a pool's job list whose work may be supplied later.
///
/// Schedule it with [`ThreadPool::schedule_jumper`](super::ThreadPool::schedule_jumper).
/// When its turn comes, it leaves the queue and runs whatever work it holds by then.
pub struct QueueJumper(Mutex<Slot>);

impl QueueJumper {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self(Mutex::new(Slot {
            in_queue: true,
            work: None,
        })))
    }

    fn lock(&self) -> MutexGuard<'_, Slot> {
        self.0.lock().expect("jumper lock poisoned")
    }

    /// Hands `work` to the reserved slot.
    ///
    /// Returns `false`, dropping `work`, if the slot has already been used.
    pub fn set_work<F>(&self, work: F) -> bool
    where
        F: FnOnce() + Send + 'static,
    {
        let mut slot = self.lock();
        if slot.in_queue {
            slot.work = Some(Box::new(work));
        }
        slot.in_queue
    }

    #[must_use]
    pub fn is_in_queue(&self) -> bool {
        self.lock().in_queue
    }

    pub(super) fn run(&self) {
        let work = {
            let mut slot = self.lock();
            slot.in_queue = false;
            slot.work.take()
        };
        if let Some(work) = work {
            work();
        }
    }
}

impl Debug for QueueJumper {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let slot = self.lock();
        f.debug_struct("QueueJumper")
            .field("in_queue", &slot.in_queue)
            .field("has_work", &slot.work.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use super::*;
    use crate::scheduler::{Queue, ThreadPool};

    #[test]
    fn work_set_in_time_runs_in_slot() {
        let pool = ThreadPool::new("jumper", 0).unwrap();
        let queue = Queue::create();
        let jumper = QueueJumper::new();
        pool.schedule_jumper(&jumper, 1, queue.weak());

        let (tx, rx) = flume::unbounded();
        let tx2 = tx.clone();
        assert!(jumper.set_work(move || tx2.send("jumper").unwrap()));
        pool.schedule(move || tx.send("later").unwrap(), 1, queue.weak());

        pool.add_workers(1).unwrap();
        let timeout = Duration::from_secs(5);
        assert_eq!(rx.recv_timeout(timeout), Ok("jumper"));
        assert_eq!(rx.recv_timeout(timeout), Ok("later"));
        assert!(!jumper.is_in_queue());
    }

    #[test]
    fn late_work_is_rejected() {
        let pool = ThreadPool::new("jumper", 1).unwrap();
        let queue = Queue::create();
        let jumper = QueueJumper::new();
        pool.schedule_jumper(&jumper, 1, queue.weak());
        let done = pool.schedule_with_result(|| (), 0, queue.weak());
        done.recv_timeout(Duration::from_secs(5)).unwrap();

        let ran = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&ran);
        assert!(!jumper.set_work(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        }));
        assert_eq!(ran.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn replacing_work_keeps_last() {
        let jumper = QueueJumper::new();
        let ran = Arc::new(AtomicUsize::new(0));
        for add in [1, 10] {
            let ran = Arc::clone(&ran);
            assert!(jumper.set_work(move || {
                ran.fetch_add(add, Ordering::SeqCst);
            }));
        }
        jumper.run();
        assert_eq!(ran.load(Ordering::SeqCst), 10);
    }
}
