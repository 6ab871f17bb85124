//! Observer subscriptions owned by disposable tokens.
//!
//! A [`Registry`] keeps weak references to its observers. Registering returns a
//! [`Registration`]; the subscription lasts exactly as long as that token. Events are
//! delivered from a [`Registry::snapshot`], so no lock is held while observers run.

use std::any::Any;
use std::fmt::{Debug, Formatter};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

struct Entries<O: ?Sized> {
    next_id: u64,
    observers: Vec<(u64, Weak<O>)>,
}

/// A set of weakly held observers of type `O`.
pub struct Registry<O: ?Sized> {
    entries: Arc<Mutex<Entries<O>>>,
}

impl<O: ?Sized + Send + Sync + 'static> Registry<O> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: Arc::new(Mutex::new(Entries {
                next_id: 0,
                observers: Vec::new(),
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Entries<O>> {
        self.entries.lock().expect("registry lock poisoned")
    }

    /// Subscribes `observer` until the returned token is dropped.
    ///
    /// # Panics
    ///
    /// Registering an observer that is already subscribed is a programming error.
    pub fn register(&self, observer: &Arc<O>) -> Registration {
        let id = {
            let mut entries = self.lock();
            assert!(
                !entries
                    .observers
                    .iter()
                    .any(|(_, o)| std::ptr::addr_eq(o.as_ptr(), Arc::as_ptr(observer))),
                "observer registered twice"
            );
            let id = entries.next_id;
            entries.next_id += 1;
            entries.observers.push((id, Arc::downgrade(observer)));
            id
        };
        let entries = Arc::downgrade(&self.entries);
        Registration::new(move || {
            if let Some(entries) = entries.upgrade() {
                entries
                    .lock()
                    .expect("registry lock poisoned")
                    .observers
                    .retain(|(i, _)| *i != id);
            }
        })
    }

    /// The observers alive right now, in registration order.
    #[must_use]
    pub fn snapshot(&self) -> Vec<Arc<O>> {
        let mut entries = self.lock();
        entries.observers.retain(|(_, o)| o.strong_count() > 0);
        entries
            .observers
            .iter()
            .filter_map(|(_, o)| o.upgrade())
            .collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().observers.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<O: ?Sized + Send + Sync + 'static> Default for Registry<O> {
    fn default() -> Self {
        Self::new()
    }
}

impl<O: ?Sized> Debug for Registry<O> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let count = self
            .entries
            .lock()
            .map_or(0, |entries| entries.observers.len());
        f.debug_struct("Registry")
            .field("observers", &count)
            .finish()
    }
}

/// Keeps a subscription, and anything attached to it, alive until dropped.
#[must_use = "dropping a registration ends the subscription"]
pub struct Registration {
    unsubscribe: Option<Box<dyn FnOnce() + Send + Sync>>,
    attached: Vec<Arc<dyn Any + Send + Sync>>,
}

impl Registration {
    fn new(unsubscribe: impl FnOnce() + Send + Sync + 'static) -> Self {
        Self {
            unsubscribe: Some(Box::new(unsubscribe)),
            attached: Vec::new(),
        }
    }

    /// Ties the lifetime of `resource` to this registration. It is released after unsubscribing.
    pub fn attach(&mut self, resource: Arc<dyn Any + Send + Sync>) {
        self.attached.push(resource);
    }

    #[must_use]
    pub fn attached_count(&self) -> usize {
        self.attached.len()
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        if let Some(unsubscribe) = self.unsubscribe.take() {
            unsubscribe();
        }
    }
}

impl Debug for Registration {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registration")
            .field("attached", &self.attached.len())
            .finish_non_exhaustive()
    }
}
