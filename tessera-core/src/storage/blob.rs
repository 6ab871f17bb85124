use std::fmt::{Debug, Formatter};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{
    Arc, Condvar, Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard, Weak,
};

use tessera_tile_utils::{decode_zlib, encode_zlib};
use tracing::{trace, warn};

use crate::config::StorageConfig;

/// Memory usage of a [`BlobStore`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreStats {
    /// Blobs currently allocated.
    pub blobs: usize,
    /// Bytes held by resident pages.
    pub resident_bytes: usize,
    /// Bytes held by idle blobs, compressed or not.
    pub stored_bytes: usize,
}

#[derive(Debug)]
struct StoreShared {
    compress: bool,
    level: u32,
    blobs: AtomicUsize,
    resident_bytes: AtomicUsize,
    stored_bytes: AtomicUsize,
}

/// Allocator of tile backing memory.
#[derive(Clone, Debug)]
pub struct BlobStore(Arc<StoreShared>);

impl BlobStore {
    #[must_use]
    pub fn new(config: &StorageConfig) -> Self {
        Self(Arc::new(StoreShared {
            compress: config.compress(),
            level: config.compression_level(),
            blobs: AtomicUsize::new(0),
            resident_bytes: AtomicUsize::new(0),
            stored_bytes: AtomicUsize::new(0),
        }))
    }

    /// Allocates a blob of `size` bytes. No memory is used until it is first accessed.
    #[must_use]
    pub fn allocate(&self, size: usize) -> Arc<Blob> {
        self.0.blobs.fetch_add(1, Ordering::Relaxed);
        Arc::new(Blob {
            size,
            store: Arc::clone(&self.0),
            slot: Mutex::new(Slot {
                stored: Stored::Empty,
                live: Weak::new(),
                live_generation: 0,
                stored_generation: 0,
            }),
            persisted: Condvar::new(),
        })
    }

    #[must_use]
    pub fn stats(&self) -> StoreStats {
        StoreStats {
            blobs: self.0.blobs.load(Ordering::Relaxed),
            resident_bytes: self.0.resident_bytes.load(Ordering::Relaxed),
            stored_bytes: self.0.stored_bytes.load(Ordering::Relaxed),
        }
    }
}

impl Default for BlobStore {
    fn default() -> Self {
        Self::new(&StorageConfig::default())
    }
}

enum Stored {
    Empty,
    Raw(Vec<u8>),
    Deflated(Vec<u8>),
}

impl Stored {
    fn len(&self) -> usize {
        match self {
            Self::Empty => 0,
            Self::Raw(data) | Self::Deflated(data) => data.len(),
        }
    }
}

struct Slot {
    stored: Stored,
    live: Weak<Page>,
    /// Generation of the most recently created page.
    live_generation: u64,
    /// Generation of the most recently persisted page.
    stored_generation: u64,
}

/// A fixed-size block of bytes, zero-filled until written.
pub struct Blob {
    size: usize,
    store: Arc<StoreShared>,
    slot: Mutex<Slot>,
    persisted: Condvar,
}

impl Blob {
    #[must_use]
    pub fn size(&self) -> usize {
        self.size
    }

    /// Fills the blob with `fill` and returns it for writing.
    pub fn initialize(self: &Arc<Self>, fill: u8) -> Arc<Page> {
        self.materialize(true, Some(fill))
    }

    /// Returns the bytes for writing. They are persisted again once every page handle is gone.
    pub fn get(self: &Arc<Self>) -> Arc<Page> {
        self.materialize(true, None)
    }

    /// Returns the bytes for reading, decompressing them if needed.
    pub fn get_const(self: &Arc<Self>) -> ConstPage {
        ConstPage(self.materialize(false, None))
    }

    /// Checks whether a page of this blob is currently held by someone.
    #[must_use]
    pub fn is_resident(&self) -> bool {
        self.lock().live.strong_count() > 0
    }

    /// Size of the idle representation, zero if nothing was stored yet.
    #[must_use]
    pub fn stored_len(&self) -> usize {
        self.lock().stored.len()
    }

    fn lock(&self) -> MutexGuard<'_, Slot> {
        self.slot.lock().expect("blob lock poisoned")
    }

    fn materialize(self: &Arc<Self>, dirty: bool, fill: Option<u8>) -> Arc<Page> {
        let mut slot = self.lock();
        loop {
            if let Some(page) = slot.live.upgrade() {
                drop(slot);
                if dirty {
                    page.dirty.store(true, Ordering::Release);
                }
                if let Some(fill) = fill {
                    page.write().fill(fill);
                }
                return page;
            }
            // A page that is being dropped must be persisted before its bytes can be reused.
            if slot.stored_generation >= slot.live_generation {
                break;
            }
            slot = self.persisted.wait(slot).expect("blob lock poisoned");
        }

        let bytes = match fill {
            Some(fill) => vec![fill; self.size],
            None => self.take_stored(&mut slot),
        };
        slot.live_generation += 1;
        let page = Arc::new(Page {
            bytes: RwLock::new(bytes),
            dirty: AtomicBool::new(dirty),
            generation: slot.live_generation,
            blob: Arc::downgrade(self),
            store: Arc::clone(&self.store),
        });
        slot.live = Arc::downgrade(&page);
        self.store
            .resident_bytes
            .fetch_add(self.size, Ordering::Relaxed);
        page
    }

    fn take_stored(&self, slot: &mut Slot) -> Vec<u8> {
        match std::mem::replace(&mut slot.stored, Stored::Empty) {
            Stored::Empty => vec![0; self.size],
            Stored::Raw(bytes) => {
                self.store
                    .stored_bytes
                    .fetch_sub(bytes.len(), Ordering::Relaxed);
                bytes
            }
            Stored::Deflated(data) => {
                let bytes = decode_zlib(&data, self.size).expect("stored blob data is corrupt");
                slot.stored = Stored::Deflated(data);
                bytes
            }
        }
    }

    fn persist(&self, generation: u64, bytes: Vec<u8>, dirty: bool) {
        let mut slot = self.lock();
        if dirty || matches!(slot.stored, Stored::Empty) {
            let stored = if self.store.compress {
                match encode_zlib(&bytes, self.store.level) {
                    Ok(data) => Stored::Deflated(data),
                    Err(e) => {
                        warn!("Unable to compress {} bytes, keeping them raw: {e}", bytes.len());
                        Stored::Raw(bytes)
                    }
                }
            } else {
                Stored::Raw(bytes)
            };
            trace!(
                "Persisted blob generation {generation}: {} -> {} bytes",
                self.size,
                stored.len()
            );
            self.store
                .stored_bytes
                .fetch_add(stored.len(), Ordering::Relaxed);
            self.store
                .stored_bytes
                .fetch_sub(slot.stored.len(), Ordering::Relaxed);
            slot.stored = stored;
        }
        slot.stored_generation = slot.stored_generation.max(generation);
        self.persisted.notify_all();
    }
}

impl Drop for Blob {
    fn drop(&mut self) {
        let slot = self.slot.get_mut().expect("blob lock poisoned");
        self.store
            .stored_bytes
            .fetch_sub(slot.stored.len(), Ordering::Relaxed);
        self.store.blobs.fetch_sub(1, Ordering::Relaxed);
    }
}

impl Debug for Blob {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Blob")
            .field("size", &self.size)
            .field("resident", &self.is_resident())
            .field("stored", &self.stored_len())
            .finish()
    }
}

/// Resident bytes of a [`Blob`].
pub struct Page {
    bytes: RwLock<Vec<u8>>,
    dirty: AtomicBool,
    generation: u64,
    blob: Weak<Blob>,
    store: Arc<StoreShared>,
}

impl Page {
    pub fn read(&self) -> RwLockReadGuard<'_, Vec<u8>> {
        self.bytes.read().expect("page lock poisoned")
    }

    pub fn write(&self) -> RwLockWriteGuard<'_, Vec<u8>> {
        self.dirty.store(true, Ordering::Release);
        self.bytes.write().expect("page lock poisoned")
    }

    #[must_use]
    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::Acquire)
    }
}

impl Drop for Page {
    fn drop(&mut self) {
        let bytes = std::mem::take(self.bytes.get_mut().expect("page lock poisoned"));
        self.store
            .resident_bytes
            .fetch_sub(bytes.len(), Ordering::Relaxed);
        if let Some(blob) = self.blob.upgrade() {
            blob.persist(self.generation, bytes, *self.dirty.get_mut());
        }
    }
}

impl Debug for Page {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Page")
            .field("generation", &self.generation)
            .field("dirty", &self.is_dirty())
            .finish_non_exhaustive()
    }
}

/// Read-only access to resident bytes of a [`Blob`].
#[derive(Clone, Debug)]
pub struct ConstPage(Arc<Page>);

impl ConstPage {
    pub fn read(&self) -> RwLockReadGuard<'_, Vec<u8>> {
        self.0.read()
    }

    /// Checks that both handles share the same resident bytes.
    #[must_use]
    pub fn same_page(&self, page: &Arc<Page>) -> bool {
        Arc::ptr_eq(&self.0, page)
    }
}
