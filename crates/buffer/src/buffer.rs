//! The buffer coordinator. A `PriorityBuffer` owns a hot set of in-memory
//! items, a catalog indexing every buffered item by priority, and a blob
//! store for spilled serializations. Pushes admit items to the hot set and
//! restore the memory and disk capacity invariants by demoting and evicting
//! the lowest-priority records; pops always take the highest-priority record
//! across both tiers. Dropping the buffer flushes the hot set to disk so a
//! buffer reopened on the same directory sees every record that was left.

use std::{
    collections::HashMap,
    io::{BufReader, BufWriter, Write},
    path::PathBuf,
    sync::{Condvar, Mutex, MutexGuard},
    thread,
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use rand::{RngExt, SeedableRng, distr::Alphanumeric, rngs::{StdRng, SysRng}};
use tracing::{trace, warn};

use crate::{
    catalog::{CATALOG_FILE, Catalog, CatalogRecord},
    codec::Codec,
    errors::{BufferError, CatalogError, StoreError},
    store::FileStore,
};

/// Default cap on the total serialized bytes of the disk tier.
pub const DEFAULT_MAX_DISK_BYTES: u64 = 100_000_000;

/// Default cap on the number of hot-set entries.
pub const DEFAULT_MAX_MEMORY: u32 = 50;

/// Default name of the managed directory, created under the OS temp
/// directory unless a parent is configured.
pub const DEFAULT_DIRECTORY: &str = "prism_buffer";

/// Length of a minted blob identifier.
const HASH_LEN: usize = 32;

type PriorityFn<T> = Box<dyn Fn(&T) -> u64 + Send + Sync>;

/// State guarded by the buffer lock. Serialization I/O during demotion and
/// flush happens while this is held, keeping blob writes ordered with
/// concurrent pops; only the jitter sleep runs outside.
struct Inner<T> {
    hot: HashMap<String, T>,
    catalog: Catalog,
    rng: StdRng,
    jitter_ms: (u64, u64),
}

impl<T> Inner<T> {
    /// Samples the post-pop pause. A range with `lo == 0` or `hi < lo` is
    /// disabled.
    fn jitter_pause(&mut self) -> Option<Duration> {
        let (lo_ms, hi_ms) = self.jitter_ms;
        if lo_ms == 0 || hi_ms < lo_ms {
            return None;
        }

        Some(Duration::from_millis(self.rng.random_range(lo_ms..=hi_ms)))
    }

    /// Mints a fresh 32-character alphanumeric blob identifier.
    fn mint_hash(&mut self) -> String {
        (0..HASH_LEN)
            .map(|_| self.rng.sample(Alphanumeric) as char)
            .collect()
    }
}

/// A bounded, thread-safe priority buffer that spills to disk.
///
/// Items enter through [`push`](PriorityBuffer::push) and leave through
/// [`pop`](PriorityBuffer::pop) in descending priority order, regardless of
/// which tier they currently occupy. The hot set holds at most `max_memory`
/// items; everything beyond that lives as blob files whose total size is
/// bounded by `max_disk_bytes`, with the lowest-priority records evicted
/// outright once the disk tier overflows.
pub struct PriorityBuffer<T: Codec> {
    store: FileStore,
    priority_fn: PriorityFn<T>,
    max_memory: u32,
    inner: Mutex<Inner<T>>,
    not_empty: Condvar,
}

impl<T: Codec> PriorityBuffer<T> {
    /// Creates a buffer with the default configuration.
    pub fn new() -> Result<Self, BufferError> {
        Self::builder().build()
    }

    /// Starts configuring a buffer.
    pub fn builder() -> BufferBuilder<T> {
        BufferBuilder::new()
    }

    /// Hands an item to the buffer.
    ///
    /// The item is indexed under a freshly minted hash and admitted to the
    /// hot set, then the capacity invariants are restored: while the hot set
    /// exceeds its cap the lowest-priority in-memory item is demoted to a
    /// blob, and while the disk tier exceeds its byte cap the
    /// lowest-priority on-disk record is evicted for good. One blocked
    /// [`pop_wait`](PriorityBuffer::pop_wait) is woken afterwards.
    pub fn push(&self, item: T) -> Result<(), BufferError> {
        let priority = (self.priority_fn)(&item);
        let size = item.byte_size();

        let mut inner = self.lock_inner();
        let hash = inner.mint_hash();

        inner.catalog.insert(&CatalogRecord {
            priority,
            hash: hash.clone(),
            size,
            on_disk: false,
        })?;
        inner.hot.insert(hash, item);

        while inner.hot.len() > self.max_memory as usize {
            let Some(lowest) = inner.catalog.lowest_in_memory()? else {
                break;
            };
            self.demote(&mut inner, &lowest)?;
        }

        while inner.catalog.full()? {
            let Some(lowest) = inner.catalog.lowest_on_disk()? else {
                break;
            };
            trace!(hash = %lowest, "evicting the lowest-priority on-disk item");
            self.store.delete(&lowest);
            inner.catalog.delete(&lowest)?;
        }

        drop(inner);
        self.not_empty.notify_one();

        Ok(())
    }

    /// Takes the highest-priority item, or `None` when the buffer is empty
    /// or the targeted item cannot be produced (its blob was deleted or
    /// corrupted externally). Never blocks; popping again after `None` on a
    /// non-empty buffer yields the next-highest item.
    pub fn pop(&self) -> Result<Option<T>, BufferError> {
        self.take(false)
    }

    /// Like [`pop`](PriorityBuffer::pop), but an empty buffer blocks until a
    /// push arrives. There is no timeout and no cancellation; callers that
    /// need either should poll `pop` instead. A missing blob still returns
    /// `None` rather than re-blocking.
    pub fn pop_wait(&self) -> Result<Option<T>, BufferError> {
        self.take(true)
    }

    /// Replaces the jitter range applied after each pop. Milliseconds; the
    /// range is inclusive, and `lo == 0`, `hi == 0`, or `lo > hi` disables
    /// the pause.
    pub fn set_jitter(&self, lo_ms: u64, hi_ms: u64) {
        self.lock_inner().jitter_ms = (lo_ms, hi_ms);
    }

    fn take(&self, block: bool) -> Result<Option<T>, BufferError> {
        let mut inner = self.lock_inner();

        let popped = loop {
            match inner.catalog.highest()? {
                Some((hash, on_disk)) => {
                    // Deleting the record first makes this call the item's
                    // sole owner before any I/O happens.
                    inner.catalog.delete(&hash)?;
                    if on_disk {
                        break self.read_blob(&hash);
                    }
                    break inner.hot.remove(&hash);
                }
                None if block => {
                    inner = self
                        .not_empty
                        .wait(inner)
                        .expect("priority buffer lock poisoned");
                }
                None => break None,
            }
        };

        let pause = inner.jitter_pause();
        drop(inner);
        if let Some(pause) = pause {
            thread::sleep(pause);
        }

        Ok(popped)
    }

    /// Moves the in-memory item named by `hash` onto the disk tier. A record
    /// with no matching hot-set entry is dropped outright so the capacity
    /// loop cannot be handed the same hash forever.
    fn demote(&self, inner: &mut Inner<T>, hash: &str) -> Result<(), CatalogError> {
        match inner.hot.remove(hash) {
            Some(item) => self.spill(&inner.catalog, hash, &item),
            None => {
                warn!(hash, "catalog names an in-memory item the hot set does not hold");
                inner.catalog.delete(hash)
            }
        }
    }

    /// Writes `item` to its blob and flips the record's tier flag. The blob
    /// is written before the flag flips so a concurrent observer never sees
    /// an on-disk record without a file behind it. On a write failure,
    /// including a foreign file already sitting at the blob path, the blob
    /// and the record are removed best-effort and the item is dropped.
    fn spill(&self, catalog: &Catalog, hash: &str, item: &T) -> Result<(), CatalogError> {
        match self.write_blob(hash, item) {
            Ok(()) => catalog.update_tier(hash, true),
            Err(err) => {
                warn!(hash, error = %err, "failed to spill item; dropping its record");
                self.store.delete(hash);
                catalog.delete(hash)
            }
        }
    }

    fn write_blob(&self, hash: &str, item: &T) -> Result<(), StoreError> {
        let file = self.store.open_write(hash)?;
        let mut writer = BufWriter::new(file);
        item.serialize(&mut writer)?;
        writer.flush()?;

        Ok(())
    }

    /// Reads an item back from its blob and deletes the blob. Unreadable,
    /// unparseable, and uninitialized payloads all degrade to `None`; the
    /// record is already gone, so the next pop moves on to the next record.
    fn read_blob(&self, hash: &str) -> Option<T> {
        let file = match self.store.open_read(hash) {
            Ok(file) => file,
            Err(err) => {
                warn!(hash, error = %err, "on-disk record has no readable blob");
                return None;
            }
        };

        let mut reader = BufReader::new(file);
        let parsed = T::parse(&mut reader);
        self.store.delete(hash);

        match parsed {
            Ok(item) if item.is_initialized() => Some(item),
            Ok(_) => {
                warn!(hash, "blob parsed into an uninitialized item");
                None
            }
            Err(err) => {
                warn!(hash, error = %err, "failed to parse blob");
                None
            }
        }
    }

    fn lock_inner(&self) -> MutexGuard<'_, Inner<T>> {
        self.inner.lock().expect("priority buffer lock poisoned")
    }
}

impl<T: Codec> Drop for PriorityBuffer<T> {
    /// Flushes every remaining hot-set item to a blob so the catalog rows
    /// survive for the next buffer opened on this directory. Disk eviction
    /// does not run here; whatever records exist are preserved as they are.
    fn drop(&mut self) {
        let mut guard = match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        let inner = &mut *guard;
        for (hash, item) in inner.hot.drain() {
            if let Err(err) = self.spill(&inner.catalog, &hash, &item) {
                warn!(hash = %hash, error = %err, "catalog unavailable while flushing the hot set");
            }
        }
    }
}

/// Configuration for a [`PriorityBuffer`], created by
/// [`PriorityBuffer::builder`]. Every option has a default; the priority
/// function defaults to the wall clock at push time, which makes pops return
/// the most recently pushed items first.
pub struct BufferBuilder<T> {
    priority_fn: PriorityFn<T>,
    max_disk_bytes: u64,
    max_memory: u32,
    directory: String,
    parent: Option<PathBuf>,
    jitter_ms: (u64, u64),
}

impl<T: Codec> BufferBuilder<T> {
    fn new() -> Self {
        Self {
            priority_fn: Box::new(|_| clock_priority()),
            max_disk_bytes: DEFAULT_MAX_DISK_BYTES,
            max_memory: DEFAULT_MAX_MEMORY,
            directory: String::from(DEFAULT_DIRECTORY),
            parent: None,
            jitter_ms: (0, 0),
        }
    }

    /// The function that assigns each pushed item its priority.
    pub fn priority_fn(mut self, f: impl Fn(&T) -> u64 + Send + Sync + 'static) -> Self {
        self.priority_fn = Box::new(f);
        self
    }

    /// Byte cap on the disk tier. Zero is rejected at build time.
    pub fn max_disk_bytes(mut self, bytes: u64) -> Self {
        self.max_disk_bytes = bytes;
        self
    }

    /// Entry cap on the hot set. Zero sends every item straight to disk.
    pub fn max_memory(mut self, entries: u32) -> Self {
        self.max_memory = entries;
        self
    }

    /// Name of the managed directory.
    pub fn directory(mut self, name: impl Into<String>) -> Self {
        self.directory = name.into();
        self
    }

    /// Parent of the managed directory, instead of the OS temp directory.
    pub fn parent(mut self, path: impl Into<PathBuf>) -> Self {
        self.parent = Some(path.into());
        self
    }

    /// Initial post-pop jitter range, in milliseconds.
    pub fn jitter(mut self, lo_ms: u64, hi_ms: u64) -> Self {
        self.jitter_ms = (lo_ms, hi_ms);
        self
    }

    /// Creates the managed directory and opens the catalog inside it.
    pub fn build(self) -> Result<PriorityBuffer<T>, BufferError> {
        let store = FileStore::create(&self.directory, self.parent.as_deref())?;
        let catalog = Catalog::open(self.max_disk_bytes, &store.path_of(CATALOG_FILE))?;

        Ok(PriorityBuffer {
            store,
            priority_fn: self.priority_fn,
            max_memory: self.max_memory,
            inner: Mutex::new(Inner {
                hot: HashMap::new(),
                catalog,
                rng: StdRng::try_from_rng(&mut SysRng).unwrap(),
                jitter_ms: self.jitter_ms,
            }),
            not_empty: Condvar::new(),
        })
    }
}

/// The default priority: nanoseconds since the Unix epoch when the item is
/// pushed.
fn clock_priority() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_nanos() as u64)
        .unwrap_or(0)
}
