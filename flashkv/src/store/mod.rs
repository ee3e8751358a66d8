//! Key-value store
//!
//! This is the main data structure exposed by the library.
//!

use std::cell::RefCell;
use std::fmt::Debug;
use std::path::Path;

use parking_lot::{ReentrantMutex, ReentrantMutexGuard};
use serde::de::DeserializeOwned;
use serde::Serialize;

use self::engine::Engine;
use crate::error::{ErrorFlags, KvError, Result};
use crate::io::file::Storage;
use crate::io::free::FreeBlock;
use crate::options::Options;

pub use self::engine::State;
pub use self::iter::Iter;

mod engine;
mod iter;

/// Keys which we wish to store in a flashkv store.
pub trait KvKey: Clone + Ord + Serialize + DeserializeOwned + Debug {}

// Blanket implementation which satisfies the compiler
impl<K> KvKey for K
where
    K: Clone + Ord + Serialize + DeserializeOwned + Debug,
{
    // Nothing to implement, since K already supports the other traits.
}

/// Values which we wish to store in a flashkv store.
pub trait KvValue: Clone + Serialize + DeserializeOwned + Debug {}

// Blanket implementation which satisfies the compiler
impl<V> KvValue for V
where
    V: Clone + Serialize + DeserializeOwned + Debug,
{
    // Nothing to implement, since V already supports the other traits.
}

/// A key-value store over a single data file.
///
/// All operations take `&self` and are serialized by a re-entrant lock, so a store can
/// be shared between threads and called again from inside an
/// [`update_with`](KvStore::update_with) callback. Every error an operation returns is
/// also recorded in the store's [`ErrorFlags`].
pub struct KvStore<K, V> {
    engine: ReentrantMutex<RefCell<Engine<K, V>>>,
}

impl<K, V> Default for KvStore<K, V>
where
    K: KvKey,
    V: KvValue,
{
    fn default() -> Self {
        Self::new(Options::default())
    }
}

impl<K, V> KvStore<K, V>
where
    K: KvKey,
    V: KvValue,
{
    /// Create an unloaded store. Attach a data file with [`KvStore::load_data`].
    pub fn new(options: Options) -> Self {
        Self {
            engine: ReentrantMutex::new(RefCell::new(Engine::new(options))),
        }
    }

    /// Create a store and load the data file at the specified path.
    pub fn try_open<P: AsRef<Path>>(path: P, options: Options) -> Result<Self> {
        let store = Self::new(options);
        store.load_data(path)?;
        Ok(store)
    }

    /// Acquire the store's lock for a sequence of operations. The lock is released
    /// when the guard is dropped.
    pub fn lock(&self) -> KvGuard<'_, K, V> {
        KvGuard {
            store: self,
            guard: self.engine.lock(),
        }
    }

    /// Iterate `(key, block offset)` pairs in ascending key order.
    ///
    /// The iterator holds the store's lock until it is dropped. While it is alive,
    /// inserts, deletes and truncation fail with [`KvError::CantDoItNow`]. Values are
    /// not read; pass an offset to [`KvStore::find_value_at`] to fetch one.
    pub fn iter(&self) -> Iter<'_, K, V> {
        Iter::new(self.engine.lock())
    }

    /// See [`KvGuard::load_data`].
    pub fn load_data<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        self.lock().load_data(path)
    }

    /// See [`KvGuard::load_storage`].
    pub fn load_storage(&self, storage: Box<dyn Storage>) -> Result<()> {
        self.lock().load_storage(storage)
    }

    /// See [`KvGuard::insert`].
    pub fn insert(&self, key: K, value: V) -> Result<()> {
        self.lock().insert(key, value)
    }

    /// See [`KvGuard::find_block_offset`].
    pub fn find_block_offset(&self, key: &K) -> Result<u32> {
        self.lock().find_block_offset(key)
    }

    /// See [`KvGuard::find_value`].
    pub fn find_value(&self, key: &K) -> Result<V> {
        self.lock().find_value(key)
    }

    /// See [`KvGuard::find_value_at`].
    pub fn find_value_at(&self, key: &K, offset: u32) -> Result<V> {
        self.lock().find_value_at(key, offset)
    }

    /// See [`KvGuard::update`].
    pub fn update(&self, key: &K, value: V) -> Result<()> {
        self.lock().update(key, value)
    }

    /// See [`KvGuard::update_at`].
    pub fn update_at(&self, key: &K, value: V, offset: u32) -> Result<()> {
        self.lock().update_at(key, value, offset)
    }

    /// See [`KvGuard::update_with`].
    pub fn update_with(&self, key: &K, f: impl FnOnce(V) -> V) -> Result<()> {
        self.lock().update_with(key, f)
    }

    /// See [`KvGuard::upsert`].
    pub fn upsert(&self, key: K, value: V) -> Result<()> {
        self.lock().upsert(key, value)
    }

    /// See [`KvGuard::upsert_with`].
    pub fn upsert_with(&self, key: K, f: impl FnOnce(V) -> V, default: V) -> Result<()> {
        self.lock().upsert_with(key, f, default)
    }

    /// See [`KvGuard::delete`].
    pub fn delete(&self, key: &K) -> Result<()> {
        self.lock().delete(key)
    }

    /// See [`KvGuard::truncate`].
    pub fn truncate(&self) -> Result<()> {
        self.lock().truncate()
    }

    /// See [`KvGuard::close`].
    pub fn close(&self) -> Result<()> {
        self.lock().close()
    }

    /// See [`KvGuard::flush`].
    pub fn flush(&self) -> Result<()> {
        self.lock().flush()
    }

    /// See [`KvGuard::verify`].
    pub fn verify(&self) -> Result<()> {
        self.lock().verify()
    }

    /// Number of keys.
    pub fn size(&self) -> usize {
        self.lock().size()
    }

    /// Is the store empty?
    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    /// Length of the data file in bytes.
    pub fn data_file_size(&self) -> u64 {
        self.lock().data_file_size()
    }

    /// Blocks currently available for reuse.
    pub fn free_blocks(&self) -> Vec<FreeBlock> {
        self.lock().free_blocks()
    }

    /// Errors recorded since the last [`KvStore::clear_errors`].
    pub fn errors(&self) -> ErrorFlags {
        self.lock().errors()
    }

    /// Reset the error register.
    pub fn clear_errors(&self) {
        self.lock().clear_errors()
    }

    /// Lifecycle state.
    pub fn state(&self) -> State {
        self.lock().state()
    }

    /// Log basic information about the store.
    pub fn info(&self) {
        self.lock().info()
    }
}

impl<'a, K, V> IntoIterator for &'a KvStore<K, V>
where
    K: KvKey,
    V: KvValue,
{
    type Item = (K, u32);
    type IntoIter = Iter<'a, K, V>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Exclusive access to a [`KvStore`] for a sequence of operations.
///
/// Other threads block until the guard is dropped. The owning thread may keep using
/// the store directly while holding a guard.
pub struct KvGuard<'a, K, V> {
    store: &'a KvStore<K, V>,
    guard: ReentrantMutexGuard<'a, RefCell<Engine<K, V>>>,
}

impl<'a, K, V> KvGuard<'a, K, V>
where
    K: KvKey,
    V: KvValue,
{
    /// Run an engine operation and record its outcome.
    ///
    /// The engine is only borrowed for the duration of `f`, which never calls back out.
    fn with<T>(&self, f: impl FnOnce(&mut Engine<K, V>) -> Result<T>) -> Result<T> {
        let mut engine = self.guard.borrow_mut();
        let result = f(&mut engine);
        engine.errors.record(result)
    }

    fn record<T>(&self, result: Result<T>) -> Result<T> {
        self.guard.borrow_mut().errors.record(result)
    }

    /// Open (creating if missing) the data file at `path` and rebuild the index from it.
    ///
    /// Fails with [`KvError::CantDoItNow`] if the store is already loaded and
    /// [`KvError::FileIo`] if the file can't be opened or scanned.
    pub fn load_data<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        self.with(|engine| engine.load_path(path))
    }

    /// Load from an already opened [`Storage`].
    pub fn load_storage(&self, storage: Box<dyn Storage>) -> Result<()> {
        self.with(|engine| engine.load(storage, None))
    }

    /// Insert a new key and value.
    ///
    /// The value goes into the free block which wastes the least space, or is appended
    /// to the file with extra room for growth. Fails with [`KvError::NotUnique`] if the
    /// key is present.
    pub fn insert(&self, key: K, value: V) -> Result<()> {
        self.with(|engine| engine.insert(key, &value))
    }

    /// Offset of the block holding `key`. Never touches the file.
    pub fn find_block_offset(&self, key: &K) -> Result<u32> {
        self.with(|engine| engine.find_block_offset(key))
    }

    /// Read the value for `key`.
    pub fn find_value(&self, key: &K) -> Result<V> {
        self.with(|engine| engine.find_value(key, None))
    }

    /// Read the value for `key` from a block offset already known to the caller, such
    /// as one produced by iteration. Fails with [`KvError::DataChanged`] if that block
    /// no longer holds `key`.
    pub fn find_value_at(&self, key: &K, offset: u32) -> Result<V> {
        self.with(|engine| engine.find_value(key, Some(offset)))
    }

    /// Replace the value for `key`.
    ///
    /// The block is rewritten in place if the new value fits, otherwise the entry moves
    /// to a new block and the old one is freed.
    pub fn update(&self, key: &K, value: V) -> Result<()> {
        self.with(|engine| engine.update(key, &value, None))
    }

    /// As [`KvGuard::update`], reading the existing block from a known offset.
    pub fn update_at(&self, key: &K, value: V, offset: u32) -> Result<()> {
        self.with(|engine| engine.update(key, &value, Some(offset)))
    }

    /// Replace the value for `key` with `f(current value)`, all under the lock.
    ///
    /// `f` may use the store itself.
    pub fn update_with(&self, key: &K, f: impl FnOnce(V) -> V) -> Result<()> {
        let result = self.read_modify_write(key, f);
        self.record(result)
    }

    fn read_modify_write(&self, key: &K, f: impl FnOnce(V) -> V) -> Result<()> {
        let value = self.guard.borrow_mut().find_value(key, None)?;
        let value = f(value);
        self.guard.borrow_mut().update(key, &value, None)
    }

    /// Insert, or update if the key is already present.
    pub fn upsert(&self, key: K, value: V) -> Result<()> {
        self.with(|engine| match engine.insert(key.clone(), &value) {
            Err(KvError::NotUnique) => engine.update(&key, &value, None),
            result => result,
        })
    }

    /// Insert `default`, or update with `f` if the key is already present.
    pub fn upsert_with(&self, key: K, f: impl FnOnce(V) -> V, default: V) -> Result<()> {
        let inserted = self.guard.borrow_mut().insert(key.clone(), &default);
        let result = match inserted {
            Err(KvError::NotUnique) => self.read_modify_write(&key, f),
            result => result,
        };
        self.record(result)
    }

    /// Remove `key` and free its block.
    pub fn delete(&self, key: &K) -> Result<()> {
        self.with(|engine| engine.delete(key))
    }

    /// Empty the data file, the index and the free list.
    pub fn truncate(&self) -> Result<()> {
        self.with(|engine| engine.truncate())
    }

    /// Flush and detach the data file. The store can be loaded again afterwards.
    pub fn close(&self) -> Result<()> {
        self.with(|engine| engine.close())
    }

    /// Make previous writes durable.
    pub fn flush(&self) -> Result<()> {
        self.with(|engine| engine.flush())
    }

    /// Check that the data file, the index and the free list agree.
    pub fn verify(&self) -> Result<()> {
        self.with(|engine| engine.verify())
    }

    /// Iterate `(key, block offset)` pairs. See [`KvStore::iter`].
    pub fn iter(&self) -> Iter<'a, K, V> {
        self.store.iter()
    }

    /// Number of keys.
    pub fn size(&self) -> usize {
        self.guard.borrow().size()
    }

    /// Length of the data file in bytes.
    pub fn data_file_size(&self) -> u64 {
        self.guard.borrow().data_file_size()
    }

    /// Blocks currently available for reuse.
    pub fn free_blocks(&self) -> Vec<FreeBlock> {
        self.guard.borrow().free_blocks()
    }

    /// Errors recorded since the last clear.
    pub fn errors(&self) -> ErrorFlags {
        self.guard.borrow().errors
    }

    /// Reset the error register.
    pub fn clear_errors(&self) {
        self.guard.borrow_mut().errors.clear();
    }

    /// Lifecycle state.
    pub fn state(&self) -> State {
        self.guard.borrow().state()
    }

    /// Log basic information about the store.
    pub fn info(&self) {
        self.guard.borrow().info()
    }
}
