//! Engine internals
//!
//! Everything here runs with the store's lock held. The index is always updated
//! before the matching write is attempted, and compensated if that write fails.

use std::io;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};

use strum::Display;

use super::{KvKey, KvValue};
use crate::error::{ErrorFlags, KvError, Result};
use crate::io::block::{self, Header};
use crate::io::file::{DiskFile, Storage};
use crate::io::free::{FreeBlock, FreeList};
use crate::map::Map;
use crate::options::Options;

/// Lifecycle of a store.
#[derive(Clone, Copy, Debug, Display, Eq, PartialEq)]
#[strum(serialize_all = "lowercase")]
pub enum State {
    /// No data file attached.
    Unloaded,
    /// Scanning a data file.
    Loading,
    /// Ready for use.
    Loaded,
    /// A failed rollback left memory and file out of step. Every operation fails.
    Closed,
}

/// Where a block is about to be written.
#[derive(Clone, Copy, Debug)]
struct Placement {
    offset: u32,
    size: usize,
    /// Position in the free list of the block being reused, if any
    reused: Option<usize>,
}

pub(crate) struct Engine<K, V> {
    state: State,
    file: Option<Box<dyn Storage>>,
    path: Option<PathBuf>,
    pub(super) index: Map<K, u32>,
    free: FreeList,
    file_size: u64,
    pub(super) iterators: usize,
    pub(super) errors: ErrorFlags,
    options: Options,
    _value: PhantomData<fn() -> V>,
}

fn io_failure(context: &'static str) -> impl Fn(io::Error) -> KvError {
    move |e| {
        tracing::error!("{context}: {e}");
        KvError::FileIo
    }
}

impl<K, V> Engine<K, V> {
    pub(super) fn new(options: Options) -> Self {
        Self {
            state: State::Unloaded,
            file: None,
            path: None,
            index: Map::new(),
            free: FreeList::default(),
            file_size: 0,
            iterators: 0,
            errors: ErrorFlags::new(),
            options,
            _value: PhantomData,
        }
    }

    pub(super) fn state(&self) -> State {
        self.state
    }

    pub(super) fn size(&self) -> usize {
        self.index.len()
    }

    pub(super) fn data_file_size(&self) -> u64 {
        self.file_size
    }

    pub(super) fn free_blocks(&self) -> Vec<FreeBlock> {
        self.free.iter().copied().collect()
    }

    fn check_loaded(&self) -> Result<()> {
        match (self.state, &self.file) {
            (State::Loaded, Some(_)) => Ok(()),
            _ => Err(KvError::FileIo),
        }
    }

    fn check_not_iterating(&self) -> Result<()> {
        if self.iterators > 0 {
            return Err(KvError::CantDoItNow);
        }
        Ok(())
    }

    fn storage(&mut self) -> Result<&mut (dyn Storage + 'static)> {
        match (self.state, self.file.as_deref_mut()) {
            (State::Loaded, Some(file)) => Ok(file),
            _ => Err(KvError::FileIo),
        }
    }

    fn reset(&mut self) {
        self.index.clear();
        self.free.clear();
        self.file_size = 0;
    }

    /// Give up on this instance: memory and file can no longer be trusted to agree.
    fn close_fatal(&mut self) {
        if self.state == State::Closed {
            return;
        }
        tracing::error!(
            path = ?self.path,
            "index and data file are out of step, closing store"
        );
        self.file = None;
        self.reset();
        self.state = State::Closed;
    }

    pub(super) fn close(&mut self) -> Result<()> {
        self.check_not_iterating()?;
        if self.state == State::Closed {
            return Ok(());
        }
        let flushed = match self.file.take() {
            Some(mut file) => file
                .flush()
                .map_err(io_failure("could not flush data file")),
            None => Ok(()),
        };
        self.reset();
        self.path = None;
        self.state = State::Unloaded;
        flushed
    }

    pub(super) fn flush(&mut self) -> Result<()> {
        self.storage()?
            .flush()
            .map_err(io_failure("could not flush data file"))
    }

    pub(super) fn truncate(&mut self) -> Result<()> {
        self.check_not_iterating()?;
        if let Err(e) = self.storage()?.truncate() {
            tracing::error!("could not truncate data file: {e}");
            self.close_fatal();
            return Err(KvError::FileIo);
        }
        self.reset();
        tracing::info!(path = ?self.path, "truncated key-value store");
        Ok(())
    }

    /// Log basic information about the store.
    pub(super) fn info(&self) {
        tracing::info!(
            path = ?self.path,
            state = %self.state,
            entries = self.index.len(),
            height = self.index.height(),
            file_size = self.file_size,
            free_blocks = self.free.len(),
            free_bytes = self.free.total(),
            "key-value store"
        );
    }

    fn place(&self, data: usize) -> Result<Placement> {
        if let Some(pos) = self.free.best_fit(data) {
            if let Some(block) = self.free.get(pos) {
                return Ok(Placement {
                    offset: block.offset,
                    size: block.size,
                    reused: Some(pos),
                });
            }
        }
        let size = block::reserve(data, self.options.percent_free);
        let offset = u32::try_from(self.file_size)
            .ok()
            .filter(|offset| u64::from(*offset) + size as u64 <= u64::from(u32::MAX))
            .ok_or_else(|| {
                tracing::error!("data file cannot grow past {} bytes", u32::MAX);
                KvError::BadAlloc
            })?;
        Ok(Placement {
            offset,
            size,
            reused: None,
        })
    }

    fn write_placed(&mut self, placement: Placement, mut data: Vec<u8>) -> Result<()> {
        block::frame(&mut data, placement.size, placement.reused.is_none());
        self.storage()?
            .write_all_at(u64::from(placement.offset), &data)
            .map_err(io_failure("could not write block"))
    }

    /// Remove whatever part of a failed block write reached the file. A reused block
    /// gets its free marker back, an append is cut off at the tracked file size.
    fn discard(&mut self, placement: Placement) {
        let file_size = self.file_size;
        let Ok(file) = self.storage() else {
            return;
        };
        let repaired = match placement.reused {
            Some(_) => file.write_all_at(
                u64::from(placement.offset),
                &block::free_marker(placement.size),
            ),
            None => file.set_len(file_size),
        };
        if let Err(e) = repaired {
            tracing::error!(
                offset = placement.offset,
                "could not discard partly written block: {e}"
            );
            self.close_fatal();
        }
    }

    /// Account for a successfully written placement.
    fn commit(&mut self, placement: Placement) {
        match placement.reused {
            Some(pos) => {
                self.free.take(pos);
            }
            None => self.file_size += placement.size as u64,
        }
        tracing::debug!(
            offset = placement.offset,
            size = placement.size,
            reused = placement.reused.is_some(),
            "placed block"
        );
    }

    fn mark_free(&mut self, offset: u32, size: usize) -> Result<()> {
        self.storage()?
            .write_all_at(u64::from(offset), &block::free_marker(size))
            .map_err(io_failure("could not mark block free"))
    }

    /// Read a block of any kind, header included.
    fn read_any(&mut self, offset: u64) -> Result<(Header, Vec<u8>)> {
        let file = self.storage()?;
        let header = block::read_header(file, offset)
            .map_err(io_failure("could not read block header"))?
            .ok_or_else(|| {
                tracing::error!("invalid block header at offset {offset}");
                KvError::DataChanged
            })?;
        let buf = block::read_block(file, offset, header.size())
            .map_err(io_failure("could not read block"))?;
        Ok((header, buf))
    }

    /// Read a block which is expected to be in use.
    fn read_used(&mut self, offset: u32) -> Result<Vec<u8>> {
        match self.read_any(u64::from(offset))? {
            (Header::Used(_), buf) => Ok(buf),
            (Header::Free(_), _) => {
                tracing::warn!("block at offset {offset} is not in use");
                Err(KvError::DataChanged)
            }
        }
    }
}

impl<K, V> Engine<K, V>
where
    K: KvKey,
    V: KvValue,
{
    fn check_loadable(&self) -> Result<()> {
        self.check_not_iterating()?;
        match self.state {
            State::Unloaded => Ok(()),
            State::Loading | State::Loaded => Err(KvError::CantDoItNow),
            State::Closed => Err(KvError::FileIo),
        }
    }

    pub(super) fn load_path(&mut self, path: &Path) -> Result<()> {
        self.check_loadable()?;
        tracing::info!("Loading key-value store from: {}", path.display());
        let file = DiskFile::try_open(path).map_err(io_failure("could not open data file"))?;
        self.load(Box::new(file), Some(path.into()))
    }

    pub(super) fn load(&mut self, mut file: Box<dyn Storage>, path: Option<PathBuf>) -> Result<()> {
        self.check_loadable()?;
        self.state = State::Loading;
        self.reset();
        match self.scan(file.as_mut()) {
            Ok(file_size) => {
                self.file = Some(file);
                self.file_size = file_size;
                self.path = path;
                self.state = State::Loaded;
                tracing::info!(
                    entries = self.index.len(),
                    free_blocks = self.free.len(),
                    file_size,
                    "Loaded key-value store"
                );
                Ok(())
            }
            Err(e) => {
                self.reset();
                self.state = State::Unloaded;
                tracing::info!("Loading failed: {e}");
                Err(e)
            }
        }
    }

    /// Walk the file block by block, rebuilding the index and the free list.
    fn scan(&mut self, file: &mut dyn Storage) -> Result<u64> {
        let len = file
            .len()
            .map_err(io_failure("could not size data file"))?;
        let mut offset = 0u64;
        while offset < len {
            let header = block::read_header(file, offset)
                .map_err(io_failure("could not read block header"))?
                .ok_or_else(|| {
                    tracing::error!("invalid block header at offset {offset}");
                    KvError::FileIo
                })?;
            let size = header.size();
            if offset + size as u64 > len {
                tracing::error!("block at offset {offset} runs past end of file");
                return Err(KvError::FileIo);
            }
            let block_offset = u32::try_from(offset).map_err(|_| KvError::FileIo)?;
            match header {
                Header::Used(_) => {
                    let buf = block::read_block(file, offset, size)
                        .map_err(io_failure("could not read block"))?;
                    let key: K = block::decode_key(&buf).map_err(|_| KvError::FileIo)?;
                    match self.index.insert(key, block_offset) {
                        Ok(()) => (),
                        Err(KvError::NotUnique) => {
                            // Left behind by an interrupted relocation. The block
                            // earlier in the file wins, which is the new value if the
                            // relocation reused a lower free block.
                            tracing::warn!(
                                "block at offset {offset} repeats an indexed key, marking it free"
                            );
                            file.write_all_at(offset, &block::free_marker(size))
                                .map_err(io_failure("could not mark block free"))?;
                            self.free.push(block_offset, size);
                            self.errors.insert(KvError::DataChanged);
                        }
                        Err(e) => return Err(e),
                    }
                }
                Header::Free(_) => self.free.push(block_offset, size),
            }
            offset += size as u64;
        }
        Ok(len)
    }

    /// Confirm the block at `offset` is in use and holds `key`. Returns the block size.
    fn check_key(&mut self, key: &K, offset: u32) -> Result<usize> {
        let buf = self.read_used(offset)?;
        let stored: K = block::decode_key(&buf)?;
        if stored != *key {
            tracing::warn!(?key, ?stored, "block at offset {offset} holds another key");
            return Err(KvError::DataChanged);
        }
        Ok(buf.len())
    }

    pub(super) fn insert(&mut self, key: K, value: &V) -> Result<()> {
        self.check_not_iterating()?;
        self.check_loaded()?;
        let data = block::encode(&key, value)?;
        let placement = self.place(data.len())?;
        self.index.insert(key.clone(), placement.offset)?;
        if let Err(e) = self.write_placed(placement, data) {
            self.discard(placement);
            if let Err(rollback) = self.index.erase(&key) {
                tracing::error!("could not remove index entry after failed insert: {rollback}");
                self.close_fatal();
            }
            return Err(e);
        }
        self.commit(placement);
        Ok(())
    }

    pub(super) fn find_block_offset(&self, key: &K) -> Result<u32> {
        self.check_loaded()?;
        self.index.find(key).copied().ok_or(KvError::NotFound)
    }

    pub(super) fn find_value(&mut self, key: &K, offset: Option<u32>) -> Result<V> {
        let offset = match offset {
            Some(offset) => {
                self.check_loaded()?;
                offset
            }
            None => self.find_block_offset(key)?,
        };
        let buf = self.read_used(offset)?;
        let (stored, value): (K, V) = block::decode_entry(&buf)?;
        if stored != *key {
            tracing::warn!(?key, ?stored, "block at offset {offset} holds another key");
            return Err(KvError::DataChanged);
        }
        Ok(value)
    }

    pub(super) fn update(&mut self, key: &K, value: &V, offset: Option<u32>) -> Result<()> {
        let indexed = self.find_block_offset(key)?;
        let offset = offset.unwrap_or(indexed);
        let size = self.check_key(key, offset)?;
        let mut data = block::encode(key, value)?;

        if data.len() <= size {
            block::frame(&mut data, size, false);
            return self
                .storage()?
                .write_all_at(u64::from(offset), &data)
                .map_err(io_failure("could not rewrite block"));
        }

        // Relocate: new block first, then repoint the index, then free the old block
        let placement = self.place(data.len())?;
        if let Err(e) = self.write_placed(placement, data) {
            self.discard(placement);
            return Err(e);
        }
        self.commit(placement);
        if let Some(slot) = self.index.find_mut(key) {
            *slot = placement.offset;
        }
        if let Err(e) = self.mark_free(offset, size) {
            if let Some(slot) = self.index.find_mut(key) {
                *slot = offset;
            }
            match self.mark_free(placement.offset, placement.size) {
                Ok(()) => self.free.push(placement.offset, placement.size),
                Err(_) => self.close_fatal(),
            }
            return Err(e);
        }
        self.free.push(offset, size);
        Ok(())
    }

    pub(super) fn delete(&mut self, key: &K) -> Result<()> {
        self.check_not_iterating()?;
        let offset = self.find_block_offset(key)?;
        let size = self.check_key(key, offset)?;
        self.index.erase(key)?;
        if let Err(e) = self.mark_free(offset, size) {
            if let Err(rollback) = self.index.insert(key.clone(), offset) {
                tracing::error!(?key, "could not restore index entry after failed delete: {rollback}");
            }
            return Err(e);
        }
        self.free.push(offset, size);
        Ok(())
    }

    /// Cross check the file, the index and the free list.
    pub(super) fn verify(&mut self) -> Result<()> {
        self.check_loaded()?;
        if !self.index.verify() {
            tracing::error!("index failed verification");
            return Err(KvError::DataChanged);
        }
        let mut offset = 0u64;
        let mut used = 0;
        let mut free = 0;
        while offset < self.file_size {
            let (header, buf) = self.read_any(offset)?;
            let block_offset = u32::try_from(offset).map_err(|_| KvError::DataChanged)?;
            match header {
                Header::Used(_) => {
                    let key: K = block::decode_key(&buf)?;
                    if self.index.find(&key) != Some(&block_offset) {
                        tracing::error!(?key, "block at offset {offset} is not indexed");
                        return Err(KvError::DataChanged);
                    }
                    used += 1;
                }
                Header::Free(size) => {
                    if !self.free.contains(block_offset, size) {
                        tracing::error!("free block at offset {offset} is not tracked");
                        return Err(KvError::DataChanged);
                    }
                    free += 1;
                }
            }
            offset += header.size() as u64;
        }
        let len = self
            .storage()?
            .len()
            .map_err(io_failure("could not size data file"))?;
        if offset != self.file_size
            || len != self.file_size
            || used != self.index.len()
            || free != self.free.len()
        {
            tracing::error!(
                walked = offset,
                len,
                tracked = self.file_size,
                used,
                free,
                "data file does not match index"
            );
            return Err(KvError::DataChanged);
        }
        Ok(())
    }
}

impl<K, V> Drop for Engine<K, V> {
    fn drop(&mut self) {
        if let Some(file) = self.file.as_mut() {
            if let Err(e) = file.flush() {
                tracing::warn!("could not flush data file to disk: {}", e);
            }
        }
    }
}
