#![warn(missing_docs)]
//! flashkv
//!
//! # Implementation Details
//!
//! Provides a small key-value store for storing keys and values in a single flat file,
//! aimed at constrained flash filesystems.
//!
//! The file is a sequence of length prefixed blocks (see the `io::block` module for the
//! layout). Each live key owns one block holding the serialized key and value. Deleted
//! or relocated blocks are marked free in place and remembered in a free list, so later
//! writes can reuse them instead of growing the file.
//!
//! The index mapping every key to the offset of its block is held entirely in memory, in
//! an AVL tree ([`Map`]). It is rebuilt by scanning the file when a store is loaded, so
//! looking up an offset never touches the file, and iterating the store yields keys and
//! offsets without reading any values.
//!
//! At load/store to disk, keys and values are serialized/deserialized using bincode.
//!
//! Every operation on a [`KvStore`] is serialized by a re-entrant lock. Callers can hold
//! that lock across several operations with [`KvStore::lock`].
//!
//! Note: The store never compacts its file and never merges neighbouring free blocks.
//! Reuse depends on later entries fitting into previously freed blocks.
//!

mod error;
mod io;
pub mod map;
mod options;
mod store;

pub use error::{ErrorFlags, KvError, Result};
pub use io::file::{DiskFile, MemoryFile, Storage};
pub use io::free::FreeBlock;
pub use map::Map;
pub use options::Options;
pub use store::{Iter, KvGuard, KvKey, KvStore, KvValue, State};

use bincode::config::AllowTrailing;
use bincode::config::Bounded;
use bincode::config::FixintEncoding;
use bincode::config::WithOtherIntEncoding;
use bincode::config::WithOtherLimit;
use bincode::config::WithOtherTrailing;
use bincode::{DefaultOptions, Options as _};
use std::sync::LazyLock;

type Bincoder = WithOtherIntEncoding<
    WithOtherTrailing<WithOtherLimit<DefaultOptions, Bounded>, AllowTrailing>,
    FixintEncoding,
>;

static BINCODER: LazyLock<Bincoder> = LazyLock::new(|| {
    bincode::DefaultOptions::new()
        .with_limit(io::block::MAX_BLOCK_SIZE as u64)
        .allow_trailing_bytes()
        .with_fixint_encoding()
});
