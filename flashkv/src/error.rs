//! Error taxonomy
//!
//! Every fallible operation returns a [`KvError`]. Instances additionally keep an
//! [`ErrorFlags`] register which accumulates every error they have reported, until
//! it is explicitly cleared.

use std::fmt;

use strum::{EnumIter, IntoEnumIterator, IntoStaticStr};
use thiserror::Error;

/// Result type used throughout the crate.
pub type Result<T> = std::result::Result<T, KvError>;

/// flashkv specific errors.
#[derive(Clone, Copy, Debug, EnumIter, Eq, Error, Hash, IntoStaticStr, PartialEq)]
#[strum(serialize_all = "snake_case")]
pub enum KvError {
    /// Memory could not be allocated, or an entry could not be serialized into a block
    #[error("allocation or serialization failed")]
    BadAlloc,

    /// Key is not present
    #[error("key not found")]
    NotFound,

    /// Key is already present
    #[error("key is not unique")]
    NotUnique,

    /// Read, write, seek or open of the backing file failed
    #[error("backing file i/o failed")]
    FileIo,

    /// Stored data did not match what the index expected
    #[error("stored data changed underneath the index")]
    DataChanged,

    /// Operation is not permitted in the current state (loading, loaded, iterating)
    #[error("operation not permitted right now")]
    CantDoItNow,
}

impl KvError {
    /// The bit this error occupies in an [`ErrorFlags`] register.
    pub fn bit(self) -> u8 {
        match self {
            KvError::BadAlloc => 0x01,
            KvError::NotFound => 0x02,
            KvError::NotUnique => 0x04,
            KvError::FileIo => 0x08,
            KvError::DataChanged => 0x10,
            KvError::CantDoItNow => 0x20,
        }
    }
}

/// Accumulated error register.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
pub struct ErrorFlags(u8);

impl ErrorFlags {
    /// An empty register.
    pub const fn new() -> Self {
        Self(0)
    }

    /// Raw bitmask.
    pub fn bits(&self) -> u8 {
        self.0
    }

    /// OR an error into the register.
    pub fn insert(&mut self, kind: KvError) {
        self.0 |= kind.bit();
    }

    /// Has this error been seen since the last clear?
    pub fn contains(&self, kind: KvError) -> bool {
        self.0 & kind.bit() != 0
    }

    /// No errors recorded.
    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    /// Forget every recorded error.
    pub fn clear(&mut self) {
        self.0 = 0;
    }

    /// The recorded errors, in declaration order.
    pub fn iter(&self) -> impl Iterator<Item = KvError> + '_ {
        KvError::iter().filter(|kind| self.contains(*kind))
    }

    /// Fold a result into the register, passing it through unchanged.
    pub(crate) fn record<T>(&mut self, result: Result<T>) -> Result<T> {
        if let Err(kind) = &result {
            self.insert(*kind);
        }
        result
    }
}

impl From<KvError> for ErrorFlags {
    fn from(kind: KvError) -> Self {
        Self(kind.bit())
    }
}

impl fmt::Display for ErrorFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return write!(f, "ok");
        }
        let mut sep = "";
        for kind in self.iter() {
            let name: &'static str = kind.into();
            write!(f, "{sep}{name}")?;
            sep = "|";
        }
        Ok(())
    }
}
