//! Data file access: storage, block framing and free space tracking.

pub(crate) mod block;
pub(crate) mod file;
pub(crate) mod free;
