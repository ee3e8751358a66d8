//! Store configuration

/// Extra room reserved by default in newly appended blocks, as a percentage of the
/// entry's encoded size.
pub(crate) const DEFAULT_PERCENT_FREE: u8 = 20;

/// Tunables for a [`KvStore`](crate::KvStore).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Options {
    /// Slack added to a block when it is appended to the file, so the value it holds
    /// can later grow in place without relocating. Reused free blocks keep their
    /// existing size.
    pub percent_free: u8,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            percent_free: DEFAULT_PERCENT_FREE,
        }
    }
}

impl Options {
    /// Set the slack percentage.
    pub fn with_percent_free(mut self, percent_free: u8) -> Self {
        self.percent_free = percent_free;
        self
    }
}
