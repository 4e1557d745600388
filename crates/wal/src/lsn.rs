use std::fmt;

/// Log sequence number: `(view, sequence)`, ordered by view first.
///
/// The derived ordering compares fields in declaration order, which is
/// exactly the required total order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Lsn {
    pub view: u32,
    pub seq: u64,
}

impl Lsn {
    /// "Nothing written / nothing on disk".
    pub const NONE: Lsn = Lsn { view: 0, seq: 0 };

    /// First LSN handed out by a fresh engine.
    pub const FIRST: Lsn = Lsn { view: 1, seq: 1 };

    pub const fn new(view: u32, seq: u64) -> Self {
        Self { view, seq }
    }

    /// The LSN directly after this one in the same view.
    #[must_use]
    pub const fn next(self) -> Self {
        Self {
            view: self.view,
            seq: self.seq + 1,
        }
    }

    /// The LSN directly before this one in the same view. Saturates at
    /// sequence 0.
    #[must_use]
    pub const fn prev(self) -> Self {
        Self {
            view: self.view,
            seq: self.seq.saturating_sub(1),
        }
    }
}

impl fmt::Display for Lsn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.view, self.seq)
    }
}
