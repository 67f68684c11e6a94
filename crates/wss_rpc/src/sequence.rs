use std::sync::atomic::{AtomicU64, Ordering};

/// Values up to and including this one belong to the handshake.
pub const RESERVED_SEQ: u64 = 1;

/// Allocates correlation identifiers shared by every service of an adapter.
#[derive(Debug)]
pub struct Sequencer {
    value: AtomicU64,
}

impl Sequencer {
    pub fn new() -> Self {
        Self {
            value: AtomicU64::new(RESERVED_SEQ),
        }
    }

    /// Allocate the next identifier.
    pub fn next(&self) -> u64 {
        self.value.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Give back `seq` if it is still the most recent allocation.
    ///
    /// Returns false when another allocation happened in between, in which
    /// case the counter is left untouched.
    pub fn compensate(&self, seq: u64) -> bool {
        if seq <= RESERVED_SEQ {
            return false;
        }
        self.value
            .compare_exchange(seq, seq - 1, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// The most recently allocated identifier.
    pub fn current(&self) -> u64 {
        self.value.load(Ordering::Acquire)
    }
}

impl Default for Sequencer {
    fn default() -> Self {
        Self::new()
    }
}
