//! Byte counters shared between a forwarding direction and the metrics sweep.

use parking_lot::Mutex;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
struct Counters {
    received: u64,
    sent: u64,
}

/// Cumulative received/sent counters.
///
/// The owning direction loop calls [`Meter::produce`]; the liveness sweep
/// calls [`Meter::consume`] from another task. Both run under the same lock,
/// so every counted byte is reported by exactly one `consume`.
#[derive(Debug, Default)]
pub struct Meter {
    counters: Mutex<Counters>,
}

impl Meter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `received` bytes read from the source and `sent` bytes written to
    /// the destination.
    pub fn produce(&self, received: u64, sent: u64) {
        let mut c = self.counters.lock();
        c.received += received;
        c.sent += sent;
    }

    /// Take the current `(received, sent)` values and reset both to zero.
    pub fn consume(&self) -> (u64, u64) {
        let mut c = self.counters.lock();
        let taken = std::mem::take(&mut *c);
        (taken.received, taken.sent)
    }
}
