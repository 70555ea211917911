//! Single-slot admission control for frame requests.
//!
//! `BackpressureGate` is a binary semaphore: it issues at most one `Permit` at a
//! time. Holding the permit means a frame request is in flight. Capture ticks that
//! find the permit taken are dropped, never queued, so the next admitted tick always
//! carries a fresh frame.
//!
//! Permits are generation-stamped. `reset()` revokes whatever permit is outstanding
//! (session teardown, deadline expiry) and any later `release()` of that revoked
//! permit is ignored.

use std::time::{Duration, Instant};

/// Proof of admission for one frame request. Not `Clone`; only the gate mints them.
#[derive(Debug, PartialEq, Eq)]
pub struct Permit {
    generation: u64,
    seq: u64,
}

impl Permit {
    /// Monotonic request number, unique per gate.
    pub fn seq(&self) -> u64 {
        self.seq
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Slot {
    Free,
    Held { seq: u64, since: Instant },
}

/// Admission counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct GateStats {
    pub admitted: u64,
    pub skipped: u64,
    pub released: u64,
    pub revoked: u64,
}

#[derive(Debug)]
pub struct BackpressureGate {
    slot: Slot,
    generation: u64,
    next_seq: u64,
    deadline: Duration,
    stats: GateStats,
}

impl BackpressureGate {
    /// `deadline` bounds how long one permit may stay outstanding.
    pub fn new(deadline: Duration) -> Self {
        Self {
            slot: Slot::Free,
            generation: 0,
            next_seq: 1,
            deadline,
            stats: GateStats::default(),
        }
    }

    /// Take the permit if it is free. A refused attempt is counted as a skipped tick.
    pub fn try_acquire(&mut self, now: Instant) -> Option<Permit> {
        match self.slot {
            Slot::Held { .. } => {
                self.stats.skipped += 1;
                None
            }
            Slot::Free => {
                let seq = self.next_seq;
                self.next_seq += 1;
                self.slot = Slot::Held { seq, since: now };
                self.stats.admitted += 1;
                Some(Permit {
                    generation: self.generation,
                    seq,
                })
            }
        }
    }

    /// Return the permit. Yields the time it was outstanding, or `None` when the
    /// permit was revoked by an earlier `reset()`.
    pub fn release(&mut self, permit: Permit, now: Instant) -> Option<Duration> {
        if permit.generation != self.generation {
            return None;
        }
        match self.slot {
            Slot::Held { seq, since } if seq == permit.seq => {
                self.slot = Slot::Free;
                self.stats.released += 1;
                Some(now.saturating_duration_since(since))
            }
            _ => None,
        }
    }

    /// Revoke the outstanding permit, if any, and free the slot.
    pub fn reset(&mut self) {
        if matches!(self.slot, Slot::Held { .. }) {
            self.stats.revoked += 1;
        }
        self.generation += 1;
        self.slot = Slot::Free;
    }

    /// True while a frame request is in flight.
    pub fn is_awaiting(&self) -> bool {
        matches!(self.slot, Slot::Held { .. })
    }

    /// True when the outstanding permit has been held past the deadline.
    pub fn is_expired(&self, now: Instant) -> bool {
        match self.slot {
            Slot::Held { since, .. } => now.saturating_duration_since(since) >= self.deadline,
            Slot::Free => false,
        }
    }

    /// When the outstanding permit expires.
    pub fn expires_at(&self) -> Option<Instant> {
        match self.slot {
            Slot::Held { since, .. } => Some(since + self.deadline),
            Slot::Free => None,
        }
    }

    pub fn deadline(&self) -> Duration {
        self.deadline
    }

    pub fn stats(&self) -> GateStats {
        self.stats
    }
}
