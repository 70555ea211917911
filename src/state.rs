//! Latest accepted inference result.
//!
//! The state holds an immutable `Snapshot` behind an `Arc`. Updates build a new
//! snapshot and swap the pointer in one step, so a reader holding a clone of the
//! `Arc` never observes a partially applied result.

use std::sync::Arc;
use std::time::Instant;

use crate::mode::Mode;
use crate::protocol::VisionResult;

/// What the renderer draws for one tick.
#[derive(Clone, Debug, PartialEq)]
pub struct Snapshot {
    pub result: VisionResult,
    /// Monotonic arrival time; `None` for the empty snapshot.
    pub received_at: Option<Instant>,
    /// Count of results accepted since the state was created.
    pub generation: u64,
}

impl Snapshot {
    fn empty(mode: Mode, generation: u64) -> Self {
        Self {
            result: VisionResult::empty(mode),
            received_at: None,
            generation,
        }
    }

    pub fn mode(&self) -> Mode {
        self.result.mode
    }

    pub fn is_empty(&self) -> bool {
        self.result.items.is_empty()
    }
}

#[derive(Debug)]
pub struct DetectionState {
    current: Arc<Snapshot>,
    accepted: u64,
}

impl DetectionState {
    pub fn new(mode: Mode) -> Self {
        Self {
            current: Arc::new(Snapshot::empty(mode, 0)),
            accepted: 0,
        }
    }

    /// Replace the snapshot wholesale with a freshly accepted result.
    pub fn replace(&mut self, result: VisionResult, now: Instant) -> Arc<Snapshot> {
        self.accepted += 1;
        self.current = Arc::new(Snapshot {
            result,
            received_at: Some(now),
            generation: self.accepted,
        });
        Arc::clone(&self.current)
    }

    /// Drop whatever was rendered; the next draw sees an empty result for `mode`.
    pub fn clear(&mut self, mode: Mode) {
        self.current = Arc::new(Snapshot::empty(mode, self.accepted));
    }

    pub fn snapshot(&self) -> Arc<Snapshot> {
        Arc::clone(&self.current)
    }

    pub fn accepted(&self) -> u64 {
        self.accepted
    }
}
