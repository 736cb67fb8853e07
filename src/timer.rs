//! Single-threaded timer queue.
//!
//! Every deferred action in a session (the advance timer, visual clears,
//! envelope reverts, watchdogs, sound-load timeouts) is an entry here. The
//! host drives the queue by calling `pop_due` with the current time; entries
//! come out in deadline order, ties in the order they were scheduled.

use std::collections::BTreeMap;

/// What a timer does when it fires.
#[derive(Debug, Clone, PartialEq)]
pub enum TimerKind {
    /// Run the scheduler's advance step.
    Advance,
    /// Remove one pitch from the active-note set.
    ClearActive(String),
    /// Restore the keyboard voice's baseline envelope.
    RevertEnvelope,
    /// No-advance watchdog.
    StallCheck,
    /// Index-unchanged watchdog.
    Failsafe,
    /// A pending sample load took too long.
    SoundLoadTimeout(String),
}

/// Handle to a scheduled timer. Ordered by deadline, then insertion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TimerId {
    due_ms: u64,
    seq: u64,
}

impl TimerId {
    pub fn due_ms(&self) -> u64 {
        self.due_ms
    }
}

#[derive(Debug, Default)]
pub struct TimerQueue {
    entries: BTreeMap<TimerId, TimerKind>,
    next_seq: u64,
}

impl TimerQueue {
    pub fn new() -> Self {
        TimerQueue::default()
    }

    /// Schedule `kind` to fire `delay_ms` after `now_ms`.
    pub fn schedule(&mut self, now_ms: u64, delay_ms: u64, kind: TimerKind) -> TimerId {
        let id = TimerId {
            due_ms: now_ms.saturating_add(delay_ms),
            seq: self.next_seq,
        };
        self.next_seq += 1;
        self.entries.insert(id, kind);
        id
    }

    /// Cancel a timer. Returns false if it already fired or was cancelled.
    pub fn cancel(&mut self, id: TimerId) -> bool {
        self.entries.remove(&id).is_some()
    }

    /// Remove every timer of the given kind.
    pub fn cancel_kind(&mut self, kind: &TimerKind) {
        self.entries.retain(|_, k| k != kind);
    }

    /// Remove every timer whose kind matches `pred`.
    pub fn cancel_if(&mut self, pred: impl Fn(&TimerKind) -> bool) {
        self.entries.retain(|_, k| !pred(k));
    }

    pub fn is_pending(&self, id: TimerId) -> bool {
        self.entries.contains_key(&id)
    }

    /// Take the earliest timer due at or before `now_ms`.
    pub fn pop_due(&mut self, now_ms: u64) -> Option<(TimerId, TimerKind)> {
        let first = *self.entries.keys().next()?;
        if first.due_ms > now_ms {
            return None;
        }
        self.entries.remove(&first).map(|kind| (first, kind))
    }

    /// Deadline of the earliest pending timer.
    pub fn next_deadline(&self) -> Option<u64> {
        self.entries.keys().next().map(|id| id.due_ms)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn count_kind(&self, kind: &TimerKind) -> usize {
        self.entries.values().filter(|k| *k == kind).count()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
