//! Timer bookkeeping for the hub run loop.

use std::any::type_name;
use std::collections::BTreeMap;
use std::fmt;
use std::mem;
use std::time::Instant;

use crate::Hub;

pub(crate) type TimerCallback = Box<dyn FnOnce(&Hub)>;

/// Identifies a timer registered via [`Hub::call_later()`][crate::Hub::call_later].
///
/// Keys order by expiry, with timers that expire at the same instant ordered by registration.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct TimerKey {
    due: Instant,
    sequence: u64,
}

impl TimerKey {
    /// When the timer expires.
    #[must_use]
    #[inline]
    pub fn due(&self) -> Instant {
        self.due
    }
}

#[derive(Default)]
pub(crate) struct TimerQueue {
    entries: BTreeMap<TimerKey, TimerCallback>,
    next_sequence: u64,
}

impl TimerQueue {
    pub(crate) fn insert(&mut self, due: Instant, callback: TimerCallback) -> TimerKey {
        let key = TimerKey {
            due,
            sequence: self.next_sequence,
        };

        self.next_sequence = self.next_sequence.wrapping_add(1);
        self.entries.insert(key, callback);

        key
    }

    /// Removes a timer that has not fired yet, returning its callback.
    pub(crate) fn remove(&mut self, key: TimerKey) -> Option<TimerCallback> {
        self.entries.remove(&key)
    }

    pub(crate) fn next_due(&self) -> Option<Instant> {
        self.entries.first_key_value().map(|(key, _)| key.due)
    }

    /// Removes and returns the earliest timer if it is due at `now`.
    pub(crate) fn pop_due(&mut self, now: Instant) -> Option<TimerCallback> {
        let entry = self.entries.first_entry()?;

        if entry.key().due > now {
            return None;
        }

        Some(entry.remove())
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub(crate) fn take_all(&mut self) -> BTreeMap<TimerKey, TimerCallback> {
        mem::take(&mut self.entries)
    }
}

impl fmt::Debug for TimerQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct(type_name::<Self>())
            .field("len", &self.entries.len())
            .field("next_due", &self.next_due())
            .finish_non_exhaustive()
    }
}
