// Copyright 2018-2026 the Deno authors. MIT license.

use std::collections::VecDeque;

use crate::time::Timespec;
use crate::timer::TimerHandle;

/// All timers scheduled for the same millisecond instant, in insertion
/// order. Dispatch order within a bucket is FIFO.
struct Bucket {
  when: Timespec,
  timers: VecDeque<TimerHandle>,
}

/// The set of active timers, bucketed by millisecond-truncated fire time
/// and sorted ascending. An ordered vector beats a heap here: populations
/// cluster into few distinct instants, `peek` must be O(1) for the pre-wait
/// timeout query, and ties must dispatch in insertion order.
#[derive(Default)]
pub struct TimerStore {
  buckets: Vec<Bucket>,
}

impl TimerStore {
  pub fn new() -> TimerStore {
    TimerStore {
      buckets: Vec::new(),
    }
  }

  /// Appends `handle` to the bucket for `when`, creating the bucket at its
  /// sorted position if this is the first timer for that instant. `when`
  /// must already be millisecond-truncated.
  pub fn insert(&mut self, when: Timespec, handle: TimerHandle) {
    debug_assert_eq!(when, when.truncate_to_ms());
    match self.buckets.binary_search_by(|b| b.when.cmp(&when)) {
      Ok(i) => self.buckets[i].timers.push_back(handle),
      Err(i) => self.buckets.insert(
        i,
        Bucket {
          when,
          timers: VecDeque::from([handle]),
        },
      ),
    }
  }

  /// Unlinks `handle` from the bucket for `when`, dropping the bucket if it
  /// empties. Silently does nothing when the timer is not present: a
  /// cross-thread cancel can race the drain loop's `pop_min` and lose.
  pub fn remove(&mut self, when: Timespec, handle: &TimerHandle) {
    let Ok(i) = self.buckets.binary_search_by(|b| b.when.cmp(&when)) else {
      return;
    };
    let bucket = &mut self.buckets[i];
    let Some(pos) = bucket.timers.iter().position(|t| t.same_timer(handle))
    else {
      return;
    };
    bucket.timers.remove(pos);
    if bucket.timers.is_empty() {
      self.buckets.remove(i);
    }
  }

  /// The timer that fires soonest, if any.
  pub fn peek(&self) -> Option<&TimerHandle> {
    self.buckets.first().and_then(|b| b.timers.front())
  }

  /// The millisecond instant of the earliest bucket.
  pub fn earliest_deadline(&self) -> Option<Timespec> {
    self.buckets.first().map(|b| b.when)
  }

  /// Unlinks and returns the soonest timer, dropping its bucket if it
  /// empties.
  pub fn pop_min(&mut self) -> Option<TimerHandle> {
    let bucket = self.buckets.first_mut()?;
    let handle = bucket.timers.pop_front();
    if bucket.timers.is_empty() {
      self.buckets.remove(0);
    }
    handle
  }

  /// `pop_min`, but only when the head bucket is due at `now`.
  pub fn pop_due(&mut self, now: Timespec) -> Option<TimerHandle> {
    if self.earliest_deadline()? > now {
      return None;
    }
    self.pop_min()
  }

  pub fn is_empty(&self) -> bool {
    self.buckets.is_empty()
  }

  pub fn len(&self) -> usize {
    self.buckets.iter().map(|b| b.timers.len()).sum()
  }

  #[cfg(test)]
  pub(crate) fn dump(&self) -> Vec<(Timespec, Vec<TimerHandle>)> {
    self
      .buckets
      .iter()
      .map(|b| (b.when, b.timers.iter().cloned().collect()))
      .collect()
  }
}
