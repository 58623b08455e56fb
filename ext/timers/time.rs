// Copyright 2018-2026 the Deno authors. MIT license.

use std::sync::OnceLock;
use std::time::Duration;
use std::time::Instant;

const NSEC_PER_SEC: i64 = 1_000_000_000;
const NSEC_PER_MSEC: i32 = 1_000_000;
const MSEC_PER_SEC: i64 = 1_000;

/// Monotonic `(seconds, nanoseconds)` pair. All timer deadlines are stored
/// as `Timespec`s measured from a process-wide monotonic origin, so values
/// are totally ordered and never affected by wall-clock adjustment.
#[derive(
  Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash,
)]
pub struct Timespec {
  sec: i64,
  nsec: i32,
}

fn monotonic_origin() -> Instant {
  static ORIGIN: OnceLock<Instant> = OnceLock::new();
  *ORIGIN.get_or_init(Instant::now)
}

impl Timespec {
  pub const ZERO: Timespec = Timespec { sec: 0, nsec: 0 };

  /// Creates a normalized timespec. `nsec` may exceed one second or be
  /// negative; it is folded into `sec`.
  pub fn new(sec: i64, nsec: i64) -> Timespec {
    Timespec {
      sec: sec + nsec.div_euclid(NSEC_PER_SEC),
      nsec: nsec.rem_euclid(NSEC_PER_SEC) as i32,
    }
  }

  /// Samples the monotonic clock.
  pub fn now() -> Timespec {
    let elapsed = monotonic_origin().elapsed();
    Timespec {
      sec: elapsed.as_secs() as i64,
      nsec: elapsed.subsec_nanos() as i32,
    }
  }

  /// `now() + ms`, the deadline a timer scheduled for `ms` milliseconds
  /// from this instant should carry.
  pub fn ms_from_now(ms: i64) -> Timespec {
    Timespec::now().add_ms(ms)
  }

  pub fn sec(&self) -> i64 {
    self.sec
  }

  pub fn nsec(&self) -> i32 {
    self.nsec
  }

  /// Millisecond offset within the second.
  pub fn msec(&self) -> i32 {
    self.nsec / NSEC_PER_MSEC
  }

  pub fn add_ms(self, ms: i64) -> Timespec {
    Timespec::new(
      self.sec + ms.div_euclid(MSEC_PER_SEC),
      self.nsec as i64 + ms.rem_euclid(MSEC_PER_SEC) * NSEC_PER_MSEC as i64,
    )
  }

  /// Drops sub-millisecond precision. Bucket keys in the timer store are
  /// truncated so timers landing in the same millisecond share a bucket.
  pub fn truncate_to_ms(self) -> Timespec {
    Timespec {
      sec: self.sec,
      nsec: self.nsec - self.nsec % NSEC_PER_MSEC,
    }
  }

  /// Time elapsed from `earlier` to `self`, saturating to zero when
  /// `earlier` is in the future.
  pub fn duration_since(&self, earlier: &Timespec) -> Duration {
    if self <= earlier {
      return Duration::ZERO;
    }
    let sec = self.sec - earlier.sec;
    let nsec = self.nsec as i64 - earlier.nsec as i64;
    let total = sec * NSEC_PER_SEC + nsec;
    Duration::from_nanos(total.max(0) as u64)
  }
}
