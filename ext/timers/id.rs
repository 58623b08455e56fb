// Copyright 2018-2026 the Deno authors. MIT license.

/// Which JS-visible family a timer belongs to. The kind selects the ID map
/// consulted by the `clear*` functions and is encoded into the async ID
/// reported to the inspector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum TimerKind {
  Timeout = 0,
  Interval = 1,
  Immediate = 2,
}

/// A JS-visible timer identifier: the per-scheduler i32 counter value plus
/// the timer's kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerId {
  pub id: i32,
  pub kind: TimerKind,
}

impl TimerId {
  pub fn new(id: i32, kind: TimerKind) -> TimerId {
    TimerId { id, kind }
  }

  /// Packs the ID into the 64-bit correlation value handed to the
  /// inspector: kind in the high word, the id zero-extended in the low
  /// word.
  pub fn as_async_id(&self) -> u64 {
    ((self.kind as u64) << 32) | (self.id as u32 as u64)
  }
}

/// Parses a string timer ID the way the host treats object property keys:
/// only the canonical decimal rendering of an assigned ID matches. No
/// whitespace, no sign, no leading zero, no trailing characters. IDs start
/// at 1, so `"0"` never matches either. Everything else is `None`, which
/// the `clear*` functions treat as a silent no-op.
pub fn parse_canonical_id(s: &str) -> Option<i32> {
  let bytes = s.as_bytes();
  if bytes.is_empty() || bytes[0] == b'0' {
    return None;
  }
  if !bytes.iter().all(|b| b.is_ascii_digit()) {
    return None;
  }
  // i32::MAX is 10 digits; anything longer cannot have been assigned.
  if bytes.len() > 10 {
    return None;
  }
  let value: i64 = s.parse().ok()?;
  if value > i32::MAX as i64 {
    return None;
  }
  Some(value as i32)
}
