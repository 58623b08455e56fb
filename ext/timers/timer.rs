// Copyright 2018-2026 the Deno authors. MIT license.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::host::ScriptHost;
use crate::objects::TimeoutObject;
use crate::runloop::RunLoopTimer;
use crate::scheduler::TimerScheduler;
use crate::time::Timespec;

/// Lifecycle of a scheduled timer.
///
/// `Pending` is the initial state. `Active` means the timer sits in exactly
/// one store bucket. `Cancelled` and `Fired` are terminal with respect to
/// bucket membership; an interval transitions `Fired` back to `Active` when
/// it rearms.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerState {
  Pending,
  Active,
  Cancelled,
  Fired,
}

/// The scheduled-timer record embedded in every concrete timer owner: the
/// absolute deadline and the state machine position. Guarded by a leaf
/// mutex; see the lock order documented on [`TimerScheduler`].
#[derive(Debug, Clone, Copy)]
pub struct EventLoopTimer {
  pub next: Timespec,
  pub state: TimerState,
}

impl EventLoopTimer {
  pub fn new() -> EventLoopTimer {
    EventLoopTimer {
      next: Timespec::ZERO,
      state: TimerState::Pending,
    }
  }
}

impl Default for EventLoopTimer {
  fn default() -> EventLoopTimer {
    EventLoopTimer::new()
  }
}

/// What a fired timer wants from the drain loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FireResult {
  /// Done; the timer stays out of the store.
  Disarm,
  /// Re-insert with the given deadline.
  Rearm(Timespec),
}

/// The generic internal timer facility. Subsystems outside this crate (DNS
/// resolution, connection timeouts, file watchers, test runners) embed an
/// [`EventLoopTimer`] and schedule themselves through
/// [`TimerScheduler::update`]; the drain loop calls `fire` when the
/// deadline passes.
pub trait SubsystemTimer: Send + Sync {
  fn entry(&self) -> &Mutex<EventLoopTimer>;

  fn fire(
    &self,
    now: Timespec,
    scheduler: &Arc<TimerScheduler>,
    host: &mut dyn ScriptHost,
  ) -> FireResult;

  /// Short name used in trace logging.
  fn name(&self) -> &'static str {
    "subsystem"
  }
}

/// Tag-discriminated reference to a timer's concrete owner. The store and
/// the drain loop only see this enum; dispatch is a closed-world match
/// over the in-crate owners, with one arm for external subsystems.
#[derive(Clone)]
pub enum TimerHandle {
  Timeout(Arc<TimeoutObject>),
  RunLoop(Arc<RunLoopTimer>),
  Subsystem(Arc<dyn SubsystemTimer>),
}

impl TimerHandle {
  pub fn entry(&self) -> &Mutex<EventLoopTimer> {
    match self {
      TimerHandle::Timeout(t) => t.internals().entry(),
      TimerHandle::RunLoop(t) => t.entry(),
      TimerHandle::Subsystem(t) => t.entry(),
    }
  }

  /// Identity comparison: two handles are the same timer iff they point at
  /// the same owner allocation.
  pub fn same_timer(&self, other: &TimerHandle) -> bool {
    match (self, other) {
      (TimerHandle::Timeout(a), TimerHandle::Timeout(b)) => Arc::ptr_eq(a, b),
      (TimerHandle::RunLoop(a), TimerHandle::RunLoop(b)) => Arc::ptr_eq(a, b),
      (TimerHandle::Subsystem(a), TimerHandle::Subsystem(b)) => {
        Arc::ptr_eq(a, b)
      }
      _ => false,
    }
  }

  /// Host-runloop timers get fired inline from the pre-wait timeout query.
  pub fn is_runloop(&self) -> bool {
    matches!(self, TimerHandle::RunLoop(_))
  }

  pub fn tag(&self) -> &'static str {
    match self {
      TimerHandle::Timeout(_) => "js",
      TimerHandle::RunLoop(_) => "runloop",
      TimerHandle::Subsystem(t) => t.name(),
    }
  }

  pub(crate) fn fire(
    &self,
    now: Timespec,
    scheduler: &Arc<TimerScheduler>,
    host: &mut dyn ScriptHost,
  ) -> FireResult {
    match self {
      TimerHandle::Timeout(t) => t.fire(scheduler, host),
      TimerHandle::RunLoop(t) => t.fire(now, scheduler, host),
      TimerHandle::Subsystem(t) => t.fire(now, scheduler, host),
    }
  }
}

impl std::fmt::Debug for TimerHandle {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    let entry = *self.entry().lock();
    f.debug_struct("TimerHandle")
      .field("tag", &self.tag())
      .field("next", &entry.next)
      .field("state", &entry.state)
      .finish()
  }
}
