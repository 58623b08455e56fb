// Copyright 2018-2026 the Deno authors. MIT license.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use crate::host::ScriptHost;
use crate::scheduler::TimerScheduler;
use crate::time::Timespec;
use crate::timer::EventLoopTimer;
use crate::timer::FireResult;
use crate::timer::TimerHandle;
use crate::timer::TimerState;

/// The external firing function a host-runloop timer dispatches to.
pub type RunLoopCallback = Box<dyn Fn(&mut dyn ScriptHost) + Send + Sync>;

struct RunLoopState {
  repeat: Option<Duration>,
}

/// A lower-level timer for the host runtime's internal runloop (GC
/// scheduling and the like). Unlike JS timers it has no wrapper object or
/// keep-alive contribution, and a zero-delay update takes a lock-free fast
/// path: the timer publishes itself into the scheduler's imminent slot and
/// the event loop fires it inline before consulting the store.
pub struct RunLoopTimer {
  entry: Mutex<EventLoopTimer>,
  state: Mutex<RunLoopState>,
  callback: RunLoopCallback,
}

impl RunLoopTimer {
  pub fn new(callback: RunLoopCallback) -> Arc<RunLoopTimer> {
    Arc::new(RunLoopTimer {
      entry: Mutex::new(EventLoopTimer::new()),
      state: Mutex::new(RunLoopState { repeat: None }),
      callback,
    })
  }

  pub fn handle(self: &Arc<Self>) -> TimerHandle {
    TimerHandle::RunLoop(self.clone())
  }

  pub fn entry(&self) -> &Mutex<EventLoopTimer> {
    &self.entry
  }

  /// Schedules or re-schedules the timer `delay` from now. A zero delay
  /// additionally publishes the timer as imminent; any non-zero delay
  /// revokes a previous imminent publication.
  pub fn update(
    self: &Arc<Self>,
    scheduler: &Arc<TimerScheduler>,
    delay: Duration,
    repeat: Option<Duration>,
  ) {
    self.state.lock().repeat = repeat;
    if delay.is_zero() {
      scheduler.set_imminent(self);
    } else {
      scheduler.clear_imminent(self);
    }
    scheduler
      .update(&self.handle(), Timespec::ms_from_now(delay.as_millis() as i64));
  }

  /// Safe to call from any thread.
  pub fn cancel(self: &Arc<Self>, scheduler: &Arc<TimerScheduler>) {
    let _guard = self.state.lock();
    scheduler.clear_imminent(self);
    scheduler.remove(&self.handle());
  }

  /// Remaining time until the timer fires, if it is armed. Safe to call
  /// from any thread.
  pub fn seconds_until_timer(&self) -> Option<f64> {
    let _guard = self.state.lock();
    let entry = self.entry.lock();
    if entry.state != TimerState::Active {
      return None;
    }
    Some(entry.next.duration_since(&Timespec::now()).as_secs_f64())
  }

  pub(crate) fn fire(
    self: &Arc<Self>,
    now: Timespec,
    scheduler: &Arc<TimerScheduler>,
    host: &mut dyn ScriptHost,
  ) -> FireResult {
    self.entry.lock().state = TimerState::Fired;
    scheduler.clear_imminent(self);
    (self.callback)(host);
    match self.state.lock().repeat {
      Some(period) => {
        FireResult::Rearm(now.add_ms((period.as_millis() as i64).max(1)))
      }
      None => FireResult::Disarm,
    }
  }
}
