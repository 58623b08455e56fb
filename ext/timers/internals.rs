// Copyright 2018-2026 the Deno authors. MIT license.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::host::JsWrapper;
use crate::host::ScriptHost;
use crate::host::StrongHandle;
use crate::id::TimerId;
use crate::id::TimerKind;
use crate::objects::JsTimerRef;
use crate::scheduler::TimerScheduler;
use crate::time::Timespec;
use crate::timer::FireResult;
use crate::timer::TimerHandle;
use crate::timer::TimerState;

/// The shared state behind every JS-visible timer object. `TimeoutObject`
/// and `ImmediateObject` are thin wrappers around one of these.
///
/// Lock order: the state mutex here may be held while taking the scheduler
/// mutex, never the other way around. The embedded `EventLoopTimer` mutex
/// is a leaf.
pub struct TimerObjectInternals {
  id: i32,
  kind: TimerKind,
  interval_ms: i32,
  /// Identity of the engine-side wrapper. Only the strong handle below
  /// pins the wrapper against GC; this token lets `refresh()` re-pin it
  /// (a JS caller invoking `refresh()` proves the wrapper is alive).
  wrapper: JsWrapper,
  entry: Mutex<crate::timer::EventLoopTimer>,
  state: Mutex<TimerObjectState>,
}

struct TimerObjectState {
  /// Set by `clear*` and by the fired-and-done cleanup paths. Once set,
  /// the timer will never dispatch again (intervals included).
  has_cleared_timer: bool,
  /// Latch mirroring this timer's +1 contribution to the scheduler's
  /// keep-alive count. Flips are idempotent; this is a property, not a
  /// refcount.
  is_keeping_event_loop_alive: bool,
  /// The timer was coerced to a number at least once, so an entry for it
  /// exists in the kind-specific ID map.
  has_accessed_primitive: bool,
  /// JS-visible `ref()`/`unref()` toggle.
  has_js_ref: bool,
  /// The user callback is currently on the stack. `_destroyed` reads false
  /// during that window even though the internal state is already `Fired`.
  in_callback: bool,
  strong: StrongHandle,
}

impl TimerObjectInternals {
  pub(crate) fn new(
    id: i32,
    kind: TimerKind,
    interval_ms: i32,
    wrapper: JsWrapper,
  ) -> TimerObjectInternals {
    TimerObjectInternals {
      id,
      kind,
      interval_ms,
      wrapper: wrapper.clone(),
      entry: Mutex::new(crate::timer::EventLoopTimer::new()),
      state: Mutex::new(TimerObjectState {
        has_cleared_timer: false,
        is_keeping_event_loop_alive: false,
        has_accessed_primitive: false,
        has_js_ref: true,
        in_callback: false,
        strong: StrongHandle::new(wrapper),
      }),
    }
  }

  pub fn id(&self) -> i32 {
    self.id
  }

  pub fn kind(&self) -> TimerKind {
    self.kind
  }

  pub fn interval_ms(&self) -> i32 {
    self.interval_ms
  }

  pub fn timer_id(&self) -> TimerId {
    TimerId::new(self.id, self.kind)
  }

  pub(crate) fn entry(&self) -> &Mutex<crate::timer::EventLoopTimer> {
    &self.entry
  }

  fn set_keep_alive_locked(
    st: &mut TimerObjectState,
    scheduler: &TimerScheduler,
    enable: bool,
  ) {
    if st.is_keeping_event_loop_alive == enable {
      return;
    }
    st.is_keeping_event_loop_alive = enable;
    scheduler.increment_timer_ref(if enable { 1 } else { -1 });
  }

  /// Engages keep-alive without scheduling; immediates call this when
  /// they are enqueued.
  pub(crate) fn engage_keep_alive(&self, scheduler: &Arc<TimerScheduler>) {
    let mut st = self.state.lock();
    if st.has_js_ref {
      Self::set_keep_alive_locked(&mut st, scheduler, true);
    }
  }

  /// Schedules (or re-schedules) the timer `interval_ms` from now and
  /// re-engages keep-alive when the timer is ref'd.
  pub(crate) fn reschedule(
    &self,
    handle: &TimerHandle,
    scheduler: &Arc<TimerScheduler>,
  ) {
    {
      let mut st = self.state.lock();
      st.has_cleared_timer = false;
      if !st.strong.is_set() {
        st.strong.set(self.wrapper.clone());
      }
      if st.has_js_ref {
        Self::set_keep_alive_locked(&mut st, scheduler, true);
      }
    }
    scheduler
      .update(handle, Timespec::ms_from_now(self.interval_ms as i64));
  }

  /// Dispatches the timer's callback. Called by the drain loop after the
  /// timer has been unlinked from the store.
  pub(crate) fn fire(
    &self,
    handle: &TimerHandle,
    scheduler: &Arc<TimerScheduler>,
    host: &mut dyn ScriptHost,
  ) -> FireResult {
    // The callback may clear or refresh the timer and drop every reference
    // to it; snapshot identity up front.
    let id = self.id;
    let kind = self.kind;
    let async_id = TimerId::new(id, kind).as_async_id();

    let (wrapper, time_before_call) = {
      let mut st = self.state.lock();
      let entry_state = self.entry.lock().state;
      if entry_state == TimerState::Cancelled
        || st.has_cleared_timer
        || !host.is_script_runnable()
      {
        st.has_cleared_timer = true;
        st.strong.clear();
        Self::set_keep_alive_locked(&mut st, scheduler, false);
        let prune = st.has_accessed_primitive;
        drop(st);
        if let Some(inspector) = scheduler.inspector() {
          inspector.did_cancel_async_call(async_id);
        }
        if prune {
          scheduler.prune_primitive_id(kind, id);
        }
        return FireResult::Disarm;
      }

      self.entry.lock().state = TimerState::Fired;
      let wrapper = if kind == TimerKind::Interval {
        // intervals legitimately keep the wrapper pinned between ticks
        st.strong.get().cloned()
      } else {
        // break the native->JS cycle before user code runs; the local
        // token keeps the wrapper reachable for the call itself
        st.strong.take()
      };
      // Sampled before the callback so interval drift is bounded by the
      // callback's duration instead of compounding across ticks.
      let time_before_call = (kind == TimerKind::Interval)
        .then(|| Timespec::ms_from_now(self.interval_ms as i64));
      st.in_callback = true;
      (wrapper, time_before_call)
    };

    host.enter_event_loop();
    if let Some(inspector) = scheduler.inspector() {
      inspector.will_dispatch_async_call(async_id);
    }
    if let Some(wrapper) = &wrapper {
      // the host bridge catches JS exceptions and reports unhandled ones
      host.invoke_timer_callback(wrapper);
    }
    if let Some(inspector) = scheduler.inspector() {
      inspector.did_dispatch_async_call(async_id);
    }

    let mut rearm_at = None;
    let mut prune = false;
    {
      let mut st = self.state.lock();
      st.in_callback = false;
      let entry_state = self.entry.lock().state;
      if kind == TimerKind::Interval {
        match entry_state {
          // `Fired`: normal completion. `Active`: the callback called
          // refresh(); either way the next tick runs no sooner than
          // interval_ms after this one started.
          TimerState::Fired | TimerState::Active => {
            rearm_at = time_before_call;
          }
          // cancelled during the callback; cancel() did the cleanup
          _ => {}
        }
      } else {
        match entry_state {
          TimerState::Fired => {
            Self::set_keep_alive_locked(&mut st, scheduler, false);
            prune = st.has_accessed_primitive;
          }
          // Active: refresh() during the callback revived the one-shot
          // and already re-pinned the wrapper. Cancelled: cancel() did
          // the cleanup.
          _ => {}
        }
      }
    }
    if let Some(at) = rearm_at {
      scheduler.update(handle, at);
    }
    if prune {
      scheduler.prune_primitive_id(kind, id);
    }
    host.exit_event_loop();

    // JS timers reschedule directly through `update`; the drain loop never
    // rearms them.
    FireResult::Disarm
  }

  /// Runs an immediate from the immediate-task queue.
  pub(crate) fn run_immediate_task(
    &self,
    scheduler: &Arc<TimerScheduler>,
    host: &mut dyn ScriptHost,
  ) {
    let async_id = TimerId::new(self.id, self.kind).as_async_id();
    let wrapper = {
      let mut st = self.state.lock();
      if st.has_cleared_timer || !host.is_script_runnable() {
        st.has_cleared_timer = true;
        st.strong.clear();
        Self::set_keep_alive_locked(&mut st, scheduler, false);
        let prune = st.has_accessed_primitive;
        drop(st);
        if prune {
          scheduler.prune_primitive_id(self.kind, self.id);
        }
        return;
      }
      self.entry.lock().state = TimerState::Fired;
      st.in_callback = true;
      st.strong.take()
    };

    host.enter_event_loop();
    if let Some(inspector) = scheduler.inspector() {
      inspector.will_dispatch_async_call(async_id);
    }
    if let Some(wrapper) = &wrapper {
      host.invoke_timer_callback(wrapper);
    }
    if let Some(inspector) = scheduler.inspector() {
      inspector.did_dispatch_async_call(async_id);
    }

    let prune = {
      let mut st = self.state.lock();
      st.in_callback = false;
      st.strong.clear();
      Self::set_keep_alive_locked(&mut st, scheduler, false);
      st.has_accessed_primitive
    };
    if prune {
      scheduler.prune_primitive_id(self.kind, self.id);
    }
    host.exit_event_loop();
  }

  /// Implements `clearTimeout`/`clearInterval`/`clearImmediate` and
  /// `[Symbol.dispose]`. Idempotent. `store_handle` is `None` for
  /// immediates, which live on the immediate queue rather than in the
  /// store.
  pub(crate) fn cancel(
    &self,
    store_handle: Option<&TimerHandle>,
    scheduler: &Arc<TimerScheduler>,
  ) {
    {
      let mut st = self.state.lock();
      if st.has_cleared_timer {
        return;
      }
      st.has_cleared_timer = true;
      st.strong.clear();
      Self::set_keep_alive_locked(&mut st, scheduler, false);
    }
    match store_handle {
      Some(handle) => scheduler.remove(handle),
      None => {
        // stays queued; the immediate drainer observes has_cleared_timer
        self.entry.lock().state = TimerState::Cancelled;
      }
    }
    let prune = self.state.lock().has_accessed_primitive;
    if prune {
      scheduler.prune_primitive_id(self.kind, self.id);
    }
  }

  /// `ref()` / `unref()`. Only a transition flips keep-alive, and only
  /// when the timer can still fire.
  pub(crate) fn set_ref(
    &self,
    scheduler: &Arc<TimerScheduler>,
    value: bool,
  ) {
    let mut st = self.state.lock();
    if st.has_js_ref == value {
      return;
    }
    st.has_js_ref = value;
    if value {
      if !Self::is_finished_locked(&st, &self.entry) {
        Self::set_keep_alive_locked(&mut st, scheduler, true);
      }
    } else {
      Self::set_keep_alive_locked(&mut st, scheduler, false);
    }
  }

  pub fn has_ref(&self) -> bool {
    self.state.lock().has_js_ref
  }

  /// `timer.refresh()`: restart the countdown from now. Valid on live,
  /// fired, and cleared timers alike; a no-op for immediates (handled by
  /// the object layer).
  pub(crate) fn refresh(
    &self,
    handle: &TimerHandle,
    scheduler: &Arc<TimerScheduler>,
  ) {
    self.reschedule(handle, scheduler);
  }

  /// First primitive coercion lazily creates the ID-map entry so that
  /// `clear*` with a numeric or string ID can find this timer.
  pub(crate) fn primitive_value(
    &self,
    self_ref: &JsTimerRef,
    scheduler: &Arc<TimerScheduler>,
  ) -> i32 {
    let register = {
      let mut st = self.state.lock();
      if st.has_accessed_primitive {
        false
      } else {
        st.has_accessed_primitive = true;
        true
      }
    };
    if register {
      scheduler.register_primitive_id(self_ref);
    }
    self.id
  }

  fn is_finished_locked(
    st: &TimerObjectState,
    entry: &Mutex<crate::timer::EventLoopTimer>,
  ) -> bool {
    if st.has_cleared_timer {
      return true;
    }
    let state = entry.lock().state;
    matches!(state, TimerState::Fired | TimerState::Cancelled)
      && !st.in_callback
  }

  /// The JS-visible `_destroyed` property.
  pub fn is_destroyed(&self) -> bool {
    let st = self.state.lock();
    Self::is_finished_locked(&st, &self.entry)
  }

  /// GC finalizer for the JS wrapper: drop the strong handle. Idempotent;
  /// may run on a non-event-loop thread.
  pub(crate) fn finalize(&self) {
    self.state.lock().strong.clear();
  }

  #[cfg(test)]
  pub(crate) fn is_keeping_event_loop_alive(&self) -> bool {
    self.state.lock().is_keeping_event_loop_alive
  }
}
